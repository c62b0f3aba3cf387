//! Connection lifecycle of one printer driven through scripted collaborators.

mod common;

use std::time::Duration;

use common::{rig, settle};
use printdeck::rpc::{LinkEvent, RpcError};
use printdeck::{ConnectionState, FirmwareState};
use serde_json::json;

fn ready() -> serde_json::Value {
    json!({ "state": "ready", "state_message": "Printer is ready" })
}

fn seeded_status() -> serde_json::Value {
    json!({
        "status": {
            "extruder": { "temperature": 210.5, "target": 215.0 },
            "heater_bed": { "temperature": 60.0, "target": 60.0 },
            "print_stats": { "state": "standby" }
        }
    })
}

#[tokio::test(start_paused = true)]
async fn online_printer_connects_and_seeds_snapshot() {
    let rig = rig(true);
    rig.transport.reply("printer.info", Ok(ready()));
    rig.transport.reply("printer.objects.subscribe", Ok(seeded_status()));

    settle().await;

    let view = rig.handle.snapshot();
    assert_eq!(view.connection, ConnectionState::LinkOpen);
    assert_eq!(view.firmware, FirmwareState::Ready);
    let extruder = view.status.extruder.as_ref().unwrap();
    assert_eq!(extruder.temperature, Some(210.5));
    assert_eq!(extruder.target, Some(215.0));
    assert_eq!(rig.transport.calls_to("printer.info"), 1);
    assert_eq!(rig.transport.calls_to("printer.objects.subscribe"), 1);
}

#[tokio::test(start_paused = true)]
async fn offline_printer_never_opens_a_link() {
    let rig = rig(false);
    settle().await;
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(rig.handle.snapshot().connection, ConnectionState::Offline);
    assert!(rig.transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn firmware_info_failure_is_retried() {
    let rig = rig(true);
    rig.transport.reply("printer.info", Err(RpcError::Timeout));
    rig.transport.reply("printer.info", Ok(json!({ "state": "startup" })));
    rig.transport.reply("printer.info", Ok(ready()));

    settle().await;
    assert_eq!(rig.transport.calls_to("printer.info"), 1);
    assert_eq!(rig.handle.snapshot().firmware, FirmwareState::Disconnected);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    settle().await;
    // answered, but still starting up: wait for the ready notification
    assert_eq!(rig.transport.calls_to("printer.info"), 2);
    assert_eq!(rig.handle.snapshot().firmware, FirmwareState::Disconnected);

    rig.transport.notify("notify_klippy_ready", vec![]);
    settle().await;
    assert_eq!(rig.handle.snapshot().firmware, FirmwareState::Ready);
    assert_eq!(rig.transport.calls_to("printer.objects.subscribe"), 1);
}

#[tokio::test(start_paused = true)]
async fn subscribe_failure_retries_after_interval() {
    let rig = rig(true);
    rig.transport.reply("printer.info", Ok(ready()));
    rig.transport.reply("printer.objects.subscribe", Err(RpcError::Timeout));
    rig.transport.reply("printer.objects.subscribe", Ok(seeded_status()));

    settle().await;
    assert_eq!(rig.transport.calls_to("printer.objects.subscribe"), 1);
    assert!(rig.handle.snapshot().status.is_empty());

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(rig.transport.calls_to("printer.objects.subscribe"), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    settle().await;
    assert_eq!(rig.transport.calls_to("printer.objects.subscribe"), 2);
    assert!(rig.handle.snapshot().status.extruder.is_some());
}

#[tokio::test(start_paused = true)]
async fn link_close_cancels_pending_retry() {
    let rig = rig(true);
    rig.transport.reply("printer.info", Ok(ready()));
    rig.transport.reply("printer.objects.subscribe", Err(RpcError::Timeout));
    rig.transport.reply("printer.objects.subscribe", Ok(seeded_status()));

    settle().await;
    assert_eq!(rig.transport.calls_to("printer.objects.subscribe"), 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    rig.transport.emit(LinkEvent::Close);
    settle().await;

    tokio::time::sleep(Duration::from_millis(3000)).await;
    settle().await;

    let view = rig.handle.snapshot();
    assert_eq!(view.connection, ConnectionState::Offline);
    assert_eq!(view.firmware, FirmwareState::Disconnected);
    assert!(view.status.is_empty());
    assert_eq!(rig.transport.calls_to("printer.objects.subscribe"), 1);
    assert_eq!(rig.transport.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_clears_snapshot_and_ready_resubscribes() {
    let rig = rig(true);
    rig.transport.reply("printer.info", Ok(ready()));
    rig.transport.reply("printer.objects.subscribe", Ok(seeded_status()));
    settle().await;
    assert!(!rig.handle.snapshot().status.is_empty());

    rig.transport.notify("notify_klippy_shutdown", vec![]);
    settle().await;
    let view = rig.handle.snapshot();
    assert_eq!(view.firmware, FirmwareState::Shutdown);
    assert!(view.status.is_empty());

    // fragments are ignored until the firmware is ready again
    rig.transport.notify(
        "notify_status_update",
        vec![json!({ "extruder": { "temperature": 30.0 } }), json!(12.5)],
    );
    settle().await;
    assert!(rig.handle.snapshot().status.is_empty());

    rig.transport.notify("notify_klippy_ready", vec![]);
    settle().await;
    assert_eq!(rig.handle.snapshot().firmware, FirmwareState::Ready);
    assert_eq!(rig.transport.calls_to("printer.objects.subscribe"), 2);
}

#[tokio::test(start_paused = true)]
async fn status_fragments_merge_into_snapshot() {
    let rig = rig(true);
    rig.transport.reply("printer.info", Ok(ready()));
    rig.transport.reply("printer.objects.subscribe", Ok(seeded_status()));
    settle().await;

    rig.transport.notify(
        "notify_status_update",
        vec![json!({ "extruder": { "temperature": 212.0 } }), json!(100.0)],
    );
    settle().await;

    let view = rig.handle.snapshot();
    let extruder = view.status.extruder.as_ref().unwrap();
    assert_eq!(extruder.temperature, Some(212.0));
    assert_eq!(extruder.target, Some(215.0));
    assert_eq!(view.status.heater_bed.as_ref().unwrap().temperature, Some(60.0));
}

#[tokio::test(start_paused = true)]
async fn lost_heartbeat_takes_printer_offline_and_back() {
    let rig = rig(true);
    rig.transport.reply("printer.info", Ok(ready()));
    rig.transport.reply("printer.objects.subscribe", Ok(seeded_status()));
    settle().await;
    assert_eq!(rig.handle.snapshot().connection, ConnectionState::LinkOpen);

    rig.probe.set(false);
    tokio::time::sleep(Duration::from_millis(1600)).await;
    settle().await;
    let view = rig.handle.snapshot();
    assert_eq!(view.connection, ConnectionState::Offline);
    assert!(view.status.is_empty());
    assert_eq!(rig.transport.closes(), 1);

    rig.transport.reply("printer.info", Ok(ready()));
    rig.probe.set(true);
    tokio::time::sleep(Duration::from_millis(1600)).await;
    settle().await;
    let view = rig.handle.snapshot();
    assert_eq!(view.connection, ConnectionState::LinkOpen);
    assert_eq!(view.firmware, FirmwareState::Ready);
    assert_eq!(rig.transport.calls_to("printer.info"), 2);
}

#[tokio::test(start_paused = true)]
async fn each_transition_is_published_once() {
    let rig = rig(true);
    let mut updates = rig.registry.subscribe();
    rig.transport.reply("printer.info", Ok(ready()));
    rig.transport.reply("printer.objects.subscribe", Ok(seeded_status()));
    settle().await;

    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        assert_eq!(update.key, "voron");
        seen.push((update.view.connection, update.view.firmware, update.view.status.is_empty()));
    }
    assert_eq!(
        seen,
        vec![
            (ConnectionState::LinkOpening, FirmwareState::Disconnected, true),
            (ConnectionState::LinkOpen, FirmwareState::Disconnected, true),
            (ConnectionState::LinkOpen, FirmwareState::Ready, true),
            (ConnectionState::LinkOpen, FirmwareState::Ready, false),
        ]
    );

    // repeating the same fragment changes nothing and publishes nothing
    rig.transport.notify("notify_status_update", vec![json!({ "extruder": { "temperature": 210.5 } })]);
    settle().await;
    assert!(updates.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn active_job_gets_an_estimate() {
    let rig = rig(true);
    rig.transport.reply("printer.info", Ok(ready()));
    rig.transport.reply(
        "printer.objects.subscribe",
        Ok(json!({
            "status": {
                "print_stats": {
                    "filename": "cube.gcode",
                    "state": "printing",
                    "print_duration": 100.0,
                    "total_duration": 120.0
                },
                "virtual_sdcard": { "file_position": 600, "progress": 0.5 }
            }
        })),
    );
    rig.transport.reply("server.history.list", Ok(json!({ "jobs": [] })));
    rig.transport.reply(
        "server.files.metadata",
        Ok(json!({
            "filename": "cube.gcode",
            "estimated_time": 500.0,
            "gcode_start_byte": 100,
            "gcode_end_byte": 1100,
            "thumbnails": [
                { "width": 32, "height": 32, "size": 900, "relative_path": ".thumbs/cube-32x32.png" },
                { "width": 300, "height": 300, "size": 9000, "relative_path": ".thumbs/cube-300x300.png" }
            ]
        })),
    );
    settle().await;

    let estimate = rig.handle.job_estimate().unwrap();
    assert_eq!(estimate.filename, "cube.gcode");
    assert_eq!(estimate.progress, 50);
    assert_eq!(estimate.file_remaining, 100.0);
    assert_eq!(estimate.slicer_remaining, 400.0);
    assert_eq!(estimate.history_remaining, 0.0);
    assert_eq!(
        estimate.thumbnail.as_deref(),
        Some("/printers/voron/thumbnail/cube-300x300.png")
    );
    assert_eq!(rig.transport.calls_to("server.files.metadata"), 1);

    // the published view carries the same job
    let view = rig.handle.snapshot();
    assert_eq!(view.job.as_ref().map(|job| job.progress), Some(50));
}

#[tokio::test(start_paused = true)]
async fn failed_job_lookups_are_retried() {
    let rig = rig(true);
    rig.transport.reply("printer.info", Ok(ready()));
    rig.transport.reply(
        "printer.objects.subscribe",
        Ok(json!({
            "status": {
                "print_stats": { "filename": "cube.gcode", "state": "printing", "print_duration": 100.0 },
                "virtual_sdcard": { "file_position": 600, "progress": 0.5 }
            }
        })),
    );
    rig.transport.reply("server.history.list", Err(RpcError::Timeout));
    rig.transport.reply("server.history.list", Ok(json!({ "jobs": [] })));
    rig.transport.reply("server.files.metadata", Err(RpcError::Timeout));
    rig.transport.reply(
        "server.files.metadata",
        Ok(json!({
            "filename": "cube.gcode",
            "estimated_time": 500.0,
            "gcode_start_byte": 100,
            "gcode_end_byte": 1100
        })),
    );
    settle().await;

    assert_eq!(rig.transport.calls_to("server.files.metadata"), 1);
    let context = rig.handle.snapshot().job_context.clone().unwrap();
    assert!(context.history_failed);
    assert!(context.metadata_failed);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    settle().await;

    assert_eq!(rig.transport.calls_to("server.history.list"), 2);
    assert_eq!(rig.transport.calls_to("server.files.metadata"), 2);
    let context = rig.handle.snapshot().job_context.clone().unwrap();
    assert!(!context.is_incomplete());
    let estimate = rig.handle.job_estimate().unwrap();
    assert_eq!(estimate.progress, 50);
    assert_eq!(estimate.slicer_remaining, 400.0);

    // known metadata is reused by later refreshes
    tokio::time::sleep(Duration::from_millis(1000)).await;
    settle().await;
    assert_eq!(rig.transport.calls_to("server.files.metadata"), 2);
}

#[tokio::test(start_paused = true)]
async fn no_loaded_file_means_no_estimate() {
    let rig = rig(true);
    rig.transport.reply("printer.info", Ok(ready()));
    rig.transport.reply("printer.objects.subscribe", Ok(seeded_status()));
    settle().await;

    assert!(rig.handle.job_estimate().is_none());
    assert!(rig.registry.job_estimate("voron").unwrap().is_none());
}
