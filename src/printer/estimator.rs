// src/printer/estimator.rs
//! Print-completion estimate fused from three noisy time sources.
//!
//! * file: elapsed print time extrapolated over the byte position inside the
//!   gcode body,
//! * history: the total duration of a previous completed run of the same file,
//! * slicer: the slicer's static pre-print estimate.
//!
//! Everything here is a pure function of the snapshot, the job context and the
//! wall clock passed in. A remaining time of `0.0` means "unknown".

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::job::{FileMetadata, HistoryJob, JobContext};
use super::status::{StatusSnapshot, VirtualSdCard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerProgress {
    pub current: u32,
    pub total: u32,
}

/// Normalised progress record for the active job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEstimate {
    pub filename: String,
    /// Relay route serving the largest thumbnail, if the slicer embedded any.
    pub thumbnail: Option<String>,
    /// Whole percent, rounded down.
    pub progress: u8,
    pub print_duration: f64,
    pub total_duration: f64,
    pub file_remaining: f64,
    pub slicer_remaining: f64,
    pub history_remaining: f64,
    pub eta: DateTime<Utc>,
    pub layers: Option<LayerProgress>,
}

/// Time signals that vote on the ETA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtaSignal {
    /// History-based remaining when positive, otherwise file-based.
    Measured,
    Slicer,
}

pub const ETA_SIGNALS: [EtaSignal; 2] = [EtaSignal::Measured, EtaSignal::Slicer];

fn finite(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

fn finite_opt(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Fraction of the gcode body consumed, in `0.0..=1.0`.
///
/// Uses the byte position against the slicer's gcode byte range when both are
/// known; otherwise the firmware's own progress.
pub fn file_progress(sdcard: Option<&VirtualSdCard>, metadata: Option<&FileMetadata>) -> f64 {
    let position = sdcard.and_then(|card| card.file_position);
    let range = metadata.and_then(|meta| meta.gcode_start_byte.zip(meta.gcode_end_byte));

    if let (Some(position), Some((start, end))) = (position, range) {
        if end > start {
            if position <= start {
                return 0.0;
            }
            if position >= end {
                return 1.0;
            }
            return (position - start) as f64 / (end - start) as f64;
        }
    }

    finite_opt(sdcard.and_then(|card| card.progress))
        .unwrap_or(0.0)
        .clamp(0.0, 1.0)
}

pub fn file_remaining(print_duration: f64, progress: f64) -> f64 {
    if print_duration > 0.0 && progress > 0.0 {
        finite(print_duration / progress - print_duration)
    } else {
        0.0
    }
}

pub fn history_remaining(history: Option<&HistoryJob>, print_duration: f64) -> f64 {
    match history {
        Some(job) if job.is_completed() => finite_opt(job.total_duration)
            .map(|total| finite(total - print_duration))
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

pub fn slicer_remaining(metadata: Option<&FileMetadata>, print_duration: f64) -> f64 {
    match finite_opt(metadata.and_then(|meta| meta.estimated_time)) {
        Some(total) if total > 0.0 => finite(total - print_duration),
        _ => 0.0,
    }
}

/// Seconds until completion: the mean of the strictly positive signals.
pub fn eta_offset(file: f64, history: f64, slicer: f64) -> f64 {
    let votes: Vec<f64> = ETA_SIGNALS
        .iter()
        .map(|signal| match signal {
            EtaSignal::Measured => {
                if history > 0.0 { history } else { file }
            }
            EtaSignal::Slicer => slicer,
        })
        .filter(|seconds| *seconds > 0.0)
        .collect();

    if votes.is_empty() {
        0.0
    } else {
        finite(votes.iter().sum::<f64>() / votes.len() as f64)
    }
}

/// Route path of the largest-by-area thumbnail, served by the relay.
pub fn thumbnail_route(printer_key: &str, metadata: Option<&FileMetadata>) -> Option<String> {
    let largest = metadata?
        .thumbnails
        .iter()
        .filter(|thumb| !thumb.relative_path.is_empty())
        .max_by_key(|thumb| thumb.pixel_area())?;
    let path = largest
        .relative_path
        .strip_prefix(".thumbs/")
        .unwrap_or(&largest.relative_path);
    Some(format!("/printers/{}/thumbnail/{}", printer_key, path))
}

fn layer_from_height(height: f64, first_layer_height: f64, layer_height: f64) -> Option<u32> {
    if layer_height <= 0.0 {
        return None;
    }
    let layer = ((height - first_layer_height) / layer_height + 1.0).ceil();
    (layer.is_finite() && layer > 0.0).then_some(layer as u32)
}

pub fn layer_progress(status: &StatusSnapshot, metadata: Option<&FileMetadata>) -> Option<LayerProgress> {
    let info = status.print_stats.as_ref().and_then(|stats| stats.info.as_ref());

    let total = info
        .and_then(|info| info.total_layer)
        .or_else(|| metadata.and_then(|meta| meta.layer_count))
        .or_else(|| {
            let meta = metadata?;
            layer_from_height(meta.object_height?, meta.first_layer_height?, meta.layer_height?)
        })
        .unwrap_or(0);
    if total == 0 {
        return None;
    }

    let print_duration = status
        .print_stats
        .as_ref()
        .and_then(|stats| finite_opt(stats.print_duration))
        .unwrap_or(0.0);
    let current = info
        .and_then(|info| info.current_layer)
        .or_else(|| {
            let meta = metadata?;
            let z = *status.gcode_move.as_ref()?.gcode_position.as_ref()?.get(2)?;
            if print_duration <= 0.0 {
                return None;
            }
            layer_from_height(z, meta.first_layer_height?, meta.layer_height?)
        })
        .unwrap_or(0);

    Some(LayerProgress { current, total })
}

/// Build the estimate for the file currently loaded in `status`.
///
/// `context` is ignored unless it describes that same file.
pub fn estimate(
    printer_key: &str,
    status: &StatusSnapshot,
    context: Option<&JobContext>,
    now: DateTime<Utc>,
) -> JobEstimate {
    let filename = status.filename().unwrap_or_default().to_string();
    let context = context.filter(|ctx| ctx.filename == filename);
    let metadata = context.and_then(|ctx| ctx.metadata.as_ref());
    let history = context.and_then(|ctx| ctx.history.as_ref());

    let stats = status.print_stats.as_ref();
    let print_duration = stats
        .and_then(|s| finite_opt(s.print_duration))
        .unwrap_or(0.0);
    let total_duration = stats
        .and_then(|s| finite_opt(s.total_duration))
        .unwrap_or(0.0);

    let progress = file_progress(status.virtual_sdcard.as_ref(), metadata);
    let file_left = file_remaining(print_duration, progress);
    let history_left = history_remaining(history, print_duration);
    let slicer_left = slicer_remaining(metadata, print_duration);

    let offset = eta_offset(file_left, history_left, slicer_left);
    let eta = TimeDelta::try_milliseconds((offset * 1000.0).round() as i64)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(now);

    JobEstimate {
        thumbnail: thumbnail_route(printer_key, metadata),
        progress: (progress * 100.0).floor().clamp(0.0, 100.0) as u8,
        print_duration,
        total_duration,
        file_remaining: file_left,
        slicer_remaining: slicer_left,
        history_remaining: history_left,
        eta,
        layers: layer_progress(status, metadata),
        filename,
    }
}
