// src/printer/job.rs
//! Slicer metadata and print history for the active file.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::rpc::{RpcError, RpcTransport};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub relative_path: String,
}

impl Thumbnail {
    pub fn pixel_area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Slicer-produced descriptors of a gcode file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub slicer: Option<String>,
    #[serde(default)]
    pub estimated_time: Option<f64>,
    #[serde(default)]
    pub gcode_start_byte: Option<u64>,
    #[serde(default)]
    pub gcode_end_byte: Option<u64>,
    #[serde(default)]
    pub layer_count: Option<u32>,
    #[serde(default)]
    pub layer_height: Option<f64>,
    #[serde(default)]
    pub first_layer_height: Option<f64>,
    #[serde(default)]
    pub object_height: Option<f64>,
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
}

/// One entry of `server.history.list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryJob {
    #[serde(default)]
    pub filename: Option<String>,
    /// completed, cancelled, error, in_progress, ...
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total_duration: Option<f64>,
    #[serde(default)]
    pub print_duration: Option<f64>,
    #[serde(default)]
    pub metadata: Option<FileMetadata>,
}

impl HistoryJob {
    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some("completed")
    }
}

#[derive(Debug, Default, Deserialize)]
struct HistoryList {
    #[serde(default)]
    jobs: Vec<HistoryJob>,
}

/// Out-of-band data the estimator needs for one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobContext {
    pub filename: String,
    pub metadata: Option<FileMetadata>,
    pub history: Option<HistoryJob>,
    /// The last history lookup failed; `history` is carried over.
    pub history_failed: bool,
    /// The last metadata lookup failed; `metadata` is carried over.
    pub metadata_failed: bool,
}

impl JobContext {
    pub fn pending(filename: &str) -> Self {
        Self { filename: filename.to_string(), ..Default::default() }
    }

    pub fn is_incomplete(&self) -> bool {
        self.history_failed || self.metadata_failed
    }

    /// Keep fetching while a lookup failed or the job is still running, so the
    /// history record follows the print.
    pub fn needs_refresh(&self, print_state: Option<&str>) -> bool {
        self.is_incomplete() || matches!(print_state, Some("printing") | Some("paused"))
    }
}

impl FileMetadata {
    /// Carries anything the estimate can use beyond the file name.
    pub fn is_informative(&self) -> bool {
        self.estimated_time.is_some()
            || (self.gcode_start_byte.is_some() && self.gcode_end_byte.is_some())
    }
}

/// Most recent history record, popped from the tail of a one-item listing.
pub async fn latest_history_job(transport: &dyn RpcTransport) -> Result<Option<HistoryJob>, RpcError> {
    let result = transport
        .call("server.history.list", Some(json!({ "limit": 1 })))
        .await?;
    let mut list: HistoryList =
        serde_json::from_value(result).map_err(|e| RpcError::Protocol(e.to_string()))?;
    Ok(list.jobs.pop())
}

pub async fn file_metadata(transport: &dyn RpcTransport, filename: &str) -> Result<FileMetadata, RpcError> {
    let result = transport
        .call("server.files.metadata", Some(json!({ "filename": filename })))
        .await?;
    serde_json::from_value(result).map_err(|e| RpcError::Protocol(e.to_string()))
}

/// Gather history and metadata for `filename`.
///
/// The history record is always requested again. Metadata is taken from the
/// history record when it embeds usable data, else reused from `previous`,
/// else queried. A failed lookup keeps what `previous` had and is flagged so
/// the caller can try again.
pub async fn fetch_job_context(
    transport: &dyn RpcTransport,
    filename: &str,
    previous: Option<&JobContext>,
) -> JobContext {
    let previous = previous.filter(|ctx| ctx.filename == filename);

    let (history, history_failed) = match latest_history_job(transport).await {
        Ok(job) => (job.filter(|job| job.filename.as_deref() == Some(filename)), false),
        Err(e) => {
            tracing::debug!("History lookup for '{}' failed: {}", filename, e);
            (previous.and_then(|ctx| ctx.history.clone()), true)
        }
    };

    let embedded = history
        .as_ref()
        .and_then(|job| job.metadata.clone())
        .filter(FileMetadata::is_informative);
    let known = previous
        .filter(|ctx| !ctx.metadata_failed)
        .and_then(|ctx| ctx.metadata.clone());
    let (metadata, metadata_failed) = match embedded.or(known) {
        Some(metadata) => (Some(metadata), false),
        None => match file_metadata(transport, filename).await {
            Ok(metadata) => (Some(metadata), false),
            Err(e) => {
                tracing::debug!("Metadata lookup for '{}' failed: {}", filename, e);
                (previous.and_then(|ctx| ctx.metadata.clone()), true)
            }
        },
    };

    JobContext {
        filename: filename.to_string(),
        metadata,
        history,
        history_failed,
        metadata_failed,
    }
}
