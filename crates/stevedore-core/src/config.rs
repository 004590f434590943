//! Engine configuration types.

use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Configuration for the file-operation engine.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into))]
pub struct EngineConfig {
    /// Minimum delay between scan progress reports.
    #[builder(default = "Duration::from_millis(500)")]
    #[serde(default = "default_scan_interval")]
    pub scan_report_interval: Duration,

    /// Scan report is also due every this many recorded files.
    #[builder(default = "100")]
    #[serde(default = "default_scan_batch")]
    pub scan_report_batch: u64,

    /// Minimum delay between transfer progress reports.
    #[builder(default = "Duration::from_millis(200)")]
    #[serde(default = "default_transfer_interval")]
    pub transfer_report_interval: Duration,

    /// Chunk size for streamed file copies.
    #[builder(default = "64 * 1024")]
    #[serde(default = "default_copy_buffer")]
    pub copy_buffer_size: usize,

    /// How many candidate names the duplicate-name resolver probes before
    /// giving up and returning the original name.
    #[builder(default = "1000")]
    #[serde(default = "default_probe_limit")]
    pub duplicate_name_probe_limit: u64,
}

fn default_scan_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_scan_batch() -> u64 {
    100
}

fn default_transfer_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_copy_buffer() -> usize {
    64 * 1024
}

fn default_probe_limit() -> u64 {
    1000
}

impl EngineConfig {
    /// Create a new config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_report_interval: default_scan_interval(),
            scan_report_batch: default_scan_batch(),
            transfer_report_interval: default_transfer_interval(),
            copy_buffer_size: default_copy_buffer(),
            duplicate_name_probe_limit: default_probe_limit(),
        }
    }
}
