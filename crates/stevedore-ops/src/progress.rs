//! Progress aggregation for the scan and transfer passes.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use stevedore_core::ItemAttrs;

/// Totals accumulated by a job's scan pass.
///
/// Every visited item counts as one file (directories contribute zero bytes).
/// Once scanning ends the totals become the baseline for [`TransferInfo`].
#[derive(Debug, Clone)]
pub struct ScanInfo {
    files: u64,
    size: u64,
    last_report: Option<Instant>,
    files_at_last_report: u64,
}

impl ScanInfo {
    pub fn new() -> Self {
        Self {
            files: 0,
            size: 0,
            last_report: None,
            files_at_last_report: 0,
        }
    }

    /// Record one scanned item.
    pub fn record(&mut self, attrs: &ItemAttrs) {
        self.files += 1;
        self.size += attrs.transfer_size();
    }

    pub fn files(&self) -> u64 {
        self.files
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether a progress report is due, and if so, mark it emitted.
    ///
    /// A report is due every `batch` recorded files or once `interval` has
    /// elapsed since the previous report, whichever comes first. Between two
    /// time-triggered reports at least `interval` passes.
    pub fn should_report(&mut self, interval: Duration, batch: u64) -> bool {
        let batch_due = self.files - self.files_at_last_report >= batch;
        let time_due = self
            .last_report
            .map(|at| at.elapsed() >= interval)
            .unwrap_or(true);
        if batch_due || time_due {
            self.last_report = Some(Instant::now());
            self.files_at_last_report = self.files;
            true
        } else {
            false
        }
    }
}

impl Default for ScanInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress of a job's transfer pass against its scan baseline.
///
/// Invariant: `transferred_files <= files` and `transferred_size <= size` at
/// every observation point. Skips remove items from the totals entirely, so
/// the counters stay consistent for percentage displays.
#[derive(Debug, Clone)]
pub struct TransferInfo {
    files: u64,
    size: u64,
    transferred_files: u64,
    transferred_size: u64,
    target: Option<PathBuf>,
    last_report: Option<Instant>,
}

impl TransferInfo {
    /// Derive transfer totals from a completed scan.
    pub fn new(scan: &ScanInfo, target: Option<PathBuf>) -> Self {
        Self {
            files: scan.files(),
            size: scan.size(),
            transferred_files: 0,
            transferred_size: 0,
            target,
            last_report: None,
        }
    }

    pub fn files(&self) -> u64 {
        self.files
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn transferred_files(&self) -> u64 {
        self.transferred_files
    }

    pub fn transferred_size(&self) -> u64 {
        self.transferred_size
    }

    pub fn target(&self) -> Option<&PathBuf> {
        self.target.as_ref()
    }

    pub fn remaining_files(&self) -> u64 {
        self.files.saturating_sub(self.transferred_files)
    }

    pub fn is_complete(&self) -> bool {
        self.transferred_files >= self.files
    }

    /// Record a fully transferred item, bytes and all.
    pub fn record_transferred(&mut self, attrs: &ItemAttrs) {
        self.transferred_files += 1;
        self.transferred_size += attrs.transfer_size();
    }

    /// Record a transferred item whose bytes were already added through
    /// [`add_transferred_size`](Self::add_transferred_size).
    pub fn record_file_done(&mut self) {
        self.transferred_files += 1;
    }

    /// Record an atomically transferred subtree.
    pub fn record_bulk(&mut self, files: u64, bytes: u64) {
        self.transferred_files += files;
        self.transferred_size += bytes;
    }

    /// Add bytes moved within one file copy.
    pub fn add_transferred_size(&mut self, delta: u64) {
        self.transferred_size += delta;
    }

    /// Remove bytes recorded by an attempt that failed partway, so a retry
    /// does not double-count them.
    pub fn rollback_transferred_size(&mut self, delta: u64) {
        self.transferred_size = self.transferred_size.saturating_sub(delta);
    }

    /// Remove a skipped item from the totals entirely.
    pub fn skip(&mut self, attrs: &ItemAttrs) {
        self.files = self.files.saturating_sub(1);
        self.size = self.size.saturating_sub(attrs.transfer_size());
    }

    /// Remove a skipped subtree from the totals.
    pub fn skip_bulk(&mut self, files: u64, bytes: u64) {
        self.files = self.files.saturating_sub(files);
        self.size = self.size.saturating_sub(bytes);
    }

    /// Remove a skipped item when byte accounting is not meaningful, e.g.
    /// permission changes.
    pub fn skip_ignoring_size(&mut self) {
        self.files = self.files.saturating_sub(1);
    }

    /// Whether a progress report is due, and if so, mark it emitted.
    pub fn should_report(&mut self, interval: Duration) -> bool {
        let due = self
            .last_report
            .map(|at| at.elapsed() >= interval)
            .unwrap_or(true);
        if due {
            self.last_report = Some(Instant::now());
        }
        due
    }

    /// Byte progress scaled into the platform progress-bar integer range.
    ///
    /// Numerator and denominator are divided by a common power of two, so the
    /// ratio is preserved. The value is clamped to the maximum; a source can
    /// deliver more bytes than its scanned size when it changed after the
    /// scan.
    pub fn scaled_progress(&self) -> (u64, u64) {
        let mut max = self.size;
        let mut value = self.transferred_size;
        while max > i32::MAX as u64 {
            max >>= 1;
            value >>= 1;
        }
        (max, value.min(max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stevedore_core::FileType;

    fn file_attrs(len: u64) -> ItemAttrs {
        ItemAttrs {
            len,
            file_type: FileType::File,
            modified: None,
            mode: None,
        }
    }

    fn dir_attrs() -> ItemAttrs {
        ItemAttrs {
            len: 4096,
            file_type: FileType::Directory,
            modified: None,
            mode: None,
        }
    }

    #[test]
    fn test_scan_directories_contribute_no_bytes() {
        let mut scan = ScanInfo::new();
        scan.record(&file_attrs(100));
        scan.record(&dir_attrs());

        assert_eq!(scan.files(), 2);
        assert_eq!(scan.size(), 100);
    }

    #[test]
    fn test_scan_report_every_batch() {
        let mut scan = ScanInfo::new();
        let long = Duration::from_secs(3600);

        // First record reports immediately (nothing reported yet).
        scan.record(&file_attrs(1));
        assert!(scan.should_report(long, 100));

        let mut reports = 0;
        for _ in 0..250 {
            scan.record(&file_attrs(1));
            if scan.should_report(long, 100) {
                reports += 1;
            }
        }
        // 100-file boundaries only; the interval never elapses.
        assert_eq!(reports, 2);
    }

    #[test]
    fn test_scan_report_not_more_often_than_interval() {
        let mut scan = ScanInfo::new();
        let long = Duration::from_secs(3600);

        scan.record(&file_attrs(1));
        assert!(scan.should_report(long, 100));
        for _ in 0..50 {
            scan.record(&file_attrs(1));
            assert!(!scan.should_report(long, 100));
        }
    }

    #[test]
    fn test_scan_report_after_interval() {
        let mut scan = ScanInfo::new();
        let short = Duration::from_millis(1);

        scan.record(&file_attrs(1));
        assert!(scan.should_report(short, 100));
        std::thread::sleep(Duration::from_millis(5));
        scan.record(&file_attrs(1));
        assert!(scan.should_report(short, 100));
    }

    #[test]
    fn test_transfer_invariants_through_skips() {
        let mut scan = ScanInfo::new();
        for len in [2048, 4096, 1024] {
            scan.record(&file_attrs(len));
        }

        let mut transfer = TransferInfo::new(&scan, None);
        assert_eq!(transfer.files(), 3);
        assert_eq!(transfer.size(), 7168);

        transfer.record_transferred(&file_attrs(2048));
        transfer.skip(&file_attrs(1024));
        transfer.record_transferred(&file_attrs(4096));

        assert_eq!(transfer.files(), 2);
        assert_eq!(transfer.size(), 6144);
        assert_eq!(transfer.transferred_files(), 2);
        assert_eq!(transfer.transferred_size(), 6144);
        assert!(transfer.transferred_files() <= transfer.files());
        assert!(transfer.transferred_size() <= transfer.size());
        assert!(transfer.is_complete());
    }

    #[test]
    fn test_incremental_size_and_rollback() {
        let mut scan = ScanInfo::new();
        scan.record(&file_attrs(1000));
        let mut transfer = TransferInfo::new(&scan, None);

        transfer.add_transferred_size(400);
        transfer.rollback_transferred_size(400);
        assert_eq!(transfer.transferred_size(), 0);

        transfer.add_transferred_size(1000);
        transfer.record_file_done();
        assert_eq!(transfer.transferred_files(), 1);
        assert_eq!(transfer.transferred_size(), 1000);
    }

    #[test]
    fn test_skip_ignoring_size() {
        let mut scan = ScanInfo::new();
        scan.record(&file_attrs(10));
        scan.record(&file_attrs(20));
        let mut transfer = TransferInfo::new(&scan, None);

        transfer.skip_ignoring_size();
        assert_eq!(transfer.files(), 1);
        assert_eq!(transfer.size(), 30);
    }

    #[test]
    fn test_scaled_progress_preserves_ratio() {
        let mut scan = ScanInfo::new();
        scan.record(&file_attrs(8 * (i32::MAX as u64)));
        let mut transfer = TransferInfo::new(&scan, None);
        transfer.add_transferred_size(2 * (i32::MAX as u64));

        let (max, value) = transfer.scaled_progress();
        assert!(max <= i32::MAX as u64);
        // Both sides divided by the same power of two: still one quarter.
        assert_eq!(value * 4, max);
    }

    #[test]
    fn test_small_totals_not_scaled() {
        let mut scan = ScanInfo::new();
        scan.record(&file_attrs(1000));
        let transfer = TransferInfo::new(&scan, None);

        let (max, value) = transfer.scaled_progress();
        assert_eq!(max, 1000);
        assert_eq!(value, 0);
    }
}
