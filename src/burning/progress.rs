//! Progress reporting from a background job
//!
//! Snapshots are immutable values pushed through a latest-wins channel: the
//! producer never blocks and never queues, an unread snapshot is simply
//! replaced by the next one. Every push gets a sequence number so the
//! consumer can tell how many snapshots it missed.

use serde::Serialize;
use tokio::sync::watch;

use crate::device::{WriteAction, WriteEvent};

/// Write percent for one engine event.
///
/// `floor(100 * (last_written - start) / sector_count)`, clamped to 0..=100,
/// and 0 when the sector count or the written delta is not positive.
pub fn write_percent(event: &WriteEvent) -> u8 {
    if event.sector_count <= 0 {
        return 0;
    }
    let written = event.last_written_lba.saturating_sub(event.start_lba);
    if written <= 0 {
        return 0;
    }
    let percent = i128::from(written) * 100 / i128::from(event.sector_count);
    percent.min(100) as u8
}

/// Erase percent from elapsed and estimated time; 0 while indeterminate
pub fn erase_percent(elapsed_secs: u32, estimated_total_secs: u32) -> u8 {
    if estimated_total_secs == 0 {
        return 0;
    }
    let percent = u64::from(elapsed_secs) * 100 / u64::from(estimated_total_secs);
    percent.min(100) as u8
}

/// Image build percent from copied and total sectors
pub fn build_percent(copied_sectors: u64, total_sectors: u64) -> u8 {
    if total_sectors == 0 {
        return 100;
    }
    let percent = u128::from(copied_sectors) * 100 / u128::from(total_sectors);
    percent.min(100) as u8
}

/// Write-phase progress record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteProgress {
    pub action: Option<WriteAction>,
    pub percent: u8,
    pub elapsed_secs: i64,
    pub remaining_secs: i64,
    pub total_secs: i64,
    pub start_lba: i64,
    pub sector_count: i64,
    pub last_read_lba: i64,
    pub last_written_lba: i64,
    pub total_system_buffer: i64,
    pub used_system_buffer: i64,
    pub free_system_buffer: i64,
}

impl WriteProgress {
    fn from_event(event: &WriteEvent, percent: u8) -> Self {
        Self {
            action: event.action,
            percent,
            elapsed_secs: event.elapsed_secs,
            remaining_secs: event.remaining_secs,
            total_secs: event.total_secs,
            start_lba: event.start_lba,
            sector_count: event.sector_count,
            last_read_lba: event.last_read_lba,
            last_written_lba: event.last_written_lba,
            total_system_buffer: event.total_system_buffer,
            used_system_buffer: event.used_system_buffer,
            free_system_buffer: event.free_system_buffer,
        }
    }
}

/// Turns raw write events into progress records whose percent never drops
#[derive(Debug, Default)]
pub struct WriteProgressTracker {
    highest: u8,
}

impl WriteProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: &WriteEvent) -> WriteProgress {
        self.highest = self.highest.max(write_percent(event));
        WriteProgress::from_event(event, self.highest)
    }
}

/// One progress report from a running job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProgressSnapshot {
    /// An item was fully added to the image
    Build {
        item: String,
        percent: u8,
        copied_sectors: u64,
        total_sectors: u64,
    },
    Write(WriteProgress),
    Erase {
        elapsed_secs: u32,
        estimated_total_secs: u32,
        percent: u8,
    },
}

impl ProgressSnapshot {
    pub fn erase(elapsed_secs: u32, estimated_total_secs: u32) -> Self {
        ProgressSnapshot::Erase {
            elapsed_secs,
            estimated_total_secs,
            percent: erase_percent(elapsed_secs, estimated_total_secs),
        }
    }

    pub fn percent(&self) -> u8 {
        match self {
            ProgressSnapshot::Build { percent, .. } | ProgressSnapshot::Erase { percent, .. } => {
                *percent
            }
            ProgressSnapshot::Write(write) => write.percent,
        }
    }

    /// Status line for this snapshot
    pub fn status_text(&self) -> String {
        match self {
            ProgressSnapshot::Build { item, .. } => format!("Adding \"{}\" to image...", item),
            ProgressSnapshot::Erase { percent, .. } => format!("Formatting {}%...", percent),
            ProgressSnapshot::Write(write) => match write.action {
                Some(WriteAction::ValidatingMedia) => "Validating current media...".to_string(),
                Some(WriteAction::FormattingMedia) => "Formatting media...".to_string(),
                Some(WriteAction::InitializingHardware) => "Initializing hardware...".to_string(),
                Some(WriteAction::CalibratingPower) => "Optimizing laser intensity...".to_string(),
                Some(WriteAction::WritingData) => format!("Progress: {}%", write.percent),
                Some(WriteAction::Finalization) => "Finalizing writing...".to_string(),
                Some(WriteAction::Completed) => "Completed!".to_string(),
                Some(WriteAction::Verifying) => "Verifying".to_string(),
                None => String::new(),
            },
        }
    }
}

/// A snapshot together with its position in the job's stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    /// Starts at 1 and grows by one per push
    pub sequence: u64,
    pub snapshot: ProgressSnapshot,
}

/// Create a connected producer/consumer pair
pub fn progress_bridge() -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = watch::channel(None);
    (
        ProgressSender { tx, sequence: 0 },
        ProgressReceiver {
            rx,
            last_seen: 0,
            missed: 0,
        },
    )
}

/// Producer side, owned by the background job
#[derive(Debug)]
pub struct ProgressSender {
    tx: watch::Sender<Option<Progress>>,
    sequence: u64,
}

impl ProgressSender {
    /// Publish a snapshot, replacing any the consumer has not read yet
    pub fn push(&mut self, snapshot: ProgressSnapshot) {
        self.sequence += 1;
        self.tx.send_replace(Some(Progress {
            sequence: self.sequence,
            snapshot,
        }));
    }

    pub fn pushed(&self) -> u64 {
        self.sequence
    }
}

/// Consumer side, owned by the interactive context
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: watch::Receiver<Option<Progress>>,
    last_seen: u64,
    missed: u64,
}

impl ProgressReceiver {
    /// The newest snapshot if it has not been returned before
    pub fn poll(&mut self) -> Option<Progress> {
        let latest = self.rx.borrow_and_update().clone()?;
        if latest.sequence <= self.last_seen {
            return None;
        }
        self.missed += latest.sequence - self.last_seen - 1;
        self.last_seen = latest.sequence;
        Some(latest)
    }

    /// Wait for a snapshot newer than the last one returned.
    ///
    /// Returns `None` once the producer is gone and nothing new is left.
    pub async fn next(&mut self) -> Option<Progress> {
        loop {
            if let Some(progress) = self.poll() {
                return Some(progress);
            }
            if self.rx.changed().await.is_err() {
                return self.poll();
            }
        }
    }

    /// Snapshots replaced before they could be read
    pub fn missed(&self) -> u64 {
        self.missed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writing(start: i64, count: i64, last_written: i64) -> WriteEvent {
        WriteEvent {
            action: Some(WriteAction::WritingData),
            start_lba: start,
            sector_count: count,
            last_written_lba: last_written,
            ..WriteEvent::default()
        }
    }

    #[test]
    fn test_write_percent_floor() {
        assert_eq!(write_percent(&writing(0, 1000, 0)), 0);
        assert_eq!(write_percent(&writing(0, 1000, 999)), 99);
        assert_eq!(write_percent(&writing(0, 1000, 1000)), 100);
        assert_eq!(write_percent(&writing(100, 3, 101)), 33);
        assert_eq!(write_percent(&writing(100, 3, 102)), 66);
    }

    #[test]
    fn test_write_percent_guards() {
        assert_eq!(write_percent(&writing(0, 0, 500)), 0);
        assert_eq!(write_percent(&writing(0, -5, 500)), 0);
        assert_eq!(write_percent(&writing(500, 1000, 400)), 0);
        assert_eq!(write_percent(&writing(500, 1000, 500)), 0);
        assert_eq!(write_percent(&writing(0, 1000, 5000)), 100);
        assert_eq!(write_percent(&writing(i64::MIN, 10, i64::MAX)), 100);
    }

    #[test]
    fn test_write_percent_matches_formula() {
        let count = 7919;
        for written in (0..=count).step_by(37) {
            let expected = (100 * written / count) as u8;
            assert_eq!(write_percent(&writing(0, count, written)), expected);
        }
    }

    #[test]
    fn test_tracker_never_goes_backwards() {
        let mut tracker = WriteProgressTracker::new();
        assert_eq!(tracker.record(&writing(0, 100, 40)).percent, 40);
        assert_eq!(tracker.record(&writing(0, 100, 30)).percent, 40);
        assert_eq!(tracker.record(&writing(0, 100, 100)).percent, 100);

        let completed = WriteEvent {
            action: Some(WriteAction::Completed),
            ..WriteEvent::default()
        };
        assert_eq!(tracker.record(&completed).percent, 100);
    }

    #[test]
    fn test_erase_percent() {
        assert_eq!(erase_percent(0, 0), 0);
        assert_eq!(erase_percent(30, 0), 0);
        assert_eq!(erase_percent(30, 60), 50);
        assert_eq!(erase_percent(59, 60), 98);
        assert_eq!(erase_percent(90, 60), 100);
    }

    #[test]
    fn test_build_percent() {
        assert_eq!(build_percent(0, 10), 0);
        assert_eq!(build_percent(5, 10), 50);
        assert_eq!(build_percent(0, 0), 100);
    }

    #[test]
    fn test_status_text() {
        let build = ProgressSnapshot::Build {
            item: "photos".to_string(),
            percent: 10,
            copied_sectors: 1,
            total_sectors: 10,
        };
        assert_eq!(build.status_text(), "Adding \"photos\" to image...");

        let mut tracker = WriteProgressTracker::new();
        let write = ProgressSnapshot::Write(tracker.record(&writing(0, 4, 1)));
        assert_eq!(write.status_text(), "Progress: 25%");

        let calibrating = WriteEvent {
            action: Some(WriteAction::CalibratingPower),
            ..WriteEvent::default()
        };
        let write = ProgressSnapshot::Write(tracker.record(&calibrating));
        assert_eq!(write.status_text(), "Optimizing laser intensity...");

        assert_eq!(ProgressSnapshot::erase(15, 60).status_text(), "Formatting 25%...");
    }

    #[test]
    fn test_snapshot_serializes_with_kind_tag() {
        let json = serde_json::to_string(&ProgressSnapshot::erase(1, 0)).unwrap();
        assert!(json.contains("\"kind\":\"erase\""));
        assert!(json.contains("\"percent\":0"));
    }

    #[test]
    fn test_bridge_latest_wins() {
        let (mut tx, mut rx) = progress_bridge();
        assert!(rx.poll().is_none());

        tx.push(ProgressSnapshot::erase(1, 10));
        tx.push(ProgressSnapshot::erase(2, 10));
        tx.push(ProgressSnapshot::erase(3, 10));

        let progress = rx.poll().unwrap();
        assert_eq!(progress.sequence, 3);
        assert_eq!(progress.snapshot, ProgressSnapshot::erase(3, 10));
        assert_eq!(rx.missed(), 2);
        assert!(rx.poll().is_none());

        tx.push(ProgressSnapshot::erase(4, 10));
        assert_eq!(rx.poll().map(|p| p.sequence), Some(4));
        assert_eq!(rx.missed(), 2);
        assert_eq!(tx.pushed(), 4);
    }

    #[test]
    fn test_push_without_consumer_does_not_fail() {
        let (mut tx, rx) = progress_bridge();
        drop(rx);
        tx.push(ProgressSnapshot::erase(1, 1));
        assert_eq!(tx.pushed(), 1);
    }

    #[tokio::test]
    async fn test_next_waits_for_producer() {
        let (mut tx, mut rx) = progress_bridge();
        let producer = tokio::task::spawn_blocking(move || {
            for step in 1..=5 {
                tx.push(ProgressSnapshot::erase(step, 5));
            }
        });

        let mut sequences = Vec::new();
        while let Some(progress) = rx.next().await {
            sequences.push(progress.sequence);
        }
        producer.await.unwrap();

        assert_eq!(sequences.last(), Some(&5));
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(rx.missed() + sequences.len() as u64, 5);
    }
}
