//! Pending attendance writes captured while the database is unreachable.
//!
//! Items are replayed first-in first-out on a timer or on demand. Replay is
//! best effort: a write the database rejects outright is dropped and logged,
//! and nothing orders a replayed submission against newer ones for the same
//! room beyond the queue itself.

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// A room's attendance for one day, ready to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RoomSubmission {
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    pub floor_number: u8,
    pub room_number: String,
    pub absent_student_ids: Vec<u64>,
    pub notes: Option<String>,
    pub marked_by: u64,
    #[schema(value_type = String, format = "date-time")]
    pub marked_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSubmission {
    pub id: String,
    pub submission: RoomSubmission,
    pub queued_at: NaiveDateTime,
    pub attempts: u32,
}

#[derive(Debug)]
pub enum SinkError {
    /// The backend could not be reached; try again later.
    Unavailable(String),
    /// The backend refused the write; retrying will not help.
    Rejected(String),
}

/// Where queued submissions are replayed to.
pub trait SubmissionSink {
    fn apply(&self, submission: &RoomSubmission) -> impl Future<Output = Result<(), SinkError>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct FlushReport {
    pub synced: usize,
    pub failed: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct QueueStatus {
    pub queue_size: usize,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub oldest_queued_at: Option<NaiveDateTime>,
}

pub struct OfflineQueue {
    items: Mutex<VecDeque<QueuedSubmission>>,
    path: Option<PathBuf>,
    flushing: Mutex<()>,
}

impl OfflineQueue {
    pub fn in_memory() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            path: None,
            flushing: Mutex::new(()),
        }
    }

    /// Restores a queue saved by a previous run. An unreadable file is logged
    /// and replaced.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<VecDeque<QueuedSubmission>>(&bytes) {
                Ok(items) => items,
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "Discarding unreadable offline queue");
                    VecDeque::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Failed to read offline queue");
                VecDeque::new()
            }
        };

        if !items.is_empty() {
            info!(pending = items.len(), "Restored offline queue");
        }

        Self {
            items: Mutex::new(items),
            path: Some(path),
            flushing: Mutex::new(()),
        }
    }

    async fn persist(&self, items: &VecDeque<QueuedSubmission>) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_snapshot(path, items).await {
            warn!(error = %e, path = %path.display(), "Failed to persist offline queue");
        }
    }

    pub async fn enqueue(&self, submission: RoomSubmission) -> QueuedSubmission {
        let item = QueuedSubmission {
            id: Uuid::new_v4().to_string(),
            submission,
            queued_at: Local::now().naive_local(),
            attempts: 0,
        };

        let mut items = self.items.lock().await;
        items.push_back(item.clone());
        self.persist(&items).await;

        info!(id = %item.id, pending = items.len(), "Submission queued for later sync");
        item
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn status(&self) -> QueueStatus {
        let items = self.items.lock().await;
        QueueStatus {
            queue_size: items.len(),
            oldest_queued_at: items.front().map(|i| i.queued_at),
        }
    }

    /// Replays queued submissions in order. Stops at the first item the sink
    /// reports as unavailable.
    pub async fn flush<S: SubmissionSink>(&self, sink: &S) -> FlushReport {
        let _flushing = self.flushing.lock().await;
        let mut report = FlushReport::default();

        loop {
            // only flush removes items, so the front stays put while unlocked
            let Some(next) = self.items.lock().await.front().cloned() else {
                break;
            };

            match sink.apply(&next.submission).await {
                Ok(()) => {
                    report.synced += 1;
                    debug!(id = %next.id, "Queued submission synced");
                    self.remove_front(&next.id).await;
                }
                Err(SinkError::Rejected(reason)) => {
                    report.failed += 1;
                    warn!(id = %next.id, %reason, "Dropping queued submission");
                    self.remove_front(&next.id).await;
                }
                Err(SinkError::Unavailable(reason)) => {
                    debug!(id = %next.id, %reason, "Backend still unavailable");
                    let mut items = self.items.lock().await;
                    if let Some(front) = items.front_mut() {
                        front.attempts += 1;
                    }
                    self.persist(&items).await;
                    break;
                }
            }
        }

        report.remaining = self.len().await;
        if report.synced > 0 || report.failed > 0 {
            info!(
                synced = report.synced,
                failed = report.failed,
                remaining = report.remaining,
                "Offline queue flushed"
            );
        }
        report
    }

    async fn remove_front(&self, id: &str) {
        let mut items = self.items.lock().await;
        if items.front().map(|i| i.id.as_str()) == Some(id) {
            items.pop_front();
        }
        self.persist(&items).await;
    }
}

async fn write_snapshot(path: &Path, items: &VecDeque<QueuedSubmission>) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec(items)?;
    tokio::fs::write(path, bytes).await
}

/// Flushes the queue every `interval` for the life of the server.
pub fn spawn_flusher<S>(queue: Arc<OfflineQueue>, sink: S, interval: Duration)
where
    S: SubmissionSink + 'static,
{
    actix_web::rt::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if queue.len().await > 0 {
                queue.flush(&sink).await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Replays scripted outcomes and records what it was asked to write.
    struct ScriptedSink {
        outcomes: StdMutex<VecDeque<Result<(), SinkError>>>,
        applied: StdMutex<Vec<String>>,
    }

    impl ScriptedSink {
        fn new(outcomes: Vec<Result<(), SinkError>>) -> Self {
            Self {
                outcomes: StdMutex::new(outcomes.into()),
                applied: StdMutex::new(Vec::new()),
            }
        }

        fn applied(&self) -> Vec<String> {
            self.applied.lock().unwrap().clone()
        }
    }

    impl SubmissionSink for ScriptedSink {
        async fn apply(&self, submission: &RoomSubmission) -> Result<(), SinkError> {
            self.applied.lock().unwrap().push(submission.room_number.clone());
            self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    fn submission(room: &str) -> RoomSubmission {
        let date = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        RoomSubmission {
            date,
            floor_number: 1,
            room_number: room.to_string(),
            absent_student_ids: vec![4, 9],
            notes: None,
            marked_by: 2,
            marked_at: date.and_hms_opt(21, 0, 0).unwrap(),
        }
    }

    #[actix_web::test]
    async fn replays_in_fifo_order() {
        let queue = OfflineQueue::in_memory();
        queue.enqueue(submission("101")).await;
        queue.enqueue(submission("102")).await;
        queue.enqueue(submission("103")).await;

        let sink = ScriptedSink::new(vec![]);
        let report = queue.flush(&sink).await;

        assert_eq!(sink.applied(), vec!["101", "102", "103"]);
        assert_eq!(report, FlushReport { synced: 3, failed: 0, remaining: 0 });
    }

    #[actix_web::test]
    async fn stops_when_backend_is_still_down() {
        let queue = OfflineQueue::in_memory();
        queue.enqueue(submission("101")).await;
        queue.enqueue(submission("102")).await;

        let sink = ScriptedSink::new(vec![
            Ok(()),
            Err(SinkError::Unavailable("pool timed out".into())),
        ]);
        let report = queue.flush(&sink).await;

        assert_eq!(report, FlushReport { synced: 1, failed: 0, remaining: 1 });
        let items = queue.items.lock().await;
        assert_eq!(items[0].submission.room_number, "102");
        assert_eq!(items[0].attempts, 1);
    }

    #[actix_web::test]
    async fn rejected_items_are_dropped_and_replay_continues() {
        let queue = OfflineQueue::in_memory();
        queue.enqueue(submission("101")).await;
        queue.enqueue(submission("102")).await;

        let sink = ScriptedSink::new(vec![Err(SinkError::Rejected("room emptied".into())), Ok(())]);
        let report = queue.flush(&sink).await;

        assert_eq!(report, FlushReport { synced: 1, failed: 1, remaining: 0 });
        assert_eq!(queue.status().await.queue_size, 0);
    }

    #[actix_web::test]
    async fn queue_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.json");

        let queue = OfflineQueue::load(&path).await;
        let queued = queue.enqueue(submission("204")).await;
        drop(queue);

        let restored = OfflineQueue::load(&path).await;
        let status = restored.status().await;
        assert_eq!(status.queue_size, 1);
        assert_eq!(status.oldest_queued_at, Some(queued.queued_at));
        assert_eq!(restored.items.lock().await[0], queued);
    }

    #[actix_web::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let queue = OfflineQueue::load(&path).await;
        assert_eq!(queue.len().await, 0);
    }
}
