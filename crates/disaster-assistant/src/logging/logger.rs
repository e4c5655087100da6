use flume::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::types::{ActivityLog, ActivityStatus, ActivityType};
use crate::config::settings::ActivityLogConfig;
use crate::services::conversation::LongTermMemory;

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Queue capacity (max entries in memory before new ones are dropped)
    pub queue_capacity: usize,

    /// Entries handled per flush
    pub batch_size: usize,

    /// Max wait time before flushing a partial batch (milliseconds)
    pub batch_timeout_ms: u64,

    pub worker_count: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            batch_size: 100,
            batch_timeout_ms: 1000,
            worker_count: 1,
        }
    }
}

impl From<&ActivityLogConfig> for LoggerConfig {
    fn from(cfg: &ActivityLogConfig) -> Self {
        Self {
            queue_capacity: cfg.queue_capacity.max(1),
            batch_size: cfg.batch_size.max(1),
            batch_timeout_ms: cfg.batch_timeout_ms.max(1),
            worker_count: cfg.worker_count.max(1),
        }
    }
}

/// Async activity logger with queue mechanism.
///
/// Entries become structured `tracing` events; completed turns are also
/// written to long-term memory when one is attached.
#[derive(Clone)]
pub struct ActivityLogger {
    sender: Sender<ActivityLog>,
    dropped: Arc<AtomicU64>,
}

impl ActivityLogger {
    /// Initialize logger with background workers. Must be called inside a tokio runtime.
    pub fn new(config: LoggerConfig, memory: Option<Arc<LongTermMemory>>) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity);

        info!(
            "Initializing ActivityLogger: queue={}, batch={}, timeout={}ms, workers={}, long_term_memory={}",
            config.queue_capacity,
            config.batch_size,
            config.batch_timeout_ms,
            config.worker_count,
            memory.is_some()
        );

        for worker_id in 0..config.worker_count {
            let receiver = receiver.clone();
            let config = config.clone();
            let memory = memory.clone();

            tokio::spawn(async move {
                Self::worker_loop(worker_id, receiver, config, memory).await;
            });
        }

        Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Log activity (non-blocking, fire-and-forget)
    pub fn log(&self, activity: ActivityLog) {
        if let Err(e) = self.sender.try_send(activity) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let activity = e.into_inner();
            warn!(
                "Dropped activity log for session {} ({:?}), {} dropped so far",
                activity.session_id, activity.activity_type, dropped
            );
        }
    }

    async fn worker_loop(
        worker_id: usize,
        receiver: Receiver<ActivityLog>,
        config: LoggerConfig,
        memory: Option<Arc<LongTermMemory>>,
    ) {
        debug!("Activity worker {} started", worker_id);

        let mut batch: Vec<ActivityLog> = Vec::with_capacity(config.batch_size);
        let batch_timeout = Duration::from_millis(config.batch_timeout_ms);

        loop {
            // Block for the first entry so an idle worker does not spin
            match receiver.recv_async().await {
                Ok(log) => batch.push(log),
                Err(_) => {
                    debug!("Activity worker {} shutting down (channel closed)", worker_id);
                    return;
                }
            }

            let deadline = tokio::time::Instant::now() + batch_timeout;
            let mut closed = false;

            while batch.len() < config.batch_size {
                match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                    Ok(Ok(log)) => batch.push(log),
                    Ok(Err(_)) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }

            Self::flush_batch(&batch, worker_id, memory.as_deref()).await;
            batch.clear();

            if closed {
                debug!("Activity worker {} shutting down (channel closed)", worker_id);
                return;
            }
        }
    }

    async fn flush_batch(batch: &[ActivityLog], worker_id: usize, memory: Option<&LongTermMemory>) {
        debug!("Worker {} flushing {} activity entries", worker_id, batch.len());

        for log in batch {
            Self::emit(log);

            if log.activity_type != ActivityType::TurnCompleted {
                continue;
            }
            let (Some(memory), Some(user), Some(assistant)) =
                (memory, &log.message_content, &log.response_content)
            else {
                continue;
            };
            if let Err(e) = memory
                .append(format!("User: {}\nAssistant: {}", user, assistant))
                .await
            {
                error!("Worker {} failed to persist turn for {}: {}", worker_id, log.session_id, e);
            }
        }
    }

    fn emit(log: &ActivityLog) {
        let custom = log
            .custom_fields
            .as_ref()
            .map(|fields| serde_json::to_string(fields).unwrap_or_default());

        match log.activity_status {
            ActivityStatus::Error => error!(
                target: "activity",
                session_id = %log.session_id,
                activity = log.activity_type.as_str(),
                route = ?log.route,
                processing_time_ms = ?log.processing_time_ms,
                error = ?log.error_message,
                custom = ?custom,
                "turn activity"
            ),
            ActivityStatus::Warning => warn!(
                target: "activity",
                session_id = %log.session_id,
                activity = log.activity_type.as_str(),
                route = ?log.route,
                custom = ?custom,
                "turn activity"
            ),
            ActivityStatus::Success | ActivityStatus::Info => info!(
                target: "activity",
                session_id = %log.session_id,
                activity = log.activity_type.as_str(),
                status = log.activity_status.as_str(),
                route = ?log.route,
                processing_time_ms = ?log.processing_time_ms,
                custom = ?custom,
                "turn activity"
            ),
        }
    }

    /// Get queue statistics (for monitoring)
    pub fn queue_len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_queue_full(&self) -> bool {
        self.sender.is_full()
    }

    /// Entries discarded because the queue was full or closed.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> LoggerConfig {
        LoggerConfig {
            queue_capacity: 16,
            batch_size: 4,
            batch_timeout_ms: 10,
            worker_count: 1,
        }
    }

    #[tokio::test]
    async fn test_completed_turns_reach_long_term_memory() {
        let path = std::env::temp_dir().join(format!("activity-{}.json", uuid::Uuid::new_v4()));
        let memory = Arc::new(LongTermMemory::open(&path).await.unwrap());
        let logger = ActivityLogger::new(fast_config(), Some(memory.clone()));

        logger.log(ActivityLog::builder("s1", ActivityType::TurnReceived).message("ignored").build());
        logger.log(
            ActivityLog::builder("s1", ActivityType::TurnCompleted)
                .message("what is 2+2")
                .response("Calculation: 4")
                .build(),
        );

        let mut stored = Vec::new();
        for _ in 0..100 {
            stored = memory.get_all().await.unwrap();
            if !stored.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(stored, vec!["User: what is 2+2\nAssistant: Calculation: 4".to_string()]);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (sender, _receiver) = bounded(1);
        let logger = ActivityLogger {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        };

        logger.log(ActivityLog::builder("s1", ActivityType::TurnReceived).build());
        assert_eq!(logger.dropped_count(), 0);

        logger.log(ActivityLog::builder("s1", ActivityType::TurnCompleted).build());
        logger.log(ActivityLog::builder("s2", ActivityType::TurnCompleted).build());

        assert!(logger.is_queue_full());
        assert_eq!(logger.queue_len(), 1);
        assert_eq!(logger.dropped_count(), 2);
    }
}
