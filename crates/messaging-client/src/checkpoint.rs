//! When to checkpoint a partition.
//!
//! Checkpointing is an I/O round-trip to the log's checkpoint store. Doing it
//! per record is too expensive; doing it rarely widens the window of records
//! reprocessed after a crash. The default commits every 50 successfully
//! dispatched records per partition, with an optional time bound for
//! low-traffic partitions.

use std::time::Duration;
use tokio::time::Instant;

/// Default number of records between checkpoints.
pub const DEFAULT_CHECKPOINT_EVERY: u32 = 50;

/// Checkpoint cadence for every partition of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPolicy {
    /// Commit once this many records were counted since the last commit.
    pub every_events: u32,
    /// Also commit when this much time passed since the last commit and at
    /// least one record was counted.
    pub max_interval: Option<Duration>,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            every_events: DEFAULT_CHECKPOINT_EVERY,
            max_interval: None,
        }
    }
}

impl CheckpointPolicy {
    /// Count-only policy.
    pub fn every(events: u32) -> Self {
        Self {
            every_events: events,
            max_interval: None,
        }
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = Some(interval);
        self
    }
}

/// Progress of one partition since its last checkpoint.
///
/// Owned by the partition's receive task and never shared, so the counter
/// needs no synchronization.
#[derive(Debug)]
pub struct PartitionCheckpointState {
    partition_id: String,
    events_since_last_checkpoint: u32,
    last_checkpoint: Instant,
}

impl PartitionCheckpointState {
    pub fn new(partition_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            events_since_last_checkpoint: 0,
            last_checkpoint: Instant::now(),
        }
    }

    pub fn partition_id(&self) -> &str {
        &self.partition_id
    }

    pub fn events_since_last_checkpoint(&self) -> u32 {
        self.events_since_last_checkpoint
    }

    /// Count one processed record and return the new count.
    pub fn record_event(&mut self) -> u32 {
        self.events_since_last_checkpoint = self.events_since_last_checkpoint.saturating_add(1);
        self.events_since_last_checkpoint
    }

    /// Whether `policy` calls for a commit now.
    pub fn should_checkpoint(&self, policy: &CheckpointPolicy) -> bool {
        if self.events_since_last_checkpoint == 0 {
            return false;
        }
        if self.events_since_last_checkpoint >= policy.every_events {
            return true;
        }
        policy
            .max_interval
            .is_some_and(|interval| self.last_checkpoint.elapsed() >= interval)
    }

    /// Reset after a successful commit.
    pub fn mark_committed(&mut self) {
        self.events_since_last_checkpoint = 0;
        self.last_checkpoint = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = CheckpointPolicy::default();
        assert_eq!(policy.every_events, 50);
        assert!(policy.max_interval.is_none());
    }

    #[test]
    fn test_count_threshold() {
        let policy = CheckpointPolicy::every(3);
        let mut state = PartitionCheckpointState::new("0");

        assert!(!state.should_checkpoint(&policy));
        state.record_event();
        state.record_event();
        assert!(!state.should_checkpoint(&policy));
        assert_eq!(state.record_event(), 3);
        assert!(state.should_checkpoint(&policy));

        state.mark_committed();
        assert_eq!(state.events_since_last_checkpoint(), 0);
        assert!(!state.should_checkpoint(&policy));
    }

    #[test]
    fn test_counter_keeps_growing_until_committed() {
        let policy = CheckpointPolicy::every(2);
        let mut state = PartitionCheckpointState::new("1");
        state.record_event();
        state.record_event();
        state.record_event();
        assert_eq!(state.events_since_last_checkpoint(), 3);
        assert!(state.should_checkpoint(&policy));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_threshold() {
        let policy = CheckpointPolicy::every(100).with_max_interval(Duration::from_secs(10));
        let mut state = PartitionCheckpointState::new("0");

        tokio::time::advance(Duration::from_secs(11)).await;
        // Nothing counted yet: no commit even though the interval elapsed.
        assert!(!state.should_checkpoint(&policy));

        state.record_event();
        assert!(state.should_checkpoint(&policy));

        state.mark_committed();
        state.record_event();
        assert!(!state.should_checkpoint(&policy));
    }
}
