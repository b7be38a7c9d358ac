//! Crash-recovery engine (component I).
//!
//! Consumes the durability plane through narrow interfaces rather than
//! depending on the WAL, failover queue, or stream consumer crates
//! directly — the binary wires concrete adapters in at startup.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("a recovery pass is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Replays WAL entries. The concrete adapter (owned by the binary) wraps
/// `afftok_wal::Wal::replay`.
pub trait Replayer: Send + Sync {
    fn replay_pending(
        &self,
        handler: &mut dyn FnMut(&str, &Value) -> anyhow::Result<()>,
    ) -> anyhow::Result<u64>;
}

/// Drains the failover queue. The concrete adapter wraps
/// `afftok_failover::FailoverQueue::process_queue`.
#[async_trait::async_trait]
pub trait Queue: Send + Sync {
    /// Returns `(sent, failed)` deltas for this drain pass.
    async fn drain_once(&self) -> anyhow::Result<(u64, u64)>;
}

/// Runs the §4.I consistency queries and repair against the relational
/// store. The concrete adapter issues raw SQL via diesel.
#[async_trait::async_trait]
pub trait ConsistencyStore: Send + Sync {
    async fn orphan_clicks(&self) -> anyhow::Result<i64>;
    async fn orphan_conversions(&self) -> anyhow::Result<i64>;
    async fn click_count_mismatches(&self) -> anyhow::Result<i64>;
    async fn conversion_count_mismatches(&self) -> anyhow::Result<i64>;
    async fn fix_inconsistencies(&self) -> anyhow::Result<u64>;
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RecoveryReport {
    pub wal_recovered: u64,
    pub failover_sent: u64,
    pub failover_failed: u64,
    pub orphan_clicks: i64,
    pub orphan_conversions: i64,
    pub click_count_mismatches: i64,
    pub conversion_count_mismatches: i64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FixReport {
    pub fixed: u64,
}

pub struct RecoveryEngine<R, Q, C> {
    replayer: R,
    queue: Q,
    store: C,
    is_recovering: AtomicBool,
}

impl<R, Q, C> RecoveryEngine<R, Q, C>
where
    R: Replayer,
    Q: Queue,
    C: ConsistencyStore,
{
    pub fn new(replayer: R, queue: Q, store: C) -> Self {
        Self { replayer, queue, store, is_recovering: AtomicBool::new(false) }
    }

    /// Idempotent and serialized: a concurrent call while one is already
    /// running is rejected rather than queued or blocked on.
    pub async fn recover(
        &self,
        handler: &mut dyn FnMut(&str, &Value) -> anyhow::Result<()>,
    ) -> Result<RecoveryReport, RecoveryError> {
        if self
            .is_recovering
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RecoveryError::AlreadyRunning);
        }

        let result = self.recover_inner(handler).await;
        self.is_recovering.store(false, Ordering::SeqCst);
        result
    }

    async fn recover_inner(
        &self,
        handler: &mut dyn FnMut(&str, &Value) -> anyhow::Result<()>,
    ) -> Result<RecoveryReport, RecoveryError> {
        let wal_recovered = self.replayer.replay_pending(handler)?;
        let (failover_sent, failover_failed) = self.queue.drain_once().await?;

        let orphan_clicks = self.store.orphan_clicks().await?;
        let orphan_conversions = self.store.orphan_conversions().await?;
        let click_count_mismatches = self.store.click_count_mismatches().await?;
        let conversion_count_mismatches = self.store.conversion_count_mismatches().await?;

        Ok(RecoveryReport {
            wal_recovered,
            failover_sent,
            failover_failed,
            orphan_clicks,
            orphan_conversions,
            click_count_mismatches,
            conversion_count_mismatches,
        })
    }

    pub async fn fix_inconsistencies(&self) -> anyhow::Result<FixReport> {
        let fixed = self.store.fix_inconsistencies().await?;
        Ok(FixReport { fixed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct StubReplayer {
        pending: Vec<(String, Value)>,
    }

    impl Replayer for StubReplayer {
        fn replay_pending(&self, handler: &mut dyn FnMut(&str, &Value) -> anyhow::Result<()>) -> anyhow::Result<u64> {
            let mut count = 0;
            for (event_type, payload) in &self.pending {
                handler(event_type, payload)?;
                count += 1;
            }
            Ok(count)
        }
    }

    struct StubQueue;
    #[async_trait::async_trait]
    impl Queue for StubQueue {
        async fn drain_once(&self) -> anyhow::Result<(u64, u64)> {
            Ok((2, 1))
        }
    }

    struct StubStore;
    #[async_trait::async_trait]
    impl ConsistencyStore for StubStore {
        async fn orphan_clicks(&self) -> anyhow::Result<i64> { Ok(0) }
        async fn orphan_conversions(&self) -> anyhow::Result<i64> { Ok(0) }
        async fn click_count_mismatches(&self) -> anyhow::Result<i64> { Ok(1) }
        async fn conversion_count_mismatches(&self) -> anyhow::Result<i64> { Ok(0) }
        async fn fix_inconsistencies(&self) -> anyhow::Result<u64> { Ok(1) }
    }

    #[tokio::test]
    async fn recover_replays_and_reports_counts() {
        let replayer = StubReplayer {
            pending: vec![("click".to_string(), serde_json::json!({"code": "uo-1"}))],
        };
        let engine = RecoveryEngine::new(replayer, StubQueue, StubStore);
        let seen = StdMutex::new(Vec::new());

        let mut handler = |event_type: &str, payload: &Value| {
            seen.lock().unwrap().push((event_type.to_string(), payload.clone()));
            Ok(())
        };

        let report = engine.recover(&mut handler).await.unwrap();
        assert_eq!(report.wal_recovered, 1);
        assert_eq!(report.failover_sent, 2);
        assert_eq!(report.failover_failed, 1);
        assert_eq!(report.click_count_mismatches, 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_recover_is_rejected() {
        let replayer = StubReplayer { pending: vec![] };
        let engine = RecoveryEngine::new(replayer, StubQueue, StubStore);
        engine.is_recovering.store(true, Ordering::SeqCst);

        let mut handler = |_event_type: &str, _payload: &Value| Ok(());
        let result = engine.recover(&mut handler).await;
        assert!(matches!(result, Err(RecoveryError::AlreadyRunning)));
    }
}
