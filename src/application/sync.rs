use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::api::SyncApi;
use crate::domain::{SyncCategory, SyncOptions, SystemMessage, WorkflowError};

/// One sync per window, measured from the end of the previous invocation.
pub const SYNC_COOLDOWN: Duration = Duration::from_secs(15 * 60);

/// Newest messages kept in the feed.
const FEED_CAPACITY: usize = 5;

/// Enforces the cooldown window between sync invocations.
#[derive(Debug)]
pub struct SyncGate {
    cooldown: Duration,
    disabled_until: Option<Instant>,
}

impl SyncGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            disabled_until: None,
        }
    }

    pub fn check(&self, now: Instant) -> Result<(), WorkflowError> {
        match self.disabled_until {
            Some(until) if now < until => Err(WorkflowError::RateLimited {
                remaining_secs: (until - now).as_secs().max(1),
            }),
            _ => Ok(()),
        }
    }

    /// Start the window; called once the invocation has finished,
    /// regardless of per-category outcomes.
    pub fn note_completed(&mut self, now: Instant) {
        self.disabled_until = Some(now + self.cooldown);
    }
}

impl Default for SyncGate {
    fn default() -> Self {
        Self::new(SYNC_COOLDOWN)
    }
}

/// Per-category outcome of one sync invocation, in execution order.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub results: Vec<(SyncCategory, Result<(), String>)>,
}

/// Drives the remote sync triggers. A category failing does not stop the
/// other; the cooldown starts either way.
pub struct SyncRunner<A> {
    api: A,
    gate: SyncGate,
}

impl<A: SyncApi> SyncRunner<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            gate: SyncGate::default(),
        }
    }

    /// Trigger the enabled categories. Rejected outright while a batch is
    /// running and while the cooldown window is open.
    pub async fn trigger(
        &mut self,
        options: SyncOptions,
        batch_in_progress: bool,
        now: Instant,
    ) -> Result<SyncReport, WorkflowError> {
        if batch_in_progress {
            return Err(WorkflowError::BatchInProgress);
        }
        self.gate.check(now)?;

        let options = options.normalized();
        let mut report = SyncReport::default();

        if options.pricing {
            report.results.push((
                SyncCategory::Pricing,
                self.run_category(SyncCategory::Pricing).await,
            ));
        }
        if options.stock {
            report.results.push((
                SyncCategory::Stock,
                self.run_category(SyncCategory::Stock).await,
            ));
        }

        self.gate.note_completed(Instant::now());
        Ok(report)
    }

    async fn run_category(&self, category: SyncCategory) -> Result<(), String> {
        info!("triggering {} sync", category);
        match self.api.trigger(category).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("{} sync failed: {}", category, e);
                Err(e.to_string())
            }
        }
    }
}

/// Rolling feed of operator-facing messages: deduplicated by id across
/// polls, newest first, capped. Switching category starts over since each
/// category carries different messages.
#[derive(Debug)]
pub struct MessageFeed {
    category: SyncCategory,
    seen: HashSet<String>,
    messages: Vec<SystemMessage>,
}

impl MessageFeed {
    pub fn new(category: SyncCategory) -> Self {
        Self {
            category,
            seen: HashSet::new(),
            messages: Vec::new(),
        }
    }

    pub fn set_category(&mut self, category: SyncCategory) {
        if category != self.category {
            self.category = category;
            self.seen.clear();
            self.messages.clear();
        }
    }

    pub fn absorb(&mut self, fetched: Vec<SystemMessage>) {
        for message in fetched {
            if self.seen.insert(message.id.clone()) {
                self.messages.push(message);
            }
        }
        self.messages
            .sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.messages.truncate(FEED_CAPACITY);
    }

    pub fn messages(&self) -> &[SystemMessage] {
        &self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use crate::api::SyncError;

    struct ScriptedApi {
        calls: Mutex<Vec<SyncCategory>>,
        fail: Option<SyncCategory>,
    }

    impl ScriptedApi {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail: None,
            }
        }

        fn failing(category: SyncCategory) -> Self {
            Self {
                fail: Some(category),
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl SyncApi for ScriptedApi {
        async fn trigger(&self, category: SyncCategory) -> Result<(), SyncError> {
            self.calls.lock().unwrap().push(category);
            if self.fail == Some(category) {
                return Err(SyncError::Rejected {
                    status: 500,
                    body: "worker unavailable".to_string(),
                });
            }
            Ok(())
        }

        async fn system_messages(
            &self,
            _category: SyncCategory,
        ) -> Result<Vec<SystemMessage>, SyncError> {
            Ok(Vec::new())
        }
    }

    fn both() -> SyncOptions {
        SyncOptions {
            stock: true,
            pricing: true,
        }
    }

    #[tokio::test]
    async fn second_attempt_inside_the_window_is_rate_limited() {
        let mut runner = SyncRunner::new(ScriptedApi::new());
        let t0 = Instant::now();
        runner.trigger(both(), false, t0).await.unwrap();

        let err = runner
            .trigger(both(), false, t0 + Duration::from_secs(14 * 60))
            .await
            .unwrap_err();
        match err {
            WorkflowError::RateLimited { remaining_secs } => assert!(remaining_secs > 0),
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn attempt_after_the_window_is_accepted() {
        let mut runner = SyncRunner::new(ScriptedApi::new());
        let t0 = Instant::now();
        runner.trigger(both(), false, t0).await.unwrap();

        runner
            .trigger(both(), false, t0 + SYNC_COOLDOWN + Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_while_batch_in_progress() {
        let mut runner = SyncRunner::new(ScriptedApi::new());
        let err = runner
            .trigger(both(), true, Instant::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::BatchInProgress));
        assert!(runner.api.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pricing_runs_before_stock_and_failures_do_not_abort() {
        let mut runner = SyncRunner::new(ScriptedApi::failing(SyncCategory::Pricing));
        let report = runner.trigger(both(), false, Instant::now()).await.unwrap();

        assert_eq!(
            *runner.api.calls.lock().unwrap(),
            vec![SyncCategory::Pricing, SyncCategory::Stock]
        );
        assert!(report
            .results
            .iter()
            .any(|(c, r)| *c == SyncCategory::Pricing && r.is_err()));
        assert!(report
            .results
            .iter()
            .any(|(c, r)| *c == SyncCategory::Stock && r.is_ok()));

        // The window opened despite the pricing failure.
        let err = runner
            .trigger(both(), false, Instant::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::RateLimited { .. }));
    }

    fn message(id: &str, minute: u32) -> SystemMessage {
        SystemMessage {
            id: id.to_string(),
            message: format!("message {}", id),
            category: "stock".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 8, 6, 9, minute, 0).unwrap(),
        }
    }

    #[test]
    fn feed_deduplicates_and_keeps_newest_five() {
        let mut feed = MessageFeed::new(SyncCategory::Stock);
        feed.absorb(vec![message("a", 1), message("b", 2)]);
        feed.absorb(vec![
            message("a", 1), // repeat, ignored
            message("c", 3),
            message("d", 4),
            message("e", 5),
            message("f", 6),
        ]);

        let ids: Vec<&str> = feed.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["f", "e", "d", "c", "b"]);
    }

    #[test]
    fn switching_category_clears_the_feed() {
        let mut feed = MessageFeed::new(SyncCategory::Stock);
        feed.absorb(vec![message("a", 1)]);
        feed.set_category(SyncCategory::Pricing);
        assert!(feed.messages().is_empty());

        // Same id can reappear after the reset.
        feed.absorb(vec![message("a", 1)]);
        assert_eq!(feed.messages().len(), 1);
    }
}
