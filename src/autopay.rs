//! Opportunistic autopay.
//!
//! Every bill snapshot is scanned for autopay bills whose due date has arrived. Each
//! `(bill, period)` pair is attempted at most once per session, whether or not the
//! store accepted the write. The processed-key set belongs to one household context
//! and is cleared when the session switches context.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bill::{BillRecord, BillSchedule, PaidStateChange, PaymentStatus};
use crate::dates::{Clock, Period};
use crate::error::Result;
use crate::status::{derive_status, resolve_due_date};

/// Write side of the bill store, as seen by the engine.
#[async_trait]
pub trait BillMutator: Send + Sync {
    async fn set_bill_paid_state(
        &self,
        context_id: &str,
        bill_id: &str,
        change: PaidStateChange,
    ) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AutopayKey {
    pub bill_id: String,
    /// `YYYY-MM` for monthly bills, the literal due date for one-time bills.
    pub period: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutopayAction {
    pub key: AutopayKey,
    pub change: PaidStateChange,
    pub name: String,
    pub amount: f64,
}

/// Keys already attempted in the current session for one household context.
#[derive(Debug, Default)]
pub struct ProcessedKeys {
    context_id: String,
    keys: HashSet<AutopayKey>,
}

impl ProcessedKeys {
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            keys: HashSet::new(),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn contains(&self, key: &AutopayKey) -> bool {
        self.keys.contains(key)
    }

    /// Returns `false` if the key was already processed.
    pub fn mark(&mut self, key: AutopayKey) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Drops every key when `context_id` differs from the bound context.
    pub fn reset_for(&mut self, context_id: &str) -> bool {
        if self.context_id == context_id {
            return false;
        }
        self.context_id = context_id.to_string();
        self.keys.clear();
        true
    }
}

fn settlement(bill: &BillRecord, period: Period) -> Option<(AutopayKey, PaidStateChange)> {
    match &bill.schedule {
        BillSchedule::Monthly { .. } => Some((
            AutopayKey {
                bill_id: bill.id.clone(),
                period: period.to_string(),
            },
            PaidStateChange::PaidForMonth(Some(period.to_string())),
        )),
        BillSchedule::OneTime { due_date, .. } => Some((
            AutopayKey {
                bill_id: bill.id.clone(),
                period: due_date.clone()?,
            },
            PaidStateChange::Status(PaymentStatus::Paid),
        )),
    }
}

pub fn is_autopay_due(bill: &BillRecord, period: Period, today: NaiveDate) -> bool {
    bill.autopay
        && derive_status(bill, period) == PaymentStatus::Unpaid
        && resolve_due_date(bill, period).is_some_and(|due| due <= today)
}

/// Picks the settlements to attempt and records their keys. Keys are marked here,
/// before any write, so a pass that overlaps a still-running one never repeats a key.
pub fn plan_autopay(
    bills: &[BillRecord],
    period: Period,
    today: NaiveDate,
    processed: &mut ProcessedKeys,
) -> Vec<AutopayAction> {
    let mut actions = Vec::new();
    for bill in bills {
        if !is_autopay_due(bill, period, today) {
            continue;
        }
        let Some((key, change)) = settlement(bill, period) else {
            continue;
        };
        if !processed.mark(key.clone()) {
            continue;
        }
        actions.push(AutopayAction {
            key,
            change,
            name: bill.name.clone(),
            amount: bill.amount,
        });
    }
    actions
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutopayReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Attempts each action once. Failures are logged and swallowed; the token is checked
/// before every write.
pub async fn execute_pass(
    mutator: &dyn BillMutator,
    context_id: &str,
    actions: Vec<AutopayAction>,
    cancel: &CancellationToken,
) -> AutopayReport {
    let mut report = AutopayReport::default();
    let total = actions.len();

    for (index, action) in actions.into_iter().enumerate() {
        if cancel.is_cancelled() {
            report.cancelled = total - index;
            info!(
                context_id,
                skipped = report.cancelled,
                "autopay pass cancelled"
            );
            break;
        }

        report.attempted += 1;
        match mutator
            .set_bill_paid_state(context_id, &action.key.bill_id, action.change.clone())
            .await
        {
            Ok(()) => {
                report.succeeded += 1;
                info!(
                    context_id,
                    bill_id = %action.key.bill_id,
                    period = %action.key.period,
                    amount = action.amount,
                    "autopay settled bill"
                );
            }
            Err(err) => {
                report.failed += 1;
                warn!(
                    context_id,
                    bill_id = %action.key.bill_id,
                    period = %action.key.period,
                    error = %err,
                    "autopay write failed; not retrying this session"
                );
            }
        }
    }

    report
}

struct SchedulerState {
    processed: ProcessedKeys,
    cancel: CancellationToken,
}

/// Owns the processed-key set and the cancellation token of the active context.
pub struct AutopayScheduler {
    mutator: Arc<dyn BillMutator>,
    clock: Arc<dyn Clock>,
    runtime: Option<Handle>,
    enabled: bool,
    state: Mutex<SchedulerState>,
}

impl AutopayScheduler {
    pub fn new(
        context_id: impl Into<String>,
        mutator: Arc<dyn BillMutator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            mutator,
            clock,
            runtime: Handle::try_current().ok(),
            enabled: true,
            state: Mutex::new(SchedulerState {
                processed: ProcessedKeys::new(context_id),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn context_id(&self) -> String {
        self.lock_state().processed.context_id().to_string()
    }

    pub fn processed_count(&self) -> usize {
        self.lock_state().processed.len()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Scans a fresh snapshot and spawns a pass for whatever became due.
    ///
    /// `context_id` names the household the snapshot belongs to; snapshots of any
    /// other household are ignored. Returns the pass handle so callers may await it;
    /// dropping it detaches the pass.
    pub fn on_snapshot(
        &self,
        context_id: &str,
        bills: &[BillRecord],
    ) -> Option<JoinHandle<AutopayReport>> {
        if !self.enabled {
            return None;
        }
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            warn!("autopay scan skipped: no async runtime available");
            return None;
        };

        let today = self.clock.today();
        let period = Period::from_date(today);

        let (context_id, actions, cancel) = {
            let mut state = self.lock_state();
            if state.cancel.is_cancelled() {
                debug!("autopay scan skipped: scheduler shut down");
                return None;
            }
            if state.processed.context_id() != context_id {
                debug!(
                    context_id,
                    active = state.processed.context_id(),
                    "autopay scan skipped: snapshot from another household"
                );
                return None;
            }
            let actions = plan_autopay(bills, period, today, &mut state.processed);
            (
                state.processed.context_id().to_string(),
                actions,
                state.cancel.child_token(),
            )
        };

        if actions.is_empty() {
            debug!(context_id = %context_id, bills = bills.len(), "autopay scan: nothing due");
            return None;
        }

        info!(
            context_id = %context_id,
            due = actions.len(),
            period = %period,
            "autopay pass starting"
        );
        let mutator = Arc::clone(&self.mutator);
        Some(runtime.spawn(async move {
            execute_pass(mutator.as_ref(), &context_id, actions, &cancel).await
        }))
    }

    /// Cancels in-flight passes of the previous context and forgets its keys.
    pub fn switch_context(&self, context_id: &str) {
        let mut state = self.lock_state();
        if state.processed.reset_for(context_id) {
            state.cancel.cancel();
            state.cancel = CancellationToken::new();
            info!(context_id, "autopay context switched");
        }
    }

    /// Cancels in-flight passes; later snapshots are ignored.
    pub fn shutdown(&self) {
        self.lock_state().cancel.cancel();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::BillError;

    /// Records every write; fails the ones listed in `fail_ids`.
    #[derive(Default)]
    pub struct RecordingMutator {
        pub calls: Mutex<Vec<(String, String, PaidStateChange)>>,
        pub fail_ids: Vec<String>,
    }

    impl RecordingMutator {
        pub fn failing(ids: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_ids: ids.iter().map(|id| id.to_string()).collect(),
            }
        }

        pub fn calls(&self) -> Vec<(String, String, PaidStateChange)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BillMutator for RecordingMutator {
        async fn set_bill_paid_state(
            &self,
            context_id: &str,
            bill_id: &str,
            change: PaidStateChange,
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((context_id.to_string(), bill_id.to_string(), change));
            if self.fail_ids.iter().any(|id| id == bill_id) {
                return Err(BillError::NotFound(bill_id.to_string()));
            }
            Ok(())
        }
    }

    /// Holds its first write open until `release` is notified; `written` fires once
    /// that write has been recorded.
    #[derive(Default)]
    pub struct GatedMutator {
        pub calls: Mutex<Vec<String>>,
        pub written: tokio::sync::Notify,
        pub release: tokio::sync::Notify,
    }

    impl GatedMutator {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BillMutator for GatedMutator {
        async fn set_bill_paid_state(
            &self,
            _context_id: &str,
            bill_id: &str,
            _change: PaidStateChange,
        ) -> Result<()> {
            let first = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(bill_id.to_string());
                calls.len() == 1
            };
            if first {
                self.written.notify_one();
                self.release.notified().await;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{GatedMutator, RecordingMutator};
    use super::*;
    use crate::dates::FixedClock;
    use crate::status::fixtures::*;

    fn autopay(mut bill: BillRecord) -> BillRecord {
        bill.autopay = true;
        bill
    }

    fn scheduler(mutator: Arc<RecordingMutator>, today: &str) -> AutopayScheduler {
        let clock = FixedClock::parse(today).expect("clock");
        AutopayScheduler::new("home", mutator, Arc::new(clock))
    }

    #[test]
    fn plan_picks_only_due_unpaid_autopay_bills() {
        let p = period("2024-04");
        let today = day("2024-04-05");
        let bills = vec![
            autopay(monthly("due", 1, None)),
            autopay(monthly("today", 5, None)),
            autopay(monthly("later", 6, None)),
            autopay(monthly("settled", 1, Some("2024-04"))),
            monthly("manual", 1, None),
            autopay(one_time("once", Some("2024-04-02"), PaymentStatus::Unpaid)),
            autopay(one_time("paid_once", Some("2024-04-02"), PaymentStatus::Paid)),
            autopay(one_time("undated", None, PaymentStatus::Unpaid)),
        ];
        let mut processed = ProcessedKeys::new("home");
        let actions = plan_autopay(&bills, p, today, &mut processed);
        let ids: Vec<&str> = actions.iter().map(|a| a.key.bill_id.as_str()).collect();
        assert_eq!(ids, vec!["due", "today", "once"]);
        assert_eq!(
            actions[2].key,
            AutopayKey {
                bill_id: "once".to_string(),
                period: "2024-04-02".to_string()
            }
        );
        assert_eq!(actions[2].change, PaidStateChange::Status(PaymentStatus::Paid));
        assert_eq!(
            actions[0].change,
            PaidStateChange::PaidForMonth(Some("2024-04".to_string()))
        );

        assert!(plan_autopay(&bills, p, today, &mut processed).is_empty());
        assert_eq!(processed.len(), 3);
    }

    #[test]
    fn context_reset_forgets_keys() {
        let mut processed = ProcessedKeys::new("home");
        processed.mark(AutopayKey {
            bill_id: "a".to_string(),
            period: "2024-04".to_string(),
        });
        assert!(!processed.reset_for("home"));
        assert_eq!(processed.len(), 1);
        assert!(processed.reset_for("cabin"));
        assert!(processed.is_empty());
        assert_eq!(processed.context_id(), "cabin");
    }

    #[tokio::test]
    async fn second_scan_of_same_snapshot_is_noop() {
        let mutator = Arc::new(RecordingMutator::default());
        let scheduler = scheduler(Arc::clone(&mutator), "2024-04-05");
        let bills = vec![autopay(monthly("rent", 1, None))];

        let report = scheduler
            .on_snapshot("home", &bills)
            .expect("pass spawned")
            .await
            .expect("join");
        assert_eq!(report.attempted, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(
            mutator.calls(),
            vec![(
                "home".to_string(),
                "rent".to_string(),
                PaidStateChange::PaidForMonth(Some("2024-04".to_string()))
            )]
        );

        assert!(scheduler.on_snapshot("home", &bills).is_none());
        assert_eq!(mutator.calls().len(), 1);
    }

    #[tokio::test]
    async fn failed_write_is_not_retried() {
        let mutator = Arc::new(RecordingMutator::failing(&["rent"]));
        let scheduler = scheduler(Arc::clone(&mutator), "2024-04-05");
        let bills = vec![autopay(monthly("rent", 1, None))];

        let report = scheduler
            .on_snapshot("home", &bills)
            .expect("pass spawned")
            .await
            .expect("join");
        assert_eq!(report.failed, 1);
        assert_eq!(scheduler.processed_count(), 1);

        assert!(scheduler.on_snapshot("home", &bills).is_none());
        assert_eq!(mutator.calls().len(), 1);
    }

    #[tokio::test]
    async fn switching_context_allows_new_attempts() {
        let mutator = Arc::new(RecordingMutator::default());
        let scheduler = scheduler(Arc::clone(&mutator), "2024-04-05");
        let bills = vec![autopay(monthly("rent", 1, None))];

        scheduler
            .on_snapshot("home", &bills)
            .expect("pass spawned")
            .await
            .expect("join");
        scheduler.switch_context("cabin");
        assert_eq!(scheduler.context_id(), "cabin");
        assert_eq!(scheduler.processed_count(), 0);

        scheduler
            .on_snapshot("cabin", &bills)
            .expect("pass spawned")
            .await
            .expect("join");
        let calls = mutator.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "cabin");
    }

    #[tokio::test]
    async fn cancelled_pass_skips_writes() {
        let mutator = RecordingMutator::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut processed = ProcessedKeys::new("home");
        let actions = plan_autopay(
            &[autopay(monthly("a", 1, None)), autopay(monthly("b", 2, None))],
            period("2024-04"),
            day("2024-04-05"),
            &mut processed,
        );

        let report = execute_pass(&mutator, "home", actions, &cancel).await;
        assert_eq!(report.attempted, 0);
        assert_eq!(report.cancelled, 2);
        assert!(mutator.calls().is_empty());
    }

    #[tokio::test]
    async fn switching_context_mid_pass_stops_remaining_writes() {
        let mutator = Arc::new(GatedMutator::default());
        let clock = FixedClock::parse("2024-04-05").expect("clock");
        let writer: Arc<dyn BillMutator> = mutator.clone();
        let scheduler = AutopayScheduler::new("home", writer, Arc::new(clock));
        let bills = vec![autopay(monthly("a", 1, None)), autopay(monthly("b", 2, None))];

        let pass = scheduler.on_snapshot("home", &bills).expect("pass spawned");
        mutator.written.notified().await;
        scheduler.switch_context("cabin");
        mutator.release.notify_one();

        let report = pass.await.expect("join");
        assert_eq!(report.attempted, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.cancelled, 1);
        assert_eq!(mutator.calls(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn snapshot_from_previous_household_is_ignored() {
        let mutator = Arc::new(RecordingMutator::default());
        let scheduler = scheduler(Arc::clone(&mutator), "2024-04-05");
        scheduler.switch_context("cabin");

        assert!(scheduler
            .on_snapshot("home", &[autopay(monthly("rent", 1, None))])
            .is_none());
        assert_eq!(scheduler.processed_count(), 0);
        assert!(mutator.calls().is_empty());
    }

    #[tokio::test]
    async fn shutdown_ignores_later_snapshots() {
        let mutator = Arc::new(RecordingMutator::default());
        let scheduler = scheduler(Arc::clone(&mutator), "2024-04-05");
        scheduler.shutdown();
        assert!(scheduler
            .on_snapshot("home", &[autopay(monthly("rent", 1, None))])
            .is_none());
        assert!(mutator.calls().is_empty());
    }

    #[tokio::test]
    async fn disabled_scheduler_does_nothing() {
        let mutator = Arc::new(RecordingMutator::default());
        let scheduler = scheduler(Arc::clone(&mutator), "2024-04-05").with_enabled(false);
        assert!(scheduler
            .on_snapshot("home", &[autopay(monthly("rent", 1, None))])
            .is_none());
        assert_eq!(scheduler.processed_count(), 0);
    }
}
