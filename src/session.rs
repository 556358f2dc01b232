//! One household's live view of its bills.
//!
//! The session subscribes to the feed for its context, keeps the latest snapshot and
//! hands every snapshot to the autopay scheduler. Switching context drops the old
//! subscription, cancels in-flight passes and clears the processed keys.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::autopay::{AutopayReport, AutopayScheduler, BillMutator};
use crate::bill::{BillRecord, BillSchedule, NewBill, PaidStateChange, PaymentStatus};
use crate::calendar::{project_month, CalendarMonth};
use crate::config::EngineConfig;
use crate::dates::{Clock, Period};
use crate::db::SqliteBillStore;
use crate::error::{BillError, Result};
use crate::feed::{BillFeed, Subscription};
use crate::status::derive_status;
use crate::summary::{build_dashboard, BillFilter, Dashboard};

type PassHandles = Arc<Mutex<Vec<JoinHandle<AutopayReport>>>>;

/// Latest bills together with the household they belong to. Feed callbacks already
/// collected for an old household compare against `context_id` under this lock.
struct Snapshot {
    context_id: String,
    bills: Vec<BillRecord>,
}

type SharedSnapshot = Arc<Mutex<Snapshot>>;

pub struct HouseholdSession {
    store: Arc<SqliteBillStore>,
    feed: BillFeed,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    scheduler: Arc<AutopayScheduler>,
    context_id: String,
    snapshot: SharedSnapshot,
    passes: PassHandles,
    subscription: Option<Subscription>,
}

impl HouseholdSession {
    /// Subscribes to `context_id` and asks the store for a first snapshot. Must be
    /// called from inside a tokio runtime so autopay passes can be spawned.
    pub fn open(
        store: Arc<SqliteBillStore>,
        feed: BillFeed,
        clock: Arc<dyn Clock>,
        context_id: &str,
    ) -> Result<Self> {
        let config = store.fetch_config()?;
        let mutator: Arc<dyn BillMutator> = store.clone();
        let scheduler = Arc::new(
            AutopayScheduler::new(context_id, mutator, Arc::clone(&clock))
                .with_enabled(config.autopay_enabled),
        );

        let mut session = Self {
            store,
            feed,
            clock,
            config,
            scheduler,
            context_id: context_id.to_string(),
            snapshot: Arc::new(Mutex::new(Snapshot {
                context_id: context_id.to_string(),
                bills: Vec::new(),
            })),
            passes: Arc::new(Mutex::new(Vec::new())),
            subscription: None,
        };
        session.attach()?;
        info!(context_id, "household session opened");
        Ok(session)
    }

    fn attach(&mut self) -> Result<()> {
        let snapshot = Arc::clone(&self.snapshot);
        let scheduler = Arc::clone(&self.scheduler);
        let passes = Arc::clone(&self.passes);
        let context_id = self.context_id.clone();

        self.subscription = Some(self.feed.subscribe(&self.context_id, move |bills| {
            let mut current = snapshot.lock().unwrap_or_else(|e| e.into_inner());
            if current.context_id != context_id {
                debug!(context_id = %context_id, "dropping snapshot of a previous household");
                return;
            }
            current.bills = bills.to_vec();
            if let Some(handle) = scheduler.on_snapshot(&context_id, bills) {
                let mut passes = passes.lock().unwrap_or_else(|e| e.into_inner());
                passes.retain(|pass| !pass.is_finished());
                passes.push(handle);
            }
        }));
        self.store.refresh(&self.context_id)
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bills(&self) -> Vec<BillRecord> {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .bills
            .clone()
    }

    pub fn dashboard(&self, filter: BillFilter) -> Dashboard {
        build_dashboard(&self.bills(), self.clock.as_ref(), filter)
    }

    pub fn calendar(&self, period: Period) -> CalendarMonth {
        project_month(&self.bills(), period, self.clock.today())
    }

    pub fn create_bill(&self, input: NewBill) -> Result<BillRecord> {
        self.store.create_bill(&self.context_id, input)
    }

    pub fn delete_bill(&self, bill_id: &str) -> Result<()> {
        self.store.delete_bill(&self.context_id, bill_id)
    }

    /// Manual settle/unsettle for the current period.
    pub fn toggle_paid(&self, bill_id: &str) -> Result<BillRecord> {
        let bill = self
            .bills()
            .into_iter()
            .find(|bill| bill.id == bill_id)
            .ok_or_else(|| BillError::NotFound(bill_id.to_string()))?;
        let period = self.clock.current_period();
        let paid = derive_status(&bill, period) == PaymentStatus::Paid;

        let change = match (&bill.schedule, paid) {
            (BillSchedule::Monthly { .. }, true) => PaidStateChange::PaidForMonth(None),
            (BillSchedule::Monthly { .. }, false) => {
                PaidStateChange::PaidForMonth(Some(period.to_string()))
            }
            (BillSchedule::OneTime { .. }, true) => PaidStateChange::Status(PaymentStatus::Unpaid),
            (BillSchedule::OneTime { .. }, false) => PaidStateChange::Status(PaymentStatus::Paid),
        };
        info!(context_id = %self.context_id, bill_id, paid = !paid, "manual paid toggle");
        self.store.apply_paid_state(&self.context_id, bill_id, change)
    }

    /// Moves the session to another household. Passes still running for the old one
    /// are cancelled before their next write.
    pub fn switch_context(&mut self, context_id: &str) -> Result<()> {
        if context_id == self.context_id {
            return Ok(());
        }
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        {
            let mut current = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
            current.context_id = context_id.to_string();
            current.bills.clear();
        }
        self.scheduler.switch_context(context_id);
        self.context_id = context_id.to_string();
        self.attach()
    }

    /// Waits for every autopay pass started so far.
    pub async fn settle_autopay(&self) -> Vec<AutopayReport> {
        let handles: Vec<_> = self
            .passes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();

        let mut reports = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(err) => warn!(error = %err, "autopay pass did not complete"),
            }
        }
        reports
    }

    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.scheduler.shutdown();
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            info!(context_id = %self.context_id, "household session closed");
        }
    }
}

impl Drop for HouseholdSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
