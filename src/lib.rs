pub mod autopay;
pub mod bill;
pub mod calendar;
pub mod cli;
pub mod config;
pub mod dates;
pub mod db;
pub mod error;
pub mod feed;
pub mod session;
pub mod status;
pub mod summary;

pub use autopay::{AutopayKey, AutopayReport, AutopayScheduler, BillMutator, ProcessedKeys};
pub use bill::{BillRecord, BillSchedule, NewBill, PaidStateChange, PaymentStatus, Recurrence};
pub use calendar::{project_month, CalendarEvent, CalendarMonth, DayCell};
pub use config::EngineConfig;
pub use dates::{
    parse_calendar_date, resolve_recurring_due_date, Clock, FixedClock, Period, SystemClock,
};
pub use db::SqliteBillStore;
pub use error::{BillError, Result, ValidationError};
pub use feed::{BillFeed, Subscription};
pub use session::HouseholdSession;
pub use status::{badge, derive_status, is_overdue, Badge};
pub use summary::{
    build_dashboard, compare_names, sort_bills, summarize, BillFilter, Dashboard, Summary,
};

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Binary entry point: stderr logging, then one CLI command.
pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();
    cli::run(cli).await.map_err(|e| {
        tracing::error!(error = %e, "billtrack command failed");
        anyhow::anyhow!("billtrack failed: {e}")
    })
}
