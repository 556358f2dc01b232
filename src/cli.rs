use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use crate::bill::{NewBill, Recurrence};
use crate::config::ConfigPayload;
use crate::dates::{Clock, FixedClock, Period, SystemClock};
use crate::db::{default_db_path, SqliteBillStore};
use crate::error::{BillError, Result};
use crate::feed::BillFeed;
use crate::session::HouseholdSession;
use crate::summary::BillFilter;

#[derive(Debug, Parser)]
#[command(name = "billtrack", about = "Shared household bills: status, autopay and calendar")]
pub struct Cli {
    /// SQLite file; defaults to the platform data directory.
    #[arg(long, env = "BILLTRACK_DB")]
    pub db: Option<PathBuf>,

    /// Household whose bills are shown.
    #[arg(long, env = "BILLTRACK_HOUSEHOLD", default_value = "default")]
    pub household: String,

    /// Pretend today is this date (YYYY-MM-DD).
    #[arg(long)]
    pub today: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FilterArg {
    All,
    Unpaid,
    Paid,
    Overdue,
    Autopay,
}

impl From<FilterArg> for BillFilter {
    fn from(value: FilterArg) -> Self {
        match value {
            FilterArg::All => BillFilter::All,
            FilterArg::Unpaid => BillFilter::Unpaid,
            FilterArg::Paid => BillFilter::Paid,
            FilterArg::Overdue => BillFilter::Overdue,
            FilterArg::Autopay => BillFilter::Autopay,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sorted bills with status badges and month totals.
    List {
        #[arg(long, value_enum, default_value = "all")]
        filter: FilterArg,
    },
    /// Month grid for YYYY-MM (defaults to the current month).
    Calendar { month: Option<String> },
    /// All events on one day of a month.
    Day { month: String, day: u32 },
    /// Add a one-time bill (with --due) or a monthly bill (with --day).
    Add {
        name: String,
        amount: f64,
        #[arg(long, conflicts_with = "day")]
        due: Option<String>,
        #[arg(long)]
        day: Option<i64>,
        #[arg(long)]
        autopay: bool,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        account_suffix: Option<String>,
    },
    /// Flip a bill between paid and unpaid for the current month.
    Toggle { bill_id: String },
    /// Remove a bill.
    Delete { bill_id: String },
    /// Run one autopay scan and report what was settled.
    Autopay,
    /// Show or change engine settings.
    Config {
        #[arg(long)]
        visible_events: Option<u32>,
        #[arg(long)]
        week_starts_on_monday: Option<bool>,
        #[arg(long)]
        autopay_enabled: Option<bool>,
    },
}

#[derive(Serialize)]
struct DayView<'a> {
    period: Period,
    day: u32,
    total: f64,
    events: &'a [crate::calendar::CalendarEvent],
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_period(value: &str) -> Result<Period> {
    Period::parse(value).ok_or_else(|| BillError::Config(format!("invalid month: {}", value)))
}

/// Executes one CLI invocation. The session's autopay pass runs on every command, the
/// same way a refreshed bill list would trigger it in a long-lived client.
pub async fn run(cli: Cli) -> Result<()> {
    let clock: Arc<dyn Clock> = match &cli.today {
        Some(today) => Arc::new(
            FixedClock::parse(today)
                .ok_or_else(|| BillError::Config(format!("invalid --today: {}", today)))?,
        ),
        None => Arc::new(SystemClock),
    };
    let path = match &cli.db {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };

    let feed = BillFeed::new();
    let store = Arc::new(SqliteBillStore::open(&path)?.with_feed(feed.clone()));
    let session = HouseholdSession::open(store.clone(), feed, Arc::clone(&clock), &cli.household)?;

    match cli.command {
        Command::List { filter } => {
            session.settle_autopay().await;
            print_json(&session.dashboard(filter.into()))?;
        }
        Command::Calendar { month } => {
            session.settle_autopay().await;
            let period = match month {
                Some(month) => parse_period(&month)?,
                None => clock.current_period(),
            };
            let config = session.config();
            let calendar = session.calendar(period);
            print_json(&serde_json::json!({
                "period": period,
                "days_in_month": calendar.days_in_month,
                "weeks": calendar.grid(
                    config.calendar_visible_events as usize,
                    config.week_starts_on_monday,
                ),
            }))?;
        }
        Command::Day { month, day } => {
            session.settle_autopay().await;
            let period = parse_period(&month)?;
            let calendar = session.calendar(period);
            print_json(&DayView {
                period,
                day,
                total: calendar.total_for_day(day),
                events: calendar.events_on(day),
            })?;
        }
        Command::Add {
            name,
            amount,
            due,
            day,
            autopay,
            category,
            account_suffix,
        } => {
            let recurrence = if day.is_some() {
                Recurrence::Monthly
            } else {
                Recurrence::OneTime
            };
            let bill = session.create_bill(NewBill {
                name,
                amount,
                recurrence,
                due_date: due,
                day_of_month: day,
                autopay,
                category,
                account_suffix,
            })?;
            session.settle_autopay().await;
            print_json(&store.get_bill(session.context_id(), &bill.id)?)?;
        }
        Command::Toggle { bill_id } => {
            session.settle_autopay().await;
            print_json(&session.toggle_paid(&bill_id)?)?;
        }
        Command::Delete { bill_id } => {
            session.settle_autopay().await;
            session.delete_bill(&bill_id)?;
            print_json(&serde_json::json!({ "deleted": bill_id }))?;
        }
        Command::Autopay => {
            let reports = session.settle_autopay().await;
            print_json(&reports)?;
        }
        Command::Config {
            visible_events,
            week_starts_on_monday,
            autopay_enabled,
        } => {
            session.settle_autopay().await;
            let config = store.update_config(ConfigPayload {
                calendar_visible_events: visible_events,
                week_starts_on_monday,
                autopay_enabled,
            })?;
            print_json(&config)?;
        }
    }

    session.close();
    Ok(())
}
