use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::autopay::BillMutator;
use crate::bill::{BillRecord, BillSchedule, NewBill, PaidStateChange, PaymentStatus};
use crate::config::{ConfigPayload, EngineConfig};
use crate::error::{BillError, Result};
use crate::feed::BillFeed;

const BILL_COLUMNS: &str = "id, name, amount, recurrence, due_date, status, day_of_month, paid_for_month, autopay, category, account_suffix";

pub fn default_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| BillError::Config("no data directory on this platform".to_string()))?
        .join("billtrack");
    fs::create_dir_all(&data_dir)?;
    Ok(data_dir.join("billtrack.sqlite"))
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS bills (
          id TEXT PRIMARY KEY,
          context_id TEXT NOT NULL,
          name TEXT NOT NULL,
          amount REAL NOT NULL,
          recurrence TEXT NOT NULL,
          due_date TEXT,
          status TEXT,
          day_of_month INTEGER,
          paid_for_month TEXT,
          autopay INTEGER NOT NULL DEFAULT 0,
          created_ts_utc INTEGER NOT NULL,
          updated_ts_utc INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS bills_context ON bills (context_id);
        CREATE TABLE IF NOT EXISTS config (
          id INTEGER PRIMARY KEY CHECK (id = 1),
          calendar_visible_events INTEGER NOT NULL,
          week_starts_on_monday INTEGER NOT NULL,
          autopay_enabled INTEGER NOT NULL,
          created_ts_utc INTEGER NOT NULL,
          updated_ts_utc INTEGER NOT NULL
        );",
    )?;

    ensure_config_row(conn)?;
    ensure_bill_columns(conn)?;
    Ok(())
}

fn ensure_config_row(conn: &Connection) -> Result<()> {
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM config", [], |row| row.get(0))?;
    if existing == 0 {
        let defaults = EngineConfig::default();
        conn.execute(
            "INSERT INTO config (id, calendar_visible_events, week_starts_on_monday, autopay_enabled, created_ts_utc, updated_ts_utc)
             VALUES (1, ?1, ?2, ?3, ?4, ?4)",
            params![
                defaults.calendar_visible_events,
                defaults.week_starts_on_monday,
                defaults.autopay_enabled,
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
    }
    Ok(())
}

/// Metadata columns arrived after the first schema; older files get them added.
fn ensure_bill_columns(conn: &Connection) -> Result<()> {
    if !table_has_column(conn, "bills", "category")? {
        conn.execute("ALTER TABLE bills ADD COLUMN category TEXT", [])?;
    }
    if !table_has_column(conn, "bills", "account_suffix")? {
        conn.execute("ALTER TABLE bills ADD COLUMN account_suffix TEXT", [])?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn bill_from_row(row: &Row<'_>) -> rusqlite::Result<BillRecord> {
    let recurrence: String = row.get(3)?;
    let schedule = if recurrence == "monthly" {
        let day: Option<i64> = row.get(6)?;
        BillSchedule::Monthly {
            day_of_month: day.unwrap_or(1).clamp(1, 31) as u32,
            paid_for_month: row.get(7)?,
        }
    } else {
        let status: Option<String> = row.get(5)?;
        BillSchedule::OneTime {
            due_date: row.get(4)?,
            status: status
                .as_deref()
                .map(PaymentStatus::from_db)
                .unwrap_or(PaymentStatus::Unpaid),
        }
    };
    let autopay: i64 = row.get(8)?;
    Ok(BillRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        amount: row.get(2)?,
        schedule,
        autopay: autopay != 0,
        category: row.get(9)?,
        account_suffix: row.get(10)?,
    })
}

pub fn fetch_config(conn: &Connection) -> Result<EngineConfig> {
    let config = conn.query_row(
        "SELECT calendar_visible_events, week_starts_on_monday, autopay_enabled FROM config WHERE id = 1",
        [],
        |row| {
            Ok(EngineConfig {
                calendar_visible_events: row.get(0)?,
                week_starts_on_monday: row.get(1)?,
                autopay_enabled: row.get(2)?,
            })
        },
    )?;
    Ok(config)
}

fn fetch_bill(conn: &Connection, context_id: &str, bill_id: &str) -> Result<BillRecord> {
    conn.query_row(
        &format!(
            "SELECT {} FROM bills WHERE context_id = ?1 AND id = ?2",
            BILL_COLUMNS
        ),
        params![context_id, bill_id],
        bill_from_row,
    )
    .optional()?
    .ok_or_else(|| BillError::NotFound(bill_id.to_string()))
}

/// SQLite-backed bill store. Every successful write republishes the full bill list of
/// the touched household to the attached feed.
pub struct SqliteBillStore {
    conn: Mutex<Connection>,
    feed: Option<BillFeed>,
}

impl SqliteBillStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        info!(path = %path.display(), "bill store opened");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            feed: None,
        }
    }

    pub fn with_feed(mut self, feed: BillFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, context_id: &str) -> Result<()> {
        if let Some(feed) = &self.feed {
            let bills = self.list_bills(context_id)?;
            feed.publish(context_id, bills);
        }
        Ok(())
    }

    /// Pushes the current list without a write, e.g. after a session subscribes.
    pub fn refresh(&self, context_id: &str) -> Result<()> {
        self.publish(context_id)
    }

    pub fn list_bills(&self, context_id: &str) -> Result<Vec<BillRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM bills WHERE context_id = ?1 ORDER BY created_ts_utc, id",
            BILL_COLUMNS
        ))?;
        let rows = stmt.query_map([context_id], bill_from_row)?;

        let mut bills = Vec::new();
        for row in rows {
            bills.push(row?);
        }
        Ok(bills)
    }

    pub fn get_bill(&self, context_id: &str, bill_id: &str) -> Result<BillRecord> {
        fetch_bill(&self.conn(), context_id, bill_id)
    }

    /// Validates `input` and inserts it. Nothing is written when validation fails.
    pub fn create_bill(&self, context_id: &str, input: NewBill) -> Result<BillRecord> {
        let bill = input.validate()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp_millis();

        let (recurrence, due_date, status, day_of_month, paid_for_month) = match &bill.schedule {
            BillSchedule::OneTime { due_date, status } => {
                ("one_time", due_date.clone(), Some(status.as_str()), None, None)
            }
            BillSchedule::Monthly {
                day_of_month,
                paid_for_month,
            } => ("monthly", None, None, Some(*day_of_month), paid_for_month.clone()),
        };

        let created = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO bills (id, context_id, name, amount, recurrence, due_date, status, day_of_month, paid_for_month, autopay, category, account_suffix, created_ts_utc, updated_ts_utc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                params![
                    id,
                    context_id,
                    bill.name,
                    bill.amount,
                    recurrence,
                    due_date,
                    status,
                    day_of_month,
                    paid_for_month,
                    bill.autopay,
                    bill.category,
                    bill.account_suffix,
                    now
                ],
            )?;
            fetch_bill(&conn, context_id, &id)?
        };
        info!(context_id, bill_id = %created.id, name = %created.name, "bill created");

        self.publish(context_id)?;
        Ok(created)
    }

    pub fn delete_bill(&self, context_id: &str, bill_id: &str) -> Result<()> {
        let deleted = self.conn().execute(
            "DELETE FROM bills WHERE context_id = ?1 AND id = ?2",
            params![context_id, bill_id],
        )?;
        if deleted == 0 {
            return Err(BillError::NotFound(bill_id.to_string()));
        }
        info!(context_id, bill_id, "bill deleted");
        self.publish(context_id)
    }

    /// Writes a paid-state change. The change must match the bill's recurrence.
    pub fn apply_paid_state(
        &self,
        context_id: &str,
        bill_id: &str,
        change: PaidStateChange,
    ) -> Result<BillRecord> {
        let updated = {
            let conn = self.conn();
            let bill = fetch_bill(&conn, context_id, bill_id)?;
            if !change.applies_to(bill.recurrence()) {
                return Err(BillError::MutationShape(format!(
                    "{:?} cannot be applied to a {} bill",
                    change,
                    bill.recurrence().as_str()
                )));
            }

            let now = chrono::Utc::now().timestamp_millis();
            match &change {
                PaidStateChange::Status(status) => conn.execute(
                    "UPDATE bills SET status = ?1, updated_ts_utc = ?2 WHERE context_id = ?3 AND id = ?4",
                    params![status.as_str(), now, context_id, bill_id],
                )?,
                PaidStateChange::PaidForMonth(period) => conn.execute(
                    "UPDATE bills SET paid_for_month = ?1, updated_ts_utc = ?2 WHERE context_id = ?3 AND id = ?4",
                    params![period, now, context_id, bill_id],
                )?,
            };
            fetch_bill(&conn, context_id, bill_id)?
        };
        debug!(context_id, bill_id, change = ?change, "bill paid state written");

        self.publish(context_id)?;
        Ok(updated)
    }

    pub fn fetch_config(&self) -> Result<EngineConfig> {
        fetch_config(&self.conn())
    }

    pub fn update_config(&self, payload: ConfigPayload) -> Result<EngineConfig> {
        let conn = self.conn();
        let config = fetch_config(&conn)?.merged(payload)?;
        conn.execute(
            "UPDATE config SET calendar_visible_events = ?1, week_starts_on_monday = ?2, autopay_enabled = ?3, updated_ts_utc = ?4 WHERE id = 1",
            params![
                config.calendar_visible_events,
                config.week_starts_on_monday,
                config.autopay_enabled,
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
        fetch_config(&conn)
    }
}

#[async_trait]
impl BillMutator for SqliteBillStore {
    async fn set_bill_paid_state(
        &self,
        context_id: &str,
        bill_id: &str,
        change: PaidStateChange,
    ) -> Result<()> {
        self.apply_paid_state(context_id, bill_id, change).map(|_| ())
    }
}
