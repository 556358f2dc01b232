use serde::{Deserialize, Serialize};

use crate::dates::parse_calendar_date;
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "paid",
            PaymentStatus::Unpaid => "unpaid",
        }
    }

    pub fn from_db(value: &str) -> Self {
        if value == "paid" {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Unpaid
        }
    }
}

/// Recurrence-specific half of a bill.
///
/// A monthly bill has no stored status at all; its paid-ness only exists relative to
/// a period through `paid_for_month`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "recurrence", rename_all = "snake_case")]
pub enum BillSchedule {
    OneTime {
        due_date: Option<String>,
        status: PaymentStatus,
    },
    Monthly {
        day_of_month: u32,
        paid_for_month: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recurrence {
    OneTime,
    Monthly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::OneTime => "one_time",
            Recurrence::Monthly => "monthly",
        }
    }
}

/// Snapshot of one bill as delivered by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillRecord {
    pub id: String,
    pub name: String,
    pub amount: f64,
    #[serde(flatten)]
    pub schedule: BillSchedule,
    #[serde(default)]
    pub autopay: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub account_suffix: Option<String>,
}

impl BillRecord {
    pub fn recurrence(&self) -> Recurrence {
        match self.schedule {
            BillSchedule::OneTime { .. } => Recurrence::OneTime,
            BillSchedule::Monthly { .. } => Recurrence::Monthly,
        }
    }
}

/// The two mutually exclusive paid-state writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaidStateChange {
    /// OneTime bills only.
    Status(PaymentStatus),
    /// Monthly bills only; `None` clears the settlement.
    PaidForMonth(Option<String>),
}

impl PaidStateChange {
    pub fn applies_to(&self, recurrence: Recurrence) -> bool {
        matches!(
            (self, recurrence),
            (PaidStateChange::Status(_), Recurrence::OneTime)
                | (PaidStateChange::PaidForMonth(_), Recurrence::Monthly)
        )
    }
}

/// Unvalidated create request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewBill {
    pub name: String,
    pub amount: f64,
    pub recurrence: Recurrence,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub day_of_month: Option<i64>,
    #[serde(default)]
    pub autopay: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub account_suffix: Option<String>,
}

/// Create request that passed validation, ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidBill {
    pub name: String,
    pub amount: f64,
    pub schedule: BillSchedule,
    pub autopay: bool,
    pub category: Option<String>,
    pub account_suffix: Option<String>,
}

impl NewBill {
    pub fn validate(self) -> Result<ValidBill, ValidationError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if !self.amount.is_finite() {
            return Err(ValidationError::NonFiniteAmount);
        }

        let schedule = match self.recurrence {
            Recurrence::OneTime => {
                let due_date = non_empty(self.due_date);
                if let Some(due) = &due_date {
                    if parse_calendar_date(due).is_none() {
                        return Err(ValidationError::InvalidDueDate(due.clone()));
                    }
                }
                BillSchedule::OneTime {
                    due_date,
                    status: PaymentStatus::Unpaid,
                }
            }
            Recurrence::Monthly => {
                let day = self.day_of_month.unwrap_or(0);
                if !(1..=31).contains(&day) {
                    return Err(ValidationError::DayOfMonthOutOfRange(day));
                }
                BillSchedule::Monthly {
                    day_of_month: day as u32,
                    paid_for_month: None,
                }
            }
        };

        let account_suffix = non_empty(self.account_suffix);
        if let Some(suffix) = &account_suffix {
            if suffix.len() != 4 || !suffix.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ValidationError::InvalidAccountSuffix(suffix.clone()));
            }
        }

        Ok(ValidBill {
            name,
            amount: self.amount,
            schedule,
            autopay: self.autopay,
            category: non_empty(self.category),
            account_suffix,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
