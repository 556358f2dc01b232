use chrono::NaiveDate;
use serde::Serialize;

use crate::bill::{BillRecord, BillSchedule, PaymentStatus};
use crate::dates::{parse_calendar_date, resolve_recurring_due_date, Period};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    Paid,
    Overdue,
    Unpaid,
}

/// Paid-ness of `bill` for `period`.
pub fn derive_status(bill: &BillRecord, period: Period) -> PaymentStatus {
    match &bill.schedule {
        BillSchedule::Monthly { paid_for_month, .. } => {
            if paid_for_month.as_deref() == Some(period.to_string().as_str()) {
                PaymentStatus::Paid
            } else {
                PaymentStatus::Unpaid
            }
        }
        BillSchedule::OneTime { status, .. } => *status,
    }
}

/// Due date of `bill` as seen from `period`. Monthly bills always resolve; one-time
/// bills only when their `due_date` parses.
pub fn resolve_due_date(bill: &BillRecord, period: Period) -> Option<NaiveDate> {
    match &bill.schedule {
        BillSchedule::Monthly { day_of_month, .. } => {
            resolve_recurring_due_date(period.year(), period.month(), *day_of_month)
        }
        BillSchedule::OneTime { due_date, .. } => due_date.as_deref().and_then(parse_calendar_date),
    }
}

/// Unpaid and strictly past due at day granularity. A period after today's month is
/// never overdue.
pub fn is_overdue(bill: &BillRecord, period: Period, today: NaiveDate) -> bool {
    if derive_status(bill, period) == PaymentStatus::Paid {
        return false;
    }
    if period > Period::from_date(today) {
        return false;
    }
    match resolve_due_date(bill, period) {
        Some(due) => due < today,
        None => false,
    }
}

pub fn badge(bill: &BillRecord, period: Period, today: NaiveDate) -> Badge {
    if derive_status(bill, period) == PaymentStatus::Paid {
        Badge::Paid
    } else if is_overdue(bill, period, today) {
        Badge::Overdue
    } else {
        Badge::Unpaid
    }
}
