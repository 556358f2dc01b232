use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::bill::{BillRecord, BillSchedule, PaymentStatus};
use crate::dates::{Clock, Period};
use crate::status::{badge, derive_status, is_overdue, resolve_due_date, Badge};

#[derive(Debug, Clone, Serialize)]
pub struct BillRow {
    pub bill: BillRecord,
    pub status: PaymentStatus,
    pub overdue: bool,
    pub badge: Badge,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub due_this_month_total: f64,
    pub paid_this_month_total: f64,
    pub remaining_this_month_total: f64,
    pub overdue_total: f64,
    pub unpaid_count: usize,
    pub overdue_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub period: Period,
    pub today: NaiveDate,
    pub bills: Vec<BillRow>,
    pub summary: Summary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillFilter {
    #[default]
    All,
    Unpaid,
    Paid,
    Overdue,
    Autopay,
}

impl BillFilter {
    fn keeps(&self, row: &BillRow) -> bool {
        match self {
            BillFilter::All => true,
            BillFilter::Unpaid => row.status == PaymentStatus::Unpaid,
            BillFilter::Paid => row.status == PaymentStatus::Paid,
            BillFilter::Overdue => row.overdue,
            BillFilter::Autopay => row.bill.autopay,
        }
    }
}

fn status_rank(status: PaymentStatus) -> u8 {
    match status {
        PaymentStatus::Unpaid => 0,
        PaymentStatus::Paid => 1,
    }
}

/// Absent due dates sort after every resolved one.
fn compare_due(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Unpaid before paid, then due date, then name.
/// Human name order: case-insensitive first, with exact case as the tie-break so the
/// order stays total.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

pub fn compare_bills(a: &BillRecord, b: &BillRecord, period: Period) -> Ordering {
    status_rank(derive_status(a, period))
        .cmp(&status_rank(derive_status(b, period)))
        .then_with(|| compare_due(resolve_due_date(a, period), resolve_due_date(b, period)))
        .then_with(|| compare_names(&a.name, &b.name))
}

pub fn sort_bills(bills: &mut [BillRecord], period: Period) {
    bills.sort_by(|a, b| compare_bills(a, b, period));
}

/// Whether the bill's due date lands inside `period`.
fn due_in_period(bill: &BillRecord, period: Period) -> bool {
    match &bill.schedule {
        BillSchedule::Monthly { .. } => true,
        BillSchedule::OneTime { .. } => resolve_due_date(bill, period)
            .map(|due| period.contains(due))
            .unwrap_or(false),
    }
}

pub fn summarize(bills: &[BillRecord], period: Period, today: NaiveDate) -> Summary {
    let mut summary = Summary::default();

    for bill in bills {
        let status = derive_status(bill, period);
        if due_in_period(bill, period) {
            summary.due_this_month_total += bill.amount;
            if status == PaymentStatus::Paid {
                summary.paid_this_month_total += bill.amount;
            }
        }
        if status == PaymentStatus::Unpaid {
            summary.unpaid_count += 1;
        }
        if is_overdue(bill, period, today) {
            summary.overdue_total += bill.amount;
            summary.overdue_count += 1;
        }
    }

    summary.remaining_this_month_total =
        (summary.due_this_month_total - summary.paid_this_month_total).max(0.0);
    summary
}

pub fn build_rows(bills: &[BillRecord], period: Period, today: NaiveDate) -> Vec<BillRow> {
    let mut sorted = bills.to_vec();
    sort_bills(&mut sorted, period);
    sorted
        .into_iter()
        .map(|bill| BillRow {
            status: derive_status(&bill, period),
            overdue: is_overdue(&bill, period, today),
            badge: badge(&bill, period, today),
            due_date: resolve_due_date(&bill, period),
            bill,
        })
        .collect()
}

/// Dashboard for the clock's current month. Totals always cover the full bill set;
/// `filter` only narrows the rows.
pub fn build_dashboard(bills: &[BillRecord], clock: &dyn Clock, filter: BillFilter) -> Dashboard {
    let today = clock.today();
    let period = Period::from_date(today);
    let rows = build_rows(bills, period, today)
        .into_iter()
        .filter(|row| filter.keeps(row))
        .collect();

    Dashboard {
        period,
        today,
        bills: rows,
        summary: summarize(bills, period, today),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::FixedClock;
    use crate::status::fixtures::*;

    fn named(mut bill: BillRecord, name: &str, amount: f64) -> BillRecord {
        bill.name = name.to_string();
        bill.amount = amount;
        bill
    }

    fn names(bills: &[BillRecord]) -> Vec<&str> {
        bills.iter().map(|b| b.name.as_str()).collect()
    }

    #[test]
    fn unpaid_sorts_before_paid() {
        let p = period("2024-03");
        let mut bills = vec![
            named(monthly("a", 1, Some("2024-03")), "Aardvark", 1.0),
            named(one_time("b", None, PaymentStatus::Unpaid), "Zebra", 1.0),
            named(one_time("c", Some("2024-01-01"), PaymentStatus::Paid), "Early", 1.0),
            named(monthly("d", 28, None), "Late", 1.0),
        ];
        sort_bills(&mut bills, p);
        assert_eq!(names(&bills), vec!["Late", "Zebra", "Early", "Aardvark"]);

        for (i, a) in bills.iter().enumerate() {
            for b in &bills[i + 1..] {
                assert!(
                    !(derive_status(a, p) == PaymentStatus::Paid
                        && derive_status(b, p) == PaymentStatus::Unpaid)
                );
            }
        }
    }

    #[test]
    fn missing_due_date_sorts_last() {
        let p = period("2024-03");
        let mut bills = vec![
            named(one_time("x", None, PaymentStatus::Unpaid), "A first by name", 1.0),
            named(one_time("y", Some("2099-12-31"), PaymentStatus::Unpaid), "Far", 1.0),
            named(monthly("z", 31, None), "Monthly", 1.0),
        ];
        sort_bills(&mut bills, p);
        assert_eq!(names(&bills), vec!["Monthly", "Far", "A first by name"]);
    }

    #[test]
    fn name_breaks_ties_ignoring_case() {
        let p = period("2024-03");
        let mut bills = vec![
            named(monthly("1", 10, None), "electric", 1.0),
            named(monthly("2", 10, None), "Water", 1.0),
            named(monthly("3", 10, None), "Electric", 1.0),
        ];
        sort_bills(&mut bills, p);
        assert_eq!(names(&bills), vec!["Electric", "electric", "Water"]);

        let mut bills = vec![
            named(monthly("1", 10, None), "Zoo", 1.0),
            named(monthly("2", 10, None), "Banana", 1.0),
            named(monthly("3", 10, None), "apple", 1.0),
        ];
        sort_bills(&mut bills, p);
        assert_eq!(names(&bills), vec!["apple", "Banana", "Zoo"]);
    }

    #[test]
    fn totals_for_current_month() {
        let p = period("2024-03");
        let today = day("2024-03-10");
        let bills = vec![
            named(monthly("rent", 1, Some("2024-03")), "Rent", 1000.0),
            named(monthly("power", 5, None), "Power", 80.0),
            named(monthly("net", 20, None), "Internet", 50.0),
            named(one_time("fix", Some("2024-03-02"), PaymentStatus::Paid), "Fix", 30.0),
            named(one_time("old", Some("2024-02-01"), PaymentStatus::Unpaid), "Old", 25.0),
            named(one_time("next", Some("2024-04-02"), PaymentStatus::Unpaid), "Next", 7.0),
            named(one_time("open", None, PaymentStatus::Unpaid), "Open", 3.0),
        ];

        let summary = summarize(&bills, p, today);
        assert_eq!(summary.due_this_month_total, 1160.0);
        assert_eq!(summary.paid_this_month_total, 1030.0);
        assert_eq!(summary.remaining_this_month_total, 130.0);
        assert_eq!(summary.overdue_total, 105.0);
        assert_eq!(summary.overdue_count, 2);
        assert_eq!(summary.unpaid_count, 5);
    }

    #[test]
    fn remaining_never_negative() {
        let p = period("2024-03");
        let bills = vec![
            named(monthly("refund", 1, Some("2024-03")), "Refund", 50.0),
            named(monthly("neg", 2, None), "Credit", -80.0),
        ];
        let summary = summarize(&bills, p, day("2024-03-01"));
        assert_eq!(summary.due_this_month_total, -30.0);
        assert_eq!(summary.remaining_this_month_total, 0.0);
    }

    #[test]
    fn dashboard_filters_rows_not_totals() {
        let clock = FixedClock::parse("2024-03-10").expect("clock");
        let mut auto = monthly("auto", 1, None);
        auto.autopay = true;
        let bills = vec![
            auto,
            monthly("paid", 2, Some("2024-03")),
            one_time("late", Some("2024-03-01"), PaymentStatus::Unpaid),
        ];

        let all = build_dashboard(&bills, &clock, BillFilter::All);
        assert_eq!(all.bills.len(), 3);
        assert_eq!(all.period.to_string(), "2024-03");

        let overdue = build_dashboard(&bills, &clock, BillFilter::Overdue);
        assert_eq!(overdue.bills.len(), 2);
        assert!(overdue.bills.iter().all(|row| row.badge == Badge::Overdue));
        assert_eq!(overdue.summary, all.summary);

        let paid = build_dashboard(&bills, &clock, BillFilter::Paid);
        assert_eq!(paid.bills.len(), 1);
        assert_eq!(paid.bills[0].bill.id, "paid");

        let autopay = build_dashboard(&bills, &clock, BillFilter::Autopay);
        assert_eq!(autopay.bills.len(), 1);
        assert_eq!(autopay.bills[0].bill.id, "auto");
    }

    #[test]
    fn undated_bill_sorts_after_dated_and_is_never_overdue() {
        let clock = FixedClock::parse("2030-06-15").expect("clock");
        let bills = vec![
            one_time("undated", None, PaymentStatus::Unpaid),
            one_time("ancient", Some("1999-01-01"), PaymentStatus::Unpaid),
        ];
        let dash = build_dashboard(&bills, &clock, BillFilter::All);
        assert_eq!(dash.bills[0].bill.id, "ancient");
        assert_eq!(dash.bills[1].bill.id, "undated");
        assert!(!dash.bills[1].overdue);
        assert_eq!(dash.bills[1].due_date, None);
    }
}
