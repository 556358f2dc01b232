use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::bill::{BillRecord, BillSchedule};
use crate::dates::{parse_calendar_date, Period};
use crate::status::{badge, resolve_due_date, Badge};
use crate::summary::compare_names;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarEvent {
    pub bill_id: String,
    pub day: u32,
    pub status: Badge,
    pub amount: f64,
    pub name: String,
    pub due_date: NaiveDate,
    pub sort_key: String,
}

/// One day cell as a grid would draw it: the first few events plus a count of the rest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayCell<'a> {
    pub day: u32,
    pub visible: &'a [CalendarEvent],
    pub overflow: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CalendarMonth {
    pub period: Period,
    pub days_in_month: u32,
    pub days: BTreeMap<u32, Vec<CalendarEvent>>,
}

impl CalendarMonth {
    /// Every event on `day`, in display order.
    pub fn events_on(&self, day: u32) -> &[CalendarEvent] {
        self.days.get(&day).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn cell(&self, day: u32, max_visible: usize) -> DayCell<'_> {
        let events = self.events_on(day);
        let shown = events.len().min(max_visible);
        DayCell {
            day,
            visible: &events[..shown],
            overflow: events.len() - shown,
        }
    }

    pub fn total_for_day(&self, day: u32) -> f64 {
        self.events_on(day).iter().map(|event| event.amount).sum()
    }

    pub fn event_count(&self) -> usize {
        self.days.values().map(Vec::len).sum()
    }

    /// Rows of seven slots; `None` pads before the 1st and after the last day.
    pub fn weeks(&self, week_starts_on_monday: bool) -> Vec<[Option<u32>; 7]> {
        let Some(first) = self.period.first_day() else {
            return Vec::new();
        };
        let lead = if week_starts_on_monday {
            first.weekday().num_days_from_monday() as usize
        } else {
            first.weekday().num_days_from_sunday() as usize
        };

        let mut weeks = Vec::new();
        let mut week = [None; 7];
        let mut slot = lead;
        for day in 1..=self.days_in_month {
            week[slot] = Some(day);
            slot += 1;
            if slot == 7 {
                weeks.push(week);
                week = [None; 7];
                slot = 0;
            }
        }
        if slot > 0 {
            weeks.push(week);
        }
        weeks
    }

    /// Week rows of day cells, ready for a month grid.
    pub fn grid(&self, max_visible: usize, week_starts_on_monday: bool) -> Vec<Vec<Option<DayCell<'_>>>> {
        self.weeks(week_starts_on_monday)
            .into_iter()
            .map(|week| {
                week.iter()
                    .map(|slot| slot.map(|day| self.cell(day, max_visible)))
                    .collect()
            })
            .collect()
    }
}

fn event_label(name: &str, amount: f64) -> String {
    format!("{} {:.2}", name, amount)
}

fn event_date(bill: &BillRecord, period: Period) -> Option<NaiveDate> {
    match &bill.schedule {
        BillSchedule::Monthly { .. } => resolve_due_date(bill, period),
        BillSchedule::OneTime { due_date, .. } => due_date
            .as_deref()
            .and_then(parse_calendar_date)
            .filter(|due| period.contains(*due)),
    }
}

/// Projects `bills` onto the displayed month. Status is derived against the displayed
/// period, so past and future months show their own settlement state.
pub fn project_month(bills: &[BillRecord], period: Period, today: NaiveDate) -> CalendarMonth {
    let mut days: BTreeMap<u32, Vec<CalendarEvent>> = BTreeMap::new();

    for bill in bills {
        let Some(due) = event_date(bill, period) else {
            continue;
        };
        days.entry(due.day()).or_default().push(CalendarEvent {
            bill_id: bill.id.clone(),
            day: due.day(),
            status: badge(bill, period, today),
            amount: bill.amount,
            name: bill.name.clone(),
            due_date: due,
            sort_key: event_label(&bill.name, bill.amount),
        });
    }

    for events in days.values_mut() {
        events.sort_by(|a, b| {
            a.due_date
                .cmp(&b.due_date)
                .then_with(|| compare_names(&a.sort_key, &b.sort_key))
        });
    }

    CalendarMonth {
        period,
        days_in_month: period.days(),
        days,
    }
}
