//! Publication slot planning.
//!
//! Slots are the configured posting times on each day of the horizon,
//! starting today, skipping weekends when configured and anything not
//! strictly later than the lead time from now. Threads are placed first, each
//! at least the minimum spacing from every other thread; single and quote
//! posts then fill the remaining slots in order. Items that do not fit stay
//! unscheduled.

use chrono::{Datelike, Duration, NaiveTime, Weekday};

use pipeline::{ContentItem, ContentItemId, ContentKind, PipelineError, PublishingSettings, Timestamp};

/// Spacing and lead time are capped at a year.
const MAX_HOURS: u64 = 24 * 366;

/// Slot assignments for a set of approved items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulePlan {
    /// Items given a slot, ordered by slot.
    pub assignments: Vec<(ContentItemId, Timestamp)>,
    /// Approved items left without a slot.
    pub unscheduled: Vec<ContentItemId>,
}

/// Assigns publication slots.
#[derive(Debug, Clone)]
pub struct PublishingScheduler {
    daily_slots: Vec<NaiveTime>,
    avoid_weekends: bool,
    thread_spacing: Duration,
    horizon_days: u64,
    lead_time: Duration,
}

impl PublishingScheduler {
    /// Builds a scheduler from publishing settings.
    pub fn new(settings: &PublishingSettings) -> Result<Self, PipelineError> {
        Ok(Self {
            daily_slots: settings.daily_slots()?,
            avoid_weekends: settings.avoid_weekends,
            thread_spacing: Duration::hours(settings.min_thread_spacing_hours.min(MAX_HOURS) as i64),
            horizon_days: settings.horizon_days,
            lead_time: Duration::minutes(settings.lead_time_minutes.min(MAX_HOURS * 60) as i64),
        })
    }

    /// Every usable slot from `now` over the horizon, earliest first.
    pub fn slots(&self, now: Timestamp) -> Vec<Timestamp> {
        let now = now.as_datetime();
        let earliest = now + self.lead_time;
        let today = now.date_naive();
        let mut slots = Vec::new();
        for offset in 0..self.horizon_days {
            let Some(date) = today.checked_add_days(chrono::Days::new(offset)) else {
                break;
            };
            if self.avoid_weekends && matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                continue;
            }
            for time in &self.daily_slots {
                let at = date.and_time(*time).and_utc();
                if at > earliest {
                    slots.push(Timestamp::from_utc(at));
                }
            }
        }
        slots.sort();
        slots
    }

    /// Plans slots for the approved items among `items`.
    pub fn plan(&self, items: &[ContentItem], now: Timestamp) -> SchedulePlan {
        let slots = self.slots(now);
        let mut taken = vec![false; slots.len()];
        let mut thread_slots: Vec<Timestamp> = Vec::new();
        let mut plan = SchedulePlan::default();

        let approved = items.iter().filter(|i| i.is_approved());
        let (threads, others): (Vec<&ContentItem>, Vec<&ContentItem>) =
            approved.partition(|i| i.kind() == ContentKind::Thread);

        for thread in threads {
            let free = (0..slots.len()).find(|&s| {
                !taken[s]
                    && thread_slots
                        .iter()
                        .all(|placed| gap(*placed, slots[s]) >= self.thread_spacing)
            });
            match free {
                Some(s) => {
                    taken[s] = true;
                    thread_slots.push(slots[s]);
                    plan.assignments.push((thread.id(), slots[s]));
                }
                None => plan.unscheduled.push(thread.id()),
            }
        }

        for item in others {
            match (0..slots.len()).find(|&s| !taken[s]) {
                Some(s) => {
                    taken[s] = true;
                    plan.assignments.push((item.id(), slots[s]));
                }
                None => plan.unscheduled.push(item.id()),
            }
        }

        plan.assignments.sort_by_key(|(_, at)| *at);
        plan
    }
}

fn gap(a: Timestamp, b: Timestamp) -> Duration {
    (a.as_datetime() - b.as_datetime()).abs()
}
