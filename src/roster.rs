use dashmap::DashSet;
use time::Date;

/// The instructor duty roster: the set of dates with at least one instructor
/// on duty. Student solo flights are only bookable on these dates.
pub struct DutyRoster {
    days: DashSet<Date>,
}

impl DutyRoster {
    pub fn new() -> Self {
        Self {
            days: DashSet::new(),
        }
    }

    /// Mark a date as covered. Returns false if it already was.
    pub fn post(&self, date: Date) -> bool {
        self.days.insert(date)
    }

    /// Remove coverage for a date. Returns false if none was posted.
    pub fn clear(&self, date: Date) -> bool {
        self.days.remove(&date).is_some()
    }

    pub fn instructor_on_duty(&self, date: Date) -> bool {
        self.days.contains(&date)
    }

    /// All covered dates, sorted.
    pub fn days(&self) -> Vec<Date> {
        let mut days: Vec<Date> = self.days.iter().map(|d| *d).collect();
        days.sort();
        days
    }
}

impl Default for DutyRoster {
    fn default() -> Self {
        Self::new()
    }
}
