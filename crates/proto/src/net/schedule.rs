/// Background work driven by `NetManager::poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollProcedure {
    SlistSend,
    SlistPoll,
}

/// Time-ordered queue of pending procedures. Entries due at the same time
/// run in the order they were scheduled.
#[derive(Debug, Default)]
pub struct Schedule {
    entries: Vec<(f64, PollProcedure)>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, procedure: PollProcedure) -> bool {
        self.entries.iter().any(|(_, p)| *p == procedure)
    }

    /// Schedules `procedure` at `at`, replacing a pending run of the same
    /// procedure.
    pub fn schedule(&mut self, procedure: PollProcedure, at: f64) {
        self.entries.retain(|(_, p)| *p != procedure);
        let index = self.entries.partition_point(|(time, _)| *time <= at);
        self.entries.insert(index, (at, procedure));
    }

    /// Removes and returns the earliest procedure due at `now`.
    pub fn take_due(&mut self, now: f64) -> Option<PollProcedure> {
        match self.entries.first() {
            Some((time, _)) if *time <= now => Some(self.entries.remove(0).1),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_in_time_order() {
        let mut schedule = Schedule::new();
        schedule.schedule(PollProcedure::SlistPoll, 0.1);
        schedule.schedule(PollProcedure::SlistSend, 0.0);

        assert_eq!(schedule.take_due(0.05), Some(PollProcedure::SlistSend));
        assert_eq!(schedule.take_due(0.05), None);
        assert_eq!(schedule.take_due(0.1), Some(PollProcedure::SlistPoll));
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_reschedule_replaces() {
        let mut schedule = Schedule::new();
        schedule.schedule(PollProcedure::SlistSend, 0.0);
        schedule.schedule(PollProcedure::SlistSend, 0.75);
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.take_due(0.5), None);
        assert_eq!(schedule.take_due(0.75), Some(PollProcedure::SlistSend));
    }
}
