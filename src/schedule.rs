use serde::{Deserialize, Serialize};

/// One band of the report cadence: every `every`-th iteration up to (and including) `up_to`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTier {
    pub up_to: usize,
    pub every: usize,
}

impl ReportTier {
    pub const fn new(up_to: usize, every: usize) -> Self {
        Self { up_to, every }
    }

    pub fn is_due(&self, iteration: usize) -> bool {
        self.every != 0 && iteration <= self.up_to && iteration % self.every == 0
    }
}

/// Decides at which training iterations the running loss is reported.
///
/// An iteration is due when any tier accepts it.
///
/// Example, the [default](ReportSchedule::tiered) tiers:
/// 0..=10 every iteration, then 20, 30, .., 100, then 200, .., 1000,
/// then 1500, 2000, .., 10000, and nothing afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSchedule {
    pub tiers: Vec<ReportTier>,
}

impl Default for ReportSchedule {
    fn default() -> Self {
        Self::tiered()
    }
}

impl ReportSchedule {
    pub fn tiered() -> Self {
        Self {
            tiers: vec![
                ReportTier::new(10, 1),
                ReportTier::new(100, 10),
                ReportTier::new(1000, 100),
                ReportTier::new(10000, 500),
            ],
        }
    }

    /// Reports every iteration.
    pub fn always() -> Self {
        Self {
            tiers: vec![ReportTier::new(usize::MAX, 1)],
        }
    }

    pub fn is_due(&self, iteration: usize) -> bool {
        self.tiers.iter().any(|tier| tier.is_due(iteration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiered_schedule_matches_cadence() {
        let schedule = ReportSchedule::tiered();
        let due: Vec<usize> = (0..20_000).filter(|&i| schedule.is_due(i)).collect();

        let mut expected: Vec<usize> = (0..=10).collect();
        expected.extend((20..=100).step_by(10));
        expected.extend((200..=1000).step_by(100));
        expected.extend((1500..=10000).step_by(500));

        assert_eq!(due, expected);
    }

    #[test]
    fn nothing_due_after_last_tier() {
        let schedule = ReportSchedule::default();
        assert!(schedule.is_due(10000));
        assert!(!schedule.is_due(10500));
        assert!(!schedule.is_due(20000));
    }

    #[test]
    fn zero_step_tier_never_fires() {
        let schedule = ReportSchedule {
            tiers: vec![ReportTier::new(100, 0)],
        };
        assert!(!(0..=100).any(|i| schedule.is_due(i)));
    }
}
