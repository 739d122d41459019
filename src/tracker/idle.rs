use std::time::Duration;

/// Decides whether the user counts as idle. While idle, Active sessions are
/// neither opened nor extended; Running sessions are unaffected.
pub struct IdleEvaluator {
    threshold: Duration,
}

impl IdleEvaluator {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn is_idle(&self, idle_time: Duration) -> bool {
        idle_time >= self.threshold
    }
}

#[cfg(test)]
mod idle_tests {
    use super::*;

    #[test]
    fn threshold_boundary_counts_as_idle() {
        let evaluator = IdleEvaluator::new(Duration::from_secs(300));

        assert!(!evaluator.is_idle(Duration::from_secs(299)));
        assert!(evaluator.is_idle(Duration::from_secs(300)));
        assert!(evaluator.is_idle(Duration::from_secs(301)));
    }
}
