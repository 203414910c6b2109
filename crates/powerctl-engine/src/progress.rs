//! Per-transition aggregation state kept in memory while a transition is in
//! flight: how many of its tasks are still outstanding, and what
//! final transition state the drained counts classify to.

use powerctl_types::{Transition, TransitionPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcomeKind {
    Success,
    Failure,
    Canceled,
}

pub struct TransitionProgress {
    pub transition: Transition,
    pub remaining: usize,
    pub executable_total: usize,
    pub success_count: i64,
    pub failure_count: i64,
    pub canceled_count: usize,
    pub started: bool,
}

impl TransitionProgress {
    pub fn new(transition: Transition, executable_total: usize) -> Self {
        Self {
            transition,
            remaining: executable_total,
            executable_total,
            success_count: 0,
            failure_count: 0,
            canceled_count: 0,
            started: false,
        }
    }

    pub fn record_terminal(&mut self, kind: TaskOutcomeKind) {
        self.remaining = self.remaining.saturating_sub(1);
        match kind {
            TaskOutcomeKind::Success => self.success_count += 1,
            TaskOutcomeKind::Failure => self.failure_count += 1,
            TaskOutcomeKind::Canceled => {
                self.failure_count += 1;
                self.canceled_count += 1;
            }
        }
    }

    pub fn is_drained(&self) -> bool {
        self.remaining == 0
    }

    /// Classifies the drained counts into a terminal transition state
    /// all-canceled wins over all-failed, which wins over partial.
    pub fn final_state(&self) -> TransitionPhase {
        if self.executable_total > 0 && self.canceled_count == self.executable_total && self.success_count == 0 {
            TransitionPhase::Canceled
        } else if self.failure_count == 0 {
            TransitionPhase::Completed
        } else if self.success_count == 0 {
            TransitionPhase::Failed
        } else {
            TransitionPhase::Partial
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use powerctl_types::Operation;
    use uuid::Uuid;

    fn sample_transition(target_count: i64) -> Transition {
        let now = Utc::now();
        Transition {
            id: Uuid::new_v4(),
            request_id: None,
            operation: Operation::On,
            state: TransitionPhase::Pending,
            requested_by: "tester".into(),
            dry_run: false,
            target_count,
            success_count: 0,
            failure_count: 0,
            queued_at: now,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn all_success_completes() {
        let mut p = TransitionProgress::new(sample_transition(2), 2);
        p.record_terminal(TaskOutcomeKind::Success);
        p.record_terminal(TaskOutcomeKind::Success);
        assert!(p.is_drained());
        assert_eq!(p.final_state(), TransitionPhase::Completed);
    }

    #[test]
    fn mixed_outcomes_are_partial() {
        let mut p = TransitionProgress::new(sample_transition(2), 2);
        p.record_terminal(TaskOutcomeKind::Success);
        p.record_terminal(TaskOutcomeKind::Failure);
        assert_eq!(p.final_state(), TransitionPhase::Partial);
    }

    #[test]
    fn all_failed_fails() {
        let mut p = TransitionProgress::new(sample_transition(2), 2);
        p.record_terminal(TaskOutcomeKind::Failure);
        p.record_terminal(TaskOutcomeKind::Failure);
        assert_eq!(p.final_state(), TransitionPhase::Failed);
    }

    #[test]
    fn all_canceled_cancels() {
        let mut p = TransitionProgress::new(sample_transition(2), 2);
        p.record_terminal(TaskOutcomeKind::Canceled);
        p.record_terminal(TaskOutcomeKind::Canceled);
        assert_eq!(p.final_state(), TransitionPhase::Canceled);
    }

    #[test]
    fn partial_cancel_mixed_with_success_is_partial() {
        let mut p = TransitionProgress::new(sample_transition(2), 2);
        p.record_terminal(TaskOutcomeKind::Canceled);
        p.record_terminal(TaskOutcomeKind::Success);
        assert_eq!(p.final_state(), TransitionPhase::Partial);
    }
}
