//! Explicit state machines for transitions and tasks.
//!
//! Both follow the same shape: a closed `Phase` enum, a closed `Event` enum,
//! and an `apply` method that either performs the transition or returns an
//! error the caller must treat as a bug (never silently ignored), matching
//! the order-state-machine idiom this workspace carries over from its
//! execution crate.

use std::collections::HashSet;
use std::fmt;

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPhase {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
    Canceled,
    Planned,
}

impl TransitionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransitionPhase::Completed
                | TransitionPhase::Failed
                | TransitionPhase::Partial
                | TransitionPhase::Canceled
                | TransitionPhase::Planned
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionPhase::Pending => "pending",
            TransitionPhase::Running => "running",
            TransitionPhase::Completed => "completed",
            TransitionPhase::Failed => "failed",
            TransitionPhase::Partial => "partial",
            TransitionPhase::Canceled => "canceled",
            TransitionPhase::Planned => "planned",
        }
    }

    pub fn parse(s: &str) -> Option<TransitionPhase> {
        match s {
            "pending" => Some(TransitionPhase::Pending),
            "running" => Some(TransitionPhase::Running),
            "completed" => Some(TransitionPhase::Completed),
            "failed" => Some(TransitionPhase::Failed),
            "partial" => Some(TransitionPhase::Partial),
            "canceled" => Some(TransitionPhase::Canceled),
            "planned" => Some(TransitionPhase::Planned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionLifecycleEvent {
    /// First task started running.
    Start,
    /// Worker-pool drain completed; carries the computed final classification.
    Finish(TransitionPhase),
    /// Operator-initiated abort.
    Abort,
    /// Dry-run submission: transition is terminal at creation, no execution occurs.
    MarkPlanned,
}

impl TransitionLifecycleEvent {
    fn label(&self) -> String {
        match self {
            TransitionLifecycleEvent::Start => "start".to_string(),
            TransitionLifecycleEvent::Finish(p) => format!("finish({})", p.as_str()),
            TransitionLifecycleEvent::Abort => "abort".to_string(),
            TransitionLifecycleEvent::MarkPlanned => "mark_planned".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionStateError {
    pub from: TransitionPhase,
    pub event: String,
}

impl fmt::Display for TransitionStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "illegal transition state change: from={:?} event={}",
            self.from, self.event
        )
    }
}

impl std::error::Error for TransitionStateError {}

/// Owns a transition's current phase plus the set of event ids already applied, so
/// replaying an event the store already committed is a no-op instead of a double-transition.
#[derive(Debug, Clone)]
pub struct TransitionMachine {
    state: TransitionPhase,
    applied: HashSet<String>,
}

impl TransitionMachine {
    pub fn new(initial: TransitionPhase) -> Self {
        Self {
            state: initial,
            applied: HashSet::new(),
        }
    }

    pub fn state(&self) -> TransitionPhase {
        self.state
    }

    pub fn apply(
        &mut self,
        event: &TransitionLifecycleEvent,
        event_id: Option<&str>,
    ) -> Result<(), TransitionStateError> {
        if let Some(id) = event_id {
            if !self.applied.insert(id.to_string()) {
                return Ok(());
            }
        }
        let next = do_transition(self.state, event)?;
        self.state = next;
        Ok(())
    }
}

fn do_transition(
    from: TransitionPhase,
    event: &TransitionLifecycleEvent,
) -> Result<TransitionPhase, TransitionStateError> {
    use TransitionLifecycleEvent as E;
    use TransitionPhase as P;

    let illegal = || TransitionStateError {
        from,
        event: event.label(),
    };

    match (from, event) {
        (P::Pending, E::Start) => Ok(P::Running),
        (P::Pending, E::MarkPlanned) => Ok(P::Planned),
        (P::Pending, E::Abort) | (P::Running, E::Abort) => Ok(P::Canceled),
        (
            P::Running,
            E::Finish(final_state @ (P::Completed | P::Failed | P::Partial | P::Canceled)),
        ) => Ok(*final_state),
        // A transition with zero executable tasks is persisted terminal at
        // creation without ever observing `Start`.
        (
            P::Pending,
            E::Finish(final_state @ (P::Completed | P::Failed | P::Partial | P::Canceled)),
        ) => Ok(*final_state),
        _ => Err(illegal()),
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Planned,
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskPhase::Succeeded | TaskPhase::Failed | TaskPhase::Canceled | TaskPhase::Planned
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPhase::Pending => "pending",
            TaskPhase::Running => "running",
            TaskPhase::Succeeded => "succeeded",
            TaskPhase::Failed => "failed",
            TaskPhase::Canceled => "canceled",
            TaskPhase::Planned => "planned",
        }
    }

    pub fn parse(s: &str) -> Option<TaskPhase> {
        match s {
            "pending" => Some(TaskPhase::Pending),
            "running" => Some(TaskPhase::Running),
            "succeeded" => Some(TaskPhase::Succeeded),
            "failed" => Some(TaskPhase::Failed),
            "canceled" => Some(TaskPhase::Canceled),
            "planned" => Some(TaskPhase::Planned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskLifecycleEvent {
    /// Worker dequeued the task and acquired its per-BMC slot.
    Start,
    /// Terminal outcome from the executor/verifier/state-updater pipeline.
    Finish(TaskPhase),
    /// Dry-run submission.
    MarkPlanned,
    /// Mapping was unresolved at submission; skips straight to `failed`.
    FailMapping(String),
}

impl TaskLifecycleEvent {
    fn label(&self) -> String {
        match self {
            TaskLifecycleEvent::Start => "start".to_string(),
            TaskLifecycleEvent::Finish(p) => format!("finish({})", p.as_str()),
            TaskLifecycleEvent::MarkPlanned => "mark_planned".to_string(),
            TaskLifecycleEvent::FailMapping(_) => "fail_mapping".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStateError {
    pub from: TaskPhase,
    pub event: String,
}

impl fmt::Display for TaskStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "illegal task state change: from={:?} event={}",
            self.from, self.event
        )
    }
}

impl std::error::Error for TaskStateError {}

#[derive(Debug, Clone)]
pub struct TaskMachine {
    state: TaskPhase,
    applied: HashSet<String>,
}

impl TaskMachine {
    pub fn new(initial: TaskPhase) -> Self {
        Self {
            state: initial,
            applied: HashSet::new(),
        }
    }

    pub fn state(&self) -> TaskPhase {
        self.state
    }

    pub fn apply(
        &mut self,
        event: &TaskLifecycleEvent,
        event_id: Option<&str>,
    ) -> Result<(), TaskStateError> {
        if let Some(id) = event_id {
            if !self.applied.insert(id.to_string()) {
                return Ok(());
            }
        }
        let next = do_task_transition(self.state, event)?;
        self.state = next;
        Ok(())
    }
}

fn do_task_transition(
    from: TaskPhase,
    event: &TaskLifecycleEvent,
) -> Result<TaskPhase, TaskStateError> {
    use TaskLifecycleEvent as E;
    use TaskPhase as P;

    let illegal = || TaskStateError {
        from,
        event: event.label(),
    };

    match (from, event) {
        (P::Pending, E::Start) => Ok(P::Running),
        (P::Pending, E::MarkPlanned) => Ok(P::Planned),
        (P::Pending, E::FailMapping(_)) => Ok(P::Failed),
        (
            P::Running,
            E::Finish(terminal @ (P::Succeeded | P::Failed | P::Canceled)),
        ) => Ok(*terminal),
        // A queued-but-not-started task observes cancellation at dequeue
        // time without ever reaching `running`.
        (P::Pending, E::Finish(P::Canceled)) => Ok(P::Canceled),
        _ => Err(illegal()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_happy_path() {
        let mut m = TransitionMachine::new(TransitionPhase::Pending);
        m.apply(&TransitionLifecycleEvent::Start, None).unwrap();
        assert_eq!(m.state(), TransitionPhase::Running);
        m.apply(
            &TransitionLifecycleEvent::Finish(TransitionPhase::Completed),
            None,
        )
        .unwrap();
        assert_eq!(m.state(), TransitionPhase::Completed);
    }

    #[test]
    fn transition_zero_executable_goes_straight_to_terminal() {
        let mut m = TransitionMachine::new(TransitionPhase::Pending);
        m.apply(
            &TransitionLifecycleEvent::Finish(TransitionPhase::Failed),
            None,
        )
        .unwrap();
        assert_eq!(m.state(), TransitionPhase::Failed);
    }

    #[test]
    fn transition_dry_run_marks_planned() {
        let mut m = TransitionMachine::new(TransitionPhase::Pending);
        m.apply(&TransitionLifecycleEvent::MarkPlanned, None).unwrap();
        assert_eq!(m.state(), TransitionPhase::Planned);
    }

    #[test]
    fn transition_abort_from_pending_or_running() {
        let mut m = TransitionMachine::new(TransitionPhase::Pending);
        m.apply(&TransitionLifecycleEvent::Abort, None).unwrap();
        assert_eq!(m.state(), TransitionPhase::Canceled);

        let mut m = TransitionMachine::new(TransitionPhase::Running);
        m.apply(&TransitionLifecycleEvent::Abort, None).unwrap();
        assert_eq!(m.state(), TransitionPhase::Canceled);
    }

    #[test]
    fn transition_rejects_illegal_jump() {
        let mut m = TransitionMachine::new(TransitionPhase::Completed);
        let err = m.apply(&TransitionLifecycleEvent::Start, None).unwrap_err();
        assert_eq!(err.from, TransitionPhase::Completed);
    }

    #[test]
    fn transition_idempotent_replay_by_event_id() {
        let mut m = TransitionMachine::new(TransitionPhase::Pending);
        m.apply(&TransitionLifecycleEvent::Start, Some("evt-1")).unwrap();
        assert_eq!(m.state(), TransitionPhase::Running);
        // Replaying the same event id is a no-op, not an illegal-jump error.
        m.apply(&TransitionLifecycleEvent::Start, Some("evt-1")).unwrap();
        assert_eq!(m.state(), TransitionPhase::Running);
    }

    #[test]
    fn task_happy_path() {
        let mut m = TaskMachine::new(TaskPhase::Pending);
        m.apply(&TaskLifecycleEvent::Start, None).unwrap();
        assert_eq!(m.state(), TaskPhase::Running);
        m.apply(&TaskLifecycleEvent::Finish(TaskPhase::Succeeded), None)
            .unwrap();
        assert_eq!(m.state(), TaskPhase::Succeeded);
    }

    #[test]
    fn task_mapping_failure_skips_running() {
        let mut m = TaskMachine::new(TaskPhase::Pending);
        m.apply(
            &TaskLifecycleEvent::FailMapping("node not found".into()),
            None,
        )
        .unwrap();
        assert_eq!(m.state(), TaskPhase::Failed);
    }

    #[test]
    fn task_dry_run_marks_planned() {
        let mut m = TaskMachine::new(TaskPhase::Pending);
        m.apply(&TaskLifecycleEvent::MarkPlanned, None).unwrap();
        assert_eq!(m.state(), TaskPhase::Planned);
    }

    #[test]
    fn task_queued_cancel_before_start() {
        let mut m = TaskMachine::new(TaskPhase::Pending);
        m.apply(&TaskLifecycleEvent::Finish(TaskPhase::Canceled), None)
            .unwrap();
        assert_eq!(m.state(), TaskPhase::Canceled);
    }

    #[test]
    fn task_rejects_double_finish() {
        let mut m = TaskMachine::new(TaskPhase::Succeeded);
        let err = m
            .apply(&TaskLifecycleEvent::Finish(TaskPhase::Failed), None)
            .unwrap_err();
        assert_eq!(err.from, TaskPhase::Succeeded);
    }
}
