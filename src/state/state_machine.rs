use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

/// Phases a session goes through, as seen by one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing created or joined yet.
    NoPoll,
    /// A poll exists and no question is running.
    PollOpen {
        /// Poll the instance is attached to.
        poll_id: Uuid,
    },
    /// A question is accepting answers.
    QuestionActive {
        /// Poll the instance is attached to.
        poll_id: Uuid,
        /// Running question.
        question_id: Uuid,
    },
}

impl SessionPhase {
    /// Poll the phase is attached to, if any.
    pub fn poll_id(&self) -> Option<Uuid> {
        match self {
            SessionPhase::NoPoll => None,
            SessionPhase::PollOpen { poll_id } | SessionPhase::QuestionActive { poll_id, .. } => {
                Some(*poll_id)
            }
        }
    }

    /// Running question, if any.
    pub fn question_id(&self) -> Option<Uuid> {
        match self {
            SessionPhase::QuestionActive { question_id, .. } => Some(*question_id),
            _ => None,
        }
    }
}

/// Events that can be applied to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A poll was created (teacher) or joined (student).
    PollOpened {
        /// Poll created or joined.
        poll_id: Uuid,
    },
    /// A question started; replaces any running one.
    QuestionStarted {
        /// Question now running.
        question_id: Uuid,
    },
    /// The given question closed.
    QuestionEnded {
        /// Question that closed.
        question_id: Uuid,
    },
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the state machine was in when the invalid event was received.
    pub from: SessionPhase,
    /// The event that cannot be applied from this phase.
    pub event: SessionEvent,
}

/// Errors that can occur when planning a state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// State machine phase changed since the plan was created.
    PhaseMismatch {
        /// Phase when plan was created.
        expected: SessionPhase,
        /// Current phase.
        actual: SessionPhase,
    },
    /// State machine version changed since the plan was created.
    VersionMismatch {
        /// Version when plan was created.
        expected: usize,
        /// Current version.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned state machine transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned state transition.
pub type PlanId = Uuid;

/// A planned state machine transition that has been validated but not yet applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the state machine is currently in.
    pub from: SessionPhase,
    /// Phase the state machine will transition to.
    pub to: SessionPhase,
    /// Event that triggered this transition.
    pub event: SessionEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Snapshot of the current state machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current phase of the state machine.
    pub phase: SessionPhase,
    /// Version number of the state machine (increments on each transition).
    pub version: usize,
    /// Pending transition phase, if a transition is planned but not yet applied.
    pub pending: Option<SessionPhase>,
}

/// Two-step state machine: a transition is planned, the store write happens,
/// then the plan is applied on success or aborted on failure.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    phase: SessionPhase,
    version: usize,
    pending: Option<Plan>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            phase: SessionPhase::NoPoll,
            version: 0,
            pending: None,
        }
    }
}

impl SessionStateMachine {
    /// Create a new state machine with no poll attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Create a snapshot of the current state machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.to),
        }
    }

    /// Plan a transition by validating that the event can be applied from the current phase.
    pub fn plan(&mut self, event: SessionEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.phase,
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition, moving the state machine to the next phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<SessionPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        if self.phase != plan.from {
            return Err(ApplyError::PhaseMismatch {
                expected: plan.from,
                actual: self.phase,
            });
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;

        Ok(self.phase)
    }

    /// Abort a planned transition without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    /// Plan and apply in one step, for changes already made authoritative by
    /// the store (e.g. observed on the change bus).
    pub fn force(&mut self, event: SessionEvent) -> Result<SessionPhase, PlanError> {
        let plan = self.plan(event)?;
        // The plan was created against the current phase and version a line
        // above, so applying it cannot mismatch.
        self.phase = plan.to;
        self.version = plan.version_next;
        self.pending = None;
        Ok(self.phase)
    }

    fn compute_transition(&self, event: SessionEvent) -> Result<SessionPhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (SessionPhase::NoPoll, SessionEvent::PollOpened { poll_id }) => {
                SessionPhase::PollOpen { poll_id }
            }
            (
                SessionPhase::PollOpen { poll_id } | SessionPhase::QuestionActive { poll_id, .. },
                SessionEvent::QuestionStarted { question_id },
            ) => SessionPhase::QuestionActive {
                poll_id,
                question_id,
            },
            (
                SessionPhase::QuestionActive {
                    poll_id,
                    question_id: current,
                },
                SessionEvent::QuestionEnded { question_id },
            ) if current == question_id => SessionPhase::PollOpen { poll_id },
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut SessionStateMachine, event: SessionEvent) -> SessionPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_has_no_poll() {
        let sm = SessionStateMachine::new();
        assert_eq!(sm.phase(), SessionPhase::NoPoll);
    }

    #[test]
    fn question_cycle() {
        let mut sm = SessionStateMachine::new();
        let poll_id = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert_eq!(
            apply(&mut sm, SessionEvent::PollOpened { poll_id }),
            SessionPhase::PollOpen { poll_id }
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::QuestionStarted { question_id: first }),
            SessionPhase::QuestionActive {
                poll_id,
                question_id: first
            }
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::QuestionStarted { question_id: second }),
            SessionPhase::QuestionActive {
                poll_id,
                question_id: second
            }
        );
        assert_eq!(
            apply(&mut sm, SessionEvent::QuestionEnded { question_id: second }),
            SessionPhase::PollOpen { poll_id }
        );
        assert_eq!(sm.snapshot().version, 4);
    }

    #[test]
    fn ending_another_question_is_invalid() {
        let mut sm = SessionStateMachine::new();
        let poll_id = Uuid::new_v4();
        let running = Uuid::new_v4();
        apply(&mut sm, SessionEvent::PollOpened { poll_id });
        apply(&mut sm, SessionEvent::QuestionStarted { question_id: running });

        let stale = Uuid::new_v4();
        let err = sm
            .plan(SessionEvent::QuestionEnded { question_id: stale })
            .unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition(_)));
    }

    #[test]
    fn cannot_start_question_without_poll() {
        let mut sm = SessionStateMachine::new();
        let err = sm
            .plan(SessionEvent::QuestionStarted {
                question_id: Uuid::new_v4(),
            })
            .unwrap_err();
        match err {
            PlanError::InvalidTransition(invalid) => assert_eq!(invalid.from, SessionPhase::NoPoll),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn second_poll_is_rejected() {
        let mut sm = SessionStateMachine::new();
        apply(
            &mut sm,
            SessionEvent::PollOpened {
                poll_id: Uuid::new_v4(),
            },
        );
        assert!(
            sm.plan(SessionEvent::PollOpened {
                poll_id: Uuid::new_v4()
            })
            .is_err()
        );
    }

    #[test]
    fn pending_plan_blocks_new_plans_until_aborted() {
        let mut sm = SessionStateMachine::new();
        let poll_id = Uuid::new_v4();
        let plan = sm.plan(SessionEvent::PollOpened { poll_id }).unwrap();
        assert_eq!(sm.snapshot().pending, Some(SessionPhase::PollOpen { poll_id }));
        assert_eq!(
            sm.plan(SessionEvent::PollOpened { poll_id }).unwrap_err(),
            PlanError::AlreadyPending
        );

        sm.abort(plan.id).unwrap();
        assert!(sm.pending.is_none());
        assert_eq!(sm.phase(), SessionPhase::NoPoll);
    }

    #[test]
    fn apply_with_wrong_id_keeps_plan() {
        let mut sm = SessionStateMachine::new();
        sm.plan(SessionEvent::PollOpened {
            poll_id: Uuid::new_v4(),
        })
        .unwrap();
        let err = sm.apply(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, ApplyError::IdMismatch { .. }));
        assert!(sm.pending.is_some());
    }
}
