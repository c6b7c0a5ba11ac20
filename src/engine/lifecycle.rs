use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// High-level states a match goes through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Created, nothing configured yet.
    #[default]
    Uninitialized,
    /// Configuration recorded and modules built.
    Configured,
    /// A round is in play.
    Playing,
    /// A round was scored; the next one has not started yet.
    RoundEnding,
    /// Terminal.
    Finished,
}

/// Events that can be applied to the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchEvent {
    /// Record configuration and build modules.
    Initialize,
    /// Leave configuration and begin play.
    StartGame,
    /// Begin the next round after a round ended.
    StartRound,
    /// Score the round in play.
    EndRound,
    /// Close the match.
    Finish,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// The phase the lifecycle was in when the invalid event was received.
    pub from: MatchPhase,
    /// The event that cannot be applied from this phase.
    pub event: MatchEvent,
}

/// Errors that can occur when planning a lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current phase.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned lifecycle transition.
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
}

/// Errors that can occur when aborting a planned lifecycle transition.
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

/// Unique identifier for a planned transition.
pub type PlanId = Uuid;

/// A validated transition that has not been applied yet.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Phase the lifecycle is currently in.
    pub from: MatchPhase,
    /// Phase the lifecycle will move to.
    pub to: MatchPhase,
    /// Event that triggered this transition.
    pub event: MatchEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
}

/// Lifecycle state machine of one match.
#[derive(Debug, Clone, Default)]
pub struct MatchStateMachine {
    phase: MatchPhase,
    version: usize,
    pending: Option<Plan>,
}

impl MatchStateMachine {
    /// Lifecycle in the uninitialized state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume a persisted lifecycle.
    pub fn restore(phase: MatchPhase, version: usize) -> Self {
        Self {
            phase,
            version,
            pending: None,
        }
    }

    /// Inspect the current phase.
    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    /// Number of applied transitions.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Validate that `event` can be applied and reserve the transition.
    pub fn plan(&mut self, event: MatchEvent) -> Result<Plan, PlanError> {
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
        };

        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Apply a planned transition and return the new phase.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<MatchPhase, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected_plan_id = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected: expected_plan_id,
                got: plan_id,
            });
        }

        self.phase = plan.to;
        self.version = plan.version_next;

        Ok(self.phase)
    }

    /// Drop a planned transition without applying it.
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

    fn compute_transition(&self, event: MatchEvent) -> Result<MatchPhase, InvalidTransition> {
        let next = match (self.phase, event) {
            (MatchPhase::Uninitialized | MatchPhase::Configured, MatchEvent::Initialize) => {
                MatchPhase::Configured
            }
            (MatchPhase::Configured, MatchEvent::StartGame) => MatchPhase::Playing,
            (MatchPhase::RoundEnding, MatchEvent::StartRound) => MatchPhase::Playing,
            (MatchPhase::Playing, MatchEvent::EndRound) => MatchPhase::RoundEnding,
            (MatchPhase::Playing | MatchPhase::RoundEnding, MatchEvent::Finish) => {
                MatchPhase::Finished
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(sm: &mut MatchStateMachine, event: MatchEvent) -> MatchPhase {
        let plan = sm.plan(event).unwrap();
        sm.apply(plan.id).unwrap()
    }

    #[test]
    fn initial_state_is_uninitialized() {
        let sm = MatchStateMachine::new();
        assert_eq!(sm.phase(), MatchPhase::Uninitialized);
    }

    #[test]
    fn full_happy_path_through_match() {
        let mut sm = MatchStateMachine::new();
        assert_eq!(apply(&mut sm, MatchEvent::Initialize), MatchPhase::Configured);
        assert_eq!(apply(&mut sm, MatchEvent::Initialize), MatchPhase::Configured);
        assert_eq!(apply(&mut sm, MatchEvent::StartGame), MatchPhase::Playing);
        assert_eq!(apply(&mut sm, MatchEvent::EndRound), MatchPhase::RoundEnding);
        assert_eq!(apply(&mut sm, MatchEvent::StartRound), MatchPhase::Playing);
        assert_eq!(apply(&mut sm, MatchEvent::EndRound), MatchPhase::RoundEnding);
        assert_eq!(apply(&mut sm, MatchEvent::Finish), MatchPhase::Finished);
        assert_eq!(sm.version(), 7);
    }

    #[test]
    fn finished_is_terminal() {
        let mut sm = MatchStateMachine::restore(MatchPhase::Finished, 3);
        for event in [
            MatchEvent::Initialize,
            MatchEvent::StartGame,
            MatchEvent::StartRound,
            MatchEvent::EndRound,
            MatchEvent::Finish,
        ] {
            assert!(matches!(
                sm.plan(event),
                Err(PlanError::InvalidTransition(_))
            ));
        }
    }

    #[test]
    fn initialize_is_rejected_once_playing() {
        let mut sm = MatchStateMachine::restore(MatchPhase::Playing, 2);
        let err = sm.plan(MatchEvent::Initialize).unwrap_err();
        assert_eq!(
            err,
            PlanError::InvalidTransition(InvalidTransition {
                from: MatchPhase::Playing,
                event: MatchEvent::Initialize,
            })
        );
    }

    #[test]
    fn second_plan_while_pending_is_rejected() {
        let mut sm = MatchStateMachine::new();
        let plan = sm.plan(MatchEvent::Initialize).unwrap();
        assert_eq!(sm.plan(MatchEvent::Initialize).unwrap_err(), PlanError::AlreadyPending);
        sm.abort(plan.id).unwrap();
        assert!(sm.pending.is_none());
        assert_eq!(sm.phase(), MatchPhase::Uninitialized);
    }

    #[test]
    fn apply_with_foreign_id_keeps_the_plan() {
        let mut sm = MatchStateMachine::new();
        let plan = sm.plan(MatchEvent::Initialize).unwrap();
        assert!(matches!(
            sm.apply(Uuid::new_v4()),
            Err(ApplyError::IdMismatch { .. })
        ));
        assert_eq!(sm.apply(plan.id).unwrap(), MatchPhase::Configured);
    }
}
