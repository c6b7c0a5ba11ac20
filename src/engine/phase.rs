//! Timed phase records and the checks guarding their expiry.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use validator::Validate;

use crate::error::{EngineError, EngineResult};

/// Role a phase plays inside a round; drives the phase-based end strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Setup before play (reading a prompt, picking a word).
    #[default]
    Preparation,
    /// Players act.
    Active,
    /// Results are exposed; only an explicit advance moves on.
    Scoring,
    /// Terminal standings.
    Results,
}

/// One entry of a match's phase plan.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PhaseSpec {
    /// Unique phase name.
    #[validate(length(min = 1, max = 64))]
    pub name: String,
    /// Role of the phase.
    #[serde(default)]
    pub kind: PhaseKind,
    /// Timer length; untimed phases only end on an explicit advance.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "duration_ms")]
    pub duration: Option<Duration>,
    /// Callback id passed to the game's phase-end hook (defaults to the name).
    #[serde(default)]
    pub on_expire: Option<String>,
}

impl PhaseSpec {
    /// Timed phase of the given kind.
    pub fn timed(name: impl Into<String>, kind: PhaseKind, duration: Duration) -> Self {
        Self {
            name: name.into(),
            kind,
            duration: Some(duration),
            on_expire: None,
        }
    }

    /// Phase without a timer.
    pub fn untimed(name: impl Into<String>, kind: PhaseKind) -> Self {
        Self {
            name: name.into(),
            kind,
            duration: None,
            on_expire: None,
        }
    }
}

/// The phase currently running in a match.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// Phase name.
    pub name: String,
    /// Role of the phase.
    #[serde(default)]
    pub kind: PhaseKind,
    /// Timer length, if any.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "duration_ms")]
    pub duration: Option<Duration>,
    /// When the phase started.
    pub started_at: SystemTime,
    /// When the phase expires, if timed.
    #[serde(default)]
    pub deadline: Option<SystemTime>,
    /// Callback id for the phase-end hook.
    #[serde(default)]
    pub on_expire: Option<String>,
    /// Start counter telling apart two runs of a same-named phase.
    #[serde(default)]
    pub epoch: u64,
}

impl PhaseRecord {
    /// Callback id handed to the phase-end hook.
    pub fn callback(&self) -> &str {
        self.on_expire.as_deref().unwrap_or(&self.name)
    }
}

/// Phase plan plus the single current phase of a match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseManager {
    plan: Vec<PhaseSpec>,
    current: Option<PhaseRecord>,
    epoch: u64,
}

impl PhaseManager {
    /// Manager over a validated phase plan.
    pub fn new(plan: Vec<PhaseSpec>) -> Self {
        Self {
            plan,
            current: None,
            epoch: 0,
        }
    }

    /// Start `name`, superseding whatever phase was current.
    pub fn start_phase(&mut self, name: &str) -> EngineResult<PhaseRecord> {
        let spec = self
            .plan
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| EngineError::UnknownPhase(name.to_string()))?;

        self.epoch += 1;
        let started_at = SystemTime::now();
        let record = PhaseRecord {
            name: spec.name.clone(),
            kind: spec.kind,
            duration: spec.duration,
            started_at,
            deadline: spec.duration.map(|duration| started_at + duration),
            on_expire: spec.on_expire.clone(),
            epoch: self.epoch,
        };
        self.current = Some(record.clone());
        Ok(record)
    }

    /// Accept a timer signal only if it belongs to the phase run still in progress.
    pub fn check_expiry(&self, phase: &str, epoch: u64) -> EngineResult<&PhaseRecord> {
        match &self.current {
            Some(record) if record.name == phase && record.epoch == epoch => Ok(record),
            _ => Err(EngineError::StaleSignal(format!(
                "phase `{phase}` (epoch {epoch}) is no longer current"
            ))),
        }
    }

    /// Accept an explicit advance only if `expected` is still the current phase.
    pub fn check_advance(&self, expected: &str) -> EngineResult<&PhaseRecord> {
        match &self.current {
            Some(record) if record.name == expected => Ok(record),
            Some(record) => Err(EngineError::invalid(format!(
                "cannot advance `{expected}`: current phase is `{}`",
                record.name
            ))),
            None => Err(EngineError::invalid(format!(
                "cannot advance `{expected}`: no phase is running"
            ))),
        }
    }

    /// Keep the current phase running without a timer.
    ///
    /// The epoch moves forward so a timer armed for the previous run is stale.
    pub fn hold(&mut self) -> Option<PhaseRecord> {
        let record = self.current.as_mut()?;
        self.epoch += 1;
        record.duration = None;
        record.deadline = None;
        record.epoch = self.epoch;
        Some(record.clone())
    }

    /// End the current phase, returning it.
    pub fn clear(&mut self) -> Option<PhaseRecord> {
        self.current.take()
    }

    /// Phase currently running.
    pub fn current(&self) -> Option<&PhaseRecord> {
        self.current.as_ref()
    }

    /// First entry of the plan.
    pub fn first(&self) -> Option<&PhaseSpec> {
        self.plan.first()
    }

    /// Entry that follows `name` in the plan.
    pub fn next_phase_after(&self, name: &str) -> Option<&PhaseSpec> {
        let position = self.plan.iter().position(|spec| spec.name == name)?;
        self.plan.get(position + 1)
    }

    /// Configured plan.
    pub fn plan(&self) -> &[PhaseSpec] {
        &self.plan
    }

    /// Number of phases started so far.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Time left before the current phase expires.
    pub fn remaining(&self, now: SystemTime) -> Option<Duration> {
        let deadline = self.current.as_ref()?.deadline?;
        Some(deadline.duration_since(now).unwrap_or(Duration::ZERO))
    }

    /// Rebuild the manager from the persisted current phase and epoch.
    pub fn restore(plan: Vec<PhaseSpec>, current: Option<PhaseRecord>, epoch: u64) -> Self {
        Self {
            plan,
            current,
            epoch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PhaseManager {
        PhaseManager::new(vec![
            PhaseSpec::timed("prepare", PhaseKind::Preparation, Duration::from_secs(5)),
            PhaseSpec::timed("draw", PhaseKind::Active, Duration::from_secs(60)),
            PhaseSpec::untimed("reveal", PhaseKind::Scoring),
        ])
    }

    #[test]
    fn starting_a_phase_supersedes_the_previous_one() {
        let mut phases = manager();
        let prepare = phases.start_phase("prepare").unwrap();
        let draw = phases.start_phase("draw").unwrap();
        assert_eq!(phases.current().map(|p| p.name.as_str()), Some("draw"));
        assert_eq!(draw.epoch, prepare.epoch + 1);
        assert_eq!(
            draw.deadline,
            Some(draw.started_at + Duration::from_secs(60))
        );
    }

    #[test]
    fn unknown_phase_is_rejected() {
        let mut phases = manager();
        assert_eq!(
            phases.start_phase("vote"),
            Err(EngineError::UnknownPhase("vote".into()))
        );
    }

    #[test]
    fn expiry_requires_matching_name_and_epoch() {
        let mut phases = manager();
        let first = phases.start_phase("draw").unwrap();
        assert!(phases.check_expiry("draw", first.epoch).is_ok());
        assert!(phases.check_expiry("prepare", first.epoch).is_err());

        let second = phases.start_phase("draw").unwrap();
        assert!(matches!(
            phases.check_expiry("draw", first.epoch),
            Err(EngineError::StaleSignal(_))
        ));
        assert!(phases.check_expiry("draw", second.epoch).is_ok());
    }

    #[test]
    fn advance_on_changed_phase_is_invalid() {
        let mut phases = manager();
        assert!(phases.check_advance("reveal").is_err());
        phases.start_phase("reveal").unwrap();
        assert!(phases.check_advance("reveal").is_ok());
        phases.start_phase("prepare").unwrap();
        assert!(matches!(
            phases.check_advance("reveal"),
            Err(EngineError::InvalidTransition(_))
        ));
    }

    #[test]
    fn hold_drops_the_timer_and_invalidates_it() {
        let mut phases = manager();
        let draw = phases.start_phase("draw").unwrap();
        let held = phases.hold().unwrap();
        assert_eq!(held.name, "draw");
        assert!(held.deadline.is_none());
        assert!(phases.check_expiry("draw", draw.epoch).is_err());
        assert!(phases.check_advance("draw").is_ok());
    }

    #[test]
    fn plan_navigation() {
        let phases = manager();
        assert_eq!(phases.first().map(|p| p.name.as_str()), Some("prepare"));
        assert_eq!(
            phases.next_phase_after("draw").map(|p| p.name.as_str()),
            Some("reveal")
        );
        assert!(phases.next_phase_after("reveal").is_none());
    }

    #[test]
    fn untimed_phases_have_no_deadline() {
        let mut phases = manager();
        let reveal = phases.start_phase("reveal").unwrap();
        assert!(reveal.deadline.is_none());
        assert!(phases.remaining(SystemTime::now()).is_none());
        assert_eq!(reveal.callback(), "reveal");
    }

    #[test]
    fn record_serializes_duration_in_milliseconds() {
        let mut phases = manager();
        let record = phases.start_phase("prepare").unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["duration_ms"], 5000);
        let back: PhaseRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
