//! The orchestrator composing every module of one match.
//!
//! [`GameEngine`] is synchronous and deterministic apart from the optional
//! turn-order shuffle: each call mutates the match and queues effects that the
//! async runtime drains with [`GameEngine::take_effects`]. A failing call leaves
//! the match exactly as it was before the call.

use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, SystemTime},
};

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::EngineConfig,
    dao::schema::{MatchRecord, SCHEMA_VERSION},
    engine::{
        PlayerId,
        actions::{PlayerActionTracker, RecordedAction},
        effects::{DeferredSignal, Effects, Signal},
        end_round::{EndDecision, EndRoundMode, EndRoundStrategy, MatchSnapshot},
        hooks::{ActionOutcome, GameRules, MatchContext, PhaseDirective},
        lifecycle::{MatchEvent, MatchPhase, MatchStateMachine},
        notifications::MatchNotification,
        phase::{PhaseManager, PhaseRecord},
        roles::RoleManager,
        round::RoundManager,
        scoring::ScoreManager,
        turn::{TurnManager, TurnMode},
    },
    error::{EngineError, EngineResult},
};

/// Reason reported when the last phase of the plan ends a round.
const PHASES_COMPLETE: &str = "phases_complete";
/// Reason reported when a phase hook asks for the end of the round.
const PHASE_ENDED_ROUND: &str = "phase_complete";

/// Roster and configuration handed to [`GameEngine::initialize`].
#[derive(Debug, Clone)]
pub struct MatchSetup {
    /// Participants in join order.
    pub players: Vec<PlayerId>,
    /// Static match configuration.
    pub config: EngineConfig,
}

/// What happened to one processed action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionReport {
    /// The game's verdict.
    pub outcome: ActionOutcome,
    /// Whether every active player is now locked.
    pub all_locked: bool,
    /// The end-of-round strategy's decision.
    pub decision: EndDecision,
}

fn not_initialized() -> EngineError {
    EngineError::invalid("match is not initialized")
}

/// One match: lifecycle, composed modules and the game driving them.
#[derive(Debug)]
pub struct GameEngine {
    match_id: Uuid,
    rules: Arc<dyn GameRules>,
    lifecycle: MatchStateMachine,
    ctx: Option<MatchContext>,
    strategy: Option<Box<dyn EndRoundStrategy>>,
}

impl GameEngine {
    /// Fresh, uninitialized match driven by `rules`.
    pub fn new(match_id: Uuid, rules: Arc<dyn GameRules>) -> Self {
        Self {
            match_id,
            rules,
            lifecycle: MatchStateMachine::new(),
            ctx: None,
            strategy: None,
        }
    }

    /// Match identifier.
    pub fn match_id(&self) -> Uuid {
        self.match_id
    }

    /// Registry name of the game.
    pub fn game(&self) -> &str {
        self.rules.name()
    }

    /// Current lifecycle state.
    pub fn phase(&self) -> MatchPhase {
        self.lifecycle.phase()
    }

    /// Number of lifecycle transitions applied so far.
    pub fn version(&self) -> usize {
        self.lifecycle.version()
    }

    /// Composed module state, once initialized.
    pub fn context(&self) -> Option<&MatchContext> {
        self.ctx.as_ref()
    }

    /// Whether the match reached its terminal state.
    pub fn is_finished(&self) -> bool {
        self.lifecycle.phase() == MatchPhase::Finished
    }

    /// Read-only view handed to end-of-round strategies.
    pub fn snapshot(&self) -> Option<MatchSnapshot> {
        self.ctx.as_ref().map(snapshot_of)
    }

    /// Record configuration and build fresh modules.
    ///
    /// Allowed while uninitialized or configured; a second call replaces the setup.
    pub fn initialize(&mut self, setup: MatchSetup) -> EngineResult<()> {
        setup
            .config
            .validate()
            .map_err(|err| EngineError::Configuration(err.to_string()))?;

        let players = setup.players.len();
        let ctx = self.build_context(setup)?;
        let strategy = ctx
            .config
            .effective_end_round_mode()
            .build(ctx.config.round_end_delay);

        self.run_transition(MatchEvent::Initialize, move |engine| {
            engine.ctx = Some(ctx);
            engine.strategy = Some(strategy);
            Ok(())
        })?;

        info!(
            match_id = %self.match_id,
            game = self.rules.name(),
            players,
            "match configured"
        );
        Ok(())
    }

    /// Leave configuration, run the game's start hook and open round 1.
    pub fn start_game(&mut self) -> EngineResult<()> {
        self.guarded(|engine| {
            engine.run_transition(MatchEvent::StartGame, |engine| {
                let rules = Arc::clone(&engine.rules);
                let ctx = engine.ctx.as_mut().ok_or_else(not_initialized)?;
                ctx.rounds.reset();
                ctx.scores.reset();
                ctx.actions.reset();
                ctx.phases.clear();
                if let Some(roles) = ctx.roles.as_mut() {
                    roles.clear();
                }
                rules.on_game_start(ctx)?;
                engine.begin_round()
            })
        })?;

        info!(match_id = %self.match_id, "match started");
        Ok(())
    }

    /// Open the next round after a round ended.
    pub fn start_new_round(&mut self) -> EngineResult<()> {
        self.guarded(|engine| {
            engine.run_transition(MatchEvent::StartRound, |engine| engine.begin_round())
        })?;

        if let Some(ctx) = &self.ctx {
            info!(
                match_id = %self.match_id,
                round = ctx.rounds.current_round(),
                "round started"
            );
        }
        Ok(())
    }

    /// Judge, record and lock one player action, then let the strategy decide
    /// whether the unit of play is over.
    pub fn process_round_action(
        &mut self,
        player_id: PlayerId,
        payload: Value,
    ) -> EngineResult<ActionReport> {
        if self.lifecycle.phase() != MatchPhase::Playing {
            return Err(EngineError::invalid(format!(
                "actions are not accepted while {:?}",
                self.lifecycle.phase()
            )));
        }

        self.guarded(|engine| engine.apply_action(player_id, payload))
    }

    /// Score and close the round in play.
    pub fn end_current_round(&mut self, reason: Option<String>) -> EngineResult<()> {
        let delay = self
            .ctx
            .as_ref()
            .map(|ctx| ctx.config.round_end_delay)
            .ok_or_else(not_initialized)?;
        self.guarded(|engine| engine.end_round(reason, delay))
    }

    /// End `expected` on request, as long as it is still the current phase.
    pub fn advance_phase(&mut self, expected: &str) -> EngineResult<()> {
        if self.lifecycle.phase() != MatchPhase::Playing {
            return Err(EngineError::invalid(format!(
                "phases cannot advance while {:?}",
                self.lifecycle.phase()
            )));
        }

        self.guarded(|engine| {
            let ctx = engine.ctx.as_ref().ok_or_else(not_initialized)?;
            let record = ctx.phases.check_advance(expected)?.clone();
            engine.complete_phase(record)
        })
    }

    /// Close the match and publish the final standings.
    pub fn finalize(&mut self) -> EngineResult<()> {
        self.guarded(|engine| engine.finish())
    }

    /// Apply a deferred signal after checking it still matches the match state.
    pub fn handle_signal(&mut self, signal: &Signal) -> EngineResult<()> {
        match signal {
            Signal::PhaseExpired { phase, epoch } => {
                if self.lifecycle.phase() != MatchPhase::Playing {
                    return Err(EngineError::StaleSignal(format!(
                        "phase `{phase}` expired while {:?}",
                        self.lifecycle.phase()
                    )));
                }
                self.guarded(|engine| {
                    let ctx = engine.ctx.as_ref().ok_or_else(not_initialized)?;
                    let record = ctx.phases.check_expiry(phase, *epoch)?.clone();
                    engine.complete_phase(record)
                })
            }
            Signal::StartRound { round, version } => {
                let current = self.ctx.as_ref().map(|ctx| ctx.rounds.current_round());
                if self.lifecycle.phase() != MatchPhase::RoundEnding
                    || self.lifecycle.version() != *version
                    || current != Some(*round)
                {
                    return Err(EngineError::StaleSignal(format!(
                        "round {round} start (version {version}) no longer pending"
                    )));
                }
                self.start_new_round()
            }
        }
    }

    /// Re-arm timers lost with the previous process, after a rehydration.
    pub fn resume_timers(&mut self, now: SystemTime) {
        let phase = self.lifecycle.phase();
        let version = self.lifecycle.version();
        let Some(ctx) = self.ctx.as_mut() else {
            return;
        };

        let pending = match phase {
            MatchPhase::Playing => ctx.phases.current().and_then(|record| {
                let remaining = ctx.phases.remaining(now)?;
                Some((
                    remaining,
                    Signal::PhaseExpired {
                        phase: record.name.clone(),
                        epoch: record.epoch,
                    },
                ))
            }),
            MatchPhase::RoundEnding => Some((
                Duration::ZERO,
                Signal::StartRound {
                    round: ctx.rounds.current_round(),
                    version,
                },
            )),
            _ => None,
        };

        if let Some((delay, signal)) = pending {
            ctx.effects.defer(delay, signal);
        }
    }

    /// Hand over everything queued since the last drain.
    pub fn take_effects(&mut self) -> (Vec<MatchNotification>, Vec<DeferredSignal>) {
        let Some(ctx) = self.ctx.as_mut() else {
            return (Vec::new(), Vec::new());
        };

        let Effects {
            notifications,
            deferred,
        } = ctx.effects.take();
        let match_id = self.match_id;
        let deferred = deferred
            .into_iter()
            .map(|(delay, signal)| DeferredSignal {
                match_id,
                delay,
                signal,
            })
            .collect();
        (notifications, deferred)
    }

    /// Persistable form of the match.
    pub fn to_record(&self) -> MatchRecord {
        let ctx = self.ctx.as_ref();
        MatchRecord {
            schema_version: SCHEMA_VERSION,
            match_id: self.match_id,
            game: self.rules.name().to_string(),
            lifecycle: self.lifecycle.phase(),
            lifecycle_version: self.lifecycle.version(),
            config: ctx.map(|ctx| ctx.config.clone()),
            players: ctx.map(|ctx| ctx.players.clone()).unwrap_or_default(),
            rounds: ctx.map(|ctx| ctx.rounds.to_record()),
            scoring: ctx.map(|ctx| ctx.scores.to_record()),
            roles: ctx.and_then(|ctx| ctx.roles.as_ref().map(RoleManager::to_record)),
            actions: ctx.map(|ctx| ctx.actions.to_record()),
            current_phase: ctx.and_then(|ctx| ctx.phases.current().cloned()),
            phase_epoch: ctx.map(|ctx| ctx.phases.epoch()).unwrap_or_default(),
            game_data: ctx
                .map(|ctx| ctx.game_data.clone())
                .unwrap_or(Value::Null),
        }
    }

    /// Rebuild a match from its persisted form.
    pub fn restore(record: MatchRecord, rules: Arc<dyn GameRules>) -> EngineResult<Self> {
        if record.game != rules.name() {
            return Err(EngineError::CorruptState(format!(
                "match is driven by `{}`, not `{}`",
                record.game,
                rules.name()
            )));
        }

        let match_id = record.match_id;
        let lifecycle = MatchStateMachine::restore(record.lifecycle, record.lifecycle_version);
        let ctx = match record.lifecycle {
            MatchPhase::Uninitialized => None,
            _ => Some(restore_context(record, rules.as_ref())?),
        };
        let strategy = ctx.as_ref().map(|ctx| {
            ctx.config
                .effective_end_round_mode()
                .build(ctx.config.round_end_delay)
        });

        Ok(Self {
            match_id,
            rules,
            lifecycle,
            ctx,
            strategy,
        })
    }

    fn build_context(&self, setup: MatchSetup) -> EngineResult<MatchContext> {
        let MatchSetup { players, config } = setup;

        let mut seen = HashSet::new();
        if let Some(duplicate) = players.iter().find(|id| !seen.insert(**id)) {
            return Err(EngineError::Configuration(format!(
                "player {duplicate} joined twice"
            )));
        }

        let mut turns = TurnManager::new(players.clone(), config.turn_mode)?;
        if config.shuffle_turn_order {
            turns.shuffle(&mut rand::rng());
        }
        let rounds = RoundManager::new(turns, config.total_rounds);
        let calculator = self
            .rules
            .score_calculator()
            .unwrap_or_else(|| config.scoring.build());
        let scores = ScoreManager::new(&players, calculator, config.track_score_history)?;
        let roles = config
            .roles
            .as_ref()
            .map(|roles| RoleManager::new(roles.available_roles.clone(), roles.allow_multiple_roles));
        let phases = PhaseManager::new(config.phases.clone());

        Ok(MatchContext {
            config,
            players,
            rounds,
            scores,
            roles,
            actions: PlayerActionTracker::new(),
            phases,
            game_data: Value::Null,
            effects: Effects::default(),
        })
    }

    /// Run `op` inside a planned lifecycle transition, aborting it on failure.
    fn run_transition<T>(
        &mut self,
        event: MatchEvent,
        op: impl FnOnce(&mut Self) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let plan = self.lifecycle.plan(event)?;
        match op(self) {
            Ok(value) => {
                self.lifecycle.apply(plan.id)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = self.lifecycle.abort(plan.id) {
                    warn!(
                        match_id = %self.match_id,
                        error = ?abort_err,
                        "failed to abort lifecycle transition"
                    );
                }
                Err(err)
            }
        }
    }

    /// Run `op`, restoring the match state if it fails.
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> EngineResult<T>) -> EngineResult<T> {
        let ctx = self.ctx.clone();
        let lifecycle = self.lifecycle.clone();
        let result = op(self);
        if result.is_err() {
            self.ctx = ctx;
            self.lifecycle = lifecycle;
        }
        result
    }

    fn begin_round(&mut self) -> EngineResult<()> {
        let rules = Arc::clone(&self.rules);
        let ctx = self.ctx.as_mut().ok_or_else(not_initialized)?;

        ctx.actions.reset();
        ctx.phases.clear();
        let round = ctx.rounds.current_round();
        ctx.effects.notify(MatchNotification::RoundStarted { round });
        ctx.effects.notify(MatchNotification::PlayersUnlocked { round });

        rules.on_round_start(ctx)?;

        if ctx.phases.current().is_none() {
            if let Some(first) = ctx.phases.first().map(|spec| spec.name.clone()) {
                ctx.start_phase(&first)?;
            }
        }
        Ok(())
    }

    fn apply_action(&mut self, player_id: PlayerId, payload: Value) -> EngineResult<ActionReport> {
        let rules = Arc::clone(&self.rules);
        let ctx = self.ctx.as_mut().ok_or_else(not_initialized)?;
        let strategy = self.strategy.as_deref().ok_or_else(not_initialized)?;

        if !ctx.has_player(player_id) {
            return Err(EngineError::UnknownPlayer(player_id));
        }
        if ctx.rounds.is_eliminated(player_id) {
            return Err(EngineError::invalid(format!(
                "player {player_id} is eliminated"
            )));
        }
        if !ctx.rounds.is_player_turn(player_id) {
            return Err(EngineError::invalid(format!(
                "it is not player {player_id}'s turn"
            )));
        }
        if ctx.actions.is_player_locked(player_id) {
            return Err(EngineError::AlreadyActed(player_id));
        }

        let outcome = rules.process_round_action(ctx, player_id, &payload)?;
        ctx.actions.set_player_action(
            player_id,
            RecordedAction {
                payload,
                outcome: outcome.clone(),
            },
        );
        let active = ctx.rounds.active_players();
        let all_locked = ctx.actions.lock_player(player_id, &active);
        ctx.effects
            .notify(MatchNotification::PlayerLocked { player_id });

        let decision =
            strategy.should_end(&snapshot_of(ctx), &outcome, &ctx.rounds, &ctx.actions);
        debug!(
            match_id = %self.match_id,
            player_id,
            success = outcome.success,
            should_end = decision.should_end,
            "action processed"
        );

        if decision.should_end {
            let current = ctx.phases.current().cloned();
            match current {
                Some(record) if strategy.mode() == EndRoundMode::PhaseBased => {
                    self.complete_phase(record)?;
                }
                _ if ctx.rounds.turns().mode() == TurnMode::Sequential => {
                    self.end_turn(decision.reason.clone(), decision.delay)?;
                }
                _ => self.end_round(decision.reason.clone(), decision.delay)?,
            }
        }

        Ok(ActionReport {
            outcome,
            all_locked,
            decision,
        })
    }

    /// Dispatch the end of `ended` to the game's hook and apply its directive.
    fn complete_phase(&mut self, ended: PhaseRecord) -> EngineResult<()> {
        let rules = Arc::clone(&self.rules);
        let ctx = self.ctx.as_mut().ok_or_else(not_initialized)?;

        let mark = ctx.effects.notifications.len();
        let directive = rules.on_phase_end(ctx, &ended.name, ended.callback())?;
        let superseded = ctx.phases.current().map(|record| record.epoch) != Some(ended.epoch);
        debug!(
            match_id = %self.match_id,
            phase = %ended.name,
            directive = ?directive,
            superseded,
            "phase ended"
        );

        if directive == PhaseDirective::Stay && !superseded {
            if let Some(held) = ctx.phases.hold() {
                ctx.effects.phase_started(&held);
            }
            return Ok(());
        }

        // Announce the end ahead of anything the hook queued.
        ctx.effects.notifications.insert(
            mark,
            MatchNotification::PhaseEnded {
                phase: ended.name.clone(),
            },
        );
        if !superseded {
            ctx.phases.clear();
        }

        match directive {
            PhaseDirective::Next if !superseded => {
                let next = ctx
                    .phases
                    .next_phase_after(&ended.name)
                    .map(|spec| spec.name.clone());
                match next {
                    Some(next) => ctx.start_phase(&next),
                    None => {
                        let delay = ctx.config.round_end_delay;
                        self.end_round(Some(PHASES_COMPLETE.to_string()), delay)
                    }
                }
            }
            PhaseDirective::Next | PhaseDirective::Stay => Ok(()),
            PhaseDirective::Start(name) => ctx.start_phase(&name),
            PhaseDirective::EndRound => {
                let delay = ctx.config.round_end_delay;
                self.end_round(Some(PHASE_ENDED_ROUND.to_string()), delay)
            }
            PhaseDirective::Finish => self.finish(),
        }
    }

    /// Pass a sequential turn on; the round only ends when the rotation wraps.
    fn end_turn(&mut self, reason: Option<String>, delay: Duration) -> EngineResult<()> {
        let ctx = self.ctx.as_mut().ok_or_else(not_initialized)?;
        let round = ctx.rounds.current_round();

        let mut rounds = ctx.rounds.clone();
        let player_id = rounds.next_turn();
        if rounds.current_round() != round {
            return self.end_round(reason, delay);
        }

        ctx.rounds = rounds;
        ctx.effects
            .notify(MatchNotification::TurnChanged { round, player_id });
        debug!(match_id = %self.match_id, round, player_id, "turn changed");
        Ok(())
    }

    fn end_round(&mut self, reason: Option<String>, delay: Duration) -> EngineResult<()> {
        let round = self.run_transition(MatchEvent::EndRound, |engine| {
            let ctx = engine.ctx.as_mut().ok_or_else(not_initialized)?;

            let awards: Vec<(PlayerId, String, Value)> = ctx
                .actions
                .all_actions()
                .iter()
                .filter(|(_, action)| action.outcome.success)
                .filter_map(|(player_id, action)| {
                    let event = action.outcome.score_event.clone()?;
                    Some((*player_id, event, action.outcome.data.clone()))
                })
                .collect();
            for (player_id, event, context) in awards {
                ctx.scores.award_points(player_id, &event, context)?;
            }

            if let Some(phase) = ctx.phases.clear() {
                ctx.effects
                    .notify(MatchNotification::PhaseEnded { phase: phase.name });
            }

            let round = ctx.rounds.current_round();
            ctx.effects.notify(MatchNotification::RoundEnded {
                round,
                reason: reason.clone(),
                scores: ctx.scores.scores().clone(),
                results: ctx.actions.all_actions().clone(),
            });

            match ctx.rounds.turns().mode() {
                TurnMode::Sequential => {
                    ctx.rounds.next_turn();
                    // Ended before the rotation came round.
                    if ctx.rounds.current_round() == round {
                        ctx.rounds.complete_round();
                    }
                }
                TurnMode::Simultaneous | TurnMode::Free => ctx.rounds.complete_round(),
            }
            Ok(round)
        })?;

        info!(
            match_id = %self.match_id,
            round,
            reason = reason.as_deref().unwrap_or("unspecified"),
            "round ended"
        );

        let version = self.lifecycle.version();
        let ctx = self.ctx.as_mut().ok_or_else(not_initialized)?;
        if ctx.rounds.is_game_complete() {
            self.finish()
        } else {
            let round = ctx.rounds.current_round();
            ctx.effects.defer(delay, Signal::StartRound { round, version });
            Ok(())
        }
    }

    fn finish(&mut self) -> EngineResult<()> {
        let rules = Arc::clone(&self.rules);
        self.run_transition(MatchEvent::Finish, |engine| {
            let ctx = engine.ctx.as_mut().ok_or_else(not_initialized)?;
            if let Some(phase) = ctx.phases.clear() {
                ctx.effects
                    .notify(MatchNotification::PhaseEnded { phase: phase.name });
            }
            let ranking = rules.final_ranking(ctx);
            let notification = MatchNotification::GameFinished {
                ranking,
                scores: ctx.scores.scores().clone(),
                statistics: ctx.scores.statistics(),
            };
            ctx.effects.notify(notification);
            Ok(())
        })?;

        info!(match_id = %self.match_id, "match finished");
        Ok(())
    }
}

fn snapshot_of(ctx: &MatchContext) -> MatchSnapshot {
    let current = ctx.phases.current();
    MatchSnapshot {
        round: ctx.rounds.current_round(),
        phase: current.map(|record| record.name.clone()),
        phase_kind: current.map(|record| record.kind),
        locked: ctx.actions.locked_players().len(),
        active: ctx.rounds.active_players().len(),
    }
}

fn restore_context(record: MatchRecord, rules: &dyn GameRules) -> EngineResult<MatchContext> {
    let rounds_record = record
        .rounds
        .ok_or_else(|| EngineError::CorruptState("round state is missing".into()))?;
    let config = match record.config {
        Some(config) => config,
        None => EngineConfig {
            total_rounds: rounds_record.total_rounds,
            turn_mode: rounds_record.turn_system.mode,
            ..EngineConfig::default()
        },
    };
    config
        .validate()
        .map_err(|err| EngineError::CorruptState(format!("stored config is invalid: {err}")))?;

    let rounds = RoundManager::from_record(rounds_record)?;
    let players = if record.players.is_empty() {
        rounds.turn_order().to_vec()
    } else {
        record.players
    };

    let calculator = rules
        .score_calculator()
        .unwrap_or_else(|| config.scoring.build());
    let scores = match record.scoring {
        Some(scoring) => ScoreManager::from_record(scoring, calculator)?,
        None => ScoreManager::new(&players, calculator, config.track_score_history)?,
    };

    let roles = match (record.roles, config.roles.as_ref()) {
        (Some(roles), _) => Some(RoleManager::from_record(roles)?),
        (None, Some(roles)) => Some(RoleManager::new(
            roles.available_roles.clone(),
            roles.allow_multiple_roles,
        )),
        (None, None) => None,
    };

    let actions = PlayerActionTracker::from_record(record.actions.unwrap_or_default());
    let phases = PhaseManager::restore(
        config.phases.clone(),
        record.current_phase,
        record.phase_epoch,
    );

    Ok(MatchContext {
        config,
        players,
        rounds,
        scores,
        roles,
        actions,
        phases,
        game_data: record.game_data,
        effects: Effects::default(),
    })
}
