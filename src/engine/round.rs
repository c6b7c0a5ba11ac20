use std::collections::BTreeSet;

use crate::{
    dao::schema::RoundRecord,
    engine::{
        PlayerId,
        turn::{TurnManager, TurnMode},
    },
    error::{EngineError, EngineResult},
};

/// Round progress and eliminations layered over a [`TurnManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundManager {
    turns: TurnManager,
    current_round: u32,
    total_rounds: u32,
    round_start_index: usize,
    permanently_eliminated: BTreeSet<PlayerId>,
    temporarily_eliminated: BTreeSet<PlayerId>,
}

impl RoundManager {
    /// Start at round 1. `total_rounds == 0` means unbounded.
    pub fn new(turns: TurnManager, total_rounds: u32) -> Self {
        let round_start_index = turns.index();
        Self {
            turns,
            current_round: 1,
            total_rounds,
            round_start_index,
            permanently_eliminated: BTreeSet::new(),
            temporarily_eliminated: BTreeSet::new(),
        }
    }

    /// Advance to the next turn, rolling the round over when the rotation wraps.
    ///
    /// Eliminated players are skipped in sequential mode. Every raw step is
    /// checked for a wrap, so passing over an eliminated round starter still
    /// closes the round.
    pub fn next_turn(&mut self) -> PlayerId {
        if self.turns.is_paused() {
            return self.turns.current_player();
        }

        let len = self.turns.order().len();
        let mut current = self.turns.current_player();
        for _ in 0..len {
            current = self.turns.advance();
            if self.turns.index() == self.round_start_index {
                self.roll_round();
            }
            if self.turns.mode() != TurnMode::Sequential || !self.is_eliminated(current) {
                break;
            }
        }
        current
    }

    /// Close the current round without moving the cursor.
    pub fn complete_round(&mut self) {
        self.roll_round();
        self.round_start_index = self.turns.index();
    }

    fn roll_round(&mut self) {
        self.current_round += 1;
        self.temporarily_eliminated.clear();
    }

    /// Exclude a player, either until the next round rolls over or for the rest of the match.
    pub fn eliminate_player(&mut self, id: PlayerId, permanent: bool) -> EngineResult<()> {
        if !self.turns.order().contains(&id) {
            return Err(EngineError::UnknownPlayer(id));
        }

        if permanent {
            self.temporarily_eliminated.remove(&id);
            self.permanently_eliminated.insert(id);
        } else if !self.permanently_eliminated.contains(&id) {
            self.temporarily_eliminated.insert(id);
        }
        Ok(())
    }

    /// Bring back a temporarily eliminated player. Permanent eliminations stick.
    pub fn restore_player(&mut self, id: PlayerId) -> bool {
        self.temporarily_eliminated.remove(&id)
    }

    /// Whether the player is currently excluded.
    pub fn is_eliminated(&self, id: PlayerId) -> bool {
        self.permanently_eliminated.contains(&id) || self.temporarily_eliminated.contains(&id)
    }

    /// Turn order minus every eliminated player.
    pub fn active_players(&self) -> Vec<PlayerId> {
        self.turns
            .order()
            .iter()
            .copied()
            .filter(|id| !self.is_eliminated(*id))
            .collect()
    }

    /// True once a bounded match has played all of its rounds.
    pub fn is_game_complete(&self) -> bool {
        self.total_rounds > 0 && self.current_round > self.total_rounds
    }

    /// Go back to round 1 with everyone active.
    pub fn reset(&mut self) {
        self.current_round = 1;
        self.round_start_index = self.turns.index();
        self.permanently_eliminated.clear();
        self.temporarily_eliminated.clear();
    }

    /// Round currently being played, starting at 1.
    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    /// Configured round count; 0 means unbounded.
    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    /// Participants in rotation order.
    pub fn turn_order(&self) -> &[PlayerId] {
        self.turns.order()
    }

    /// Player holding the cursor.
    pub fn current_player(&self) -> PlayerId {
        self.turns.current_player()
    }

    /// See [`TurnManager::is_player_turn`].
    pub fn is_player_turn(&self, id: PlayerId) -> bool {
        self.turns.is_player_turn(id)
    }

    /// Freeze the rotation.
    pub fn pause(&mut self) {
        self.turns.pause();
    }

    /// Unfreeze the rotation.
    pub fn resume(&mut self) {
        self.turns.resume();
    }

    /// Underlying rotation.
    pub fn turns(&self) -> &TurnManager {
        &self.turns
    }

    /// Flip the rotation direction.
    pub fn reverse_direction(&mut self) {
        self.turns.reverse_direction();
    }

    /// Append a participant to the rotation.
    pub fn add_player(&mut self, id: PlayerId) {
        self.turns.add_player(id);
    }

    /// Drop a participant mid-match.
    ///
    /// The round anchor follows the order the same way the cursor does, so the
    /// next wrap is still detected and the round counter keeps moving.
    pub fn remove_player(&mut self, id: PlayerId) -> EngineResult<()> {
        let position = self
            .turns
            .order()
            .iter()
            .position(|candidate| *candidate == id)
            .ok_or(EngineError::UnknownPlayer(id))?;
        self.turns.remove_player(id)?;

        if position < self.round_start_index {
            self.round_start_index -= 1;
        }
        if self.round_start_index >= self.turns.order().len() {
            self.round_start_index = 0;
        }
        self.permanently_eliminated.remove(&id);
        self.temporarily_eliminated.remove(&id);
        Ok(())
    }

    /// Players eliminated for the rest of the match.
    pub fn permanently_eliminated(&self) -> &BTreeSet<PlayerId> {
        &self.permanently_eliminated
    }

    /// Players sitting out until the round rolls over.
    pub fn temporarily_eliminated(&self) -> &BTreeSet<PlayerId> {
        &self.temporarily_eliminated
    }

    /// Persistable view of the round state, including the nested rotation.
    pub fn to_record(&self) -> RoundRecord {
        RoundRecord {
            current_round: self.current_round,
            total_rounds: self.total_rounds,
            permanently_eliminated: self.permanently_eliminated.clone(),
            temporarily_eliminated: self.temporarily_eliminated.clone(),
            round_start_index: self.round_start_index,
            turn_system: self.turns.to_record(),
        }
    }

    /// Rebuild the round state from its persisted record.
    pub fn from_record(record: RoundRecord) -> EngineResult<Self> {
        let turns = TurnManager::from_record(record.turn_system)?;
        if record.round_start_index >= turns.order().len() {
            return Err(EngineError::CorruptState(format!(
                "round start index {} out of range",
                record.round_start_index
            )));
        }
        if record.current_round == 0 {
            return Err(EngineError::CorruptState("rounds start at 1".into()));
        }

        Ok(Self {
            turns,
            current_round: record.current_round,
            total_rounds: record.total_rounds,
            round_start_index: record.round_start_index,
            permanently_eliminated: record.permanently_eliminated,
            temporarily_eliminated: record.temporarily_eliminated,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn rounds(order: Vec<PlayerId>, total: u32) -> RoundManager {
        RoundManager::new(TurnManager::new(order, TurnMode::Sequential).unwrap(), total)
    }

    #[test]
    fn third_turn_of_three_players_opens_round_two() {
        let mut manager = rounds(vec![1, 2, 3], 0);
        assert_eq!(manager.next_turn(), 2);
        assert_eq!(manager.current_round(), 1);
        assert_eq!(manager.next_turn(), 3);
        assert_eq!(manager.current_round(), 1);
        assert_eq!(manager.next_turn(), 1);
        assert_eq!(manager.current_round(), 2);
    }

    #[test]
    fn two_rounds_of_two_players_complete_after_four_turns() {
        let mut manager = rounds(vec![1, 2], 2);
        for _ in 0..4 {
            manager.next_turn();
        }
        assert_eq!(manager.current_round(), 3);
        assert!(manager.is_game_complete());
    }

    #[test]
    fn unbounded_match_never_completes() {
        let mut manager = rounds(vec![1, 2], 0);
        for _ in 0..50 {
            manager.next_turn();
        }
        assert!(!manager.is_game_complete());
    }

    #[test]
    fn paused_rounds_do_not_progress() {
        let mut manager = rounds(vec![1, 2], 1);
        manager.pause();
        for _ in 0..5 {
            assert_eq!(manager.next_turn(), 1);
        }
        assert_eq!(manager.current_round(), 1);
    }

    #[test]
    fn temporary_elimination_lasts_one_round() {
        let mut manager = rounds(vec![1, 2, 3], 0);
        manager.eliminate_player(2, false).unwrap();
        assert_eq!(manager.active_players(), vec![1, 3]);
        assert_eq!(manager.next_turn(), 3);
        assert_eq!(manager.next_turn(), 1);
        assert_eq!(manager.current_round(), 2);
        assert_eq!(manager.active_players(), vec![1, 2, 3]);
        assert_eq!(manager.next_turn(), 2);
    }

    #[test]
    fn restore_only_touches_temporary_eliminations() {
        let mut manager = rounds(vec![1, 2, 3], 0);
        manager.eliminate_player(1, true).unwrap();
        manager.eliminate_player(2, false).unwrap();
        assert!(!manager.restore_player(1));
        assert!(manager.restore_player(2));
        assert!(!manager.restore_player(2));
        assert_eq!(manager.active_players(), vec![2, 3]);
        assert_eq!(
            manager.eliminate_player(9, true),
            Err(EngineError::UnknownPlayer(9))
        );
    }

    #[test]
    fn complete_round_restores_and_reanchors() {
        let mut manager = RoundManager::new(
            TurnManager::new(vec![1, 2, 3], TurnMode::Simultaneous).unwrap(),
            2,
        );
        manager.eliminate_player(3, false).unwrap();
        manager.complete_round();
        assert_eq!(manager.current_round(), 2);
        assert!(!manager.is_eliminated(3));
        manager.complete_round();
        assert!(manager.is_game_complete());
    }

    #[test]
    fn record_round_trip_restores_state() {
        let mut manager = rounds(vec![1, 2, 3, 4], 5);
        manager.next_turn();
        manager.eliminate_player(3, true).unwrap();
        manager.eliminate_player(4, false).unwrap();
        let json = serde_json::to_string(&manager.to_record()).unwrap();
        let restored = RoundManager::from_record(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(restored, manager);
    }

    #[test]
    fn removing_a_player_keeps_rounds_counting() {
        let mut manager = rounds(vec![1, 2, 3], 3);
        manager.next_turn();
        manager.next_turn();
        manager.complete_round();
        assert_eq!(manager.current_player(), 3);

        manager.remove_player(3).unwrap();
        assert_eq!(manager.turn_order(), &[1, 2]);
        for _ in 0..4 {
            manager.next_turn();
        }
        assert!(manager.is_game_complete());
        assert!(RoundManager::from_record(manager.to_record()).is_ok());
    }

    #[test]
    fn removing_before_the_anchor_shifts_it() {
        let mut manager = rounds(vec![1, 2, 3, 4], 0);
        manager.next_turn();
        manager.next_turn();
        manager.complete_round();
        manager.eliminate_player(1, true).unwrap();

        manager.remove_player(1).unwrap();
        assert!(manager.permanently_eliminated().is_empty());
        assert_eq!(manager.current_player(), 3);
        let round = manager.current_round();
        assert_eq!(manager.next_turn(), 4);
        assert_eq!(manager.next_turn(), 2);
        assert_eq!(manager.current_round(), round);
        assert_eq!(manager.next_turn(), 3);
        assert_eq!(manager.current_round(), round + 1);
        assert_eq!(manager.remove_player(9), Err(EngineError::UnknownPlayer(9)));
    }

    proptest! {
        #[test]
        fn permanent_elimination_survives_any_number_of_rounds(
            size in 2usize..8,
            victim_slot in 0usize..8,
            turns in 0usize..64,
        ) {
            let order: Vec<PlayerId> = (1..=size as u64).collect();
            let victim = order[victim_slot % size];
            let mut manager = rounds(order, 0);
            manager.eliminate_player(victim, true).unwrap();
            for _ in 0..turns {
                let current = manager.next_turn();
                prop_assert_ne!(current, victim);
            }
            prop_assert!(!manager.active_players().contains(&victim));
        }

        #[test]
        fn temporary_elimination_is_lifted_by_a_full_cycle(size in 2usize..8, victim_slot in 0usize..8) {
            let order: Vec<PlayerId> = (1..=size as u64).collect();
            let victim = order[victim_slot % size];
            let mut manager = rounds(order, 0);
            manager.eliminate_player(victim, false).unwrap();
            let round = manager.current_round();
            while manager.current_round() == round {
                manager.next_turn();
            }
            prop_assert!(manager.active_players().contains(&victim));
        }

        #[test]
        fn record_round_trip_under_random_operations(ops in proptest::collection::vec(0u8..5, 0..40)) {
            let mut manager = rounds(vec![1, 2, 3, 4], 3);
            for (step, op) in ops.iter().enumerate() {
                let id = (step as u64 % 4) + 1;
                match op {
                    0 => { manager.next_turn(); }
                    1 => { manager.eliminate_player(id, false).unwrap(); }
                    2 => { manager.eliminate_player(id, true).unwrap(); }
                    3 => { manager.restore_player(id); }
                    _ => manager.reverse_direction(),
                }
            }
            let restored = RoundManager::from_record(manager.to_record()).unwrap();
            prop_assert_eq!(restored, manager);
        }
    }
}
