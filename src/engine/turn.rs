use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{
    dao::schema::TurnRecord,
    engine::PlayerId,
    error::{EngineError, EngineResult},
};

/// How players take turns within a round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    /// One player at a time, in order.
    #[default]
    Sequential,
    /// Everyone plays at once.
    Simultaneous,
    /// No ordering at all.
    Free,
}

/// Rotation direction, persisted as `1` or `-1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Direction {
    /// Towards the end of the order.
    #[default]
    Forward,
    /// Towards the start of the order.
    Backward,
}

impl Direction {
    fn step(self) -> isize {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }

    fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

impl From<Direction> for i8 {
    fn from(value: Direction) -> Self {
        value.step() as i8
    }
}

impl TryFrom<i8> for Direction {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Direction::Forward),
            -1 => Ok(Direction::Backward),
            other => Err(format!("direction must be 1 or -1, got {other}")),
        }
    }
}

/// Ordered rotation over participant ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnManager {
    order: Vec<PlayerId>,
    index: usize,
    mode: TurnMode,
    paused: bool,
    direction: Direction,
}

impl TurnManager {
    /// Build a rotation starting at the first participant.
    pub fn new(order: Vec<PlayerId>, mode: TurnMode) -> EngineResult<Self> {
        if order.is_empty() {
            return Err(EngineError::Configuration(
                "turn order requires at least one participant".into(),
            ));
        }

        Ok(Self {
            order,
            index: 0,
            mode,
            paused: false,
            direction: Direction::Forward,
        })
    }

    /// Player holding the cursor.
    pub fn current_player(&self) -> PlayerId {
        self.order[self.index]
    }

    /// Move the cursor one step in the current direction and return the new current player.
    ///
    /// While paused this is a no-op returning the unchanged current player.
    pub fn advance(&mut self) -> PlayerId {
        if self.paused {
            return self.current_player();
        }

        let len = self.order.len() as isize;
        self.index = (self.index as isize + self.direction.step()).rem_euclid(len) as usize;
        self.current_player()
    }

    /// Whether `id` may play now. Outside sequential mode every participant may.
    pub fn is_player_turn(&self, id: PlayerId) -> bool {
        match self.mode {
            TurnMode::Sequential => self.current_player() == id,
            TurnMode::Simultaneous | TurnMode::Free => self.order.contains(&id),
        }
    }

    /// Freeze the cursor.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Unfreeze the cursor.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Flip the rotation direction.
    pub fn reverse_direction(&mut self) {
        self.direction = self.direction.reversed();
    }

    /// Randomize the order and put the cursor back on the first entry.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.order.shuffle(rng);
        self.index = 0;
    }

    /// Append a participant at the end of the order. Already present ids are ignored.
    pub fn add_player(&mut self, id: PlayerId) {
        if !self.order.contains(&id) {
            self.order.push(id);
        }
    }

    /// Remove a participant while keeping the cursor on a valid entry.
    ///
    /// When the current player leaves, the cursor lands on the player who followed them.
    pub fn remove_player(&mut self, id: PlayerId) -> EngineResult<()> {
        let position = self
            .order
            .iter()
            .position(|candidate| *candidate == id)
            .ok_or(EngineError::UnknownPlayer(id))?;

        if self.order.len() == 1 {
            return Err(EngineError::Configuration(
                "cannot remove the last participant of a turn order".into(),
            ));
        }

        self.order.remove(position);
        if position < self.index {
            self.index -= 1;
        }
        if self.index >= self.order.len() {
            self.index = 0;
        }
        Ok(())
    }

    /// Participants in rotation order.
    pub fn order(&self) -> &[PlayerId] {
        &self.order
    }

    /// Cursor position inside [`Self::order`].
    pub fn index(&self) -> usize {
        self.index
    }

    /// Configured turn mode.
    pub fn mode(&self) -> TurnMode {
        self.mode
    }

    /// Whether the cursor is frozen.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Current rotation direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Persistable view of the rotation.
    pub fn to_record(&self) -> TurnRecord {
        TurnRecord {
            order: self.order.clone(),
            index: self.index,
            mode: self.mode,
            paused: self.paused,
            direction: self.direction,
        }
    }

    /// Rebuild a rotation from its persisted record.
    pub fn from_record(record: TurnRecord) -> EngineResult<Self> {
        if record.order.is_empty() {
            return Err(EngineError::CorruptState("turn order is empty".into()));
        }
        if record.index >= record.order.len() {
            return Err(EngineError::CorruptState(format!(
                "turn index {} out of range for {} participants",
                record.index,
                record.order.len()
            )));
        }

        Ok(Self {
            order: record.order,
            index: record.index,
            mode: record.mode,
            paused: record.paused,
            direction: record.direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn empty_order_is_rejected() {
        let err = TurnManager::new(vec![], TurnMode::Sequential).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn advance_rotates_forward() {
        let mut turns = TurnManager::new(vec![1, 2, 3], TurnMode::Sequential).unwrap();
        let seen: Vec<_> = (0..3).map(|_| turns.advance()).collect();
        assert_eq!(seen, vec![2, 3, 1]);
    }

    #[test]
    fn paused_advance_is_a_no_op() {
        let mut turns = TurnManager::new(vec![1, 2, 3], TurnMode::Sequential).unwrap();
        turns.pause();
        assert_eq!(turns.advance(), 1);
        assert_eq!(turns.advance(), 1);
        turns.resume();
        assert_eq!(turns.advance(), 2);
    }

    #[test]
    fn reversed_direction_walks_backwards() {
        let mut turns = TurnManager::new(vec![1, 2, 3], TurnMode::Sequential).unwrap();
        turns.reverse_direction();
        assert_eq!(turns.advance(), 3);
        assert_eq!(turns.advance(), 2);
        assert_eq!(turns.direction(), Direction::Backward);
    }

    #[test]
    fn simultaneous_mode_lets_everyone_play() {
        let turns = TurnManager::new(vec![1, 2], TurnMode::Simultaneous).unwrap();
        assert!(turns.is_player_turn(1));
        assert!(turns.is_player_turn(2));
        assert!(!turns.is_player_turn(3));

        let sequential = TurnManager::new(vec![1, 2], TurnMode::Sequential).unwrap();
        assert!(sequential.is_player_turn(1));
        assert!(!sequential.is_player_turn(2));
    }

    #[test]
    fn removing_the_current_player_moves_to_the_follower() {
        let mut turns = TurnManager::new(vec![1, 2, 3], TurnMode::Sequential).unwrap();
        turns.advance();
        turns.advance();
        turns.remove_player(3).unwrap();
        assert_eq!(turns.current_player(), 1);

        turns.advance();
        turns.remove_player(1).unwrap();
        assert_eq!(turns.current_player(), 2);
        assert!(matches!(
            turns.remove_player(2),
            Err(EngineError::Configuration(_))
        ));
        assert_eq!(turns.remove_player(7), Err(EngineError::UnknownPlayer(7)));
    }

    #[test]
    fn shuffle_keeps_participants() {
        let mut turns = TurnManager::new(vec![1, 2, 3, 4, 5], TurnMode::Sequential).unwrap();
        turns.advance();
        turns.shuffle(&mut StdRng::seed_from_u64(7));
        let mut order = turns.order().to_vec();
        order.sort();
        assert_eq!(order, vec![1, 2, 3, 4, 5]);
        assert_eq!(turns.index(), 0);
    }

    #[test]
    fn direction_serializes_as_signed_step() {
        let turns = {
            let mut turns = TurnManager::new(vec![4, 5], TurnMode::Free).unwrap();
            turns.reverse_direction();
            turns
        };
        let json = serde_json::to_value(turns.to_record()).unwrap();
        assert_eq!(json["direction"], -1);
        assert_eq!(json["mode"], "free");

        let restored = TurnManager::from_record(serde_json::from_value(json).unwrap()).unwrap();
        assert_eq!(restored, turns);
    }

    #[test]
    fn out_of_range_record_is_corrupt() {
        let record = TurnRecord {
            order: vec![1],
            index: 3,
            mode: TurnMode::Sequential,
            paused: false,
            direction: Direction::Forward,
        };
        assert!(matches!(
            TurnManager::from_record(record),
            Err(EngineError::CorruptState(_))
        ));
    }

    proptest! {
        #[test]
        fn n_advances_return_to_start(
            order in proptest::collection::vec(any::<u64>(), 1..24),
            backwards in any::<bool>(),
        ) {
            let mut turns = TurnManager::new(order.clone(), TurnMode::Sequential).unwrap();
            if backwards {
                turns.reverse_direction();
            }
            let start = turns.current_player();
            let start_index = turns.index();
            for _ in 0..order.len() {
                turns.advance();
            }
            prop_assert_eq!(turns.current_player(), start);
            prop_assert_eq!(turns.index(), start_index);
        }
    }
}
