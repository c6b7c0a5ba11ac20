use indexmap::{IndexMap, IndexSet};
use rand::{Rng, seq::SliceRandom};

use crate::{
    dao::schema::{PlayerRoles, RoleRecord},
    engine::PlayerId,
    error::{EngineError, EngineResult},
};

/// Named roles handed out to players (drawer, guesser, impostor, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleManager {
    available_roles: IndexSet<String>,
    allow_multiple_roles: bool,
    // In single-role mode every set holds exactly one role.
    player_roles: IndexMap<PlayerId, IndexSet<String>>,
}

impl RoleManager {
    /// Create a manager over the given role names.
    pub fn new<I, S>(available_roles: I, allow_multiple_roles: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            available_roles: available_roles.into_iter().map(Into::into).collect(),
            allow_multiple_roles,
            player_roles: IndexMap::new(),
        }
    }

    fn ensure_known(&self, role: &str) -> EngineResult<()> {
        if self.available_roles.contains(role) {
            Ok(())
        } else {
            Err(EngineError::UnknownRole(role.to_string()))
        }
    }

    /// Give `role` to a player. Single-role mode replaces any previous role.
    pub fn assign_role(&mut self, player_id: PlayerId, role: &str) -> EngineResult<()> {
        self.ensure_known(role)?;

        let roles = self.player_roles.entry(player_id).or_default();
        if !self.allow_multiple_roles {
            roles.clear();
        }
        roles.insert(role.to_string());
        Ok(())
    }

    /// Remove one role, or every role when `role` is `None`. Returns whether anything changed.
    pub fn remove_role(&mut self, player_id: PlayerId, role: Option<&str>) -> bool {
        match role {
            None => self.player_roles.shift_remove(&player_id).is_some(),
            Some(role) => {
                let Some(roles) = self.player_roles.get_mut(&player_id) else {
                    return false;
                };
                let removed = roles.shift_remove(role);
                if roles.is_empty() {
                    self.player_roles.shift_remove(&player_id);
                }
                removed
            }
        }
    }

    /// First role held by the player.
    pub fn player_role(&self, player_id: PlayerId) -> Option<&str> {
        self.player_roles
            .get(&player_id)
            .and_then(|roles| roles.first())
            .map(String::as_str)
    }

    /// Every role held by the player.
    pub fn player_roles(&self, player_id: PlayerId) -> Vec<&str> {
        self.player_roles
            .get(&player_id)
            .map(|roles| roles.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether the player holds `role`.
    pub fn has_role(&self, player_id: PlayerId, role: &str) -> bool {
        self.player_roles
            .get(&player_id)
            .is_some_and(|roles| roles.contains(role))
    }

    /// Players holding `role`, in assignment order.
    pub fn players_with_role(&self, role: &str) -> Vec<PlayerId> {
        self.player_roles
            .iter()
            .filter(|(_, roles)| roles.contains(role))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Ids from `all_ids` that hold no role at all.
    pub fn players_without_role(&self, all_ids: &[PlayerId]) -> Vec<PlayerId> {
        all_ids
            .iter()
            .copied()
            .filter(|id| !self.player_roles.contains_key(id))
            .collect()
    }

    /// Pass `role` to the next player of `player_order`.
    ///
    /// With no current holder the role goes to the first player. Returns the new
    /// holder, or `None` without touching anything when the holder is not in
    /// `player_order` (or the order is empty).
    pub fn rotate_role(
        &mut self,
        role: &str,
        player_order: &[PlayerId],
    ) -> EngineResult<Option<PlayerId>> {
        self.ensure_known(role)?;

        let Some(holder) = self.players_with_role(role).first().copied() else {
            let Some(first) = player_order.first().copied() else {
                return Ok(None);
            };
            self.assign_role(first, role)?;
            return Ok(Some(first));
        };

        let Some(position) = player_order.iter().position(|id| *id == holder) else {
            return Ok(None);
        };
        let next = player_order[(position + 1) % player_order.len()];

        self.remove_role(holder, Some(role));
        self.assign_role(next, role)?;
        Ok(Some(next))
    }

    /// Randomly hand out `(role, count)` allocations among `players`.
    ///
    /// Previous assignments of the allocated roles are dropped first; players
    /// left over after every allocation keep whatever else they had.
    pub fn distribute_roles<R: Rng + ?Sized>(
        &mut self,
        allocation: &[(String, usize)],
        players: &[PlayerId],
        rng: &mut R,
    ) -> EngineResult<()> {
        for (role, _) in allocation {
            self.ensure_known(role)?;
        }
        let requested: usize = allocation.iter().map(|(_, count)| count).sum();
        if requested > players.len() {
            return Err(EngineError::Configuration(format!(
                "cannot hand out {requested} roles to {} players",
                players.len()
            )));
        }

        for (role, _) in allocation {
            for holder in self.players_with_role(role) {
                self.remove_role(holder, Some(role));
            }
        }

        let mut shuffled = players.to_vec();
        shuffled.shuffle(rng);
        let mut pool = shuffled.into_iter();
        for (role, count) in allocation {
            for player_id in pool.by_ref().take(*count) {
                self.assign_role(player_id, role)?;
            }
        }
        Ok(())
    }

    /// Drop every assignment.
    pub fn clear(&mut self) {
        self.player_roles.clear();
    }

    /// Roles that may be assigned.
    pub fn available_roles(&self) -> &IndexSet<String> {
        &self.available_roles
    }

    /// Whether a player may hold several roles at once.
    pub fn allows_multiple_roles(&self) -> bool {
        self.allow_multiple_roles
    }

    /// Persistable view of the assignments.
    pub fn to_record(&self) -> RoleRecord {
        let player_roles = self
            .player_roles
            .iter()
            .map(|(id, roles)| {
                let entry = if self.allow_multiple_roles {
                    PlayerRoles::Many(roles.iter().cloned().collect())
                } else {
                    PlayerRoles::One(roles.first().cloned().unwrap_or_default())
                };
                (*id, entry)
            })
            .collect();

        RoleRecord {
            available_roles: self.available_roles.iter().cloned().collect(),
            allow_multiple_roles: self.allow_multiple_roles,
            player_roles,
        }
    }

    /// Rebuild assignments from a record, checking every role is still available.
    pub fn from_record(record: RoleRecord) -> EngineResult<Self> {
        let mut manager = Self::new(record.available_roles, record.allow_multiple_roles);
        for (player_id, entry) in record.player_roles {
            let roles = match entry {
                PlayerRoles::One(role) => vec![role],
                PlayerRoles::Many(roles) => roles,
            };
            for role in roles {
                manager.assign_role(player_id, &role).map_err(|_| {
                    EngineError::CorruptState(format!(
                        "player {player_id} holds unavailable role `{role}`"
                    ))
                })?;
            }
        }
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn single() -> RoleManager {
        RoleManager::new(["drawer", "guesser"], false)
    }

    #[test]
    fn single_role_mode_overwrites() {
        let mut roles = single();
        roles.assign_role(1, "drawer").unwrap();
        roles.assign_role(1, "guesser").unwrap();
        assert_eq!(roles.player_role(1), Some("guesser"));
        assert_eq!(roles.player_roles(1), vec!["guesser"]);
    }

    #[test]
    fn multi_role_mode_inserts_idempotently() {
        let mut roles = RoleManager::new(["mayor", "werewolf"], true);
        roles.assign_role(1, "mayor").unwrap();
        roles.assign_role(1, "werewolf").unwrap();
        roles.assign_role(1, "mayor").unwrap();
        assert_eq!(roles.player_roles(1), vec!["mayor", "werewolf"]);

        assert!(roles.remove_role(1, Some("mayor")));
        assert!(roles.remove_role(1, Some("werewolf")));
        assert!(roles.player_roles(1).is_empty());
        assert!(roles.players_without_role(&[1]).contains(&1));
    }

    #[test]
    fn unknown_roles_are_rejected() {
        let mut roles = single();
        assert_eq!(
            roles.assign_role(1, "spy"),
            Err(EngineError::UnknownRole("spy".into()))
        );
        assert!(roles.rotate_role("spy", &[1]).is_err());
    }

    #[test]
    fn remove_without_name_clears_everything() {
        let mut roles = RoleManager::new(["a", "b"], true);
        roles.assign_role(3, "a").unwrap();
        roles.assign_role(3, "b").unwrap();
        assert!(roles.remove_role(3, None));
        assert!(!roles.remove_role(3, None));
        assert!(roles.players_with_role("a").is_empty());
    }

    #[test]
    fn players_without_role_is_a_set_difference() {
        let mut roles = single();
        roles.assign_role(2, "drawer").unwrap();
        assert_eq!(roles.players_without_role(&[1, 2, 3]), vec![1, 3]);
        assert_eq!(roles.players_with_role("drawer"), vec![2]);
    }

    #[test]
    fn rotate_role_walks_the_order_circularly() {
        let mut roles = single();
        let order = [4, 5, 6];
        assert_eq!(roles.rotate_role("drawer", &order).unwrap(), Some(4));
        assert_eq!(roles.rotate_role("drawer", &order).unwrap(), Some(5));
        assert_eq!(roles.rotate_role("drawer", &order).unwrap(), Some(6));
        assert_eq!(roles.rotate_role("drawer", &order).unwrap(), Some(4));
        assert_eq!(roles.players_with_role("drawer"), vec![4]);
    }

    #[test]
    fn rotate_role_with_absent_holder_changes_nothing() {
        let mut roles = single();
        roles.assign_role(9, "drawer").unwrap();
        assert_eq!(roles.rotate_role("drawer", &[1, 2]).unwrap(), None);
        assert!(roles.has_role(9, "drawer"));
    }

    #[test]
    fn distribute_roles_hands_out_exact_counts() {
        let mut roles = RoleManager::new(["impostor", "crew"], false);
        let players = [1, 2, 3, 4, 5];
        roles
            .distribute_roles(
                &[("impostor".to_string(), 1), ("crew".to_string(), 4)],
                &players,
                &mut StdRng::seed_from_u64(11),
            )
            .unwrap();
        assert_eq!(roles.players_with_role("impostor").len(), 1);
        assert_eq!(roles.players_with_role("crew").len(), 4);

        let err = roles
            .distribute_roles(
                &[("crew".to_string(), 6)],
                &players,
                &mut StdRng::seed_from_u64(1),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn record_uses_scalar_roles_in_single_mode() {
        let mut roles = single();
        roles.assign_role(1, "drawer").unwrap();
        let json = serde_json::to_value(roles.to_record()).unwrap();
        assert_eq!(json["player_roles"]["1"], "drawer");

        let mut multi = RoleManager::new(["a", "b"], true);
        multi.assign_role(1, "a").unwrap();
        let json = serde_json::to_value(multi.to_record()).unwrap();
        assert_eq!(json["player_roles"]["1"], serde_json::json!(["a"]));
    }

    proptest! {
        #[test]
        fn record_round_trip_under_random_operations(
            multiple in any::<bool>(),
            ops in proptest::collection::vec((0u8..4, 1u64..5, 0usize..3), 0..40),
        ) {
            let names = ["red", "green", "blue"];
            let mut roles = RoleManager::new(names, multiple);
            for (op, player, role) in ops {
                match op {
                    0 => roles.assign_role(player, names[role]).unwrap(),
                    1 => { roles.remove_role(player, Some(names[role])); }
                    2 => { roles.remove_role(player, None); }
                    _ => { roles.rotate_role(names[role], &[1, 2, 3, 4]).unwrap(); }
                }
            }
            let json = serde_json::to_string(&roles.to_record()).unwrap();
            let restored = RoleManager::from_record(serde_json::from_str(&json).unwrap()).unwrap();
            prop_assert_eq!(restored, roles);
        }
    }
}
