//! Registry of the games a server can host.

/// Reference game adding submitted points.
pub mod tally;

use std::sync::Arc;

use indexmap::IndexMap;

use crate::engine::hooks::GameRules;

/// Games available to new matches, keyed by registry name.
#[derive(Debug, Clone, Default)]
pub struct GameRegistry {
    games: IndexMap<String, Arc<dyn GameRules>>,
}

impl GameRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every game shipped with the crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(tally::Tally));
        registry
    }

    /// Add or replace a game under its own name.
    pub fn register(&mut self, rules: Arc<dyn GameRules>) {
        self.games.insert(rules.name().to_string(), rules);
    }

    /// Rules of the named game.
    pub fn get(&self, name: &str) -> Option<Arc<dyn GameRules>> {
        self.games.get(name).cloned()
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.games.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_hosts_tally() {
        let registry = GameRegistry::builtin();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec![tally::TALLY]);
        assert!(registry.get("tally").is_some());
        assert!(registry.get("chess").is_none());
    }
}
