//! Match types the server knows how to create
//!
//! A match type is a label bound to a default [`GameMode`]. The registry is
//! built once at startup and shared behind an `Arc`.

use std::collections::HashMap;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use super::engine::{EngineSettings, MatchEngine, MatchParams};
use super::reporter::OutcomeReporter;
use super::state::GameMode;
use super::MatchConfigError;

/// Freshly created engine waiting for a runner
pub struct CreatedMatch {
    pub engine: MatchEngine,
    pub tick_interval: Duration,
    pub label: String,
}

pub struct MatchTypeRegistry {
    types: HashMap<String, GameMode>,
    settings: EngineSettings,
    reporter: OutcomeReporter,
}

impl MatchTypeRegistry {
    pub fn new(settings: EngineSettings, reporter: OutcomeReporter) -> Self {
        Self {
            types: HashMap::new(),
            settings,
            reporter,
        }
    }

    /// Registry with the stock lobby types
    pub fn with_defaults(settings: EngineSettings, reporter: OutcomeReporter) -> Self {
        let mut registry = Self::new(settings, reporter);
        registry.register("lobby", GameMode::Standard);
        registry.register("lobby_standard", GameMode::Standard);
        registry.register("lobby_classic", GameMode::Standard);
        registry.register("lobby_timed", GameMode::Timed);
        registry
    }

    pub fn register(&mut self, name: &str, default_mode: GameMode) {
        info!(match_type = name, mode = %default_mode, "Registered match type");
        self.types.insert(name.to_string(), default_mode);
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Create a match of the named type
    pub fn create(&self, name: &str, params: &MatchParams) -> Result<CreatedMatch, MatchConfigError> {
        let default_mode = *self
            .types
            .get(name)
            .ok_or_else(|| MatchConfigError::UnknownMatchType(name.to_string()))?;

        let (engine, tick_interval, label) = MatchEngine::init(
            Uuid::new_v4(),
            default_mode,
            params,
            self.settings.clone(),
            self.reporter.clone(),
        );

        Ok(CreatedMatch {
            engine,
            tick_interval,
            label,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MatchTypeRegistry {
        let (reporter, _) = OutcomeReporter::channel("TicTacToeLeaderboard");
        MatchTypeRegistry::with_defaults(EngineSettings::default(), reporter)
    }

    #[test]
    fn defaults_cover_every_lobby() {
        assert_eq!(
            registry().names(),
            ["lobby", "lobby_classic", "lobby_standard", "lobby_timed"]
        );
    }

    #[test]
    fn label_reflects_resolved_mode() {
        let types = registry();

        let created = types.create("lobby_classic", &MatchParams::default()).unwrap();
        assert_eq!(created.label, "lobby_standard");
        assert_eq!(created.engine.state().mode, GameMode::Standard);

        let created = types.create("lobby_timed", &MatchParams::default()).unwrap();
        assert_eq!(created.label, "lobby_timed");

        let created = types
            .create("lobby", &MatchParams::with_mode(GameMode::Timed))
            .unwrap();
        assert_eq!(created.engine.state().mode, GameMode::Timed);
        assert_eq!(created.tick_interval, Duration::from_millis(100));
    }

    #[test]
    fn unknown_type_is_an_error() {
        let err = registry()
            .create("ranked", &MatchParams::default())
            .err()
            .unwrap();
        assert_eq!(err, MatchConfigError::UnknownMatchType("ranked".into()));
    }
}
