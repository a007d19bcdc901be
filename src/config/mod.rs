//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::EngineSettings;

/// Supabase project used as the ranking store
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    /// Supabase project URL
    pub url: String,
    /// Supabase service role key (bypasses RLS - server only!)
    pub service_role_key: String,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// HS256 secret for player tokens
    pub auth_jwt_secret: String,
    /// Allowed client origins for CORS, comma separated, `*` for any
    pub client_origin: String,

    /// Match ticks per second
    pub tick_rate: u32,
    /// Turn limit in timed matches
    pub turn_time_limit_secs: u64,
    /// How long an ended match keeps running before it is torn down
    pub match_end_grace_secs: u64,
    /// Optional roster cap per match
    pub max_players_per_match: Option<usize>,
    /// Leaderboard id written by the outcome reporter
    pub leaderboard_id: String,

    /// Ranking store backend; in-memory when unset
    pub supabase: Option<SupabaseConfig>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let supabase = match (lookup("SUPABASE_URL"), lookup("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => Some(SupabaseConfig {
                url,
                service_role_key,
            }),
            (Some(_), None) => return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")),
            (None, Some(_)) => return Err(ConfigError::Missing("SUPABASE_URL")),
            (None, None) => None,
        };

        let tick_rate: u32 = parse_or(&lookup, "TICK_RATE", 10)?;
        if tick_rate == 0 {
            return Err(ConfigError::Invalid {
                name: "TICK_RATE",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            auth_jwt_secret: lookup("AUTH_JWT_SECRET").ok_or(ConfigError::Missing("AUTH_JWT_SECRET"))?,
            client_origin: lookup("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),

            tick_rate,
            turn_time_limit_secs: parse_or(&lookup, "TURN_TIME_LIMIT_SECS", 30)?,
            match_end_grace_secs: parse_or(&lookup, "MATCH_END_GRACE_SECS", 10)?,
            max_players_per_match: lookup("MAX_PLAYERS_PER_MATCH")
                .map(|v| parse_value("MAX_PLAYERS_PER_MATCH", &v))
                .transpose()?,
            leaderboard_id: lookup("LEADERBOARD_ID")
                .unwrap_or_else(|| "TicTacToeLeaderboard".to_string()),

            supabase,
        })
    }

    /// Engine knobs derived from this config
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            tick_rate: self.tick_rate,
            turn_limit: Duration::from_secs(self.turn_time_limit_secs),
            max_players: self.max_players_per_match,
        }
    }

    pub fn match_end_grace(&self) -> Duration {
        Duration::from_secs(self.match_end_grace_secs)
    }
}

fn parse_value<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}

fn parse_or<T, F>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => parse_value(name, &value),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("AUTH_JWT_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.server_addr.port(), 8080);
        assert_eq!(config.tick_rate, 10);
        assert_eq!(config.turn_time_limit_secs, 30);
        assert_eq!(config.match_end_grace_secs, 10);
        assert_eq!(config.max_players_per_match, None);
        assert_eq!(config.leaderboard_id, "TicTacToeLeaderboard");
        assert_eq!(config.client_origin, "*");
        assert!(config.supabase.is_none());

        let settings = config.engine_settings();
        assert_eq!(settings.turn_limit, Duration::from_secs(30));
    }

    #[test]
    fn port_wins_over_server_addr() {
        let config = load(&[
            ("AUTH_JWT_SECRET", "s"),
            ("PORT", "9000"),
            ("SERVER_ADDR", "127.0.0.1:7000"),
        ])
        .unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn secret_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing("AUTH_JWT_SECRET"))));
    }

    #[test]
    fn bad_numbers_are_reported() {
        let err = load(&[("AUTH_JWT_SECRET", "s"), ("TICK_RATE", "fast")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "TICK_RATE", .. }));

        let err = load(&[("AUTH_JWT_SECRET", "s"), ("TICK_RATE", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "TICK_RATE", .. }));

        let err = load(&[("AUTH_JWT_SECRET", "s"), ("SERVER_ADDR", "nowhere")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress));
    }

    #[test]
    fn supabase_needs_both_halves() {
        let err = load(&[("AUTH_JWT_SECRET", "s"), ("SUPABASE_URL", "https://x.supabase.co")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")));

        let config = load(&[
            ("AUTH_JWT_SECRET", "s"),
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "key"),
            ("MAX_PLAYERS_PER_MATCH", "2"),
        ])
        .unwrap();
        assert_eq!(config.supabase.unwrap().url, "https://x.supabase.co");
        assert_eq!(config.max_players_per_match, Some(2));
    }
}
