//! Server configuration.
//!
//! Configuration is loaded from environment variables. User tokens and
//! room passwords are redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::{RoomMeta, UserView};

/// Default listen address.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8000";

/// Default maximum number of members per room.
pub const DEFAULT_ROOM_CAPACITY: usize = 16;

/// Default time allowed between pongs before a peer is evicted.
pub const DEFAULT_PONG_WAIT_SECS: u64 = 60;

/// Default interval between keepalive pings. Must stay below the pong wait.
pub const DEFAULT_PING_PERIOD_SECS: u64 = 54;

/// Default deadline for a single outbound frame.
pub const DEFAULT_WRITE_WAIT_SECS: u64 = 10;

/// Room and keepalive settings shared by every room of a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatSettings {
    /// Maximum members per room unless the room overrides it.
    pub capacity: usize,
    /// Deadline for each outbound frame (payload or ping).
    pub write_wait: Duration,
    /// Read deadline, refreshed by every pong.
    pub pong_wait: Duration,
    /// Interval between pings.
    pub ping_period: Duration,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_ROOM_CAPACITY,
            write_wait: Duration::from_secs(DEFAULT_WRITE_WAIT_SECS),
            pong_wait: Duration::from_secs(DEFAULT_PONG_WAIT_SECS),
            ping_period: Duration::from_secs(DEFAULT_PING_PERIOD_SECS),
        }
    }
}

impl ChatSettings {
    /// Check the invariants the keepalive protocol relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "room capacity must be at least 1".to_string(),
            ));
        }
        if self.write_wait.is_zero() || self.pong_wait.is_zero() || self.ping_period.is_zero() {
            return Err(ConfigError::InvalidValue(
                "durations must be greater than zero".to_string(),
            ));
        }
        if self.ping_period >= self.pong_wait {
            return Err(ConfigError::InvalidValue(format!(
                "ping period ({:?}) must be shorter than pong wait ({:?})",
                self.ping_period, self.pong_wait
            )));
        }
        Ok(())
    }
}

/// Server configuration.
///
/// Loaded from environment variables with defaults taken from the
/// constants above.
#[derive(Clone)]
pub struct Config {
    /// TCP listen address (default: "127.0.0.1:8000").
    pub bind_address: String,

    /// Hub-wide room and keepalive settings.
    pub chat: ChatSettings,

    /// Bearer token → user, seeded into the in-memory directory.
    pub users: Vec<(String, UserView)>,

    /// Rooms seeded into the in-memory directory.
    pub rooms: Vec<RoomMeta>,
}

/// Custom Debug implementation that redacts tokens and passwords.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let users: Vec<&UserView> = self.users.iter().map(|(_, user)| user).collect();
        let rooms: Vec<(&str, bool)> = self
            .rooms
            .iter()
            .map(|room| (room.id.as_str(), room.is_private()))
            .collect();
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("chat", &self.chat)
            .field("users", &users)
            .field("rooms", &rooms)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("CHAT_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let chat = ChatSettings {
            capacity: parse_or(vars, "CHAT_ROOM_CAPACITY", DEFAULT_ROOM_CAPACITY)?,
            write_wait: secs_or(vars, "CHAT_WRITE_WAIT_SECS", DEFAULT_WRITE_WAIT_SECS)?,
            pong_wait: secs_or(vars, "CHAT_PONG_WAIT_SECS", DEFAULT_PONG_WAIT_SECS)?,
            ping_period: secs_or(vars, "CHAT_PING_PERIOD_SECS", DEFAULT_PING_PERIOD_SECS)?,
        };
        chat.validate()?;

        let users = match vars.get("CHAT_USERS") {
            Some(raw) => parse_users(raw)?,
            None => Vec::new(),
        };
        let rooms = match vars.get("CHAT_ROOMS") {
            Some(raw) => parse_rooms(raw),
            None => Vec::new(),
        };

        Ok(Self {
            bind_address,
            chat,
            users,
            rooms,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}

fn secs_or(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    parse_or(vars, key, default).map(Duration::from_secs)
}

/// `token=id:username,token=id:username`
fn parse_users(raw: &str) -> Result<Vec<(String, UserView)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid = || ConfigError::InvalidValue(format!("CHAT_USERS entry '{entry}'"));
            let (token, user) = entry.split_once('=').ok_or_else(invalid)?;
            let (id, username) = user.split_once(':').ok_or_else(invalid)?;
            let id: i64 = id.parse().map_err(|_| invalid())?;
            if token.is_empty() || username.is_empty() {
                return Err(invalid());
            }
            Ok((token.to_string(), UserView::new(id, username)))
        })
        .collect()
}

/// `id,id:password`
fn parse_rooms(raw: &str) -> Vec<RoomMeta> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((id, password)) => RoomMeta::new(id, id, 0).with_password(password),
            None => RoomMeta::new(entry, entry, 0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&HashMap::new()).unwrap();

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.chat, ChatSettings::default());
        assert!(config.users.is_empty());
        assert!(config.rooms.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_vars(&vars(&[
            ("CHAT_BIND_ADDRESS", "0.0.0.0:9000"),
            ("CHAT_ROOM_CAPACITY", "2"),
            ("CHAT_PONG_WAIT_SECS", "20"),
            ("CHAT_PING_PERIOD_SECS", "15"),
            ("CHAT_WRITE_WAIT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:9000");
        assert_eq!(config.chat.capacity, 2);
        assert_eq!(config.chat.pong_wait, Duration::from_secs(20));
        assert_eq!(config.chat.ping_period, Duration::from_secs(15));
        assert_eq!(config.chat.write_wait, Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = Config::from_vars(&vars(&[("CHAT_ROOM_CAPACITY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_rejects_ping_not_below_pong() {
        let err = Config::from_vars(&vars(&[
            ("CHAT_PONG_WAIT_SECS", "10"),
            ("CHAT_PING_PERIOD_SECS", "10"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_rejects_garbage_number() {
        let err = Config::from_vars(&vars(&[("CHAT_WRITE_WAIT_SECS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("CHAT_WRITE_WAIT_SECS"));
    }

    #[test]
    fn test_users_and_rooms() {
        let config = Config::from_vars(&vars(&[
            ("CHAT_USERS", "tok-a=1:alice, tok-b=2:bob"),
            ("CHAT_ROOMS", "lobby,vault:hunter2"),
        ]))
        .unwrap();

        assert_eq!(
            config.users,
            vec![
                ("tok-a".to_string(), UserView::new(1, "alice")),
                ("tok-b".to_string(), UserView::new(2, "bob")),
            ]
        );
        assert_eq!(config.rooms.len(), 2);
        assert!(!config.rooms[0].is_private());
        assert_eq!(config.rooms[1].password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_malformed_user_entry() {
        assert!(Config::from_vars(&vars(&[("CHAT_USERS", "tok-a=alice")])).is_err());
        assert!(Config::from_vars(&vars(&[("CHAT_USERS", "tok-a=x:alice")])).is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config::from_vars(&vars(&[
            ("CHAT_USERS", "secret-token=1:alice"),
            ("CHAT_ROOMS", "vault:hunter2"),
        ]))
        .unwrap();
        let debug = format!("{config:?}");

        assert!(!debug.contains("secret-token"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("alice"));
    }
}
