use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Simulation ticks per second on the session server.
pub const TICK_RATE: f64 = 60.0;


pub const PORT_OFFSET_CLIENT: u16 = 0;
pub const PORT_OFFSET_SESSION: u16 = 1;

/// Path clients upgrade on to join the session.
pub const SESSION_PATH: &str = "/join";

pub const DEFAULT_BASE_PORT: u16 = 3000;

/// Time between two ticks at `rate` ticks per second.
pub fn tick_interval(rate: f64) -> Duration {
    Duration::from_secs_f64(1.0 / rate.max(1.0))
}

/// Ports derived from the base port in development mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevPorts {
    pub client: u16,
    pub session: u16,
}

impl DevPorts {
    pub fn from_base(base: u16) -> Self {
        Self {
            client: base.saturating_add(PORT_OFFSET_CLIENT),
            session: base.saturating_add(PORT_OFFSET_SESSION),
        }
    }

    /// Recovers the session port from the port the client was served on.
    pub fn session_for_client(client_port: u16) -> u16 {
        client_port
            .saturating_add(PORT_OFFSET_SESSION)
            .saturating_sub(PORT_OFFSET_CLIENT)
    }
}

/// EXAMPLE: game state shared between the client and the session server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    #[serde(rename = "currentTick")]
    pub current_tick: u64,
}

impl GameState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn deserialize(serialized: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(serialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_tick_interval() {
        assert_approx_eq!(tick_interval(TICK_RATE).as_secs_f64() * 1000.0, 16.6667, 1e-3);
        assert_eq!(tick_interval(20.0), Duration::from_millis(50));
        assert_eq!(tick_interval(0.0), Duration::from_secs(1));
    }

    #[test]
    fn test_dev_ports() {
        let ports = DevPorts::from_base(3000);
        assert_eq!(ports.client, 3000);
        assert_eq!(ports.session, 3001);
        assert_eq!(DevPorts::session_for_client(ports.client), ports.session);
    }

    #[test]
    fn test_dev_ports_saturate() {
        let ports = DevPorts::from_base(u16::MAX);
        assert_eq!(ports.session, u16::MAX);
    }

    #[test]
    fn test_empty_state() {
        assert_eq!(GameState::empty().current_tick, 0);
    }

    #[test]
    fn test_wire_format_uses_camel_case() {
        let state = GameState { current_tick: 42 };
        assert_eq!(state.serialize().unwrap(), r#"{"currentTick":42}"#);
    }

    #[test]
    fn test_deserialize_snapshot() {
        let state = GameState::deserialize(r#"{"currentTick":7}"#).unwrap();
        assert_eq!(state.current_tick, 7);
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(GameState::deserialize("not json").is_err());
        assert!(GameState::deserialize(r#"{"tick":1}"#).is_err());
    }
}
