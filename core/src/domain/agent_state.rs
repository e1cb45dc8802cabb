// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// Registration state of an agent process.
///
/// ```text
/// Unregistered --Start--> Registering --Accepted--> Active
///                              ^                      |
///                              |                TransportFailure
///                              |                      v
///                              +-------Retry----- Reconnecting
/// ```
///
/// There is no terminal state: an agent keeps cycling until the process stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Unregistered,
    Registering,
    Active,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEvent {
    /// The agent process started its registration loop.
    Start,
    /// The registration message was written to the registration node.
    Accepted,
    /// The heartbeat connection failed (broken pipe, reset, closed by the server).
    TransportFailure,
    /// Reconnection begins immediately after a failure.
    Retry,
}

impl AgentState {
    /// State reached by applying `event`, or `None` when the event is not valid here.
    pub fn next(self, event: AgentEvent) -> Option<AgentState> {
        match (self, event) {
            (AgentState::Unregistered, AgentEvent::Start) => Some(AgentState::Registering),
            (AgentState::Registering, AgentEvent::Accepted) => Some(AgentState::Active),
            (AgentState::Active, AgentEvent::TransportFailure) => Some(AgentState::Reconnecting),
            (AgentState::Reconnecting, AgentEvent::Retry) => Some(AgentState::Registering),
            _ => None,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Unregistered => write!(f, "unregistered"),
            AgentState::Registering => write!(f, "registering"),
            AgentState::Active => write!(f, "active"),
            AgentState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let state = AgentState::default();
        let state = state.next(AgentEvent::Start).unwrap();
        assert_eq!(state, AgentState::Registering);
        let state = state.next(AgentEvent::Accepted).unwrap();
        assert_eq!(state, AgentState::Active);
        let state = state.next(AgentEvent::TransportFailure).unwrap();
        assert_eq!(state, AgentState::Reconnecting);
        let state = state.next(AgentEvent::Retry).unwrap();
        assert_eq!(state, AgentState::Registering);
    }

    #[test]
    fn test_rejected_transitions() {
        assert_eq!(AgentState::Unregistered.next(AgentEvent::Accepted), None);
        assert_eq!(AgentState::Registering.next(AgentEvent::TransportFailure), None);
        assert_eq!(AgentState::Active.next(AgentEvent::Start), None);
        assert_eq!(AgentState::Reconnecting.next(AgentEvent::Accepted), None);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&AgentState::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
    }
}
