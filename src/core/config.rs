/*!
 * Broker Configuration
 *
 * Table capacities and policy switches, with environment overrides:
 * - NEXUS_MAX_SEMS, NEXUS_MAX_PORTS, NEXUS_MAX_AREAS
 * - NEXUS_MAX_TEAMS, NEXUS_MAX_THREADS
 * - NEXUS_STRICT_OWNERSHIP (1/true)
 */

use super::limits::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Broker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BrokerConfig {
    pub max_sems: usize,
    pub max_ports: usize,
    pub max_areas: usize,
    pub max_teams: usize,
    pub max_threads: usize,
    /// Upper bound on a port's queue length
    pub max_port_queue: usize,
    /// Upper bound on a port message or thread mailbox payload
    pub max_message_size: usize,
    /// Reject owner transfers and deletes by non-owners
    pub strict_ownership: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_sems: DEFAULT_MAX_SEMS,
            max_ports: DEFAULT_MAX_PORTS,
            max_areas: DEFAULT_MAX_AREAS,
            max_teams: DEFAULT_MAX_TEAMS,
            max_threads: DEFAULT_MAX_THREADS,
            max_port_queue: PORT_MAX_QUEUE,
            max_message_size: PORT_MAX_MESSAGE_SIZE,
            strict_ownership: false,
        }
    }
}

impl BrokerConfig {
    /// Small tables, handy for exhaustion tests
    pub fn minimal() -> Self {
        Self {
            max_sems: 64,
            max_ports: 16,
            max_areas: 16,
            max_teams: 8,
            max_threads: 32,
            ..Self::default()
        }
    }

    /// Defaults overridden from the environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        override_capacity("NEXUS_MAX_SEMS", &mut config.max_sems);
        override_capacity("NEXUS_MAX_PORTS", &mut config.max_ports);
        override_capacity("NEXUS_MAX_AREAS", &mut config.max_areas);
        override_capacity("NEXUS_MAX_TEAMS", &mut config.max_teams);
        override_capacity("NEXUS_MAX_THREADS", &mut config.max_threads);
        if let Ok(value) = std::env::var("NEXUS_STRICT_OWNERSHIP") {
            config.strict_ownership = value == "1" || value.eq_ignore_ascii_case("true");
        }
        config
    }

    pub fn with_strict_ownership(mut self, strict: bool) -> Self {
        self.strict_ownership = strict;
        self
    }
}

fn override_capacity(var: &str, slot: &mut usize) {
    let Ok(raw) = std::env::var(var) else {
        return;
    };
    match raw.parse::<usize>() {
        // ids are i32, so a table may not exceed half the positive range
        Ok(value) if value > 0 && value <= (i32::MAX as usize) / 2 => *slot = value,
        _ => warn!(var, value = %raw, "ignoring invalid capacity override"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_limits() {
        let config = BrokerConfig::default();
        assert_eq!(config.max_sems, DEFAULT_MAX_SEMS);
        assert_eq!(config.max_port_queue, PORT_MAX_QUEUE);
        assert!(!config.strict_ownership);
    }

    #[test]
    fn test_minimal_keeps_message_bounds() {
        let config = BrokerConfig::minimal();
        assert_eq!(config.max_message_size, PORT_MAX_MESSAGE_SIZE);
        assert!(config.max_sems < DEFAULT_MAX_SEMS);
    }
}
