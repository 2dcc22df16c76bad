/*!
 * Configuration Tests
 * Environment overrides; serialized because they mutate process env
 */

use nexus_kit::core::limits::{DEFAULT_MAX_PORTS, DEFAULT_MAX_SEMS};
use nexus_kit::{Broker, BrokerConfig, Status};
use pretty_assertions::assert_eq;
use serial_test::serial;

const VARS: [&str; 6] = [
    "NEXUS_MAX_SEMS",
    "NEXUS_MAX_PORTS",
    "NEXUS_MAX_AREAS",
    "NEXUS_MAX_TEAMS",
    "NEXUS_MAX_THREADS",
    "NEXUS_STRICT_OWNERSHIP",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_env_overrides_capacities() {
    clear_env();
    std::env::set_var("NEXUS_MAX_SEMS", "12");
    std::env::set_var("NEXUS_MAX_TEAMS", "3");
    std::env::set_var("NEXUS_STRICT_OWNERSHIP", "true");

    let config = BrokerConfig::from_env();
    clear_env();

    assert_eq!(config.max_sems, 12);
    assert_eq!(config.max_teams, 3);
    assert_eq!(config.max_ports, DEFAULT_MAX_PORTS);
    assert!(config.strict_ownership);
}

#[test]
#[serial]
fn test_invalid_overrides_are_ignored() {
    clear_env();
    std::env::set_var("NEXUS_MAX_SEMS", "lots");
    std::env::set_var("NEXUS_MAX_PORTS", "0");

    let config = BrokerConfig::from_env();
    clear_env();

    assert_eq!(config.max_sems, DEFAULT_MAX_SEMS);
    assert_eq!(config.max_ports, DEFAULT_MAX_PORTS);
}

#[test]
#[serial]
fn test_configured_limits_are_enforced() {
    clear_env();
    std::env::set_var("NEXUS_MAX_TEAMS", "2");
    let broker = Broker::from_env();
    clear_env();

    broker.attach("one").unwrap();
    broker.attach("two").unwrap();
    assert_eq!(broker.attach("three").map(|_| ()), Err(Status::NoMoreTeams));
}

#[test]
fn test_config_deserializes_with_defaults() {
    let config: BrokerConfig = serde_json::from_str(r#"{"max_sems": 10}"#).unwrap();
    assert_eq!(config.max_sems, 10);
    assert_eq!(config.max_ports, DEFAULT_MAX_PORTS);
    assert!(!config.strict_ownership);
}

#[test]
#[serial]
fn test_process_broker_attach() {
    let team = nexus_kit::attach("embedded").unwrap();
    let sem = team.create_sem(1, "shared").unwrap();
    assert_eq!(nexus_kit::process_broker().sems().get_count(sem), Ok(1));
    team.exit_team(0).unwrap();
}
