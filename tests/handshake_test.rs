//! Lifecycle tests: startup handshake, re-entrancy, and startup failure
//! modes.

mod common;

use std::time::Duration;

use common::{EngineScript, HandshakeScript, StubRules, scripted_manager, test_config};
use uci_bridge::logging::init_test_logging;
use uci_bridge::{EngineError, EngineState};

#[tokio::test(flavor = "multi_thread")]
async fn initialize_completes_handshake() {
    init_test_logging();
    let (manager, log) = scripted_manager(vec![EngineScript::default()], StubRules::new());

    assert!(!manager.is_ready());
    manager.initialize().await.unwrap();

    assert!(manager.is_ready());
    assert_eq!(manager.state(), EngineState::Ready);
    assert_eq!(manager.engine_name().as_deref(), Some("Scripted 1.0"));
    assert!(log.saw("uci"));
    assert!(log.saw("isready"));

    manager.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn initialize_is_reentrant_while_ready() {
    init_test_logging();
    let (manager, log) = scripted_manager(vec![EngineScript::default()], StubRules::new());

    manager.initialize().await.unwrap();
    manager.initialize().await.unwrap();

    assert_eq!(log.count("uci"), 1, "re-entrant initialize must not respawn");
    manager.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_initializers_share_one_handshake() {
    init_test_logging();
    let (manager, log) = scripted_manager(vec![EngineScript::default()], StubRules::new());

    let (first, second) = tokio::join!(manager.initialize(), manager.initialize());
    first.unwrap();
    second.unwrap();

    assert_eq!(log.count("uci"), 1, "both callers must share one handshake");
    manager.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_engine_fails_the_handshake_window() {
    init_test_logging();
    let mut config = test_config();
    config.handshake_timeout = Duration::from_millis(200);
    let script = EngineScript {
        handshake: HandshakeScript::Mute,
        ..EngineScript::default()
    };
    let (manager, log) =
        common::scripted_manager_with_config(config, vec![script], StubRules::new());

    let err = manager.initialize().await.unwrap_err();
    assert!(matches!(err, EngineError::Handshake(_)), "got {err:?}");
    assert!(!manager.is_ready());
    assert_eq!(manager.state(), EngineState::Crashed);
    assert!(log.was_killed(), "a mute engine must be torn down");
}

#[tokio::test(flavor = "multi_thread")]
async fn engine_exiting_early_fails_the_handshake() {
    init_test_logging();
    let script = EngineScript {
        handshake: HandshakeScript::ExitEarly,
        ..EngineScript::default()
    };
    let (manager, _log) = scripted_manager(vec![script], StubRules::new());

    let err = manager.initialize().await.unwrap_err();
    assert!(matches!(err, EngineError::Handshake(_)), "got {err:?}");
    assert!(!manager.is_ready());
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_before_initialize_are_rejected() {
    init_test_logging();
    let (manager, log) = scripted_manager(vec![EngineScript::default()], StubRules::new());

    let err = manager.request_best_move("fen-a", 5).await.unwrap_err();
    assert!(matches!(err, EngineError::NotRunning), "got {err:?}");
    assert!(log.commands().is_empty(), "nothing may reach a non-existent engine");
}
