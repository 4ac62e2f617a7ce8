//! Key material must never reach logs, errors, link operation records or
//! child processes.

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use common::{shell_role, test_config, wait_for_state, FakeDriver, LogCapture, KEY_A, KEY_B};
use tunnel_supervisor::config::{Environment, RestartPolicy, SecretsConfig};
use tunnel_supervisor::lifecycle::{ExitCode, LifecycleController, LifecycleState, TerminationSignal};
use tunnel_supervisor::secrets::{CredentialKind, SecretResolver, StaticSource};
use tunnel_supervisor::supervisor::ProcessState;
use tunnel_supervisor::tunnel::{DryRunDriver, TunnelConfig, TunnelManager};

/// Not valid base64, but distinctive enough to search for.
const MALFORMED_KEY: &str = "hunter2-not-a-key-7f3a9c";

fn tunnel_config(resolver: &SecretResolver<StaticSource>, environment: Environment) -> TunnelConfig {
    let config = test_config(environment);
    TunnelConfig::from_section(
        &config.tunnel,
        resolver.reference(environment, CredentialKind::PrivateKey),
        resolver.reference(environment, CredentialKind::PresharedKey),
    )
}

#[tokio::test]
async fn test_full_lifecycle_never_logs_keys() {
    let capture = LogCapture::default();
    let _guard = capture.install();

    let mut config = test_config(Environment::Dev);
    config.roles = vec![shell_role("document-store", "exec sleep 30", &[])];

    let controller = LifecycleController::new(config, common::all_secrets(), FakeDriver::new()).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut states = controller.state_receiver();

    let (outcome, ()) = tokio::join!(controller.run(rx), async {
        wait_for_state(&mut states, LifecycleState::Running, Duration::from_secs(20)).await;
        tx.send(TerminationSignal::Terminate).unwrap();
    });
    assert_eq!(outcome.exit_code, ExitCode::Clean);

    let logs = capture.contents();
    assert!(logs.contains("Credentials resolved"), "capture is not receiving events");
    assert!(logs.contains("Tunnel established"));
    assert!(!logs.contains(KEY_A));
    assert!(!logs.contains(KEY_B));
}

#[tokio::test]
async fn test_malformed_key_is_not_echoed() {
    let capture = LogCapture::default();
    let _guard = capture.install();

    let source = StaticSource::new()
        .with("WG_PRIVATE_KEY_DEV", MALFORMED_KEY)
        .with("WG_PRESHARED_KEY_DEV", KEY_B);
    let mut config = test_config(Environment::Dev);
    config.roles = vec![shell_role("document-store", "exec sleep 30", &[])];

    let controller = LifecycleController::new(config, source, FakeDriver::new()).unwrap();
    let (_tx, rx) = mpsc::unbounded_channel();
    let outcome = controller.run(rx).await;

    assert_eq!(outcome.exit_code, ExitCode::Configuration);
    let error = outcome.error.expect("error recorded");
    let display = error.to_string();
    let debug = format!("{:?}", error);
    let report = serde_json::to_string(&error.report()).unwrap();

    assert!(display.contains("WG_PRIVATE_KEY_DEV"));
    for text in [&display, &debug, &report, &capture.contents()] {
        assert!(!text.contains(MALFORMED_KEY));
        assert!(!text.contains(KEY_B));
    }
}

#[tokio::test]
async fn test_credential_debug_is_redacted() {
    let resolver = SecretResolver::new(common::all_secrets(), SecretsConfig::default());
    let credentials = resolver.resolve(Environment::Dev).unwrap();

    let debug = format!("{:?}", credentials);
    assert!(!debug.contains(KEY_A));
    assert!(!debug.contains(KEY_B));
    assert!(!credentials.is_consumed());
}

#[tokio::test]
async fn test_dry_run_operations_carry_no_keys() {
    let resolver = SecretResolver::new(common::all_secrets(), SecretsConfig::default());
    let config = tunnel_config(&resolver, Environment::Dev);
    let driver = Arc::new(DryRunDriver::default());
    let manager = TunnelManager::new(driver.clone());

    let handle = manager
        .bring_up(&config, resolver.resolve(Environment::Dev).unwrap())
        .await
        .unwrap();
    manager.tear_down(&handle).await.unwrap();

    let operations = driver.operations();
    assert!(operations.iter().any(|op| op.starts_with("private-key ")));
    for op in &operations {
        assert!(!op.contains(KEY_A), "key leaked into {}", op);
        assert!(!op.contains(KEY_B), "key leaked into {}", op);
    }
}

#[tokio::test]
async fn test_teardown_twice_deletes_once() {
    let resolver = SecretResolver::new(common::all_secrets(), SecretsConfig::default());
    let config = tunnel_config(&resolver, Environment::Prod);
    let driver = FakeDriver::new();
    let manager = TunnelManager::new(driver.clone());

    let handle = manager
        .bring_up(&config, resolver.resolve(Environment::Prod).unwrap())
        .await
        .unwrap();
    assert!(handle.is_up());

    manager.tear_down(&handle).await.unwrap();
    manager.tear_down(&handle).await.unwrap();

    assert!(!handle.is_up());
    assert_eq!(driver.deletes(), 1);
    assert!(!driver.has_link(handle.interface()));
}

#[tokio::test]
async fn test_children_do_not_inherit_key_variables() {
    // Only this test touches the variable.
    std::env::set_var("WG_PRIVATE_KEY_DEV", KEY_A);

    let mut config = test_config(Environment::Dev);
    let mut role = shell_role("env-check", "test -z \"$WG_PRIVATE_KEY_DEV\"", &[]);
    role.restart = RestartPolicy::Never;
    config.roles = vec![role];

    let controller = LifecycleController::new(config, common::all_secrets(), FakeDriver::new()).unwrap();
    let supervisor = controller.supervisor().clone();
    supervisor.start("env-check").await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let handle = loop {
        let handle = supervisor.snapshot("env-check").unwrap();
        if handle.state.is_terminal() {
            break handle;
        }
        assert!(tokio::time::Instant::now() < deadline, "env-check never exited");
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    std::env::remove_var("WG_PRIVATE_KEY_DEV");
    assert_eq!(handle.state, ProcessState::Stopped, "key variable reached the child");
    assert_eq!(handle.last_exit_code, Some(0));
}
