//! Process supervisor integration tests.
//!
//! These spawn real `sh` children. Backoff and polling are shortened so
//! crash loops finish in well under a second.

mod common;

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tunnel_supervisor::health::probe::{FlagProbe, TcpProbe};
use tunnel_supervisor::resilience::Backoff;
use tunnel_supervisor::supervisor::{
    ProcessHandle, ProcessState, ProcessSupervisor, RestartLimits, RestartPolicy, ServiceRole, SupervisorError,
    SupervisorSettings,
};

fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        dependency_timeout: Duration::from_secs(5),
        grace_period: Duration::from_secs(2),
        readiness_poll: Duration::from_millis(10),
        probe_timeout: Duration::from_millis(200),
        restart: RestartLimits {
            backoff: Backoff::from_millis(10, 50),
            ..RestartLimits::default()
        },
        ..SupervisorSettings::default()
    }
}

fn sh(name: &str, script: &str) -> ServiceRole {
    ServiceRole::new(name, "sh").args(["-c", script])
}

/// Wait until `role` satisfies `predicate`, via the transition stream.
async fn wait_for_role<F>(supervisor: &ProcessSupervisor, role: &str, timeout: Duration, predicate: F) -> ProcessHandle
where
    F: Fn(&ProcessHandle) -> bool,
{
    let transitions = supervisor.observe();
    tokio::pin!(transitions);

    let found = tokio::time::timeout(timeout, async {
        while let Some(handle) = transitions.next().await {
            if handle.role == role && predicate(&handle) {
                return Some(handle);
            }
        }
        None
    })
    .await;

    match found {
        Ok(Some(handle)) => handle,
        _ => panic!("role {} did not reach the expected state within {:?}", role, timeout),
    }
}

#[tokio::test]
async fn test_roles_start_in_dependency_order() {
    let supervisor = ProcessSupervisor::new(fast_settings());

    // Registered in reverse on purpose.
    supervisor
        .register(sh("reverse-proxy", "exec sleep 30").depends_on("app-server"))
        .unwrap();
    supervisor
        .register(sh("app-server", "exec sleep 30").depends_on("document-store"))
        .unwrap();
    supervisor.register(sh("document-store", "exec sleep 30")).unwrap();

    let transitions = supervisor.observe();
    let collector = tokio::spawn(async move {
        tokio::pin!(transitions);
        let mut events = Vec::new();
        let mut ready = 0;
        while let Some(handle) = transitions.next().await {
            if handle.state == ProcessState::Ready {
                ready += 1;
            }
            events.push((handle.role.clone(), handle.state, handle.pid));
            if ready == 3 {
                break;
            }
        }
        events
    });

    supervisor.start_all().await.unwrap();
    let events = tokio::time::timeout(Duration::from_secs(10), collector)
        .await
        .expect("all roles ready")
        .unwrap();

    assert_eq!(supervisor.start_order(), vec!["document-store", "app-server", "reverse-proxy"]);

    let index_of = |role: &str, state: ProcessState| {
        events
            .iter()
            .position(|(r, s, pid)| r == role && *s == state && (state != ProcessState::Starting || pid.is_some()))
            .unwrap_or_else(|| panic!("no {} event for {}", state, role))
    };

    // A role is only spawned after its dependency reported ready.
    assert!(index_of("document-store", ProcessState::Ready) < index_of("app-server", ProcessState::Starting));
    assert!(index_of("app-server", ProcessState::Ready) < index_of("reverse-proxy", ProcessState::Starting));

    supervisor.stop_all().await;
    for handle in supervisor.snapshots() {
        assert_eq!(handle.state, ProcessState::Stopped, "{} not stopped", handle.role);
    }
}

#[tokio::test]
async fn test_dependency_timeout_leaves_role_pending() {
    let settings = SupervisorSettings {
        dependency_timeout: Duration::from_millis(300),
        ..fast_settings()
    };
    let supervisor = ProcessSupervisor::new(settings);

    let never_ready = FlagProbe::default();
    supervisor
        .register(sh("document-store", "exec sleep 30").probe(Arc::new(never_ready)))
        .unwrap();
    supervisor
        .register(sh("app-server", "exec sleep 30").depends_on("document-store"))
        .unwrap();

    supervisor.start("document-store").await.unwrap();
    let started = Instant::now();
    let err = supervisor.start("app-server").await.unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(300));
    match &err {
        SupervisorError::DependencyTimeout { role, dependency, .. } => {
            assert_eq!(role, "app-server");
            assert_eq!(dependency, "document-store");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.is_dependency());

    let handle = supervisor.snapshot("app-server").unwrap();
    assert_eq!(handle.state, ProcessState::Pending);
    assert!(handle.pid.is_none());

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_dependency_becoming_ready_unblocks_start() {
    let supervisor = ProcessSupervisor::new(fast_settings());

    let flag = FlagProbe::default();
    supervisor
        .register(sh("document-store", "exec sleep 30").probe(Arc::new(flag.clone())))
        .unwrap();
    supervisor
        .register(sh("app-server", "exec sleep 30").depends_on("document-store"))
        .unwrap();

    supervisor.start("document-store").await.unwrap();

    let flip = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        flag.set(true);
    });

    supervisor.start("app-server").await.unwrap();
    flip.await.unwrap();

    assert!(supervisor.snapshot("document-store").unwrap().is_ready());
    assert!(supervisor.snapshot("app-server").unwrap().pid.is_some());

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_tcp_probe_gates_readiness() {
    let addr = common::unused_address().await;
    let supervisor = ProcessSupervisor::new(fast_settings());
    supervisor
        .register(sh("document-store", "exec sleep 30").probe(Arc::new(TcpProbe::new(addr.to_string()))))
        .unwrap();

    supervisor.start("document-store").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(supervisor.snapshot("document-store").unwrap().state, ProcessState::Starting);

    let listener = common::start_listener(addr).await;
    wait_for_role(&supervisor, "document-store", Duration::from_secs(5), |h| h.is_ready()).await;

    listener.abort();
    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_sixth_crash_marks_role_failed() {
    let supervisor = ProcessSupervisor::new(fast_settings());
    supervisor
        .register(sh("app-server", "exit 1").restart(RestartPolicy::OnFailure))
        .unwrap();

    supervisor.start("app-server").await.unwrap();
    let failed = wait_for_role(&supervisor, "app-server", Duration::from_secs(10), |h| {
        h.state == ProcessState::Failed
    })
    .await;

    assert_eq!(failed.restart_count, 5);
    assert_eq!(failed.last_exit_code, Some(1));
    assert!(failed.pid.is_none());

    // No further restarts once failed.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(supervisor.snapshot("app-server").unwrap().restart_count, 5);

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_always_restarts_after_clean_exit() {
    let supervisor = ProcessSupervisor::new(fast_settings());
    supervisor
        .register(sh("worker", "exit 0").restart(RestartPolicy::Always))
        .unwrap();

    supervisor.start("worker").await.unwrap();
    let handle = wait_for_role(&supervisor, "worker", Duration::from_secs(10), |h| h.restart_count >= 7).await;
    assert_ne!(handle.state, ProcessState::Failed);
    assert_eq!(handle.last_exit_code, Some(0));

    supervisor.stop("worker").await;
    assert_eq!(supervisor.snapshot("worker").unwrap().state, ProcessState::Stopped);
}

/// Record every transition until `role` reports Failed.
fn collect_until_failed(
    supervisor: &ProcessSupervisor,
    role: &'static str,
) -> tokio::task::JoinHandle<Vec<(String, ProcessState, Option<u32>)>> {
    let transitions = supervisor.observe();
    tokio::spawn(async move {
        tokio::pin!(transitions);
        let mut events = Vec::new();
        while let Some(handle) = transitions.next().await {
            let done = handle.role == role && handle.state == ProcessState::Failed;
            events.push((handle.role, handle.state, handle.pid));
            if done {
                break;
            }
        }
        events
    })
}

#[tokio::test]
async fn test_restart_fails_when_dependency_stops() {
    let supervisor = ProcessSupervisor::new(fast_settings());
    supervisor.register(sh("document-store", "exec sleep 30")).unwrap();
    supervisor
        .register(
            sh("app-server", "sleep 0.05; exit 0")
                .depends_on("document-store")
                .restart(RestartPolicy::Always),
        )
        .unwrap();

    let collector = collect_until_failed(&supervisor, "app-server");
    supervisor.start_all().await.unwrap();
    wait_for_role(&supervisor, "app-server", Duration::from_secs(5), |h| h.restart_count >= 2).await;

    supervisor.stop("document-store").await;
    let events = tokio::time::timeout(Duration::from_secs(10), collector)
        .await
        .expect("app-server failed after losing its dependency")
        .unwrap();

    let stopped_at = events
        .iter()
        .position(|(role, state, _)| role == "document-store" && *state == ProcessState::Stopped)
        .expect("document-store stopped");
    let respawned_after = events[stopped_at..]
        .iter()
        .any(|(role, state, pid)| role == "app-server" && *state == ProcessState::Starting && pid.is_some());
    assert!(!respawned_after, "app-server respawned without its dependency: {:?}", events);

    let handle = supervisor.snapshot("app-server").unwrap();
    assert_eq!(handle.state, ProcessState::Failed);
    assert!(handle.pid.is_none());

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_respawn_waits_for_crashing_dependency() {
    let settings = SupervisorSettings {
        restart: RestartLimits {
            backoff: Backoff::from_millis(200, 300),
            ..RestartLimits::default()
        },
        ..fast_settings()
    };
    let supervisor = ProcessSupervisor::new(settings);
    supervisor
        .register(sh("document-store", "sleep 0.5; exit 1").restart(RestartPolicy::OnFailure))
        .unwrap();
    supervisor
        .register(
            sh("app-server", "exit 1")
                .depends_on("document-store")
                .restart(RestartPolicy::Always),
        )
        .unwrap();

    let collector = collect_until_failed(&supervisor, "app-server");
    supervisor.start_all().await.unwrap();
    let events = tokio::time::timeout(Duration::from_secs(20), collector)
        .await
        .expect("app-server failed once document-store gave up")
        .unwrap();

    // Every app-server spawn happens while document-store is ready.
    let mut store = ProcessState::Pending;
    let mut spawns = 0;
    for (role, state, pid) in &events {
        match role.as_str() {
            "document-store" => store = *state,
            "app-server" if *state == ProcessState::Starting && pid.is_some() => {
                assert_eq!(store, ProcessState::Ready, "app-server spawned beside a {} dependency", store);
                spawns += 1;
            }
            _ => {}
        }
    }
    assert!(spawns >= 2, "app-server spawned only {} times", spawns);
    assert_eq!(supervisor.snapshot("document-store").unwrap().state, ProcessState::Failed);

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_clean_exit_under_on_failure_stops() {
    let supervisor = ProcessSupervisor::new(fast_settings());
    supervisor.register(sh("migrate", "exit 0")).unwrap();

    supervisor.start("migrate").await.unwrap();
    let handle = wait_for_role(&supervisor, "migrate", Duration::from_secs(5), |h| {
        h.state == ProcessState::Stopped
    })
    .await;

    assert_eq!(handle.restart_count, 0);
    assert_eq!(handle.last_exit_code, Some(0));
}

#[tokio::test]
async fn test_never_policy_failure_is_terminal() {
    let supervisor = ProcessSupervisor::new(fast_settings());
    supervisor
        .register(sh("oneshot", "exit 7").restart(RestartPolicy::Never))
        .unwrap();

    supervisor.start("oneshot").await.unwrap();
    let handle = wait_for_role(&supervisor, "oneshot", Duration::from_secs(5), |h| {
        h.state.is_terminal()
    })
    .await;

    assert_eq!(handle.state, ProcessState::Failed);
    assert_eq!(handle.restart_count, 0);
    assert_eq!(handle.last_exit_code, Some(7));
}

#[tokio::test]
async fn test_stop_kills_after_grace_period() {
    let settings = SupervisorSettings {
        grace_period: Duration::from_millis(300),
        ..fast_settings()
    };
    let supervisor = ProcessSupervisor::new(settings);
    // The ignored TERM disposition survives the exec.
    supervisor
        .register(sh("stubborn", "trap '' TERM; exec sleep 30"))
        .unwrap();

    supervisor.start("stubborn").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    supervisor.stop("stubborn").await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(300), "stopped too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "stop took {:?}", elapsed);

    let handle = supervisor.snapshot("stubborn").unwrap();
    assert_eq!(handle.state, ProcessState::Stopped);
    assert_eq!(handle.last_exit_code, Some(128 + 9));
}

#[tokio::test]
async fn test_stop_graceful_exit_before_grace_period() {
    let settings = SupervisorSettings {
        grace_period: Duration::from_secs(10),
        ..fast_settings()
    };
    let supervisor = ProcessSupervisor::new(settings);
    supervisor.register(sh("polite", "exec sleep 30")).unwrap();

    supervisor.start("polite").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    supervisor.stop("polite").await;
    assert!(started.elapsed() < Duration::from_secs(5));

    let handle = supervisor.snapshot("polite").unwrap();
    assert_eq!(handle.state, ProcessState::Stopped);
    assert_eq!(handle.last_exit_code, Some(128 + 15));
}

#[tokio::test]
async fn test_escalate_skips_remaining_grace() {
    let settings = SupervisorSettings {
        grace_period: Duration::from_secs(30),
        ..fast_settings()
    };
    let supervisor = ProcessSupervisor::new(settings);
    supervisor
        .register(sh("stubborn", "trap '' TERM; exec sleep 30"))
        .unwrap();

    supervisor.start("stubborn").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stopper = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.stop("stubborn").await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    supervisor.escalate();

    tokio::time::timeout(Duration::from_secs(5), stopper)
        .await
        .expect("escalation ends the stop")
        .unwrap();
    assert_eq!(supervisor.snapshot("stubborn").unwrap().state, ProcessState::Stopped);
}

#[tokio::test]
async fn test_spawn_failure_reports_role() {
    let supervisor = ProcessSupervisor::new(fast_settings());
    supervisor
        .register(ServiceRole::new("ghost", "/nonexistent/binary/for-tests"))
        .unwrap();

    let err = supervisor.start_all().await.unwrap_err();
    assert_eq!(err.role(), Some("ghost"));
    assert_eq!(supervisor.snapshot("ghost").unwrap().state, ProcessState::Failed);
}

#[tokio::test]
async fn test_stop_all_reverses_start_order() {
    let supervisor = ProcessSupervisor::new(fast_settings());
    supervisor.register(sh("document-store", "exec sleep 30")).unwrap();
    supervisor
        .register(sh("app-server", "exec sleep 30").depends_on("document-store"))
        .unwrap();
    supervisor
        .register(sh("reverse-proxy", "exec sleep 30").depends_on("app-server"))
        .unwrap();

    supervisor.start_all().await.unwrap();
    wait_for_role(&supervisor, "reverse-proxy", Duration::from_secs(5), |h| h.is_ready()).await;

    let transitions = supervisor.observe();
    let collector = tokio::spawn(async move {
        tokio::pin!(transitions);
        let mut stopped = Vec::new();
        while let Some(handle) = transitions.next().await {
            if handle.state == ProcessState::Stopped {
                stopped.push(handle.role);
                if stopped.len() == 3 {
                    break;
                }
            }
        }
        stopped
    });

    supervisor.stop_all().await;
    let stopped = tokio::time::timeout(Duration::from_secs(5), collector)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stopped, vec!["reverse-proxy", "app-server", "document-store"]);
}
