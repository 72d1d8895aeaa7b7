//! Health monitor and failover integration tests.

use std::sync::Arc;
use std::time::Duration;

use service_balancer::config::FailoverPairConfig;
use service_balancer::failover::FailoverKind;
use service_balancer::health::ProbeOutcome;
use service_balancer::registry::HealthStatus;
use service_balancer::{Balancer, BalancerError};

mod common;
use common::{config_with, ScriptedProbe, ScriptedUpstream};

fn paired_balancer() -> Balancer {
    let mut config = config_with(&["P", "B"]);
    config.failover.pairs.push(FailoverPairConfig {
        primary: "P".into(),
        backup: "B".into(),
    });
    Balancer::from_config(&config).unwrap()
}

#[tokio::test]
async fn test_failover_and_failback_through_monitor_cycles() {
    let balancer = paired_balancer();
    let probe = Arc::new(ScriptedProbe::default());
    let monitor = balancer.health_monitor(probe.clone()).unwrap();
    let upstream = ScriptedUpstream::default();

    balancer.dispatch(&upstream).await.unwrap();
    assert_eq!(upstream.calls(), vec!["P"]);

    probe.fail("P");
    monitor.check_once().await;
    monitor.check_once().await;
    assert_eq!(balancer.failover().active_target("P").as_deref(), Some("P"));
    monitor.check_once().await;
    assert_eq!(balancer.registry().get("P").unwrap().health(), HealthStatus::Unhealthy);
    assert_eq!(balancer.failover().active_target("P").as_deref(), Some("B"));

    assert_eq!(balancer.dispatch(&upstream).await.unwrap().instance, "B");

    // Recovery needs two passing probes, failback three healthy checks after that.
    probe.pass("P");
    monitor.check_once().await;
    monitor.check_once().await;
    assert_eq!(balancer.registry().get("P").unwrap().health(), HealthStatus::Healthy);
    monitor.check_once().await;
    assert_eq!(balancer.failover().active_target("P").as_deref(), Some("B"));
    assert_eq!(balancer.dispatch(&upstream).await.unwrap().instance, "B");

    monitor.check_once().await;
    assert_eq!(balancer.failover().active_target("P").as_deref(), Some("P"));
    assert_eq!(balancer.dispatch(&upstream).await.unwrap().instance, "P");

    let history = balancer.failover().get_failover_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, FailoverKind::Failover);
    assert_eq!(history[0].reason, "primary unhealthy");
    assert_eq!(history[1].kind, FailoverKind::Failback);
    assert_eq!(history[1].reason, "failback");
}

#[tokio::test]
async fn test_both_members_down_fails_selection() {
    let balancer = paired_balancer();
    let probe = Arc::new(ScriptedProbe::default());
    let monitor = balancer.health_monitor(probe.clone()).unwrap();
    probe.fail("P");
    probe.fail("B");

    for _ in 0..3 {
        monitor.check_once().await;
    }
    assert_eq!(balancer.failover().active_target("P").as_deref(), Some("P"));
    assert_eq!(balancer.failover().stats().stalled, 1);
    assert_eq!(
        balancer.select_instance().unwrap_err(),
        BalancerError::NoHealthyInstance
    );
}

#[tokio::test]
async fn test_removed_primary_leaves_backup_selectable() {
    let balancer = paired_balancer();
    let probe = Arc::new(ScriptedProbe::default());
    let monitor = balancer.health_monitor(probe.clone()).unwrap();
    let upstream = ScriptedUpstream::default();

    balancer.remove_instance("P").unwrap();
    for _ in 0..5 {
        monitor.check_once().await;
    }

    assert!(balancer.failover().standby_ids().is_empty());
    assert_eq!(balancer.select_instance().unwrap().name(), "B");
    assert_eq!(balancer.dispatch(&upstream).await.unwrap().instance, "B");
}

#[tokio::test]
async fn test_removed_backup_after_failover_restores_primary() {
    let balancer = paired_balancer();
    balancer.set_health("P", HealthStatus::Unhealthy).unwrap();
    balancer.check_and_failover();
    assert_eq!(balancer.failover().active_target("P").as_deref(), Some("B"));

    balancer.remove_instance("B").unwrap();
    balancer.set_health("P", HealthStatus::Healthy).unwrap();
    assert_eq!(balancer.select_instance().unwrap().name(), "P");
}

#[tokio::test]
async fn test_degraded_instance_still_serves() {
    let balancer = Balancer::from_config(&config_with(&["A"])).unwrap();
    let probe = Arc::new(ScriptedProbe::default());
    let monitor = balancer.health_monitor(probe.clone()).unwrap();

    probe.set("A", ProbeOutcome::success(5_000.0));
    monitor.check_once().await;
    assert_eq!(balancer.registry().get("A").unwrap().health(), HealthStatus::Degraded);
    assert_eq!(balancer.select_instance().unwrap().name(), "A");

    let summary = monitor.summary();
    assert_eq!(summary.degraded, 1);
    assert_eq!(summary.healthy, 0);
}

#[tokio::test]
async fn test_spawned_monitor_fails_over_and_stops() {
    let balancer = paired_balancer();
    let probe = Arc::new(ScriptedProbe::default());
    let monitor = balancer.health_monitor(probe.clone()).unwrap();
    probe.fail("P");

    let handle = monitor.spawn();
    let mut switched = false;
    for _ in 0..200 {
        if balancer.failover().active_target("P").as_deref() == Some("B") {
            switched = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.stop().await;
    assert!(switched);

    let checked = balancer.registry().get("P").unwrap().consecutive_failures();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(balancer.registry().get("P").unwrap().consecutive_failures(), checked);
}
