//! Health aggregation tests.

use trapwire_core::pipeline::HealthStatus;
use trapwire_daemon::health::{ModuleHealth, aggregate_status};

fn module(name: &str, enabled: bool, status: HealthStatus) -> ModuleHealth {
    ModuleHealth {
        name: name.to_owned(),
        enabled,
        status,
    }
}

#[test]
fn test_aggregate_status_all_healthy() {
    let modules = vec![
        module("ingest", true, HealthStatus::Healthy),
        module("live-feed", true, HealthStatus::Healthy),
    ];

    assert!(aggregate_status(&modules).is_healthy());
}

#[test]
fn test_aggregate_status_one_degraded() {
    let modules = vec![
        module(
            "ingest",
            true,
            HealthStatus::Degraded("last batch write failed".to_owned()),
        ),
        module("live-feed", true, HealthStatus::Healthy),
    ];

    match aggregate_status(&modules) {
        HealthStatus::Degraded(reason) => {
            assert!(reason.contains("ingest"), "reason should name the module");
            assert!(reason.contains("last batch write failed"));
        }
        other => panic!("expected Degraded, got: {other:?}"),
    }
}

#[test]
fn test_aggregate_status_unhealthy_wins_over_degraded() {
    let modules = vec![
        module("ingest", true, HealthStatus::Degraded("slow store".to_owned())),
        module(
            "live-feed",
            true,
            HealthStatus::Unhealthy("accept loop exited".to_owned()),
        ),
    ];

    match aggregate_status(&modules) {
        HealthStatus::Unhealthy(reason) => {
            assert!(reason.contains("live-feed: accept loop exited"));
            assert!(
                !reason.contains("slow store"),
                "degraded reasons are not mixed into an unhealthy report"
            );
        }
        other => panic!("expected Unhealthy, got: {other:?}"),
    }
}

#[test]
fn test_aggregate_status_ignores_disabled_modules() {
    let modules = vec![
        module("ingest", true, HealthStatus::Healthy),
        module(
            "live-feed",
            false,
            HealthStatus::Unhealthy("not running".to_owned()),
        ),
    ];

    assert!(aggregate_status(&modules).is_healthy());
}

#[test]
fn test_aggregate_status_joins_multiple_reasons() {
    let modules = vec![
        module("ingest", true, HealthStatus::Unhealthy("stopped".to_owned())),
        module("live-feed", true, HealthStatus::Unhealthy("not running".to_owned())),
    ];

    let HealthStatus::Unhealthy(reason) = aggregate_status(&modules) else {
        panic!("expected Unhealthy");
    };
    assert_eq!(reason, "ingest: stopped; live-feed: not running");
}

#[test]
fn test_aggregate_status_empty() {
    assert!(aggregate_status(&[]).is_healthy());
}
