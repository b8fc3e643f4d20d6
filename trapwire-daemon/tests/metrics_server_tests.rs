//! Integration tests for metrics server configuration handling.
//!
//! Only one global recorder can be installed per process, so the
//! successful install is exercised once and the rest check validation.

use serial_test::serial;
use trapwire_core::config::MetricsConfig;
use trapwire_daemon::metrics_server;

fn metrics_config(listen_addr: &str, port: u16, endpoint: &str) -> MetricsConfig {
    MetricsConfig {
        enabled: true,
        listen_addr: listen_addr.to_owned(),
        port,
        endpoint: endpoint.to_owned(),
    }
}

#[test]
fn test_listen_addr_parses_valid_config() {
    let addr = metrics_server::listen_addr(&metrics_config("127.0.0.1", 19100, "/metrics"))
        .expect("valid address");
    assert_eq!(addr.to_string(), "127.0.0.1:19100");
}

#[test]
fn test_listen_addr_rejects_invalid_ip() {
    let result = metrics_server::listen_addr(&metrics_config("999.999.999.999", 9100, "/metrics"));
    assert!(result.is_err());
}

#[test]
fn test_listen_addr_rejects_unsupported_endpoint() {
    let err = metrics_server::listen_addr(&metrics_config("127.0.0.1", 9100, "/custom"))
        .unwrap_err();
    assert!(err.to_string().contains("unsupported metrics endpoint"));
}

#[tokio::test]
#[serial]
async fn test_install_metrics_recorder_once() {
    let config = metrics_config("127.0.0.1", 0, "/metrics");

    let first = metrics_server::install_metrics_recorder(&config);
    assert!(first.is_ok(), "first install should succeed: {:?}", first.err());

    let second = metrics_server::install_metrics_recorder(&config);
    assert!(second.is_err(), "a second global recorder must be refused");
}

#[test]
#[serial]
fn test_install_metrics_recorder_fails_with_invalid_address() {
    let result =
        metrics_server::install_metrics_recorder(&metrics_config("not-an-ip", 9100, "/metrics"));
    assert!(result.is_err());
}
