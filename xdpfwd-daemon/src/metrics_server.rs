//! Prometheus exporter for the engine's traffic, rule reload, and audit
//! metrics (`xdpfwd_*`, see `xdpfwd_core::metrics`).
//!
//! Every series carries an `interface` label naming the attach interface,
//! so several xdpfwd instances on one host can share a scrape config.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use xdpfwd_core::config::MetricsConfig;
use xdpfwd_core::metrics::{LABEL_INTERFACE, describe_all};

/// Only path served by the built-in listener.
const METRICS_ENDPOINT: &str = "/metrics";

/// Resolve the scrape address from `[metrics]`.
///
/// `listen_addr` is a bare IP (v4 or v6); the port comes from `port`.
pub fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    if config.endpoint != METRICS_ENDPOINT {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '{METRICS_ENDPOINT}' is served",
            config.endpoint
        ));
    }

    let ip: IpAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid metrics listen address '{}'", config.listen_addr))?;
    Ok(SocketAddr::new(ip, config.port))
}

/// Exporter builder with the per-interface global label.
pub fn exporter(interface: &str) -> PrometheusBuilder {
    PrometheusBuilder::new().add_global_label(LABEL_INTERFACE, interface)
}

/// Install the global recorder and start the scrape listener.
///
/// Call once per process, before the engine starts publishing. Returns the
/// bound address.
///
/// # Errors
///
/// Fails on an invalid `[metrics]` section, a bind failure, or when a
/// global recorder is already installed.
pub fn install_metrics_recorder(config: &MetricsConfig, interface: &str) -> Result<SocketAddr> {
    let addr = listen_addr(config)?;
    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }

    exporter(interface)
        .with_http_listener(addr)
        .install()
        .context("failed to install metrics recorder")?;
    describe_all();

    tracing::info!(listen_addr = %addr, interface, "Prometheus metrics endpoint active");
    Ok(addr)
}
