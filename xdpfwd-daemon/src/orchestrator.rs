//! Datapath orchestration -- config loading, backend selection, and
//! signal-driven lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `xdpfwd`. It loads
//! configuration, picks the datapath backend (`xdp.backend`), and runs the
//! engine until a signal arrives or the configured duration elapses.
//!
//! The config file doubles as the rule source: its `default_action` and
//! `[[rules]]` entries are watched for changes while the engine runs.
//!
//! # Shutdown
//!
//! `SIGINT`/`SIGTERM` only cancel the engine's token. The engine then drains
//! pending audit records, detaches the classifier, and removes its pins
//! before [`Orchestrator::run`] returns.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use xdpfwd_core::config::{ConfigOverrides, XdpFwdConfig};
use xdpfwd_core::types::DatapathKind;
use xdpfwd_engine::sync::RuleSource;
use xdpfwd_engine::{
    Datapath, EmulatedDatapath, Engine, EngineSettings, FileRuleSource, RuleSet, RunSummary,
};

use crate::metrics_server;

/// Interface index the emulated backend assigns to the attach interface.
pub const EMULATED_IFINDEX: u32 = 1;

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: XdpFwdConfig,
    /// Config file path, also used as the rule source.
    config_path: PathBuf,
}

impl Orchestrator {
    /// Load configuration, apply CLI overrides, and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed,
    /// or the resulting configuration fails validation.
    pub fn build(config_path: &Path, overrides: &ConfigOverrides) -> Result<Self> {
        let config = load_config(config_path, overrides)?;
        Self::build_from_config(config, config_path)
    }

    /// Build from an already-loaded configuration.
    pub fn build_from_config(config: XdpFwdConfig, config_path: impl Into<PathBuf>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        Ok(Self {
            config,
            config_path: config_path.into(),
        })
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &XdpFwdConfig {
        &self.config
    }

    /// Engine settings derived from the configuration.
    pub fn settings(&self) -> EngineSettings {
        EngineSettings::from_core(&self.config)
    }

    /// Rule source backed by the config file.
    pub fn rule_source(&self) -> FileRuleSource {
        FileRuleSource::new(&self.config_path)
    }

    /// Run the configured backend until a shutdown signal or the run
    /// duration elapses.
    ///
    /// Installs the Prometheus exporter first when `[metrics]` is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the exporter or signal handlers cannot be
    /// installed, or the engine stops on a fatal error (load, attach, or
    /// table access).
    pub async fn run(&self) -> Result<RunSummary> {
        if self.config.metrics.enabled {
            metrics_server::install_metrics_recorder(
                &self.config.metrics,
                &self.config.xdp.interface,
            )?;
        }

        let cancel = CancellationToken::new();
        let signals = ShutdownSignals::install()?;
        let signal_task = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let signal = signals.recv().await;
                tracing::info!(signal, "shutdown signal received");
                cancel.cancel();
            }
        });

        let result = match self.config.xdp.backend {
            DatapathKind::Kernel => self.run_kernel(cancel).await,
            DatapathKind::Emulated => {
                let datapath = self.emulated_datapath();
                self.run_with(datapath, cancel).await
            }
        };

        signal_task.abort();
        result
    }

    /// Run the engine on the given datapath with an external cancel token.
    pub async fn run_with<D: Datapath>(
        &self,
        datapath: D,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        tracing::info!(
            backend = datapath.name(),
            interface = %self.config.xdp.interface,
            config = %self.config_path.display(),
            "starting xdpfwd"
        );

        let engine = Engine::builder(datapath, self.rule_source())
            .settings(self.settings())
            .build()
            .context("failed to build engine")?;

        let summary = engine.run(cancel).await.context("engine stopped")?;
        Ok(summary)
    }

    #[cfg(target_os = "linux")]
    async fn run_kernel(&self, cancel: CancellationToken) -> Result<RunSummary> {
        let datapath = xdpfwd_engine::KernelDatapath::new(&self.config.xdp.object_path);
        self.run_with(datapath, cancel).await
    }

    #[cfg(not(target_os = "linux"))]
    async fn run_kernel(&self, _cancel: CancellationToken) -> Result<RunSummary> {
        Err(anyhow::anyhow!(
            "the kernel backend requires Linux; set xdp.backend = \"emulated\""
        ))
    }

    /// Build the in-process backend.
    ///
    /// The attach interface gets [`EMULATED_IFINDEX`]. Redirect interfaces
    /// named by the current rules get the following indexes in declaration
    /// order, so a rule file that compiles against the host also compiles
    /// here.
    pub fn emulated_datapath(&self) -> EmulatedDatapath {
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
        let mut builder = EmulatedDatapath::builder()
            .cpus(cpus)
            .rule_capacity(self.config.xdp.rule_capacity)
            .interface(&self.config.xdp.interface, EMULATED_IFINDEX);

        match self.rule_source().load() {
            Ok(rules) => {
                for (ifindex, name) in (EMULATED_IFINDEX + 1..).zip(redirect_interfaces(&rules)) {
                    builder = builder.interface(name, ifindex);
                }
            }
            // The engine reports the same failure when it loads the rules.
            Err(e) => tracing::debug!(error = %e, "no redirect interfaces for emulated datapath"),
        }

        builder.build()
    }

    /// Render the effective configuration and rule set as TOML (`--list`).
    pub fn render_listing(&self) -> Result<String> {
        let rules = self
            .rule_source()
            .load()
            .with_context(|| format!("failed to load rules from {}", self.config_path.display()))?;

        let mut out = toml::to_string_pretty(&self.config).context("failed to render config")?;
        out.push('\n');
        out.push_str(&toml::to_string_pretty(&rules).context("failed to render rules")?);
        Ok(out)
    }
}

/// Load the config file, then apply environment and CLI overrides in that
/// order and validate the result.
pub fn load_config(config_path: &Path, overrides: &ConfigOverrides) -> Result<XdpFwdConfig> {
    let mut config = XdpFwdConfig::from_file(config_path)
        .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
    config.apply_env_overrides();
    config.apply_overrides(overrides);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
    Ok(config)
}

/// Distinct redirect interface names, in declaration order.
fn redirect_interfaces(rules: &RuleSet) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for name in rules
        .rules
        .iter()
        .filter_map(|rule| rule.redirect_interface.as_deref())
    {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Installed `SIGTERM`/`SIGINT` handlers.
struct ShutdownSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    /// Install the handlers up front so a failure surfaces before the
    /// datapath is attached.
    fn install() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;
        Ok(Self { sigterm, sigint })
    }

    /// Wait for a shutdown signal and return its name.
    async fn recv(mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }
}
