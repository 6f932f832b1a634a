//! CLI argument definitions for xdpfwd.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.
//! Every flag maps onto a [`ConfigOverrides`] field, so flags win over the
//! config file and `XDPFWD_*` environment variables.

use std::path::PathBuf;

use clap::Parser;

use xdpfwd_core::config::{ConfigOverrides, DEFAULT_CONFIG_PATH};
use xdpfwd_core::types::AttachMode;

/// XDP forwarding/firewall daemon.
///
/// Loads the classifier onto an interface, keeps its rule table in sync with
/// the config file, and reports traffic statistics and audit records until
/// interrupted or the run duration elapses.
#[derive(Parser, Debug)]
#[command(name = "xdpfwd")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to the xdpfwd.toml configuration (also the rule source).
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Interface to attach the classifier to.
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Pin the rule tables under the configured pin directory.
    #[arg(short, long)]
    pub pin_maps: bool,

    /// Seconds between rule file change checks (0 disables reloads).
    #[arg(short, long, value_name = "SECS")]
    pub update_time: Option<u64>,

    /// Disable periodic traffic statistics.
    #[arg(short = 's', long)]
    pub no_stats: bool,

    /// Report per-second rates instead of cumulative totals.
    #[arg(long)]
    pub stats_per_second: bool,

    /// Main loop period in milliseconds.
    #[arg(long, value_name = "MS")]
    pub tick_ms: Option<u64>,

    /// Stop after this many seconds (0 runs until interrupted).
    #[arg(short, long, value_name = "SECS")]
    pub time: Option<u64>,

    /// Attach in generic (SKB) mode only.
    #[arg(long, conflicts_with = "offload")]
    pub skb: bool,

    /// Attach in hardware offload mode only.
    #[arg(long)]
    pub offload: bool,

    /// Print the effective configuration and rules, then exit.
    #[arg(short, long)]
    pub list: bool,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<String>,
}

impl DaemonCli {
    /// Collect the flags that were actually given.
    ///
    /// Boolean switches only override when set, so an absent `--pin-maps`
    /// leaves the file value alone.
    pub fn overrides(&self) -> ConfigOverrides {
        let attach_mode = if self.skb {
            Some(AttachMode::Generic)
        } else if self.offload {
            Some(AttachMode::Offload)
        } else {
            None
        };

        ConfigOverrides {
            log_level: self.log_level.clone(),
            log_format: self.log_format.clone(),
            log_file: self.log_file.clone(),
            interface: self.interface.clone(),
            pin_maps: self.pin_maps.then_some(true),
            update_time_secs: self.update_time,
            tick_ms: self.tick_ms,
            duration_secs: self.time,
            no_stats: self.no_stats.then_some(true),
            stats_per_second: self.stats_per_second.then_some(true),
            attach_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_produce_empty_overrides() {
        let cli = DaemonCli::try_parse_from(["xdpfwd"]).unwrap();

        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        let overrides = cli.overrides();
        assert!(overrides.interface.is_none());
        assert!(overrides.pin_maps.is_none());
        assert!(overrides.no_stats.is_none());
        assert!(overrides.attach_mode.is_none());
    }

    #[test]
    fn test_flags_map_to_overrides() {
        let cli = DaemonCli::try_parse_from([
            "xdpfwd",
            "--config",
            "/tmp/x.toml",
            "-i",
            "ens3",
            "--pin-maps",
            "--update-time",
            "5",
            "--no-stats",
            "--tick-ms",
            "250",
            "--time",
            "30",
            "--skb",
            "--log-file",
            "/var/log/xdpfwd.log",
        ])
        .unwrap();

        let overrides = cli.overrides();
        assert_eq!(overrides.interface.as_deref(), Some("ens3"));
        assert_eq!(overrides.pin_maps, Some(true));
        assert_eq!(overrides.update_time_secs, Some(5));
        assert_eq!(overrides.no_stats, Some(true));
        assert_eq!(overrides.tick_ms, Some(250));
        assert_eq!(overrides.duration_secs, Some(30));
        assert_eq!(overrides.attach_mode, Some(AttachMode::Generic));
        assert_eq!(overrides.log_file.as_deref(), Some("/var/log/xdpfwd.log"));
    }

    #[test]
    fn test_offload_pins_single_mode() {
        let cli = DaemonCli::try_parse_from(["xdpfwd", "--offload"]).unwrap();
        assert_eq!(cli.overrides().attach_mode, Some(AttachMode::Offload));
    }

    #[test]
    fn test_skb_and_offload_conflict() {
        let result = DaemonCli::try_parse_from(["xdpfwd", "--skb", "--offload"]);
        assert!(result.is_err());
    }
}
