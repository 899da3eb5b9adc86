//! Command-line surface (§6.5): every flag overrides the matching
//! [`crate::config::Config`] field when present, layered over a loaded
//! TOML file.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

/// The gateway daemon.
#[derive(Parser, Debug)]
#[command(name = "gatewayd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file to load before applying flag overrides.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listening address for the streaming engine.
    #[arg(long)]
    pub host: Option<String>,

    /// Listening port for the streaming engine.
    #[arg(long)]
    pub port: Option<u16>,

    /// Bind address for the signaling and rendezvous sockets.
    #[arg(long = "int-ip")]
    pub int_ip: Option<IpAddr>,

    /// Address advertised inside session descriptions.
    #[arg(long = "ext-ip")]
    pub ext_ip: Option<IpAddr>,

    /// Number of parallel scheduler processes.
    #[arg(long)]
    pub fork: Option<u32>,

    /// Disable the streaming engine, leaving only the rendezvous engine.
    #[arg(long = "no-rtmp")]
    pub no_rtmp: bool,

    /// Enable man-in-the-middle rendezvous mode (§4.5).
    #[arg(long)]
    pub middle: bool,

    /// The upstream rendezvous peer to re-terminate against when `--middle`
    /// is set.
    #[arg(long = "middle-upstream")]
    pub middle_upstream: Option<SocketAddr>,

    /// UDP port the SIP-style signaling transport binds on.
    #[arg(long = "signaling-port")]
    pub signaling_port: Option<u16>,

    /// Session-manager sweep interval, in seconds.
    #[arg(long = "freq-manage")]
    pub freq_manage: Option<u64>,

    /// Keepalive threshold with peers, in seconds.
    #[arg(long = "keep-alive-server")]
    pub keep_alive_server: Option<u64>,

    /// Keepalive interval advertised to peers, in seconds.
    #[arg(long = "keep-alive-peer")]
    pub keep_alive_peer: Option<u64>,

    /// Logging verbosity (overrides `RUST_LOG` when set).
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Merge this CLI invocation's flags over a loaded (or default)
    /// [`Config`], flags taking precedence.
    #[must_use]
    pub fn apply(self, mut config: Config) -> Config {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(int_ip) = self.int_ip {
            config.int_ip = int_ip;
        }
        if self.ext_ip.is_some() {
            config.ext_ip = self.ext_ip;
        }
        if let Some(fork) = self.fork {
            config.fork = fork;
        }
        if self.no_rtmp {
            config.no_rtmp = true;
        }
        if self.middle {
            config.middle = true;
        }
        if self.middle_upstream.is_some() {
            config.middle_upstream = self.middle_upstream;
        }
        if let Some(signaling_port) = self.signaling_port {
            config.signaling_port = signaling_port;
        }
        if let Some(freq_manage) = self.freq_manage {
            config.freq_manage = freq_manage;
        }
        if let Some(keep_alive_server) = self.keep_alive_server {
            config.keep_alive_server = keep_alive_server;
        }
        if let Some(keep_alive_peer) = self.keep_alive_peer {
            config.keep_alive_peer = keep_alive_peer;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_flags_leave_defaults_untouched() {
        let cli = Cli::parse_from(["gatewayd"]);
        let config = cli.apply(Config::default());
        assert_eq!(config.port, Config::default().port);
    }

    #[test]
    fn port_flag_overrides_default() {
        let cli = Cli::parse_from(["gatewayd", "--port", "8935"]);
        let config = cli.apply(Config::default());
        assert_eq!(config.port, 8935);
    }

    #[test]
    fn middle_upstream_flag_implies_middle_is_settable_independently() {
        let cli = Cli::parse_from(["gatewayd", "--middle-upstream", "203.0.113.9:1935"]);
        let config = cli.apply(Config::default());
        assert!(!config.middle);
        assert_eq!(config.middle_upstream.unwrap().port(), 1935);
    }
}
