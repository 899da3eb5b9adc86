//! The gateway's configuration surface (§6.5): a plain `serde`-derived
//! struct with `Default` impls, loadable from a TOML file and overridable
//! by [`crate::cli::Cli`] flags.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1935
}

fn default_int_ip() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_fork() -> u32 {
    1
}

fn default_freq_manage() -> u64 {
    2
}

fn default_keep_alive_server() -> u64 {
    120
}

fn default_keep_alive_peer() -> u64 {
    60
}

fn default_signaling_port() -> u16 {
    5070
}

fn default_media_port_start() -> u16 {
    16384
}

fn default_media_port_end() -> u16 {
    32768
}

fn default_media_port_retries() -> u32 {
    32
}

/// The full recognized option set of §6.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listening address for the streaming engine.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listening port for the streaming engine.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address for the signaling and media (rendezvous) sockets.
    #[serde(default = "default_int_ip")]
    pub int_ip: IpAddr,

    /// Address advertised inside session descriptions, when different from
    /// `int_ip` (e.g. behind NAT).
    pub ext_ip: Option<IpAddr>,

    /// Number of parallel scheduler processes.
    #[serde(default = "default_fork")]
    pub fork: u32,

    /// Disable the streaming engine, leaving only the rendezvous engine.
    #[serde(default)]
    pub no_rtmp: bool,

    /// Enable man-in-the-middle rendezvous mode (§4.5).
    #[serde(default)]
    pub middle: bool,

    /// The upstream rendezvous peer to re-terminate against when `middle`
    /// is set. Required for `middle` to do anything beyond completing the
    /// client-facing leg.
    pub middle_upstream: Option<std::net::SocketAddr>,

    /// UDP port the SIP-style signaling transport binds on `int_ip`,
    /// separate from the rendezvous port (§6.3).
    #[serde(default = "default_signaling_port")]
    pub signaling_port: u16,

    /// Session-manager sweep interval, in seconds.
    #[serde(default = "default_freq_manage")]
    pub freq_manage: u64,

    /// Keepalive interval with peers, in seconds (the threshold after
    /// which this server starts probing an idle session).
    #[serde(default = "default_keep_alive_server")]
    pub keep_alive_server: u64,

    /// Keepalive interval advertised to peers, in seconds.
    #[serde(default = "default_keep_alive_peer")]
    pub keep_alive_peer: u64,

    /// Logging verbosity passed to `tracing_subscriber`'s env filter when
    /// `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// First candidate port for a call's RTP media socket (§6.3 "media's
    /// port chosen even from a configurable range").
    #[serde(default = "default_media_port_start")]
    pub media_port_start: u16,

    /// Last candidate port for a call's RTP media socket.
    #[serde(default = "default_media_port_end")]
    pub media_port_end: u16,

    /// Maximum bind attempts before a call proceeds without a media leg.
    #[serde(default = "default_media_port_retries")]
    pub media_port_retries: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            int_ip: default_int_ip(),
            ext_ip: None,
            fork: default_fork(),
            no_rtmp: false,
            middle: false,
            middle_upstream: None,
            signaling_port: default_signaling_port(),
            freq_manage: default_freq_manage(),
            keep_alive_server: default_keep_alive_server(),
            keep_alive_peer: default_keep_alive_peer(),
            log_level: default_log_level(),
            media_port_start: default_media_port_start(),
            media_port_end: default_media_port_end(),
            media_port_retries: default_media_port_retries(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file can't be read or parsed.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::Config(e.to_string()))?;
        toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// The conventional config file location (`$XDG_CONFIG_HOME/gatewayd/config.toml`
    /// or its platform equivalent).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("gatewayd").join("config.toml"))
    }

    /// Load from [`Self::default_path`] if present, else fall back to
    /// [`Self::default`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file exists but fails to parse.
    pub fn load_or_default() -> Result<Self, Error> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// The streaming engine's listen address, combining `host` and `port`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `host` doesn't parse as an IP address.
    pub fn streaming_listen_addr(&self) -> Result<std::net::SocketAddr, Error> {
        let ip: IpAddr = self.host.parse().map_err(|_| Error::Config(format!("invalid host: {}", self.host)))?;
        Ok(std::net::SocketAddr::new(ip, self.port))
    }

    /// The rendezvous engine's bind address, on `port`.
    #[must_use]
    pub fn rendezvous_listen_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.int_ip, self.port)
    }

    /// The signaling transport's bind address, on `signaling_port`.
    #[must_use]
    pub fn signaling_listen_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.int_ip, self.signaling_port)
    }

    /// The address advertised in session descriptions: `ext_ip` if set,
    /// else `int_ip`.
    #[must_use]
    pub fn advertised_ip(&self) -> IpAddr {
        self.ext_ip.unwrap_or(self.int_ip)
    }

    /// This config's RTP media socket range/retry settings, as
    /// [`gw_signaling::RtpConfig`].
    #[must_use]
    pub fn rtp_config(&self) -> gw_signaling::RtpConfig {
        gw_signaling::RtpConfig {
            bind_ip: self.int_ip,
            port_range: self.media_port_start..=self.media_port_end,
            max_retries: self.media_port_retries,
        }
    }

    /// Validate cross-field invariants not expressible in the type alone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `fork` is zero or `host` doesn't parse.
    pub fn validate(&self) -> Result<(), Error> {
        if self.fork == 0 {
            return Err(Error::Config("fork must be at least 1".to_string()));
        }
        if self.freq_manage == 0 {
            return Err(Error::Config("freq-manage must be at least 1 second".to_string()));
        }
        self.streaming_listen_addr()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 1935);
        assert_eq!(config.fork, 1);
        assert_eq!(config.freq_manage, 2);
        assert!(!config.no_rtmp);
        assert!(!config.middle);
    }

    #[test]
    fn zero_fork_fails_validation() {
        let mut config = Config::default();
        config.fork = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trips() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.port, config.port);
    }

    #[test]
    fn ext_ip_overrides_advertised_address_when_set() {
        let mut config = Config::default();
        config.ext_ip = Some("203.0.113.5".parse().unwrap());
        assert_eq!(config.advertised_ip(), config.ext_ip.unwrap());
    }
}
