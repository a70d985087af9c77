use clap::Parser;

use crate::error::{Error, Result};

/// Command-line configuration for a single cluster node: `--listen
/// <port>`, `--backends <comma-separated peer URLs>`, `--hostname
/// <scheme://host>`.
///
/// `--backends` entries of the form `:PORT` (no host) are expanded to
/// `<hostname>:PORT`, matching how the original coursework harness
/// (`examples/original_source/proj4/backend.go:717-720`) launched every
/// node on one machine under per-process ports with a hardcoded
/// `http://localhost` hostname; this rewrite makes the hostname an
/// explicit flag instead.
#[derive(Parser, Debug, Clone)]
#[command(name = "raftkv-node", about = "A Raft-lite replicated short-URL service")]
pub struct Config {
    /// Port this node listens on, e.g. "8000".
    #[arg(long, default_value = "8000")]
    pub listen: String,

    /// Comma-separated peer addresses, e.g. "http://localhost:8002,:8003".
    #[arg(long, default_value = "")]
    pub backends: String,

    /// Scheme+host used as this node's own address and to expand bare
    /// `:PORT` peer entries, e.g. "http://localhost".
    #[arg(long, default_value = "http://localhost")]
    pub hostname: String,
}

impl Config {
    /// Validates `--listen` as a port number. An invalid port is a
    /// startup error (non-zero exit), not a wire-level failure.
    pub fn port(&self) -> Result<u16> {
        self.listen
            .parse::<u16>()
            .map_err(|_| Error::Invalid(format!("invalid port provided: {}", self.listen)))
    }

    /// The address this node's local TCP listener binds to.
    pub fn bind_addr(&self) -> Result<String> {
        Ok(format!("0.0.0.0:{}", self.port()?))
    }

    pub fn peers(&self) -> Vec<String> {
        self.backends
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| self.expand(s))
            .collect()
    }

    pub fn self_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.listen)
    }

    fn expand(&self, addr: &str) -> String {
        if addr.starts_with(':') {
            format!("{}{}", self.hostname, addr)
        } else {
            addr.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(listen: &str, backends: &str, hostname: &str) -> Config {
        Config { listen: listen.into(), backends: backends.into(), hostname: hostname.into() }
    }

    #[test]
    fn bare_port_peers_expand_against_hostname() {
        let c = cfg("8001", ":8002, http://10.0.0.5:8003", "http://localhost");
        assert_eq!(c.peers(), vec!["http://localhost:8002", "http://10.0.0.5:8003"]);
    }

    #[test]
    fn empty_backends_yields_no_peers() {
        assert!(cfg("8001", "", "http://localhost").peers().is_empty());
    }

    #[test]
    fn self_addr_combines_hostname_and_port() {
        assert_eq!(cfg("8001", "", "http://localhost").self_addr(), "http://localhost:8001");
    }

    #[test]
    fn invalid_port_is_rejected() {
        assert!(cfg("not-a-port", "", "http://localhost").port().is_err());
    }

    #[test]
    fn valid_port_parses() {
        assert_eq!(cfg("8001", "", "http://localhost").port().unwrap(), 8001);
    }
}
