//! Broker addresses and the wire (TCP or TLS) used to reach them.
//!
//! Accepted broker spellings: `host`, `host:port`, `[v6]:port`, optionally behind a
//! `mqtt://`, `tcp://`, `mqtts://` or `ssl://` scheme. Without a port the MQTT
//! defaults apply (1883 plain, 8883 TLS).

use anyhow::{anyhow, bail, Context, Result};
use rumqttc::Transport as Wire;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_PLAIN_PORT: u16 = 1883;
pub const DEFAULT_TLS_PORT: u16 = 8883;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl BrokerEndpoint {
    /// Parse `addr`. `force_tls` upgrades scheme-less and `mqtt://` addresses to TLS.
    pub fn parse(addr: &str, force_tls: bool) -> Result<Self> {
        let trimmed = addr.trim();
        let (tls_scheme, authority) = match trimmed.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => (false, rest),
            Some(("mqtts" | "ssl", rest)) => (true, rest),
            Some((scheme, _)) => bail!("broker '{}' uses unsupported scheme '{}'", addr, scheme),
            None => (false, trimmed),
        };
        let use_tls = tls_scheme || force_tls;
        let (host, port) = split_authority(authority)
            .with_context(|| format!("invalid broker address '{}'", addr))?;
        if host.is_empty() {
            bail!("broker '{}' has no host", addr);
        }
        let port = port.unwrap_or(if use_tls {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PLAIN_PORT
        });
        Ok(Self {
            host: host.to_string(),
            port,
            use_tls,
        })
    }

    /// `host:port`, bracketing IPv6 literals, for `ToSocketAddrs` and logs.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.use_tls { "mqtts" } else { "mqtt" };
        write!(f, "{}://{}", scheme, self.authority())
    }
}

fn split_authority(authority: &str) -> Result<(&str, Option<u16>)> {
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| anyhow!("unterminated IPv6 literal"))?;
        match tail {
            "" => (host, None),
            _ => {
                let port = tail
                    .strip_prefix(':')
                    .ok_or_else(|| anyhow!("unexpected '{}' after IPv6 literal", tail))?;
                (host, Some(port))
            }
        }
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };
    let port = port
        .map(|raw| raw.parse::<u16>().with_context(|| format!("bad port '{}'", raw)))
        .transpose()?;
    Ok((host, port))
}

/// Paths to PEM files for broker TLS, as they appear in config or on the command line.
#[derive(Clone, Debug, Default)]
pub struct TlsFiles {
    pub ca: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl TlsFiles {
    pub fn read(&self) -> Result<TlsMaterials> {
        let ca = self
            .ca
            .as_deref()
            .map(|path| read_pem(path, "CA certificate"))
            .transpose()?;
        let identity = match (&self.client_cert, &self.client_key) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some((
                read_pem(cert, "client certificate")?,
                read_pem(key, "client key")?,
            )),
            (Some(_), None) => bail!("client certificate configured without a client key"),
            (None, Some(_)) => bail!("client key configured without a client certificate"),
        };
        Ok(TlsMaterials { ca, identity })
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {} {}", what, path.display()))
}

/// PEM bytes loaded from `TlsFiles`.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    /// `None` trusts the bundled root store.
    pub ca: Option<Vec<u8>>,
    /// (certificate, key) for mutual TLS.
    pub identity: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn is_empty(&self) -> bool {
        self.ca.is_none() && self.identity.is_none()
    }

    /// The rumqttc wire for `endpoint`. Materials without TLS are a configuration error.
    pub fn wire(&self, endpoint: &BrokerEndpoint) -> Result<Wire> {
        match (endpoint.use_tls, &self.ca) {
            (false, _) if self.is_empty() => Ok(Wire::tcp()),
            (false, _) => bail!(
                "TLS files configured but broker {} is plain TCP (use mqtts:// or use_tls)",
                endpoint
            ),
            (true, None) if self.identity.is_none() => Ok(Wire::tls_with_default_config()),
            (true, None) => bail!("mutual TLS needs a CA certificate as well"),
            (true, Some(ca)) => Ok(Wire::tls(ca.clone(), self.identity.clone(), None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_default_port() {
        let ep = BrokerEndpoint::parse("broker.lan", false).unwrap();
        assert_eq!(ep.authority(), "broker.lan:1883");
        let ep = BrokerEndpoint::parse("broker.lan", true).unwrap();
        assert_eq!(ep.port, 8883);
        assert!(ep.use_tls);
    }

    #[test]
    fn scheme_selects_tls() {
        let ep = BrokerEndpoint::parse("ssl://10.1.1.9", false).unwrap();
        assert!(ep.use_tls);
        assert_eq!(ep.port, 8883);
        assert_eq!(ep.to_string(), "mqtts://10.1.1.9:8883");

        let ep = BrokerEndpoint::parse("tcp://10.1.1.9:1999", false).unwrap();
        assert!(!ep.use_tls);
        assert_eq!(ep.port, 1999);
    }

    #[test]
    fn ipv6_literals_keep_their_brackets() {
        let ep = BrokerEndpoint::parse("mqtt://[fe80::2]:1884", false).unwrap();
        assert_eq!(ep.host, "fe80::2");
        assert_eq!(ep.authority(), "[fe80::2]:1884");
        let ep = BrokerEndpoint::parse("[::1]", false).unwrap();
        assert_eq!(ep.port, 1883);
    }

    #[test]
    fn bad_addresses_are_rejected() {
        for addr in ["ws://broker:80", ":1883", "broker:65536", "[::1", "[::1]x", ""] {
            assert!(BrokerEndpoint::parse(addr, false).is_err(), "{}", addr);
        }
    }

    #[test]
    fn half_an_identity_is_rejected() {
        let files = TlsFiles {
            client_key: Some(PathBuf::from("/nonexistent/key.pem")),
            ..TlsFiles::default()
        };
        let err = files.read().unwrap_err().to_string();
        assert!(err.contains("without a client certificate"), "{}", err);
    }

    #[test]
    fn wire_follows_endpoint_and_materials() {
        let plain = BrokerEndpoint::parse("broker", false).unwrap();
        let tls = BrokerEndpoint::parse("mqtts://broker", false).unwrap();
        let with_ca = TlsMaterials {
            ca: Some(b"ca".to_vec()),
            identity: None,
        };
        let identity_only = TlsMaterials {
            ca: None,
            identity: Some((b"c".to_vec(), b"k".to_vec())),
        };

        assert!(TlsMaterials::default().wire(&plain).is_ok());
        assert!(TlsMaterials::default().wire(&tls).is_ok());
        assert!(with_ca.wire(&plain).is_err());
        assert!(with_ca.wire(&tls).is_ok());
        assert!(identity_only.wire(&tls).is_err());
    }
}
