use std::net::IpAddr;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::{info, instrument};

use crate::backend::{Backend, UdpBackend};
use hickory_proto::rr::{Name, RecordType};
use hickory_proto::rr::RData;

const REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const INTERNIC_RESOLVER: &str = "1.1.1.1";
const INTERNIC_NAME: &str = "www.internic.net.";

lazy_static! {
    // name  ttl  (A|AAAA)  address -- the named.root zone file omits the
    // class column entirely, so there is no "IN" to match here.
    static ref ROOT_ZONE_LINE: Regex =
        Regex::new(r"^([.a-zA-Z0-9-]+)\s+(\d+)\s+(A+)\s+([\d:.a-fA-F]+)$").unwrap();
}

#[derive(Error, Debug)]
pub enum RootsError {
    #[error("failed to resolve www.internic.net via bootstrap resolver")]
    BootstrapResolution,
    #[error("http fetch of named.root failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("both ipv4 and ipv6 root server lists were empty after download")]
    EmptyZoneFile,
}

#[derive(Debug, Default, Clone)]
struct RootHintsState {
    ipv4: Vec<IpAddr>,
    ipv6: Vec<IpAddr>,
    last_refresh: Option<Instant>,
}

/// Fetches and caches the IPv4/IPv6 root server address lists (component A).
pub struct RootHintsProvider {
    state: RwLock<RootHintsState>,
    http: reqwest::Client,
}

impl RootHintsProvider {
    pub fn new() -> Self {
        RootHintsProvider {
            state: RwLock::new(RootHintsState::default()),
            http: reqwest::Client::new(),
        }
    }

    /// Returns the current (ipv4, ipv6) root server lists, refreshing first
    /// if uninitialised or older than 24h. On refresh failure, the previously
    /// cached lists (if any) are retained and returned.
    #[instrument(skip(self))]
    pub async fn get_roots(&self) -> Result<(Vec<IpAddr>, Vec<IpAddr>), RootsError> {
        let needs_refresh = {
            let state = self.state.read().unwrap();
            match state.last_refresh {
                None => true,
                Some(t) => t.elapsed() > REFRESH_INTERVAL,
            }
        };

        if needs_refresh {
            match self.download_root_hints().await {
                Ok((ipv4, ipv6)) => {
                    let mut state = self.state.write().unwrap();
                    state.ipv4 = ipv4;
                    state.ipv6 = ipv6;
                    state.last_refresh = Some(Instant::now());
                }
                Err(e) => {
                    let state = self.state.read().unwrap();
                    if state.last_refresh.is_none() {
                        return Err(e);
                    }
                    tracing::warn!("root hints refresh failed, serving stale list: {e}");
                }
            }
        }

        let state = self.state.read().unwrap();
        Ok((state.ipv4.clone(), state.ipv6.clone()))
    }

    async fn download_root_hints(&self) -> Result<(Vec<IpAddr>, Vec<IpAddr>), RootsError> {
        info!("downloading root zone");
        let internic_ip = self.resolve_internic().await?;
        let url = format!("http://{internic_ip}/domain/named.root");

        let body = self
            .http
            .get(&url)
            .header("Host", "internic.net")
            .header("User-Agent", "lancache-resolver")
            .send()
            .await?
            .text()
            .await?;

        let (ipv4, ipv6) = parse_named_root(&body);
        if ipv4.is_empty() && ipv6.is_empty() {
            return Err(RootsError::EmptyZoneFile);
        }
        Ok((ipv4, ipv6))
    }

    /// One-shot recursive A query for `www.internic.net.` against a
    /// well-known public recursive resolver, to bootstrap the HTTP fetch.
    async fn resolve_internic(&self) -> Result<IpAddr, RootsError> {
        let backend = UdpBackend::new();
        let name: Name = INTERNIC_NAME.parse().map_err(|_| RootsError::BootstrapResolution)?;
        let target: IpAddr =
            INTERNIC_RESOLVER.parse().map_err(|_| RootsError::BootstrapResolution)?;
        let message = backend
            .query(target, &name, RecordType::A, true)
            .await
            .map_err(|_| RootsError::BootstrapResolution)?;

        message
            .answers()
            .iter()
            .find_map(|r| match r.data() {
                Some(RData::A(a)) => Some(IpAddr::V4(a.0)),
                _ => None,
            })
            .ok_or(RootsError::BootstrapResolution)
    }
}

impl Default for RootHintsProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_named_root(body: &str) -> (Vec<IpAddr>, Vec<IpAddr>) {
    let mut ipv4 = Vec::new();
    let mut ipv6 = Vec::new();
    for line in body.lines() {
        if line.starts_with(';') {
            continue;
        }
        let Some(caps) = ROOT_ZONE_LINE.captures(line.trim_end()) else {
            continue;
        };
        let record_type = &caps[3];
        let Ok(addr) = caps[4].parse::<IpAddr>() else {
            continue;
        };
        match record_type {
            "A" => ipv4.push(addr),
            "AAAA" => ipv6.push(addr),
            _ => {}
        }
    }
    (ipv4, ipv6)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOLDEN_NAMED_ROOT: &str = "\
; This file holds the information on root name servers needed to
; initialize cache of Internet domain name servers.
;
.                        3600000      NS    A.ROOT-SERVERS.NET.
A.ROOT-SERVERS.NET.      3600000      A     198.41.0.4
A.ROOT-SERVERS.NET.      3600000      AAAA  2001:503:ba3e::2:30
.                        3600000      NS    B.ROOT-SERVERS.NET.
B.ROOT-SERVERS.NET.      3600000      A     199.9.14.201
B.ROOT-SERVERS.NET.      3600000      AAAA  2001:500:200::b
; End of file
";

    #[test]
    fn test_parse_named_root_golden_fixture() {
        let (ipv4, ipv6) = parse_named_root(GOLDEN_NAMED_ROOT);
        assert_eq!(ipv4, vec!["198.41.0.4".parse::<IpAddr>().unwrap(), "199.9.14.201".parse().unwrap()]);
        assert_eq!(
            ipv6,
            vec!["2001:503:ba3e::2:30".parse::<IpAddr>().unwrap(), "2001:500:200::b".parse().unwrap()]
        );
    }

    #[test]
    fn test_parse_named_root_ignores_ns_and_comments() {
        let (ipv4, ipv6) = parse_named_root(GOLDEN_NAMED_ROOT);
        // two NS lines and two comment lines are present but contribute nothing
        assert_eq!(ipv4.len() + ipv6.len(), 4);
    }

    #[test]
    fn test_parse_named_root_empty_body() {
        let (ipv4, ipv6) = parse_named_root("");
        assert!(ipv4.is_empty() && ipv6.is_empty());
    }
}
