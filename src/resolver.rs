use std::net::IpAddr;
use std::sync::Arc;

use async_recursion::async_recursion;
use hickory_proto::error::ProtoError;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{Name, RData, RecordType};
use rand::seq::SliceRandom;
use rand::thread_rng;
use thiserror::Error;
use tracing::{debug, field::Empty, instrument, warn};

use crate::backend::{Backend, UdpBackend};
use crate::handle::ResolverHandle;
use crate::redirect;

#[derive(Error, Debug)]
pub enum ResolutionError {
    /// RFC 1035 4.1.1 RCODE 3 "Name Error", or a walk that ran out of
    /// delegation to follow without ever finding an answer.
    #[error("no data exists for this name and record type")]
    NotFound,
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("delegation produced an empty nameserver set")]
    NoServers,
    #[error("failure in underlying io")]
    IOError(#[from] std::io::Error),
    #[error("protocol error (likely serde related)")]
    ProtocolError(#[from] ProtoError),
}

/// Core iterative-resolution algorithm (component E). Integrates the
/// root-hints provider, redirect-list provider, outbound-address probe and
/// answer cache behind one shared [`ResolverHandle`].
pub struct RecursiveResolver {
    backend: Box<dyn Backend + Sync + Send>,
    handle: Arc<ResolverHandle>,
}

impl std::fmt::Debug for RecursiveResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursiveResolver").field("backend", &self.backend).finish()
    }
}

impl RecursiveResolver {
    pub fn new(handle: Arc<ResolverHandle>) -> Self {
        RecursiveResolver { backend: Box::new(UdpBackend::new()), handle }
    }

    #[cfg(test)]
    pub(crate) fn with_backend(
        backend: impl Backend + Send + Sync + 'static,
        handle: Arc<ResolverHandle>,
    ) -> Self {
        RecursiveResolver { backend: Box::new(backend), handle }
    }

    /// `resolve(name, family, skip_redirect) -> [ip_literal]`.
    #[instrument(skip(self), fields(otel.status_code = Empty, %to_resolve, %record_type))]
    pub async fn resolve(
        &self,
        to_resolve: &Name,
        record_type: RecordType,
        skip_redirect: bool,
    ) -> Result<Vec<IpAddr>, ResolutionError> {
        let name_str = to_resolve.to_string();

        // 1. Cache probe.
        if let Some(addrs) = self.handle.cache.get(&name_str, record_type) {
            debug!(name = %name_str, "cache hit");
            return Ok(addrs);
        }

        // 2. Redirect check.
        if !skip_redirect {
            match self.handle.redirect.get_redirect_list() {
                Ok(patterns) => {
                    if let Some(pattern) = redirect::find_match(&name_str, &patterns) {
                        debug!(name = %name_str, %pattern, "redirect match");
                        let outbound = self
                            .handle
                            .outbound
                            .get()
                            .await
                            .map_err(|e| ResolutionError::Upstream(e.to_string()))?;
                        return Ok(vec![outbound]);
                    }
                }
                Err(e) => warn!("failed to get redirect list: {e}"),
            }
        }

        // 3. Bootstrap.
        let (ipv4, ipv6) = self
            .handle
            .roots
            .get_roots()
            .await
            .map_err(|e| ResolutionError::Upstream(e.to_string()))?;
        let roots = if record_type == RecordType::AAAA { ipv6 } else { ipv4 };
        if roots.is_empty() {
            return Err(ResolutionError::Upstream("no root hints available".to_string()));
        }

        // 4. Iterative walk.
        let result = self.walk(&roots, to_resolve, record_type, skip_redirect).await?;

        // 5. Memoise.
        self.handle.cache.store(&name_str, record_type, result.clone());

        Ok(result)
    }

    #[instrument(skip(self, servers), fields(%to_resolve, candidates = servers.len()))]
    #[async_recursion]
    async fn walk(
        &self,
        servers: &[IpAddr],
        to_resolve: &Name,
        record_type: RecordType,
        skip_redirect: bool,
    ) -> Result<Vec<IpAddr>, ResolutionError> {
        let Some(server) = servers.choose(&mut thread_rng()).copied() else {
            return Err(ResolutionError::NoServers);
        };

        let message = self.backend.query(server, to_resolve, record_type, false).await?;

        if message.header().response_code() == ResponseCode::NXDomain {
            return Err(ResolutionError::NotFound);
        }

        if !message.answers().is_empty() {
            let mut addrs = Vec::new();
            for record in message.answers() {
                if let Some(addr) = extract_addr(record.data(), record_type) {
                    addrs.push(addr);
                }
                if let Some(RData::CNAME(target)) = record.data() {
                    debug!(%to_resolve, %target, "cname");
                    return self.resolve(&target.0, record_type, skip_redirect).await;
                }
            }
            return Ok(addrs);
        }

        // Collect glue: same-family addresses from the additional section.
        let mut sub_servers: Vec<IpAddr> = message
            .additionals()
            .iter()
            .filter_map(|r| extract_addr(r.data(), record_type))
            .collect();

        // No usable glue: fall back to resolving each authority NS by name.
        if sub_servers.is_empty() {
            for ns in message.name_servers() {
                let Some(RData::NS(ns_name)) = ns.data() else { continue };
                match self.resolve(&ns_name.0, RecordType::A, skip_redirect).await {
                    Ok(ips) => sub_servers.extend(ips),
                    Err(e) => debug!(ns = %ns_name.0, "failed to resolve glue nameserver: {e}"),
                }
            }
        }

        // Redirect matching is re-enabled on the recursive descent; see
        // SPEC_FULL.md §9 on why this is kept rather than "fixed".
        self.walk(&sub_servers, to_resolve, record_type, false).await
    }
}

fn extract_addr(data: Option<&RData>, record_type: RecordType) -> Option<IpAddr> {
    match (record_type, data) {
        (RecordType::A, Some(RData::A(a))) => Some(IpAddr::V4(a.0)),
        (RecordType::AAAA, Some(RData::AAAA(aaaa))) => Some(IpAddr::V6(aaaa.0)),
        _ => None,
    }
}
