use std::net::IpAddr;
use std::sync::OnceLock;

use tokio::net::UdpSocket;
use tracing::instrument;

/// Determines the host's preferred outbound IP by "connecting" a UDP socket
/// toward an arbitrary external address and reading back the local endpoint.
/// No packets are actually sent -- `connect` on a UDP socket only sets the
/// kernel's default peer and lets us discover which local address/interface
/// the OS would use for that route.
pub struct OutboundProbe {
    memo: OnceLock<IpAddr>,
}

const PROBE_TARGET: &str = "8.8.8.8:80";

impl OutboundProbe {
    pub fn new() -> Self {
        OutboundProbe { memo: OnceLock::new() }
    }

    #[instrument(skip(self))]
    pub async fn get(&self) -> std::io::Result<IpAddr> {
        if let Some(ip) = self.memo.get() {
            return Ok(*ip);
        }
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(PROBE_TARGET).await?;
        let ip = socket.local_addr()?.ip();
        // Another worker may have raced us to fill the memo; either value is
        // the same preferred-route address, so losing the race is fine.
        let _ = self.memo.set(ip);
        Ok(*self.memo.get().unwrap())
    }
}

impl Default for OutboundProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_is_memoised() {
        let probe = OutboundProbe::new();
        let first = probe.get().await.unwrap();
        let second = probe.get().await.unwrap();
        assert_eq!(first, second);
    }
}
