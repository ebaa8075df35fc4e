use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod backend;
mod cache;
mod config;
mod dns_server;
#[cfg(test)]
mod fake_backend;
mod handle;
mod http_server;
mod macros;
mod outbound;
mod redirect;
mod resolver;
mod roots;

use config::Config;
use handle::ResolverHandle;
use resolver::RecursiveResolver;

const REDIRECT_LIST_RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    setup_tracing(config.logging_level)?;

    let handle = Arc::new(ResolverHandle::new());

    // Root hints are needed before any query can be answered; a failure here
    // is a startup-time error rather than something a running server can
    // route around.
    handle.roots.get_roots().await.context("failed to bootstrap root hints")?;
    info!("root hints ready");

    let resolver = Arc::new(RecursiveResolver::new(handle.clone()));

    let dns_handle =
        tokio::spawn(dns_server::serve(config.bind_ip_dns, config.dns_port, resolver.clone()));
    let http_handle = tokio::spawn(http_server::serve(config.http_port, resolver.clone()));

    // The redirect list is not required to answer queries (it degrades to
    // "no redirect match" until available), but we still try to warm it on
    // startup so the first real client isn't the one paying for the clone.
    loop {
        match handle.redirect.get_redirect_list() {
            Ok(patterns) => {
                info!(count = patterns.len(), "redirect list ready");
                break;
            }
            Err(e) => {
                warn!("redirect list not ready yet, retrying: {e}");
                tokio::time::sleep(REDIRECT_LIST_RETRY_INTERVAL).await;
            }
        }
    }

    // A front-end exiting at all is unexpected once past startup, but a
    // listener that never bound (port in use, permission denied) is a
    // bootstrap-time programmer/operator error, not something the process
    // should silently survive by falling through to a clean exit.
    tokio::select! {
        result = dns_handle => {
            panic!("dns front-end task exited: {result:?}");
        }
        result = http_handle => {
            panic!("http front-end task exited: {result:?}");
        }
    }
}

fn setup_tracing(level: tracing::Level) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).try_init().map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}
