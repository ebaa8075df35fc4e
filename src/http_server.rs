use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::HOST;
use axum::Router;
use hickory_proto::rr::{Name, RecordType};
use tracing::{debug, info, instrument, warn};

use crate::resolver::RecursiveResolver;

/// Runs the HTTP introspection front-end (component G). Every request is
/// logged and resolved (with redirect matching disabled) purely so an
/// operator can see what upstream address a client would have been pointed
/// at; the response body carries nothing back to the caller.
pub async fn serve(port: u16, resolver: Arc<RecursiveResolver>) -> anyhow::Result<()> {
    let app = Router::new().fallback(handler).with_state(resolver);
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    debug!(%addr, "http introspection front-end listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[instrument(skip(resolver, request), fields(method = %request.method(), path = %request.uri().path()))]
async fn handler(State(resolver): State<Arc<RecursiveResolver>>, request: Request) {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let path = request.uri().path().to_string();

    info!(
        method = %request.method(),
        %path,
        headers = ?request.headers(),
        %host,
        "http introspection request"
    );

    let origin = format!("{host}{path}");
    match origin.parse::<Name>() {
        Ok(name) => match resolver.resolve(&name, RecordType::A, true).await {
            Ok(addrs) => debug!(%origin, ?addrs, "introspection resolve succeeded"),
            Err(e) => debug!(%origin, "introspection resolve failed: {e}"),
        },
        Err(e) => warn!(%origin, "could not parse introspection origin as a name: {e}"),
    }
}
