use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRef, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, RequestPartsExt, Router};
use ipnet::IpNet;
use reqwest::StatusCode;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::cli::InvalidAddrPolicy;
use crate::{AppState, X_FORWARDED_FOR};

/// The candidate client address for a request, plus the transport peer it
/// arrived from.
///
/// The candidate is kept as a raw string: a garbage X-Forwarded-For entry
/// must reach the checker so the invalid-address policy can apply to it.
pub struct ClientSource {
    pub candidate: String,
    pub remote: IpAddr,
}

impl<S> FromRequestParts<S> for ClientSource
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let ConnectInfo(addr) = parts
            .extract::<ConnectInfo<SocketAddr>>()
            .await
            .map_err(|_err| (StatusCode::BAD_REQUEST, "Invalid"))?;
        let remote = addr.ip();

        let from_trusted_proxy = app_state
            .config
            .trusted_proxies
            .iter()
            .any(|net| net.contains(&remote));

        let candidate = if from_trusted_proxy {
            forwarded_candidate(
                &app_state.config.trusted_proxies,
                parts.headers.get(&X_FORWARDED_FOR),
            )
            .unwrap_or_else(|| remote.to_string())
        } else {
            // forwarded headers from arbitrary peers are spoofable
            remote.to_string()
        };

        Ok(ClientSource { candidate, remote })
    }
}

/// Picks the rightmost X-Forwarded-For entry that is not itself a trusted
/// proxy. Entries that do not parse as an IP are kept as candidates so the
/// checker can report them.
fn forwarded_candidate(trusted: &[IpNet], header: Option<&HeaderValue>) -> Option<String> {
    let value = header?.to_str().ok()?;
    value
        .split(',')
        .map(str::trim)
        .rev()
        .find(|entry| match entry.parse::<IpAddr>() {
            Ok(ip) => !trusted.iter().any(|net| net.contains(&ip)),
            Err(_) => !entry.is_empty(),
        })
        .map(str::to_string)
}

#[derive(serde::Serialize)]
pub struct DebugResponse {
    remote_client_ip: IpAddr,
    candidate: String,
    blocked: Option<bool>,
}

async fn ip_info(
    State(app_state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    source: ClientSource,
) -> impl IntoResponse {
    let blocked = app_state.checker.is_blocked(&source.candidate).ok();
    Json(DebugResponse {
        remote_client_ip: addr.ip(),
        candidate: source.candidate,
        blocked,
    })
}

async fn health() -> impl IntoResponse {
    StatusCode::OK.into_response()
}

async fn proxy(
    State(app_state): State<AppState>,
    source: ClientSource,
    request: Request,
) -> Response {
    match app_state.checker.is_blocked(&source.candidate) {
        Ok(true) => {
            tracing::info!(client = %source.candidate, "client address is in the blocklist, rejecting");
            forbidden()
        }
        Ok(false) => {
            let client_ip = source.candidate.parse().unwrap_or(source.remote);
            forward(&app_state, request, client_ip).await
        }
        Err(err) => match app_state.config.invalid_addr_policy {
            InvalidAddrPolicy::Deny => {
                tracing::warn!(error = %err, "cannot verify client address, rejecting");
                forbidden()
            }
            InvalidAddrPolicy::Allow => {
                tracing::warn!(
                    error = %err,
                    peer = %source.remote,
                    "cannot verify client address, forwarding with peer address"
                );
                forward(&app_state, request, source.remote).await
            }
        },
    }
}

fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "Forbidden").into_response()
}

async fn forward(app_state: &AppState, request: Request, client_ip: IpAddr) -> Response {
    match app_state.upstream.forward(request, client_ip).await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = ?err, "upstream request failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

pub fn api_server_router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/ip-info", get(ip_info))
        .route("/health", get(health));

    let api = Router::new().nest("/v1", v1);
    let upstream_timeout = state.config.upstream_timeout;

    Router::new()
        .nest("/api", api)
        .fallback(proxy)
        .layer(TimeoutLayer::new(upstream_timeout))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let uri = request.uri();
                match uri.path() {
                    "/api/v1/health" => tracing::Span::none(),
                    path if path.starts_with("/api/") => {
                        tracing::info_span!("http_request", uri = ?uri)
                    }
                    _ => {
                        tracing::info_span!(
                            "proxy_request",
                            method = ?request.method(),
                            uri = ?uri,
                        )
                    }
                }
            }),
        )
        .with_state(state)
}

pub async fn api_server_listen(state: AppState, socket_addr: SocketAddr) -> std::io::Result<()> {
    let router = api_server_router(state);

    tracing::info!(listen = ?socket_addr, "Starting API server");
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trusted(nets: &[&str]) -> Vec<IpNet> {
        nets.iter().map(|net| net.parse().unwrap()).collect()
    }

    #[test]
    fn picks_rightmost_untrusted_entry() {
        let trusted = trusted(&["10.0.0.0/8"]);
        let header = HeaderValue::from_static("203.0.113.9, 10.0.0.2, 10.0.0.1");
        assert_eq!(
            forwarded_candidate(&trusted, Some(&header)),
            Some("203.0.113.9".to_string())
        );
    }

    #[test]
    fn last_entry_wins_when_untrusted() {
        let trusted = trusted(&["10.0.0.0/8"]);
        let header = HeaderValue::from_static("203.0.113.9, 198.51.100.7");
        assert_eq!(
            forwarded_candidate(&trusted, Some(&header)),
            Some("198.51.100.7".to_string())
        );
    }

    #[test]
    fn keeps_unparseable_entry_as_candidate() {
        let trusted = trusted(&["10.0.0.0/8"]);
        let header = HeaderValue::from_static("garbage, 10.0.0.1");
        assert_eq!(
            forwarded_candidate(&trusted, Some(&header)),
            Some("garbage".to_string())
        );
    }

    #[test]
    fn missing_or_empty_header_yields_none() {
        let trusted = trusted(&["10.0.0.0/8"]);
        assert_eq!(forwarded_candidate(&trusted, None), None);
        let header = HeaderValue::from_static("");
        assert_eq!(forwarded_candidate(&trusted, Some(&header)), None);
    }

    #[test]
    fn all_trusted_entries_yield_none() {
        let trusted = trusted(&["10.0.0.0/8"]);
        let header = HeaderValue::from_static("10.0.0.3, 10.0.0.2");
        assert_eq!(forwarded_candidate(&trusted, Some(&header)), None);
    }
}
