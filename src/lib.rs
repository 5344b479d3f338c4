use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderName;
use ipnet::IpNet;

pub mod api;
pub mod checker;
pub mod cli;
pub mod trace_sub;
pub mod upstream;

pub use checker::{AddressParseError, Checker, RangeParseError};
pub use cli::InvalidAddrPolicy;
pub use upstream::UpstreamClient;

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

#[derive(Debug, Clone)]
pub struct Config {
    pub trusted_proxies: Vec<IpNet>,
    pub invalid_addr_policy: InvalidAddrPolicy,
    pub upstream_timeout: Duration,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub checker: Arc<Checker>,
    pub upstream: UpstreamClient,
}
