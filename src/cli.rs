use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use ipnet::IpNet;
use reqwest::Url;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[arg(long, env, default_value = "127.0.0.1:3000")]
    pub listen_addr: SocketAddr,

    /// CIDR ranges whose clients are rejected. Empty means block nothing.
    #[arg(long, env, num_args = 1..)]
    pub blocked_ranges: Option<Vec<String>>,

    /// Peers allowed to set X-Forwarded-For on behalf of their clients.
    #[arg(long, env, num_args = 1..)]
    pub trusted_proxies: Option<Vec<IpNet>>,

    #[arg(long, env = "UPSTREAM")]
    pub upstream: Url,

    #[arg(long, env = "UPSTREAM_TIMEOUT", default_value = "10")]
    pub upstream_timeout: u64,

    /// What to do with a client address that does not parse as an IP.
    #[arg(long, env, value_enum, default_value = "deny")]
    pub invalid_addr_policy: InvalidAddrPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InvalidAddrPolicy {
    /// Fail open: fall back to the transport peer address and keep serving.
    Allow,
    /// Fail closed: reject the request.
    Deny,
}
