use std::net::IpAddr;

use ipnet::IpNet;
use thiserror::Error;

/// A CIDR entry in the blocklist configuration could not be parsed.
#[derive(Debug, Error)]
#[error("invalid CIDR range {range:?}: {source}")]
pub struct RangeParseError {
    pub range: String,
    #[source]
    source: ipnet::AddrParseError,
}

/// A per-request candidate address could not be parsed as an IP.
#[derive(Debug, Error)]
#[error("invalid client address {address:?}: {source}")]
pub struct AddressParseError {
    pub address: String,
    #[source]
    source: std::net::AddrParseError,
}

/// Parses a list of CIDR strings into networks, all-or-nothing.
///
/// Host bits in an entry are masked off, so `192.168.1.42/24` matches the
/// same addresses as `192.168.1.0/24`.
pub fn parse_ranges<I, S>(ranges: I) -> Result<Vec<IpNet>, RangeParseError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ranges
        .into_iter()
        .map(|entry| {
            let entry = entry.as_ref();
            entry
                .parse::<IpNet>()
                .map(|net| net.trunc())
                .map_err(|source| RangeParseError {
                    range: entry.to_string(),
                    source,
                })
        })
        .collect()
}

/// Membership test against a fixed set of blocked networks.
///
/// The range set is parsed once at construction and never mutated, so a
/// single instance can be shared across request handlers without locking.
#[derive(Debug, Clone, Default)]
pub struct Checker {
    ranges: Vec<IpNet>,
}

impl Checker {
    pub fn new<I, S>(ranges: I) -> Result<Self, RangeParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            ranges: parse_ranges(ranges)?,
        })
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns whether `address` falls inside one of the blocked ranges.
    ///
    /// An address that does not parse yields an error instead of a verdict;
    /// the caller decides whether that means allow or deny.
    pub fn is_blocked(&self, address: &str) -> Result<bool, AddressParseError> {
        let ip = address
            .parse::<IpAddr>()
            .map_err(|source| AddressParseError {
                address: address.to_string(),
                source,
            })?;
        Ok(self.is_blocked_ip(ip))
    }

    /// Containment test for an already-parsed address. An IPv6 candidate is
    /// never contained in an IPv4 range and vice versa.
    pub fn is_blocked_ip(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|net| net.contains(&ip))
    }
}
