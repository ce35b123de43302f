//! Parsing of overlay client output.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

static DIRECT_ENDPOINT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+\.\d+\.\d+\.\d+):(\d+)").ok());

/// Extracts the peer endpoint from `tailscale ping` output.
///
/// A pong relayed through DERP carries no `address:port` pair, so `None`
/// means the path is not direct.
#[must_use]
pub fn direct_endpoint(output: &str) -> Option<SocketAddr> {
    let pattern = DIRECT_ENDPOINT.as_ref()?;
    pattern.captures_iter(output).find_map(|captures| {
        let address = Ipv4Addr::from_str(captures.get(1)?.as_str()).ok()?;
        let port = captures.get(2)?.as_str().parse::<u16>().ok()?;
        Some(SocketAddr::V4(SocketAddrV4::new(address, port)))
    })
}

/// Reads the first IPv4 address reported by `tailscale ip --4`.
#[must_use]
pub fn overlay_ipv4(output: &str) -> Option<Ipv4Addr> {
    output
        .lines()
        .map(str::trim)
        .find_map(|line| Ipv4Addr::from_str(line).ok())
}
