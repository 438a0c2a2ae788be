//! Client IP extraction from HTTP headers with trust validation
//!
//! Forwarding headers are only honoured when the configured proxy mode says
//! so; otherwise the socket peer address is the client.

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{ClientIpConfig, TrustedProxyMode};

/// Extract the client IP address according to the trust configuration
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    config: &ClientIpConfig,
) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => {
            extract_standard_ip(headers, socket_addr, config).unwrap_or(socket_addr)
        }
        TrustedProxyMode::None => socket_addr,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

fn extract_standard_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    config: &ClientIpConfig,
) -> Option<IpAddr> {
    let mut chain = forwarded_chain(headers);
    if chain.is_empty() {
        return None;
    }

    if let Some(num_trusted) = config.num_trusted_proxies {
        return if chain.len() > num_trusted {
            Some(chain[chain.len() - num_trusted - 1])
        } else {
            chain.first().copied()
        };
    }

    if !config.trusted_proxies.is_empty() {
        // The peer itself must be a trusted proxy for its headers to count
        let is_trusted = |ip: &IpAddr| config.trusted_proxies.iter().any(|net| net.contains(ip));
        if !is_trusted(&socket_addr) {
            return None;
        }
        chain.push(socket_addr);
        return chain
            .iter()
            .rev()
            .find(|ip| !is_trusted(ip))
            .or_else(|| chain.first())
            .copied();
    }

    chain.last().copied()
}

/// Addresses from `Forwarded` (RFC 7239) or, failing that, `X-Forwarded-For`,
/// ordered from the original client to the nearest proxy.
fn forwarded_chain(headers: &HeaderMap) -> Vec<IpAddr> {
    if let Some(forwarded) = headers.get("forwarded").and_then(|h| h.to_str().ok()) {
        let chain: Vec<IpAddr> = forwarded
            .split(',')
            .filter_map(|element| {
                element.split(';').find_map(|param| {
                    let (name, value) = param.trim().split_once('=')?;
                    if !name.eq_ignore_ascii_case("for") {
                        return None;
                    }
                    parse_forwarded_node(value)
                })
            })
            .collect();
        if !chain.is_empty() {
            return chain;
        }
    }

    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .map(|xff| {
            xff.split(',')
                .filter_map(|s| s.trim().parse::<IpAddr>().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a `for=` node: `192.0.2.60`, `"192.0.2.60:47011"` or `"[2001:db8::1]:4711"`
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');
    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = value.parse() {
        return Some(ip);
    }
    value.rsplit_once(':')?.0.parse().ok()
}
