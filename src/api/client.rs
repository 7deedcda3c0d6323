//! Who is on the other end of a request.

use axum::{
    extract::ConnectInfo,
    http::{header::USER_AGENT, HeaderMap, Extensions},
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::db::RequestContext;

const MAX_USER_AGENT_LEN: usize = 512;

/// Client address: X-Forwarded-For, then X-Real-IP, then the socket peer.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        // First entry is the original client
        if let Some(ip) = forwarded.split(',').next().and_then(|s| s.trim().parse().ok()) {
            return Some(ip);
        }
    }

    if let Some(ip) = headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
    {
        return Some(ip);
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Like `client_ip`, falling back to localhost when nothing identifies the peer.
pub fn client_ip_or_local(headers: &HeaderMap, extensions: &Extensions) -> IpAddr {
    client_ip(headers, extensions).unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Metadata recorded on sessions issued for this request.
pub fn request_context(headers: &HeaderMap, extensions: &Extensions) -> RequestContext {
    RequestContext {
        ip_address: client_ip(headers, extensions).map(|ip| ip.to_string()),
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect()),
    }
}
