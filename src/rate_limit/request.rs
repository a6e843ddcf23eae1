use axum::extract::ConnectInfo;
use http::{request::Parts, HeaderMap, Method};
use std::net::SocketAddr;

/// Borrowed view of an inbound request, as seen by conditions and key generators
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

impl<'a> InboundRequest<'a> {
    pub fn new(
        method: &'a Method,
        path: &'a str,
        headers: &'a HeaderMap,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            method,
            path,
            headers,
            remote_addr,
        }
    }

    /// Build a view over request parts; the remote address comes from `ConnectInfo`
    pub fn from_parts(parts: &'a Parts) -> Self {
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            method: &parts.method,
            path: parts.uri.path(),
            headers: &parts.headers,
            remote_addr,
        }
    }
}
