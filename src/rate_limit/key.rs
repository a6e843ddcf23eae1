use super::request::InboundRequest;
use http::HeaderName;

const FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN_CLIENT: &str = "unknown";

/// Derives the partition key that scopes a quota
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyGenerator {
    Constant(String),
    ClientIp,
    Path,
    Method,
    Header(HeaderName),
    /// Parts joined with `|`, in order
    Compose(Vec<KeyGenerator>),
}

impl KeyGenerator {
    pub fn constant(value: impl Into<String>) -> Self {
        KeyGenerator::Constant(value.into())
    }

    pub fn client_ip() -> Self {
        KeyGenerator::ClientIp
    }

    pub fn path() -> Self {
        KeyGenerator::Path
    }

    pub fn method() -> Self {
        KeyGenerator::Method
    }

    pub fn header(name: HeaderName) -> Self {
        KeyGenerator::Header(name)
    }

    pub fn compose<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = KeyGenerator>,
    {
        KeyGenerator::Compose(parts.into_iter().collect())
    }

    pub fn key(&self, request: &InboundRequest<'_>) -> String {
        match self {
            KeyGenerator::Constant(value) => value.clone(),
            KeyGenerator::ClientIp => client_ip(request),
            KeyGenerator::Path => request.path.to_string(),
            KeyGenerator::Method => request.method.as_str().to_string(),
            KeyGenerator::Header(name) => request
                .headers
                .get(name)
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .unwrap_or_else(|| format!("no-header:{}", name)),
            KeyGenerator::Compose(parts) => parts
                .iter()
                .map(|part| part.key(request))
                .collect::<Vec<_>>()
                .join("|"),
        }
    }
}

/// Client address: first `X-Forwarded-For` hop, then the socket peer
pub fn client_ip(request: &InboundRequest<'_>) -> String {
    let forwarded = request
        .headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty());

    if let Some(value) = forwarded {
        if let Some(first) = value.split(',').next() {
            return first.trim().to_string();
        }
    }

    request
        .remote_addr
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
