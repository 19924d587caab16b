use crate::error::{ConfigError, ProxyError};
use crate::rewrite::strip_hop_by_hop;
use axum::body::Body;
use axum::http::header::{HeaderName, FORWARDED, HOST, VIA};
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{HeaderValue, Request, Response, Uri};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Proxy-chain headers dropped before a request reaches the origin.
const PROXY_CHAIN: [HeaderName; 5] = [
    HeaderName::from_static("x-forwarded-for"),
    HeaderName::from_static("x-forwarded-host"),
    HeaderName::from_static("x-forwarded-proto"),
    VIA,
    FORWARDED,
];

/// Sends one request upstream and hands back whatever comes back.
///
/// The request URI is always absolute. Implementations do not follow
/// redirects; the caching transport does that itself.
pub trait Forward: Send + Sync + 'static {
    fn forward(
        &self,
        req: Request<Body>,
    ) -> impl Future<Output = Result<Response<Body>, ProxyError>> + Send;
}

impl<T: Forward> Forward for Arc<T> {
    fn forward(
        &self,
        req: Request<Body>,
    ) -> impl Future<Output = Result<Response<Body>, ProxyError>> + Send {
        (**self).forward(req)
    }
}

/// Forwarder backed by a pooled hyper client that speaks both http and https.
#[derive(Clone)]
pub struct UpstreamClient {
    client: HttpClient,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: build_client(),
            timeout,
        }
    }
}

/// Pooled client over rustls; plain http URLs skip the handshake.
pub fn build_client() -> HttpClient {
    let https = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();
    Client::builder(TokioExecutor::new()).build(https)
}

impl Forward for UpstreamClient {
    async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let uri = req.uri().clone();
        let pending = self.client.request(req);
        let resp: Response<Incoming> = match tokio::time::timeout(self.timeout, pending).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    upstream = %uri,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "upstream timed out"
                );
                return Err(ProxyError::Timeout(self.timeout));
            }
        };
        Ok(resp.map(Body::new))
    }
}

/// The single upstream every inbound request is sent to.
#[derive(Clone, Debug)]
pub struct Origin {
    scheme: Scheme,
    authority: Authority,
    host: HeaderValue,
}

impl Origin {
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidOrigin {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let uri: Uri = url.parse().map_err(|e| invalid(&format!("{e}")))?;
        let scheme = uri.scheme().cloned().ok_or_else(|| invalid("missing scheme"))?;
        if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
            return Err(ConfigError::UnsupportedScheme(scheme.to_string()));
        }
        let authority = uri.authority().cloned().ok_or_else(|| invalid("missing host"))?;
        let host = HeaderValue::from_str(authority.as_str())
            .map_err(|_| invalid("host is not a valid header value"))?;

        Ok(Self {
            scheme,
            authority,
            host,
        })
    }

    pub fn authority(&self) -> &str {
        self.authority.as_str()
    }

    /// Point an inbound request at the origin.
    ///
    /// Only scheme and host change; path and query are kept as received.
    /// Proxy-chain and hop-by-hop headers are dropped and `Host` becomes the
    /// origin's authority.
    pub fn direct(&self, req: Request<Body>) -> Result<Request<Body>, ProxyError> {
        let (mut parts, body) = req.into_parts();

        let path_and_query = parts
            .uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        parts.uri = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()?;

        for name in &PROXY_CHAIN {
            parts.headers.remove(name);
        }
        strip_hop_by_hop(&mut parts.headers);
        parts.headers.insert(HOST, self.host.clone());

        tracing::trace!(upstream = %parts.uri, "directed request to origin");
        Ok(Request::from_parts(parts, body))
    }
}
