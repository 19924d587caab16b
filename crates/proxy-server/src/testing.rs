use crate::error::ProxyError;
use crate::forward::Forward;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use bytes::Bytes;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A request as the origin saw it.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

type Responder = Box<dyn Fn(&Recorded) -> Result<Response<Body>, ProxyError> + Send + Sync>;

/// In-memory forwarder for exercising the transport and router without a network.
///
/// Answers every forwarded request with a closure and remembers what it saw.
pub struct ScriptedForwarder {
    responder: Responder,
    seen: Mutex<Vec<Recorded>>,
}

impl ScriptedForwarder {
    pub fn new<R>(responder: R) -> Self
    where
        R: Fn(&Recorded) -> Result<Response<Body>, ProxyError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn seen(&self) -> Vec<Recorded> {
        self.seen.lock().clone()
    }
}

impl Forward for ScriptedForwarder {
    async fn forward(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let (parts, body) = req.into_parts();
        let body = body.collect().await.map_err(ProxyError::Body)?.to_bytes();
        let recorded = Recorded {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        };
        let result = (self.responder)(&recorded);
        self.seen.lock().push(recorded);
        result
    }
}

pub fn respond(
    status: u16,
    headers: &[(&str, &str)],
    body: &str,
) -> Result<Response<Body>, ProxyError> {
    let mut builder = Response::builder().status(StatusCode::from_u16(status).unwrap());
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    Ok(builder.body(Body::from(body.to_string())).unwrap())
}

pub async fn body_of(resp: Response<Body>) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Response body whose first read fails, like a connection reset mid-body.
pub struct FailingBody;

impl hyper::body::Body for FailingBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<hyper::body::Frame<Bytes>, Self::Error>>> {
        Poll::Ready(Some(Err(std::io::Error::other("connection reset"))))
    }
}
