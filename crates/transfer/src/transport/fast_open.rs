use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::StreamExt;
use http::{Request, header};
use http_body_util::{BodyExt, Empty};
use hyper::body::Body as _;
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use resumefetch_fast_open::connect;
use tracing::debug;

use super::{Timeouts, Transport, TransportResponse, content_range};
use crate::error::TransportError;
use crate::request::TransferRequest;

const USER_AGENT: &str = concat!("resumefetch/", env!("CARGO_PKG_VERSION"));

/// Fallback transport: plain HTTP/1.1 (hyper) over a TCP Fast Open connection.
///
/// hyper writes the request as soon as the handshake future is driven, so on
/// kernels with `TCP_FASTOPEN_CONNECT` it travels in the SYN.
#[derive(Debug, Clone, Default)]
pub struct FastOpenTransport {
    timeouts: Timeouts,
    origin: Option<String>,
}

impl FastOpenTransport {
    pub fn new(timeouts: Timeouts) -> Self {
        Self {
            timeouts,
            origin: None,
        }
    }

    /// Sends every request to `origin` (`host:port`) instead of the URL's host.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// `host:port` to connect to. Without an override this is the URL's host
    /// with its explicit port, or 80.
    fn origin_for(&self, request: &TransferRequest) -> Result<String, TransportError> {
        if let Some(origin) = &self.origin {
            return Ok(origin.clone());
        }
        let host = request
            .url
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl(format!("missing host in {}", request.url)))?;
        let port = request.url.port().unwrap_or(80);
        if host.contains(':') && !host.starts_with('[') {
            Ok(format!("[{host}]:{port}"))
        } else {
            Ok(format!("{host}:{port}"))
        }
    }
}

async fn resolve(origin: &str) -> Result<SocketAddr, TransportError> {
    tokio::net::lookup_host(origin)
        .await?
        .next()
        .ok_or_else(|| TransportError::InvalidUrl(format!("{origin} did not resolve")))
}

/// `Host` header value: the URL's host plus any explicit port.
fn host_header(request: &TransferRequest) -> String {
    let host = request.url.host_str().unwrap_or_default();
    match request.url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

fn build_request(request: &TransferRequest) -> Result<Request<Empty<Bytes>>, TransportError> {
    let target = match request.url.query() {
        Some(query) => format!("{}?{query}", request.url.path()),
        None => request.url.path().to_string(),
    };

    let mut builder = Request::builder()
        .method(request.method.clone())
        .uri(target)
        .header(header::HOST, host_header(request))
        .header(header::USER_AGENT, USER_AGENT)
        .header(header::ACCEPT, "*/*")
        .header(header::CONNECTION, "close");
    if let Some(range) = request.range_header() {
        builder = builder.header(header::RANGE, range);
    }
    Ok(builder.body(Empty::new())?)
}

impl Transport for FastOpenTransport {
    fn open(
        &self,
        request: &TransferRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + '_>> {
        let origin = self.origin_for(request);
        let outgoing = build_request(request);
        let timeouts = self.timeouts;

        Box::pin(async move {
            let origin = origin?;
            let outgoing = outgoing?;
            let addr = resolve(&origin).await?;
            debug!(%addr, %origin, "opening fast-open connection");

            let stream = connect(addr, timeouts.connect).await?;
            let exchange = async {
                let (mut sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        debug!("fallback connection closed: {e}");
                    }
                });
                let response = sender.send_request(outgoing).await?;
                Ok::<_, TransportError>((sender, response))
            };
            let (sender, response) = tokio::time::timeout(timeouts.connect, exchange)
                .await
                .map_err(|_| TransportError::Timeout)??;

            let status = response.status().as_u16();
            let content_length = response.body().size_hint().exact();
            let content_range = content_range(response.headers());
            debug!(%addr, status, content_length, ?content_range, "fallback response");

            let body = response
                .into_body()
                .into_data_stream()
                .map(move |chunk| {
                    // Keep the request half open until the body is consumed.
                    let _sender = &sender;
                    chunk.map_err(TransportError::from)
                })
                .boxed();

            Ok(TransportResponse {
                status,
                content_length,
                content_range,
                body,
            })
        })
    }

    fn name(&self) -> &'static str {
        "fast-open"
    }
}

#[cfg(test)]
mod tests {
    use resumefetch_fast_open::ContentRange;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Accepts one connection, returns the request head (lowercased) and
    /// replies with `response`.
    async fn one_shot_server(
        response: &'static [u8],
    ) -> (SocketAddr, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            stream.write_all(response).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8(head).unwrap().to_ascii_lowercase()
        });
        (addr, handle)
    }

    async fn collect(response: TransportResponse) -> Result<Vec<u8>, TransportError> {
        let mut body = response.body;
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[test]
    fn request_carries_target_host_and_range() {
        let request = TransferRequest::parse("http://example.com:8080/a/b?x=1")
            .unwrap()
            .continuation(400);
        let outgoing = build_request(&request).unwrap();
        assert_eq!(outgoing.uri(), "/a/b?x=1");
        assert_eq!(outgoing.headers()[header::HOST], "example.com:8080");
        assert_eq!(outgoing.headers()[header::RANGE], "bytes=400-");
        assert_eq!(outgoing.headers()[header::CONNECTION], "close");
    }

    #[test]
    fn origin_defaults_to_port_80() {
        let transport = FastOpenTransport::new(Timeouts::default());
        let https = TransferRequest::parse("https://example.com/x").unwrap();
        assert_eq!(transport.origin_for(&https).unwrap(), "example.com:80");
        let explicit = TransferRequest::parse("https://example.com:4433/x").unwrap();
        assert_eq!(transport.origin_for(&explicit).unwrap(), "example.com:4433");

        let overridden = transport.with_origin("127.0.0.1:9000");
        assert_eq!(overridden.origin_for(&https).unwrap(), "127.0.0.1:9000");
    }

    #[tokio::test]
    async fn reads_ranged_response_body() {
        let (addr, server) = one_shot_server(
            b"HTTP/1.1 206 Partial Content\r\nContent-Length: 4\r\nContent-Range: bytes 6-9/10\r\n\r\nWXYZ",
        )
        .await;

        let transport = FastOpenTransport::new(Timeouts::default()).with_origin(addr.to_string());
        let request = TransferRequest::parse("https://origin.invalid/data.bin")
            .unwrap()
            .continuation(6);
        let response = transport.open(&request).await.unwrap();
        assert_eq!(response.status, 206);
        assert_eq!(response.content_length, Some(4));
        assert_eq!(response.content_range, Some(ContentRange::partial(6, 9, 10)));
        assert_eq!(collect(response).await.unwrap(), b"WXYZ");

        let head = server.await.unwrap();
        assert!(head.starts_with("get /data.bin http/1.1\r\n"), "{head}");
        assert!(head.contains("range: bytes=6-\r\n"), "{head}");
        assert!(head.contains("host: origin.invalid\r\n"), "{head}");
    }

    #[tokio::test]
    async fn body_without_length_reads_to_eof() {
        let (addr, _server) =
            one_shot_server(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nall of it").await;

        let transport = FastOpenTransport::new(Timeouts::default()).with_origin(addr.to_string());
        let request = TransferRequest::parse("http://origin.invalid/").unwrap();
        let response = transport.open(&request).await.unwrap();
        assert_eq!(response.content_length, None);
        assert_eq!(collect(response).await.unwrap(), b"all of it");
    }

    #[tokio::test]
    async fn chunked_response_is_decoded() {
        let (addr, _server) = one_shot_server(
            b"HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 4-9/10\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n3\r\ndef\r\n0\r\n\r\n",
        )
        .await;

        let transport = FastOpenTransport::new(Timeouts::default()).with_origin(addr.to_string());
        let request = TransferRequest::parse("http://origin.invalid/")
            .unwrap()
            .continuation(4);
        let response = transport.open(&request).await.unwrap();
        assert_eq!(response.content_length, None);
        assert_eq!(response.content_range.and_then(|r| r.first()), Some(4));
        assert_eq!(collect(response).await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn non_http_reply_is_an_error() {
        let (addr, _server) = one_shot_server(b"raw bytes, no status line").await;

        let transport = FastOpenTransport::new(Timeouts::default()).with_origin(addr.to_string());
        let request = TransferRequest::parse("http://origin.invalid/").unwrap();
        let err = transport.open(&request).await.unwrap_err();
        assert!(matches!(err, TransportError::Hyper(_)), "{err}");
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let transport = FastOpenTransport::new(Timeouts::default()).with_origin(addr.to_string());
        let request = TransferRequest::parse("http://origin.invalid/").unwrap();
        assert!(transport.open(&request).await.is_err());
    }
}
