//! Per-connection handlers for the fast-open listener.
//!
//! Each accepted connection is served by one of three policies:
//!
//! - [`HandlerPolicy::Stream`]: send the whole resource from offset 0.
//! - [`HandlerPolicy::Probe`]: read a small probe buffer and do nothing else.
//! - [`HandlerPolicy::Ranged`]: answer an HTTP/1.1 GET, honouring a single
//!   `Range: bytes=` header so clients can resume mid-resource.
//!
//! Every policy ends with an orderly shutdown of both directions.

use std::io::{self, SeekFrom};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::TryStreamExt;
use http::header::{ACCEPT_RANGES, ALLOW, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::error::ConnectionError;
use crate::range::{ByteRange, ContentRange};
use crate::{PROBE_SIZE, STREAM_BUFFER_SIZE};

type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;

/// How an accepted connection is served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerPolicy {
    /// Stream the full resource, always from offset 0.
    #[default]
    Stream,
    /// Read a fixed-size probe buffer from the client and take no further action.
    Probe,
    /// Serve the resource over HTTP/1.1 with single-range support.
    Ranged,
}

/// An accepted connection, owned by the task that serves it.
#[derive(Debug)]
pub struct Connection {
    pub peer_addr: SocketAddr,
    pub stream: TcpStream,
}

/// Serves accepted connections according to a [`HandlerPolicy`].
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    policy: HandlerPolicy,
    resource: PathBuf,
}

impl ConnectionHandler {
    pub fn new(policy: HandlerPolicy, resource: impl Into<PathBuf>) -> Self {
        Self {
            policy,
            resource: resource.into(),
        }
    }

    pub fn policy(&self) -> HandlerPolicy {
        self.policy
    }

    pub fn resource(&self) -> &Path {
        &self.resource
    }

    /// Serves one connection and closes it.
    ///
    /// Errors are logged with the peer address; they never propagate to the
    /// accept loop.
    pub async fn handle(&self, conn: Connection) {
        let Connection {
            peer_addr,
            mut stream,
        } = conn;

        info!(%peer_addr, policy = ?self.policy, "connection received");

        let result = match self.policy {
            HandlerPolicy::Stream => self.send_resource(&mut stream).await,
            HandlerPolicy::Probe => read_probe(&mut stream).await,
            // hyper owns the socket and closes it after the response.
            HandlerPolicy::Ranged => {
                match self.serve_http(stream).await {
                    Ok(()) => info!(%peer_addr, "connection served"),
                    Err(e) => warn!(%peer_addr, "failed to serve connection: {e}"),
                }
                return;
            }
        };

        match result {
            Ok(bytes) => info!(%peer_addr, bytes, "connection served"),
            Err(e) => warn!(%peer_addr, "failed to serve connection: {e}"),
        }

        close(stream, peer_addr).await;
    }

    /// Copies the whole resource to the connection.
    async fn send_resource(&self, stream: &mut TcpStream) -> Result<u64, ConnectionError> {
        let file = tokio::fs::File::open(&self.resource).await?;
        let mut reader = BufReader::with_capacity(STREAM_BUFFER_SIZE, file);
        let sent = tokio::io::copy_buf(&mut reader, stream).await?;
        Ok(sent)
    }

    /// Answers one HTTP/1.1 request, then lets hyper close the connection.
    async fn serve_http(&self, stream: TcpStream) -> Result<(), ConnectionError> {
        let resource = self.resource.clone();
        let service = service_fn(move |request| respond(request, resource.clone()));
        http1::Builder::new()
            .keep_alive(false)
            .serve_connection(TokioIo::new(stream), service)
            .await?;
        Ok(())
    }
}

fn empty() -> ResponseBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn status_only(status: StatusCode) -> Result<Response<ResponseBody>, http::Error> {
    Response::builder().status(status).body(empty())
}

/// Serves the resource, honouring a single `Range: bytes=` header.
///
/// Unparsable or unsatisfiable ranges get 416 with `Content-Range: bytes */<len>`.
async fn respond(
    request: Request<Incoming>,
    resource: PathBuf,
) -> Result<Response<ResponseBody>, http::Error> {
    let method = request.method().clone();
    debug!(%method, uri = %request.uri(), range = ?request.headers().get(RANGE), "ranged request");

    if method != Method::GET && method != Method::HEAD {
        return Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(ALLOW, "GET, HEAD")
            .body(empty());
    }

    let mut file = match tokio::fs::File::open(&resource).await {
        Ok(file) => file,
        Err(e) => {
            warn!(resource = %resource.display(), "failed to open resource: {e}");
            return status_only(StatusCode::NOT_FOUND);
        }
    };
    let len = match file.metadata().await {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            warn!(resource = %resource.display(), "failed to stat resource: {e}");
            return status_only(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let bounds = match request.headers().get(RANGE) {
        None => None,
        Some(value) => {
            let resolved = value
                .to_str()
                .ok()
                .and_then(ByteRange::parse)
                .and_then(|range| range.resolve(len));
            match resolved {
                Some(bounds) => Some(bounds),
                None => {
                    return Response::builder()
                        .status(StatusCode::RANGE_NOT_SATISFIABLE)
                        .header(CONTENT_RANGE, ContentRange::unsatisfied(len).to_string())
                        .body(empty());
                }
            }
        }
    };

    let builder = Response::builder().header(ACCEPT_RANGES, "bytes");
    let (builder, start, body_len) = match bounds {
        None => (builder.status(StatusCode::OK), 0, len),
        Some((first, last)) => (
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(CONTENT_RANGE, ContentRange::partial(first, last, len).to_string()),
            first,
            last - first + 1,
        ),
    };
    let builder = builder.header(CONTENT_LENGTH, body_len);

    if method == Method::HEAD {
        return builder.body(empty());
    }

    if let Err(e) = file.seek(SeekFrom::Start(start)).await {
        warn!(resource = %resource.display(), start, "failed to seek resource: {e}");
        return status_only(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let chunks = ReaderStream::with_capacity(file.take(body_len), STREAM_BUFFER_SIZE).map_ok(Frame::data);
    builder.body(StreamBody::new(chunks).boxed_unsync())
}

/// Reads a fixed-size probe buffer from the client.
async fn read_probe(stream: &mut TcpStream) -> Result<u64, ConnectionError> {
    let mut buf = [0u8; PROBE_SIZE];
    let n = stream.read(&mut buf).await?;
    debug!(bytes = n, "probe received");
    Ok(n as u64)
}

/// Shuts down both directions, then releases the socket.
async fn close(mut stream: TcpStream, peer_addr: SocketAddr) {
    if let Err(e) = stream.shutdown().await {
        warn!(%peer_addr, "failed to shut down write half: {e}");
    }

    match stream.into_std() {
        Ok(std_stream) => {
            // The peer may already be gone.
            if let Err(e) = std_stream.shutdown(std::net::Shutdown::Both) {
                debug!(%peer_addr, "shutdown(both) failed: {e}");
            }
        }
        Err(e) => warn!(%peer_addr, "failed to release connection: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn resource(len: usize) -> (tempfile::TempDir, PathBuf, Vec<u8>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resource.bin");
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        (dir, path, data)
    }

    /// Serves exactly one connection with `handler` and returns the client stream.
    async fn serve_one(handler: ConnectionHandler) -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, peer_addr) = listener.accept().await.unwrap();
            handler.handle(Connection { peer_addr, stream }).await;
        });
        TcpStream::connect(addr).await.unwrap()
    }

    async fn request(client: &mut TcpStream, range: Option<&str>) -> Vec<u8> {
        let mut req = "GET /resource.bin HTTP/1.1\r\nHost: localhost\r\n".to_string();
        if let Some(range) = range {
            req.push_str(&format!("Range: {range}\r\n"));
        }
        req.push_str("\r\n");
        client.write_all(req.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        response
    }

    fn split_response(response: &[u8]) -> (String, Vec<u8>) {
        let pos = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("response head");
        // Header names are compared case-insensitively.
        let head = String::from_utf8(response[..pos].to_vec())
            .unwrap()
            .to_ascii_lowercase();
        (head, response[pos + 4..].to_vec())
    }

    #[tokio::test]
    async fn stream_policy_sends_whole_resource() {
        let (_dir, path, data) = resource(100_000);
        let mut client = serve_one(ConnectionHandler::new(HandlerPolicy::Stream, path)).await;

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn probe_policy_reads_and_closes() {
        let (_dir, path, _) = resource(10);
        let mut client = serve_one(ConnectionHandler::new(HandlerPolicy::Probe, path)).await;

        client.write_all(&[7u8; 64]).await.unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn ranged_policy_serves_partial_content() {
        let (_dir, path, data) = resource(1000);
        let mut client = serve_one(ConnectionHandler::new(HandlerPolicy::Ranged, path)).await;

        let response = request(&mut client, Some("bytes=400-")).await;
        let (head, body) = split_response(&response);
        assert!(head.starts_with("http/1.1 206"), "{head}");
        assert!(head.contains("content-range: bytes 400-999/1000"));
        assert!(head.contains("content-length: 600"));
        assert_eq!(body, &data[400..]);
    }

    #[tokio::test]
    async fn ranged_policy_without_range_sends_everything() {
        let (_dir, path, data) = resource(1000);
        let mut client = serve_one(ConnectionHandler::new(HandlerPolicy::Ranged, path)).await;

        let response = request(&mut client, None).await;
        let (head, body) = split_response(&response);
        assert!(head.starts_with("http/1.1 200"), "{head}");
        assert_eq!(body, data);
    }

    #[tokio::test]
    async fn ranged_policy_rejects_start_past_end() {
        let (_dir, path, _) = resource(1000);
        let mut client = serve_one(ConnectionHandler::new(HandlerPolicy::Ranged, path)).await;

        let response = request(&mut client, Some("bytes=1000-")).await;
        let (head, body) = split_response(&response);
        assert!(head.starts_with("http/1.1 416"), "{head}");
        assert!(head.contains("content-range: bytes */1000"));
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn ranged_policy_rejects_malformed_range() {
        let (_dir, path, _) = resource(1000);
        let mut client = serve_one(ConnectionHandler::new(HandlerPolicy::Ranged, path)).await;

        let response = request(&mut client, Some("bytes=-500")).await;
        let (head, _) = split_response(&response);
        assert!(head.starts_with("http/1.1 416"), "{head}");
    }

    #[tokio::test]
    async fn ranged_policy_reports_missing_resource() {
        let dir = tempfile::tempdir().unwrap();
        let handler = ConnectionHandler::new(HandlerPolicy::Ranged, dir.path().join("absent.bin"));
        let mut client = serve_one(handler).await;

        let response = request(&mut client, Some("bytes=0-")).await;
        let (head, _) = split_response(&response);
        assert!(head.starts_with("http/1.1 404"), "{head}");
    }

    #[tokio::test]
    async fn ranged_policy_decodes_with_an_http_client() {
        let (_dir, path, data) = resource(5000);
        let client = serve_one(ConnectionHandler::new(HandlerPolicy::Ranged, path)).await;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(client))
            .await
            .unwrap();
        tokio::spawn(conn);
        let request = Request::builder()
            .uri("/resource.bin")
            .header(http::header::HOST, "localhost")
            .header(RANGE, "bytes=4000-4999")
            .body(Empty::<Bytes>::new())
            .unwrap();
        let response = sender.send_request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        let range = response.headers()[CONTENT_RANGE].to_str().unwrap();
        assert_eq!(ContentRange::parse(range), Some(ContentRange::partial(4000, 4999, 5000)));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, &data[4000..]);
    }

    #[test]
    fn policy_deserializes_from_snake_case() {
        use serde::de::IntoDeserializer;
        use serde::de::value::{Error, StrDeserializer};

        let de: StrDeserializer<'_, Error> = "ranged".into_deserializer();
        assert_eq!(HandlerPolicy::deserialize(de).unwrap(), HandlerPolicy::Ranged);
        assert_eq!(HandlerPolicy::default(), HandlerPolicy::Stream);
    }
}
