use std::future::Future;
use std::pin::Pin;

use futures_util::StreamExt;
use reqwest::header::RANGE;
use tracing::debug;

use super::{Timeouts, Transport, TransportResponse, content_range};
use crate::error::TransportError;
use crate::request::TransferRequest;
use crate::tls::{self, TlsOptions};

const USER_AGENT: &str = concat!("resumefetch/", env!("CARGO_PKG_VERSION"));

/// Primary transport: `reqwest` over TLS, preferring HTTP/2.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(tls_options: &TlsOptions, timeouts: Timeouts) -> Result<Self, TransportError> {
        let config = tls::client_config(tls_options)?;
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(config)
            .connect_timeout(timeouts.connect)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn open(
        &self,
        request: &TransferRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + '_>> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        if let Some(range) = request.range_header() {
            builder = builder.header(RANGE, range);
        }
        let transfer = request.target();

        Box::pin(async move {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let content_length = response.content_length();
            let content_range = content_range(response.headers());
            debug!(
                %transfer,
                status,
                version = ?response.version(),
                content_length,
                ?content_range,
                "primary response"
            );

            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TransportError::from))
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
        "http"
    }
}

#[cfg(test)]
mod tests {
    use resumefetch_fast_open::ContentRange;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn sends_range_header_and_streams_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
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
            stream
                .write_all(
                    b"HTTP/1.1 206 Partial Content\r\nContent-Length: 3\r\nContent-Range: bytes 7-9/10\r\nConnection: close\r\n\r\nxyz",
                )
                .await
                .unwrap();
            String::from_utf8(head).unwrap().to_ascii_lowercase()
        });

        let transport = HttpTransport::new(&TlsOptions::default(), Timeouts::default()).unwrap();
        let request = TransferRequest::parse(&format!("http://{addr}/file"))
            .unwrap()
            .continuation(7);
        let mut response = transport.open(&request).await.unwrap();

        assert_eq!(response.status, 206);
        assert_eq!(response.content_length, Some(3));
        assert_eq!(response.content_range, Some(ContentRange::partial(7, 9, 10)));
        let mut body = Vec::new();
        while let Some(chunk) = response.body.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"xyz");

        let head = server.await.unwrap();
        assert!(head.starts_with("get /file http/1.1\r\n"), "{head}");
        assert!(head.contains("range: bytes=7-\r\n"), "{head}");
    }

    #[tokio::test]
    async fn connection_refused_is_http_error() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let transport = HttpTransport::new(&TlsOptions::default(), Timeouts::default()).unwrap();
        let request = TransferRequest::parse(&format!("http://{addr}/file")).unwrap();
        let err = transport.open(&request).await.unwrap_err();
        assert!(matches!(err, TransportError::Http(_)));
    }
}
