use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("only http:// URLs are supported: {0}")]
    OnlyHttpSupported(String),

    #[error("http request build failed: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("invalid http header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid http header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("http request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("http request timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to read response body: {0}")]
    BodyRead(#[from] hyper::Error),
}

impl Error {
    /// Error code charged to the tally for a request that never produced a status.
    pub(crate) fn failure_kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "EXCEPTION:TIMEOUT",
            Self::Request(e) if e.is_connect() => "EXCEPTION:CONNECT",
            _ => "EXCEPTION:OTHER",
        }
    }
}

/// Error code for a response status, `None` when the request succeeded.
pub(crate) fn status_failure_kind(status: u16) -> Option<String> {
    (status >= 400).then(|| format!("HTTP_{status}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpResponse {
    pub status: u16,
    pub body_len: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct HttpRequest {
    pub method: http::Method,
    pub uri: hyper::Uri,
    pub host: Option<String>,
    pub headers: Vec<(http::header::HeaderName, http::header::HeaderValue)>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Parses and validates everything that does not change between requests.
    pub(crate) fn new(
        method: &str,
        url: &str,
        headers: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let parsed = url::Url::parse(url).map_err(|_| Error::InvalidUrl(url.to_string()))?;
        if parsed.scheme() != "http" {
            return Err(Error::OnlyHttpSupported(url.to_string()));
        }
        let uri: hyper::Uri = url.parse().map_err(|_| Error::InvalidUrl(url.to_string()))?;
        let method = http::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|e| Error::RequestBuild(e.into()))?;

        let host = if has_header(headers, "host") {
            None
        } else {
            host_header_value(&parsed)
        };

        let mut parsed_headers = Vec::with_capacity(headers.len());
        for (k, v) in headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes())?;
            let value = http::header::HeaderValue::from_str(v)?;
            parsed_headers.push((name, value));
        }

        Ok(Self {
            method,
            uri,
            host,
            headers: parsed_headers,
            timeout,
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    inner: Client<HttpConnector, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        let mut connector = HttpConnector::new();
        connector.enforce_http(false);
        connector.set_nodelay(true);

        let inner = Client::builder(TokioExecutor::new()).build(connector);

        Self { inner }
    }
}

impl HttpClient {
    pub(crate) async fn send(&self, req: &HttpRequest, body: Bytes) -> Result<HttpResponse> {
        let mut builder = Request::builder()
            .method(req.method.clone())
            .uri(req.uri.clone());

        if let Some(host) = &req.host {
            builder = builder.header(http::header::HOST, host);
        }
        if !body.is_empty() {
            builder = builder.header(http::header::CONTENT_LENGTH, body.len());
        }
        for (name, value) in &req.headers {
            builder = builder.header(name, value);
        }

        let request: Request<Full<Bytes>> = builder.body(Full::new(body))?;

        let exchange = async {
            let res: hyper::Response<Incoming> = self.inner.request(request).await?;
            let status = res.status().as_u16();
            let body = res.into_body().collect().await?.to_bytes();
            Ok::<_, Error>(HttpResponse {
                status,
                body_len: body.len() as u64,
            })
        };

        match req.timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange)
                .await
                .map_err(|_| Error::Timeout(timeout))?,
            None => exchange.await,
        }
    }
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

fn host_header_value(parsed: &url::Url) -> Option<String> {
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) if port != 80 => Some(format!("{host}:{port}")),
        _ => Some(host.to_string()),
    }
}
