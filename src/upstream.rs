use crate::error::ProxyError;
use crate::request::ClientRequest;
use bytes::Bytes;
use http::header::{ACCEPT_ENCODING, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty};
use hyper::{StatusCode, Version};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use log::{debug, warn};
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

/// Client request headers forwarded upstream. Everything else is dropped
/// so proxy-internal and hop-by-hop fields never leak. Matching is
/// case-sensitive against the names the client sent.
pub const REQUEST_HEADER_ALLOW_LIST: [&str; 5] =
    ["Host", "Referer", "User-Agent", "Accept", "Cookie"];

/// Body stream handed to the relay; errors are already mapped.
pub type ResponseBody = UnsyncBoxBody<Bytes, ProxyError>;

/// One upstream exchange's response: the reconstructed status line, the
/// full header map, and the body as an unread stream.
pub struct UpstreamResponse {
    pub status_line: String,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    pub content_type: Option<String>,
}

/// Issues the outbound GET for a session.
pub struct UpstreamClient {
    client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
    connect_timeout: Option<Duration>,
}

impl UpstreamClient {
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        // No idle pool: an upstream socket must never outlive the
        // session that opened it.
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(0)
            .build(HttpsConnector::new());
        Self {
            client,
            connect_timeout,
        }
    }

    /// Send the allow-listed parts of `request` to its target and return
    /// the response head plus the still-unread body.
    pub async fn fetch(&self, request: &ClientRequest) -> Result<UpstreamResponse, ProxyError> {
        let uri = parse_target(&request.target_url)?;
        let outbound = build_outbound_request(&uri, request)?;

        debug!("Requesting {} upstream", uri);
        let send = self.client.request(outbound);
        let response = match self.connect_timeout {
            Some(limit) => timeout(limit, send).await.map_err(|_| {
                ProxyError::UpstreamUnreachable(format!("{} timed out after {:?}", uri, limit))
            })?,
            None => send.await,
        }
        .map_err(|e| {
            if e.is_connect() {
                ProxyError::UpstreamUnreachable(format!("{}: {}", uri, e))
            } else {
                ProxyError::Http(e.to_string())
            }
        })?;

        let (parts, body) = response.into_parts();
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(UpstreamResponse {
            status_line: format_status_line(parts.version, parts.status),
            headers: parts.headers,
            content_type,
            body: body
                .map_err(|e| ProxyError::Io(std::io::Error::other(e)))
                .boxed_unsync(),
        })
    }
}

/// Validate the verbatim target URL and convert it for the HTTP client.
/// Anything that is not an absolute http or https URL with a host is
/// rejected before any connection is attempted.
fn parse_target(target_url: &str) -> Result<Uri, ProxyError> {
    let url = Url::parse(target_url)
        .map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", target_url, e)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ProxyError::InvalidUrl(format!(
                "unsupported scheme {}: {}",
                other, target_url
            )));
        }
    }
    if url.host_str().is_none() {
        return Err(ProxyError::InvalidUrl(format!("missing host: {}", target_url)));
    }
    url.as_str()
        .parse::<Uri>()
        .map_err(|e| ProxyError::InvalidUrl(format!("{}: {}", target_url, e)))
}

fn build_outbound_request(
    uri: &Uri,
    request: &ClientRequest,
) -> Result<Request<Empty<Bytes>>, ProxyError> {
    let mut outbound = Request::builder()
        .method(Method::GET)
        .uri(uri.clone())
        .body(Empty::new())
        .map_err(|e| ProxyError::Http(e.to_string()))?;

    let headers = outbound.headers_mut();
    for (name, value) in request.headers.iter() {
        if !REQUEST_HEADER_ALLOW_LIST.contains(&name) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(header_name), Ok(header_value)) => {
                headers.insert(header_name, header_value);
            }
            _ => warn!("Dropping unrepresentable header {}: {}", name, value),
        }
    }
    // The relay never decompresses, so keep the origin off gzip and the
    // body byte-transparent end to end.
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("deflate"));

    Ok(outbound)
}

/// Rebuild the textual status line the client will receive.
fn format_status_line(version: Version, status: StatusCode) -> String {
    let version = match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    };
    match status.canonical_reason() {
        Some(reason) => format!("{} {} {}", version, status.as_u16(), reason),
        None => format!("{} {}", version, status.as_u16()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderStore;

    fn request_with(headers: &[(&str, &str)]) -> ClientRequest {
        let mut store = HeaderStore::new();
        for (name, value) in headers {
            store.insert(*name, *value);
        }
        ClientRequest {
            method: "GET".to_string(),
            target_url: "http://example.test/page.html".to_string(),
            headers: store,
        }
    }

    #[test]
    fn test_parse_target_accepts_http_and_https() {
        assert!(parse_target("http://example.test/page.html").is_ok());
        assert!(parse_target("https://example.test/").is_ok());
    }

    #[test]
    fn test_parse_target_rejects_garbage() {
        assert!(matches!(
            parse_target("not a url"),
            Err(ProxyError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_target("/relative/path"),
            Err(ProxyError::InvalidUrl(_))
        ));
        assert!(matches!(parse_target(""), Err(ProxyError::InvalidUrl(_))));
    }

    #[test]
    fn test_parse_target_rejects_non_http_schemes() {
        assert!(matches!(
            parse_target("ftp://example.test/file"),
            Err(ProxyError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_target("file:///etc/passwd"),
            Err(ProxyError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_allow_listed_headers_are_forwarded() {
        let request = request_with(&[
            ("Host", "example.test"),
            ("User-Agent", "test-client"),
            ("Cookie", "session=1"),
            ("Referer", "http://example.test/"),
            ("Accept", "*/*"),
        ]);
        let uri = parse_target(&request.target_url).unwrap();
        let outbound = build_outbound_request(&uri, &request).unwrap();

        assert_eq!(outbound.method(), Method::GET);
        assert_eq!(outbound.headers()["host"], "example.test");
        assert_eq!(outbound.headers()["user-agent"], "test-client");
        assert_eq!(outbound.headers()["cookie"], "session=1");
        assert_eq!(outbound.headers()["referer"], "http://example.test/");
        assert_eq!(outbound.headers()["accept"], "*/*");
    }

    #[test]
    fn test_unlisted_headers_are_dropped() {
        let request = request_with(&[
            ("Host", "example.test"),
            ("Authorization", "Bearer secret"),
            ("X-Forwarded-For", "10.0.0.1"),
            ("Connection", "keep-alive"),
        ]);
        let uri = parse_target(&request.target_url).unwrap();
        let outbound = build_outbound_request(&uri, &request).unwrap();

        assert!(outbound.headers().get("authorization").is_none());
        assert!(outbound.headers().get("x-forwarded-for").is_none());
        assert!(outbound.headers().get("connection").is_none());
    }

    #[test]
    fn test_allow_list_match_is_case_sensitive() {
        let request = request_with(&[("host", "example.test"), ("COOKIE", "a=1")]);
        let uri = parse_target(&request.target_url).unwrap();
        let outbound = build_outbound_request(&uri, &request).unwrap();

        assert!(outbound.headers().get("host").is_none());
        assert!(outbound.headers().get("cookie").is_none());
    }

    #[test]
    fn test_accept_encoding_is_always_deflate() {
        let request = request_with(&[("Host", "example.test")]);
        let uri = parse_target(&request.target_url).unwrap();
        let outbound = build_outbound_request(&uri, &request).unwrap();
        assert_eq!(outbound.headers()["accept-encoding"], "deflate");

        // A client-supplied value is not in the allow-list and cannot
        // override the fixed one.
        let request = request_with(&[("Accept-Encoding", "gzip, br")]);
        let outbound = build_outbound_request(&uri, &request).unwrap();
        assert_eq!(outbound.headers()["accept-encoding"], "deflate");
    }

    #[test]
    fn test_status_line_formatting() {
        assert_eq!(
            format_status_line(Version::HTTP_11, StatusCode::OK),
            "HTTP/1.1 200 OK"
        );
        assert_eq!(
            format_status_line(Version::HTTP_10, StatusCode::NOT_FOUND),
            "HTTP/1.0 404 Not Found"
        );
        let unnamed = StatusCode::from_u16(599).unwrap();
        assert_eq!(format_status_line(Version::HTTP_11, unnamed), "HTTP/1.1 599");
    }
}
