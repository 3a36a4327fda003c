use crate::error::ProxyError;
use crate::headers::HeaderStore;
use log::warn;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// A parsed client request: the method and target URL from the request
/// line plus every well-formed header line that followed it.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub method: String,
    pub target_url: String,
    pub headers: HeaderStore,
}

/// Read one request head from the client stream.
///
/// The request line is split on single spaces and must carry at least
/// three tokens; the method must be exactly `GET`. Both checks happen
/// before anything is sent upstream. Header lines follow until a blank
/// line or the end of the stream, whichever comes first. A line without
/// a colon is skipped with a warning, a repeated name overwrites the
/// earlier value, and the target URL is kept verbatim.
pub async fn parse_client_request<R>(reader: &mut R) -> Result<ClientRequest, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(ProxyError::MalformedRequestLine(
            "empty request".to_string(),
        ));
    }

    let request_line = line.trim_end_matches(['\r', '\n']);
    let tokens: Vec<&str> = request_line.split(' ').collect();
    if tokens.len() < 3 {
        warn!("Bad request: {}", request_line);
        return Err(ProxyError::MalformedRequestLine(request_line.to_string()));
    }
    if tokens[0] != "GET" {
        return Err(ProxyError::UnsupportedMethod(tokens[0].to_string()));
    }
    let target_url = tokens[1].to_string();

    let mut headers = HeaderStore::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            // Client closed the stream before the blank line; keep
            // whatever headers arrived.
            break;
        }
        let header_line = line.trim_end_matches(['\r', '\n']);
        if header_line.trim().is_empty() {
            break;
        }
        match header_line.split_once(':') {
            Some((name, value)) => headers.insert(name, value.trim()),
            None => warn!("Invalid line in request header: {}", header_line),
        }
    }

    Ok(ClientRequest {
        method: "GET".to_string(),
        target_url,
        headers,
    })
}
