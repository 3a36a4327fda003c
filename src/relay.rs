use crate::error::ProxyError;
use crate::spool::{InterceptSpool, transformed_path_for};
use crate::transform::ImageTransformer;
use crate::upstream::UpstreamResponse;
use http::HeaderMap;
use http_body_util::BodyExt;
use log::debug;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Response headers passed through to the client, written in this order;
/// the rest are dropped. Matching against received names is
/// case-insensitive and the canonical spelling below is what goes out.
pub const RESPONSE_HEADER_ALLOW_LIST: [&str; 4] =
    ["Server", "Expires", "Set-Cookie", "Content-Type"];

/// Content type that diverts a response body through the transformer.
/// The comparison is an exact match; parameterized variants pass through.
pub const INTERCEPT_CONTENT_TYPE: &str = "image/jpeg";

/// Copy granularity for body streaming.
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// How a session delivered its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Passthrough,
    Intercept,
}

/// Write the response head and body to the client.
///
/// The status line goes out unchanged, then the allow-listed headers, a
/// blank line, and the body. An `image/jpeg` body is first captured
/// whole into the session's spool and replaced by the transformer's
/// output; any other body streams through untouched. The sink is
/// flushed even when the body is empty.
pub async fn relay_response<W>(
    mut response: UpstreamResponse,
    client: &mut W,
    transformer: &dyn ImageTransformer,
    spool: &mut InterceptSpool,
) -> Result<DeliveryMode, ProxyError>
where
    W: AsyncWrite + Unpin,
{
    write_response_head(&response.status_line, &response.headers, client).await?;

    let mode = classify(response.content_type.as_deref());
    match mode {
        DeliveryMode::Passthrough => stream_passthrough(&mut response, client).await?,
        DeliveryMode::Intercept => {
            let captured = capture_body(&mut response, spool).await?;
            let transformed = run_transform(transformer, &captured, spool).await?;
            stream_file(&transformed, client).await?;
        }
    }

    client.flush().await?;
    Ok(mode)
}

pub fn classify(content_type: Option<&str>) -> DeliveryMode {
    match content_type {
        Some(INTERCEPT_CONTENT_TYPE) => DeliveryMode::Intercept,
        _ => DeliveryMode::Passthrough,
    }
}

// Takes the head fields apart from the response so no shared borrow of
// the body is held across the writes; the session future must stay Send.
async fn write_response_head<W>(
    status_line: &str,
    headers: &HeaderMap,
    client: &mut W,
) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    client.write_all(status_line.as_bytes()).await?;
    client.write_all(b"\r\n").await?;

    for name in RESPONSE_HEADER_ALLOW_LIST {
        for value in headers.get_all(name) {
            client.write_all(name.as_bytes()).await?;
            client.write_all(b": ").await?;
            client.write_all(value.as_bytes()).await?;
            client.write_all(b"\r\n").await?;
        }
    }
    client.write_all(b"\r\n").await?;
    Ok(())
}

async fn stream_passthrough<W>(
    response: &mut UpstreamResponse,
    client: &mut W,
) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = response.body.frame().await {
        if let Ok(data) = frame?.into_data() {
            client.write_all(&data).await?;
        }
    }
    Ok(())
}

/// Pull the whole body into the spool's original store.
async fn capture_body(
    response: &mut UpstreamResponse,
    spool: &mut InterceptSpool,
) -> Result<PathBuf, ProxyError> {
    let path = spool.original_path();
    spool.register(path.clone());

    let mut file = File::create(&path).await?;
    let mut captured = 0usize;
    while let Some(frame) = response.body.frame().await {
        if let Ok(data) = frame?.into_data() {
            file.write_all(&data).await?;
            captured += data.len();
        }
    }
    file.flush().await?;
    debug!("Captured {} byte body to {}", captured, path.display());
    Ok(path)
}

async fn run_transform(
    transformer: &dyn ImageTransformer,
    captured: &Path,
    spool: &mut InterceptSpool,
) -> Result<PathBuf, ProxyError> {
    // Register the conventional output location up front so a
    // half-written result is still removed when the transform fails.
    spool.register(transformed_path_for(captured));

    let transformed = transformer.transform(captured).await?;
    spool.register(transformed.clone());
    Ok(transformed)
}

/// Stream a spooled file to the client in fixed-size chunks.
async fn stream_file<W>(path: &Path, client: &mut W) -> Result<(), ProxyError>
where
    W: AsyncWrite + Unpin,
{
    let mut file = File::open(path).await?;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        client.write_all(&buf[..read]).await?;
    }
    Ok(())
}
