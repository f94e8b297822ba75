use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use log::debug;

use crate::relay::events::OutgoingMessage;
use crate::types::MessageKind;
use crate::utils::{Error, Result};

/// Builds an image `chat_message` payload from a local file, or rejects it
/// before anything is read if it exceeds `limit` bytes.
pub async fn load_image(path: &Path, limit: u64) -> Result<OutgoingMessage> {
    let content = read_as_data_uri(path, limit).await?;
    Ok(OutgoingMessage {
        kind: MessageKind::Image,
        content,
        file_name: None,
    })
}

/// Builds a file `chat_message` payload carrying the file's base name.
pub async fn load_file(path: &Path, limit: u64) -> Result<OutgoingMessage> {
    let content = read_as_data_uri(path, limit).await?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment")
        .to_string();
    Ok(OutgoingMessage {
        kind: MessageKind::File,
        content,
        file_name: Some(file_name),
    })
}

async fn read_as_data_uri(path: &Path, limit: u64) -> Result<String> {
    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > limit {
        return Err(Error::Attachment(format!(
            "{} is {} bytes, over the {} byte limit",
            path.display(),
            metadata.len(),
            limit
        )));
    }

    let bytes = tokio::fs::read(path).await?;
    let uri = format!("data:{};base64,{}", mime_for(path), STANDARD.encode(&bytes));
    debug!(
        "Encoded {} ({} bytes) into a {} byte data URI",
        path.display(),
        bytes.len(),
        uri.len()
    );
    Ok(uri)
}

/// Decodes a `data:<mime>;base64,<payload>` URI back into bytes; the inverse
/// of the sender, used to save a received attachment to disk.
pub fn decode_data_uri(uri: &str) -> Result<(String, Bytes)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| Error::Attachment("not a data URI".to_string()))?;
    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| Error::Attachment("data URI is not base64-encoded".to_string()))?;
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| Error::Attachment(format!("invalid base64 payload: {}", e)))?;
    Ok((mime.to_string(), Bytes::from(bytes)))
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("txt") => "text/plain",
        Some("pdf") => "application/pdf",
        Some("json") => "application/json",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}
