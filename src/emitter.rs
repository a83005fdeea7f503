//! Response emission for resolved files
//!
//! Bodies are streamed straight from the file handle; a client disconnect
//! drops the stream and closes the handle with it.

use crate::error::GatewayBody;
use futures::TryStreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// Content type used when the file extension is not recognized
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Static extension to content-type table
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "text/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("xml") => "application/xml",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",
        Some("mp3") => "audio/mpeg",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("wasm") => "application/wasm",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Stream a resolved file as a 200 response. The caller has already
/// established that the path names a regular file, so any error here is a
/// filesystem failure, not a miss.
pub async fn emit(path: &Path) -> io::Result<Response<GatewayBody>> {
    let file = File::open(path).await?;
    let length = file.metadata().await?.len();

    let body = StreamBody::new(ReaderStream::new(file).map_ok(Frame::data)).boxed();

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type_for(path))
        .header(CONTENT_LENGTH, length)
        .body(body)
        .expect("valid response with StatusCode enum and static headers"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_content_type_table() {
        assert_eq!(content_type_for(Path::new("index.html")), "text/html");
        assert_eq!(content_type_for(Path::new("legacy.htm")), "text/html");
        assert_eq!(content_type_for(Path::new("style.css")), "text/css");
        assert_eq!(content_type_for(Path::new("app.js")), "text/javascript");
        assert_eq!(content_type_for(Path::new("report.pdf")), "application/pdf");
        assert_eq!(content_type_for(Path::new("photo.JPG")), "image/jpeg");
    }

    #[test]
    fn test_unknown_extension_is_octet_stream() {
        assert_eq!(content_type_for(Path::new("data.xyz")), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for(Path::new("Makefile")), DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_emit_streams_file_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.html");
        fs::write(&path, "<h1>hi</h1>").unwrap();

        let response = emit(&path).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/html");
        assert_eq!(response.headers().get(CONTENT_LENGTH).unwrap(), "11");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"<h1>hi</h1>");
    }

    #[tokio::test]
    async fn test_emit_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(emit(&dir.path().join("vanished.html")).await.is_err());
    }
}
