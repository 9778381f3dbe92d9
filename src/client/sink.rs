//! Mosaic output sinks.
//!
//! The compositor hands each finished mosaic to a [`MosaicSink`]. The
//! bundled preview sink serves the mosaic as an MJPEG stream over HTTP so
//! an operator can watch any display node from a browser; `NullSink` is for
//! headless runs and tests.

use std::convert::Infallible;
use std::io::Cursor;

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use tokio::sync::broadcast;
use tokio_stream::StreamExt as _;
use tracing::info;

use crate::client::Frame;
use crate::{Result, WallError};

pub trait MosaicSink: Send {
    fn present(&mut self, frame: &Frame) -> Result<()>;
}

/// Discards every frame.
pub struct NullSink;

impl MosaicSink for NullSink {
    fn present(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

pub const MJPEG_BOUNDARY: &str = "wallcast_frame";
const JPEG_BUFFER_CAPACITY: usize = 256 * 1024;

/// JPEG-encodes mosaics into a broadcast channel consumed by the preview
/// HTTP route. Encoding is skipped entirely while nobody is watching.
pub struct MjpegPreviewSink {
    tx: broadcast::Sender<Bytes>,
}

impl MjpegPreviewSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(8);
        Self { tx }
    }

    pub fn sender(&self) -> broadcast::Sender<Bytes> {
        self.tx.clone()
    }
}

impl Default for MjpegPreviewSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MosaicSink for MjpegPreviewSink {
    fn present(&mut self, frame: &Frame) -> Result<()> {
        if self.tx.receiver_count() == 0 {
            return Ok(());
        }

        let mut jpeg = Vec::with_capacity(JPEG_BUFFER_CAPACITY);
        image::DynamicImage::ImageRgb8(frame.image.clone())
            .write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .map_err(|e| WallError::Stream(format!("preview encode failed: {}", e)))?;

        // Lagging viewers just miss frames.
        let _ = self.tx.send(Bytes::from(jpeg));
        Ok(())
    }
}

/// Router serving the preview at `/stream`.
pub fn preview_router(tx: broadcast::Sender<Bytes>) -> Router {
    Router::new()
        .route("/stream", get(stream_handler))
        .with_state(tx)
}

async fn stream_handler(State(tx): State<broadcast::Sender<Bytes>>) -> impl IntoResponse {
    info!("Preview viewer connected");
    let rx = tx.subscribe();

    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(|result| {
        let jpeg = result.ok()?;
        let mut part = Vec::with_capacity(jpeg.len() + 128);
        part.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Type: image/jpeg\r\nContent-Length: {length}\r\n\r\n",
                boundary = MJPEG_BOUNDARY,
                length = jpeg.len()
            )
            .as_bytes(),
        );
        part.extend_from_slice(&jpeg);
        part.extend_from_slice(b"\r\n");
        Some(Ok::<_, Infallible>(Bytes::from(part)))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", MJPEG_BOUNDARY),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
