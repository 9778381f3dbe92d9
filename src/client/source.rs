//! Frame sources.
//!
//! [`FrameSource`] is the seam where stream decoders plug into the capture
//! engine. Two implementations ship: MJPEG over HTTP consumed directly, and
//! RTSP handed to an ffmpeg child process that re-emits MJPEG on a pipe, so
//! actual video decoding stays outside this crate. Both feed one JPEG
//! marker scanner.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tracing::debug;

use crate::client::Frame;
use crate::{Result, WallError};

pub const DEFAULT_FRAME_RATE: f32 = 25.0;

/// Frames larger than this mean we lost sync with the stream.
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

pub trait FrameSource: Send {
    /// Block until the next decoded frame arrives.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Nominal stream rate; scales the capture engine's skip-ahead.
    fn frame_rate(&self) -> f32 {
        DEFAULT_FRAME_RATE
    }
}

/// Pick a source implementation by URL scheme.
pub fn open_source(url: &str, timeout: Duration) -> Result<Box<dyn FrameSource>> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(Box::new(MjpegSource::open(url, timeout)?))
    } else if url.starts_with("rtsp://") {
        Ok(Box::new(FfmpegSource::spawn(url)?))
    } else {
        Err(WallError::Stream(format!(
            "no frame source for url '{}'",
            url
        )))
    }
}

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Scans a byte stream for complete SOI..EOI JPEG payloads, ignoring
/// whatever framing (multipart headers, pipe noise) sits between them.
struct JpegStream<R: Read> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: Read> JpegStream<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = [0u8; 8192];
        loop {
            if let Some(jpeg) = extract_jpeg(&mut self.buffer) {
                return Ok(jpeg);
            }
            if self.buffer.len() > MAX_FRAME_BYTES {
                self.buffer.clear();
                return Err(WallError::Stream("lost JPEG sync in stream".to_string()));
            }
            let n = self.reader.read(&mut chunk)?;
            if n == 0 {
                return Err(WallError::Stream("stream ended".to_string()));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

fn extract_jpeg(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let start = find_marker(buffer, SOI)?;
    let end = start + 2 + find_marker(&buffer[start + 2..], EOI)?;
    let jpeg = buffer[start..end + 2].to_vec();
    buffer.drain(..end + 2);
    Some(jpeg)
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

fn decode_jpeg(jpeg: &[u8]) -> Result<Frame> {
    let image = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)
        .map_err(|e| WallError::Stream(format!("JPEG decode failed: {}", e)))?;
    Ok(Frame {
        image: image.to_rgb8(),
    })
}

/// MJPEG over HTTP, e.g. a camera's `/mjpg/video.cgi` endpoint.
pub struct MjpegSource {
    stream: JpegStream<reqwest::blocking::Response>,
}

impl MjpegSource {
    pub fn open(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .timeout(None)
            .build()
            .map_err(|e| WallError::Stream(e.to_string()))?;

        let response = client
            .get(url)
            .send()
            .map_err(|e| WallError::Stream(format!("cannot open {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(WallError::Stream(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        debug!("MJPEG stream open: {}", url);
        Ok(Self {
            stream: JpegStream::new(response),
        })
    }
}

impl FrameSource for MjpegSource {
    fn read_frame(&mut self) -> Result<Frame> {
        let jpeg = self.stream.next_jpeg()?;
        decode_jpeg(&jpeg)
    }
}

/// RTSP via an ffmpeg child emitting MJPEG on stdout. Decode stays in the
/// external binary; we only parse its JPEG output.
pub struct FfmpegSource {
    child: Child,
    stream: JpegStream<std::process::ChildStdout>,
}

impl FfmpegSource {
    pub fn spawn(url: &str) -> Result<Self> {
        let mut child = Command::new("ffmpeg")
            .args([
                "-nostdin",
                "-loglevel",
                "error",
                "-rtsp_transport",
                "tcp",
                "-i",
                url,
                "-f",
                "mjpeg",
                "-q:v",
                "5",
                "-",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| WallError::Stream(format!("cannot spawn ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WallError::Stream("ffmpeg stdout unavailable".to_string()))?;

        debug!("ffmpeg transcoder started for {}", url);
        Ok(Self {
            child,
            stream: JpegStream::new(stdout),
        })
    }
}

impl FrameSource for FfmpegSource {
    fn read_frame(&mut self) -> Result<Frame> {
        let jpeg = self.stream.next_jpeg()?;
        decode_jpeg(&jpeg)
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
