use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::camera::{decode_frame, CaptureError, CapturedFrame, FrameSource};

const HEADER_END: &[u8] = b"\r\n\r\n";
const DEFAULT_BOUNDARY: &str = "frame";

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--<boundary>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` bodies.
///
/// Feed arbitrary chunks with [`push`](Self::push) and drain complete parts
/// with [`next_part`](Self::next_part). Part headers are discarded.
pub struct MultipartParser {
    delimiter: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    /// Offset in `buffer` up to which no delimiter can start.
    scan_from: usize,
}

impl MultipartParser {
    pub fn new(boundary: &str) -> Self {
        // Some servers include the leading `--` in the declared boundary.
        let boundary = boundary.trim_start_matches("--");
        Self {
            delimiter: format!("--{boundary}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            scan_from: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub fn next_part(&mut self) -> Option<Bytes> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.delimiter) {
                        // Discard everything up to and including the boundary
                        let _ = self.buffer.split_to(pos + self.delimiter.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case boundary spans chunks
                        if self.buffer.len() > self.delimiter.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - self.delimiter.len());
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.scan_from = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        return None;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.scan_from..], &self.delimiter)
                    else {
                        self.scan_from = self.buffer.len().saturating_sub(self.delimiter.len());
                        return None;
                    };
                    let jpeg_end = self.scan_from + pos;
                    let mut part = self.buffer.split_to(jpeg_end);
                    // Strip trailing \r\n before boundary
                    if part.ends_with(b"\r\n") {
                        part.truncate(part.len() - 2);
                    }
                    let _ = self.buffer.split_to(self.delimiter.len());
                    self.state = ParseState::SeekingHeaderEnd;
                    if !part.is_empty() {
                        return Some(part.freeze());
                    }
                }
            }
        }
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Extracts the boundary parameter of a multipart `Content-Type`.
fn boundary_from_content_type(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"'))
    })
}

struct Connection {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    parser: MultipartParser,
}

/// Network camera serving an MJPEG stream (IP webcams, mjpg-streamer, ustreamer).
///
/// The connection is opened lazily and re-opened on the next read after any
/// stream error.
pub struct MjpegCamera {
    client: reqwest::Client,
    url: reqwest::Url,
    connection: Option<Connection>,
    seq: u64,
}

impl MjpegCamera {
    pub fn new(url: &str) -> Result<Self, CaptureError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| CaptureError::InvalidUrl(url.to_string(), e.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(CaptureError::Client)?;
        Ok(Self {
            client,
            url,
            connection: None,
            seq: 0,
        })
    }

    /// Takes the client and URL by value so the returned future only owns
    /// `Send` data and never borrows the camera.
    async fn connect(client: reqwest::Client, url: reqwest::Url) -> Result<Connection, CaptureError> {
        info!(%url, "connecting to MJPEG camera");
        let response = client
            .get(url)
            .send()
            .await
            .map_err(CaptureError::HttpConnect)?;

        if !response.status().is_success() {
            return Err(CaptureError::HttpStatus(response.status().as_u16()));
        }

        let boundary = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(boundary_from_content_type)
            .map(str::to_owned)
            .unwrap_or_else(|| {
                warn!("camera response has no multipart boundary, assuming '{DEFAULT_BOUNDARY}'");
                DEFAULT_BOUNDARY.to_owned()
            });

        info!(status = %response.status(), boundary, "connected to MJPEG camera");

        Ok(Connection {
            body: response.bytes_stream().boxed(),
            parser: MultipartParser::new(&boundary),
        })
    }

    async fn next_jpeg(&mut self) -> Result<Bytes, CaptureError> {
        if self.connection.is_none() {
            let connection = Self::connect(self.client.clone(), self.url.clone()).await?;
            self.connection = Some(connection);
        }
        let Some(conn) = self.connection.as_mut() else {
            return Err(CaptureError::StreamEnded);
        };

        loop {
            if let Some(jpeg) = conn.parser.next_part() {
                return Ok(jpeg);
            }
            match conn.body.next().await {
                Some(Ok(chunk)) => conn.parser.push(&chunk),
                Some(Err(e)) => {
                    self.connection = None;
                    return Err(CaptureError::HttpStream(e));
                }
                None => {
                    self.connection = None;
                    return Err(CaptureError::StreamEnded);
                }
            }
        }
    }
}

impl FrameSource for MjpegCamera {
    async fn next_frame(&mut self) -> Result<CapturedFrame, CaptureError> {
        let jpeg = self.next_jpeg().await?;
        let captured_at_ms = Utc::now().timestamp_millis();
        let seq = self.seq;
        self.seq += 1;
        debug!(seq, bytes = jpeg.len(), "captured frame");
        decode_frame(seq, captured_at_ms, jpeg).await
    }

    fn reset(&mut self) {
        if self.connection.take().is_some() {
            info!(url = %self.url, "dropping stalled camera connection");
        }
    }
}
