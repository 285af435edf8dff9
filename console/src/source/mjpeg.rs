//! Incremental MJPEG (multipart/x-mixed-replace) parser.
//!
//! HTTP chunk boundaries do not line up with part boundaries, so the
//! parser buffers input and walks a small state machine: find the next
//! boundary marker, skip the part headers, then collect bytes until the
//! following marker closes the frame body.

use bytes::BytesMut;

const HEADER_END: &[u8] = b"\r\n\r\n";
const DEFAULT_BOUNDARY: &str = "frame";

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParseState {
    SeekingBoundary,
    SeekingHeaderEnd,
    CollectingBody,
}

pub(super) struct MjpegParser {
    /// Full boundary line, e.g. `--frame\r\n`.
    marker: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    /// Where to resume scanning for the closing marker, so bytes already
    /// searched are not searched again on the next chunk.
    scan_from: usize,
}

impl MjpegParser {
    pub(super) fn new(boundary_token: &str) -> Self {
        Self {
            marker: format!("--{boundary_token}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            scan_from: 0,
        }
    }

    /// Feeds one chunk of the response body and returns every frame body
    /// completed by it, in stream order.
    pub(super) fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.marker) {
                        let _ = self.buffer.split_to(pos + self.marker.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep a marker-sized tail in case it arrives split
                        // across chunks, drop the rest.
                        if self.buffer.len() > self.marker.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - self.marker.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.scan_from = 0;
                        self.state = ParseState::CollectingBody;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingBody => {
                    if let Some(pos) =
                        find_subsequence(&self.buffer[self.scan_from..], &self.marker)
                    {
                        let body_end = self.scan_from + pos;
                        // The body is terminated by CRLF before the next marker.
                        let mut end = body_end;
                        if end >= 2 && &self.buffer[end - 2..end] == b"\r\n" {
                            end -= 2;
                        }
                        let body = self.buffer[..end].to_vec();
                        let _ = self.buffer.split_to(body_end + self.marker.len());
                        if !body.is_empty() {
                            frames.push(body);
                        }
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        self.scan_from = self.buffer.len().saturating_sub(self.marker.len());
                        break;
                    }
                }
            }
        }

        frames
    }
}

/// Extracts the boundary token from a `Content-Type` header value, or
/// `None` when the response is not a multipart stream at all. A missing
/// boundary parameter falls back to the token most cameras use.
pub(super) fn boundary_from_content_type(value: &str) -> Option<String> {
    let mut parts = value.split(';');
    let mime = parts.next()?.trim();
    if !mime.to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }
    for param in parts {
        let param = param.trim();
        if param.to_ascii_lowercase().starts_with("boundary=") {
            let token = param["boundary=".len()..]
                .trim_matches('"')
                .trim_start_matches("--");
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    Some(DEFAULT_BOUNDARY.to_string())
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a stream body with the given frame payloads, terminated by
    /// the opening marker of the next (never completed) part. Frames only
    /// finish when the following marker shows up.
    fn stream_bytes(frames: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for frame in frames {
            out.extend_from_slice(b"--frame\r\n");
            out.extend_from_slice(b"Content-Type: image/jpeg\r\nContent-Length: 0\r\n\r\n");
            out.extend_from_slice(frame);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"--frame\r\n");
        out
    }

    #[test]
    fn parses_single_frame_in_one_chunk() {
        let mut parser = MjpegParser::new("frame");
        let frames = parser.push(&stream_bytes(&[b"\xFF\xD8jpegbody\xFF\xD9"]));
        assert_eq!(frames, vec![b"\xFF\xD8jpegbody\xFF\xD9".to_vec()]);
    }

    #[test]
    fn parses_multiple_frames_in_one_chunk() {
        let mut parser = MjpegParser::new("frame");
        let frames = parser.push(&stream_bytes(&[b"first", b"second"]));
        assert_eq!(frames, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn reassembles_frames_fed_byte_by_byte() {
        let mut parser = MjpegParser::new("frame");
        let mut frames = Vec::new();
        for byte in stream_bytes(&[b"alpha", b"beta"]) {
            frames.extend(parser.push(&[byte]));
        }
        assert_eq!(frames, vec![b"alpha".to_vec(), b"beta".to_vec()]);
    }

    #[test]
    fn strips_part_headers_and_trailing_crlf() {
        let mut parser = MjpegParser::new("frame");
        let frames = parser.push(&stream_bytes(&[b"payload"]));
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].windows(4).any(|w| w == b"\r\n\r\n"));
        assert!(!frames[0].ends_with(b"\r\n"));
    }

    #[test]
    fn skips_empty_frame_bodies() {
        let mut parser = MjpegParser::new("frame");
        let frames = parser.push(&stream_bytes(&[b"", b"real"]));
        assert_eq!(frames, vec![b"real".to_vec()]);
    }

    #[test]
    fn honors_custom_boundary_token() {
        let mut parser = MjpegParser::new("live-edge");
        let stream =
            b"--live-edge\r\nContent-Type: image/jpeg\r\n\r\nbody\r\n--live-edge\r\n";
        let frames = parser.push(stream);
        assert_eq!(frames, vec![b"body".to_vec()]);
    }

    #[test]
    fn boundary_parsed_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace; boundary=frame"),
            Some("frame".to_string())
        );
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace; boundary=\"cam42\""),
            Some("cam42".to_string())
        );
        // Some servers put the dashes in the parameter itself.
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace; Boundary=--edge"),
            Some("edge".to_string())
        );
    }

    #[test]
    fn boundary_defaults_when_parameter_missing() {
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace"),
            Some("frame".to_string())
        );
    }

    #[test]
    fn non_multipart_content_type_is_rejected() {
        assert_eq!(boundary_from_content_type("image/jpeg"), None);
        assert_eq!(boundary_from_content_type("text/html; charset=utf-8"), None);
    }
}
