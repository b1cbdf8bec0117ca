//! Sink Dispatcher: turns one captured JPEG frame into the literal
//! multipart part and fans it out to every registered client.

use bytes::{BufMut, Bytes, BytesMut};

use super::registry::Registry;

const BOUNDARY: &str = "--boundary";

/// Builds one self-contained multipart part (boundary line, headers, blank
/// line, JPEG bytes) as a single `Bytes` so a client can never observe a
/// torn preamble.
fn build_part(jpeg: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(64 + jpeg.len());
    buf.put_slice(b"\r\n");
    buf.put_slice(BOUNDARY.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"Content-Type: image/jpeg\r\n");
    buf.put_slice(format!("Content-Length: {}\r\n\r\n", jpeg.len()).as_bytes());
    buf.put_slice(jpeg);
    buf.freeze()
}

/// Delivers `jpeg` to every client in `registry`. Returns `true` if at
/// least one client is still registered afterwards, so the Capture Loop
/// knows whether it should keep running.
pub fn dispatch_frame(registry: &Registry, jpeg: &[u8]) -> bool {
    let part = build_part(jpeg);
    registry.dispatch(part).clients_remaining > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_carries_boundary_headers_and_payload_in_one_buffer() {
        let part = build_part(b"\xff\xd8\xff\xd9");
        let text = String::from_utf8_lossy(&part);
        assert!(text.starts_with("\r\n--boundary\r\n"));
        assert!(text.contains("Content-Type: image/jpeg\r\n"));
        assert!(text.contains("Content-Length: 4\r\n\r\n"));
        assert!(part.ends_with(b"\xff\xd8\xff\xd9"));
    }
}
