//! Small shared helpers.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Read from `stream` until the end of an HTTP head (an empty line),
/// returning the head bytes and any bytes that arrived past it.
///
/// The overflow bytes matter: the peer may pipeline its first frame right
/// behind the handshake, and those bytes must seed the frame codec instead
/// of being lost.
pub(crate) async fn read_http_head<T: AsyncRead + Unpin>(
    stream: &mut T,
    max: usize,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = find_head_end(&buf) {
            let rest = buf.split_off(end);
            return Ok((buf, rest));
        }
        if buf.len() > max {
            return Err(Error::HandshakeTooLarge {
                size: buf.len(),
                max,
            });
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed(None));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}
