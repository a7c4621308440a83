//! Frame transport over an async byte stream.
//!
//! [`FrameCodec`] owns the socket plus its read/write buffers, and exposes a
//! timed [`read_frame`](FrameCodec::read_frame) that reassembles fragmented
//! messages, and a [`send_frame`](FrameCodec::send_frame) that always emits a
//! single final frame, masking it on the client side.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{apply_mask_fast, Frame, OpCode, LARGE_PAYLOAD};

/// Seed for the outgoing mask generator.
///
/// Falls back to system time if the OS entropy source fails. The result is
/// forced nonzero so the xorshift state never degenerates.
fn random_mask_seed() -> u32 {
    let mut buf = [0u8; 4];
    let seed = if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x12345678)
    };
    seed | 1
}

/// Frame-level codec over an async I/O stream.
pub struct FrameCodec<T> {
    io: T,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
    mask_outgoing: bool,
    max_frame_size: usize,
    mask_state: u32,
}

impl<T> FrameCodec<T> {
    /// Create a codec over `io`. `mask_outgoing` must be true on the client
    /// side and false on the server side.
    #[must_use]
    pub fn new(io: T, mask_outgoing: bool, config: &Config) -> Self {
        Self {
            io,
            read_buf: BytesMut::with_capacity(config.read_buffer_size),
            write_buf: Vec::with_capacity(config.write_buffer_size),
            mask_outgoing,
            max_frame_size: config.limits.max_frame_size,
            mask_state: random_mask_seed(),
        }
    }

    /// Whether outgoing frames are masked.
    #[must_use]
    pub fn mask_outgoing(&self) -> bool {
        self.mask_outgoing
    }

    /// Consume the codec, returning the underlying stream.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.io
    }

    /// Seed the read buffer with bytes that arrived ahead of the codec,
    /// e.g. frames pipelined behind the upgrade response.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.read_buf.extend_from_slice(bytes);
    }

    fn generate_mask(&mut self) -> [u8; 4] {
        // xorshift32 over a CSPRNG seed
        let mut x = self.mask_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.mask_state = x;
        x.to_le_bytes()
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> FrameCodec<T> {
    /// Read one complete frame, reassembling fragments.
    ///
    /// Waits up to `wait` for a frame header (two readable bytes) to appear;
    /// returns `Ok(None)` if none does. A zero `wait` polls the stream once.
    /// Once a frame has started, it is read to completion regardless of
    /// `wait`; a fragmented message is folded into a single frame carrying
    /// the first fragment's opcode.
    ///
    /// ## Errors
    ///
    /// - `Error::ProtocolViolation` if a continuation carries a different
    ///   data opcode than the first fragment
    /// - `Error::FrameTooLarge` if the reassembled payload exceeds the limit
    /// - `Error::InvalidUtf8` if a reassembled Text payload is not UTF-8
    /// - `Error::ConnectionClosed` on EOF
    pub async fn read_frame(&mut self, wait: Duration) -> Result<Option<Frame>> {
        let mut first = match self.read_raw(wait).await? {
            Some(frame) => frame,
            None => return Ok(None),
        };

        while !first.fin {
            // The message has started; continuations follow on the same
            // ordered stream, so block until the message completes.
            let next = match self.read_raw(Duration::from_secs(24 * 3600)).await? {
                Some(frame) => frame,
                None => return Err(Error::ConnectionClosed(None)),
            };

            // Lenient: accept Continuation or a repeat of the first opcode.
            if next.opcode != OpCode::Continuation && next.opcode != first.opcode {
                return Err(Error::ProtocolViolation(format!(
                    "Unexpected opcode {} inside fragmented message",
                    next.opcode
                )));
            }

            let total = first.payload.len() + next.payload.len();
            if total > self.max_frame_size {
                return Err(Error::FrameTooLarge {
                    size: total,
                    max: self.max_frame_size,
                });
            }

            first.payload.extend_from_slice(&next.payload);
            first.fin = next.fin;
        }

        if first.opcode == OpCode::Text {
            std::str::from_utf8(&first.payload)?;
        }

        Ok(Some(first))
    }

    /// Read one raw (possibly non-final) frame from the stream.
    async fn read_raw(&mut self, wait: Duration) -> Result<Option<Frame>> {
        let deadline = Instant::now() + wait;
        loop {
            if self.read_buf.len() >= 2 {
                match Frame::parse(&self.read_buf) {
                    Ok((frame, consumed)) => {
                        self.read_buf.advance(consumed);
                        if frame.payload.len() > self.max_frame_size {
                            return Err(Error::FrameTooLarge {
                                size: frame.payload.len(),
                                max: self.max_frame_size,
                            });
                        }
                        return Ok(Some(frame));
                    }
                    // Header is in: commit to the frame and read it in full.
                    Err(Error::IncompleteFrame { .. }) => self.fill().await?,
                    Err(e) => return Err(e),
                }
            } else if !self.fill_within(deadline).await? {
                return Ok(None);
            }
        }
    }

    /// Read more bytes into the buffer, or fail on EOF.
    async fn fill(&mut self) -> Result<()> {
        let n = self.io.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed(None));
        }
        Ok(())
    }

    /// Like [`fill`](Self::fill), but gives up at `deadline`. Always polls
    /// the stream at least once, so a zero budget still drains ready bytes.
    async fn fill_within(&mut self, deadline: Instant) -> Result<bool> {
        match timeout_at(deadline, self.fill()).await {
            Ok(result) => result.map(|()| true),
            Err(_) => Ok(false),
        }
    }

    /// Emit `frame` as a single final frame and flush.
    ///
    /// The payload is masked in place when the codec masks outgoing frames;
    /// payloads of [`LARGE_PAYLOAD`] bytes or more are written to the stream
    /// directly instead of being staged through the write buffer.
    pub async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        let mask = if self.mask_outgoing {
            Some(self.generate_mask())
        } else {
            None
        };

        self.write_buf.clear();
        frame.write_header(mask, &mut self.write_buf);

        let mut payload = frame.payload;
        if let Some(key) = mask {
            apply_mask_fast(&mut payload, key);
        }

        if payload.len() >= LARGE_PAYLOAD {
            self.io.write_all(&self.write_buf).await?;
            self.io.write_all(&payload).await?;
        } else {
            self.write_buf.extend_from_slice(&payload);
            self.io.write_all(&self.write_buf).await?;
        }

        self.io.flush().await?;
        Ok(())
    }
}
