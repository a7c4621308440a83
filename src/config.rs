//! Configuration and limits for substrate connections.

use std::time::Duration;

/// Resource limits for a connection.
///
/// These limits prevent resource exhaustion and ensure bounded memory usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a frame payload, before and after reassembly.
    ///
    /// Default: 256 MB.
    pub max_frame_size: usize,

    /// Maximum size of handshake data in bytes.
    ///
    /// Default: 8 KB.
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 256 * 1024 * 1024,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(max_frame_size: usize, max_handshake_size: usize) -> Self {
        Self {
            max_frame_size,
            max_handshake_size,
        }
    }

    /// Validate that a frame size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`](crate::Error::FrameTooLarge) if `size`
    /// exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_frame_size {
            Err(crate::Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`](crate::Error::HandshakeTooLarge)
    /// if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_handshake_size {
            Err(crate::Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Connection configuration.
///
/// Tunables for the per-connection engine loop and the callback arbitrator.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Heartbeat interval. When set, the engine emits a Ping frame after
    /// this much time without a successful frame emission.
    ///
    /// Default: `None` (no heartbeat). `Config::server()` enables 20 s.
    pub heartbeat: Option<Duration>,

    /// Upper clamp on the engine's adaptive idle sleep.
    ///
    /// Default: `None` (adaptive schedule up to 500 ms).
    pub loop_delay: Option<Duration>,

    /// How long an outbound callback waits to reserve the socket before
    /// giving up with a not-found status.
    ///
    /// Default: 5 seconds.
    pub acquire_timeout: Duration,

    /// How long a blocking callback waits for the peer's answer frame.
    ///
    /// Default: 30 seconds.
    pub answer_timeout: Duration,

    /// Mask outgoing frames. RFC 6455 requires this on the client side and
    /// forbids it on the server side.
    ///
    /// Default: true.
    pub mask_frames: bool,

    /// Read buffer size (in bytes).
    ///
    /// Default: 8 KB.
    pub read_buffer_size: usize,

    /// Write buffer size (in bytes).
    ///
    /// Default: 8 KB.
    pub write_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            heartbeat: None,
            loop_delay: None,
            acquire_timeout: Duration::from_secs(5),
            answer_timeout: Duration::from_secs(30),
            mask_frames: true,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the heartbeat interval. `None` disables the heartbeat.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Option<Duration>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Clamp the engine's adaptive idle sleep.
    #[must_use]
    pub fn with_loop_delay(mut self, delay: Duration) -> Self {
        self.loop_delay = Some(delay);
        self
    }

    /// Set the callback socket-acquisition timeout.
    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the blocking-callback answer timeout.
    #[must_use]
    pub fn with_answer_timeout(mut self, timeout: Duration) -> Self {
        self.answer_timeout = timeout;
        self
    }

    /// Configure for the server role: no outgoing masking, and the server
    /// drives the heartbeat.
    #[must_use]
    pub fn server() -> Self {
        Self {
            mask_frames: false,
            heartbeat: Some(Duration::from_secs(20)),
            ..Default::default()
        }
    }

    /// Configure for the client role: outgoing frames are masked and the
    /// heartbeat is left to the server.
    #[must_use]
    pub fn client() -> Self {
        Self {
            mask_frames: true,
            heartbeat: None,
            ..Default::default()
        }
    }
}
