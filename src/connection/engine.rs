//! Per-connection engine loop.
//!
//! One long-lived task per connection runs [`Connection::process_loop`],
//! interleaving inbound frame handling, heartbeat pings, deferred-send
//! draining, and adaptive idle backoff. Every touch of the socket happens
//! under the connection's exclusive lock, which the loop shares with the
//! callback arbitrator.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::codec::FrameCodec;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{Frame, OpCode};
use crate::rest::{RequestContext, ResponseContext};
use crate::subproto::{Subprotocol, SubprotocolKind};

/// Lock budget for one engine iteration. Short: the loop runs in the
/// background and yields to foreground callbacks.
const ENGINE_LOCK_BUDGET: Duration = Duration::from_millis(5);
/// Grace sleep after a failed iteration before the loop exits.
const ERROR_BACKOFF: Duration = Duration::from_millis(10);
/// How long a graceful close waits for the peer's echo.
const CLOSE_ECHO_WAIT: Duration = Duration::from_secs(1);
/// How long shutdown waits for in-flight callback acquirers.
const DRAIN_ACQUIRERS_WAIT: Duration = Duration::from_secs(5);

/// User handler invoked for every inbound REST request.
pub type RestHandler = Arc<dyn Fn(&RequestContext) -> ResponseContext + Send + Sync>;

/// User handler invoked for every inbound chat frame.
pub type ChatHandler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// The frame consumer installed on a connection.
#[derive(Clone)]
pub enum Handler {
    /// REST request/answer dispatch.
    Rest(RestHandler),
    /// Raw frame delivery for chat protocols.
    Chat(ChatHandler),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Rest(_) => write!(f, "Handler::Rest(..)"),
            Handler::Chat(_) => write!(f, "Handler::Chat(..)"),
        }
    }
}

/// Result of one engine iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing to do; the loop backs off adaptively.
    Idle,
    /// A ping or pong was handled.
    Ping,
    /// A data frame was processed.
    Done,
    /// The iteration failed; the connection is torn down.
    Error,
    /// The peer closed; the close was echoed back.
    Closed,
}

/// Socket state guarded by the connection lock.
pub(crate) struct Core<T> {
    pub(crate) codec: FrameCodec<T>,
    /// Timestamp of the last successful frame emission.
    pub(crate) last_emit: Instant,
}

/// One upgraded connection.
///
/// The socket lives behind an exclusive async lock acquired at exactly
/// three sites: the engine loop, the callback arbitrator, and graceful
/// close. A deferred-send FIFO lets other tasks queue frames without
/// blocking on that lock.
pub struct Connection<T> {
    pub(crate) core: Mutex<Core<T>>,
    pub(crate) proto: Subprotocol,
    pub(crate) handler: Handler,
    pub(crate) config: Config,
    pub(crate) pending: StdMutex<VecDeque<Frame>>,
    pub(crate) tries_in_flight: AtomicUsize,
    pub(crate) terminating: AtomicBool,
    pub(crate) closed: AtomicBool,
}

impl<T> Connection<T> {
    /// Wrap an upgraded stream with its negotiated subprotocol.
    pub fn new(io: T, proto: Subprotocol, handler: Handler, config: Config) -> Arc<Self> {
        Self::with_buffered(io, Vec::new(), proto, handler, config)
    }

    /// Like [`new`](Self::new), seeding the read path with bytes that
    /// arrived behind the handshake.
    pub fn with_buffered(
        io: T,
        buffered: Vec<u8>,
        proto: Subprotocol,
        handler: Handler,
        config: Config,
    ) -> Arc<Self> {
        let mut codec = FrameCodec::new(io, config.mask_frames, &config);
        if !buffered.is_empty() {
            codec.feed(&buffered);
        }
        Arc::new(Self {
            core: Mutex::new(Core {
                codec,
                last_emit: Instant::now(),
            }),
            proto,
            handler,
            config,
            pending: StdMutex::new(VecDeque::new()),
            tries_in_flight: AtomicUsize::new(0),
            terminating: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// The negotiated subprotocol.
    #[must_use]
    pub fn subprotocol(&self) -> &Subprotocol {
        &self.proto
    }

    /// The connection configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether the connection saw a close frame or a fatal error.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Queue a frame for asynchronous emission. The engine drains the queue
    /// in FIFO order at the start of its next iteration.
    pub fn queue_frame(&self, frame: Frame) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(frame);
    }

    fn pop_pending(&self) -> Option<Frame> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Adaptive idle backoff by time since the last processed data frame,
    /// clamped by the `loop_delay` tunable.
    fn idle_delay(&self, idle_for: Duration) -> Duration {
        let ms = idle_for.as_millis();
        let delay = Duration::from_millis(match ms {
            0..=200 => 1,
            201..=500 => 5,
            501..=2000 => 50,
            2001..=5000 => 100,
            _ => 500,
        });
        match self.config.loop_delay {
            Some(clamp) => delay.min(clamp),
            None => delay,
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection<T> {
    /// Run one engine iteration: acquire the lock within its budget, drain
    /// the deferred-send queue, then handle at most one inbound frame.
    pub async fn process_one(&self) -> Step {
        match timeout(ENGINE_LOCK_BUDGET, self.core.lock()).await {
            Ok(mut core) => self.step(&mut core).await,
            Err(_) => Step::Idle,
        }
    }

    /// The engine loop. Returns true on graceful close, false on error or
    /// termination.
    pub async fn process_loop(self: Arc<Self>) -> bool {
        let mut last_done = Instant::now();
        loop {
            if self.is_terminating() {
                return false;
            }
            match self.process_one().await {
                Step::Done => {
                    last_done = Instant::now();
                    tokio::task::yield_now().await;
                }
                Step::Ping => sleep(Duration::from_millis(1)).await,
                Step::Idle => sleep(self.idle_delay(last_done.elapsed())).await,
                Step::Error => {
                    self.mark_closed();
                    sleep(ERROR_BACKOFF).await;
                    return false;
                }
                Step::Closed => return true,
            }
        }
    }

    /// Spawn the engine loop on its own task.
    pub fn spawn_engine(self: &Arc<Self>) -> tokio::task::JoinHandle<bool>
    where
        T: 'static,
    {
        let conn = Arc::clone(self);
        tokio::spawn(conn.process_loop())
    }

    /// One iteration against an already-acquired core. Shared with the
    /// callback arbitrator's drain-before-send pass.
    pub(crate) async fn step(&self, core: &mut Core<T>) -> Step {
        while let Some(frame) = self.pop_pending() {
            // send() stamps last_emit, which also resets the heartbeat
            // after a successful drain.
            if self.send(core, frame).await.is_err() {
                return Step::Error;
            }
        }

        let frame = match core.codec.read_frame(Duration::ZERO).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                if !self.is_terminating() {
                    if let Some(heartbeat) = self.config.heartbeat {
                        if core.last_emit.elapsed() > heartbeat {
                            return match self.send(core, Frame::ping(Vec::new())).await {
                                Ok(()) => Step::Ping,
                                Err(_) => Step::Error,
                            };
                        }
                    }
                }
                return Step::Idle;
            }
            Err(Error::ConnectionClosed(_)) => {
                debug!("connection dropped without close handshake");
                self.mark_closed();
                return Step::Error;
            }
            Err(e) => {
                warn!(error = %e, "inbound frame failed");
                return Step::Error;
            }
        };

        self.dispatch(core, frame).await
    }

    /// Route one inbound frame by opcode.
    async fn dispatch(&self, core: &mut Core<T>, frame: Frame) -> Step {
        match frame.opcode {
            OpCode::Ping => match self.send(core, Frame::pong(frame.payload)).await {
                Ok(()) => Step::Ping,
                Err(_) => Step::Error,
            },
            OpCode::Pong => Step::Ping,
            OpCode::Close => {
                let _ = self.send(core, Frame::new(OpCode::Close, frame.payload)).await;
                self.mark_closed();
                Step::Closed
            }
            OpCode::Text | OpCode::Binary => self.process_data(core, frame).await,
            OpCode::Reserved(value) => {
                // Tolerated, never echoed.
                debug!(opcode = value, "ignoring reserved opcode");
                Step::Done
            }
            OpCode::Continuation => Step::Done,
        }
    }

    /// Feed a data frame to the protocol: chat frames go straight to the
    /// handler; REST frames are decoded, dispatched, and answered unless the
    /// caller asked for no answer.
    async fn process_data(&self, core: &mut Core<T>, frame: Frame) -> Step {
        let (codec, handler) = match (&self.proto.kind, &self.handler) {
            (SubprotocolKind::Chat, Handler::Chat(handler)) => {
                handler(&frame);
                return Step::Done;
            }
            (SubprotocolKind::Rest(codec), Handler::Rest(handler)) => (codec, handler),
            _ => {
                debug!(proto = %self.proto.name, "no handler for inbound data frame");
                return Step::Done;
            }
        };

        let request = match codec.decode_request(&frame.payload) {
            Ok(Some(request)) => request,
            Ok(None) => {
                // The peer's stale answer from a crossed callback.
                debug!("dropping misdirected answer frame");
                return Step::Done;
            }
            Err(e) => {
                debug!(error = %e, "dropping undecodable frame");
                return Step::Done;
            }
        };

        let no_answer = request.no_answer;
        let response = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(&request))) {
            Ok(response) => response,
            Err(_) => {
                warn!(url = %request.url, "request handler panicked");
                return Step::Error;
            }
        };

        if !no_answer {
            let reply = match codec.encode_answer(&response) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(error = %e, "answer encoding failed");
                    return Step::Error;
                }
            };
            if self.send(core, reply).await.is_err() {
                return Step::Error;
            }
        }

        Step::Done
    }

    /// Emit a frame and stamp the emission clock.
    pub(crate) async fn send(&self, core: &mut Core<T>, frame: Frame) -> Result<()> {
        core.codec.send_frame(frame).await?;
        core.last_emit = Instant::now();
        Ok(())
    }

    /// Graceful close: wait out in-flight callback acquirers, send the
    /// close frame, and observe the peer's echo for up to one second.
    pub async fn close(&self) {
        self.terminating.store(true, Ordering::Release);

        let waited = Instant::now();
        while self.tries_in_flight.load(Ordering::Acquire) > 0
            && waited.elapsed() < DRAIN_ACQUIRERS_WAIT
        {
            sleep(Duration::from_millis(1)).await;
        }

        // Once a close has been observed, only its echo may ever be sent.
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Ok(mut core) = timeout(CLOSE_ECHO_WAIT, self.core.lock()).await {
            if core.codec.send_frame(Frame::close(Some(1000), "")).await.is_ok() {
                let _ = core.codec.read_frame(CLOSE_ECHO_WAIT).await;
            }
        }
    }
}
