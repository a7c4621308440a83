//! Callback arbitration: blocking RPC over the shared socket.
//!
//! Either side may initiate a REST call on a connection that is otherwise
//! driven by the engine loop. The connection lock serializes initiators,
//! and the drain-before-send pass guarantees that when the request goes out
//! the next inbound data frame (absent an in-flight race) is its answer.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::debug;

use crate::connection::engine::{Connection, Core, Step};
use crate::protocol::{Frame, OpCode};
use crate::rest::{status, RequestContext, ResponseContext};

/// How an out-of-band callback is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackMode {
    /// Reserve the socket, send, and block for the peer's answer.
    BlockWithAnswer,
    /// Reserve the socket and send; return immediately after the write.
    BlockWithoutAnswer,
    /// Queue the frame for the engine to send; never touches the socket.
    NonBlockWithoutAnswer,
}

/// Result of a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The peer's decoded answer.
    Answer(ResponseContext),
    /// The request was sent (or queued) without waiting for an answer.
    Sent,
    /// The socket could not be reserved, the answer timed out, or the frame
    /// that arrived was not our answer. The connection stays alive.
    NotFound,
    /// The connection closed mid-call; the transport is dead.
    Closed,
}

impl CallbackOutcome {
    /// Collapse the outcome to an HTTP-style status. [`CallbackOutcome::Closed`]
    /// maps to the internal closed sentinel which callers translate at the
    /// public boundary.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            CallbackOutcome::Answer(response) => response.status,
            CallbackOutcome::Sent => status::OK,
            CallbackOutcome::NotFound => status::NOT_FOUND,
            CallbackOutcome::Closed => status::WEBSOCKET_CLOSED,
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection<T> {
    /// Initiate a REST call toward the peer.
    ///
    /// Returns [`CallbackOutcome::NotFound`] when the connection carries a
    /// non-REST protocol, is already closed, or the socket cannot be
    /// reserved within `acquire_timeout`.
    pub async fn notify_callback(
        &self,
        ctxt: RequestContext,
        mode: CallbackMode,
    ) -> CallbackOutcome {
        if self.is_closed() || self.is_terminating() {
            return CallbackOutcome::NotFound;
        }
        let Some(codec) = self.proto.payload_codec() else {
            return CallbackOutcome::NotFound;
        };
        let frame = match codec.encode_request(&ctxt) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "callback request encoding failed");
                return CallbackOutcome::NotFound;
            }
        };

        match mode {
            CallbackMode::NonBlockWithoutAnswer => {
                self.queue_frame(frame);
                CallbackOutcome::Sent
            }
            CallbackMode::BlockWithoutAnswer => self.blocking_call(frame, false).await,
            CallbackMode::BlockWithAnswer => self.blocking_call(frame, true).await,
        }
    }

    /// Reserve the socket and run the call, keeping the in-flight counter
    /// honest so shutdown can wait us out.
    async fn blocking_call(&self, frame: Frame, want_answer: bool) -> CallbackOutcome {
        self.tries_in_flight.fetch_add(1, Ordering::SeqCst);
        let outcome = self.blocking_call_locked(frame, want_answer).await;
        self.tries_in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn blocking_call_locked(&self, frame: Frame, want_answer: bool) -> CallbackOutcome {
        let mut core = match timeout(self.config.acquire_timeout, self.core.lock()).await {
            Ok(core) => core,
            Err(_) => return CallbackOutcome::NotFound,
        };
        if self.is_terminating() || self.is_closed() {
            return CallbackOutcome::NotFound;
        }

        // Drain-before-send: the socket buffer may already hold the peer's
        // request; process everything buffered so the next inbound frame
        // after our send is our answer.
        loop {
            match self.step(&mut core).await {
                Step::Idle => break,
                Step::Done | Step::Ping => {}
                Step::Error => return CallbackOutcome::NotFound,
                Step::Closed => return CallbackOutcome::Closed,
            }
        }

        if self.send(&mut core, frame).await.is_err() {
            return CallbackOutcome::NotFound;
        }
        if !want_answer {
            return CallbackOutcome::Sent;
        }

        self.await_answer(&mut core).await
    }

    /// Block on the next data frame and decode it as our answer. Control
    /// frames are serviced in passing; a close surfaces as
    /// [`CallbackOutcome::Closed`].
    async fn await_answer(&self, core: &mut Core<T>) -> CallbackOutcome {
        let Some(codec) = self.proto.payload_codec() else {
            return CallbackOutcome::NotFound;
        };
        let deadline = Instant::now() + self.config.answer_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return CallbackOutcome::NotFound;
            }

            let frame = match core.codec.read_frame(remaining).await {
                Ok(Some(frame)) => frame,
                Ok(None) => return CallbackOutcome::NotFound,
                Err(_) => {
                    self.mark_closed();
                    return CallbackOutcome::NotFound;
                }
            };

            match frame.opcode {
                OpCode::Ping => {
                    if self.send(core, Frame::pong(frame.payload)).await.is_err() {
                        return CallbackOutcome::NotFound;
                    }
                }
                OpCode::Pong => {}
                OpCode::Close => {
                    let _ = self
                        .send(core, Frame::new(OpCode::Close, frame.payload))
                        .await;
                    self.mark_closed();
                    return CallbackOutcome::Closed;
                }
                OpCode::Text | OpCode::Binary => {
                    return match codec.decode_answer(&frame.payload) {
                        Ok(Some(response)) => CallbackOutcome::Answer(response),
                        Ok(None) => {
                            // The peer's crossed request landed where our
                            // answer was expected. It is dropped, not
                            // re-dispatched; both callers see NotFound and
                            // the connection stays usable.
                            debug!("crossed callback: dropping peer request");
                            CallbackOutcome::NotFound
                        }
                        Err(e) => {
                            debug!(error = %e, "answer decoding failed");
                            CallbackOutcome::NotFound
                        }
                    };
                }
                OpCode::Reserved(_) | OpCode::Continuation => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::connection::engine::Handler;
    use crate::subproto::Subprotocol;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{duplex, DuplexStream};

    type Conn = Arc<Connection<DuplexStream>>;

    fn linked_pair(uri_handler_status: u16) -> (Conn, Conn) {
        let (client_io, server_io) = duplex(64 * 1024);

        let server_handler = Handler::Rest(Arc::new(move |req: &RequestContext| {
            ResponseContext::with_status(uri_handler_status)
                .with_body("text/plain", req.url.clone().into_bytes())
        }));
        let client_handler = Handler::Rest(Arc::new(|_: &RequestContext| {
            ResponseContext::with_status(201)
        }));

        let server = Connection::new(
            server_io,
            Subprotocol::json(""),
            server_handler,
            Config::server().with_heartbeat(None),
        );
        let client = Connection::new(
            client_io,
            Subprotocol::json(""),
            client_handler,
            Config::client(),
        );
        (client, server)
    }

    #[tokio::test]
    async fn test_block_with_answer_roundtrip() {
        let (client, server) = linked_pair(200);
        let engine = server.spawn_engine();

        let outcome = client
            .notify_callback(RequestContext::new("GET", "/target"), CallbackMode::BlockWithAnswer)
            .await;

        match outcome {
            CallbackOutcome::Answer(response) => {
                assert_eq!(response.status, 200);
                assert_eq!(response.content, b"/target");
            }
            other => panic!("expected answer, got {:?}", other),
        }

        server.close().await;
        let _ = engine.await;
    }

    #[tokio::test]
    async fn test_push_from_server_side() {
        let (client, server) = linked_pair(200);
        let engine = client.spawn_engine();

        // The server pushes into the client; the client's handler answers 201.
        let outcome = server
            .notify_callback(RequestContext::new("POST", "/push"), CallbackMode::BlockWithAnswer)
            .await;
        assert_eq!(outcome.status(), 201);

        client.close().await;
        let _ = engine.await;
    }

    #[tokio::test]
    async fn test_block_without_answer_returns_sent() {
        let (client, server) = linked_pair(200);
        let engine = server.spawn_engine();

        let outcome = client
            .notify_callback(
                RequestContext::new("GET", "/fire").without_answer(),
                CallbackMode::BlockWithoutAnswer,
            )
            .await;
        assert_eq!(outcome, CallbackOutcome::Sent);
        assert_eq!(outcome.status(), 200);

        server.close().await;
        let _ = engine.await;
    }

    #[tokio::test]
    async fn test_nonblocking_mode_is_drained_by_engine() {
        let (client, server) = linked_pair(200);
        let server_engine = server.spawn_engine();

        let outcome = client
            .notify_callback(
                RequestContext::new("GET", "/queued").without_answer(),
                CallbackMode::NonBlockWithoutAnswer,
            )
            .await;
        assert_eq!(outcome, CallbackOutcome::Sent);

        // The client engine drains the queue; the server engine dispatches.
        let client_engine = client.spawn_engine();
        tokio::time::sleep(Duration::from_millis(100)).await;

        client.close().await;
        server.close().await;
        let _ = client_engine.await;
        let _ = server_engine.await;
    }

    #[tokio::test]
    async fn test_answer_timeout_returns_not_found() {
        let (client_io, _server_io) = duplex(1024);
        let client = Connection::new(
            client_io,
            Subprotocol::json(""),
            Handler::Rest(Arc::new(|_: &RequestContext| ResponseContext::default())),
            Config::client().with_answer_timeout(Duration::from_millis(50)),
        );

        // Nobody answers on the other half.
        let outcome = client
            .notify_callback(RequestContext::new("GET", "/void"), CallbackMode::BlockWithAnswer)
            .await;
        assert_eq!(outcome, CallbackOutcome::NotFound);
        assert!(!client.is_closed());
    }

    #[tokio::test]
    async fn test_callback_after_close_is_not_found() {
        let (client, server) = linked_pair(200);
        let engine = server.spawn_engine();

        client.close().await;
        let outcome = client
            .notify_callback(RequestContext::new("GET", "/late"), CallbackMode::BlockWithAnswer)
            .await;
        assert_eq!(outcome, CallbackOutcome::NotFound);

        server.close().await;
        let _ = engine.await;
    }

    #[tokio::test]
    async fn test_chat_protocol_cannot_callback() {
        let (client_io, _server_io) = duplex(1024);
        let conn = Connection::new(
            client_io,
            Subprotocol::chat("mychat", ""),
            Handler::Chat(Arc::new(|_: &Frame| {})),
            Config::client(),
        );

        let outcome = conn
            .notify_callback(RequestContext::new("GET", "/x"), CallbackMode::BlockWithAnswer)
            .await;
        assert_eq!(outcome, CallbackOutcome::NotFound);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_are_serialized() {
        let (client, server) = linked_pair(200);
        let engine = server.spawn_engine();

        let mut set = tokio::task::JoinSet::new();
        for i in 0..8 {
            let conn = Arc::clone(&client);
            set.spawn(async move {
                let url = format!("/job/{}", i);
                let outcome = conn
                    .notify_callback(
                        RequestContext::new("GET", url.clone()),
                        CallbackMode::BlockWithAnswer,
                    )
                    .await;
                match outcome {
                    // Each caller must receive the answer to its own
                    // request, never a neighbour's.
                    CallbackOutcome::Answer(response) => {
                        assert_eq!(response.content, url.as_bytes())
                    }
                    other => panic!("caller {} got {:?}", i, other),
                }
            });
        }
        while let Some(result) = set.join_next().await {
            result.unwrap();
        }

        server.close().await;
        let _ = engine.await;
    }
}
