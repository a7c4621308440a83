//! Initiating side: TCP connect, upgrade, and REST requests funneled
//! through the callback arbitrator.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::Config;
use crate::connection::{CallbackMode, CallbackOutcome, Connection, Handler, RestHandler};
use crate::error::Result;
use crate::protocol::{ClientHandshake, HandshakeResponse};
use crate::rest::{status, RequestContext, ResponseContext};
use crate::subproto::Subprotocol;
use crate::util::read_http_head;

/// What to request during the upgrade.
pub struct UpgradeOptions {
    /// Request path for the upgrade GET.
    pub uri: String,
    /// The subprotocol template, including compression and encryption
    /// settings for binary protocols.
    pub protocol: Subprotocol,
    /// Handler for server-initiated callbacks. Pushes without one are
    /// answered with 501.
    pub on_push: Option<RestHandler>,
    /// Connection configuration; heartbeat defaults off on the client.
    pub config: Config,
}

impl UpgradeOptions {
    /// Upgrade `uri` with the given protocol template and defaults.
    #[must_use]
    pub fn new(uri: impl Into<String>, protocol: Subprotocol) -> Self {
        Self {
            uri: uri.into(),
            protocol,
            on_push: None,
            config: Config::client(),
        }
    }

    /// Install a handler for server-initiated callbacks.
    #[must_use]
    pub fn with_push_handler(mut self, handler: RestHandler) -> Self {
        self.on_push = Some(handler);
        self
    }

    /// Override the connection configuration.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }
}

/// An upgraded client connection.
///
/// Every request is rewritten as a blocking callback over the shared
/// socket; the engine task handles heartbeats and server pushes in the
/// background.
pub struct Client {
    conn: Arc<Connection<TcpStream>>,
    engine: tokio::task::JoinHandle<bool>,
}

impl Client {
    /// Connect to `host:port` and perform the upgrade.
    pub async fn connect(host: &str, port: u16, options: UpgradeOptions) -> Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Self::upgrade(stream, &format!("{}:{}", host, port), options).await
    }

    /// Upgrade an already-established stream. `host` fills the Host header.
    pub async fn upgrade(
        mut stream: TcpStream,
        host: &str,
        options: UpgradeOptions,
    ) -> Result<Self> {
        let handshake = ClientHandshake::new();
        let mut request = Vec::with_capacity(256);
        handshake.write_request(host, &options.uri, &options.protocol.name, &mut request);
        stream.write_all(&request).await?;

        let (head, buffered) =
            read_http_head(&mut stream, options.config.limits.max_handshake_size).await?;
        let response = HandshakeResponse::parse(&head)?;
        handshake.verify(&response, &options.protocol.name)?;
        debug!(uri = %options.uri, proto = %options.protocol.name, "upgraded");

        let handler = Handler::Rest(options.on_push.unwrap_or_else(default_push_handler));
        let conn = Connection::with_buffered(
            stream,
            buffered,
            options.protocol,
            handler,
            options.config,
        );
        let engine = conn.spawn_engine();

        Ok(Self { conn, engine })
    }

    /// Issue a REST request and block for the peer's answer.
    ///
    /// Timeouts and unreserved sockets surface as a 404 answer; a closed
    /// transport does too, and [`is_closed`](Self::is_closed) turns true.
    pub async fn request(
        &self,
        url: impl Into<String>,
        method: impl Into<String>,
        headers: impl Into<String>,
        body: Vec<u8>,
        content_type: impl Into<String>,
    ) -> ResponseContext {
        let ctxt = RequestContext {
            method: method.into(),
            url: url.into(),
            headers: headers.into(),
            no_answer: false,
            content_type: content_type.into(),
            content: body,
        };

        match self.conn.notify_callback(ctxt, CallbackMode::BlockWithAnswer).await {
            CallbackOutcome::Answer(response) => response,
            CallbackOutcome::Sent => ResponseContext::with_status(status::OK),
            CallbackOutcome::NotFound | CallbackOutcome::Closed => {
                ResponseContext::with_status(status::NOT_FOUND)
            }
        }
    }

    /// Issue a callback in an explicit mode.
    pub async fn notify(&self, ctxt: RequestContext, mode: CallbackMode) -> CallbackOutcome {
        self.conn.notify_callback(ctxt, mode).await
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection<TcpStream>> {
        &self.conn
    }

    /// Whether the transport has died.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Close gracefully: send the close frame, observe the echo, stop the
    /// engine task.
    pub async fn close(self) {
        self.conn.close().await;
        let _ = self.engine.await;
    }
}

fn default_push_handler() -> RestHandler {
    Arc::new(|_: &RequestContext| ResponseContext::with_status(status::NOT_IMPLEMENTED))
}
