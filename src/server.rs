//! Accepting side: upgrade negotiation, connection table, and server push.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::config::Config;
use crate::connection::{CallbackMode, CallbackOutcome, Connection, Handler, RestHandler};
use crate::error::Result;
use crate::protocol::{HandshakeRequest, HandshakeResponse};
use crate::registry::ProtocolRegistry;
use crate::rest::{status, RequestContext};
use crate::subproto::Subprotocol;
use crate::util::read_http_head;

/// The accepting endpoint.
///
/// Owns the protocol registry and the table of live connections. The table
/// lock is touched only on the accept and close paths; per-connection
/// traffic never goes through it.
pub struct Server {
    registry: ProtocolRegistry,
    handler: RestHandler,
    config: Config,
    connections: StdMutex<HashMap<u64, Arc<Connection<TcpStream>>>>,
    next_id: AtomicU64,
    accept_task: StdMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Server {
    /// Create a server around the user request handler.
    pub fn new(handler: RestHandler) -> Arc<Self> {
        Self::with_config(handler, Config::server())
    }

    /// Create a server with a custom per-connection configuration.
    pub fn with_config(handler: RestHandler, config: Config) -> Arc<Self> {
        Arc::new(Self {
            registry: ProtocolRegistry::new(),
            handler,
            config,
            connections: StdMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            accept_task: StdMutex::new(None),
        })
    }

    /// Register a subprotocol template. Returns false when the same
    /// `(name, uri)` pair is already registered.
    pub fn register(&self, template: Subprotocol) -> bool {
        self.registry.add(template)
    }

    /// Register a subprotocol template, replacing any existing one with the
    /// same `(name, uri)` pair.
    pub fn register_once(&self, template: Subprotocol) {
        self.registry.add_once(template)
    }

    /// The protocol registry.
    #[must_use]
    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// Bind and start accepting. Returns the bound address (useful with
    /// port 0).
    pub async fn start(self: &Arc<Self>, addr: impl tokio::net::ToSocketAddrs) -> Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let server = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tokio::spawn(Arc::clone(&server).handle_accept(stream, peer));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        break;
                    }
                }
            }
        });
        *self.accept_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);

        debug!(addr = %local_addr, "listening");
        Ok(local_addr)
    }

    /// Stop accepting and close every live connection gracefully.
    pub async fn stop(&self) {
        if let Some(task) = self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }

        let connections: Vec<_> = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, conn)| conn)
            .collect();
        for conn in connections {
            conn.close().await;
        }
    }

    /// Ids of the live connections, in no particular order.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<u64> {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Initiate a callback toward the client on connection `conn_id`.
    ///
    /// Returns the resulting status; a connection that closed mid-call is
    /// dropped from the table and reported as not found.
    pub async fn push(&self, conn_id: u64, ctxt: RequestContext, mode: CallbackMode) -> u16 {
        let conn = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&conn_id)
            .cloned();
        let Some(conn) = conn else {
            return status::NOT_FOUND;
        };

        let outcome = conn.notify_callback(ctxt, mode).await;
        if outcome == CallbackOutcome::Closed {
            debug!(conn_id, "push hit a closed connection");
            self.connections
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&conn_id);
            return status::NOT_FOUND;
        }
        outcome.status()
    }

    /// Select the subprotocol for an upgrade request: try each advertised
    /// candidate in order, falling back to a URI-only match when the client
    /// advertised none.
    fn select_protocol(&self, request: &HandshakeRequest) -> Option<Subprotocol> {
        if request.protocols.is_empty() {
            self.registry.clone_by_uri(&request.path)
        } else {
            request
                .protocols
                .iter()
                .find_map(|name| self.registry.clone_by_name(name, &request.path))
        }
    }

    /// Validate the upgrade and build the 101 response plus the chosen
    /// per-connection protocol clone. `None` means no template matched.
    fn try_upgrade(&self, head: &[u8]) -> Result<Option<(Vec<u8>, Subprotocol)>> {
        let request = HandshakeRequest::parse_with_limit(head, self.config.limits.max_handshake_size)?;
        request.validate()?;

        let Some(proto) = self.select_protocol(&request) else {
            return Ok(None);
        };

        let response = HandshakeResponse::accept(&request, &proto.name);
        let mut buf = Vec::with_capacity(192);
        response.write(&mut buf);
        Ok(Some((buf, proto)))
    }

    async fn handle_accept(self: Arc<Self>, mut stream: TcpStream, peer: SocketAddr) {
        let max_head = self.config.limits.max_handshake_size;
        let (head, buffered) = match read_http_head(&mut stream, max_head).await {
            Ok(parts) => parts,
            Err(e) => {
                debug!(%peer, error = %e, "dropping connection before handshake");
                return;
            }
        };

        match self.try_upgrade(&head) {
            Ok(Some((response, proto))) => {
                if stream.write_all(&response).await.is_err() {
                    return;
                }
                debug!(%peer, proto = %proto.name, "upgraded");
                self.run_connection(stream, buffered, proto).await;
            }
            Ok(None) | Err(_) => {
                // Not an acceptable upgrade: answer once over plain HTTP
                // and close.
                let response = self.plain_http_response(&head);
                let _ = stream.write_all(&response).await;
            }
        }
    }

    /// Register the connection, run its engine inline on this task, and
    /// drop it from the table when the loop ends.
    async fn run_connection(&self, stream: TcpStream, buffered: Vec<u8>, proto: Subprotocol) {
        let conn = Connection::with_buffered(
            stream,
            buffered,
            proto,
            Handler::Rest(self.handler.clone()),
            self.config.clone(),
        );

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Arc::clone(&conn));

        let graceful = Arc::clone(&conn).process_loop().await;
        debug!(conn_id = id, graceful, "connection finished");

        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    /// Fallback for requests that did not upgrade: run the user handler and
    /// emit one non-keepalive HTTP/1.1 response.
    fn plain_http_response(&self, head: &[u8]) -> Vec<u8> {
        let Some((method, path)) = parse_request_line(head) else {
            return b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
                .to_vec();
        };

        let ctxt = RequestContext::new(method, path);
        let handler = &self.handler;
        let response = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&ctxt)))
            .unwrap_or_else(|_| crate::rest::ResponseContext::with_status(500));

        let mut buf = Vec::with_capacity(128 + response.content.len());
        buf.extend_from_slice(
            format!(
                "HTTP/1.1 {} {}\r\n",
                response.status,
                reason_phrase(response.status)
            )
            .as_bytes(),
        );
        if !response.content_type.is_empty() {
            buf.extend_from_slice(format!("Content-Type: {}\r\n", response.content_type).as_bytes());
        }
        buf.extend_from_slice(format!("Content-Length: {}\r\n", response.content.len()).as_bytes());
        buf.extend_from_slice(b"Connection: close\r\n\r\n");
        buf.extend_from_slice(&response.content);
        buf
    }
}

fn parse_request_line(head: &[u8]) -> Option<(String, String)> {
    let text = std::str::from_utf8(head).ok()?;
    let line = text.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();
    Some((method, path))
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Status",
    }
}
