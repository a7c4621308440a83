//! # restws - Bidirectional REST over WebSockets
//!
//! `restws` is a messaging substrate built on RFC 6455. On top of one
//! upgraded TCP connection it multiplexes two logical flows in opposite
//! directions: client-to-server requests and server-to-client push
//! requests, each carrying a full request/answer pair.
//!
//! ## Features
//!
//! - **RFC 6455 frame codec** with client-side masking, fragment
//!   reassembly, and hard size limits
//! - **Two payload encodings** behind one framing contract: readable JSON
//!   text frames and compact binary frames with optional deflate
//!   compression and AES-CFB encryption
//! - **Callback arbitration**: either side can initiate a blocking RPC
//!   over the shared socket without interleaving concurrent initiators
//! - **Per-connection engine task** driving inbound dispatch, heartbeats,
//!   deferred sends, and adaptive idle backoff
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use restws::{Client, Server, Subprotocol, UpgradeOptions};
//! use restws::rest::{RequestContext, ResponseContext};
//! use std::sync::Arc;
//!
//! let server = Server::new(Arc::new(|req: &RequestContext| {
//!     ResponseContext::default().with_body("text/plain", req.url.clone().into_bytes())
//! }));
//! server.register(Subprotocol::json(""));
//! let addr = server.start(("127.0.0.1", 8080)).await?;
//!
//! let client = Client::connect(
//!     "127.0.0.1",
//!     addr.port(),
//!     UpgradeOptions::new("/", Subprotocol::json("")),
//! )
//! .await?;
//! let answer = client.request("/hello", "GET", "", Vec::new(), "").await;
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod rest;
pub mod server;
pub mod subproto;

mod util;

pub use client::{Client, UpgradeOptions};
pub use codec::FrameCodec;
pub use config::{Config, Limits};
pub use connection::{CallbackMode, CallbackOutcome, Connection, Handler, RestHandler, Step};
pub use error::{Error, Result};
pub use protocol::{compute_accept_key, Frame, OpCode, WS_GUID};
pub use registry::ProtocolRegistry;
pub use rest::{status, FrameCipher, PayloadCodec, RequestContext, ResponseContext};
pub use server::Server;
pub use subproto::{Subprotocol, SubprotocolKind, PROTO_BINARY, PROTO_JSON};
