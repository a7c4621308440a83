//! Connection state machine and callback arbitration.

mod arbiter;
mod engine;

pub use arbiter::{CallbackMode, CallbackOutcome};
pub use engine::{ChatHandler, Connection, Handler, RestHandler, Step};
