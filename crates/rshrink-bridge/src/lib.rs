//! rshrink-bridge — runs the compute module on a worker thread and exposes
//! it to the main thread through explicit request/response messages.
//!
//! - [`Worker`] owns the capability bundle on its own OS thread
//! - [`RemoteProxy`] sends [`Request`]s and awaits per-call replies
//! - [`Client`] boots a worker and routes calls to the best variant

pub mod client;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod worker;

pub use client::Client;
pub use error::BridgeError;
pub use protocol::{HandlersInfo, RemoteError, Request, Response, VariantInfo};
pub use proxy::{Handlers, RemoteModule, RemoteProxy};
pub use worker::Worker;
