//! Request/response correlation for the Vuer Message Protocol.
//!
//! An RPC over VMP is two ordinary messages: an [`RpcRequest`] whose
//! `rtype` carries a fresh correlation id, and an [`RpcResponse`] whose
//! `etype` echoes it. This crate keeps track of the calls in between:
//!
//! 1. **Issuing** ([`RpcManager::issue`]): id generation, pending table,
//!    timeout timer.
//! 2. **Resolving** ([`RpcManager::complete`], [`RpcManager::reject`],
//!    [`RpcManager::cancel`], [`RpcManager::cancel_all`]): exactly one
//!    outcome per call. Whichever of these (or the timer) takes the entry
//!    out of the pending table first decides it. The rest see nothing
//!    pending and return `false`.
//! 3. **Waiting** ([`ResponseHandle`]): a future per call.
//!
//! # How it fits in the stack
//!
//! ```text
//! Endpoint (above)  ← serializes requests, feeds inbound responses back in
//!     ↕
//! RPC layer (this crate)  ← correlation ids, timeouts, cancellation
//!     ↕
//! Protocol layer (below)  ← RpcRequest / RpcResponse envelopes
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::convert::Infallible;
//! use vmp_protocol::{RpcResponse, Value};
//! use vmp_rpc::RpcManager;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = RpcManager::default();
//! let handle = manager
//!     .issue("add", None, None, None, |_request| Ok::<_, Infallible>(()))
//!     .unwrap();
//!
//! // The transport hands the peer's answer back in.
//! let id = handle.id().to_owned();
//! assert!(manager.complete(RpcResponse::success(id, 3)));
//! assert_eq!(handle.await.unwrap().data, Some(Value::from(3)));
//! # }
//! ```
//!
//! [`RpcRequest`]: vmp_protocol::RpcRequest
//! [`RpcResponse`]: vmp_protocol::RpcResponse

mod config;
mod error;
mod manager;

pub use config::RpcConfig;
pub use error::RpcError;
pub use manager::{
    ResponseHandle, RpcManager, RpcStats, create_rpc_request, create_rpc_response,
    generate_request_id,
};
