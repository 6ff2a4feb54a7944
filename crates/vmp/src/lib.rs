//! # VMP
//!
//! The Vuer Message Protocol: how peers exchange typed values, events, and
//! RPC calls over any byte transport.
//!
//! This crate ties the layers together and re-exports them:
//!
//! - [`vmp_protocol`]: the value model, type registry, and MessagePack
//!   wire format.
//! - [`vmp_rpc`]: request/response correlation with timeouts and
//!   cancellation.
//! - [`Endpoint`]: both of the above bound to one connection.
//!
//! An endpoint never touches a socket. Outbound frames go to a send
//! closure you pass in, and inbound frames come back through
//! [`Endpoint::handle_inbound`], which either completes a pending call
//! or hands the message to you. Any transport that moves byte frames
//! (WebSocket, TCP with framing, an in-memory channel) works.
//!
//! ## Quick Start
//!
//! ```rust
//! use vmp::prelude::*;
//!
//! let endpoint = Endpoint::default();
//! let bytes = endpoint
//!     .encode(&ServerEvent::new("SET", Value::from("scene")))
//!     .unwrap();
//!
//! match endpoint.handle_inbound(&bytes).unwrap() {
//!     Inbound::Message(message) => assert_eq!(message.etype, "SET"),
//!     Inbound::Completed(_) => unreachable!("nothing was pending"),
//! }
//! ```

mod endpoint;
mod error;

pub use endpoint::{Endpoint, EndpointConfig, Inbound};
pub use error::VmpError;
pub use vmp_protocol;
pub use vmp_rpc;

pub mod prelude {
    //! The types most code built on VMP needs.
    pub use crate::{Endpoint, EndpointConfig, Inbound, VmpError};
    pub use vmp_protocol::{
        ClientEvent, DecodeOptions, EncodeOptions, Map, Message, NdArray, ProtocolError,
        RpcRequest, RpcResponse, ServerEvent, TypeRegistration, TypeRegistry, Value, WireMessage,
        ZData,
    };
    pub use vmp_rpc::{ResponseHandle, RpcConfig, RpcError, RpcManager};
}
