//! One side of a VMP connection.
//!
//! An [`Endpoint`] pairs a [`WireCodec`] with an [`RpcManager`] and leaves
//! the transport to the caller: outbound bytes go to a send function the
//! caller supplies, inbound bytes are fed in through
//! [`handle_inbound`](Endpoint::handle_inbound). The flow is:
//!   1. `call()` → request serialized → caller's `send_bytes`
//!   2. bytes arrive → `handle_inbound()` → pending call completed, or the
//!      message handed back for application dispatch
//!   3. on disconnect → `shutdown()` fails whatever is still in flight

use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vmp_protocol::{
    Codec, DecodeOptions, EncodeOptions, Map, Message, MsgpackCodec, ProtocolError, RpcRequest,
    RpcResponse, TreeCodec, TypeRegistry, Value, WireCodec, WireMessage,
};
use vmp_rpc::{ResponseHandle, RpcConfig, RpcManager};

use crate::VmpError;

/// Settings for an [`Endpoint`].
///
/// ```rust
/// use std::time::Duration;
/// use vmp::EndpointConfig;
///
/// let mut config = EndpointConfig::default();
/// config.rpc.default_timeout = Duration::from_secs(5);
/// config.decode.preserve_encoded_values = true;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub rpc: RpcConfig,
    pub encode: EncodeOptions,
    pub decode: DecodeOptions,
}

/// What an inbound message turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// It answered a pending call, which has been resolved. Carries the
    /// correlation id.
    Completed(String),

    /// Anything else: an event, a request from the peer, or a response
    /// nobody is waiting for anymore.
    Message(Message),
}

/// Wire codec plus RPC bookkeeping for one connection.
///
/// Cloning shares the pending-call table, so the task reading from the
/// transport and the tasks making calls can each hold a clone.
#[derive(Debug, Clone)]
pub struct Endpoint<C: Codec = MsgpackCodec> {
    wire: WireCodec<C>,
    rpc: RpcManager,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(EndpointConfig::default())
    }
}

impl Endpoint {
    /// MessagePack over the process-wide type registry.
    pub fn new(config: EndpointConfig) -> Self {
        Self::with_codec(config, TypeRegistry::global().clone(), MsgpackCodec)
    }
}

impl<C: Codec> Endpoint<C> {
    pub fn with_codec(config: EndpointConfig, registry: TypeRegistry, codec: C) -> Self {
        let tree = TreeCodec::new(registry)
            .with_encode_options(config.encode)
            .with_decode_options(config.decode);
        Self {
            wire: WireCodec::new(tree, codec),
            rpc: RpcManager::new(config.rpc),
        }
    }

    pub fn wire(&self) -> &WireCodec<C> {
        &self.wire
    }

    pub fn rpc(&self) -> &RpcManager {
        &self.rpc
    }

    /// Serializes any envelope for sending.
    pub fn encode<M: WireMessage>(&self, message: &M) -> Result<Vec<u8>, VmpError> {
        Ok(self.wire.serialize_message(message)?)
    }

    /// Deserializes bytes as a specific envelope shape.
    pub fn decode<M: WireMessage>(&self, bytes: &[u8]) -> Result<M, VmpError> {
        Ok(self.wire.deserialize_message(bytes)?)
    }

    /// Serializes a request, hands the bytes to `send_bytes`, and returns
    /// a handle for the answer.
    ///
    /// # Errors
    /// - [`VmpError::Protocol`] if the arguments can't be encoded. Nothing
    ///   is sent and nothing stays pending.
    /// - [`VmpError::Rpc`] if `send_bytes` fails or there is no runtime.
    pub fn issue<F, E>(
        &self,
        method: impl Into<String>,
        args: Option<Vec<Value>>,
        kwargs: Option<Map>,
        timeout: Option<Duration>,
        send_bytes: F,
    ) -> Result<ResponseHandle, VmpError>
    where
        F: FnOnce(Vec<u8>) -> Result<(), E>,
        E: Display,
    {
        let mut encode_error: Option<ProtocolError> = None;
        let issued = self
            .rpc
            .issue(method, args, kwargs, timeout, |request: &RpcRequest| {
                match self.wire.serialize_message(request) {
                    Ok(bytes) => send_bytes(bytes).map_err(|err| err.to_string()),
                    Err(err) => {
                        let reason = err.to_string();
                        encode_error = Some(err);
                        Err(reason)
                    }
                }
            });

        if let Some(err) = encode_error {
            return Err(err.into());
        }
        Ok(issued?)
    }

    /// [`issue`](Self::issue), then wait for the answer.
    pub async fn call<F, E>(
        &self,
        method: impl Into<String>,
        args: Option<Vec<Value>>,
        kwargs: Option<Map>,
        timeout: Option<Duration>,
        send_bytes: F,
    ) -> Result<RpcResponse, VmpError>
    where
        F: FnOnce(Vec<u8>) -> Result<(), E>,
        E: Display,
    {
        let handle = self.issue(method, args, kwargs, timeout, send_bytes)?;
        Ok(handle.await?)
    }

    /// Routes one inbound frame.
    ///
    /// A message whose `etype` is the id of a pending call completes that
    /// call. Everything else is returned for the application to dispatch.
    ///
    /// # Errors
    /// [`VmpError::Protocol`] if the frame doesn't decode. When the frame
    /// answers a pending call but isn't a valid response, that call fails
    /// with [`RpcError::Malformed`](vmp_rpc::RpcError::Malformed) and the
    /// conversion error is returned here too.
    pub fn handle_inbound(&self, bytes: &[u8]) -> Result<Inbound, VmpError> {
        let message: Message = self.wire.deserialize_message(bytes)?;

        if self.rpc.is_pending(&message.etype) {
            let id = message.etype.clone();
            let response = match RpcResponse::try_from(message.clone()) {
                Ok(response) => response,
                Err(err) => {
                    self.rpc.reject(&id, err.to_string());
                    return Err(err.into());
                }
            };
            // The call may have timed out since the check above.
            if self.rpc.complete(response) {
                return Ok(Inbound::Completed(id));
            }
        }

        tracing::debug!(etype = %message.etype, "inbound message for application");
        Ok(Inbound::Message(message))
    }

    /// Builds and serializes the answer to a request from the peer.
    pub fn respond<E: Display>(
        &self,
        request: &RpcRequest,
        result: Result<Value, E>,
    ) -> Result<Vec<u8>, VmpError> {
        let response = RpcResponse::from_result(request.rtype.clone(), result);
        self.encode(&response)
    }

    /// Fails every call still in flight. Call on disconnect. Returns how
    /// many were cancelled.
    pub fn shutdown(&self) -> usize {
        self.rpc.cancel_all()
    }
}
