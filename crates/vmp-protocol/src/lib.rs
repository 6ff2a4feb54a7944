//! Wire protocol for the Vuer Message Protocol (VMP).
//!
//! This crate is the "language" peers speak, independent of how the bytes
//! travel:
//!
//! - **Values** ([`Value`], [`ZData`]): the dynamic tree that rides inside
//!   messages, and the tagged envelope for anything that isn't a wire
//!   primitive.
//! - **Registry** ([`TypeRegistry`]): which application types have a wire
//!   shape, and how to get there and back.
//! - **Codecs** ([`TreeCodec`], [`Codec`], [`WireCodec`]): walking value
//!   trees, packing them into MessagePack (or JSON), and base64 for text
//!   channels.
//! - **Messages** ([`Message`], [`ClientEvent`], [`ServerEvent`],
//!   [`RpcRequest`], [`RpcResponse`]): the fixed envelope shapes.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! ```text
//! application value → TreeCodec (TypeRegistry) → envelope → Codec → bytes
//! bytes → Codec → envelope → TreeCodec (TypeRegistry) → application value
//! ```
//!
//! Request/response correlation lives one layer up, in `vmp-rpc`.
//!
//! # Features
//!
//! - `json` (default): [`JsonCodec`], the human-readable codec. Bytes
//!   travel as `{"__bytes__": "<base64>"}` there.
//! - `ndarray`: `TryFrom<&NdArray> for ndarray::ArrayD<T>` and back.
//! - `image`: registers `ImageData` under the `image` tag, carried as
//!   png/jpeg/webp bytes.

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

// Each module is a single file under `src/`. The optional ones only
// compile when their feature pulls in the crate they wrap.

mod builtin;
mod codec;
mod error;
#[cfg(feature = "image")]
mod images;
#[cfg(feature = "ndarray")]
mod ndarray_interop;
mod registry;
mod tree;
mod types;
mod value;
mod wire;
mod zdata;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

// Modules stay private; everything public is re-exported here so callers
// write `vmp_protocol::Message` rather than `vmp_protocol::types::Message`.

pub use builtin::{Element, NDARRAY_TAG, NdArray};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use codec::{Codec, MsgpackCodec, from_base64, to_base64};
pub use error::ProtocolError;
#[cfg(feature = "image")]
pub use images::{IMAGE_TAG, ImageData};
pub use registry::{DecodeFn, EncodeFn, PredicateFn, TypeRegistration, TypeRegistry};
pub use tree::{DecodeOptions, EncodeOptions, TreeCodec, decode_tree, encode_tree};
pub use types::{
    ClientEvent, Message, PayloadsMut, RpcRequest, RpcResponse, ServerEvent, Timestamp,
    WireMessage, now_millis,
};
pub use value::{BYTES_MARKER, Map, NativeValue, Value};
pub use wire::{
    WireCodec, deserialize, deserialize_from_base64, deserialize_message, serialize,
    serialize_message, serialize_to_base64,
};
pub use zdata::{BINARY_KEY, ELEMENT_TYPE_KEY, SHAPE_KEY, TYPE_TAG_KEY, ZData};
