//! Unified error type for the `vmp` crate.

use vmp_protocol::ProtocolError;
use vmp_rpc::RpcError;

/// Top-level error wrapping the errors of each layer.
///
/// `#[from]` on each variant lets `?` convert layer errors automatically,
/// so code built on [`Endpoint`](crate::Endpoint) handles one type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmpError {
    /// Encoding, decoding, or validating a message failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An RPC call did not produce a successful response.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl VmpError {
    /// Whether the peer sent a type tag this side has no decoder for.
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(self, Self::Protocol(err) if err.is_protocol_mismatch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::UnknownTypeTag("custom.Mesh".into());
        let vmp_err: VmpError = err.into();
        assert!(matches!(vmp_err, VmpError::Protocol(_)));
        assert!(vmp_err.to_string().contains("custom.Mesh"));
        assert!(vmp_err.is_protocol_mismatch());
    }

    #[test]
    fn test_from_rpc_error() {
        let err = RpcError::Cancelled { id: "rpc-1".into() };
        let vmp_err: VmpError = err.into();
        assert!(matches!(vmp_err, VmpError::Rpc(_)));
        assert!(!vmp_err.is_protocol_mismatch());
    }
}
