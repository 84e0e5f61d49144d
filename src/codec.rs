// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

use crate::error::CodecError;

/// Wire format configured on a channel.
///
/// The channel reports its codec so generated stubs can pick matching
/// encode/decode helpers; the runtime itself only moves opaque bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecKind {
    Protobuf,
    Raw,
}

/// A value that can be turned into a wire message.
///
/// Stream writes accept any `Message`; serialization happens on the
/// operation's home thread and codec faults surface as a failed write
/// acknowledgement plus an `error` on the operation.
pub trait Message: Send + 'static {
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError>;
}

/// Raw bytes pass through unchanged.
impl Message for Vec<u8> {
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(self.clone())
    }
}

#[cfg(feature = "protobuf-codec")]
pub mod pb {
    //! Protobuf codec helpers for generated stubs.

    use protobuf::error::{ProtobufError, WireError};
    use protobuf::Message as PbMessage;

    use crate::codec::Message;
    use crate::error::CodecError;

    fn map_err(e: ProtobufError) -> CodecError {
        match e {
            ProtobufError::WireError(e @ WireError::UnexpectedEof)
            | ProtobufError::WireError(e @ WireError::TruncatedMessage) => {
                CodecError::OutOfRange(format!("{:?}", e))
            }
            ProtobufError::WireError(e) => CodecError::InvalidField(format!("{:?}", e)),
            e => CodecError::Other(e.to_string()),
        }
    }

    pub fn to_bytes<M: PbMessage>(m: &M) -> Result<Vec<u8>, CodecError> {
        m.write_to_bytes().map_err(map_err)
    }

    pub fn from_bytes<M: PbMessage>(data: &[u8]) -> Result<M, CodecError> {
        let mut m = M::new();
        m.merge_from_bytes(data).map_err(map_err)?;
        Ok(m)
    }

    /// Adapter that lets any protobuf message travel through the stream
    /// write path.
    pub struct Proto<M>(pub M);

    impl<M: PbMessage> Message for Proto<M> {
        fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
            to_bytes(&self.0)
        }
    }
}
