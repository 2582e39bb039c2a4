//! # Wire Codec Contract
//!
//! [`MessageCodec`] separates what a message means from how it travels: a
//! codec builds the wire form of a domain request and interprets the raw
//! reply, with no I/O of its own. Gateways compose a codec with the HTTP
//! transport; tests exercise codecs directly against fixture payloads.

use serde::Serialize;
use thiserror::Error;

use epa_crypto::FieldCryptoError;

/// Failure while building or interpreting a wire message.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The reply arrived without a field the message contract requires.
    #[error("wire message is missing required field: {field}")]
    MissingField { field: &'static str },
    /// The payload could not be interpreted under the message contract.
    #[error("malformed wire message: {detail}")]
    Malformed { detail: String },
    /// Encrypting or decrypting a protected field failed.
    #[error(transparent)]
    Encryption(#[from] FieldCryptoError),
}

/// Domain-to-wire translation for one upstream operation.
///
/// `encode` is pure; a failed encode leaves no side effects anywhere.
/// `decode` receives the raw JSON reply rather than a pre-parsed shape so
/// it can keep the payload verbatim as evidence when the remote says
/// something the contract does not cover.
pub trait MessageCodec {
    /// Domain-side input.
    type Domain;
    /// Wire-side request body.
    type Wire: Serialize;
    /// Domain-side interpretation of the reply.
    type Reply;

    fn encode(&self, domain: &Self::Domain) -> Result<Self::Wire, CodecError>;
    fn decode(&self, raw: serde_json::Value) -> Result<Self::Reply, CodecError>;
}

/// Deserialize a raw reply into a typed wire shape.
pub(crate) fn parse_reply<T: serde::de::DeserializeOwned>(
    raw: &serde_json::Value,
) -> Result<T, CodecError> {
    serde_json::from_value(raw.clone()).map_err(|err| CodecError::Malformed {
        detail: err.to_string(),
    })
}
