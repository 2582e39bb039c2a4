//! # epa-crypto — Field-Level Authenticated Encryption
//!
//! Pharmacy wire messages carry patient and medication identifiers that must
//! not transit in the clear. This crate provides the encryption collaborator
//! used by the pharmacy gateway: authenticated symmetric encryption of
//! individual string fields, plus an integrity digest computed over the
//! plaintext so tampering is detectable end to end even if an intermediary
//! re-encrypts the payload.
//!
//! ## Crate Policy
//!
//! - Key material is zeroized on drop and never logged or serialized.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod field;

// Re-export primary types for ergonomic imports.
pub use field::{AesGcmFieldEncryptor, EncryptedField, FieldCryptoError, FieldEncryptor};
