//! Block cipher modes of operation.
//!
//! CBC chaining is done by the record layer on top of
//! [`BlockCipher`](crate::provider::BlockCipher); only the AEAD mode lives here.

pub mod gcm;
