#![forbid(unsafe_code)]
#![doc = "Common types, error codes, alert codes and algorithm identifiers for litetls."]

pub mod alert;
pub mod algorithm;
pub mod error;

pub use alert::*;
pub use algorithm::*;
pub use error::*;
