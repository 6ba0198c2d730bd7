//! Shared types

pub mod error;

pub use error::{ClientError, ErrorKind, Result};
