//! Credential management
//!
//! Provides:
//! - Claim parsing and expiry checks for bearer tokens
//! - Ranked storage locations (file, session, cookie jar)
//! - The credential store shared by the request client and event stream

pub mod backend;
pub mod store;
pub mod token;

pub use backend::{CookieBackend, CredentialBackend, FileBackend, SessionBackend};
pub use store::{AuthStatus, CredentialStore};
pub use token::{expiry_of, TokenClaims};
