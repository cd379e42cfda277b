//! diffpad library crate
//!
//! Per-language code documents with snapshots, a conversation log per
//! language, and AI reviews of the diff between the last two snapshots.
//! The binary is a thin CLI over `Session` and `review::request_review`.

pub mod config;
pub mod conversation;
pub mod credentials;
pub mod documents;
pub mod error;
pub mod keyring;
pub mod languages;
pub mod prompt;
pub mod provider;
pub mod reveal;
pub mod review;
pub mod session;
pub mod signature;
pub mod store;
pub mod terminal;

pub use error::{ReviewError, SessionError};
pub use session::Session;
