//! drop-axum: HTTP front for drop-store.
//!
//! Routes for single-shot `PUT` uploads, dropzone-style chunked `POST` uploads,
//! downloads (decompressed or raw gzip) and object management.

pub mod app;
pub mod routes;
pub mod state;
mod error;
pub use error::{status_for, DropAxumError};
pub use state::DropAxumState;

pub use app::{router, DropApp};
