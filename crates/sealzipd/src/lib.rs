//! sealzipd: HTTP front end for sealzip
//!
//! The binary in `main.rs` only parses the command line, sets up logging and
//! calls [`server::serve`]. Everything else lives here so the router can be
//! driven in tests without a socket.

pub mod audit;
pub mod download;
pub mod error;
pub mod handlers;
pub mod server;
pub mod state;
pub mod tenant;

pub use audit::{MetadataSink, TracingSink};
pub use error::ApiError;
pub use server::router;
pub use state::AppState;
