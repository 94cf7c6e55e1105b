//! # Oakley Platform
//!
//! Shared types for the Oakley IKE crates.
//!
//! This crate provides:
//! - Unified error types (`OakleyError`, `OakleyResult`)
//! - Module lifecycle (`SecurityModule`)
//! - Boundary collaborators consumed by protocol engines (`Transport`, `Clock`)
//!
//! # Examples
//!
//! ```
//! use oakley_platform::{QueuedTransport, Transport, OakleyResult};
//!
//! # fn main() -> OakleyResult<()> {
//! let mut transport = QueuedTransport::new();
//! transport.send("192.0.2.7:500".parse().unwrap(), b"datagram")?;
//! assert_eq!(transport.drain().len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;
pub mod traits;

pub use error::{OakleyError, OakleyResult};
pub use traits::{Clock, Datagram, QueuedTransport, SecurityModule, SystemClock, Transport};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
