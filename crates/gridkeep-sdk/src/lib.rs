//! gridkeep SDK - sessions and transports for collaboratively edited grids
//!
//! This SDK binds a grid policy from `gridkeep-sheet` to a network
//! transport, giving an offline-first editing session with a connection
//! status signal and a one-shot sync-complete signal.
//!
//! # Quick Start
//!
//! ```rust
//! use gridkeep_sdk::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let relay = MemoryRelay::new();
//! let transport = Arc::new(MemoryTransport::new(PeerId::new("alice"), &relay));
//! let session =
//!     SheetSession::new(KeepSheet::new("alice"), transport, SessionConfig::default()).unwrap();
//!
//! // The first sync into an empty room seeds a 3x3 grid
//! session.connect().await.unwrap();
//! session.process_incoming().await.unwrap();
//!
//! session.edit_cell(0, 0, "hello").unwrap();
//! session.flush().await.unwrap();
//! assert_eq!(session.grid().cell(0, 0), Some("hello"));
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`network`] - Transport trait, connection status and the in-memory relay
//! - [`session`] - Session driving one grid replica over a transport
//! - [`error`] - Error types

pub mod error;
pub mod network;
pub mod session;

// Re-exports for convenience
pub use error::{Result, SdkError};
pub use network::{
    create_network, ConnectionStatus, MemoryRelay, MemoryTransport, Message, NetworkError,
    NetworkTransport, PeerId,
};
pub use session::{SessionConfig, SessionConfigBuilder, SessionEvent, SheetSession};

// Re-export commonly used types from gridkeep-sheet
pub use gridkeep_sheet::{Grid, GridPolicy, KeepSheet, PolicyKind, PositionalSheet, SheetConfig};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::SdkError;
    pub use crate::network::{ConnectionStatus, MemoryRelay, MemoryTransport, NetworkTransport, PeerId};
    pub use crate::session::{SessionConfig, SessionEvent, SheetSession};
    pub use gridkeep_sheet::{Grid, GridPolicy, KeepSheet, PositionalSheet};
}
