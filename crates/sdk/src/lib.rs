//! # Junction SDK
//!
//! Typed client for the server directory service that backs the Junction
//! gateway: server descriptors, re-discovery, tool reports, knowledge
//! search, notifications and documents.
//!
//! ```rust,no_run
//! use junction_sdk::{DirectoryClient, DirectoryResult};
//!
//! # async fn example() -> DirectoryResult<()> {
//! let client = DirectoryClient::builder()
//!     .base_url("http://127.0.0.1:8080/api/")
//!     .api_key("sk-your-api-key")
//!     .build()?;
//!
//! for server in client.servers().list().await? {
//!     println!("{} ({} tools)", server.name, server.capabilities.tools.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod transport;

pub use client::{DirectoryClient, DirectoryClientBuilder};
pub use config::ClientConfig;
pub use error::{DirectoryError, DirectoryResult};

pub use junction_core::directory::{DiscoveryStatus, DiscoveryTarget};
pub use junction_core::types::{DownstreamServerDescriptor, ServerId, ToolDefinition};
