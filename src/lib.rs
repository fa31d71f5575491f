/*!
 * rods-grid - client core for a data-grid catalog
 *
 * Sessions, handle caching and path utilities for a hierarchical catalog
 * of collections and data objects:
 * - Authenticated sessions over a pluggable gateway transport
 * - Clonable handles for collections, data objects, resources and users
 * - An in-session cache keyed by normalized path
 * - Attribute/value/unit metadata on every handle
 * - Wildcard and metadata search
 */

pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod object;
pub mod path;
pub mod resolver;
pub mod session;

// Re-export commonly used types
pub use config::{AmbientEnv, ConnectionSource, LogConfig, LogLevel, SessionOptions};
pub use error::{ErrorCategory, GridError, GridResult};
pub use gateway::{CatalogEntry, Endpoint, EntryInfo, GatewayError, Transport};
pub use logging::init_logging;
pub use object::{CatalogObject, Collection, DataObject, Kind, MetadataCollection, Metadatum};
pub use path::CatalogPath;
pub use session::{Identity, Session};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
