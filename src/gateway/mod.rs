//! Transport collaborator contract
//!
//! The session core never speaks the wire protocol itself. It consumes the
//! operations below: a [`Transport`] authenticates and hands back an
//! [`Endpoint`], which the owning session then uses for every catalog call
//! until it is disconnected.
//!
//! [`memory::MemoryTransport`] implements the contract over an in-process
//! catalog.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use thiserror::Error;

use crate::config::AmbientEnv;
use crate::object::{Kind, Metadatum};
use crate::path::CatalogPath;

/// Result type alias for collaborator operations
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Status codes the core interprets
pub mod codes {
    /// The transport cancelled the call before it completed
    pub const CANCELLED: i32 = -1;
    /// The gateway answered with data that breaks catalog invariants
    pub const MALFORMED_RESPONSE: i32 = -2;
    /// The ambient environment file is missing or unreadable
    pub const AMBIENT_ENV_UNAVAILABLE: i32 = -3;
    /// A descriptor passed to close is not open
    pub const BAD_DESCRIPTOR: i32 = -4;
    pub const CAT_NO_ACCESS_PERMISSION: i32 = -818000;
    pub const CAT_INVALID_AUTHENTICATION: i32 = -826000;
    pub const CAT_INVALID_USER: i32 = -827000;
    pub const CAT_SQL_ERR: i32 = -806000;
    pub const CATALOG_ALREADY_HAS_ITEM_BY_THAT_NAME: i32 = -809000;
}

/// Failures reported by the transport collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("no such catalog entry")]
    NotFound,

    #[error("expected {expected}, found {found}")]
    KindMismatch { expected: Kind, found: Kind },

    #[error("operation cancelled")]
    Cancelled,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("status {code}: {message}")]
    Status { code: i32, message: String },
}

impl GatewayError {
    pub fn status(code: i32, message: impl Into<String>) -> Self {
        GatewayError::Status {
            code,
            message: message.into(),
        }
    }

    /// Human-readable message, as handed back through the `errMsg` channel
    pub fn message(&self) -> String {
        match self {
            GatewayError::Status { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Descriptive fields the gateway reports for an entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryInfo {
    /// Size in bytes (data objects only)
    pub size: u64,
    pub owner: Option<String>,
    /// Storage resource holding the replica
    pub resource: Option<String>,
    pub checksum: Option<String>,
    pub modified: Option<DateTime<Utc>>,
}

/// One catalog entry as reported by the gateway.
///
/// `children` is `Some` for a collection whose listing was included in the
/// response and `None` for a collection that was not expanded.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub kind: Kind,
    pub path: String,
    pub info: EntryInfo,
    pub children: Option<Vec<CatalogEntry>>,
}

impl CatalogEntry {
    pub fn new(kind: Kind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            info: EntryInfo::default(),
            children: None,
        }
    }

    pub fn with_info(mut self, info: EntryInfo) -> Self {
        self.info = info;
        self
    }

    pub fn with_children(mut self, children: Vec<CatalogEntry>) -> Self {
        self.children = Some(children);
        self
    }
}

/// Authenticates against the gateway and produces endpoints
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short identifier used in log output
    fn name(&self) -> &str;

    /// Connect with explicitly supplied identity
    async fn connect_env(
        &self,
        host: &str,
        port: u16,
        username: &str,
        zone: &str,
        password: Option<&SecretString>,
    ) -> GatewayResult<Box<dyn Endpoint>>;

    /// Connect with identity taken from the ambient environment
    async fn connect(&self, password: Option<&SecretString>) -> GatewayResult<Box<dyn Endpoint>>;

    /// Read the ambient identity (`irods_environment.json`)
    fn read_ambient_env(&self) -> GatewayResult<AmbientEnv> {
        AmbientEnv::load_default()
            .map_err(|e| GatewayError::status(codes::AMBIENT_ENV_UNAVAILABLE, e.to_string()))
    }
}

/// A live, authenticated attachment owned by exactly one session
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Fetch a collection. With `recursive` every descendant listing is
    /// included; otherwise only the immediate children, with sub-collections
    /// left unexpanded.
    async fn get_collection(&self, path: &CatalogPath, recursive: bool)
        -> GatewayResult<CatalogEntry>;

    async fn get_data_object(&self, path: &CatalogPath) -> GatewayResult<CatalogEntry>;

    /// Resources, resource groups and users, addressed by name
    async fn get_entity(&self, kind: Kind, name: &str) -> GatewayResult<CatalogEntry>;

    /// Metadata attached to `target`; `kind_code` is the short display code
    async fn list_meta(&self, kind_code: &str, target: &str) -> GatewayResult<Vec<Metadatum>>;

    async fn add_meta(&self, kind_code: &str, target: &str, meta: &Metadatum)
        -> GatewayResult<()>;

    async fn rm_meta(&self, kind_code: &str, target: &str, meta: &Metadatum)
        -> GatewayResult<()>;

    /// Acquire a server-side descriptor for a collection or data object
    async fn open_object(&self, kind: Kind, path: &CatalogPath) -> GatewayResult<i32>;

    async fn close_object(&self, kind: Kind, descriptor: i32) -> GatewayResult<()>;

    /// Data objects whose path matches a `%`/`_` wildcard pattern
    async fn search_data_objects(&self, pattern: &str) -> GatewayResult<Vec<CatalogEntry>>;

    /// Data objects matching a metadata query
    async fn query_meta(&self, query: &str) -> GatewayResult<Vec<CatalogEntry>>;

    /// Release the endpoint; no further calls are valid afterwards
    async fn disconnect(&self) -> GatewayResult<()>;
}
