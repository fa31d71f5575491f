//! Catalog entry kinds and their metadata display codes

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};

/// The closed set of entry kinds a handle can represent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    DataObject,
    Collection,
    Resource,
    ResourceGroup,
    User,
}

impl Kind {
    pub const ALL: [Kind; 5] = [
        Kind::DataObject,
        Kind::Collection,
        Kind::Resource,
        Kind::ResourceGroup,
        Kind::User,
    ];

    /// Short code used by the metadata subsystem (`d`, `C`, `R`, `u`).
    ///
    /// Resource groups have no code; asking for one is an invariant
    /// violation and yields [`GridError::Fatal`].
    pub fn meta_code(self) -> GridResult<&'static str> {
        match self {
            Kind::DataObject => Ok("d"),
            Kind::Collection => Ok("C"),
            Kind::Resource => Ok("R"),
            Kind::User => Ok("u"),
            Kind::ResourceGroup => Err(GridError::fatal(
                "resource groups have no metadata display code",
            )),
        }
    }

    /// Inverse of [`Kind::meta_code`]
    pub fn from_meta_code(code: &str) -> GridResult<Kind> {
        match code {
            "d" => Ok(Kind::DataObject),
            "C" => Ok(Kind::Collection),
            "R" => Ok(Kind::Resource),
            "u" => Ok(Kind::User),
            other => Err(GridError::fatal(format!(
                "unrecognized metadata kind code '{}'",
                other
            ))),
        }
    }

    /// Collections and data objects live in the path namespace; the other
    /// kinds are addressed by name.
    pub fn is_namespaced(self) -> bool {
        matches!(self, Kind::DataObject | Kind::Collection)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::DataObject => write!(f, "data object"),
            Kind::Collection => write!(f, "collection"),
            Kind::Resource => write!(f, "resource"),
            Kind::ResourceGroup => write!(f, "resource group"),
            Kind::User => write!(f, "user"),
        }
    }
}
