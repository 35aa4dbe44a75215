//! Error taxonomy shared by every pipeline stage.
//!
//! Only [`CatalogError::Login`] and [`CatalogError::Persistence`] are meant to
//! reach the top of a run. Fetch and parse failures are handled where they
//! happen: the caller logs them and skips the page, item or strategy.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("login failed against {origin}: no candidate login path produced a session")]
    Login { origin: String },

    #[error("request to {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("could not persist {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CatalogError {
    pub fn fetch(url: impl ToString, reason: impl ToString) -> Self {
        Self::Fetch {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(what: impl ToString, reason: impl ToString) -> Self {
        Self::Parse {
            what: what.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// True for failures that only cost one page or item.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::Status { .. } | Self::Parse { .. }
        )
    }
}

pub type Result<T, E = CatalogError> = std::result::Result<T, E>;
