// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the FUOTA engine.

use thiserror::Error;

use crate::band::Region;

/// Result type using the engine [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the storage layer and the admin operations.
///
/// The periodic workers return `anyhow::Result` so protocol diagnostics can
/// be wrapped with context at each layer; everything below them speaks this
/// type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested row does not exist.
    #[error("object does not exist")]
    DoesNotExist,

    /// Malformed caller input; nothing was written.
    #[error("validation error: {0}")]
    Validation(String),

    /// The multicast group type is not supported by the engine.
    #[error("group_type {0} is not supported")]
    UnsupportedGroupType(String),

    /// No band table is implemented for the network-server region.
    #[error("region {0} is not implemented")]
    UnsupportedRegion(Region),

    /// The network-server collaborator failed.
    #[error("network-server error: {0}")]
    Backend(anyhow::Error),

    /// A database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Error::DoesNotExist.to_string(), "object does not exist");
        assert_eq!(
            Error::Validation("bad dev_eui".into()).to_string(),
            "validation error: bad dev_eui"
        );
        assert_eq!(
            Error::UnsupportedGroupType("CLASS_B".into()).to_string(),
            "group_type CLASS_B is not supported"
        );
        assert_eq!(
            Error::UnsupportedRegion(Region::Us915).to_string(),
            "region US915 is not implemented"
        );
    }
}
