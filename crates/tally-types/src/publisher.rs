//! Publisher verification status.

use serde::{Deserialize, Serialize};

use crate::{PublisherKey, TypeError};

/// Server-side verification status of a publisher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublisherStatus {
    /// Not registered with any provider; never paid directly.
    NotVerified,
    /// Registered and verified by a custodial provider.
    Verified,
}

impl PublisherStatus {
    /// Stable string form used in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotVerified => "not_verified",
            Self::Verified => "verified",
        }
    }

    /// Decode the stored string form.
    pub fn parse(value: &str) -> crate::Result<Self> {
        match value {
            "not_verified" => Ok(Self::NotVerified),
            "verified" => Ok(Self::Verified),
            other => Err(TypeError::UnknownValue {
                kind: "publisher status",
                value: other.to_string(),
            }),
        }
    }
}

/// Cached server-side publisher record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerPublisherInfo {
    /// The publisher's key.
    pub publisher_key: PublisherKey,
    /// Verification status at `updated_at`.
    pub status: PublisherStatus,
    /// Unix timestamp of the last status refresh.
    pub updated_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [PublisherStatus::NotVerified, PublisherStatus::Verified] {
            assert_eq!(PublisherStatus::parse(status.as_str()).expect("parse"), status);
        }
    }
}
