//! The closed set of entity kinds known at build time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Every entity kind the store can persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A catalog product. Root of the audit trail.
    Product,
    /// A product's price in one country and currency.
    Price,
    /// A point-in-time snapshot of a canonical price.
    PriceHistory,
    /// A published game build.
    Build,
    /// A binary patch between two builds.
    Patch,
    /// A downloadable installer.
    Installer,
    /// Per-platform credentials of a product's default build.
    DefaultAccessInfo,
}

impl EntityKind {
    /// All kinds, in dependency order (referenced kinds first).
    pub const ALL: [Self; 7] = [
        Self::Product,
        Self::Price,
        Self::PriceHistory,
        Self::Build,
        Self::Patch,
        Self::Installer,
        Self::DefaultAccessInfo,
    ];

    /// Stable lowercase name used in logs and the audit tables.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Price => "price",
            Self::PriceHistory => "price_history",
            Self::Build => "build",
            Self::Patch => "patch",
            Self::Installer => "installer",
            Self::DefaultAccessInfo => "default_access_info",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown kind name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for EntityKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_owned()))
    }
}
