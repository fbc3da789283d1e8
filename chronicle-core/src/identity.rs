//! Identity types for stored series and their external identifiers.
//!
//! An [`ObjectId`] names an entity independently of its version and is the
//! identity the cache invalidates on. A [`UniqueId`] is an `ObjectId` plus an
//! optional version. [`ExternalId`]s are the identifiers other systems use
//! for the same thing, grouped into an [`ExternalIdBundle`].

use crate::{ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Separator between the scheme, value and version parts of a rendered id.
const SEPARATOR: char = '~';

/// An id part must be non-empty and must not contain the separator, or the
/// rendered id would not parse back to the same parts.
fn require_part(field: &str, value: &str) -> ValidationResult<()> {
    if value.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    if value.contains(SEPARATOR) {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("must not contain {SEPARATOR:?}, got {value:?}"),
        });
    }
    Ok(())
}

// ============================================================================
// OBJECT ID
// ============================================================================

/// Version-independent identity of a stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId {
    scheme: String,
    value: String,
}

impl ObjectId {
    /// Create an object id, rejecting an empty scheme or value and any part
    /// containing `~`.
    pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> ValidationResult<Self> {
        let scheme = scheme.into();
        let value = value.into();
        require_part("scheme", &scheme)?;
        require_part("value", &value)?;
        Ok(Self { scheme, value })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Attach a version, producing a [`UniqueId`].
    pub fn at_version(&self, version: impl Into<String>) -> UniqueId {
        UniqueId {
            object_id: self.clone(),
            version: Some(version.into()),
        }
    }

    /// The latest-version [`UniqueId`] for this object.
    pub fn at_latest_version(&self) -> UniqueId {
        UniqueId {
            object_id: self.clone(),
            version: None,
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scheme, SEPARATOR, self.value)
    }
}

impl FromStr for ObjectId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(SEPARATOR) {
            Some((scheme, value)) if !value.contains(SEPARATOR) => Self::new(scheme, value),
            _ => Err(ValidationError::InvalidValue {
                field: "object_id".to_string(),
                reason: format!("expected scheme{SEPARATOR}value, got {s:?}"),
            }),
        }
    }
}

// ============================================================================
// UNIQUE ID
// ============================================================================

/// A reference to one version of a stored entity.
///
/// A `None` version refers to the latest version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UniqueId {
    object_id: ObjectId,
    version: Option<String>,
}

impl UniqueId {
    /// Create a unique id from its parts.
    pub fn new(
        scheme: impl Into<String>,
        value: impl Into<String>,
        version: Option<String>,
    ) -> ValidationResult<Self> {
        let object_id = ObjectId::new(scheme, value)?;
        if let Some(v) = &version {
            require_part("version", v)?;
        }
        Ok(Self { object_id, version })
    }

    /// The version-independent identity.
    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn is_latest(&self) -> bool {
        self.version.is_none()
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}{}{}", self.object_id, SEPARATOR, version),
            None => write!(f, "{}", self.object_id),
        }
    }
}

impl FromStr for UniqueId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(scheme), Some(value), version) => {
                Self::new(scheme, value, version.map(str::to_string))
            }
            _ => Err(ValidationError::InvalidValue {
                field: "unique_id".to_string(),
                reason: format!("expected scheme{SEPARATOR}value[{SEPARATOR}version], got {s:?}"),
            }),
        }
    }
}

// ============================================================================
// EXTERNAL IDS
// ============================================================================

/// An identifier assigned by an external system (ticker, ISIN, vendor code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalId {
    scheme: String,
    value: String,
}

impl ExternalId {
    pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> ValidationResult<Self> {
        let scheme = scheme.into();
        let value = value.into();
        require_part("scheme", &scheme)?;
        require_part("value", &value)?;
        Ok(Self { scheme, value })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scheme, SEPARATOR, self.value)
    }
}

/// An ordered set of external ids that all name the same real-world thing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalIdBundle {
    ids: BTreeSet<ExternalId>,
}

impl ExternalIdBundle {
    pub fn of(ids: impl IntoIterator<Item = ExternalId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn single(id: ExternalId) -> Self {
        Self::of([id])
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn contains(&self, id: &ExternalId) -> bool {
        self.ids.contains(id)
    }

    /// True if the two bundles share at least one external id.
    pub fn intersects(&self, other: &ExternalIdBundle) -> bool {
        self.ids.iter().any(|id| other.ids.contains(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExternalId> {
        self.ids.iter()
    }
}

impl fmt::Display for ExternalIdBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Bundle[")?;
        for (i, id) in self.ids.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", id)?;
        }
        f.write_str("]")
    }
}
