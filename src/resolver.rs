//! Target reference resolution.
//!
//! Expectations may name their target (`target_type` + `target_name`) instead
//! of giving its database id. [`IdResolver`] turns such a reference into an id
//! by looking the name up in the collection mapped to the target type.
//! Nothing is cached: the object may be created, renamed or deleted while a
//! test runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ResolveError;
use crate::storage::ObjectLookup;
use crate::value::AttributeValue;

/// Mapping of event target types to object collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetTypes(BTreeMap<String, String>);

impl Default for TargetTypes {
    fn default() -> Self {
        Self::empty()
            .with_type("VmOrTemplate", "vms")
            .with_type("Host", "hosts")
            .with_type("Service", "services")
    }
}

impl TargetTypes {
    /// A mapping with no entries.
    #[must_use]
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Map `target_type` to `collection`, replacing an earlier mapping.
    #[must_use]
    pub fn with_type(mut self, target_type: impl Into<String>, collection: impl Into<String>) -> Self {
        self.0.insert(target_type.into(), collection.into());
        self
    }

    #[must_use]
    pub fn collection(&self, target_type: &str) -> Option<&str> {
        self.0.get(target_type).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Resolves target references against the application's collections.
#[derive(Clone)]
pub struct IdResolver {
    objects: Arc<dyn ObjectLookup>,
    target_types: TargetTypes,
}

impl std::fmt::Debug for IdResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdResolver")
            .field("target_types", &self.target_types)
            .finish_non_exhaustive()
    }
}

impl IdResolver {
    pub fn new(objects: Arc<dyn ObjectLookup>, target_types: TargetTypes) -> Self {
        Self {
            objects,
            target_types,
        }
    }

    #[must_use]
    pub const fn target_types(&self) -> &TargetTypes {
        &self.target_types
    }

    /// Check that a reference could be resolved at all.
    ///
    /// Ids always pass. Names need a mapped target type; anything else is
    /// rejected as it could never resolve.
    pub fn ensure_mapped(
        &self,
        target_type: Option<&str>,
        target: &AttributeValue,
    ) -> Result<(), ResolveError> {
        if target.as_int().is_some() {
            return Ok(());
        }
        if target.as_str().is_none() {
            return Err(ResolveError::InvalidReference {
                value: target.to_string(),
            });
        }
        self.collection_for(target_type).map(|_| ())
    }

    /// Resolve `target` (an id or an object name) to a database id.
    ///
    /// # Errors
    /// - `UnmappedType`: a name was given for a type with no collection
    /// - `NotFound`: no object carries that name yet
    /// - `Source`: the lookup backend failed
    pub fn resolve_id(
        &self,
        target_type: Option<&str>,
        target: &AttributeValue,
    ) -> Result<i64, ResolveError> {
        if let Some(id) = target.as_int() {
            return Ok(id);
        }
        let Some(name) = target.as_str() else {
            return Err(ResolveError::InvalidReference {
                value: target.to_string(),
            });
        };

        let collection = self.collection_for(target_type)?;
        let found = self.objects.find_by_name(collection, name)?;
        found
            .first()
            .map(|o| o.id)
            .ok_or_else(|| ResolveError::NotFound {
                target_type: target_type.unwrap_or_default().to_string(),
                name: name.to_string(),
            })
    }

    fn collection_for(&self, target_type: Option<&str>) -> Result<&str, ResolveError> {
        let target_type = target_type.unwrap_or_default();
        self.target_types
            .collection(target_type)
            .ok_or_else(|| ResolveError::UnmappedType {
                target_type: if target_type.is_empty() {
                    "None".to_string()
                } else {
                    target_type.to_string()
                },
            })
    }
}
