//! Cache Keys
//!
//! The strategy is generic over any `K: Hash + Eq + Clone`, but ORM integrations
//! almost always cache one of two things: an entity row, addressed by its type and
//! primary key, or a collection, addressed by the owning collection role and the
//! owner's primary key. [`CacheKey`] models exactly those two shapes.

use core::fmt;
use std::sync::Arc;

/// Identifier of a cached row or collection.
///
/// Immutable once built. Names are reference-counted so cloning a key (which the
/// strategy does on every store) only copies the id string.
///
/// # Example
///
/// ```
/// use rw_cache::CacheKey;
///
/// let entity = CacheKey::entity("com.acme.Customer", 42);
/// let attrs = CacheKey::collection("com.acme.Customer.attributes", 42);
///
/// assert_eq!(entity.to_string(), "com.acme.Customer#42");
/// assert_ne!(entity, attrs);
/// assert!(attrs.is_collection());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheKey {
    /// A single entity row.
    Entity {
        /// Entity type name.
        entity_name: Arc<str>,
        /// Primary key, rendered as a string.
        id: String,
    },
    /// A collection owned by an entity.
    Collection {
        /// Collection role, usually `OwnerType.property`.
        role: Arc<str>,
        /// Primary key of the owning entity.
        owner_id: String,
    },
}

impl CacheKey {
    /// Creates an entity key.
    pub fn entity(entity_name: impl Into<Arc<str>>, id: impl ToString) -> Self {
        CacheKey::Entity {
            entity_name: entity_name.into(),
            id: id.to_string(),
        }
    }

    /// Creates a collection key.
    pub fn collection(role: impl Into<Arc<str>>, owner_id: impl ToString) -> Self {
        CacheKey::Collection {
            role: role.into(),
            owner_id: owner_id.to_string(),
        }
    }

    /// Entity name or collection role.
    pub fn role(&self) -> &str {
        match self {
            CacheKey::Entity { entity_name, .. } => entity_name,
            CacheKey::Collection { role, .. } => role,
        }
    }

    /// Entity id or owner id.
    pub fn id(&self) -> &str {
        match self {
            CacheKey::Entity { id, .. } => id,
            CacheKey::Collection { owner_id, .. } => owner_id,
        }
    }

    /// Returns `true` for collection keys.
    pub fn is_collection(&self) -> bool {
        matches!(self, CacheKey::Collection { .. })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.role(), self.id())
    }
}
