//! Shared id and timestamp aliases.

/// All entity ids are UUIDv7, minted application-side so that cloned
/// version graphs can be assembled fully in memory before persistence.
pub type EntityId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh entity id.
pub fn new_entity_id() -> EntityId {
    uuid::Uuid::now_v7()
}
