//! redb table definitions for the fleet state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Record-scoped tables share the `{exercise}:{asset}:{image}` key.

use redb::TableDefinition;

/// Host nodes keyed by `{host_id}`.
pub const HOSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("hosts");

/// Assets keyed by `{asset_id}`.
pub const ASSETS: TableDefinition<&str, &[u8]> = TableDefinition::new("assets");

/// Deployment records keyed by `{exercise}:{asset}:{image}`.
pub const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Sync status keyed like `RECORDS`.
pub const SYNC_STATUS: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_status");

/// Image mappings keyed like `RECORDS`.
pub const IMAGE_MAPPINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("image_mappings");
