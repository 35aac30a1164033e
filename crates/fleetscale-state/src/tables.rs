//! redb table definitions for the fleetscale state store.
//!
//! Keys are `&str`, or an `(app_id, metric)` tuple for samples so that
//! ids containing `:` cannot collide. Policies are stored as the raw JSON document the
//! operator submitted, so bulk retrieval hands out exactly what was written.

use redb::TableDefinition;

/// Raw policy JSON keyed by `{app_id}`.
pub const POLICIES: TableDefinition<&str, &str> = TableDefinition::new("policies");

/// Latest metric sample keyed by `(app_id, metric)`.
pub const SAMPLES: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("samples");

/// Instance count keyed by `{app_id}`.
pub const INSTANCE_COUNTS: TableDefinition<&str, u32> = TableDefinition::new("instance_counts");
