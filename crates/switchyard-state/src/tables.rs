//! redb table definitions for the Switchyard state store.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). The toggle revision counters are plain `u64`s.

use redb::TableDefinition;

/// Shape shared by every table in the store.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Deployment records keyed by service name.
pub const DEPLOYMENTS: JsonTable = TableDefinition::new("deployments");

/// Schema migrations keyed by version string.
pub const MIGRATIONS: JsonTable = TableDefinition::new("migrations");

/// Feature toggles keyed by feature name.
pub const TOGGLES: JsonTable = TableDefinition::new("toggles");

/// Last revision handed out per toggle name. Entries survive toggle deletes.
pub const TOGGLE_REVISIONS: TableDefinition<'static, &'static str, u64> =
    TableDefinition::new("toggle_revisions");

/// Traffic weight distributions keyed by route / listener id.
pub const ROUTES: JsonTable = TableDefinition::new("routes");
