//! Database access layer for the Vocalis assistant.
//!
//! Provides SQLite connection pooling (via `r2d2`), the read-only access
//! client the tools call into, and the embedded demo fixtures.
//!
//! # Guarantees
//!
//! - **Write protection**: statements are classified before a connection is
//!   acquired; anything but an allow-listed read shape is rejected unless the
//!   pool was built with writes allowed. Prepared statements are checked again
//!   with SQLite's own read-only flag, and read-only pools run with
//!   `PRAGMA query_only`.
//! - **Identifier safety**: table and column names used to build queries must
//!   match the identifier grammar *and* exist in the live schema. Values are
//!   always bound as parameters.
//! - **Bounded resources**: connection acquisition waits at most the
//!   configured bound; every result set is capped at `max_rows`.

mod access;
mod error;
mod migrations;
mod plan;
mod pool;
mod statement;

pub use access::{AccessClient, AccessPolicy, QueryOutput, QueryRequest};
pub use error::DbError;
pub use migrations::{seed_demo, seed_demo_schema, MigrationError};
pub use plan::{is_valid_identifier, Filter, QueryPlan, SelectRequest};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
pub use statement::{classify, StatementKind};
