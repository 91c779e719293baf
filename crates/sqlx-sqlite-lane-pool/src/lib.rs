//! # sqlx-sqlite-lane-pool
//!
//! A fixed-size pool of SQLite connections for embedded client applications,
//! where every connection is a *lane*: all SQL submitted to one lane executes
//! strictly in submission order, never concurrently.
//!
//! ## Core Types
//!
//! - **[`LanePool`]**: owns a fixed set of lanes and round-robins callers across them
//! - **[`Lane`]**: one serialized connection; acquiring it yields a [`LaneGuard`]
//! - **[`LaneGuard`]**: RAII guard that derefs to `SqliteConnection`
//! - **[`LanePoolConfig`]**: pool size and per-connection settings
//! - **[`Error`]**: error type for pool operations
//!
//! ## Architecture
//!
//! - **Serialized lanes**: each lane is an SQLx pool capped at one connection,
//!   so two statements can never interleave on the same lane
//! - **Round-robin dispatch**: `acquire()` hands out lanes in rotation; callers
//!   that need to stay on a lane keep the guard and thread the connection through
//! - **Versioned files**: the database file is named after a caller-supplied
//!   version string; files left by an older version are renamed and adopted
//! - **WAL mode**: enabled on every lane at open, with `synchronous = NORMAL`
//!
//! ## Usage
//!
//! ```no_run
//! use sqlx_sqlite_lane_pool::{LanePool, LanePoolConfig};
//!
//! #[tokio::main]
//! async fn main() -> sqlx_sqlite_lane_pool::Result<()> {
//!     let (pool, adopted) = LanePool::open("./data", "3", None).await?;
//!     if adopted {
//!         // a previous version's database file was renamed into place
//!     }
//!
//!     let lane = pool.acquire();
//!     let mut conn = lane.connect().await?;
//!     sqlx::query("CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY)")
//!         .execute(&mut *conn)
//!         .await?;
//!     drop(conn);
//!
//!     pool.close().await;
//!     Ok(())
//! }
//! ```
//!
mod config;
mod error;
mod lane;
mod pool;
mod version;

// Re-export public types
pub use config::LanePoolConfig;
pub use error::Error;
pub use lane::{Lane, LaneGuard};
pub use pool::LanePool;
pub use version::resolve_versioned_file;

/// A type alias for Results with our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
