//! Stratum Stores - drivers for the stores migrations are applied to.
//!
//! | scheme | driver | script format |
//! |--------|--------|---------------|
//! | `sqlite` | [`SqliteDriver`] | SQL batch, run in one transaction |
//! | `sled` | [`SledDriver`] | JSON list of key-value operations |

pub mod config;
pub mod error;
pub mod sled_store;
pub mod sqlite;

pub use config::{SledConfig, SqliteConfig, DEFAULT_MIGRATIONS_TABLE};
pub use error::{SledStoreError, SqliteError};
pub use sled_store::{SledDriver, SledDriverFactory};
pub use sqlite::{SqliteDriver, SqliteDriverFactory};

use stratum_core::{Error, Registry};

/// Register every driver scheme this crate provides.
pub fn register(registry: &mut Registry) -> Result<(), Error> {
    registry.register_driver("sqlite", SqliteDriverFactory)?;
    registry.register_driver("sled", SledDriverFactory)?;
    Ok(())
}
