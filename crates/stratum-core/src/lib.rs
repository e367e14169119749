//! Stratum Core - versioned, crash-safe migrations for any store.
//!
//! This crate holds everything that does not depend on a storage technology:
//! the parser for migration keys, the ordered [`MigrationIndex`], the
//! [`Driver`] and [`Source`] contracts adapters implement, the scheme-keyed
//! [`Registry`], and the [`Migrator`] state machine that applies scripts one
//! at a time under a store lock while keeping a durable dirty flag.

pub mod cancel;
pub mod driver;
pub mod engine;
pub mod error;
pub mod location;
pub mod migration;
pub mod registry;
pub mod source;
pub mod stub;
pub mod testing;

pub use cancel::CancellationToken;
pub use driver::{Driver, DriverFactory, ScriptReader, VersionState, MAX_VERSION, NIL_VERSION};
pub use engine::{AppliedStep, Migrator, RunReport, Step, Target};
pub use error::Error;
pub use location::Location;
pub use migration::{Direction, MigrationIdentity, MigrationIndex};
pub use registry::Registry;
pub use source::{Script, Source, SourceFactory};
