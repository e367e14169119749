//! Migration engine.
//!
//! A request names a [`Target`]; the [`Migrator`] takes the store lock, then
//! repeatedly reads the persisted state, plans the next [`Step`] from the
//! index, and runs it:
//!
//! | phase | driver call |
//! |-------|-------------|
//! | read | `version()`; a dirty flag aborts the request |
//! | mark | `set_version(to, true)` |
//! | execute | `run(body)`; failure leaves the store dirty at `to` |
//! | clear | `set_version(to, false)` |
//!
//! The loop ends when the target is reached, the index is exhausted, the step
//! count is used up, or cancellation was requested. The lock is released in
//! every case.
//!
//! # Example
//!
//! ```ignore
//! use stratum_core::{Migrator, Registry};
//!
//! let migrator = Migrator::open(&registry, "file://./migrations", "sqlite://app.db").await?;
//! let report = migrator.up().await?;
//! println!("now at {}", report.final_state);
//! ```

mod migrator;
mod plan;
mod report;

pub use migrator::Migrator;
pub use plan::{next_step, plan, Step, Target};
pub use report::{AppliedStep, RunReport};
