//! Migration identities and the ordered index built from them.

mod identity;
mod index;

pub use identity::{Direction, MigrationIdentity};
pub use index::MigrationIndex;
