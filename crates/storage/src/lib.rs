//! Durable storage for scorebook games.
//!
//! [`GameStore`] is the one persistence seam shared by the client session
//! (its local durable store) and every cluster node (its replica of the
//! committed state). Two implementations ship here: [`MemoryStore`] for
//! tests and ephemeral nodes, and [`FileStore`] for one JSON document per
//! game on disk. Any other backend can check itself against
//! [`conformance::run_conformance_suite`].

pub mod conformance;
mod error;
mod file;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use record::{GameRecord, StoreVersion};
pub use traits::GameStore;
