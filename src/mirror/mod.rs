//! Mirror store backends (SQL, Memory).
//!
//! The mirror store is exclusively owned by this subsystem; nothing else
//! writes to it.

pub mod memory;
pub mod sql;
pub mod traits;

pub use memory::InMemoryMirror;
pub use sql::SqlMirrorStore;
pub use traits::{MirrorStore, StoreError, StructuredEntity};
