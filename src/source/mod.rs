//! Primary-store access seam.
//!
//! The primary store itself belongs to the rest of the application; this
//! subsystem only reads it through [`SourceAccessor`] and observes its
//! lifecycle events.

pub mod memory;
pub mod traits;

pub use memory::InMemorySource;
pub use traits::{LifecycleEvent, SourceAccessor, SourceError};
