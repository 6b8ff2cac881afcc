//! tidyfs watch management
//!
//! Keeping native filesystem watches alive is harder than it looks:
//! configured directories may not exist yet, may be deleted and recreated
//! while the daemon runs, and recursive rules need watches on every
//! subdirectory. The [`manager::WatchManager`] tracks all of that in a
//! single watch table; [`source::EventSource`] abstracts the OS watch
//! primitive so tests can drive the table with a mock.

pub mod manager;
pub mod source;

pub use manager::{RecreatedRoot, WatchManager};
pub use source::{EventSource, FsEvent, FsEventKind, MockSource, NotifySource};
