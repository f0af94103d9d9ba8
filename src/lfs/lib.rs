//! Storage core of a log-structured filesystem.
//!
//! The filesystem lives inside a fixed-size image and persists every update
//! as an append at the tail of a log; nothing written is ever overwritten in
//! place. An inode map resolves each inode number to the block holding its
//! most recent copy, and a relocating garbage collector compacts live blocks
//! toward the start of the log and rewinds the tail to reclaim space.
//!
//! [`fs::Lfs`] is the mount session: it owns the device handle and the
//! in-memory state, and exposes the whole operation surface. Images are
//! produced by [`format::format`].

pub mod disk;
pub mod error;
pub mod format;
pub mod fs;
pub mod gc;
pub mod inode;
pub mod layout;
pub mod log;

pub use error::Error;
pub use error::Result;
pub use fs::FileAttr;
pub use fs::FileKind;
pub use fs::Lfs;
