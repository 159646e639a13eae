//! Filesystem helpers shared by the update engine.
//!
//! - [`fs`] - the injectable [`FileSystem`](fs::FileSystem) abstraction, the
//!   real [`OsFileSystem`](fs::OsFileSystem) and atomic writes

pub mod fs;

pub use fs::{FileSystem, FsError, FsOp, OsFileSystem};
