//! fuse-bridge: write a filesystem as plain trait methods, get a libfuse3
//! callback table for free.
//!
//! Implement [`Filesystem`] for a type, declare the operations it supports
//! in [`Filesystem::CAPABILITIES`], and hand an instance to [`Fuse::run`].
//! The crate builds the host's `fuse_operations` table once per type,
//! populating only the declared operations and leaving the rest at the
//! host's NULL sentinel, and recovers the owning instance on every call.
//! [`PathCache`] is a shared time-bounded path-to-metadata cache handler
//! methods can use to skip repeated expensive lookups.
//!
//! ```ignore
//! use fuse_bridge::{Filesystem, Fuse, OpSet};
//!
//! struct HelloFs;
//!
//! impl Filesystem for HelloFs {
//!     const CAPABILITIES: OpSet = OpSet::GETATTR.union(OpSet::READ);
//!     // fn getattr(...), fn read(...)
//! }
//!
//! fn main() -> std::io::Result<()> {
//!     let status = Fuse::new(HelloFs).run(std::env::args_os())?;
//!     std::process::exit(status);
//! }
//! ```

#[macro_use]
extern crate log;

mod handler;
mod mount;
mod path_cache;
pub mod sys;
mod table;

pub use handler::{DirFiller, FillDirFlags, Filesystem, OpSet, ReadDirFlags, RenameFlags};
pub use mount::Fuse;
pub use path_cache::{PathCache, PathInfo, path_cache};
pub use sys::{ConnInfo, FileInfo, FuseOperations};
pub use table::operations_for;
