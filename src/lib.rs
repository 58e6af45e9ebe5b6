//! # workdir
//!
//! Provides the [`WorkDir`] struct, a uniquely named working directory that is
//! deleted, with all of its contents, when the instance is dropped. A new
//! directory can optionally be seeded with a filtered copy of another directory.
//!
//! ```
//! use std::ffi::OsStr;
//! use std::path::Path;
//! use workdir::WorkDir;
//!
//! # let src = tempfile::tempdir().unwrap();
//! # std::fs::create_dir(src.path().join("target")).unwrap();
//! # std::fs::write(src.path().join("Cargo.toml"), "").unwrap();
//! let no_target = |_: &Path, name: &OsStr| name != "target";
//! let dir = WorkDir::copy_from_in(std::env::temp_dir(), src.path(), Some(&no_target)).unwrap();
//!
//! assert!(dir.join("Cargo.toml").is_file());
//! assert!(!dir.join("target").exists());
//!
//! // Removes the directory and the copied files.
//! let path = dir.to_path_buf();
//! drop(dir);
//! assert!(!path.exists());
//! ```
//!
//! Without an explicit base directory, working directories are created next to the
//! running executable rather than in the system temporary directory.
//!
//! ## Features
//!
//! * `tokio` - Asynchronous constructors that run the blocking filesystem work on
//!             [`tokio::task::spawn_blocking`](https://docs.rs/tokio/latest/tokio/task/fn.spawn_blocking.html).
//! * `async-trait` - Implements [`AsyncClose`] for [`WorkDir`]. Implies `tokio`.

// Document crate features on docs.rs.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

mod errors;
mod file_tree;
mod short_id;
mod workdir;

pub use errors::Error;
pub use file_tree::{EntryFilter, FileTree, LocalFileTree};
pub use short_id::{ShortId, SHORT_ID_LEN};
pub use workdir::WorkDir;

/// Closes a resource asynchronously.
#[cfg(feature = "async-trait")]
#[cfg_attr(docsrs, doc(cfg(feature = "async-trait")))]
#[async_trait::async_trait]
pub trait AsyncClose {
    /// Closes the resource, reporting failures.
    async fn close(self) -> Result<(), Error>;
}
