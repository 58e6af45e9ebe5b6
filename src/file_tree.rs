use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

/// Decides whether an entry is included in a copy.
///
/// Receives the entry's parent directory inside the source tree and the
/// entry's file name. Rejecting a directory skips its whole subtree.
pub type EntryFilter = dyn Fn(&Path, &OsStr) -> bool + Send + Sync;

/// The filesystem operations a [`WorkDir`](crate::WorkDir) delegates to.
pub trait FileTree {
    /// Copies the contents of `src` into the existing directory `dst`.
    /// When `filter` is `None`, every entry is copied.
    fn copy_tree(&self, src: &Path, dst: &Path, filter: Option<&EntryFilter>) -> io::Result<()>;

    /// Removes `path` and everything below it.
    fn delete_tree(&self, path: &Path) -> io::Result<()>;
}

/// [`FileTree`] backed by the local filesystem.
///
/// Symbolic links are never followed. On Unix they are recreated as links
/// pointing at the same target; elsewhere the content behind the link is copied.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileTree;

impl FileTree for LocalFileTree {
    fn copy_tree(&self, src: &Path, dst: &Path, filter: Option<&EntryFilter>) -> io::Result<()> {
        let mut copied: u64 = 0;
        // The destination may live inside the source tree.
        let dst_canonical = fs::canonicalize(dst)?;

        for entry in WalkDir::new(src)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                !is_destination(entry, &dst_canonical) && is_included(src, entry, filter)
            })
        {
            let entry = entry?;
            let relative = entry
                .path()
                .strip_prefix(src)
                .map_err(io::Error::other)?;
            let target = dst.join(relative);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                fs::create_dir_all(&target)?;
            } else if file_type.is_symlink() {
                copy_symlink(entry.path(), &target)?;
            } else if file_type.is_file() {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &target)?;
            } else {
                log::debug!("skipping special file {:?}", entry.path());
                continue;
            }

            log::trace!("copied {:?} -> {:?}", entry.path(), target);
            copied += 1;
        }

        log::debug!("copied {} entries from {:?} to {:?}", copied, src, dst);
        Ok(())
    }

    fn delete_tree(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }
}

fn is_destination(entry: &DirEntry, dst_canonical: &Path) -> bool {
    entry.file_type().is_dir()
        && fs::canonicalize(entry.path()).is_ok_and(|path| path == dst_canonical)
}

fn is_included(root: &Path, entry: &DirEntry, filter: Option<&EntryFilter>) -> bool {
    match filter {
        None => true,
        Some(filter) => {
            let parent = entry.path().parent().unwrap_or(root);
            filter(parent, entry.file_name())
        }
    }
}

#[cfg(unix)]
fn copy_symlink(src: &Path, target: &Path) -> io::Result<()> {
    let link = fs::read_link(src)?;
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, target: &Path) -> io::Result<()> {
    fs::copy(src, target).map(|_| ())
}
