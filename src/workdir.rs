use crate::{EntryFilter, Error, FileTree, LocalFileTree, ShortId};
use std::borrow::Borrow;
use std::fmt::{Debug, Display, Formatter};
use std::fs;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// Upper bound on directory names tried before giving up.
const MAX_ATTEMPTS: usize = 1 << 16;

/// A uniquely named working directory that is deleted, together with
/// everything in it, when the instance is dropped.
///
/// The name of the directory is a ten character [`ShortId`] that did not
/// exist in the base directory at construction time.
pub struct WorkDir<T: FileTree = LocalFileTree> {
    /// The absolute path of the owned directory.
    path: PathBuf,

    /// Performs the seed copy and the final removal.
    tree: T,

    /// Set once removal was attempted; later attempts are no-ops.
    disposed: bool,
}

impl WorkDir {
    /// Creates a new working directory next to the running executable.
    /// When the instance goes out of scope, the directory will be deleted.
    ///
    /// ## Example
    ///
    /// ```
    /// # use workdir::{WorkDir, Error};
    /// let dir = WorkDir::new()?;
    ///
    /// // The directory exists.
    /// let dir_path = dir.to_path_buf();
    /// assert!(dir_path.is_dir());
    ///
    /// // Deletes the directory.
    /// drop(dir);
    ///
    /// // The directory was removed.
    /// assert!(!dir_path.exists());
    /// # Ok::<(), Error>(())
    /// ```
    pub fn new() -> Result<Self, Error> {
        Self::new_in(Self::default_dir()?)
    }

    /// Creates a new working directory below `base_dir`.
    /// Missing parents of `base_dir` are created as well.
    ///
    /// ## Example
    ///
    /// ```
    /// # use workdir::{WorkDir, Error};
    /// let base = std::env::temp_dir();
    /// let dir = WorkDir::new_in(&base)?;
    /// assert_eq!(dir.parent(), Some(base.as_path()));
    /// # Ok::<(), Error>(())
    /// ```
    pub fn new_in<P: AsRef<Path>>(base_dir: P) -> Result<Self, Error> {
        Self::new_in_with(base_dir, LocalFileTree)
    }

    /// Creates a new working directory next to the running executable and
    /// copies the contents of `src_dir` into it.
    ///
    /// ## Arguments
    ///
    /// * `src_dir` - The existing directory to copy from.
    /// * `filter` - Decides per entry whether it is copied; `None` copies everything.
    ///
    /// If the copy fails the new directory is removed before the error is returned.
    pub fn copy_from<S: AsRef<Path>>(
        src_dir: S,
        filter: Option<&EntryFilter>,
    ) -> Result<Self, Error> {
        Self::copy_from_in(Self::default_dir()?, src_dir, filter)
    }

    /// Creates a new working directory below `base_dir` and copies the
    /// contents of `src_dir` into it.
    ///
    /// ## Arguments
    ///
    /// * `base_dir` - The directory to create the working directory in.
    /// * `src_dir` - The existing directory to copy from.
    /// * `filter` - Decides per entry whether it is copied; `None` copies everything.
    ///
    /// ## Example
    ///
    /// ```
    /// # use workdir::{WorkDir, Error};
    /// # use std::ffi::OsStr;
    /// # use std::path::Path;
    /// # let src = tempfile::tempdir()?;
    /// # std::fs::write(src.path().join("keep.txt"), "keep")?;
    /// # std::fs::write(src.path().join("skip.txt"), "skip")?;
    /// let skip_txt = |_: &Path, name: &OsStr| name != "skip.txt";
    /// let dir = WorkDir::copy_from_in(std::env::temp_dir(), src.path(), Some(&skip_txt))?;
    ///
    /// assert!(dir.join("keep.txt").is_file());
    /// assert!(!dir.join("skip.txt").exists());
    /// # Ok::<(), Error>(())
    /// ```
    pub fn copy_from_in<B: AsRef<Path>, S: AsRef<Path>>(
        base_dir: B,
        src_dir: S,
        filter: Option<&EntryFilter>,
    ) -> Result<Self, Error> {
        let dir = Self::new_in(base_dir)?;
        dir.populate_from(src_dir, filter)?;
        Ok(dir)
    }

    /// Gets the default base directory, i.e. the directory containing the
    /// running executable.
    pub fn default_dir() -> Result<PathBuf, Error> {
        let exe = std::env::current_exe()?;
        exe.parent()
            .map(Path::to_path_buf)
            .ok_or(Error::InvalidDirectory)
    }
}

impl<T: FileTree> WorkDir<T> {
    /// Creates a new working directory below `base_dir` that uses `tree`
    /// for copying and removal.
    pub fn new_in_with<P: AsRef<Path>>(base_dir: P, tree: T) -> Result<Self, Error> {
        let base_dir = base_dir.as_ref();
        let base_dir = if base_dir.is_absolute() {
            base_dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(base_dir)
        };

        // Create the base directory and all its parents.
        fs::create_dir_all(&base_dir)?;

        for id in ShortId::candidates().take(MAX_ATTEMPTS) {
            let path = base_dir.join(id.as_str());
            if !is_vacant(&path)? {
                log::trace!("name {} is taken in {:?}", id, base_dir);
                continue;
            }

            match fs::create_dir(&path) {
                Ok(()) => {
                    log::debug!("created work directory {:?}", path);
                    return Ok(Self {
                        path,
                        tree,
                        disposed: false,
                    });
                }
                // Someone else got there first.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free directory name found in {:?}", base_dir),
        )))
    }

    /// Copies the contents of `src_dir` into this directory.
    ///
    /// ## Arguments
    ///
    /// * `src_dir` - The existing directory to copy from.
    /// * `filter` - Receives each entry's parent directory and file name;
    ///   rejecting a directory skips everything below it. `None` copies everything.
    pub fn populate_from<S: AsRef<Path>>(
        &self,
        src_dir: S,
        filter: Option<&EntryFilter>,
    ) -> Result<(), Error> {
        let src_dir = src_dir.as_ref();
        if !src_dir.is_dir() {
            return Err(Error::InvalidDirectory);
        }
        self.tree.copy_tree(src_dir, &self.path, filter)?;
        Ok(())
    }

    /// Returns the path of the working directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns an owned copy of the path of the working directory.
    pub fn to_path_buf(&self) -> PathBuf {
        self.path.clone()
    }

    /// Whether removal of the directory was already attempted.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Removes the directory and its contents.
    ///
    /// Failures are logged and otherwise ignored. Only the first call has an
    /// effect, so it is safe to call this before the instance is dropped.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        match self.tree.delete_tree(&self.path) {
            Ok(()) => log::debug!("removed work directory {:?}", self.path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("work directory {:?} was already gone", self.path)
            }
            Err(e) => log::warn!("failed to remove work directory {:?}: {}", self.path, e),
        }
    }

    /// Removes the directory and its contents, reporting failures.
    ///
    /// ## Returns
    /// * `Ok(())` if the directory was deleted or was already disposed of
    /// * `Err(_)` if deletion of the directory failed (e.g. due to file locks on Windows)
    ///
    /// The directory is not deleted again when the instance is dropped,
    /// even if this call failed.
    pub fn close(mut self) -> Result<(), Error> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.tree.delete_tree(&self.path)?;
        log::debug!("removed work directory {:?}", self.path);
        Ok(())
    }
}

#[cfg(feature = "tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "tokio")))]
impl WorkDir {
    /// Asynchronous variant of [`WorkDir::new`].
    ///
    /// ## Example
    ///
    /// ```
    /// # use workdir::{WorkDir, Error};
    /// # let _ = tokio_test::block_on(async {
    /// let dir = WorkDir::new_async().await?;
    /// let dir_path = dir.to_path_buf();
    /// assert!(tokio::fs::metadata(&dir_path).await.is_ok());
    ///
    /// dir.close_async().await?;
    /// assert!(tokio::fs::metadata(dir_path).await.is_err());
    /// # Ok::<(), Error>(())
    /// # });
    /// ```
    pub async fn new_async() -> Result<Self, Error> {
        tokio::task::spawn_blocking(Self::new).await?
    }

    /// Asynchronous variant of [`WorkDir::new_in`].
    pub async fn new_in_async<P: AsRef<Path>>(base_dir: P) -> Result<Self, Error> {
        let base_dir = base_dir.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || Self::new_in(base_dir)).await?
    }

    /// Asynchronous variant of [`WorkDir::copy_from`].
    pub async fn copy_from_async<S: AsRef<Path>>(
        src_dir: S,
        filter: Option<Box<EntryFilter>>,
    ) -> Result<Self, Error> {
        let src_dir = src_dir.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || Self::copy_from(src_dir, filter.as_deref())).await?
    }

    /// Asynchronous variant of [`WorkDir::copy_from_in`].
    pub async fn copy_from_in_async<B: AsRef<Path>, S: AsRef<Path>>(
        base_dir: B,
        src_dir: S,
        filter: Option<Box<EntryFilter>>,
    ) -> Result<Self, Error> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let src_dir = src_dir.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || {
            Self::copy_from_in(base_dir, src_dir, filter.as_deref())
        })
        .await?
    }

    /// Asynchronous variant of [`WorkDir::close`].
    pub async fn close_async(self) -> Result<(), Error> {
        tokio::task::spawn_blocking(move || self.close()).await?
    }
}

#[cfg(feature = "async-trait")]
#[cfg_attr(docsrs, doc(cfg(feature = "async-trait")))]
#[async_trait::async_trait]
impl crate::AsyncClose for WorkDir {
    async fn close(self) -> Result<(), Error> {
        self.close_async().await
    }
}

/// Ensures that the underlying directory is deleted.
impl<T: FileTree> Drop for WorkDir<T> {
    /// See also [`WorkDir::dispose`].
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Returns whether nothing, not even a dangling link, exists at `path`.
fn is_vacant(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}

impl<T: FileTree> Debug for WorkDir<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.path)
    }
}

/// Prints the path of the directory.
impl<T: FileTree> Display for WorkDir<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.path.display(), f)
    }
}

/// Allows implicit treatment of WorkDir as a Path.
impl<T: FileTree> Deref for WorkDir<T> {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.path
    }
}

impl<T: FileTree> Borrow<Path> for WorkDir<T> {
    fn borrow(&self) -> &Path {
        &self.path
    }
}

impl<T: FileTree> AsRef<Path> for WorkDir<T> {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SHORT_ID_LEN;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts removals and optionally fails them.
    #[derive(Default, Clone)]
    struct CountingTree {
        deletes: Arc<AtomicUsize>,
        fail_delete: bool,
    }

    impl FileTree for CountingTree {
        fn copy_tree(
            &self,
            src: &Path,
            dst: &Path,
            filter: Option<&EntryFilter>,
        ) -> io::Result<()> {
            LocalFileTree.copy_tree(src, dst, filter)
        }

        fn delete_tree(&self, path: &Path) -> io::Result<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if self.fail_delete {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
            }
            LocalFileTree.delete_tree(path)
        }
    }

    /// Writes one file and then fails.
    struct BrokenCopyTree;

    impl FileTree for BrokenCopyTree {
        fn copy_tree(&self, _: &Path, dst: &Path, _: Option<&EntryFilter>) -> io::Result<()> {
            fs::write(dst.join("partial.txt"), "partial")?;
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn delete_tree(&self, path: &Path) -> io::Result<()> {
            LocalFileTree.delete_tree(path)
        }
    }

    #[test]
    fn test_new() -> Result<(), Error> {
        let dir = WorkDir::new()?;

        let dir_path = dir.to_path_buf();
        assert!(dir_path.is_dir());
        assert_eq!(dir_path.parent(), Some(WorkDir::default_dir()?.as_path()));

        drop(dir);
        assert!(!dir_path.exists());
        Ok(())
    }

    #[test]
    fn test_name_shape() -> Result<(), Error> {
        let base = tempfile::tempdir()?;
        let dir = WorkDir::new_in(base.path())?;

        let name = dir.file_name().and_then(|n| n.to_str()).unwrap();
        assert_eq!(name.len(), SHORT_ID_LEN);
        assert!(name.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()));
        assert!(dir.path().is_absolute());
        Ok(())
    }

    #[test]
    fn test_missing_base_is_created() -> Result<(), Error> {
        let base = tempfile::tempdir()?;
        let nested = base.path().join("a").join("b");

        let dir = WorkDir::new_in(&nested)?;
        assert_eq!(dir.parent(), Some(nested.as_path()));
        assert!(dir.is_dir());
        Ok(())
    }

    #[test]
    fn test_base_is_a_file() -> Result<(), Error> {
        let base = tempfile::tempdir()?;
        let file = base.path().join("file");
        fs::write(&file, "x")?;

        assert!(matches!(WorkDir::new_in(&file), Err(Error::Io(_))));
        Ok(())
    }

    #[test]
    fn test_display_is_path() -> Result<(), Error> {
        let base = tempfile::tempdir()?;
        let dir = WorkDir::new_in(base.path())?;
        assert_eq!(dir.to_string(), dir.path().display().to_string());
        assert_eq!(format!("{:?}", dir), format!("{:?}", dir.path()));
        Ok(())
    }

    #[test]
    fn test_dispose_is_idempotent() -> Result<(), Error> {
        let base = tempfile::tempdir()?;
        let tree = CountingTree::default();
        let mut dir = WorkDir::new_in_with(base.path(), tree.clone())?;
        let dir_path = dir.to_path_buf();

        dir.dispose();
        assert!(dir.is_disposed());
        assert!(!dir_path.exists());

        dir.dispose();
        drop(dir);
        assert_eq!(tree.deletes.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_dispose_after_external_removal() -> Result<(), Error> {
        let base = tempfile::tempdir()?;
        let mut dir = WorkDir::new_in(base.path())?;

        fs::remove_dir_all(dir.path())?;
        dir.dispose();
        dir.dispose();
        Ok(())
    }

    #[test]
    fn test_dispose_swallows_delete_errors() -> Result<(), Error> {
        let base = tempfile::tempdir()?;
        let tree = CountingTree {
            fail_delete: true,
            ..Default::default()
        };
        let mut dir = WorkDir::new_in_with(base.path(), tree.clone())?;
        let dir_path = dir.to_path_buf();

        dir.dispose();
        drop(dir);

        assert_eq!(tree.deletes.load(Ordering::SeqCst), 1);
        // The failed removal leaves the directory behind.
        assert!(dir_path.is_dir());
        Ok(())
    }

    #[test]
    fn test_close_reports_delete_errors_once() -> Result<(), Error> {
        let base = tempfile::tempdir()?;
        let tree = CountingTree {
            fail_delete: true,
            ..Default::default()
        };
        let dir = WorkDir::new_in_with(base.path(), tree.clone())?;

        assert!(matches!(dir.close(), Err(Error::Io(_))));
        assert_eq!(tree.deletes.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_close_after_dispose() -> Result<(), Error> {
        let base = tempfile::tempdir()?;
        let mut dir = WorkDir::new_in(base.path())?;
        dir.dispose();
        dir.close()
    }

    #[test]
    fn test_partial_copy_is_rolled_back() -> Result<(), Error> {
        let base = tempfile::tempdir()?;
        let src = tempfile::tempdir()?;

        let result = (|| -> Result<(), Error> {
            let dir = WorkDir::new_in_with(base.path(), BrokenCopyTree)?;
            dir.populate_from(src.path(), None)?;
            Ok(())
        })();

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(fs::read_dir(base.path())?.next().is_none());
        Ok(())
    }

    #[test]
    fn test_populate_from_missing_source() -> Result<(), Error> {
        let base = tempfile::tempdir()?;
        let dir = WorkDir::new_in(base.path())?;
        let missing = base.path().join("missing");

        assert!(matches!(
            dir.populate_from(&missing, None),
            Err(Error::InvalidDirectory)
        ));
        assert!(dir.is_dir());
        Ok(())
    }

    #[test]
    fn test_is_vacant() -> Result<(), Error> {
        let base = tempfile::tempdir()?;
        let file = base.path().join("file");
        assert!(is_vacant(&file)?);
        fs::write(&file, "x")?;
        assert!(!is_vacant(&file)?);
        assert!(!is_vacant(base.path())?);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_link_is_not_vacant() -> Result<(), Error> {
        let base = tempfile::tempdir()?;
        let link = base.path().join("link");
        std::os::unix::fs::symlink(base.path().join("nowhere"), &link)?;
        assert!(!is_vacant(&link)?);
        Ok(())
    }
}
