// Copyright (c) 2024-2025 R3BL LLC. Licensed under Apache License, Version 2.0.

use miette::IntoDiagnostic;
use rand::Rng as _;
use std::{fmt::{Display, Formatter},
          ops::Deref,
          path::{Path, PathBuf}};

/// A directory under [`std::env::temp_dir`] that is deleted when dropped. Used for
/// interlink socket paths and log files in tests.
#[derive(Debug)]
pub struct TempDir {
    pub inner: PathBuf,
}

impl TempDir {
    /// Join a path to the temporary directory.
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf { self.inner.join(path) }
}

/// Create a temporary directory with a random name. The directory is automatically
/// deleted when the [`TempDir`] struct is dropped.
///
/// # Errors
///
/// Returns an error if:
/// - The temp directory cannot be created due to insufficient permissions
/// - The file system is full
pub fn try_create_temp_dir() -> miette::Result<TempDir> {
    let root = std::env::temp_dir();
    let number: u32 = rand::rng().random_range(0..1_000_000);
    let new_temp_dir = root.join(format!("itrm-{}-{number:06}", std::process::id()));
    std::fs::create_dir(&new_temp_dir).into_diagnostic()?;
    Ok(TempDir {
        inner: new_temp_dir,
    })
}

/// Automatically delete the temporary directory when the [`TempDir`] struct is dropped.
impl Drop for TempDir {
    fn drop(&mut self) {
        // We don't care about the result of this operation.
        std::fs::remove_dir_all(&self.inner).ok();
    }
}

impl Deref for TempDir {
    type Target = PathBuf;

    fn deref(&self) -> &Self::Target { &self.inner }
}

impl Display for TempDir {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_dir_is_removed_on_drop() {
        let dir = try_create_temp_dir().unwrap();
        let path = dir.inner.clone();
        assert!(path.exists());
        drop(dir);
        assert!(!path.exists());
    }
}
