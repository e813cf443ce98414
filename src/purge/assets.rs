//! On-disk asset cleanup for purged records.
//!
//! Binary assets of a content record live in a directory derived from its
//! inode. Removal happens only after the batch's store transaction has
//! committed, and a failure here never escalates: the rows are already gone
//! and the directory is logged and counted instead.

use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::Arc,
};

use tracing::{debug, instrument, warn};

/// Maps an inode to the directory holding its assets.
pub trait AssetPathResolver: Send + Sync {
    /// Returns `None` when the inode cannot be mapped to a path safely.
    fn asset_path(&self, inode: &str) -> Option<PathBuf>;
}

/// Two-level sharded layout: `<root>/<inode[0]>/<inode[1]>/<inode>`.
#[derive(Debug, Clone)]
pub struct ShardedAssetPaths {
    root: PathBuf,
}

impl ShardedAssetPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetPathResolver for ShardedAssetPaths {
    fn asset_path(&self, inode: &str) -> Option<PathBuf> {
        // Only plain identifier characters; anything else could escape the root.
        if inode.len() < 2
            || !inode
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return None;
        }

        let mut chars = inode.chars();
        let first = chars.next()?;
        let second = chars.next()?;

        Some(
            self.root
                .join(first.to_string())
                .join(second.to_string())
                .join(inode),
        )
    }
}

/// Outcome of removing the asset directories of one batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AssetRemovalReport {
    /// Directories that existed and were removed.
    pub removed: u64,
    /// Inodes whose directory did not exist.
    pub missing: u64,
    /// Inodes whose directory could not be resolved or removed.
    pub failed: u64,
}

impl AssetRemovalReport {
    /// True when no inode failed. A missing directory is not a failure.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn merge(&mut self, other: &AssetRemovalReport) {
        self.removed += other.removed;
        self.missing += other.missing;
        self.failed += other.failed;
    }
}

/// Removes asset directories for purged inodes.
#[derive(Clone)]
pub struct AssetRemover {
    resolver: Arc<dyn AssetPathResolver>,
}

impl AssetRemover {
    pub fn new(resolver: Arc<dyn AssetPathResolver>) -> Self {
        Self { resolver }
    }

    /// Remover using the sharded layout under `root`.
    pub fn sharded(root: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(ShardedAssetPaths::new(root)))
    }

    /// Remove the asset tree of every inode, continuing past failures.
    #[instrument(skip_all, fields(count = inodes.len()))]
    pub async fn remove_assets(&self, inodes: &[String]) -> AssetRemovalReport {
        let mut report = AssetRemovalReport::default();

        for inode in inodes {
            let Some(path) = self.resolver.asset_path(inode) else {
                warn!(inode = %inode, "Refusing to remove assets for unsafe inode");
                report.failed += 1;
                continue;
            };

            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!(inode = %inode, path = %path.display(), "Removed asset directory");
                    report.removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    report.missing += 1;
                }
                Err(e) => {
                    warn!(
                        inode = %inode,
                        path = %path.display(),
                        error = %e,
                        "Failed to remove asset directory"
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }
}
