use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{db::error::DbResult, purge::Window};

/// Identifier of the host record every site hangs off. It is never a purge
/// candidate and does not count toward the earliest content date.
pub const SYSTEM_HOST_IDENTIFIER: &str = "SYSTEM_HOST";

/// Name of the supporting index on `contentlet(mod_date)`.
pub const MOD_DATE_INDEX: &str = "idx_contentlet_mod_date";

/// Access to the content store tables the purge job reads and deletes from:
/// `contentlet`, `contentlet_version_info`, `inode` and `tag_inode`.
///
/// The schema belongs to the content platform; implementations only issue
/// parameterized queries against it plus one idempotent `CREATE INDEX`.
#[async_trait]
pub trait ContentletRepo: Send + Sync {
    /// Create the `mod_date` index window scans depend on, if missing.
    async fn ensure_mod_date_index(&self) -> DbResult<()>;

    /// Oldest `mod_date` of any content row other than the system host.
    /// Returns `None` when the table holds no such rows.
    async fn earliest_mod_date(&self) -> DbResult<Option<DateTime<Utc>>>;

    /// Load up to `limit` orphaned inodes whose `mod_date` falls in `window`.
    ///
    /// An inode is orphaned when no `contentlet_version_info` row names it as
    /// the working or live version. Results are ordered by inode; `after`
    /// restricts the scan to inodes strictly greater than the given one.
    async fn find_orphaned(
        &self,
        window: &Window,
        limit: u32,
        after: Option<&str>,
    ) -> DbResult<Vec<String>>;

    /// Delete the `contentlet`, `inode` and `tag_inode` rows for `inodes` in a
    /// single transaction. Returns the number of `contentlet` rows deleted.
    ///
    /// Either all three deletes commit or none do.
    async fn purge(&self, inodes: &[String]) -> DbResult<u64>;
}
