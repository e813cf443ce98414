use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

use crate::{
    db::{
        error::DbResult,
        repos::{ContentletRepo, MOD_DATE_INDEX, SYSTEM_HOST_IDENTIFIER},
    },
    purge::Window,
};

/// SQLite content store.
///
/// `mod_date` is stored as text in whatever layout the platform wrote
/// (`2018-01-01 00:00:00` or RFC 3339), so both sides of every comparison
/// go through `strftime` to a single UTC layout with millisecond precision.
pub struct SqliteContentletRepo {
    pool: SqlitePool,
}

impl SqliteContentletRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Delete every row of `table` whose `inode` column is in `inodes`.
    ///
    /// Each inode is bound as its own parameter.
    async fn delete_by_inode(
        conn: &mut SqliteConnection,
        table: &str,
        inodes: &[String],
    ) -> DbResult<u64> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("DELETE FROM {table} WHERE inode IN ("));
        let mut separated = query.separated(", ");
        for inode in inodes {
            separated.push_bind(inode.as_str());
        }
        separated.push_unseparated(")");

        let result = query.build().execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ContentletRepo for SqliteContentletRepo {
    async fn ensure_mod_date_index(&self) -> DbResult<()> {
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {MOD_DATE_INDEX} ON contentlet(mod_date)"
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn earliest_mod_date(&self) -> DbResult<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            r#"
            SELECT MIN(strftime('%Y-%m-%d %H:%M:%f', mod_date)) AS start_date
            FROM contentlet
            WHERE identifier <> ? OR identifier IS NULL
            "#,
        )
        .bind(SYSTEM_HOST_IDENTIFIER)
        .fetch_one(&self.pool)
        .await?;

        let earliest = row.try_get::<Option<NaiveDateTime>, _>("start_date")?;
        Ok(earliest.map(|naive| naive.and_utc()))
    }

    async fn find_orphaned(
        &self,
        window: &Window,
        limit: u32,
        after: Option<&str>,
    ) -> DbResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT c.inode FROM contentlet c
            WHERE (c.identifier <> ? OR c.identifier IS NULL)
              AND strftime('%Y-%m-%d %H:%M:%f', c.mod_date) >= strftime('%Y-%m-%d %H:%M:%f', ?)
              AND strftime('%Y-%m-%d %H:%M:%f', c.mod_date) < strftime('%Y-%m-%d %H:%M:%f', ?)
              AND (? IS NULL OR c.inode > ?)
              AND NOT EXISTS (
                  SELECT 1 FROM contentlet_version_info vi
                  WHERE vi.working_inode = c.inode
                     OR vi.live_inode = c.inode
              )
            ORDER BY c.inode
            LIMIT ?
            "#,
        )
        .bind(SYSTEM_HOST_IDENTIFIER)
        .bind(window.start)
        .bind(window.end)
        .bind(after)
        .bind(after)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("inode").map_err(Into::into))
            .collect()
    }

    async fn purge(&self, inodes: &[String]) -> DbResult<u64> {
        if inodes.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        let deleted = Self::delete_by_inode(&mut tx, "contentlet", inodes).await?;
        Self::delete_by_inode(&mut tx, "inode", inodes).await?;
        Self::delete_by_inode(&mut tx, "tag_inode", inodes).await?;

        tx.commit().await?;

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::db::tests::harness::{self, ContentStoreFixture};

    async fn create_repo() -> (SqliteContentletRepo, SqlitePool) {
        let pool = harness::create_sqlite_pool().await;
        harness::create_sqlite_content_schema(&pool).await;
        (SqliteContentletRepo::new(pool.clone()), pool)
    }

    #[tokio::test]
    async fn test_space_separated_dates_respect_window_end() {
        let (repo, pool) = create_repo().await;
        harness::insert_sqlite_contentlet_raw_date(&pool, "before-cutoff", "2024-05-02 09:00:00").await;
        harness::insert_sqlite_contentlet_raw_date(&pool, "after-cutoff", "2024-05-02 18:00:00").await;
        harness::insert_sqlite_contentlet_raw_date(&pool, "at-cutoff", "2024-05-02 10:00:00").await;

        let window = Window {
            start: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap(),
        };
        let found = repo.find_orphaned(&window, 10, None).await.unwrap();

        assert_eq!(found, vec!["before-cutoff".to_string()]);
    }

    #[tokio::test]
    async fn test_space_separated_dates_respect_window_start() {
        let (repo, pool) = create_repo().await;
        harness::insert_sqlite_contentlet_raw_date(&pool, "early", "2024-05-02 09:59:59").await;
        harness::insert_sqlite_contentlet_raw_date(&pool, "on-start", "2024-05-02 10:00:00").await;

        let window = Window {
            start: Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        };
        let found = repo.find_orphaned(&window, 10, None).await.unwrap();

        assert_eq!(found, vec!["on-start".to_string()]);
    }

    #[tokio::test]
    async fn test_mixed_date_layouts_share_one_ordering() {
        let (repo, pool) = create_repo().await;
        harness::insert_sqlite_contentlet_raw_date(&pool, "native", "2018-01-01 00:00:00").await;
        pool.insert_contentlet("rfc3339", None, Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 1).unwrap())
            .await;

        assert_eq!(
            repo.earliest_mod_date().await.unwrap(),
            Some(Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap())
        );

        let window = Window {
            start: Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 1).unwrap(),
        };
        let found = repo.find_orphaned(&window, 10, None).await.unwrap();
        assert_eq!(found, vec!["native".to_string()]);
    }

    #[tokio::test]
    async fn test_purge_empty_batch_is_noop() {
        let (repo, _pool) = create_repo().await;
        assert_eq!(repo.purge(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_rolls_back_when_a_delete_fails() {
        let (repo, pool) = create_repo().await;
        let old = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        pool.insert_contentlet("aaaa-1", Some("id-1"), old).await;
        pool.insert_contentlet("aaaa-2", Some("id-2"), old).await;

        // The third delete of the batch hits a missing table.
        sqlx::query("DROP TABLE tag_inode")
            .execute(&pool)
            .await
            .unwrap();

        let result = repo
            .purge(&["aaaa-1".to_string(), "aaaa-2".to_string()])
            .await;
        assert!(result.is_err());

        assert_eq!(pool.count_rows("contentlet").await, 2);
        assert_eq!(pool.count_rows("inode").await, 2);
    }

    #[tokio::test]
    async fn test_find_orphaned_treats_identifiers_as_data() {
        let (repo, pool) = create_repo().await;
        let old = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let hostile = "x') OR 1=1; --";
        pool.insert_contentlet(hostile, None, old).await;
        pool.insert_contentlet("bbbb-1", None, old).await;

        let window = Window {
            start: old - Duration::days(1),
            end: old + Duration::days(1),
        };
        let found = repo.find_orphaned(&window, 10, None).await.unwrap();
        assert_eq!(found.len(), 2);

        let deleted = repo.purge(&[hostile.to_string()]).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(pool.count_rows("contentlet").await, 1);
    }
}
