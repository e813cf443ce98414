use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use crate::{
    db::{
        error::DbResult,
        repos::{ContentletRepo, MOD_DATE_INDEX, SYSTEM_HOST_IDENTIFIER},
    },
    purge::Window,
};

pub struct PostgresContentletRepo {
    pool: PgPool,
}

impl PostgresContentletRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete every row of `table` whose `inode` is in `inodes`, binding the
    /// whole batch as a single text array parameter.
    async fn delete_by_inode(
        conn: &mut PgConnection,
        table: &str,
        inodes: &[String],
    ) -> DbResult<u64> {
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE inode = ANY($1)"))
            .bind(inodes)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ContentletRepo for PostgresContentletRepo {
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
            SELECT MIN(mod_date) AS start_date
            FROM contentlet
            WHERE identifier <> $1 OR identifier IS NULL
            "#,
        )
        .bind(SYSTEM_HOST_IDENTIFIER)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<Option<DateTime<Utc>>, _>("start_date")?)
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
            WHERE (c.identifier <> $1 OR c.identifier IS NULL)
              AND c.mod_date >= $2
              AND c.mod_date < $3
              AND ($4::text IS NULL OR c.inode > $4)
              AND NOT EXISTS (
                  SELECT 1 FROM contentlet_version_info vi
                  WHERE vi.working_inode = c.inode
                     OR vi.live_inode = c.inode
              )
            ORDER BY c.inode
            LIMIT $5
            "#,
        )
        .bind(SYSTEM_HOST_IDENTIFIER)
        .bind(window.start)
        .bind(window.end)
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
