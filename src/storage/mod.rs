//! SQLite-backed content-addressed report store.
//!
//! Each report is stored as a compact header row plus references into a
//! globally deduplicated unit table keyed by BLAKE3 content hashes. Inserts
//! run inside a single transaction, so a cancelled ingest rolls back cleanly;
//! content-addressed unit rows left behind by other reports are reusable and
//! never need garbage collection.

use std::{path::Path, str::FromStr};

use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Row, SqlitePool,
};

use crate::{
    models::{Commit, Project, ReportFile},
    report::serialize::{SerializedReport, SerializedUnit, UnitKey},
};

/// Ordered, idempotent schema migrations. The current schema version is
/// tracked in `PRAGMA user_version`; migrations past it run at startup,
/// before the server accepts requests.
const MIGRATIONS: &[&str] = &[
    include_str!("migrations/001_init.sql"),
    include_str!("migrations/002_report_unit_order.sql"),
];

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open (or create) the database at `path` and bring the schema up to
    /// date.
    pub async fn new(path: &Path) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .context("invalid database path")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts)
            .await
            .context("failed to open database")?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// An isolated in-memory database, for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version").fetch_one(pool).await?;
        for (idx, sql) in MIGRATIONS.iter().enumerate().skip(version as usize) {
            tracing::info!(version = idx + 1, "applying schema migration");
            let mut tx = pool.begin().await?;
            for stmt in sql.split(';') {
                let stmt = stmt.trim();
                if !stmt.is_empty() {
                    sqlx::query(stmt)
                        .execute(&mut *tx)
                        .await
                        .with_context(|| format!("migration {} failed", idx + 1))?;
                }
            }
            sqlx::query(&format!("PRAGMA user_version = {}", idx + 1))
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }
        Ok(())
    }

    /// Insert a report and its units in one transaction.
    ///
    /// Units are deduplicated globally by content key; re-inserting the same
    /// `(project, version, commit)` report only refreshes its timestamp.
    pub async fn insert_report(&self, file: &ReportFile) -> Result<()> {
        let serialized = file.report.serialize().context("failed to serialize report")?;
        let mut tx = self.pool.begin().await?;

        // Projects may be renamed upstream; id is the stable identity.
        sqlx::query(
            r#"
            INSERT INTO projects (id, owner, name, created_at, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
            ON CONFLICT (id) DO UPDATE
            SET owner = EXCLUDED.owner, name = EXCLUDED.name, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(file.project.id)
        .bind(&file.project.owner)
        .bind(&file.project.name)
        .execute(&mut *tx)
        .await?;

        // Units first, so the junction rows below always resolve.
        for unit in &serialized.units {
            sqlx::query(
                "INSERT INTO report_units (id, data) VALUES (?, ?) ON CONFLICT (id) DO NOTHING",
            )
            .bind(unit.key.as_slice())
            .bind(unit.data.as_slice())
            .execute(&mut *tx)
            .await?;
        }

        let report_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO reports (project_id, version, git_commit, timestamp, data)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (project_id, version COLLATE NOCASE, git_commit COLLATE NOCASE)
            DO UPDATE SET timestamp = EXCLUDED.timestamp
            RETURNING id
            "#,
        )
        .bind(file.project.id)
        .bind(&file.version)
        .bind(&file.commit.sha)
        .bind(file.commit.timestamp)
        .bind(serialized.data.as_slice())
        .fetch_one(&mut *tx)
        .await?;

        for (index, unit) in serialized.units.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO report_report_units (report_id, report_unit_id, unit_index)
                VALUES (?, ?, ?)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(report_id)
            .bind(unit.key.as_slice())
            .bind(index as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Reconstruct a stored report. Version and commit are matched
    /// case-insensitively; the returned file carries the stored casing.
    pub async fn get_report(
        &self,
        project_id: i64,
        version: &str,
        commit_sha: &str,
    ) -> Result<Option<ReportFile>> {
        let Some(row) = sqlx::query(
            r#"
            SELECT r.id, r.version, r.git_commit, r.timestamp, r.data, p.owner, p.name
            FROM reports r JOIN projects p ON r.project_id = p.id
            WHERE r.project_id = ?
                  AND r.version = ? COLLATE NOCASE
                  AND r.git_commit = ? COLLATE NOCASE
            "#,
        )
        .bind(project_id)
        .bind(version)
        .bind(commit_sha)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let report_id: i64 = row.try_get("id")?;

        let mut serialized = SerializedReport { data: row.try_get("data")?, units: Vec::new() };
        for unit_row in sqlx::query(
            r#"
            SELECT ru.id, ru.data
            FROM report_report_units rru
            JOIN report_units ru ON ru.id = rru.report_unit_id
            WHERE rru.report_id = ?
            ORDER BY rru.unit_index
            "#,
        )
        .bind(report_id)
        .fetch_all(&self.pool)
        .await?
        {
            let key_bytes: Vec<u8> = unit_row.try_get("id")?;
            let key: UnitKey =
                key_bytes.as_slice().try_into().context("stored unit key has wrong length")?;
            serialized.units.push(SerializedUnit { key, data: unit_row.try_get("data")? });
        }

        let report = serialized
            .deserialize()
            .with_context(|| format!("failed to reconstruct report {report_id}"))?;
        Ok(Some(ReportFile {
            project: Project {
                id: project_id,
                owner: row.try_get("owner")?,
                name: row.try_get("name")?,
            },
            commit: Commit {
                sha: row.try_get("git_commit")?,
                timestamp: row.try_get("timestamp")?,
            },
            version: row.try_get("version")?,
            report,
        }))
    }

    /// Point query the ingester uses to skip downloads for reports it
    /// already has.
    pub async fn report_exists(
        &self,
        project_id: i64,
        version: &str,
        commit_sha: &str,
    ) -> Result<bool> {
        let exists: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM reports
                WHERE project_id = ?
                      AND version = ? COLLATE NOCASE
                      AND git_commit = ? COLLATE NOCASE
            )
            "#,
        )
        .bind(project_id)
        .bind(version)
        .bind(commit_sha)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists != 0)
    }

    /// Row counts for the report tables: (projects, reports, report_units,
    /// junction rows). Test support.
    #[doc(hidden)]
    pub async fn table_counts(&self) -> Result<(i64, i64, i64, i64)> {
        let projects =
            sqlx::query_scalar("SELECT COUNT(*) FROM projects").fetch_one(&self.pool).await?;
        let reports =
            sqlx::query_scalar("SELECT COUNT(*) FROM reports").fetch_one(&self.pool).await?;
        let units =
            sqlx::query_scalar("SELECT COUNT(*) FROM report_units").fetch_one(&self.pool).await?;
        let junction = sqlx::query_scalar("SELECT COUNT(*) FROM report_report_units")
            .fetch_one(&self.pool)
            .await?;
        Ok((projects, reports, units, junction))
    }

    /// Direct pool access for tests that need to inspect or corrupt rows.
    #[doc(hidden)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
