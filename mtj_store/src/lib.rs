//! The durable project/segment store and the queue operations (§4.3) that
//! mutate it. A single sqlite database file holds exactly one project at a
//! time, matching this system's single-host, single-project scheduling
//! model (§5); multi-book project management is an explicit non-goal.
//!
//! Queries here are written with the dynamic `sqlx::query`/`query_as`
//! forms rather than the compile-time-checked `query!`/`query_as!` macros:
//! the latter need a live database (or a committed offline query cache) to
//! expand at build time, which this workspace deliberately avoids pinning
//! to. The teacher's own `szr_yomichan`/`szr_web` code uses both forms
//! depending on the call site; we standardise on the dynamic one.

pub mod backup;
pub mod model;

use model::{EngineState, ExportSettings, NewContentDoc, NewProject, Project, Segment, SegmentStatus, Stats};
use snafu::{ResultExt, Snafu};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Error)))]
pub enum Error {
    #[snafu(display("could not open database at {path}: {source}"))]
    OpenDatabaseError { path: String, source: sqlx::Error },
    #[snafu(display("migration failed: {source}"))]
    MigrationError { source: sqlx::migrate::MigrateError },
    #[snafu(display("query failed: {source}"))]
    QueryError { source: sqlx::Error },
    #[snafu(display("stored data is inconsistent: {source}"))]
    CorruptRowError { source: model::ModelError },
    #[snafu(display("no project has been imported yet"))]
    NoProjectError,
    #[snafu(display("segment {id} does not exist"))]
    UnknownSegmentError { id: String },
    #[snafu(display("backup bundle error: {source}"))]
    BundleError { source: backup::BundleError },
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if necessary) the sqlite file at `path` and run
    /// pending migrations.
    #[instrument(skip_all, fields(path = %path))]
    pub async fn connect(path: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(path)
            .context(OpenDatabaseError { path: path.to_owned() })?
            .create_if_missing(true);
        Self::connect_with_options(opts, 5, path).await
    }

    /// A single-connection in-memory database for tests. Sqlite gives each
    /// connection its own private `:memory:` database, so the pool must be
    /// capped at one connection or pooled queries would silently land on
    /// an empty, un-migrated database.
    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(":memory:")
            .context(OpenDatabaseError { path: ":memory:".to_owned() })?;
        Self::connect_with_options(opts, 1, ":memory:").await
    }

    async fn connect_with_options(opts: SqliteConnectOptions, max_connections: u32, path: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await
            .context(OpenDatabaseError { path: path.to_owned() })?;
        MIGRATOR.run(&pool).await.context(MigrationError)?;
        Ok(Store { pool })
    }

    /// Delete every row. Used both before a fresh import and as the first
    /// step of `restore`.
    #[instrument(skip(self))]
    pub async fn wipe(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.context(QueryError)?;
        sqlx::query("DELETE FROM segments").execute(&mut *tx).await.context(QueryError)?;
        sqlx::query("DELETE FROM content_docs").execute(&mut *tx).await.context(QueryError)?;
        sqlx::query("DELETE FROM project").execute(&mut *tx).await.context(QueryError)?;
        tx.commit().await.context(QueryError)?;
        Ok(())
    }

    /// Wipe the store, then write the project, its content documents and
    /// every segment their batches produced, as one transaction.
    #[instrument(skip_all, fields(project_id = %project.id))]
    pub async fn import_project(&self, project: NewProject, docs: Vec<NewContentDoc>) -> Result<()> {
        let total_segments: i64 = docs.iter().map(|d| d.batches.len() as i64).sum();

        let mut tx = self.pool.begin().await.context(QueryError)?;
        sqlx::query("DELETE FROM segments").execute(&mut *tx).await.context(QueryError)?;
        sqlx::query("DELETE FROM content_docs").execute(&mut *tx).await.context(QueryError)?;
        sqlx::query("DELETE FROM project").execute(&mut *tx).await.context(QueryError)?;

        sqlx::query(
            "INSERT INTO project (id, original_title, author, cover_bytes, archive_bytes, \
             total_segments, translated_segments, schema_version, engine_state) \
             VALUES (?, ?, ?, ?, ?, ?, 0, ?, 'IDLE')",
        )
        .bind(&project.id)
        .bind(&project.original_title)
        .bind(&project.author)
        .bind(&project.cover_bytes)
        .bind(&project.archive_bytes)
        .bind(total_segments)
        .bind(project.schema_version as i64)
        .execute(&mut *tx)
        .await
        .context(QueryError)?;

        for doc in &docs {
            sqlx::query("INSERT INTO content_docs (path, spine_index) VALUES (?, ?)")
                .bind(&doc.path)
                .bind(doc.spine_index as i64)
                .execute(&mut *tx)
                .await
                .context(QueryError)?;

            for batch in &doc.batches {
                let id = Segment::make_id(&doc.path, batch.batch_index);
                sqlx::query(
                    "INSERT INTO segments (id, content_doc_path, batch_index, original_html) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(&doc.path)
                .bind(batch.batch_index)
                .bind(&batch.original_html)
                .execute(&mut *tx)
                .await
                .context(QueryError)?;
            }
        }

        tx.commit().await.context(QueryError)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_project(&self) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT id, original_title, author, translated_title, cover_bytes, archive_bytes, \
             total_segments, translated_segments, schema_version, export_text_alignment, \
             export_force_alignment, engine_state FROM project LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context(QueryError)?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(project_from_row(&row)?))
    }

    #[instrument(skip(self))]
    pub async fn update_engine_state(&self, state: EngineState) -> Result<()> {
        sqlx::query("UPDATE project SET engine_state = ?")
            .bind(state.as_str())
            .execute(&self.pool)
            .await
            .context(QueryError)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn update_export_settings(&self, settings: &ExportSettings) -> Result<()> {
        sqlx::query("UPDATE project SET export_text_alignment = ?, export_force_alignment = ?")
            .bind(settings.text_alignment.as_str())
            .bind(settings.force_alignment)
            .execute(&self.pool)
            .await
            .context(QueryError)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_translated_title(&self, title: &str) -> Result<()> {
        sqlx::query("UPDATE project SET translated_title = ?")
            .bind(title)
            .execute(&self.pool)
            .await
            .context(QueryError)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_cover_bytes(&self, bytes: &[u8]) -> Result<()> {
        sqlx::query("UPDATE project SET cover_bytes = ?")
            .bind(bytes)
            .execute(&self.pool)
            .await
            .context(QueryError)?;
        Ok(())
    }

    /// Atomically select one segment, preferring PENDING over FAILED, and
    /// mark it TRANSLATING.
    #[instrument(skip(self))]
    pub async fn claim_next(&self) -> Result<Option<Segment>> {
        let mut tx = self.pool.begin().await.context(QueryError)?;

        let row = sqlx::query(
            "SELECT id FROM segments WHERE status IN ('PENDING', 'FAILED') \
             ORDER BY CASE status WHEN 'PENDING' THEN 0 ELSE 1 END, batch_index LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await
        .context(QueryError)?;

        let Some(row) = row else {
            tx.commit().await.context(QueryError)?;
            return Ok(None);
        };
        let id: String = row.try_get("id").context(QueryError)?;

        sqlx::query("UPDATE segments SET status = 'TRANSLATING' WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .context(QueryError)?;

        let claimed = fetch_segment_tx(&mut tx, &id).await?;
        tx.commit().await.context(QueryError)?;
        Ok(Some(claimed))
    }

    /// Mark a segment TRANSLATED and recompute the project's translated
    /// count from the authoritative row count, never by blind increment.
    #[instrument(skip(self, translated_html))]
    pub async fn complete_segment(&self, id: &str, translated_html: String) -> Result<()> {
        let mut tx = self.pool.begin().await.context(QueryError)?;

        sqlx::query("UPDATE segments SET status = 'TRANSLATED', translated_html = ?, error = NULL WHERE id = ?")
            .bind(&translated_html)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context(QueryError)?;

        recompute_translated_count(&mut tx).await?;
        tx.commit().await.context(QueryError)?;
        Ok(())
    }

    /// Quota errors revert to PENDING and flip the engine to
    /// QUOTA_PAUSED without touching the retry budget. Other errors bump
    /// the retry count and transition to SKIPPED once `max_retries` is
    /// reached.
    #[instrument(skip(self, error))]
    pub async fn fail_segment(&self, id: &str, error: &str, is_quota: bool, max_retries: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.context(QueryError)?;

        if is_quota {
            sqlx::query("UPDATE segments SET status = 'PENDING', error = ? WHERE id = ?")
                .bind(error)
                .bind(id)
                .execute(&mut *tx)
                .await
                .context(QueryError)?;
            sqlx::query("UPDATE project SET engine_state = 'QUOTA_PAUSED'")
                .execute(&mut *tx)
                .await
                .context(QueryError)?;
        } else {
            let row = sqlx::query("SELECT retry_count FROM segments WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .context(QueryError)?
                .context(UnknownSegmentError { id: id.to_owned() })?;
            let retry_count: i64 = row.try_get("retry_count").context(QueryError)?;
            let new_count = retry_count + 1;
            let status = if new_count >= max_retries { "SKIPPED" } else { "FAILED" };

            sqlx::query("UPDATE segments SET status = ?, retry_count = ?, error = ? WHERE id = ?")
                .bind(status)
                .bind(new_count)
                .bind(error)
                .bind(id)
                .execute(&mut *tx)
                .await
                .context(QueryError)?;
        }

        tx.commit().await.context(QueryError)?;
        Ok(())
    }

    /// Every SKIPPED segment goes back to PENDING with a clean slate. Does
    /// not touch `translated_segments`: SKIPPED segments were never
    /// counted as translated, so there is nothing to decrement.
    #[instrument(skip(self))]
    pub async fn retry_skipped(&self) -> Result<()> {
        sqlx::query("UPDATE segments SET status = 'PENDING', retry_count = 0, error = NULL WHERE status = 'SKIPPED'")
            .execute(&self.pool)
            .await
            .context(QueryError)?;
        Ok(())
    }

    /// Flip a still-`TRANSLATING` engine to `COMPLETED` once no segment is
    /// left claimable or in flight, even if some ended up `SKIPPED` rather
    /// than `TRANSLATED`. §4.3's own diagram only names the all-TRANSLATED
    /// case; without this, a project with any skipped segment would leave
    /// the engine spinning in `TRANSLATING` forever once workers drain.
    #[instrument(skip(self))]
    pub async fn complete_if_drained(&self) -> Result<()> {
        let row = sqlx::query(
            "SELECT COUNT(*) as unfinished FROM segments WHERE status IN ('PENDING', 'FAILED', 'TRANSLATING')",
        )
        .fetch_one(&self.pool)
        .await
        .context(QueryError)?;
        let unfinished: i64 = row.try_get("unfinished").context(QueryError)?;
        if unfinished == 0 {
            sqlx::query("UPDATE project SET engine_state = 'COMPLETED' WHERE engine_state = 'TRANSLATING'")
                .execute(&self.pool)
                .await
                .context(QueryError)?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<Stats> {
        let row = sqlx::query(
            "SELECT COUNT(*) as total, \
             SUM(CASE WHEN status = 'TRANSLATED' THEN 1 ELSE 0 END) as translated, \
             SUM(CASE WHEN status IN ('FAILED', 'SKIPPED') THEN 1 ELSE 0 END) as failed \
             FROM segments",
        )
        .fetch_one(&self.pool)
        .await
        .context(QueryError)?;

        Ok(Stats {
            total: row.try_get("total").context(QueryError)?,
            translated: row.try_get::<Option<i64>, _>("translated").context(QueryError)?.unwrap_or(0),
            failed: row.try_get::<Option<i64>, _>("failed").context(QueryError)?.unwrap_or(0),
        })
    }

    #[instrument(skip(self))]
    pub async fn segments_for_document(&self, path: &str) -> Result<Vec<Segment>> {
        let rows = sqlx::query(
            "SELECT id, content_doc_path, batch_index, original_html, translated_html, status, \
             retry_count, error FROM segments WHERE content_doc_path = ? ORDER BY batch_index",
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await
        .context(QueryError)?;

        rows.iter().map(segment_from_row).collect()
    }

    #[instrument(skip(self))]
    pub async fn all_segments(&self) -> Result<Vec<Segment>> {
        let rows = sqlx::query(
            "SELECT id, content_doc_path, batch_index, original_html, translated_html, status, \
             retry_count, error FROM segments ORDER BY content_doc_path, batch_index",
        )
        .fetch_all(&self.pool)
        .await
        .context(QueryError)?;

        rows.iter().map(segment_from_row).collect()
    }

    /// Wipe the store and load a project and its segments verbatim, as
    /// restore does. Unlike [`Store::import_project`], segment statuses,
    /// translated markup, retry counts and errors are taken as given
    /// rather than reset to PENDING (this is for loading an existing
    /// backup bundle, not fresh import). `content_docs` order is taken
    /// from each path's first appearance in `segments`.
    #[instrument(skip_all, fields(project_id = %project.id))]
    pub async fn restore_project(&self, project: Project, segments: Vec<Segment>) -> Result<()> {
        let translated_segments = segments.iter().filter(|s| s.status == SegmentStatus::Translated).count() as i64;
        let total_segments = segments.len() as i64;

        let mut doc_order = Vec::new();
        for seg in &segments {
            if !doc_order.contains(&seg.content_doc_path) {
                doc_order.push(seg.content_doc_path.clone());
            }
        }

        let mut tx = self.pool.begin().await.context(QueryError)?;
        sqlx::query("DELETE FROM segments").execute(&mut *tx).await.context(QueryError)?;
        sqlx::query("DELETE FROM content_docs").execute(&mut *tx).await.context(QueryError)?;
        sqlx::query("DELETE FROM project").execute(&mut *tx).await.context(QueryError)?;

        sqlx::query(
            "INSERT INTO project (id, original_title, author, translated_title, cover_bytes, \
             archive_bytes, total_segments, translated_segments, schema_version, \
             export_text_alignment, export_force_alignment, engine_state) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'IDLE')",
        )
        .bind(&project.id)
        .bind(&project.original_title)
        .bind(&project.author)
        .bind(&project.translated_title)
        .bind(&project.cover_bytes)
        .bind(project.archive_bytes.as_deref().unwrap_or_default())
        .bind(total_segments)
        .bind(translated_segments)
        .bind(project.schema_version as i64)
        .bind(project.export_settings.text_alignment.as_str())
        .bind(project.export_settings.force_alignment)
        .execute(&mut *tx)
        .await
        .context(QueryError)?;

        for (idx, path) in doc_order.iter().enumerate() {
            sqlx::query("INSERT INTO content_docs (path, spine_index) VALUES (?, ?)")
                .bind(path)
                .bind(idx as i64)
                .execute(&mut *tx)
                .await
                .context(QueryError)?;
        }

        for seg in &segments {
            sqlx::query(
                "INSERT INTO segments (id, content_doc_path, batch_index, original_html, \
                 translated_html, status, retry_count, error) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&seg.id)
            .bind(&seg.content_doc_path)
            .bind(seg.batch_index)
            .bind(&seg.original_html)
            .bind(&seg.translated_html)
            .bind(seg.status.as_str())
            .bind(seg.retry_count)
            .bind(&seg.error)
            .execute(&mut *tx)
            .await
            .context(QueryError)?;
        }

        tx.commit().await.context(QueryError)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn content_doc_paths(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT path FROM content_docs ORDER BY spine_index")
            .fetch_all(&self.pool)
            .await
            .context(QueryError)?;
        rows.iter().map(|r| r.try_get("path").context(QueryError)).collect()
    }
}

async fn fetch_segment_tx(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, id: &str) -> Result<Segment> {
    let row = sqlx::query(
        "SELECT id, content_doc_path, batch_index, original_html, translated_html, status, \
         retry_count, error FROM segments WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
    .context(QueryError)?
    .context(UnknownSegmentError { id: id.to_owned() })?;
    segment_from_row(&row)
}

async fn recompute_translated_count(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<()> {
    sqlx::query(
        "UPDATE project SET translated_segments = \
         (SELECT COUNT(*) FROM segments WHERE status = 'TRANSLATED')",
    )
    .execute(&mut **tx)
    .await
    .context(QueryError)?;

    let row = sqlx::query("SELECT total_segments, translated_segments FROM project")
        .fetch_optional(&mut **tx)
        .await
        .context(QueryError)?;
    if let Some(row) = row {
        let total: i64 = row.try_get("total_segments").context(QueryError)?;
        let translated: i64 = row.try_get("translated_segments").context(QueryError)?;
        if total > 0 && translated == total {
            sqlx::query("UPDATE project SET engine_state = 'COMPLETED'")
                .execute(&mut **tx)
                .await
                .context(QueryError)?;
        }
    }
    Ok(())
}

fn segment_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Segment> {
    let status_text: String = row.try_get("status").context(QueryError)?;
    Ok(Segment {
        id: row.try_get("id").context(QueryError)?,
        content_doc_path: row.try_get("content_doc_path").context(QueryError)?,
        batch_index: row.try_get("batch_index").context(QueryError)?,
        original_html: row.try_get("original_html").context(QueryError)?,
        translated_html: row.try_get("translated_html").context(QueryError)?,
        status: SegmentStatus::parse(&status_text).context(CorruptRowError)?,
        retry_count: row.try_get("retry_count").context(QueryError)?,
        error: row.try_get("error").context(QueryError)?,
    })
}

fn project_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Project> {
    let engine_state_text: String = row.try_get("engine_state").context(QueryError)?;
    let alignment_text: String = row.try_get("export_text_alignment").context(QueryError)?;
    let schema_version: i64 = row.try_get("schema_version").context(QueryError)?;
    Ok(Project {
        id: row.try_get("id").context(QueryError)?,
        original_title: row.try_get("original_title").context(QueryError)?,
        author: row.try_get("author").context(QueryError)?,
        translated_title: row.try_get("translated_title").context(QueryError)?,
        cover_bytes: row.try_get("cover_bytes").context(QueryError)?,
        archive_bytes: Some(row.try_get("archive_bytes").context(QueryError)?),
        total_segments: row.try_get("total_segments").context(QueryError)?,
        translated_segments: row.try_get("translated_segments").context(QueryError)?,
        schema_version: schema_version as i32,
        export_settings: ExportSettings {
            text_alignment: model::TextAlignment::parse(&alignment_text).context(CorruptRowError)?,
            force_alignment: row.try_get("export_force_alignment").context(QueryError)?,
        },
        engine_state: EngineState::parse(&engine_state_text).context(CorruptRowError)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtj_segment::CapturedBatch;

    fn batch(idx: i64, html: &str) -> CapturedBatch {
        CapturedBatch {
            batch_index: idx,
            original_html: html.to_owned(),
            node_paths: vec![vec![idx as usize]],
        }
    }

    async fn imported_store() -> Store {
        let store = Store::connect_in_memory().await.unwrap();
        store
            .import_project(
                NewProject {
                    id: "proj1".into(),
                    original_title: "A Title".into(),
                    author: Some("An Author".into()),
                    archive_bytes: vec![1, 2, 3],
                    cover_bytes: None,
                    schema_version: 2,
                },
                vec![NewContentDoc {
                    path: "OEBPS/ch1.xhtml".into(),
                    spine_index: 0,
                    batches: vec![batch(0, "<p>one</p>"), batch(1, "<p>two</p>")],
                }],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn import_then_stats() {
        let store = imported_store().await;
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.translated, 0);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn claim_completes_and_recomputes_translated_count() {
        let store = imported_store().await;
        let seg = store.claim_next().await.unwrap().unwrap();
        assert_eq!(seg.status.as_str(), "TRANSLATING");

        store.complete_segment(&seg.id, "<p>ONE</p>".into()).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.translated, 1);

        let project = store.get_project().await.unwrap().unwrap();
        assert_eq!(project.translated_segments, 1);
    }

    #[tokio::test]
    async fn quota_failure_reverts_to_pending_and_pauses() {
        let store = imported_store().await;
        let seg = store.claim_next().await.unwrap().unwrap();
        store.fail_segment(&seg.id, "quota exceeded", true, 3).await.unwrap();

        let segs = store.segments_for_document("OEBPS/ch1.xhtml").await.unwrap();
        let reverted = segs.iter().find(|s| s.id == seg.id).unwrap();
        assert_eq!(reverted.status.as_str(), "PENDING");
        assert_eq!(reverted.retry_count, 0);

        let project = store.get_project().await.unwrap().unwrap();
        assert_eq!(project.engine_state.as_str(), "QUOTA_PAUSED");
    }

    #[tokio::test]
    async fn retry_budget_skips_after_max_retries() {
        let store = imported_store().await;
        let seg = store.claim_next().await.unwrap().unwrap();
        for _ in 0..3 {
            store.fail_segment(&seg.id, "timeout", false, 3).await.unwrap();
        }
        let segs = store.all_segments().await.unwrap();
        let first = segs.iter().find(|s| s.id == seg.id).unwrap();
        assert_eq!(first.status.as_str(), "SKIPPED");
        assert_eq!(first.retry_count, 3);
    }

    #[tokio::test]
    async fn retry_skipped_resets_without_touching_translated_count() {
        let store = imported_store().await;
        let seg = store.claim_next().await.unwrap().unwrap();
        for _ in 0..3 {
            store.fail_segment(&seg.id, "timeout", false, 3).await.unwrap();
        }
        store.retry_skipped().await.unwrap();
        let segs = store.all_segments().await.unwrap();
        let first = segs.iter().find(|s| s.id == seg.id).unwrap();
        assert_eq!(first.status.as_str(), "PENDING");
        assert_eq!(first.retry_count, 0);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.translated, 0);
    }

    #[tokio::test]
    async fn claim_next_prefers_pending_over_failed() {
        let store = imported_store().await;
        let first = store.claim_next().await.unwrap().unwrap();
        store.fail_segment(&first.id, "timeout", false, 3).await.unwrap();

        let second = store.claim_next().await.unwrap().unwrap();
        assert_ne!(second.id, first.id);
    }
}
