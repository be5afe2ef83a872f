//! The scheduler, worker pool and engine state machine (§4.3) sitting on
//! top of [`mtj_store`], plus the UI-facing subscriptions (§6 "Engine to
//! UI") and the operations that drive import, translation, and export.
//!
//! The store is the one source of truth (§5, §9 "global state strategy"):
//! there is no in-process mirror of segment state that could drift from
//! it. Each worker re-reads `store.get_project().engine_state` at the top
//! of every loop iteration rather than watching an in-process flag, so
//! pause/resume/quota-pause are observed directly off the database a
//! worker might otherwise have stale information about.

pub mod config;
pub mod logs;

use std::sync::Arc;

use mtj_segment::classify::SchemaVersion;
use mtj_store::model::{EngineState, NewContentDoc, NewProject, Segment, SegmentStatus, Stats};
use mtj_store::Store;
use mtj_translate::Translator;
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::sync::watch;
use tracing::instrument;

pub use config::Config;
pub use logs::{LogBuffer, LogLayer, LogLevel, LogRecord};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Error)))]
pub enum Error {
    #[snafu(display("reading source archive: {source}"))]
    ImportError { source: mtj_epub::Error },
    #[snafu(display("content document {path} is not valid utf-8"))]
    ContentDocUtf8Error { path: String },
    #[snafu(display("segmenting content document: {source}"))]
    SegmentError { source: mtj_segment::SegmentError },
    #[snafu(display("store operation failed: {source}"))]
    StoreError { source: mtj_store::Error },
    #[snafu(display("reassembling export archive: {source}"))]
    ReassembleError { source: mtj_reassemble::Error },
    #[snafu(display("no project has been imported yet"))]
    NoProjectError,
    #[snafu(display("project has no source archive recorded"))]
    MissingArchiveError,
}

struct EngineInner {
    store: Store,
    translator: Arc<dyn Translator>,
    target_language_code: String,
    config: Config,
    logs: LogBuffer,
    segments_tx: watch::Sender<Vec<Segment>>,
    stats_tx: watch::Sender<Stats>,
    state_tx: watch::Sender<EngineState>,
    logs_tx: watch::Sender<Vec<LogRecord>>,
}

/// A cheaply cloneable handle onto the running engine (§9 "global state
/// strategy: explicit engine handle, not singletons"). Every clone shares
/// the same store connection, worker pool triggers, and subscription
/// channels.
#[derive(Clone)]
pub struct Engine(Arc<EngineInner>);

impl Engine {
    pub fn new(store: Store, translator: Arc<dyn Translator>, target_language_code: String, config: Config) -> Self {
        let (segments_tx, _) = watch::channel(Vec::new());
        let (stats_tx, _) = watch::channel(Stats::default());
        let (state_tx, _) = watch::channel(EngineState::Idle);
        let (logs_tx, _) = watch::channel(Vec::new());
        Engine(Arc::new(EngineInner {
            store,
            translator,
            target_language_code,
            config,
            logs: LogBuffer::new(),
            segments_tx,
            stats_tx,
            state_tx,
            logs_tx,
        }))
    }

    /// A `tracing::Layer` feeding this engine's log buffer and
    /// `subscribeToLogs` channel. Installed by `mtj_cli` alongside its own
    /// `tracing_subscriber::fmt` layer, not as a second logging path.
    pub fn log_layer(&self) -> LogLayer {
        LogLayer::new(self.0.logs.clone())
    }

    pub fn subscribe_to_segments(&self) -> watch::Receiver<Vec<Segment>> {
        self.0.segments_tx.subscribe()
    }

    pub fn subscribe_to_project_stats(&self) -> watch::Receiver<Stats> {
        self.0.stats_tx.subscribe()
    }

    pub fn subscribe_to_engine_state(&self) -> watch::Receiver<EngineState> {
        self.0.state_tx.subscribe()
    }

    pub fn subscribe_to_logs(&self) -> watch::Receiver<Vec<LogRecord>> {
        self.0.logs_tx.subscribe()
    }

    /// Read the archive, segment every content document with the current
    /// schema version, and load the whole project fresh (§4.1, §4.2,
    /// §4.3 "importProject"). Failure leaves the engine in `ERROR` rather
    /// than whatever state it found itself in (§10 supplemented feature).
    #[instrument(skip_all)]
    pub async fn import_project(&self, archive_bytes: Vec<u8>) -> Result<()> {
        self.0.store.update_engine_state(EngineState::Analyzing).await.context(StoreError)?;
        self.publish_snapshot().await;

        match self.do_import(archive_bytes).await {
            Ok(()) => {
                self.publish_snapshot().await;
                Ok(())
            }
            Err(err) => {
                let _ = self.0.store.update_engine_state(EngineState::Error).await;
                self.publish_snapshot().await;
                Err(err)
            }
        }
    }

    async fn do_import(&self, archive_bytes: Vec<u8>) -> Result<()> {
        let read = mtj_epub::read_epub(&archive_bytes).context(ImportError)?;
        let schema_version = mtj_epub::CURRENT_SCHEMA_VERSION;
        let schema = SchemaVersion::from_i32(schema_version);

        let mut docs = Vec::with_capacity(read.spine.len());
        for (idx, doc_ref) in read.spine.iter().enumerate() {
            let bytes = mtj_epub::read_archive_entry(&archive_bytes, &doc_ref.path).context(ImportError)?;
            let xml = String::from_utf8(bytes)
                .map_err(|_| Error::ContentDocUtf8Error { path: doc_ref.path.clone() })?;
            let batches = mtj_segment::segment_document(&xml, schema, self.0.config.batch_char_limit).context(SegmentError)?;
            docs.push(NewContentDoc { path: doc_ref.path.clone(), spine_index: idx as i32, batches });
        }

        let new_project = NewProject {
            id: uuid::Uuid::new_v4().to_string(),
            original_title: read.metadata.title,
            author: read.metadata.author,
            archive_bytes,
            cover_bytes: read.metadata.cover_bytes,
            schema_version,
        };

        self.0.store.import_project(new_project, docs).await.context(StoreError)?;
        self.0.store.update_engine_state(EngineState::Idle).await.context(StoreError)?;
        Ok(())
    }

    /// Move the engine to `TRANSLATING` and spawn a fresh worker pool.
    /// Used both for the first `start` and for `resume` after a pause or
    /// quota pause. Workers that exited when the engine left
    /// `TRANSLATING` are simply replaced, rather than tracked and resumed
    /// individually (§4.3 "worker exits only when it next checks state").
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        self.transition_to_translating().await
    }

    #[instrument(skip(self))]
    pub async fn resume(&self) -> Result<()> {
        self.transition_to_translating().await
    }

    async fn transition_to_translating(&self) -> Result<()> {
        self.0.store.update_engine_state(EngineState::Translating).await.context(StoreError)?;
        self.publish_snapshot().await;
        self.spawn_workers();
        Ok(())
    }

    /// Set `PAUSED`. In-flight translate calls are not cancelled; each
    /// worker finishes its current segment, then exits the next time it
    /// checks engine state (§4.3, §5 "suspension points").
    #[instrument(skip(self))]
    pub async fn pause(&self) -> Result<()> {
        self.0.store.update_engine_state(EngineState::Paused).await.context(StoreError)?;
        self.publish_snapshot().await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn retry_skipped(&self) -> Result<()> {
        self.0.store.retry_skipped().await.context(StoreError)?;
        self.publish_snapshot().await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stats(&self) -> Result<Stats> {
        self.0.store.stats().await.context(StoreError)
    }

    /// Build a `.mtj` backup bundle of the current project and segment
    /// state (§6 "Backup bundle").
    #[instrument(skip(self))]
    pub async fn backup(&self) -> Result<Vec<u8>> {
        let now_epoch_ms = chrono::Utc::now().timestamp_millis();
        mtj_store::backup::backup(&self.0.store, now_epoch_ms).await.context(StoreError)
    }

    /// Load a `.mtj` bundle, replacing the current project entirely.
    #[instrument(skip(self, bundle_bytes))]
    pub async fn restore(&self, bundle_bytes: &[u8]) -> Result<()> {
        mtj_store::backup::restore(&self.0.store, bundle_bytes).await.context(StoreError)?;
        self.publish_snapshot().await;
        Ok(())
    }

    /// Reassemble the current project into a fresh exportable archive
    /// (§4.5, §6 "Exported archive"). A segment's markup is spliced in
    /// only when it has actually been translated; anything else is left
    /// as-is by the reassembler.
    #[instrument(skip(self))]
    pub async fn export(&self) -> Result<Vec<u8>> {
        let project = self.0.store.get_project().await.context(StoreError)?.context(NoProjectError)?;
        let segments = self.0.store.all_segments().await.context(StoreError)?;
        let archive_bytes = project.archive_bytes.clone().context(MissingArchiveError)?;

        let inputs = segments
            .into_iter()
            .map(|segment| mtj_reassemble::SegmentInput {
                content_doc_path: segment.content_doc_path,
                batch_index: segment.batch_index,
                translated_html: (segment.status == SegmentStatus::Translated).then_some(segment.translated_html),
            })
            .collect();

        let request = mtj_reassemble::ReassembleRequest {
            archive_bytes,
            schema_version: project.schema_version,
            segments: inputs,
            replacement_cover_bytes: project.cover_bytes,
            target_language_code: self.0.target_language_code.clone(),
            translated_title: project.translated_title,
            export_settings: map_export_settings(project.export_settings),
            batch_char_limit: self.0.config.batch_char_limit,
        };

        mtj_reassemble::reassemble(request).context(ReassembleError)
    }

    fn spawn_workers(&self) {
        for worker_id in 0..self.0.config.worker_concurrency {
            let engine = self.clone();
            tokio::spawn(async move { worker_loop(engine, worker_id).await });
        }
    }

    async fn publish_snapshot(&self) {
        if let Ok(segments) = self.0.store.all_segments().await {
            let _ = self.0.segments_tx.send(segments);
        }
        if let Ok(stats) = self.0.store.stats().await {
            let _ = self.0.stats_tx.send(stats);
        }
        if let Ok(Some(project)) = self.0.store.get_project().await {
            let _ = self.0.state_tx.send(project.engine_state);
        }
        let _ = self.0.logs_tx.send(self.0.logs.snapshot());
    }
}

fn map_export_settings(settings: mtj_store::model::ExportSettings) -> mtj_reassemble::ExportSettings {
    use mtj_store::model::TextAlignment as S;
    use mtj_reassemble::TextAlignment as R;
    let text_alignment = match settings.text_alignment {
        S::Left => R::Left,
        S::Center => R::Center,
        S::Right => R::Right,
        S::Justify => R::Justify,
    };
    mtj_reassemble::ExportSettings { text_alignment, force_alignment: settings.force_alignment }
}

/// One worker's claim/translate/complete-or-fail loop. Exits as soon as
/// the project's engine state is no longer `TRANSLATING` or there is
/// nothing left to claim, never by an in-process cancellation signal
/// (§4.3, §5).
async fn worker_loop(engine: Engine, worker_id: usize) {
    loop {
        let project = match engine.0.store.get_project().await {
            Ok(Some(project)) => project,
            Ok(None) => break,
            Err(err) => {
                tracing::error!(worker_id, %err, "could not read project state, worker exiting");
                break;
            }
        };
        if project.engine_state != EngineState::Translating {
            tracing::info!(worker_id, state = project.engine_state.as_str(), "engine state is no longer TRANSLATING, worker exiting");
            break;
        }

        let segment = match engine.0.store.claim_next().await {
            Ok(Some(segment)) => segment,
            Ok(None) => {
                tracing::info!(worker_id, "no claimable segment, worker exiting");
                if let Err(err) = engine.0.store.complete_if_drained().await {
                    tracing::error!(worker_id, %err, "failed to check for drained completion");
                }
                break;
            }
            Err(err) => {
                tracing::error!(worker_id, %err, "failed to claim next segment, worker exiting");
                break;
            }
        };

        match engine.0.translator.translate(&segment.original_html).await {
            Ok(translated_html) => {
                if let Err(err) = engine.0.store.complete_segment(&segment.id, translated_html).await {
                    tracing::error!(worker_id, segment_id = %segment.id, %err, "failed to record completed segment");
                } else {
                    tracing::info!(success = true, worker_id, segment_id = %segment.id, "segment translated");
                }
            }
            Err(err) => {
                let is_quota = err.is_quota();
                tracing::warn!(worker_id, segment_id = %segment.id, %err, "segment translation failed");
                if let Err(store_err) =
                    engine.0.store.fail_segment(&segment.id, &err.to_string(), is_quota, engine.0.config.max_retries).await
                {
                    tracing::error!(worker_id, segment_id = %segment.id, %store_err, "failed to record failed segment");
                }
            }
        }

        engine.publish_snapshot().await;
    }
    engine.publish_snapshot().await;
}
