//! Thin `clap` binary exercising the engine end to end (SPEC_FULL §0),
//! standing in for the out-of-scope UI (spec.md §1). Each invocation
//! opens the store at a given sqlite path, wires up a single `Engine`,
//! performs one operation, and exits; there is no retained in-process
//! state beyond a single command's lifetime, matching §9's "no
//! singletons, explicit engine handle" strategy at the boundary the UI
//! would otherwise occupy.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use mtj_engine::{Config, Engine};
use mtj_store::model::EngineState;
use mtj_store::Store;
use mtj_translate::{Error as TranslateError, GeminiTranslator, Translator, TranslatorConfig};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing_subscriber::prelude::*;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(context(suffix(Error)))]
enum Error {
    #[snafu(display("reading config file {path}: {source}"))]
    ReadConfigError { path: String, source: std::io::Error },
    #[snafu(display("parsing config file {path}: {source}"))]
    ParseConfigError { path: String, source: toml::de::Error },
    #[snafu(display("reading input {path}: {source}"))]
    ReadInputError { path: String, source: std::io::Error },
    #[snafu(display("writing output {path}: {source}"))]
    WriteOutputError { path: String, source: std::io::Error },
    #[snafu(display("the MTJ_API_KEY environment variable is not set; required to run translation"))]
    MissingApiKeyError,
    #[snafu(display("opening store: {source}"))]
    StoreOpenError { source: mtj_store::Error },
    #[snafu(display("engine operation failed: {source}"))]
    EngineError { source: mtj_engine::Error },
}

/// Translates an EPUB archive from its source language into a target
/// language by farming segments out to an LLM (spec.md §1), standing in
/// for the GUI the reference implementation ships.
#[derive(Parser, Debug)]
#[command(name = "mtj", version, about)]
struct Cli {
    /// Path to the sqlite database backing the project (§4.3 durable store).
    #[arg(long, global = true, default_value = "mtj.sqlite3")]
    db: String,

    /// Optional TOML file overriding §6 configuration defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Target language name for the fixed translation prompt (§4.4).
    #[arg(long, global = true, default_value = "Arabic")]
    target_language_name: String,

    /// Target language code written into exported markup (§4.5) and
    /// requested of the translator (§4.4).
    #[arg(long, global = true, default_value = "ar")]
    target_language_code: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import an EPUB archive: read it, segment every spine document, and
    /// load a fresh project (§4.3 importProject). Replaces any project
    /// already in the database.
    Import {
        /// Path to the source .epub file.
        archive: PathBuf,
    },
    /// Start translation with a bounded worker pool, and block until the
    /// engine reaches a terminal or paused state.
    Run,
    /// Resume a paused or quota-paused engine and block the same way.
    Resume,
    /// Pause the engine; in-flight translations still complete (§4.3).
    Pause,
    /// Reset every SKIPPED segment back to PENDING (§4.3 retrySkipped).
    RetrySkipped,
    /// Print (total, translated, failed) segment counts (§4.3 stats).
    Stats,
    /// Reassemble the project into a translated archive (§4.5).
    Export {
        /// Where to write the exported .epub.
        out: PathBuf,
    },
    /// Write a `.mtj` backup bundle of the current project (§6).
    Backup {
        /// Where to write the backup bundle.
        out: PathBuf,
    },
    /// Restore a `.mtj` backup bundle, replacing the current project (§6).
    Restore {
        /// Path to the backup bundle to load.
        bundle: PathBuf,
    },
}

/// Stands in wherever a command needs *an* `Arc<dyn Translator>` to
/// satisfy `Engine::new` but never actually drives the worker pool (every
/// subcommand but `Run`/`Resume`). Calling it is a logic error.
struct UnusedTranslator;

#[async_trait::async_trait]
impl Translator for UnusedTranslator {
    async fn translate(&self, _markup: &str) -> std::result::Result<String, TranslateError> {
        unreachable!("this subcommand never starts the worker pool")
    }
}

fn init_tracing(log_layer: mtj_engine::LogLayer) {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).with_level(true);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt_layer)
        .with(log_layer)
        .init();
}

/// Load `Config` from an optional TOML file (falling back to §6 defaults)
/// and apply environment-variable overrides on top, in the idiom of the
/// pack's own config loaders (cf. `evertedsphere-suzuri`'s
/// `Figment::new().merge(Toml::file(...))`, minus the extra dependency).
fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .context(ReadConfigError { path: path.display().to_string() })?;
            toml::from_str(&text).context(ParseConfigError { path: path.display().to_string() })?
        }
        None => Config::default(),
    };

    if let Ok(value) = std::env::var("MTJ_WORKER_CONCURRENCY") {
        if let Ok(parsed) = value.parse() {
            config.worker_concurrency = parsed;
        }
    }
    if let Ok(value) = std::env::var("MTJ_MAX_RETRIES") {
        if let Ok(parsed) = value.parse() {
            config.max_retries = parsed;
        }
    }
    if let Ok(value) = std::env::var("MTJ_TRANSLATE_TIMEOUT_MS") {
        if let Ok(parsed) = value.parse() {
            config.translate_timeout_ms = parsed;
        }
    }

    Ok(config)
}

fn build_translator(config: &Config, target_language_name: &str, target_language_code: &str) -> Result<Arc<dyn Translator>> {
    let api_key = std::env::var("MTJ_API_KEY").ok().context(MissingApiKeyError)?;
    let translator_config = TranslatorConfig {
        timeout_ms: config.translate_timeout_ms,
        target_language_name: target_language_name.to_owned(),
        target_language_code: target_language_code.to_owned(),
        ..TranslatorConfig::default()
    };
    Ok(Arc::new(GeminiTranslator::new(api_key, translator_config)))
}

/// Poll `subscribeToEngineState` until the engine leaves `TRANSLATING`,
/// printing stats on every observed transition (standing in for the
/// live-progress rendering that's out of scope, §1).
async fn run_until_settled(engine: &Engine) -> Result<()> {
    let mut state_rx = engine.subscribe_to_engine_state();
    loop {
        let state = *state_rx.borrow();
        let stats = engine.stats().await.context(EngineError)?;
        println!("state={} total={} translated={} failed={}", state.as_str(), stats.total, stats.translated, stats.failed);
        match state {
            EngineState::Translating | EngineState::Analyzing => {}
            _ => break,
        }
        if tokio::time::timeout(Duration::from_secs(1), state_rx.changed()).await.is_err() {
            continue;
        }
    }
    Ok(())
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    let translator: Arc<dyn Translator> = if matches!(cli.command, Command::Run | Command::Resume) {
        build_translator(&config, &cli.target_language_name, &cli.target_language_code)?
    } else {
        Arc::new(UnusedTranslator)
    };

    let store = Store::connect(&cli.db).await.context(StoreOpenError)?;
    let engine = Engine::new(store, translator, cli.target_language_code.clone(), config);
    init_tracing(engine.log_layer());

    match cli.command {
        Command::Import { archive } => {
            let bytes = std::fs::read(&archive).context(ReadInputError { path: archive.display().to_string() })?;
            engine.import_project(bytes).await.context(EngineError)?;
            let stats = engine.stats().await.context(EngineError)?;
            println!("imported {} segments across the spine", stats.total);
        }
        Command::Run => {
            engine.start().await.context(EngineError)?;
            run_until_settled(&engine).await?;
        }
        Command::Resume => {
            engine.resume().await.context(EngineError)?;
            run_until_settled(&engine).await?;
        }
        Command::Pause => engine.pause().await.context(EngineError)?,
        Command::RetrySkipped => engine.retry_skipped().await.context(EngineError)?,
        Command::Stats => {
            let stats = engine.stats().await.context(EngineError)?;
            println!("total={} translated={} failed={}", stats.total, stats.translated, stats.failed);
        }
        Command::Export { out } => {
            let archive_bytes = engine.export().await.context(EngineError)?;
            std::fs::write(&out, archive_bytes).context(WriteOutputError { path: out.display().to_string() })?;
            println!("exported to {}", out.display());
        }
        Command::Backup { out } => {
            let bundle = engine.backup().await.context(EngineError)?;
            std::fs::write(&out, bundle).context(WriteOutputError { path: out.display().to_string() })?;
            println!("backed up to {}", out.display());
        }
        Command::Restore { bundle } => {
            let bytes = std::fs::read(&bundle).context(ReadInputError { path: bundle.display().to_string() })?;
            engine.restore(&bytes).await.context(EngineError)?;
            println!("restored from {}", bundle.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_import_subcommand() {
        let cli = Cli::parse_from(["mtj", "--db", "test.sqlite3", "import", "book.epub"]);
        assert_eq!(cli.db, "test.sqlite3");
        assert!(matches!(cli.command, Command::Import { .. }));
    }

    #[test]
    fn cli_parses_run_subcommand_with_language_defaults() {
        let cli = Cli::parse_from(["mtj", "run"]);
        assert_eq!(cli.target_language_name, "Arabic");
        assert_eq!(cli.target_language_code, "ar");
        assert!(matches!(cli.command, Command::Run));
    }

    #[test]
    fn default_config_has_spec_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.worker_concurrency, 5);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn toml_config_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"worker_concurrency = 2\nmax_retries = 7\n").unwrap();
        let config = load_config(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.worker_concurrency, 2);
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.translate_timeout_ms, 600_000, "fields absent from the file keep their #[serde(default)]");
    }
}
