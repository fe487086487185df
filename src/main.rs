use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use masterbot::config::{load_config, AppConfig};
use masterbot::imaging::crop::{crop_for_export, crop_history_export, history_original_file_name};
use masterbot::imaging::media::mime_for_extension;
use masterbot::imaging::{AspectRatio, ExportedImage, ImageRecord};
use masterbot::service::{GeminiClient, PollSettings};
use masterbot::state::app::{Action, AppState};
use masterbot::state::data::HistoryKind;
use masterbot::state::history::HistoryLedger;
use masterbot::state::library::Library;
use masterbot::Studio;

type CliStudio = Studio<GeminiClient, GeminiClient, Library>;

/// A failure the renderer has already shown to the user
#[derive(Debug)]
struct Reported;

impl fmt::Display for Reported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("request failed")
    }
}

impl std::error::Error for Reported {}

#[derive(Parser, Debug)]
#[command(name = "masterbot", version, about = "Fashion imagery studio: try-on, generated models, edits and videos")]
struct Cli {
    /// Extra config file layered over ./masterbot.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Where results are written
    #[arg(short, long, default_value = ".", global = true)]
    out: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Place a garment onto your own photo
    TryOn {
        #[arg(long)]
        person: PathBuf,
        #[arg(long)]
        garment: PathBuf,
    },
    /// Generate a model wearing up to five garment photos
    Model {
        #[arg(long = "garment", required = true)]
        garments: Vec<PathBuf>,
        #[arg(long)]
        prompt: String,
    },
    /// Apply prompt edits to an image or a saved model
    Edit {
        #[command(flatten)]
        source: Source,
        /// Applied in order
        #[arg(long = "prompt", required = true)]
        prompts: Vec<String>,
        /// Steps to undo after the edits
        #[arg(long, default_value_t = 0)]
        undo: usize,
    },
    /// Animate an image into a short video
    Video {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        prompt: String,
    },
    /// Inspect the creation history
    History {
        #[command(subcommand)]
        action: HistoryCommand,
    },
    /// Crop an image or history entry for download
    Export {
        #[command(flatten)]
        source: Source,
        /// Target ratio such as 9:16, 4:5 or 1:1
        #[arg(long, default_value = "9:16", conflicts_with = "original")]
        aspect: AspectRatio,
        /// Save the image as generated
        #[arg(long)]
        original: bool,
    },
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
struct Source {
    /// Image file
    #[arg(long)]
    image: Option<PathBuf>,
    /// History entry id
    #[arg(long)]
    entry: Option<String>,
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    List {
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },
    /// Print an entry and save its image
    Show { id: String },
    Delete { id: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    TryOn,
    AiModel,
}

impl From<KindArg> for HistoryKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::TryOn => HistoryKind::SingleSubjectComposite,
            KindArg::AiModel => HistoryKind::GeneratedModel,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "masterbot=debug" } else { "masterbot=info" };
    let filter = if verbose {
        EnvFilter::new(default)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if !err.is::<Reported>() {
                eprintln!("❌ {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_deref()).context("loading configuration")?;
    if let Some(key) = cli.api_key {
        config.api.api_key = Some(key);
    }

    let library = Library::open(&config.storage.db_path()?, config.storage.capacity_bytes)
        .context("opening the history library")?;
    let ledger = HistoryLedger::load(library);
    tokio::fs::create_dir_all(&cli.out).await?;

    match cli.command {
        Command::History { action } => history(ledger, action, &cli.out).await,
        Command::Export {
            source,
            aspect,
            original,
        } => {
            let exported = export(&ledger, source, aspect, original).await?;
            save(&cli.out, &exported.file_name, &exported.bytes).await
        }
        command => {
            let mut studio = build_studio(&config, ledger)?;
            let result = generate(&mut studio, command, &cli.out).await;
            match result {
                Err(err) if studio.state().error.is_some() => {
                    tracing::debug!("{err:?}");
                    Err(Reported.into())
                }
                other => other,
            }
        }
    }
}

fn build_studio(config: &AppConfig, ledger: HistoryLedger<Library>) -> anyhow::Result<CliStudio> {
    let client = GeminiClient::from_config(&config.api)
        .context("an API key is required (set GEMINI_API_KEY or api.api_key)")?;
    let settings = PollSettings::from(&config.video);
    let mut studio = Studio::new(client.clone(), client, ledger, settings);
    studio.set_renderer(render());
    Ok(studio)
}

/// Print loading and error transitions as they happen
fn render() -> impl FnMut(&AppState) + Send + 'static {
    let mut last_message = String::new();
    let mut last_error: Option<String> = None;
    move |state: &AppState| {
        if state.is_loading && state.loading_message != last_message {
            println!("⏳ {}", state.loading_message);
            last_message = state.loading_message.clone();
        }
        if state.error != last_error {
            if let Some(error) = &state.error {
                eprintln!("⚠️  {error}");
            }
            last_error = state.error.clone();
        }
    }
}

async fn generate(studio: &mut CliStudio, command: Command, out: &Path) -> anyhow::Result<()> {
    match command {
        Command::TryOn { person, garment } => {
            let (bytes, mime) = read_image(&person).await?;
            studio.load_user_image(bytes, mime).await?;
            let (bytes, mime) = read_image(&garment).await?;
            studio.load_garment_image(bytes, mime).await?;

            let result = studio.generate_try_on().await?;
            let id = studio.ledger().entries().first().map(|e| e.id.clone()).unwrap_or_default();
            save_data_uri(out, &format!("masterbot-try-on-{id}.png"), &result).await?;
        }
        Command::Model { garments, prompt } => {
            let mut files = Vec::with_capacity(garments.len());
            for path in &garments {
                files.push(read_image(path).await?);
            }
            studio.add_garment_images(files).await?;
            studio.dispatch(Action::SetPrompt(prompt));

            let result = studio.generate_model().await?;
            let id = studio.state().current_history_id.clone().unwrap_or_default();
            save_data_uri(out, &format!("masterbot-model-{id}.png"), &result).await?;
            println!("📝 saved to history as {id}");
        }
        Command::Edit { source, prompts, undo } => {
            open_source(studio, source).await?;
            studio.open_editor()?;
            for prompt in prompts {
                studio.dispatch(Action::SetEditPrompt(prompt));
                studio.edit_image().await?;
            }
            for _ in 0..undo {
                studio.undo();
            }

            let Some(result) = studio.state().result_image.clone() else {
                bail!("no image to save");
            };
            save_data_uri(out, "masterbot-edited.png", &result).await?;
        }
        Command::Video { source, prompt } => {
            open_source(studio, source).await?;
            studio.dispatch(Action::SetVideoPrompt(prompt));
            studio.generate_video().await?;

            if let Some(video) = &studio.state().result_video {
                let ext = video.mime_type.rsplit('/').next().unwrap_or("mp4");
                save(out, &format!("masterbot-video.{ext}"), &video.bytes).await?;
            }
        }
        Command::History { .. } | Command::Export { .. } => bail!("command does not use the studio"),
    }
    Ok(())
}

/// Make `source` the current result
async fn open_source(studio: &mut CliStudio, source: Source) -> anyhow::Result<()> {
    match (source.image, source.entry) {
        (_, Some(id)) => studio.open_history_entry(&id)?,
        (Some(path), None) => {
            let (bytes, mime) = read_image(&path).await?;
            let record = ImageRecord::from_bytes(&bytes, mime.unwrap_or_else(|| "image/png".into()));
            studio.dispatch(Action::ResultReady {
                image: record.to_data_uri(),
                history_id: None,
            });
        }
        (None, None) => bail!("either --image or --entry is required"),
    }
    Ok(())
}

async fn export(
    ledger: &HistoryLedger<Library>,
    source: Source,
    aspect: AspectRatio,
    original: bool,
) -> anyhow::Result<ExportedImage> {
    let (record, base, entry_id) = match (source.image, source.entry) {
        (_, Some(id)) => {
            let entry = ledger.get(&id).with_context(|| format!("no history entry with id {id}"))?;
            (ImageRecord::from_data_uri(&entry.result_image)?, "masterbot".to_string(), Some(entry.id.clone()))
        }
        (Some(path), None) => {
            let (bytes, mime) = read_image(&path).await?;
            let base = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "masterbot".into());
            (ImageRecord::from_bytes(&bytes, mime.unwrap_or_else(|| "image/png".into())), base, None)
        }
        (None, None) => bail!("either --image or --entry is required"),
    };

    let exported = match (original, entry_id) {
        (true, Some(id)) => ExportedImage {
            file_name: history_original_file_name(&id),
            bytes: record.bytes()?,
        },
        (true, None) => ExportedImage {
            file_name: format!("{base}-original.png"),
            bytes: record.bytes()?,
        },
        (false, Some(id)) => crop_history_export(&record, aspect, &id)?,
        (false, None) => crop_for_export(&record, aspect, &base)?,
    };
    Ok(exported)
}

async fn history(mut ledger: HistoryLedger<Library>, action: HistoryCommand, out: &Path) -> anyhow::Result<()> {
    match action {
        HistoryCommand::List { kind } => {
            let entries: Vec<_> = match kind {
                Some(kind) => ledger.entries_of(kind.into()).collect(),
                None => ledger.entries().iter().collect(),
            };
            if entries.is_empty() {
                println!("No creations yet.");
            }
            for entry in entries {
                println!(
                    "{}  {:8}  {}  {}",
                    entry.id,
                    entry.kind.label(),
                    format_timestamp(entry.created_at_epoch_ms),
                    entry.prompt_text.as_deref().unwrap_or("")
                );
            }
        }
        HistoryCommand::Show { id } => {
            let entry = ledger.get(&id).with_context(|| format!("no history entry with id {id}"))?.clone();
            println!("id:       {}", entry.id);
            println!("kind:     {}", entry.kind.label());
            println!("created:  {}", format_timestamp(entry.created_at_epoch_ms));
            if let Some(prompt) = &entry.prompt_text {
                println!("prompt:   {prompt}");
            }
            if let Some(sources) = &entry.source_images {
                println!("garments: {}", sources.len());
            }
            save_data_uri(out, &format!("masterbot-{}.png", entry.id), &entry.result_image).await?;
        }
        HistoryCommand::Delete { id } => {
            if ledger.get(&id).is_none() {
                bail!("no history entry with id {id}");
            }
            ledger.remove(&id);
            println!("🗑️  deleted {id}");
        }
    }
    Ok(())
}

fn format_timestamp(epoch_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(epoch_ms)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| epoch_ms.to_string())
}

async fn read_image(path: &Path) -> anyhow::Result<(Vec<u8>, Option<String>)> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let mime = path
        .extension()
        .and_then(|ext| mime_for_extension(&ext.to_string_lossy()))
        .map(str::to_string);
    Ok((bytes, mime))
}

async fn save_data_uri(dir: &Path, name: &str, uri: &str) -> anyhow::Result<()> {
    let bytes = ImageRecord::from_data_uri(uri)?.bytes()?;
    save(dir, name, &bytes).await
}

async fn save(dir: &Path, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
    let path = dir.join(name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    println!("✅ saved {}", path.display());
    Ok(())
}
