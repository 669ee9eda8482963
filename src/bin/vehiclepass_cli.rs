//! Vehicle Pass CLI
//!
//! Commands mirror the application views: apply, result, history, share.
//! Outputs JSON to stdout, logs to stderr.
//! Returns 2 on validation failure or unknown records, 1 on anything else.

use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use vehiclepass_core::{
    render::inspect,
    share::{self, DirectorySink, TextClipboard},
    AppConfig, AssetResolver, FileBackend, PermitLayout, PermitPipeline, PermitRenderer,
    PipelineError, PlateFont, RecordStore, StorageError, VisitorForm,
};

#[derive(Parser)]
#[command(name = "vehiclepass-cli")]
#[command(about = "Vehicle Pass CLI - visitor permit applications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding the record store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Prefix the background template is resolved against
    #[arg(long, global = true)]
    asset_base: Option<PathBuf>,

    /// Font file for the plate text
    #[arg(long, global = true)]
    font: Option<PathBuf>,

    /// Layout JSON overriding the built-in permit layout
    #[arg(long, global = true)]
    layout: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new application
    Apply {
        #[arg(long)]
        name: String,
        #[arg(long)]
        department: String,
        #[arg(long)]
        invitee: String,
        #[arg(long)]
        plate: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        visit_date: Option<String>,
        #[arg(long)]
        visit_time: Option<String>,
        #[arg(long)]
        purpose: Option<String>,
    },

    /// Generate (or reuse) the permit for an application and save it
    Result {
        id: String,
        /// Directory the permit is saved into
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
        /// File name; defaults to 车辆通行证_<plate>_<date>.png
        #[arg(short, long)]
        filename: Option<String>,
        /// Render again even if a cached permit exists
        #[arg(long)]
        regenerate: bool,
    },

    /// Save a half-size JPEG preview of the permit
    Preview {
        id: String,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List applications, newest first
    History {
        /// Filter by name, department, invitee or plate
        #[arg(short, long, default_value = "")]
        query: String,
    },

    /// Show a shared application and copy its permit
    Share { id: String },

    /// Delete an application and its permit
    Delete { id: String },

    /// Delete everything
    Clear {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },

    /// Application counts
    Stats,

    /// Write the whole store as JSON
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace the whole store from a JSON export
    Import { file: PathBuf },

    /// Dimensions and size of a cached permit
    Inspect { id: String },

    /// Store usage against the quota
    Usage,

    /// Remove applications older than a number of days
    Cleanup {
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(i64).range(0..))]
        days: i64,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,vehiclepass_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if let Some(dir) = cli.data_dir.clone() {
        config.data_dir = dir;
    }
    if let Some(base) = cli.asset_base.clone() {
        config.asset_base = base;
    }
    if let Some(font) = cli.font.clone() {
        config.font_path = Some(font);
    }
    if let Some(layout) = cli.layout.clone() {
        config.layout_path = Some(layout);
    }
    tracing::debug!(?config, "Loaded configuration");

    let mut pipeline = match build_pipeline(&config) {
        Ok(p) => p,
        Err(message) => {
            emit(&json!({ "success": false, "error": message }));
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, &mut pipeline, &config) {
        Ok(code) => code,
        Err(e) => {
            let code = match &e {
                PipelineError::Invalid(_) | PipelineError::NotFound(_) => ExitCode::from(2),
                PipelineError::Storage(StorageError::Validation(_)) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            };
            let mut output = json!({ "success": false, "error": e.to_string() });
            if let PipelineError::Invalid(errors) = &e {
                output["errors"] = json!(errors);
            }
            emit(&output);
            code
        }
    }
}

fn build_pipeline(config: &AppConfig) -> Result<PermitPipeline<FileBackend>, String> {
    let layout = match &config.layout_path {
        Some(path) => PermitLayout::load_from_file(path)
            .map_err(|e| format!("Failed to load layout {}: {}", path.display(), e))?,
        None => PermitLayout::default(),
    };

    let font = match &config.font_path {
        Some(path) => PlateFont::from_file(path).map_err(|e| e.to_string())?,
        None => PlateFont::Builtin,
    };

    let backend = FileBackend::open(&config.data_dir, config.quota_bytes)
        .map_err(|e| format!("Failed to open store: {e}"))?;

    let template = AssetResolver::new(&config.asset_base).template(&config.template_image);
    let renderer = PermitRenderer::new(layout, Arc::new(template), font);

    Ok(PermitPipeline::new(RecordStore::new(backend), renderer))
}

fn run(
    command: Commands,
    pipeline: &mut PermitPipeline<FileBackend>,
    config: &AppConfig,
) -> Result<ExitCode, PipelineError> {
    match command {
        Commands::Apply { name, department, invitee, plate, phone, visit_date, visit_time, purpose } => {
            let form = VisitorForm {
                phone,
                visit_date,
                visit_time,
                purpose,
                ..VisitorForm::new(name, department, invitee, plate)
            };
            let record = pipeline.submit(form)?;
            emit(&json!({
                "success": true,
                "record": record,
                "resultUrl": share::result_link(&config.share_base_url, &record.id),
            }));
        }

        Commands::Result { id, out, filename, regenerate } => {
            if regenerate {
                pipeline.regenerate(&id)?;
            }
            let mut sink = DirectorySink::new(out);
            let path = pipeline.download(&id, &mut sink, filename.as_deref())?;
            let image = pipeline.permit_image(&id)?;
            emit(&json!({
                "success": true,
                "path": path,
                "image": inspect(&image)?,
            }));
        }

        Commands::Preview { id, output } => {
            let url = pipeline.preview(&id)?;
            let blob = share::to_blob_bytes(&url)?;
            fs::write(&output, &blob.bytes).map_err(StorageError::Io)?;
            emit(&json!({
                "success": true,
                "path": output,
                "image": inspect(&url)?,
            }));
        }

        Commands::History { query } => {
            let records = pipeline.store().search(&query);
            emit(&json!({ "success": true, "count": records.len(), "records": records }));
        }

        Commands::Share { id } => {
            let record = pipeline.record(&id)?;
            let mut clipboard = TextClipboard::default();
            let outcome = pipeline.share(&id, &mut clipboard, &config.share_base_url)?;
            emit(&json!({
                "success": true,
                "record": record,
                "outcome": outcome,
                "shareUrl": share::share_link(&config.share_base_url, &id),
            }));
        }

        Commands::Delete { id } => {
            pipeline.delete(&id)?;
            emit(&json!({ "success": true, "deleted": id }));
        }

        Commands::Clear { yes } => {
            if !yes {
                emit(&json!({ "success": false, "error": "Refusing to clear without --yes" }));
                return Ok(ExitCode::FAILURE);
            }
            let cleared = pipeline.store_mut().clear();
            emit(&json!({ "success": cleared }));
            if !cleared {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Stats => {
            emit(&json!({ "success": true, "stats": pipeline.store().stats() }));
        }

        Commands::Export { output } => {
            let text = pipeline.store().export_snapshot();
            match output {
                Some(path) => {
                    fs::write(&path, &text).map_err(StorageError::Io)?;
                    emit(&json!({ "success": true, "path": path }));
                }
                None => println!("{text}"),
            }
        }

        Commands::Import { file } => {
            let text = fs::read_to_string(&file).map_err(StorageError::Io)?;
            let count = pipeline.store_mut().import_snapshot(&text)?;
            emit(&json!({ "success": true, "imported": count }));
        }

        Commands::Inspect { id } => {
            pipeline.record(&id)?;
            match pipeline.store().get_image(&id) {
                Some(image) => emit(&json!({ "success": true, "image": inspect(&image)? })),
                None => {
                    emit(&json!({ "success": false, "error": "No permit generated yet" }));
                    return Ok(ExitCode::from(2));
                }
            }
        }

        Commands::Usage => {
            emit(&json!({ "success": true, "usage": pipeline.store().storage_usage() }));
        }

        Commands::Cleanup { days } => {
            let removed = pipeline.store_mut().cleanup_expired(days);
            emit(&json!({ "success": true, "removed": removed }));
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn emit(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}
