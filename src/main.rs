//! # Annotation Desk CLI (`anno`)
//!
//! The `anno` binary creates annotation tasks from JSONL datasets, records
//! results one record at a time, reports progress, exports results and
//! starts the local HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! anno --config ./config/anno.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `anno init` | Create the database, schema, directory layout and default annotator |
//! | `anno reset --yes` | Back up and recreate the database |
//! | `anno tasks` | Task counts and per-task progress |
//! | `anno validate <file>` | Parse a dataset and check its file references |
//! | `anno create <file> ...` | Configure and persist a task |
//! | `anno show <task> <index>` | Render one record with its current annotation |
//! | `anno annotate <task> <index> <value>` | Save a result for one record |
//! | `anno progress <task>` | Completion of one task |
//! | `anno export <task>` | Write results to `test_data/reports/` |
//! | `anno status <task> <status>` | Override a task's lifecycle status |
//! | `anno delete <task> --yes` | Remove a task, its annotations and its dataset copy |
//! | `anno serve` | Start the local HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! anno init
//! anno create qa.jsonl --fields question:text,query:code:sql \
//!     --annotation single_choice --options True,False --name "qa review"
//! anno show <task-id> 0
//! anno annotate <task-id> 0 True
//! anno export <task-id> --format csv
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use annotation_desk::config::{self, Config};
use annotation_desk::export::{self, ExportFormat, ExportOptions};
use annotation_desk::jsonl;
use annotation_desk::layout::Layout;
use annotation_desk::migrate;
use annotation_desk::models::{
    AnnotationConfig, AnnotationKind, FieldConfig, FieldType, TaskStatus,
};
use annotation_desk::server;
use annotation_desk::stats;
use annotation_desk::store::Store;
use annotation_desk::workflow::{self, Session};

/// Annotation Desk: annotate JSONL datasets record by record.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with at least a `[db] path`.
#[derive(Parser)]
#[command(
    name = "anno",
    about = "Annotation Desk: a local-first data annotation tool",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/anno.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and working directories.
    ///
    /// Idempotent: running it again changes nothing.
    Init,

    /// Back up the database file and recreate an empty one.
    Reset {
        /// Confirm destroying all tasks and annotations.
        #[arg(long)]
        yes: bool,
    },

    /// List tasks with status and progress.
    Tasks,

    /// Parse a JSONL dataset and report missing or invalid file references.
    Validate {
        file: PathBuf,

        /// Directory image and PDF paths are resolved against.
        #[arg(long, default_value = "")]
        base_path: String,
    },

    /// Create an annotation task from a JSONL dataset.
    Create {
        file: PathBuf,

        /// Displayed fields as `name:type[:language]`, comma separated.
        /// Types: text, image, code, pdf, markdown. Defaults to every field as text.
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        /// single_choice, multiple_choice, rating or text_input.
        #[arg(long)]
        annotation: String,

        /// Options for choice annotations, comma separated.
        #[arg(long, value_delimiter = ',')]
        options: Vec<String>,

        #[arg(long, default_value_t = 1)]
        min: i64,

        #[arg(long, default_value_t = 10)]
        max: i64,

        #[arg(long, default_value = "Enter annotation")]
        placeholder: String,

        #[arg(long, default_value = "")]
        instruction: String,

        /// Defaults to `annotation_task_<timestamp>`.
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value = "")]
        base_path: String,
    },

    /// Render one record with its annotation control.
    Show { task: String, index: u64 },

    /// Save a result for one record. Multiple choices are comma separated.
    Annotate {
        task: String,
        index: u64,
        value: String,
    },

    /// Show completion of one task.
    Progress { task: String },

    /// Export a task's results.
    Export {
        task: String,

        /// json, jsonl or csv.
        #[arg(long, default_value = "json")]
        format: String,

        /// Leave the dataset fields out of each row.
        #[arg(long)]
        no_original: bool,

        /// Only rows that have a result.
        #[arg(long)]
        only_completed: bool,

        /// Write here instead of `test_data/reports/`.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Override a task's status: created, in_progress or completed.
    Status { task: String, status: String },

    /// Remove a task with all of its annotations.
    Delete {
        task: String,

        /// Confirm deleting the task's annotations.
        #[arg(long)]
        yes: bool,
    },

    /// Start the local HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("annotation_desk=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Validate { file, base_path } = &cli.command {
        return run_validate(file, base_path);
    }

    let cfg = config::load_config(&cli.config)?;
    let layout = Layout::new(&cfg.workspace.root);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            layout.ensure()?;
            let store = Store::open(&cfg).await?;
            store
                .ensure_user(&cfg.annotator.id, &cfg.annotator.role)
                .await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("reset deletes every task and annotation; pass --yes to confirm");
            }
            match migrate::reset_database(&cfg).await? {
                Some(backup) => println!("Database reset. Backup written to {}", backup.display()),
                None => println!("Database reset."),
            }
        }
        Commands::Tasks => {
            stats::run_tasks(&cfg).await?;
        }
        Commands::Validate { file, base_path } => {
            run_validate(&file, &base_path)?;
        }
        Commands::Create {
            file,
            fields,
            annotation,
            options,
            min,
            max,
            placeholder,
            instruction,
            name,
            description,
            base_path,
        } => {
            let annotation_config =
                parse_annotation(&annotation, options, min, max, placeholder, instruction)?;
            let field_specs = parse_field_specs(&fields)?;
            let name = name.unwrap_or_else(workflow::default_task_name);
            run_create(
                &cfg,
                &layout,
                &file,
                field_specs,
                annotation_config,
                &base_path,
                &name,
                &description,
            )
            .await?;
        }
        Commands::Show { task, index } => {
            let store = Store::open(&cfg).await?;
            let mut session = Session::new();
            session.open_task(&store, &task).await?;
            session.jump(index)?;
            let view = session.current_view(&store).await?;

            println!("{}: record {} of {}", view.task_name, view.index + 1, view.total);
            if !view.instruction.is_empty() {
                println!("Instruction: {}", view.instruction);
            }
            println!();
            for field in &view.fields {
                println!("{}", field);
                println!();
            }
            match view.control.current() {
                Some(result) if view.annotated => println!("Annotation: {}", result),
                _ => println!("Annotation: (none)"),
            }
            println!("Progress:   {}", view.progress);
            store.close().await;
        }
        Commands::Annotate { task, index, value } => {
            let store = Store::open(&cfg).await?;
            let mut session = Session::new();
            session.open_task(&store, &task).await?;
            session.jump(index)?;

            let kind = store
                .require_task(&task)
                .await?
                .config
                .annotation_config
                .kind();
            let submitted = match kind {
                AnnotationKind::MultipleChoice => Value::Array(
                    value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(|s| Value::String(s.to_string()))
                        .collect(),
                ),
                _ => Value::String(value),
            };
            let saved = session.submit(&store, &submitted).await?;
            let progress = store.get_task_progress(&task).await?;
            println!("Saved record {}: {}", index, saved);
            println!("Progress: {}", progress);
            store.close().await;
        }
        Commands::Progress { task } => {
            let store = Store::open(&cfg).await?;
            let t = store.require_task(&task).await?;
            let progress = store.get_task_progress(&task).await?;
            println!("{} [{}]", t.name, t.status);
            println!("Progress: {}", progress);
            store.close().await;
        }
        Commands::Export {
            task,
            format,
            no_original,
            only_completed,
            output,
        } => {
            let options = ExportOptions {
                format: format.parse::<ExportFormat>()?,
                include_original: !no_original,
                only_completed,
            };
            let store = Store::open(&cfg).await?;
            let out =
                export::export_task(&store, &layout, &task, &options, output.as_deref()).await?;
            println!("Exported {} rows to {}", out.rows, out.path.display());
            store.close().await;
        }
        Commands::Status { task, status } => {
            let status: TaskStatus = status.parse()?;
            let store = Store::open(&cfg).await?;
            store.set_task_status(&task, status).await?;
            println!("Task {} is now {}", task, status);
            store.close().await;
        }
        Commands::Delete { task, yes } => {
            if !yes {
                anyhow::bail!("delete removes the task and its annotations; pass --yes to confirm");
            }
            let store = Store::open(&cfg).await?;
            let t = store.require_task(&task).await?;
            store.delete_task(&task).await?;
            if let Err(e) = std::fs::remove_file(&t.data_path) {
                tracing::warn!(path = %t.data_path, error = %e, "dataset copy not removed");
            }
            println!("Deleted task {} ({})", task, t.name);
            store.close().await;
        }
        Commands::Serve => {
            layout.ensure()?;
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn run_validate(file: &Path, base_path: &str) -> anyhow::Result<()> {
    let records = jsonl::load_file(file)
        .with_context(|| format!("Failed to load dataset {}", file.display()))?;
    let report = jsonl::validate_paths(&records, base_path, None);

    println!("Records: {}", records.len());
    println!("Fields:  {}", jsonl::field_names(&records).join(", "));
    if report.is_clean() {
        println!("All file references resolve.");
    } else {
        for entry in &report.missing {
            println!("  missing: {}", entry);
        }
        for entry in &report.invalid {
            println!("  invalid: {}", entry);
        }
    }
    Ok(())
}

/// Walks a fresh session through every configuration step and creates the task.
#[allow(clippy::too_many_arguments)]
async fn run_create(
    cfg: &Config,
    layout: &Layout,
    file: &Path,
    field_specs: Vec<(String, FieldConfig)>,
    annotation_config: AnnotationConfig,
    base_path: &str,
    name: &str,
    description: &str,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read dataset {}", file.display()))?;

    let mut session = Session::new();
    session.upload(&content, file.file_name().and_then(|n| n.to_str()))?;
    session.set_base_path(base_path);
    session.advance()?;

    let (selected, configs) = if field_specs.is_empty() {
        (session.draft().available_fields(), BTreeMap::new())
    } else {
        let selected = field_specs.iter().map(|(n, _)| n.clone()).collect();
        (selected, field_specs.into_iter().collect())
    };
    session.select_fields(selected, configs)?;
    let report = session.path_report();
    for entry in report.missing.iter().chain(report.invalid.iter()) {
        eprintln!("warning: {}", entry);
    }
    session.advance()?;

    session.configure_annotation(annotation_config)?;
    session.advance()?;

    layout.ensure()?;
    let store = Store::open(cfg).await?;
    let task_id = session.create_task(&store, layout, name, description).await?;
    let task = store.require_task(&task_id).await?;
    println!("Created task {} ({})", task_id, task.name);
    println!("  Records: {}", task.config.total_items);
    println!("  Data:    {}", task.data_path);
    store.close().await;
    Ok(())
}

fn parse_field_specs(specs: &[String]) -> anyhow::Result<Vec<(String, FieldConfig)>> {
    specs
        .iter()
        .filter(|s| !s.trim().is_empty())
        .map(|spec| {
            let mut parts = spec.trim().splitn(3, ':');
            let name = parts.next().unwrap_or_default().to_string();
            if name.is_empty() {
                anyhow::bail!("invalid field spec '{}': expected name:type[:language]", spec);
            }
            let kind = FieldType::from(parts.next().unwrap_or("text").to_string());
            let language = parts.next().map(str::to_string);
            Ok((name, FieldConfig { kind, language }))
        })
        .collect()
}

fn parse_annotation(
    kind: &str,
    options: Vec<String>,
    min: i64,
    max: i64,
    placeholder: String,
    instruction: String,
) -> anyhow::Result<AnnotationConfig> {
    let options: Vec<String> = options
        .into_iter()
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    let config = match kind {
        "single_choice" => AnnotationConfig::SingleChoice {
            options,
            instruction,
        },
        "multiple_choice" => AnnotationConfig::MultipleChoice {
            options,
            instruction,
        },
        "rating" => AnnotationConfig::Rating {
            min_value: min,
            max_value: max,
            instruction,
        },
        "text_input" => AnnotationConfig::TextInput {
            placeholder,
            instruction,
        },
        other => anyhow::bail!(
            "unknown annotation type: '{}'. Must be single_choice, multiple_choice, rating, or text_input.",
            other
        ),
    };
    Ok(config)
}
