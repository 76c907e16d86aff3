//! Kolosal Churn CLI Module
//!
//! Command-line interface for running the pipeline, generating sample data
//! and inspecting tracked runs and registered models.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::data::sample::generate_bank_churn;
use crate::data::{Lakehouse, WriteMode};
use crate::evaluation::{Evaluator, RocAucSplit};
use crate::pipeline::{ChurnPipeline, PipelineConfig, PipelineSummary};
use crate::tracking::{LocalStorage, ModelUri, RunRecord, StorageBackend, TrackingClient};
use crate::visualization::ConfusionPlot;

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn status_colored(status: &str) -> ColoredString {
    match status {
        "finished" => ok(status),
        "failed" | "killed" => status.red(),
        _ => status.yellow(),
    }
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "kolosal-churn")]
#[command(author = "KolosalAI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bank churn training pipeline with tracked runs and a model registry")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by commands that build a pipeline configuration
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Pipeline configuration file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Lakehouse root holding `Tables/`
    #[arg(short, long)]
    pub lakehouse: Option<PathBuf>,

    /// Tracking store directory
    #[arg(long)]
    pub tracking_dir: Option<PathBuf>,

    /// Experiment name
    #[arg(short, long)]
    pub experiment: Option<String>,

    /// Split and SMOTE seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Where ROC AUC is computed (train, validation)
    #[arg(long)]
    pub roc_auc_split: Option<RocAucSplit>,
}

impl ConfigArgs {
    /// Load the file (or defaults) and apply flag overrides
    pub fn resolve(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(root) = &self.lakehouse {
            config = config.with_lakehouse_root(root);
        }
        if let Some(dir) = &self.tracking_dir {
            config = config.with_tracking_dir(dir);
        }
        if let Some(name) = &self.experiment {
            config = config.with_experiment_name(name);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(split) = self.roc_auc_split {
            config = config.with_roc_auc_split(split);
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline: split, balance, train, evaluate, report
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Show row-normalized confusion matrices
        #[arg(long)]
        normalize: bool,

        /// Write confusion-matrix SVGs into this directory
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Write the run summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Write a synthetic cleaned churn table
    Sample {
        /// Lakehouse root holding `Tables/`
        #[arg(short, long, default_value = "./lakehouse")]
        lakehouse: PathBuf,

        /// Table name
        #[arg(short, long, default_value = "df_clean")]
        table: String,

        /// Number of rows
        #[arg(short, long, default_value = "10000")]
        rows: usize,

        /// Fraction of churned customers
        #[arg(long, default_value = "0.2")]
        positive_rate: f64,

        /// Generator seed
        #[arg(long, default_value = "12345")]
        seed: u64,
    },

    /// List runs of an experiment
    Runs {
        /// Tracking store directory
        #[arg(long, default_value = "./mlruns")]
        tracking_dir: PathBuf,

        /// Experiment name
        #[arg(short, long, default_value = "bank-churn-experiment")]
        experiment: String,
    },

    /// List registered models
    Models {
        /// Tracking store directory
        #[arg(long, default_value = "./mlruns")]
        tracking_dir: PathBuf,
    },

    /// Reload a model by URI and evaluate it on the validation partition
    Evaluate {
        /// `runs:/<run_id>/model` or `models:/<name>/<version|latest>`
        uri: ModelUri,

        #[command(flatten)]
        config: ConfigArgs,

        /// Show row-normalized confusion matrix
        #[arg(long)]
        normalize: bool,
    },

    /// Show the schema and commit history of a table
    Info {
        /// Lakehouse root holding `Tables/`
        #[arg(short, long, default_value = "./lakehouse")]
        lakehouse: PathBuf,

        /// Table name
        #[arg(short, long, default_value = "df_clean")]
        table: String,
    },
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_run(
    args: &ConfigArgs,
    normalize: bool,
    report_dir: Option<PathBuf>,
    summary_path: Option<PathBuf>,
) -> anyhow::Result<PipelineSummary> {
    section("Run");

    let mut config = args.resolve()?.with_normalize_confusion(normalize);
    if let Some(dir) = report_dir {
        config = config.with_report_dir(dir);
    }

    println!("  {:<14} {}", muted("Experiment"), config.experiment_name);
    println!("  {:<14} {}", muted("Input"), config.lakehouse_root.join("Tables").join(&config.input_table).display());
    println!("  {:<14} {}", muted("Seed"), config.seed);
    println!("  {:<14} {}", muted("ROC AUC on"), config.roc_auc_split);

    let start = Instant::now();
    let pipeline = ChurnPipeline::new(config)?;
    let (_, summary) = pipeline.run()?;

    section("Summary");
    println!(
        "  {:<10} {:>9} {:>9} {:>9} {:>9} {:>9}  {}",
        muted("Model"), muted("Accuracy"), muted("Precision"), muted("Recall"), muted("F1"), muted("ROC AUC"), muted("URI")
    );
    println!("  {}", dim(&"─".repeat(96)));
    for m in &summary.models {
        println!(
            "  {:<10} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>9.4}  {}",
            m.run_name.white().bold(), m.accuracy, m.precision, m.recall, m.f1, m.roc_auc, accent(&m.model_uri)
        );
    }
    println!();
    println!(
        "  {} rows: {} train ({} after SMOTE), {} validation, {} test",
        summary.rows, summary.train_rows, summary.balanced_rows, summary.validation_rows, summary.test_rows
    );
    let reload = if summary.all_reloads_identical() { ok("identical") } else { "differs".red() };
    println!("  reloaded predictions {}  {}", reload, dim(&format!("{:.2?}", start.elapsed())));

    if let Some(path) = summary_path {
        std::fs::write(&path, serde_json::to_string_pretty(&summary)?)?;
        println!("  {} {}", muted("summary"), path.display());
    }
    println!();
    Ok(summary)
}

pub fn cmd_sample(
    lakehouse: &PathBuf,
    table: &str,
    rows: usize,
    positive_rate: f64,
    seed: u64,
) -> anyhow::Result<()> {
    section("Sample");

    step_run(&format!("Generating {} rows", rows));
    let start = Instant::now();
    let mut df = generate_bank_churn(rows, positive_rate, seed)?;
    step_done(&format!("{:?}", start.elapsed()));

    step_run(&format!("Writing Tables/{}", table));
    let commit = Lakehouse::open(lakehouse).write_table(table, &mut df, WriteMode::Overwrite)?;
    step_done(&format!("version {}, {} rows × {} cols", commit.version, commit.num_rows, commit.schema.len()));

    println!();
    Ok(())
}

/// Runs of the experiment named `experiment`, or `None` when the store has no
/// such experiment. Never writes to the store.
pub fn experiment_runs(tracking_dir: &Path, experiment: &str) -> crate::Result<Option<Vec<RunRecord>>> {
    if !tracking_dir.is_dir() {
        return Ok(None);
    }
    let storage = LocalStorage::new(tracking_dir)?;
    match storage.load_experiments()?.into_iter().find(|e| e.name == experiment) {
        Some(exp) => Ok(Some(storage.list_runs(&exp.experiment_id)?)),
        None => Ok(None),
    }
}

pub fn cmd_runs(tracking_dir: &PathBuf, experiment: &str) -> anyhow::Result<()> {
    section(&format!("Runs · {}", experiment));

    let Some(runs) = experiment_runs(tracking_dir, experiment)? else {
        println!("  {}", dim(&format!("no experiment named '{}'", experiment)));
        println!();
        return Ok(());
    };
    if runs.is_empty() {
        println!("  {}", dim("no runs"));
        println!();
        return Ok(());
    }

    println!(
        "  {:<34} {:<10} {:<10} {:>8} {:>8}  {}",
        muted("Run id"), muted("Name"), muted("Status"), muted("val_f1"), muted("roc_auc"), muted("Started")
    );
    println!("  {}", dim(&"─".repeat(96)));
    for run in runs {
        let metric = |k: &str| run.metrics.get(k).map_or("-".to_string(), |v| format!("{:.4}", v));
        println!(
            "  {:<34} {:<10} {:<10} {:>8} {:>8}  {}",
            run.run_id,
            run.run_name,
            status_colored(&run.status.to_string()),
            metric("val_f1"),
            metric("roc_auc"),
            dim(&run.start_time.format("%Y-%m-%d %H:%M:%S").to_string())
        );
    }
    println!();
    Ok(())
}

pub fn cmd_models(tracking_dir: &PathBuf) -> anyhow::Result<()> {
    section("Registered models");

    let registry = LocalStorage::new(tracking_dir)?.load_registry()?;
    let versions: Vec<_> = registry.all_versions().collect();
    if versions.is_empty() {
        println!("  {}", dim("no registered models"));
        println!();
        return Ok(());
    }

    println!("  {:<12} {:>8}  {:<44} {}", muted("Name"), muted("Version"), muted("Source"), muted("Registered"));
    println!("  {}", dim(&"─".repeat(90)));
    for v in versions {
        println!(
            "  {:<12} {:>8}  {:<44} {}",
            v.name.white().bold(),
            v.version,
            accent(&v.source),
            dim(&v.registered_at.format("%Y-%m-%d %H:%M:%S").to_string())
        );
    }
    println!();
    Ok(())
}

pub fn cmd_evaluate(uri: &ModelUri, args: &ConfigArgs, normalize: bool) -> anyhow::Result<()> {
    section("Evaluate");

    let config = args.resolve()?;
    let split = config.roc_auc_split;
    let class_names = config.class_names.clone();
    let pipeline = ChurnPipeline::new(config)?.with_console(false);

    step_run(&format!("Loading {}", uri));
    let model = pipeline.tracker().load_model(uri)?;
    step_done(model.estimator_name());

    step_run("Rebuilding partitions");
    let ingested = pipeline.ingest()?;
    let partitions = pipeline.split(&ingested)?;
    let balanced = pipeline.balance(&partitions.train)?;
    step_done(&format!("{} validation rows", partitions.validation.n_rows()));

    let evaluator = Evaluator::new(split).with_target_names(class_names.to_vec());
    let report = evaluator.evaluate(&model, &partitions.validation, &balanced.table)?;

    println!();
    println!("  {:<12} {:.4}", muted("Accuracy"), report.scores.accuracy);
    println!("  {:<12} {:.4}", muted("Precision"), report.scores.precision);
    println!("  {:<12} {:.4}", muted("Recall"), report.scores.recall);
    println!("  {:<12} {:.4}", muted("F1"), report.scores.f1);
    println!("  {:<12} {:.4} {}", muted("ROC AUC"), report.roc_auc, dim(&format!("({})", report.roc_auc_split)));
    println!();
    println!("{}", report.report);

    let [negative, positive] = class_names;
    ConfusionPlot::new(uri.to_string())
        .with_class_names(negative, positive)
        .with_normalize(normalize)
        .print(&report.confusion);
    println!();
    Ok(())
}

pub fn cmd_info(lakehouse: &PathBuf, table: &str) -> anyhow::Result<()> {
    section(&format!("Table · {}", table));

    let lakehouse = Lakehouse::open(lakehouse);
    let df = lakehouse.read_table(table)?;

    println!("  {:<12} {}", muted("Path"), lakehouse.table_path(table).display());
    println!("  {:<12} {}", muted("Rows"), df.height());
    println!("  {:<12} {}", muted("Columns"), df.width());
    println!();

    println!("  {:<20} {:<12} {:>6}", muted("Column"), muted("Type"), muted("Nulls"));
    println!("  {}", dim(&"─".repeat(42)));
    for col in df.get_columns() {
        println!(
            "  {:<20} {:<12} {:>6}",
            col.name(),
            format!("{:?}", col.dtype()).truecolor(140, 140, 140),
            col.null_count(),
        );
    }

    let history = lakehouse.history(table)?;
    if !history.is_empty() {
        section("History");
        for commit in history {
            println!(
                "  {:>4}  {:<10} {:>8} rows  {}",
                commit.version,
                format!("{:?}", commit.mode).to_lowercase(),
                commit.num_rows,
                dim(&commit.committed_at.format("%Y-%m-%d %H:%M:%S").to_string())
            );
        }
    }

    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "kolosal-churn", "run", "--seed", "7", "--roc-auc-split", "validation", "--normalize",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { config, normalize, .. } => {
                assert!(normalize);
                let resolved = config.resolve().unwrap();
                assert_eq!(resolved.seed, 7);
                assert_eq!(resolved.roc_auc_split, RocAucSplit::Validation);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_evaluate_uri() {
        let cli = Cli::try_parse_from(["kolosal-churn", "evaluate", "models:/lgbm_sm/latest"]).unwrap();
        match cli.command {
            Commands::Evaluate { uri, .. } => assert_eq!(uri.to_string(), "models:/lgbm_sm/latest"),
            _ => panic!("expected evaluate"),
        }
        assert!(Cli::try_parse_from(["kolosal-churn", "evaluate", "s3://bucket/model"]).is_err());
    }

    #[test]
    fn test_listing_unknown_experiment_leaves_store_untouched() {
        use crate::tracking::LocalTracker;

        let dir = tempfile::TempDir::new().unwrap();
        let tracker = LocalTracker::open(dir.path(), "bank-churn-experiment").unwrap();
        let run = tracker.start_run("rfc1_sm").unwrap();
        let before = std::fs::read_to_string(dir.path().join("experiments.json")).unwrap();

        assert!(experiment_runs(dir.path(), "bank-churn-experimnet").unwrap().is_none());
        assert!(experiment_runs(&dir.path().join("missing"), "bank-churn-experiment").unwrap().is_none());
        assert!(!dir.path().join("missing").exists());

        let after = std::fs::read_to_string(dir.path().join("experiments.json")).unwrap();
        assert_eq!(before, after);

        let runs = experiment_runs(dir.path(), "bank-churn-experiment").unwrap().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, run.run_id);
    }
}
