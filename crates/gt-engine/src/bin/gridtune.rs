use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use gt_engine::presets::{preset, PRESET_NAMES};
use gt_engine::{TuneFile, Tuner};
use gt_optimizer::{best_by, load_experiment_config, load_trials, trial_dir_name, Mode};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gridtune")]
#[command(version, about = "Grid search driver for file-configured training runs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run (or resume) a search
    Run {
        #[command(flatten)]
        source: Source,

        /// Print the trials that would run and exit
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the grid size and every combination
    Grid {
        #[command(flatten)]
        source: Source,
    },

    /// Print the best completed trial of a stored experiment
    Best {
        /// Root directory holding experiments
        #[arg(long, value_name = "DIR", default_value = "./ray_results")]
        results_dir: PathBuf,

        /// Experiment name
        #[arg(long)]
        name: String,

        /// Metric to rank by (defaults to the experiment's objective)
        #[arg(long)]
        metric: Option<String>,

        /// "max" or "min" (defaults to the experiment's mode)
        #[arg(long)]
        mode: Option<String>,
    },

    /// Print a built-in preset as a TOML tune file
    ShowPreset {
        #[arg(value_name = "PRESET")]
        name: String,
    },
}

/// Where the tune file comes from, plus command-line overrides.
#[derive(Args)]
struct Source {
    /// TOML tune file
    #[arg(short, long, value_name = "FILE", conflicts_with = "preset")]
    config: Option<PathBuf>,

    /// Built-in preset: "clip" or "deeplab"
    #[arg(short, long, value_name = "NAME")]
    preset: Option<String>,

    /// Directory holding the template parameter files
    #[arg(long, value_name = "DIR")]
    template_dir: Option<PathBuf>,

    /// Directory holding training data (defaults to the template directory)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Root directory for experiments and reports
    #[arg(long, value_name = "DIR")]
    results_dir: Option<PathBuf>,

    /// Experiment name
    #[arg(long)]
    name: Option<String>,

    /// Upper bound on trials running at once
    #[arg(short = 'j', long, value_name = "N")]
    max_concurrent: Option<usize>,
}

impl Source {
    fn load(&self) -> Result<TuneFile> {
        let mut file = match (&self.config, &self.preset) {
            (Some(path), _) => TuneFile::load(path)
                .with_context(|| format!("loading tune file {}", path.display()))?,
            (None, Some(name)) => {
                let mut file = preset(name)?;
                file.apply_env();
                file
            }
            (None, None) => bail!(
                "either --config or --preset ({}) is required",
                PRESET_NAMES.join("|")
            ),
        };

        if let Some(dir) = &self.template_dir {
            file.paths.template_dir = dir.clone();
        }
        if let Some(dir) = &self.data_dir {
            file.paths.data_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.results_dir {
            file.paths.results_dir = dir.clone();
        }
        if let Some(name) = &self.name {
            file.experiment.name = name.clone();
        }
        if let Some(n) = self.max_concurrent {
            file.experiment.max_concurrent = n;
        }
        file.validate()?;
        Ok(file)
    }
}

fn print_grid(file: &TuneFile) {
    let config = file.tune_config();
    let mut strategy = config.strategy();
    let count = strategy.remaining().unwrap_or(config.num_samples);
    let points = strategy.suggest(count);
    println!("{} configurations ({} search)", points.len(), strategy.name());
    for (n, params) in points.iter().enumerate() {
        let rendered: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        println!(
            "{}  {}",
            trial_dir_name(&file.plan.trial_prefix, n),
            rendered.join(" ")
        );
    }
}

async fn run(source: Source, dry_run: bool) -> Result<()> {
    let file = source.load()?;
    if dry_run {
        println!("experiment: {}", file.experiment_dir().display());
        println!("command:    {}", file.plan.command);
        print_grid(&file);
        return Ok(());
    }

    let tuner = Tuner::open(&file)?;
    let summary = tuner.run().await?;

    match &summary.best {
        Some(best) => {
            println!(
                "Best trial {} ({} = {})",
                best.trial_number, summary.status.metric, best.objective
            );
            for (name, value) in &best.parameters {
                println!("  {name} = {value}");
            }
        }
        None => println!("No trial reported {}", summary.status.metric),
    }
    println!("Wrote trial results to {}", summary.report_path.display());
    Ok(())
}

fn best(
    results_dir: PathBuf,
    name: String,
    metric: Option<String>,
    mode: Option<String>,
) -> Result<()> {
    let experiment_dir = results_dir.join(&name);
    let config = load_experiment_config(&experiment_dir)
        .with_context(|| format!("no experiment at {}", experiment_dir.display()))?;
    let metric = metric.unwrap_or(config.metric);
    let mode = match mode {
        Some(mode) => mode.parse::<Mode>()?,
        None => config.mode,
    };

    let trials = load_trials(&experiment_dir)?;
    let Some(best) = best_by(&trials, &metric, mode) else {
        bail!("no completed trial in {} reports {}", name, metric);
    };
    println!("trial {} ({})", best.trial_number, best.trial_id);
    for (key, value) in best.metrics.iter() {
        println!("  {key} = {value}");
    }
    for (key, value) in &best.parameters {
        println!("  {key}: {value}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { source, dry_run } => run(source, dry_run).await?,
        Commands::Grid { source } => print_grid(&source.load()?),
        Commands::Best {
            results_dir,
            name,
            metric,
            mode,
        } => best(results_dir, name, metric, mode)?,
        Commands::ShowPreset { name } => {
            let file = preset(&name)?;
            print!("{}", file.to_toml()?);
        }
    }
    Ok(())
}
