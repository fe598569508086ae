use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use persona_ab::config;
use persona_ab::elements::ElementSet;
use persona_ab::parser::parse_response;
use persona_ab::session::{RunDirectory, cleanup_old_runs, list_runs};
use persona_ab::snapshot::{CaptureBackend, WireframeBackend};
use persona_ab::suite::{SuiteConfig, SuiteRunner, summarize_run};
use persona_ab::vlm::{VlmClient, VlmConfig, check_health};

/// Persona A/B - simulated-user A/B testing of UI variants
#[derive(Parser, Debug)]
#[command(
    name = "persona-ab",
    about = "Persona-driven A/B testing of UI variants with a vision model",
    after_help = "ENVIRONMENT VARIABLES:\n\
        PERSONA_AB_VLM_ENDPOINT          Chat-completions endpoint URL\n\
        PERSONA_AB_VLM_MODEL             Model name\n\
        PERSONA_AB_VLM_MAX_TOKENS        Maximum tokens per response\n\
        PERSONA_AB_VLM_TIMEOUT           Streaming inactivity timeout (s)\n\
        PERSONA_AB_VLM_REQUEST_TIMEOUT   Wall-clock limit per call (s)\n\
        PERSONA_AB_RUNS_DIR              Base directory for runs\n\
        RUST_LOG                         Log filter (default: info)"
)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an A/B suite: every persona against every variant
    Run {
        /// Suite configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Run directory (default: auto-generated under the runs base)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Inference endpoint URL
        #[arg(long, env = "PERSONA_AB_VLM_ENDPOINT", default_value = config::DEFAULT_VLM_ENDPOINT)]
        vlm_endpoint: String,

        /// Model name
        #[arg(long, env = "PERSONA_AB_VLM_MODEL", default_value = config::DEFAULT_VLM_MODEL)]
        vlm_model: String,

        /// Start even if the endpoint does not answer a connection check
        #[arg(long)]
        skip_health_check: bool,

        /// Print the report as JSON instead of Markdown
        #[arg(long)]
        json: bool,
    },

    /// Parse a model response (file or stdin) and print the extracted action
    Parse {
        /// File with the raw response; stdin when absent
        file: Option<PathBuf>,
    },

    /// Recompute metrics for a finished run from its session logs
    Summarize {
        /// Run directory
        run: PathBuf,

        /// Output the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List run directories
    Runs {
        /// Base directory for runs
        #[arg(long, env = "PERSONA_AB_RUNS_DIR", default_value = config::DEFAULT_RUNS_DIR)]
        base: PathBuf,
    },

    /// Delete run directories older than the given age
    Clean {
        /// Maximum age in hours
        #[arg(long, default_value = "168")]
        older_than_hours: u64,

        /// Base directory for runs
        #[arg(long, env = "PERSONA_AB_RUNS_DIR", default_value = config::DEFAULT_RUNS_DIR)]
        base: PathBuf,
    },

    /// Render a variant's element set as a wireframe PNG
    Wireframe {
        /// Element set file (JSON)
        #[arg(short, long)]
        elements: PathBuf,

        /// Variant label drawn in the header
        #[arg(short, long, default_value = "A")]
        variant: String,

        /// Output file path
        #[arg(short, long, default_value = "./wireframe.png")]
        output: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Some(Commands::Run {
            config: config_path,
            output,
            vlm_endpoint,
            vlm_model,
            skip_health_check,
            json,
        }) => {
            let suite = SuiteConfig::load(&config_path)
                .with_context(|| format!("loading suite config {}", config_path.display()))?;

            if !skip_health_check {
                match check_health(&vlm_endpoint, 5) {
                    Ok(true) => eprintln!("Inference endpoint responding, starting suite..."),
                    Ok(false) | Err(_) => bail!(
                        "inference endpoint not responding at {vlm_endpoint} (use --skip-health-check to run anyway)"
                    ),
                }
            }

            let run = match output {
                Some(dir) => RunDirectory::in_dir(dir),
                None => RunDirectory::with_name(&config::get().runs.base_dir, &suite.name),
            };
            let client = VlmClient::new(VlmConfig::new(&vlm_endpoint).model(&vlm_model));
            let runner = SuiteRunner::new(suite, &client, run);
            let report = runner.run().context("suite run failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.to_markdown());
                println!("Run: {}", runner.run_directory().dir.display());
            }
        }

        Some(Commands::Parse { file }) => {
            let raw = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf).context("reading stdin")?;
                    buf
                }
            };
            let parsed = parse_response(&raw)?;
            println!("{}", serde_json::to_string_pretty(&parsed)?);
        }

        Some(Commands::Summarize { run, json }) => {
            if !run.is_dir() {
                bail!("run directory not found: {}", run.display());
            }
            let summary = summarize_run(&RunDirectory::in_dir(&run))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Run {}: {} sessions", summary.run_id, summary.sessions);
                if summary.skipped_logs > 0 {
                    println!("  ({} unreadable logs skipped)", summary.skipped_logs);
                }
                for v in &summary.variants {
                    let s = &v.summary;
                    println!(
                        "  Variant {}: {:.2}% success, {:.2} avg steps, {:.2} avg hesitation, {:.2}s avg time",
                        s.variant,
                        s.task_success_rate,
                        s.avg_session_length,
                        s.avg_hesitation_steps,
                        s.avg_processing_time
                    );
                    for (outcome, count) in &v.outcome_distribution {
                        println!("    {outcome}: {count}");
                    }
                }
                for c in &summary.comparisons {
                    println!(
                        "  {} vs {}: success {:+.2} pts, steps {:+.2}, time {:+.2}s",
                        c.variant, c.baseline, c.success_rate_change, c.session_length_change, c.processing_time_change
                    );
                }
            }
        }

        Some(Commands::Runs { base }) => {
            let runs = list_runs(&base).with_context(|| format!("listing {}", base.display()))?;
            if runs.is_empty() {
                println!("No runs under {}", base.display());
            }
            for run in runs {
                let logs = RunDirectory::in_dir(&run).list_session_logs().map(|l| l.len()).unwrap_or(0);
                println!("{}  ({} sessions)", run.display(), logs);
            }
        }

        Some(Commands::Clean { older_than_hours, base }) => {
            let max_age = Duration::from_secs(older_than_hours * 3600);
            let cleaned = cleanup_old_runs(&base, max_age)
                .with_context(|| format!("cleaning {}", base.display()))?;
            println!("Removed {} run(s) older than {}h from {}", cleaned, older_than_hours, base.display());
        }

        Some(Commands::Wireframe { elements, variant, output }) => {
            let set = ElementSet::load(&elements)?;
            let mut backend = WireframeBackend::new(&variant, &set);
            let result = backend.capture()?;
            std::fs::write(&output, &result.image_data)
                .with_context(|| format!("writing {}", output.display()))?;

            println!("Created wireframe: {}", output.display());
            println!("  Size: {}x{}, {} elements", result.width, result.height, set.len());
        }

        None => {
            println!("Persona A/B - simulated-user A/B testing of UI variants");
            println!();
            println!("Usage: persona-ab <COMMAND>");
            println!();
            println!("Commands:");
            println!("  run        Run an A/B suite from a config file");
            println!("  parse      Parse a model response and print the action");
            println!("  summarize  Recompute metrics from a run's session logs");
            println!("  runs       List run directories");
            println!("  clean      Delete old run directories");
            println!("  wireframe  Render an element set as a PNG");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(())
}
