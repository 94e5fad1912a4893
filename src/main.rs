mod agent;
mod analytics;
mod config;
mod data_dir;
mod ingest;
mod qa;
mod record;
mod report;
mod rollup;
#[cfg(feature = "serve")]
mod serve;
#[cfg(feature = "serve")]
mod upload;

use agent::{AgentCapability, CommandAgent, TaskRequest};
use clap::{Parser, Subcommand};
use config::AppConfig;
use data_dir::DataDir;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

/// Agent run analytics: load a run-log CSV and report KPI rollups, replay a
/// QA suite against the agent, or serve the operations dashboard.
#[derive(Parser, Debug)]
#[command(name = "agentops", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "agentops.toml", global = true)]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load the run-log CSV and print all four rollups
    Report {
        /// CSV file (overrides config)
        #[arg(long)]
        data: Option<PathBuf>,

        /// Table name to load into (overrides config)
        #[arg(long)]
        table: Option<String>,

        /// SQLite file to load into instead of a private in-memory store
        #[arg(long)]
        store: Option<PathBuf>,

        /// Emit one JSON document instead of text tables
        #[arg(long)]
        json: bool,
    },
    /// Replay the QA test cases against the agent
    Qa {
        /// Test case file or glob pattern (overrides config)
        #[arg(long)]
        cases: Option<String>,

        /// Don't write a qa_results_*.json file
        #[arg(long)]
        no_save: bool,
    },
    /// Send one task to the agent and print the outcome
    Ask {
        /// lead_summary, follow_up or risk_analysis
        #[arg(long)]
        task_type: String,

        /// Task field as key=value (repeatable)
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
    /// Serve the web dashboard
    #[cfg(feature = "serve")]
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,

        /// Port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "agentops=debug"
    } else {
        "agentops=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    #[allow(unused_mut)]
    let mut config = AppConfig::load(&cli.config)?;
    let dd = DataDir::from_config(&config.data);

    match cli.command {
        Command::Report {
            data,
            table,
            store,
            json,
        } => {
            let source = data.unwrap_or_else(|| dd.csv());
            let table = table.unwrap_or_else(|| config.data.table.clone());
            let dashboard = report::Dashboard::load(&source, &table, store.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&dashboard)?);
            } else {
                print!("{}", dashboard.render_text());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Qa { cases, no_save } => {
            let pattern = cases.unwrap_or_else(|| config.qa.cases.clone());
            let cases = qa::load_cases(&pattern)?;
            tracing::info!(cases = cases.len(), pattern = %pattern, "running QA suite");

            let agent = CommandAgent::new(&config.agent);
            let report = qa::QaRunner::new(&agent).run_all(&cases);
            qa::print_summary(&report);

            if !no_save {
                let path = qa::save_results(&dd.qa_results_dir(), &report, chrono::Local::now())?;
                tracing::info!(path = %path.display(), "results saved");
            }

            Ok(match report.summary.verdict {
                qa::Verdict::Failed => ExitCode::FAILURE,
                _ => ExitCode::SUCCESS,
            })
        }
        Command::Ask { task_type, fields } => {
            let fields: BTreeMap<String, String> = fields.into_iter().collect();
            let request = TaskRequest::from_form(&task_type, "cli_user", &fields)?;
            let agent = CommandAgent::new(&config.agent);
            let outcome = agent.process_task(&request)?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(ExitCode::SUCCESS)
        }
        #[cfg(feature = "serve")]
        Command::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.serve.bind = bind;
            }
            if let Some(port) = port {
                config.serve.port = port;
            }
            let agent: std::sync::Arc<dyn AgentCapability> =
                std::sync::Arc::new(CommandAgent::new(&config.agent));
            serve::run(&config, agent).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
