//! imitator - multi-persona copy rewriting
//!
//! This is the main entry point for the imitator binary.
//! It reads an article (or a shared video link), rewrites it through the
//! selected personas concurrently, saves the results locally and publishes
//! them to a cloud document.

mod backend;
mod cli;
mod config;
mod error;
mod logging;
mod persist;
mod persona;
mod pipeline;
mod prompt;
mod publish;
mod resolver;
mod scheduler;
mod summary;
mod types;
mod version;
mod workflow;

use std::fs;
use std::io;
use std::path::Path;

use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Commands, ConfigSubcommand, PersonasSubcommand};
use crate::config::ImitatorConfig;
use crate::error::{Error, Result};
use crate::persona::{Selection, TemplateRegistry};
use crate::pipeline::SinkTarget;
use crate::prompt::Prompter;
use crate::workflow::{Collaborators, RunReport, Workflow};

fn main() {
    // Parse CLI arguments first (before logging, so we know verbosity)
    let cli = Cli::parse();

    match execute(cli) {
        Ok(()) => {}
        Err(Error::InputAborted) => {
            println!("已退出");
        }
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            std::process::exit(e.exit_code());
        }
    }
}

fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Version => {
            version::print_version();
            Ok(())
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            handle_config_command(subcommand)
        }
        Commands::Personas { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            handle_personas_command(subcommand)
        }
        Commands::Run {
            config,
            personas,
            input,
            sink_port,
            stream,
            no_publish,
            dry_run,
        } => {
            let mut config = ImitatorConfig::load(config.as_deref())?;
            if no_publish || dry_run {
                config.publish.enabled = false;
            }

            // The guards must be kept alive for the lifetime of the program
            let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

            let build = version::build_info();
            info!(
                version = %build.full_version(),
                target = %build.target,
                profile = %build.profile,
                dry_run,
                "Starting imitator"
            );

            let sink = match (sink_port, stream) {
                (Some(port), _) => SinkTarget::Tcp(port),
                (None, true) => SinkTarget::Console,
                (None, false) => SinkTarget::Null,
            };

            let request = RunRequest {
                personas,
                input_file: input,
                sink,
                dry_run,
            };
            run_request(&config, request)
        }
    }
}

struct RunRequest {
    personas: Option<String>,
    input_file: Option<std::path::PathBuf>,
    sink: SinkTarget,
    dry_run: bool,
}

/// Gather the selection and article, then run the workflow to completion
fn run_request(config: &ImitatorConfig, request: RunRequest) -> Result<()> {
    let registry = TemplateRegistry::load(config.personas.catalog.as_deref())?;
    let collaborators = if request.dry_run {
        Collaborators::offline()
    } else {
        Collaborators::from_config(config)?
    };
    let workflow = Workflow::new(config, registry, collaborators, request.sink);

    let mut prompter = Prompter::new(io::stdin().lock(), io::stdout());
    let selection: Selection = match request.personas {
        Some(ref s) => s.parse()?,
        None => prompter.read_selection(&workflow.registry().menu(), workflow.registry().len())?,
    };
    let user_input = match request.input_file {
        Some(ref path) => read_input_file(path)?,
        None => prompter.read_article()?,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create runtime: {}", e)))?;
    let report = runtime.block_on(workflow.run(user_input, &selection))?;

    print_report(&report);
    Ok(())
}

fn read_input_file(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    let content = content.trim();
    if content.is_empty() {
        return Err(Error::InputAborted);
    }
    Ok(content.to_string())
}

fn print_report(report: &RunReport) {
    for (model, totals) in &report.usage {
        println!("{}:\n{}", model, totals);
    }

    let results = &report.state.results;
    println!();
    println!(
        "完成: {} 个模板成功, {} 个失败",
        results.succeeded(),
        results.failed()
    );
    for (persona, outcome) in results.iter().filter(|(_, o)| !o.is_completed()) {
        println!("  {}: {}", persona, outcome.display_text());
    }

    if let Some(ref saved) = report.saved {
        println!("结果文件: {}", saved.md.display());
        println!("          {}", saved.txt.display());
    }
    if let Some(ref published) = report.published {
        println!("已发布到云文档: {}", published.document_id);
        for (section, reason) in &published.failed {
            println!("  未发布 {}: {}", section, reason);
        }
    }
}

/// Handle persona catalog subcommands
fn handle_personas_command(subcommand: PersonasSubcommand) -> Result<()> {
    match subcommand {
        PersonasSubcommand::List { config } => {
            let cfg = ImitatorConfig::load(config.as_deref())?;
            let registry = TemplateRegistry::load(cfg.personas.catalog.as_deref())?;
            for (i, persona) in registry.personas().iter().enumerate() {
                println!(
                    "{:>2}. {}  templates: {}{}",
                    i + 1,
                    persona.name,
                    persona.templates.len(),
                    if persona.polish { ", polish" } else { "" }
                );
            }
        }
    }

    Ok(())
}

/// Handle configuration subcommands
fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = ImitatorConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            ImitatorConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
