//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for imitator.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// imitator - multi-persona copy rewriting
///
/// Takes an article (or a shared video link), rewrites it through every
/// selected persona concurrently, saves the results and publishes them to a
/// cloud document.
#[derive(Parser, Debug)]
#[command(name = "imitator")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rewrite one article (prompts for anything not given as an option)
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "IMITATOR_CONFIG")]
        config: Option<String>,

        /// Personas to run, e.g. "13" or "1,3" (empty or "all" for every persona)
        #[arg(short, long)]
        personas: Option<String>,

        /// Read the article or link from this file instead of prompting
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Stream model output to a TCP listener on 127.0.0.1 at this port
        #[arg(long, conflicts_with = "stream")]
        sink_port: Option<u16>,

        /// Stream model output to stdout
        #[arg(long)]
        stream: bool,

        /// Keep results local even when publishing is configured
        #[arg(long)]
        no_publish: bool,

        /// Use an offline echo model; no network calls are made
        #[arg(long)]
        dry_run: bool,
    },

    /// Persona catalog
    Personas {
        #[command(subcommand)]
        subcommand: PersonasSubcommand,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Display version and build information
    Version,
}

/// Persona subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum PersonasSubcommand {
    /// List the catalog with selection numbers
    List {
        /// Path to configuration file
        #[arg(short, long, env = "IMITATOR_CONFIG")]
        config: Option<String>,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::parse_from(["imitator", "run"]);
        match cli.command {
            Commands::Run {
                config,
                personas,
                input,
                sink_port,
                stream,
                no_publish,
                dry_run,
            } => {
                assert!(config.is_none());
                assert!(personas.is_none());
                assert!(input.is_none());
                assert!(sink_port.is_none());
                assert!(!stream && !no_publish && !dry_run);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_options() {
        let cli = Cli::parse_from([
            "imitator",
            "run",
            "--personas",
            "1,3",
            "--input",
            "article.txt",
            "--sink-port",
            "8888",
            "--no-publish",
        ]);
        match cli.command {
            Commands::Run {
                personas,
                input,
                sink_port,
                no_publish,
                ..
            } => {
                assert_eq!(personas.as_deref(), Some("1,3"));
                assert_eq!(input, Some(PathBuf::from("article.txt")));
                assert_eq!(sink_port, Some(8888));
                assert!(no_publish);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_sink_port_conflicts_with_stream() {
        let parsed = Cli::try_parse_from(["imitator", "run", "--stream", "--sink-port", "8888"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_personas_list() {
        let cli = Cli::parse_from(["imitator", "personas", "list"]);
        match cli.command {
            Commands::Personas {
                subcommand: PersonasSubcommand::List { config },
            } => assert!(config.is_none()),
            _ => panic!("Expected Personas List command"),
        }
    }

    #[test]
    fn test_verbose_flags() {
        let cli = Cli::parse_from(["imitator", "-vv", "version"]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_quiet_flag() {
        let cli = Cli::parse_from(["imitator", "--quiet", "version"]);
        assert!(cli.quiet);
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["imitator", "config", "init", "--force"]);
        match cli.command {
            Commands::Config {
                subcommand: ConfigSubcommand::Init { path, force },
            } => {
                assert!(path.is_none());
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }
}
