//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "codepal",
    version,
    author = "neur0map",
    about = "Ask questions about a code repository",
    long_about = "codepal chunks and embeds a repository into a persistent vector index, then answers \
                  questions with a bounded agent loop that searches, reads, outlines and lists files \
                  before synthesizing an answer."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/codepal/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build (or reuse) the vector index of a repository
    Index {
        /// Repository root
        repo: PathBuf,

        /// Rebuild even when the persisted index is current
        #[arg(short, long)]
        force: bool,
    },

    /// Semantic search over the indexed chunks
    Search {
        /// Repository root
        repo: PathBuf,

        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short, long, default_value = "5")]
        k: usize,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Ask a question about a repository
    Ask {
        /// Repository root
        repo: PathBuf,

        /// Question to ask
        question: String,

        /// Conversation file to continue and update
        #[arg(long, value_name = "FILE")]
        history: Option<PathBuf>,

        /// Print the tool calls made while answering
        #[arg(short, long)]
        transcript: bool,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,

        /// Use the offline planner even if a model service is configured
        #[arg(long)]
        offline: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from([
            "codepal",
            "ask",
            "./repo",
            "What does main.py do?",
            "--history",
            "chat.json",
            "--transcript",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Ask {
                repo,
                question,
                history,
                transcript,
                json,
                offline,
            } => {
                assert_eq!(repo, PathBuf::from("./repo"));
                assert_eq!(question, "What does main.py do?");
                assert_eq!(history, Some(PathBuf::from("chat.json")));
                assert!(transcript);
                assert!(!json);
                assert!(!offline);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
