//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "shardfuse",
    version,
    about = "Search JSON document shards through one alias",
    long_about = "shardfuse fans a search request out over a set of shards, merges hits, \
                  aggregations and facets into one answer, and optionally fuses full-text \
                  and vector rankings (rrf, rsf, dbsf)."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/shardfuse/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a search request over JSON document shards
    Search {
        /// JSON file holding the search request
        #[arg(short, long, value_name = "FILE")]
        request: PathBuf,

        /// Shard files, each a JSON array of documents with a string "id"
        #[arg(required = true, value_name = "SHARD")]
        shards: Vec<PathBuf>,

        /// Override the request's score method (default, rrf, rsf, dbsf)
        #[arg(short, long)]
        score: Option<String>,

        /// Print a ranked summary instead of JSON
        #[arg(long)]
        summary: bool,
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
    Show,

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
    fn test_search_needs_shards() {
        assert!(Cli::try_parse_from(["shardfuse", "search", "--request", "q.json"]).is_err());
        let cli = Cli::try_parse_from(["shardfuse", "search", "-r", "q.json", "a.json", "b.json"])
            .unwrap();
        match cli.command {
            Commands::Search { shards, .. } => assert_eq!(shards.len(), 2),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
