//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "lexcol",
    version,
    about = "Retrieval and context assembly for Colombian tax law",
    long_about = "Lexcol routes legal questions to the right corpus collections, caches query \
                  embeddings, enriches results from a citation graph and assembles token-budgeted, \
                  cited context for a language model."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/lexcol/config.toml)
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
    /// Run the retrieval service in the foreground
    Serve,

    /// Ask a running service for its status
    Status,

    /// Show cache, rate limiter and graph counters of a running service
    Stats,

    /// Stop a running service
    Stop,

    /// Show which collections a question is routed to
    Route {
        /// Question text
        query: String,
    },

    /// Show the citation-graph neighbourhood of a document
    Lookup {
        /// Document reference, e.g. "Art. 240 ET" or "Ley 2277 de 2022"
        document: String,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List documents one hop away from the given documents
    Related {
        /// Document references
        #[arg(required = true)]
        ids: Vec<String>,

        /// Maximum neighbours listed per document
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Assemble prompt context from a JSON file of reranked chunks
    Assemble {
        /// File holding a JSON array of chunks
        file: PathBuf,

        /// Candidate count before reranking (defaults to the number of chunks)
        #[arg(long)]
        retrieved: Option<usize>,

        /// Override the configured token budget
        #[arg(short, long)]
        budget: Option<usize>,

        /// Print the assembled context as JSON instead of prompt text
        #[arg(long)]
        json: bool,
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
    fn test_parse_assemble() {
        let cli = Cli::try_parse_from([
            "lexcol",
            "--verbose",
            "assemble",
            "chunks.json",
            "--budget",
            "2000",
            "--json",
        ])
        .unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Assemble {
                file,
                retrieved,
                budget,
                json,
            } => {
                assert_eq!(file, PathBuf::from("chunks.json"));
                assert!(retrieved.is_none());
                assert_eq!(budget, Some(2000));
                assert!(json);
            }
            _ => panic!("Wrong command"),
        }
    }

    #[test]
    fn test_related_requires_ids() {
        assert!(Cli::try_parse_from(["lexcol", "related"]).is_err());
    }

    #[test]
    fn test_parse_related_limit() {
        let cli = Cli::try_parse_from(["lexcol", "related", "Art. 240 ET", "et-art-241", "-l", "3"])
            .unwrap();

        match cli.command {
            Commands::Related { ids, limit } => {
                assert_eq!(ids, vec!["Art. 240 ET", "et-art-241"]);
                assert_eq!(limit, Some(3));
            }
            _ => panic!("Wrong command"),
        }
    }
}
