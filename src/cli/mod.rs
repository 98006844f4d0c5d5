//! CLI command definitions and parsing
use crate::error::{LaanaError, Result};
use crate::query::{Filters, Ordering, SearchOptions, SortField};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "laana",
    version,
    author = "neur0map",
    about = "Search a multilingual corpus and keep its embeddings filled in",
    long_about = "Laana runs lexical, regex, vector and hybrid searches over a corpus of documents and \
                  sentences held in a search engine, a relational database or a local SQLite file, and \
                  backfills missing embedding vectors with resumable, cancellable runs."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/laana/config.toml)
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
    /// Search the corpus
    Search {
        #[command(flatten)]
        query: QueryArgs,

        /// Maximum number of results to return
        #[arg(short, long)]
        limit: Option<usize>,

        /// Results to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Mark matches in result text
        #[arg(long)]
        highlight: bool,

        /// Order results by a field instead of relevance
        #[arg(long, value_parser = ["date", "authors", "sourcename", "groupname", "length", "text"])]
        sort: Option<String>,

        /// Sort descending
        #[arg(long, requires = "sort")]
        desc: bool,

        /// Shuffle results; reproducible with --seed
        #[arg(long, conflicts_with = "sort")]
        random: bool,

        #[arg(long, requires = "random")]
        seed: Option<u64>,

        /// Print the rendered backend query instead of running it
        #[arg(long)]
        explain: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Count matches; vector and hybrid modes report -1
    Count {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Embed entities that have no vector yet
    Backfill {
        /// "document" or "sentence" (defaults to backfill.target)
        #[arg(short, long)]
        target: Option<String>,

        /// "small" or "large" (defaults to backfill.tier)
        #[arg(long)]
        tier: Option<String>,

        /// Stop after embedding this many entities
        #[arg(short, long)]
        limit: Option<usize>,

        /// Re-embed one entity, even if it already has a vector
        #[arg(long)]
        id: Option<i64>,

        /// Ignore the saved checkpoint and start from the beginning
        #[arg(long)]
        fresh: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load documents from a JSONL file into the local corpus
    Import {
        file: PathBuf,

        /// Do not compute missing quality ratios
        #[arg(long)]
        no_score: bool,
    },

    /// Show local corpus counts and vector coverage
    Stats,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Query text, mode and filters shared by search and count
#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Search text (a pattern for regex modes)
    pub text: String,

    /// Search mode, e.g. exact, any, all, near, regex, phrase, vector, hybrid, knn
    #[arg(short, long, default_value = "match")]
    pub mode: String,

    /// Search sentences instead of documents
    #[arg(long)]
    pub sentences: bool,

    /// Match regardless of macrons and ʻokina
    #[arg(long)]
    pub ignore_diacritics: bool,

    /// Maximum distance between terms for near
    #[arg(long)]
    pub window: Option<usize>,

    /// Earliest year
    #[arg(long)]
    pub from: Option<i32>,

    /// Latest year
    #[arg(long)]
    pub to: Option<i32>,

    #[arg(long)]
    pub group: Option<String>,

    #[arg(long)]
    pub source: Option<String>,

    #[arg(long)]
    pub authors: Option<String>,
}

impl QueryArgs {
    /// Mode name with sentence granularity applied
    pub fn mode_name(&self) -> String {
        if self.sentences && !self.mode.ends_with("sentence") {
            format!("{}sentence", self.mode)
        } else {
            self.mode.clone()
        }
    }

    pub fn options(&self, k: usize) -> SearchOptions {
        SearchOptions {
            k,
            diacritic_sensitive: !self.ignore_diacritics,
            near_window: self.window,
            filters: Filters {
                date_from: self.from,
                date_to: self.to,
                group_name: self.group.clone(),
                source_name: self.source.clone(),
                authors: self.authors.clone(),
            },
            ..SearchOptions::default()
        }
    }
}

/// Ordering requested on the command line
pub fn ordering(sort: Option<&str>, descending: bool, random: bool, seed: Option<u64>) -> Result<Ordering> {
    if random {
        return Ok(Ordering::Random { seed });
    }
    match sort {
        None => Ok(Ordering::Relevance),
        Some(name) => {
            let field = SortField::parse(name)
                .ok_or_else(|| LaanaError::InvalidQuery(format!("Unknown sort field: {}", name)))?;
            Ok(Ordering::Field { field, descending })
        }
    }
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
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_arguments() {
        let cli = Cli::parse_from([
            "laana", "search", "aloha mai", "--mode", "near", "--sentences", "--window", "3", "--from",
            "1850", "--sort", "date", "--desc",
        ]);
        let Commands::Search { query, sort, desc, .. } = cli.command else {
            panic!("expected search");
        };
        assert_eq!(query.mode_name(), "nearsentence");
        let options = query.options(5);
        assert_eq!(options.near_window, Some(3));
        assert_eq!(options.filters.date_from, Some(1850));
        assert!(options.diacritic_sensitive);
        assert_eq!(
            ordering(sort.as_deref(), desc, false, None).unwrap(),
            Ordering::Field {
                field: SortField::Date,
                descending: true
            }
        );
    }

    #[test]
    fn test_random_with_seed() {
        assert_eq!(
            ordering(None, false, true, Some(7)).unwrap(),
            Ordering::Random { seed: Some(7) }
        );
    }

    #[test]
    fn test_backfill_arguments() {
        let cli = Cli::parse_from(["laana", "backfill", "--target", "sentence", "--limit", "50", "--fresh"]);
        match cli.command {
            Commands::Backfill {
                target, limit, fresh, ..
            } => {
                assert_eq!(target.as_deref(), Some("sentence"));
                assert_eq!(limit, Some(50));
                assert!(fresh);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
