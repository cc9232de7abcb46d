use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct IoArgs {
    /// Bookmark export (html), browser history (json) or a saved item list
    #[clap(short, long)]
    pub input: PathBuf,

    /// Write JSON here instead of stdout
    #[clap(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Rank bookmarks by semantic relevance to a query
    Search {
        /// Free-text query
        query: String,

        #[clap(flatten)]
        io: IoArgs,

        /// Number of results (defaults to search.top_k from config)
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Skip the completion-model rerank pass
        #[clap(long, default_value = "false")]
        no_rerank: bool,
    },

    /// Scrape every bookmark and add a summary and keywords
    Enrich {
        #[clap(flatten)]
        io: IoArgs,

        /// Only enrich bookmarks that have neither summary nor keywords
        #[clap(long, default_value = "false")]
        missing_only: bool,
    },

    /// Group bookmarks into a fixed set of categories
    Categorize {
        #[clap(flatten)]
        io: IoArgs,
    },

    /// Convert an export into a deduplicated item list
    Import {
        #[clap(flatten)]
        io: IoArgs,
    },
}
