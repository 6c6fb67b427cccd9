pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bookrule")]
#[command(about = "Run book-source rules against the web", long_about = None)]
pub struct Cli {
    /// Number of sources searched concurrently (default from config, else 10)
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    /// JSON file with the source list (overrides the config file)
    #[arg(short, long, global = true)]
    pub sources: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search every enabled source for a keyword
    Search {
        /// Book title or author
        keyword: String,
    },
    /// List sources, or one source's explore menu
    Sources {
        /// Show the explore entries of this source
        #[arg(long)]
        explore: Option<String>,
    },
    /// Load one page of an explore entry
    Explore {
        /// Source URL
        source: String,
        /// Entry URL template
        entry: String,
        /// Page number
        #[arg(short, long, default_value_t = 1)]
        page: u32,
    },
    /// Show a book's detail page
    Info {
        /// Source URL
        source: String,
        /// Book detail URL
        book_url: String,
    },
    /// List a book's chapters
    Toc {
        /// Source URL
        source: String,
        /// Book detail URL
        book_url: String,
    },
    /// Print the text of one chapter
    Content {
        /// Source URL
        source: String,
        /// Chapter URL
        chapter_url: String,
        /// URL of the following chapter, where page crawling must stop
        #[arg(long)]
        next: Option<String>,
    },
}
