use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start libris as a service.
    Daemon {},

    /// Replace the library with the books in a CSV export
    Ingest {
        /// Path to the CSV file (e.g. a Goodreads export)
        path: PathBuf,

        /// Auto confirm replacing an existing library
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// Find books similar to a book in the library
    Similar {
        /// Book id, e.g. book_0
        book_id: String,

        /// Maximum number of results
        #[clap(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        limit: Option<u64>,
    },

    /// Find books matching a theme or description
    Search {
        /// Free-text description, e.g. "space opera with political intrigue"
        query: String,

        /// Maximum number of results
        #[clap(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        limit: Option<u64>,
    },

    /// Delete the library
    Clear {
        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// List the books in the library
    Books {
        /// Print the count
        #[clap(short = 'c', long, default_value = "false")]
        count: bool,
    },
}
