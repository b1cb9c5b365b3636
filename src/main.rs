use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use homedir::my_home;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::error::InquireResult;

mod books;
mod cli;
mod config;
mod covers;
mod csv_import;
mod semantic;
mod web;
use config::Config;
use semantic::{Encoder, LibraryService};

fn main() -> anyhow::Result<()> {
    init_logging();

    let args = cli::Args::parse();

    let base_path = base_path()?;
    let config = Config::load_with(&base_path)?;
    log::debug!("base path: {}", base_path.display());

    let encoder = semantic::load_encoder(&config.embedding, base_path.clone())?;
    let library = Arc::new(LibraryService::open(encoder, config.data_dir()));

    match args.command {
        cli::Command::Daemon {} => {
            log::info!(
                "serving {} books with {}",
                library.len()?,
                library.encoder().name()
            );
            web::start_daemon(library, config)
        }

        cli::Command::Ingest { path, yes } => {
            let rows = csv_import::read_library_file(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;

            let existing = library.len()?;
            if existing > 0 && !yes {
                match inquire::prompt_confirmation(format!(
                    "This replaces your library of {existing} books with {} books from {}. Continue?",
                    rows.len(),
                    path.display()
                )) {
                    InquireResult::Ok(true) => {}
                    InquireResult::Ok(false) => return Ok(()),
                    InquireResult::Err(err) => bail!("An error occurred: {}", err),
                }
            }

            let progress = ProgressBar::new(rows.len() as u64);
            progress.set_style(
                ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} books")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );

            let result = library.ingest_with_progress(&rows, &mut |done| {
                progress.set_position(done as u64);
            });
            progress.finish_and_clear();

            let books = result?;
            println!("{} books ingested", books.len());
            Ok(())
        }

        cli::Command::Similar { book_id, limit } => {
            let limit = limit.map_or(config.search.default_limit, |l| l as usize);
            let results = library.similar(&book_id, limit)?;

            if results.is_empty() && library.snapshot()?.position(&book_id).is_none() {
                log::warn!("no book with id {book_id}");
            }

            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }

        cli::Command::Search { query, limit } => {
            let limit = limit.map_or(config.search.default_limit, |l| l as usize);
            let results = library.search_concept(&query, limit)?;

            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(())
        }

        cli::Command::Clear { yes } => {
            if !yes {
                match inquire::prompt_confirmation(format!(
                    "Are you sure you want to delete your library of {} books?",
                    library.len()?
                )) {
                    InquireResult::Ok(true) => {}
                    InquireResult::Ok(false) => return Ok(()),
                    InquireResult::Err(err) => bail!("An error occurred: {}", err),
                }
            }

            library.clear()?;
            println!("Library deleted");
            Ok(())
        }

        cli::Command::Books { count } => {
            let books = library.books()?;

            if count {
                println!("{} books", books.len());
                return Ok(());
            }

            println!("{}", serde_json::to_string_pretty(&books)?);
            Ok(())
        }
    }
}

/// `RUST_LOG` wins; otherwise info.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `LIBRIS_BASE_PATH`, or ~/.local/share/libris.
fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("LIBRIS_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;

    Ok(home.join(".local/share/libris"))
}
