//! Semantic similarity over a book library.
//!
//! This module turns books into embeddings and ranks them by cosine
//! similarity, either against another book or against a free-text theme.
//!
//! # Architecture
//!
//! - `embeddings`: The `Encoder` trait, fastembed and hashing backends
//! - `index`: In-memory vector index with cosine similarity search
//! - `storage`: books.json + vectors.bin persistence
//! - `preprocess`: The text each book is embedded as
//! - `service`: The library state container used by the CLI and daemon

pub mod embeddings;
mod index;
mod preprocess;
mod service;
mod storage;

pub use embeddings::{load_encoder, EmbeddingError, Encoder, HashingEncoder};
pub use service::{LibraryError, LibraryService};
