//! The library: one corpus, its encoder and its files.
//!
//! - Ingestion builds a complete new index off to the side, then swaps it in
//! - Queries take a snapshot of the current index and rank outside the lock
//! - The corpus is written to disk after every ingestion and read back on open

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use crate::books::{Book, RawRow, ScoredBook};
use crate::csv_import::REQUIRED_COLUMNS;
use crate::semantic::embeddings::{EmbeddingError, Encoder};
use crate::semantic::index::{IndexError, VectorIndex};
use crate::semantic::preprocess::embedding_text;
use crate::semantic::storage::{CorpusStorage, CorpusStorageError};

/// Errors that can occur during library operations.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("Required column {column} not found in row {row}")]
    MissingColumn { row: usize, column: String },

    #[error("Embedding error: {0}")]
    Encoding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Library was updated but could not be saved: {0}")]
    Persistence(#[from] CorpusStorageError),

    #[error("limit must be a positive integer")]
    InvalidLimit,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Service owning the in-memory corpus.
///
/// Thread-safe: queries share the current snapshot, ingestions are serialized.
pub struct LibraryService {
    encoder: Arc<dyn Encoder>,
    storage: CorpusStorage,
    /// Current corpus. Replaced wholesale, never mutated.
    state: RwLock<Arc<VectorIndex>>,
    /// Held for the whole of an ingestion so saves land in swap order.
    ingest_lock: Mutex<()>,
}

impl LibraryService {
    /// Open the library stored in `data_dir`.
    ///
    /// Loading is best-effort: missing, damaged or incompatible files leave
    /// the library empty rather than failing startup.
    pub fn open(encoder: Arc<dyn Encoder>, data_dir: PathBuf) -> Self {
        let storage = CorpusStorage::new(data_dir);
        let dimensions = encoder.dimensions();

        let index = if storage.exists() {
            match storage.load(&encoder.model_id_hash(), dimensions) {
                Ok(index) => {
                    log::info!("Loaded {} books from {}", index.len(), storage.books_path().display());
                    index
                }
                Err(CorpusStorageError::ModelMismatch) => {
                    log::warn!("Stored vectors come from a different model, starting empty");
                    VectorIndex::new(dimensions)
                }
                Err(err) => {
                    log::error!("Failed to load library, starting empty: {}", err);
                    VectorIndex::new(dimensions)
                }
            }
        } else {
            log::info!("No existing library, starting empty");
            VectorIndex::new(dimensions)
        };

        Self {
            encoder,
            storage,
            state: RwLock::new(Arc::new(index)),
            ingest_lock: Mutex::new(()),
        }
    }

    pub fn encoder(&self) -> &dyn Encoder {
        self.encoder.as_ref()
    }

    /// The current corpus.
    ///
    /// The snapshot stays valid (and unchanged) even if an ingestion replaces
    /// the corpus while the caller holds it.
    pub fn snapshot(&self) -> Result<Arc<VectorIndex>, LibraryError> {
        self.state
            .read()
            .map(|guard| Arc::clone(&*guard))
            .map_err(|e| LibraryError::Internal(format!("Lock poisoned: {}", e)))
    }

    /// All books in ingestion order.
    pub fn books(&self) -> Result<Vec<Book>, LibraryError> {
        Ok(self.snapshot()?.books().to_vec())
    }

    pub fn len(&self) -> Result<usize, LibraryError> {
        Ok(self.snapshot()?.len())
    }

    /// Replace the library with `rows`.
    ///
    /// Returns the new book records. On failure before the swap the previous
    /// library is untouched; a `Persistence` error means the new library is
    /// live but not on disk.
    pub fn ingest(&self, rows: &[RawRow]) -> Result<Vec<Book>, LibraryError> {
        self.ingest_with_progress(rows, &mut |_| {})
    }

    /// Same as `ingest`, reporting how many books have been encoded so far.
    pub fn ingest_with_progress(
        &self,
        rows: &[RawRow],
        on_chunk: &mut dyn FnMut(usize),
    ) -> Result<Vec<Book>, LibraryError> {
        let _ingesting = self
            .ingest_lock
            .lock()
            .map_err(|e| LibraryError::Internal(format!("Lock poisoned: {}", e)))?;

        let now = Instant::now();

        for (row_number, row) in rows.iter().enumerate() {
            if let Some((column, _)) = REQUIRED_COLUMNS
                .iter()
                .find(|(column, _)| !row.contains_key(*column))
            {
                return Err(LibraryError::MissingColumn {
                    row: row_number,
                    column: column.to_string(),
                });
            }
        }

        let books: Vec<Book> = rows
            .iter()
            .enumerate()
            .map(|(ordinal, row)| Book::from_row(ordinal, row))
            .collect();
        let texts: Vec<String> = books.iter().map(embedding_text).collect();

        let vectors = self.encoder.encode_batch_with_progress(&texts, on_chunk)?;
        let index = Arc::new(VectorIndex::from_parts(
            self.encoder.dimensions(),
            books,
            vectors,
        )?);

        {
            let mut state = self
                .state
                .write()
                .map_err(|e| LibraryError::Internal(format!("Lock poisoned: {}", e)))?;
            *state = Arc::clone(&index);
        }

        log::info!(
            "Ingested {} books in {:.2?}",
            index.len(),
            now.elapsed()
        );

        self.storage.save(&index, &self.encoder.model_id_hash())?;

        Ok(index.books().to_vec())
    }

    /// Empty the library and delete its files.
    pub fn clear(&self) -> Result<(), LibraryError> {
        let _ingesting = self
            .ingest_lock
            .lock()
            .map_err(|e| LibraryError::Internal(format!("Lock poisoned: {}", e)))?;

        {
            let mut state = self
                .state
                .write()
                .map_err(|e| LibraryError::Internal(format!("Lock poisoned: {}", e)))?;
            *state = Arc::new(VectorIndex::new(self.encoder.dimensions()));
        }

        self.storage.delete()?;
        log::info!("Library cleared");

        Ok(())
    }

    /// Books most similar to the book `id`, never including that book.
    ///
    /// An unknown id or an empty library gives an empty list.
    pub fn similar(&self, id: &str, limit: usize) -> Result<Vec<ScoredBook>, LibraryError> {
        if limit == 0 {
            return Err(LibraryError::InvalidLimit);
        }

        let index = self.snapshot()?;
        if index.position(id).is_none() {
            log::debug!("similar: unknown book id {id}");
        }
        Ok(index.similar_to(id, limit))
    }

    /// Books matching a free-text theme.
    pub fn search_concept(&self, query: &str, limit: usize) -> Result<Vec<ScoredBook>, LibraryError> {
        if limit == 0 {
            return Err(LibraryError::InvalidLimit);
        }

        let index = self.snapshot()?;
        if index.is_empty() {
            return Ok(vec![]);
        }

        let query_vector = self.encoder.encode_one(query)?;
        Ok(index.query(&query_vector, limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::embeddings::HashingEncoder;

    fn row(title: &str, author: &str) -> RawRow {
        RawRow::from([
            ("Title".to_string(), title.to_string()),
            ("Author".to_string(), author.to_string()),
            ("ISBN".to_string(), String::new()),
        ])
    }

    fn service(dir: &tempfile::TempDir) -> LibraryService {
        LibraryService::open(
            Arc::new(HashingEncoder::new(256, 2)),
            dir.path().to_path_buf(),
        )
    }

    #[test]
    fn test_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let library = service(&dir);
        assert_eq!(library.len().unwrap(), 0);
        assert!(library.books().unwrap().is_empty());
    }

    #[test]
    fn test_ingest_assigns_ordinal_ids() {
        let dir = tempfile::tempdir().unwrap();
        let library = service(&dir);

        let books = library
            .ingest(&[row("Dune", "Herbert"), row("", ""), row("Emma", "Austen")])
            .unwrap();

        let ids: Vec<_> = books.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["book_0", "book_1", "book_2"]);
        assert_eq!(books[1].title, "Unknown Title");
        assert_eq!(library.books().unwrap(), books);
    }

    #[test]
    fn test_ingest_replaces_library() {
        let dir = tempfile::tempdir().unwrap();
        let library = service(&dir);

        library
            .ingest(&[row("Dune", "Herbert"), row("Emma", "Austen"), row("Ulysses", "Joyce")])
            .unwrap();
        let before = library.snapshot().unwrap();

        library.ingest(&[row("Beloved", "Morrison")]).unwrap();

        let books = library.books().unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].title, "Beloved");
        assert!(library.similar("book_2", 10).unwrap().is_empty());

        // snapshots taken earlier are unaffected
        assert_eq!(before.len(), 3);
    }

    #[test]
    fn test_missing_column_keeps_previous_library() {
        let dir = tempfile::tempdir().unwrap();
        let library = service(&dir);
        library.ingest(&[row("Dune", "Herbert")]).unwrap();

        let mut broken = row("Emma", "Austen");
        broken.remove("ISBN");

        let result = library.ingest(&[row("Beloved", "Morrison"), broken]);
        assert!(matches!(
            result,
            Err(LibraryError::MissingColumn { row: 1, ref column }) if column == "ISBN"
        ));
        assert_eq!(library.books().unwrap()[0].title, "Dune");
    }

    #[test]
    fn test_clear_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let library = service(&dir);
        library.ingest(&[row("Dune", "Herbert")]).unwrap();
        assert!(dir.path().join("books.json").exists());

        library.clear().unwrap();
        assert_eq!(library.len().unwrap(), 0);
        assert!(!dir.path().join("books.json").exists());
        assert!(!dir.path().join("vectors.bin").exists());

        // reopening finds nothing
        assert_eq!(service(&dir).len().unwrap(), 0);
    }

    #[test]
    fn test_zero_limit_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let library = service(&dir);
        assert!(matches!(library.similar("book_0", 0), Err(LibraryError::InvalidLimit)));
        assert!(matches!(
            library.search_concept("anything", 0),
            Err(LibraryError::InvalidLimit)
        ));
    }

    #[test]
    fn test_persistence_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let library = LibraryService::open(Arc::new(HashingEncoder::new(64, 8)), blocker);
        let result = library.ingest(&[row("Dune", "Herbert")]);

        assert!(matches!(result, Err(LibraryError::Persistence(_))));
        // the new library is live even though it wasn't saved
        assert_eq!(library.len().unwrap(), 1);
    }
}
