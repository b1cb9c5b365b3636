//! On-disk corpus: `books.json` plus `vectors.bin`.
//!
//! File format: vectors.bin
//!
//! Header (79 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (identity of the encoder that produced the vectors)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - books_digest: [u8; 32] (SHA256 of the books.json bytes written alongside)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Body: entry_count * dimensions f32 values (little-endian, row-major), row
//! `i` belonging to the i-th record of books.json.
//!
//! The digest ties the two files together: a books.json from one save paired
//! with a vectors.bin from another is rejected on load.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::books::Book;
use crate::semantic::index::{IndexError, VectorIndex};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + books_digest(32) + checksum(4)
const HEADER_SIZE: usize = 79;

pub const BOOKS_FILE: &str = "books.json";
pub const VECTORS_FILE: &str = "vectors.bin";

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum CorpusStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid book records: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("books.json and vectors.bin were not written together")]
    PairMismatch,

    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

/// Storage manager for the persisted corpus.
pub struct CorpusStorage {
    dir: PathBuf,
}

impl CorpusStorage {
    /// Create a storage manager rooted at `dir`.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn books_path(&self) -> PathBuf {
        self.dir.join(BOOKS_FILE)
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    /// Both artifacts exist.
    pub fn exists(&self) -> bool {
        self.books_path().exists() && self.vectors_path().exists()
    }

    /// Load the corpus.
    ///
    /// # Arguments
    /// * `expected_model_id` - identity of the current encoder
    /// * `expected_dimensions` - its output dimension
    ///
    /// # Returns
    /// A populated VectorIndex, or an error if either file is missing,
    /// invalid, incompatible, or not from the same save as the other.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<VectorIndex, CorpusStorageError> {
        let books_bytes = std::fs::read(self.books_path())?;

        let file = File::open(self.vectors_path())?;
        let mut reader = BufReader::new(file);

        let header = self.read_header(&mut reader)?;
        self.validate_header(&header, expected_model_id, expected_dimensions)?;

        if header.books_digest != digest(&books_bytes) {
            return Err(CorpusStorageError::PairMismatch);
        }

        let books: Vec<Book> = serde_json::from_slice(&books_bytes)?;
        if books.len() as u64 != header.entry_count {
            return Err(CorpusStorageError::InvalidFormat(format!(
                "{} books but header declares {} vectors",
                books.len(),
                header.entry_count
            )));
        }

        let vectors = self.read_vectors(&mut reader, books.len(), expected_dimensions)?;

        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(CorpusStorageError::InvalidFormat(
                "trailing bytes after vector data".to_string(),
            ));
        }

        Ok(VectorIndex::from_flat(expected_dimensions, books, vectors)?)
    }

    /// Save the corpus.
    ///
    /// Both files are written to temp paths and fsynced before either is
    /// renamed into place.
    pub fn save(&self, index: &VectorIndex, model_id: &[u8; 32]) -> Result<(), CorpusStorageError> {
        std::fs::create_dir_all(&self.dir)?;

        let books_tmp = self.books_path().with_extension("json.tmp");
        let vectors_tmp = self.vectors_path().with_extension("bin.tmp");

        let result = self.write_books(&books_tmp, index).and_then(|books_digest| {
            self.write_vectors(&vectors_tmp, index, model_id, &books_digest)
        });

        if result.is_err() {
            let _ = std::fs::remove_file(&books_tmp);
            let _ = std::fs::remove_file(&vectors_tmp);
            return result;
        }

        std::fs::rename(&vectors_tmp, self.vectors_path())?;
        std::fs::rename(&books_tmp, self.books_path())?;

        Ok(())
    }

    /// Delete both files if they exist.
    pub fn delete(&self) -> Result<(), CorpusStorageError> {
        for path in [self.books_path(), self.vectors_path()] {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Write books.json, returning the digest of the bytes written.
    fn write_books(&self, path: &Path, index: &VectorIndex) -> Result<[u8; 32], CorpusStorageError> {
        let bytes = serde_json::to_vec(index.books())?;

        let mut file = File::create(path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        Ok(digest(&bytes))
    }

    fn write_vectors(
        &self,
        path: &Path,
        index: &VectorIndex,
        model_id: &[u8; 32],
        books_digest: &[u8; 32],
    ) -> Result<(), CorpusStorageError> {
        let dimensions = u16::try_from(index.dimensions()).map_err(|_| {
            CorpusStorageError::InvalidFormat(format!(
                "{} dimensions do not fit the header",
                index.dimensions()
            ))
        })?;

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions,
            entry_count: index.len() as u64,
            books_digest: *books_digest,
        };
        self.write_header(&mut writer, &header)?;

        for &value in index.vectors() {
            writer.write_all(&value.to_le_bytes())?;
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }

    /// Read header from file.
    fn read_header(&self, reader: &mut impl Read) -> Result<Header, CorpusStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes)?;

        let version = header_bytes[0];

        // Version check first
        if version > FORMAT_VERSION {
            return Err(CorpusStorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        let stored_checksum = u32::from_le_bytes([
            header_bytes[75],
            header_bytes[76],
            header_bytes[77],
            header_bytes[78],
        ]);

        let computed_checksum = crc32fast::hash(&header_bytes[0..75]);
        if stored_checksum != computed_checksum {
            return Err(CorpusStorageError::ChecksumMismatch);
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&header_bytes[1..33]);

        let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);

        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&header_bytes[35..43]);
        let entry_count = u64::from_le_bytes(count_bytes);

        let mut books_digest = [0u8; 32];
        books_digest.copy_from_slice(&header_bytes[43..75]);

        Ok(Header {
            version,
            model_id,
            dimensions,
            entry_count,
            books_digest,
        })
    }

    /// Validate header against expected values.
    fn validate_header(
        &self,
        header: &Header,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<(), CorpusStorageError> {
        if header.model_id != *expected_model_id {
            return Err(CorpusStorageError::ModelMismatch);
        }

        if header.dimensions as usize != expected_dimensions {
            return Err(CorpusStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        Ok(())
    }

    /// Write header to file.
    fn write_header(&self, writer: &mut impl Write, header: &Header) -> Result<(), CorpusStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = header.version;
        header_bytes[1..33].copy_from_slice(&header.model_id);
        header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
        header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());
        header_bytes[43..75].copy_from_slice(&header.books_digest);

        let checksum = crc32fast::hash(&header_bytes[0..75]);
        header_bytes[75..79].copy_from_slice(&checksum.to_le_bytes());

        writer.write_all(&header_bytes)?;
        Ok(())
    }

    fn read_vectors(
        &self,
        reader: &mut impl Read,
        count: usize,
        dimensions: usize,
    ) -> Result<Vec<f32>, CorpusStorageError> {
        let mut vectors = Vec::with_capacity(count * dimensions);
        let mut float_bytes = [0u8; 4];
        for i in 0..count * dimensions {
            reader.read_exact(&mut float_bytes)?;
            let value = f32::from_le_bytes(float_bytes);
            if !value.is_finite() {
                return Err(CorpusStorageError::InvalidFormat(format!(
                    "non-finite value in vector {} at component {}",
                    i / dimensions,
                    i % dimensions
                )));
            }
            vectors.push(value);
        }
        Ok(vectors)
    }
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
    books_digest: [u8; 32],
}
