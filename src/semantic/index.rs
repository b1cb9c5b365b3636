//! In-memory vector index with cosine similarity search.
//!
//! Books and their embeddings are stored position-aligned: row `i` of the
//! vector buffer belongs to `books[i]`. The id map only accelerates lookups
//! and is always derived from the book list.

use std::collections::HashMap;

use crate::books::{Book, ScoredBook};

/// An immutable snapshot of the corpus.
///
/// Built whole and never edited in place; ingestion builds a new one and swaps
/// it in.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    books: Vec<Book>,
    /// Row-major `[books.len(), dimensions]`
    vectors: Vec<f32>,
    dimensions: usize,
    /// Book id -> position in `books`
    positions: HashMap<String, usize>,
}

/// Search result from the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Position of the book in ingestion order
    pub position: usize,
    /// Cosine similarity score (-1.0 to 1.0)
    pub score: f32,
}

impl VectorIndex {
    /// Create a new empty vector index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            books: vec![],
            vectors: vec![],
            dimensions,
            positions: HashMap::new(),
        }
    }

    /// Stack per-book vectors into an index.
    pub fn from_parts(
        dimensions: usize,
        books: Vec<Book>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        if books.len() != vectors.len() {
            return Err(IndexError::LengthMismatch {
                books: books.len(),
                vectors: vectors.len(),
            });
        }

        let mut flat = Vec::with_capacity(vectors.len() * dimensions);
        for vector in vectors {
            if vector.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    got: vector.len(),
                });
            }
            flat.extend(vector);
        }

        Self::from_flat(dimensions, books, flat)
    }

    /// Build an index over an already-stacked vector buffer.
    pub fn from_flat(
        dimensions: usize,
        books: Vec<Book>,
        vectors: Vec<f32>,
    ) -> Result<Self, IndexError> {
        if dimensions == 0 {
            return Err(IndexError::DimensionMismatch {
                expected: 1,
                got: 0,
            });
        }

        if vectors.len() != books.len() * dimensions {
            return Err(IndexError::LengthMismatch {
                books: books.len(),
                vectors: vectors.len() / dimensions,
            });
        }

        let mut positions = HashMap::with_capacity(books.len());
        for (position, book) in books.iter().enumerate() {
            if positions.insert(book.id.clone(), position).is_some() {
                return Err(IndexError::DuplicateId(book.id.clone()));
            }
        }

        Ok(Self {
            books,
            vectors,
            dimensions,
            positions,
        })
    }

    /// Get the expected embedding dimensions.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Get the number of books in the index.
    pub fn len(&self) -> usize {
        self.books.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// All books in ingestion order.
    pub fn books(&self) -> &[Book] {
        &self.books
    }

    /// The stacked vector buffer.
    pub fn vectors(&self) -> &[f32] {
        &self.vectors
    }

    /// Vector stored at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimensions)?;
        self.vectors.get(start..start + self.dimensions)
    }

    /// Position of the book with this id.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Get a book by id.
    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<&Book> {
        self.position(id).and_then(|position| self.books.get(position))
    }

    /// Books most similar to the book with `id`, excluding that book.
    ///
    /// An unknown id or an empty index yields no results.
    pub fn similar_to(&self, id: &str, limit: usize) -> Vec<ScoredBook> {
        let Some(position) = self.position(id) else {
            return vec![];
        };
        let Some(query) = self.vector(position) else {
            return vec![];
        };

        let results = self.rank(query, Some(position), limit);
        self.annotate(results)
    }

    /// Books most similar to an arbitrary query vector.
    pub fn query(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredBook>, IndexError> {
        Ok(self.annotate(self.search(query, limit)?))
    }

    /// Rank every stored vector against `query`.
    ///
    /// # Returns
    /// At most `limit` results sorted by score (highest first); equal scores
    /// keep ingestion order.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchResult>, IndexError> {
        if self.is_empty() {
            return Ok(vec![]);
        }

        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        Ok(self.rank(query, None, limit))
    }

    fn rank(&self, query: &[f32], exclude: Option<usize>, limit: usize) -> Vec<SearchResult> {
        let query_norm = l2_norm(query);

        let mut results: Vec<SearchResult> = self
            .vectors
            .chunks_exact(self.dimensions)
            .enumerate()
            .filter(|(position, _)| Some(*position) != exclude)
            .map(|(position, target)| SearchResult {
                position,
                score: cosine_similarity(query, query_norm, target),
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.position.cmp(&b.position))
        });

        results.truncate(limit);
        results
    }

    fn annotate(&self, results: Vec<SearchResult>) -> Vec<ScoredBook> {
        results
            .into_iter()
            .filter_map(|result| {
                self.books.get(result.position).map(|book| ScoredBook {
                    book: book.clone(),
                    similarity: result.score,
                })
            })
            .collect()
    }
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity with a precomputed query norm.
/// Zero-magnitude vectors are similar to nothing: the score is 0. So are
/// vectors holding NaN or infinite components.
fn cosine_similarity(query: &[f32], query_norm: f32, target: &[f32]) -> f32 {
    let target_norm = l2_norm(target);
    if !(query_norm >= f32::EPSILON && target_norm >= f32::EPSILON) {
        return 0.0;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    let score = dot_product / (query_norm * target_norm);
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("{books} books but {vectors} vectors")]
    LengthMismatch { books: usize, vectors: usize },

    #[error("Duplicate book id: {0}")]
    DuplicateId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(id: &str) -> Book {
        Book {
            id: id.to_string(),
            title: format!("Title {id}"),
            author: "Author".to_string(),
            ..Default::default()
        }
    }

    fn index(vectors: Vec<Vec<f32>>) -> VectorIndex {
        let books = (0..vectors.len()).map(|i| book(&format!("book_{i}"))).collect();
        VectorIndex::from_parts(3, books, vectors).unwrap()
    }

    fn ids(results: &[ScoredBook]) -> Vec<&str> {
        results.iter().map(|r| r.book.id.as_str()).collect()
    }

    #[test]
    fn test_new_index() {
        let index = VectorIndex::new(384);
        assert_eq!(index.dimensions(), 384);
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_positions_match_books() {
        let index = index(vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.vectors().len(), 2 * 3);

        for (position, book) in index.books().iter().enumerate() {
            assert_eq!(index.position(&book.id), Some(position));
            assert_eq!(index.get(&book.id), Some(book));
        }
        assert_eq!(index.vector(1), Some(&[0.0, 1.0, 0.0][..]));
        assert_eq!(index.vector(2), None);
    }

    #[test]
    fn test_from_parts_length_mismatch() {
        let result = VectorIndex::from_parts(3, vec![book("a")], vec![]);
        assert!(matches!(result, Err(IndexError::LengthMismatch { books: 1, vectors: 0 })));
    }

    #[test]
    fn test_from_parts_dimension_mismatch() {
        let result = VectorIndex::from_parts(3, vec![book("a")], vec![vec![1.0, 0.0]]);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = VectorIndex::from_parts(
            3,
            vec![book("a"), book("a")],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
        );
        assert!(matches!(result, Err(IndexError::DuplicateId(_))));
    }

    #[test]
    fn test_search_ranks_descending() {
        let index = index(vec![
            vec![0.0, 1.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![1.0, 1.0, 0.0],
        ]);

        let results = index.query(&[1.0, 0.1, 0.0], 10).unwrap();
        assert_eq!(ids(&results), vec!["book_1", "book_2", "book_0"]);
        assert!(results
            .windows(2)
            .all(|pair| pair[0].similarity >= pair[1].similarity));
    }

    #[test]
    fn test_search_with_limit() {
        let index = index((0..10).map(|i| vec![1.0, i as f32 * 0.1, 0.0]).collect());
        let results = index.search(&[1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_ties_keep_ingestion_order() {
        let index = index(vec![
            vec![0.0, 0.0, 1.0],
            vec![2.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![3.0, 0.0, 0.0],
        ]);

        let results = index.query(&[1.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(ids(&results), vec!["book_1", "book_2", "book_3", "book_0"]);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let index = index(vec![vec![0.0, 0.0, 0.0], vec![1.0, 0.0, 0.0]]);

        let results = index.query(&[1.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(results[1].book.id, "book_0");
        assert_eq!(results[1].similarity, 0.0);

        let results = index.query(&[0.0, 0.0, 0.0], 10).unwrap();
        assert!(results.iter().all(|r| r.similarity == 0.0));
        assert_eq!(ids(&results), vec!["book_0", "book_1"]);
    }

    #[test]
    fn test_similar_excludes_anchor() {
        let index = index(vec![
            vec![1.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![0.9, 0.1, 0.0],
        ]);

        for book in index.books() {
            let results = index.similar_to(&book.id, 10);
            assert_eq!(results.len(), 2);
            assert!(!results.iter().any(|r| r.book.id == book.id));
        }

        // the duplicate vector wins, then the near one
        assert_eq!(ids(&index.similar_to("book_0", 10)), vec!["book_1", "book_2"]);
    }

    #[test]
    fn test_similar_unknown_id() {
        let index = index(vec![vec![1.0, 0.0, 0.0]]);
        assert!(index.similar_to("book_9", 10).is_empty());
    }

    #[test]
    fn test_empty_index_queries() {
        let index = VectorIndex::new(3);
        assert!(index.similar_to("book_0", 10).is_empty());
        assert!(index.query(&[1.0, 0.0, 0.0], 10).unwrap().is_empty());
        // no query vector is too wrong for an empty corpus
        assert!(index.query(&[1.0], 10).unwrap().is_empty());
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let index = index(vec![vec![1.0, 0.0, 0.0]]);
        let result = index.query(&[1.0, 0.0], 10);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_non_finite_vectors_rank_as_unrelated() {
        let vectors: Vec<Vec<f32>> = (0..64)
            .map(|i| match i % 3 {
                0 => vec![f32::NAN, 0.0, 0.0],
                1 => vec![f32::INFINITY, 1.0, 0.0],
                _ => vec![1.0, i as f32 * 0.01, 0.0],
            })
            .collect();
        let index = index(vectors);

        let results = index.query(&[1.0, 0.0, 0.0], 64).unwrap();
        assert_eq!(results.len(), 64);
        assert!(results.iter().all(|r| r.similarity.is_finite()));
        assert!(results
            .windows(2)
            .all(|pair| pair[0].similarity >= pair[1].similarity));
        assert_eq!(results[0].book.id, "book_2");

        let results = index.similar_to("book_0", 64);
        assert!(results.iter().all(|r| r.similarity == 0.0));
        assert_eq!(results[0].book.id, "book_1");
    }

    #[test]
    fn test_scores_carry_through() {
        let index = index(vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
        let results = index.query(&[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].similarity - 1.0).abs() < 1e-6);
    }
}
