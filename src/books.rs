use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_AUTHOR: &str = "Unknown Author";

/// A source row after column resolution: column name -> cell value.
pub type RawRow = HashMap<String, String>;

/// Source columns copied into a record when present, in export order.
pub const OPTIONAL_FIELDS: [&str; 8] = [
    "Average Rating",
    "My Rating",
    "Bookshelves",
    "Year Published",
    "Original Publication Year",
    "Date Read",
    "Number of Pages",
    "Publisher",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub isbn: Option<String>,

    /// Optional columns present in the source row, keyed by normalized name
    /// (`My Rating` -> `my_rating`).
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// A book annotated with its score for one query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredBook {
    #[serde(flatten)]
    pub book: Book,
    pub similarity: f32,
}

impl Book {
    /// Build the record for the row at `ordinal`.
    ///
    /// Never fails: a blank title or author becomes a placeholder.
    pub fn from_row(ordinal: usize, row: &RawRow) -> Self {
        let extra = OPTIONAL_FIELDS
            .iter()
            .filter_map(|field| cell(row, field).map(|value| (normalize_key(field), value.to_string())))
            .collect();

        Book {
            id: format!("book_{ordinal}"),
            title: cell(row, "Title").unwrap_or(UNKNOWN_TITLE).to_string(),
            author: cell(row, "Author").unwrap_or(UNKNOWN_AUTHOR).to_string(),
            isbn: cell(row, "ISBN").map(str::to_string),
            extra,
        }
    }

    /// Look up an optional attribute by its source column name.
    pub fn attribute(&self, field: &str) -> Option<&str> {
        self.extra.get(&normalize_key(field)).map(String::as_str)
    }
}

/// A cell counts as present only when it holds something besides whitespace.
pub fn cell<'a>(row: &'a RawRow, column: &str) -> Option<&'a str> {
    row.get(column)
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
}

/// `Original Publication Year` -> `original_publication_year`
pub fn normalize_key(field: &str) -> String {
    field.to_lowercase().replace(' ', "_")
}
