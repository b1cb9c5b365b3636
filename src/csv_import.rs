//! Reading library exports.
//!
//! Exports from different sites name the same column differently. Each
//! required column lists its accepted spellings; the first one present in the
//! header is copied under the canonical name.

use std::io::Read;
use std::path::Path;

use crate::books::RawRow;

/// Canonical column -> accepted source names, in preference order.
pub const REQUIRED_COLUMNS: [(&str, &[&str]); 3] = [
    ("Title", &["Title", "title", "Book Title"]),
    ("Author", &["Author", "author", "Authors", "Author l-f"]),
    ("ISBN", &["ISBN", "isbn", "ISBN13", "isbn13"]),
];

#[derive(Debug, thiserror::Error)]
pub enum CsvImportError {
    #[error("Required column {0} not found")]
    MissingColumn(String),

    #[error("Invalid CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Parse CSV bytes into rows with the required columns resolved.
pub fn read_library<R: Read>(reader: R) -> Result<Vec<RawRow>, CsvImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = vec![];
    for record in csv_reader.records() {
        let record = record?;
        let row: RawRow = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| (header.clone(), unwrap_spreadsheet_guard(value).to_string()))
            .collect();
        rows.push(row);
    }

    log::debug!("read {} rows with columns {:?}", rows.len(), headers);

    resolve_columns(&headers, rows)
}

pub fn read_library_file(path: &Path) -> Result<Vec<RawRow>, CsvImportError> {
    let file = std::fs::File::open(path).map_err(csv::Error::from)?;
    read_library(file)
}

/// Copy each required column from its first matching alias.
///
/// Every returned row carries all canonical columns; a cell missing from a
/// short row becomes an empty value.
pub fn resolve_columns(headers: &[String], mut rows: Vec<RawRow>) -> Result<Vec<RawRow>, CsvImportError> {
    for (canonical, aliases) in REQUIRED_COLUMNS {
        let source = aliases
            .iter()
            .find(|alias| headers.iter().any(|header| header == *alias))
            .ok_or_else(|| CsvImportError::MissingColumn(canonical.to_string()))?;

        for row in rows.iter_mut() {
            let value = row.get(*source).cloned().unwrap_or_default();
            row.insert(canonical.to_string(), value);
        }
    }

    Ok(rows)
}

/// Goodreads writes identifiers as `="0441013597"` so spreadsheets keep the
/// leading zeros.
fn unwrap_spreadsheet_guard(value: &str) -> &str {
    value
        .strip_prefix("=\"")
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goodreads_export() {
        let csv = "Book Id,Title,Author,Author l-f,ISBN,ISBN13,My Rating,Average Rating,Bookshelves\n\
                   1,Dune,Frank Herbert,\"Herbert, Frank\",\"=\"\"0441013597\"\"\",\"=\"\"9780441013593\"\"\",5,4.27,sci-fi\n\
                   2,Emma,Jane Austen,\"Austen, Jane\",=\"\",=\"\",0,4.02,\n";

        let rows = read_library(csv.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0]["Title"], "Dune");
        assert_eq!(rows[0]["Author"], "Frank Herbert");
        assert_eq!(rows[0]["ISBN"], "0441013597");
        assert_eq!(rows[0]["ISBN13"], "9780441013593");
        assert_eq!(rows[0]["Bookshelves"], "sci-fi");

        assert_eq!(rows[1]["ISBN"], "");
        assert_eq!(rows[1]["Bookshelves"], "");
    }

    #[test]
    fn test_aliases_resolved_in_order() {
        let csv = "Book Title,Authors,Author l-f,isbn13\nDune,Frank Herbert,\"Herbert, Frank\",9780441013593\n";

        let rows = read_library(csv.as_bytes()).unwrap();
        assert_eq!(rows[0]["Title"], "Dune");
        // "Authors" comes before "Author l-f"
        assert_eq!(rows[0]["Author"], "Frank Herbert");
        assert_eq!(rows[0]["ISBN"], "9780441013593");
        // the source columns stay
        assert_eq!(rows[0]["Book Title"], "Dune");
    }

    #[test]
    fn test_missing_column() {
        let csv = "Title,Author\nDune,Frank Herbert\n";
        let result = read_library(csv.as_bytes());
        assert!(matches!(result, Err(CsvImportError::MissingColumn(ref c)) if c == "ISBN"));
    }

    #[test]
    fn test_empty_input_is_missing_title() {
        let result = read_library("".as_bytes());
        assert!(matches!(result, Err(CsvImportError::MissingColumn(ref c)) if c == "Title"));
    }

    #[test]
    fn test_header_only_has_no_rows() {
        let rows = read_library("Title,Author,ISBN\n".as_bytes()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_short_rows_get_empty_canonical_cells() {
        let csv = "Title,Author,ISBN,Publisher\nDune\n";
        let rows = read_library(csv.as_bytes()).unwrap();
        assert_eq!(rows[0]["Title"], "Dune");
        assert_eq!(rows[0]["Author"], "");
        assert_eq!(rows[0]["ISBN"], "");
        assert!(!rows[0].contains_key("Publisher"));
    }

    #[test]
    fn test_headers_are_trimmed() {
        let csv = " Title , Author ,ISBN\nDune,Herbert,1\n";
        let rows = read_library(csv.as_bytes()).unwrap();
        assert_eq!(rows[0]["Author"], "Herbert");
    }

    #[test]
    fn test_unwrap_spreadsheet_guard() {
        assert_eq!(unwrap_spreadsheet_guard("=\"123\""), "123");
        assert_eq!(unwrap_spreadsheet_guard("=\"\""), "");
        assert_eq!(unwrap_spreadsheet_guard("123"), "123");
        assert_eq!(unwrap_spreadsheet_guard("=\"open"), "=\"open");
    }
}
