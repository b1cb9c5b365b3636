//! Embedding input for a book.
//!
//! The clause order and punctuation below decide what the encoder sees, and
//! therefore what "similar" means. Changing them invalidates stored vectors.

use crate::books::Book;

/// Build the text embedded for `book`:
///
/// `Title: {title}. Author: {author}.` followed, when present, by
/// ` Rating: {average_rating}.`, ` My Rating: {my_rating}.` (only for ratings
/// above zero) and ` Bookshelves: {shelves}.`
pub fn embedding_text(book: &Book) -> String {
    let mut text = format!("Title: {}. Author: {}.", book.title, book.author);

    if let Some(rating) = book.attribute("Average Rating") {
        text.push_str(&format!(" Rating: {}.", rating));
    }

    if let Some(my_rating) = book.attribute("My Rating").filter(|r| is_positive(r)) {
        text.push_str(&format!(" My Rating: {}.", my_rating));
    }

    if let Some(shelves) = book.attribute("Bookshelves") {
        text.push_str(&format!(" Bookshelves: {}.", shelves));
    }

    text
}

/// Goodreads writes `0` for unrated books.
fn is_positive(value: &str) -> bool {
    value
        .trim()
        .parse::<f64>()
        .map(|rating| rating > 0.0)
        .unwrap_or(false)
}
