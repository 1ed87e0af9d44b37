mod schema;

pub use schema::Database;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored book row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredBook {
    /// Row ID.
    pub id: i64,
    /// Book title.
    pub title: String,
    /// Author display string.
    pub author: String,
    /// Source path, or `isbn:<isbn>` for books added by ISBN.
    pub file_path: String,
    /// `epub`, `pdf` or `isbn`.
    pub file_type: String,
    /// File size in bytes (0 for ISBN books).
    pub file_size: i64,
    /// Page count, if known.
    pub pages: Option<i64>,
    /// Cover JPEG path relative to the working directory.
    pub cover_path: Option<String>,
    /// Reading progress between 0.0 and 1.0.
    pub progress: f64,
    /// Current page.
    pub current_page: i64,
    /// Reading status: "unread", "reading" or "finished".
    pub status: String,
    /// Rating, 0 when unrated.
    pub rating_stars: i64,
    /// Free-form review.
    pub review: Option<String>,
    /// Hidden from the default listing.
    pub hidden: bool,
    /// ISBN, when known.
    pub isbn: Option<String>,
    /// Last update timestamp.
    pub last_updated: i64,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Values needed to insert a book.
#[derive(Debug, Clone)]
pub struct NewBook {
    /// Book title.
    pub title: String,
    /// Author display string.
    pub author: String,
    /// Source path (unique).
    pub file_path: String,
    /// `epub`, `pdf` or `isbn`.
    pub file_type: String,
    /// File size in bytes.
    pub file_size: i64,
    /// Page count, if known.
    pub pages: Option<i64>,
    /// Cover JPEG path.
    pub cover_path: Option<String>,
    /// ISBN, when known.
    pub isbn: Option<String>,
}

/// Partial update of the reader-owned fields of a book.
#[derive(Debug, Clone, Default)]
pub struct BookUpdate {
    /// New progress (already validated).
    pub progress: Option<f64>,
    /// New current page.
    pub current_page: Option<i64>,
    /// New status, derived from progress.
    pub status: Option<String>,
    /// New rating (already validated).
    pub rating_stars: Option<i64>,
    /// New review; `Some(None)` clears it.
    pub review: Option<Option<String>>,
}

/// User-defined collection of books.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    /// Row ID.
    pub id: i64,
    /// Unique name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Number of member books.
    pub book_count: i64,
    /// Creation timestamp.
    pub created_at: i64,
}

/// Timestamp helper.
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Convert timestamp to DateTime.
pub fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}
