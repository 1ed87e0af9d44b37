//! Book model exposed by the API, and the reading-state rules.

use crate::db::{self, Collection, StoredBook};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `file_type` of books added from an ISBN alone.
pub const ISBN_FILE_TYPE: &str = "isbn";

/// Highest star rating.
pub const MAX_RATING: i64 = 5;

/// Reading status derived from progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingStatus {
    /// Not started.
    Unread,
    /// Started, not finished.
    Reading,
    /// Progress reached 100%.
    Finished,
}

impl ReadingStatus {
    /// Status implied by a progress fraction.
    pub fn from_progress(progress: f64) -> Self {
        if progress >= 1.0 {
            ReadingStatus::Finished
        } else if progress > 0.0 {
            ReadingStatus::Reading
        } else {
            ReadingStatus::Unread
        }
    }

    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingStatus::Unread => "unread",
            ReadingStatus::Reading => "reading",
            ReadingStatus::Finished => "finished",
        }
    }

    /// Parse the stored representation; unknown values read as unread.
    pub fn parse(value: &str) -> Self {
        match value {
            "reading" => ReadingStatus::Reading,
            "finished" | "completed" => ReadingStatus::Finished,
            _ => ReadingStatus::Unread,
        }
    }
}

/// Validated progress change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressChange {
    /// Fraction between 0.0 and 1.0.
    pub progress: f64,
    /// Current page, when known.
    pub current_page: Option<i64>,
    /// Derived status.
    pub status: ReadingStatus,
}

impl ProgressChange {
    /// Validate `progress` and fill in the page when the book's length is known.
    pub fn new(progress: f64, current_page: Option<i64>, pages: Option<i64>) -> Result<Self> {
        if !progress.is_finite() || !(0.0..=1.0).contains(&progress) {
            return Err(AppError::InvalidInput(format!(
                "progress must be between 0.0 and 1.0, got {}",
                progress
            )));
        }
        if let Some(page) = current_page
            && page < 0
        {
            return Err(AppError::InvalidInput(format!(
                "current_page must not be negative, got {}",
                page
            )));
        }

        let current_page = current_page.or_else(|| {
            pages
                .filter(|&p| p > 0)
                .map(|p| (progress * p as f64).round() as i64)
        });

        Ok(Self {
            progress,
            current_page,
            status: ReadingStatus::from_progress(progress),
        })
    }
}

/// Check a star rating (0 clears it).
pub fn validate_rating(stars: i64) -> Result<i64> {
    if (0..=MAX_RATING).contains(&stars) {
        Ok(stars)
    } else {
        Err(AppError::InvalidInput(format!(
            "rating_stars must be between 0 and {}, got {}",
            MAX_RATING, stars
        )))
    }
}

/// Stored path of a book added by ISBN.
pub fn isbn_path(isbn: &str) -> String {
    format!("{}:{}", ISBN_FILE_TYPE, isbn)
}

/// Collection reference embedded in a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRef {
    /// Collection ID.
    pub id: i64,
    /// Collection name.
    pub name: String,
}

impl From<&Collection> for CollectionRef {
    fn from(collection: &Collection) -> Self {
        Self {
            id: collection.id,
            name: collection.name.clone(),
        }
    }
}

/// Book as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    /// Book ID.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Source path.
    pub file_path: String,
    /// `epub`, `pdf` or `isbn`.
    pub file_type: String,
    /// File size in bytes.
    pub file_size: i64,
    /// Page count.
    pub pages: Option<i64>,
    /// Cover path, servable under `/covers`.
    pub cover_path: Option<String>,
    /// Progress fraction.
    pub progress: f64,
    /// Current page.
    pub current_page: i64,
    /// Reading status.
    pub status: ReadingStatus,
    /// Star rating, 0 when unrated.
    pub rating_stars: i64,
    /// Review text.
    pub review: Option<String>,
    /// Hidden flag.
    pub hidden: bool,
    /// ISBN.
    pub isbn: Option<String>,
    /// Last update.
    pub last_updated: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Collections the book belongs to.
    pub collections: Vec<CollectionRef>,
}

impl Book {
    /// Build from a stored row and its collections.
    pub fn from_stored(stored: StoredBook, collections: &[Collection]) -> Self {
        Self {
            id: stored.id,
            title: stored.title,
            author: stored.author,
            file_path: stored.file_path,
            file_type: stored.file_type,
            file_size: stored.file_size,
            pages: stored.pages,
            cover_path: stored.cover_path,
            progress: stored.progress,
            current_page: stored.current_page,
            status: ReadingStatus::parse(&stored.status),
            rating_stars: stored.rating_stars,
            review: stored.review,
            hidden: stored.hidden,
            isbn: stored.isbn,
            last_updated: db::timestamp_to_datetime(stored.last_updated),
            created_at: db::timestamp_to_datetime(stored.created_at),
            collections: collections.iter().map(CollectionRef::from).collect(),
        }
    }
}
