//! Application state shared across handlers.

use crate::config::Config;
use crate::covers::{CoverStore, SourceDigest};
use crate::db::{Database, NewBook, StoredBook};
use crate::error::{AppError, Result};
use crate::isbn::{self, OpenLibraryClient};
use crate::library::book::{self, Book, ISBN_FILE_TYPE};
use crate::library::{ScanReport, Scanner};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Cover output directory.
    pub covers: CoverStore,
    /// Open Library client.
    pub isbn: OpenLibraryClient,
    /// Whether a scan is currently in progress.
    scanning: Arc<AtomicBool>,
}

impl AppState {
    /// Create new application state with database.
    pub fn new(config: Config, db: Database) -> Result<Self> {
        let covers = CoverStore::with_quality(&config.covers.dir, config.covers.jpeg_quality);
        let isbn = OpenLibraryClient::new(&config.isbn)?;

        Ok(Self {
            config: Arc::new(config),
            db,
            covers,
            isbn,
            scanning: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Configured books directory.
    pub fn books_dir(&self) -> PathBuf {
        self.config.library.books_dir.clone()
    }

    /// Scan the books directory. Blocking; run it off the async executor.
    pub fn scan(&self) -> Result<ScanReport> {
        if self.scanning.swap(true, Ordering::SeqCst) {
            return Err(AppError::Conflict("Scan already in progress".to_string()));
        }

        let report = Scanner::new(&self.db, &self.covers)
            .recursive(self.config.library.recursive)
            .scan(&self.books_dir());

        self.scanning.store(false, Ordering::SeqCst);
        Ok(report)
    }

    /// Kick off a scan on a blocking thread without waiting for it.
    pub fn start_background_scan(&self) {
        let state = self.clone();
        tokio::task::spawn_blocking(move || match state.scan() {
            Ok(report) => tracing::info!(new = report.new_books, "Startup scan finished"),
            Err(e) => tracing::warn!(error = %e, "Startup scan failed"),
        });
    }

    /// Stored row or 404.
    pub fn stored_book(&self, id: i64) -> Result<StoredBook> {
        self.db
            .get_book(id)?
            .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))
    }

    /// API view of a stored row, with its collections.
    pub fn to_book(&self, stored: StoredBook) -> Result<Book> {
        let collections = self.db.book_collections(stored.id)?;
        Ok(Book::from_stored(stored, &collections))
    }

    /// API view of a book by ID.
    pub fn book(&self, id: i64) -> Result<Book> {
        let stored = self.stored_book(id)?;
        self.to_book(stored)
    }

    /// API views of several rows.
    pub fn to_books(&self, stored: Vec<StoredBook>) -> Result<Vec<Book>> {
        stored.into_iter().map(|b| self.to_book(b)).collect()
    }

    /// Create a book from an ISBN lookup, with a downloaded or placeholder cover.
    pub async fn add_isbn_book(&self, input: &str) -> Result<Book> {
        let isbn = isbn::normalize_isbn(input)?;
        let file_path = book::isbn_path(&isbn);

        if self.db.get_book_by_path(&file_path)?.is_some() {
            return Err(AppError::Conflict(format!(
                "Book with ISBN {} already exists",
                isbn
            )));
        }

        let record = self
            .isbn
            .lookup(&isbn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No book found for ISBN {}", isbn)))?;

        let cover_bytes = match self.isbn.fetch_cover(&record.cover_url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(isbn = %isbn, error = %e, "Cover download failed");
                None
            }
        };

        let covers = self.covers.clone();
        let title = record.title.clone();
        let digest = SourceDigest::of_bytes(isbn.as_bytes());
        let cover_path = tokio::task::spawn_blocking(move || {
            let saved = cover_bytes.and_then(|raw| match covers.save_for_digest(&raw, &digest) {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, "Downloaded cover could not be decoded");
                    None
                }
            });
            match saved {
                Some(path) => Some(path),
                None => covers.placeholder_for_digest(&title, &digest).ok(),
            }
        })
        .await
        .map_err(|e| AppError::Internal(format!("Cover task failed: {}", e)))?;

        let stored = self.db.insert_book(&NewBook {
            title: record.title,
            author: record.author,
            file_path,
            file_type: ISBN_FILE_TYPE.to_string(),
            file_size: 0,
            pages: record.pages.map(i64::from),
            cover_path: cover_path.map(|p| p.to_string_lossy().to_string()),
            isbn: Some(isbn),
        })?;

        tracing::info!(id = stored.id, title = %stored.title, "Added book from ISBN");
        self.to_book(stored)
    }
}
