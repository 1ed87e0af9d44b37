use crate::db::*;
use crate::error::{AppError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::Arc;

const BOOK_COLUMNS: &str = "id, title, author, file_path, file_type, file_size, pages, cover_path,
     progress, current_page, status, rating_stars, review, hidden, isbn, last_updated, created_at";

const COLLECTION_COLUMNS: &str = "c.id, c.name, c.description,
     (SELECT COUNT(*) FROM book_collections bc WHERE bc.collection_id = c.id), c.created_at";

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<StoredBook> {
    Ok(StoredBook {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        file_path: row.get(3)?,
        file_type: row.get(4)?,
        file_size: row.get(5)?,
        pages: row.get(6)?,
        cover_path: row.get(7)?,
        progress: row.get(8)?,
        current_page: row.get(9)?,
        status: row.get(10)?,
        rating_stars: row.get(11)?,
        review: row.get(12)?,
        hidden: row.get(13)?,
        isbn: row.get(14)?,
        last_updated: row.get(15)?,
        created_at: row.get(16)?,
    })
}

fn collection_from_row(row: &Row<'_>) -> rusqlite::Result<Collection> {
    Ok(Collection {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        book_count: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Database wrapper for thread-safe access.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Internal(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- Books table
            CREATE TABLE IF NOT EXISTS books (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                author TEXT NOT NULL DEFAULT 'Unknown Author',
                file_path TEXT NOT NULL UNIQUE,
                file_type TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                pages INTEGER,
                cover_path TEXT,
                progress REAL NOT NULL DEFAULT 0,
                current_page INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'unread',
                rating_stars INTEGER NOT NULL DEFAULT 0,
                review TEXT,
                hidden INTEGER NOT NULL DEFAULT 0,
                isbn TEXT,
                last_updated INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            -- Collections table
            CREATE TABLE IF NOT EXISTS collections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                created_at INTEGER NOT NULL
            );

            -- Collection membership
            CREATE TABLE IF NOT EXISTS book_collections (
                book_id INTEGER NOT NULL,
                collection_id INTEGER NOT NULL,
                added_at INTEGER NOT NULL,
                PRIMARY KEY (book_id, collection_id),
                FOREIGN KEY (book_id) REFERENCES books(id) ON DELETE CASCADE,
                FOREIGN KEY (collection_id) REFERENCES collections(id) ON DELETE CASCADE
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_books_hidden ON books(hidden);
            CREATE INDEX IF NOT EXISTS idx_book_collections_collection ON book_collections(collection_id);
            "#,
        )
        .map_err(|e| AppError::Internal(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    // ========== BOOK OPERATIONS ==========

    fn fetch_book(conn: &Connection, id: i64) -> Result<Option<StoredBook>> {
        conn.query_row(
            &format!("SELECT {} FROM books WHERE id = ?1", BOOK_COLUMNS),
            params![id],
            book_from_row,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
    }

    fn query_books(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<StoredBook>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let books = stmt
            .query_map(params, book_from_row)
            .map_err(|e| AppError::Internal(format!("Failed to list books: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect books: {}", e)))?;

        Ok(books)
    }

    /// Insert a new book and return the stored row.
    pub fn insert_book(&self, book: &NewBook) -> Result<StoredBook> {
        let conn = self.conn.lock();
        let now = now_timestamp();

        conn.execute(
            "INSERT INTO books (title, author, file_path, file_type, file_size, pages, cover_path,
                                isbn, last_updated, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                book.title,
                book.author,
                book.file_path,
                book.file_type,
                book.file_size,
                book.pages,
                book.cover_path,
                book.isbn,
                now,
                now,
            ],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Conflict(format!("Book already exists: {}", book.file_path))
            } else {
                AppError::Internal(format!("Failed to create book: {}", e))
            }
        })?;

        let id = conn.last_insert_rowid();
        Self::fetch_book(&conn, id)?
            .ok_or_else(|| AppError::Internal(format!("Book {} vanished after insert", id)))
    }

    /// Get book by ID.
    pub fn get_book(&self, id: i64) -> Result<Option<StoredBook>> {
        let conn = self.conn.lock();
        Self::fetch_book(&conn, id)
    }

    /// Get book by source path.
    pub fn get_book_by_path(&self, file_path: &str) -> Result<Option<StoredBook>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {} FROM books WHERE file_path = ?1", BOOK_COLUMNS),
            params![file_path],
            book_from_row,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get book: {}", e)))
    }

    /// List books ordered by ID.
    pub fn list_books(&self, skip: i64, limit: i64, include_hidden: bool) -> Result<Vec<StoredBook>> {
        let conn = self.conn.lock();
        let filter = if include_hidden { "" } else { "WHERE hidden = 0" };
        Self::query_books(
            &conn,
            &format!(
                "SELECT {} FROM books {} ORDER BY id LIMIT ?1 OFFSET ?2",
                BOOK_COLUMNS, filter
            ),
            params![limit, skip],
        )
    }

    /// List hidden books.
    pub fn list_hidden_books(&self) -> Result<Vec<StoredBook>> {
        let conn = self.conn.lock();
        Self::query_books(
            &conn,
            &format!("SELECT {} FROM books WHERE hidden = 1 ORDER BY id", BOOK_COLUMNS),
            [],
        )
    }

    /// Count all books.
    pub fn count_books(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM books", [], |row| row.get(0))
            .map_err(|e| AppError::Internal(format!("Failed to count books: {}", e)))
    }

    /// Apply a partial update. Returns `None` when the book does not exist.
    pub fn update_book(&self, id: i64, update: &BookUpdate) -> Result<Option<StoredBook>> {
        let conn = self.conn.lock();
        let Some(mut book) = Self::fetch_book(&conn, id)? else {
            return Ok(None);
        };

        if let Some(progress) = update.progress {
            book.progress = progress;
        }
        if let Some(current_page) = update.current_page {
            book.current_page = current_page;
        }
        if let Some(ref status) = update.status {
            book.status = status.clone();
        }
        if let Some(rating) = update.rating_stars {
            book.rating_stars = rating;
        }
        if let Some(ref review) = update.review {
            book.review = review.clone();
        }
        book.last_updated = now_timestamp();

        conn.execute(
            "UPDATE books SET progress = ?1, current_page = ?2, status = ?3, rating_stars = ?4,
                              review = ?5, last_updated = ?6
             WHERE id = ?7",
            params![
                book.progress,
                book.current_page,
                book.status,
                book.rating_stars,
                book.review,
                book.last_updated,
                id,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to update book: {}", e)))?;

        Ok(Some(book))
    }

    /// Set or clear the hidden flag. Returns `None` when the book does not exist.
    pub fn set_hidden(&self, id: i64, hidden: bool) -> Result<Option<StoredBook>> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "UPDATE books SET hidden = ?1, last_updated = ?2 WHERE id = ?3",
                params![hidden, now_timestamp(), id],
            )
            .map_err(|e| AppError::Internal(format!("Failed to update book: {}", e)))?;

        if rows == 0 {
            return Ok(None);
        }
        Self::fetch_book(&conn, id)
    }

    /// Delete a book record.
    pub fn delete_book(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM books WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete book: {}", e)))?;
        Ok(rows > 0)
    }

    // ========== COLLECTION OPERATIONS ==========

    fn fetch_collection(conn: &Connection, id: i64) -> Result<Option<Collection>> {
        conn.query_row(
            &format!("SELECT {} FROM collections c WHERE c.id = ?1", COLLECTION_COLUMNS),
            params![id],
            collection_from_row,
        )
        .optional()
        .map_err(|e| AppError::Internal(format!("Failed to get collection: {}", e)))
    }

    fn query_collections(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Collection>> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {}", e)))?;

        let collections = stmt
            .query_map(params, collection_from_row)
            .map_err(|e| AppError::Internal(format!("Failed to list collections: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect collections: {}", e)))?;

        Ok(collections)
    }

    /// Create a collection.
    pub fn create_collection(&self, name: &str, description: Option<&str>) -> Result<Collection> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO collections (name, description, created_at) VALUES (?1, ?2, ?3)",
            params![name, description, now_timestamp()],
        )
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint") {
                AppError::Conflict(format!("Collection '{}' already exists", name))
            } else {
                AppError::Internal(format!("Failed to create collection: {}", e))
            }
        })?;

        let id = conn.last_insert_rowid();
        Self::fetch_collection(&conn, id)?
            .ok_or_else(|| AppError::Internal(format!("Collection {} vanished after insert", id)))
    }

    /// List collections by name.
    pub fn list_collections(&self) -> Result<Vec<Collection>> {
        let conn = self.conn.lock();
        Self::query_collections(
            &conn,
            &format!("SELECT {} FROM collections c ORDER BY c.name", COLLECTION_COLUMNS),
            [],
        )
    }

    /// Get collection by ID.
    pub fn get_collection(&self, id: i64) -> Result<Option<Collection>> {
        let conn = self.conn.lock();
        Self::fetch_collection(&conn, id)
    }

    /// Delete a collection; memberships go with it.
    pub fn delete_collection(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute("DELETE FROM collections WHERE id = ?1", params![id])
            .map_err(|e| AppError::Internal(format!("Failed to delete collection: {}", e)))?;
        Ok(rows > 0)
    }

    /// Add a book to a collection. Returns false when it was already a member.
    pub fn add_book_to_collection(&self, collection_id: i64, book_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "INSERT OR IGNORE INTO book_collections (book_id, collection_id, added_at)
                 VALUES (?1, ?2, ?3)",
                params![book_id, collection_id, now_timestamp()],
            )
            .map_err(|e| AppError::Internal(format!("Failed to add book to collection: {}", e)))?;
        Ok(rows > 0)
    }

    /// Remove a book from a collection. Returns false when it was not a member.
    pub fn remove_book_from_collection(&self, collection_id: i64, book_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn
            .execute(
                "DELETE FROM book_collections WHERE book_id = ?1 AND collection_id = ?2",
                params![book_id, collection_id],
            )
            .map_err(|e| {
                AppError::Internal(format!("Failed to remove book from collection: {}", e))
            })?;
        Ok(rows > 0)
    }

    /// Books of a collection, in the order they were added.
    pub fn collection_books(&self, collection_id: i64) -> Result<Vec<StoredBook>> {
        let conn = self.conn.lock();
        let columns = BOOK_COLUMNS
            .split(',')
            .map(|c| format!("b.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        Self::query_books(
            &conn,
            &format!(
                "SELECT {} FROM books b
                 JOIN book_collections bc ON bc.book_id = b.id
                 WHERE bc.collection_id = ?1
                 ORDER BY bc.added_at, b.id",
                columns
            ),
            params![collection_id],
        )
    }

    /// Collections a book belongs to.
    pub fn book_collections(&self, book_id: i64) -> Result<Vec<Collection>> {
        let conn = self.conn.lock();
        Self::query_collections(
            &conn,
            &format!(
                "SELECT {} FROM collections c
                 JOIN book_collections m ON m.collection_id = c.id
                 WHERE m.book_id = ?1
                 ORDER BY c.name",
                COLLECTION_COLUMNS
            ),
            params![book_id],
        )
    }
}
