//! localreads: a personal e-book library manager.
//!
//! Scans a directory of EPUB and PDF files, extracts title, author, page
//! count and a cover image for each, and serves the library over a JSON API
//! with reading progress, ratings, reviews and collections.
//!
//! # Features
//!
//! - EPUB cover discovery through the package metadata, the guide and
//!   filename/size heuristics
//! - PDF metadata and first-page cover images
//! - Normalized JPEG covers named after the source file's MD5
//! - Placeholder covers when a book has none
//! - Books added from an ISBN via Open Library
//! - Collections, hidden books and reading status

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Configuration and CLI.
pub mod config;
/// Cover normalization and storage.
pub mod covers;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Book format handlers.
pub mod formats;
/// Open Library lookups.
pub mod isbn;
/// Library and book models.
pub mod library;
/// HTTP server.
pub mod server;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::AppState;
