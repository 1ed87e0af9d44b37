//! HTTP request handlers.

use crate::config::BookFormat;
use crate::db::{BookUpdate, Collection};
use crate::error::{AppError, Result};
use crate::library::ScanReport;
use crate::library::book::{self, Book, ProgressChange};
use crate::server::AppState;
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::io::ReaderStream;

const DEFAULT_PAGE_SIZE: i64 = 100;

// ============================================================================
// SERVICE
// ============================================================================

/// Banner.
pub async fn index(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": format!("Welcome to the {} API", state.config.server.title)
    }))
}

/// Liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Scan the books directory.
pub async fn scan(State(state): State<AppState>) -> Result<Json<ScanReport>> {
    let report = tokio::task::spawn_blocking(move || state.scan())
        .await
        .map_err(|e| AppError::Internal(format!("Scan task failed: {}", e)))??;

    Ok(Json(report))
}

// ============================================================================
// BOOKS
// ============================================================================

/// Listing parameters.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    skip: Option<i64>,
    limit: Option<i64>,
    #[serde(default)]
    include_hidden: bool,
}

/// List books.
pub async fn list_books(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Book>>> {
    let skip = params.skip.unwrap_or(0).max(0);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).max(0);

    let stored = state.db.list_books(skip, limit, params.include_hidden)?;
    Ok(Json(state.to_books(stored)?))
}

/// List hidden books.
pub async fn hidden_books(State(state): State<AppState>) -> Result<Json<Vec<Book>>> {
    let stored = state.db.list_hidden_books()?;
    Ok(Json(state.to_books(stored)?))
}

/// One book with its collections.
pub async fn get_book(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Book>> {
    Ok(Json(state.book(id)?))
}

/// Partial update of reader-owned fields.
#[derive(Debug, Default, Deserialize)]
pub struct BookPatch {
    progress: Option<f64>,
    current_page: Option<i64>,
    rating_stars: Option<i64>,
    review: Option<String>,
}

/// Update progress, rating and review in one request.
pub async fn update_book(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<BookPatch>,
) -> Result<Json<Book>> {
    let stored = state.stored_book(id)?;
    let mut update = BookUpdate::default();

    if let Some(progress) = patch.progress {
        let change = ProgressChange::new(progress, patch.current_page, stored.pages)?;
        apply_progress(&mut update, change);
    } else if let Some(page) = patch.current_page {
        if page < 0 {
            return Err(AppError::InvalidInput(format!(
                "current_page must not be negative, got {}",
                page
            )));
        }
        update.current_page = Some(page);
    }

    if let Some(stars) = patch.rating_stars {
        update.rating_stars = Some(book::validate_rating(stars)?);
    }

    if let Some(review) = patch.review {
        let review = review.trim().to_string();
        update.review = Some((!review.is_empty()).then_some(review));
    }

    save_update(&state, id, &update)
}

/// Progress update body.
#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    progress: f64,
    current_page: Option<i64>,
}

/// Update reading progress; status follows.
pub async fn update_progress(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ProgressRequest>,
) -> Result<Json<Book>> {
    let stored = state.stored_book(id)?;
    let change = ProgressChange::new(req.progress, req.current_page, stored.pages)?;

    let mut update = BookUpdate::default();
    apply_progress(&mut update, change);
    save_update(&state, id, &update)
}

/// Rating update body.
#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    rating_stars: i64,
}

/// Set the star rating.
pub async fn update_rating(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<RatingRequest>,
) -> Result<Json<Book>> {
    let update = BookUpdate {
        rating_stars: Some(book::validate_rating(req.rating_stars)?),
        ..Default::default()
    };
    save_update(&state, id, &update)
}

fn apply_progress(update: &mut BookUpdate, change: ProgressChange) {
    update.progress = Some(change.progress);
    update.current_page = change.current_page;
    update.status = Some(change.status.as_str().to_string());
}

fn save_update(state: &AppState, id: i64, update: &BookUpdate) -> Result<Json<Book>> {
    let stored = state
        .db
        .update_book(id, update)?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;

    Ok(Json(state.to_book(stored)?))
}

/// Hide a book from the default listing.
pub async fn hide_book(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Book>> {
    set_hidden(&state, id, true)
}

/// Show a hidden book again.
pub async fn unhide_book(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Book>> {
    set_hidden(&state, id, false)
}

fn set_hidden(state: &AppState, id: i64, hidden: bool) -> Result<Json<Book>> {
    let stored = state
        .db
        .set_hidden(id, hidden)?
        .ok_or_else(|| AppError::NotFound(format!("Book not found: {}", id)))?;

    Ok(Json(state.to_book(stored)?))
}

/// Remove a book record. The file on disk is left alone.
pub async fn delete_book(State(state): State<AppState>, Path(id): Path<i64>) -> Result<StatusCode> {
    if state.db.delete_book(id)? {
        tracing::info!(id, "Deleted book");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Book not found: {}", id)))
    }
}

/// Stream the book file.
pub async fn book_file(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Response<Body>> {
    let stored = state.stored_book(id)?;
    let format = BookFormat::from_extension(&stored.file_type)
        .ok_or_else(|| AppError::NotFound(format!("Book {} has no file", id)))?;

    let file = tokio::fs::File::open(&stored.file_path)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AppError::NotFound(format!("File missing: {}", stored.file_path))
            }
            _ => AppError::Io(e),
        })?;
    let length = file.metadata().await?.len();
    let body = Body::from_stream(ReaderStream::new(file));

    let filename = std::path::Path::new(&stored.file_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("book.{}", format.as_str()));
    let content_disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&filename)
    );

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.mime_type())
        .header(header::CONTENT_DISPOSITION, content_disposition)
        .header(header::CONTENT_LENGTH, length)
        .body(body)
        .unwrap_or_else(|_| Response::default()))
}

/// ISBN import body.
#[derive(Debug, Deserialize)]
pub struct IsbnRequest {
    isbn: String,
}

/// Create a book from Open Library data.
pub async fn add_isbn_book(
    State(state): State<AppState>,
    Json(req): Json<IsbnRequest>,
) -> Result<impl IntoResponse> {
    let book = state.add_isbn_book(&req.isbn).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

// ============================================================================
// COLLECTIONS
// ============================================================================

/// Collection creation body.
#[derive(Debug, Deserialize)]
pub struct CollectionRequest {
    name: String,
    description: Option<String>,
}

/// Collection with its member books.
#[derive(Debug, Serialize)]
pub struct CollectionDetail {
    #[serde(flatten)]
    collection: Collection,
    books: Vec<Book>,
}

/// List collections with book counts.
pub async fn list_collections(State(state): State<AppState>) -> Result<Json<Vec<Collection>>> {
    Ok(Json(state.db.list_collections()?))
}

/// Create a collection.
pub async fn create_collection(
    State(state): State<AppState>,
    Json(req): Json<CollectionRequest>,
) -> Result<impl IntoResponse> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidInput(
            "Collection name must not be empty".to_string(),
        ));
    }

    let collection = state
        .db
        .create_collection(name, req.description.as_deref())?;
    Ok((StatusCode::CREATED, Json(collection)))
}

/// One collection with its books.
pub async fn get_collection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CollectionDetail>> {
    collection_detail(&state, id).map(Json)
}

/// Delete a collection. Member books are kept.
pub async fn delete_collection(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    if state.db.delete_collection(id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Collection not found: {}", id)))
    }
}

/// Add a book to a collection. Adding twice is a no-op.
pub async fn add_to_collection(
    State(state): State<AppState>,
    Path((id, book_id)): Path<(i64, i64)>,
) -> Result<Json<CollectionDetail>> {
    collection_detail(&state, id)?;
    state.stored_book(book_id)?;

    state.db.add_book_to_collection(id, book_id)?;
    collection_detail(&state, id).map(Json)
}

/// Remove a book from a collection. Removing a non-member is a no-op.
pub async fn remove_from_collection(
    State(state): State<AppState>,
    Path((id, book_id)): Path<(i64, i64)>,
) -> Result<Json<CollectionDetail>> {
    collection_detail(&state, id)?;

    state.db.remove_book_from_collection(id, book_id)?;
    collection_detail(&state, id).map(Json)
}

fn collection_detail(state: &AppState, id: i64) -> Result<CollectionDetail> {
    let collection = state
        .db
        .get_collection(id)?
        .ok_or_else(|| AppError::NotFound(format!("Collection not found: {}", id)))?;
    let books = state.to_books(state.db.collection_books(id)?)?;

    Ok(CollectionDetail { collection, books })
}
