//! HTTP server and routes.

mod handlers;
mod state;

pub use state::AppState;

use axum::{
    Router,
    routing::{get, patch, post},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let book_routes = Router::new()
        .route("/", get(handlers::list_books))
        .route("/hidden", get(handlers::hidden_books))
        .route("/isbn", post(handlers::add_isbn_book))
        .route(
            "/{id}",
            get(handlers::get_book)
                .patch(handlers::update_book)
                .delete(handlers::delete_book),
        )
        .route("/{id}/progress", patch(handlers::update_progress))
        .route("/{id}/rating", patch(handlers::update_rating))
        .route("/{id}/hide", post(handlers::hide_book))
        .route("/{id}/unhide", post(handlers::unhide_book))
        .route("/{id}/file", get(handlers::book_file));

    let collection_routes = Router::new()
        .route(
            "/",
            get(handlers::list_collections).post(handlers::create_collection),
        )
        .route(
            "/{id}",
            get(handlers::get_collection).delete(handlers::delete_collection),
        )
        .route(
            "/{id}/books/{book_id}",
            post(handlers::add_to_collection).delete(handlers::remove_from_collection),
        );

    let covers = ServeDir::new(state.covers.dir());

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/scan", post(handlers::scan))
        .nest("/books", book_routes)
        .nest("/collections", collection_routes)
        .nest_service("/covers", covers)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
