//! Open Library client for adding books from an ISBN alone.

use crate::config::IsbnConfig;
use crate::error::{AppError, Result};
use crate::formats::UNKNOWN_AUTHOR;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Title used when the edition record carries none.
pub const UNKNOWN_TITLE: &str = "Unknown Title";

const USER_AGENT: &str = concat!("localreads/", env!("CARGO_PKG_VERSION"));

/// Strip spaces and hyphens and check the ISBN-10/ISBN-13 shape.
pub fn normalize_isbn(input: &str) -> Result<String> {
    let isbn: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let valid = match isbn.len() {
        10 => {
            let (body, check) = isbn.split_at(9);
            body.chars().all(|c| c.is_ascii_digit())
                && check.chars().all(|c| c.is_ascii_digit() || c == 'X')
        }
        13 => isbn.chars().all(|c| c.is_ascii_digit()),
        _ => false,
    };

    if valid {
        Ok(isbn)
    } else {
        Err(AppError::InvalidInput(format!("Invalid ISBN: {}", input)))
    }
}

/// Book data resolved from Open Library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsbnRecord {
    /// Normalized ISBN.
    pub isbn: String,
    /// Edition title.
    pub title: String,
    /// Author names joined with ", ".
    pub author: String,
    /// Page count, if listed.
    pub pages: Option<u32>,
    /// Large cover image URL.
    pub cover_url: String,
}

#[derive(Debug, Deserialize)]
struct EditionResponse {
    title: Option<String>,
    number_of_pages: Option<u32>,
    #[serde(default)]
    authors: Vec<AuthorKey>,
}

#[derive(Debug, Deserialize)]
struct AuthorKey {
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorResponse {
    name: Option<String>,
}

/// Open Library HTTP client.
#[derive(Debug, Clone)]
pub struct OpenLibraryClient {
    client: Client,
    base_url: String,
    covers_url: String,
}

impl OpenLibraryClient {
    /// Build a client from the `[isbn]` config section.
    pub fn new(config: &IsbnConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            covers_url: config.covers_url.trim_end_matches('/').to_string(),
        })
    }

    /// Large cover URL for an ISBN. Open Library answers 404 instead of a blank image.
    pub fn cover_url(&self, isbn: &str) -> String {
        format!("{}/b/isbn/{}-L.jpg?default=false", self.covers_url, isbn)
    }

    /// Look up an edition by (normalized) ISBN. `None` when Open Library has no record.
    pub async fn lookup(&self, isbn: &str) -> Result<Option<IsbnRecord>> {
        let url = format!("{}/isbn/{}.json", self.base_url, isbn);
        tracing::debug!(url = %url, "Looking up ISBN");

        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "ISBN lookup returned {}",
                response.status()
            )));
        }

        let edition: EditionResponse = response.json().await?;

        let mut names = Vec::new();
        for key in edition.authors.iter().filter_map(|a| a.key.as_deref()) {
            match self.author_name(key).await {
                Ok(Some(name)) => names.push(name),
                Ok(None) => {}
                Err(e) => tracing::warn!(author = %key, error = %e, "Author lookup failed"),
            }
        }

        let author = if names.is_empty() {
            UNKNOWN_AUTHOR.to_string()
        } else {
            names.join(", ")
        };

        Ok(Some(IsbnRecord {
            isbn: isbn.to_string(),
            title: edition
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            author,
            pages: edition.number_of_pages,
            cover_url: self.cover_url(isbn),
        }))
    }

    async fn author_name(&self, key: &str) -> Result<Option<String>> {
        let url = format!("{}{}.json", self.base_url, key);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let author: AuthorResponse = response.json().await?;
        Ok(Some(
            author.name.unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
        ))
    }

    /// Download a cover image. `None` when the service has no cover.
    pub async fn fetch_cover(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            tracing::debug!(url = %url, status = %response.status(), "No cover available");
            return Ok(None);
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(bytes.to_vec()))
    }
}
