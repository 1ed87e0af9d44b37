use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Personal e-book library manager.
#[derive(Parser, Debug, Clone)]
#[command(name = "localreads")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, env = "LOCALREADS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the server (default if no command given).
    Serve {
        /// Address to bind the server to.
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Books directory (overrides the config file).
        #[arg(long)]
        books: Option<PathBuf>,
    },

    /// Scan the books directory once and exit.
    Scan {
        /// Books directory (overrides the config file).
        path: Option<PathBuf>,
    },

    /// Extract metadata and cover from a single file and print it as JSON.
    Extract {
        /// EPUB or PDF file.
        file: PathBuf,
    },

    /// Initialize database and create default config.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,
    },
}

/// Main configuration from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Books directory configuration.
    #[serde(default)]
    pub library: LibraryConfig,

    /// Cover output configuration.
    #[serde(default)]
    pub covers: CoversConfig,

    /// ISBN metadata service configuration.
    #[serde(default)]
    pub isbn: IsbnConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Name shown by the root endpoint.
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            title: default_title(),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::new(
        std::net::IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0)),
        8000,
    )
}

fn default_title() -> String {
    "LocalRead".to_string()
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("book-lib.db")
}

/// Books directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Directory holding the EPUB/PDF files.
    #[serde(default = "default_books_dir")]
    pub books_dir: PathBuf,

    /// Descend into subdirectories while scanning.
    #[serde(default)]
    pub recursive: bool,

    /// Run a scan when the server starts.
    #[serde(default = "default_scan_on_start")]
    pub scan_on_start: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            books_dir: default_books_dir(),
            recursive: false,
            scan_on_start: default_scan_on_start(),
        }
    }
}

fn default_books_dir() -> PathBuf {
    PathBuf::from("books")
}

fn default_scan_on_start() -> bool {
    false
}

/// Cover output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoversConfig {
    /// Directory receiving `cover_<md5>.jpg` files.
    #[serde(default = "default_covers_dir")]
    pub dir: PathBuf,

    /// JPEG quality (1-100).
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for CoversConfig {
    fn default() -> Self {
        Self {
            dir: default_covers_dir(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

fn default_covers_dir() -> PathBuf {
    PathBuf::from("covers")
}

fn default_jpeg_quality() -> u8 {
    90
}

/// ISBN metadata service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsbnConfig {
    /// Base URL of the Open Library API.
    #[serde(default = "default_isbn_base_url")]
    pub base_url: String,

    /// Base URL of the Open Library covers service.
    #[serde(default = "default_isbn_covers_url")]
    pub covers_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_isbn_timeout")]
    pub timeout_seconds: u64,
}

impl Default for IsbnConfig {
    fn default() -> Self {
        Self {
            base_url: default_isbn_base_url(),
            covers_url: default_isbn_covers_url(),
            timeout_seconds: default_isbn_timeout(),
        }
    }
}

fn default_isbn_base_url() -> String {
    "https://openlibrary.org".to_string()
}

fn default_isbn_covers_url() -> String {
    "https://covers.openlibrary.org".to_string()
}

fn default_isbn_timeout() -> u64 {
    15
}

impl Config {
    /// Load configuration from file.
    pub fn load(path: &PathBuf) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to read config file: {}", e))
        })?;

        toml::from_str(&content).map_err(|e| {
            crate::error::AppError::Config(format!("Failed to parse config file: {}", e))
        })
    }

    /// Find config file in default locations.
    pub fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            PathBuf::from("config.toml"),
            PathBuf::from("localreads.toml"),
            dirs::config_dir()
                .map(|p| p.join("localreads").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/localreads/config.toml"),
        ];

        candidates.into_iter().find(|p| p.exists())
    }

    /// Generate default config file content.
    pub fn generate_default() -> String {
        r#"# localreads configuration

[server]
bind = "0.0.0.0:8000"
title = "LocalRead"

[database]
path = "book-lib.db"

[library]
books_dir = "books"
# Descend into subdirectories while scanning
recursive = false
# Scan the books directory when the server starts
scan_on_start = false

[covers]
# Served under /covers; stored paths look like covers/cover_<md5>.jpg
dir = "covers"
jpeg_quality = 90

[isbn]
base_url = "https://openlibrary.org"
covers_url = "https://covers.openlibrary.org"
timeout_seconds = 15
"#
        .to_string()
    }
}

/// Supported book formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    /// EPUB format (Electronic Publication).
    Epub,
    /// PDF format (Portable Document Format).
    Pdf,
}

impl BookFormat {
    /// Get the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            BookFormat::Epub => "application/epub+zip",
            BookFormat::Pdf => "application/pdf",
        }
    }

    /// Try to detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "epub" => Some(BookFormat::Epub),
            "pdf" => Some(BookFormat::Pdf),
            _ => None,
        }
    }

    /// Value stored in the `file_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookFormat::Epub => "epub",
            BookFormat::Pdf => "pdf",
        }
    }
}
