//! localreads entry point.

use clap::Parser;
use localreads::{
    config::{Cli, Command, Config},
    covers::CoverStore,
    db::Database,
    formats,
    library::Scanner,
    server,
};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        tracing::debug!(path = %path.display(), "Loading config");
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force),
        Some(Command::Scan { path }) => cmd_scan(config, path),
        Some(Command::Extract { file }) => cmd_extract(&config, &file),
        Some(Command::Serve { bind, books }) => cmd_serve(config, bind, books).await,
        None => cmd_serve(config, None, None).await,
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "localreads=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn cover_store(config: &Config) -> CoverStore {
    CoverStore::with_quality(&config.covers.dir, config.covers.jpeg_quality)
}

/// Write the default config and create the database.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    std::fs::create_dir_all(&config.library.books_dir)?;
    println!(
        "Put EPUB and PDF files in {} and run: localreads scan",
        config.library.books_dir.display()
    );

    Ok(())
}

/// One-shot scan.
fn cmd_scan(config: Config, path: Option<PathBuf>) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let covers = cover_store(&config);
    let dir = path.unwrap_or(config.library.books_dir);

    let report = Scanner::new(&db, &covers)
        .recursive(config.library.recursive)
        .scan(&dir);

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Extract a single file and print the metadata.
fn cmd_extract(config: &Config, file: &std::path::Path) -> anyhow::Result<()> {
    let covers = cover_store(config);
    let Some(extraction) = formats::extract_file(file, &covers) else {
        anyhow::bail!("Unsupported file type: {}", file.display());
    };

    if let formats::Extraction::Degraded { reason, .. } = &extraction {
        eprintln!("warning: extraction degraded: {}", reason);
    }
    println!("{}", serde_json::to_string_pretty(extraction.metadata())?);
    Ok(())
}

/// Start the server.
async fn cmd_serve(
    mut config: Config,
    bind: Option<std::net::SocketAddr>,
    books: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(addr) = bind {
        config.server.bind = addr;
    }
    if let Some(dir) = books {
        config.library.books_dir = dir;
    }

    let db = Database::open(&config.database.path)?;

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        books = %config.library.books_dir.display(),
        "Starting localreads server"
    );

    let state = server::AppState::new(config.clone(), db)?;
    state.covers.ensure_dir()?;

    if config.library.scan_on_start {
        tracing::info!("Starting background library scan...");
        state.start_background_scan();
    }

    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
