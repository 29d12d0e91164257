use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use zumi_player::jwt::SessionSigner;
use zumi_player::palette::{CACHE_FILE_NAME, PaletteCache};
use zumi_player::server::{self, AppState};
use zumi_player::session::google::{GoogleProvider, OAuthConfig};
use zumi_player::users::UserDirectory;

#[derive(Parser)]
#[command(name = "zumi-server")]
#[command(about = "Zumi backend: session tokens and artwork palettes", long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "API_PORT", default_value = "3000")]
    port: u16,

    /// Uploads folder (thumbnails live in `thumbnails/`)
    #[arg(short, long, env = "UPLOADS_DIR", default_value = "public/uploads")]
    uploads: PathBuf,

    /// User database file
    #[arg(short, long, env = "DATABASE_PATH", default_value = "data/zumi.db")]
    database: PathBuf,

    /// Secret used to sign session tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    tracing::info!("Starting Zumi server");
    tracing::info!("Uploads path: {}", cli.uploads.display());

    let users = UserDirectory::new(&cli.database)
        .await
        .context("Failed to open user database")?;
    let signer = SessionSigner::new(&cli.jwt_secret).context("Invalid JWT secret")?;
    // Only the user-info endpoint is used here, which needs no client credentials
    let identity = GoogleProvider::new(OAuthConfig::new("", ""))
        .context("Failed to initialize Google provider")?;
    let palettes = PaletteCache::open(cli.uploads.join(CACHE_FILE_NAME)).await;

    let state = AppState {
        users,
        signer,
        identity: Arc::new(identity),
        palettes,
        thumbnails_dir: cli.uploads.join("thumbnails"),
    };

    let app = server::create_router(state);
    let addr = format!("0.0.0.0:{}", cli.port);

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  POST   /api/auth/google                         - Exchange Google token");
    tracing::info!("  GET    /api/auth/profile                        - Current user");
    tracing::info!("  GET    /api/songs/thumbnails/:filename          - Thumbnail image");
    tracing::info!("  GET    /api/songs/thumbnails/:filename/colors   - Thumbnail palette");
    tracing::info!("  DELETE /api/songs/thumbnails/:filename/colors   - Evict palette");
    tracing::info!("  DELETE /api/colors                              - Clear palette cache");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
