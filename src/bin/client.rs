use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zumi_player::credentials::{self, CredentialStore, STORE_FILE_NAME};
use zumi_player::palette::{CACHE_FILE_NAME, ColorPalette, PaletteCache};
use zumi_player::pin::{PinCheck, PinLock, hash_pin};
use zumi_player::session::SessionValidator;
use zumi_player::session::backend::HttpSessionBackend;
use zumi_player::session::google::{GoogleProvider, OAuthConfig};

#[derive(Parser)]
#[command(name = "zumi-client")]
#[command(about = "Zumi desktop session CLI", long_about = None)]
struct Cli {
    /// Backend URL
    #[arg(short, long, env = "API_URL", default_value = "http://localhost:3000")]
    server: String,

    /// Folder holding the encrypted credential store
    #[arg(long, env = "ZUMI_DATA_DIR", default_value = ".zumi")]
    data_dir: PathBuf,

    /// Packaged key resource, used when STORE_ENCRYPTION_KEY is unset
    #[arg(long, env = "STORE_KEY_FILE")]
    key_file: Option<PathBuf>,

    /// Google OAuth client id
    #[arg(long, env = "GOOGLE_CLIENT_ID", default_value = "")]
    client_id: String,

    /// Google OAuth client secret
    #[arg(long, env = "GOOGLE_CLIENT_SECRET", default_value = "", hide_env_values = true)]
    client_secret: String,

    /// Uploads folder holding the palette cache
    #[arg(long, env = "UPLOADS_DIR", default_value = "public/uploads")]
    uploads: PathBuf,

    /// Command to execute
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Print the Google consent URL
    AuthUrl,
    /// Finish signing in with the code from the consent redirect
    SignIn { code: String },
    /// Show the signed-in user's profile
    Whoami,
    /// Sign out and forget all credentials
    SignOut,
    /// Check the credential store and sign-in state
    Status,
    /// PIN lock management
    #[command(subcommand)]
    Pin(PinCommand),
    /// Extract (or look up) the palette of an image
    Colors {
        /// Image file
        image: PathBuf,
        /// Cache key (defaults to the image's file name)
        #[arg(short, long)]
        filename: Option<String>,
    },
    /// Drop every cached palette
    ColorsClear,
    /// Drop one cached palette
    ColorsRemove { filename: String },
}

#[derive(Parser)]
enum PinCommand {
    /// Show whether a PIN is set
    Status,
    /// Set the PIN
    Set { pin: String },
    /// Check a PIN
    Verify { pin: String },
    /// Remove the PIN
    Delete,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Colors { image, filename } => {
            show_colors(&cli.uploads, image, filename.as_deref()).await
        }
        Command::ColorsClear => {
            PaletteCache::open(cli.uploads.join(CACHE_FILE_NAME)).await.clear().await;
            println!("Color cache cleared");
            Ok(())
        }
        Command::ColorsRemove { filename } => {
            let cache = PaletteCache::open(cli.uploads.join(CACHE_FILE_NAME)).await;
            if cache.remove(filename).await {
                println!("Removed cached palette for {}", filename);
            } else {
                println!("No cached palette for {}", filename);
            }
            Ok(())
        }
        Command::Pin(cmd) => {
            let store = open_store(&cli).await;
            handle_pin_command(PinLock::new(store), cmd).await
        }
        Command::Status => show_status(&cli).await,
        Command::AuthUrl => {
            let validator = build_validator(&cli).await?;
            println!("{}", validator.authorization_url());
            Ok(())
        }
        Command::SignIn { code } => {
            let validator = build_validator(&cli).await?;
            let user = validator.sign_in_with_code(code).await?;
            println!("Signed in as {} <{}>", user.name, user.email);
            Ok(())
        }
        Command::Whoami => {
            let validator = build_validator(&cli).await?;
            validator.initialize().await;
            whoami(&validator).await
        }
        Command::SignOut => {
            let validator = build_validator(&cli).await?;
            validator.sign_out().await?;
            println!("Signed out");
            Ok(())
        }
    }
}

async fn open_store(cli: &Cli) -> CredentialStore {
    let passphrase = credentials::resolve_passphrase(cli.key_file.as_deref());
    CredentialStore::open(cli.data_dir.join(STORE_FILE_NAME), passphrase.as_deref()).await
}

async fn build_validator(cli: &Cli) -> Result<SessionValidator> {
    let store = open_store(cli).await;
    let provider = GoogleProvider::new(OAuthConfig::new(&cli.client_id, &cli.client_secret))
        .context("Failed to initialize Google provider")?;
    let backend = HttpSessionBackend::new(&cli.server, Duration::from_secs(30))
        .context("Failed to initialize backend client")?;

    Ok(SessionValidator::new(
        store,
        Arc::new(provider),
        Arc::new(backend),
    ))
}

async fn whoami(validator: &SessionValidator) -> Result<()> {
    match validator.get_user_info().await {
        Ok(profile) => {
            println!("User Information:");
            println!("{:-<80}", "");
            println!("Name:     {}", profile.name);
            println!("Email:    {}", profile.email);
            println!("Verified: {}", profile.verified_email);
            if let Some(picture) = &profile.picture {
                println!("Picture:  {}", picture);
            }
            println!("ID:       {}", profile.id);
            if let Some(user) = validator.user().await {
                println!("Server ID: {}", user.id);
            }
            Ok(())
        }
        Err(e) if e.requires_sign_in() => {
            anyhow::bail!("Not signed in ({}). Run `zumi-client auth-url` to sign in.", e)
        }
        Err(e) => Err(e.into()),
    }
}

async fn show_status(cli: &Cli) -> Result<()> {
    let store = open_store(cli).await;

    println!("Credential store: {}", store.path().display());
    match store.self_test().await {
        Ok(()) => println!("  Self-test:  ok"),
        Err(e) => println!("  Self-test:  FAILED ({:#})", e),
    }

    let signed_in = store
        .get::<zumi_player::session::AuthTokens>(credentials::Slot::Tokens)
        .await
        .is_some();
    println!("  Signed in:  {}", if signed_in { "yes" } else { "no" });
    println!(
        "  Server token cached: {}",
        if store.contains(credentials::Slot::ServerToken).await { "yes" } else { "no" }
    );
    println!(
        "  PIN set:    {}",
        if PinLock::new(store).has_pin().await { "yes" } else { "no" }
    );

    Ok(())
}

async fn handle_pin_command(pins: PinLock, cmd: &PinCommand) -> Result<()> {
    match cmd {
        PinCommand::Status => {
            println!("PIN set: {}", if pins.has_pin().await { "yes" } else { "no" });
        }
        PinCommand::Set { pin } => {
            if pin.is_empty() || !pin.chars().all(|c| c.is_ascii_digit()) {
                anyhow::bail!("PIN must be digits only");
            }
            pins.set_pin(&hash_pin(pin)).await.context("Failed to set PIN")?;
            println!("PIN set");
        }
        PinCommand::Verify { pin } => match pins.verify_pin(&hash_pin(pin)).await {
            PinCheck::Valid => println!("PIN valid"),
            PinCheck::Invalid => anyhow::bail!("PIN invalid"),
            PinCheck::NotSet => anyhow::bail!("No PIN set"),
        },
        PinCommand::Delete => {
            pins.delete_pin().await.context("Failed to delete PIN")?;
            println!("PIN removed");
        }
    }
    Ok(())
}

async fn show_colors(uploads: &Path, image: &Path, filename: Option<&str>) -> Result<()> {
    let key = match filename {
        Some(name) => name.to_string(),
        None => image
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .context("Image path has no file name")?,
    };

    let cache = PaletteCache::open(uploads.join(CACHE_FILE_NAME)).await;
    let palette = cache.extract_colors(image, &key).await;

    if palette == ColorPalette::fallback() {
        println!("(using default palette)");
    }
    println!("Palette for {}:", key);
    println!("{:-<40}", "");
    println!("background  {}", palette.background);
    println!("primary     {}", palette.primary);
    println!("secondary   {}", palette.secondary);
    println!("detail      {}", palette.detail);
    println!("vibrant     {}", palette.vibrant);
    println!("muted       {}", palette.muted);

    Ok(())
}
