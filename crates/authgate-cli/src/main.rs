use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use authgate_core::Gateway;
use authgate_core::config::{Config, StoreBackend};
use authgate_core::db::PgTokenStore;
use authgate_core::provider::ProviderRegistry;
use authgate_core::store::{self, MemoryTokenStore, RefreshTokenStore};
use authgate_core::token::TokenCodec;

#[derive(Parser)]
#[command(name = "authgate", about = "OAuth signin gateway issuing authorization and refresh tokens")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve,
    /// Run database migrations
    Migrate,
    /// Check config, providers and store connectivity
    Validate,
    /// List configured identity providers
    Providers,
    /// Print a random value suitable for tokens.token_secret
    GenerateSecret,
    /// Revoke all refresh tokens for an identity
    Revoke {
        /// Identity id as carried in the authorization token
        identity_id: String,
    },
    /// Verify an authorization token and print its claims
    VerifyToken {
        /// Authorization token to verify
        token: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authgate=info,tower_http=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    // generate-secret doesn't need config
    if let Command::GenerateSecret = cli.command {
        let mut bytes = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut bytes);
        println!("{}", hex::encode(bytes));
        return Ok(());
    }

    let config = authgate_core::config::resolve_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => {
            let store: Arc<dyn RefreshTokenStore> = match config.store.backend {
                StoreBackend::Postgres => {
                    let pg = PgTokenStore::connect(&config.store).await?;
                    pg.migrate().await?;
                    tracing::info!("migrations complete");
                    Arc::new(pg)
                }
                StoreBackend::Memory => store::open(&config.store).await?,
            };
            let gateway = Gateway::new(&config, store)?;
            authgate_api::serve(config, gateway).await?;
        }
        Command::Migrate => {
            let pg = connect_postgres(&config).await?;
            pg.migrate().await?;
            tracing::info!("migrations complete");
        }
        Command::Validate => {
            tracing::info!("config loaded successfully");
            let registry = ProviderRegistry::from_config(&config)?;
            tracing::info!(providers = registry.len(), "providers resolved");
            TokenCodec::from_config(&config.tokens)?;
            tracing::info!("token secret resolved");
            if config.store.backend == StoreBackend::Postgres {
                let pg = PgTokenStore::connect(&config.store).await?;
                sqlx::query("SELECT 1").execute(pg.pool()).await?;
                tracing::info!("database connection successful");
            }
            // Gateway construction also builds the provider HTTP client
            Gateway::new(&config, Arc::new(MemoryTokenStore::default()))?;
        }
        Command::Providers => {
            let registry = ProviderRegistry::from_config(&config)?;
            if registry.is_empty() {
                println!("No providers configured.");
            } else {
                println!("{:<20} {:<14} {}", "ID", "Kind", "Redirect URI");
                println!("{}", "-".repeat(90));
                for id in registry.ids() {
                    let provider = registry.get(id)?;
                    println!(
                        "{:<20} {:<14} {}",
                        id,
                        format!("{:?}", provider.kind),
                        provider.config.redirect_uri,
                    );
                }
                println!("\n{} provider(s)", registry.len());
            }
        }
        Command::Revoke { identity_id } => {
            let pg = connect_postgres(&config).await?;
            let revoked = pg.revoke_identity(&identity_id).await?;
            println!("{revoked} refresh token(s) revoked for {identity_id}");
        }
        Command::VerifyToken { token } => {
            let codec = TokenCodec::from_config(&config.tokens)?;
            let claims = codec.verify_authorization_token(&token)?;
            let expires = chrono::DateTime::from_timestamp(claims.exp, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| claims.exp.to_string());
            println!("Token valid:");
            println!("  Identity: {}", claims.id);
            println!("  Provider: {}", claims.provider);
            println!("  Expires:  {expires}");
        }
        Command::GenerateSecret => unreachable!(),
    }

    Ok(())
}

/// Commands that touch persisted tokens only make sense with the PostgreSQL store.
async fn connect_postgres(config: &Config) -> anyhow::Result<PgTokenStore> {
    if config.store.backend != StoreBackend::Postgres {
        anyhow::bail!("this command requires store.backend = \"postgres\"");
    }
    Ok(PgTokenStore::connect(&config.store).await?)
}
