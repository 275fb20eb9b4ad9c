use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;

use ocm_auth::auth::{run_ban_sweeper, TokenService};
use ocm_auth::configuration::get_configuration;
use ocm_auth::email_client::{EmailClient, SenderAddress};
use ocm_auth::startup::{run, AppState};
use ocm_auth::store::{PgStore, UserStore};
use ocm_auth::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    // Configuration and the signing secret are the only fatal failures
    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    if let Err(e) = configuration.jwt.validate() {
        tracing::error!("Invalid JWT configuration: {}", e);
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "JWT configuration error",
        ));
    }

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(configuration.storage.deadline())
        .connect(&configuration.database.connection_string())
        .await
        .map_err(|e| {
            tracing::error!("Failed to create connection pool: {}", e);
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "Database connection error",
            )
        })?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tracing::error!("Failed to run migrations: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, "Migration error")
    })?;

    tracing::info!("Database connection pool created successfully");

    let store = Arc::new(PgStore::new(pool, configuration.storage.deadline()));

    let sender = SenderAddress::parse(configuration.email.sender.clone()).map_err(|e| {
        tracing::error!("Invalid sender email address: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Email configuration error")
    })?;
    let mailer = Arc::new(EmailClient::new(
        configuration.email.base_url.clone(),
        sender,
        configuration.email.timeout(),
    ));

    let sweeper_store: Arc<dyn UserStore> = store.clone();
    tokio::spawn(run_ban_sweeper(sweeper_store, configuration.bans.interval()));

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let state = AppState {
        tokens: Arc::new(TokenService::new(&configuration.jwt)),
        users: store.clone(),
        verifications: store,
        mailer,
        settings: Arc::new(configuration),
    };

    let server = run(listener, state)?;
    tracing::info!("Server started successfully");

    server.await
}
