use opengsync_server::api::state::DispatchSettings;
use opengsync_server::config::AppConfig;
use opengsync_server::{build_app, seed_requested, serve};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)      // Default to Info for everything
        .filter_module("sqlx", LevelFilter::Warn)  // Suppress sqlx Debug logs
        .parse_default_env()
        .init();

    println!("OpeNGSync: LIMS route dispatch server");

    // Load configuration
    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{}, workflow backend={:?}",
        config.server.host, config.server.port, config.workflow.backend
    );

    if DispatchSettings::from_config(&config)?.debug {
        println!("Debug mode: caching and rate limiting are disabled");
    }

    let load_seed = seed_requested();
    if load_seed {
        println!("Loading seed data...");
    }
    let app = build_app(&config, load_seed).await?;

    println!("OpeNGSync server running on http://{}", config.server_address());
    serve(app, &config).await?;

    Ok(())
}
