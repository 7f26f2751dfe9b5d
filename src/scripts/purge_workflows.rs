use anyhow::{Context, Result};
use opengsync_server::store::{PostgresWorkflowStore, WorkflowStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Connect to database
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let ttl_seconds: i64 = match std::env::var("OPENGSYNC_WORKFLOW__SESSION_TTL_SECONDS") {
        Ok(value) => value
            .parse()
            .context("OPENGSYNC_WORKFLOW__SESSION_TTL_SECONDS must be a number of seconds")?,
        Err(_) => 24 * 60 * 60,
    };

    let store = PostgresWorkflowStore::new(&database_url, 1).await?;
    println!("Connected to database. Purging workflow sessions idle for more than {}s...", ttl_seconds);

    store.migrate().await?;
    let purged = store
        .purge_expired(chrono::Duration::seconds(ttl_seconds))
        .await?;

    println!("Purged {} workflow session(s)", purged);
    Ok(())
}
