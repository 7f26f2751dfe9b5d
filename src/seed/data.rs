use crate::model::{ApiToken, EntityId, Library, User, UserRole};
use crate::store::MemoryDatabase;
use anyhow::Result;
use chrono::{Duration, Utc};

/// Token of the seeded bioinformatician, valid for a year
pub const DEMO_API_TOKEN: &str = "demo-api-token";

/// Helper function to create a library belonging to a sequencing request
fn create_library(id: EntityId, name: &str, seq_request_id: EntityId, well: Option<&str>) -> Library {
    let mut library = Library::new(id, name);
    library.seq_request_id = Some(seq_request_id);
    library.index_well = well.map(str::to_string);
    library
}

/// Load demo users, an API token and libraries
pub fn load_seed_data(db: &MemoryDatabase) -> Result<()> {
    let users = [
        User::new(1, "admin@opengsync.local", "Admin", UserRole::Admin),
        User::new(2, "bioinfo@opengsync.local", "Bioinformatician", UserRole::Bioinformatician),
        User::new(3, "tech@opengsync.local", "Technician", UserRole::Technician),
        User::new(4, "client@example.org", "Client", UserRole::Client),
    ];
    for user in users {
        db.insert_user(user);
    }

    db.insert_api_token(ApiToken::new(
        DEMO_API_TOKEN,
        2,
        Some(Utc::now() + Duration::days(365)),
    ));

    let libraries = [
        create_library(1, "scRNA_ctrl_1", 1, Some("A1")),
        create_library(2, "scRNA_ctrl_2", 1, Some("B1")),
        create_library(3, "scRNA_treated_1", 1, None),
        create_library(4, "atac_pool_a", 2, None),
    ];
    let count = libraries.len();
    for library in libraries {
        db.insert_library(library);
    }

    log::info!("Seeded 4 users, 1 API token and {} libraries", count);
    Ok(())
}
