use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        // Connect to database
        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        // Run migrations
        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Shared handle for an engine; the pool is reference counted internally
    pub fn shared(&self) -> Arc<DatabaseConnection> {
        Arc::new(self.connection.clone())
    }
}

/// Register a credential directly, bypassing the challenge handshake
pub async fn seed_credential(
    db: &DatabaseConnection,
    subject: &str,
    credential_id: &str,
) -> rollcall::types::Credential {
    let credential = rollcall::types::Credential {
        subject: subject.to_string(),
        credential_id: credential_id.to_string(),
        public_key: format!("pk-{credential_id}"),
        created_at: chrono::Utc::now().timestamp(),
        last_used_at: None,
    };

    rollcall::storage::replace_credential(db, &credential)
        .await
        .expect("Failed to seed credential")
}
