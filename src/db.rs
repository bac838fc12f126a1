use rocket_db_pools::{Database, sqlx};
use sqlx::migrate::{MigrateError, Migrator};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Target PostgreSQL database, attached only when the postgres store backend is selected.
#[derive(Database)]
#[database("fleet_db")]
pub struct FleetDb(sqlx::PgPool);

/// Create or upgrade the fleet schema the import writes into.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}
