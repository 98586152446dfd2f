use std::sync::{OnceLock, RwLock};

use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};

use crate::entities;

struct SharedDb {
    dsn: String,
    connection: DatabaseConnection,
}

static SHARED_DB: OnceLock<RwLock<Option<SharedDb>>> = OnceLock::new();

pub async fn connect_shared(dsn: &str) -> Result<DatabaseConnection, DbErr> {
    let lock = SHARED_DB.get_or_init(|| RwLock::new(None));
    if let Ok(guard) = lock.read()
        && let Some(shared) = guard.as_ref()
            && shared.dsn == dsn {
                return Ok(shared.connection.clone());
            }

    let connection = Database::connect(dsn).await?;
    if let Ok(mut guard) = lock.write() {
        *guard = Some(SharedDb {
            dsn: dsn.to_string(),
            connection: connection.clone(),
        });
    }
    Ok(connection)
}

/// Creates the `log_records` table if it doesn't already exist. Called once
/// at bootstrap; the core otherwise has no migration machinery (spec §1:
/// persistent store layout is an external concern, this is just enough to
/// make the bundled binary runnable against a fresh sqlite file).
pub async fn sync(db: &DatabaseConnection) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let mut statement = Schema::new(builder).create_table_from_entity(entities::LogRecords);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}
