use std::fs;
use std::path::Path;

use anyhow::Context;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

pub mod prelude {
    pub use entity::prelude::*;
    pub use entity::{email, expense, label, sync_state};
    pub use sea_orm::{
        entity::*, query::*, sea_query::OnConflict, ActiveValue, ColumnTrait, Condition,
        DatabaseConnection, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
        QuerySelect, Set, TransactionTrait,
    };
}

const STORE_FILE: &str = "mailscope.sqlite3";

/// Open (and migrate) the embedded store inside the persist dir.
pub async fn connect(persist_dir: &str) -> anyhow::Result<DatabaseConnection> {
    fs::create_dir_all(persist_dir)
        .with_context(|| format!("Could not create persist dir {persist_dir}"))?;
    let db_path = Path::new(persist_dir).join(STORE_FILE);
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

    let mut db_options = ConnectOptions::new(db_url);
    db_options.sqlx_logging(false);

    let conn = Database::connect(db_options)
        .await
        .context("Store connection failed")?;
    Migrator::up(&conn, None)
        .await
        .context("Store migration failed")?;

    Ok(conn)
}

/// In-memory store for tests.
#[cfg(test)]
pub async fn connect_in_memory() -> DatabaseConnection {
    let conn = Database::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    Migrator::up(&conn, None).await.expect("migrations");
    conn
}
