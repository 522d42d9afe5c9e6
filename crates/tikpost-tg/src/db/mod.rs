use crate::prelude::*;
use crate::{err_ctx, ErrorKind, Result};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;

#[derive(Deserialize)]
pub(crate) struct Config {
    pub(crate) url: url::Url,

    #[serde(default = "default_database_pool_size")]
    pub(crate) pool_size: u32,
}

fn default_database_pool_size() -> u32 {
    10
}

/// Most likely unrecoverable errors from database communication layer
#[derive(Debug, thiserror::Error)]
pub(crate) enum DbError {
    #[error("Failed to connect to the database")]
    Connect { source: sqlx::Error },

    #[error("Failed to migrate the database")]
    Migrate { source: sqlx::migrate::MigrateError },

    #[error("Database query failed")]
    Query { source: sqlx::Error },
}

impl From<sqlx::Error> for ErrorKind {
    fn from(source: sqlx::Error) -> Self {
        Self::Db {
            source: DbError::Query { source },
        }
    }
}

pub(crate) async fn init(cfg: Config) -> Result<sqlx::PgPool> {
    // Verify that the connection is working early.
    // The connection created here is reused by the migrations down the road.
    let pool = PgPoolOptions::new()
        .max_connections(cfg.pool_size)
        .connect(cfg.url.as_str())
        .with_duration_log("Connected to the database")
        .await
        .map_err(err_ctx!(DbError::Connect))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(err_ctx!(DbError::Migrate))?;

    Ok(pool)
}
