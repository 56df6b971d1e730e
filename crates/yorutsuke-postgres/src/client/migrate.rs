//! Embedded schema migrations.

use std::time::{Duration, Instant};

use diesel_async::async_connection_wrapper::AsyncConnectionWrapper;
use diesel_async::pooled_connection::PoolableConnection;
use diesel_migrations::MigrationHarness;
use tokio::task::spawn_blocking;

use crate::{MIGRATIONS, PgClient, PgError, PgResult, TRACING_TARGET_MIGRATION};

/// Outcome of a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResult {
    /// Wall time of the run.
    pub duration: Duration,
    /// Versions applied by this run, oldest first.
    pub applied_versions: Vec<String>,
}

impl MigrationResult {
    /// Returns whether the schema was already up to date.
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.applied_versions.is_empty()
    }
}

/// Applies every pending embedded migration.
///
/// Safe to call repeatedly; applied versions are skipped.
#[tracing::instrument(skip(pg), target = TRACING_TARGET_MIGRATION)]
pub async fn run_pending_migrations(pg: &PgClient) -> PgResult<MigrationResult> {
    let start_time = Instant::now();
    let mut conn = pg.get_pooled_connection().await?;

    if conn.is_broken() {
        tracing::warn!(target: TRACING_TARGET_MIGRATION, "connection is broken before migrations");
    }

    let mut conn: AsyncConnectionWrapper<_> = conn.into();
    let joined = spawn_blocking(move || {
        let versions = conn
            .run_pending_migrations(MIGRATIONS)
            .map(|versions| versions.into_iter().map(|v| v.to_string()).collect::<Vec<_>>());
        (versions, conn)
    })
    .await;

    let duration = start_time.elapsed();
    let (versions, _conn) = joined.map_err(|err| {
        tracing::error!(
            target: TRACING_TARGET_MIGRATION,
            error = %err,
            "migration task panicked"
        );
        PgError::Migration(err.into())
    })?;

    let applied_versions = versions.map_err(|err| {
        tracing::error!(
            target: TRACING_TARGET_MIGRATION,
            duration_ms = duration.as_millis(),
            error = %err,
            "database migration failed"
        );
        PgError::Migration(err)
    })?;

    tracing::info!(
        target: TRACING_TARGET_MIGRATION,
        duration_ms = duration.as_millis(),
        applied = applied_versions.len(),
        "database migrations completed"
    );

    Ok(MigrationResult {
        duration,
        applied_versions,
    })
}

/// Extension trait adding migrations to [`PgClient`].
pub trait PgClientMigrationExt {
    /// Applies every pending embedded migration.
    fn run_pending_migrations(&self) -> impl Future<Output = PgResult<MigrationResult>> + Send;
}

impl PgClientMigrationExt for PgClient {
    async fn run_pending_migrations(&self) -> PgResult<MigrationResult> {
        run_pending_migrations(self).await
    }
}
