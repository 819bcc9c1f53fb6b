//! PostgreSQL dead-letter store
//!
//! Entries are kept in a single schema-qualified table. Replay claims are a
//! lease: `replay_claimed_at` is set when an entry is claimed and the claim is
//! considered abandoned once the lease expires, so a replayer that crashed
//! mid-replay does not lock the entry forever.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Postgres, QueryBuilder, Row,
    postgres::{PgPool, PgPoolOptions, PgRow},
    types::Json,
};

use crate::{
    config::PostgresConfig,
    entry::{DeadLetterEntry, FailureDetail},
    error::{DlqError, Result},
    filter::DeadLetterFilter,
    store::{DEFAULT_CLAIM_LEASE, DeadLetterStore},
    types::DeadLetterId,
};

const COLUMNS: &str = "id, message_type, payload, reason, error_message, error_trace, \
                       enqueued_at, attempts, metadata, correlation_id, causation_id, \
                       source_queue, replayed, replayed_at";

/// Maximum identifier length accepted by PostgreSQL
const MAX_IDENTIFIER_LEN: usize = 63;

fn validate_identifier(kind: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_start || !valid_rest || value.len() > MAX_IDENTIFIER_LEN {
        return Err(DlqError::Configuration(format!(
            "{kind} name '{value}' must start with a letter or underscore, contain only \
             ASCII letters, digits and underscores, and be at most {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    Ok(())
}

/// Validated `schema.table` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedTable {
    schema: String,
    table: String,
}

impl QualifiedTable {
    /// # Errors
    ///
    /// Returns [`DlqError::Configuration`] if either name is not a plain identifier.
    pub fn new(schema: &str, table: &str) -> Result<Self> {
        validate_identifier("schema", schema)?;
        validate_identifier("table", table)?;
        Ok(Self {
            schema: schema.to_string(),
            table: table.to_string(),
        })
    }

    #[must_use]
    pub fn schema(&self) -> &str {
        &self.schema
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for QualifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\".\"{}\"", self.schema, self.table)
    }
}

/// Pre-rendered SQL for a given table.
#[derive(Debug, Clone)]
struct Statements {
    insert: String,
    select_by_id: String,
    claim: String,
    mark_replayed: String,
    release: String,
    purge: String,
    purge_replayed: String,
}

impl Statements {
    fn new(table: &QualifiedTable) -> Self {
        Self {
            insert: format!(
                "INSERT INTO {table} ({COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
            ),
            select_by_id: format!("SELECT {COLUMNS} FROM {table} WHERE id = $1"),
            claim: format!(
                "UPDATE {table} SET replay_claimed_at = now() \
                 WHERE id = $1 AND replayed = FALSE \
                 AND (replay_claimed_at IS NULL OR replay_claimed_at < now() - make_interval(secs => $2))"
            ),
            mark_replayed: format!(
                "UPDATE {table} SET replayed = TRUE, replayed_at = $2, replay_claimed_at = NULL \
                 WHERE id = $1 AND replayed = FALSE"
            ),
            release: format!(
                "UPDATE {table} SET replay_claimed_at = NULL WHERE id = $1 AND replayed = FALSE"
            ),
            purge: format!("DELETE FROM {table} WHERE enqueued_at < $1"),
            purge_replayed: format!(
                "DELETE FROM {table} WHERE enqueued_at < $1 AND replayed = TRUE"
            ),
        }
    }
}

/// DDL creating the schema, table and indexes if they are missing.
#[must_use]
pub fn schema_statements(table: &QualifiedTable) -> Vec<String> {
    let name = table.table();
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", table.schema()),
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             id TEXT PRIMARY KEY, \
             message_type TEXT NOT NULL, \
             payload BYTEA NOT NULL, \
             reason TEXT NOT NULL, \
             error_message TEXT, \
             error_trace TEXT, \
             enqueued_at TIMESTAMPTZ NOT NULL, \
             attempts INTEGER NOT NULL DEFAULT 0, \
             metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb, \
             correlation_id TEXT, \
             causation_id TEXT, \
             source_queue TEXT, \
             replayed BOOLEAN NOT NULL DEFAULT FALSE, \
             replayed_at TIMESTAMPTZ, \
             replay_claimed_at TIMESTAMPTZ)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS \"{name}_reason_idx\" ON {table} (reason, enqueued_at)"
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS \"{name}_replayed_idx\" ON {table} (replayed, enqueued_at)"
        ),
    ]
}

/// Append `WHERE` conditions for every criterion set on `filter`.
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &DeadLetterFilter) {
    builder.push(" WHERE TRUE");

    if let Some(message_type) = &filter.message_type {
        builder.push(" AND message_type = ").push_bind(message_type.clone());
    }
    if let Some(reason) = filter.reason {
        builder.push(" AND reason = ").push_bind(reason.as_str());
    }
    if let Some(from) = filter.from {
        builder.push(" AND enqueued_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        builder.push(" AND enqueued_at <= ").push_bind(to);
    }
    if let Some(replayed) = filter.replayed {
        builder.push(" AND replayed = ").push_bind(replayed);
    }
    if let Some(source_queue) = &filter.source_queue {
        builder.push(" AND source_queue = ").push_bind(source_queue.clone());
    }
    if let Some(correlation_id) = &filter.correlation_id {
        builder.push(" AND correlation_id = ").push_bind(correlation_id.clone());
    }
    if let Some(min_attempts) = filter.min_attempts {
        builder
            .push(" AND attempts >= ")
            .push_bind(i32::try_from(min_attempts).unwrap_or(i32::MAX));
    }
}

fn select_query(table: &QualifiedTable, filter: &DeadLetterFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {COLUMNS} FROM {table}"));
    push_filter(&mut builder, filter);
    builder.push(" ORDER BY id");
    if let Some(limit) = filter.limit {
        builder
            .push(" LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if filter.skip > 0 {
        builder
            .push(" OFFSET ")
            .push_bind(i64::try_from(filter.skip).unwrap_or(i64::MAX));
    }
    builder
}

fn count_query(table: &QualifiedTable, filter: &DeadLetterFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT COUNT(*) FROM {table}"));
    push_filter(&mut builder, filter);
    builder
}

fn decode_error(error: &sqlx::Error) -> DlqError {
    DlqError::Serialization(error.to_string())
}

fn entry_from_row(row: &PgRow) -> Result<DeadLetterEntry> {
    let id: String = row.try_get("id").map_err(|e| decode_error(&e))?;
    let id = id
        .parse::<DeadLetterId>()
        .map_err(|e| DlqError::Serialization(format!("invalid dead-letter id '{id}': {e}")))?;

    let reason: String = row.try_get("reason").map_err(|e| decode_error(&e))?;
    let payload: Vec<u8> = row.try_get("payload").map_err(|e| decode_error(&e))?;
    let error_message: Option<String> = row.try_get("error_message").map_err(|e| decode_error(&e))?;
    let attempts: i32 = row.try_get("attempts").map_err(|e| decode_error(&e))?;
    let Json(metadata): Json<AHashMap<String, String>> =
        row.try_get("metadata").map_err(|e| decode_error(&e))?;

    Ok(DeadLetterEntry {
        id,
        message_type: row.try_get("message_type").map_err(|e| decode_error(&e))?,
        payload: Arc::from(payload),
        reason: reason.parse()?,
        failure: error_message.map(|message| FailureDetail {
            message,
            trace: row.try_get("error_trace").ok().flatten(),
        }),
        enqueued_at: row.try_get("enqueued_at").map_err(|e| decode_error(&e))?,
        attempts: u32::try_from(attempts).unwrap_or(0),
        metadata,
        correlation_id: row.try_get("correlation_id").map_err(|e| decode_error(&e))?,
        causation_id: row.try_get("causation_id").map_err(|e| decode_error(&e))?,
        source_queue: row.try_get("source_queue").map_err(|e| decode_error(&e))?,
        replayed: row.try_get("replayed").map_err(|e| decode_error(&e))?,
        replayed_at: row.try_get("replayed_at").map_err(|e| decode_error(&e))?,
    })
}

/// Durable dead-letter store backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresDeadLetterStore {
    pool: PgPool,
    table: QualifiedTable,
    statements: Arc<Statements>,
    command_timeout: Duration,
    claim_lease: Duration,
}

impl fmt::Debug for PostgresDeadLetterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresDeadLetterStore")
            .field("table", &self.table.to_string())
            .field("command_timeout", &self.command_timeout)
            .field("claim_lease", &self.claim_lease)
            .finish_non_exhaustive()
    }
}

impl PostgresDeadLetterStore {
    /// Connect using `config` and create the table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DlqError::Configuration`] for invalid names, or a storage error
    /// if the database cannot be reached or the schema cannot be created.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        if config.connection_string.trim().is_empty() {
            return Err(DlqError::Configuration(
                "connection_string must not be empty".to_string(),
            ));
        }

        let table = QualifiedTable::new(&config.schema, &config.table)?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.command_timeout())
            .connect(&config.connection_string)
            .await
            .map_err(|e| DlqError::storage("connect", table.to_string(), e))?;

        let store = Self::from_pool(pool, table, config.command_timeout());
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Use an existing pool. The schema is not created.
    #[must_use]
    pub fn from_pool(pool: PgPool, table: QualifiedTable, command_timeout: Duration) -> Self {
        Self {
            pool,
            statements: Arc::new(Statements::new(&table)),
            table,
            command_timeout,
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    /// Replace [`DEFAULT_CLAIM_LEASE`].
    ///
    /// Claims are not owned: once a claim expires another replayer can take it
    /// while the first handler is still running, and either replayer may mark
    /// the entry replayed. Pick a lease longer than the slowest handler.
    #[must_use]
    pub const fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    #[must_use]
    pub const fn table(&self) -> &QualifiedTable {
        &self.table
    }

    /// Create the schema, table and indexes if missing.
    ///
    /// # Errors
    ///
    /// Returns a storage error if any statement fails.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in schema_statements(&self.table) {
            self.run("ensure_schema", &self.table, sqlx::query(&statement).execute(&self.pool))
                .await?;
        }
        tracing::info!(table = %self.table, "Dead-letter schema ready");
        Ok(())
    }

    /// Await `command`, bounded by the configured command timeout.
    async fn run<T>(
        &self,
        operation: &'static str,
        target: impl fmt::Display,
        command: impl Future<Output = std::result::Result<T, sqlx::Error>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.command_timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(DlqError::storage(operation, target.to_string(), e)),
            Err(_) => Err(DlqError::Timeout {
                operation,
                target: target.to_string(),
                after: self.command_timeout,
            }),
        }
    }
}

#[async_trait]
impl DeadLetterStore for PostgresDeadLetterStore {
    async fn insert(&self, entry: &DeadLetterEntry) -> Result<()> {
        let (error_message, error_trace) = entry.failure.as_ref().map_or((None, None), |failure| {
            (Some(failure.message.clone()), failure.trace.clone())
        });

        let query = sqlx::query(&self.statements.insert)
            .bind(entry.id.to_string())
            .bind(entry.message_type.clone())
            .bind(entry.payload.to_vec())
            .bind(entry.reason.as_str())
            .bind(error_message)
            .bind(error_trace)
            .bind(entry.enqueued_at)
            .bind(i32::try_from(entry.attempts).unwrap_or(i32::MAX))
            .bind(Json(entry.metadata.clone()))
            .bind(entry.correlation_id.clone())
            .bind(entry.causation_id.clone())
            .bind(entry.source_queue.clone())
            .bind(entry.replayed)
            .bind(entry.replayed_at);

        self.run("insert", entry.id, query.execute(&self.pool)).await?;
        Ok(())
    }

    async fn get(&self, id: &DeadLetterId) -> Result<Option<DeadLetterEntry>> {
        let query = sqlx::query(&self.statements.select_by_id).bind(id.to_string());
        let row = self.run("get", id, query.fetch_optional(&self.pool)).await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn query(&self, filter: &DeadLetterFilter) -> Result<Vec<DeadLetterEntry>> {
        let mut builder = select_query(&self.table, filter);
        let rows = self
            .run("query", &self.table, builder.build().fetch_all(&self.pool))
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn count(&self, filter: &DeadLetterFilter) -> Result<u64> {
        let mut builder = count_query(&self.table, &filter.unpaginated());
        let row = self
            .run("count", &self.table, builder.build().fetch_one(&self.pool))
            .await?;
        let count: i64 = row.try_get(0).map_err(|e| decode_error(&e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn try_claim(&self, id: &DeadLetterId) -> Result<bool> {
        let query = sqlx::query(&self.statements.claim)
            .bind(id.to_string())
            .bind(self.claim_lease.as_secs_f64());
        let result = self.run("claim", id, query.execute(&self.pool)).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_replayed(&self, id: &DeadLetterId, at: DateTime<Utc>) -> Result<bool> {
        let query = sqlx::query(&self.statements.mark_replayed)
            .bind(id.to_string())
            .bind(at);
        let result = self.run("mark_replayed", id, query.execute(&self.pool)).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_claim(&self, id: &DeadLetterId) -> Result<()> {
        let query = sqlx::query(&self.statements.release).bind(id.to_string());
        self.run("release_claim", id, query.execute(&self.pool)).await?;
        Ok(())
    }

    async fn purge(&self, older_than: DateTime<Utc>, replayed_only: bool) -> Result<u64> {
        let sql = if replayed_only {
            &self.statements.purge_replayed
        } else {
            &self.statements.purge
        };
        let result = self
            .run("purge", &self.table, sqlx::query(sql).bind(older_than).execute(&self.pool))
            .await?;
        Ok(result.rows_affected())
    }
}
