use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ActorId, AggregateId, AggregateRecord, AggregateType, EventId, OutboxEvent, OutboxQuery,
    OutboxStatus, PartyId, ProcessedEvent, Result, StoreError, TransitionRecord,
    store::{OutboxStore, ProcessedEventStore, Store, StoreTransaction},
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const AGGREGATE_COLUMNS: &str = "id, aggregate_type, status, parent_id, owner_id, reference_number, version, state, created_at, updated_at";

const TRANSITION_COLUMNS: &str = "sequence, id, aggregate_id, aggregate_type, from_status, to_status, transition_kind, triggered_by, trigger_source, reason, metadata, created_at";

const OUTBOX_COLUMNS: &str = "id, event_type, aggregate_type, aggregate_id, payload, status, retry_count, max_retries, last_error, schema_version, created_at, processed_at, claimed_by, claimed_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets how long a transaction waits for a row lock before failing with
    /// `LockUnavailable`.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Explains why a completion or failure by `worker_id` matched no row.
    async fn settle_refused(&self, id: EventId, worker_id: &str) -> StoreError {
        match self.get_event(id).await {
            Ok(Some(event)) if event.status != OutboxStatus::Processing => StoreError::OutboxStateConflict {
                id,
                status: event.status,
                expected: "PROCESSING",
            },
            Ok(Some(_)) => StoreError::ClaimLost {
                id,
                worker_id: worker_id.to_string(),
            },
            Ok(None) => StoreError::OutboxEventNotFound(id),
            Err(err) => err,
        }
    }
}

/// Maps lock timeouts, serialization failures and deadlocks to
/// `LockUnavailable`; everything else stays a database error.
fn map_db_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && let Some(code) = db_err.code()
        && matches!(code.as_ref(), "55P03" | "40001" | "40P01")
    {
        return StoreError::LockUnavailable(db_err.message().to_string());
    }
    StoreError::Database(e)
}

fn decode<T: std::str::FromStr>(value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::Decode(e.to_string()))
}

fn row_to_aggregate(row: PgRow) -> Result<AggregateRecord> {
    let aggregate_type: String = row.try_get("aggregate_type")?;
    Ok(AggregateRecord {
        id: AggregateId::from_uuid(row.try_get::<Uuid, _>("id")?),
        aggregate_type: decode(&aggregate_type)?,
        status: row.try_get("status")?,
        parent_id: row
            .try_get::<Option<Uuid>, _>("parent_id")?
            .map(AggregateId::from_uuid),
        owner_id: row
            .try_get::<Option<Uuid>, _>("owner_id")?
            .map(PartyId::from_uuid),
        reference_number: row.try_get("reference_number")?,
        version: row.try_get("version")?,
        state: row.try_get("state")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_transition(row: PgRow) -> Result<TransitionRecord> {
    let aggregate_type: String = row.try_get("aggregate_type")?;
    let trigger_source: String = row.try_get("trigger_source")?;
    let metadata_json: serde_json::Value = row.try_get("metadata")?;
    let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

    Ok(TransitionRecord {
        id: row.try_get("id")?,
        sequence: row.try_get("sequence")?,
        aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
        aggregate_type: decode(&aggregate_type)?,
        from_status: row.try_get("from_status")?,
        to_status: row.try_get("to_status")?,
        transition_kind: row.try_get("transition_kind")?,
        triggered_by: row
            .try_get::<Option<Uuid>, _>("triggered_by")?
            .map(ActorId::from_uuid),
        trigger_source: decode(&trigger_source)?,
        reason: row.try_get("reason")?,
        metadata,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_outbox_event(row: PgRow) -> Result<OutboxEvent> {
    let aggregate_type: String = row.try_get("aggregate_type")?;
    let status: String = row.try_get("status")?;

    Ok(OutboxEvent {
        id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        event_type: row.try_get("event_type")?,
        aggregate_type: decode(&aggregate_type)?,
        aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
        payload: row.try_get("payload")?,
        status: decode(&status)?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        last_error: row.try_get("last_error")?,
        schema_version: row.try_get("schema_version")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: row.try_get("claimed_at")?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters.
        let millis = self.lock_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = '{millis}ms'"))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn get_aggregate(&self, id: AggregateId) -> Result<Option<AggregateRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {AGGREGATE_COLUMNS} FROM aggregates WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_aggregate).transpose()
    }

    async fn children(
        &self,
        aggregate_type: AggregateType,
        parent_id: AggregateId,
    ) -> Result<Vec<AggregateRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {AGGREGATE_COLUMNS} FROM aggregates WHERE aggregate_type = $1 AND parent_id = $2 ORDER BY created_at ASC, id ASC"
        ))
        .bind(aggregate_type.as_str())
        .bind(parent_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_aggregate).collect()
    }

    async fn transitions_for(&self, id: AggregateId) -> Result<Vec<TransitionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSITION_COLUMNS} FROM state_transitions WHERE aggregate_id = $1 ORDER BY sequence ASC"
        ))
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_transition).collect()
    }
}

struct PgStoreTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn lock_aggregate(&mut self, id: AggregateId) -> Result<Option<AggregateRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {AGGREGATE_COLUMNS} FROM aggregates WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        row.map(row_to_aggregate).transpose()
    }

    async fn get_aggregate(&mut self, id: AggregateId) -> Result<Option<AggregateRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {AGGREGATE_COLUMNS} FROM aggregates WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        row.map(row_to_aggregate).transpose()
    }

    async fn children(
        &mut self,
        aggregate_type: AggregateType,
        parent_id: AggregateId,
    ) -> Result<Vec<AggregateRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {AGGREGATE_COLUMNS} FROM aggregates WHERE aggregate_type = $1 AND parent_id = $2 ORDER BY created_at ASC, id ASC"
        ))
        .bind(aggregate_type.as_str())
        .bind(parent_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        rows.into_iter().map(row_to_aggregate).collect()
    }

    async fn count_owned(
        &mut self,
        aggregate_type: AggregateType,
        owner_id: PartyId,
        statuses: &[&str],
    ) -> Result<i64> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM aggregates WHERE aggregate_type = $1 AND owner_id = $2 AND status = ANY($3)",
        )
        .bind(aggregate_type.as_str())
        .bind(owner_id.as_uuid())
        .bind(statuses)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        Ok(count)
    }

    async fn lock_owner(&mut self, aggregate_type: AggregateType, owner_id: PartyId) -> Result<()> {
        // Transaction-scoped advisory lock, released on commit or rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("{}:{}", aggregate_type.as_str(), owner_id.as_uuid()))
            .execute(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn insert_aggregate(&mut self, record: &AggregateRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO aggregates (id, aggregate_type, status, parent_id, owner_id, reference_number, version, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.aggregate_type.as_str())
        .bind(&record.status)
        .bind(record.parent_id.map(|id| id.as_uuid()))
        .bind(record.owner_id.map(|id| id.as_uuid()))
        .bind(&record.reference_number)
        .bind(record.version)
        .bind(&record.state)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("aggregates_pkey")
            {
                return StoreError::DuplicateAggregate(record.id);
            }
            map_db_error(e)
        })?;

        Ok(())
    }

    async fn update_aggregate(
        &mut self,
        record: &AggregateRecord,
        expected_version: i64,
    ) -> Result<i64> {
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE aggregates
            SET status = $2, parent_id = $3, owner_id = $4, reference_number = $5,
                state = $6, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $7
            RETURNING version
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.status)
        .bind(record.parent_id.map(|id| id.as_uuid()))
        .bind(record.owner_id.map(|id| id.as_uuid()))
        .bind(&record.reference_number)
        .bind(&record.state)
        .bind(expected_version)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        if let Some(version) = updated {
            return Ok(version);
        }

        let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM aggregates WHERE id = $1")
            .bind(record.id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        match actual {
            Some(actual) => Err(StoreError::VersionConflict {
                aggregate_id: record.id,
                expected: expected_version,
                actual,
            }),
            None => Err(StoreError::AggregateNotFound(record.id)),
        }
    }

    async fn append_transition(&mut self, record: &TransitionRecord) -> Result<i64> {
        let metadata_json = serde_json::to_value(&record.metadata)?;

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO state_transitions (id, aggregate_id, aggregate_type, from_status, to_status, transition_kind, triggered_by, trigger_source, reason, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING sequence
            "#,
        )
        .bind(record.id)
        .bind(record.aggregate_id.as_uuid())
        .bind(record.aggregate_type.as_str())
        .bind(&record.from_status)
        .bind(&record.to_status)
        .bind(&record.transition_kind)
        .bind(record.triggered_by.map(|id| id.as_uuid()))
        .bind(record.trigger_source.as_str())
        .bind(&record.reason)
        .bind(metadata_json)
        .bind(record.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        Ok(sequence)
    }

    async fn append_outbox_event(&mut self, event: &OutboxEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, event_type, aggregate_type, aggregate_id, payload, status, retry_count, max_retries, schema_version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id.as_uuid())
        .bind(&event.event_type)
        .bind(event.aggregate_type.as_str())
        .bind(event.aggregate_id.as_uuid())
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(event.retry_count)
        .bind(event.max_retries)
        .bind(event.schema_version)
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        Ok(())
    }

    async fn next_sequence(&mut self, scope: &str, year: i32) -> Result<i64> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO reference_sequences (scope, year, last_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (scope, year) DO UPDATE SET last_value = reference_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(scope)
        .bind(year)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_db_error)?;

        Ok(value)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(map_db_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn claim_batch(
        &self,
        worker_id: &str,
        limit: usize,
        lease: chrono::Duration,
    ) -> Result<Vec<OutboxEvent>> {
        // The cutoff is taken from the server clock, like `claimed_at`.
        let lease_secs = lease.num_milliseconds() as f64 / 1000.0;

        // One statement: candidates are row-locked with SKIP LOCKED, so two
        // workers never claim the same row.
        let rows = sqlx::query(&format!(
            r#"
            WITH claimable AS (
                SELECT id FROM outbox_events
                WHERE status = 'PENDING'
                   OR (status = 'PROCESSING' AND claimed_at < NOW() - make_interval(secs => $3))
                ORDER BY created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_events o
            SET status = 'PROCESSING', claimed_by = $1, claimed_at = NOW()
            FROM claimable
            WHERE o.id = claimable.id
            RETURNING {cols}
            "#,
            cols = OUTBOX_COLUMNS
                .split(", ")
                .map(|c| format!("o.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .bind(worker_id)
        .bind(limit as i64)
        .bind(lease_secs)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        let mut events = rows
            .into_iter()
            .map(row_to_outbox_event)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING does not preserve the CTE order.
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    async fn mark_completed(&self, id: EventId, worker_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'COMPLETED', processed_at = NOW(), last_error = NULL,
                claimed_by = NULL, claimed_at = NULL
            WHERE id = $1 AND status = 'PROCESSING' AND claimed_by = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        Err(self.settle_refused(id, worker_id).await)
    }

    async fn mark_failed(&self, id: EventId, worker_id: &str, error: &str) -> Result<OutboxStatus> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE outbox_events
            SET retry_count = retry_count + 1,
                last_error = $3,
                status = CASE WHEN retry_count + 1 >= max_retries THEN 'FAILED' ELSE 'PENDING' END,
                claimed_by = NULL,
                claimed_at = NULL
            WHERE id = $1 AND status = 'PROCESSING' AND claimed_by = $2
            RETURNING status
            "#,
        )
        .bind(id.as_uuid())
        .bind(worker_id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        match status {
            Some(status) => decode(&status),
            None => Err(self.settle_refused(id, worker_id).await),
        }
    }

    async fn get_event(&self, id: EventId) -> Result<Option<OutboxEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_events WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_outbox_event).transpose()
    }

    async fn query_events(&self, query: OutboxQuery) -> Result<Vec<OutboxEvent>> {
        let mut sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox_events WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }
        if query.aggregate_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND aggregate_id = ${param_count}"));
        }
        if query.aggregate_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND aggregate_type = ${param_count}"));
        }
        if query.event_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND event_type = ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(status) = query.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(id) = query.aggregate_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(aggregate_type) = query.aggregate_type {
            sqlx_query = sqlx_query.bind(aggregate_type.as_str());
        }
        if let Some(event_type) = query.event_type {
            sqlx_query = sqlx_query.bind(event_type);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_outbox_event).collect()
    }

    async fn requeue_failed(&self, id: EventId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'PENDING', retry_count = 0
            WHERE id = $1 AND status = 'FAILED'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.get_event(id).await? {
            Some(event) => Err(StoreError::OutboxStateConflict {
                id,
                status: event.status,
                expected: "FAILED",
            }),
            None => Err(StoreError::OutboxEventNotFound(id)),
        }
    }
}

#[async_trait]
impl ProcessedEventStore for PostgresStore {
    async fn has_processed(&self, event_id: EventId, handler_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1 AND handler_name = $2)",
        )
        .bind(event_id.as_uuid())
        .bind(handler_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn record_processed(&self, marker: &ProcessedEvent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_events (event_id, handler_name, processed_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id, handler_name) DO NOTHING
            "#,
        )
        .bind(marker.event_id.as_uuid())
        .bind(&marker.handler_name)
        .bind(marker.processed_at)
        .bind(marker.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM processed_events WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
