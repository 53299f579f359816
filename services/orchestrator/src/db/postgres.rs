//! Postgres store.
//!
//! Each [`Transaction`] is a SQLx transaction running at `SERIALIZABLE`
//! isolation. Dropping it without committing rolls it back. Structured
//! fields (connection details, constraints, instance properties) are stored
//! as JSONB; statuses are stored as their snake_case names.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_id::{InstanceId, WorkerSecret};
use ferry_types::{
    Batch, Constraint, Instance, InstanceOverrides, InstanceProperties, QueueEntry, Source,
    SourceConnection, UnknownStatus, Window,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;

use super::repo::{Assignment, BatchFilter, InstanceFilter, QueueFilter, Store, Transaction};
use super::{DbConfig, DbError};

/// Postgres-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations.
    ///
    /// Migrations are loaded at runtime from the first directory found.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        info!("Running database migrations");

        let candidates = vec![
            std::path::PathBuf::from("./migrations"),
            std::path::PathBuf::from("services/orchestrator/migrations"),
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator.run(&self.pool).await.map_err(DbError::Migration)?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(DbError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(DbError::Query)?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

// =============================================================================
// Rows
// =============================================================================

fn corrupt(entity: &'static str) -> impl Fn(UnknownStatus) -> DbError {
    move |e| DbError::Corrupt {
        entity,
        message: e.to_string(),
    }
}

struct SourceRow {
    name: String,
    source_type: String,
    connection: Json<SourceConnection>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for SourceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            name: row.try_get("name")?,
            source_type: row.try_get("source_type")?,
            connection: row.try_get("connection")?,
        })
    }
}

impl TryFrom<SourceRow> for Source {
    type Error = DbError;

    fn try_from(row: SourceRow) -> Result<Self, DbError> {
        Ok(Self {
            name: row.name,
            source_type: row.source_type.parse().map_err(corrupt("source"))?,
            connection: row.connection.0,
        })
    }
}

struct BatchRow {
    name: String,
    target: String,
    target_project: Option<String>,
    storage_pool: Option<String>,
    include_expression: String,
    constraints: Json<Vec<Constraint>>,
    status: String,
    status_message: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for BatchRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            name: row.try_get("name")?,
            target: row.try_get("target")?,
            target_project: row.try_get("target_project")?,
            storage_pool: row.try_get("storage_pool")?,
            include_expression: row.try_get("include_expression")?,
            constraints: row.try_get("constraints")?,
            status: row.try_get("status")?,
            status_message: row.try_get("status_message")?,
        })
    }
}

impl TryFrom<BatchRow> for Batch {
    type Error = DbError;

    fn try_from(row: BatchRow) -> Result<Self, DbError> {
        Ok(Self {
            name: row.name,
            target: row.target,
            target_project: row.target_project,
            storage_pool: row.storage_pool,
            include_expression: row.include_expression,
            constraints: row.constraints.0,
            status: row.status.parse().map_err(corrupt("batch"))?,
            status_message: row.status_message,
        })
    }
}

struct InstanceRow {
    uuid: Uuid,
    source: String,
    properties: Json<InstanceProperties>,
    overrides: Json<InstanceOverrides>,
    batch: Option<String>,
    status: String,
    status_message: String,
    needs_disk_import: bool,
    last_update_from_source: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for InstanceRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            uuid: row.try_get("uuid")?,
            source: row.try_get("source")?,
            properties: row.try_get("properties")?,
            overrides: row.try_get("overrides")?,
            batch: row.try_get("batch")?,
            status: row.try_get("status")?,
            status_message: row.try_get("status_message")?,
            needs_disk_import: row.try_get("needs_disk_import")?,
            last_update_from_source: row.try_get("last_update_from_source")?,
        })
    }
}

impl TryFrom<InstanceRow> for Instance {
    type Error = DbError;

    fn try_from(row: InstanceRow) -> Result<Self, DbError> {
        Ok(Self {
            uuid: InstanceId::from_uuid(row.uuid),
            source: row.source,
            properties: row.properties.0,
            overrides: row.overrides.0,
            batch: row.batch,
            status: row.status.parse().map_err(corrupt("instance"))?,
            status_message: row.status_message,
            needs_disk_import: row.needs_disk_import,
            last_update_from_source: row.last_update_from_source,
        })
    }
}

struct WindowRow {
    batch: String,
    name: String,
    start_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
    lockout_at: Option<DateTime<Utc>>,
    capacity: i64,
}

impl<'r> sqlx::FromRow<'r, PgRow> for WindowRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            batch: row.try_get("batch")?,
            name: row.try_get("name")?,
            start_at: row.try_get("start_at")?,
            end_at: row.try_get("end_at")?,
            lockout_at: row.try_get("lockout_at")?,
            capacity: row.try_get("capacity")?,
        })
    }
}

impl From<WindowRow> for Window {
    fn from(row: WindowRow) -> Self {
        Self {
            name: row.name,
            batch: row.batch,
            start: row.start_at,
            end: row.end_at,
            lockout: row.lockout_at,
            capacity: row.capacity,
        }
    }
}

struct QueueRow {
    instance: Uuid,
    batch: String,
    secret: Uuid,
    status: String,
    status_message: String,
    window_name: Option<String>,
    needs_disk_import: bool,
}

impl<'r> sqlx::FromRow<'r, PgRow> for QueueRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            instance: row.try_get("instance")?,
            batch: row.try_get("batch")?,
            secret: row.try_get("secret")?,
            status: row.try_get("status")?,
            status_message: row.try_get("status_message")?,
            window_name: row.try_get("window_name")?,
            needs_disk_import: row.try_get("needs_disk_import")?,
        })
    }
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = DbError;

    fn try_from(row: QueueRow) -> Result<Self, DbError> {
        Ok(Self {
            instance: InstanceId::from_uuid(row.instance),
            batch: row.batch,
            secret: WorkerSecret::from_uuid(row.secret),
            status: row.status.parse().map_err(corrupt("queue entry"))?,
            status_message: row.status_message,
            window: row.window_name,
            needs_disk_import: row.needs_disk_import,
        })
    }
}

const SOURCE_COLUMNS: &str = "SELECT name, source_type, connection FROM sources";
const BATCH_COLUMNS: &str = "SELECT name, target, target_project, storage_pool, include_expression, constraints, status, status_message FROM batches";
const INSTANCE_COLUMNS: &str = "SELECT uuid, source, properties, overrides, batch, status, status_message, needs_disk_import, last_update_from_source FROM instances";
const WINDOW_COLUMNS: &str =
    "SELECT batch, name, start_at, end_at, lockout_at, capacity FROM windows";
const QUEUE_COLUMNS: &str = "SELECT instance, batch, secret, status, status_message, window_name, needs_disk_import FROM queue";

/// Append `WHERE (..) OR (..)` with one group per filter.
fn push_filters<'a, F>(
    builder: &mut QueryBuilder<'a, Postgres>,
    filters: &[F],
    mut push: impl FnMut(&mut QueryBuilder<'a, Postgres>, &F),
) {
    for (i, filter) in filters.iter().enumerate() {
        builder.push(if i == 0 { " WHERE (TRUE" } else { " OR (TRUE" });
        push(builder, filter);
        builder.push(")");
    }
}

fn expect_one(rows: u64, entity: &'static str, key: impl ToString) -> Result<(), DbError> {
    if rows == 0 {
        Err(DbError::not_found(entity, key))
    } else {
        Ok(())
    }
}

// =============================================================================
// Transaction
// =============================================================================

#[async_trait]
impl Transaction for PgTransaction {
    async fn create_source(&mut self, source: &Source) -> Result<(), DbError> {
        sqlx::query("INSERT INTO sources (name, source_type, connection) VALUES ($1, $2, $3)")
            .bind(&source.name)
            .bind(source.source_type.as_str())
            .bind(Json(&source.connection))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| DbError::from_query("source", &source.name, e))?;
        Ok(())
    }

    async fn get_source(&mut self, name: &str) -> Result<Source, DbError> {
        sqlx::query_as::<_, SourceRow>(&format!("{SOURCE_COLUMNS} WHERE name = $1"))
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| DbError::from_query("source", name, e))?
            .ok_or_else(|| DbError::not_found("source", name))?
            .try_into()
    }

    async fn list_sources(&mut self) -> Result<Vec<Source>, DbError> {
        sqlx::query_as::<_, SourceRow>(&format!("{SOURCE_COLUMNS} ORDER BY name"))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(DbError::Query)?
            .into_iter()
            .map(Source::try_from)
            .collect()
    }

    async fn create_batch(&mut self, batch: &Batch) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO batches
                (name, target, target_project, storage_pool, include_expression,
                 constraints, status, status_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&batch.name)
        .bind(&batch.target)
        .bind(&batch.target_project)
        .bind(&batch.storage_pool)
        .bind(&batch.include_expression)
        .bind(Json(&batch.constraints))
        .bind(batch.status.as_str())
        .bind(&batch.status_message)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| DbError::from_query("batch", &batch.name, e))?;
        Ok(())
    }

    async fn get_batch(&mut self, name: &str) -> Result<Batch, DbError> {
        sqlx::query_as::<_, BatchRow>(&format!("{BATCH_COLUMNS} WHERE name = $1"))
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| DbError::from_query("batch", name, e))?
            .ok_or_else(|| DbError::not_found("batch", name))?
            .try_into()
    }

    async fn list_batches(&mut self, filters: &[BatchFilter]) -> Result<Vec<Batch>, DbError> {
        let mut builder = QueryBuilder::<Postgres>::new(BATCH_COLUMNS);
        push_filters(&mut builder, filters, |b, f| {
            if let Some(name) = &f.name {
                b.push(" AND name = ").push_bind(name.clone());
            }
            if let Some(status) = f.status {
                b.push(" AND status = ").push_bind(status.as_str());
            }
        });
        builder.push(" ORDER BY name");

        builder
            .build_query_as::<BatchRow>()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(DbError::Query)?
            .into_iter()
            .map(Batch::try_from)
            .collect()
    }

    async fn update_batch(&mut self, batch: &Batch) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE batches
            SET target = $2,
                target_project = $3,
                storage_pool = $4,
                include_expression = $5,
                constraints = $6,
                status = $7,
                status_message = $8
            WHERE name = $1
            "#,
        )
        .bind(&batch.name)
        .bind(&batch.target)
        .bind(&batch.target_project)
        .bind(&batch.storage_pool)
        .bind(&batch.include_expression)
        .bind(Json(&batch.constraints))
        .bind(batch.status.as_str())
        .bind(&batch.status_message)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| DbError::from_query("batch", &batch.name, e))?;

        expect_one(result.rows_affected(), "batch", &batch.name)
    }

    async fn delete_batch(&mut self, name: &str) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM batches WHERE name = $1")
            .bind(name)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| DbError::from_query("batch", name, e))?;

        expect_one(result.rows_affected(), "batch", name)
    }

    async fn create_instance(&mut self, instance: &Instance) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO instances
                (uuid, source, properties, overrides, batch, status, status_message,
                 needs_disk_import, last_update_from_source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(instance.uuid.uuid())
        .bind(&instance.source)
        .bind(Json(&instance.properties))
        .bind(Json(&instance.overrides))
        .bind(&instance.batch)
        .bind(instance.status.as_str())
        .bind(&instance.status_message)
        .bind(instance.needs_disk_import)
        .bind(instance.last_update_from_source)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| DbError::from_query("instance", instance.uuid, e))?;
        Ok(())
    }

    async fn get_instance(&mut self, uuid: InstanceId) -> Result<Instance, DbError> {
        sqlx::query_as::<_, InstanceRow>(&format!("{INSTANCE_COLUMNS} WHERE uuid = $1"))
            .bind(uuid.uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| DbError::from_query("instance", uuid, e))?
            .ok_or_else(|| DbError::not_found("instance", uuid))?
            .try_into()
    }

    async fn list_instances(
        &mut self,
        filters: &[InstanceFilter],
    ) -> Result<Vec<Instance>, DbError> {
        let mut builder = QueryBuilder::<Postgres>::new(INSTANCE_COLUMNS);
        push_filters(&mut builder, filters, |b, f| {
            if let Some(uuid) = f.uuid {
                b.push(" AND uuid = ").push_bind(uuid.uuid());
            }
            if let Some(source) = &f.source {
                b.push(" AND source = ").push_bind(source.clone());
            }
            match &f.assignment {
                Some(Assignment::Unassigned) => {
                    b.push(" AND batch IS NULL");
                }
                Some(Assignment::Batch(name)) => {
                    b.push(" AND batch = ").push_bind(name.clone());
                }
                None => {}
            }
            if let Some(status) = f.status {
                b.push(" AND status = ").push_bind(status.as_str());
            }
        });
        builder.push(" ORDER BY uuid");

        builder
            .build_query_as::<InstanceRow>()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(DbError::Query)?
            .into_iter()
            .map(Instance::try_from)
            .collect()
    }

    async fn update_instance(&mut self, instance: &Instance) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET source = $2,
                properties = $3,
                overrides = $4,
                batch = $5,
                status = $6,
                status_message = $7,
                needs_disk_import = $8,
                last_update_from_source = $9
            WHERE uuid = $1
            "#,
        )
        .bind(instance.uuid.uuid())
        .bind(&instance.source)
        .bind(Json(&instance.properties))
        .bind(Json(&instance.overrides))
        .bind(&instance.batch)
        .bind(instance.status.as_str())
        .bind(&instance.status_message)
        .bind(instance.needs_disk_import)
        .bind(instance.last_update_from_source)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| DbError::from_query("instance", instance.uuid, e))?;

        expect_one(result.rows_affected(), "instance", instance.uuid)
    }

    async fn delete_instance(&mut self, uuid: InstanceId) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM instances WHERE uuid = $1")
            .bind(uuid.uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| DbError::from_query("instance", uuid, e))?;

        expect_one(result.rows_affected(), "instance", uuid)
    }

    async fn create_window(&mut self, window: &Window) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO windows (batch, name, start_at, end_at, lockout_at, capacity)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&window.batch)
        .bind(&window.name)
        .bind(window.start)
        .bind(window.end)
        .bind(window.lockout)
        .bind(window.capacity)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| DbError::from_query("window", &window.name, e))?;
        Ok(())
    }

    async fn list_windows(&mut self, batch: &str) -> Result<Vec<Window>, DbError> {
        let rows = sqlx::query_as::<_, WindowRow>(&format!(
            "{WINDOW_COLUMNS} WHERE batch = $1 ORDER BY start_at ASC NULLS FIRST, name"
        ))
        .bind(batch)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(DbError::Query)?;

        Ok(rows.into_iter().map(Window::from).collect())
    }

    async fn update_window(&mut self, window: &Window) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE windows
            SET start_at = $3,
                end_at = $4,
                lockout_at = $5,
                capacity = $6
            WHERE batch = $1 AND name = $2
            "#,
        )
        .bind(&window.batch)
        .bind(&window.name)
        .bind(window.start)
        .bind(window.end)
        .bind(window.lockout)
        .bind(window.capacity)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| DbError::from_query("window", &window.name, e))?;

        expect_one(result.rows_affected(), "window", &window.name)
    }

    async fn delete_window(&mut self, batch: &str, name: &str) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM windows WHERE batch = $1 AND name = $2")
            .bind(batch)
            .bind(name)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| DbError::from_query("window", name, e))?;

        expect_one(result.rows_affected(), "window", name)
    }

    async fn create_queue_entry(&mut self, entry: &QueueEntry) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO queue
                (instance, batch, secret, status, status_message, window_name, needs_disk_import)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.instance.uuid())
        .bind(&entry.batch)
        .bind(entry.secret.uuid())
        .bind(entry.status.as_str())
        .bind(&entry.status_message)
        .bind(&entry.window)
        .bind(entry.needs_disk_import)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| DbError::from_query("queue entry", entry.instance, e))?;
        Ok(())
    }

    async fn get_queue_entry(&mut self, instance: InstanceId) -> Result<QueueEntry, DbError> {
        sqlx::query_as::<_, QueueRow>(&format!("{QUEUE_COLUMNS} WHERE instance = $1"))
            .bind(instance.uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| DbError::from_query("queue entry", instance, e))?
            .ok_or_else(|| DbError::not_found("queue entry", instance))?
            .try_into()
    }

    async fn list_queue_entries(
        &mut self,
        filters: &[QueueFilter],
    ) -> Result<Vec<QueueEntry>, DbError> {
        let mut builder = QueryBuilder::<Postgres>::new(QUEUE_COLUMNS);
        push_filters(&mut builder, filters, |b, f| {
            if let Some(instance) = f.instance {
                b.push(" AND instance = ").push_bind(instance.uuid());
            }
            if let Some(batch) = &f.batch {
                b.push(" AND batch = ").push_bind(batch.clone());
            }
            if let Some(status) = f.status {
                b.push(" AND status = ").push_bind(status.as_str());
            }
            if let Some(window) = &f.window {
                b.push(" AND window_name = ").push_bind(window.clone());
            }
        });
        builder.push(" ORDER BY instance");

        builder
            .build_query_as::<QueueRow>()
            .fetch_all(&mut *self.tx)
            .await
            .map_err(DbError::Query)?
            .into_iter()
            .map(QueueEntry::try_from)
            .collect()
    }

    async fn update_queue_entry(&mut self, entry: &QueueEntry) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE queue
            SET status = $2,
                status_message = $3,
                window_name = $4,
                needs_disk_import = $5
            WHERE instance = $1
            "#,
        )
        .bind(entry.instance.uuid())
        .bind(entry.status.as_str())
        .bind(&entry.status_message)
        .bind(&entry.window)
        .bind(entry.needs_disk_import)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| DbError::from_query("queue entry", entry.instance, e))?;

        expect_one(result.rows_affected(), "queue entry", entry.instance)
    }

    async fn delete_queue_entry(&mut self, instance: InstanceId) -> Result<(), DbError> {
        let result = sqlx::query("DELETE FROM queue WHERE instance = $1")
            .bind(instance.uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| DbError::from_query("queue entry", instance, e))?;

        expect_one(result.rows_affected(), "queue entry", instance)
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await.map_err(DbError::Query)
    }
}
