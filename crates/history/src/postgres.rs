use async_trait::async_trait;
use common::FlowId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EntryId, HistoryEntry, HistoryError, HistoryQuery, Result,
    store::{EntryStream, HistoryStore},
};

const SELECT_COLUMNS: &str = "SELECT id, task_id, flow_id, action, description, time FROM flow_history";

/// PostgreSQL-backed history store.
///
/// Write order is the order of the `seq` column, which is assigned by the
/// database on insert.
#[derive(Clone)]
pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    /// Creates a new PostgreSQL history store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_entry(row: PgRow) -> Result<HistoryEntry> {
        let flow_id: String = row.try_get("flow_id")?;
        Ok(HistoryEntry {
            entry_id: EntryId::from_uuid(row.try_get::<Uuid, _>("id")?),
            task_id: row.try_get("task_id")?,
            flow_id: FlowId::new(flow_id),
            action: row.try_get("action")?,
            description: row.try_get("description")?,
            time: row.try_get("time")?,
        })
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn append(&self, entries: Vec<HistoryEntry>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for entry in &entries {
            sqlx::query(
                r#"
                INSERT INTO flow_history (id, task_id, flow_id, action, description, time)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(entry.entry_id.as_uuid())
            .bind(&entry.task_id)
            .bind(entry.flow_id.as_str())
            .bind(&entry.action)
            .bind(&entry.description)
            .bind(entry.time)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_unique_violation()
                {
                    return HistoryError::DuplicateEntry(entry.entry_id);
                }
                HistoryError::Database(e)
            })?;
        }

        tx.commit().await?;
        metrics::counter!("history_entries_appended").increment(entries.len() as u64);
        Ok(())
    }

    async fn get_by_task(&self, task_id: &str) -> Result<Vec<HistoryEntry>> {
        self.query(HistoryQuery::for_task(task_id)).await
    }

    async fn get_by_flow(&self, flow_id: &FlowId) -> Result<Vec<HistoryEntry>> {
        self.query(HistoryQuery::for_flow(flow_id.clone())).await
    }

    async fn query(&self, query: HistoryQuery) -> Result<Vec<HistoryEntry>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.flow_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND flow_id = ${param_count}"));
        }
        if query.task_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND task_id = ${param_count}"));
        }
        if query.from_time.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND time >= ${param_count}"));
        }
        if query.to_time.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND time <= ${param_count}"));
        }

        sql.push_str(" ORDER BY seq ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(ref flow_id) = query.flow_id {
            sqlx_query = sqlx_query.bind(flow_id.as_str().to_string());
        }
        if let Some(task_id) = query.task_id {
            sqlx_query = sqlx_query.bind(task_id);
        }
        if let Some(from) = query.from_time {
            sqlx_query = sqlx_query.bind(from);
        }
        if let Some(to) = query.to_time {
            sqlx_query = sqlx_query.bind(to);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_entry).collect()
    }

    async fn stream_all(&self) -> Result<EntryStream> {
        use futures_util::StreamExt;

        let pool = self.pool.clone();
        let stream = all_rows(pool).map(|result| match result {
            Ok(row) => Self::row_to_entry(row),
            Err(e) => Err(HistoryError::Database(e)),
        });

        Ok(Box::pin(stream))
    }
}

/// Streams every history row in write order, owning its pool handle so the
/// stream is `'static`.
fn all_rows(
    pool: PgPool,
) -> impl futures_core::Stream<Item = std::result::Result<PgRow, sqlx::Error>> + Send {
    use futures_util::StreamExt;

    futures_util::stream::once(async move {
        sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY seq ASC"))
            .fetch_all(&pool)
            .await
    })
    .flat_map(|result| {
        let rows: Vec<std::result::Result<PgRow, sqlx::Error>> = match result {
            Ok(rows) => rows.into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        futures_util::stream::iter(rows)
    })
}
