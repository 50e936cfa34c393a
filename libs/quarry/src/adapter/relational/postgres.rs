use super::sql::{BindValue, SqlQuery};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

/// Executes the adapter's SQL. Every row query selects one JSON column named `row`.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn fetch_rows(&self, query: &SqlQuery) -> Result<Vec<JsonValue>>;

    async fn fetch_count(&self, query: &SqlQuery) -> Result<u64>;

    /// Stable identity of the target database, used in cache keys.
    fn cache_scope(&self) -> String;
}

macro_rules! bind_all {
    ($query:expr, $binds:expr) => {{
        let mut query = $query;
        for value in $binds {
            query = match value {
                BindValue::Text(v) => query.bind(v.clone()),
                BindValue::TextArray(vs) => query.bind(vs.clone()),
                BindValue::Int(v) => query.bind(*v),
                BindValue::IntArray(vs) => query.bind(vs.clone()),
                BindValue::Float(v) => query.bind(*v),
                BindValue::FloatArray(vs) => query.bind(vs.clone()),
                BindValue::Bool(v) => query.bind(*v),
                BindValue::Json(v) => query.bind(v.clone()),
            };
        }
        query
    }};
}

/// PostgreSQL executor backed by a connection pool.
#[derive(Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn fetch_rows(&self, query: &SqlQuery) -> Result<Vec<JsonValue>> {
        let rows = bind_all!(sqlx::query(&query.sql), &query.binds)
            .fetch_all(&self.pool)
            .await?;

        let values = rows
            .iter()
            .map(|row| row.try_get::<JsonValue, _>("row"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(values)
    }

    async fn fetch_count(&self, query: &SqlQuery) -> Result<u64> {
        let total = bind_all!(sqlx::query_scalar::<_, i64>(&query.sql), &query.binds)
            .fetch_one(&self.pool)
            .await?;
        Ok(total.max(0) as u64)
    }

    fn cache_scope(&self) -> String {
        let options = self.pool.connect_options();
        format!(
            "postgres://{}@{}:{}/{}",
            options.get_username(),
            options.get_host(),
            options.get_port(),
            options.get_database().unwrap_or_default()
        )
    }
}
