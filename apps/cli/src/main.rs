//! quarry - explain and run queries from the command line
//!
//! Usage:
//!   quarry explain users.json --search kenny --include profile --backend relational
//!   quarry run users.toml --data fixtures.json --page 2 --limit 5
//!   quarry run users.toml --database-url postgres://localhost/app --no-total

mod config;
mod logging;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand, ValueEnum};
use quarry::adapter::SqlQuery;
use quarry::{
    BackendAdapter, DocumentAdapter, EngineConfig, EntityDescriptor, MemoryDocumentStore,
    PgExecutor, QueryEngine, QueryKind, QueryRequest, RelationalAdapter, SqlExecutor, WhereConfig,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

use crate::config::CliConfig;

#[derive(Parser, Debug)]
#[command(name = "quarry", version, about = "Explain and run quarry queries")]
struct Cli {
    /// Settings file (JSON, TOML or YAML) with engine, logging and database sections
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved criteria, plan and backend query without executing it
    Explain {
        #[command(flatten)]
        query: QueryArgs,

        #[arg(long, value_enum, default_value_t = BackendKind::Document)]
        backend: BackendKind,
    },
    /// Execute a query and print the result envelope
    Run {
        #[command(flatten)]
        query: QueryArgs,

        /// JSON file mapping collection names to document arrays
        #[arg(long, conflicts_with = "database_url")]
        data: Option<PathBuf>,

        /// PostgreSQL URL (falls back to database.url in the settings)
        #[arg(long)]
        database_url: Option<String>,

        /// Return only the first match
        #[arg(long)]
        one: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct QueryArgs {
    /// Query spec file (JSON or TOML) holding `entity` and `where`
    spec: PathBuf,

    #[arg(long)]
    search: Option<String>,

    /// Comma-separated relations and/or fields
    #[arg(long)]
    include: Option<String>,

    /// `field`, `-field` or `field:desc`
    #[arg(long, allow_hyphen_values = true)]
    sort: Option<String>,

    #[arg(long, allow_negative_numbers = true)]
    page: Option<i64>,

    #[arg(long, allow_negative_numbers = true)]
    limit: Option<i64>,

    /// Skip the count query
    #[arg(long)]
    no_total: bool,

    /// Use list defaults (larger default page size)
    #[arg(long)]
    list: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum BackendKind {
    Relational,
    Document,
}

impl QueryArgs {
    fn request(&self) -> QueryRequest {
        let mut request = QueryRequest {
            search: self.search.clone(),
            include: self.include.clone(),
            page: self.page,
            limit: self.limit,
            include_total_count: self.no_total.then_some(false),
            ..QueryRequest::default()
        };
        if let Some(sort) = &self.sort {
            request = request.sort(sort.as_str());
        }
        request
    }

    fn kind(&self) -> QueryKind {
        if self.list {
            QueryKind::List
        } else {
            QueryKind::General
        }
    }
}

/// Entity descriptor plus the backend-owned where configuration.
#[derive(Debug, Deserialize)]
struct QuerySpec {
    entity: EntityDescriptor,
    #[serde(default, rename = "where")]
    where_config: WhereConfig,
}

impl QuerySpec {
    fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read query spec {}", path.display()))?;
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        Self::parse(&text, is_toml)
            .with_context(|| format!("Invalid query spec {}", path.display()))
    }

    fn parse(text: &str, is_toml: bool) -> anyhow::Result<Self> {
        if is_toml {
            Ok(toml::from_str(text)?)
        } else {
            Ok(serde_json::from_str(text)?)
        }
    }
}

/// Stands in for a database when only the SQL text is wanted.
struct ExplainOnly;

#[async_trait]
impl SqlExecutor for ExplainOnly {
    async fn fetch_rows(&self, _query: &SqlQuery) -> quarry::Result<Vec<JsonValue>> {
        Err(quarry::Error::InvalidQuery(
            "explain does not execute queries".to_string(),
        ))
    }

    async fn fetch_count(&self, _query: &SqlQuery) -> quarry::Result<u64> {
        Err(quarry::Error::InvalidQuery(
            "explain does not execute queries".to_string(),
        ))
    }

    fn cache_scope(&self) -> String {
        "explain".to_string()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = CliConfig::load(cli.config.as_deref()).context("Failed to load settings")?;
    let _logging_guard =
        logging::init_logging(&settings.logging).context("Failed to initialize logging")?;

    let engine_config =
        EngineConfig::load(cli.config.as_deref()).context("Failed to load engine configuration")?;
    let engine = QueryEngine::new(engine_config)?;

    let output = match cli.command {
        Command::Explain { query, backend } => explain(&engine, &query, backend)?,
        Command::Run {
            query,
            data,
            database_url,
            one,
        } => {
            let spec = QuerySpec::from_path(&query.spec)?;
            let search = engine.config().search.clone();
            if let Some(data) = data {
                let text = std::fs::read_to_string(&data)
                    .with_context(|| format!("Failed to read dataset {}", data.display()))?;
                let store = MemoryDocumentStore::from_json(serde_json::from_str(&text)?)?;
                let adapter = DocumentAdapter::new(store, spec.entity.clone())
                    .with_search_settings(search);
                run(&engine, &adapter, &spec, &query, one).await?
            } else {
                let url = database_url
                    .or(settings.database.url.clone())
                    .context("Either --data or --database-url (or database.url) is required")?;
                let executor = PgExecutor::connect(&url, settings.database.max_connections)
                    .await
                    .context("Failed to connect to database")?;
                let adapter = RelationalAdapter::new(executor, spec.entity.clone())
                    .with_search_settings(search);
                run(&engine, &adapter, &spec, &query, one).await?
            }
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn explain(
    engine: &QueryEngine,
    args: &QueryArgs,
    backend: BackendKind,
) -> anyhow::Result<JsonValue> {
    let spec = QuerySpec::from_path(&args.spec)?;
    let search = engine.config().search.clone();
    let request = args.request();

    let explanation = match backend {
        BackendKind::Document => {
            let adapter = DocumentAdapter::new(MemoryDocumentStore::new(), spec.entity)
                .with_search_settings(search);
            engine.explain(&adapter, &spec.where_config, &request, args.kind())?
        }
        BackendKind::Relational => {
            let adapter = RelationalAdapter::new(ExplainOnly, spec.entity)
                .with_search_settings(search);
            engine.explain(&adapter, &spec.where_config, &request, args.kind())?
        }
    };
    Ok(serde_json::to_value(explanation)?)
}

async fn run<A>(
    engine: &QueryEngine,
    adapter: &A,
    spec: &QuerySpec,
    args: &QueryArgs,
    one: bool,
) -> anyhow::Result<JsonValue>
where
    A: BackendAdapter,
{
    let request = args.request();
    tracing::info!(
        entity = %adapter.entity().name,
        backend = adapter.backend().as_str(),
        "Running query"
    );

    let output = if one {
        serde_json::to_value(engine.find_one(adapter, &spec.where_config, &request).await?)?
    } else if args.list {
        serde_json::to_value(engine.list(adapter, &spec.where_config, &request).await?)?
    } else {
        serde_json::to_value(engine.query(adapter, &spec.where_config, &request).await?)?
    };
    Ok(output)
}
