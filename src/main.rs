use deepwrite_rust::auth::{AllowAllStrategy, AuthorizationStrategy};
use deepwrite_rust::config::AppConfig;
use deepwrite_rust::logic::Hooks;
use deepwrite_rust::model::{NestedRequest, Registry, UpdateRequest, UserContext};
use deepwrite_rust::seed;
use deepwrite_rust::store::PostgresStore;
use deepwrite_rust::{WriteError, WriteService};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::Read;
use std::sync::Arc;

/// One request read from stdin: `{"action": "update", "user": {...}, "data": [...]}`
#[derive(Debug, Deserialize)]
struct CliRequest {
    action: Action,
    #[serde(default)]
    user: Option<UserContext>,
    #[serde(flatten)]
    body: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Update,
    Write,
    Read,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .init();

    let config = AppConfig::load()?;

    let postgres_store =
        PostgresStore::new(&config.database_url()?, config.max_connections()).await?;
    postgres_store.migrate().await?;
    let store = Arc::new(postgres_store);

    // A custom schema carries no policies of its own
    let (registry, strategy, hooks): (Arc<Registry>, Arc<dyn AuthorizationStrategy>, Hooks) =
        match &config.schema_path {
            Some(path) => {
                let strategy: Arc<dyn AuthorizationStrategy> = Arc::new(AllowAllStrategy);
                (Arc::new(Registry::load(path)?), strategy, Hooks::default())
            }
            None => {
                let registry = Arc::new(seed::survey_registry());
                let strategy: Arc<dyn AuthorizationStrategy> =
                    Arc::new(seed::survey_policies(store.clone(), registry.clone()));
                (registry, strategy, seed::survey_hooks())
            }
        };

    if std::env::var("DEEPWRITE_LOAD_SEED_DATA").unwrap_or_default() == "true" {
        log::info!("Loading seed data...");
        seed::load_seed_data(store.as_ref()).await?;
    }

    let service = WriteService::new(store, registry, strategy)
        .with_hooks(hooks)
        .with_settings(config.write.clone());

    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let request: CliRequest = serde_json::from_str(&input)?;
    let user = request.user.clone().unwrap_or_else(UserContext::system);

    match dispatch(&service, request.action, &user, Value::Object(request.body)).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err.to_json())?);
            std::process::exit(i32::from(err.status_code() / 100));
        }
    }
}

async fn dispatch(
    service: &WriteService<PostgresStore>,
    action: Action,
    user: &UserContext,
    body: Value,
) -> Result<Value, WriteError> {
    let invalid = |e: serde_json::Error| WriteError::InvalidQuery(e.to_string());
    match action {
        Action::Update => {
            let request: UpdateRequest = serde_json::from_value(body).map_err(invalid)?;
            let result = service.perform_update(user, &request).await?;
            serde_json::to_value(result).map_err(invalid)
        }
        Action::Write => {
            let request: NestedRequest = serde_json::from_value(body).map_err(invalid)?;
            let result = service.write(user, &request).await?;
            serde_json::to_value(result).map_err(invalid)
        }
        Action::Read => {
            let request: NestedRequest = serde_json::from_value(body).map_err(invalid)?;
            service.read(user, &request).await
        }
    }
}
