use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinHandle;

use polygate_common::{GlobalConfig, GlobalConfigPatch};
use polygate_protocol::{Key, ProviderSpecificConfig};
use polygate_provider_core::config::{ModelTable, ProviderConfig, ProviderSet};
use polygate_provider_core::{CredentialId, CredentialPool, EventHub, ProviderRegistry, TerminalEventSink};
use polygate_provider_impl::register_configured_providers;
use polygate_storage::{SharedBus, StorageBus, StorageBusConfig};
use polygate_transform::AccumulatorRegistry;

use crate::fallback::FallbackCoordinator;
use crate::logger_plugin::LoggerPlugin;
use crate::orchestrator::Orchestrator;
use crate::plugin::PluginChain;
use crate::pool::{PoolRegistry, WorkerPoolConfig};
use crate::pricing::NoopPricingCatalog;
use crate::retry::RetryPolicy;
use crate::upstream_client::{UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};

/// CLI/env surface for the bundled binary (spec §1: config loading is an
/// external collaborator; this is just enough to get a process running).
#[derive(Debug, Clone, Parser)]
#[command(name = "polygate", version, about = "Unified LLM gateway core")]
pub struct CliArgs {
    /// Database DSN for the log store.
    #[arg(long, env = "POLYGATE_DSN")]
    pub dsn: Option<String>,

    /// Bind host.
    #[arg(long, env = "POLYGATE_HOST")]
    pub host: Option<String>,

    /// Bind port.
    #[arg(long, env = "POLYGATE_PORT")]
    pub port: Option<String>,

    /// Optional outbound proxy for upstream requests to providers.
    #[arg(long, env = "POLYGATE_PROXY")]
    pub proxy: Option<String>,

    /// Redact sensitive headers/body fields in emitted events.
    #[arg(long, env = "POLYGATE_EVENT_REDACT_SENSITIVE")]
    pub event_redact_sensitive: Option<String>,

    /// Global switch for content logging (spec §4.8).
    #[arg(long, env = "POLYGATE_CONTENT_LOGGING")]
    pub content_logging: Option<String>,
}

/// Everything a hosting binary needs: the assembled orchestrator plus the
/// background task handles it owns and must outlive.
pub struct Bootstrap {
    pub global: GlobalConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<ProviderRegistry>,
    pub credentials: Arc<CredentialPool>,
    pub storage: SharedBus,
    writer_handle: JoinHandle<()>,
    sweeper_handle: JoinHandle<()>,
}

impl Bootstrap {
    /// Bounds teardown of the background writer/sweeper tasks (spec §4.9).
    pub async fn shutdown(self) {
        self.writer_handle.abort();
        self.sweeper_handle.abort();
        let _ = tokio::time::timeout(Duration::from_secs(30), async {
            let _ = self.writer_handle.await;
        })
        .await;
    }
}

pub async fn bootstrap_from_env() -> anyhow::Result<Bootstrap> {
    let args = CliArgs::parse();
    bootstrap(args).await
}

pub async fn bootstrap(args: CliArgs) -> anyhow::Result<Bootstrap> {
    let dsn = sanitize_dsn_value(args.dsn.clone());
    let host = sanitize_optional_env_value(args.host.clone());
    let port = parse_u16_env_value(args.port.clone(), "POLYGATE_PORT")?;
    let proxy = sanitize_optional_env_value(args.proxy.clone());
    let event_redact_sensitive = parse_bool_env_value(
        args.event_redact_sensitive.clone(),
        "POLYGATE_EVENT_REDACT_SENSITIVE",
    )?;
    let content_logging_enabled = parse_bool_env_value(
        args.content_logging.clone(),
        "POLYGATE_CONTENT_LOGGING",
    )?;

    ensure_sqlite_parent_dir(&dsn)?;

    let patch = GlobalConfigPatch {
        host,
        port,
        proxy,
        log_store_dsn: Some(dsn),
        event_redact_sensitive,
        content_logging_enabled,
    };
    let global: GlobalConfig = patch.into_config().context("finalize global config")?;

    // 1) connect storage and make sure the log_records table exists.
    let db = polygate_storage::connect_shared(&global.log_store_dsn)
        .await
        .context("connect storage")?;
    polygate_storage::sync(&db).await.context("schema sync")?;

    let (bus, writer_handle) = StorageBus::spawn(db, StorageBusConfig::default());
    let bus: SharedBus = Arc::new(bus);

    // 2) observability plumbing.
    let events = EventHub::new(1024);
    events.add_sink(Arc::new(TerminalEventSink::new())).await;

    // 3) providers and credentials, seeded from the process environment —
    // the only "Account" collaborator this core owns (spec §1: persistent
    // credential storage is an external concern).
    let (providers, seeds) = seed_providers_from_env();
    let credentials = Arc::new(CredentialPool::new(events.clone()));
    for (provider, id, key) in seeds {
        credentials.insert(provider, id, key).await;
    }

    let mut registry = ProviderRegistry::new();
    register_configured_providers(&mut registry, &providers);
    let registry = Arc::new(registry);

    // 4) the execution pipeline.
    let pools = Arc::new(PoolRegistry::new(WorkerPoolConfig::default()));
    let upstream_config = UpstreamClientConfig::from_global(&global);
    let upstream: Arc<dyn UpstreamClient> =
        Arc::new(WreqUpstreamClient::new(upstream_config).context("build upstream client")?);

    let retry_policies: Arc<std::collections::HashMap<String, RetryPolicy>> =
        Arc::new(std::collections::HashMap::new());
    let fallback = Arc::new(FallbackCoordinator::new(
        registry.clone(),
        credentials.clone(),
        upstream,
        pools,
        retry_policies,
    ));

    let accumulators = AccumulatorRegistry::with_default_ttl();
    let sweeper_handle = accumulators.clone().spawn_sweeper();
    let accumulators = Arc::new(accumulators);

    let logger = LoggerPlugin::new(bus.clone(), Arc::new(NoopPricingCatalog), global.content_logging_enabled);
    let plugins = Arc::new(PluginChain::new(vec![Arc::new(logger)]));

    let orchestrator = Arc::new(Orchestrator::new(plugins, fallback, accumulators));

    Ok(Bootstrap {
        global,
        orchestrator,
        registry,
        credentials,
        storage: bus,
        writer_handle,
        sweeper_handle,
    })
}

/// Reads well-known per-provider environment variables and builds one
/// `ProviderConfig` + one `Key` per configured provider. Mirrors the shape
/// of a persisted `ProviderSet`/`CredentialPool` snapshot without needing a
/// store of its own.
fn seed_providers_from_env() -> (ProviderSet, Vec<(String, CredentialId, Key)>) {
    let mut providers = ProviderSet::default();
    let mut seeds = Vec::new();
    let mut next_id: CredentialId = 1;

    let mut seed = |providers: &mut ProviderSet,
                    seeds: &mut Vec<(String, CredentialId, Key)>,
                    tag: &str,
                    config: ProviderConfig,
                    value: String,
                    provider_specific_config: ProviderSpecificConfig| {
        providers.insert(config);
        let key = Key {
            id: next_id,
            value,
            models: Default::default(),
            weight: 1.0,
            provider_specific_config,
        };
        seeds.push((tag.to_string(), next_id, key));
        next_id += 1;
    };

    if let Some(api_key) = env_value("OPENAI_API_KEY") {
        let base_url = env_value("OPENAI_BASE_URL");
        seed(
            &mut providers,
            &mut seeds,
            "openai",
            ProviderConfig::OpenAi { base_url, model_table: ModelTable::default() },
            api_key,
            ProviderSpecificConfig::None,
        );
    }

    if let Some(api_key) = env_value("ANTHROPIC_API_KEY") {
        let base_url = env_value("ANTHROPIC_BASE_URL");
        seed(
            &mut providers,
            &mut seeds,
            "anthropic",
            ProviderConfig::Anthropic { base_url, model_table: ModelTable::default() },
            api_key,
            ProviderSpecificConfig::None,
        );
    }

    if let (Some(api_key), Some(base_url)) =
        (env_value("AZURE_OPENAI_API_KEY"), env_value("AZURE_OPENAI_BASE_URL"))
    {
        let api_version = env_value("AZURE_OPENAI_API_VERSION")
            .unwrap_or_else(|| "2024-10-21".to_string());
        seed(
            &mut providers,
            &mut seeds,
            "azure_openai",
            ProviderConfig::AzureOpenAi {
                base_url: base_url.clone(),
                api_version: api_version.clone(),
                deployment_map: BTreeMap::new(),
                model_table: ModelTable::default(),
            },
            api_key,
            ProviderSpecificConfig::AzureOpenAi { deployment_map: BTreeMap::new(), api_version },
        );
    }

    if let Some(region) = env_value("AWS_REGION").or_else(|| env_value("BEDROCK_REGION")) {
        let access_key = env_value("AWS_ACCESS_KEY_ID");
        let secret_key = env_value("AWS_SECRET_ACCESS_KEY");
        if let (Some(access_key), Some(secret_key)) = (access_key, secret_key) {
            let value = match env_value("AWS_SESSION_TOKEN") {
                Some(session_token) => format!("{access_key}:{secret_key}:{session_token}"),
                None => format!("{access_key}:{secret_key}"),
            };
            let role_arn = env_value("BEDROCK_ROLE_ARN");
            seed(
                &mut providers,
                &mut seeds,
                "bedrock",
                ProviderConfig::Bedrock {
                    region: region.clone(),
                    role_arn: role_arn.clone(),
                    model_table: ModelTable::default(),
                },
                value,
                ProviderSpecificConfig::Bedrock { region, role_arn },
            );
        }
    }

    if let (Some(project), Some(region), Some(service_account_json)) = (
        env_value("VERTEX_PROJECT"),
        env_value("VERTEX_REGION"),
        env_value("VERTEX_SERVICE_ACCOUNT_JSON"),
    ) {
        seed(
            &mut providers,
            &mut seeds,
            "vertex",
            ProviderConfig::Vertex { project: project.clone(), region: region.clone(), model_table: ModelTable::default() },
            service_account_json,
            ProviderSpecificConfig::Vertex { project, region },
        );
    }

    if let Some(api_key) = env_value("COHERE_API_KEY") {
        let base_url = env_value("COHERE_BASE_URL");
        seed(
            &mut providers,
            &mut seeds,
            "cohere",
            ProviderConfig::Cohere { base_url, model_table: ModelTable::default() },
            api_key,
            ProviderSpecificConfig::None,
        );
    }

    if let Some(api_key) = env_value("MISTRAL_API_KEY") {
        let base_url = env_value("MISTRAL_BASE_URL");
        seed(
            &mut providers,
            &mut seeds,
            "mistral",
            ProviderConfig::Mistral { base_url, model_table: ModelTable::default() },
            api_key,
            ProviderSpecificConfig::None,
        );
    }

    if let Some(base_url) = env_value("OLLAMA_BASE_URL") {
        seed(
            &mut providers,
            &mut seeds,
            "ollama",
            ProviderConfig::Ollama { base_url, model_table: ModelTable::default() },
            String::new(),
            ProviderSpecificConfig::None,
        );
    }

    if let Some(api_key) = env_value("GROQ_API_KEY") {
        let base_url = env_value("GROQ_BASE_URL");
        seed(
            &mut providers,
            &mut seeds,
            "groq",
            ProviderConfig::Groq { base_url, model_table: ModelTable::default() },
            api_key,
            ProviderSpecificConfig::None,
        );
    }

    (providers, seeds)
}

fn env_value(name: &str) -> Option<String> {
    sanitize_optional_env_value(std::env::var(name).ok())
}

fn sanitize_optional_env_value(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("${") && trimmed.ends_with('}') {
        return None;
    }
    Some(trimmed)
}

fn sanitize_dsn_value(value: Option<String>) -> String {
    sanitize_optional_env_value(value).unwrap_or_else(default_dsn)
}

fn default_dsn() -> String {
    if let Some(data_dir) = env_value("POLYGATE_DATA_DIR") {
        let dir = data_dir.trim_end_matches('/');
        return format!("sqlite://{dir}/polygate.db?mode=rwc");
    }
    "sqlite://polygate.db?mode=rwc".to_string()
}

fn ensure_sqlite_parent_dir(dsn: &str) -> anyhow::Result<()> {
    let Some(db_path) = sqlite_file_path_from_dsn(dsn) else {
        return Ok(());
    };
    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    std::fs::create_dir_all(parent)
        .with_context(|| format!("create sqlite parent dir {}", parent.display()))?;
    Ok(())
}

fn sqlite_file_path_from_dsn(dsn: &str) -> Option<PathBuf> {
    let rest = dsn.strip_prefix("sqlite:")?;
    let path_part = rest.split(['?', '#']).next()?.trim();
    if path_part.is_empty() {
        return None;
    }

    let mut normalized = path_part;
    if let Some(stripped) = normalized.strip_prefix("//") {
        normalized = stripped;
    }

    let memory = normalized.to_ascii_lowercase();
    if memory == ":memory:" {
        return None;
    }

    Some(PathBuf::from(normalized))
}

fn parse_u16_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<u16>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = raw
        .parse::<u16>()
        .with_context(|| format!("invalid {env_name} value: {raw}"))?;
    Ok(Some(parsed))
}

fn parse_bool_env_value(value: Option<String>, env_name: &str) -> anyhow::Result<Option<bool>> {
    let Some(raw) = sanitize_optional_env_value(value) else {
        return Ok(None);
    };
    let parsed = match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => return Err(anyhow::anyhow!("invalid {env_name} value: {raw}")),
    };
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_dsn_resolves_relative_path() {
        let path = sqlite_file_path_from_dsn("sqlite://polygate.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "polygate.db");
    }

    #[test]
    fn sqlite_dsn_resolves_absolute_path() {
        let path = sqlite_file_path_from_dsn("sqlite://app/data/polygate.db?mode=rwc").unwrap();
        assert_eq!(path.to_string_lossy(), "/app/data/polygate.db");
    }

    #[test]
    fn sqlite_memory_dsn_is_ignored() {
        assert!(sqlite_file_path_from_dsn("sqlite::memory:").is_none());
        assert!(sqlite_file_path_from_dsn("sqlite://:memory:").is_none());
    }
}
