//! Card consolidation (normalize, dedup, merge, score, rank) and the refresh
//! pipeline that feeds it from the source adapters and persists the result.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cardcat_adapters::{adapter_for_source, load_fixture_page, AdapterContext, ListingTarget};
use cardcat_core::{normalize, CanonicalCard, RawCardRecord, SourceId, DEFAULT_MAX_CARDS};
use cardcat_storage::{BackoffPolicy, DatasetStore, FetchConfig, HttpFetcher};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod dedup;
pub mod score;

pub use dedup::{identity_key, CardDeduplicator, DedupConfig, DedupReviewItem, MergedCard};
pub use score::{rank, score, ScoredCard};

pub const CRATE_NAME: &str = "cardcat-sync";

/// Raw records per source. Iteration follows `SourceId` order, which is the
/// arrival order first-seen merge rules depend on.
pub type SourceResults = BTreeMap<SourceId, Vec<RawCardRecord>>;

#[derive(Debug, Clone)]
pub struct ConsolidationOutcome {
    pub total_records: usize,
    pub distinct_identities: usize,
    pub ranked: Vec<ScoredCard>,
    pub review_items: Vec<DedupReviewItem>,
}

impl ConsolidationOutcome {
    pub fn canonical_cards(&self) -> Vec<CanonicalCard> {
        self.ranked
            .iter()
            .cloned()
            .map(ScoredCard::into_canonical)
            .collect()
    }
}

/// Ranked, deduplicated top cards across all sources, capped at the default size.
pub fn consolidate(results: &SourceResults) -> Vec<CanonicalCard> {
    consolidate_with(results, DEFAULT_MAX_CARDS, &CardDeduplicator::default()).canonical_cards()
}

pub fn consolidate_with(
    results: &SourceResults,
    limit: usize,
    dedup: &CardDeduplicator,
) -> ConsolidationOutcome {
    let total_records = results.values().map(Vec::len).sum();
    let merged = dedup.dedup(results.values().flatten().map(normalize));
    let review_items = dedup.near_duplicates(&merged);
    let distinct_identities = merged.len();
    ConsolidationOutcome {
        total_records,
        distinct_identities,
        ranked: rank(merged, limit),
        review_items,
    }
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub workspace_root: PathBuf,
    pub dataset_path: PathBuf,
    pub backup_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub fixtures_dir: PathBuf,
    pub max_cards: usize,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    /// Total attempts per listing endpoint, first try included.
    pub retry_attempts: usize,
    pub request_delay: Duration,
    /// Jaro-Winkler score at which two identities are flagged for review.
    pub review_threshold: f64,
}

impl RefreshConfig {
    /// Default layout relative to `root`.
    pub fn for_workspace(root: impl Into<PathBuf>) -> Self {
        let workspace_root = root.into();
        Self {
            dataset_path: workspace_root.join("client").join("src").join("cards.json"),
            backup_dir: workspace_root.join("backups"),
            reports_dir: workspace_root.join("reports"),
            fixtures_dir: workspace_root.join("fixtures"),
            max_cards: DEFAULT_MAX_CARDS,
            user_agent: "cardcat-bot/0.1".to_string(),
            http_timeout_secs: 30,
            retry_attempts: 3,
            request_delay: Duration::from_millis(2000),
            review_threshold: DedupConfig::default().review_threshold,
            workspace_root,
        }
    }

    pub fn from_env() -> Self {
        let root = std::env::var("CARDCAT_WORKSPACE_ROOT").unwrap_or_else(|_| ".".to_string());
        let mut config = Self::for_workspace(root);
        if let Ok(path) = std::env::var("CARDS_DATASET_PATH") {
            config.dataset_path = config.workspace_root.join(path);
        }
        if let Ok(path) = std::env::var("CARDS_BACKUP_DIR") {
            config.backup_dir = config.workspace_root.join(path);
        }
        if let Ok(path) = std::env::var("CARDCAT_REPORTS_DIR") {
            config.reports_dir = config.workspace_root.join(path);
        }
        config.max_cards = std::env::var("CARDCAT_MAX_CARDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.max_cards);
        if let Ok(user_agent) = std::env::var("CARDCAT_USER_AGENT") {
            config.user_agent = user_agent;
        }
        config.http_timeout_secs = std::env::var("CARDCAT_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.http_timeout_secs);
        config.retry_attempts = std::env::var("CARDCAT_RETRY_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.retry_attempts);
        config.request_delay = std::env::var("CARDCAT_REQUEST_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(config.request_delay);
        config.review_threshold = std::env::var("CARDCAT_REVIEW_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(config.review_threshold);
        config
    }

    pub fn registry_path(&self) -> PathBuf {
        self.workspace_root.join("sources.yaml")
    }

    pub fn dataset_store(&self) -> DatasetStore {
        DatasetStore::new(self.dataset_path.clone(), self.backup_dir.clone())
    }

    fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.retry_attempts.saturating_sub(1),
                base_delay: self.request_delay,
                ..BackoffPolicy::default()
            },
            ..FetchConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    #[default]
    Live,
    /// Read `<fixtures_dir>/<source>/<category>.html` instead of fetching.
    Fixture,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub category: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: SourceId,
    pub display_name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: SourceMode,
    pub base_url: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub max_cards_per_page: Option<usize>,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceConfig {
    pub fn targets(&self) -> Vec<ListingTarget> {
        let base = self.base_url.trim_end_matches('/');
        self.endpoints
            .iter()
            .map(|endpoint| ListingTarget {
                category: endpoint.category.clone(),
                url: format!("{base}/{}", endpoint.path.trim_start_matches('/')),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

impl SourceRegistry {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("parsing source registry")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    /// Enabled sources, narrowed to `only` when it is non-empty.
    pub fn enabled(&self, only: &[SourceId]) -> Vec<SourceConfig> {
        self.sources
            .iter()
            .filter(|s| s.enabled)
            .filter(|s| only.is_empty() || only.contains(&s.source_id))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_scraped: usize,
    pub sources: BTreeMap<SourceId, usize>,
    pub failed_sources: Vec<SourceId>,
    pub distinct_identities: usize,
    pub final_count: usize,
    pub output_path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub dataset_sha256: String,
    pub review_items: Vec<DedupReviewItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshSummary {
    pub run_id: Uuid,
    pub total_scraped: usize,
    pub final_count: usize,
    pub failed_sources: Vec<SourceId>,
    pub dataset_path: PathBuf,
    pub backup_path: Option<PathBuf>,
    pub report_path: PathBuf,
}

pub struct RefreshPipeline {
    config: RefreshConfig,
    registry: Option<SourceRegistry>,
    only_sources: Vec<SourceId>,
    http: Arc<HttpFetcher>,
    dedup: CardDeduplicator,
    store: DatasetStore,
}

impl RefreshPipeline {
    pub fn new(config: RefreshConfig) -> Result<Self> {
        let http = HttpFetcher::new(config.fetch_config())?;
        let store = config.dataset_store();
        let dedup = CardDeduplicator::new(DedupConfig {
            review_threshold: config.review_threshold,
        });
        Ok(Self {
            config,
            registry: None,
            only_sources: Vec::new(),
            http: Arc::new(http),
            dedup,
            store,
        })
    }

    /// Use `registry` instead of reading `sources.yaml` on each run.
    pub fn with_registry(mut self, registry: SourceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_sources(mut self, only: Vec<SourceId>) -> Self {
        self.only_sources = only;
        self
    }

    pub fn store(&self) -> &DatasetStore {
        &self.store
    }

    pub async fn run_once(&self) -> Result<RefreshSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let registry = match &self.registry {
            Some(registry) => registry.clone(),
            None => SourceRegistry::load(&self.config.registry_path()).await?,
        };
        let sources = registry.enabled(&self.only_sources);
        info!(%run_id, sources = sources.len(), max_cards = self.config.max_cards, "starting card refresh");

        let ctx = AdapterContext { run_id, started_at };
        let (results, failed_sources) = self.scrape_sources(&ctx, sources).await;

        let outcome = consolidate_with(&results, self.config.max_cards, &self.dedup);
        let cards = outcome.canonical_cards();
        info!(
            total_scraped = outcome.total_records,
            identities = outcome.distinct_identities,
            final_count = cards.len(),
            review_items = outcome.review_items.len(),
            "consolidated card catalog"
        );
        for (position, card) in cards.iter().take(3).enumerate() {
            info!(rank = position + 1, name = %card.name, network = %card.network, annual_fee = card.annual_fee, "top card");
        }

        let persisted = self.store.persist(&cards).await?;

        let report = RefreshReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            total_scraped: outcome.total_records,
            sources: results.iter().map(|(source, records)| (*source, records.len())).collect(),
            failed_sources: failed_sources.clone(),
            distinct_identities: outcome.distinct_identities,
            final_count: persisted.card_count,
            output_path: persisted.dataset_path.clone(),
            backup_path: persisted.backup_path.clone(),
            dataset_sha256: persisted.sha256.clone(),
            review_items: outcome.review_items,
        };
        let report_path = self.write_report(&report).await?;

        Ok(RefreshSummary {
            run_id,
            total_scraped: report.total_scraped,
            final_count: report.final_count,
            failed_sources,
            dataset_path: persisted.dataset_path,
            backup_path: persisted.backup_path,
            report_path,
        })
    }

    /// Run every source concurrently. A failed source contributes zero records.
    async fn scrape_sources(
        &self,
        ctx: &AdapterContext,
        sources: Vec<SourceConfig>,
    ) -> (SourceResults, Vec<SourceId>) {
        let mut handles = Vec::with_capacity(sources.len());
        for source in sources {
            let source_id = source.source_id;
            let job = SourceJob {
                source,
                ctx: ctx.clone(),
                http: Arc::clone(&self.http),
                fixtures_dir: self.config.fixtures_dir.clone(),
                request_delay: self.config.request_delay,
            };
            let span = info_span!("source_run", run_id = %ctx.run_id, source = %source_id);
            handles.push((source_id, tokio::spawn(job.run().instrument(span))));
        }

        let mut results = SourceResults::new();
        let mut failed = Vec::new();
        for (source, handle) in handles {
            let error = match handle.await {
                Ok(Ok(records)) => {
                    info!(%source, records = records.len(), "source scraped");
                    results.entry(source).or_default().extend(records);
                    continue;
                }
                Ok(Err(err)) => format!("{err:#}"),
                Err(err) => err.to_string(),
            };
            warn!(%source, error = %error, "source failed; it contributes no records");
            results.entry(source).or_default();
            if !failed.contains(&source) {
                failed.push(source);
            }
        }
        (results, failed)
    }

    async fn write_report(&self, report: &RefreshReport) -> Result<PathBuf> {
        let run_dir = self.config.reports_dir.join(report.run_id.to_string());
        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("creating {}", run_dir.display()))?;
        let path = run_dir.join("refresh_report.json");
        let bytes = serde_json::to_vec_pretty(report).context("serializing refresh report")?;
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!(report = %path.display(), "wrote refresh report");
        Ok(path)
    }
}

struct SourceJob {
    source: SourceConfig,
    ctx: AdapterContext,
    http: Arc<HttpFetcher>,
    fixtures_dir: PathBuf,
    request_delay: Duration,
}

impl SourceJob {
    /// Scrape each listing endpoint in order. Failed endpoints are skipped;
    /// the source fails only when none succeed.
    async fn run(self) -> Result<Vec<RawCardRecord>> {
        let adapter = adapter_for_source(self.source.source_id, self.source.max_cards_per_page);
        let targets = self.source.targets();

        let mut records = Vec::new();
        let mut failed_endpoints = 0usize;
        for (position, target) in targets.iter().enumerate() {
            if self.source.mode == SourceMode::Live && position > 0 {
                tokio::time::sleep(self.request_delay).await;
            }
            let page = match self.source.mode {
                SourceMode::Live => adapter
                    .fetch_listing(&self.http, &self.ctx, target)
                    .await
                    .map_err(anyhow::Error::from),
                SourceMode::Fixture => load_fixture_page(
                    self.fixtures_dir
                        .join(self.source.source_id.as_str())
                        .join(format!("{}.html", target.category)),
                    &target.category,
                ),
            };
            match page.and_then(|page| adapter.parse_listing(&page).map_err(anyhow::Error::from)) {
                Ok(found) => {
                    debug!(category = %target.category, cards = found.len(), "parsed listing");
                    records.extend(found);
                }
                Err(err) => {
                    failed_endpoints += 1;
                    warn!(category = %target.category, url = %target.url, error = %format!("{err:#}"), "listing endpoint failed; skipping");
                }
            }
        }

        if !targets.is_empty() && failed_endpoints == targets.len() {
            anyhow::bail!("all {} listing endpoints failed", targets.len());
        }
        Ok(records)
    }
}

pub async fn run_refresh_from_env() -> Result<RefreshSummary> {
    RefreshPipeline::new(RefreshConfig::from_env())?.run_once().await
}
