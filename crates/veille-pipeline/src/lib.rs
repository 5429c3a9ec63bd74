//! Single-pass orchestration: fetch -> dedup -> score -> persist -> report.

pub mod report;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use veille_adapters::SourceAdapter;
use veille_core::{JobAnalysis, JobDraft, JobRecord, SearchPlan};
use veille_scoring::ScoringGateway;
use veille_store::{HttpClientConfig, HttpFetcher, JobMap, JobStore};

pub const CRATE_NAME: &str = "veille-pipeline";

fn default_store_path() -> PathBuf {
    PathBuf::from("jobs_database.json")
}

fn default_report_path() -> PathBuf {
    PathBuf::from("index.html")
}

fn default_politeness_delay_secs() -> u64 {
    2
}

fn default_scoring_pause_secs() -> u64 {
    2
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    HttpClientConfig::default().user_agent
}

fn default_model() -> String {
    veille_scoring::gemini::DEFAULT_MODEL.to_string()
}

/// Search criteria and run settings, loaded once at startup from a YAML file.
/// The API key deliberately never lives here; it comes from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    pub locations: Vec<String>,
    pub keywords: Vec<String>,
    /// Candidate profile text interpolated into every scoring prompt.
    pub profile: String,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,
    #[serde(default = "default_politeness_delay_secs")]
    pub politeness_delay_secs: u64,
    #[serde(default = "default_scoring_pause_secs")]
    pub scoring_pause_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl WatchConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn search_plan(&self) -> SearchPlan {
        SearchPlan {
            keywords: self.keywords.clone(),
            locations: self.locations.clone(),
        }
    }

    pub fn politeness_delay(&self) -> Duration {
        Duration::from_secs(self.politeness_delay_secs)
    }

    pub fn scoring_pause(&self) -> Duration {
        Duration::from_secs(self.scoring_pause_secs)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: usize,
    pub fetched_drafts: usize,
    pub unique_drafts: usize,
    pub already_known: usize,
    pub scored: usize,
    pub scoring_failures: usize,
    pub total_records: usize,
}

/// Intra-run dedup: the same id from two query permutations collapses to one
/// draft, last-seen-wins.
pub fn dedup_drafts(drafts: Vec<JobDraft>) -> BTreeMap<String, JobDraft> {
    let mut by_id = BTreeMap::new();
    for draft in drafts {
        if !draft.is_valid() {
            // Adapters should never emit these; drop defensively rather than
            // pollute the store.
            warn!(id = %draft.id, "invalid draft reached dedup, dropped");
            continue;
        }
        by_id.insert(draft.id.clone(), draft);
    }
    by_id
}

/// Cross-run dedup: ids already present in the store are discarded before any
/// detail fetch or scoring, which is what makes scoring at-most-once per id.
pub fn partition_new(
    deduped: BTreeMap<String, JobDraft>,
    store: &JobMap,
) -> (Vec<JobDraft>, usize) {
    let mut new_drafts = Vec::new();
    let mut known = 0usize;
    for (id, draft) in deduped {
        if store.contains_key(&id) {
            known += 1;
        } else {
            new_drafts.push(draft);
        }
    }
    (new_drafts, known)
}

/// Drives adapters -> dedup -> scoring -> store -> report for one run. All
/// calls are awaited strictly sequentially: sources rate-limit aggressive
/// clients and the scoring call is itself rate-limited.
pub struct WatchPipeline {
    config: WatchConfig,
    store: JobStore,
    http: HttpFetcher,
    adapters: Vec<Box<dyn SourceAdapter>>,
    gateway: ScoringGateway,
}

impl WatchPipeline {
    pub fn new(
        config: WatchConfig,
        adapters: Vec<Box<dyn SourceAdapter>>,
        gateway: ScoringGateway,
    ) -> Result<Self> {
        let store = JobStore::new(&config.store_path);
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: config.user_agent.clone(),
        })?;
        Ok(Self {
            config,
            store,
            http,
            adapters,
            gateway,
        })
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// One full pass. Only store I/O failures abort the run; adapter and
    /// scoring failures are absorbed at their own boundaries.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let plan = self.config.search_plan();

        let mut map = self.store.load().await.context("loading job store")?;
        info!(%run_id, existing = map.len(), "run started");

        // FETCH: every adapter, sequentially. A failing adapter contributes
        // nothing; siblings proceed.
        let mut drafts = Vec::new();
        for adapter in &self.adapters {
            let found = adapter.fetch_and_parse(&self.http, &plan).await;
            info!(source = %adapter.source(), count = found.len(), "adapter finished");
            drafts.extend(found);
        }
        let fetched_drafts = drafts.len();

        // DEDUP: intra-run first, then against the store.
        let deduped = dedup_drafts(drafts);
        let unique_drafts = deduped.len();
        let (new_drafts, already_known) = partition_new(deduped, &map);
        info!(
            unique = unique_drafts,
            new = new_drafts.len(),
            known = already_known,
            "dedup complete"
        );

        // SCORE: strictly sequential, one record at a time.
        let mut scored_records = Vec::with_capacity(new_drafts.len());
        let mut scoring_failures = 0usize;
        for mut draft in new_drafts {
            if draft.description.is_none() {
                draft.description = self.fetch_description(&draft).await;
            }
            let analysis = self.gateway.score(&draft).await;
            if analysis.error.is_some() {
                scoring_failures += 1;
            }
            info!(id = %draft.id, score = analysis.score, verdict = %analysis.verdict, "scored");
            scored_records.push(JobRecord::from_draft(draft, Some(analysis), Utc::now()));
        }
        let scored = scored_records.len();

        // PERSIST: pure insertion, then one full rewrite.
        JobStore::merge(&mut map, scored_records).context("merging scored records")?;
        self.store.save(&map).await.context("saving job store")?;

        report::render_to_file(&self.config.report_path, &map, Utc::now())
            .await
            .context("rendering report")?;

        let finished_at = Utc::now();
        info!(%run_id, scored, total = map.len(), "run finished");
        Ok(RunSummary {
            run_id,
            started_at,
            finished_at,
            sources: self.adapters.len(),
            fetched_drafts,
            unique_drafts,
            already_known,
            scored,
            scoring_failures,
            total_records: map.len(),
        })
    }

    /// Explicit force re-score for one stored record. This is the only path
    /// that ever replaces an existing analysis; the regular run never does.
    pub async fn rescore(&self, id: &str) -> Result<JobAnalysis> {
        let mut map = self.store.load().await.context("loading job store")?;
        let Some(record) = map.get_mut(id) else {
            bail!("no record with id {id} in {}", self.store.path().display());
        };

        let mut draft = record.to_draft();
        if draft.description.is_none() {
            draft.description = self.fetch_description(&draft).await;
            record.description = draft.description.clone();
        }
        let analysis = self.gateway.score(&draft).await;
        record.analysis = Some(analysis.clone());

        self.store.save(&map).await.context("saving job store")?;
        report::render_to_file(&self.config.report_path, &map, Utc::now())
            .await
            .context("rendering report")?;
        Ok(analysis)
    }

    async fn fetch_description(&self, draft: &JobDraft) -> Option<String> {
        let adapter = self.adapters.iter().find(|a| a.source() == draft.source)?;
        adapter.fetch_description(&self.http, draft).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::tempdir;
    use veille_core::{JobSource, FAILURE_VERDICT};
    use veille_scoring::MockProvider;

    const GOOD_JSON: &str = r#"{
        "score": 8,
        "verdict": "Good match",
        "points_forts": ["data skills"],
        "points_faibles": [],
        "recommandation": "Apply"
    }"#;

    struct StaticAdapter {
        source: JobSource,
        drafts: Vec<JobDraft>,
    }

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn source(&self) -> JobSource {
            self.source
        }

        async fn fetch_and_parse(&self, _http: &HttpFetcher, _plan: &SearchPlan) -> Vec<JobDraft> {
            self.drafts.clone()
        }
    }

    fn draft(id: &str, title: &str) -> JobDraft {
        JobDraft {
            id: id.to_string(),
            source: JobSource::Linkedin,
            title: title.to_string(),
            company: "Acme".to_string(),
            location: "Paris".to_string(),
            link: format!("https://example.com/{id}"),
            posted_date: None,
            description: Some("desc".to_string()),
        }
    }

    fn test_config(dir: &Path) -> WatchConfig {
        WatchConfig {
            locations: vec!["Paris".to_string()],
            keywords: vec!["operations".to_string()],
            profile: "Étudiant".to_string(),
            store_path: dir.join("jobs_database.json"),
            report_path: dir.join("index.html"),
            politeness_delay_secs: 0,
            scoring_pause_secs: 0,
            http_timeout_secs: 1,
            user_agent: "test-agent".to_string(),
            model: "mock".to_string(),
        }
    }

    fn pipeline_with(
        dir: &Path,
        drafts: Vec<JobDraft>,
        provider: MockProvider,
    ) -> WatchPipeline {
        let adapters: Vec<Box<dyn SourceAdapter>> = vec![Box::new(StaticAdapter {
            source: JobSource::Linkedin,
            drafts,
        })];
        let gateway = ScoringGateway::new(Box::new(provider), "Étudiant", Duration::ZERO);
        WatchPipeline::new(test_config(dir), adapters, gateway).expect("pipeline")
    }

    #[test]
    fn intra_run_dedup_is_last_seen_wins() {
        let deduped = dedup_drafts(vec![
            draft("linkedin_1", "First title"),
            draft("linkedin_2", "Other"),
            draft("linkedin_1", "Second title"),
        ]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped["linkedin_1"].title, "Second title");
    }

    #[test]
    fn dedup_drops_invalid_drafts() {
        let deduped = dedup_drafts(vec![draft("", "No id"), draft("linkedin_1", "")]);
        assert!(deduped.is_empty());
    }

    #[test]
    fn cross_run_partition_discards_known_ids() {
        let mut store = JobMap::new();
        JobStore::merge(
            &mut store,
            vec![JobRecord::from_draft(draft("linkedin_1", "Old"), None, Utc::now())],
        )
        .expect("merge");

        let deduped = dedup_drafts(vec![
            draft("linkedin_1", "Seen before"),
            draft("linkedin_2", "Brand new"),
        ]);
        let (new_drafts, known) = partition_new(deduped, &store);
        assert_eq!(known, 1);
        assert_eq!(new_drafts.len(), 1);
        assert_eq!(new_drafts[0].id, "linkedin_2");
    }

    #[tokio::test]
    async fn single_record_flows_to_the_store_with_analysis() {
        let dir = tempdir().expect("tempdir");
        let pipeline = pipeline_with(
            dir.path(),
            vec![draft("linkedin_1", "Ops Analyst")],
            MockProvider::new(GOOD_JSON),
        );

        let summary = pipeline.run_once().await.expect("run");
        assert_eq!(summary.scored, 1);
        assert_eq!(summary.scoring_failures, 0);
        assert_eq!(summary.total_records, 1);

        let map = JobStore::new(dir.path().join("jobs_database.json"))
            .load()
            .await
            .expect("load");
        let record = &map["linkedin_1"];
        assert_eq!(record.title, "Ops Analyst");
        assert_eq!(record.company, "Acme");
        let analysis = record.analysis.as_ref().expect("analysis");
        assert_eq!(analysis.score, 8);
        assert_eq!(analysis.verdict, "Good match");
        assert!(dir.path().join("index.html").exists());
    }

    #[tokio::test]
    async fn duplicate_permutations_score_exactly_once() {
        let dir = tempdir().expect("tempdir");
        let provider = MockProvider::new(GOOD_JSON);
        let counter = provider.clone();
        // The same posting surfaces through two query permutations.
        let pipeline = pipeline_with(
            dir.path(),
            vec![
                draft("linkedin_1", "Ops Analyst"),
                draft("linkedin_1", "Ops Analyst"),
            ],
            provider,
        );

        let summary = pipeline.run_once().await.expect("run");
        assert_eq!(summary.fetched_drafts, 2);
        assert_eq!(summary.unique_drafts, 1);
        assert_eq!(summary.scored, 1);
        assert_eq!(counter.call_count(), 1);
    }

    #[tokio::test]
    async fn second_run_is_idempotent_and_never_rescores() {
        let dir = tempdir().expect("tempdir");
        let provider = MockProvider::new(GOOD_JSON);
        let counter = provider.clone();
        let pipeline = pipeline_with(
            dir.path(),
            vec![draft("linkedin_1", "Ops Analyst"), draft("linkedin_2", "Data Apprentice")],
            provider,
        );

        let first = pipeline.run_once().await.expect("first run");
        assert_eq!(first.scored, 2);
        assert_eq!(counter.call_count(), 2);
        let store_after_first =
            std::fs::read_to_string(dir.path().join("jobs_database.json")).expect("read");

        let second = pipeline.run_once().await.expect("second run");
        assert_eq!(second.scored, 0);
        assert_eq!(second.already_known, 2);
        assert_eq!(second.total_records, 2);
        // At-most-once scoring per id, across runs.
        assert_eq!(counter.call_count(), 2);

        let store_after_second =
            std::fs::read_to_string(dir.path().join("jobs_database.json")).expect("read");
        assert_eq!(store_after_first, store_after_second);
    }

    #[tokio::test]
    async fn scoring_failures_are_contained_and_persisted() {
        let dir = tempdir().expect("tempdir");
        let pipeline = pipeline_with(
            dir.path(),
            vec![draft("linkedin_1", "Ops"), draft("linkedin_2", "Supply")],
            MockProvider::failing(),
        );

        let summary = pipeline.run_once().await.expect("run completes");
        assert_eq!(summary.scored, 2);
        assert_eq!(summary.scoring_failures, 2);

        let map = JobStore::new(dir.path().join("jobs_database.json"))
            .load()
            .await
            .expect("load");
        for record in map.values() {
            let analysis = record.analysis.as_ref().expect("sentinel persisted");
            assert_eq!(analysis.score, 0);
            assert_eq!(analysis.verdict, FAILURE_VERDICT);
            assert!(analysis.error.is_some());
        }
    }

    #[tokio::test]
    async fn empty_fetch_still_saves_store_and_report() {
        let dir = tempdir().expect("tempdir");
        let pipeline = pipeline_with(dir.path(), Vec::new(), MockProvider::new(GOOD_JSON));

        let summary = pipeline.run_once().await.expect("run");
        assert_eq!(summary.fetched_drafts, 0);
        assert_eq!(summary.total_records, 0);
        assert!(dir.path().join("jobs_database.json").exists());
        assert!(dir.path().join("index.html").exists());
    }

    #[tokio::test]
    async fn rescore_replaces_a_frozen_failure() {
        let dir = tempdir().expect("tempdir");
        let failing = pipeline_with(
            dir.path(),
            vec![draft("linkedin_1", "Ops Analyst")],
            MockProvider::failing(),
        );
        failing.run_once().await.expect("run");

        let healthy = pipeline_with(dir.path(), Vec::new(), MockProvider::new(GOOD_JSON));
        let analysis = healthy.rescore("linkedin_1").await.expect("rescore");
        assert_eq!(analysis.score, 8);

        let map = JobStore::new(dir.path().join("jobs_database.json"))
            .load()
            .await
            .expect("load");
        let stored = map["linkedin_1"].analysis.as_ref().expect("analysis");
        assert_eq!(stored.score, 8);
        assert!(stored.error.is_none());

        let err = healthy.rescore("linkedin_999").await.unwrap_err();
        assert!(err.to_string().contains("linkedin_999"));
    }

    #[test]
    fn config_defaults_fill_optional_fields() {
        let config: WatchConfig = serde_yaml::from_str(
            "locations: [Paris]\nkeywords: [operations]\nprofile: Étudiant\n",
        )
        .expect("parse");
        assert_eq!(config.store_path, PathBuf::from("jobs_database.json"));
        assert_eq!(config.report_path, PathBuf::from("index.html"));
        assert_eq!(config.politeness_delay_secs, 2);
        assert_eq!(config.scoring_pause_secs, 2);
        assert_eq!(config.model, "gemini-pro");
        assert_eq!(config.search_plan().permutations().len(), 1);
    }
}
