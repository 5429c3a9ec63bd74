//! Source adapter contract + site-specific listing parsers.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use veille_core::{JobDraft, JobSource, SearchPlan};
use veille_store::HttpFetcher;

pub const CRATE_NAME: &str = "veille-adapters";

/// Pause between successive fetches within one adapter. Part of the adapter
/// contract: the upstream sources block aggressive clients.
pub const DEFAULT_POLITENESS_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("selector error: {0}")]
    Selector(String),
    #[error("unexpected payload shape: {0}")]
    Shape(String),
    #[error(transparent)]
    Fetch(#[from] veille_store::FetchError),
}

/// One instance per job site / search surface. Converts site-specific markup
/// into [`JobDraft`]s tagged with the adapter's source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> JobSource;

    /// Fetches every configured query permutation and parses the responses.
    /// Never fails: a fetch or parse problem for one query is logged and
    /// contributes zero drafts, leaving sibling queries and adapters intact.
    async fn fetch_and_parse(&self, http: &HttpFetcher, plan: &SearchPlan) -> Vec<JobDraft>;

    /// Full-description re-fetch for sources whose listing only carries a
    /// preview. Invoked by the orchestrator for new records only.
    async fn fetch_description(&self, _http: &HttpFetcher, _draft: &JobDraft) -> Option<String> {
        None
    }
}

/// The three configured adapters, in fetch order.
pub fn default_adapters(delay: Duration) -> Vec<Box<dyn SourceAdapter>> {
    vec![
        Box::new(LinkedinAdapter::new(delay)),
        Box::new(WttjAdapter::new(delay)),
        Box::new(IndeedAdapter::new(delay)),
    ]
}

fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Selector(e.to_string()))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn card_text(card: ElementRef<'_>, selector: &Selector) -> Option<String> {
    card.select(selector)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

fn card_attr(card: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    card.select(selector)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    cur.as_str()
}

/// Native ids show up both as JSON strings and as bare numbers.
fn json_id(value: &JsonValue, path: &[&str]) -> Option<String> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    match cur {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Content-hash identity for sources without a stable native id. A changed
/// URL produces a duplicate entry; accepted trade-off for these surfaces.
pub fn link_fingerprint(link: &str) -> String {
    let digest = Sha256::digest(link.as_bytes());
    hex::encode(digest)[..16].to_string()
}

// ---------------------------------------------------------------------------
// LinkedIn guest job-search API (HTML cards, native posting id).

const LINKEDIN_SEARCH_URL: &str =
    "https://www.linkedin.com/jobs-guest/jobs/api/seeMoreJobPostings/search";
const LINKEDIN_DETAIL_URL: &str = "https://www.linkedin.com/jobs-guest/jobs/api/jobPosting";

/// Pause after a detail fetch; detail pages rate-limit harder than search.
const LINKEDIN_DETAIL_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct LinkedinAdapter {
    search_url: String,
    detail_url: String,
    delay: Duration,
}

impl LinkedinAdapter {
    pub fn new(delay: Duration) -> Self {
        Self {
            search_url: LINKEDIN_SEARCH_URL.to_string(),
            detail_url: LINKEDIN_DETAIL_URL.to_string(),
            delay,
        }
    }

    /// Extracts job cards from a guest search response. A card is kept only
    /// when it carries a native id, a title and a company; anything else is
    /// silently dropped (precision over recall).
    pub fn parse_listing(&self, html: &str) -> Result<Vec<JobDraft>, AdapterError> {
        let document = Html::parse_document(html);
        let card_sel = parse_selector("li")?;
        let urn_sel = parse_selector("div.base-card")?;
        let title_sel = parse_selector("h3.base-search-card__title")?;
        let company_sel = parse_selector("h4.base-search-card__subtitle")?;
        let location_sel = parse_selector("span.job-search-card__location")?;
        let link_sel = parse_selector("a.base-card__full-link")?;
        let time_sel = parse_selector("time")?;

        let mut drafts = Vec::new();
        for card in document.select(&card_sel) {
            // data-entity-urn looks like urn:li:jobPosting:4017339012
            let native_id = card
                .select(&urn_sel)
                .next()
                .and_then(|n| n.value().attr("data-entity-urn"))
                .and_then(|urn| urn.rsplit(':').next())
                .and_then(|s| text_or_none(s.to_string()));

            let title = card_text(card, &title_sel);
            let company = card_text(card, &company_sel);
            let (Some(native_id), Some(title), Some(company)) = (native_id, title, company) else {
                continue;
            };

            drafts.push(JobDraft {
                id: JobSource::Linkedin.prefixed_id(&native_id),
                source: JobSource::Linkedin,
                title,
                company,
                location: card_text(card, &location_sel).unwrap_or_default(),
                link: card_attr(card, &link_sel, "href").unwrap_or_default(),
                posted_date: card_attr(card, &time_sel, "datetime"),
                description: None,
            });
        }
        Ok(drafts)
    }

    fn parse_detail(&self, html: &str) -> Result<Option<String>, AdapterError> {
        let document = Html::parse_document(html);
        let desc_sel = parse_selector("div.description__text")?;
        Ok(document
            .select(&desc_sel)
            .next()
            .and_then(|n| text_or_none(n.text().collect::<String>())))
    }
}

#[async_trait]
impl SourceAdapter for LinkedinAdapter {
    fn source(&self) -> JobSource {
        JobSource::Linkedin
    }

    async fn fetch_and_parse(&self, http: &HttpFetcher, plan: &SearchPlan) -> Vec<JobDraft> {
        let mut drafts = Vec::new();
        for (i, (keyword, location)) in plan.permutations().into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay).await;
            }
            let query: [(&str, &str); 5] = [
                ("keywords", keyword.as_str()),
                ("location", location.as_str()),
                // Contract-type and recency filters from the guest search UI.
                ("f_WT", "2"),
                ("f_TPR", "r604800"),
                ("start", "0"),
            ];
            let parsed = match http.fetch_text("linkedin", &self.search_url, &query).await {
                Ok(body) => self.parse_listing(&body),
                Err(err) => {
                    warn!(keyword = %keyword, location = %location, %err, "linkedin search fetch failed, query skipped");
                    continue;
                }
            };
            match parsed {
                Ok(found) => {
                    debug!(keyword = %keyword, location = %location, count = found.len(), "linkedin query parsed");
                    drafts.extend(found);
                }
                Err(err) => {
                    warn!(keyword = %keyword, location = %location, %err, "linkedin listing parse failed, query skipped");
                }
            }
        }
        drafts
    }

    async fn fetch_description(&self, http: &HttpFetcher, draft: &JobDraft) -> Option<String> {
        let native_id = self.source().native_id(&draft.id)?;
        let url = format!("{}/{native_id}", self.detail_url);
        let body = match http.fetch_text("linkedin", &url, &[]).await {
            Ok(body) => body,
            Err(err) => {
                warn!(id = %draft.id, %err, "linkedin detail fetch failed");
                return None;
            }
        };
        tokio::time::sleep(LINKEDIN_DETAIL_DELAY).await;
        match self.parse_detail(&body) {
            Ok(description) => description,
            Err(err) => {
                warn!(id = %draft.id, %err, "linkedin detail parse failed");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Welcome to the Jungle search API (JSON body, native id).

const WTTJ_SEARCH_URL: &str = "https://api.welcometothejungle.com/api/v1/search/jobs";
const WTTJ_JOB_URL: &str = "https://www.welcometothejungle.com/fr/jobs";

#[derive(Debug, Clone)]
pub struct WttjAdapter {
    search_url: String,
    delay: Duration,
}

impl WttjAdapter {
    pub fn new(delay: Duration) -> Self {
        Self {
            search_url: WTTJ_SEARCH_URL.to_string(),
            delay,
        }
    }

    pub fn parse_listing(&self, body: &str) -> Result<Vec<JobDraft>, AdapterError> {
        let value: JsonValue = serde_json::from_str(body)
            .map_err(|e| AdapterError::Shape(format!("invalid search JSON: {e}")))?;
        let jobs = value
            .get("jobs")
            .and_then(|v| v.as_array())
            .ok_or_else(|| AdapterError::Shape("missing jobs array".to_string()))?;

        let mut drafts = Vec::new();
        for job in jobs {
            let native_id = json_id(job, &["id"]);
            let title = json_str(job, &["title"]).and_then(|s| text_or_none(s.to_string()));
            let company =
                json_str(job, &["organization", "name"]).and_then(|s| text_or_none(s.to_string()));
            let (Some(native_id), Some(title), Some(company)) = (native_id, title, company) else {
                continue;
            };

            let link = json_str(job, &["url"])
                .map(ToString::to_string)
                .or_else(|| {
                    json_str(job, &["slug"]).map(|slug| format!("{WTTJ_JOB_URL}/{slug}"))
                })
                .unwrap_or_default();

            drafts.push(JobDraft {
                id: JobSource::Wttj.prefixed_id(&native_id),
                source: JobSource::Wttj,
                title,
                company,
                location: json_str(job, &["office", "city"]).unwrap_or_default().to_string(),
                link,
                posted_date: json_str(job, &["published_at"]).map(ToString::to_string),
                description: json_str(job, &["description"])
                    .and_then(|s| text_or_none(s.to_string())),
            });
        }
        Ok(drafts)
    }
}

#[async_trait]
impl SourceAdapter for WttjAdapter {
    fn source(&self) -> JobSource {
        JobSource::Wttj
    }

    async fn fetch_and_parse(&self, http: &HttpFetcher, plan: &SearchPlan) -> Vec<JobDraft> {
        let mut drafts = Vec::new();
        for (i, (keyword, location)) in plan.permutations().into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay).await;
            }
            let query: [(&str, &str); 3] = [
                ("query", keyword.as_str()),
                ("location", location.as_str()),
                ("contract_type", "apprenticeship"),
            ];
            let parsed = match http.fetch_text("wttj", &self.search_url, &query).await {
                Ok(body) => self.parse_listing(&body),
                Err(err) => {
                    warn!(keyword = %keyword, location = %location, %err, "wttj search fetch failed, query skipped");
                    continue;
                }
            };
            match parsed {
                Ok(found) => {
                    debug!(keyword = %keyword, location = %location, count = found.len(), "wttj query parsed");
                    drafts.extend(found);
                }
                Err(err) => {
                    warn!(keyword = %keyword, location = %location, %err, "wttj listing parse failed, query skipped");
                }
            }
        }
        drafts
    }
}

// ---------------------------------------------------------------------------
// Indeed search pages (HTML, no stable native id, canned query set).

const INDEED_SEARCH_URL: &str = "https://fr.indeed.com/jobs";
const INDEED_BASE_URL: &str = "https://fr.indeed.com";

/// Low-confidence aggregator surface: a fixed canned query set instead of the
/// full keyword x location cross-product.
const INDEED_CANNED_QUERIES: &[(&str, &str)] = &[
    ("alternance operations", "Paris"),
    ("alternance supply chain", "Paris"),
    ("alternance project management", "Île-de-France"),
];

#[derive(Debug, Clone)]
pub struct IndeedAdapter {
    search_url: String,
    delay: Duration,
}

impl IndeedAdapter {
    pub fn new(delay: Duration) -> Self {
        Self {
            search_url: INDEED_SEARCH_URL.to_string(),
            delay,
        }
    }

    /// Indeed exposes no stable posting id, so identity is a hash of the
    /// absolutized link. Company is not reliably present on these cards, so
    /// only id and title gate acceptance.
    pub fn parse_listing(&self, html: &str) -> Result<Vec<JobDraft>, AdapterError> {
        let document = Html::parse_document(html);
        let card_sel = parse_selector("div.job_seen_beacon")?;
        let title_sel = parse_selector("h2.jobTitle span")?;
        let link_sel = parse_selector("h2.jobTitle a")?;
        let company_sel = parse_selector("span.companyName")?;
        let location_sel = parse_selector("div.companyLocation")?;
        let date_sel = parse_selector("span.date")?;

        let mut drafts = Vec::new();
        for card in document.select(&card_sel) {
            let title = card_text(card, &title_sel);
            let href = card_attr(card, &link_sel, "href");
            let (Some(title), Some(href)) = (title, href) else {
                continue;
            };
            let link = if href.starts_with("http") {
                href
            } else {
                format!("{INDEED_BASE_URL}{href}")
            };

            drafts.push(JobDraft {
                id: JobSource::Indeed.prefixed_id(&link_fingerprint(&link)),
                source: JobSource::Indeed,
                title,
                company: card_text(card, &company_sel).unwrap_or_default(),
                location: card_text(card, &location_sel).unwrap_or_default(),
                link,
                posted_date: card_text(card, &date_sel),
                description: None,
            });
        }
        Ok(drafts)
    }
}

#[async_trait]
impl SourceAdapter for IndeedAdapter {
    fn source(&self) -> JobSource {
        JobSource::Indeed
    }

    async fn fetch_and_parse(&self, http: &HttpFetcher, _plan: &SearchPlan) -> Vec<JobDraft> {
        let mut drafts = Vec::new();
        for (i, &(keyword, location)) in INDEED_CANNED_QUERIES.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay).await;
            }
            let query: [(&str, &str); 3] = [("q", keyword), ("l", location), ("fromage", "7")];
            let parsed = match http.fetch_text("indeed", &self.search_url, &query).await {
                Ok(body) => self.parse_listing(&body),
                Err(err) => {
                    warn!(keyword = %keyword, location = %location, %err, "indeed search fetch failed, query skipped");
                    continue;
                }
            };
            match parsed {
                Ok(found) => {
                    debug!(keyword = %keyword, location = %location, count = found.len(), "indeed query parsed");
                    drafts.extend(found);
                }
                Err(err) => {
                    warn!(keyword = %keyword, location = %location, %err, "indeed listing parse failed, query skipped");
                }
            }
        }
        drafts
    }
}
