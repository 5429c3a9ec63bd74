//! Core domain model for Veille: canonical job postings and scoring results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "veille-core";

/// Verdict text used when the analysis call failed for a record.
pub const FAILURE_VERDICT: &str = "Erreur d'analyse";

/// Which adapter produced a record. The tag is persisted with the record and
/// prefixes every derived identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    Linkedin,
    Wttj,
    Indeed,
}

impl JobSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobSource::Linkedin => "linkedin",
            JobSource::Wttj => "wttj",
            JobSource::Indeed => "indeed",
        }
    }

    /// Stable identifier for a native posting id, e.g. `linkedin_4017339012`.
    pub fn prefixed_id(&self, native: &str) -> String {
        format!("{}_{native}", self.as_str())
    }

    /// Inverse of [`prefixed_id`](Self::prefixed_id) for this source's ids.
    pub fn native_id<'a>(&self, id: &'a str) -> Option<&'a str> {
        id.strip_prefix(self.as_str()).and_then(|s| s.strip_prefix('_'))
    }
}

impl std::fmt::Display for JobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized posting emitted by a source adapter, before scoring.
///
/// Adapters only emit drafts with a non-empty `id` and `title`; `company` is
/// additionally required for sources that reliably expose it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDraft {
    pub id: String,
    pub source: JobSource,
    pub title: String,
    pub company: String,
    pub location: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl JobDraft {
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() && !self.title.is_empty()
    }
}

/// Structured scoring verdict attached to a record after analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAnalysis {
    pub score: u8,
    pub verdict: String,
    #[serde(default)]
    pub points_forts: Vec<String>,
    #[serde(default)]
    pub points_faibles: Vec<String>,
    pub recommandation: String,
    pub analyzed_at: DateTime<Utc>,
    pub analyzer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobAnalysis {
    /// Sentinel analysis persisted when the scoring call fails. The record
    /// still enters the store, so it will not be re-scored by later runs.
    pub fn failure(analyzer: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            score: 0,
            verdict: FAILURE_VERDICT.to_string(),
            points_forts: Vec::new(),
            points_faibles: vec!["Erreur lors de l'analyse IA".to_string()],
            recommandation: "Analyse manuelle requise".to_string(),
            analyzed_at: Utc::now(),
            analyzer: analyzer.into(),
            error: Some(detail.into()),
        }
    }
}

/// Persisted record: a draft enriched with its analysis and the timestamp of
/// first persistence. `found_at` is set once and never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub source: JobSource,
    pub title: String,
    pub company: String,
    pub location: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<JobAnalysis>,
    pub found_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn from_draft(draft: JobDraft, analysis: Option<JobAnalysis>, found_at: DateTime<Utc>) -> Self {
        Self {
            id: draft.id,
            source: draft.source,
            title: draft.title,
            company: draft.company,
            location: draft.location,
            link: draft.link,
            posted_date: draft.posted_date,
            description: draft.description,
            analysis,
            found_at,
        }
    }

    /// Draft view of a stored record, used when re-scoring on demand.
    pub fn to_draft(&self) -> JobDraft {
        JobDraft {
            id: self.id.clone(),
            source: self.source,
            title: self.title.clone(),
            company: self.company.clone(),
            location: self.location.clone(),
            link: self.link.clone(),
            posted_date: self.posted_date.clone(),
            description: self.description.clone(),
        }
    }

    pub fn score(&self) -> u8 {
        self.analysis.as_ref().map(|a| a.score).unwrap_or(0)
    }
}

/// Keyword and location lists driving the board adapters' query permutations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPlan {
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
}

impl SearchPlan {
    /// Full keyword x location cross-product, in config order.
    pub fn permutations(&self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.keywords.len() * self.locations.len());
        for location in &self.locations {
            for keyword in &self.keywords {
                out.push((keyword.clone(), location.clone()));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(id: &str, title: &str) -> JobDraft {
        JobDraft {
            id: id.to_string(),
            source: JobSource::Linkedin,
            title: title.to_string(),
            company: "Acme".to_string(),
            location: "Paris".to_string(),
            link: String::new(),
            posted_date: None,
            description: None,
        }
    }

    #[test]
    fn prefixed_ids_round_trip_per_source() {
        let id = JobSource::Linkedin.prefixed_id("4017339012");
        assert_eq!(id, "linkedin_4017339012");
        assert_eq!(JobSource::Linkedin.native_id(&id), Some("4017339012"));
        assert_eq!(JobSource::Wttj.native_id(&id), None);
    }

    #[test]
    fn validity_requires_id_and_title() {
        assert!(draft("linkedin_1", "Ops Analyst").is_valid());
        assert!(!draft("", "Ops Analyst").is_valid());
        assert!(!draft("linkedin_1", "").is_valid());
    }

    #[test]
    fn failure_sentinel_carries_error_detail() {
        let analysis = JobAnalysis::failure("gemini-pro", "timeout");
        assert_eq!(analysis.score, 0);
        assert_eq!(analysis.verdict, FAILURE_VERDICT);
        assert_eq!(analysis.points_faibles.len(), 1);
        assert_eq!(analysis.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn absent_error_field_is_not_serialized() {
        let mut analysis = JobAnalysis::failure("gemini-pro", "boom");
        analysis.error = None;
        let json = serde_json::to_string(&analysis).unwrap();
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn search_plan_builds_full_cross_product() {
        let plan = SearchPlan {
            keywords: vec!["data".to_string(), "ops".to_string()],
            locations: vec!["Paris".to_string(), "Lille".to_string()],
        };
        let perms = plan.permutations();
        assert_eq!(perms.len(), 4);
        assert_eq!(perms[0], ("data".to_string(), "Paris".to_string()));
        assert_eq!(perms[3], ("ops".to_string(), "Lille".to_string()));
    }

    #[test]
    fn source_tags_serialize_as_snake_case_strings() {
        assert_eq!(serde_json::to_string(&JobSource::Wttj).unwrap(), "\"wttj\"");
        let record = JobRecord::from_draft(draft("linkedin_1", "Ops"), None, Utc::now());
        assert_eq!(record.score(), 0);
    }
}
