//! Scoring gateway: wraps the external LLM call with prompt construction,
//! response normalization and fallback-on-failure.

pub mod gemini;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use veille_core::{JobAnalysis, JobDraft};

pub use gemini::GeminiProvider;

pub const CRATE_NAME: &str = "veille-scoring";

/// Descriptions are truncated to this many characters before interpolation
/// into the prompt.
pub const DESCRIPTION_PROMPT_LIMIT: usize = 1500;

#[derive(Debug, Error)]
pub enum ScoringError {
    /// Network or API communication failure.
    #[error("communication error: {0}")]
    Communication(String),
    /// Response that is not valid structured data after fence stripping.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("scoring error: {0}")]
    Other(String),
}

/// External text-generation capability: one blocking call, no streaming.
#[async_trait]
pub trait ScoreProvider: Send + Sync {
    /// Provenance label recorded on every analysis, e.g. the model name.
    fn model_label(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, ScoringError>;
}

/// Deterministic provider for tests. Returns pre-configured responses without
/// any network call and counts invocations, which is how the at-most-once
/// scoring property is asserted.
#[derive(Debug, Clone)]
pub struct MockProvider {
    default_response: String,
    responses: Arc<Mutex<HashMap<String, String>>>,
    call_count: Arc<Mutex<usize>>,
    always_fail: bool,
}

impl MockProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            default_response: response.into(),
            responses: Arc::new(Mutex::new(HashMap::new())),
            call_count: Arc::new(Mutex::new(0)),
            always_fail: false,
        }
    }

    /// Provider whose every call fails with a communication error.
    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::new(String::new())
        }
    }

    pub fn add_response(&mut self, prompt: impl Into<String>, response: impl Into<String>) {
        self.responses
            .lock()
            .expect("mock lock")
            .insert(prompt.into(), response.into());
    }

    /// Number of times `generate` was called, shared across clones.
    pub fn call_count(&self) -> usize {
        *self.call_count.lock().expect("mock lock")
    }
}

#[async_trait]
impl ScoreProvider for MockProvider {
    fn model_label(&self) -> &str {
        "mock"
    }

    async fn generate(&self, prompt: &str) -> Result<String, ScoringError> {
        *self.call_count.lock().expect("mock lock") += 1;
        if self.always_fail {
            return Err(ScoringError::Communication("mock failure".to_string()));
        }
        let responses = self.responses.lock().expect("mock lock");
        Ok(responses
            .get(prompt)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone()))
    }
}

/// Shape the model is instructed to return; provenance fields are added by
/// the gateway after decoding.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    score: i64,
    verdict: String,
    #[serde(default)]
    points_forts: Vec<String>,
    #[serde(default)]
    points_faibles: Vec<String>,
    recommandation: String,
}

/// Strips at most one layer of Markdown code fencing (``` or ```json) around
/// the model output. Anything deeper is the decoder's problem.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn decode_analysis(text: &str) -> Result<RawAnalysis, ScoringError> {
    let payload = strip_code_fence(text);
    serde_json::from_str(payload).map_err(|e| ScoringError::InvalidResponse(e.to_string()))
}

/// Stateless wrapper around the external scoring call. Holds no record of
/// prior scores; at-most-once invocation per id is enforced upstream by
/// deduplication, never here.
pub struct ScoringGateway {
    provider: Box<dyn ScoreProvider>,
    profile: String,
    pause: Duration,
}

impl ScoringGateway {
    pub fn new(provider: Box<dyn ScoreProvider>, profile: impl Into<String>, pause: Duration) -> Self {
        Self {
            provider,
            profile: profile.into(),
            pause,
        }
    }

    /// Deterministic given (draft, profile): same inputs, same prompt.
    pub fn build_prompt(&self, draft: &JobDraft) -> String {
        let description = draft
            .description
            .as_deref()
            .map(|d| truncate_chars(d, DESCRIPTION_PROMPT_LIMIT))
            .unwrap_or("Non disponible");
        format!(
            "Analyse cette offre d'alternance et donne un score sur 10 basé sur le profil suivant :\n\
             \n\
             PROFIL DU CANDIDAT :\n\
             {profile}\n\
             \n\
             OFFRE À ANALYSER :\n\
             Titre : {title}\n\
             Entreprise : {company}\n\
             Localisation : {location}\n\
             Source : {source}\n\
             Description : {description}\n\
             \n\
             CRITÈRES DE SCORING :\n\
             - Match avec le profil (compétences, missions, technologies)\n\
             - Type d'entreprise (Start-up/Scale-up = bonus, Grand groupe = acceptable)\n\
             - Opportunités d'apprentissage et technologies utilisées\n\
             - Red flags (stage déguisé, mission floue, surqualification requise)\n\
             \n\
             RETOURNE UNIQUEMENT un JSON avec ce format exact :\n\
             {{\n\
               \"score\": 8,\n\
               \"verdict\": \"Excellente opportunité\",\n\
               \"points_forts\": [\"Match parfait avec data + operations\"],\n\
               \"points_faibles\": [\"Localisation excentrée\"],\n\
               \"recommandation\": \"Postuler rapidement\"\n\
             }}\n",
            profile = self.profile,
            title = draft.title,
            company = draft.company,
            location = draft.location,
            source = draft.source,
        )
    }

    /// Scores one draft. Never fails: any provider or decode failure yields
    /// the sentinel analysis with the detail in `error`. A fixed pause
    /// follows every invocation, success or not.
    pub async fn score(&self, draft: &JobDraft) -> JobAnalysis {
        let prompt = self.build_prompt(draft);
        let label = self.provider.model_label().to_string();

        let analysis = match self.provider.generate(&prompt).await {
            Ok(text) => match decode_analysis(&text) {
                Ok(raw) => {
                    debug!(id = %draft.id, score = raw.score, "analysis decoded");
                    JobAnalysis {
                        score: raw.score.clamp(0, 10) as u8,
                        verdict: raw.verdict,
                        points_forts: raw.points_forts,
                        points_faibles: raw.points_faibles,
                        recommandation: raw.recommandation,
                        analyzed_at: Utc::now(),
                        analyzer: label,
                        error: None,
                    }
                }
                Err(err) => {
                    warn!(id = %draft.id, %err, "scoring response unusable, recording failure");
                    JobAnalysis::failure(label, err.to_string())
                }
            },
            Err(err) => {
                warn!(id = %draft.id, %err, "scoring call failed, recording failure");
                JobAnalysis::failure(label, err.to_string())
            }
        };

        if !self.pause.is_zero() {
            tokio::time::sleep(self.pause).await;
        }
        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veille_core::{JobSource, FAILURE_VERDICT};

    const GOOD_JSON: &str = r#"{
        "score": 8,
        "verdict": "Excellente opportunité",
        "points_forts": ["data skills"],
        "points_faibles": [],
        "recommandation": "Postuler rapidement"
    }"#;

    fn draft() -> JobDraft {
        JobDraft {
            id: "linkedin_1".to_string(),
            source: JobSource::Linkedin,
            title: "Ops Analyst".to_string(),
            company: "Acme".to_string(),
            location: "Paris".to_string(),
            link: String::new(),
            posted_date: None,
            description: Some("Pilotage des opérations.".to_string()),
        }
    }

    fn gateway(provider: MockProvider) -> ScoringGateway {
        ScoringGateway::new(Box::new(provider), "Étudiant en supply chain", Duration::ZERO)
    }

    #[test]
    fn fence_stripping_handles_one_layer_only() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  ```json\n{}\n```  "), "{}");
        // A second nested layer is left for the decoder to reject.
        assert_eq!(strip_code_fence("```\n```\n{}\n```\n```"), "```\n{}\n```");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "éèêëéèêëéè";
        assert_eq!(truncate_chars(text, 4), "éèêë");
        assert_eq!(truncate_chars("short", 1500), "short");
    }

    #[test]
    fn prompt_interpolates_record_fields_and_profile() {
        let gw = gateway(MockProvider::new(GOOD_JSON));
        let prompt = gw.build_prompt(&draft());
        assert!(prompt.contains("Titre : Ops Analyst"));
        assert!(prompt.contains("Entreprise : Acme"));
        assert!(prompt.contains("Source : linkedin"));
        assert!(prompt.contains("Étudiant en supply chain"));
        assert!(prompt.contains("Pilotage des opérations."));
    }

    #[test]
    fn prompt_truncates_long_descriptions() {
        let gw = gateway(MockProvider::new(GOOD_JSON));
        let mut long = draft();
        long.description = Some("x".repeat(5000));
        let prompt = gw.build_prompt(&long);
        assert!(prompt.contains(&"x".repeat(DESCRIPTION_PROMPT_LIMIT)));
        assert!(!prompt.contains(&"x".repeat(DESCRIPTION_PROMPT_LIMIT + 1)));
    }

    #[test]
    fn prompt_marks_missing_descriptions() {
        let gw = gateway(MockProvider::new(GOOD_JSON));
        let mut no_desc = draft();
        no_desc.description = None;
        assert!(gw.build_prompt(&no_desc).contains("Description : Non disponible"));
    }

    #[tokio::test]
    async fn successful_scoring_fills_provenance() {
        let gw = gateway(MockProvider::new(GOOD_JSON));
        let analysis = gw.score(&draft()).await;
        assert_eq!(analysis.score, 8);
        assert_eq!(analysis.verdict, "Excellente opportunité");
        assert_eq!(analysis.points_forts, vec!["data skills".to_string()]);
        assert_eq!(analysis.analyzer, "mock");
        assert!(analysis.error.is_none());
    }

    #[tokio::test]
    async fn fenced_output_is_accepted() {
        let gw = gateway(MockProvider::new(format!("```json\n{GOOD_JSON}\n```")));
        let analysis = gw.score(&draft()).await;
        assert_eq!(analysis.score, 8);
        assert!(analysis.error.is_none());
    }

    #[tokio::test]
    async fn out_of_range_scores_are_clamped() {
        let gw = gateway(MockProvider::new(
            r#"{"score": 14, "verdict": "trop", "recommandation": "non"}"#,
        ));
        assert_eq!(gw.score(&draft()).await.score, 10);

        let gw = gateway(MockProvider::new(
            r#"{"score": -3, "verdict": "bas", "recommandation": "non"}"#,
        ));
        assert_eq!(gw.score(&draft()).await.score, 0);
    }

    #[tokio::test]
    async fn malformed_output_becomes_the_sentinel() {
        let gw = gateway(MockProvider::new("Voici mon analyse : c'est une bonne offre"));
        let analysis = gw.score(&draft()).await;
        assert_eq!(analysis.score, 0);
        assert_eq!(analysis.verdict, FAILURE_VERDICT);
        assert_eq!(analysis.points_faibles.len(), 1);
        assert!(analysis.error.is_some());
    }

    #[tokio::test]
    async fn provider_failure_becomes_the_sentinel() {
        let provider = MockProvider::failing();
        let counter = provider.clone();
        let gw = gateway(provider);
        let analysis = gw.score(&draft()).await;
        assert_eq!(analysis.score, 0);
        assert_eq!(analysis.verdict, FAILURE_VERDICT);
        assert!(analysis.error.as_deref().unwrap().contains("mock failure"));
        assert_eq!(counter.call_count(), 1);
    }

    #[tokio::test]
    async fn call_count_is_shared_across_clones() {
        let provider = MockProvider::new(GOOD_JSON);
        let counter = provider.clone();
        let gw = gateway(provider);
        gw.score(&draft()).await;
        gw.score(&draft()).await;
        assert_eq!(counter.call_count(), 2);
    }
}
