//! Technique scripts: TOML descriptions of categories and canned technique
//! behaviour, used to drive the engine without real analyzers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use repograde_core::{
    CategoryPlan, Confidence, EvaluationContext, ItemScore, ItemStatus, TechniqueError,
    TechniqueOutcome, TechniqueRunner, TokenUsage, TraceEvent,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Agent name stamped on scripted scores and traces.
const SCRIPT_AGENT: &str = "script";

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_repository")]
    pub repository: String,
    /// Passed through to techniques as context metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, rename = "category")]
    pub categories: Vec<ScriptCategory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptCategory {
    pub id: String,
    #[serde(default, rename = "technique")]
    pub techniques: Vec<ScriptedTechnique>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedTechnique {
    pub id: String,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub scores: Vec<ScriptedScore>,
    /// Fail with this message instead of scoring.
    #[serde(default)]
    pub fail: Option<String>,
    /// Panic mid-run.
    #[serde(default)]
    pub panic: bool,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedScore {
    pub item: String,
    pub score: f64,
    pub max_score: f64,
    #[serde(default)]
    pub confidence: Option<Confidence>,
    #[serde(default)]
    pub status: Option<ItemStatus>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_repository() -> String {
    ".".to_string()
}

impl ScriptFile {
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script: {:?}", path))?;
        Self::from_toml_str(&source).with_context(|| format!("Invalid script: {:?}", path))
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let script: Self = toml::from_str(source).context("Failed to parse script TOML")?;
        script.validate()?;
        Ok(script)
    }

    /// Technique ids double as runner keys, so they must be unique across
    /// the whole script.
    fn validate(&self) -> Result<()> {
        let mut categories = HashSet::new();
        let mut techniques = HashSet::new();
        for category in &self.categories {
            if !categories.insert(category.id.as_str()) {
                anyhow::bail!("duplicate category id '{}'", category.id);
            }
            for technique in &category.techniques {
                if !techniques.insert(technique.id.as_str()) {
                    anyhow::bail!("duplicate technique id '{}'", technique.id);
                }
            }
        }
        Ok(())
    }

    pub fn plans(&self) -> Vec<CategoryPlan> {
        self.categories
            .iter()
            .map(|c| CategoryPlan::new(&c.id, c.techniques.iter().map(|t| t.id.as_str())))
            .collect()
    }
}

/// [`TechniqueRunner`] that replays scripted behaviour.
pub struct ScriptRunner {
    techniques: HashMap<String, ScriptedTechnique>,
}

impl ScriptRunner {
    pub fn new(script: &ScriptFile) -> Self {
        let techniques = script
            .categories
            .iter()
            .flat_map(|c| c.techniques.iter())
            .map(|t| (t.id.clone(), t.clone()))
            .collect();
        Self { techniques }
    }
}

#[async_trait]
impl TechniqueRunner for ScriptRunner {
    async fn run(
        &self,
        technique_id: &str,
        context: Arc<EvaluationContext>,
    ) -> Result<TechniqueOutcome, TechniqueError> {
        let technique = self
            .techniques
            .get(technique_id)
            .ok_or_else(|| TechniqueError::failed(format!("unknown technique {technique_id}")))?;

        if technique.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(technique.delay_ms)).await;
        }
        if technique.panic {
            panic!("scripted panic in {technique_id}");
        }
        if let Some(message) = &technique.fail {
            return Err(TechniqueError::failed(message.as_str()));
        }

        let mut outcome = TechniqueOutcome::succeeded(technique_id).with_usage(TokenUsage {
            input_tokens: technique.input_tokens,
            output_tokens: technique.output_tokens,
            cost_usd: technique.cost_usd,
        });
        for (step, scripted) in technique.scores.iter().enumerate() {
            let mut score = ItemScore::new(
                &scripted.item,
                scripted.score,
                scripted.max_score,
                SCRIPT_AGENT,
                technique_id,
            )
            .with_confidence(scripted.confidence.unwrap_or(Confidence::High))
            .with_status(scripted.status.unwrap_or_default());
            if let Some(notes) = &scripted.notes {
                score = score.with_notes(notes.as_str());
            }
            outcome = outcome.with_score(score).with_trace(
                TraceEvent::new(step as u32 + 1, SCRIPT_AGENT, technique_id, "scored")
                    .with_item(&scripted.item)
                    .with_score_delta(scripted.score)
                    .with_evidence(context.repository.as_str()),
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
repository = "/srv/app"

[metadata]
language = "rust"

[[category]]
id = "docs"

[[category.technique]]
id = "readme"
input_tokens = 120
output_tokens = 30
cost_usd = 0.002
scores = [
  { item = "1.1", score = 2.0, max_score = 5.0, confidence = "LOW", notes = "thin" },
  { item = "1.2", score = 0.0, max_score = 5.0, status = "data_missing" },
]

[[category.technique]]
id = "broken"
fail = "parser error"
"#;

    fn context() -> Arc<EvaluationContext> {
        Arc::new(EvaluationContext::new("eval-script", "/srv/app"))
    }

    #[test]
    fn test_parse_script() {
        let script = ScriptFile::from_toml_str(SCRIPT).unwrap();
        assert_eq!(script.repository, "/srv/app");
        assert_eq!(script.metadata["language"], "rust");
        assert_eq!(
            script.plans(),
            vec![CategoryPlan::new("docs", ["readme", "broken"])]
        );
    }

    #[test]
    fn test_duplicate_technique_rejected() {
        let source = r#"
[[category]]
id = "a"
[[category.technique]]
id = "same"

[[category]]
id = "b"
[[category.technique]]
id = "same"
"#;
        let err = ScriptFile::from_toml_str(source).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate technique id 'same'"));
    }

    #[tokio::test]
    async fn test_runner_replays_scores() {
        let script = ScriptFile::from_toml_str(SCRIPT).unwrap();
        let runner = ScriptRunner::new(&script);

        let outcome = runner.run("readme", context()).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.usage.total_tokens(), 150);
        let first = &outcome.item_scores["1.1"];
        assert_eq!(first.confidence, Confidence::Low);
        assert_eq!(first.notes.as_deref(), Some("thin"));
        assert_eq!(outcome.item_scores["1.2"].status, ItemStatus::DataMissing);
        assert_eq!(outcome.trace_events.len(), 2);
        assert_eq!(outcome.trace_events[1].step, 2);
        assert_eq!(
            outcome.trace_events[0].evidence_ref.as_deref(),
            Some("/srv/app")
        );
    }

    #[tokio::test]
    async fn test_runner_failures() {
        let script = ScriptFile::from_toml_str(SCRIPT).unwrap();
        let runner = ScriptRunner::new(&script);

        let err = runner.run("broken", context()).await.unwrap_err();
        assert_eq!(err, TechniqueError::failed("parser error"));

        let err = runner.run("missing", context()).await.unwrap_err();
        assert!(err.to_string().contains("unknown technique missing"));
    }
}
