//! AI-assisted sub-scores.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use teachprompt_ai::GenerationRequest;
use teachprompt_curriculum::CurriculumContext;

use crate::dimension::{Dimension, clamp_score};

#[derive(Debug, Error)]
pub enum AiScoreError {
    #[error("no JSON object in scoring response")]
    NoJson,

    #[error("invalid scoring JSON: {0}")]
    InvalidJson(String),
}

const SCORING_SYSTEM: &str = "You grade prompts written by school teachers for an AI assistant. \
Reply with a single JSON object and nothing else. Keys: instruction_clarity, context_completeness, \
output_specification, constraint_strength, curriculum_alignment, pedagogical_quality. \
Each value is an integer from 0 to 100.";

pub(crate) fn scoring_request(model: &str, text: &str, ctx: &CurriculumContext) -> GenerationRequest {
    let mut prompt = String::new();
    if let Some(desc) = ctx.describe() {
        prompt.push_str("Curriculum context: ");
        prompt.push_str(&desc);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Prompt to grade:\n");
    prompt.push_str(text);

    GenerationRequest::new(model, prompt)
        .with_system(SCORING_SYSTEM)
        .with_sampling(0.0, 1.0)
        .with_max_tokens(256)
}

/// Extracts per-dimension scores from a model reply.
///
/// Tolerates prose or code fences around the object. Unknown keys are ignored,
/// missing or non-numeric keys leave that dimension without an AI sub-score.
pub fn parse_ai_scores(content: &str) -> Result<BTreeMap<Dimension, f64>, AiScoreError> {
    let start = content.find('{').ok_or(AiScoreError::NoJson)?;
    let end = content.rfind('}').ok_or(AiScoreError::NoJson)?;
    if end < start {
        return Err(AiScoreError::NoJson);
    }

    let value: Value =
        serde_json::from_str(&content[start..=end]).map_err(|e| AiScoreError::InvalidJson(e.to_string()))?;
    let obj = value
        .as_object()
        .ok_or_else(|| AiScoreError::InvalidJson("expected an object".to_string()))?;

    Ok(Dimension::ALL
        .iter()
        .filter_map(|d| obj.get(d.key()).and_then(Value::as_f64).map(|v| (*d, clamp_score(v))))
        .collect())
}
