//! `teachprompt-scoring`
//!
//! Six-dimension quality scoring for teacher prompts.
//!
//! - Rule-based sub-scores are deterministic and always present.
//! - AI-assisted sub-scores come from one provider call and are optional.
//! - Scoring never fails the caller; a broken provider only removes the AI half.

pub mod ai;
pub mod dimension;
pub mod engine;
pub mod features;
pub mod rules;

pub use ai::{AiScoreError, parse_ai_scores};
pub use dimension::{Dimension, DimensionScore, ScoreResult, WEAKNESS_THRESHOLD};
pub use engine::{ScoredPair, ScoringEngine};
pub use features::PromptFeatures;
