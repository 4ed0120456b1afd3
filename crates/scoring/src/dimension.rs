use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use teachprompt_curriculum::CurriculumContext;

/// Dimensions scoring below this are reported as weaknesses.
pub const WEAKNESS_THRESHOLD: f64 = 60.0;

const RULE_WEIGHT: f64 = 0.6;
const AI_WEIGHT: f64 = 0.4;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    InstructionClarity,
    ContextCompleteness,
    OutputSpecification,
    ConstraintStrength,
    CurriculumAlignment,
    PedagogicalQuality,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::InstructionClarity,
        Dimension::ContextCompleteness,
        Dimension::OutputSpecification,
        Dimension::ConstraintStrength,
        Dimension::CurriculumAlignment,
        Dimension::PedagogicalQuality,
    ];

    /// Weight in the overall score. Weights sum to 1.0.
    pub fn weight(&self) -> f64 {
        match self {
            Dimension::InstructionClarity => 0.20,
            Dimension::ContextCompleteness => 0.20,
            Dimension::OutputSpecification => 0.15,
            Dimension::ConstraintStrength => 0.15,
            Dimension::CurriculumAlignment => 0.15,
            Dimension::PedagogicalQuality => 0.15,
        }
    }

    /// Key used in JSON bodies, including the AI scoring response.
    pub fn key(&self) -> &'static str {
        match self {
            Dimension::InstructionClarity => "instruction_clarity",
            Dimension::ContextCompleteness => "context_completeness",
            Dimension::OutputSpecification => "output_specification",
            Dimension::ConstraintStrength => "constraint_strength",
            Dimension::CurriculumAlignment => "curriculum_alignment",
            Dimension::PedagogicalQuality => "pedagogical_quality",
        }
    }

    /// Improvement hint reported when the dimension is weak.
    pub fn weakness_hint(&self) -> &'static str {
        match self {
            Dimension::InstructionClarity => "state the task with an explicit action and a clear structure",
            Dimension::ContextCompleteness => "describe the role, the audience and the class situation",
            Dimension::OutputSpecification => "specify the expected format, length or an example of the output",
            Dimension::ConstraintStrength => "add explicit constraints such as limits, exclusions or requirements",
            Dimension::CurriculumAlignment => "name the subject, grade, semester or lesson being taught",
            Dimension::PedagogicalQuality => "include learning objectives, activities or assessment steps",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub rule_based: f64,
    pub ai_assisted: Option<f64>,
    pub score: f64,
}

impl DimensionScore {
    /// `0.6 * rule + 0.4 * ai` when the AI sub-score is present, otherwise the rule sub-score.
    pub fn combine(rule_based: f64, ai_assisted: Option<f64>) -> Self {
        let rule_based = clamp_score(rule_based);
        let ai_assisted = ai_assisted.map(clamp_score);
        let score = match ai_assisted {
            Some(ai) => RULE_WEIGHT * rule_based + AI_WEIGHT * ai,
            None => rule_based,
        };
        Self {
            rule_based,
            ai_assisted,
            score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub overall: f64,
    pub dimensions: BTreeMap<Dimension, DimensionScore>,
    pub weaknesses: BTreeMap<Dimension, String>,
    pub context: CurriculumContext,
}

impl ScoreResult {
    pub fn from_dimensions(dimensions: BTreeMap<Dimension, DimensionScore>, context: CurriculumContext) -> Self {
        let overall = dimensions
            .iter()
            .map(|(d, s)| d.weight() * s.score)
            .sum::<f64>();

        let weaknesses = dimensions
            .iter()
            .filter(|(_, s)| s.score < WEAKNESS_THRESHOLD)
            .map(|(d, _)| (*d, d.weakness_hint().to_string()))
            .collect();

        Self {
            overall: round1(overall),
            dimensions,
            weaknesses,
            context,
        }
    }

    pub fn dimension(&self, d: Dimension) -> Option<&DimensionScore> {
        self.dimensions.get(&d)
    }
}

pub(crate) fn clamp_score(v: f64) -> f64 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 100.0) }
}

pub(crate) fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        let total: f64 = Dimension::ALL.iter().map(|d| d.weight()).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn combine_blends_rule_and_ai() {
        let s = DimensionScore::combine(50.0, Some(100.0));
        assert!((s.score - 70.0).abs() < 1e-9);

        let s = DimensionScore::combine(50.0, None);
        assert_eq!(s.score, 50.0);
    }

    #[test]
    fn combine_clamps_out_of_range_inputs() {
        let s = DimensionScore::combine(140.0, Some(-5.0));
        assert_eq!(s.rule_based, 100.0);
        assert_eq!(s.ai_assisted, Some(0.0));
        assert!((s.score - 60.0).abs() < 1e-9);
    }

    #[test]
    fn weaknesses_are_dimensions_below_sixty() {
        let dims = Dimension::ALL
            .iter()
            .map(|d| {
                let v = if *d == Dimension::CurriculumAlignment { 59.9 } else { 60.0 };
                (*d, DimensionScore::combine(v, None))
            })
            .collect();
        let result = ScoreResult::from_dimensions(dims, CurriculumContext::default());

        assert_eq!(result.weaknesses.len(), 1);
        assert!(result.weaknesses.contains_key(&Dimension::CurriculumAlignment));
        assert_eq!(result.overall, 60.0);
    }
}
