//! Deterministic rule-based sub-scores.

use teachprompt_curriculum::CurriculumContext;

use crate::dimension::{Dimension, clamp_score};
use crate::features::PromptFeatures;

fn capped(count: usize, per: f64, cap: f64) -> f64 {
    (count as f64 * per).min(cap)
}

fn flag(present: bool, points: f64) -> f64 {
    if present { points } else { 0.0 }
}

pub fn rule_score(dimension: Dimension, f: &PromptFeatures, ctx: &CurriculumContext) -> f64 {
    let raw = match dimension {
        Dimension::InstructionClarity => {
            let length_ok = (8..=400).contains(&f.word_count);
            30.0 + capped(f.action_markers, 12.0, 24.0)
                + flag(length_ok, 16.0)
                + flag(f.sentence_count >= 2, 10.0)
                + capped(f.structured_steps, 5.0, 15.0)
                + flag(f.role_markers > 0, 5.0)
                - flag(f.word_count < 4, 20.0)
        }
        Dimension::ContextCompleteness => {
            25.0 + flag(f.role_markers > 0, 20.0)
                + flag(f.audience_markers > 0, 20.0)
                + flag(ctx.grade_level.is_some(), 15.0)
                + flag(ctx.subject.is_some(), 10.0)
                + flag(f.word_count >= 30, 10.0)
        }
        Dimension::OutputSpecification => {
            25.0 + capped(f.format_markers, 15.0, 30.0)
                + flag(f.has_length_limit, 25.0)
                + flag(f.example_markers > 0, 10.0)
                + capped(f.structured_steps, 5.0, 10.0)
        }
        Dimension::ConstraintStrength => {
            25.0 + capped(f.constraint_markers, 12.0, 48.0) + flag(f.has_length_limit, 20.0)
        }
        Dimension::CurriculumAlignment => {
            20.0 + flag(ctx.subject.is_some(), 25.0)
                + flag(ctx.grade_level.is_some(), 20.0)
                + flag(ctx.semester.is_some(), 10.0)
                + flag(ctx.lesson.is_some(), 15.0)
                + flag(f.objective_markers > 0, 10.0)
        }
        Dimension::PedagogicalQuality => {
            30.0 + flag(f.objective_markers > 0, 20.0)
                + capped(f.pedagogy_markers, 12.0, 36.0)
                + flag(f.audience_markers > 0, 7.0)
                + flag(f.example_markers > 0, 7.0)
        }
    };
    clamp_score(raw)
}
