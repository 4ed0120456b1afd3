use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use teachprompt_ai::AiProvider;
use teachprompt_curriculum::CurriculumContext;

use crate::ai::{parse_ai_scores, scoring_request};
use crate::dimension::{Dimension, DimensionScore, ScoreResult, round1};
use crate::features::PromptFeatures;
use crate::rules::rule_score;

/// Before/after snapshots of one optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPair {
    pub original: ScoreResult,
    pub optimized: ScoreResult,
    /// `optimized.overall - original.overall`; may be negative.
    pub improvement: f64,
}

#[derive(Clone)]
struct AiScoring {
    provider: Arc<dyn AiProvider>,
    model: String,
}

#[derive(Clone, Default)]
pub struct ScoringEngine {
    ai: Option<AiScoring>,
}

impl std::fmt::Debug for ScoringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringEngine")
            .field("ai_model", &self.ai.as_ref().map(|a| a.model.as_str()))
            .finish()
    }
}

impl ScoringEngine {
    /// Engine producing rule-based sub-scores only.
    pub fn rule_based() -> Self {
        Self::default()
    }

    /// Engine that also asks `provider` for AI-assisted sub-scores.
    pub fn with_ai(provider: Arc<dyn AiProvider>, model: impl Into<String>) -> Self {
        Self {
            ai: Some(AiScoring {
                provider,
                model: model.into(),
            }),
        }
    }

    /// Rule-based scoring only. Deterministic for a given input.
    pub fn score_rules(&self, text: &str, ctx: &CurriculumContext) -> ScoreResult {
        self.assemble(text, ctx, &BTreeMap::new())
    }

    pub async fn score(&self, text: &str, ctx: &CurriculumContext) -> ScoreResult {
        let ai_scores = self.ai_scores(text, ctx).await;
        self.assemble(text, ctx, &ai_scores)
    }

    pub async fn score_pair(
        &self,
        original: &str,
        original_ctx: &CurriculumContext,
        optimized: &str,
        optimized_ctx: &CurriculumContext,
    ) -> ScoredPair {
        let original = self.score(original, original_ctx).await;
        let optimized = self.score(optimized, optimized_ctx).await;
        let improvement = round1(optimized.overall - original.overall);

        debug!(
            original = original.overall,
            optimized = optimized.overall,
            improvement,
            "prompt scored"
        );

        ScoredPair {
            original,
            optimized,
            improvement,
        }
    }

    fn assemble(&self, text: &str, ctx: &CurriculumContext, ai: &BTreeMap<Dimension, f64>) -> ScoreResult {
        let features = PromptFeatures::extract(text);
        let dimensions = Dimension::ALL
            .iter()
            .map(|d| {
                let rule = rule_score(*d, &features, ctx);
                (*d, DimensionScore::combine(rule, ai.get(d).copied()))
            })
            .collect();
        ScoreResult::from_dimensions(dimensions, ctx.clone())
    }

    async fn ai_scores(&self, text: &str, ctx: &CurriculumContext) -> BTreeMap<Dimension, f64> {
        let Some(ai) = &self.ai else {
            return BTreeMap::new();
        };
        if text.trim().is_empty() {
            return BTreeMap::new();
        }

        let request = scoring_request(&ai.model, text, ctx);
        let response = match ai.provider.generate(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, provider = ai.provider.name(), "ai-assisted scoring unavailable");
                return BTreeMap::new();
            }
        };

        match parse_ai_scores(&response.content) {
            Ok(scores) => scores,
            Err(e) => {
                warn!(error = %e, "ai-assisted scoring reply ignored");
                BTreeMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use teachprompt_ai::{ProviderError, ScriptedProvider};
    use teachprompt_curriculum::CurriculumResolver;

    const WEAK: &str = "viết bài";
    const STRONG: &str = "Bạn là giáo viên Toán lớp 10. Hãy soạn 10 câu hỏi trắc nghiệm về hàm số bậc hai cho học sinh.\n\
        1. Mục tiêu: học sinh vận dụng được đồ thị parabol\n\
        2. Mỗi câu có 4 đáp án, chỉ một đáp án đúng\n\
        3. Không dùng số thập phân, trình bày dạng bảng, kèm ví dụ mẫu";

    fn ctx_for(text: &str) -> CurriculumContext {
        CurriculumResolver::new().detect(text)
    }

    #[tokio::test]
    async fn marker_free_prompt_still_scores() {
        let text = "Hãy viết giúp tôi một đoạn giới thiệu ngắn";
        let ctx = ctx_for(text);
        let result = ScoringEngine::rule_based().score(text, &ctx).await;

        assert_eq!(result.context.subject, None);
        assert_eq!(result.context.grade_level, None);
        assert_eq!(result.dimensions.len(), 6);
        let curriculum = result.dimension(Dimension::CurriculumAlignment).unwrap();
        assert_eq!(curriculum.score, 20.0);
        assert!(result.weaknesses.contains_key(&Dimension::CurriculumAlignment));
        assert!((0.0..=100.0).contains(&result.overall));
    }

    #[tokio::test]
    async fn detailed_prompt_scores_higher() {
        let engine = ScoringEngine::rule_based();
        let pair = engine
            .score_pair(WEAK, &ctx_for(WEAK), STRONG, &ctx_for(STRONG))
            .await;

        assert!(pair.improvement > 20.0, "improvement was {}", pair.improvement);
        assert_eq!(
            pair.improvement,
            round1(pair.optimized.overall - pair.original.overall)
        );
        assert!(pair.optimized.weaknesses.len() < pair.original.weaknesses.len());
    }

    #[tokio::test]
    async fn ai_sub_scores_are_blended() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_ok(
            r#"{"instruction_clarity": 100, "context_completeness": 100, "output_specification": 100,
                "constraint_strength": 100, "curriculum_alignment": 100, "pedagogical_quality": 100}"#,
        );
        let engine = ScoringEngine::with_ai(provider.clone(), "grader");
        let ctx = ctx_for(WEAK);

        let rules_only = engine.score_rules(WEAK, &ctx);
        let blended = engine.score(WEAK, &ctx).await;

        assert_eq!(provider.calls(), 1);
        for d in Dimension::ALL {
            let r = rules_only.dimension(d).unwrap().score;
            let b = blended.dimension(d).unwrap();
            assert_eq!(b.ai_assisted, Some(100.0));
            assert!((b.score - (0.6 * r + 40.0)).abs() < 1e-9);
        }
        assert!(blended.overall > rules_only.overall);
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_rules() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_err(ProviderError::Timeout(std::time::Duration::from_secs(1)));
        provider.push_ok("no json here");
        let engine = ScoringEngine::with_ai(provider.clone(), "grader");
        let ctx = ctx_for(STRONG);

        let expected = engine.score_rules(STRONG, &ctx);
        assert_eq!(engine.score(STRONG, &ctx).await, expected);
        assert_eq!(engine.score(STRONG, &ctx).await, expected);
        assert_eq!(provider.calls(), 2);
    }

    proptest! {
        #[test]
        fn overall_always_in_range(text in "\\PC{0,200}") {
            let engine = ScoringEngine::rule_based();
            let ctx = ctx_for(&text);
            let result = engine.score_rules(&text, &ctx);
            prop_assert!((0.0..=100.0).contains(&result.overall));
            prop_assert_eq!(result.dimensions.len(), 6);
            for (d, s) in &result.dimensions {
                prop_assert_eq!(s.score < 60.0, result.weaknesses.contains_key(d));
            }
        }
    }
}
