//! Lexical task classifier and iteration budgets.
//!
//! The local classifier scores five tiers from surface signals; an optional
//! AI override may replace the tier but must preserve the local scores and
//! mark its source.  The reasoning loop then applies trigger-aware upgrades
//! before deriving iteration budgets.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::Trigger;
use crate::config::LoopConfig;

// ─── Tier ─────────────────────────────────────────────────────────────────────

/// Task complexity bucket.  Ordering matters: upgrades only move right.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Trivial,
    #[default]
    Simple,
    Moderate,
    Complex,
    Critical,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trivial => "trivial",
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "trivial" => Some(Self::Trivial),
            "simple" => Some(Self::Simple),
            "moderate" => Some(Self::Moderate),
            "complex" => Some(Self::Complex),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// The AI router never gets routed below `simple`.
    pub fn floor_simple(&self) -> Self {
        if *self == Self::Trivial { Self::Simple } else { *self }
    }
}

// ─── Signals ──────────────────────────────────────────────────────────────────

static GREETING: LazyLock<Regex> = LazyLock::new(|| {
    // `gm`/`gn` are kept deliberately, borderline as they are in some locales.
    Regex::new(
        r"(?i)^\s*(hi|hii+|hello|hey|yo|sup|gm|gn|good\s+(morning|afternoon|evening|night)|thanks|thank\s+you|ty|ok(ay)?|got\s+it|noted|cool|nice|great|how\s+are\s+you\??)\s*[.!?]*\s*$",
    )
    .unwrap_or_else(|e| panic!("greeting regex: {e}"))
});

static COMMAND_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(send|create|make|add|delete|remove|update|schedule|remind|email|message|forward|reply|call|book|order|cancel|set\s+up)\b",
    )
    .unwrap_or_else(|e| panic!("command regex: {e}"))
});

static RESEARCH_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(research|investigate|compare|analy[sz]e|evaluate|summari[sz]e|find\s+out|look\s+up|review|audit|explore)\b",
    )
    .unwrap_or_else(|e| panic!("research regex: {e}"))
});

static MULTI_STEP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(first|second(ly)?|third(ly)?|then|after\s+that|next|finally|afterwards|step\s+\d)\b",
    )
    .unwrap_or_else(|e| panic!("multi-step regex: {e}"))
});

static MULTI_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(and\s+also|as\s+well\s+as|along\s+with|plus|both|additionally|also)\b")
        .unwrap_or_else(|e| panic!("multi-entity regex: {e}"))
});

static CONDITIONAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(if|unless|depending\s+on|in\s+case|when(ever)?\s+possible|otherwise)\b")
        .unwrap_or_else(|e| panic!("conditional regex: {e}"))
});

static AGGREGATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(all|every|each|combine|aggregate|across|total|overall|entire)\b")
        .unwrap_or_else(|e| panic!("aggregation regex: {e}"))
});

/// CLI sub-provider names and file-generation phrasing, both of which force at
/// least a moderate budget.
static CLI_PROVIDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(claude|gemini|codex)\b").unwrap_or_else(|e| panic!("cli regex: {e}"))
});

static FILE_GENERATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(generate|create|write|draft|make|produce|build)\b.*\b(pdf|docx?|xlsx?|csv|pptx?|spreadsheet|presentation|report|document|file)\b",
    )
    .unwrap_or_else(|e| panic!("file regex: {e}"))
});

// ─── Classification ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierSource {
    Local,
    Ai,
}

/// Surface analysis flags surfaced alongside the tier.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Analysis {
    pub is_multi_step: bool,
    pub is_command: bool,
    pub is_greeting: bool,
    pub has_research: bool,
    pub has_conditional: bool,
    pub has_aggregation: bool,
    pub word_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub tier: Tier,
    /// Winner's share of the total score mass, in [0, 1].
    pub confidence: f64,
    pub scores: HashMap<Tier, f64>,
    pub analysis: Analysis,
    pub source: ClassifierSource,
    pub reasoning: Option<String>,
}

// ─── TaskClassifier ───────────────────────────────────────────────────────────

pub struct TaskClassifier;

impl TaskClassifier {
    /// Deterministic local classification from lexical signals.
    pub fn classify(text: &str) -> Classification {
        let trimmed = text.trim();
        let word_count = trimmed.split_whitespace().count();

        let analysis = Analysis {
            is_multi_step: MULTI_STEP.is_match(trimmed),
            is_command: COMMAND_VERB.is_match(trimmed),
            is_greeting: GREETING.is_match(trimmed),
            has_research: RESEARCH_VERB.is_match(trimmed),
            has_conditional: CONDITIONAL.is_match(trimmed),
            has_aggregation: AGGREGATION.is_match(trimmed),
            word_count,
        };

        let mut scores: HashMap<Tier, f64> = HashMap::new();

        let mut trivial = 0.0;
        if analysis.is_greeting {
            trivial += 1.0;
        }
        if word_count <= 4 && !analysis.is_command {
            trivial += 0.4;
        }

        let mut simple = 0.1;
        if analysis.is_command {
            simple += 0.6;
        }
        if word_count <= 12 {
            simple += 0.2;
        }

        let mut moderate = 0.0;
        if analysis.has_research {
            moderate += 0.6;
        }
        if analysis.is_command && word_count > 12 {
            moderate += 0.3;
        }
        if word_count > 20 {
            moderate += 0.2;
        }

        let mut complex = 0.0;
        if analysis.is_multi_step {
            complex += 0.5;
        }
        if MULTI_ENTITY.is_match(trimmed) {
            complex += 0.3;
        }
        if analysis.has_conditional {
            complex += 0.2;
        }
        if analysis.has_aggregation {
            complex += 0.15;
        }
        if word_count > 35 {
            complex += 0.2;
        }

        let mut critical = 0.0;
        if analysis.is_multi_step && analysis.has_research && MULTI_ENTITY.is_match(trimmed) {
            critical += 0.5;
        }
        if word_count > 60 {
            critical += 0.3;
        }

        // A greeting suppresses the action buckets outright.
        if analysis.is_greeting {
            simple *= 0.2;
            moderate = 0.0;
            complex = 0.0;
            critical = 0.0;
        }

        scores.insert(Tier::Trivial, trivial);
        scores.insert(Tier::Simple, simple);
        scores.insert(Tier::Moderate, moderate);
        scores.insert(Tier::Complex, complex);
        scores.insert(Tier::Critical, critical);

        let total: f64 = scores.values().sum::<f64>().max(f64::EPSILON);
        let (tier, best) = [
            Tier::Trivial,
            Tier::Simple,
            Tier::Moderate,
            Tier::Complex,
            Tier::Critical,
        ]
        .into_iter()
        .map(|t| (t, scores.get(&t).copied().unwrap_or(0.0)))
        // On ties, max_by prefers later elements; scanning trivial→critical
        // therefore resolves ties toward the heavier tier.
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((Tier::Simple, 0.0));

        Classification {
            tier,
            confidence: best / total,
            scores,
            analysis,
            source: ClassifierSource::Local,
            reasoning: None,
        }
    }

    /// Replace the tier with an AI-provided override, preserving local scores.
    pub fn apply_ai_override(
        mut classification: Classification,
        tier: Tier,
        reasoning: impl Into<String>,
    ) -> Classification {
        classification.tier = tier;
        classification.source = ClassifierSource::Ai;
        classification.reasoning = Some(reasoning.into());
        classification
    }

    /// Trigger-aware budget adjustment.  Returns the possibly-upgraded tier
    /// and the reason for the upgrade.  Upgrades only ever move up, so the
    /// derived budgets never shrink.
    pub fn adjust_for_trigger(
        classification: &Classification,
        trigger: Trigger,
        text: &str,
    ) -> (Tier, Option<String>) {
        let mut tier = classification.tier;
        let mut reason: Option<String> = None;
        let mut upgrade = |to: Tier, why: &str, tier: &mut Tier, reason: &mut Option<String>| {
            if to > *tier {
                *tier = to;
                *reason = Some(why.to_string());
            }
        };

        if tier == Tier::Trivial && trigger == Trigger::IncomingMessage {
            upgrade(Tier::Simple, "incoming message floor", &mut tier, &mut reason);
        }
        if classification.analysis.is_multi_step
            && matches!(tier, Tier::Trivial | Tier::Simple)
        {
            upgrade(Tier::Moderate, "multi-step request", &mut tier, &mut reason);
        }
        if CLI_PROVIDER.is_match(text) || FILE_GENERATION.is_match(text) {
            upgrade(
                Tier::Moderate,
                "names a CLI provider or file generation",
                &mut tier,
                &mut reason,
            );
        }
        if tier == Tier::Simple
            && classification.analysis.is_command
            && trigger == Trigger::IncomingMessage
            && classification.confidence < 0.75
        {
            upgrade(
                Tier::Moderate,
                "low-confidence command",
                &mut tier,
                &mut reason,
            );
        }
        if tier == Tier::Simple {
            let complex = classification.scores.get(&Tier::Complex).copied().unwrap_or(0.0);
            let simple = classification.scores.get(&Tier::Simple).copied().unwrap_or(0.0);
            if complex >= 0.7 * simple && classification.analysis.word_count > 5 {
                upgrade(
                    Tier::Moderate,
                    "complex score rivals simple",
                    &mut tier,
                    &mut reason,
                );
            }
        }

        (tier, reason)
    }

    /// `(max_iterations, max_tool_calls)` per tier, with user overrides merged
    /// on top.
    pub fn iteration_budget(tier: Tier, config: &LoopConfig) -> (u32, u32) {
        if let Some(&(iterations, tools)) = config.budget_overrides.get(tier.as_str()) {
            return (iterations, tools);
        }
        match tier {
            Tier::Trivial => (1, 1),
            Tier::Simple => (3, 3),
            Tier::Moderate => (8, 6),
            Tier::Complex => (12, 8),
            Tier::Critical => (15, 10),
        }
    }

    /// Shared greeting check for the fast-path bypass: ≤ 5 words and matching
    /// the greeting pattern.
    pub fn is_greeting(text: &str) -> bool {
        text.split_whitespace().count() <= 5 && GREETING.is_match(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greetings_classify_trivial() {
        for text in ["Hi", "gm", "good morning!", "thanks", "ok"] {
            let c = TaskClassifier::classify(text);
            assert_eq!(c.tier, Tier::Trivial, "{text:?} should be trivial");
            assert!(c.analysis.is_greeting);
        }
    }

    #[test]
    fn short_command_classifies_simple() {
        let c = TaskClassifier::classify("Send the invoice to John");
        assert_eq!(c.tier, Tier::Simple);
        assert!(c.analysis.is_command);
    }

    #[test]
    fn research_request_classifies_moderate() {
        let c = TaskClassifier::classify(
            "Research the new supplier pricing and summarize what changed",
        );
        assert!(c.tier >= Tier::Moderate, "got {:?}", c.tier);
        assert!(c.analysis.has_research);
    }

    #[test]
    fn multi_step_multi_entity_reaches_complex() {
        let c = TaskClassifier::classify(
            "First research supplier X and also supplier Y, then compare their prices, and finally draft an email with the results if the difference is large",
        );
        assert!(c.tier >= Tier::Complex, "got {:?}", c.tier);
        assert!(c.analysis.is_multi_step);
    }

    #[test]
    fn incoming_message_upgrades_trivial_to_simple() {
        let c = TaskClassifier::classify("Hi");
        let (tier, reason) =
            TaskClassifier::adjust_for_trigger(&c, Trigger::IncomingMessage, "Hi");
        assert_eq!(tier, Tier::Simple);
        assert!(reason.is_some());

        // Other triggers leave trivial alone.
        let (tier, _) = TaskClassifier::adjust_for_trigger(&c, Trigger::Heartbeat, "Hi");
        assert_eq!(tier, Tier::Trivial);
    }

    #[test]
    fn cli_provider_mention_forces_moderate() {
        let c = TaskClassifier::classify("ask codex to refactor it");
        let (tier, _) = TaskClassifier::adjust_for_trigger(
            &c,
            Trigger::IncomingMessage,
            "ask codex to refactor it",
        );
        assert!(tier >= Tier::Moderate);
    }

    #[test]
    fn file_generation_forces_moderate() {
        let text = "create a pdf report of this week";
        let c = TaskClassifier::classify(text);
        let (tier, _) = TaskClassifier::adjust_for_trigger(&c, Trigger::IncomingMessage, text);
        assert!(tier >= Tier::Moderate);
    }

    #[test]
    fn upgrades_never_shrink_budgets() {
        let config = LoopConfig::default();
        for text in ["Hi", "Send mail to Bob", "research then compare and also email everyone"] {
            let c = TaskClassifier::classify(text);
            let (before_iters, before_tools) = TaskClassifier::iteration_budget(c.tier, &config);
            let (tier, _) = TaskClassifier::adjust_for_trigger(&c, Trigger::IncomingMessage, text);
            let (after_iters, after_tools) = TaskClassifier::iteration_budget(tier, &config);
            assert!(after_iters >= before_iters, "{text:?}");
            assert!(after_tools >= before_tools, "{text:?}");
        }
    }

    #[test]
    fn budgets_match_tier_table() {
        let config = LoopConfig::default();
        assert_eq!(TaskClassifier::iteration_budget(Tier::Trivial, &config), (1, 1));
        assert_eq!(TaskClassifier::iteration_budget(Tier::Simple, &config), (3, 3));
        assert_eq!(TaskClassifier::iteration_budget(Tier::Moderate, &config), (8, 6));
        assert_eq!(TaskClassifier::iteration_budget(Tier::Complex, &config), (12, 8));
        assert_eq!(TaskClassifier::iteration_budget(Tier::Critical, &config), (15, 10));
    }

    #[test]
    fn budget_overrides_merge_on_top() {
        let mut config = LoopConfig::default();
        config.budget_overrides.insert("simple".to_string(), (5, 4));
        assert_eq!(TaskClassifier::iteration_budget(Tier::Simple, &config), (5, 4));
        assert_eq!(TaskClassifier::iteration_budget(Tier::Moderate, &config), (8, 6));
    }

    #[test]
    fn ai_override_preserves_scores() {
        let local = TaskClassifier::classify("Send mail");
        let scores = local.scores.clone();
        let overridden =
            TaskClassifier::apply_ai_override(local, Tier::Complex, "user config enabled");
        assert_eq!(overridden.tier, Tier::Complex);
        assert_eq!(overridden.source, ClassifierSource::Ai);
        assert_eq!(overridden.scores, scores);
    }

    #[test]
    fn greeting_fast_path_check() {
        assert!(TaskClassifier::is_greeting("Hi"));
        assert!(TaskClassifier::is_greeting("gm"));
        assert!(!TaskClassifier::is_greeting("Hi, please email John about the invoice"));
    }

    #[test]
    fn tier_floor_for_router() {
        assert_eq!(Tier::Trivial.floor_simple(), Tier::Simple);
        assert_eq!(Tier::Complex.floor_simple(), Tier::Complex);
    }
}
