//! Task decomposition: detecting decomposable requests and asking the AI for
//! a plan DAG.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::classifier::{Classification, Tier};
use crate::ai::types::{AiRequest, Message};

/// Hard cap on plan size.
pub const MAX_PLAN_STEPS: usize = 6;

static MULTI_PLATFORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(whatsapp|email|telegram|slack|sms|calendar)\b.*\b(whatsapp|email|telegram|slack|sms|calendar)\b")
        .unwrap_or_else(|e| panic!("platform regex: {e}"))
});

// ─── Plan schema ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required_tools: Vec<String>,
    #[serde(default)]
    pub required_skills: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_step_iterations")]
    pub estimated_iterations: u32,
    #[serde(default)]
    pub can_parallelize: bool,
    /// `standard` or `human_input`.
    #[serde(default)]
    pub step_type: String,
}

fn default_step_iterations() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SynthesisStep {
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub goal: String,
    #[serde(default)]
    pub estimated_complexity: String,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub synthesis_step: SynthesisStep,
    /// step id → ids it depends on.
    #[serde(default)]
    pub dependency_graph: HashMap<String, Vec<String>>,
    /// Topological order of step ids.
    #[serde(default)]
    pub execution_order: Vec<String>,
    /// Waves of steps whose dependencies are satisfied by prior waves.
    #[serde(default)]
    pub parallel_groups: Vec<Vec<String>>,
}

impl Plan {
    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

// ─── TaskDecomposer ───────────────────────────────────────────────────────────

pub struct TaskDecomposer;

impl TaskDecomposer {
    /// Whether the request is worth decomposing at all.
    pub fn should_decompose(classification: &Classification, tier: Tier, text: &str) -> bool {
        match tier {
            Tier::Critical => true,
            Tier::Complex => {
                let analysis = &classification.analysis;
                let signals = [
                    analysis.is_multi_step,
                    text_has_multi_entity(text),
                    analysis.has_research,
                    MULTI_PLATFORM.is_match(text),
                    analysis.has_conditional,
                    analysis.has_aggregation,
                ];
                signals.iter().filter(|s| **s).count() >= 2
            }
            Tier::Moderate => {
                classification.analysis.is_multi_step && text_has_multi_entity(text)
            }
            _ => false,
        }
    }

    /// Build the decomposition request.  The plan executor routes it through
    /// the reasoning loop's `ai_call` so usage accounting stays in one place,
    /// then feeds the response to [`extract_plan_json`] and
    /// [`Self::finalize`].
    pub fn decompose_request(task: &str, agent_context: &str, user_id: &str) -> AiRequest {
        let prompt = format!(
            "Decompose the following request into a plan of at most {MAX_PLAN_STEPS} steps.\n\
             Each step should need roughly 3-5 tool calls.  Mark independent research steps\n\
             with \"can_parallelize\": true and steps that need a human answer with\n\
             \"step_type\": \"human_input\".\n\
             Respond with ONLY a JSON object:\n\
             {{\"goal\": \"…\", \"estimated_complexity\": \"…\", \"steps\": [{{\"id\": \"s1\",\n\
             \"title\": \"…\", \"description\": \"…\", \"required_tools\": [], \"depends_on\": [],\n\
             \"estimated_iterations\": 3, \"can_parallelize\": false, \"step_type\": \"standard\"}}],\n\
             \"synthesis_step\": {{\"description\": \"…\"}}}}\n\nRequest:\n{task}"
        );
        AiRequest::new(
            "plan decomposition",
            user_id,
            vec![
                Message::system(agent_context.to_string()),
                Message::user(prompt),
            ],
        )
        .with_force_tier(Tier::Moderate.as_str())
    }

    /// Validate and complete a raw plan: cap size, build the dependency graph,
    /// topological order, and parallel waves.
    pub fn finalize(mut plan: Plan) -> Option<Plan> {
        if plan.steps.is_empty() {
            return None;
        }
        plan.steps.truncate(MAX_PLAN_STEPS);

        let ids: HashSet<String> = plan.steps.iter().map(|s| s.id.clone()).collect();
        if ids.len() != plan.steps.len() {
            debug!("plan rejected: duplicate step ids");
            return None;
        }
        // Drop dangling dependencies instead of failing the whole plan.
        for step in &mut plan.steps {
            step.depends_on.retain(|d| ids.contains(d));
        }

        plan.dependency_graph = plan
            .steps
            .iter()
            .map(|s| (s.id.clone(), s.depends_on.clone()))
            .collect();

        plan.execution_order = topological_order(&plan.steps)?;
        plan.parallel_groups = parallel_waves(&plan.steps);
        Some(plan)
    }
}

fn text_has_multi_entity(text: &str) -> bool {
    static MULTI_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\b(and\s+also|as\s+well\s+as|along\s+with|plus|both|also|and)\b")
            .unwrap_or_else(|e| panic!("entity regex: {e}"))
    });
    MULTI_ENTITY.is_match(text)
}

/// Pull the plan object out of the response (fenced or bare JSON).
pub(crate) fn extract_plan_json(content: &str) -> Option<Plan> {
    let trimmed = content.trim();
    if let Ok(plan) = serde_json::from_str::<Plan>(trimmed) {
        return Some(plan);
    }
    // Look for the first balanced object that deserializes as a plan.
    let start = trimmed.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in trimmed[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &trimmed[start..start + offset + 1];
                    return serde_json::from_str::<Plan>(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Kahn's algorithm over the step DAG; `None` on a cycle.
fn topological_order(steps: &[PlanStep]) -> Option<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> =
        steps.iter().map(|s| (s.id.as_str(), s.depends_on.len())).collect();
    let mut order = Vec::with_capacity(steps.len());

    // Seed with declaration order so ties stay deterministic.
    let mut ready: Vec<&str> = steps
        .iter()
        .filter(|s| s.depends_on.is_empty())
        .map(|s| s.id.as_str())
        .collect();

    while let Some(id) = ready.first().copied() {
        ready.remove(0);
        order.push(id.to_string());
        for step in steps {
            if step.depends_on.iter().any(|d| d == id) {
                let degree = in_degree.get_mut(step.id.as_str())?;
                *degree -= 1;
                if *degree == 0 {
                    ready.push(step.id.as_str());
                }
            }
        }
    }

    (order.len() == steps.len()).then_some(order)
}

/// Waves of steps whose dependencies are all satisfied by earlier waves.
fn parallel_waves(steps: &[PlanStep]) -> Vec<Vec<String>> {
    let mut done: HashSet<&str> = HashSet::new();
    let mut waves = Vec::new();
    while done.len() < steps.len() {
        let wave: Vec<String> = steps
            .iter()
            .filter(|s| !done.contains(s.id.as_str()))
            .filter(|s| s.depends_on.iter().all(|d| done.contains(d.as_str())))
            .map(|s| s.id.clone())
            .collect();
        if wave.is_empty() {
            break; // cycle — already rejected by topological_order
        }
        for id in &wave {
            done.insert(steps.iter().find(|s| &s.id == id).map(|s| s.id.as_str()).unwrap_or(""));
        }
        waves.push(wave);
    }
    waves
}
