//! Tool-call validation and auto-correction.
//!
//! Models misspell tool IDs and parameter names constantly; the validator
//! repairs what it can (alias table, fuzzy match, parameter renames) and
//! returns nearest-neighbour suggestions when it cannot.

use serde_json::Value;

use super::parser::ParsedCall;

// ─── Alias tables ─────────────────────────────────────────────────────────────

/// Model-invented tool names mapped to canonical IDs.
const TOOL_ALIASES: &[(&str, &str)] = &[
    ("respondToUser", "respond"),
    ("reply", "respond"),
    ("sendResponse", "respond"),
    ("search", "searchWeb"),
    ("web_search", "searchWeb"),
    ("webSearch", "searchWeb"),
    ("finish", "done"),
    ("complete", "done"),
    ("end", "done"),
    ("createPlan", "generatePlan"),
    ("plan", "generatePlan"),
    ("save_memory", "saveMemory"),
    ("remember", "saveMemory"),
    ("storeMemory", "saveMemory"),
    ("recall", "searchMemory"),
    ("ask_human", "requestHumanInput"),
    ("askHuman", "requestHumanInput"),
    ("askUser", "requestHumanInput"),
    ("send_email", "sendEmail"),
    ("email", "sendEmail"),
    ("send_whatsapp", "sendWhatsApp"),
    ("whatsapp", "sendWhatsApp"),
    ("send_telegram", "sendTelegram"),
];

/// Loose parameter names mapped to canonical ones.
const PARAM_ALIASES: &[(&str, &str)] = &[
    ("msg", "message"),
    ("text", "message"),
    ("content", "message"),
    ("body", "message"),
    ("response", "message"),
    ("q", "query"),
    ("search_query", "query"),
    ("searchQuery", "query"),
    ("term", "query"),
    ("keywords", "query"),
    ("recipient", "to"),
    ("recipient_name", "contactName"),
    ("contact", "contactName"),
    ("name", "contactName"),
];

/// Maximum edit distance accepted by the fuzzy match.
const MAX_FUZZY_DISTANCE: usize = 3;

/// How many nearest IDs to offer when validation fails.
const SUGGESTION_COUNT: usize = 5;

// ─── Validation ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Validation {
    /// The call is usable; IDs/params may have been corrected in place.
    Valid(ParsedCall),
    /// No match; the message names the nearest available tools.
    Invalid { error: String },
}

pub struct ToolCallValidator;

impl ToolCallValidator {
    /// Validate `call` against the cycle's available tool IDs, correcting the
    /// tool ID and parameter names where possible.
    pub fn validate(call: &ParsedCall, available: &[String]) -> Validation {
        let resolved = Self::resolve_id(&call.action, available);
        let Some(tool_id) = resolved else {
            let mut nearest: Vec<(usize, &String)> = available
                .iter()
                .map(|id| (levenshtein(&call.action, id), id))
                .collect();
            nearest.sort_by_key(|(d, _)| *d);
            let suggestions: Vec<&str> = nearest
                .iter()
                .take(SUGGESTION_COUNT)
                .map(|(_, id)| id.as_str())
                .collect();
            return Validation::Invalid {
                error: format!(
                    "Unknown tool \"{}\". Closest available tools: {}",
                    call.action,
                    suggestions.join(", ")
                ),
            };
        };

        let mut corrected = call.clone();
        corrected.action = tool_id;
        corrected.params = correct_params(&corrected.params);
        Validation::Valid(corrected)
    }

    /// Direct match → alias table → fuzzy match.
    fn resolve_id(action: &str, available: &[String]) -> Option<String> {
        if available.iter().any(|id| id == action) {
            return Some(action.to_string());
        }

        if let Some((_, canonical)) = TOOL_ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(action))
        {
            if available.iter().any(|id| id == canonical) {
                return Some((*canonical).to_string());
            }
        }

        // Fuzzy: nearest available ID within the distance bound.
        available
            .iter()
            .map(|id| (levenshtein(action, id), id))
            .filter(|(d, _)| *d <= MAX_FUZZY_DISTANCE)
            .min_by_key(|(d, _)| *d)
            .map(|(_, id)| id.clone())
    }
}

/// Rename loosely-named parameters to their canonical keys.  Existing
/// canonical keys are never overwritten.
fn correct_params(params: &Value) -> Value {
    let Some(map) = params.as_object() else {
        return params.clone();
    };
    let mut out = serde_json::Map::new();
    for (key, value) in map {
        let canonical = PARAM_ALIASES
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(key))
            .map(|(_, c)| (*c).to_string())
            .unwrap_or_else(|| key.clone());
        if map.contains_key(&canonical) && &canonical != key {
            // The canonical key is already present; keep the original too.
            out.insert(key.clone(), value.clone());
        } else {
            out.entry(canonical).or_insert_with(|| value.clone());
        }
    }
    Value::Object(out)
}

/// Classic two-row Levenshtein distance, case-insensitive.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
