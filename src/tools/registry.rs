use std::{collections::HashMap, sync::Arc};

use super::traits::{Tool, ToolInfo};

/// Central registry of available tools.
///
/// Populated once at boot; `Arc<ToolRegistry>` is then shared read-only with
/// every reasoning run.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.  Overwrites any previous tool with the same ID.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.id().to_string(), tool);
    }

    /// Look up a tool by ID.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    /// List all registered tools.
    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools.values().map(|t| info_of(t.as_ref())).collect()
    }

    /// List only the tools whose IDs appear in `ids`, preserving the order of
    /// `ids` (the selector's ordering is meaningful in the prompt).
    pub fn list_by_ids(&self, ids: &[String]) -> Vec<ToolInfo> {
        ids.iter()
            .filter_map(|id| self.tools.get(id))
            .map(|t| info_of(t.as_ref()))
            .collect()
    }

    /// All registered IDs, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tools.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn info_of(tool: &dyn Tool) -> ToolInfo {
    ToolInfo {
        id: tool.id().to_string(),
        description: tool.description().to_string(),
        required_params: tool.required_params().iter().map(|s| s.to_string()).collect(),
        optional_params: tool.optional_params().iter().map(|s| s.to_string()).collect(),
        category: tool.category(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use test_support::StubTool;

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(StubTool::ok("respond", serde_json::json!({}))));
        assert!(reg.get("respond").is_some());
        assert!(reg.get("nonexistent").is_none());
    }

    #[test]
    fn list_by_ids_preserves_order_and_skips_unknown() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(StubTool::ok("b", serde_json::json!({}))));
        reg.register(Arc::new(StubTool::ok("a", serde_json::json!({}))));

        let infos = reg.list_by_ids(&["a".to_string(), "missing".to_string(), "b".to_string()]);
        let ids: Vec<&str> = infos.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
