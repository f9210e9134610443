//! Allow/deny policy, centralized.
//!
//! Both the discovery path (formatting tools for an LLM) and the
//! enforcement path (dispatching a tool call) go through these predicates,
//! so the two can never diverge. All functions are pure.

use maestro_domain::config::{AgentConfig, SessionSpec};

/// Stateless policy predicates and transforms.
pub struct FilteringManager;

impl FilteringManager {
    /// Registration-time check: may this session register this component?
    pub fn allow_registration(spec: &SessionSpec, component_name: &str) -> bool {
        !spec.deny_components.iter().any(|d| d == component_name)
    }

    /// Restrict a candidate session list to those the agent may use.
    /// Preserves candidate order.
    pub fn filter_sessions_for_agent(agent: &AgentConfig, candidates: &[String]) -> Vec<String> {
        candidates
            .iter()
            .filter(|s| agent.session_allowed(s))
            .cloned()
            .collect()
    }

    /// Request-time check: may this agent see or call this component?
    pub fn allow_component_for_agent(agent: &AgentConfig, component_name: &str) -> bool {
        agent.component_allowed(component_name)
    }

    /// Drop excluded components from a list, preserving order.
    pub fn filter_component_list<T, F>(agent: &AgentConfig, components: Vec<T>, name_of: F) -> Vec<T>
    where
        F: Fn(&T) -> &str,
    {
        components
            .into_iter()
            .filter(|c| agent.component_allowed(name_of(c)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(deny: &[&str]) -> SessionSpec {
        serde_json::from_value(serde_json::json!({
            "id": "s1",
            "deny_components": deny,
        }))
        .unwrap()
    }

    fn agent(allowed: Option<&[&str]>, excluded: &[&str]) -> AgentConfig {
        serde_json::from_value(serde_json::json!({
            "name": "a",
            "llm_config_id": "default",
            "allowed_sessions": allowed,
            "excluded_components": excluded,
        }))
        .unwrap()
    }

    #[test]
    fn registration_deny_list() {
        let spec = session(&["debug_dump"]);
        assert!(!FilteringManager::allow_registration(&spec, "debug_dump"));
        assert!(FilteringManager::allow_registration(&spec, "weather_lookup"));
    }

    #[test]
    fn session_filter_preserves_order() {
        let agent = agent(Some(&["b", "c"]), &[]);
        let candidates = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(
            FilteringManager::filter_sessions_for_agent(&agent, &candidates),
            vec!["b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn no_allowed_sessions_passes_everything() {
        let agent = agent(None, &[]);
        let candidates = vec!["x".to_string(), "y".to_string()];
        assert_eq!(
            FilteringManager::filter_sessions_for_agent(&agent, &candidates),
            candidates
        );
    }

    #[test]
    fn excluded_component_is_invisible() {
        let agent = agent(None, &["secret_tool"]);
        assert!(!FilteringManager::allow_component_for_agent(&agent, "secret_tool"));
        assert!(FilteringManager::allow_component_for_agent(&agent, "echo"));
    }

    #[test]
    fn component_list_filter() {
        let agent = agent(None, &["b"]);
        let list = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let filtered = FilteringManager::filter_component_list(&agent, list, |s| s.as_str());
        assert_eq!(filtered, vec!["a".to_string(), "c".to_string()]);
    }

    // Deterministic pseudo-random sweep: for any excluded set, no filtered
    // list ever surfaces an excluded name.
    #[test]
    fn exclusion_soundness_sweep() {
        let universe: Vec<String> = (0..16).map(|i| format!("tool_{i}")).collect();
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        for _ in 0..200 {
            // xorshift
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let excluded: Vec<&str> = universe
                .iter()
                .enumerate()
                .filter(|(i, _)| seed >> i & 1 == 1)
                .map(|(_, n)| n.as_str())
                .collect();
            let cfg = agent(None, &excluded);
            let filtered =
                FilteringManager::filter_component_list(&cfg, universe.clone(), |s| s.as_str());
            for name in &filtered {
                assert!(
                    !excluded.contains(&name.as_str()),
                    "excluded component {name} surfaced"
                );
            }
            assert_eq!(filtered.len(), universe.len() - excluded.len());
        }
    }
}
