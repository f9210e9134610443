//! Component routing table.
//!
//! Maps `(kind, name)` to the sessions providing it. Provider order is
//! deterministic: routing weight descending, ties broken by registration
//! order ascending. Entries exist only while the owning session is ready;
//! unregistering a session purges everything it provided.

use std::collections::HashMap;

use parking_lot::RwLock;

/// The component families a session can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Tool,
    Prompt,
    Resource,
}

#[derive(Debug, Clone)]
struct ProviderEntry {
    session_id: String,
    weight: f64,
    order: u64,
}

#[derive(Default)]
struct RouterInner {
    /// Registered sessions with their weight and registration order.
    sessions: HashMap<String, (f64, u64)>,
    components: HashMap<(ComponentKind, String), Vec<ProviderEntry>>,
    next_order: u64,
}

/// Index of components by name, resolving to ordered provider lists.
#[derive(Default)]
pub struct MessageRouter {
    inner: RwLock<RouterInner>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Assigns its registration order for tie-breaks.
    pub fn register_session(&self, session_id: &str, weight: f64) {
        let mut inner = self.inner.write();
        let order = inner.next_order;
        inner.next_order += 1;
        inner.sessions.insert(session_id.to_owned(), (weight, order));
    }

    /// Remove a session and every component entry it provided.
    pub fn unregister_session(&self, session_id: &str) {
        let mut inner = self.inner.write();
        inner.sessions.remove(session_id);
        inner.components.retain(|_, entries| {
            entries.retain(|e| e.session_id != session_id);
            !entries.is_empty()
        });
    }

    /// Register one component for a session. Idempotent for the same
    /// session; unknown sessions are ignored with a warning.
    pub fn register_component(&self, kind: ComponentKind, name: &str, session_id: &str) {
        let mut inner = self.inner.write();
        let Some(&(weight, order)) = inner.sessions.get(session_id) else {
            tracing::warn!(
                session_id,
                component = name,
                "component registration for unknown session, ignoring"
            );
            return;
        };
        let entries = inner
            .components
            .entry((kind, name.to_owned()))
            .or_default();
        if entries.iter().any(|e| e.session_id == session_id) {
            return;
        }
        entries.push(ProviderEntry {
            session_id: session_id.to_owned(),
            weight,
            order,
        });
        entries.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.order.cmp(&b.order))
        });
    }

    /// Remove one component entry for a session.
    pub fn unregister_component(&self, kind: ComponentKind, name: &str, session_id: &str) {
        let mut inner = self.inner.write();
        if let Some(entries) = inner.components.get_mut(&(kind, name.to_owned())) {
            entries.retain(|e| e.session_id != session_id);
            if entries.is_empty() {
                inner.components.remove(&(kind, name.to_owned()));
            }
        }
    }

    /// Sessions providing a component, best first.
    pub fn providers_of(&self, kind: ComponentKind, name: &str) -> Vec<String> {
        self.inner
            .read()
            .components
            .get(&(kind, name.to_owned()))
            .map(|entries| entries.iter().map(|e| e.session_id.clone()).collect())
            .unwrap_or_default()
    }

    /// All registered component names of a kind, sorted.
    pub fn component_names(&self, kind: ComponentKind) -> Vec<String> {
        let inner = self.inner.read();
        let mut names: Vec<String> = inner
            .components
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_ordered_by_weight_then_registration() {
        let router = MessageRouter::new();
        router.register_session("a", 1.0);
        router.register_session("b", 2.0);
        router.register_session("c", 1.0);
        router.register_component(ComponentKind::Tool, "echo", "a");
        router.register_component(ComponentKind::Tool, "echo", "b");
        router.register_component(ComponentKind::Tool, "echo", "c");

        // b wins on weight; a precedes c on registration order.
        assert_eq!(
            router.providers_of(ComponentKind::Tool, "echo"),
            vec!["b".to_string(), "a".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn ordering_is_stable_across_calls() {
        let router = MessageRouter::new();
        router.register_session("a", 1.0);
        router.register_session("b", 1.0);
        router.register_component(ComponentKind::Tool, "echo", "b");
        router.register_component(ComponentKind::Tool, "echo", "a");

        let first = router.providers_of(ComponentKind::Tool, "echo");
        for _ in 0..10 {
            assert_eq!(router.providers_of(ComponentKind::Tool, "echo"), first);
        }
        // Registration order of the *sessions*, not of the components.
        assert_eq!(first, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn duplicate_registration_is_idempotent() {
        let router = MessageRouter::new();
        router.register_session("a", 1.0);
        router.register_component(ComponentKind::Tool, "echo", "a");
        router.register_component(ComponentKind::Tool, "echo", "a");
        assert_eq!(router.providers_of(ComponentKind::Tool, "echo").len(), 1);
    }

    #[test]
    fn unregister_session_cascades() {
        let router = MessageRouter::new();
        router.register_session("a", 1.0);
        router.register_session("b", 1.0);
        router.register_component(ComponentKind::Tool, "echo", "a");
        router.register_component(ComponentKind::Tool, "echo", "b");
        router.register_component(ComponentKind::Prompt, "summarize", "a");

        router.unregister_session("a");
        assert_eq!(
            router.providers_of(ComponentKind::Tool, "echo"),
            vec!["b".to_string()]
        );
        assert!(router.providers_of(ComponentKind::Prompt, "summarize").is_empty());
    }

    #[test]
    fn unknown_session_component_is_ignored() {
        let router = MessageRouter::new();
        router.register_component(ComponentKind::Tool, "echo", "ghost");
        assert!(router.providers_of(ComponentKind::Tool, "echo").is_empty());
    }

    #[test]
    fn unregister_component_removes_single_entry() {
        let router = MessageRouter::new();
        router.register_session("a", 1.0);
        router.register_session("b", 1.0);
        router.register_component(ComponentKind::Tool, "echo", "a");
        router.register_component(ComponentKind::Tool, "echo", "b");
        router.unregister_component(ComponentKind::Tool, "echo", "a");
        assert_eq!(
            router.providers_of(ComponentKind::Tool, "echo"),
            vec!["b".to_string()]
        );
    }

    #[test]
    fn component_names_sorted_per_kind() {
        let router = MessageRouter::new();
        router.register_session("a", 1.0);
        router.register_component(ComponentKind::Tool, "zeta", "a");
        router.register_component(ComponentKind::Tool, "alpha", "a");
        router.register_component(ComponentKind::Prompt, "other", "a");
        assert_eq!(
            router.component_names(ComponentKind::Tool),
            vec!["alpha".to_string(), "zeta".to_string()]
        );
    }
}
