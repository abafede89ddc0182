// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Aggregated tool map across all connected servers.
//!
//! Registrations are kept in the order they happened and the visible map is
//! rebuilt from them, so a name collision always resolves to the most recent
//! registration and unregistering a server brings back whatever it shadowed.

use std::collections::BTreeMap;

use super::config::NamespacePolicy;
use super::types::ToolDescriptor;

/// One visible name claimed by two servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCollision {
    pub name: String,
    pub shadowed: String,
    pub winner: String,
}

/// Name → owner mapping used to route tool calls.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    namespace: NamespacePolicy,
    registrations: Vec<(String, Vec<ToolDescriptor>)>,
    visible: BTreeMap<String, ToolDescriptor>,
    collisions: Vec<ToolCollision>,
}

impl ToolRegistry {
    pub fn new(namespace: NamespacePolicy) -> Self {
        Self {
            namespace,
            ..Self::default()
        }
    }

    /// Register (or replace) the tools of `server`; it becomes the most
    /// recent registration.
    pub fn register(&mut self, server: &str, tools: Vec<ToolDescriptor>) {
        self.registrations.retain(|(name, _)| name != server);
        self.registrations.push((server.to_string(), tools));
        self.rebuild();
    }

    /// Drop every tool owned by `server`.
    pub fn unregister(&mut self, server: &str) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|(name, _)| name != server);
        let removed = self.registrations.len() != before;
        if removed {
            self.rebuild();
        }
        removed
    }

    /// Look up a visible tool name.
    pub fn resolve(&self, name: &str) -> Option<&ToolDescriptor> {
        self.visible.get(name)
    }

    /// All visible tools, sorted by name.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.visible.values().cloned().collect()
    }

    /// Visible tools owned by `server`.
    pub fn tools_for(&self, server: &str) -> Vec<ToolDescriptor> {
        self.visible
            .values()
            .filter(|t| t.owner_server_name == server)
            .cloned()
            .collect()
    }

    /// Collisions found by the last rebuild.
    pub fn collisions(&self) -> &[ToolCollision] {
        &self.collisions
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    fn rebuild(&mut self) {
        self.visible.clear();
        self.collisions.clear();

        for (server, tools) in &self.registrations {
            for tool in tools {
                let name = self.namespace.visible_name(server, &tool.remote_name);
                let mut entry = tool.clone();
                entry.name = name.clone();
                entry.owner_server_name = server.clone();

                if let Some(previous) = self.visible.insert(name.clone(), entry) {
                    tracing::warn!(
                        tool = %name,
                        shadowed = %previous.owner_server_name,
                        winner = %server,
                        "Tool name collision; later registration wins"
                    );
                    self.collisions.push(ToolCollision {
                        name,
                        shadowed: previous.owner_server_name,
                        winner: server.clone(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(server: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor::from_listing(server, &json!({ "name": name })).unwrap()
    }

    #[test]
    fn test_namespaced_names_do_not_collide() {
        let mut registry = ToolRegistry::new(NamespacePolicy::default());
        registry.register("a", vec![tool("a", "search")]);
        registry.register("b", vec![tool("b", "search")]);

        assert_eq!(registry.len(), 2);
        assert!(registry.collisions().is_empty());
        let resolved = registry.resolve("b__search").unwrap();
        assert_eq!(resolved.owner_server_name, "b");
        assert_eq!(resolved.remote_name, "search");
    }

    #[test]
    fn test_flat_collision_last_registration_wins() {
        for _ in 0..3 {
            let mut registry = ToolRegistry::new(NamespacePolicy::disabled());
            registry.register("a", vec![tool("a", "search"), tool("a", "read")]);
            registry.register("b", vec![tool("b", "search")]);

            assert_eq!(registry.len(), 2);
            assert_eq!(registry.resolve("search").unwrap().owner_server_name, "b");
            assert_eq!(
                registry.collisions(),
                &[ToolCollision {
                    name: "search".to_string(),
                    shadowed: "a".to_string(),
                    winner: "b".to_string(),
                }]
            );
        }
    }

    #[test]
    fn test_reregistration_moves_to_end() {
        let mut registry = ToolRegistry::new(NamespacePolicy::disabled());
        registry.register("a", vec![tool("a", "search")]);
        registry.register("b", vec![tool("b", "search")]);
        // "a" reconnects and re-publishes its tools.
        registry.register("a", vec![tool("a", "search")]);
        assert_eq!(registry.resolve("search").unwrap().owner_server_name, "a");
    }

    #[test]
    fn test_unregister_restores_shadowed_tool() {
        let mut registry = ToolRegistry::new(NamespacePolicy::disabled());
        registry.register("a", vec![tool("a", "search")]);
        registry.register("b", vec![tool("b", "search")]);

        assert!(registry.unregister("b"));
        assert_eq!(registry.resolve("search").unwrap().owner_server_name, "a");
        assert!(registry.collisions().is_empty());
        assert!(!registry.unregister("b"));

        registry.unregister("a");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_tools_for_server() {
        let mut registry = ToolRegistry::new(NamespacePolicy::default());
        registry.register("a", vec![tool("a", "x"), tool("a", "y")]);
        registry.register("b", vec![tool("b", "z")]);
        let names: Vec<String> = registry.tools_for("a").into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["a__x", "a__y"]);
    }
}
