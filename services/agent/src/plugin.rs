//! Plugin registration adapters.
//!
//! A host hands each plugin a [`Registry`] once at startup. The adapters
//! only describe navigation entries and views; all behaviour lives in the
//! lifecycle, policy and trace modules and is usable without a host.

use serde::Serialize;

/// Sidebar entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SidebarItem {
    /// Parent entry, e.g. `security` or `cluster`.
    pub parent: String,
    pub name: String,
    pub label: String,
    pub url: String,
}

/// Routed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub path: String,
    /// Sidebar entry highlighted while the route is active.
    pub sidebar: String,
    pub exact: bool,
    pub view: ViewKind,
}

/// Section added to a resource details page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailsSection {
    pub name: String,
    /// Resource kind the section is shown for.
    pub kind: String,
    pub title: String,
    pub view: ViewKind,
}

/// Action in a resource details header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderAction {
    pub name: String,
    pub kind: String,
    pub view: ViewKind,
}

/// What a registration renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    SeccompJob,
    SeccompPolicies,
    BiolatencyHistogram,
    TraceList,
    PodTraceLog,
}

/// Host capabilities offered to plugins.
pub trait Registry {
    fn register_sidebar_item(&mut self, item: SidebarItem);
    fn register_route(&mut self, route: Route);
    fn register_details_section(&mut self, section: DetailsSection);
    fn register_header_action(&mut self, action: HeaderAction);
}

pub trait Plugin {
    fn name(&self) -> &str;

    /// Register everything the plugin contributes. Returns true on success.
    fn initialize(&self, registry: &mut dyn Registry) -> bool;
}

fn sidebar(parent: &str, name: &str, label: &str, url: &str) -> SidebarItem {
    SidebarItem {
        parent: parent.to_string(),
        name: name.to_string(),
        label: label.to_string(),
        url: url.to_string(),
    }
}

fn route(path: &str, sidebar: &str, view: ViewKind) -> Route {
    Route {
        path: path.to_string(),
        sidebar: sidebar.to_string(),
        exact: true,
        view,
    }
}

/// Seccomp job and policy pages.
#[derive(Debug, Default)]
pub struct SeccompPlugin;

impl Plugin for SeccompPlugin {
    fn name(&self) -> &str {
        "seccomp"
    }

    fn initialize(&self, registry: &mut dyn Registry) -> bool {
        registry.register_sidebar_item(sidebar(
            "security",
            "seccomppolicies",
            "Seccomp Policies",
            "/seccomppolicies",
        ));
        registry.register_route(route(
            "/seccomppolicies",
            "seccomppolicies",
            ViewKind::SeccompJob,
        ));
        registry.register_route(route(
            "/seccomppolicies/:namespace",
            "seccomppolicies",
            ViewKind::SeccompPolicies,
        ));
        true
    }
}

/// Block I/O latency section on node pages.
#[derive(Debug, Default)]
pub struct BiolatencyPlugin;

impl Plugin for BiolatencyPlugin {
    fn name(&self) -> &str {
        "biolatency"
    }

    fn initialize(&self, registry: &mut dyn Registry) -> bool {
        registry.register_details_section(DetailsSection {
            name: "biolatency".to_string(),
            kind: "Node".to_string(),
            title: "Block I/O Latency".to_string(),
            view: ViewKind::BiolatencyHistogram,
        });
        true
    }
}

/// Traceloop trace list and per-pod trace action.
#[derive(Debug, Default)]
pub struct TracesPlugin;

impl Plugin for TracesPlugin {
    fn name(&self) -> &str {
        "inspektor-gadget"
    }

    fn initialize(&self, registry: &mut dyn Registry) -> bool {
        registry.register_sidebar_item(sidebar("cluster", "traces", "Traces", "/traces"));
        registry.register_route(route("/traces", "traces", ViewKind::TraceList));
        registry.register_header_action(HeaderAction {
            name: "traces".to_string(),
            kind: "Pod".to_string(),
            view: ViewKind::PodTraceLog,
        });
        true
    }
}

/// Every built-in plugin.
pub fn builtin_plugins() -> Vec<Box<dyn Plugin>> {
    vec![
        Box::new(SeccompPlugin),
        Box::new(BiolatencyPlugin),
        Box::new(TracesPlugin),
    ]
}

/// [`Registry`] that keeps every registration.
#[derive(Debug, Default, Serialize)]
pub struct RecordingRegistry {
    pub sidebar_items: Vec<SidebarItem>,
    pub routes: Vec<Route>,
    pub details_sections: Vec<DetailsSection>,
    pub header_actions: Vec<HeaderAction>,
}

impl RecordingRegistry {
    /// Initialize `plugins`, returning the names of those that failed.
    pub fn install(&mut self, plugins: &[Box<dyn Plugin>]) -> Vec<String> {
        plugins
            .iter()
            .filter(|p| !p.initialize(self))
            .map(|p| p.name().to_string())
            .collect()
    }
}

impl Registry for RecordingRegistry {
    fn register_sidebar_item(&mut self, item: SidebarItem) {
        self.sidebar_items.push(item);
    }

    fn register_route(&mut self, route: Route) {
        self.routes.push(route);
    }

    fn register_details_section(&mut self, section: DetailsSection) {
        self.details_sections.push(section);
    }

    fn register_header_action(&mut self, action: HeaderAction) {
        self.header_actions.push(action);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seccomp_registrations() {
        let mut registry = RecordingRegistry::default();
        assert!(SeccompPlugin.initialize(&mut registry));

        assert_eq!(registry.sidebar_items.len(), 1);
        assert_eq!(registry.sidebar_items[0].parent, "security");
        let paths: Vec<_> = registry.routes.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["/seccomppolicies", "/seccomppolicies/:namespace"]);
        assert!(registry.routes.iter().all(|r| r.sidebar == "seccomppolicies"));
    }

    #[test]
    fn test_install_builtin() {
        let mut registry = RecordingRegistry::default();
        let failed = registry.install(&builtin_plugins());
        assert!(failed.is_empty());

        assert_eq!(registry.sidebar_items.len(), 2);
        assert_eq!(registry.routes.len(), 3);
        assert_eq!(registry.details_sections[0].kind, "Node");
        assert_eq!(registry.header_actions[0].kind, "Pod");
    }
}
