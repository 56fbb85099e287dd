//! Attribute descriptors and inherited, memoized attribute resolution.
//!
//! Attributes are declared once per workspace. Each project keeps a slot map
//! holding values that were set explicitly or resolved once. Resolving an
//! inherited attribute that has no slot falls back to the parent's value, and
//! at a root to the descriptor's default. The resolved value is cached on the
//! node, so later changes to an ancestor do not reach a node that already
//! resolved.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use cairn_types::{Result, Value};

use crate::lock;
use crate::project::Project;

/// Computes a default value for the project being resolved.
pub type AttributeFactory = Arc<dyn Fn(&Project) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
pub enum AttributeDefault {
    Value(Value),
    Factory(AttributeFactory),
}

impl AttributeDefault {
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn(&Project) -> Result<Value> + Send + Sync + 'static,
    {
        AttributeDefault::Factory(Arc::new(f))
    }
}

impl From<Value> for AttributeDefault {
    fn from(value: Value) -> Self {
        AttributeDefault::Value(value)
    }
}

impl std::fmt::Debug for AttributeDefault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeDefault::Value(v) => f.debug_tuple("Value").field(v).finish(),
            AttributeDefault::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttributeDescriptor {
    name: String,
    inherited: bool,
    default: AttributeDefault,
}

impl AttributeDescriptor {
    /// An attribute whose unset value comes from the nearest ancestor.
    pub fn inherited(name: impl Into<String>, default: impl Into<AttributeDefault>) -> Self {
        Self {
            name: name.into(),
            inherited: true,
            default: default.into(),
        }
    }

    /// An attribute whose unset value is always the default.
    pub fn local(name: impl Into<String>, default: impl Into<AttributeDefault>) -> Self {
        Self {
            name: name.into(),
            inherited: false,
            default: default.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_inherited(&self) -> bool {
        self.inherited
    }

    fn default_for(&self, project: &Project) -> Result<Value> {
        match &self.default {
            AttributeDefault::Value(v) => Ok(v.clone()),
            AttributeDefault::Factory(f) => f(project),
        }
    }
}

// ---------------------------------------------------------------------------
// AttributeRegistry — workspace-wide descriptors
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct AttributeRegistry {
    descriptors: Mutex<HashMap<String, Arc<AttributeDescriptor>>>,
}

impl AttributeRegistry {
    pub(crate) fn declare(&self, descriptor: AttributeDescriptor) {
        let name = descriptor.name.clone();
        if lock(&self.descriptors)
            .insert(name.clone(), Arc::new(descriptor))
            .is_some()
        {
            tracing::debug!(attribute = %name, "Attribute redeclared");
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<AttributeDescriptor>> {
        lock(&self.descriptors).get(name).cloned()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.descriptors).keys().cloned().collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// AttributeSlots — per-project values
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct AttributeSlots {
    values: Mutex<HashMap<String, Value>>,
}

impl AttributeSlots {
    pub(crate) fn cached(&self, name: &str) -> Option<Value> {
        lock(&self.values).get(name).cloned()
    }

    pub(crate) fn store(&self, name: &str, value: Value) {
        lock(&self.values).insert(name.to_string(), value);
    }

    /// Cache `value` unless a value landed in the slot meanwhile (a factory
    /// may set the attribute while computing it). Returns the slot's value.
    fn fill_once(&self, name: &str, value: Value) -> Value {
        lock(&self.values)
            .entry(name.to_string())
            .or_insert(value)
            .clone()
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<String, Value> {
        lock(&self.values)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Resolve `descriptor` on `project`: local slot, then parent, then default.
pub(crate) fn resolve(project: &Project, descriptor: &AttributeDescriptor) -> Result<Value> {
    if let Some(value) = project.slots().cached(&descriptor.name) {
        return Ok(value);
    }
    let value = match project.parent()? {
        Some(parent) if descriptor.inherited => parent.attribute(&descriptor.name)?,
        _ => descriptor.default_for(project)?,
    };
    tracing::trace!(project = %project.name(), attribute = %descriptor.name, "Attribute resolved");
    Ok(project.slots().fill_once(&descriptor.name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Workspace;
    use cairn_types::CairnError;
    use serde_json::json;

    #[test]
    fn root_uses_default_value() {
        let ws = Workspace::default();
        ws.declare_inherited_attribute("version", json!("0.1.0"));
        let app = ws.define("app", |_| Ok(())).unwrap();
        assert_eq!(app.attribute("version").unwrap(), json!("0.1.0"));
    }

    #[test]
    fn child_inherits_from_parent() {
        let ws = Workspace::default();
        ws.declare_inherited_attribute("group", Value::Null);
        ws.define("app", |app| {
            app.set_attribute("group", json!("org.example"))?;
            app.define("web", |_| Ok(()))?;
            Ok(())
        })
        .unwrap();
        let web = ws.project("app:web").unwrap();
        assert_eq!(web.attribute("group").unwrap(), json!("org.example"));
    }

    #[test]
    fn local_attribute_does_not_inherit() {
        let ws = Workspace::default();
        ws.declare_attribute("description", json!("none"));
        ws.define("app", |app| {
            app.set_attribute("description", json!("the app"))?;
            app.define("web", |_| Ok(()))?;
            Ok(())
        })
        .unwrap();
        let web = ws.project("app:web").unwrap();
        assert_eq!(web.attribute("description").unwrap(), json!("none"));
    }

    #[test]
    fn factory_receives_resolving_project() {
        let ws = Workspace::default();
        ws.declare_inherited_attribute_with("id", |project: &Project| {
            Ok(json!(format!("id-{}", project.name())))
        });
        let app = ws.define("app", |_| Ok(())).unwrap();
        assert_eq!(app.attribute("id").unwrap(), json!("id-app"));
    }

    #[test]
    fn factory_runs_once_per_root() {
        let calls = Arc::new(Mutex::new(0));
        let ws = Workspace::default();
        let counter = calls.clone();
        ws.declare_inherited_attribute_with("stamp", move |_: &Project| {
            *counter.lock().unwrap() += 1;
            Ok(json!("t"))
        });
        let app = ws.define("app", |_| Ok(())).unwrap();
        app.attribute("stamp").unwrap();
        app.attribute("stamp").unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn unknown_attribute_is_an_error() {
        let ws = Workspace::default();
        let app = ws.define("app", |_| Ok(())).unwrap();
        let err = app.attribute("colour").unwrap_err();
        assert!(matches!(err, CairnError::UnknownAttribute { .. }));
        let err = app.set_attribute("colour", json!("red")).unwrap_err();
        assert!(matches!(err, CairnError::UnknownAttribute { .. }));
    }

    #[test]
    fn redeclaring_replaces_descriptor() {
        let registry = AttributeRegistry::default();
        registry.declare(AttributeDescriptor::inherited("version", json!("1")));
        registry.declare(AttributeDescriptor::local("version", json!("2")));
        let descriptor = registry.get("version").unwrap();
        assert!(!descriptor.is_inherited());
        assert_eq!(registry.names(), vec!["version".to_string()]);
    }
}
