//! The class/method registry and path resolution.
//!
//! Registration only records declarations and marks the registry dirty.
//! Resolution ([`Registry::refresh`]) is deferred until something needs final
//! paths, then recomputes all of them at once so the outcome depends only on
//! what is registered, never on the order reads and writes were interleaved.

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{BuildError, BuildResult};
use crate::metadata::{ClassMetadata, MethodMetadata, ServiceType};
use crate::paths::{PathIndex, compose_path};

/// Every registered service type, in registration order.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    classes: IndexMap<ServiceType, ClassMetadata>,
    paths: PathIndex,
    dirty: bool,
}

impl Registry {
    /// Returns the metadata for `target`, creating it on first reference.
    ///
    /// On creation, a registered `parent` contributes deep copies of its methods
    /// and properties and the union of its negotiation sets. The copies are
    /// independent from then on: changes on either side do not propagate.
    pub(crate) fn register_class(&mut self, target: ServiceType, parent: Option<ServiceType>) -> &mut ClassMetadata {
        self.dirty = true;
        if !self.classes.contains_key(&target) {
            let mut class = ClassMetadata::new(target, parent);
            if let Some(parent) = parent.and_then(|p| self.classes.get(&p)) {
                inherit(&mut class, parent);
            } else if let Some(parent) = parent {
                debug!(service = target.name(), parent = parent.name(), "parent not registered, nothing inherited");
            }
            debug!(service = target.name(), "service registered");
            self.classes.insert(target, class);
        }
        let class = &mut self.classes[&target];
        if target.is_constructible() && !class.target.is_constructible() {
            debug!(service = target.name(), "constructor recorded");
            class.target = target;
        }
        class
    }

    /// Returns the metadata for method `name` of `target`, creating both on first
    /// reference. An empty name addresses no method.
    pub(crate) fn register_method(
        &mut self,
        target: ServiceType,
        parent: Option<ServiceType>,
        name: &str,
    ) -> Option<&mut MethodMetadata> {
        if name.is_empty() {
            return None;
        }
        let class = self.register_class(target, parent);
        Some(class.methods.entry(name.to_owned()).or_insert_with(|| MethodMetadata::new(name)))
    }

    pub(crate) fn class(&self, target: &ServiceType) -> Option<&ClassMetadata> {
        self.classes.get(target)
    }

    pub(crate) fn classes(&self) -> impl Iterator<Item = &ClassMetadata> {
        self.classes.values()
    }

    pub(crate) fn paths(&self) -> &PathIndex { &self.paths }
    pub(crate) fn is_dirty(&self) -> bool { self.dirty }

    /// Recomputes every resolved path, language and media-type set, and the path
    /// index. A no-op when nothing was registered since the last refresh.
    ///
    /// Abstract types are skipped: they are never routed, so their paths cannot
    /// conflict with anything.
    pub(crate) fn refresh(&mut self) -> BuildResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.paths.clear();
        let targets: IndexMap<ServiceType, ServiceType> =
            self.classes.iter().map(|(key, class)| (*key, class.target)).collect();
        for class in self.classes.values_mut() {
            for method in class.methods.values_mut() {
                method.clear_resolved();
                // an owner first seen without a constructor may have gained one since
                method.owner = method.owner.map(|owner| targets.get(&owner).copied().unwrap_or(owner));
            }
        }
        for class in self.classes.values_mut().filter(|c| !c.is_abstract) {
            let (class_path, languages, accepts) = (class.path.clone(), class.languages.clone(), class.accepts.clone());
            for method in class.methods.values_mut() {
                method.resolved_languages = languages.union(&method.languages).cloned().collect();
                method.resolved_accepts = accepts.union(&method.accepts).cloned().collect();
                let path = compose_path(class_path.as_deref(), method.path.as_deref());
                if let Some(verb) = method.http_method {
                    self.paths.insert(&path, verb)?;
                }
                debug!(service = class.target.name(), method = %method.name, path = %path, "path resolved");
                method.resolved_path = Some(path);
            }
        }
        self.dirty = false;
        Ok(())
    }
}

fn inherit(class: &mut ClassMetadata, parent: &ClassMetadata) {
    for (name, method) in &parent.methods {
        let mut copy = method.clone();
        copy.clear_resolved();
        class.methods.insert(name.clone(), copy);
    }
    for (key, value) in &parent.properties {
        class.properties.insert(key.clone(), value.clone());
    }
    class.languages.extend(parent.languages.iter().cloned());
    class.accepts.extend(parent.accepts.iter().cloned());
}

/// Wraps a registration failure with the service it was declared on.
pub(crate) fn in_service(target: ServiceType, error: BuildError) -> BuildError {
    match error {
        BuildError::InvalidDeclaration { annotation, reason } => BuildError::InvalidDeclaration {
            annotation,
            reason: format!("{reason} (on `{}`)", target.name()),
        },
        other => other,
    }
}
