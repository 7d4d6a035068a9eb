//! Route path composition and the path → verbs index used for conflict
//! detection.

use indexmap::{IndexMap, IndexSet};

use crate::error::{BuildError, BuildResult};
use crate::method::Method;

/// Joins a class path and an optional method path into a route path.
///
/// ```
/// use tsu_services::compose_path;
///
/// assert_eq!(compose_path(Some(" people/ "), Some(":id")), "/people/:id");
/// assert_eq!(compose_path(None, Some("/health")), "/health");
/// assert_eq!(compose_path(Some("/"), None), "");
/// ```
pub fn compose_path(class_path: Option<&str>, method_path: Option<&str>) -> String {
    let class_path = class_path.map(str::trim).unwrap_or_default();
    let mut path = if class_path.starts_with('/') {
        class_path.to_owned()
    } else {
        format!("/{class_path}")
    };
    if path.ends_with('/') {
        path.pop();
    }
    if let Some(fragment) = method_path {
        let fragment = fragment.trim();
        if !fragment.starts_with('/') {
            path.push('/');
        }
        path.push_str(fragment);
    }
    path
}

/// Every resolved path with the verbs declared on it, both in declaration order.
#[derive(Clone, Debug, Default)]
pub struct PathIndex {
    paths: IndexMap<String, IndexSet<Method>>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `method` on `path`, failing if the pair is already taken.
    pub fn insert(&mut self, path: &str, method: Method) -> BuildResult<()> {
        let verbs = self.paths.entry(path.to_owned()).or_default();
        if !verbs.insert(method) {
            return Err(BuildError::DuplicateRoute { path: path.to_owned(), method: method.to_string() });
        }
        Ok(())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.keys().map(String::as_str)
    }

    /// Declared verbs on `path`; empty for unknown paths.
    pub fn methods(&self, path: &str) -> Vec<Method> {
        self.paths.get(path).map(|m| m.iter().copied().collect()).unwrap_or_default()
    }

    pub fn contains(&self, path: &str, method: Method) -> bool {
        self.paths.get(path).is_some_and(|m| m.contains(&method))
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn len(&self) -> usize { self.paths.len() }
    pub fn is_empty(&self) -> bool { self.paths.is_empty() }
}
