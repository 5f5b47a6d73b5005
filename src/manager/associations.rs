//! Project to application associations.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::directory::Application;

/// Identifier of an IDE project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// At most one application per project, held for the manager's lifetime.
#[derive(Debug, Default)]
pub struct ProjectAssociations {
    entries: RwLock<HashMap<ProjectId, Application>>,
}

impl ProjectAssociations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `application` with `project`, replacing any previous one.
    pub fn set(&self, project: ProjectId, application: Application) {
        self.write().insert(project, application);
    }

    pub fn get(&self, project: &ProjectId) -> Option<Application> {
        self.read().get(project).cloned()
    }

    pub fn remove(&self, project: &ProjectId) -> Option<Application> {
        self.write().remove(project)
    }

    /// Drop every association.
    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ProjectId, Application>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ProjectId, Application>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_application(name: &str) -> Application {
        Application {
            object_id: Some(format!("{}-object", name)),
            app_id: Some(format!("{}-app", name)),
            ..Application::new(name)
        }
    }

    #[test]
    fn test_empty() {
        let associations = ProjectAssociations::new();
        assert!(associations.get(&"project".into()).is_none());
        assert!(associations.is_empty());
    }

    #[test]
    fn test_set_get_overwrite() {
        let associations = ProjectAssociations::new();
        let project = ProjectId::new("project");

        associations.set(project.clone(), make_test_application("first"));
        associations.set(project.clone(), make_test_application("second"));

        assert_eq!(associations.len(), 1);
        assert_eq!(
            associations.get(&project).map(|a| a.display_name),
            Some("second".to_string())
        );
    }

    #[test]
    fn test_remove_and_clear() {
        let associations = ProjectAssociations::new();
        associations.set("a".into(), make_test_application("a"));
        associations.set("b".into(), make_test_application("b"));

        assert!(associations.remove(&"a".into()).is_some());
        assert!(associations.remove(&"a".into()).is_none());

        associations.clear();
        assert!(associations.get(&"b".into()).is_none());
        assert!(associations.is_empty());
    }
}
