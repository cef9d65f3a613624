//! In-memory workspace store.
//!
//! Holds every workspace by id plus a secondary index from [`WorkspaceKey`] to the id
//! of the key's single non-terminal workspace. Tombstones (DELETED and FAILED) stay
//! in the primary map but drop out of the index, so they never block a new creation.
//!
//! The registry only guarantees that each call is atomic. Serialising whole
//! lifecycle operations is the orchestrator's job.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::workspace::{Workspace, WorkspaceKey, WorkspaceStatus};

#[derive(Debug, Default)]
struct Maps {
    workspaces: HashMap<String, Workspace>,
    active: HashMap<WorkspaceKey, String>,
}

impl Maps {
    fn index(&mut self, workspace: &Workspace) {
        let key = workspace.key();
        if workspace.is_active() {
            self.active.insert(key, workspace.id.clone());
        } else if self.active.get(&key) == Some(&workspace.id) {
            self.active.remove(&key);
        }
    }
}

#[derive(Debug, Default)]
pub struct WorkspaceRegistry {
    maps: RwLock<Maps>,
}

impl WorkspaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Workspace> {
        self.maps.read().workspaces.get(id).cloned()
    }

    /// The non-terminal workspace for `key`, if any.
    pub fn get_by_owner_course(&self, key: &WorkspaceKey) -> Option<Workspace> {
        let maps = self.maps.read();
        maps.active
            .get(key)
            .and_then(|id| maps.workspaces.get(id))
            .cloned()
    }

    /// Insert `workspace` only if its key has no live workspace yet.
    ///
    /// Returns the stored workspace on success, or the live workspace that already
    /// holds the key.
    pub fn reserve(&self, workspace: Workspace) -> Result<Workspace, Workspace> {
        let mut maps = self.maps.write();
        let key = workspace.key();

        if let Some(existing) = maps.active.get(&key).and_then(|id| maps.workspaces.get(id)) {
            return Err(existing.clone());
        }

        maps.index(&workspace);
        maps.workspaces
            .insert(workspace.id.clone(), workspace.clone());
        Ok(workspace)
    }

    /// Insert or replace a workspace, keeping the key index in step.
    pub fn put(&self, workspace: Workspace) {
        let mut maps = self.maps.write();
        maps.index(&workspace);
        maps.workspaces.insert(workspace.id.clone(), workspace);
    }

    /// Apply `f` to the stored workspace under the write lock and return the result.
    pub fn update<F>(&self, id: &str, f: F) -> Option<Workspace>
    where
        F: FnOnce(&mut Workspace),
    {
        let mut maps = self.maps.write();
        let workspace = maps.workspaces.get_mut(id)?;
        f(workspace);
        let updated = workspace.clone();
        maps.index(&updated);
        Some(updated)
    }

    /// Record activity on a workspace.
    pub fn touch(&self, id: &str, now: DateTime<Utc>) -> Option<Workspace> {
        self.update(id, |workspace| workspace.touch(now))
    }

    pub fn delete(&self, id: &str) -> Option<Workspace> {
        let mut maps = self.maps.write();
        let removed = maps.workspaces.remove(id)?;
        let key = removed.key();
        if maps.active.get(&key) == Some(&removed.id) {
            maps.active.remove(&key);
        }
        Some(removed)
    }

    /// Every workspace, newest first.
    pub fn list(&self) -> Vec<Workspace> {
        self.collect(|_| true)
    }

    pub fn list_by_course(&self, course_id: &str) -> Vec<Workspace> {
        self.collect(|w| w.course_id == course_id)
    }

    pub fn list_by_status(&self, status: WorkspaceStatus) -> Vec<Workspace> {
        self.collect(|w| w.status == status)
    }

    pub fn len(&self) -> usize {
        self.maps.read().workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of non-terminal workspaces.
    pub fn active_count(&self) -> usize {
        self.maps.read().active.len()
    }

    /// Container references currently owned by a live workspace.
    pub fn container_refs(&self) -> Vec<String> {
        self.maps
            .read()
            .workspaces
            .values()
            .filter_map(|w| w.container_ref.clone())
            .collect()
    }

    fn collect(&self, filter: impl Fn(&Workspace) -> bool) -> Vec<Workspace> {
        let mut workspaces: Vec<Workspace> = self
            .maps
            .read()
            .workspaces
            .values()
            .filter(|w| filter(w))
            .cloned()
            .collect();
        workspaces.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        workspaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use lab_driver::ResourceProfile;

    fn workspace(owner: &str, course: &str) -> Workspace {
        Workspace::new(
            &WorkspaceKey::new(owner, course),
            ResourceProfile::default(),
            Utc::now(),
        )
    }

    #[test]
    fn reserve_allows_one_live_workspace_per_key() {
        let registry = WorkspaceRegistry::new();
        let first = registry.reserve(workspace("s1", "c1")).unwrap();

        let existing = registry.reserve(workspace("s1", "c1")).unwrap_err();
        assert_eq!(existing.id, first.id);
        assert!(registry.reserve(workspace("s2", "c1")).is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn tombstones_release_the_key() {
        let registry = WorkspaceRegistry::new();
        let first = registry.reserve(workspace("s1", "c1")).unwrap();
        registry.update(&first.id, |w| w.mark_failed("boom", Utc::now()));

        assert!(registry.get_by_owner_course(&first.key()).is_none());
        let second = registry.reserve(workspace("s1", "c1")).unwrap();
        assert_ne!(second.id, first.id);
        assert_eq!(registry.get(&first.id).unwrap().status, WorkspaceStatus::Failed);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn updating_a_tombstone_keeps_the_new_live_workspace_indexed() {
        let registry = WorkspaceRegistry::new();
        let old = registry.reserve(workspace("s1", "c1")).unwrap();
        registry.update(&old.id, |w| w.mark_deleted(Utc::now()));
        let live = registry.reserve(workspace("s1", "c1")).unwrap();

        registry.touch(&old.id, Utc::now());

        assert_eq!(registry.get_by_owner_course(&live.key()).unwrap().id, live.id);
    }

    #[test]
    fn update_missing_workspace_is_none() {
        let registry = WorkspaceRegistry::new();
        assert!(registry.update("missing", |w| w.touch(Utc::now())).is_none());
    }

    #[test]
    fn lists_are_filtered_and_newest_first() {
        let registry = WorkspaceRegistry::new();
        let mut older = workspace("s1", "c1");
        older.created_at -= TimeDelta::minutes(5);
        registry.put(older.clone());
        let newer = registry.reserve(workspace("s2", "c1")).unwrap();
        registry.reserve(workspace("s1", "c2")).unwrap();

        let course = registry.list_by_course("c1");
        assert_eq!(
            course.iter().map(|w| w.id.as_str()).collect::<Vec<_>>(),
            vec![newer.id.as_str(), older.id.as_str()]
        );
        assert_eq!(registry.list_by_status(WorkspaceStatus::Creating).len(), 3);
        assert_eq!(registry.list().len(), 3);
    }

    #[test]
    fn delete_drops_workspace_and_index() {
        let registry = WorkspaceRegistry::new();
        let ws = registry.reserve(workspace("s1", "c1")).unwrap();

        assert!(registry.delete(&ws.id).is_some());
        assert!(registry.get(&ws.id).is_none());
        assert!(registry.get_by_owner_course(&ws.key()).is_none());
        assert!(registry.is_empty());
    }
}
