//! In-memory store with optional JSON file persistence.

use super::Store;
use crate::error::StoreError;
use crate::models::{Entity, EntityType, Finding, Pattern, Project};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Everything the store holds; this is also the on-disk format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workspace {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
}

/// A [`Store`] keeping all records in memory behind one lock.
///
/// Records are append-only vectors, so listing order is insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<Workspace>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_workspace(workspace: Workspace) -> Self {
        Self {
            state: RwLock::new(workspace),
        }
    }

    /// Load a workspace file. A missing file gives an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            debug!("No workspace at {}, starting empty", path.display());
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        let workspace: Workspace = serde_json::from_str(&content)?;
        info!(
            "Loaded workspace {} ({} projects, {} entities, {} findings)",
            path.display(),
            workspace.projects.len(),
            workspace.entities.len(),
            workspace.findings.len()
        );
        Ok(Self::from_workspace(workspace))
    }

    /// Write the workspace to a file.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&*self.read()?)?;
        std::fs::write(path, content)?;
        debug!("Saved workspace to {}", path.display());
        Ok(())
    }

    pub fn add_project(&self, name: impl Into<String>) -> Result<Project, StoreError> {
        let project = Project {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            archived: false,
            created_at: Utc::now(),
        };
        self.write()?.projects.push(project.clone());
        Ok(project)
    }

    pub fn add_entity(
        &self,
        project_id: Uuid,
        entity_type: EntityType,
        value: impl Into<String>,
    ) -> Result<Entity, StoreError> {
        let mut state = self.write()?;
        if !state.projects.iter().any(|p| p.id == project_id) {
            return Err(StoreError::ProjectNotFound(project_id));
        }

        let entity = Entity::new(project_id, entity_type, value);
        state.entities.push(entity.clone());
        Ok(entity)
    }

    /// Soft-delete an entity. Its findings stay but drop out of listings.
    pub fn archive_entity(&self, entity_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let entity = state
            .entities
            .iter_mut()
            .find(|e| e.id == entity_id)
            .ok_or(StoreError::EntityNotFound(entity_id))?;
        entity.archived_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Workspace>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Workspace>, StoreError> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Workspace {
    fn live_entity_ids(&self, project_id: Uuid) -> Vec<Uuid> {
        self.entities
            .iter()
            .filter(|e| e.project_id == project_id && !e.is_archived())
            .map(|e| e.id)
            .collect()
    }

    fn ensure_project(&self, project_id: Uuid) -> Result<(), StoreError> {
        if self.projects.iter().any(|p| p.id == project_id) {
            Ok(())
        } else {
            Err(StoreError::ProjectNotFound(project_id))
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_project(&self, project_id: Uuid) -> Result<Project, StoreError> {
        self.read()?
            .projects
            .iter()
            .find(|p| p.id == project_id)
            .cloned()
            .ok_or(StoreError::ProjectNotFound(project_id))
    }

    async fn get_entity(&self, entity_id: Uuid) -> Result<Entity, StoreError> {
        self.read()?
            .entities
            .iter()
            .find(|e| e.id == entity_id)
            .cloned()
            .ok_or(StoreError::EntityNotFound(entity_id))
    }

    async fn list_entities(
        &self,
        project_id: Uuid,
        exclude_archived: bool,
    ) -> Result<Vec<Entity>, StoreError> {
        let state = self.read()?;
        state.ensure_project(project_id)?;

        Ok(state
            .entities
            .iter()
            .filter(|e| e.project_id == project_id)
            .filter(|e| !(exclude_archived && e.is_archived()))
            .cloned()
            .collect())
    }

    async fn create_finding(&self, finding: Finding) -> Result<Uuid, StoreError> {
        let mut state = self.write()?;

        let entity = state
            .entities
            .iter()
            .find(|e| e.id == finding.entity_id)
            .ok_or(StoreError::EntityNotFound(finding.entity_id))?;
        if entity.is_archived() {
            return Err(StoreError::EntityArchived(finding.entity_id));
        }

        let id = finding.id;
        state.findings.push(finding);
        Ok(id)
    }

    async fn list_findings(&self, project_id: Uuid) -> Result<Vec<Finding>, StoreError> {
        let state = self.read()?;
        state.ensure_project(project_id)?;

        let entity_ids = state.live_entity_ids(project_id);
        Ok(state
            .findings
            .iter()
            .filter(|f| entity_ids.contains(&f.entity_id))
            .cloned()
            .collect())
    }

    async fn append_patterns(&self, patterns: Vec<Pattern>) -> Result<Vec<Uuid>, StoreError> {
        let mut state = self.write()?;
        for pattern in &patterns {
            state.ensure_project(pattern.project_id)?;
        }

        let ids = patterns.iter().map(|p| p.id).collect();
        state.patterns.extend(patterns);
        Ok(ids)
    }

    async fn replace_patterns(
        &self,
        project_id: Uuid,
        patterns: Vec<Pattern>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut state = self.write()?;
        state.ensure_project(project_id)?;

        state.patterns.retain(|p| p.project_id != project_id);
        let ids = patterns.iter().map(|p| p.id).collect();
        state.patterns.extend(patterns);
        Ok(ids)
    }

    async fn list_patterns(&self, project_id: Uuid) -> Result<Vec<Pattern>, StoreError> {
        let state = self.read()?;
        state.ensure_project(project_id)?;

        Ok(state
            .patterns
            .iter()
            .filter(|p| p.project_id == project_id)
            .cloned()
            .collect())
    }
}
