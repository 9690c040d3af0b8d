//! Persistence collaborator.
//!
//! The orchestrator, aggregator and analyzer only talk to storage through
//! the [`Store`] trait. [`MemoryStore`] is the bundled implementation,
//! optionally backed by a JSON workspace file.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::models::{Entity, Finding, Pattern, Project};
use async_trait::async_trait;
use uuid::Uuid;

/// Storage operations the core depends on.
///
/// Implementations must tolerate concurrent appends to the same project
/// without losing or corrupting any record.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_project(&self, project_id: Uuid) -> Result<Project, StoreError>;

    async fn get_entity(&self, entity_id: Uuid) -> Result<Entity, StoreError>;

    /// Entities of a project in creation order.
    async fn list_entities(
        &self,
        project_id: Uuid,
        exclude_archived: bool,
    ) -> Result<Vec<Entity>, StoreError>;

    /// Append a finding. The referenced entity must exist and be live.
    async fn create_finding(&self, finding: Finding) -> Result<Uuid, StoreError>;

    /// All findings of a project's entities, in insertion order.
    async fn list_findings(&self, project_id: Uuid) -> Result<Vec<Finding>, StoreError>;

    /// Atomically add a batch of patterns next to the existing ones.
    async fn append_patterns(&self, patterns: Vec<Pattern>) -> Result<Vec<Uuid>, StoreError>;

    /// Atomically swap a project's patterns for a new set.
    async fn replace_patterns(
        &self,
        project_id: Uuid,
        patterns: Vec<Pattern>,
    ) -> Result<Vec<Uuid>, StoreError>;

    async fn list_patterns(&self, project_id: Uuid) -> Result<Vec<Pattern>, StoreError>;
}
