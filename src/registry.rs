//! Tool registry: which tools apply to which entity type.
//!
//! The registry is built once at startup from the static tool table and
//! is read-only afterwards, so it is shared behind an `Arc` without any
//! locking.

use crate::config::ToolConfig;
use crate::error::RegistryError;
use crate::models::EntityType;
use crate::tools::{build_adapter, ToolAdapter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Immutable mapping from entity type to the ordered applicable tools.
pub struct ToolRegistry {
    /// All tools in registration order.
    tools: Vec<Arc<dyn ToolAdapter>>,
    by_type: HashMap<EntityType, Vec<Arc<dyn ToolAdapter>>>,
}

impl ToolRegistry {
    /// Build a registry from adapters, keeping their order.
    ///
    /// Fails when a tool supports no entity type or a name repeats.
    pub fn new(tools: Vec<Arc<dyn ToolAdapter>>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        let mut by_type: HashMap<EntityType, Vec<Arc<dyn ToolAdapter>>> = HashMap::new();

        for tool in &tools {
            let descriptor = tool.descriptor();

            if descriptor.supported_entity_types.is_empty() {
                return Err(RegistryError::NoSupportedTypes(descriptor.name.clone()));
            }
            if !seen.insert(descriptor.name.clone()) {
                return Err(RegistryError::DuplicateTool(descriptor.name.clone()));
            }

            for entity_type in &descriptor.supported_entity_types {
                by_type
                    .entry(*entity_type)
                    .or_default()
                    .push(Arc::clone(tool));
            }
            debug!(
                "Registered tool {} for {:?}",
                descriptor.name, descriptor.supported_entity_types
            );
        }

        Ok(Self { tools, by_type })
    }

    /// Build a registry from the configured tool table.
    pub fn from_config(configs: &[ToolConfig]) -> Result<Self, RegistryError> {
        let tools = configs
            .iter()
            .map(build_adapter)
            .collect::<Result<Vec<_>, _>>()?;

        let registry = Self::new(tools)?;
        info!("Tool registry built with {} tools", registry.len());
        Ok(registry)
    }

    /// Tools applicable to an entity type, in registration order.
    ///
    /// Unknown or unmapped types yield an empty slice.
    pub fn tools_for(&self, entity_type: EntityType) -> &[Arc<dyn ToolAdapter>] {
        self.by_type
            .get(&entity_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All tools, in registration order.
    pub fn tools(&self) -> &[Arc<dyn ToolAdapter>] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
