// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Named flow controllers shared between writers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::FlowController;
use crate::config::{FlowControllerConfig, DEFAULT_FLOW_CONTROLLER};
use crate::error::{Error, Result};

/// Flow controllers by name.
///
/// Always contains the default controller (`"default"`), which writers
/// without an explicit `flow_controller` name attach to.
pub struct FlowControllerRegistry {
    controllers: RwLock<HashMap<String, Arc<FlowController>>>,
}

impl FlowControllerRegistry {
    /// Registry holding only the default controller.
    pub fn new() -> Result<Self> {
        Self::with_controllers(Vec::new())
    }

    /// Registry holding the default controller plus `configs`.
    ///
    /// A config named `"default"` replaces the built-in default controller.
    pub fn with_controllers(configs: Vec<FlowControllerConfig>) -> Result<Self> {
        let registry = Self {
            controllers: RwLock::new(HashMap::new()),
        };
        let has_default = configs.iter().any(|c| c.name == DEFAULT_FLOW_CONTROLLER);
        if !has_default {
            registry.register(FlowControllerConfig::default())?;
        }
        for config in configs {
            registry.register(config)?;
        }
        Ok(registry)
    }

    /// Create and register a controller.
    pub fn register(&self, config: FlowControllerConfig) -> Result<Arc<FlowController>> {
        let mut controllers = self.controllers.write();
        if controllers.contains_key(&config.name) {
            return Err(Error::InvalidConfig(format!(
                "flow controller '{}' already registered",
                config.name
            )));
        }
        let name = config.name.clone();
        let controller = Arc::new(FlowController::new(config)?);
        controllers.insert(name, Arc::clone(&controller));
        Ok(controller)
    }

    /// Controller named `name`.
    pub fn get(&self, name: &str) -> Result<Arc<FlowController>> {
        self.controllers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownFlowController(name.to_string()))
    }

    /// Controller named `name`, or the default one for `None`.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<FlowController>> {
        self.get(name.unwrap_or(DEFAULT_FLOW_CONTROLLER))
    }

    pub fn default_controller(&self) -> Result<Arc<FlowController>> {
        self.get(DEFAULT_FLOW_CONTROLLER)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.controllers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for FlowControllerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowControllerRegistry")
            .field("controllers", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PublishMode, SchedulingDiscipline};

    #[test]
    fn test_default_always_present() {
        let registry = FlowControllerRegistry::new().expect("registry");
        let default = registry.resolve(None).expect("default");
        assert_eq!(default.name(), DEFAULT_FLOW_CONTROLLER);
        assert_eq!(
            default.config().publish_mode,
            PublishMode::SyncWithFallback
        );
    }

    #[test]
    fn test_unknown_name() {
        let registry = FlowControllerRegistry::new().expect("registry");
        assert!(matches!(
            registry.resolve(Some("missing")),
            Err(Error::UnknownFlowController(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_named_controllers_and_duplicates() {
        let registry = FlowControllerRegistry::with_controllers(vec![
            FlowControllerConfig::asynchronous("bulk", SchedulingDiscipline::RoundRobin),
        ])
        .expect("registry");
        assert_eq!(registry.names(), vec!["bulk".to_string(), "default".to_string()]);
        assert!(registry.get("bulk").is_ok());
        assert!(registry
            .register(FlowControllerConfig::asynchronous(
                "bulk",
                SchedulingDiscipline::Fifo
            ))
            .is_err());
    }

    #[test]
    fn test_override_default() {
        let registry = FlowControllerRegistry::with_controllers(vec![
            FlowControllerConfig::asynchronous(DEFAULT_FLOW_CONTROLLER, SchedulingDiscipline::Fifo),
        ])
        .expect("registry");
        let default = registry.default_controller().expect("default");
        assert_eq!(default.config().publish_mode, PublishMode::Async);
    }
}
