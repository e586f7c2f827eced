use std::collections::HashMap;
use std::sync::Arc;

use vible_core::error::{Result, VibleError};
use vible_core::workflow::{Trigger, WorkflowDefinition};

/// Registry of workflow definitions, indexed by id and by trigger.
#[derive(Default, Clone)]
pub struct WorkflowRegistry {
    definitions: HashMap<String, Arc<WorkflowDefinition>>,
    by_event: HashMap<String, Vec<String>>,
    cron: Vec<String>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Ids must be unique and the definition valid.
    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<()> {
        definition.validate()?;

        let id = definition.id().to_string();
        if self.definitions.contains_key(&id) {
            return Err(VibleError::Config(format!(
                "workflow '{}' is already registered",
                id
            )));
        }

        match definition.trigger() {
            Trigger::Event(name) => self.by_event.entry(name.clone()).or_default().push(id.clone()),
            Trigger::Cron(_) => self.cron.push(id.clone()),
        }
        self.definitions.insert(id, Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(id).cloned()
    }

    /// Definitions triggered by `event_name`, in registration order.
    pub fn for_event(&self, event_name: &str) -> Vec<Arc<WorkflowDefinition>> {
        self.by_event
            .get(event_name)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Cron-triggered definitions, in registration order.
    pub fn cron_definitions(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.cron.iter().filter_map(|id| self.get(id)).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.definitions.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vible_core::cron::CronTrigger;

    fn noop(id: &str, event: &str) -> WorkflowDefinition {
        WorkflowDefinition::on_event(id, event).step("noop", |_ctx| async { Ok(()) })
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = WorkflowRegistry::new();
        registry.register(noop("a", "app/story.delete")).unwrap();
        registry.register(noop("b", "app/story.delete")).unwrap();
        registry
            .register(
                WorkflowDefinition::on_cron("digest", CronTrigger::parse("0 9 * * *").unwrap())
                    .step("send", |_ctx| async { Ok(()) }),
            )
            .unwrap();

        assert_eq!(registry.len(), 3);
        let ids: Vec<_> = registry
            .for_event("app/story.delete")
            .iter()
            .map(|d| d.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(registry.for_event("unknown").is_empty());
        assert_eq!(registry.cron_definitions().len(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = WorkflowRegistry::new();
        registry.register(noop("a", "x")).unwrap();
        assert!(registry.register(noop("a", "y")).is_err());
        assert!(registry.for_event("y").is_empty());
    }
}
