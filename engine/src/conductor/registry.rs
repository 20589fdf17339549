//! Capability registry
//!
//! Maps every [`Capability`] to exactly one handler. Lookup by name never
//! fails: names that are not a known capability route to the act handler.

use crate::conductor::executor::Executor;
use crate::conductor::memory::MemoryAssembler;
use crate::conductor::planner::Planner;
use crate::conductor::research::ResearchHandler;
use crate::conductor::types::CapabilityHandler;
use crate::config::WorkflowConfig;
use crate::db::Database;
use crate::llm::GenerativeClient;
use sdk::Capability;
use std::sync::Arc;
use tracing::debug;

pub struct CapabilityRegistry {
    plan: Arc<dyn CapabilityHandler>,
    recall: Arc<dyn CapabilityHandler>,
    research: Arc<dyn CapabilityHandler>,
    act: Arc<dyn CapabilityHandler>,
}

impl CapabilityRegistry {
    pub fn new(
        plan: Arc<dyn CapabilityHandler>,
        recall: Arc<dyn CapabilityHandler>,
        research: Arc<dyn CapabilityHandler>,
        act: Arc<dyn CapabilityHandler>,
    ) -> Self {
        Self {
            plan,
            recall,
            research,
            act,
        }
    }

    /// Registry with the built-in handlers
    ///
    /// `client` is shared by the generative handlers; `None` runs them in
    /// fallback mode.
    pub fn builtin(
        db: Database,
        client: Option<Arc<GenerativeClient>>,
        config: &WorkflowConfig,
    ) -> Self {
        Self::new(
            Arc::new(Planner::new(client.clone(), config.max_subtasks)),
            Arc::new(MemoryAssembler::new(db.clone(), config)),
            Arc::new(ResearchHandler::new(db.clone(), client.clone())),
            Arc::new(Executor::new(db, client)),
        )
    }

    /// Replace the handler for the capability `handler` serves
    pub fn with_handler(mut self, handler: Arc<dyn CapabilityHandler>) -> Self {
        debug!("Replacing handler for capability '{}'", handler.capability());
        match handler.capability() {
            Capability::Plan => self.plan = handler,
            Capability::Recall => self.recall = handler,
            Capability::Research => self.research = handler,
            Capability::Act => self.act = handler,
        }
        self
    }

    pub fn get(&self, capability: Capability) -> Arc<dyn CapabilityHandler> {
        match capability {
            Capability::Plan => Arc::clone(&self.plan),
            Capability::Recall => Arc::clone(&self.recall),
            Capability::Research => Arc::clone(&self.research),
            Capability::Act => Arc::clone(&self.act),
        }
    }

    /// Resolve a declared capability name to its handler
    pub fn resolve(&self, name: &str) -> (Capability, Arc<dyn CapabilityHandler>) {
        let capability = Capability::resolve(name);
        (capability, self.get(capability))
    }
}
