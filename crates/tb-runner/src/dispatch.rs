use std::collections::HashMap;
use std::sync::Arc;

use tb_core::StepKind;

use crate::executor::Executor;
use crate::steps::console::ConsoleProcessor;
use crate::steps::file_copy::FileCopyProcessor;
use crate::steps::installer::InstallerProcessor;
use crate::steps::script::ScriptProcessor;
use crate::steps::{StepProcessor, ToolConfig};

/// Maps each step kind to the processor that runs it.
#[derive(Default, Clone)]
pub struct DispatchTable {
    processors: HashMap<StepKind, Arc<dyn StepProcessor>>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in processors for every known kind.
    pub fn with_defaults(executor: Arc<dyn Executor>, tools: ToolConfig) -> Self {
        let mut table = Self::new();
        table.register(Arc::new(ConsoleProcessor::new(executor.clone()).with_timeout(tools.timeout)));
        table.register(Arc::new(InstallerProcessor::new(executor.clone(), tools.clone())));
        table.register(Arc::new(ScriptProcessor::new(executor, tools)));
        table.register(Arc::new(FileCopyProcessor::new()));
        table
    }

    /// Registers `processor` under its declared kind, replacing any previous one.
    pub fn register(&mut self, processor: Arc<dyn StepProcessor>) {
        self.processors.insert(processor.kind(), processor);
    }

    pub fn resolve(&self, kind: StepKind) -> Option<Arc<dyn StepProcessor>> {
        if kind == StepKind::Unsupported {
            return None;
        }
        self.processors.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<StepKind> {
        self.processors.keys().copied().collect()
    }
}
