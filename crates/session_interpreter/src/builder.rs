use quantcal_core::model::Model;
use thread_local::ThreadLocal;

use super::session::InterpreterSession;

pub struct InterpreterSessionBuilder {
    model: Model,
    enable_profiling: bool,
}

impl InterpreterSessionBuilder {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            enable_profiling: false,
        }
    }

    pub fn with_profiling_enabled(mut self, enable_profiling: bool) -> Self {
        self.enable_profiling = enable_profiling;
        self
    }

    pub fn build(self) -> InterpreterSession {
        let sorted_nodes = self.model.topo_sort_nodes();
        InterpreterSession {
            model: self.model,
            sorted_nodes,
            enable_profiling: self.enable_profiling,
            values: ThreadLocal::new(),
        }
    }
}
