use crate::ir::LabelId;

/// Counters shared by the compile passes.
///
/// One context is created per compilation and threaded through the resolver
/// and the IR builder, so two compilations never share numbering.
#[derive(Debug, Clone, Default)]
pub struct CompilerContext {
    labels: u32,
    slots: u32,
    globals: u32,
}

impl CompilerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A label id never handed out before in this compilation.
    pub fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.labels);
        self.labels += 1;
        id
    }

    /// Restart frame slot numbering for the next function.
    pub fn begin_function(&mut self) {
        self.slots = 0;
    }

    pub fn next_slot(&mut self) -> u32 {
        let slot = self.slots;
        self.slots += 1;
        slot
    }

    /// Frame slots handed out since [`begin_function`](Self::begin_function).
    pub fn slots_used(&self) -> u32 {
        self.slots
    }

    pub fn next_global_slot(&mut self) -> u32 {
        let slot = self.globals;
        self.globals += 1;
        slot
    }

    pub fn global_count(&self) -> u32 {
        self.globals
    }
}
