/// Limits and switches shared by both virtual machines and the interpreter.
#[derive(Debug, Clone, PartialEq)]
pub struct VmConfig {
    /// Heap capacity. The stack VM counts cells (one per field or array
    /// element, one header per object); the register VM counts memory words,
    /// shared by globals, heap and stack.
    pub heap_size: usize,
    /// Maximum operand stack depth.
    pub stack_size: usize,
    pub max_call_depth: usize,
    pub max_steps: Option<u64>,
    /// Log calls and returns at debug level.
    pub debug: bool,
    /// Record a [`TraceEntry`](super::trace::TraceEntry) per instruction.
    pub trace: bool,
    /// Largest program (in words) the VM accepts.
    pub instruction_cache_size: usize,
    /// Verify every operand against the program tables before running.
    pub bounds_check: bool,
    /// Reject operands of the wrong type instead of coercing them.
    pub type_check: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            heap_size: 1 << 16,
            stack_size: 10_000,
            max_call_depth: 1000,
            max_steps: None,
            debug: false,
            trace: false,
            instruction_cache_size: 1 << 20,
            bounds_check: true,
            type_check: true,
        }
    }
}

impl VmConfig {
    pub fn builder() -> VmConfigBuilder {
        VmConfigBuilder {
            config: VmConfig::default(),
        }
    }
}

/// Consuming builder for [`VmConfig`], starting from the defaults.
#[derive(Debug, Clone)]
pub struct VmConfigBuilder {
    config: VmConfig,
}

impl VmConfigBuilder {
    pub fn heap_size(mut self, cells: usize) -> Self {
        self.config.heap_size = cells;
        self
    }

    pub fn stack_size(mut self, depth: usize) -> Self {
        self.config.stack_size = depth;
        self
    }

    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.config.max_call_depth = depth;
        self
    }

    pub fn max_steps(mut self, steps: u64) -> Self {
        self.config.max_steps = Some(steps);
        self
    }

    pub fn debug(mut self, on: bool) -> Self {
        self.config.debug = on;
        self
    }

    pub fn trace(mut self, on: bool) -> Self {
        self.config.trace = on;
        self
    }

    pub fn instruction_cache_size(mut self, words: usize) -> Self {
        self.config.instruction_cache_size = words;
        self
    }

    pub fn bounds_check(mut self, on: bool) -> Self {
        self.config.bounds_check = on;
        self
    }

    pub fn type_check(mut self, on: bool) -> Self {
        self.config.type_check = on;
        self
    }

    pub fn build(self) -> VmConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_starts_from_defaults() {
        let config = VmConfig::builder().max_steps(100).trace(true).build();
        assert_eq!(config.max_steps, Some(100));
        assert!(config.trace);
        assert_eq!(config.max_call_depth, 1000);
        assert_eq!(config.stack_size, 10_000);
    }
}
