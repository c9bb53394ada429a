/// One executed instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub offset: usize,
    pub word: u32,
    /// Disassembled instruction.
    pub text: String,
    /// Operand stack depth (stack VM) or stack pointer (register VM).
    pub depth_before: usize,
    pub depth_after: usize,
    pub call_depth: usize,
}

impl TraceEntry {
    pub(crate) fn emit(self, log: &mut Vec<TraceEntry>) {
        tracing::trace!(target: "cymbol::trace", "{}", self);
        log.push(self);
    }
}

impl std::fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04} {:08x}  {:<24} depth {:>3} -> {:<3} calls {}",
            self.offset, self.word, self.text, self.depth_before, self.depth_after, self.call_depth
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_line_format() {
        let entry = TraceEntry {
            offset: 3,
            word: 0x8e3,
            text: "iconst 35".to_string(),
            depth_before: 0,
            depth_after: 1,
            call_depth: 1,
        };
        assert_eq!(
            entry.to_string(),
            "0003 000008e3  iconst 35                depth   0 -> 1   calls 1"
        );
    }
}
