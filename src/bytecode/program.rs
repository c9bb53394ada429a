use serde::{Deserialize, Serialize};

use super::op::Instruction;
use super::reg_op::RegInstruction;

/// Constant pool entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    Int(i64),
    Float(f64),
    Str(String),
}

impl std::fmt::Display for Const {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Const::Int(n) => write!(f, "{}", n),
            Const::Float(n) => write!(f, "{:?}", n),
            Const::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// Function table entry. Code of the function is `address..end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub address: usize,
    pub end: usize,
    pub nargs: u32,
    pub nlocals: u32,
    pub returns: bool,
    /// Maximum operand stack depth, filled in by the stack checker.
    pub max_stack: u32,
}

impl FunctionInfo {
    /// Frame size: arguments followed by locals.
    pub fn frame_size(&self) -> usize {
        (self.nargs + self.nlocals) as usize
    }

    pub fn contains(&self, offset: usize) -> bool {
        (self.address..self.end).contains(&offset)
    }
}

/// Struct table entry; field offsets are positions in `fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructInfo {
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelInfo {
    /// Index of the function the label belongs to.
    pub function: usize,
    pub name: String,
    pub offset: usize,
}

/// Which machine a program's words are encoded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Isa {
    Stack,
    Register,
}

/// An assembled program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub isa: Isa,
    pub code: Vec<u32>,
    pub constants: Vec<Const>,
    pub functions: Vec<FunctionInfo>,
    pub structs: Vec<StructInfo>,
    pub labels: Vec<LabelInfo>,
    pub globals: u32,
    /// Index of the function execution starts in.
    pub entry: usize,
}

impl Program {
    pub fn new(isa: Isa) -> Self {
        Program {
            isa,
            code: Vec::new(),
            constants: Vec::new(),
            functions: Vec::new(),
            structs: Vec::new(),
            labels: Vec::new(),
            globals: 0,
            entry: 0,
        }
    }

    /// Decode the stack instruction at `offset`. `Err` carries the raw opcode
    /// of an undecodable word.
    pub fn instruction(&self, offset: usize) -> Option<Result<Instruction, u8>> {
        self.code.get(offset).map(|w| Instruction::decode(*w))
    }

    pub fn reg_instruction(&self, offset: usize) -> Option<Result<RegInstruction, u8>> {
        self.code.get(offset).map(|w| RegInstruction::decode(*w))
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// The function whose code contains `offset`.
    pub fn function_at(&self, offset: usize) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.contains(offset))
    }

    pub fn entry_function(&self) -> Option<&FunctionInfo> {
        self.functions.get(self.entry)
    }

    pub fn struct_index(&self, name: &str) -> Option<usize> {
        self.structs.iter().position(|s| s.name == name)
    }

    /// Run-time field lookup by name.
    pub fn field_offset(&self, strukt: usize, field: &str) -> Option<usize> {
        self.structs
            .get(strukt)?
            .fields
            .iter()
            .position(|f| f == field)
    }

    pub fn labels_of(&self, function: usize) -> impl Iterator<Item = &LabelInfo> {
        self.labels.iter().filter(move |l| l.function == function)
    }

    pub fn label_offset(&self, function: usize, name: &str) -> Option<usize> {
        self.labels_of(function)
            .find(|l| l.name == name)
            .map(|l| l.offset)
    }

    /// Index of `value` in the constant pool, adding it when missing.
    pub fn intern(&mut self, value: Const) -> usize {
        if let Some(i) = self.constants.iter().position(|c| *c == value) {
            return i;
        }
        self.constants.push(value);
        self.constants.len() - 1
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Program, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::Opcode;
    use pretty_assertions::assert_eq;

    fn sample() -> Program {
        let mut p = Program::new(Isa::Stack);
        p.code = vec![
            Instruction::new(Opcode::IConst, 1).encode(),
            Instruction::op(Opcode::RetV).encode(),
        ];
        p.functions.push(FunctionInfo {
            name: "main".to_string(),
            address: 0,
            end: 2,
            nargs: 0,
            nlocals: 0,
            returns: true,
            max_stack: 1,
        });
        p.structs.push(StructInfo {
            name: "Point".to_string(),
            fields: vec!["x".to_string(), "y".to_string()],
        });
        p
    }

    #[test]
    fn test_intern_reuses_entries() {
        let mut p = Program::new(Isa::Stack);
        assert_eq!(p.intern(Const::Str("hi".into())), 0);
        assert_eq!(p.intern(Const::Float(1.5)), 1);
        assert_eq!(p.intern(Const::Str("hi".into())), 0);
        assert_eq!(p.constants.len(), 2);
    }

    #[test]
    fn test_field_offset() {
        let p = sample();
        assert_eq!(p.field_offset(0, "y"), Some(1));
        assert_eq!(p.field_offset(0, "z"), None);
        assert_eq!(p.field_offset(3, "x"), None);
    }

    #[test]
    fn test_function_at() {
        let p = sample();
        assert_eq!(p.function_at(1).map(|f| f.name.as_str()), Some("main"));
        assert!(p.function_at(2).is_none());
    }

    #[test]
    fn test_postcard_round_trip() {
        let mut p = sample();
        p.intern(Const::Float(2.5));
        let bytes = p.to_bytes().unwrap();
        assert_eq!(Program::from_bytes(&bytes).unwrap(), p);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(Program::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }
}
