//! Three-address intermediate representation.
//!
//! Each function is a flat list of statements. Temporaries are
//! [`Expr::OperandSlot`]s: slot `k` is position `k` of the function's operand
//! stack, allocated and released in stack order, so the assembler can emit
//! them as plain pushes and pops.

pub mod builder;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lang::ast::BinOp;
use crate::symtab::{Builtin, SymbolId};

pub use builder::build;

/// Name of the synthetic function that initializes globals and calls `main`.
pub const ENTRY: &str = "<start>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LabelId(pub u32);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    /// Integer to float conversion.
    IntToFloat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntVal(i64),
    FloatVal(f64),
    BoolVal(bool),
    CharVal(char),
    StringVal(String),
    NullVal,
    /// Global variable slot.
    Var(u32),
    /// Frame slot of the current function.
    FrameSlot(u32),
    /// Operand stack temporary.
    OperandSlot(u32),
    BinExpr {
        op: BinOp,
        float: bool,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    UnaryExpr {
        op: UnaryOp,
        float: bool,
        operand: Box<Expr>,
    },
    /// Call with `arg_count` arguments already in the operand slots below.
    CallFunc {
        name: String,
        arg_count: u32,
        symbol: Option<SymbolId>,
        builtin: Option<Builtin>,
        returns: bool,
    },
    ArrayAccessExpr {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    ClassAccessExpr {
        object: Box<Expr>,
        field: u32,
        name: String,
    },
    /// Allocate an instance of the struct at this index of [`Prog::structs`].
    NewStruct {
        ty: u32,
        name: String,
    },
    NewArray {
        len: Box<Expr>,
    },
}

impl Expr {
    /// Whether evaluating the expression leaves a value behind.
    pub fn produces_value(&self) -> bool {
        match self {
            Expr::CallFunc { returns, .. } => *returns,
            _ => true,
        }
    }

    pub fn bin(op: BinOp, float: bool, lhs: Expr, rhs: Expr) -> Expr {
        Expr::BinExpr {
            op,
            float,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnaryOp, float: bool, operand: Expr) -> Expr {
        Expr::UnaryExpr {
            op,
            float,
            operand: Box::new(operand),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign { dst: Expr, src: Expr },
    Label(LabelId),
    Jmp(LabelId),
    /// Jump to `target` when `cond` is false.
    CJmp { cond: Expr, target: LabelId },
    ReturnVal(Option<Expr>),
    /// Evaluate for effect, discarding any value.
    ExprStmt(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    pub name: String,
    pub symbol: Option<SymbolId>,
    pub nargs: u32,
    pub nlocals: u32,
    pub returns: bool,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVar {
    pub name: String,
    pub slot: u32,
    pub symbol: SymbolId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructLayout {
    pub name: String,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Func(Func),
    Global(GlobalVar),
}

/// A whole lowered program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prog {
    pub items: Vec<Item>,
    pub structs: Vec<StructLayout>,
    pub globals: u32,
}

impl Prog {
    pub fn functions(&self) -> impl Iterator<Item = &Func> {
        self.items.iter().filter_map(|i| match i {
            Item::Func(f) => Some(f),
            Item::Global(_) => None,
        })
    }

    pub fn function(&self, name: &str) -> Option<&Func> {
        self.functions().find(|f| f.name == name)
    }
}

// =============================================================================
// Text form
// =============================================================================

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::IntVal(n) => write!(f, "{}", n),
            Expr::FloatVal(n) => write!(f, "{:?}", n),
            Expr::BoolVal(b) => write!(f, "{}", b),
            Expr::CharVal(c) => write!(f, "{:?}", c),
            Expr::StringVal(s) => write!(f, "{:?}", s),
            Expr::NullVal => write!(f, "null"),
            Expr::Var(slot) => write!(f, "@{}", slot),
            Expr::FrameSlot(slot) => write!(f, "${}", slot),
            Expr::OperandSlot(slot) => write!(f, "t{}", slot),
            Expr::BinExpr {
                op,
                float,
                lhs,
                rhs,
            } => {
                let suffix = if *float { "." } else { "" };
                write!(f, "{} {}{} {}", lhs, op.symbol(), suffix, rhs)
            }
            Expr::UnaryExpr { op, operand, .. } => match op {
                UnaryOp::Neg => write!(f, "-{}", operand),
                UnaryOp::Not => write!(f, "!{}", operand),
                UnaryOp::IntToFloat => write!(f, "itof {}", operand),
            },
            Expr::CallFunc {
                name, arg_count, ..
            } => write!(f, "call {}/{}", name, arg_count),
            Expr::ArrayAccessExpr { array, index } => write!(f, "{}[{}]", array, index),
            Expr::ClassAccessExpr { object, name, .. } => write!(f, "{}.{}", object, name),
            Expr::NewStruct { name, .. } => write!(f, "new {}", name),
            Expr::NewArray { len } => write!(f, "new [{}]", len),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Assign { dst, src } => write!(f, "{} = {}", dst, src),
            Stmt::Label(l) => write!(f, "{}:", l),
            Stmt::Jmp(l) => write!(f, "jmp {}", l),
            Stmt::CJmp { cond, target } => write!(f, "cjmp {}, {}", cond, target),
            Stmt::ReturnVal(Some(e)) => write!(f, "ret {}", e),
            Stmt::ReturnVal(None) => write!(f, "ret"),
            Stmt::ExprStmt(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "func {}(args={}, locals={}){}",
            self.name,
            self.nargs,
            self.nlocals,
            if self.returns { " -> value" } else { "" }
        )?;
        for stmt in &self.body {
            match stmt {
                Stmt::Label(_) => writeln!(f, "{}", stmt)?,
                _ => writeln!(f, "    {}", stmt)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Prog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.structs {
            writeln!(f, "struct {} {{ {} }}", s.name, s.fields.join(", "))?;
        }
        for item in &self.items {
            match item {
                Item::Global(g) => writeln!(f, "global {} @{}", g.name, g.slot)?,
                Item::Func(func) => write!(f, "{}", func)?,
            }
        }
        Ok(())
    }
}
