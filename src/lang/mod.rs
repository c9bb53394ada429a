//! # Cymbol source model
//!
//! The abstract syntax tree handed to the backend by the parser, plus the
//! runtime values shared by the virtual machines and the tree-walking
//! interpreter.
//!
//! ## Conventions
//!
//! - Every node carries a unique [`NodeId`](ast::NodeId) and a [`Span`].
//! - Passes attach information to nodes through side tables keyed by node id;
//!   the tree itself is never mutated after construction.

pub mod ast;
pub mod build;
pub mod span;
pub mod value;

pub use ast::{BinOp, CompileUnit, Decl, Expr, ExprKind, NodeId, Stmt, StmtKind, TypeRef, UnaryOp};
pub use build::AstBuilder;
pub use span::Span;
pub use value::{HeapRef, Value};
