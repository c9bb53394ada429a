use super::span::Span;

/// Identity of an AST node. Unique within one [`CompileUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// A whole program: struct, function and global variable declarations in
/// source order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompileUnit {
    pub decls: Vec<Decl>,
}

impl CompileUnit {
    pub fn new(decls: Vec<Decl>) -> Self {
        CompileUnit { decls }
    }

    pub fn functions(&self) -> impl Iterator<Item = &FuncDecl> {
        self.decls.iter().filter_map(Decl::as_func)
    }

    pub fn structs(&self) -> impl Iterator<Item = &StructDecl> {
        self.decls.iter().filter_map(Decl::as_struct)
    }

    pub fn globals(&self) -> impl Iterator<Item = &VarDecl> {
        self.decls.iter().filter_map(Decl::as_var)
    }
}

// =============================================================================
// Declarations
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Func(FuncDecl),
    Struct(StructDecl),
    Var(VarDecl),
}

impl Decl {
    pub fn id(&self) -> NodeId {
        match self {
            Decl::Func(f) => f.id,
            Decl::Struct(s) => s.id,
            Decl::Var(v) => v.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Decl::Func(f) => &f.name,
            Decl::Struct(s) => &s.name,
            Decl::Var(v) => &v.name,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Decl::Func(f) => f.span,
            Decl::Struct(s) => s.span,
            Decl::Var(v) => v.span,
        }
    }

    pub fn as_func(&self) -> Option<&FuncDecl> {
        match self {
            Decl::Func(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructDecl> {
        match self {
            Decl::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&VarDecl> {
        match self {
            Decl::Var(v) => Some(v),
            _ => None,
        }
    }
}

/// `ret name(params) { body }`
///
/// The body block shares the function's scope with the parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub ret: TypeRef,
    pub params: Vec<VarDecl>,
    pub body: Block,
}

/// `struct Name { fields }`
#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub fields: Vec<VarDecl>,
}

/// A variable, parameter or field declaration: `ty name [= init]`.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub ty: TypeRef,
    pub init: Option<Expr>,
}

/// A type as written in the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Named(String),
    Array(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn array_of(elem: TypeRef) -> Self {
        TypeRef::Array(Box::new(elem))
    }
}

impl std::fmt::Display for TypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeRef::Named(n) => write!(f, "{}", n),
            TypeRef::Array(elem) => write!(f, "{}[]", elem),
        }
    }
}

// =============================================================================
// Statements
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: NodeId,
    pub span: Span,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub id: NodeId,
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Var(VarDecl),
    Assign {
        target: Expr,
        value: Expr,
    },
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Expr(Expr),
    Block(Block),
}

impl Stmt {
    pub fn is_return(&self) -> bool {
        matches!(self.kind, StmtKind::Return(_))
    }
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Null,
    Ident(String),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    /// `object.field`
    Field {
        object: Box<Expr>,
        field: String,
    },
    /// `array[index]`
    Index {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    /// `new Name()`
    NewStruct(String),
    /// `new ty[len]`
    NewArray {
        elem: TypeRef,
        len: Box<Expr>,
    },
}

impl Expr {
    pub fn ident_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name),
            _ => None,
        }
    }

    /// True for expressions that may appear on the left of an assignment.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Ident(_) | ExprKind::Field { .. } | ExprKind::Index { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem
        )
    }

    /// Ordering comparisons; equality is separate because it accepts any
    /// pair of compatible operands.
    pub fn is_ordering(self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    pub fn is_equality(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}
