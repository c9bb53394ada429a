use std::collections::{BTreeSet, HashMap};

use super::op::{Instruction, Opcode, operand_fits};
use super::program::{Const, FunctionInfo, Isa, LabelInfo, Program, StructInfo};
use super::stack_check;
use crate::compile_error::{CompileError, Diagnostics};
use crate::ir::{ENTRY, Expr, Func, LabelId, Prog, Stmt, UnaryOp};
use crate::lang::ast::BinOp;
use crate::lang::span::Span;
use crate::symtab::Builtin;

/// Assemble lowered IR into a stack machine program.
///
/// `diagnostics` holds the errors recorded by the earlier passes; when it is
/// not empty nothing is assembled and the errors come straight back.
pub fn assemble(prog: &Prog, diagnostics: Diagnostics) -> Result<Program, Diagnostics> {
    if !diagnostics.is_empty() {
        return Err(diagnostics.sorted());
    }
    let mut diagnostics = diagnostics;

    let mut program = Program::new(Isa::Stack);
    program.globals = prog.globals;
    program.structs = prog
        .structs
        .iter()
        .map(|s| StructInfo {
            name: s.name.clone(),
            fields: s.fields.clone(),
        })
        .collect();

    let funcs: Vec<&Func> = prog.functions().collect();
    let mut functions = HashMap::new();
    for (i, f) in funcs.iter().enumerate() {
        functions.insert(f.name.clone(), i);
        program.functions.push(FunctionInfo {
            name: f.name.clone(),
            address: 0,
            end: 0,
            nargs: f.nargs,
            nlocals: f.nlocals,
            returns: f.returns,
            max_stack: 0,
        });
    }
    program.entry = functions
        .get(ENTRY)
        .or_else(|| functions.get("main"))
        .copied()
        .unwrap_or(0);

    for (index, func) in funcs.iter().enumerate() {
        let slots = renumber_slots(func);
        let nlocals = slots.values().filter(|s| **s >= func.nargs).count() as u32;

        let mut emit = Emitter {
            program: &mut program,
            functions: &functions,
            diagnostics: &mut diagnostics,
            func,
            slots,
            labels: HashMap::new(),
            base: 0,
            code: Vec::new(),
            final_pass: false,
        };
        let (code, labels) = emit.run();

        let address = program.code.len();
        program.code.extend(code);
        let info = &mut program.functions[index];
        info.address = address;
        info.end = program.code.len();
        info.nlocals = info.nlocals.max(nlocals);

        let mut labels: Vec<LabelInfo> = labels
            .into_iter()
            .map(|(label, offset)| LabelInfo {
                function: index,
                name: label.to_string(),
                offset,
            })
            .collect();
        labels.sort_by_key(|l| (l.offset, l.name.clone()));
        program.labels.extend(labels);
    }

    if diagnostics.is_empty() {
        stack_check::check_into(&mut program, &mut diagnostics, Span::default());
    }

    tracing::debug!(
        words = program.code.len(),
        functions = program.functions.len(),
        constants = program.constants.len(),
        "assembled stack program"
    );
    diagnostics.into_result(program)
}

/// Map each frame slot a function uses to a contiguous 0-based index.
/// Parameters keep their positions.
fn renumber_slots(func: &Func) -> HashMap<u32, u32> {
    fn visit(e: &Expr, out: &mut BTreeSet<u32>) {
        match e {
            Expr::FrameSlot(s) => {
                out.insert(*s);
            }
            Expr::BinExpr { lhs, rhs, .. } => {
                visit(lhs, out);
                visit(rhs, out);
            }
            Expr::UnaryExpr { operand, .. } => visit(operand, out),
            Expr::ArrayAccessExpr { array, index } => {
                visit(array, out);
                visit(index, out);
            }
            Expr::ClassAccessExpr { object, .. } => visit(object, out),
            Expr::NewArray { len } => visit(len, out),
            _ => {}
        }
    }

    let mut used = BTreeSet::new();
    for stmt in &func.body {
        match stmt {
            Stmt::Assign { dst, src } => {
                visit(dst, &mut used);
                visit(src, &mut used);
            }
            Stmt::CJmp { cond, .. } => visit(cond, &mut used),
            Stmt::ReturnVal(Some(e)) | Stmt::ExprStmt(e) => visit(e, &mut used),
            _ => {}
        }
    }

    let mut next = func.nargs;
    let mut slots: HashMap<u32, u32> = (0..func.nargs).map(|p| (p, p)).collect();
    for s in used.into_iter().filter(|s| *s >= func.nargs) {
        slots.insert(s, next);
        next += 1;
    }
    slots
}

struct Emitter<'a> {
    program: &'a mut Program,
    functions: &'a HashMap<String, usize>,
    diagnostics: &'a mut Diagnostics,
    func: &'a Func,
    slots: HashMap<u32, u32>,
    labels: HashMap<LabelId, usize>,
    /// Absolute offset of the function's first instruction.
    base: usize,
    code: Vec<u32>,
    /// The first pass only measures and records labels; errors are reported
    /// by the second.
    final_pass: bool,
}

impl Emitter<'_> {
    fn run(&mut self) -> (Vec<u32>, HashMap<LabelId, usize>) {
        self.base = self.program.code.len();
        let func = self.func;

        for stmt in &func.body {
            if let Stmt::Label(l) = stmt {
                let offset = self.base + self.code.len();
                if self.labels.insert(*l, offset).is_some() {
                    self.diagnostics.push(
                        CompileError::duplicate_label(&l.to_string(), Span::default())
                            .with_hint(format!("in function '{}'", self.func.name)),
                    );
                }
            } else {
                self.stmt(stmt);
            }
        }

        self.code.clear();
        self.final_pass = true;
        for stmt in &func.body {
            self.stmt(stmt);
        }
        (std::mem::take(&mut self.code), std::mem::take(&mut self.labels))
    }

    fn error(&mut self, error: CompileError) {
        if self.final_pass {
            let error = if error.hint.is_some() {
                error
            } else {
                error.with_hint(format!("in function '{}'", self.func.name))
            };
            self.diagnostics.push(error);
        }
    }

    fn op(&mut self, opcode: Opcode, operand: i64) {
        let operand = if operand_fits(operand) {
            operand as i32
        } else {
            self.error(CompileError::operand_out_of_range(
                opcode.mnemonic(),
                operand,
                "does not fit the 26-bit operand field",
                Span::default(),
            ));
            0
        };
        self.code.push(Instruction::new(opcode, operand).encode());
    }

    fn label(&mut self, label: LabelId) -> i64 {
        if !self.final_pass {
            return 0;
        }
        match self.labels.get(&label) {
            Some(offset) => *offset as i64,
            None => {
                self.error(CompileError::unresolved_label(&label.to_string(), Span::default()));
                0
            }
        }
    }

    fn slot(&self, slot: u32) -> i64 {
        self.slots.get(&slot).copied().unwrap_or(slot) as i64
    }

    fn constant(&mut self, value: Const) -> i64 {
        self.program.intern(value) as i64
    }

    // ─── Statements ──────────────────────────────────────────────────────

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign { dst, src } => self.assign(dst, src),
            Stmt::Label(_) => {}
            Stmt::Jmp(l) => {
                let target = self.label(*l);
                self.op(Opcode::Br, target);
            }
            Stmt::CJmp { cond, target } => {
                self.expr(cond);
                let target = self.label(*target);
                self.op(Opcode::Brf, target);
            }
            Stmt::ReturnVal(Some(e)) => {
                self.expr(e);
                self.op(Opcode::RetV, 0);
            }
            Stmt::ReturnVal(None) => {
                if self.func.returns {
                    self.op(Opcode::Null, 0);
                    self.op(Opcode::RetV, 0);
                } else {
                    self.op(Opcode::Ret, 0);
                }
            }
            Stmt::ExprStmt(e) => {
                self.expr(e);
                if e.produces_value() {
                    self.op(Opcode::Pop, 0);
                }
            }
        }
    }

    fn assign(&mut self, dst: &Expr, src: &Expr) {
        match dst {
            Expr::OperandSlot(_) => self.expr(src),
            Expr::Var(slot) => {
                self.expr(src);
                self.op(Opcode::GStore, *slot as i64);
            }
            Expr::FrameSlot(slot) => {
                self.expr(src);
                let slot = self.slot(*slot);
                self.op(Opcode::Store, slot);
            }
            Expr::ClassAccessExpr { object, field, .. } => {
                self.expr(object);
                self.expr(src);
                self.op(Opcode::FStore, *field as i64);
            }
            Expr::ArrayAccessExpr { array, index } => {
                self.expr(array);
                self.expr(index);
                self.expr(src);
                self.op(Opcode::AStore, 0);
            }
            _ => self.error(CompileError::not_assignable(Span::default())),
        }
    }

    // ─── Expressions ─────────────────────────────────────────────────────

    /// Emit code leaving the value of `e` on the operand stack. Operand slots
    /// are already there.
    fn expr(&mut self, e: &Expr) {
        match e {
            Expr::IntVal(n) => {
                if operand_fits(*n) {
                    self.op(Opcode::IConst, *n);
                } else {
                    let i = self.constant(Const::Int(*n));
                    self.op(Opcode::LConst, i);
                }
            }
            Expr::FloatVal(n) => {
                let i = self.constant(Const::Float(*n));
                self.op(Opcode::FConst, i);
            }
            Expr::StringVal(s) => {
                let i = self.constant(Const::Str(s.clone()));
                self.op(Opcode::SConst, i);
            }
            Expr::BoolVal(b) => self.op(Opcode::BConst, *b as i64),
            Expr::CharVal(c) => self.op(Opcode::CConst, *c as u32 as i64),
            Expr::NullVal => self.op(Opcode::Null, 0),
            Expr::Var(slot) => self.op(Opcode::GLoad, *slot as i64),
            Expr::FrameSlot(slot) => {
                let slot = self.slot(*slot);
                self.op(Opcode::Load, slot);
            }
            Expr::OperandSlot(_) => {}
            Expr::BinExpr {
                op,
                float,
                lhs,
                rhs,
            } => {
                self.expr(lhs);
                self.expr(rhs);
                self.op(binary_opcode(*op, *float), 0);
            }
            Expr::UnaryExpr { op, float, operand } => {
                self.expr(operand);
                let opcode = match op {
                    UnaryOp::Neg if *float => Opcode::FNeg,
                    UnaryOp::Neg => Opcode::INeg,
                    UnaryOp::Not => Opcode::INot,
                    UnaryOp::IntToFloat => Opcode::IToF,
                };
                self.op(opcode, 0);
            }
            Expr::CallFunc { name, builtin, .. } => match builtin {
                Some(Builtin::Print) => self.op(Opcode::Print, 0),
                None => match self.functions.get(name) {
                    Some(index) => self.op(Opcode::Call, *index as i64),
                    None => self.error(CompileError::unresolved_symbol(name, Span::default())),
                },
            },
            Expr::ArrayAccessExpr { array, index } => {
                self.expr(array);
                self.expr(index);
                self.op(Opcode::ALoad, 0);
            }
            Expr::ClassAccessExpr { object, field, .. } => {
                self.expr(object);
                self.op(Opcode::FLoad, *field as i64);
            }
            Expr::NewStruct { ty, .. } => self.op(Opcode::Struct, *ty as i64),
            Expr::NewArray { len } => {
                self.expr(len);
                self.op(Opcode::NewArray, 0);
            }
        }
    }
}

fn binary_opcode(op: BinOp, float: bool) -> Opcode {
    match (op, float) {
        (BinOp::Add, false) => Opcode::IAdd,
        (BinOp::Sub, false) => Opcode::ISub,
        (BinOp::Mul, false) => Opcode::IMul,
        (BinOp::Div, false) => Opcode::IDiv,
        (BinOp::Rem, _) => Opcode::IRem,
        (BinOp::Lt, false) => Opcode::ILt,
        (BinOp::Le, false) => Opcode::ILe,
        (BinOp::Gt, false) => Opcode::IGt,
        (BinOp::Ge, false) => Opcode::IGe,
        (BinOp::Eq, false) => Opcode::IEq,
        (BinOp::Ne, false) => Opcode::INe,
        (BinOp::And, _) => Opcode::IAnd,
        (BinOp::Or, _) => Opcode::IOr,
        (BinOp::Add, true) => Opcode::FAdd,
        (BinOp::Sub, true) => Opcode::FSub,
        (BinOp::Mul, true) => Opcode::FMul,
        (BinOp::Div, true) => Opcode::FDiv,
        (BinOp::Lt, true) => Opcode::FLt,
        (BinOp::Le, true) => Opcode::FLe,
        (BinOp::Gt, true) => Opcode::FGt,
        (BinOp::Ge, true) => Opcode::FGe,
        (BinOp::Eq, true) => Opcode::FEq,
        (BinOp::Ne, true) => Opcode::FNe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_error::CompileErrorKind;
    use crate::context::CompilerContext;
    use crate::ir;
    use crate::lang::ast::CompileUnit;
    use crate::lang::build::AstBuilder;
    use crate::resolve::resolve;
    use pretty_assertions::assert_eq;

    fn compile(unit: &CompileUnit) -> Result<Program, Diagnostics> {
        let mut ctx = CompilerContext::new();
        let res = resolve(unit, &mut ctx);
        let prog = ir::build(unit, &res, &mut ctx);
        assemble(&prog, res.diagnostics)
    }

    fn mnemonics(program: &Program, name: &str) -> Vec<String> {
        let f = program.function(name).expect(name);
        (f.address..f.end)
            .map(|o| program.instruction(o).unwrap().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_assemble_arithmetic_return() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![b.func(
            "int",
            "main",
            vec![],
            vec![b.ret(Some(b.binary(BinOp::Add, b.int(1), b.int(2))))],
        )]);

        let program = compile(&unit).unwrap();
        assert_eq!(mnemonics(&program, "main"), vec!["iconst 1", "iconst 2", "iadd", "retv"]);
        assert_eq!(mnemonics(&program, ENTRY), vec!["call 1", "retv"]);
        assert_eq!(program.entry, 0);
        assert_eq!(program.function("main").unwrap().max_stack, 2);
    }

    #[test]
    fn test_labels_resolve_to_absolute_offsets() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![b.func(
            "void",
            "main",
            vec![],
            vec![b.while_(b.bool(false), b.block(vec![]))],
        )]);

        let program = compile(&unit).unwrap();
        let main = program.function("main").unwrap();
        // <start> occupies the first two words
        assert_eq!(main.address, 2);
        assert_eq!(mnemonics(&program, "main"), vec!["bconst 0", "brf 5", "br 2", "ret"]);
        assert_eq!(program.label_offset(1, "L0"), Some(2));
        assert_eq!(program.label_offset(1, "L1"), Some(5));
    }

    #[test]
    fn test_wide_integer_goes_to_pool() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![b.func(
            "int",
            "main",
            vec![],
            vec![b.ret(Some(b.int(1 << 40)))],
        )]);

        let program = compile(&unit).unwrap();
        assert_eq!(mnemonics(&program, "main"), vec!["lconst 0", "retv"]);
        assert_eq!(program.constants, vec![Const::Int(1 << 40)]);
    }

    #[test]
    fn test_implicit_return_in_value_function() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![
            b.func("int", "f", vec![], vec![b.if_(b.bool(true), b.ret(Some(b.int(1))), None)]),
            b.func("void", "main", vec![], vec![]),
        ]);

        let program = compile(&unit).unwrap();
        let code = mnemonics(&program, "f");
        assert_eq!(&code[code.len() - 2..], &["null", "retv"]);
    }

    #[test]
    fn test_refuses_with_prior_errors() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![b.func(
            "void",
            "main",
            vec![],
            vec![b.expr_stmt(b.ident("nope"))],
        )]);

        let errors = compile(&unit).unwrap_err();
        assert_eq!(
            errors.count(|k| matches!(k, CompileErrorKind::UnresolvedSymbol { .. })),
            1
        );
    }

    #[test]
    fn test_unresolved_and_duplicate_labels() {
        let prog = Prog {
            items: vec![ir::Item::Func(Func {
                name: "main".to_string(),
                symbol: None,
                nargs: 0,
                nlocals: 0,
                returns: false,
                body: vec![
                    Stmt::Label(LabelId(0)),
                    Stmt::Label(LabelId(0)),
                    Stmt::Jmp(LabelId(9)),
                ],
            })],
            structs: vec![],
            globals: 0,
        };

        let errors = assemble(&prog, Diagnostics::new()).unwrap_err();
        assert_eq!(errors.count(|k| matches!(k, CompileErrorKind::DuplicateLabel { .. })), 1);
        assert_eq!(errors.count(|k| matches!(k, CompileErrorKind::UnresolvedLabel { .. })), 1);
    }

    #[test]
    fn test_frame_slots_are_compacted() {
        let prog = Prog {
            items: vec![ir::Item::Func(Func {
                name: "main".to_string(),
                symbol: None,
                nargs: 1,
                nlocals: 0,
                returns: false,
                body: vec![
                    Stmt::Assign {
                        dst: Expr::OperandSlot(0),
                        src: Expr::FrameSlot(0),
                    },
                    Stmt::Assign {
                        dst: Expr::FrameSlot(7),
                        src: Expr::OperandSlot(0),
                    },
                    Stmt::ReturnVal(None),
                ],
            })],
            structs: vec![],
            globals: 0,
        };

        let program = assemble(&prog, Diagnostics::new()).unwrap();
        assert_eq!(mnemonics(&program, "main"), vec!["load 0", "store 1", "ret"]);
        assert_eq!(program.function("main").unwrap().nlocals, 1);
    }
}
