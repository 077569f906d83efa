//! The single-pass compiler: a Pratt parser that emits bytecode as it reads.
//!
//! No AST is built. Expressions are parsed by precedence climbing, statements
//! by keyword dispatch, and bytecode flows straight into the function object
//! under construction. Name resolution walks enclosing function locals, then
//! upvalues (capturing through intermediate functions as needed), then module
//! globals, then builtin functions and classes. A name that cannot be
//! resolved inside a local scope becomes a forward reference, patched after
//! the whole module has been read.
//!
//! Syntax errors stop the current statement and only the first one per parse
//! is reported; semantic errors accumulate. A failed parse rolls the module's
//! constant and global pools back to their entry sizes so a REPL can recover.

use std::rc::Rc;

use crate::{
    codegen::CodeBuffer,
    error::{CompileError, Diagnostic, ErrorKind},
    heap::{HeapData, HeapId},
    lexer::{LexError, Lexer, Token, TokenKind},
    opcode::Opcode,
    types::{add_constant, add_global, Closure, FnKind, Function},
    value::Value,
    vm::Vm,
};

/// Locals per function and globals per module share the one-byte index space.
const MAX_LOCALS: usize = 256;
/// Upvalues per function.
const MAX_UPVALUES: usize = 256;
/// Arguments in one call; arity is stored in an `i8`.
const MAX_ARGS: usize = 127;
/// Pending forward-referenced names per module.
const MAX_FORWARDS: usize = 256;
/// Pending `break` patches per loop.
const MAX_BREAKS: usize = 256;

/// Scope depth of module-level code; any greater depth is local.
const DEPTH_GLOBAL: i32 = -1;

#[derive(Debug, Clone)]
pub(crate) struct CompileOptions {
    /// Compile expression statements to `ReplPrint` instead of `Pop`.
    pub repl_mode: bool,
    /// Disable the tail-call rewrite, keeping every frame for tracebacks.
    pub debug: bool,
    /// Path used in diagnostics.
    pub path: String,
}

/// Expression precedence, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    None,
    Lowest,
    Or,
    And,
    Equality,
    Test,
    Comparison,
    BitOr,
    BitXor,
    BitAnd,
    Shift,
    Range,
    Term,
    Factor,
    Unary,
    Exponent,
    Call,
    Subscript,
    Attrib,
}

impl Prec {
    /// The next-stronger level, for left-associative operators.
    fn stronger(self) -> Self {
        match self {
            Self::None => Self::Lowest,
            Self::Lowest => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Equality,
            Self::Equality => Self::Test,
            Self::Test => Self::Comparison,
            Self::Comparison => Self::BitOr,
            Self::BitOr => Self::BitXor,
            Self::BitXor => Self::BitAnd,
            Self::BitAnd => Self::Shift,
            Self::Shift => Self::Range,
            Self::Range => Self::Term,
            Self::Term => Self::Factor,
            Self::Factor => Self::Unary,
            Self::Unary => Self::Exponent,
            Self::Exponent => Self::Call,
            Self::Call => Self::Subscript,
            Self::Subscript => Self::Attrib,
            Self::Attrib => Self::Attrib,
        }
    }
}

type ParseFn = fn(&mut Compiler<'_, '_>, bool);

struct Rule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    prec: Prec,
}

impl Rule {
    const fn new(prefix: Option<ParseFn>, infix: Option<ParseFn>, prec: Prec) -> Self {
        Self { prefix, infix, prec }
    }
}

fn rule_of(kind: &TokenKind) -> Rule {
    use TokenKind as T;
    match kind {
        T::Number(_) => Rule::new(Some(number_lit), None, Prec::None),
        T::Str(_) => Rule::new(Some(string_lit), None, Prec::None),
        T::StrInterp(_) => Rule::new(Some(interp_string), None, Prec::None),
        T::Name(_) => Rule::new(Some(name_expr), None, Prec::None),
        T::Null => Rule::new(Some(literal), None, Prec::None),
        T::True | T::False => Rule::new(Some(literal), None, Prec::None),
        T::SelfKw => Rule::new(Some(self_expr), None, Prec::None),
        T::Super => Rule::new(Some(super_expr), None, Prec::None),
        T::Fn => Rule::new(Some(fn_literal), None, Prec::None),
        T::LParen => Rule::new(Some(grouping), Some(call_expr), Prec::Call),
        T::LBracket => Rule::new(Some(list_lit), Some(subscript_expr), Prec::Subscript),
        T::LBrace => Rule::new(Some(map_lit), None, Prec::None),
        T::Dot => Rule::new(None, Some(attrib_expr), Prec::Attrib),
        T::DotDot => Rule::new(None, Some(binary), Prec::Range),
        T::Minus => Rule::new(Some(unary), Some(binary), Prec::Term),
        T::Plus => Rule::new(Some(unary), Some(binary), Prec::Term),
        T::Star | T::Slash | T::Percent => Rule::new(None, Some(binary), Prec::Factor),
        T::StarStar => Rule::new(None, Some(binary), Prec::Exponent),
        T::Amp => Rule::new(None, Some(binary), Prec::BitAnd),
        T::Pipe => Rule::new(None, Some(binary), Prec::BitOr),
        T::Caret => Rule::new(None, Some(binary), Prec::BitXor),
        T::LtLt | T::GtGt => Rule::new(None, Some(binary), Prec::Shift),
        T::EqEq | T::NotEq => Rule::new(None, Some(binary), Prec::Equality),
        T::Lt | T::Gt | T::LtEq | T::GtEq => Rule::new(None, Some(binary), Prec::Comparison),
        T::In | T::Is => Rule::new(None, Some(binary), Prec::Test),
        T::And => Rule::new(None, Some(and_expr), Prec::And),
        T::Or => Rule::new(None, Some(or_expr), Prec::Or),
        T::Bang | T::Not | T::Tilde => Rule::new(Some(unary), None, Prec::None),
        _ => Rule::new(None, None, Prec::None),
    }
}

#[derive(Debug)]
struct Local {
    name: String,
    depth: i32,
    captured: bool,
}

#[derive(Debug)]
struct UpvalueRef {
    is_immediate: bool,
    index: u8,
    name: String,
}

#[derive(Debug)]
struct LoopScope {
    start: usize,
    breaks: Vec<usize>,
    depth: i32,
}

#[derive(Debug)]
struct ForwardRef {
    name: String,
    func: HeapId,
    offset: usize,
    line: u32,
}

struct FuncScope {
    func: HeapId,
    buf: CodeBuffer,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueRef>,
    loops: Vec<LoopScope>,
    scope_depth: i32,
    is_method: bool,
    is_ctor: bool,
    name: String,
}

/// How a name resolved at its use site.
enum Binding {
    Local(u8),
    Upvalue(u8),
    Global(u8),
    BuiltinFn(u8),
    BuiltinTy(u8),
    Unresolved,
}

/// What an assignment-shaped token means.
enum AssignKind {
    Plain,
    Compound(Opcode),
}

fn assignment_kind(kind: &TokenKind) -> Option<AssignKind> {
    use TokenKind as T;
    Some(match kind {
        T::Eq => AssignKind::Plain,
        T::PlusEq => AssignKind::Compound(Opcode::Add),
        T::MinusEq => AssignKind::Compound(Opcode::Subtract),
        T::StarEq => AssignKind::Compound(Opcode::Multiply),
        T::SlashEq => AssignKind::Compound(Opcode::Divide),
        T::PercentEq => AssignKind::Compound(Opcode::Mod),
        T::AmpEq => AssignKind::Compound(Opcode::BitAnd),
        T::PipeEq => AssignKind::Compound(Opcode::BitOr),
        T::CaretEq => AssignKind::Compound(Opcode::BitXor),
        T::LtLtEq => AssignKind::Compound(Opcode::BitLshift),
        T::GtGtEq => AssignKind::Compound(Opcode::BitRshift),
        _ => return None,
    })
}

pub(crate) struct Compiler<'vm, 'src> {
    vm: &'vm mut Vm,
    lexer: Lexer<'src>,
    previous: Token,
    current: Token,
    module: HeapId,
    funcs: Vec<FuncScope>,
    forwards: Vec<ForwardRef>,
    diagnostics: Vec<Diagnostic>,
    panic_mode: bool,
    syntax_reported: bool,
    unexpected_eof: bool,
    /// Set when the current statement declared a new local, whose value
    /// must stay on the stack as the local's slot.
    stmt_new_local: bool,
    /// Set when the current statement was an assignment; the REPL does not
    /// echo assignment results.
    stmt_assignment: bool,
    options: CompileOptions,
}

/// Compiles `source` into `module`, returning the body closure.
///
/// On failure the module's constant and global pools are rolled back to
/// their sizes at entry.
pub(crate) fn compile(
    vm: &mut Vm,
    module: HeapId,
    source: &str,
    options: CompileOptions,
) -> Result<HeapId, CompileError> {
    let snapshot = {
        let m = vm.heap.get_module(module);
        (m.constants.len(), m.globals.len())
    };

    let root_fn = vm.alloc(HeapData::Function(Function::new_script(
        "(module)".to_owned(),
        module,
        0,
        false,
    )));
    vm.compiler_roots.push(root_fn);

    let mut compiler = Compiler {
        vm,
        lexer: Lexer::new(source),
        previous: Token::eof(1, 0),
        current: Token::eof(1, 0),
        module,
        funcs: vec![FuncScope {
            func: root_fn,
            buf: CodeBuffer::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            loops: Vec::new(),
            scope_depth: DEPTH_GLOBAL,
            is_method: false,
            is_ctor: false,
            name: "(module)".to_owned(),
        }],
        forwards: Vec::new(),
        diagnostics: Vec::new(),
        panic_mode: false,
        syntax_reported: false,
        unexpected_eof: false,
        stmt_new_local: false,
        stmt_assignment: false,
        options,
    };

    compiler.advance();
    compiler.run_module();

    let Compiler {
        vm,
        diagnostics,
        unexpected_eof,
        ..
    } = compiler;

    if diagnostics.is_empty() {
        // The root function is only rooted through the compiler list until
        // the body closure hangs off the module, so clear the list after.
        let closure = vm.alloc(HeapData::Closure(Closure {
            function: root_fn,
            upvalues: Vec::new(),
        }));
        vm.heap.get_module_mut(module).body = Some(closure);
        vm.compiler_roots.clear();
        Ok(closure)
    } else {
        vm.compiler_roots.clear();
        let m = vm.heap.get_module_mut(module);
        m.constants.truncate(snapshot.0);
        m.globals.truncate(snapshot.1);
        m.global_names.truncate(snapshot.1);
        Err(CompileError {
            diagnostics,
            unexpected_eof,
        })
    }
}

impl Compiler<'_, '_> {
    // ------------------------------------------------------------------
    // Driver

    fn run_module(&mut self) {
        self.skip_lines();
        while !self.check(&TokenKind::Eof) {
            self.statement_top();
            self.skip_lines();
        }

        // Implicit `return null` plus the end sentinel.
        self.emit(Opcode::PushNull);
        self.emit(Opcode::Return);
        self.emit(Opcode::End);

        self.finish_function(0);
        self.resolve_forwards();
    }

    fn statement_top(&mut self) {
        if self.match_token(&TokenKind::Def) {
            self.def_decl();
        } else if self.match_token(&TokenKind::Class) {
            self.class_decl();
        } else if self.match_token(&TokenKind::Import) {
            self.import_stmt();
        } else if self.match_token(&TokenKind::From) {
            self.from_import_stmt();
        } else if self.match_token(&TokenKind::Native) {
            self.error_semantic("'native' declarations can only be provided by the host");
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_token(&TokenKind::If) {
            self.if_stmt();
        } else if self.match_token(&TokenKind::While) {
            self.while_stmt();
        } else if self.match_token(&TokenKind::For) {
            self.for_stmt();
        } else if self.match_token(&TokenKind::Break) {
            self.break_stmt();
        } else if self.match_token(&TokenKind::Continue) {
            self.continue_stmt();
        } else if self.match_token(&TokenKind::Return) {
            self.return_stmt();
        } else if matches!(
            self.current.kind,
            TokenKind::Class | TokenKind::Def | TokenKind::Import | TokenKind::From
        ) {
            self.error_syntax("declaration is only allowed at the top level");
            self.advance();
        } else {
            self.expression_statement();
        }
        self.expect_statement_end();
    }

    fn block(&mut self, terminators: &[TokenKind]) {
        self.skip_lines();
        loop {
            if self.check(&TokenKind::Eof) {
                self.error_syntax("unexpected end of input inside a block");
                return;
            }
            if terminators.iter().any(|t| self.check(t)) {
                return;
            }
            self.statement();
            if self.panic_mode {
                self.synchronize();
            }
            self.skip_lines();
        }
    }

    // ------------------------------------------------------------------
    // Statements

    fn expression_statement(&mut self) {
        self.stmt_new_local = false;
        self.stmt_assignment = false;
        self.parse_precedence(Prec::Lowest, true);
        if self.stmt_new_local {
            // The value on the stack is the new local's slot.
        } else if self.options.repl_mode && self.funcs.len() == 1 && !self.stmt_assignment {
            self.emit(Opcode::ReplPrint);
        } else {
            self.emit(Opcode::Pop);
        }
    }

    fn if_stmt(&mut self) {
        self.expression_no_assign();
        self.consume(&TokenKind::Then, "expected 'then' after the condition");

        let mut else_jump = self.emit_jump(Opcode::JumpIfNot);
        let mut exits: Vec<usize> = Vec::new();
        let terminators = [TokenKind::Elif, TokenKind::Else, TokenKind::End];

        loop {
            self.begin_scope();
            self.block(&terminators);
            self.end_scope();

            if self.match_token(&TokenKind::Elif) {
                exits.push(self.emit_jump(Opcode::Jump));
                self.patch_jump(else_jump);
                self.expression_no_assign();
                self.consume(&TokenKind::Then, "expected 'then' after the condition");
                else_jump = self.emit_jump(Opcode::JumpIfNot);
            } else if self.match_token(&TokenKind::Else) {
                exits.push(self.emit_jump(Opcode::Jump));
                self.patch_jump(else_jump);
                self.begin_scope();
                self.block(&[TokenKind::End]);
                self.end_scope();
                self.consume(&TokenKind::End, "expected 'end' to close the if statement");
                for exit in exits {
                    self.patch_jump(exit);
                }
                return;
            } else {
                self.consume(&TokenKind::End, "expected 'end' to close the if statement");
                self.patch_jump(else_jump);
                for exit in exits {
                    self.patch_jump(exit);
                }
                return;
            }
        }
    }

    fn while_stmt(&mut self) {
        let loop_start = self.buf().position();
        self.expression_no_assign();
        self.consume(&TokenKind::Do, "expected 'do' after the loop condition");

        let exit = self.emit_jump(Opcode::JumpIfNot);
        let depth = self.func().scope_depth;
        self.func_mut().loops.push(LoopScope {
            start: loop_start,
            breaks: Vec::new(),
            depth,
        });

        self.begin_scope();
        self.block(&[TokenKind::End]);
        self.end_scope();
        self.consume(&TokenKind::End, "expected 'end' to close the while loop");

        self.emit_loop(loop_start);
        self.patch_jump(exit);
        let finished = self.func_mut().loops.pop().expect("loop scope underflow");
        for br in finished.breaks {
            self.patch_jump(br);
        }
    }

    fn for_stmt(&mut self) {
        let var_name = self.consume_name("expected a loop variable name");
        self.consume(&TokenKind::In, "expected 'in' after the loop variable");

        self.begin_scope();
        self.expression_no_assign();
        self.consume(&TokenKind::Do, "expected 'do' after the loop sequence");

        // Three hidden slots: the sequence, the iteration counter, and the
        // loop variable the `Iter` opcode writes into.
        self.declare_local("@seq".to_owned());
        self.emit(Opcode::IterTest);
        self.emit(Opcode::PushZero);
        self.declare_local("@iter".to_owned());
        self.emit(Opcode::PushNull);
        self.declare_local(var_name);

        let loop_start = self.buf().position();
        let exit = self.emit_jump(Opcode::Iter);
        let depth = self.func().scope_depth;
        self.func_mut().loops.push(LoopScope {
            start: loop_start,
            breaks: Vec::new(),
            depth,
        });

        self.begin_scope();
        self.block(&[TokenKind::End]);
        self.end_scope();
        self.consume(&TokenKind::End, "expected 'end' to close the for loop");

        self.emit_loop(loop_start);
        self.patch_jump(exit);
        let finished = self.func_mut().loops.pop().expect("loop scope underflow");
        for br in finished.breaks {
            self.patch_jump(br);
        }
        self.end_scope();
    }

    fn break_stmt(&mut self) {
        if self.func().loops.is_empty() {
            self.error_syntax("cannot break outside a loop");
            return;
        }
        let depth_before = self.buf().depth();
        self.discard_loop_locals();
        let jump = self.emit_jump(Opcode::Jump);
        self.buf().set_depth(depth_before);

        let full = self.func().loops.last().expect("checked above").breaks.len() >= MAX_BREAKS;
        if full {
            self.error_semantic("too many break statements in one loop");
            return;
        }
        self.func_mut()
            .loops
            .last_mut()
            .expect("checked above")
            .breaks
            .push(jump);
    }

    fn continue_stmt(&mut self) {
        if self.func().loops.is_empty() {
            self.error_syntax("cannot continue outside a loop");
            return;
        }
        let depth_before = self.buf().depth();
        self.discard_loop_locals();
        let target = self.func().loops.last().expect("checked above").start;
        self.emit_loop(target);
        self.buf().set_depth(depth_before);
    }

    /// Emits pops for every local that is deeper than the innermost loop,
    /// without forgetting them at compile time (the fall-through path still
    /// owns those slots).
    fn discard_loop_locals(&mut self) {
        let loop_depth = self.func().loops.last().expect("inside a loop").depth;
        let to_discard: Vec<bool> = self
            .func()
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth > loop_depth)
            .map(|l| l.captured)
            .collect();
        for captured in to_discard {
            if captured {
                self.emit(Opcode::CloseUpvalue);
            } else {
                self.emit(Opcode::Pop);
            }
        }
    }

    fn return_stmt(&mut self) {
        if self.funcs.len() == 1 {
            self.error_syntax("cannot return from top-level code");
            return;
        }
        let is_ctor = self.func().is_ctor;
        let has_value = !matches!(
            self.current.kind,
            TokenKind::Line | TokenKind::End | TokenKind::Eof | TokenKind::Elif | TokenKind::Else
        );
        if is_ctor {
            if has_value {
                self.error_semantic("cannot return a value from a constructor");
                self.expression_no_assign();
                self.emit(Opcode::Pop);
            }
            self.emit(Opcode::PushSelf);
            self.emit(Opcode::Return);
            return;
        }
        if has_value {
            self.expression_no_assign();
            if !self.options.debug && self.buf().last_is_call() {
                self.buf().make_tail_call();
            }
        } else {
            self.emit(Opcode::PushNull);
        }
        self.emit(Opcode::Return);
    }

    // ------------------------------------------------------------------
    // Declarations

    fn def_decl(&mut self) {
        let name = self.consume_name("expected a function name after 'def'");
        // Bind the global slot before compiling the body so the function can
        // recurse through its own name.
        let global = self.find_or_add_global(&name);
        self.function_body(name, false, false);
        self.emit_byte(Opcode::StoreGlobal, global);
        self.emit(Opcode::Pop);
    }

    fn class_decl(&mut self) {
        let name = self.consume_name("expected a class name after 'class'");
        let name_idx = self.string_constant(&name);

        if self.match_token(&TokenKind::Is) {
            self.expression_no_assign();
        } else {
            self.emit(Opcode::PushNull);
        }
        self.emit_short(Opcode::CreateClass, name_idx);

        self.skip_lines();
        while self.match_token(&TokenKind::Def) {
            let method_name = self.consume_name("expected a method name after 'def'");
            let is_ctor = method_name == "_init";
            self.function_body(method_name, true, is_ctor);
            self.emit(Opcode::BindMethod);
            self.skip_lines();
        }
        self.consume(&TokenKind::End, "expected 'end' to close the class body");

        let global = self.find_or_add_global(&name);
        self.emit_byte(Opcode::StoreGlobal, global);
        self.emit(Opcode::Pop);
    }

    /// Compiles a parameter list and function body, leaving a closure on the
    /// enclosing function's stack.
    fn function_body(&mut self, name: String, is_method: bool, is_ctor: bool) {
        let fn_id = self.vm.alloc(HeapData::Function(Function::new_script(
            name.clone(),
            self.module,
            0,
            is_method,
        )));
        self.vm.compiler_roots.push(fn_id);

        self.funcs.push(FuncScope {
            func: fn_id,
            buf: CodeBuffer::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            loops: Vec::new(),
            scope_depth: 0,
            is_method,
            is_ctor,
            name,
        });

        self.consume(&TokenKind::LParen, "expected '(' to start the parameter list");
        let mut arity: i8 = 0;
        if !self.check(&TokenKind::RParen) {
            loop {
                let param = self.consume_name("expected a parameter name");
                if self
                    .func()
                    .locals
                    .iter()
                    .any(|l| l.name == param)
                {
                    self.error_semantic(&format!("duplicate parameter '{param}'"));
                }
                self.declare_local_silent(param);
                if arity as usize >= MAX_ARGS {
                    self.error_semantic("too many parameters");
                } else {
                    arity += 1;
                }
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RParen, "expected ')' after the parameter list");
        // Parameter slots are pushed by the caller; seed the depth tracking.
        self.buf().adjust(i32::from(arity));

        self.begin_scope();
        self.block(&[TokenKind::End]);
        self.end_scope();
        self.consume(&TokenKind::End, "expected 'end' to close the function body");

        // Implicit return: constructors return self, everything else null.
        if is_ctor {
            self.emit(Opcode::PushSelf);
        } else {
            self.emit(Opcode::PushNull);
        }
        self.emit(Opcode::Return);
        self.emit(Opcode::End);

        self.finish_function(arity);

        // Back in the enclosing function: reference the finished function
        // from the constant pool and build the closure at runtime.
        let scope = self.funcs.pop().expect("function scope underflow");
        let fn_idx = self.make_constant(Value::Ref(scope.func));
        self.emit_short(Opcode::PushClosure, fn_idx);
        let line = self.previous.line;
        for up in &scope.upvalues {
            self.buf().emit_raw(u8::from(up.is_immediate), line);
            self.buf().emit_raw(up.index, line);
        }
    }

    /// Writes the finished code blob and metadata into the heap function of
    /// the innermost scope. The scope itself stays on the stack.
    fn finish_function(&mut self, arity: i8) {
        let scope = self.funcs.last_mut().expect("no function scope");
        let blob = std::mem::take(&mut scope.buf).finish();
        let upvalue_count = scope.upvalues.len() as u16;
        let func = scope.func;
        let f = self.vm.heap.get_function_mut(func);
        f.arity = arity;
        f.upvalue_count = upvalue_count;
        f.kind = FnKind::Script(Rc::new(blob));
    }

    fn import_stmt(&mut self) {
        loop {
            let (path, default_bind) = self.import_path();
            let path_idx = self.string_constant(&path);
            self.emit_short(Opcode::Import, path_idx);
            let bind = if self.match_token(&TokenKind::As) {
                self.consume_name("expected a name after 'as'")
            } else {
                default_bind
            };
            let global = self.find_or_add_global(&bind);
            self.emit_byte(Opcode::StoreGlobal, global);
            self.emit(Opcode::Pop);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
    }

    fn from_import_stmt(&mut self) {
        let (path, _) = self.import_path();
        let path_idx = self.string_constant(&path);
        self.emit_short(Opcode::Import, path_idx);
        self.consume(&TokenKind::Import, "expected 'import' after the module path");

        loop {
            let item = self.consume_name("expected a name to import");
            let item_idx = self.string_constant(&item);
            self.emit_short(Opcode::GetAttribKeep, item_idx);
            let bind = if self.match_token(&TokenKind::As) {
                self.consume_name("expected a name after 'as'")
            } else {
                item
            };
            let global = self.find_or_add_global(&bind);
            self.emit_byte(Opcode::StoreGlobal, global);
            self.emit(Opcode::Pop);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.emit(Opcode::Pop);
    }

    /// Parses a dotted module path into its on-disk spelling: dots become
    /// slashes, a leading `.` maps to `./` and each leading `^` to `../`.
    fn import_path(&mut self) -> (String, String) {
        let mut path = String::new();
        if self.match_token(&TokenKind::Dot) {
            path.push_str("./");
        } else {
            while self.match_token(&TokenKind::Caret) {
                path.push_str("../");
            }
        }
        let mut last = self.consume_name("expected a module name");
        path.push_str(&last);
        while self.match_token(&TokenKind::Dot) {
            let segment = self.consume_name("expected a name after '.'");
            path.push('/');
            path.push_str(&segment);
            last = segment;
        }
        (path, last)
    }

    // ------------------------------------------------------------------
    // Expressions

    fn expression_no_assign(&mut self) {
        self.parse_precedence(Prec::Lowest, false);
    }

    fn parse_precedence(&mut self, prec: Prec, allow_assign: bool) {
        self.advance();
        let Some(prefix) = rule_of(&self.previous.kind).prefix else {
            self.error_syntax("expected an expression");
            return;
        };
        let can_assign = allow_assign && prec <= Prec::Lowest;
        prefix(self, can_assign);

        while prec <= rule_of(&self.current.kind).prec {
            self.advance();
            let infix = rule_of(&self.previous.kind)
                .infix
                .expect("token with a precedence must have an infix rule");
            infix(self, can_assign);
        }

        if can_assign && assignment_kind(&self.current.kind).is_some() {
            self.error_syntax("invalid assignment target");
            self.advance();
        }
    }

    // ------------------------------------------------------------------
    // Name handling

    fn resolve_name(&mut self, name: &str) -> Binding {
        let top = self.funcs.len() - 1;
        if let Some(slot) = self.resolve_local(top, name) {
            return Binding::Local(slot);
        }
        if let Some(index) = self.resolve_upvalue(top, name) {
            return Binding::Upvalue(index);
        }
        let global = {
            let m = self.vm.heap.get_module(self.module);
            m.global_index(name, &self.vm.heap)
        };
        if let Some(index) = global {
            return Binding::Global(index as u8);
        }
        if let Some(index) = self.vm.find_builtin_fn(name) {
            return Binding::BuiltinFn(index);
        }
        if let Some(index) = self.vm.find_builtin_class(name) {
            return Binding::BuiltinTy(index);
        }
        Binding::Unresolved
    }

    fn resolve_local(&self, func: usize, name: &str) -> Option<u8> {
        self.funcs[func]
            .locals
            .iter()
            .rposition(|l| l.name == name)
            .map(|slot| slot as u8)
    }

    fn resolve_upvalue(&mut self, func: usize, name: &str) -> Option<u8> {
        if func == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local(func - 1, name) {
            self.funcs[func - 1].locals[local as usize].captured = true;
            return Some(self.add_upvalue(func, true, local, name));
        }
        if let Some(outer) = self.resolve_upvalue(func - 1, name) {
            return Some(self.add_upvalue(func, false, outer, name));
        }
        None
    }

    fn add_upvalue(&mut self, func: usize, is_immediate: bool, index: u8, name: &str) -> u8 {
        if let Some(existing) = self.funcs[func]
            .upvalues
            .iter()
            .position(|u| u.is_immediate == is_immediate && u.index == index)
        {
            return existing as u8;
        }
        if self.funcs[func].upvalues.len() >= MAX_UPVALUES {
            self.error_semantic("too many captured variables in one function");
            return 0;
        }
        self.funcs[func].upvalues.push(UpvalueRef {
            is_immediate,
            index,
            name: name.to_owned(),
        });
        (self.funcs[func].upvalues.len() - 1) as u8
    }

    fn declare_local(&mut self, name: String) {
        let depth = self.func().scope_depth;
        debug_assert!(depth >= 0, "locals require a local scope");
        if self
            .func()
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth == depth)
            .any(|l| l.name == name)
        {
            self.error_semantic(&format!("the name '{name}' is already declared in this scope"));
        }
        self.declare_local_silent(name);
    }

    fn declare_local_silent(&mut self, name: String) {
        if self.func().locals.len() >= MAX_LOCALS {
            self.error_semantic("too many local variables in one function");
            return;
        }
        let depth = self.func().scope_depth.max(0);
        self.func_mut().locals.push(Local {
            name,
            depth,
            captured: false,
        });
    }

    fn find_or_add_global(&mut self, name: &str) -> u8 {
        let existing = {
            let m = self.vm.heap.get_module(self.module);
            m.global_index(name, &self.vm.heap)
        };
        if let Some(index) = existing {
            return index as u8;
        }
        let name_idx = self.string_constant(name);
        match add_global(&mut self.vm.heap, self.module, name_idx) {
            Ok(index) => index,
            Err(err) => {
                self.error_semantic(&err.message);
                0
            }
        }
    }

    // ------------------------------------------------------------------
    // Scopes

    fn begin_scope(&mut self) {
        self.func_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.func_mut().scope_depth -= 1;
        loop {
            let discard = {
                let scope = self.func();
                match scope.locals.last() {
                    Some(local) if local.depth > scope.scope_depth => Some(local.captured),
                    _ => None,
                }
            };
            match discard {
                Some(true) => {
                    self.func_mut().locals.pop();
                    self.emit(Opcode::CloseUpvalue);
                }
                Some(false) => {
                    self.func_mut().locals.pop();
                    self.emit(Opcode::Pop);
                }
                None => break,
            }
        }
    }

    // ------------------------------------------------------------------
    // Forward references

    fn record_forward(&mut self, name: String, line: u32) {
        if self.forwards.len() >= MAX_FORWARDS {
            self.error_semantic("too many unresolved names in one module");
            return;
        }
        // Emit with a placeholder global index, patched after the pass.
        self.emit_byte(Opcode::PushGlobal, 0xff);
        let offset = self.buf().position() - 1;
        let func = self.func().func;
        self.forwards.push(ForwardRef {
            name,
            func,
            offset,
            line,
        });
    }

    fn resolve_forwards(&mut self) {
        let forwards = std::mem::take(&mut self.forwards);
        for fwd in forwards {
            let index = {
                let m = self.vm.heap.get_module(self.module);
                m.global_index(&fwd.name, &self.vm.heap)
            };
            match index {
                Some(global) => {
                    let f = self.vm.heap.get_function_mut(fwd.func);
                    match &mut f.kind {
                        FnKind::Script(code) => {
                            let blob =
                                Rc::get_mut(code).expect("compiled code is unshared during compilation");
                            blob.code[fwd.offset] = global as u8;
                        }
                        FnKind::Native(_) => unreachable!("forward reference in a native function"),
                    }
                }
                None => {
                    self.diagnostics.push(Diagnostic {
                        kind: ErrorKind::Semantic,
                        path: self.options.path.clone(),
                        line: fwd.line,
                        span: None,
                        message: format!("undefined name '{}'", fwd.name),
                    });
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Constants and emission helpers

    fn make_constant(&mut self, value: Value) -> u16 {
        match add_constant(&mut self.vm.heap, self.module, value) {
            Ok(index) => index,
            Err(err) => {
                self.error_semantic(&err.message);
                0
            }
        }
    }

    fn string_constant(&mut self, text: &str) -> u16 {
        let value = self.vm.alloc_string(text.to_owned());
        self.make_constant(value)
    }

    fn func(&self) -> &FuncScope {
        self.funcs.last().expect("no function scope")
    }

    fn func_mut(&mut self) -> &mut FuncScope {
        self.funcs.last_mut().expect("no function scope")
    }

    fn buf(&mut self) -> &mut CodeBuffer {
        &mut self.func_mut().buf
    }

    fn emit(&mut self, op: Opcode) {
        let line = self.previous.line;
        self.buf().emit(op, line);
    }

    fn emit_byte(&mut self, op: Opcode, operand: u8) {
        let line = self.previous.line;
        self.buf().emit_byte(op, operand, line);
    }

    fn emit_short(&mut self, op: Opcode, operand: u16) {
        let line = self.previous.line;
        self.buf().emit_short(op, operand, line);
    }

    fn emit_jump(&mut self, op: Opcode) -> usize {
        let line = self.previous.line;
        self.buf().emit_jump(op, line)
    }

    fn patch_jump(&mut self, at: usize) {
        if self.buf().patch_jump(at).is_err() {
            self.error_semantic("too much code to jump over");
        }
    }

    fn emit_loop(&mut self, target: usize) {
        let line = self.previous.line;
        if self.buf().emit_loop(target, line).is_err() {
            self.error_semantic("loop body is too large");
        }
    }

    /// Emits a call and fixes up the tracked stack depth: the callee plus
    /// `argc` arguments collapse into one result.
    fn emit_call(&mut self, op: Opcode, argc: u8) {
        self.emit_byte(op, argc);
        self.buf().adjust(-i32::from(argc));
    }

    fn emit_push_local(&mut self, slot: u8) {
        if slot <= 8 {
            let op = Opcode::from_repr(Opcode::PushLocal0 as u8 + slot).expect("small local opcode");
            self.emit(op);
        } else {
            self.emit_byte(Opcode::PushLocalN, slot);
        }
    }

    fn emit_store_local(&mut self, slot: u8) {
        if slot <= 8 {
            let op = Opcode::from_repr(Opcode::StoreLocal0 as u8 + slot).expect("small local opcode");
            self.emit(op);
        } else {
            self.emit_byte(Opcode::StoreLocalN, slot);
        }
    }

    fn emit_load(&mut self, binding: &Binding) {
        match binding {
            Binding::Local(slot) => self.emit_push_local(*slot),
            Binding::Upvalue(index) => self.emit_byte(Opcode::PushUpvalue, *index),
            Binding::Global(index) => self.emit_byte(Opcode::PushGlobal, *index),
            Binding::BuiltinFn(index) => self.emit_byte(Opcode::PushBuiltinFn, *index),
            Binding::BuiltinTy(index) => self.emit_byte(Opcode::PushBuiltinTy, *index),
            Binding::Unresolved => unreachable!("load of unresolved binding"),
        }
    }

    fn emit_store(&mut self, binding: &Binding) {
        match binding {
            Binding::Local(slot) => self.emit_store_local(*slot),
            Binding::Upvalue(index) => self.emit_byte(Opcode::StoreUpvalue, *index),
            Binding::Global(index) => self.emit_byte(Opcode::StoreGlobal, *index),
            _ => unreachable!("store to unassignable binding"),
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing

    fn advance(&mut self) {
        self.previous = std::mem::replace(&mut self.current, Token::eof(0, 0));
        match self.lexer.next_token() {
            Ok(token) => self.current = token,
            Err(err) => {
                self.lex_error(err);
                // Stop the parse; the statement machinery will wind down.
                self.current = Token::eof(self.previous.line, self.previous.end);
            }
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.current.kind == *kind
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_syntax(message);
        }
    }

    fn consume_name(&mut self, message: &str) -> String {
        if let TokenKind::Name(name) = &self.current.kind {
            let name = name.clone();
            self.advance();
            name
        } else {
            self.error_syntax(message);
            String::new()
        }
    }

    fn skip_lines(&mut self) {
        while self.check(&TokenKind::Line) {
            self.advance();
        }
    }

    fn expect_statement_end(&mut self) {
        if self.check(&TokenKind::Line) {
            self.skip_lines();
        } else if !matches!(
            self.current.kind,
            TokenKind::Eof | TokenKind::End | TokenKind::Else | TokenKind::Elif
        ) {
            self.error_syntax("expected a newline or ';' after the statement");
        }
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        loop {
            match self.current.kind {
                TokenKind::Eof
                | TokenKind::End
                | TokenKind::Class
                | TokenKind::Def
                | TokenKind::Import
                | TokenKind::From
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return => return,
                TokenKind::Line => {
                    self.advance();
                    return;
                }
                _ => self.advance(),
            }
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics

    fn lex_error(&mut self, err: LexError) {
        if err.unexpected_eof {
            self.unexpected_eof = true;
        }
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        if self.syntax_reported {
            return;
        }
        self.syntax_reported = true;
        self.diagnostics.push(Diagnostic {
            kind: err.kind,
            path: self.options.path.clone(),
            line: err.line,
            span: Some(err.span),
            message: err.message,
        });
    }

    fn error_syntax(&mut self, message: &str) {
        if self.current.kind == TokenKind::Eof {
            self.unexpected_eof = true;
        }
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        if self.syntax_reported {
            return;
        }
        self.syntax_reported = true;
        let token = &self.current;
        self.diagnostics.push(Diagnostic {
            kind: ErrorKind::Syntax,
            path: self.options.path.clone(),
            line: token.line,
            span: Some((token.start, token.end)),
            message: message.to_owned(),
        });
    }

    fn error_semantic(&mut self, message: &str) {
        let token = &self.previous;
        self.diagnostics.push(Diagnostic {
            kind: ErrorKind::Semantic,
            path: self.options.path.clone(),
            line: token.line,
            span: Some((token.start, token.end)),
            message: message.to_owned(),
        });
    }
}

// ----------------------------------------------------------------------
// Parse rules

fn literal(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    match c.previous.kind {
        TokenKind::Null => c.emit(Opcode::PushNull),
        TokenKind::True => c.emit(Opcode::PushTrue),
        TokenKind::False => c.emit(Opcode::PushFalse),
        _ => unreachable!("literal rule on a non-literal token"),
    }
}

fn number_lit(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let TokenKind::Number(n) = c.previous.kind else {
        unreachable!("number rule on a non-number token");
    };
    let value = Value::num(n);
    if matches!(value, Value::Int(0)) {
        c.emit(Opcode::PushZero);
    } else {
        let idx = c.make_constant(value);
        c.emit_short(Opcode::PushConstant, idx);
    }
}

fn string_lit(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let TokenKind::Str(text) = &c.previous.kind else {
        unreachable!("string rule on a non-string token");
    };
    let idx = {
        let text = text.clone();
        let value = c.vm.alloc_string(text);
        c.make_constant(value)
    };
    c.emit_short(Opcode::PushConstant, idx);
}

/// An interpolated string desugars to `list_join([part, expr, part, ...])`.
fn interp_string(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let list_join = c
        .vm
        .find_builtin_fn("list_join")
        .expect("list_join is a core builtin");
    c.emit_byte(Opcode::PushBuiltinFn, list_join);

    let line = c.previous.line;
    let list_at = c.buf().emit_jump_operand(Opcode::PushList, line);
    let mut count: u16 = 0;

    let TokenKind::StrInterp(part) = &c.previous.kind else {
        unreachable!("interp rule on a non-interp token");
    };
    let mut part = part.clone();
    loop {
        let idx = {
            let value = c.vm.alloc_string(std::mem::take(&mut part));
            c.make_constant(value)
        };
        c.emit_short(Opcode::PushConstant, idx);
        c.emit(Opcode::ListAppend);
        count += 1;

        c.expression_no_assign();
        c.emit(Opcode::ListAppend);
        count += 1;

        match &c.current.kind {
            TokenKind::StrInterp(next) => {
                part = next.clone();
                c.advance();
            }
            TokenKind::Str(last) => {
                let idx = {
                    let value = c.vm.alloc_string(last.clone());
                    c.make_constant(value)
                };
                c.advance();
                c.emit_short(Opcode::PushConstant, idx);
                c.emit(Opcode::ListAppend);
                count += 1;
                break;
            }
            _ => {
                c.error_syntax("unterminated string interpolation");
                break;
            }
        }
    }

    c.buf().patch_short(list_at, count);
    c.emit_call(Opcode::Call, 1);
}

fn name_expr(c: &mut Compiler<'_, '_>, can_assign: bool) {
    let TokenKind::Name(name) = &c.previous.kind else {
        unreachable!("name rule on a non-name token");
    };
    let name = name.clone();
    let line = c.previous.line;
    let binding = c.resolve_name(&name);

    let assign = if can_assign {
        assignment_kind(&c.current.kind)
    } else {
        None
    };

    match assign {
        Some(AssignKind::Plain) => {
            c.advance();
            match binding {
                Binding::Local(_) | Binding::Upvalue(_) | Binding::Global(_) => {
                    c.expression_no_assign();
                    c.emit_store(&binding);
                }
                Binding::BuiltinFn(_) | Binding::BuiltinTy(_) | Binding::Unresolved => {
                    // Plain `=` creates a fresh binding, shadowing builtins.
                    if c.funcs.len() == 1 && c.func().scope_depth == DEPTH_GLOBAL {
                        let global = c.find_or_add_global(&name);
                        c.expression_no_assign();
                        c.emit_byte(Opcode::StoreGlobal, global);
                    } else {
                        c.expression_no_assign();
                        c.declare_local(name);
                        c.stmt_new_local = true;
                    }
                }
            }
            c.stmt_assignment = true;
        }
        Some(AssignKind::Compound(op)) => {
            match binding {
                Binding::Local(_) | Binding::Upvalue(_) | Binding::Global(_) => {
                    c.emit_load(&binding);
                    c.advance();
                    c.expression_no_assign();
                    c.emit_byte(op, 1);
                    c.emit_store(&binding);
                }
                Binding::BuiltinFn(_) | Binding::BuiltinTy(_) => {
                    c.error_semantic(&format!("cannot assign to the builtin '{name}'"));
                    c.advance();
                    c.expression_no_assign();
                }
                Binding::Unresolved => {
                    c.error_semantic(&format!("undefined name '{name}'"));
                    c.advance();
                    c.expression_no_assign();
                }
            }
            c.stmt_assignment = true;
        }
        None => match binding {
            Binding::Unresolved => {
                let in_local_scope = c.funcs.len() > 1 || c.func().scope_depth > DEPTH_GLOBAL;
                if in_local_scope {
                    c.record_forward(name, line);
                } else {
                    c.error_semantic(&format!("undefined name '{name}'"));
                }
            }
            other => c.emit_load(&other),
        },
    }
}

fn self_expr(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    if !c.func().is_method {
        c.error_semantic("'self' can only be used inside a method");
    }
    c.emit(Opcode::PushSelf);
}

fn super_expr(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    if !c.func().is_method {
        c.error_semantic("'super' can only be used inside a method");
    }
    let method_name = if c.match_token(&TokenKind::Dot) {
        c.consume_name("expected a method name after 'super.'")
    } else {
        c.func().name.clone()
    };
    c.consume(&TokenKind::LParen, "expected '(' to call super");
    c.emit(Opcode::PushSelf);
    let argc = argument_list(c);
    let name_idx = c.string_constant(&method_name);
    let line = c.previous.line;
    c.buf().emit_byte_short(Opcode::SuperCall, argc, name_idx, line);
    c.buf().adjust(-i32::from(argc));
}

fn fn_literal(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    c.function_body("(fn)".to_owned(), false, false);
}

fn grouping(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    c.skip_lines();
    c.expression_no_assign();
    c.skip_lines();
    c.consume(&TokenKind::RParen, "expected ')' after the expression");
}

fn list_lit(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let line = c.previous.line;
    let count_at = c.buf().emit_jump_operand(Opcode::PushList, line);
    let mut count: u16 = 0;
    c.skip_lines();
    if !c.check(&TokenKind::RBracket) {
        loop {
            c.expression_no_assign();
            c.emit(Opcode::ListAppend);
            count = count.saturating_add(1);
            c.skip_lines();
            if !c.match_token(&TokenKind::Comma) {
                break;
            }
            c.skip_lines();
            if c.check(&TokenKind::RBracket) {
                break;
            }
        }
    }
    c.consume(&TokenKind::RBracket, "expected ']' to close the list");
    c.buf().patch_short(count_at, count);
}

fn map_lit(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    c.emit(Opcode::PushMap);
    c.skip_lines();
    if !c.check(&TokenKind::RBrace) {
        loop {
            c.expression_no_assign();
            c.consume(&TokenKind::Colon, "expected ':' between map key and value");
            c.skip_lines();
            c.expression_no_assign();
            c.emit(Opcode::MapInsert);
            c.skip_lines();
            if !c.match_token(&TokenKind::Comma) {
                break;
            }
            c.skip_lines();
            if c.check(&TokenKind::RBrace) {
                break;
            }
        }
    }
    c.consume(&TokenKind::RBrace, "expected '}' to close the map");
}

fn call_expr(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let argc = argument_list(c);
    c.emit_call(Opcode::Call, argc);
}

fn argument_list(c: &mut Compiler<'_, '_>) -> u8 {
    let mut argc: usize = 0;
    c.skip_lines();
    if !c.check(&TokenKind::RParen) {
        loop {
            c.expression_no_assign();
            argc += 1;
            if argc > MAX_ARGS {
                c.error_semantic("too many arguments");
                argc = MAX_ARGS;
            }
            c.skip_lines();
            if !c.match_token(&TokenKind::Comma) {
                break;
            }
            c.skip_lines();
        }
    }
    c.consume(&TokenKind::RParen, "expected ')' after the arguments");
    argc as u8
}

fn subscript_expr(c: &mut Compiler<'_, '_>, can_assign: bool) {
    c.expression_no_assign();
    c.consume(&TokenKind::RBracket, "expected ']' after the subscript");

    let assign = if can_assign {
        assignment_kind(&c.current.kind)
    } else {
        None
    };
    match assign {
        Some(AssignKind::Plain) => {
            c.advance();
            c.expression_no_assign();
            c.emit(Opcode::SetSubscript);
            c.stmt_assignment = true;
        }
        Some(AssignKind::Compound(op)) => {
            c.emit(Opcode::GetSubscriptKeep);
            c.advance();
            c.expression_no_assign();
            c.emit_byte(op, 1);
            c.emit(Opcode::SetSubscript);
            c.stmt_assignment = true;
        }
        None => c.emit(Opcode::GetSubscript),
    }
}

fn attrib_expr(c: &mut Compiler<'_, '_>, can_assign: bool) {
    let name = c.consume_name("expected an attribute name after '.'");
    let name_idx = c.string_constant(&name);

    // `obj.m(args)` compiles to a method call rather than an attribute load
    // followed by a plain call.
    if c.check(&TokenKind::LParen) {
        c.advance();
        let argc = argument_list(c);
        let line = c.previous.line;
        c.buf().emit_byte_short(Opcode::MethodCall, argc, name_idx, line);
        c.buf().adjust(-i32::from(argc));
        return;
    }

    let assign = if can_assign {
        assignment_kind(&c.current.kind)
    } else {
        None
    };
    match assign {
        Some(AssignKind::Plain) => {
            c.advance();
            c.expression_no_assign();
            c.emit_short(Opcode::SetAttrib, name_idx);
            c.stmt_assignment = true;
        }
        Some(AssignKind::Compound(op)) => {
            c.emit_short(Opcode::GetAttribKeep, name_idx);
            c.advance();
            c.expression_no_assign();
            c.emit_byte(op, 1);
            c.emit_short(Opcode::SetAttrib, name_idx);
            c.stmt_assignment = true;
        }
        None => c.emit_short(Opcode::GetAttrib, name_idx),
    }
}

fn unary(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let op_token = c.previous.kind.clone();
    c.parse_precedence(Prec::Unary, false);
    match op_token {
        TokenKind::Minus => c.emit(Opcode::Negative),
        TokenKind::Plus => c.emit(Opcode::Positive),
        TokenKind::Bang | TokenKind::Not => c.emit(Opcode::Not),
        TokenKind::Tilde => c.emit(Opcode::BitNot),
        _ => unreachable!("unary rule on a non-unary token"),
    }
}

fn binary(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let op_token = c.previous.kind.clone();
    let rule_prec = rule_of(&op_token).prec;
    // `**` is right-associative; everything else binds left.
    let rhs_prec = if op_token == TokenKind::StarStar {
        rule_prec
    } else {
        rule_prec.stronger()
    };
    c.parse_precedence(rhs_prec, false);

    match op_token {
        TokenKind::Plus => c.emit_byte(Opcode::Add, 0),
        TokenKind::Minus => c.emit_byte(Opcode::Subtract, 0),
        TokenKind::Star => c.emit_byte(Opcode::Multiply, 0),
        TokenKind::Slash => c.emit_byte(Opcode::Divide, 0),
        TokenKind::Percent => c.emit_byte(Opcode::Mod, 0),
        TokenKind::StarStar => c.emit_byte(Opcode::Exponent, 0),
        TokenKind::Amp => c.emit_byte(Opcode::BitAnd, 0),
        TokenKind::Pipe => c.emit_byte(Opcode::BitOr, 0),
        TokenKind::Caret => c.emit_byte(Opcode::BitXor, 0),
        TokenKind::LtLt => c.emit_byte(Opcode::BitLshift, 0),
        TokenKind::GtGt => c.emit_byte(Opcode::BitRshift, 0),
        TokenKind::EqEq => c.emit(Opcode::EqEq),
        TokenKind::NotEq => c.emit(Opcode::NotEq),
        TokenKind::Lt => c.emit(Opcode::Lt),
        TokenKind::LtEq => c.emit(Opcode::LtEq),
        TokenKind::Gt => c.emit(Opcode::Gt),
        TokenKind::GtEq => c.emit(Opcode::GtEq),
        TokenKind::DotDot => c.emit(Opcode::Range),
        TokenKind::In => c.emit(Opcode::In),
        TokenKind::Is => c.emit(Opcode::Is),
        _ => unreachable!("binary rule on a non-binary token"),
    }
}

fn and_expr(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let jump = c.emit_jump(Opcode::And);
    c.parse_precedence(Prec::And.stronger(), false);
    c.patch_jump(jump);
}

fn or_expr(c: &mut Compiler<'_, '_>, _can_assign: bool) {
    let jump = c.emit_jump(Opcode::Or);
    c.parse_precedence(Prec::Or.stronger(), false);
    c.patch_jump(jump);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{run::Config, types::Module};

    fn setup() -> (Vm, HeapId) {
        let mut vm = Vm::new(Config::default());
        let module = vm.alloc(HeapData::Module(Module::new("test".to_owned(), None)));
        vm.modules.insert("test".to_owned(), module);
        (vm, module)
    }

    fn options() -> CompileOptions {
        CompileOptions {
            repl_mode: false,
            debug: false,
            path: "<test>".to_owned(),
        }
    }

    #[test]
    fn failed_parses_roll_back_module_pools() {
        let (mut vm, module) = setup();
        compile(&mut vm, module, "a = 1\nb = 2", options()).unwrap();
        let (constants, globals) = {
            let m = vm.heap.get_module(module);
            (m.constants.len(), m.globals.len())
        };

        let err = compile(&mut vm, module, "c = )", options()).unwrap_err();
        assert!(!err.diagnostics.is_empty());

        let m = vm.heap.get_module(module);
        assert_eq!(m.constants.len(), constants);
        assert_eq!(m.globals.len(), globals);
        assert_eq!(m.global_names.len(), globals);
    }

    #[test]
    fn forward_references_patch_after_the_pass() {
        let (mut vm, module) = setup();
        compile(
            &mut vm,
            module,
            "def f() return g() end\ndef g() return 1 end",
            options(),
        )
        .unwrap();
    }

    #[test]
    fn unresolved_forwards_become_diagnostics() {
        let (mut vm, module) = setup();
        let err = compile(&mut vm, module, "def f() return nope end", options()).unwrap_err();
        assert!(err.diagnostics[0].message.contains("nope"));
    }

    #[test]
    fn local_limit_is_enforced() {
        let (mut vm, module) = setup();
        let mut source = String::from("def f()\n");
        for i in 0..300 {
            source.push_str(&format!("x{i} = {i}\n"));
        }
        source.push_str("end\n");

        let err = compile(&mut vm, module, &source, options()).unwrap_err();
        assert!(err
            .diagnostics
            .iter()
            .any(|d| d.message.contains("too many local")));
    }

    #[test]
    fn repl_mode_compiles_expression_echo() {
        let (mut vm, module) = setup();
        let repl_options = CompileOptions {
            repl_mode: true,
            debug: false,
            path: "<repl>".to_owned(),
        };
        compile(&mut vm, module, "1 + 2", repl_options).unwrap();

        let body = vm.heap.get_module(module).body.expect("body closure");
        let function = vm.heap.get_closure(body).function;
        let code = vm.heap.get_function(function).code();
        assert!(code.code.contains(&(Opcode::ReplPrint as u8)));
    }

    #[test]
    fn plain_runs_pop_expression_results() {
        let (mut vm, module) = setup();
        compile(&mut vm, module, "1 + 2", options()).unwrap();

        let body = vm.heap.get_module(module).body.expect("body closure");
        let function = vm.heap.get_closure(body).function;
        let code = vm.heap.get_function(function).code();
        assert!(!code.code.contains(&(Opcode::ReplPrint as u8)));
    }
}
