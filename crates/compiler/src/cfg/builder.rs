//! Single-pass CFG construction
//!
//! Walks the validated AST once per routine, splitting basic blocks at
//! jump targets and structured-statement boundaries, and populating the
//! symbol table along the way. Jumps are recorded as pending edges and
//! resolved after the walk, when every line has a block.

use crate::ast::{
    DimDecl, Expr, ExitKind, JumpTarget, Param, Program, SourceLocation, Statement, StatementKind,
};
use crate::config::CompilerConfig;
use crate::diag::Diagnostic;
use crate::symbols::{ArrayInfo, ConstValue, FunctionInfo, RecordField, SymbolTable};
use crate::types::{BaseType, TypeDescriptor, descriptor_from_suffix, mangle, split_suffix};
use std::collections::HashSet;
use std::rc::Rc;

use super::{
    BlockId, Cfg, DoLoopInfo, EdgeKind, ForKind, ForLoopInfo, IfTest, ProgramCfg, SelectInfo,
    TryCatchInfo,
};

/// Build the whole unit's CFGs. The symbol table is populated as a side
/// effect; diagnostics cover semantic and CFG-shape errors.
pub fn build_program_cfg<'ast>(
    program: &'ast Program,
    symbols: &mut SymbolTable,
    config: &CompilerConfig,
) -> (ProgramCfg<'ast>, Vec<Diagnostic>) {
    let file = program
        .lines
        .first()
        .map(|l| l.location.file.clone())
        .unwrap_or_default();
    let mut builder = CfgBuilder {
        symbols,
        config,
        diagnostics: Vec::new(),
        functions: Vec::new(),
        file,
    };

    builder.register_for_variables(program);

    let main = builder.build_main(program);
    let functions = std::mem::take(&mut builder.functions);
    let diagnostics = builder.diagnostics;
    (ProgramCfg { main, functions }, diagnostics)
}

struct CfgBuilder<'ast, 'sym> {
    symbols: &'sym mut SymbolTable,
    config: &'sym CompilerConfig,
    diagnostics: Vec<Diagnostic>,
    functions: Vec<Cfg<'ast>>,
    file: std::path::PathBuf,
}

/// What kind of loop a stack frame tracks.
enum FrameKind<'ast> {
    For {
        init: BlockId,
        check: BlockId,
        body: BlockId,
        variable: String,
        statement: &'ast Statement,
        kind: ForKind,
    },
    While {
        header: BlockId,
        body: BlockId,
    },
    Do {
        header: BlockId,
        body: BlockId,
        pretest: bool,
    },
    Repeat {
        header: BlockId,
    },
}

struct LoopFrame<'ast> {
    kind: FrameKind<'ast>,
    /// Blocks that EXIT out of this loop, patched to the exit block
    pending_exits: Vec<BlockId>,
}

struct PendingJump {
    from: BlockId,
    target: JumpTarget,
    kind: EdgeKind,
    location: SourceLocation,
}

/// Why a block eventually flows to the routine exit.
enum ExitReason {
    End,
    Return,
}

/// Per-routine construction state.
struct RoutineCtx<'ast> {
    cfg: Cfg<'ast>,
    current: BlockId,
    terminated: bool,
    current_line: u32,
    /// Maps the next appended statement's line into `line_to_block`
    pending_line: Option<u32>,
    loop_stack: Vec<LoopFrame<'ast>>,
    pending_jumps: Vec<PendingJump>,
    pending_exit_jumps: Vec<(BlockId, ExitReason)>,
    jump_target_lines: HashSet<u32>,
}

impl<'ast> RoutineCtx<'ast> {
    fn new(name: String) -> Self {
        let mut cfg = Cfg {
            name,
            return_type: TypeDescriptor::void(),
            ..Cfg::default()
        };
        let entry = cfg.new_block();
        cfg.entry_block = entry;
        RoutineCtx {
            cfg,
            current: entry,
            terminated: false,
            current_line: 0,
            pending_line: None,
            loop_stack: Vec::new(),
            pending_jumps: Vec::new(),
            pending_exit_jumps: Vec::new(),
            jump_target_lines: HashSet::new(),
        }
    }

    fn scope_owned(&self) -> Option<String> {
        if self.cfg.is_main() {
            None
        } else {
            Some(self.cfg.name.clone())
        }
    }

    fn seq_kind(&self, from: BlockId, to: BlockId) -> EdgeKind {
        if to == from + 1 {
            EdgeKind::Fallthrough
        } else {
            EdgeKind::Unconditional
        }
    }

    /// Append a statement to the current block, opening a fresh
    /// (unreachable) block first if the current one already terminated.
    fn append(&mut self, stmt: &'ast Statement) {
        if self.terminated {
            self.current = self.cfg.new_block();
            self.terminated = false;
        }
        if let Some(line) = self.pending_line.take() {
            self.cfg.line_to_block.entry(line).or_insert(self.current);
        }
        let line = self.current_line;
        let block = &mut self.cfg.blocks[self.current];
        block.statements.push(stmt);
        block.statement_lines.push(line);
        block.source_lines.insert(line);
        if stmt.is_terminator() {
            block.is_terminator = true;
        }
    }

    /// Close the current block with an edge into a new one and make the
    /// new one current.
    fn advance_to(&mut self, next: BlockId, kind: EdgeKind) {
        if !self.terminated {
            self.cfg.add_edge(self.current, next, kind);
        }
        self.current = next;
        self.terminated = false;
    }

    /// New sequential block reached by fallthrough.
    fn start_block(&mut self) -> BlockId {
        let next = self.cfg.new_block();
        let kind = self.seq_kind(self.current, next);
        self.advance_to(next, kind);
        next
    }
}

impl<'ast, 'sym> CfgBuilder<'ast, 'sym> {
    // ---- pre-passes ----

    /// Register every FOR variable (plain-stripped) as a Long counter up
    /// front, so type queries see it consistently even before the loop.
    fn register_for_variables(&mut self, program: &'ast Program) {
        for line in &program.lines {
            for stmt in &line.statements {
                self.register_for_vars_in(stmt, None);
            }
        }
    }

    fn register_for_vars_in(&mut self, stmt: &'ast Statement, scope: Option<&str>) {
        match &stmt.kind {
            StatementKind::For { var, .. } => {
                let (plain, _) = split_suffix(var);
                let _ = self.symbols.declare_variable(
                    scope,
                    plain,
                    TypeDescriptor::new(BaseType::Long),
                    stmt.location.clone(),
                    false,
                );
                self.symbols.register_for_variable(scope, plain);
            }
            StatementKind::If {
                then_stmts,
                elseifs,
                else_stmts,
                ..
            } => {
                for s in then_stmts.iter().chain(else_stmts.iter()) {
                    self.register_for_vars_in(s, scope);
                }
                for (_, body) in elseifs {
                    for s in body {
                        self.register_for_vars_in(s, scope);
                    }
                }
            }
            StatementKind::Select {
                arms, else_body, ..
            } => {
                for arm in arms {
                    for s in &arm.body {
                        self.register_for_vars_in(s, scope);
                    }
                }
                if let Some(body) = else_body {
                    for s in body {
                        self.register_for_vars_in(s, scope);
                    }
                }
            }
            StatementKind::TryCatch {
                body,
                catches,
                finally,
            } => {
                for s in body {
                    self.register_for_vars_in(s, scope);
                }
                for (_, handler) in catches {
                    for s in handler {
                        self.register_for_vars_in(s, scope);
                    }
                }
                if let Some(fin) = finally {
                    for s in fin {
                        self.register_for_vars_in(s, scope);
                    }
                }
            }
            StatementKind::Function { name, body, .. } | StatementKind::Sub { name, body, .. } => {
                let routine = mangle(name);
                for s in body {
                    self.register_for_vars_in(s, Some(&routine));
                }
            }
            _ => {}
        }
    }

    /// Every numeric destination of GOTO/GOSUB/ON/RESTORE starts a block.
    fn collect_jump_target_lines(stmts: impl Iterator<Item = &'ast Statement>, out: &mut HashSet<u32>) {
        for stmt in stmts {
            match &stmt.kind {
                StatementKind::Goto { target }
                | StatementKind::Gosub { target }
                | StatementKind::Restore {
                    target: Some(target),
                } => {
                    if let JumpTarget::Line(n) = target {
                        out.insert(*n);
                    }
                }
                StatementKind::OnGoto { targets, .. } | StatementKind::OnGosub { targets, .. } => {
                    for t in targets {
                        if let JumpTarget::Line(n) = t {
                            out.insert(*n);
                        }
                    }
                }
                StatementKind::If {
                    then_stmts,
                    elseifs,
                    else_stmts,
                    ..
                } => {
                    Self::collect_jump_target_lines(then_stmts.iter(), out);
                    for (_, body) in elseifs {
                        Self::collect_jump_target_lines(body.iter(), out);
                    }
                    Self::collect_jump_target_lines(else_stmts.iter(), out);
                }
                StatementKind::Select {
                    arms, else_body, ..
                } => {
                    for arm in arms {
                        Self::collect_jump_target_lines(arm.body.iter(), out);
                    }
                    if let Some(body) = else_body {
                        Self::collect_jump_target_lines(body.iter(), out);
                    }
                }
                StatementKind::TryCatch {
                    body,
                    catches,
                    finally,
                } => {
                    Self::collect_jump_target_lines(body.iter(), out);
                    for (_, handler) in catches {
                        Self::collect_jump_target_lines(handler.iter(), out);
                    }
                    if let Some(fin) = finally {
                        Self::collect_jump_target_lines(fin.iter(), out);
                    }
                }
                _ => {}
            }
        }
    }

    // ---- routines ----

    fn build_main(&mut self, program: &'ast Program) -> Cfg<'ast> {
        let mut ctx = RoutineCtx::new("main".to_string());
        Self::collect_jump_target_lines(program.statements(), &mut ctx.jump_target_lines);

        for line in &program.lines {
            let line_no = line.effective_line();
            ctx.current_line = line_no;
            ctx.pending_line = Some(line_no);

            if ctx.jump_target_lines.contains(&line_no) {
                let has_statements = !ctx.cfg.blocks[ctx.current].statements.is_empty();
                if has_statements || ctx.terminated {
                    let next = ctx.cfg.new_block();
                    let kind = ctx.seq_kind(ctx.current, next);
                    ctx.advance_to(next, kind);
                }
            }

            for stmt in &line.statements {
                self.build_statement(&mut ctx, stmt);
            }
        }

        self.finish_routine(ctx)
    }

    fn build_routine_body(
        &mut self,
        name: String,
        params: &'ast [Param],
        return_type: TypeDescriptor,
        body: &'ast [Statement],
        location: &SourceLocation,
    ) -> Cfg<'ast> {
        let mut ctx = RoutineCtx::new(name.clone());
        ctx.cfg.return_type = return_type.clone();
        Self::collect_jump_target_lines(body.iter(), &mut ctx.jump_target_lines);

        for param in params {
            let ty = self.descriptor_for_param(param, location);
            ctx.cfg.params.push((mangle(&param.name), ty.clone()));
            if let Err(d) =
                self.symbols
                    .declare_variable(Some(&name), &param.name, ty, location.clone(), false)
            {
                self.diagnostics.push(d);
            }
        }
        // BASIC convention: the function's return value is assigned to a
        // variable named after the function.
        if return_type.base != BaseType::Void {
            let _ = self.symbols.declare_variable(
                Some(&name),
                &name,
                return_type,
                location.clone(),
                false,
            );
        }

        let mut last_line = 0u32;
        for stmt in body {
            let line = stmt.location.line as u32;
            if line != last_line {
                ctx.pending_line = Some(line);
                last_line = line;
                if ctx.jump_target_lines.contains(&line) {
                    let has_statements = !ctx.cfg.blocks[ctx.current].statements.is_empty();
                    if has_statements || ctx.terminated {
                        let next = ctx.cfg.new_block();
                        let kind = ctx.seq_kind(ctx.current, next);
                        ctx.advance_to(next, kind);
                    }
                }
            }
            ctx.current_line = line;
            self.build_statement(&mut ctx, stmt);
        }

        self.finish_routine(ctx)
    }

    fn finish_routine(&mut self, mut ctx: RoutineCtx<'ast>) -> Cfg<'ast> {
        // Unclosed structures
        let frames: Vec<LoopFrame> = ctx.loop_stack.drain(..).collect();
        for frame in frames {
            let what = match frame.kind {
                FrameKind::For { .. } => "FOR without NEXT",
                FrameKind::While { .. } => "WHILE without WEND",
                FrameKind::Do { .. } => "DO without LOOP",
                FrameKind::Repeat { .. } => "REPEAT without UNTIL",
            };
            self.diagnostics.push(Diagnostic::new(
                SourceLocation::new(self.file.clone(), ctx.current_line as usize),
                what,
            ));
        }

        let exit = ctx.cfg.new_block();
        ctx.cfg.exit_block = exit;
        ctx.cfg.blocks[exit].label = Some("exit".to_string());
        if !ctx.terminated {
            let kind = ctx.seq_kind(ctx.current, exit);
            ctx.cfg.add_edge(ctx.current, exit, kind);
        }

        for (block, reason) in ctx.pending_exit_jumps.drain(..) {
            let kind = match reason {
                ExitReason::End => EdgeKind::Unconditional,
                ExitReason::Return => EdgeKind::Return,
            };
            ctx.cfg.add_edge(block, exit, kind);
        }

        let jumps = std::mem::take(&mut ctx.pending_jumps);
        for jump in jumps {
            let target_block = match &jump.target {
                JumpTarget::Line(n) => ctx.cfg.block_for_line_or_next(*n),
                JumpTarget::Label(name) => match ctx.cfg.label_to_block.get(name) {
                    Some(id) => *id,
                    None => {
                        self.diagnostics.push(Diagnostic::new(
                            jump.location.clone(),
                            format!("unknown label '{}'", name),
                        ));
                        ctx.cfg.exit_block
                    }
                },
            };
            ctx.cfg.add_edge_labeled(
                jump.from,
                target_block,
                jump.kind,
                Some(jump.target.to_string()),
            );
            if jump.kind == EdgeKind::Call {
                ctx.cfg.blocks[target_block].is_subroutine = true;
            }
        }

        ctx.cfg
    }

    // ---- statements ----

    fn build_statement(&mut self, ctx: &mut RoutineCtx<'ast>, stmt: &'ast Statement) {
        let scope = ctx.scope_owned();
        let scope = scope.as_deref();
        match &stmt.kind {
            // Declarations feed the symbol table and emit no code
            StatementKind::TypeDecl { name, fields } => {
                let mut record_fields = Vec::new();
                for f in fields {
                    match self
                        .symbols
                        .descriptor_for_type_name(&f.type_name, &stmt.location)
                    {
                        Ok(ty) => record_fields.push(RecordField {
                            name: f.name.clone(),
                            ty,
                        }),
                        Err(d) => self.diagnostics.push(d),
                    }
                }
                if let Err(d) = self.symbols.declare_record(name, record_fields, &stmt.location) {
                    self.diagnostics.push(d);
                }
            }
            StatementKind::Constant { name, value } => {
                let const_value = match value {
                    Expr::Str(s) => Some(ConstValue::Str(s.clone())),
                    other => other.literal_number().map(|v| {
                        if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
                            ConstValue::Int(v as i64)
                        } else {
                            ConstValue::Double(v)
                        }
                    }),
                };
                match const_value {
                    Some(v) => {
                        if let Err(d) = self.symbols.declare_constant(name, v, &stmt.location) {
                            self.diagnostics.push(d);
                        }
                    }
                    None => self.diagnostics.push(Diagnostic::new(
                        stmt.location.clone(),
                        "CONST requires a literal value",
                    )),
                }
            }
            StatementKind::Global { decls } => {
                if scope.is_some() {
                    self.diagnostics.push(Diagnostic::new(
                        stmt.location.clone(),
                        "GLOBAL is only allowed at the top level",
                    ));
                    return;
                }
                for (name, as_type) in decls {
                    let ty = self.descriptor_for_decl(name, as_type.as_deref(), &stmt.location);
                    if let Err(d) =
                        self.symbols
                            .declare_variable(None, name, ty, stmt.location.clone(), true)
                    {
                        self.diagnostics.push(d);
                    }
                }
            }
            StatementKind::Local { decls } => {
                if scope.is_none() {
                    self.diagnostics.push(Diagnostic::new(
                        stmt.location.clone(),
                        "LOCAL is only allowed inside FUNCTION or SUB",
                    ));
                    return;
                }
                for (name, as_type) in decls {
                    let ty = self.descriptor_for_decl(name, as_type.as_deref(), &stmt.location);
                    if let Err(d) =
                        self.symbols
                            .declare_variable(scope, name, ty, stmt.location.clone(), false)
                    {
                        self.diagnostics.push(d);
                    }
                }
            }
            StatementKind::Shared { names } => match scope {
                Some(routine) => {
                    for name in names {
                        if let Err(d) = self.symbols.add_shared(routine, name, &stmt.location) {
                            self.diagnostics.push(d);
                        }
                    }
                }
                None => self.diagnostics.push(Diagnostic::new(
                    stmt.location.clone(),
                    "SHARED is only allowed inside FUNCTION or SUB",
                )),
            },
            StatementKind::Label { name } => {
                let has_statements = !ctx.cfg.blocks[ctx.current].statements.is_empty();
                if has_statements || ctx.terminated {
                    let next = ctx.cfg.new_block();
                    let kind = ctx.seq_kind(ctx.current, next);
                    ctx.advance_to(next, kind);
                }
                ctx.cfg.blocks[ctx.current].label = Some(name.clone());
                ctx.cfg.label_to_block.insert(name.clone(), ctx.current);
                if let Some(line) = ctx.pending_line.take() {
                    ctx.cfg.line_to_block.entry(line).or_insert(ctx.current);
                }
                if let Err(d) =
                    self.symbols
                        .define_label(name, ctx.current_line as usize, &stmt.location)
                {
                    self.diagnostics.push(d);
                }
            }
            StatementKind::Rem | StatementKind::Data { .. } => {
                // DATA is consumed by the preprocessor; REM by nobody
            }

            // Routine definitions switch to a fresh CFG
            StatementKind::Function {
                name,
                params,
                return_type,
                body,
            } => {
                self.build_function(ctx, stmt, name, params, return_type.as_deref(), body, false);
            }
            StatementKind::Sub { name, params, body } => {
                self.build_function(ctx, stmt, name, params, None, body, true);
            }
            StatementKind::Def { name, params, body } => {
                self.build_def(ctx, stmt, name, params, body);
            }

            // Control flow
            StatementKind::If { multiline, .. } => {
                if *multiline {
                    self.build_multiline_if(ctx, stmt);
                } else {
                    self.build_single_line_if(ctx, stmt);
                }
            }
            StatementKind::For { .. } | StatementKind::ForEach { .. } => {
                self.build_for(ctx, stmt);
            }
            StatementKind::Next { var } => self.build_next(ctx, stmt, var.as_deref()),
            StatementKind::While { condition } => {
                self.walk_expr(ctx, condition);
                let header = ctx.start_block();
                ctx.append(stmt);
                ctx.cfg.blocks[header].is_loop_header = true;
                let body = ctx.cfg.new_block();
                ctx.cfg.add_edge(header, body, EdgeKind::Conditional);
                ctx.current = body;
                ctx.terminated = false;
                ctx.loop_stack.push(LoopFrame {
                    kind: FrameKind::While { header, body },
                    pending_exits: Vec::new(),
                });
            }
            StatementKind::Wend => {
                match ctx.loop_stack.pop() {
                    Some(LoopFrame {
                        kind: FrameKind::While { header, body },
                        pending_exits,
                    }) => {
                        if !ctx.terminated {
                            ctx.cfg.add_edge(ctx.current, header, EdgeKind::Unconditional);
                        }
                        let exit = ctx.cfg.new_block();
                        ctx.cfg.add_edge(header, exit, EdgeKind::Conditional);
                        ctx.cfg.blocks[exit].is_loop_exit = true;
                        ctx.cfg.do_loops.insert(
                            header,
                            DoLoopInfo {
                                body_block: body,
                                exit_block: exit,
                            },
                        );
                        for b in pending_exits {
                            ctx.cfg.add_edge(b, exit, EdgeKind::Unconditional);
                        }
                        ctx.current = exit;
                        ctx.terminated = false;
                    }
                    Some(frame) => {
                        ctx.loop_stack.push(frame);
                        self.diagnostics
                            .push(Diagnostic::new(stmt.location.clone(), "WEND without WHILE"));
                    }
                    None => self
                        .diagnostics
                        .push(Diagnostic::new(stmt.location.clone(), "WEND without WHILE")),
                }
            }
            StatementKind::Do { cond } => {
                if let Some((_, expr)) = cond {
                    self.walk_expr(ctx, expr);
                }
                let header = ctx.start_block();
                ctx.append(stmt);
                ctx.cfg.blocks[header].is_loop_header = true;
                let pretest = cond.is_some();
                let body = if pretest {
                    let body = ctx.cfg.new_block();
                    ctx.cfg.add_edge(header, body, EdgeKind::Conditional);
                    ctx.current = body;
                    ctx.terminated = false;
                    body
                } else {
                    header
                };
                ctx.loop_stack.push(LoopFrame {
                    kind: FrameKind::Do {
                        header,
                        body,
                        pretest,
                    },
                    pending_exits: Vec::new(),
                });
            }
            StatementKind::Loop { cond } => self.build_loop_end(ctx, stmt, cond.is_some()),
            StatementKind::Repeat => {
                let header = ctx.start_block();
                ctx.append(stmt);
                ctx.cfg.blocks[header].is_loop_header = true;
                ctx.loop_stack.push(LoopFrame {
                    kind: FrameKind::Repeat { header },
                    pending_exits: Vec::new(),
                });
            }
            StatementKind::Until { condition } => {
                self.walk_expr(ctx, condition);
                match ctx.loop_stack.pop() {
                    Some(LoopFrame {
                        kind: FrameKind::Repeat { header },
                        pending_exits,
                    }) => {
                        ctx.append(stmt);
                        let footer = ctx.current;
                        ctx.cfg.add_edge(footer, header, EdgeKind::Conditional);
                        let exit = ctx.cfg.new_block();
                        ctx.cfg.add_edge(footer, exit, EdgeKind::Conditional);
                        ctx.cfg.blocks[exit].is_loop_exit = true;
                        ctx.cfg.do_loops.insert(
                            footer,
                            DoLoopInfo {
                                body_block: header,
                                exit_block: exit,
                            },
                        );
                        for b in pending_exits {
                            ctx.cfg.add_edge(b, exit, EdgeKind::Unconditional);
                        }
                        ctx.current = exit;
                        ctx.terminated = false;
                    }
                    Some(frame) => {
                        ctx.loop_stack.push(frame);
                        self.diagnostics
                            .push(Diagnostic::new(stmt.location.clone(), "UNTIL without REPEAT"));
                    }
                    None => self
                        .diagnostics
                        .push(Diagnostic::new(stmt.location.clone(), "UNTIL without REPEAT")),
                }
            }
            StatementKind::Select { .. } => self.build_select(ctx, stmt),
            StatementKind::TryCatch { .. } => self.build_try(ctx, stmt),

            StatementKind::Goto { target } => {
                ctx.append(stmt);
                ctx.pending_jumps.push(PendingJump {
                    from: ctx.current,
                    target: target.clone(),
                    kind: EdgeKind::Unconditional,
                    location: stmt.location.clone(),
                });
                ctx.terminated = true;
            }
            StatementKind::Gosub { target } => {
                ctx.append(stmt);
                let from = ctx.current;
                ctx.pending_jumps.push(PendingJump {
                    from,
                    target: target.clone(),
                    kind: EdgeKind::Call,
                    location: stmt.location.clone(),
                });
                ctx.terminated = true;
                let resume = ctx.cfg.new_block();
                ctx.current = resume;
                ctx.terminated = false;
                ctx.cfg.gosub_return_blocks.insert(resume);
                ctx.cfg.gosub_fallthrough.insert(from, resume);
            }
            StatementKind::OnGoto { selector, targets }
            | StatementKind::OnGosub { selector, targets } => {
                self.walk_expr(ctx, selector);
                ctx.append(stmt);
                let from = ctx.current;
                let is_gosub = matches!(stmt.kind, StatementKind::OnGosub { .. });
                for target in targets {
                    ctx.pending_jumps.push(PendingJump {
                        from,
                        target: target.clone(),
                        kind: if is_gosub {
                            EdgeKind::Call
                        } else {
                            EdgeKind::Conditional
                        },
                        location: stmt.location.clone(),
                    });
                }
                // Out-of-range selector falls through
                let resume = ctx.cfg.new_block();
                ctx.cfg.add_edge(from, resume, EdgeKind::Conditional);
                ctx.current = resume;
                ctx.terminated = false;
                ctx.cfg.gosub_fallthrough.insert(from, resume);
                if is_gosub {
                    ctx.cfg.gosub_return_blocks.insert(resume);
                }
            }
            StatementKind::Return => {
                ctx.append(stmt);
                ctx.pending_exit_jumps.push((ctx.current, ExitReason::Return));
                ctx.terminated = true;
            }
            StatementKind::End => {
                ctx.append(stmt);
                ctx.pending_exit_jumps.push((ctx.current, ExitReason::End));
                ctx.terminated = true;
            }
            StatementKind::Throw { code } => {
                self.walk_expr(ctx, code);
                ctx.append(stmt);
                ctx.terminated = true;
            }
            StatementKind::Exit { kind } => {
                ctx.append(stmt);
                self.build_exit(ctx, stmt, *kind);
                ctx.terminated = true;
            }

            // Plain statements: populate symbols and append
            StatementKind::Dim { decls } => {
                self.declare_dim(ctx, stmt, decls, false);
                ctx.append(stmt);
            }
            StatementKind::Redim { decls, .. } => {
                self.declare_dim(ctx, stmt, decls, true);
                ctx.append(stmt);
            }
            StatementKind::Erase { arrays } => {
                for name in arrays {
                    if self.symbols.lookup_array(scope, name).is_none() {
                        self.diagnostics.push(Diagnostic::new(
                            stmt.location.clone(),
                            format!("ERASE of undeclared array '{}'", name),
                        ));
                    }
                }
                ctx.append(stmt);
            }
            StatementKind::Let { target, value } => {
                self.walk_expr(ctx, value);
                for idx in &target.indices {
                    self.walk_expr(ctx, idx);
                }
                if target.indices.is_empty() && target.members.is_empty() {
                    if self.symbols.constant(&target.name).is_some() {
                        self.diagnostics.push(Diagnostic::new(
                            stmt.location.clone(),
                            format!("cannot assign to constant '{}'", target.name),
                        ));
                    } else if !self.symbols.is_array(scope, &target.name) {
                        if let Err(d) = self.symbols.ensure_variable(
                            scope,
                            &target.name,
                            self.config,
                            &stmt.location,
                        ) {
                            self.diagnostics.push(d);
                        }
                    }
                }
                ctx.append(stmt);
            }
            StatementKind::Input { targets, .. } | StatementKind::Read { targets } => {
                for t in targets {
                    for idx in &t.indices {
                        self.walk_expr(ctx, idx);
                    }
                    if t.indices.is_empty()
                        && t.members.is_empty()
                        && !self.symbols.is_array(scope, &t.name)
                    {
                        if let Err(d) =
                            self.symbols
                                .ensure_variable(scope, &t.name, self.config, &stmt.location)
                        {
                            self.diagnostics.push(d);
                        }
                    }
                }
                ctx.append(stmt);
            }
            StatementKind::MidAssign {
                var,
                start,
                length,
                value,
            } => {
                self.walk_expr(ctx, start);
                self.walk_expr(ctx, length);
                self.walk_expr(ctx, value);
                if let Err(d) = self
                    .symbols
                    .ensure_variable(scope, var, self.config, &stmt.location)
                {
                    self.diagnostics.push(d);
                }
                ctx.append(stmt);
            }
            StatementKind::SliceAssign {
                var,
                start,
                end,
                value,
            } => {
                self.walk_expr(ctx, start);
                self.walk_expr(ctx, end);
                self.walk_expr(ctx, value);
                if let Err(d) = self
                    .symbols
                    .ensure_variable(scope, var, self.config, &stmt.location)
                {
                    self.diagnostics.push(d);
                }
                ctx.append(stmt);
            }
            StatementKind::Print { using, items } => {
                if let Some(fmt) = using {
                    self.walk_expr(ctx, fmt);
                }
                for item in items {
                    self.walk_expr(ctx, &item.expr);
                }
                ctx.append(stmt);
            }
            StatementKind::Call { args, .. } => {
                for arg in args {
                    self.walk_expr(ctx, arg);
                }
                ctx.append(stmt);
            }
            StatementKind::Restore { .. } => ctx.append(stmt),
            StatementKind::Cls => ctx.append(stmt),
            StatementKind::Color { fg, bg } => {
                self.walk_expr(ctx, fg);
                self.walk_expr(ctx, bg);
                ctx.append(stmt);
            }
            StatementKind::Locate { row, col } => {
                self.walk_expr(ctx, row);
                self.walk_expr(ctx, col);
                ctx.append(stmt);
            }
            StatementKind::Width { cols } => {
                self.walk_expr(ctx, cols);
                ctx.append(stmt);
            }
        }
    }

    fn build_exit(&mut self, ctx: &mut RoutineCtx<'ast>, stmt: &'ast Statement, kind: ExitKind) {
        match kind {
            ExitKind::Function | ExitKind::Sub => {
                if ctx.cfg.is_main() {
                    self.diagnostics.push(Diagnostic::new(
                        stmt.location.clone(),
                        "EXIT FUNCTION/SUB outside a routine",
                    ));
                } else {
                    ctx.pending_exit_jumps.push((ctx.current, ExitReason::Return));
                }
            }
            ExitKind::For => {
                let current = ctx.current;
                match ctx
                    .loop_stack
                    .iter_mut()
                    .rev()
                    .find(|f| matches!(f.kind, FrameKind::For { .. }))
                {
                    Some(frame) => frame.pending_exits.push(current),
                    None => self.diagnostics.push(Diagnostic::new(
                        stmt.location.clone(),
                        "EXIT FOR outside a FOR loop",
                    )),
                }
            }
            ExitKind::While => {
                let current = ctx.current;
                match ctx
                    .loop_stack
                    .iter_mut()
                    .rev()
                    .find(|f| matches!(f.kind, FrameKind::While { .. }))
                {
                    Some(frame) => frame.pending_exits.push(current),
                    None => self.diagnostics.push(Diagnostic::new(
                        stmt.location.clone(),
                        "EXIT WHILE outside a WHILE loop",
                    )),
                }
            }
            ExitKind::Do => {
                let current = ctx.current;
                match ctx.loop_stack.iter_mut().rev().find(|f| {
                    matches!(f.kind, FrameKind::Do { .. } | FrameKind::Repeat { .. })
                }) {
                    Some(frame) => frame.pending_exits.push(current),
                    None => self.diagnostics.push(Diagnostic::new(
                        stmt.location.clone(),
                        "EXIT DO outside a DO loop",
                    )),
                }
            }
        }
    }

    fn build_loop_end(&mut self, ctx: &mut RoutineCtx<'ast>, stmt: &'ast Statement, has_cond: bool) {
        if let StatementKind::Loop { cond: Some((_, expr)) } = &stmt.kind {
            self.walk_expr(ctx, expr);
        }
        match ctx.loop_stack.pop() {
            Some(LoopFrame {
                kind:
                    FrameKind::Do {
                        header,
                        body,
                        pretest,
                    },
                pending_exits,
            }) => {
                if pretest {
                    if has_cond {
                        self.diagnostics.push(Diagnostic::new(
                            stmt.location.clone(),
                            "DO and LOOP cannot both carry a condition",
                        ));
                    }
                    if !ctx.terminated {
                        ctx.cfg.add_edge(ctx.current, header, EdgeKind::Unconditional);
                    }
                    let exit = ctx.cfg.new_block();
                    ctx.cfg.add_edge(header, exit, EdgeKind::Conditional);
                    ctx.cfg.blocks[exit].is_loop_exit = true;
                    ctx.cfg.do_loops.insert(
                        header,
                        DoLoopInfo {
                            body_block: body,
                            exit_block: exit,
                        },
                    );
                    for b in pending_exits {
                        ctx.cfg.add_edge(b, exit, EdgeKind::Unconditional);
                    }
                    ctx.current = exit;
                    ctx.terminated = false;
                } else if has_cond {
                    // Post-test: the footer block carries the branch
                    ctx.append(stmt);
                    let footer = ctx.current;
                    ctx.cfg.add_edge(footer, header, EdgeKind::Conditional);
                    let exit = ctx.cfg.new_block();
                    ctx.cfg.add_edge(footer, exit, EdgeKind::Conditional);
                    ctx.cfg.blocks[exit].is_loop_exit = true;
                    ctx.cfg.do_loops.insert(
                        footer,
                        DoLoopInfo {
                            body_block: header,
                            exit_block: exit,
                        },
                    );
                    for b in pending_exits {
                        ctx.cfg.add_edge(b, exit, EdgeKind::Unconditional);
                    }
                    ctx.current = exit;
                    ctx.terminated = false;
                } else {
                    // Unconditional DO ... LOOP; only EXIT DO leaves
                    if !ctx.terminated {
                        ctx.cfg.add_edge(ctx.current, header, EdgeKind::Unconditional);
                    }
                    let exit = ctx.cfg.new_block();
                    ctx.cfg.blocks[exit].is_loop_exit = true;
                    for b in pending_exits {
                        ctx.cfg.add_edge(b, exit, EdgeKind::Unconditional);
                    }
                    ctx.current = exit;
                    ctx.terminated = false;
                }
            }
            Some(frame) => {
                ctx.loop_stack.push(frame);
                self.diagnostics
                    .push(Diagnostic::new(stmt.location.clone(), "LOOP without DO"));
            }
            None => self
                .diagnostics
                .push(Diagnostic::new(stmt.location.clone(), "LOOP without DO")),
        }
    }

    fn build_for(&mut self, ctx: &mut RoutineCtx<'ast>, stmt: &'ast Statement) {
        let scope = ctx.scope_owned();
        let scope = scope.as_deref();
        let (var, kind) = match &stmt.kind {
            StatementKind::For {
                var,
                start,
                end,
                step,
            } => {
                self.walk_expr(ctx, start);
                self.walk_expr(ctx, end);
                if let Some(s) = step {
                    self.walk_expr(ctx, s);
                }
                (var.clone(), ForKind::Counted)
            }
            StatementKind::ForEach { var, array } => {
                // The loop variable carries the array's element type
                match self.symbols.array_element_type(scope, array) {
                    Some(elem_ty) => {
                        if let Err(d) = self.symbols.declare_variable(
                            scope,
                            var,
                            elem_ty,
                            stmt.location.clone(),
                            false,
                        ) {
                            self.diagnostics.push(d);
                        }
                    }
                    None => self.diagnostics.push(Diagnostic::new(
                        stmt.location.clone(),
                        format!("FOR EACH over undeclared array '{}'", array),
                    )),
                }
                (var.clone(), ForKind::ForEach)
            }
            _ => unreachable!("build_for on a non-FOR statement"),
        };

        // The suffixed mirror variable, when the source spells one
        let (_, suffix) = split_suffix(&var);
        if suffix.is_some() {
            if let Err(d) = self
                .symbols
                .ensure_variable(scope, &var, self.config, &stmt.location)
            {
                self.diagnostics.push(d);
            }
        }

        ctx.append(stmt);
        let init = ctx.current;
        let check = ctx.cfg.new_block();
        let kind_edge = ctx.seq_kind(init, check);
        ctx.advance_to(check, kind_edge);
        ctx.cfg.blocks[check].is_loop_header = true;
        let body = ctx.cfg.new_block();
        ctx.cfg.add_edge(check, body, EdgeKind::Conditional);
        ctx.current = body;
        ctx.terminated = false;
        ctx.loop_stack.push(LoopFrame {
            kind: FrameKind::For {
                init,
                check,
                body,
                variable: var,
                statement: stmt,
                kind,
            },
            pending_exits: Vec::new(),
        });
    }

    fn build_next(&mut self, ctx: &mut RoutineCtx<'ast>, stmt: &'ast Statement, var: Option<&str>) {
        match ctx.loop_stack.pop() {
            Some(LoopFrame {
                kind:
                    FrameKind::For {
                        init,
                        check,
                        body,
                        variable,
                        statement,
                        kind,
                    },
                pending_exits,
            }) => {
                if let Some(named) = var {
                    if !named.eq_ignore_ascii_case(&variable) {
                        self.diagnostics.push(Diagnostic::new(
                            stmt.location.clone(),
                            format!("NEXT {} does not match FOR {}", named, variable),
                        ));
                    }
                }
                ctx.append(stmt);
                if !ctx.terminated {
                    ctx.cfg.add_edge(ctx.current, check, EdgeKind::Unconditional);
                }
                let exit = ctx.cfg.new_block();
                ctx.cfg.add_edge(check, exit, EdgeKind::Conditional);
                ctx.cfg.blocks[exit].is_loop_exit = true;
                for b in pending_exits {
                    ctx.cfg.add_edge(b, exit, EdgeKind::Unconditional);
                }
                ctx.cfg.for_loops.insert(
                    init,
                    ForLoopInfo {
                        kind,
                        check_block: check,
                        body_block: body,
                        exit_block: exit,
                        variable,
                        statement,
                    },
                );
                ctx.current = exit;
                ctx.terminated = false;
            }
            Some(frame) => {
                ctx.loop_stack.push(frame);
                self.diagnostics
                    .push(Diagnostic::new(stmt.location.clone(), "NEXT without FOR"));
            }
            None => self
                .diagnostics
                .push(Diagnostic::new(stmt.location.clone(), "NEXT without FOR")),
        }
    }

    fn build_multiline_if(&mut self, ctx: &mut RoutineCtx<'ast>, stmt: &'ast Statement) {
        let StatementKind::If {
            condition,
            then_stmts,
            elseifs,
            else_stmts,
            ..
        } = &stmt.kind
        else {
            unreachable!("build_multiline_if on a non-IF statement");
        };

        self.walk_expr(ctx, condition);
        ctx.append(stmt);
        let mut test_block = ctx.current;
        let mut test_cond: &'ast Expr = condition;
        // Every body's last block jumps to the merge once it exists
        let mut body_ends: Vec<BlockId> = Vec::new();

        // THEN body
        let then_block = ctx.cfg.new_block();
        ctx.cfg.add_edge(test_block, then_block, EdgeKind::Conditional);
        ctx.current = then_block;
        ctx.terminated = false;
        for s in then_stmts {
            self.build_statement(ctx, s);
        }
        if !ctx.terminated {
            body_ends.push(ctx.current);
        }
        let mut pending_tests: Vec<(BlockId, &'ast Expr, BlockId)> =
            vec![(test_block, test_cond, then_block)];

        for (cond, body) in elseifs {
            self.walk_expr(ctx, cond);
            let elseif_test = ctx.cfg.new_block();
            ctx.cfg.add_edge(test_block, elseif_test, EdgeKind::Conditional);
            // The previous test's miss target is this elseif test
            let prev = pending_tests.pop().unwrap();
            ctx.cfg.if_tests.insert(
                prev.0,
                IfTest {
                    condition: prev.1,
                    then_block: prev.2,
                    else_block: elseif_test,
                },
            );
            test_block = elseif_test;
            test_cond = cond;

            let body_block = ctx.cfg.new_block();
            ctx.cfg.add_edge(test_block, body_block, EdgeKind::Conditional);
            ctx.current = body_block;
            ctx.terminated = false;
            for s in body {
                self.build_statement(ctx, s);
            }
            if !ctx.terminated {
                body_ends.push(ctx.current);
            }
            pending_tests.push((test_block, test_cond, body_block));
        }

        // ELSE body or straight to merge
        let else_target = if else_stmts.is_empty() {
            None
        } else {
            let else_block = ctx.cfg.new_block();
            ctx.cfg.add_edge(test_block, else_block, EdgeKind::Conditional);
            ctx.current = else_block;
            ctx.terminated = false;
            for s in else_stmts {
                self.build_statement(ctx, s);
            }
            if !ctx.terminated {
                body_ends.push(ctx.current);
            }
            Some(else_block)
        };

        let merge = ctx.cfg.new_block();
        let last = pending_tests.pop().unwrap();
        let miss = else_target.unwrap_or(merge);
        if else_target.is_none() {
            ctx.cfg.add_edge(last.0, merge, EdgeKind::Conditional);
        }
        ctx.cfg.if_tests.insert(
            last.0,
            IfTest {
                condition: last.1,
                then_block: last.2,
                else_block: miss,
            },
        );
        for b in body_ends {
            let kind = if merge == b + 1 {
                EdgeKind::Fallthrough
            } else {
                EdgeKind::Unconditional
            };
            ctx.cfg.add_edge(b, merge, kind);
        }
        ctx.current = merge;
        ctx.terminated = false;
    }

    /// A single-line IF stays inline in its block; only nested jumps and
    /// GOSUB resume points need CFG bookkeeping.
    fn build_single_line_if(&mut self, ctx: &mut RoutineCtx<'ast>, stmt: &'ast Statement) {
        let StatementKind::If {
            condition,
            then_stmts,
            else_stmts,
            ..
        } = &stmt.kind
        else {
            unreachable!("build_single_line_if on a non-IF statement");
        };

        self.walk_expr(ctx, condition);
        ctx.append(stmt);
        let if_block = ctx.current;

        let mut has_gosub = false;
        for nested in then_stmts.iter().chain(else_stmts.iter()) {
            match &nested.kind {
                StatementKind::Goto { target } => {
                    ctx.pending_jumps.push(PendingJump {
                        from: if_block,
                        target: target.clone(),
                        kind: EdgeKind::Conditional,
                        location: nested.location.clone(),
                    });
                }
                StatementKind::Gosub { target } => {
                    has_gosub = true;
                    ctx.pending_jumps.push(PendingJump {
                        from: if_block,
                        target: target.clone(),
                        kind: EdgeKind::Call,
                        location: nested.location.clone(),
                    });
                }
                StatementKind::Return => {
                    ctx.pending_exit_jumps.push((if_block, ExitReason::Return));
                }
                StatementKind::End => {
                    ctx.pending_exit_jumps.push((if_block, ExitReason::End));
                }
                StatementKind::Exit { kind } => {
                    self.build_exit(ctx, nested, *kind);
                }
                _ => self.walk_inline_stmt_exprs(ctx, nested),
            }
        }

        if has_gosub {
            // RETURN resumes at the block right after this one
            let resume = ctx.start_block();
            ctx.cfg.gosub_return_blocks.insert(resume);
            ctx.cfg.gosub_fallthrough.insert(if_block, resume);
        }
    }

    fn build_select(&mut self, ctx: &mut RoutineCtx<'ast>, stmt: &'ast Statement) {
        let StatementKind::Select {
            selector,
            arms,
            else_body,
        } = &stmt.kind
        else {
            unreachable!("build_select on a non-SELECT statement");
        };

        self.walk_expr(ctx, selector);
        for arm in arms {
            for test in &arm.tests {
                match test {
                    crate::ast::CaseTest::Value(e) => self.walk_expr(ctx, e),
                    crate::ast::CaseTest::Range(lo, hi) => {
                        self.walk_expr(ctx, lo);
                        self.walk_expr(ctx, hi);
                    }
                    crate::ast::CaseTest::Relational(_, e) => self.walk_expr(ctx, e),
                }
            }
        }

        ctx.append(stmt);
        let select_block = ctx.current;
        let mut test_blocks = Vec::with_capacity(arms.len());
        let mut body_blocks = Vec::with_capacity(arms.len());
        let mut body_ends: Vec<BlockId> = Vec::new();
        let mut prev_test: Option<BlockId> = None;

        for arm in arms {
            let test = ctx.cfg.new_block();
            match prev_test {
                None => ctx.cfg.add_edge(select_block, test, EdgeKind::Unconditional),
                Some(prev) => ctx.cfg.add_edge(prev, test, EdgeKind::Conditional),
            }
            test_blocks.push(test);

            let body = ctx.cfg.new_block();
            ctx.cfg.add_edge(test, body, EdgeKind::Conditional);
            body_blocks.push(body);
            ctx.current = body;
            ctx.terminated = false;
            for s in &arm.body {
                self.build_statement(ctx, s);
            }
            if !ctx.terminated {
                body_ends.push(ctx.current);
            }
            prev_test = Some(test);
        }

        let else_block = match else_body {
            Some(body) => {
                let block = ctx.cfg.new_block();
                if let Some(prev) = prev_test {
                    ctx.cfg.add_edge(prev, block, EdgeKind::Conditional);
                } else {
                    ctx.cfg.add_edge(select_block, block, EdgeKind::Unconditional);
                }
                ctx.current = block;
                ctx.terminated = false;
                for s in body {
                    self.build_statement(ctx, s);
                }
                if !ctx.terminated {
                    body_ends.push(ctx.current);
                }
                Some(block)
            }
            None => None,
        };

        let exit = ctx.cfg.new_block();
        if else_block.is_none() {
            match prev_test {
                Some(prev) => ctx.cfg.add_edge(prev, exit, EdgeKind::Conditional),
                None => ctx.cfg.add_edge(select_block, exit, EdgeKind::Unconditional),
            }
        }
        for b in body_ends {
            let kind = if exit == b + 1 {
                EdgeKind::Fallthrough
            } else {
                EdgeKind::Unconditional
            };
            ctx.cfg.add_edge(b, exit, kind);
        }

        let info = Rc::new(SelectInfo {
            select_block,
            test_blocks: test_blocks.clone(),
            body_blocks,
            else_block,
            exit_block: exit,
            statement: stmt,
        });
        ctx.cfg.selects.insert(select_block, Rc::clone(&info));
        for test in test_blocks {
            ctx.cfg.selects.insert(test, Rc::clone(&info));
        }

        ctx.current = exit;
        ctx.terminated = false;
    }

    fn build_try(&mut self, ctx: &mut RoutineCtx<'ast>, stmt: &'ast Statement) {
        let StatementKind::TryCatch {
            body,
            catches,
            finally,
        } = &stmt.kind
        else {
            unreachable!("build_try on a non-TRY statement");
        };

        ctx.append(stmt);
        let try_block = ctx.current;

        let body_block = ctx.cfg.new_block();
        ctx.cfg.add_edge(try_block, body_block, EdgeKind::Conditional);
        ctx.current = body_block;
        ctx.terminated = false;
        for s in body {
            self.build_statement(ctx, s);
        }
        let mut joiners: Vec<BlockId> = Vec::new();
        if !ctx.terminated {
            joiners.push(ctx.current);
        }
        let body_exit_blocks = joiners.clone();

        let dispatch = ctx.cfg.new_block();
        ctx.cfg.add_edge(try_block, dispatch, EdgeKind::Conditional);

        let mut catch_blocks = Vec::with_capacity(catches.len());
        for (code, handler) in catches {
            let block = ctx.cfg.new_block();
            ctx.cfg.add_edge(dispatch, block, EdgeKind::Conditional);
            catch_blocks.push((*code, block));
            ctx.current = block;
            ctx.terminated = false;
            for s in handler {
                self.build_statement(ctx, s);
            }
            if !ctx.terminated {
                joiners.push(ctx.current);
            }
        }

        let finally_block = match finally {
            Some(fin) => {
                let block = ctx.cfg.new_block();
                for b in joiners.drain(..) {
                    let kind = if block == b + 1 {
                        EdgeKind::Fallthrough
                    } else {
                        EdgeKind::Unconditional
                    };
                    ctx.cfg.add_edge(b, block, kind);
                }
                ctx.current = block;
                ctx.terminated = false;
                for s in fin {
                    self.build_statement(ctx, s);
                }
                if !ctx.terminated {
                    joiners.push(ctx.current);
                }
                Some(block)
            }
            None => None,
        };

        let exit = ctx.cfg.new_block();
        for b in joiners {
            let kind = if exit == b + 1 {
                EdgeKind::Fallthrough
            } else {
                EdgeKind::Unconditional
            };
            ctx.cfg.add_edge(b, exit, kind);
        }
        // An unmatched code re-raises out of the dispatcher; the edge to
        // the exit keeps the graph connected for analyses.
        ctx.cfg.add_edge(dispatch, exit, EdgeKind::Conditional);

        let info = Rc::new(TryCatchInfo {
            try_body_block: body_block,
            dispatch_block: dispatch,
            catch_blocks,
            finally_block,
            exit_block: exit,
            body_exit_blocks,
            statement: stmt,
        });
        ctx.cfg.try_catches.insert(try_block, Rc::clone(&info));
        ctx.cfg.try_catches.insert(dispatch, info);

        ctx.current = exit;
        ctx.terminated = false;
    }

    fn build_function(
        &mut self,
        ctx: &mut RoutineCtx<'ast>,
        stmt: &'ast Statement,
        name: &str,
        params: &'ast [Param],
        return_type_name: Option<&str>,
        body: &'ast [Statement],
        is_sub: bool,
    ) {
        if !ctx.cfg.is_main() {
            self.diagnostics.push(Diagnostic::new(
                stmt.location.clone(),
                "routine definitions cannot nest",
            ));
            return;
        }
        let mangled = mangle(name);
        let return_type = if is_sub {
            TypeDescriptor::void()
        } else {
            self.return_type_for(name, return_type_name, &stmt.location)
        };
        let param_types: Vec<(String, TypeDescriptor)> = params
            .iter()
            .map(|p| (p.name.clone(), self.descriptor_for_param(p, &stmt.location)))
            .collect();
        if let Err(d) = self.symbols.declare_function(
            name,
            FunctionInfo {
                return_type: return_type.clone(),
                params: param_types,
                is_sub,
            },
            &stmt.location,
        ) {
            self.diagnostics.push(d);
        }

        let cfg = self.build_routine_body(mangled, params, return_type, body, &stmt.location);
        self.functions.push(cfg);
    }

    fn build_def(
        &mut self,
        ctx: &mut RoutineCtx<'ast>,
        stmt: &'ast Statement,
        name: &str,
        params: &'ast [Param],
        body_expr: &'ast Expr,
    ) {
        if !ctx.cfg.is_main() {
            self.diagnostics.push(Diagnostic::new(
                stmt.location.clone(),
                "DEF FN is only allowed at the top level",
            ));
            return;
        }
        let mangled = mangle(name);
        let return_type = self.return_type_for(name, None, &stmt.location);
        let param_types: Vec<(String, TypeDescriptor)> = params
            .iter()
            .map(|p| (p.name.clone(), self.descriptor_for_param(p, &stmt.location)))
            .collect();
        if let Err(d) = self.symbols.declare_function(
            name,
            FunctionInfo {
                return_type: return_type.clone(),
                params: param_types,
                is_sub: false,
            },
            &stmt.location,
        ) {
            self.diagnostics.push(d);
        }

        let mut cfg = Cfg {
            name: mangled.clone(),
            return_type: return_type.clone(),
            def_statement: Some(stmt),
            ..Cfg::default()
        };
        let entry = cfg.new_block();
        cfg.entry_block = entry;
        let exit = cfg.new_block();
        cfg.exit_block = exit;
        cfg.add_edge(entry, exit, EdgeKind::Fallthrough);
        for param in params {
            let ty = self.descriptor_for_param(param, &stmt.location);
            cfg.params.push((mangle(&param.name), ty.clone()));
            if let Err(d) = self.symbols.declare_variable(
                Some(&mangled),
                &param.name,
                ty,
                stmt.location.clone(),
                false,
            ) {
                self.diagnostics.push(d);
            }
        }
        self.walk_expr_scoped(Some(&mangled), body_expr, &stmt.location);
        self.functions.push(cfg);
    }

    // ---- declarations ----

    fn descriptor_for_decl(
        &mut self,
        name: &str,
        as_type: Option<&str>,
        loc: &SourceLocation,
    ) -> TypeDescriptor {
        if let Some(type_name) = as_type {
            match self.symbols.descriptor_for_type_name(type_name, loc) {
                Ok(ty) => return ty,
                Err(d) => {
                    self.diagnostics.push(d);
                    return self.config.default_numeric_type();
                }
            }
        }
        let (_, suffix) = split_suffix(name);
        suffix
            .and_then(descriptor_from_suffix)
            .unwrap_or_else(|| self.config.default_numeric_type())
    }

    fn descriptor_for_param(&mut self, param: &Param, loc: &SourceLocation) -> TypeDescriptor {
        self.descriptor_for_decl(&param.name, param.as_type.as_deref(), loc)
    }

    fn return_type_for(
        &mut self,
        name: &str,
        as_type: Option<&str>,
        loc: &SourceLocation,
    ) -> TypeDescriptor {
        self.descriptor_for_decl(name, as_type, loc)
    }

    fn declare_dim(
        &mut self,
        ctx: &mut RoutineCtx<'ast>,
        stmt: &'ast Statement,
        decls: &'ast [DimDecl],
        redim: bool,
    ) {
        let scope = ctx.scope_owned();
        let scope = scope.as_deref();
        for decl in decls {
            for range in &decl.bounds {
                if let Some(lo) = &range.lower {
                    self.walk_expr(ctx, lo);
                }
                self.walk_expr(ctx, &range.upper);
            }
            if decl.bounds.is_empty() {
                if redim {
                    self.diagnostics.push(Diagnostic::new(
                        stmt.location.clone(),
                        format!("REDIM of scalar '{}'", decl.name),
                    ));
                    continue;
                }
                let ty = self.descriptor_for_decl(&decl.name, decl.as_type.as_deref(), &stmt.location);
                if let Err(d) = self.symbols.declare_variable(
                    scope,
                    &decl.name,
                    ty,
                    stmt.location.clone(),
                    false,
                ) {
                    self.diagnostics.push(d);
                }
                continue;
            }
            if decl.bounds.len() > 2 {
                self.diagnostics.push(Diagnostic::new(
                    stmt.location.clone(),
                    format!("array '{}' has more than two dimensions", decl.name),
                ));
                continue;
            }
            if redim && self.symbols.lookup_array(scope, &decl.name).is_some() {
                // REDIM of a known array keeps its declared element type
                continue;
            }
            let element_type =
                self.descriptor_for_decl(&decl.name, decl.as_type.as_deref(), &stmt.location);
            let declared_bounds = decl
                .bounds
                .iter()
                .map(|r| {
                    (
                        r.lower
                            .as_ref()
                            .and_then(|e| e.literal_number())
                            .map(|v| v as i64)
                            .or(Some(0)),
                        r.upper.literal_number().map(|v| v as i64),
                    )
                })
                .collect();
            if let Err(d) = self.symbols.declare_array(
                scope,
                &decl.name,
                ArrayInfo {
                    element_type,
                    dimensions: decl.bounds.len(),
                    declared_bounds,
                    declared_at: stmt.location.clone(),
                },
            ) {
                self.diagnostics.push(d);
            }
        }
    }

    // ---- implicit declarations ----

    /// Expression walking for statements kept inline in a block (the
    /// bodies of single-line IFs): no CFG effects, just symbol
    /// population.
    fn walk_inline_stmt_exprs(&mut self, ctx: &mut RoutineCtx<'ast>, stmt: &'ast Statement) {
        let scope = ctx.scope_owned();
        let scope = scope.as_deref();
        match &stmt.kind {
            StatementKind::Let { target, value } => {
                self.walk_expr(ctx, value);
                for idx in &target.indices {
                    self.walk_expr(ctx, idx);
                }
                if target.indices.is_empty()
                    && target.members.is_empty()
                    && !self.symbols.is_array(scope, &target.name)
                    && self.symbols.constant(&target.name).is_none()
                {
                    if let Err(d) =
                        self.symbols
                            .ensure_variable(scope, &target.name, self.config, &stmt.location)
                    {
                        self.diagnostics.push(d);
                    }
                }
            }
            StatementKind::Print { using, items } => {
                if let Some(fmt) = using {
                    self.walk_expr(ctx, fmt);
                }
                for item in items {
                    self.walk_expr(ctx, &item.expr);
                }
            }
            StatementKind::Input { targets, .. } | StatementKind::Read { targets } => {
                for t in targets {
                    for idx in &t.indices {
                        self.walk_expr(ctx, idx);
                    }
                    if t.indices.is_empty()
                        && t.members.is_empty()
                        && !self.symbols.is_array(scope, &t.name)
                    {
                        if let Err(d) =
                            self.symbols
                                .ensure_variable(scope, &t.name, self.config, &stmt.location)
                        {
                            self.diagnostics.push(d);
                        }
                    }
                }
            }
            StatementKind::Call { args, .. } => {
                for arg in args {
                    self.walk_expr(ctx, arg);
                }
            }
            StatementKind::Throw { code } => self.walk_expr(ctx, code),
            StatementKind::Color { fg, bg } => {
                self.walk_expr(ctx, fg);
                self.walk_expr(ctx, bg);
            }
            StatementKind::Locate { row, col } => {
                self.walk_expr(ctx, row);
                self.walk_expr(ctx, col);
            }
            StatementKind::Width { cols } => self.walk_expr(ctx, cols),
            StatementKind::MidAssign {
                var,
                start,
                length,
                value,
            } => {
                self.walk_expr(ctx, start);
                self.walk_expr(ctx, length);
                self.walk_expr(ctx, value);
                let loc = stmt.location.clone();
                if let Err(d) = self.symbols.ensure_variable(scope, var, self.config, &loc) {
                    self.diagnostics.push(d);
                }
            }
            _ => {}
        }
    }

    fn walk_expr(&mut self, ctx: &mut RoutineCtx<'ast>, expr: &'ast Expr) {
        let scope = ctx.scope_owned();
        let loc = SourceLocation::new(self.file.clone(), ctx.current_line as usize);
        self.walk_expr_scoped(scope.as_deref(), expr, &loc);
    }

    fn walk_expr_scoped(&mut self, scope: Option<&str>, expr: &'ast Expr, loc: &SourceLocation) {
        match expr {
            Expr::Number(_) | Expr::Str(_) => {}
            Expr::Variable(name) => {
                if self.symbols.constant(name).is_some() || self.symbols.is_array(scope, name) {
                    return;
                }
                if let Err(d) = self.symbols.ensure_variable(scope, name, self.config, loc) {
                    self.diagnostics.push(d);
                }
            }
            Expr::Binary { lhs, rhs, .. } => {
                self.walk_expr_scoped(scope, lhs, loc);
                self.walk_expr_scoped(scope, rhs, loc);
            }
            Expr::Unary { operand, .. } => self.walk_expr_scoped(scope, operand, loc),
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    self.walk_expr_scoped(scope, arg, loc);
                }
            }
            Expr::ArrayAccess { indices, .. } => {
                for idx in indices {
                    self.walk_expr_scoped(scope, idx, loc);
                }
            }
            Expr::MemberAccess { object, .. } => {
                // The base of a member chain must be declared by DIM AS;
                // only composite bases are walked further.
                if !matches!(**object, Expr::Variable(_)) {
                    self.walk_expr_scoped(scope, object, loc);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::EdgeKind;
    use crate::parser::Parser;

    fn build(src: &str) -> (crate::cfg::ProgramCfg<'static>, SymbolTable) {
        // Tests leak the program so the CFG's AST references live long
        // enough to inspect.
        let (program, diags) = Parser::new(src, "t.bas").parse();
        assert!(diags.is_empty(), "parse: {:?}", diags);
        let program: &'static crate::ast::Program = Box::leak(Box::new(program));
        let mut symbols = SymbolTable::new();
        let config = CompilerConfig::default();
        let (cfg, diags) = build_program_cfg(program, &mut symbols, &config);
        assert!(diags.is_empty(), "cfg: {:?}", diags);
        (cfg, symbols)
    }

    #[test]
    fn test_straight_line_is_one_block() {
        let (pcfg, _) = build("X = 1\nY = 2\nPRINT X\n");
        // Entry block plus exit
        assert_eq!(pcfg.main.blocks.len(), 2);
        assert_eq!(pcfg.main.blocks[0].statements.len(), 3);
        assert_eq!(pcfg.main.blocks[0].successors, vec![pcfg.main.exit_block]);
    }

    #[test]
    fn test_goto_target_starts_block() {
        let (pcfg, _) = build("10 PRINT 1\n20 GOTO 40\n30 PRINT 2\n40 PRINT 3\n");
        let main = &pcfg.main;
        let target = main.block_for_line(40).expect("line 40 mapped");
        // The GOTO block jumps straight to line 40's block
        let goto_block = main.block_for_line(20).unwrap();
        assert!(main.blocks[goto_block].successors.contains(&target));
        assert!(
            main.edges
                .iter()
                .any(|e| e.target == target && e.kind == EdgeKind::Unconditional)
        );
    }

    #[test]
    fn test_goto_missing_line_lands_on_next() {
        let (pcfg, _) = build("10 GOTO 25\n20 PRINT 1\n30 PRINT 2\n");
        let main = &pcfg.main;
        assert_eq!(main.block_for_line_or_next(25), main.block_for_line(30).unwrap());
        assert_eq!(main.block_for_line_or_next(99), main.exit_block);
    }

    #[test]
    fn test_for_loop_structure() {
        let (pcfg, _) = build("FOR I = 1 TO 3\nPRINT I\nNEXT I\n");
        let main = &pcfg.main;
        assert_eq!(main.for_loops.len(), 1);
        let (init, info) = main.for_loops.iter().next().unwrap();
        assert_eq!(info.variable, "I");
        assert_eq!(info.kind, ForKind::Counted);
        // init -> check -> body -> back to check; check -> exit
        assert!(main.blocks[*init].successors.contains(&info.check_block));
        assert!(main.blocks[info.check_block].is_loop_header);
        assert!(main.blocks[info.check_block].successors.contains(&info.body_block));
        assert!(main.blocks[info.check_block].successors.contains(&info.exit_block));
        assert!(main.blocks[info.body_block].successors.contains(&info.check_block));
        assert!(main.blocks[info.exit_block].is_loop_exit);
        // The check block is empty; the emitter synthesizes its test
        assert!(main.blocks[info.check_block].statements.is_empty());
        assert!(main.for_info_by_check(info.check_block).is_some());
    }

    #[test]
    fn test_for_variable_registered_long() {
        let (_, symbols) = build("FOR I = 1 TO 3\nNEXT I\n");
        assert!(symbols.is_for_variable(None, "I"));
        assert_eq!(
            symbols.variable_type(None, "I").unwrap().base,
            crate::types::BaseType::Long
        );
    }

    #[test]
    fn test_gosub_records_return_block() {
        let (pcfg, _) = build("10 GOSUB 100\n20 PRINT 1\n30 END\n100 PRINT 2\n110 RETURN\n");
        let main = &pcfg.main;
        assert_eq!(main.gosub_return_blocks.len(), 1);
        let gosub_block = main.block_for_line(10).unwrap();
        let resume = main.gosub_fallthrough[&gosub_block];
        assert!(main.gosub_return_blocks.contains(&resume));
        // Line 20 lives in the resume block
        assert_eq!(main.block_for_line(20).unwrap(), resume);
        // Call edge to the subroutine target
        let target = main.block_for_line(100).unwrap();
        assert!(main.blocks[target].is_subroutine);
        assert!(
            main.edges
                .iter()
                .any(|e| e.source == gosub_block && e.target == target && e.kind == EdgeKind::Call)
        );
    }

    #[test]
    fn test_multiline_if_shape() {
        let (pcfg, _) = build("IF X > 1 THEN\nPRINT 1\nELSE\nPRINT 2\nEND IF\nPRINT 3\n");
        let main = &pcfg.main;
        assert_eq!(main.if_tests.len(), 1);
        let (test_block, test) = main.if_tests.iter().next().unwrap();
        assert!(main.blocks[*test_block].successors.contains(&test.then_block));
        assert!(main.blocks[*test_block].successors.contains(&test.else_block));
        assert_ne!(test.then_block, test.else_block);
    }

    #[test]
    fn test_elseif_chain() {
        let (pcfg, _) =
            build("IF X = 1 THEN\nPRINT 1\nELSEIF X = 2 THEN\nPRINT 2\nELSE\nPRINT 3\nEND IF\n");
        assert_eq!(pcfg.main.if_tests.len(), 2);
    }

    #[test]
    fn test_select_structure() {
        let (pcfg, _) = build(
            "SELECT CASE N\nCASE 1\nPRINT 1\nCASE 2, 3\nPRINT 2\nCASE ELSE\nPRINT 9\nEND SELECT\n",
        );
        let main = &pcfg.main;
        let info = main
            .selects
            .values()
            .next()
            .expect("select info registered");
        assert_eq!(info.test_blocks.len(), 2);
        assert_eq!(info.body_blocks.len(), 2);
        assert!(info.else_block.is_some());
        // Every test block is empty and shares the same info record
        for t in &info.test_blocks {
            assert!(main.blocks[*t].statements.is_empty());
            assert!(main.selects.contains_key(t));
        }
        // Bodies merge at the exit
        for b in &info.body_blocks {
            assert!(main.blocks[*b].successors.contains(&info.exit_block));
        }
    }

    #[test]
    fn test_try_structure() {
        let (pcfg, _) =
            build("TRY\nTHROW 7\nCATCH 7\nPRINT 1\nFINALLY\nPRINT 2\nEND TRY\n");
        let main = &pcfg.main;
        let info = main.try_catches.values().next().unwrap();
        assert_eq!(info.catch_blocks.len(), 1);
        assert_eq!(info.catch_blocks[0].0, 7);
        assert!(info.finally_block.is_some());
        assert!(
            main.blocks[info.dispatch_block]
                .successors
                .contains(&info.catch_blocks[0].1)
        );
    }

    #[test]
    fn test_function_gets_own_cfg() {
        let (pcfg, symbols) =
            build("FUNCTION AREA#(W#, H#)\nAREA# = W# * H#\nEND FUNCTION\nPRINT AREA#(2, 3)\n");
        assert_eq!(pcfg.functions.len(), 1);
        let f = &pcfg.functions[0];
        assert_eq!(f.name, "AREA_DOUBLE");
        assert_eq!(f.params.len(), 2);
        let info = symbols.function("AREA#").unwrap();
        assert!(!info.is_sub);
        assert_eq!(info.params.len(), 2);
    }

    #[test]
    fn test_edges_and_successors_agree() {
        let (pcfg, _) = build(
            "10 FOR I = 1 TO 3\n20 IF I > 1 THEN\n30 PRINT I\n40 END IF\n50 NEXT I\n60 PRINT 9\n",
        );
        for cfg in std::iter::once(&pcfg.main).chain(pcfg.functions.iter()) {
            for edge in &cfg.edges {
                assert!(
                    cfg.blocks[edge.source].successors.contains(&edge.target),
                    "edge {}->{} missing from successors",
                    edge.source,
                    edge.target
                );
                assert!(
                    cfg.blocks[edge.target].predecessors.contains(&edge.source),
                    "edge {}->{} missing from predecessors",
                    edge.source,
                    edge.target
                );
            }
        }
    }

    #[test]
    fn test_deterministic_rebuild() {
        let src = "10 GOSUB 100\n20 FOR I = 1 TO 3\n30 PRINT I\n40 NEXT I\n50 END\n100 PRINT 1\n110 RETURN\n";
        let (a, _) = build(src);
        let (b, _) = build(src);
        assert_eq!(a.main.dump(), b.main.dump());
    }

    #[test]
    fn test_next_without_for_is_reported() {
        let (program, _) = Parser::new("NEXT I\n", "t.bas").parse();
        let program: &'static crate::ast::Program = Box::leak(Box::new(program));
        let mut symbols = SymbolTable::new();
        let config = CompilerConfig::default();
        let (_, diags) = build_program_cfg(program, &mut symbols, &config);
        assert!(diags.iter().any(|d| d.message.contains("NEXT without FOR")));
    }

    #[test]
    fn test_unknown_label_is_reported() {
        let (program, _) = Parser::new("GOTO nowhere\n", "t.bas").parse();
        let program: &'static crate::ast::Program = Box::leak(Box::new(program));
        let mut symbols = SymbolTable::new();
        let config = CompilerConfig::default();
        let (_, diags) = build_program_cfg(program, &mut symbols, &config);
        assert!(diags.iter().any(|d| d.message.contains("unknown label")));
    }
}
