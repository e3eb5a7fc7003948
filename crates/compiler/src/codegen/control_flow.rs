//! CFG-driven block emission
//!
//! A single cursor walks a routine's blocks in id order. Per block it
//! emits the label, the statements (stopping at the first terminator),
//! and then synthesizes the epilogue from the structure maps: IF tests,
//! empty FOR check blocks, SELECT test chains, TRY installation and
//! dispatch, and loop conditions. Plain blocks fall through to their
//! sequential successor or jump.

use super::expr::array_operand;
use super::{CodeGenError, Emitter, Value};
use crate::ast::{BinOp, CaseTest, Expr, JumpTarget, LoopCond, StatementKind};
use crate::cfg::{BasicBlock, BlockId, Cfg, EdgeKind, ForKind, SelectInfo, TryCatchInfo};
use crate::types::{BaseType, QbeClass, TypeDescriptor, sanitize_qbe_name, split_suffix};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::rc::Rc;

impl<'a, 'ast> Emitter<'a, 'ast> {
    /// Emit every block except the routine exit (the caller writes the
    /// exit sequence, which differs between main and functions).
    pub(crate) fn emit_routine_blocks(&mut self, cfg: &Cfg<'ast>) -> Result<(), CodeGenError> {
        self.try_exit_counts = try_exit_map(cfg);
        for block in &cfg.blocks {
            if block.id == cfg.exit_block {
                continue;
            }
            self.emit_block(cfg, block)?;
        }
        Ok(())
    }

    fn emit_block(&mut self, cfg: &Cfg<'ast>, block: &BasicBlock<'ast>) -> Result<(), CodeGenError> {
        writeln!(self.out, "@{}", Self::block_label(cfg, block.id))?;
        if self.config.block_comments {
            writeln!(
                self.out,
                "\t# block {} lines {:?}",
                block.id, block.source_lines
            )?;
        }
        self.block_done = false;

        // A FOR EACH body re-binds its loop variable on entry
        if let Some((var, array)) = foreach_body_binding(cfg, block.id) {
            self.emit_foreach_rebind(cfg, &var, &array)?;
        }

        for &stmt in &block.statements {
            if self.block_done {
                // Dead statements after a terminator are ignored
                break;
            }
            self.emit_statement(cfg, block, stmt)?;
        }
        if self.block_done {
            return Ok(());
        }

        // Leaving a protected TRY body normally uninstalls its handler
        if let Some(&count) = self.try_exit_counts.get(&block.id) {
            for _ in 0..count {
                writeln!(self.out, "\tcall $basic_try_exit()")?;
            }
        }

        // Multi-line IF / ELSEIF test
        if let Some(test) = cfg.if_tests.get(&block.id) {
            let value = self.emit_expr(cfg, test.condition)?;
            let cond = self.to_condition(value)?;
            writeln!(
                self.out,
                "\tjnz {}, @{}, @{}",
                cond,
                Self::block_label(cfg, test.then_block),
                Self::block_label(cfg, test.else_block)
            )?;
            return Ok(());
        }

        // Empty FOR check block
        if let Some(info) = cfg.for_info_by_check(block.id) {
            let variable = info.variable.clone();
            let kind = info.kind;
            let body = info.body_block;
            let exit = info.exit_block;
            let array = match &info.statement.kind {
                StatementKind::ForEach { array, .. } => Some(array.clone()),
                _ => None,
            };
            match kind {
                ForKind::Counted => self.emit_for_check(cfg, &variable, body, exit)?,
                ForKind::ForEach => {
                    self.emit_foreach_check(cfg, &variable, array.as_deref(), body, exit)?
                }
            }
            return Ok(());
        }

        // SELECT CASE blocks
        if let Some(info) = cfg.selects.get(&block.id) {
            let info = Rc::clone(info);
            if info.select_block == block.id {
                let StatementKind::Select { selector, .. } = &info.statement.kind else {
                    return Err(CodeGenError::Logic(
                        "select block without a SELECT statement".to_string(),
                    ));
                };
                let value = self.emit_expr(cfg, selector)?;
                self.select_values.insert(block.id, value);
                // Falls through to the first test block below
            } else {
                self.emit_select_test(cfg, &info, block.id)?;
                return Ok(());
            }
        }

        // TRY installation and dispatch
        if let Some(info) = cfg.try_catches.get(&block.id) {
            let info = Rc::clone(info);
            if info.dispatch_block == block.id {
                self.emit_try_dispatch(cfg, &info)?;
            } else {
                self.emit_try_enter(cfg, &info)?;
            }
            return Ok(());
        }

        // Loop headers and footers that carry a condition
        if let Some(loop_info) = cfg.do_loops.get(&block.id) {
            if let Some((polarity, expr)) = block_loop_condition(block) {
                let value = self.emit_expr(cfg, expr)?;
                let cond = self.to_condition(value)?;
                let body = Self::block_label(cfg, loop_info.body_block);
                let exit = Self::block_label(cfg, loop_info.exit_block);
                match polarity {
                    LoopCond::While => {
                        writeln!(self.out, "\tjnz {}, @{}, @{}", cond, body, exit)?;
                    }
                    LoopCond::Until => {
                        writeln!(self.out, "\tjnz {}, @{}, @{}", cond, exit, body)?;
                    }
                }
                return Ok(());
            }
        }

        self.emit_default_epilogue(cfg, block)
    }

    /// Plain epilogue: follow the sequential edge. Blocks holding inline
    /// IFs may carry extra conditional edges whose jumps were already
    /// emitted inline; only the fallthrough continuation remains.
    fn emit_default_epilogue(
        &mut self,
        cfg: &Cfg<'ast>,
        block: &BasicBlock<'ast>,
    ) -> Result<(), CodeGenError> {
        match block.successors.as_slice() {
            [] => {
                writeln!(self.out, "\tjmp @{}", Self::block_label(cfg, cfg.exit_block))?;
            }
            [only] => {
                // Adjacent sequential blocks fall through silently
                if *only != block.id + 1 {
                    writeln!(self.out, "\tjmp @{}", Self::block_label(cfg, *only))?;
                }
            }
            _ => {
                let sequential = cfg
                    .edges
                    .iter()
                    .find(|e| {
                        e.source == block.id
                            && matches!(e.kind, EdgeKind::Fallthrough | EdgeKind::Unconditional)
                    })
                    .map(|e| e.target);
                match sequential {
                    Some(target) => {
                        if target != block.id + 1 {
                            writeln!(self.out, "\tjmp @{}", Self::block_label(cfg, target))?;
                        }
                    }
                    None => {
                        self.error_placeholder(
                            &format!("block {} has an unstructured branch", block.id),
                            QbeClass::W,
                        );
                        writeln!(self.out, "\tjmp @{}", Self::block_label(cfg, cfg.exit_block))?;
                    }
                }
            }
        }
        Ok(())
    }

    // ---- FOR checks ----

    /// Sign-aware loop test: a negative step counts down toward the
    /// limit, a positive one counts up.
    fn emit_for_check(
        &mut self,
        cfg: &Cfg<'ast>,
        variable: &str,
        body: BlockId,
        exit: BlockId,
    ) -> Result<(), CodeGenError> {
        let (plain, _) = split_suffix(variable);
        let plain = sanitize_qbe_name(plain);
        let counter = format!("%{}", plain);
        let end = format!("%end_{}", plain);
        let step = format!("%step_{}", plain);

        let is_neg = self.fresh_temp();
        writeln!(self.out, "\t{} =w csltl {}, 0", is_neg, step)?;
        let cond_neg = self.fresh_temp();
        writeln!(self.out, "\t{} =w csgel {}, {}", cond_neg, counter, end)?;
        let cond_pos = self.fresh_temp();
        writeln!(self.out, "\t{} =w cslel {}, {}", cond_pos, counter, end)?;
        let neg_part = self.fresh_temp();
        writeln!(self.out, "\t{} =w and {}, {}", neg_part, is_neg, cond_neg)?;
        let not_neg = self.fresh_temp();
        writeln!(self.out, "\t{} =w ceqw {}, 0", not_neg, is_neg)?;
        let pos_part = self.fresh_temp();
        writeln!(self.out, "\t{} =w and {}, {}", pos_part, not_neg, cond_pos)?;
        let take = self.fresh_temp();
        writeln!(self.out, "\t{} =w or {}, {}", take, neg_part, pos_part)?;
        writeln!(
            self.out,
            "\tjnz {}, @{}, @{}",
            take,
            Self::block_label(cfg, body),
            Self::block_label(cfg, exit)
        )?;
        Ok(())
    }

    /// FOR EACH check: index against the element count from the live
    /// descriptor.
    fn emit_foreach_check(
        &mut self,
        cfg: &Cfg<'ast>,
        variable: &str,
        array: Option<&str>,
        body: BlockId,
        exit: BlockId,
    ) -> Result<(), CodeGenError> {
        let Some(array) = array else {
            return Err(CodeGenError::Logic(
                "FOR EACH check without its array".to_string(),
            ));
        };
        let (plain, _) = split_suffix(variable);
        let idx = format!("%foreach_idx_{}", sanitize_qbe_name(plain));
        let desc = array_operand(array);

        let lo_addr = self.fresh_temp();
        writeln!(self.out, "\t{} =l add {}, 8", lo_addr, desc)?;
        let lo = self.fresh_temp();
        writeln!(self.out, "\t{} =l loadl {}", lo, lo_addr)?;
        let hi_addr = self.fresh_temp();
        writeln!(self.out, "\t{} =l add {}, 16", hi_addr, desc)?;
        let hi = self.fresh_temp();
        writeln!(self.out, "\t{} =l loadl {}", hi, hi_addr)?;
        let span = self.fresh_temp();
        writeln!(self.out, "\t{} =l sub {}, {}", span, hi, lo)?;
        let count = self.fresh_temp();
        writeln!(self.out, "\t{} =l add {}, 1", count, span)?;
        let cond = self.fresh_temp();
        writeln!(self.out, "\t{} =w csltl {}, {}", cond, idx, count)?;
        writeln!(
            self.out,
            "\tjnz {}, @{}, @{}",
            cond,
            Self::block_label(cfg, body),
            Self::block_label(cfg, exit)
        )?;
        Ok(())
    }

    /// On FOR EACH body entry, load the current element into the loop
    /// variable.
    fn emit_foreach_rebind(
        &mut self,
        cfg: &Cfg<'ast>,
        variable: &str,
        array: &str,
    ) -> Result<(), CodeGenError> {
        let Some(elem_ty) = self.symbols.array_element_type(cfg.scope(), array) else {
            self.error_placeholder(
                &format!("FOR EACH over unknown array '{}'", array),
                QbeClass::W,
            );
            return Ok(());
        };
        let (plain, _) = split_suffix(variable);
        let idx = format!("%foreach_idx_{}", sanitize_qbe_name(plain));
        let desc = array_operand(array);

        let size_addr = self.fresh_temp();
        writeln!(self.out, "\t{} =l add {}, 40", size_addr, desc)?;
        let elem_size = self.fresh_temp();
        writeln!(self.out, "\t{} =l loadl {}", elem_size, size_addr)?;
        let off = self.fresh_temp();
        writeln!(self.out, "\t{} =l mul {}, {}", off, idx, elem_size)?;
        let base = self.fresh_temp();
        writeln!(self.out, "\t{} =l loadl {}", base, desc)?;
        let ptr = self.fresh_temp();
        writeln!(self.out, "\t{} =l add {}, {}", ptr, base, off)?;
        let value = if elem_ty.is_record() {
            Value::new(ptr, QbeClass::L, elem_ty)
        } else {
            self.load_from(&ptr, &elem_ty)?
        };
        self.store_scalar(cfg, variable, value)
    }

    // ---- SELECT CASE ----

    /// One test block: an OR-chain of the clause's predicates against
    /// the saved selector, then a two-way branch.
    fn emit_select_test(
        &mut self,
        cfg: &Cfg<'ast>,
        info: &Rc<SelectInfo<'ast>>,
        block_id: BlockId,
    ) -> Result<(), CodeGenError> {
        let index = info
            .test_blocks
            .iter()
            .position(|&b| b == block_id)
            .ok_or_else(|| CodeGenError::Logic("test block missing from SELECT".to_string()))?;
        let StatementKind::Select { arms, .. } = &info.statement.kind else {
            return Err(CodeGenError::Logic(
                "SELECT info without a SELECT statement".to_string(),
            ));
        };
        let arm = &arms[index];
        let selector = match self.select_values.get(&info.select_block) {
            Some(v) => v.clone(),
            None => self.error_placeholder("SELECT selector was never evaluated", QbeClass::W),
        };

        let mut matched: Option<String> = None;
        for test in &arm.tests {
            let this = match test {
                CaseTest::Value(e) => {
                    let v = self.emit_expr(cfg, e)?;
                    let cmp = self.emit_comparison(BinOp::Eq, selector.clone(), v)?;
                    cmp.operand
                }
                CaseTest::Range(lo, hi) => {
                    let lo_v = self.emit_expr(cfg, lo)?;
                    let ge = self.emit_comparison(BinOp::Ge, selector.clone(), lo_v)?;
                    let hi_v = self.emit_expr(cfg, hi)?;
                    let le = self.emit_comparison(BinOp::Le, selector.clone(), hi_v)?;
                    let both = self.fresh_temp();
                    writeln!(self.out, "\t{} =w and {}, {}", both, ge.operand, le.operand)?;
                    both
                }
                CaseTest::Relational(op, e) => {
                    let v = self.emit_expr(cfg, e)?;
                    let cmp = self.emit_comparison(*op, selector.clone(), v)?;
                    cmp.operand
                }
            };
            matched = Some(match matched {
                None => this,
                Some(prev) => {
                    let any = self.fresh_temp();
                    writeln!(self.out, "\t{} =w or {}, {}", any, prev, this)?;
                    any
                }
            });
        }
        let matched = matched
            .unwrap_or_else(|| "0".to_string());

        let miss = if index + 1 < info.test_blocks.len() {
            info.test_blocks[index + 1]
        } else {
            info.else_block.unwrap_or(info.exit_block)
        };
        writeln!(
            self.out,
            "\tjnz {}, @{}, @{}",
            matched,
            Self::block_label(cfg, info.body_blocks[index]),
            Self::block_label(cfg, miss)
        )?;
        Ok(())
    }

    // ---- TRY / CATCH ----

    fn try_code_temp(info: &TryCatchInfo<'_>) -> String {
        format!("%try_code_{}", info.dispatch_block)
    }

    fn emit_try_enter(
        &mut self,
        cfg: &Cfg<'ast>,
        info: &Rc<TryCatchInfo<'ast>>,
    ) -> Result<(), CodeGenError> {
        let raw = self.fresh_temp();
        writeln!(self.out, "\t{} =w call $basic_try_enter()", raw)?;
        let code = Self::try_code_temp(info);
        writeln!(self.out, "\t{} =w copy {}", code, raw)?;
        let installed = self.fresh_temp();
        writeln!(self.out, "\t{} =w ceqw {}, 0", installed, code)?;
        writeln!(
            self.out,
            "\tjnz {}, @{}, @{}",
            installed,
            Self::block_label(cfg, info.try_body_block),
            Self::block_label(cfg, info.dispatch_block)
        )?;
        Ok(())
    }

    /// The dispatcher chains equality checks against the catch codes;
    /// anything unmatched re-raises.
    fn emit_try_dispatch(
        &mut self,
        cfg: &Cfg<'ast>,
        info: &Rc<TryCatchInfo<'ast>>,
    ) -> Result<(), CodeGenError> {
        let code = Self::try_code_temp(info);
        for (catch_code, catch_block) in &info.catch_blocks {
            let matches = self.fresh_temp();
            writeln!(self.out, "\t{} =w ceqw {}, {}", matches, code, catch_code)?;
            let next = self.fresh_label("catch_next");
            writeln!(
                self.out,
                "\tjnz {}, @{}, @{}",
                matches,
                Self::block_label(cfg, *catch_block),
                next
            )?;
            writeln!(self.out, "@{}", next)?;
        }
        writeln!(self.out, "\tcall $basic_throw(w {})", code)?;
        writeln!(self.out, "\thlt")?;
        Ok(())
    }

    // ---- single-line IF ----

    /// Synthesize `then_N` / `else_N` / `endif_N` labels around the
    /// inline statements; the CFG sees one block.
    pub(crate) fn emit_inline_if(
        &mut self,
        cfg: &Cfg<'ast>,
        block: &BasicBlock<'ast>,
        condition: &'ast Expr,
        then_stmts: &'ast [crate::ast::Statement],
        else_stmts: &'ast [crate::ast::Statement],
    ) -> Result<(), CodeGenError> {
        let value = self.emit_expr(cfg, condition)?;
        let cond = self.to_condition(value)?;

        let then_label = self.fresh_label("then");
        let endif_label = self.fresh_label("endif");
        let else_label = if else_stmts.is_empty() {
            endif_label.clone()
        } else {
            self.fresh_label("else")
        };
        writeln!(self.out, "\tjnz {}, @{}, @{}", cond, then_label, else_label)?;

        writeln!(self.out, "@{}", then_label)?;
        for stmt in then_stmts {
            if self.block_done {
                break;
            }
            self.emit_statement(cfg, block, stmt)?;
        }
        if !self.block_done {
            writeln!(self.out, "\tjmp @{}", endif_label)?;
        }
        self.block_done = false;

        if !else_stmts.is_empty() {
            writeln!(self.out, "@{}", else_label)?;
            for stmt in else_stmts {
                if self.block_done {
                    break;
                }
                self.emit_statement(cfg, block, stmt)?;
            }
            if !self.block_done {
                writeln!(self.out, "\tjmp @{}", endif_label)?;
            }
            self.block_done = false;
        }

        writeln!(self.out, "@{}", endif_label)?;
        Ok(())
    }

    // ---- GOSUB / RETURN / ON ----

    /// Push a resume block id onto the static return-address stack, with
    /// an overflow check.
    fn emit_gosub_push(&mut self, resume: BlockId) -> Result<(), CodeGenError> {
        let sp = self.fresh_temp();
        writeln!(self.out, "\t{} =w loadw $return_sp", sp)?;
        let full = self.fresh_temp();
        writeln!(
            self.out,
            "\t{} =w csgew {}, {}",
            full, sp, self.config.gosub_depth
        )?;
        let overflow = self.fresh_label("gosub_overflow");
        let ok = self.fresh_label("gosub_push");
        writeln!(self.out, "\tjnz {}, @{}, @{}", full, overflow, ok)?;
        writeln!(self.out, "@{}", overflow)?;
        writeln!(self.out, "\tcall $basic_throw(w 9)")?;
        writeln!(self.out, "\thlt")?;
        writeln!(self.out, "@{}", ok)?;
        let byte_off = self.fresh_temp();
        writeln!(self.out, "\t{} =w mul {}, 4", byte_off, sp)?;
        let wide = self.fresh_temp();
        writeln!(self.out, "\t{} =l extsw {}", wide, byte_off)?;
        let slot = self.fresh_temp();
        writeln!(self.out, "\t{} =l add $return_stack, {}", slot, wide)?;
        writeln!(self.out, "\tstorew {}, {}", resume, slot)?;
        let bumped = self.fresh_temp();
        writeln!(self.out, "\t{} =w add {}, 1", bumped, sp)?;
        writeln!(self.out, "\tstorew {}, $return_sp", bumped)?;
        Ok(())
    }

    pub(crate) fn emit_gosub(
        &mut self,
        cfg: &Cfg<'ast>,
        block: &BasicBlock<'ast>,
        target: &JumpTarget,
    ) -> Result<(), CodeGenError> {
        match cfg.gosub_fallthrough.get(&block.id) {
            Some(&resume) => self.emit_gosub_push(resume)?,
            None => {
                self.error_placeholder("GOSUB without a recorded resume block", QbeClass::W);
            }
        }
        let dest = self.resolve_jump(cfg, target);
        writeln!(self.out, "\tjmp @{}", dest)?;
        self.block_done = true;
        Ok(())
    }

    /// Top-level RETURN: pop the return stack and dispatch sparsely over
    /// the recorded resume blocks; underflow or an unknown id exits.
    pub(crate) fn emit_return(&mut self, cfg: &Cfg<'ast>) -> Result<(), CodeGenError> {
        if !cfg.is_main() {
            // RETURN inside a routine leaves through the tidy exit
            writeln!(self.out, "\tjmp @{}", Self::block_label(cfg, cfg.exit_block))?;
            self.block_done = true;
            return Ok(());
        }

        let exit_label = Self::block_label(cfg, cfg.exit_block);
        let sp = self.fresh_temp();
        writeln!(self.out, "\t{} =w loadw $return_sp", sp)?;
        let nonempty = self.fresh_temp();
        writeln!(self.out, "\t{} =w csgtw {}, 0", nonempty, sp)?;
        let pop = self.fresh_label("return_pop");
        writeln!(self.out, "\tjnz {}, @{}, @{}", nonempty, pop, exit_label)?;
        writeln!(self.out, "@{}", pop)?;
        let top = self.fresh_temp();
        writeln!(self.out, "\t{} =w sub {}, 1", top, sp)?;
        writeln!(self.out, "\tstorew {}, $return_sp", top)?;
        let byte_off = self.fresh_temp();
        writeln!(self.out, "\t{} =w mul {}, 4", byte_off, top)?;
        let wide = self.fresh_temp();
        writeln!(self.out, "\t{} =l extsw {}", wide, byte_off)?;
        let slot = self.fresh_temp();
        writeln!(self.out, "\t{} =l add $return_stack, {}", slot, wide)?;
        let id = self.fresh_temp();
        writeln!(self.out, "\t{} =w loadw {}", id, slot)?;

        for &resume in &cfg.gosub_return_blocks {
            let matches = self.fresh_temp();
            writeln!(self.out, "\t{} =w ceqw {}, {}", matches, id, resume)?;
            let next = self.fresh_label("return_next");
            writeln!(
                self.out,
                "\tjnz {}, @{}, @{}",
                matches,
                Self::block_label(cfg, resume),
                next
            )?;
            writeln!(self.out, "@{}", next)?;
        }
        writeln!(self.out, "\tjmp @{}", exit_label)?;
        self.block_done = true;
        Ok(())
    }

    /// ON n GOTO/GOSUB: an ordered chain of equality tests; out-of-range
    /// selectors fall through.
    pub(crate) fn emit_on_dispatch(
        &mut self,
        cfg: &Cfg<'ast>,
        block: &BasicBlock<'ast>,
        selector: &'ast Expr,
        targets: &[JumpTarget],
        is_gosub: bool,
    ) -> Result<(), CodeGenError> {
        let value = self.emit_expr(cfg, selector)?;
        let sel = self.promote(value, &TypeDescriptor::new(BaseType::Integer))?;

        let resume = cfg.gosub_fallthrough.get(&block.id).copied();
        if is_gosub {
            match resume {
                Some(r) => self.emit_gosub_push(r)?,
                None => {
                    self.error_placeholder("ON GOSUB without a resume block", QbeClass::W);
                }
            }
        }

        for (i, target) in targets.iter().enumerate() {
            let matches = self.fresh_temp();
            writeln!(self.out, "\t{} =w ceqw {}, {}", matches, sel.operand, i + 1)?;
            let dest = self.resolve_jump(cfg, target);
            let next = self.fresh_label("on_next");
            writeln!(self.out, "\tjnz {}, @{}, @{}", matches, dest, next)?;
            writeln!(self.out, "@{}", next)?;
        }
        let resume_label = match resume {
            Some(r) => Self::block_label(cfg, r),
            None => Self::block_label(cfg, cfg.exit_block),
        };
        writeln!(self.out, "\tjmp @{}", resume_label)?;
        self.block_done = true;
        Ok(())
    }
}

/// Count how many TRY regions end normally on each block.
fn try_exit_map(cfg: &Cfg<'_>) -> HashMap<BlockId, usize> {
    let mut counts: HashMap<BlockId, usize> = HashMap::new();
    let mut seen = std::collections::HashSet::new();
    for info in cfg.try_catches.values() {
        if !seen.insert(info.dispatch_block) {
            continue;
        }
        for &block in &info.body_exit_blocks {
            *counts.entry(block).or_default() += 1;
        }
    }
    counts
}

/// The loop condition carried by a header or footer block, if any.
fn block_loop_condition<'ast>(block: &BasicBlock<'ast>) -> Option<(LoopCond, &'ast Expr)> {
    for stmt in block.statements.iter().rev() {
        match &stmt.kind {
            StatementKind::While { condition } => return Some((LoopCond::While, condition)),
            StatementKind::Do {
                cond: Some((polarity, condition)),
            }
            | StatementKind::Loop {
                cond: Some((polarity, condition)),
            } => return Some((*polarity, condition)),
            StatementKind::Until { condition } => return Some((LoopCond::Until, condition)),
            _ => {}
        }
    }
    None
}

/// The (variable, array) pair when `block` is a FOR EACH body entry.
fn foreach_body_binding(cfg: &Cfg<'_>, block: BlockId) -> Option<(String, String)> {
    for info in cfg.for_loops.values() {
        if info.kind == ForKind::ForEach && info.body_block == block {
            if let StatementKind::ForEach { var, array } = &info.statement.kind {
                return Some((var.clone(), array.clone()));
            }
        }
    }
    None
}
