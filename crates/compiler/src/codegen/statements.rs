//! Statement emission
//!
//! One handler per statement kind. Handlers that end the block (GOTO,
//! GOSUB, RETURN, END, EXIT, THROW) emit their own terminator and set
//! `block_done`; everything after that point in the block is skipped.
//! Loop and SELECT branches are not emitted here: those blocks get their
//! branch synthesized by the cursor in `control_flow`.

use super::expr::{array_operand, scalar_operand};
use super::{CodeGenError, Emitter, Value};
use crate::ast::{
    DimDecl, Expr, JumpTarget, LValue, PrintSep, Statement, StatementKind,
};
use crate::cfg::{BasicBlock, Cfg};
use crate::types::{BaseType, QbeClass, TypeDescriptor, sanitize_qbe_name, split_suffix};
use std::fmt::Write as _;

impl<'a, 'ast> Emitter<'a, 'ast> {
    pub(crate) fn emit_statement(
        &mut self,
        cfg: &Cfg<'ast>,
        block: &BasicBlock<'ast>,
        stmt: &'ast Statement,
    ) -> Result<(), CodeGenError> {
        match &stmt.kind {
            StatementKind::Print { using, items } => self.emit_print(cfg, using.as_ref(), items),
            StatementKind::Input { prompt, targets } => {
                self.emit_input(cfg, prompt.as_deref(), targets)
            }
            StatementKind::Read { targets } => self.emit_read(cfg, targets),
            StatementKind::Restore { target } => self.emit_restore(target.as_ref()),
            StatementKind::Let { target, value } => {
                let v = self.emit_expr(cfg, value)?;
                self.store_lvalue(cfg, target, v)
            }
            StatementKind::MidAssign {
                var,
                start,
                length,
                value,
            } => self.emit_string_assign(cfg, "string_mid_assign", var, start, length, value),
            StatementKind::SliceAssign {
                var,
                start,
                end,
                value,
            } => self.emit_string_assign(cfg, "string_slice_assign", var, start, end, value),
            StatementKind::Dim { decls } => self.emit_dim(cfg, decls),
            StatementKind::Redim { preserve, decls } => self.emit_redim(cfg, decls, *preserve),
            StatementKind::Erase { arrays } => {
                for name in arrays {
                    writeln!(
                        self.out,
                        "\tcall $array_descriptor_erase(l {})",
                        array_operand(name)
                    )?;
                }
                Ok(())
            }
            StatementKind::Call { name, args } => self.emit_sub_call(cfg, name, args),
            StatementKind::Cls => {
                writeln!(self.out, "\tcall $basic_cls()")?;
                Ok(())
            }
            StatementKind::Color { fg, bg } => {
                let int = TypeDescriptor::new(BaseType::Integer);
                let f = self.emit_expr(cfg, fg)?;
                let f = self.promote(f, &int)?;
                let b = self.emit_expr(cfg, bg)?;
                let b = self.promote(b, &int)?;
                writeln!(
                    self.out,
                    "\tcall $basic_color(w {}, w {})",
                    f.operand, b.operand
                )?;
                Ok(())
            }
            StatementKind::Locate { row, col } => {
                let int = TypeDescriptor::new(BaseType::Integer);
                let r = self.emit_expr(cfg, row)?;
                let r = self.promote(r, &int)?;
                let c = self.emit_expr(cfg, col)?;
                let c = self.promote(c, &int)?;
                writeln!(
                    self.out,
                    "\tcall $basic_locate(w {}, w {})",
                    r.operand, c.operand
                )?;
                Ok(())
            }
            StatementKind::Width { cols } => {
                let int = TypeDescriptor::new(BaseType::Integer);
                let c = self.emit_expr(cfg, cols)?;
                let c = self.promote(c, &int)?;
                writeln!(self.out, "\tcall $basic_width(w {})", c.operand)?;
                Ok(())
            }
            StatementKind::Throw { code } => {
                let int = TypeDescriptor::new(BaseType::Integer);
                let c = self.emit_expr(cfg, code)?;
                let c = self.promote(c, &int)?;
                writeln!(self.out, "\tcall $basic_throw(w {})", c.operand)?;
                writeln!(self.out, "\thlt")?;
                self.block_done = true;
                Ok(())
            }

            StatementKind::Goto { target } => {
                let dest = self.resolve_jump(cfg, target);
                writeln!(self.out, "\tjmp @{}", dest)?;
                self.block_done = true;
                Ok(())
            }
            StatementKind::Gosub { target } => self.emit_gosub(cfg, block, target),
            StatementKind::OnGoto { selector, targets } => {
                self.emit_on_dispatch(cfg, block, selector, targets, false)
            }
            StatementKind::OnGosub { selector, targets } => {
                self.emit_on_dispatch(cfg, block, selector, targets, true)
            }
            StatementKind::Return => self.emit_return(cfg),
            StatementKind::End => {
                writeln!(self.out, "\tjmp @{}", Self::block_label(cfg, cfg.exit_block))?;
                self.block_done = true;
                Ok(())
            }
            StatementKind::Exit { .. } => {
                // The builder wired the edge to the matching loop or
                // routine exit
                let target = block
                    .successors
                    .iter()
                    .copied()
                    .find(|&s| cfg.block(s).is_loop_exit || s == cfg.exit_block)
                    .or_else(|| block.successors.first().copied());
                match target {
                    Some(t) => {
                        writeln!(self.out, "\tjmp @{}", Self::block_label(cfg, t))?;
                    }
                    None => {
                        self.error_placeholder("EXIT has no resolved target", QbeClass::W);
                        writeln!(self.out, "\tjmp @{}", Self::block_label(cfg, cfg.exit_block))?;
                    }
                }
                self.block_done = true;
                Ok(())
            }

            StatementKind::If {
                multiline,
                condition,
                then_stmts,
                elseifs,
                else_stmts,
            } => {
                if *multiline {
                    // Branching is synthesized by the cursor from the
                    // if-test map
                    Ok(())
                } else {
                    debug_assert!(elseifs.is_empty());
                    self.emit_inline_if(cfg, block, condition, then_stmts, else_stmts)
                }
            }

            StatementKind::For { .. } | StatementKind::ForEach { .. } => {
                self.emit_for_init(cfg, stmt)
            }
            StatementKind::Next { .. } => self.emit_next(cfg, block),

            // Loop and SELECT blocks branch in their epilogue; TRY
            // installs in its epilogue
            StatementKind::While { .. }
            | StatementKind::Wend
            | StatementKind::Do { .. }
            | StatementKind::Loop { .. }
            | StatementKind::Repeat
            | StatementKind::Until { .. }
            | StatementKind::TryCatch { .. } => Ok(()),
            StatementKind::Select { .. } => Ok(()),

            // Declarations were consumed by the symbol pass
            StatementKind::Rem
            | StatementKind::Data { .. }
            | StatementKind::Label { .. }
            | StatementKind::TypeDecl { .. }
            | StatementKind::Constant { .. }
            | StatementKind::Local { .. }
            | StatementKind::Shared { .. }
            | StatementKind::Global { .. }
            | StatementKind::Def { .. }
            | StatementKind::Function { .. }
            | StatementKind::Sub { .. } => Ok(()),
        }
    }

    pub(crate) fn resolve_jump(&mut self, cfg: &Cfg<'ast>, target: &JumpTarget) -> String {
        match target {
            JumpTarget::Line(n) => Self::block_label(cfg, cfg.block_for_line_or_next(*n)),
            JumpTarget::Label(name) => match cfg.label_to_block.get(name) {
                Some(&id) => Self::block_label(cfg, id),
                None => {
                    self.error_placeholder(&format!("unresolved label '{}'", name), QbeClass::W);
                    Self::block_label(cfg, cfg.exit_block)
                }
            },
        }
    }

    // ---- PRINT ----

    fn emit_print(
        &mut self,
        cfg: &Cfg<'ast>,
        using: Option<&Expr>,
        items: &[crate::ast::PrintItem],
    ) -> Result<(), CodeGenError> {
        if let Some(fmt) = using {
            return self.emit_print_using(cfg, fmt, items);
        }

        let mut ends_with_separator = false;
        for item in items {
            let value = self.emit_expr(cfg, &item.expr)?;
            self.emit_print_value(value)?;
            match item.sep {
                Some(PrintSep::Comma) => {
                    writeln!(self.out, "\tcall $basic_print_tab()")?;
                    ends_with_separator = true;
                }
                Some(PrintSep::Semicolon) => {
                    ends_with_separator = true;
                }
                None => ends_with_separator = false,
            }
        }
        if !ends_with_separator {
            writeln!(self.out, "\tcall $basic_print_newline()")?;
        }
        Ok(())
    }

    fn emit_print_value(&mut self, value: Value) -> Result<(), CodeGenError> {
        if value.ty.is_string() {
            writeln!(
                self.out,
                "\tcall $basic_print_string_desc(l {})",
                value.operand
            )?;
            return Ok(());
        }
        match value.class {
            QbeClass::D => {
                writeln!(self.out, "\tcall $basic_print_double(d {})", value.operand)?;
            }
            QbeClass::S => {
                writeln!(self.out, "\tcall $basic_print_float(s {})", value.operand)?;
            }
            QbeClass::W | QbeClass::L => {
                let long = self.promote(value, &TypeDescriptor::new(BaseType::Long))?;
                writeln!(self.out, "\tcall $basic_print_int(l {})", long.operand)?;
            }
        }
        Ok(())
    }

    /// PRINT USING: the arguments travel as an array of descriptor
    /// pointers; non-strings are converted first and the conversion
    /// temporaries released right after the call.
    fn emit_print_using(
        &mut self,
        cfg: &Cfg<'ast>,
        fmt: &Expr,
        items: &[crate::ast::PrintItem],
    ) -> Result<(), CodeGenError> {
        let fmt_value = self.emit_expr(cfg, fmt)?;
        if !fmt_value.ty.is_string() {
            self.error_placeholder("PRINT USING needs a string format", QbeClass::L);
            return Ok(());
        }

        let count = items.len();
        let argv = self.fresh_temp();
        writeln!(self.out, "\t{} =l call $malloc(l {})", argv, count * 8)?;

        let mut converted = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let value = self.emit_expr(cfg, &item.expr)?;
            let desc = if value.ty.is_string() {
                value.operand
            } else {
                let s = self.promote(value, &TypeDescriptor::new(BaseType::String))?;
                converted.push(s.operand.clone());
                s.operand
            };
            let slot = self.fresh_temp();
            writeln!(self.out, "\t{} =l add {}, {}", slot, argv, i * 8)?;
            writeln!(self.out, "\tstorel {}, {}", desc, slot)?;
        }

        writeln!(
            self.out,
            "\tcall $basic_print_using(l {}, l {}, l {})",
            fmt_value.operand, count, argv
        )?;
        writeln!(self.out, "\tcall $free(l {})", argv)?;
        for temp in converted {
            writeln!(self.out, "\tcall $string_release(l {})", temp)?;
        }
        Ok(())
    }

    // ---- INPUT / READ / RESTORE ----

    fn emit_input(
        &mut self,
        cfg: &Cfg<'ast>,
        prompt: Option<&str>,
        targets: &[LValue],
    ) -> Result<(), CodeGenError> {
        if let Some(text) = prompt {
            let desc = self.materialize_string(text)?;
            writeln!(
                self.out,
                "\tcall $basic_print_string_desc(l {})",
                desc.operand
            )?;
            writeln!(self.out, "\tcall $string_release(l {})", desc.operand)?;
        }
        for target in targets {
            let ty = self.lvalue_type(cfg, target);
            let value = if ty.is_string() {
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =l call $basic_input_line()", temp)?;
                Value::new(temp, QbeClass::L, TypeDescriptor::new(BaseType::String))
            } else if ty.is_float() {
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =d call $basic_input_double()", temp)?;
                Value::new(temp, QbeClass::D, TypeDescriptor::new(BaseType::Double))
            } else {
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =w call $basic_input_int()", temp)?;
                Value::new(temp, QbeClass::W, TypeDescriptor::new(BaseType::Integer))
            };
            self.store_lvalue(cfg, target, value)?;
        }
        Ok(())
    }

    fn emit_read(&mut self, cfg: &Cfg<'ast>, targets: &[LValue]) -> Result<(), CodeGenError> {
        for target in targets {
            let ty = self.lvalue_type(cfg, target);
            let value = if ty.is_string() {
                let raw = self.fresh_temp();
                writeln!(self.out, "\t{} =l call $basic_read_string()", raw)?;
                let desc = self.fresh_temp();
                writeln!(self.out, "\t{} =l call $string_new_utf8(l {})", desc, raw)?;
                Value::new(desc, QbeClass::L, TypeDescriptor::new(BaseType::String))
            } else if ty.is_float() {
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =d call $basic_read_double()", temp)?;
                Value::new(temp, QbeClass::D, TypeDescriptor::new(BaseType::Double))
            } else {
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =w call $basic_read_int()", temp)?;
                Value::new(temp, QbeClass::W, TypeDescriptor::new(BaseType::Integer))
            };
            self.store_lvalue(cfg, target, value)?;
        }
        Ok(())
    }

    fn emit_restore(&mut self, target: Option<&JumpTarget>) -> Result<(), CodeGenError> {
        let index = match target {
            None => 0,
            Some(JumpTarget::Line(n)) => match self.data.restore_index_for_line(*n) {
                Some(idx) => idx,
                None => {
                    self.error_placeholder(
                        &format!("RESTORE target line {} has no DATA", n),
                        QbeClass::W,
                    );
                    0
                }
            },
            Some(JumpTarget::Label(name)) => match self.data.restore_index_for_label(name) {
                Some(idx) => idx,
                None => {
                    self.error_placeholder(
                        &format!("RESTORE target label '{}' has no DATA", name),
                        QbeClass::W,
                    );
                    0
                }
            },
        };
        writeln!(self.out, "\tcall $basic_restore(l {})", index)?;
        Ok(())
    }

    // ---- assignment ----

    /// The declared type of an assignment target.
    fn lvalue_type(&self, cfg: &Cfg<'ast>, lv: &LValue) -> TypeDescriptor {
        let scope = cfg.scope();
        let base = if lv.indices.is_empty() && !self.symbols.is_array(scope, &lv.name) {
            self.symbols.variable_type(scope, &lv.name)
        } else {
            self.symbols.array_element_type(scope, &lv.name)
        };
        let mut ty = base.unwrap_or_else(|| self.config.default_numeric_type());
        for member in &lv.members {
            let Some(record) = ty.record_name() else {
                return TypeDescriptor::unknown();
            };
            let loc = crate::ast::SourceLocation::new(Default::default(), 0);
            match self.symbols.field_of(record, member, &loc) {
                Ok((_, field_ty)) => ty = field_ty,
                Err(_) => return TypeDescriptor::unknown(),
            }
        }
        ty
    }

    pub(crate) fn store_lvalue(
        &mut self,
        cfg: &Cfg<'ast>,
        lv: &LValue,
        value: Value,
    ) -> Result<(), CodeGenError> {
        let scope = cfg.scope();

        if lv.members.is_empty() {
            if lv.indices.is_empty() && !self.symbols.is_array(scope, &lv.name) {
                return self.store_scalar(cfg, &lv.name, value);
            }
            // Array element
            let (ptr, elem_ty) = self.emit_array_element(cfg, &lv.name, &lv.indices)?;
            let converted = self.promote(value, &elem_ty)?;
            let operand = self.retained_if_string(&elem_ty, converted.operand)?;
            writeln!(
                self.out,
                "\tstore{} {}, {}",
                elem_ty.qbe_store_op(),
                operand,
                ptr
            )?;
            return Ok(());
        }

        // Member chain: resolve the base, then walk fields
        let (mut addr, mut ty) = if lv.indices.is_empty()
            && !self.symbols.is_array(scope, &lv.name)
        {
            match self.symbols.variable_type(scope, &lv.name) {
                Some(ty) if ty.is_record() => (scalar_operand(&lv.name), ty),
                _ => {
                    self.error_placeholder(
                        &format!("'{}' is not a TYPE value", lv.name),
                        QbeClass::L,
                    );
                    return Ok(());
                }
            }
        } else {
            self.emit_array_element(cfg, &lv.name, &lv.indices)?
        };

        for member in &lv.members {
            let Some(record) = ty.record_name().map(str::to_string) else {
                self.error_placeholder(
                    &format!("field '{}' on a non-TYPE value", member),
                    QbeClass::L,
                );
                return Ok(());
            };
            let loc = crate::ast::SourceLocation::new(Default::default(), 0);
            match self.symbols.field_of(&record, member, &loc) {
                Ok((offset, field_ty)) => {
                    let next = self.fresh_temp();
                    writeln!(self.out, "\t{} =l add {}, {}", next, addr, offset)?;
                    addr = next;
                    ty = field_ty;
                }
                Err(d) => {
                    self.error_placeholder(&d.message, QbeClass::L);
                    return Ok(());
                }
            }
        }

        let converted = self.promote(value, &ty)?;
        let operand = self.retained_if_string(&ty, converted.operand)?;
        writeln!(self.out, "\tstore{} {}, {}", ty.qbe_store_op(), operand, addr)?;
        Ok(())
    }

    /// Stores into string slots retain the incoming descriptor.
    fn retained_if_string(
        &mut self,
        ty: &TypeDescriptor,
        operand: String,
    ) -> Result<String, CodeGenError> {
        if !ty.is_string() {
            return Ok(operand);
        }
        let retained = self.fresh_temp();
        writeln!(
            self.out,
            "\t{} =l call $string_retain(l {})",
            retained, operand
        )?;
        Ok(retained)
    }

    pub(crate) fn store_scalar(
        &mut self,
        cfg: &Cfg<'ast>,
        name: &str,
        value: Value,
    ) -> Result<(), CodeGenError> {
        let scope = cfg.scope();
        let (plain, suffix) = split_suffix(name);
        if suffix.is_none() && self.symbols.is_for_variable(scope, plain) {
            let long = self.promote(value, &TypeDescriptor::new(BaseType::Long))?;
            writeln!(
                self.out,
                "\t%{} =l copy {}",
                sanitize_qbe_name(plain),
                long.operand
            )?;
            return Ok(());
        }

        let Some(info) = self.symbols.lookup_variable(scope, name) else {
            self.error_placeholder(
                &format!("assignment to undeclared variable '{}'", name),
                QbeClass::W,
            );
            return Ok(());
        };
        let ty = info.ty.clone();
        let slot = info.global_slot;

        let converted = self.promote(value, &ty)?;
        let operand = self.retained_if_string(&ty, converted.operand)?;

        match slot {
            Some(slot) => {
                let addr = self.global_slot_addr(slot)?;
                // Vector slots are 8 bytes; integers widen on the way in
                if ty.qbe_class() == QbeClass::W {
                    let wide = self.fresh_temp();
                    writeln!(self.out, "\t{} =l extsw {}", wide, operand)?;
                    writeln!(self.out, "\tstorel {}, {}", wide, addr)?;
                } else if ty.qbe_class() == QbeClass::S {
                    writeln!(self.out, "\tstores {}, {}", operand, addr)?;
                } else if ty.qbe_class() == QbeClass::D {
                    writeln!(self.out, "\tstored {}, {}", operand, addr)?;
                } else {
                    writeln!(self.out, "\tstorel {}, {}", operand, addr)?;
                }
            }
            None => {
                writeln!(
                    self.out,
                    "\t{} ={} copy {}",
                    scalar_operand(name),
                    ty.qbe_class(),
                    operand
                )?;
            }
        }
        Ok(())
    }

    fn emit_string_assign(
        &mut self,
        cfg: &Cfg<'ast>,
        symbol: &str,
        var: &str,
        a: &Expr,
        b: &Expr,
        value: &Expr,
    ) -> Result<(), CodeGenError> {
        let long = TypeDescriptor::new(BaseType::Long);
        let current = self.emit_expr(cfg, &Expr::Variable(var.to_string()))?;
        if !current.ty.is_string() {
            self.error_placeholder(&format!("'{}' is not a string variable", var), QbeClass::L);
            return Ok(());
        }
        let a = self.emit_expr(cfg, a)?;
        let a = self.promote(a, &long)?;
        let b = self.emit_expr(cfg, b)?;
        let b = self.promote(b, &long)?;
        let repl = self.emit_expr(cfg, value)?;
        if !repl.ty.is_string() {
            self.error_placeholder("replacement must be a string", QbeClass::L);
            return Ok(());
        }
        let result = self.fresh_temp();
        writeln!(
            self.out,
            "\t{} =l call ${}(l {}, l {}, l {}, l {})",
            result, symbol, current.operand, a.operand, b.operand, repl.operand
        )?;
        self.store_scalar(
            cfg,
            var,
            Value::new(result, QbeClass::L, TypeDescriptor::new(BaseType::String)),
        )
    }

    // ---- SUB calls ----

    fn emit_sub_call(
        &mut self,
        cfg: &Cfg<'ast>,
        name: &str,
        args: &[Expr],
    ) -> Result<(), CodeGenError> {
        if self.symbols.function(name).is_none() {
            self.error_placeholder(&format!("call to unknown routine '{}'", name), QbeClass::W);
            return Ok(());
        }
        // Result, if any, is discarded
        let call = Expr::FunctionCall {
            name: name.to_string(),
            args: args.to_vec(),
        };
        self.emit_expr(cfg, &call)?;
        Ok(())
    }

    // ---- DIM / REDIM ----

    /// Element stride: record layout size for UDT elements, descriptor
    /// width otherwise.
    fn element_size(&self, ty: &TypeDescriptor) -> u64 {
        match ty.record_name() {
            Some(record) => self
                .symbols
                .record_layout(record)
                .map(|l| l.size)
                .unwrap_or(8),
            None => ty.width().max(1) as u64,
        }
    }

    fn emit_dim(&mut self, cfg: &Cfg<'ast>, decls: &'ast [DimDecl]) -> Result<(), CodeGenError> {
        for decl in decls {
            if decl.bounds.is_empty() {
                // Scalar declarations allocate in the routine prologue
                continue;
            }
            self.emit_array_alloc(cfg, decl)?;
        }
        Ok(())
    }

    /// Evaluate one dimension's bounds as Longs.
    fn emit_bounds(
        &mut self,
        cfg: &Cfg<'ast>,
        range: &'ast crate::ast::DimRange,
    ) -> Result<(String, String, String), CodeGenError> {
        let long = TypeDescriptor::new(BaseType::Long);
        let lower = match &range.lower {
            Some(e) => {
                let v = self.emit_expr(cfg, e)?;
                self.promote(v, &long)?.operand
            }
            None => "0".to_string(),
        };
        let upper = {
            let v = self.emit_expr(cfg, &range.upper)?;
            self.promote(v, &long)?.operand
        };
        let span = self.fresh_temp();
        writeln!(self.out, "\t{} =l sub {}, {}", span, upper, lower)?;
        let count = self.fresh_temp();
        writeln!(self.out, "\t{} =l add {}, 1", count, span)?;
        Ok((lower, upper, count))
    }

    fn emit_array_alloc(
        &mut self,
        cfg: &Cfg<'ast>,
        decl: &'ast DimDecl,
    ) -> Result<(), CodeGenError> {
        let Some(info) = self.symbols.lookup_array(cfg.scope(), &decl.name) else {
            self.error_placeholder(
                &format!("DIM of unregistered array '{}'", decl.name),
                QbeClass::L,
            );
            return Ok(());
        };
        let elem_ty = info.element_type.clone();
        let desc = array_operand(&decl.name);
        let elem_size = self.element_size(&elem_ty);

        let mut dims = Vec::new();
        for range in &decl.bounds {
            dims.push(self.emit_bounds(cfg, range)?);
        }

        let total = if dims.len() == 2 {
            let t = self.fresh_temp();
            writeln!(self.out, "\t{} =l mul {}, {}", t, dims[0].2, dims[1].2)?;
            t
        } else {
            dims[0].2.clone()
        };
        let bytes = self.fresh_temp();
        writeln!(self.out, "\t{} =l mul {}, {}", bytes, total, elem_size)?;
        let data = self.fresh_temp();
        writeln!(self.out, "\t{} =l call $malloc(l {})", data, bytes)?;
        writeln!(self.out, "\tcall $memset(l {}, w 0, l {})", data, bytes)?;

        self.fill_descriptor(&desc, &data, &dims, elem_size, &elem_ty)?;
        Ok(())
    }

    /// Write the 64-byte dope vector: data pointer, bounds, element
    /// size, dimension count, OPTION BASE, type suffix tag.
    fn fill_descriptor(
        &mut self,
        desc: &str,
        data: &str,
        dims: &[(String, String, String)],
        elem_size: u64,
        elem_ty: &TypeDescriptor,
    ) -> Result<(), CodeGenError> {
        writeln!(self.out, "\tstorel {}, {}", data, desc)?;
        for (i, (lower, upper, _)) in dims.iter().enumerate() {
            let lo_addr = self.fresh_temp();
            writeln!(self.out, "\t{} =l add {}, {}", lo_addr, desc, 8 + i * 16)?;
            writeln!(self.out, "\tstorel {}, {}", lower, lo_addr)?;
            let hi_addr = self.fresh_temp();
            writeln!(self.out, "\t{} =l add {}, {}", hi_addr, desc, 16 + i * 16)?;
            writeln!(self.out, "\tstorel {}, {}", upper, hi_addr)?;
        }
        if dims.len() == 1 {
            let lo2 = self.fresh_temp();
            writeln!(self.out, "\t{} =l add {}, 24", lo2, desc)?;
            writeln!(self.out, "\tstorel 0, {}", lo2)?;
            let hi2 = self.fresh_temp();
            writeln!(self.out, "\t{} =l add {}, 32", hi2, desc)?;
            writeln!(self.out, "\tstorel 0, {}", hi2)?;
        }
        let size_addr = self.fresh_temp();
        writeln!(self.out, "\t{} =l add {}, 40", size_addr, desc)?;
        writeln!(self.out, "\tstorel {}, {}", elem_size, size_addr)?;
        let ndim_addr = self.fresh_temp();
        writeln!(self.out, "\t{} =l add {}, 48", ndim_addr, desc)?;
        writeln!(self.out, "\tstorew {}, {}", dims.len(), ndim_addr)?;
        let base_addr = self.fresh_temp();
        writeln!(self.out, "\t{} =l add {}, 52", base_addr, desc)?;
        writeln!(self.out, "\tstorew 0, {}", base_addr)?;
        let tag_addr = self.fresh_temp();
        writeln!(self.out, "\t{} =l add {}, 56", tag_addr, desc)?;
        let tag = elem_ty.suffix_char().map(|c| c as u32).unwrap_or(0);
        writeln!(self.out, "\tstoreb {}, {}", tag, tag_addr)?;
        Ok(())
    }

    fn emit_redim(
        &mut self,
        cfg: &Cfg<'ast>,
        decls: &'ast [DimDecl],
        preserve: bool,
    ) -> Result<(), CodeGenError> {
        for decl in decls {
            if decl.bounds.is_empty() {
                continue;
            }
            if !preserve {
                writeln!(
                    self.out,
                    "\tcall $array_descriptor_erase(l {})",
                    array_operand(&decl.name)
                )?;
                self.emit_array_alloc(cfg, decl)?;
                continue;
            }
            self.emit_redim_preserve(cfg, decl)?;
        }
        Ok(())
    }

    /// REDIM PRESERVE: realloc, zero the grown tail, refresh the bounds.
    /// Only the last dimension may change, which for the supported
    /// shapes means recomputing the total byte size.
    fn emit_redim_preserve(
        &mut self,
        cfg: &Cfg<'ast>,
        decl: &'ast DimDecl,
    ) -> Result<(), CodeGenError> {
        let Some(info) = self.symbols.lookup_array(cfg.scope(), &decl.name) else {
            self.error_placeholder(
                &format!("REDIM of undeclared array '{}'", decl.name),
                QbeClass::L,
            );
            return Ok(());
        };
        let elem_ty = info.element_type.clone();
        let desc = array_operand(&decl.name);
        let elem_size = self.element_size(&elem_ty);

        // Old byte size from the live descriptor
        let old_data = self.fresh_temp();
        writeln!(self.out, "\t{} =l loadl {}", old_data, desc)?;
        let mut old_total: Option<String> = None;
        for dim in 0..info.dimensions {
            let lo_addr = self.fresh_temp();
            writeln!(self.out, "\t{} =l add {}, {}", lo_addr, desc, 8 + dim * 16)?;
            let lo = self.fresh_temp();
            writeln!(self.out, "\t{} =l loadl {}", lo, lo_addr)?;
            let hi_addr = self.fresh_temp();
            writeln!(self.out, "\t{} =l add {}, {}", hi_addr, desc, 16 + dim * 16)?;
            let hi = self.fresh_temp();
            writeln!(self.out, "\t{} =l loadl {}", hi, hi_addr)?;
            let span = self.fresh_temp();
            writeln!(self.out, "\t{} =l sub {}, {}", span, hi, lo)?;
            let count = self.fresh_temp();
            writeln!(self.out, "\t{} =l add {}, 1", count, span)?;
            old_total = Some(match old_total {
                None => count,
                Some(prev) => {
                    let t = self.fresh_temp();
                    writeln!(self.out, "\t{} =l mul {}, {}", t, prev, count)?;
                    t
                }
            });
        }
        let old_total = old_total.expect("arrays have at least one dimension");
        let old_bytes = self.fresh_temp();
        writeln!(self.out, "\t{} =l mul {}, {}", old_bytes, old_total, elem_size)?;

        let mut dims = Vec::new();
        for range in &decl.bounds {
            dims.push(self.emit_bounds(cfg, range)?);
        }
        let new_total = if dims.len() == 2 {
            let t = self.fresh_temp();
            writeln!(self.out, "\t{} =l mul {}, {}", t, dims[0].2, dims[1].2)?;
            t
        } else {
            dims[0].2.clone()
        };
        let new_bytes = self.fresh_temp();
        writeln!(self.out, "\t{} =l mul {}, {}", new_bytes, new_total, elem_size)?;

        let data = self.fresh_temp();
        writeln!(
            self.out,
            "\t{} =l call $realloc(l {}, l {})",
            data, old_data, new_bytes
        )?;

        // Zero-fill only when the array grew
        let grew = self.fresh_temp();
        writeln!(self.out, "\t{} =w csgtl {}, {}", grew, new_bytes, old_bytes)?;
        let fill = self.fresh_label("redim_fill");
        let done = self.fresh_label("redim_done");
        writeln!(self.out, "\tjnz {}, @{}, @{}", grew, fill, done)?;
        writeln!(self.out, "@{}", fill)?;
        let tail = self.fresh_temp();
        writeln!(self.out, "\t{} =l add {}, {}", tail, data, old_bytes)?;
        let grow = self.fresh_temp();
        writeln!(self.out, "\t{} =l sub {}, {}", grow, new_bytes, old_bytes)?;
        writeln!(self.out, "\tcall $memset(l {}, w 0, l {})", tail, grow)?;
        writeln!(self.out, "\tjmp @{}", done)?;
        writeln!(self.out, "@{}", done)?;

        self.fill_descriptor(&desc, &data, &dims, elem_size, &elem_ty)?;
        Ok(())
    }

    // ---- FOR / NEXT ----

    /// The plain counter temporaries of a FOR variable.
    fn counter_names(var: &str) -> (String, String, String) {
        let (plain, _) = split_suffix(var);
        let plain = sanitize_qbe_name(plain);
        (
            format!("%{}", plain),
            format!("%end_{}", plain),
            format!("%step_{}", plain),
        )
    }

    fn emit_for_init(&mut self, cfg: &Cfg<'ast>, stmt: &'ast Statement) -> Result<(), CodeGenError> {
        let long = TypeDescriptor::new(BaseType::Long);
        match &stmt.kind {
            StatementKind::For {
                var, start, end, step, ..
            } => {
                let (counter, end_name, step_name) = Self::counter_names(var);
                let v = self.emit_expr(cfg, start)?;
                let v = self.promote(v, &long)?;
                writeln!(self.out, "\t{} =l copy {}", counter, v.operand)?;
                let e = self.emit_expr(cfg, end)?;
                let e = self.promote(e, &long)?;
                writeln!(self.out, "\t{} =l copy {}", end_name, e.operand)?;
                match step {
                    Some(expr) => {
                        let s = self.emit_expr(cfg, expr)?;
                        let s = self.promote(s, &long)?;
                        writeln!(self.out, "\t{} =l copy {}", step_name, s.operand)?;
                    }
                    None => {
                        writeln!(self.out, "\t{} =l copy 1", step_name)?;
                    }
                }
                self.mirror_counter(cfg, var)?;
            }
            StatementKind::ForEach { var, .. } => {
                let (plain, _) = split_suffix(var);
                writeln!(
                    self.out,
                    "\t%foreach_idx_{} =l copy 0",
                    sanitize_qbe_name(plain)
                )?;
            }
            _ => {
                return Err(CodeGenError::Logic(
                    "FOR init emission on a non-FOR statement".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Mirror the Long counter into the user-visible suffixed variable
    /// after every update.
    pub(crate) fn mirror_counter(
        &mut self,
        cfg: &Cfg<'ast>,
        var: &str,
    ) -> Result<(), CodeGenError> {
        let (plain, suffix) = split_suffix(var);
        if suffix.is_none() {
            return Ok(());
        }
        let Some(ty) = self.symbols.variable_type(cfg.scope(), var) else {
            return Ok(());
        };
        let counter = Value::new(
            format!("%{}", sanitize_qbe_name(plain)),
            QbeClass::L,
            TypeDescriptor::new(BaseType::Long),
        );
        let converted = self.promote(counter, &ty)?;
        writeln!(
            self.out,
            "\t{} ={} copy {}",
            scalar_operand(var),
            ty.qbe_class(),
            converted.operand
        )?;
        Ok(())
    }

    /// NEXT: step the counter; the back edge is the block's epilogue.
    fn emit_next(&mut self, cfg: &Cfg<'ast>, block: &BasicBlock<'ast>) -> Result<(), CodeGenError> {
        let info = cfg
            .for_loops
            .values()
            .find(|i| block.successors.contains(&i.check_block));
        let Some(info) = info else {
            self.error_placeholder("NEXT without a matching FOR", QbeClass::W);
            return Ok(());
        };
        let variable = info.variable.clone();
        match info.kind {
            crate::cfg::ForKind::Counted => {
                let (counter, _, step_name) = Self::counter_names(&variable);
                writeln!(self.out, "\t{} =l add {}, {}", counter, counter, step_name)?;
                self.mirror_counter(cfg, &variable)?;
            }
            crate::cfg::ForKind::ForEach => {
                let (plain, _) = split_suffix(variable.as_str());
                let idx = format!("%foreach_idx_{}", sanitize_qbe_name(plain));
                writeln!(self.out, "\t{} =l add {}, 1", idx, idx)?;
            }
        }
        Ok(())
    }
}
