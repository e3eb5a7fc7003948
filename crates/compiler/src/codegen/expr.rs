//! Expression emission
//!
//! Every expression lowers to a (operand, ABI class, BASIC type) triple.
//! Bare numeric literals are doubles; contexts narrow them through
//! [`Emitter::promote`]. Binary typing follows the BASIC rules: MOD
//! forces Integer, string + string concatenates, any float operand
//! promotes both sides to Double, and pure-integer expressions stay
//! integral.

use super::{CodeGenError, Emitter, Value, format_double};
use crate::ast::{BinOp, Expr, UnOp};
use crate::builtins::{self, StrArg, StrRet};
use crate::cfg::Cfg;
use crate::symbols::ConstValue;
use crate::types::{BaseType, QbeClass, TypeDescriptor, mangle, sanitize_qbe_name, split_suffix};
use std::fmt::Write as _;

/// Where a scalar variable lives in the generated code.
enum VarPlace {
    /// An ordinary `%var_<mangled>` temporary
    Temp(String),
    /// A slot in `$__global_vector`
    Global(usize),
    /// A FOR counter held in a bare `%<name>` Long temporary
    ForCounter(String),
}

impl<'a, 'ast> Emitter<'a, 'ast> {
    pub(crate) fn emit_expr(
        &mut self,
        cfg: &Cfg<'ast>,
        expr: &Expr,
    ) -> Result<Value, CodeGenError> {
        match expr {
            Expr::Number(v) => {
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =d copy d_{}", temp, format_double(*v))?;
                Ok(Value::new(temp, QbeClass::D, TypeDescriptor::new(BaseType::Double)))
            }
            Expr::Str(text) => self.materialize_string(text),
            Expr::Variable(name) => self.emit_variable(cfg, name),
            Expr::Binary { op, lhs, rhs } => self.emit_binary(cfg, *op, lhs, rhs),
            Expr::Unary { op, operand } => self.emit_unary(cfg, *op, operand),
            Expr::FunctionCall { name, args } => self.emit_call(cfg, name, args),
            Expr::ArrayAccess { name, indices } => {
                if indices.is_empty() {
                    // Whole-array reference: the descriptor pointer
                    match self.symbols.lookup_array(cfg.scope(), name) {
                        Some(_) => Ok(Value::new(
                            array_operand(name),
                            QbeClass::L,
                            TypeDescriptor::new(BaseType::Pointer),
                        )),
                        None => Ok(self.error_placeholder(
                            &format!("reference to undeclared array '{}'", name),
                            QbeClass::L,
                        )),
                    }
                } else {
                    self.emit_array_read(cfg, name, indices)
                }
            }
            Expr::MemberAccess { .. } => {
                let (ptr, ty) = self.emit_address_of(cfg, expr)?;
                if ty.is_record() {
                    Ok(Value::new(ptr, QbeClass::L, ty))
                } else {
                    self.load_from(&ptr, &ty)
                }
            }
        }
    }

    /// Materialize a string literal as a runtime descriptor.
    pub(crate) fn materialize_string(&mut self, text: &str) -> Result<Value, CodeGenError> {
        let idx = self.intern_string(text);
        let temp = self.fresh_temp();
        writeln!(
            self.out,
            "\t{} =l call $string_new_utf8(l $str.{})",
            temp, idx
        )?;
        Ok(Value::new(temp, QbeClass::L, TypeDescriptor::new(BaseType::String)))
    }

    // ---- variables ----

    fn variable_place(&self, cfg: &Cfg<'ast>, name: &str) -> Option<(VarPlace, TypeDescriptor)> {
        let scope = cfg.scope();
        let (plain, suffix) = split_suffix(name);
        if suffix.is_none() && self.symbols.is_for_variable(scope, plain) {
            return Some((
                VarPlace::ForCounter(format!("%{}", sanitize_qbe_name(plain))),
                TypeDescriptor::new(BaseType::Long),
            ));
        }
        let info = self.symbols.lookup_variable(scope, name)?;
        let place = match info.global_slot {
            Some(slot) => VarPlace::Global(slot),
            None => VarPlace::Temp(scalar_operand(name)),
        };
        Some((place, info.ty.clone()))
    }

    fn emit_variable(&mut self, cfg: &Cfg<'ast>, name: &str) -> Result<Value, CodeGenError> {
        // Constants are inlined at every use
        if let Some(value) = self.symbols.constant(name) {
            return match value.clone() {
                ConstValue::Int(i) => Ok(Value::new(
                    i.to_string(),
                    QbeClass::W,
                    TypeDescriptor::new(BaseType::Integer),
                )),
                ConstValue::Double(d) => Ok(Value::new(
                    format!("d_{}", format_double(d)),
                    QbeClass::D,
                    TypeDescriptor::new(BaseType::Double),
                )),
                ConstValue::Str(s) => self.materialize_string(&s),
            };
        }

        match self.variable_place(cfg, name) {
            Some((VarPlace::ForCounter(temp), ty)) => Ok(Value::new(temp, QbeClass::L, ty)),
            Some((VarPlace::Temp(temp), ty)) => {
                let class = ty.qbe_class();
                Ok(Value::new(temp, class, ty))
            }
            Some((VarPlace::Global(slot), ty)) => {
                let addr = self.global_slot_addr(slot)?;
                if ty.is_record() {
                    Ok(self.error_placeholder(
                        &format!("GLOBAL record variable '{}' is not supported", name),
                        QbeClass::L,
                    ))
                } else {
                    self.load_from(&addr, &ty)
                }
            }
            None => Ok(self.error_placeholder(
                &format!("reference to undeclared variable '{}'", name),
                QbeClass::W,
            )),
        }
    }

    pub(crate) fn global_slot_addr(&mut self, slot: usize) -> Result<String, CodeGenError> {
        let addr = self.fresh_temp();
        writeln!(
            self.out,
            "\t{} =l add $__global_vector, {}",
            addr,
            slot * 8
        )?;
        Ok(addr)
    }

    pub(crate) fn load_from(
        &mut self,
        addr: &str,
        ty: &TypeDescriptor,
    ) -> Result<Value, CodeGenError> {
        let temp = self.fresh_temp();
        writeln!(
            self.out,
            "\t{} ={} load{} {}",
            temp,
            ty.qbe_class(),
            ty.qbe_load_op(),
            addr
        )?;
        Ok(Value::new(temp, ty.qbe_class(), ty.clone()))
    }

    // ---- operators ----

    fn emit_binary(
        &mut self,
        cfg: &Cfg<'ast>,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Value, CodeGenError> {
        let left = self.emit_expr(cfg, lhs)?;
        let right = self.emit_expr(cfg, rhs)?;

        if op.is_comparison() {
            return self.emit_comparison(op, left, right);
        }

        // String concatenation
        if op == BinOp::Add && (left.ty.is_string() || right.ty.is_string()) {
            if left.ty.is_string() && right.ty.is_string() {
                let temp = self.fresh_temp();
                writeln!(
                    self.out,
                    "\t{} =l call $string_concat(l {}, l {})",
                    temp, left.operand, right.operand
                )?;
                return Ok(Value::new(temp, QbeClass::L, TypeDescriptor::new(BaseType::String)));
            }
            return Ok(self.error_placeholder("cannot add a string and a number", QbeClass::L));
        }

        match op {
            BinOp::Mod => {
                let int = TypeDescriptor::new(BaseType::Integer);
                let l = self.promote(left, &int)?;
                let r = self.promote(right, &int)?;
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =w rem {}, {}", temp, l.operand, r.operand)?;
                Ok(Value::new(temp, QbeClass::W, int))
            }
            BinOp::IntDiv => {
                let int = TypeDescriptor::new(BaseType::Integer);
                let l = self.promote(left, &int)?;
                let r = self.promote(right, &int)?;
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =w div {}, {}", temp, l.operand, r.operand)?;
                Ok(Value::new(temp, QbeClass::W, int))
            }
            BinOp::Pow => {
                let dbl = TypeDescriptor::new(BaseType::Double);
                let l = self.promote(left, &dbl)?;
                let r = self.promote(right, &dbl)?;
                let temp = self.fresh_temp();
                writeln!(
                    self.out,
                    "\t{} =d call $basic_pow(d {}, d {})",
                    temp, l.operand, r.operand
                )?;
                Ok(Value::new(temp, QbeClass::D, dbl))
            }
            BinOp::And | BinOp::Or | BinOp::Xor => self.emit_bitwise(op, left, right),
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                let (l, r, class, ty) = self.numeric_common(left, right)?;
                let instr = match op {
                    BinOp::Add => "add",
                    BinOp::Sub => "sub",
                    BinOp::Mul => "mul",
                    BinOp::Div => "div",
                    _ => unreachable!(),
                };
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} ={} {} {}, {}", temp, class, instr, l, r)?;
                Ok(Value::new(temp, class, ty))
            }
            _ => unreachable!("comparison handled above"),
        }
    }

    /// Bring two numeric operands to their common class: Double when
    /// either side floats, Long when either side is 8 bytes, Integer
    /// otherwise.
    fn numeric_common(
        &mut self,
        left: Value,
        right: Value,
    ) -> Result<(String, String, QbeClass, TypeDescriptor), CodeGenError> {
        if left.class.is_float() || right.class.is_float() {
            let dbl = TypeDescriptor::new(BaseType::Double);
            let l = self.promote(left, &dbl)?;
            let r = self.promote(right, &dbl)?;
            return Ok((l.operand, r.operand, QbeClass::D, dbl));
        }
        if left.class == QbeClass::L || right.class == QbeClass::L {
            let long = TypeDescriptor::new(BaseType::Long);
            let l = self.promote(left, &long)?;
            let r = self.promote(right, &long)?;
            return Ok((l.operand, r.operand, QbeClass::L, long));
        }
        let int = TypeDescriptor::new(BaseType::Integer);
        let l = self.promote(left, &int)?;
        let r = self.promote(right, &int)?;
        Ok((l.operand, r.operand, QbeClass::W, int))
    }

    pub(crate) fn emit_comparison(
        &mut self,
        op: BinOp,
        left: Value,
        right: Value,
    ) -> Result<Value, CodeGenError> {
        let int = TypeDescriptor::new(BaseType::Integer);

        if left.ty.is_string() || right.ty.is_string() {
            if !(left.ty.is_string() && right.ty.is_string()) {
                return Ok(
                    self.error_placeholder("cannot compare a string and a number", QbeClass::W)
                );
            }
            let cmp = self.fresh_temp();
            writeln!(
                self.out,
                "\t{} =w call $string_compare(l {}, l {})",
                cmp, left.operand, right.operand
            )?;
            let instr = match op {
                BinOp::Eq => "ceqw",
                BinOp::Ne => "cnew",
                BinOp::Lt => "csltw",
                BinOp::Le => "cslew",
                BinOp::Gt => "csgtw",
                BinOp::Ge => "csgew",
                _ => unreachable!(),
            };
            let temp = self.fresh_temp();
            writeln!(self.out, "\t{} =w {} {}, 0", temp, instr, cmp)?;
            return Ok(Value::new(temp, QbeClass::W, int));
        }

        let (l, r, class, _) = self.numeric_common(left, right)?;
        let instr = comparison_instr(op, class);
        let temp = self.fresh_temp();
        writeln!(self.out, "\t{} =w {} {}, {}", temp, instr, l, r)?;
        Ok(Value::new(temp, QbeClass::W, int))
    }

    fn emit_bitwise(
        &mut self,
        op: BinOp,
        left: Value,
        right: Value,
    ) -> Result<Value, CodeGenError> {
        let left = self.integerize(left)?;
        let right = self.integerize(right)?;
        let (l, r, class, ty) = if left.class == QbeClass::W && right.class == QbeClass::W {
            (
                left.operand,
                right.operand,
                QbeClass::W,
                TypeDescriptor::new(BaseType::Integer),
            )
        } else {
            let long = TypeDescriptor::new(BaseType::Long);
            let l = self.promote(left, &long)?;
            let r = self.promote(right, &long)?;
            (l.operand, r.operand, QbeClass::L, long)
        };
        let instr = match op {
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            _ => unreachable!(),
        };
        let temp = self.fresh_temp();
        writeln!(self.out, "\t{} ={} {} {}, {}", temp, class, instr, l, r)?;
        Ok(Value::new(temp, class, ty))
    }

    /// Floats become Long before bitwise work.
    fn integerize(&mut self, value: Value) -> Result<Value, CodeGenError> {
        if value.class.is_float() {
            self.promote(value, &TypeDescriptor::new(BaseType::Long))
        } else {
            Ok(value)
        }
    }

    fn emit_unary(
        &mut self,
        cfg: &Cfg<'ast>,
        op: UnOp,
        operand: &Expr,
    ) -> Result<Value, CodeGenError> {
        let value = self.emit_expr(cfg, operand)?;
        match op {
            UnOp::Plus => Ok(value),
            UnOp::Neg => {
                let temp = self.fresh_temp();
                let zero = super::zero_of(value.class);
                writeln!(
                    self.out,
                    "\t{} ={} sub {}, {}",
                    temp, value.class, zero, value.operand
                )?;
                Ok(Value::new(temp, value.class, value.ty))
            }
            UnOp::Not => {
                let temp = self.fresh_temp();
                let instr = match value.class {
                    QbeClass::W => "ceqw",
                    QbeClass::L => "ceql",
                    QbeClass::S => "ceqs",
                    QbeClass::D => "ceqd",
                };
                let zero = super::zero_of(value.class);
                writeln!(
                    self.out,
                    "\t{} =w {} {}, {}",
                    temp, instr, value.operand, zero
                )?;
                Ok(Value::new(temp, QbeClass::W, TypeDescriptor::new(BaseType::Integer)))
            }
        }
    }

    // ---- calls ----

    fn emit_call(
        &mut self,
        cfg: &Cfg<'ast>,
        name: &str,
        args: &[Expr],
    ) -> Result<Value, CodeGenError> {
        // Array reads are spelled like calls
        if self.symbols.is_array(cfg.scope(), name) {
            return self.emit_array_read(cfg, name, args);
        }

        if builtins::is_foldable(name) {
            if let Some(folded) = self.try_fold(name, args)? {
                return Ok(folded);
            }
            return self.emit_intrinsic(cfg, name, args);
        }

        if let Some(value) = self.emit_special_builtin(cfg, name, args)? {
            return Ok(value);
        }

        if let Some((symbol, arity)) = builtins::math_builtin(name) {
            if args.len() != arity {
                return Ok(self.error_placeholder(
                    &format!("{} expects {} argument(s), got {}", name, arity, args.len()),
                    QbeClass::D,
                ));
            }
            let dbl = TypeDescriptor::new(BaseType::Double);
            let mut operands = Vec::with_capacity(args.len());
            for arg in args {
                let v = self.emit_expr(cfg, arg)?;
                operands.push(self.promote(v, &dbl)?.operand);
            }
            let call_args = operands
                .iter()
                .map(|o| format!("d {}", o))
                .collect::<Vec<_>>()
                .join(", ");
            let temp = self.fresh_temp();
            writeln!(self.out, "\t{} =d call ${}({})", temp, symbol, call_args)?;
            return Ok(Value::new(temp, QbeClass::D, dbl));
        }

        if let Some(builtin) = builtins::string_builtin(name) {
            if args.len() != builtin.args.len() {
                return Ok(self.error_placeholder(
                    &format!(
                        "{} expects {} argument(s), got {}",
                        name,
                        builtin.args.len(),
                        args.len()
                    ),
                    QbeClass::L,
                ));
            }
            let mut operands = Vec::with_capacity(args.len());
            for (arg, kind) in args.iter().zip(builtin.args) {
                let v = self.emit_expr(cfg, arg)?;
                let coerced = match kind {
                    StrArg::Desc => {
                        if !v.ty.is_string() {
                            return Ok(self.error_placeholder(
                                &format!("{} expects a string argument", name),
                                QbeClass::L,
                            ));
                        }
                        v
                    }
                    StrArg::Long => self.promote(v, &TypeDescriptor::new(BaseType::Long))?,
                };
                operands.push(coerced.operand);
            }
            let call_args = operands
                .iter()
                .map(|o| format!("l {}", o))
                .collect::<Vec<_>>()
                .join(", ");
            let temp = self.fresh_temp();
            writeln!(
                self.out,
                "\t{} =l call ${}({})",
                temp, builtin.symbol, call_args
            )?;
            let ty = match builtin.ret {
                StrRet::Desc => TypeDescriptor::new(BaseType::String),
                StrRet::Long => TypeDescriptor::new(BaseType::Long),
            };
            return Ok(Value::new(temp, QbeClass::L, ty));
        }

        if self.symbols.function(name).is_some() {
            return self.emit_user_call(cfg, name, args);
        }

        Ok(self.error_placeholder(&format!("unknown function '{}'", name), QbeClass::W))
    }

    fn emit_user_call(
        &mut self,
        cfg: &Cfg<'ast>,
        name: &str,
        args: &[Expr],
    ) -> Result<Value, CodeGenError> {
        let info = self
            .symbols
            .function(name)
            .expect("caller checked the function exists")
            .clone();
        if args.len() != info.params.len() {
            return Ok(self.error_placeholder(
                &format!(
                    "{} expects {} argument(s), got {}",
                    name,
                    info.params.len(),
                    args.len()
                ),
                info.return_type.qbe_class(),
            ));
        }
        let mut call_args = Vec::with_capacity(args.len());
        for (arg, (_, param_ty)) in args.iter().zip(info.params.iter()) {
            let v = self.emit_expr(cfg, arg)?;
            let coerced = self.promote(v, param_ty)?;
            call_args.push(format!("{} {}", param_ty.qbe_class(), coerced.operand));
        }
        let symbol = sanitize_qbe_name(&mangle(name));
        if info.is_sub {
            writeln!(self.out, "\tcall ${}({})", symbol, call_args.join(", "))?;
            return Ok(Value::new("0", QbeClass::W, TypeDescriptor::void()));
        }
        let temp = self.fresh_temp();
        writeln!(
            self.out,
            "\t{} ={} call ${}({})",
            temp,
            info.return_type.qbe_class(),
            symbol,
            call_args.join(", ")
        )?;
        Ok(Value::new(temp, info.return_type.qbe_class(), info.return_type))
    }

    /// Built-ins with bespoke shapes: descriptor field peeks, typed
    /// conversions, and the zero-argument runtime getters.
    fn emit_special_builtin(
        &mut self,
        cfg: &Cfg<'ast>,
        name: &str,
        args: &[Expr],
    ) -> Result<Option<Value>, CodeGenError> {
        let upper = name.to_ascii_uppercase();
        let value = match upper.as_str() {
            "LEN" => {
                let s = self.expect_string_arg(cfg, name, args)?;
                let addr = self.fresh_temp();
                writeln!(self.out, "\t{} =l add {}, 8", addr, s.operand)?;
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =l loadl {}", temp, addr)?;
                Value::new(temp, QbeClass::L, TypeDescriptor::new(BaseType::Long))
            }
            "ASC" => {
                let s = self.expect_string_arg(cfg, name, args)?;
                let data = self.fresh_temp();
                writeln!(self.out, "\t{} =l loadl {}", data, s.operand)?;
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =w loadub {}", temp, data)?;
                Value::new(temp, QbeClass::W, TypeDescriptor::new(BaseType::Integer))
            }
            "STRTYPE" => {
                let s = self.expect_string_arg(cfg, name, args)?;
                let addr = self.fresh_temp();
                writeln!(self.out, "\t{} =l add {}, 28", addr, s.operand)?;
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =w loadw {}", temp, addr)?;
                Value::new(temp, QbeClass::W, TypeDescriptor::new(BaseType::Integer))
            }
            "STR$" => {
                let v = self.single_arg(cfg, name, args)?;
                let temp = self.fresh_temp();
                if v.class.is_float() {
                    let d = self.promote(v, &TypeDescriptor::new(BaseType::Double))?;
                    writeln!(
                        self.out,
                        "\t{} =l call $string_from_double(d {})",
                        temp, d.operand
                    )?;
                } else {
                    let l = self.promote(v, &TypeDescriptor::new(BaseType::Long))?;
                    writeln!(
                        self.out,
                        "\t{} =l call $string_from_int(l {})",
                        temp, l.operand
                    )?;
                }
                Value::new(temp, QbeClass::L, TypeDescriptor::new(BaseType::String))
            }
            "VAL" => {
                let s = self.expect_string_arg(cfg, name, args)?;
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =d call $str_to_double(l {})", temp, s.operand)?;
                Value::new(temp, QbeClass::D, TypeDescriptor::new(BaseType::Double))
            }
            "RND" => {
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =d call $basic_rnd()", temp)?;
                Value::new(temp, QbeClass::D, TypeDescriptor::new(BaseType::Double))
            }
            "RAND" => {
                let v = self.single_arg(cfg, name, args)?;
                let w = self.promote(v, &TypeDescriptor::new(BaseType::Integer))?;
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =w call $basic_rand(w {})", temp, w.operand)?;
                Value::new(temp, QbeClass::W, TypeDescriptor::new(BaseType::Integer))
            }
            "TIMER" => {
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =d call $basic_timer()", temp)?;
                Value::new(temp, QbeClass::D, TypeDescriptor::new(BaseType::Double))
            }
            "INKEY$" => {
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =l call $basic_inkey()", temp)?;
                Value::new(temp, QbeClass::L, TypeDescriptor::new(BaseType::String))
            }
            "CSRLIN" => {
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =w call $basic_csrlin()", temp)?;
                Value::new(temp, QbeClass::W, TypeDescriptor::new(BaseType::Integer))
            }
            "POS" => {
                let v = self.single_arg(cfg, name, args)?;
                let w = self.promote(v, &TypeDescriptor::new(BaseType::Integer))?;
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =w call $basic_pos(w {})", temp, w.operand)?;
                Value::new(temp, QbeClass::W, TypeDescriptor::new(BaseType::Integer))
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn single_arg(
        &mut self,
        cfg: &Cfg<'ast>,
        name: &str,
        args: &[Expr],
    ) -> Result<Value, CodeGenError> {
        match args {
            [only] => self.emit_expr(cfg, only),
            _ => Ok(self.error_placeholder(
                &format!("{} expects 1 argument, got {}", name, args.len()),
                QbeClass::D,
            )),
        }
    }

    fn expect_string_arg(
        &mut self,
        cfg: &Cfg<'ast>,
        name: &str,
        args: &[Expr],
    ) -> Result<Value, CodeGenError> {
        let v = self.single_arg(cfg, name, args)?;
        if v.ty.is_string() {
            Ok(v)
        } else {
            Ok(self.error_placeholder(
                &format!("{} expects a string argument", name),
                QbeClass::L,
            ))
        }
    }

    // ---- intrinsic folding and inlining ----

    /// Fold FIX/CINT/ABS/SGN/MIN/MAX over numeric literals into a single
    /// copy of the result.
    fn try_fold(&mut self, name: &str, args: &[Expr]) -> Result<Option<Value>, CodeGenError> {
        enum FoldResult {
            Int(i64),
            Double(f64),
        }
        let mut literals = Vec::with_capacity(args.len());
        for arg in args {
            match arg.literal_number() {
                Some(v) => literals.push(v),
                None => return Ok(None),
            }
        }
        let upper = name.to_ascii_uppercase();
        let folded = match (upper.as_str(), literals.as_slice()) {
            ("FIX", [v]) => Some(FoldResult::Int(v.trunc() as i64)),
            ("CINT", [v]) => Some(FoldResult::Int(v.round() as i64)),
            ("SGN", [v]) => Some(FoldResult::Int(if *v > 0.0 {
                1
            } else if *v < 0.0 {
                -1
            } else {
                0
            })),
            ("ABS", [v]) => Some(FoldResult::Double(v.abs())),
            ("MIN", [a, b]) => Some(FoldResult::Double(a.min(*b))),
            ("MAX", [a, b]) => Some(FoldResult::Double(a.max(*b))),
            _ => None,
        };
        let Some(folded) = folded else {
            return Ok(None);
        };
        let temp = self.fresh_temp();
        let value = match folded {
            FoldResult::Int(i) => {
                writeln!(self.out, "\t{} =w copy {}", temp, i)?;
                Value::new(temp, QbeClass::W, TypeDescriptor::new(BaseType::Integer))
            }
            FoldResult::Double(d) => {
                writeln!(self.out, "\t{} =d copy d_{}", temp, format_double(d))?;
                Value::new(temp, QbeClass::D, TypeDescriptor::new(BaseType::Double))
            }
        };
        Ok(Some(value))
    }

    /// Non-foldable FIX/CINT/ABS/SGN/MIN/MAX: inline where the shape is
    /// known, otherwise lean on the runtime math entry points.
    fn emit_intrinsic(
        &mut self,
        cfg: &Cfg<'ast>,
        name: &str,
        args: &[Expr],
    ) -> Result<Value, CodeGenError> {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "ABS" => {
                let v = self.single_arg(cfg, name, args)?;
                if v.class.is_float() {
                    let d = self.promote(v, &TypeDescriptor::new(BaseType::Double))?;
                    let temp = self.fresh_temp();
                    writeln!(
                        self.out,
                        "\t{} =d call $basic_abs_double(d {})",
                        temp, d.operand
                    )?;
                    return Ok(Value::new(temp, QbeClass::D, TypeDescriptor::new(BaseType::Double)));
                }
                // Integer ABS inlines as compare-and-flip
                let long = TypeDescriptor::new(BaseType::Long);
                let v = self.promote(v, &long)?;
                let result = self.fresh_temp();
                writeln!(self.out, "\t{} =l copy {}", result, v.operand)?;
                let neg = self.fresh_temp();
                writeln!(self.out, "\t{} =w csltl {}, 0", neg, v.operand)?;
                let flip = self.fresh_label("abs_neg");
                let done = self.fresh_label("abs_end");
                writeln!(self.out, "\tjnz {}, @{}, @{}", neg, flip, done)?;
                writeln!(self.out, "@{}", flip)?;
                writeln!(self.out, "\t{} =l sub 0, {}", result, v.operand)?;
                writeln!(self.out, "\tjmp @{}", done)?;
                writeln!(self.out, "@{}", done)?;
                Ok(Value::new(result, QbeClass::L, long))
            }
            "SGN" => {
                let v = self.single_arg(cfg, name, args)?;
                let (gt, lt) = if v.class.is_float() {
                    let d = self.promote(v, &TypeDescriptor::new(BaseType::Double))?;
                    let gt = self.fresh_temp();
                    writeln!(self.out, "\t{} =w cgtd {}, d_0.0", gt, d.operand)?;
                    let lt = self.fresh_temp();
                    writeln!(self.out, "\t{} =w cltd {}, d_0.0", lt, d.operand)?;
                    (gt, lt)
                } else {
                    let l = self.promote(v, &TypeDescriptor::new(BaseType::Long))?;
                    let gt = self.fresh_temp();
                    writeln!(self.out, "\t{} =w csgtl {}, 0", gt, l.operand)?;
                    let lt = self.fresh_temp();
                    writeln!(self.out, "\t{} =w csltl {}, 0", lt, l.operand)?;
                    (gt, lt)
                };
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =w sub {}, {}", temp, gt, lt)?;
                Ok(Value::new(temp, QbeClass::W, TypeDescriptor::new(BaseType::Integer)))
            }
            "FIX" => {
                let v = self.single_arg(cfg, name, args)?;
                let d = self.promote(v, &TypeDescriptor::new(BaseType::Double))?;
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =d call $basic_trunc(d {})", temp, d.operand)?;
                Ok(Value::new(temp, QbeClass::D, TypeDescriptor::new(BaseType::Double)))
            }
            "CINT" => {
                let v = self.single_arg(cfg, name, args)?;
                let d = self.promote(v, &TypeDescriptor::new(BaseType::Double))?;
                let rounded = self.fresh_temp();
                writeln!(
                    self.out,
                    "\t{} =d call $basic_round(d {})",
                    rounded, d.operand
                )?;
                let int = TypeDescriptor::new(BaseType::Integer);
                self.promote(
                    Value::new(rounded, QbeClass::D, TypeDescriptor::new(BaseType::Double)),
                    &int,
                )
            }
            "MIN" | "MAX" => {
                let symbol = if upper == "MIN" {
                    "basic_fmin"
                } else {
                    "basic_fmax"
                };
                if args.len() != 2 {
                    return Ok(self.error_placeholder(
                        &format!("{} expects 2 arguments, got {}", name, args.len()),
                        QbeClass::D,
                    ));
                }
                let dbl = TypeDescriptor::new(BaseType::Double);
                let a = self.emit_expr(cfg, &args[0])?;
                let a = self.promote(a, &dbl)?;
                let b = self.emit_expr(cfg, &args[1])?;
                let b = self.promote(b, &dbl)?;
                let temp = self.fresh_temp();
                writeln!(
                    self.out,
                    "\t{} =d call ${}(d {}, d {})",
                    temp, symbol, a.operand, b.operand
                )?;
                Ok(Value::new(temp, QbeClass::D, dbl))
            }
            _ => Ok(self.error_placeholder(&format!("unknown intrinsic '{}'", name), QbeClass::D)),
        }
    }

    // ---- arrays ----

    fn emit_array_read(
        &mut self,
        cfg: &Cfg<'ast>,
        name: &str,
        indices: &[Expr],
    ) -> Result<Value, CodeGenError> {
        let (ptr, elem_ty) = self.emit_array_element(cfg, name, indices)?;
        if elem_ty.is_record() {
            Ok(Value::new(ptr, QbeClass::L, elem_ty))
        } else {
            self.load_from(&ptr, &elem_ty)
        }
    }

    /// Bounds-checked element address: both compares precede any memory
    /// access, and a failed check aborts through the runtime.
    pub(crate) fn emit_array_element(
        &mut self,
        cfg: &Cfg<'ast>,
        name: &str,
        indices: &[Expr],
    ) -> Result<(String, TypeDescriptor), CodeGenError> {
        let Some(info) = self.symbols.lookup_array(cfg.scope(), name) else {
            let v = self.error_placeholder(
                &format!("access to undeclared array '{}'", name),
                QbeClass::L,
            );
            return Ok((v.operand, TypeDescriptor::new(BaseType::Double)));
        };
        let elem_ty = info.element_type.clone();
        let dims = info.dimensions;
        if indices.len() != dims {
            let v = self.error_placeholder(
                &format!(
                    "array '{}' has {} dimension(s), {} index(es) given",
                    name,
                    dims,
                    indices.len()
                ),
                QbeClass::L,
            );
            return Ok((v.operand, elem_ty));
        }

        let desc = array_operand(name);
        let long = TypeDescriptor::new(BaseType::Long);

        let mut offsets = Vec::with_capacity(dims);
        let mut counts = Vec::with_capacity(dims);
        for (dim, index) in indices.iter().enumerate() {
            let idx = self.emit_expr(cfg, index)?;
            let idx = self.promote(idx, &long)?;

            let lo_addr = self.fresh_temp();
            writeln!(self.out, "\t{} =l add {}, {}", lo_addr, desc, 8 + dim * 16)?;
            let lo = self.fresh_temp();
            writeln!(self.out, "\t{} =l loadl {}", lo, lo_addr)?;
            let hi_addr = self.fresh_temp();
            writeln!(self.out, "\t{} =l add {}, {}", hi_addr, desc, 16 + dim * 16)?;
            let hi = self.fresh_temp();
            writeln!(self.out, "\t{} =l loadl {}", hi, hi_addr)?;

            let above = self.fresh_temp();
            writeln!(self.out, "\t{} =w csgel {}, {}", above, idx.operand, lo)?;
            let below = self.fresh_temp();
            writeln!(self.out, "\t{} =w cslel {}, {}", below, idx.operand, hi)?;
            let ok = self.fresh_temp();
            writeln!(self.out, "\t{} =w and {}, {}", ok, above, below)?;
            let ok_label = self.fresh_label("bounds_ok");
            let fail_label = self.fresh_label("bounds_fail");
            writeln!(self.out, "\tjnz {}, @{}, @{}", ok, ok_label, fail_label)?;
            writeln!(self.out, "@{}", fail_label)?;
            writeln!(
                self.out,
                "\tcall $basic_array_bounds_error(l {}, l {}, l {})",
                idx.operand, lo, hi
            )?;
            writeln!(self.out, "\thlt")?;
            writeln!(self.out, "@{}", ok_label)?;

            let rel = self.fresh_temp();
            writeln!(self.out, "\t{} =l sub {}, {}", rel, idx.operand, lo)?;
            offsets.push(rel);

            if dims == 2 && dim == 1 {
                let span = self.fresh_temp();
                writeln!(self.out, "\t{} =l sub {}, {}", span, hi, lo)?;
                let count = self.fresh_temp();
                writeln!(self.out, "\t{} =l add {}, 1", count, span)?;
                counts.push(count);
            }
        }

        // Row-major linear index
        let linear = if dims == 2 {
            let scaled = self.fresh_temp();
            writeln!(
                self.out,
                "\t{} =l mul {}, {}",
                scaled, offsets[0], counts[0]
            )?;
            let linear = self.fresh_temp();
            writeln!(self.out, "\t{} =l add {}, {}", linear, scaled, offsets[1])?;
            linear
        } else {
            offsets[0].clone()
        };

        let size_addr = self.fresh_temp();
        writeln!(self.out, "\t{} =l add {}, 40", size_addr, desc)?;
        let elem_size = self.fresh_temp();
        writeln!(self.out, "\t{} =l loadl {}", elem_size, size_addr)?;
        let byte_off = self.fresh_temp();
        writeln!(self.out, "\t{} =l mul {}, {}", byte_off, linear, elem_size)?;
        let base = self.fresh_temp();
        writeln!(self.out, "\t{} =l loadl {}", base, desc)?;
        let ptr = self.fresh_temp();
        writeln!(self.out, "\t{} =l add {}, {}", ptr, base, byte_off)?;
        Ok((ptr, elem_ty))
    }

    // ---- member chains ----

    /// Address of a record-shaped expression: a record variable, a
    /// record array element, or a (possibly nested) member.
    pub(crate) fn emit_address_of(
        &mut self,
        cfg: &Cfg<'ast>,
        expr: &Expr,
    ) -> Result<(String, TypeDescriptor), CodeGenError> {
        match expr {
            Expr::Variable(name) => match self.variable_place(cfg, name) {
                Some((VarPlace::Temp(temp), ty)) if ty.is_record() => Ok((temp, ty)),
                Some((_, ty)) => {
                    let v = self.error_placeholder(
                        &format!("'{}' is {} rather than a TYPE value", name, ty),
                        QbeClass::L,
                    );
                    Ok((v.operand, ty))
                }
                None => {
                    let v = self.error_placeholder(
                        &format!("reference to undeclared variable '{}'", name),
                        QbeClass::L,
                    );
                    Ok((v.operand, TypeDescriptor::unknown()))
                }
            },
            Expr::FunctionCall { name, args } if self.symbols.is_array(cfg.scope(), name) => {
                self.emit_array_element(cfg, name, args)
            }
            Expr::ArrayAccess { name, indices } if !indices.is_empty() => {
                self.emit_array_element(cfg, name, indices)
            }
            Expr::MemberAccess { object, member } => {
                let (base, base_ty) = self.emit_address_of(cfg, object)?;
                let Some(record) = base_ty.record_name() else {
                    let v = self.error_placeholder(
                        &format!("field '{}' on a non-TYPE value", member),
                        QbeClass::L,
                    );
                    return Ok((v.operand, TypeDescriptor::unknown()));
                };
                let record = record.to_string();
                let loc = crate::ast::SourceLocation::new(Default::default(), 0);
                match self.symbols.field_of(&record, member, &loc) {
                    Ok((offset, field_ty)) => {
                        let addr = self.fresh_temp();
                        writeln!(self.out, "\t{} =l add {}, {}", addr, base, offset)?;
                        Ok((addr, field_ty))
                    }
                    Err(d) => {
                        let v = self.error_placeholder(&d.message, QbeClass::L);
                        Ok((v.operand, TypeDescriptor::unknown()))
                    }
                }
            }
            _ => {
                let v = self.error_placeholder("expression has no address", QbeClass::L);
                Ok((v.operand, TypeDescriptor::unknown()))
            }
        }
    }

    // ---- promotion ----

    /// Convert a value to the representation of `to`: sign-extension
    /// between integer widths, int/float conversions, and runtime string
    /// conversions.
    pub(crate) fn promote(
        &mut self,
        value: Value,
        to: &TypeDescriptor,
    ) -> Result<Value, CodeGenError> {
        let to_class = to.qbe_class();

        // String conversions go through the runtime
        if to.is_string() && !value.ty.is_string() {
            let temp = self.fresh_temp();
            if value.class.is_float() {
                let d = self.promote(value, &TypeDescriptor::new(BaseType::Double))?;
                writeln!(
                    self.out,
                    "\t{} =l call $string_from_double(d {})",
                    temp, d.operand
                )?;
            } else {
                let l = self.promote(value, &TypeDescriptor::new(BaseType::Long))?;
                writeln!(
                    self.out,
                    "\t{} =l call $string_from_int(l {})",
                    temp, l.operand
                )?;
            }
            return Ok(Value::new(temp, QbeClass::L, to.clone()));
        }
        if value.ty.is_string() && !to.is_string() {
            if to_class == QbeClass::D || to_class == QbeClass::S {
                let temp = self.fresh_temp();
                writeln!(
                    self.out,
                    "\t{} =d call $str_to_double(l {})",
                    temp, value.operand
                )?;
                let d = Value::new(temp, QbeClass::D, TypeDescriptor::new(BaseType::Double));
                return if to_class == QbeClass::D {
                    Ok(Value::new(d.operand, QbeClass::D, to.clone()))
                } else {
                    self.promote(d, to)
                };
            }
            let temp = self.fresh_temp();
            writeln!(
                self.out,
                "\t{} =w call $str_to_int(l {})",
                temp, value.operand
            )?;
            let w = Value::new(temp, QbeClass::W, TypeDescriptor::new(BaseType::Integer));
            return if to_class == QbeClass::W {
                Ok(Value::new(w.operand, QbeClass::W, to.clone()))
            } else {
                self.promote(w, to)
            };
        }

        if value.class == to_class {
            return Ok(Value::new(value.operand, to_class, to.clone()));
        }

        let temp = self.fresh_temp();
        match (value.class, to_class) {
            (QbeClass::W, QbeClass::L) => {
                writeln!(self.out, "\t{} =l extsw {}", temp, value.operand)?;
            }
            (QbeClass::L, QbeClass::W) => {
                writeln!(self.out, "\t{} =w copy {}", temp, value.operand)?;
            }
            (QbeClass::W, QbeClass::D) => {
                let wide = self.fresh_temp();
                writeln!(self.out, "\t{} =l extsw {}", wide, value.operand)?;
                writeln!(self.out, "\t{} =d sltof {}", temp, wide)?;
            }
            (QbeClass::L, QbeClass::D) => {
                writeln!(self.out, "\t{} =d sltof {}", temp, value.operand)?;
            }
            (QbeClass::D, QbeClass::L) => {
                writeln!(self.out, "\t{} =l dtosi {}", temp, value.operand)?;
            }
            (QbeClass::D, QbeClass::W) => {
                let wide = self.fresh_temp();
                writeln!(self.out, "\t{} =l dtosi {}", wide, value.operand)?;
                writeln!(self.out, "\t{} =w copy {}", temp, wide)?;
            }
            (QbeClass::S, QbeClass::D) => {
                writeln!(self.out, "\t{} =d exts {}", temp, value.operand)?;
            }
            (QbeClass::D, QbeClass::S) => {
                writeln!(self.out, "\t{} =s truncd {}", temp, value.operand)?;
            }
            (QbeClass::W, QbeClass::S) => {
                let wide = self.fresh_temp();
                writeln!(self.out, "\t{} =l extsw {}", wide, value.operand)?;
                writeln!(self.out, "\t{} =s sltof {}", temp, wide)?;
            }
            (QbeClass::L, QbeClass::S) => {
                writeln!(self.out, "\t{} =s sltof {}", temp, value.operand)?;
            }
            (QbeClass::S, QbeClass::W) => {
                writeln!(self.out, "\t{} =w stosi {}", temp, value.operand)?;
            }
            (QbeClass::S, QbeClass::L) => {
                writeln!(self.out, "\t{} =l stosi {}", temp, value.operand)?;
            }
            (a, b) => {
                return Err(CodeGenError::Logic(format!(
                    "no promotion from {} to {}",
                    a, b
                )));
            }
        }
        Ok(Value::new(temp, to_class, to.clone()))
    }

    /// Reduce a value to a `w` branch condition: nonzero means true.
    pub(crate) fn to_condition(&mut self, value: Value) -> Result<String, CodeGenError> {
        match value.class {
            QbeClass::W => Ok(value.operand),
            QbeClass::L => {
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =w cnel {}, 0", temp, value.operand)?;
                Ok(temp)
            }
            QbeClass::D => {
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =w cned {}, d_0.0", temp, value.operand)?;
                Ok(temp)
            }
            QbeClass::S => {
                let temp = self.fresh_temp();
                writeln!(self.out, "\t{} =w cnes {}, s_0.0", temp, value.operand)?;
                Ok(temp)
            }
        }
    }
}

/// Comparison instruction for a (numeric) class.
fn comparison_instr(op: BinOp, class: QbeClass) -> &'static str {
    match (op, class) {
        (BinOp::Eq, QbeClass::W) => "ceqw",
        (BinOp::Eq, QbeClass::L) => "ceql",
        (BinOp::Eq, QbeClass::D) => "ceqd",
        (BinOp::Eq, QbeClass::S) => "ceqs",
        (BinOp::Ne, QbeClass::W) => "cnew",
        (BinOp::Ne, QbeClass::L) => "cnel",
        (BinOp::Ne, QbeClass::D) => "cned",
        (BinOp::Ne, QbeClass::S) => "cnes",
        (BinOp::Lt, QbeClass::W) => "csltw",
        (BinOp::Lt, QbeClass::L) => "csltl",
        (BinOp::Lt, QbeClass::D) => "cltd",
        (BinOp::Lt, QbeClass::S) => "clts",
        (BinOp::Le, QbeClass::W) => "cslew",
        (BinOp::Le, QbeClass::L) => "cslel",
        (BinOp::Le, QbeClass::D) => "cled",
        (BinOp::Le, QbeClass::S) => "cles",
        (BinOp::Gt, QbeClass::W) => "csgtw",
        (BinOp::Gt, QbeClass::L) => "csgtl",
        (BinOp::Gt, QbeClass::D) => "cgtd",
        (BinOp::Gt, QbeClass::S) => "cgts",
        (BinOp::Ge, QbeClass::W) => "csgew",
        (BinOp::Ge, QbeClass::L) => "csgel",
        (BinOp::Ge, QbeClass::D) => "cged",
        (BinOp::Ge, QbeClass::S) => "cges",
        _ => unreachable!("not a comparison operator"),
    }
}

/// The `%var_<mangled>` temporary for a scalar.
pub(crate) fn scalar_operand(name: &str) -> String {
    format!("%var_{}", sanitize_qbe_name(&mangle(name)))
}

/// The `%arr_<mangled>` descriptor temporary for an array.
pub(crate) fn array_operand(name: &str) -> String {
    format!("%arr_{}", sanitize_qbe_name(&mangle(name)))
}
