//! Whole-program emission
//!
//! Assembles the final IL: header comment, data section (DATA vector and
//! tags, the GOSUB return stack, the global vector, interned strings),
//! `main` with its `@start` prologue and `@exit` cleanup, then every
//! FUNCTION/SUB with a `tidy_exit` that frees local arrays.

use super::expr::{array_operand, scalar_operand};
use super::{CodeGenError, EmitStats, Emitter, format_double, escape_data_string};
use crate::ast::{DataConst, StatementKind};
use crate::cfg::{Cfg, ProgramCfg};
use crate::config::CompilerConfig;
use crate::datapre::DataTable;
use crate::symbols::{Scope, SymbolTable};
use crate::types::{BaseType, TypeDescriptor};
use std::fmt::Write as _;

/// Lower the whole unit to QBE IL. Returns the IL text, emission
/// statistics, and whether any recoverable emitter error was flagged.
pub fn emit_program<'ast>(
    program_cfg: &ProgramCfg<'ast>,
    symbols: &SymbolTable,
    config: &CompilerConfig,
    data: &DataTable,
) -> Result<(String, EmitStats, bool), CodeGenError> {
    let mut emitter = Emitter::new(symbols, config, data, program_cfg);

    emitter.emit_main()?;
    for cfg in &program_cfg.functions {
        writeln!(emitter.out)?;
        emitter.emit_function(cfg)?;
    }

    let body = std::mem::take(&mut emitter.out);
    let mut text = String::with_capacity(body.len() + 1024);
    writeln!(text, "# QBE IL generated by fbc")?;
    writeln!(text)?;
    text.push_str(&emitter.data_section()?);
    writeln!(text)?;
    text.push_str(&body);

    let stats = EmitStats {
        instructions: text.lines().filter(|l| l.starts_with('\t')).count(),
        labels: text.lines().filter(|l| l.starts_with('@')).count(),
        variables: symbols.main.variables.len()
            + symbols
                .routines
                .values()
                .map(|s| s.variables.len())
                .sum::<usize>(),
        arrays: symbols.main.arrays.len()
            + symbols
                .routines
                .values()
                .map(|s| s.arrays.len())
                .sum::<usize>(),
        functions: program_cfg.functions.len(),
    };
    Ok((text, stats, emitter.error_flag))
}

impl<'a, 'ast> Emitter<'a, 'ast> {
    // ---- data section ----

    pub(crate) fn data_section(&mut self) -> Result<String, CodeGenError> {
        let mut out = String::new();

        // DATA values with a parallel tag vector (0 int, 1 double,
        // 2 string)
        let mut items = Vec::new();
        let mut tags = Vec::new();
        let mut data_strings = Vec::new();
        for value in &self.data.values {
            match value {
                DataConst::Int(i) => {
                    items.push(format!("l {}", i));
                    tags.push(0u8);
                }
                DataConst::Double(d) => {
                    items.push(format!("d d_{}", format_double(*d)));
                    tags.push(1);
                }
                DataConst::Str(s) => {
                    let idx = data_strings.len();
                    data_strings.push(s.clone());
                    items.push(format!("l $data_str.{}", idx));
                    tags.push(2);
                }
            }
        }
        if items.is_empty() {
            items.push("l 0".to_string());
            tags.push(0);
        }
        writeln!(out, "export data $__basic_data = {{ {} }}", items.join(", "))?;
        let tag_items = tags
            .iter()
            .map(|t| format!("b {}", t))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(out, "export data $__basic_data_types = {{ {} }}", tag_items)?;
        writeln!(out, "export data $__basic_data_ptr = {{ l 0 }}")?;

        // GOSUB return stack
        let zeros = vec!["w 0"; self.config.gosub_depth].join(", ");
        writeln!(out, "data $return_stack = {{ {} }}", zeros)?;
        writeln!(out, "data $return_sp = {{ w 0 }}")?;

        let slots = self.symbols.global_slot_count();
        if slots > 0 {
            writeln!(out, "export data $__global_vector = {{ z {} }}", slots * 8)?;
        }

        for (idx, text) in data_strings.iter().enumerate() {
            writeln!(
                out,
                "data $data_str.{} = {{ b \"{}\", b 0 }}",
                idx,
                escape_data_string(text)
            )?;
        }
        for (idx, text) in self.string_pool.iter().enumerate() {
            writeln!(
                out,
                "data $str.{} = {{ b \"{}\", b 0 }}",
                idx,
                escape_data_string(text)
            )?;
        }
        Ok(out)
    }

    // ---- prologues ----

    /// Initialize every scalar of a scope. Sorted by name so rebuilds
    /// are byte-identical.
    fn emit_variable_decls(
        &mut self,
        scope: &Scope,
        routine: Option<&str>,
        skip: &[String],
    ) -> Result<(), CodeGenError> {
        let mut names: Vec<&String> = scope.variables.keys().collect();
        names.sort();
        for name in names {
            if skip.iter().any(|s| s == name) {
                continue;
            }
            let info = &scope.variables[name];
            if info.global_slot.is_some() {
                // Global storage lives in the data section, already zero
                continue;
            }
            if self.symbols.is_for_variable(routine, name) {
                writeln!(self.out, "\t%{} =l copy 0", crate::types::sanitize_qbe_name(name))?;
                continue;
            }
            let operand = scalar_operand(name);
            match &info.ty.base {
                BaseType::UserDefined(record) => {
                    let size = self
                        .symbols
                        .record_layout(record)
                        .map(|l| l.size)
                        .unwrap_or(8);
                    writeln!(self.out, "\t{} =l alloc8 {}", operand, size)?;
                    writeln!(self.out, "\tcall $memset(l {}, w 0, l {})", operand, size)?;
                }
                BaseType::String | BaseType::Unicode => {
                    writeln!(self.out, "\t{} =l call $basic_empty_string()", operand)?;
                }
                _ => {
                    let class = info.ty.qbe_class();
                    writeln!(
                        self.out,
                        "\t{} ={} copy {}",
                        operand,
                        class,
                        super::zero_of(class)
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Stack-allocate and reset every array descriptor of a scope
    /// (data null, upper bounds -1, element size 0, no dimensions).
    fn emit_array_decls(&mut self, scope: &Scope) -> Result<(), CodeGenError> {
        let mut names: Vec<&String> = scope.arrays.keys().collect();
        names.sort();
        for name in names {
            let operand = array_operand(name);
            writeln!(self.out, "\t{} =l alloc8 64", operand)?;
            writeln!(self.out, "\tcall $memset(l {}, w 0, l 64)", operand)?;
            let hi1 = self.fresh_temp();
            writeln!(self.out, "\t{} =l add {}, 16", hi1, operand)?;
            writeln!(self.out, "\tstorel -1, {}", hi1)?;
            let hi2 = self.fresh_temp();
            writeln!(self.out, "\t{} =l add {}, 32", hi2, operand)?;
            writeln!(self.out, "\tstorel -1, {}", hi2)?;
        }
        Ok(())
    }

    fn emit_array_frees(&mut self, scope: &Scope) -> Result<(), CodeGenError> {
        let mut names: Vec<&String> = scope.arrays.keys().collect();
        names.sort();
        for name in names {
            writeln!(
                self.out,
                "\tcall $array_descriptor_destroy(l {})",
                array_operand(name)
            )?;
        }
        Ok(())
    }

    // ---- routines ----

    pub(crate) fn emit_main(&mut self) -> Result<(), CodeGenError> {
        self.reset_function_state();
        let symbols = self.symbols;
        let pcfg = self.program_cfg;
        let cfg = &pcfg.main;

        writeln!(self.out, "export function w $main() {{")?;
        writeln!(self.out, "@start")?;
        writeln!(self.out, "\tcall $basic_runtime_init()")?;
        self.emit_variable_decls(&symbols.main, None, &[])?;
        self.emit_array_decls(&symbols.main)?;
        writeln!(
            self.out,
            "\tjmp @{}",
            Self::block_label(cfg, cfg.entry_block)
        )?;

        self.emit_routine_blocks(cfg)?;

        writeln!(self.out, "@exit")?;
        self.emit_array_frees(&self.symbols.main)?;
        writeln!(self.out, "\tcall $basic_runtime_cleanup()")?;
        writeln!(self.out, "\tret 0")?;
        writeln!(self.out, "}}")?;
        Ok(())
    }

    pub(crate) fn emit_function(&mut self, cfg: &Cfg<'ast>) -> Result<(), CodeGenError> {
        if cfg.def_statement.is_some() {
            return self.emit_def_function(cfg);
        }
        self.reset_function_state();

        let params = cfg
            .params
            .iter()
            .map(|(name, ty)| format!("{} {}", ty.qbe_class(), scalar_operand(name)))
            .collect::<Vec<_>>()
            .join(", ");
        let is_sub = cfg.return_type.base == BaseType::Void;
        let symbol = crate::types::sanitize_qbe_name(&cfg.name);
        if is_sub {
            writeln!(self.out, "export function ${}({}) {{", symbol, params)?;
        } else {
            writeln!(
                self.out,
                "export function {} ${}({}) {{",
                cfg.return_type.qbe_class(),
                symbol,
                params
            )?;
        }
        writeln!(self.out, "@start")?;

        let param_names: Vec<String> = cfg
            .params
            .iter()
            .map(|(name, _)| crate::types::mangle(name))
            .collect();
        let symbols = self.symbols;
        if let Some(scope) = symbols.routines.get(&cfg.name) {
            self.emit_variable_decls(scope, Some(&cfg.name), &param_names)?;
            self.emit_array_decls(scope)?;
        }
        writeln!(
            self.out,
            "\tjmp @{}",
            Self::block_label(cfg, cfg.entry_block)
        )?;

        self.emit_routine_blocks(cfg)?;

        // The tidy exit: free local arrays, then leave
        writeln!(self.out, "@tidy_exit")?;
        if let Some(scope) = symbols.routines.get(&cfg.name) {
            self.emit_array_frees(scope)?;
        }
        if is_sub {
            writeln!(self.out, "\tret")?;
        } else {
            writeln!(self.out, "\tret {}", scalar_operand(&cfg.name))?;
        }
        writeln!(self.out, "}}")?;
        Ok(())
    }

    /// `DEF FN`: the body is a single expression, returned after
    /// coercion to the declared type.
    fn emit_def_function(&mut self, cfg: &Cfg<'ast>) -> Result<(), CodeGenError> {
        self.reset_function_state();
        let stmt = cfg
            .def_statement
            .expect("caller checked def_statement is set");
        let StatementKind::Def { body, .. } = &stmt.kind else {
            return Err(CodeGenError::Logic(
                "DEF CFG without a DEF statement".to_string(),
            ));
        };

        let params = cfg
            .params
            .iter()
            .map(|(name, ty)| format!("{} {}", ty.qbe_class(), scalar_operand(name)))
            .collect::<Vec<_>>()
            .join(", ");
        let symbol = crate::types::sanitize_qbe_name(&cfg.name);
        writeln!(
            self.out,
            "export function {} ${}({}) {{",
            cfg.return_type.qbe_class(),
            symbol,
            params
        )?;
        writeln!(self.out, "@start")?;
        let value = self.emit_expr(cfg, body)?;
        let ret_ty: TypeDescriptor = cfg.return_type.clone();
        let coerced = self.promote(value, &ret_ty)?;
        writeln!(self.out, "\tret {}", coerced.operand)?;
        writeln!(self.out, "}}")?;
        Ok(())
    }
}
