//! QBE IL generation
//!
//! Generates QBE intermediate language as text and leaves native code to
//! the external `qbe` back end. The emitter is driven by the CFG, not by
//! re-walking the AST: a single cursor visits blocks in id order, emits
//! each block's statements, and synthesizes the block epilogue from the
//! graph's structure maps.
//!
//! Submodules:
//! - [`expr`]: SSA expression emission (literals through member access)
//! - [`statements`]: straight-line statement lowering
//! - [`control_flow`]: the block cursor, loop/select/try synthesis,
//!   GOSUB/RETURN dispatch
//! - [`program`]: whole-unit assembly (header, data section, routines)

pub mod control_flow;
pub mod expr;
pub mod program;
pub mod statements;

pub use program::emit_program;

use crate::cfg::{BlockId, Cfg, ProgramCfg};
use crate::config::CompilerConfig;
use crate::datapre::DataTable;
use crate::symbols::SymbolTable;
use crate::types::{QbeClass, TypeDescriptor, sanitize_qbe_name};
use std::collections::HashMap;
use std::fmt;

/// Error type for code generation.
///
/// Logic errors mark violated emitter invariants; formatting errors come
/// from writing into the output buffer. Recoverable inconsistencies do
/// not surface here at all: they emit an `# ERROR:` comment plus a safe
/// placeholder and set the error flag instead.
#[derive(Debug)]
pub enum CodeGenError {
    Logic(String),
    Format(fmt::Error),
}

impl fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeGenError::Logic(s) => write!(f, "{}", s),
            CodeGenError::Format(e) => write!(f, "IL generation error: {}", e),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<String> for CodeGenError {
    fn from(s: String) -> Self {
        CodeGenError::Logic(s)
    }
}

impl From<fmt::Error> for CodeGenError {
    fn from(e: fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}

/// An emitted expression: the operand text (a `%temp`, a literal, or a
/// `$symbol`), its ABI class, and the BASIC type it carries.
#[derive(Debug, Clone)]
pub struct Value {
    pub operand: String,
    pub class: QbeClass,
    pub ty: TypeDescriptor,
}

impl Value {
    pub fn new(operand: impl Into<String>, class: QbeClass, ty: TypeDescriptor) -> Self {
        Value {
            operand: operand.into(),
            class,
            ty,
        }
    }
}

/// Emission statistics reported on demand by the driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmitStats {
    pub instructions: usize,
    pub labels: usize,
    pub variables: usize,
    pub arrays: usize,
    pub functions: usize,
}

pub struct Emitter<'a, 'ast> {
    pub(crate) out: String,
    pub(crate) symbols: &'a SymbolTable,
    pub(crate) config: &'a CompilerConfig,
    pub(crate) data: &'a DataTable,
    pub(crate) program_cfg: &'a ProgramCfg<'ast>,
    /// Fresh `%t<N>` counter, reset per function
    temp_counter: usize,
    /// Synthesized local-label counter, monotonic over the whole unit
    label_counter: usize,
    /// Interned string literals in first-use order
    pub(crate) string_pool: Vec<String>,
    string_pool_index: HashMap<String, usize>,
    /// Selector value and type per SELECT dispatch block
    pub(crate) select_values: HashMap<BlockId, Value>,
    /// Blocks that uninstall a TRY handler on normal exit, with a count
    /// for directly nested regions ending on the same block
    pub(crate) try_exit_counts: HashMap<BlockId, usize>,
    /// Set once the current block has emitted a terminator
    pub(crate) block_done: bool,
    pub(crate) error_flag: bool,
}

impl<'a, 'ast> Emitter<'a, 'ast> {
    pub fn new(
        symbols: &'a SymbolTable,
        config: &'a CompilerConfig,
        data: &'a DataTable,
        program_cfg: &'a ProgramCfg<'ast>,
    ) -> Self {
        Emitter {
            out: String::new(),
            symbols,
            config,
            data,
            program_cfg,
            temp_counter: 0,
            label_counter: 0,
            string_pool: Vec::new(),
            string_pool_index: HashMap::new(),
            select_values: HashMap::new(),
            try_exit_counts: HashMap::new(),
            block_done: false,
            error_flag: false,
        }
    }

    pub(crate) fn fresh_temp(&mut self) -> String {
        let name = format!("%t{}", self.temp_counter);
        self.temp_counter += 1;
        name
    }

    pub(crate) fn reset_function_state(&mut self) {
        self.temp_counter = 0;
        self.select_values.clear();
        self.try_exit_counts.clear();
        self.block_done = false;
    }

    /// A unique synthesized label, `<prefix>_<n>`, sanitized for QBE.
    pub(crate) fn fresh_label(&mut self, prefix: &str) -> String {
        let name = format!("{}_{}", sanitize_qbe_name(prefix), self.label_counter);
        self.label_counter += 1;
        name
    }

    /// The QBE label of a CFG block. Routine exits keep their special
    /// names so the generated IL reads like the source structure.
    pub(crate) fn block_label(cfg: &Cfg<'_>, id: BlockId) -> String {
        if id == cfg.exit_block {
            if cfg.is_main() {
                "exit".to_string()
            } else {
                "tidy_exit".to_string()
            }
        } else {
            format!("bb{}", id)
        }
    }

    /// Intern a string literal; duplicates share one `$str.N` symbol.
    pub(crate) fn intern_string(&mut self, text: &str) -> usize {
        if let Some(&idx) = self.string_pool_index.get(text) {
            return idx;
        }
        let idx = self.string_pool.len();
        self.string_pool.push(text.to_string());
        self.string_pool_index.insert(text.to_string(), idx);
        idx
    }

    /// Report a recoverable inconsistency: a diagnostic comment, a zero
    /// value of the expected class, and the global error flag. Downstream
    /// QBE still parses the output.
    pub(crate) fn error_placeholder(&mut self, message: &str, class: QbeClass) -> Value {
        use std::fmt::Write as _;
        self.error_flag = true;
        let _ = writeln!(self.out, "\t# ERROR: {}", message);
        let temp = self.fresh_temp();
        let zero = zero_of(class);
        let _ = writeln!(self.out, "\t{} ={} copy {}", temp, class, zero);
        Value::new(temp, class, TypeDescriptor::unknown())
    }
}

/// The zero constant of an ABI class.
pub(crate) fn zero_of(class: QbeClass) -> &'static str {
    match class {
        QbeClass::W | QbeClass::L => "0",
        QbeClass::S => "s_0.0",
        QbeClass::D => "d_0.0",
    }
}

/// Format a double constant with a fixed (never exponential) decimal
/// point, as `d_` literals require.
pub(crate) fn format_double(v: f64) -> String {
    let plain = format!("{}", v);
    let fixed = if plain.contains('e') || plain.contains('E') {
        // Expand scientific notation; trailing zeros are harmless
        let expanded = format!("{:.17}", v);
        expanded.trim_end_matches('0').to_string()
    } else {
        plain
    };
    if fixed.contains('.') {
        if fixed.ends_with('.') {
            format!("{}0", fixed)
        } else {
            fixed
        }
    } else {
        format!("{}.0", fixed)
    }
}

/// Escape a string for a QBE data directive: `\n \r \t \\ \"` plus
/// `\xHH` for any byte outside the printable ASCII range.
pub(crate) fn escape_data_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            32..=126 => out.push(byte as char),
            _ => out.push_str(&format!("\\x{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_double() {
        assert_eq!(format_double(5.0), "5.0");
        assert_eq!(format_double(10.5), "10.5");
        assert_eq!(format_double(-2.25), "-2.25");
        assert_eq!(format_double(0.0), "0.0");
        let big = format_double(1e21);
        assert!(!big.contains('e') && !big.contains('E'), "{}", big);
    }

    #[test]
    fn test_escape_data_string() {
        assert_eq!(escape_data_string("hi"), "hi");
        assert_eq!(escape_data_string("a\nb"), "a\\nb");
        assert_eq!(escape_data_string("a\"b\\c"), "a\\\"b\\\\c");
        assert_eq!(escape_data_string("caf\u{e9}"), "caf\\xC3\\xA9");
    }

    #[test]
    fn test_zero_of() {
        assert_eq!(zero_of(QbeClass::W), "0");
        assert_eq!(zero_of(QbeClass::D), "d_0.0");
        assert_eq!(zero_of(QbeClass::S), "s_0.0");
    }
}
