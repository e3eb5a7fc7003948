//! FasterBASIC compiler library
//!
//! Compiles FasterBASIC source to QBE intermediate language and, through
//! the external `qbe` back end and the system C compiler, to native
//! executables.
//!
//! Pipeline: parse -> DATA preprocessing -> CFG construction (which
//! populates the symbol table) -> QBE IL emission. Each phase collects
//! its diagnostics and the driver aborts at the end of a phase that
//! reported any.
//!
//! ```rust,ignore
//! use fbc::{CompilerConfig, compile_source};
//!
//! let config = CompilerConfig::default();
//! let out = compile_source("PRINT \"HI\"\n", "hello.bas", &config)?;
//! println!("{}", out.il);
//! ```

pub mod ast;
pub mod builtins;
pub mod cfg;
pub mod codegen;
pub mod config;
pub mod datapre;
pub mod diag;
pub mod lexer;
pub mod parser;
pub mod symbols;
pub mod types;

pub use cfg::build_program_cfg;
pub use codegen::{EmitStats, emit_program};
pub use config::{CompilerConfig, NumericDefault};
pub use diag::Diagnostic;
pub use parser::Parser;
pub use symbols::SymbolTable;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Result of a successful compilation.
pub struct CompileOutput {
    pub il: String,
    pub stats: EmitStats,
    pub elapsed: Duration,
}

/// Which phase rejected the unit.
#[derive(Debug)]
pub enum CompileError {
    Io(String),
    Parse(Vec<Diagnostic>),
    Semantic(Vec<Diagnostic>),
    CodeGen(String),
    Toolchain(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Io(msg) => write!(f, "{}", msg),
            CompileError::Parse(diags) => {
                write!(f, "syntax error")?;
                for d in diags {
                    write!(f, "\n{}", d)?;
                }
                Ok(())
            }
            CompileError::Semantic(diags) => {
                write!(f, "semantic error")?;
                for d in diags {
                    write!(f, "\n{}", d)?;
                }
                Ok(())
            }
            CompileError::CodeGen(msg) => write!(f, "code generation error: {}", msg),
            CompileError::Toolchain(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CompileError {}

/// True when an environment toggle such as TRACE_CFG is switched on.
fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| !v.is_empty() && v != "0").unwrap_or(false)
}

/// Compile one source unit to QBE IL.
///
/// The TRACE_AST / TRACE_CFG / TRACE_SYMBOLS / DEBUG_IL environment
/// toggles dump the corresponding structure to stderr even when the
/// phase afterwards aborts, so partial results stay inspectable.
pub fn compile_source(
    source: &str,
    file: impl Into<PathBuf>,
    config: &CompilerConfig,
) -> Result<CompileOutput, CompileError> {
    let started = Instant::now();

    let (program, parse_diags) = Parser::new(source, file).parse();
    if env_flag("TRACE_AST") {
        eprintln!("{:#?}", program);
    }
    if !parse_diags.is_empty() {
        return Err(CompileError::Parse(parse_diags));
    }

    let data = datapre::preprocess(&program);

    let mut symbols = SymbolTable::new();
    let (program_cfg, cfg_diags) = build_program_cfg(&program, &mut symbols, config);
    if env_flag("TRACE_CFG") {
        eprintln!("{}", program_cfg.dump());
    }
    if env_flag("TRACE_SYMBOLS") {
        eprintln!("{}", symbols.dump());
    }
    if !cfg_diags.is_empty() {
        return Err(CompileError::Semantic(cfg_diags));
    }

    let (il, stats, had_errors) = emit_program(&program_cfg, &symbols, config, &data)
        .map_err(|e| CompileError::CodeGen(e.to_string()))?;
    if env_flag("DEBUG_IL") {
        eprintln!("{}", il);
    }
    if had_errors {
        return Err(CompileError::CodeGen(
            "emitter reported unresolved constructs (see # ERROR: comments)".to_string(),
        ));
    }

    Ok(CompileOutput {
        il,
        stats,
        elapsed: started.elapsed(),
    })
}

/// Compile a file from disk.
pub fn compile_file(input: &Path, config: &CompilerConfig) -> Result<CompileOutput, CompileError> {
    let source = std::fs::read_to_string(input)
        .map_err(|e| CompileError::Io(format!("cannot read {}: {}", input.display(), e)))?;
    compile_source(&source, input, config)
}

/// Cache for the qbe availability probe; it only runs once per process.
static QBE_CHECKED: OnceLock<Result<(), String>> = OnceLock::new();

/// Check that the external `qbe` back end can be spawned.
fn check_qbe_available() -> Result<(), String> {
    QBE_CHECKED
        .get_or_init(|| {
            Command::new("qbe")
                .arg("-h")
                .output()
                .map(|_| ())
                .map_err(|e| {
                    format!(
                        "failed to run qbe: {}. Install the QBE back end and put it on PATH.",
                        e
                    )
                })
        })
        .clone()
}

/// Run `qbe` over an IL file, producing native assembly.
pub fn assemble_il(il_path: &Path, asm_path: &Path) -> Result<(), CompileError> {
    check_qbe_available().map_err(CompileError::Toolchain)?;
    let output = Command::new("qbe")
        .arg("-o")
        .arg(asm_path)
        .arg(il_path)
        .output()
        .map_err(|e| CompileError::Toolchain(format!("failed to run qbe: {}", e)))?;
    if !output.status.success() {
        return Err(CompileError::Toolchain(format!(
            "qbe failed on {}:\n{}",
            il_path.display(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Link assembly against the FasterBASIC C runtime. The runtime archive
/// can be pinned with FBC_RUNTIME_LIB; otherwise `-lfbrt` is used.
pub fn link_executable(asm_path: &Path, exe_path: &Path) -> Result<(), CompileError> {
    let mut cmd = Command::new("cc");
    cmd.arg(asm_path).arg("-o").arg(exe_path);
    match std::env::var("FBC_RUNTIME_LIB") {
        Ok(lib) if !lib.is_empty() => {
            cmd.arg(lib);
        }
        _ => {
            cmd.arg("-lfbrt");
        }
    }
    cmd.arg("-lm");
    let output = cmd
        .output()
        .map_err(|e| CompileError::Toolchain(format!("failed to run cc: {}", e)))?;
    if !output.status.success() {
        return Err(CompileError::Toolchain(format!(
            "linking failed:\n{}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Compile straight to an executable: IL, then qbe, then the system
/// linker. Intermediates sit next to the output and are removed unless
/// `keep_il` is set.
pub fn build_executable(
    input: &Path,
    output: &Path,
    keep_il: bool,
    config: &CompilerConfig,
) -> Result<CompileOutput, CompileError> {
    let compiled = compile_file(input, config)?;

    let il_path = output.with_extension("il");
    let asm_path = output.with_extension("s");
    std::fs::write(&il_path, &compiled.il)
        .map_err(|e| CompileError::Io(format!("cannot write {}: {}", il_path.display(), e)))?;

    let result = assemble_il(&il_path, &asm_path).and_then(|()| link_executable(&asm_path, output));

    let _ = std::fs::remove_file(&asm_path);
    if !keep_il {
        let _ = std::fs::remove_file(&il_path);
    }
    result?;
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn il_for(src: &str) -> String {
        let config = CompilerConfig::default();
        match compile_source(src, "test.bas", &config) {
            Ok(out) => out.il,
            Err(e) => panic!("compile failed: {}", e),
        }
    }

    /// Labels are function-scoped in QBE: within each function every
    /// block label must be defined exactly once and every jmp/jnz must
    /// target a defined label.
    fn assert_labels_consistent(il: &str) {
        use std::collections::HashMap;
        let mut defined: HashMap<String, usize> = HashMap::new();
        let mut jumps: Vec<String> = Vec::new();
        let check = |defined: &mut HashMap<String, usize>, jumps: &mut Vec<String>| {
            for (label, count) in defined.iter() {
                assert_eq!(*count, 1, "label @{} defined {} times", label, count);
            }
            for t in jumps.iter() {
                assert!(defined.contains_key(t), "jump to undefined label @{}", t);
            }
            defined.clear();
            jumps.clear();
        };
        for line in il.lines() {
            if line.starts_with('}') {
                check(&mut defined, &mut jumps);
                continue;
            }
            if let Some(label) = line.strip_prefix('@') {
                *defined.entry(label.trim().to_string()).or_default() += 1;
                continue;
            }
            let trimmed = line.trim();
            if trimmed.starts_with("jmp") || trimmed.starts_with("jnz") {
                for word in trimmed.split_whitespace() {
                    if let Some(target) = word.strip_prefix('@') {
                        jumps.push(target.trim_end_matches(',').to_string());
                    }
                }
            }
        }
        check(&mut defined, &mut jumps);
    }

    #[test]
    fn test_scenario_assign_and_print() {
        let il = il_for("X% = 5\nY# = 10.5\nPRINT X%; Y#\nEND\n");
        assert!(il.contains("%var_X_INT =w copy"), "{}", il);
        assert!(il.contains("%var_Y_DOUBLE =d copy"), "{}", il);
        assert!(il.contains("call $basic_print_int(l"));
        assert!(il.contains("call $basic_print_double(d"));
        assert!(il.contains("call $basic_print_newline()"));
        assert!(il.contains("call $basic_runtime_init()"));
        assert!(il.contains("call $basic_runtime_cleanup()"));
        assert_labels_consistent(&il);
    }

    #[test]
    fn test_scenario_for_loop() {
        let il = il_for("FOR I = 1 TO 3\nPRINT I\nNEXT I\n");
        // Counter, limit, and step live in Long temporaries
        assert!(il.contains("%I =l copy"));
        assert!(il.contains("%end_I =l copy"));
        assert!(il.contains("%step_I =l copy 1"));
        // Sign-aware check
        assert!(il.contains("csltl %step_I, 0"));
        assert!(il.contains("csgel %I, %end_I"));
        assert!(il.contains("cslel %I, %end_I"));
        // Increment feeds the back edge
        assert!(il.contains("%I =l add %I, %step_I"));
        assert_labels_consistent(&il);
    }

    #[test]
    fn test_scenario_gosub_return() {
        let il = il_for("10 GOSUB 100\n20 PRINT \"A\"\n30 END\n100 PRINT \"B\"\n110 RETURN\n");
        assert!(il.contains("loadw $return_sp"));
        assert!(il.contains("storew "));
        assert!(il.contains("$return_stack"));
        // The RETURN dispatch tests the recorded resume id
        assert!(il.contains("ceqw"), "{}", il);
        assert_labels_consistent(&il);
    }

    #[test]
    fn test_scenario_array_bounds() {
        let il = il_for("DIM A%(4)\nA%(2) = 42\nPRINT A%(2)\n");
        // Both compares precede every access
        assert!(il.contains("csgel"));
        assert!(il.contains("cslel"));
        assert!(il.contains("call $basic_array_bounds_error(l"));
        assert!(il.contains("call $malloc(l"));
        assert!(il.contains("call $memset(l"));
        assert_labels_consistent(&il);
    }

    #[test]
    fn test_scenario_record_layout() {
        let src = "TYPE PT\nX AS INTEGER\nY AS DOUBLE\nEND TYPE\nDIM P AS PT\nP.X = 3\nP.Y = 4.5\nPRINT P.X; P.Y\n";
        let il = il_for(src);
        // X at offset 0 (word), Y at offset 8 (double)
        assert!(il.contains("storew"));
        assert!(il.contains("stored"));
        assert!(il.contains("loadsw"));
        assert!(il.contains("loadd"));
        assert!(il.contains("alloc8 16"));
        assert_labels_consistent(&il);
    }

    #[test]
    fn test_scenario_on_goto() {
        let il = il_for("10 K% = 2\n20 ON K% GOTO 100, 200, 300\n100 PRINT 1\n200 PRINT 2\n300 PRINT 3\n");
        // Ordered equality chain over the selector
        assert!(il.contains(", 1"));
        assert!(il.contains(", 2"));
        assert!(il.contains(", 3"));
        assert!(il.matches("ceqw").count() >= 3, "{}", il);
        assert_labels_consistent(&il);
    }

    #[test]
    fn test_constant_folding_single_copy() {
        let il = il_for("PRINT ABS(-5)\n");
        assert!(il.contains("=d copy d_5.0"), "{}", il);
        assert!(!il.contains("basic_abs_double"), "{}", il);
    }

    #[test]
    fn test_sgn_folds_to_integer() {
        let il = il_for("PRINT SGN(-3.5)\n");
        assert!(il.contains("=w copy -1"), "{}", il);
    }

    #[test]
    fn test_string_concat_and_pool_dedup() {
        let il = il_for("A$ = \"HI\" + \"HI\"\nPRINT A$\n");
        assert!(il.contains("call $string_concat(l"));
        // Duplicate literals share one pooled symbol
        assert_eq!(il.matches("data $str.").count(), 1, "{}", il);
        assert!(il.contains("call $string_retain(l"));
    }

    #[test]
    fn test_print_using_releases_temporaries() {
        let il = il_for("PRINT USING \"##.##\"; 3.5\n");
        assert!(il.contains("call $basic_print_using(l"));
        assert!(il.contains("call $free(l"));
        assert!(il.contains("call $string_release(l"), "{}", il);
        assert!(il.contains("call $string_from_double(d"));
    }

    #[test]
    fn test_data_section() {
        let il = il_for("DATA 1, 2.5, \"S\"\nREAD A%, B#, C$\nRESTORE\n");
        assert!(il.contains("export data $__basic_data = { l 1, d d_2.5, l $data_str.0 }"));
        assert!(il.contains("export data $__basic_data_types = { b 0, b 1, b 2 }"));
        assert!(il.contains("export data $__basic_data_ptr = { l 0 }"));
        assert!(il.contains("call $basic_read_int()"));
        assert!(il.contains("call $basic_read_double()"));
        assert!(il.contains("call $basic_read_string()"));
        assert!(il.contains("call $basic_restore(l 0)"));
    }

    #[test]
    fn test_return_stack_sizing() {
        let il = il_for("PRINT 1\n");
        let entry_count = il
            .lines()
            .find(|l| l.starts_with("data $return_stack"))
            .map(|l| l.matches("w 0").count())
            .unwrap_or(0);
        assert_eq!(entry_count, 16);
        assert!(il.contains("data $return_sp = { w 0 }"));
    }

    #[test]
    fn test_type_mirroring_of_suffixed_counter() {
        let il = il_for("FOR I% = 1 TO 3\nPRINT I%\nNEXT I%\n");
        // Every counter update is mirrored into the suffixed variable
        let updates = il.matches("%I =l copy").count() + il.matches("%I =l add").count();
        let mirrors = il.matches("%var_I_INT =w copy").count();
        assert!(updates >= 2);
        assert_eq!(updates, mirrors, "{}", il);
    }

    #[test]
    fn test_select_case() {
        let src = "N% = 7\nSELECT CASE N%\nCASE 1, 2\nPRINT 1\nCASE 5 TO 9\nPRINT 2\nCASE IS > 100\nPRINT 3\nCASE ELSE\nPRINT 4\nEND SELECT\n";
        let il = il_for(src);
        assert_labels_consistent(&il);
        // Range tests AND their two compares (bare literals are doubles)
        assert!(il.contains("cged"), "{}", il);
        assert!(il.contains("cled"), "{}", il);
        assert!(il.contains("and "));
    }

    #[test]
    fn test_try_catch_finally() {
        let src = "TRY\nTHROW 7\nCATCH 7\nPRINT 1\nFINALLY\nPRINT 2\nEND TRY\n";
        let il = il_for(src);
        assert!(il.contains("call $basic_try_enter()"));
        assert!(il.contains("call $basic_throw(w"));
        assert!(il.contains("hlt"));
        assert_labels_consistent(&il);
    }

    #[test]
    fn test_function_definition_and_call() {
        let src = "FUNCTION AREA#(W#, H#)\nAREA# = W# * H#\nEND FUNCTION\nPRINT AREA#(2, 3)\n";
        let il = il_for(src);
        assert!(il.contains("export function d $AREA_DOUBLE(d %var_W_DOUBLE, d %var_H_DOUBLE)"));
        assert!(il.contains("@tidy_exit"));
        assert!(il.contains("ret %var_AREA_DOUBLE"));
        assert!(il.contains("call $AREA_DOUBLE(d"));
        assert_labels_consistent(&il);
    }

    #[test]
    fn test_fallthrough_suppression() {
        // Straight-line code: entry falls into exit without a jmp pair
        let il = il_for("X = 1\nY = 2\n");
        let body = il.split("@bb0").nth(1).unwrap_or("");
        let before_exit = body.split("@exit").next().unwrap_or("");
        assert!(
            !before_exit.contains("jmp @exit"),
            "expected fallthrough into @exit:\n{}",
            il
        );
    }

    #[test]
    fn test_deterministic_output() {
        let src = "10 GOSUB 100\n20 FOR I = 1 TO 3\n30 PRINT I\n40 NEXT I\n50 END\n100 PRINT 1\n110 RETURN\n";
        assert_eq!(il_for(src), il_for(src));
    }

    #[test]
    fn test_parse_errors_abort_with_locations() {
        let config = CompilerConfig::default();
        match compile_source("GOTO +\n", "broken.bas", &config) {
            Err(CompileError::Parse(diags)) => {
                assert!(diags[0].to_string().starts_with("broken.bas:1"));
            }
            other => panic!("expected a parse error, got {:?}", other.map(|o| o.il)),
        }
    }

    #[test]
    fn test_semantic_errors_abort() {
        let config = CompilerConfig::default();
        match compile_source("NEXT I\n", "bad.bas", &config) {
            Err(CompileError::Semantic(diags)) => {
                assert!(diags.iter().any(|d| d.message.contains("NEXT without FOR")));
            }
            _ => panic!("expected a semantic error"),
        }
    }

    #[test]
    fn test_single_default_numeric_type() {
        let config = CompilerConfig::new().with_unit_default(NumericDefault::Single);
        let out = compile_source("X = 1.5\n", "t.bas", &config).unwrap();
        assert!(out.il.contains("%var_X =s"), "{}", out.il);
    }

    #[test]
    fn test_globals_use_vector() {
        let src = "GLOBAL G#\nG# = 2.5\nSUB SHOW()\nSHARED G#\nPRINT G#\nEND SUB\nCALL SHOW\n";
        let il = il_for(src);
        assert!(il.contains("export data $__global_vector = { z 8 }"));
        assert!(il.contains("add $__global_vector, 0"));
        assert!(il.contains("stored"));
        assert!(il.contains("export function $SHOW()"));
        assert_labels_consistent(&il);
    }

    #[test]
    fn test_while_and_do_loops() {
        let src = "X = 0\nWHILE X < 3\nX = X + 1\nWEND\nDO\nX = X - 1\nLOOP UNTIL X = 0\n";
        let il = il_for(src);
        assert_labels_consistent(&il);
        assert!(il.contains("jnz"));
    }

    #[test]
    fn test_stats_are_populated() {
        let config = CompilerConfig::default();
        let out = compile_source("X% = 1\nPRINT X%\n", "t.bas", &config).unwrap();
        assert!(out.stats.instructions > 0);
        assert!(out.stats.labels >= 2);
        assert_eq!(out.stats.variables, 1);
    }

    #[test]
    fn test_compile_file_reads_source_from_disk() {
        use tempfile::tempdir;

        let temp = tempdir().unwrap();
        let source = temp.path().join("hello.bas");
        std::fs::write(&source, "X% = 5\nPRINT X%\nEND\n").unwrap();

        let config = CompilerConfig::default();
        let out = compile_file(&source, &config).unwrap();
        assert!(out.il.contains("export function w $main()"));
        assert!(out.il.contains("%var_X_INT =w copy"));
        assert!(out.stats.instructions > 0);
    }

    #[test]
    fn test_compile_file_diagnostics_name_the_file() {
        use tempfile::tempdir;

        let temp = tempdir().unwrap();
        let source = temp.path().join("broken.bas");
        std::fs::write(&source, "GOTO +\n").unwrap();

        let config = CompilerConfig::default();
        match compile_file(&source, &config) {
            Err(CompileError::Parse(diags)) => {
                assert!(diags[0].to_string().contains("broken.bas"), "{}", diags[0]);
            }
            _ => panic!("expected a parse error"),
        }
        assert!(matches!(
            compile_file(&temp.path().join("absent.bas"), &config),
            Err(CompileError::Io(_))
        ));
    }

    #[test]
    fn test_compile_file_honors_config_file_dialect() {
        use tempfile::tempdir;

        let temp = tempdir().unwrap();
        let config_path = temp.path().join("fbc.toml");
        std::fs::write(&config_path, "unit_default = \"single\"\n").unwrap();
        let config = CompilerConfig::from_file(&config_path).unwrap();

        let source = temp.path().join("t.bas");
        std::fs::write(&source, "X = 1.5\n").unwrap();
        let out = compile_file(&source, &config).unwrap();
        // The legacy dialect narrows unsuffixed numerics to SINGLE
        assert!(out.il.contains("%var_X =s"), "{}", out.il);
    }

    #[test]
    fn test_build_executable_stops_before_the_toolchain_on_errors() {
        use tempfile::tempdir;

        let temp = tempdir().unwrap();
        let source = temp.path().join("bad.bas");
        std::fs::write(&source, "NEXT I\n").unwrap();
        let output = temp.path().join("bad");

        let config = CompilerConfig::default();
        assert!(matches!(
            build_executable(&source, &output, true, &config),
            Err(CompileError::Semantic(_))
        ));
        // Nothing was staged before the failing phase
        assert!(!output.with_extension("il").exists());
        assert!(!output.with_extension("s").exists());
    }
}
