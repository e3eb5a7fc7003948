//! FasterBASIC compiler CLI
//!
//! Command-line interface: compile .bas programs to executables, emit
//! QBE IL or native assembly, or run the front half only for
//! diagnostics.

use clap::{CommandFactory, Parser as ClapParser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use fbc::{CompileError, CompileOutput, CompilerConfig, NumericDefault};
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "fbc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "FasterBASIC compiler - compile .bas programs via QBE", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmitFormat {
    Il,
    Asm,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a .bas file to an executable
    Build {
        /// Input .bas source file
        input: PathBuf,

        /// Output executable path (defaults to the input name without
        /// its extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep the intermediate QBE IL file (.il)
        #[arg(long)]
        keep_il: bool,

        /// Compiler configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Legacy dialect: unsuffixed numerics default to SINGLE
        #[arg(long)]
        legacy_single: bool,

        /// Print emission statistics to stderr
        #[arg(long)]
        stats: bool,
    },

    /// Emit QBE IL or native assembly without linking
    Emit {
        /// Input .bas source file
        input: PathBuf,

        /// Output path; `-` writes IL to stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// What to emit
        #[arg(long, value_enum, default_value = "il")]
        format: EmitFormat,

        /// Compiler configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Legacy dialect: unsuffixed numerics default to SINGLE
        #[arg(long)]
        legacy_single: bool,

        /// Print emission statistics to stderr
        #[arg(long)]
        stats: bool,
    },

    /// Parse and analyze only; dump internal structures
    Check {
        /// Input .bas source file
        input: PathBuf,

        /// Dump the AST to stderr
        #[arg(long)]
        dump_ast: bool,

        /// Dump the control-flow graphs to stderr
        #[arg(long)]
        dump_cfg: bool,

        /// Dump the symbol table to stderr
        #[arg(long)]
        dump_symbols: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            keep_il,
            config,
            legacy_single,
            stats,
        } => {
            let config = load_config(config.as_deref(), legacy_single);
            let output = output.unwrap_or_else(|| input.with_extension(""));
            match fbc::build_executable(&input, &output, keep_il, &config) {
                Ok(out) => {
                    if stats {
                        print_stats(&out);
                    }
                }
                Err(e) => fail(e),
            }
        }

        Commands::Emit {
            input,
            output,
            format,
            config,
            legacy_single,
            stats,
        } => {
            let config = load_config(config.as_deref(), legacy_single);
            match fbc::compile_file(&input, &config) {
                Ok(out) => {
                    if stats {
                        print_stats(&out);
                    }
                    if let Err(e) = write_output(&input, output.as_deref(), format, &out) {
                        fail(e);
                    }
                }
                Err(e) => fail(e),
            }
        }

        Commands::Check {
            input,
            dump_ast,
            dump_cfg,
            dump_symbols,
        } => {
            run_check(&input, dump_ast, dump_cfg, dump_symbols);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
        }
    }
}

fn load_config(path: Option<&Path>, legacy_single: bool) -> CompilerConfig {
    let mut config = match path {
        Some(p) => match CompilerConfig::from_file(p) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: {}", e);
                process::exit(2);
            }
        },
        None => CompilerConfig::default(),
    };
    if legacy_single {
        config = config.with_unit_default(NumericDefault::Single);
    }
    config
}

fn write_output(
    input: &Path,
    output: Option<&Path>,
    format: EmitFormat,
    compiled: &CompileOutput,
) -> Result<(), CompileError> {
    match format {
        EmitFormat::Il => {
            match output {
                Some(p) if p.as_os_str() == "-" => {
                    print!("{}", compiled.il);
                }
                Some(p) => {
                    std::fs::write(p, &compiled.il).map_err(|e| {
                        CompileError::Io(format!("cannot write {}: {}", p.display(), e))
                    })?;
                }
                None => {
                    let p = input.with_extension("il");
                    std::fs::write(&p, &compiled.il).map_err(|e| {
                        CompileError::Io(format!("cannot write {}: {}", p.display(), e))
                    })?;
                }
            }
            Ok(())
        }
        EmitFormat::Asm => {
            let asm_path = match output {
                Some(p) => p.to_path_buf(),
                None => input.with_extension("s"),
            };
            let il_path = asm_path.with_extension("il");
            std::fs::write(&il_path, &compiled.il)
                .map_err(|e| CompileError::Io(format!("cannot write {}: {}", il_path.display(), e)))?;
            let result = fbc::assemble_il(&il_path, &asm_path);
            let _ = std::fs::remove_file(&il_path);
            result
        }
    }
}

/// The front half only: parse, preprocess, build CFGs, then report.
fn run_check(input: &Path, dump_ast: bool, dump_cfg: bool, dump_symbols: bool) {
    let source = match std::fs::read_to_string(input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read {}: {}", input.display(), e);
            process::exit(2);
        }
    };

    let (program, parse_diags) = fbc::Parser::new(&source, input).parse();
    if dump_ast {
        eprintln!("{:#?}", program);
    }
    if !parse_diags.is_empty() {
        for d in &parse_diags {
            eprintln!("{}", d);
        }
        process::exit(1);
    }

    let config = CompilerConfig::default();
    let mut symbols = fbc::SymbolTable::new();
    let (program_cfg, cfg_diags) = fbc::build_program_cfg(&program, &mut symbols, &config);
    if dump_cfg {
        eprintln!("{}", program_cfg.dump());
    }
    if dump_symbols {
        eprintln!("{}", symbols.dump());
    }
    if !cfg_diags.is_empty() {
        for d in &cfg_diags {
            eprintln!("{}", d);
        }
        process::exit(1);
    }
    eprintln!("{}: ok", input.display());
}

fn print_stats(out: &CompileOutput) {
    eprintln!(
        "instructions: {}  labels: {}  variables: {}  arrays: {}  functions: {}  time: {:.1?}",
        out.stats.instructions,
        out.stats.labels,
        out.stats.variables,
        out.stats.arrays,
        out.stats.functions,
        out.elapsed
    );
}

fn fail(error: CompileError) -> ! {
    eprintln!("error: {}", error);
    let code = match error {
        CompileError::Io(_) | CompileError::Toolchain(_) => 2,
        _ => 1,
    };
    process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_defaults_and_legacy_flag() {
        let config = load_config(None, false);
        assert_eq!(config.unit_default, NumericDefault::Double);
        assert_eq!(config.gosub_depth, 16);

        let config = load_config(None, true);
        assert_eq!(config.unit_default, NumericDefault::Single);
    }

    #[test]
    fn test_load_config_from_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("fbc.toml");
        std::fs::write(&path, "gosub_depth = 4\n").unwrap();

        let config = load_config(Some(path.as_path()), false);
        assert_eq!(config.gosub_depth, 4);
        // The flag still overrides the file's dialect
        let config = load_config(Some(path.as_path()), true);
        assert_eq!(config.unit_default, NumericDefault::Single);
    }

    #[test]
    fn test_write_output_il_explicit_and_default_paths() {
        let temp = tempdir().unwrap();
        let input = temp.path().join("p.bas");
        std::fs::write(&input, "PRINT 1\n").unwrap();
        let config = CompilerConfig::default();
        let compiled = fbc::compile_file(&input, &config).unwrap();

        let explicit = temp.path().join("out.il");
        write_output(&input, Some(explicit.as_path()), EmitFormat::Il, &compiled).unwrap();
        let text = std::fs::read_to_string(&explicit).unwrap();
        assert!(text.contains("export function w $main()"));

        // Without -o the IL lands next to the input
        write_output(&input, None, EmitFormat::Il, &compiled).unwrap();
        assert!(input.with_extension("il").exists());
    }

    #[test]
    fn test_write_output_asm_never_leaves_staged_il() {
        let temp = tempdir().unwrap();
        let input = temp.path().join("p.bas");
        std::fs::write(&input, "PRINT 1\n").unwrap();
        let config = CompilerConfig::default();
        let compiled = fbc::compile_file(&input, &config).unwrap();

        let asm = temp.path().join("p.s");
        // With or without a qbe on PATH, the staged .il next to the
        // output must be cleaned up
        let result = write_output(&input, Some(asm.as_path()), EmitFormat::Asm, &compiled);
        assert!(!asm.with_extension("il").exists());
        if result.is_ok() {
            assert!(asm.exists());
        }
    }

    #[test]
    fn test_run_check_accepts_a_valid_program() {
        let temp = tempdir().unwrap();
        let input = temp.path().join("ok.bas");
        std::fs::write(&input, "FOR I = 1 TO 3\nPRINT I\nNEXT I\n").unwrap();
        run_check(&input, false, true, true);
    }
}
