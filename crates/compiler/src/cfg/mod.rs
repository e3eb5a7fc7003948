//! Control-flow graphs for FasterBASIC routines
//!
//! One [`Cfg`] per routine: an arena of basic blocks addressed by numeric
//! id, edges as id pairs, and structure maps describing loops, SELECT
//! CASE, TRY/CATCH and multi-line IF shapes. Blocks reference statements
//! in the AST; the AST outlives the graph. Back-edges and self-edges are
//! ordinary entries in the edge list, so there is no ownership cycle to
//! manage.

pub mod builder;

pub use builder::build_program_cfg;

use crate::ast::{Expr, Statement};
use crate::types::TypeDescriptor;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;
use std::rc::Rc;

pub type BlockId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Implicit flow between adjacent sequential blocks
    Fallthrough,
    /// One arm of a two-way branch
    Conditional,
    /// GOTO, loop back-edges, block-end jumps
    Unconditional,
    /// RETURN dispatch fallback
    Return,
    /// GOSUB to its target
    Call,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub source: BlockId,
    pub target: BlockId,
    pub kind: EdgeKind,
    pub label: Option<String>,
}

/// A basic block: at most one terminator, successor/predecessor ids, and
/// the source lines it covers.
#[derive(Debug)]
pub struct BasicBlock<'ast> {
    pub id: BlockId,
    pub label: Option<String>,
    pub statements: Vec<&'ast Statement>,
    pub successors: Vec<BlockId>,
    pub predecessors: Vec<BlockId>,
    pub source_lines: BTreeSet<u32>,
    /// Line of each statement, parallel to `statements`
    pub statement_lines: Vec<u32>,
    pub is_loop_header: bool,
    pub is_loop_exit: bool,
    pub is_subroutine: bool,
    pub is_terminator: bool,
}

impl<'ast> BasicBlock<'ast> {
    fn new(id: BlockId) -> Self {
        BasicBlock {
            id,
            label: None,
            statements: Vec::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            source_lines: BTreeSet::new(),
            statement_lines: Vec::new(),
            is_loop_header: false,
            is_loop_exit: false,
            is_subroutine: false,
            is_terminator: false,
        }
    }
}

/// Which flavor of FOR a loop structure describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForKind {
    Counted,
    ForEach,
}

/// FOR loop shape, keyed by the init block (the one holding the FOR
/// statement). The check block is empty; the emitter synthesizes the
/// sign-aware test from the statement reference kept here.
#[derive(Debug)]
pub struct ForLoopInfo<'ast> {
    pub kind: ForKind,
    pub check_block: BlockId,
    pub body_block: BlockId,
    pub exit_block: BlockId,
    pub variable: String,
    pub statement: &'ast Statement,
}

/// WHILE / DO / REPEAT shape, keyed by the header block (pre-test) or the
/// block that will branch (post-test footer).
#[derive(Debug, Clone)]
pub struct DoLoopInfo {
    pub body_block: BlockId,
    pub exit_block: BlockId,
}

/// Multi-line IF test: the block evaluates `condition` after its
/// statements and branches. ELSEIF chains produce one entry per test
/// block.
#[derive(Debug)]
pub struct IfTest<'ast> {
    pub condition: &'ast Expr,
    pub then_block: BlockId,
    pub else_block: BlockId,
}

/// SELECT CASE shape. Registered under the select block and under every
/// test block; all of them share one info record.
#[derive(Debug)]
pub struct SelectInfo<'ast> {
    pub select_block: BlockId,
    pub test_blocks: Vec<BlockId>,
    pub body_blocks: Vec<BlockId>,
    pub else_block: Option<BlockId>,
    pub exit_block: BlockId,
    pub statement: &'ast Statement,
}

/// TRY/CATCH/FINALLY shape, keyed by the block that installs the handler.
#[derive(Debug)]
pub struct TryCatchInfo<'ast> {
    pub try_body_block: BlockId,
    pub dispatch_block: BlockId,
    pub catch_blocks: Vec<(i64, BlockId)>,
    pub finally_block: Option<BlockId>,
    pub exit_block: BlockId,
    /// Blocks where the protected body leaves normally; the handler is
    /// uninstalled there
    pub body_exit_blocks: Vec<BlockId>,
    pub statement: &'ast Statement,
}

/// A routine's control-flow graph.
#[derive(Debug, Default)]
pub struct Cfg<'ast> {
    /// Mangled routine name; `main` for the program body
    pub name: String,
    pub params: Vec<(String, TypeDescriptor)>,
    pub return_type: TypeDescriptor,
    /// Set for single-line DEF FN functions; such a CFG has no blocks
    /// worth walking, the emitter expands the expression directly
    pub def_statement: Option<&'ast Statement>,
    pub blocks: Vec<BasicBlock<'ast>>,
    pub edges: Vec<Edge>,
    pub entry_block: BlockId,
    pub exit_block: BlockId,
    pub line_to_block: BTreeMap<u32, BlockId>,
    pub label_to_block: HashMap<String, BlockId>,
    pub for_loops: HashMap<BlockId, ForLoopInfo<'ast>>,
    pub do_loops: HashMap<BlockId, DoLoopInfo>,
    pub if_tests: HashMap<BlockId, IfTest<'ast>>,
    pub selects: HashMap<BlockId, Rc<SelectInfo<'ast>>>,
    pub try_catches: HashMap<BlockId, Rc<TryCatchInfo<'ast>>>,
    /// Valid RETURN targets, ascending; sized by GOSUB emission
    pub gosub_return_blocks: BTreeSet<BlockId>,
    /// GOSUB block to the block execution resumes at after RETURN
    pub gosub_fallthrough: HashMap<BlockId, BlockId>,
}

impl<'ast> Cfg<'ast> {
    pub fn is_main(&self) -> bool {
        self.name == "main"
    }

    /// Scope key for symbol-table queries.
    pub fn scope(&self) -> Option<&str> {
        if self.is_main() { None } else { Some(&self.name) }
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock<'ast> {
        &self.blocks[id]
    }

    pub fn block_for_line(&self, line: u32) -> Option<BlockId> {
        self.line_to_block.get(&line).copied()
    }

    /// GOTO/GOSUB tolerance: a jump to a missing line lands on the next
    /// line that exists, or on the routine exit past the end.
    pub fn block_for_line_or_next(&self, line: u32) -> BlockId {
        self.line_to_block
            .range(line..)
            .next()
            .map(|(_, id)| *id)
            .unwrap_or(self.exit_block)
    }

    /// The FOR structure whose empty check block is `check`, if any.
    pub fn for_info_by_check(&self, check: BlockId) -> Option<&ForLoopInfo<'ast>> {
        self.for_loops.values().find(|info| info.check_block == check)
    }

    pub(crate) fn add_edge(&mut self, source: BlockId, target: BlockId, kind: EdgeKind) {
        self.add_edge_labeled(source, target, kind, None);
    }

    pub(crate) fn add_edge_labeled(
        &mut self,
        source: BlockId,
        target: BlockId,
        kind: EdgeKind,
        label: Option<String>,
    ) {
        if !self.blocks[source].successors.contains(&target) {
            self.blocks[source].successors.push(target);
        }
        if !self.blocks[target].predecessors.contains(&source) {
            self.blocks[target].predecessors.push(source);
        }
        self.edges.push(Edge {
            source,
            target,
            kind,
            label,
        });
    }

    pub(crate) fn new_block(&mut self) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(BasicBlock::new(id));
        id
    }

    /// Render the graph for TRACE_CFG / --dump-cfg.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "=== cfg {} (entry {}, exit {}) ===",
            self.name, self.entry_block, self.exit_block
        );
        for block in &self.blocks {
            let mut flags = String::new();
            if block.is_loop_header {
                flags.push_str(" loop-header");
            }
            if block.is_loop_exit {
                flags.push_str(" loop-exit");
            }
            if block.is_subroutine {
                flags.push_str(" subroutine");
            }
            if block.is_terminator {
                flags.push_str(" terminator");
            }
            let _ = writeln!(
                out,
                "  block {}{}{}: {} stmts, succ {:?}, pred {:?}, lines {:?}",
                block.id,
                block
                    .label
                    .as_ref()
                    .map(|l| format!(" ({})", l))
                    .unwrap_or_default(),
                flags,
                block.statements.len(),
                block.successors,
                block.predecessors,
                block.source_lines,
            );
        }
        for edge in &self.edges {
            let _ = writeln!(
                out,
                "  edge {} -> {} [{:?}]{}",
                edge.source,
                edge.target,
                edge.kind,
                edge.label
                    .as_ref()
                    .map(|l| format!(" {}", l))
                    .unwrap_or_default()
            );
        }
        if !self.gosub_return_blocks.is_empty() {
            let _ = writeln!(out, "  gosub returns: {:?}", self.gosub_return_blocks);
        }
        out
    }
}

/// The whole unit: the main CFG plus one per FUNCTION/SUB/DEF in
/// definition order.
#[derive(Debug, Default)]
pub struct ProgramCfg<'ast> {
    pub main: Cfg<'ast>,
    pub functions: Vec<Cfg<'ast>>,
}

impl<'ast> ProgramCfg<'ast> {
    pub fn function(&self, name: &str) -> Option<&Cfg<'ast>> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn dump(&self) -> String {
        let mut out = self.main.dump();
        for f in &self.functions {
            out.push_str(&f.dump());
        }
        out
    }
}
