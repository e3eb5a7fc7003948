//! DATA statement preprocessing
//!
//! Flattens every DATA constant in the unit into one vector, in textual
//! order, and records where RESTORE targets land in it. The generated
//! program walks this vector through a single global pointer; READ
//! advances it, RESTORE rewrites it.

use crate::ast::{DataConst, Program, Statement, StatementKind};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default, Clone)]
pub struct DataTable {
    pub values: Vec<DataConst>,
    /// Effective program line to the index of that line's first value.
    /// Every line gets an entry so RESTORE can target lines that hold no
    /// DATA themselves.
    pub line_restore_points: BTreeMap<u32, usize>,
    /// Label to the index of the first value at or after it
    pub label_restore_points: HashMap<String, usize>,
}

impl DataTable {
    /// Resolve `RESTORE <line>`: exact match, or the next line carrying a
    /// restore point.
    pub fn restore_index_for_line(&self, line: u32) -> Option<usize> {
        self.line_restore_points
            .range(line..)
            .next()
            .map(|(_, idx)| *idx)
    }

    pub fn restore_index_for_label(&self, label: &str) -> Option<usize> {
        self.label_restore_points.get(label).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Collect the unit's DATA into a [`DataTable`].
pub fn preprocess(program: &Program) -> DataTable {
    let mut table = DataTable::default();
    for line in &program.lines {
        table
            .line_restore_points
            .insert(line.effective_line(), table.values.len());
        for stmt in &line.statements {
            collect_statement(stmt, &mut table);
        }
    }
    table
}

fn collect_statement(stmt: &Statement, table: &mut DataTable) {
    match &stmt.kind {
        StatementKind::Data { values } => {
            table.values.extend(values.iter().cloned());
        }
        StatementKind::Label { name } => {
            table
                .label_restore_points
                .insert(name.clone(), table.values.len());
        }
        // DATA may sit inside structured bodies; order of appearance wins
        StatementKind::If {
            then_stmts,
            elseifs,
            else_stmts,
            ..
        } => {
            collect_all(then_stmts, table);
            for (_, body) in elseifs {
                collect_all(body, table);
            }
            collect_all(else_stmts, table);
        }
        StatementKind::Select {
            arms, else_body, ..
        } => {
            for arm in arms {
                collect_all(&arm.body, table);
            }
            if let Some(body) = else_body {
                collect_all(body, table);
            }
        }
        StatementKind::TryCatch {
            body,
            catches,
            finally,
        } => {
            collect_all(body, table);
            for (_, handler) in catches {
                collect_all(handler, table);
            }
            if let Some(fin) = finally {
                collect_all(fin, table);
            }
        }
        StatementKind::Function { body, .. } | StatementKind::Sub { body, .. } => {
            collect_all(body, table);
        }
        _ => {}
    }
}

fn collect_all(stmts: &[Statement], table: &mut DataTable) {
    for stmt in stmts {
        collect_statement(stmt, table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn table_for(src: &str) -> DataTable {
        let (program, diags) = Parser::new(src, "t.bas").parse();
        assert!(diags.is_empty(), "{:?}", diags);
        preprocess(&program)
    }

    #[test]
    fn test_values_in_textual_order() {
        let t = table_for("10 DATA 1, 2.5, \"S\"\n20 DATA 4\n");
        assert_eq!(
            t.values,
            vec![
                DataConst::Int(1),
                DataConst::Double(2.5),
                DataConst::Str("S".into()),
                DataConst::Int(4),
            ]
        );
    }

    #[test]
    fn test_line_restore_points() {
        let t = table_for("10 DATA 1, 2\n20 PRINT 1\n30 DATA 3\n");
        assert_eq!(t.restore_index_for_line(10), Some(0));
        assert_eq!(t.restore_index_for_line(30), Some(2));
        // A line without DATA restores to the next point
        assert_eq!(t.restore_index_for_line(20), Some(2));
        assert_eq!(t.restore_index_for_line(99), None);
    }

    #[test]
    fn test_label_restore_points() {
        let t = table_for("DATA 1\nsecond:\nDATA 2, 3\n");
        assert_eq!(t.restore_index_for_label("second"), Some(1));
        assert_eq!(t.restore_index_for_label("missing"), None);
    }
}
