//! Symbol table and record layout for FasterBASIC
//!
//! One scope for the main program plus one per FUNCTION/SUB. All keys are
//! mangled names. Constants are looked up case-insensitively; everything
//! else is case-sensitive. The table is populated while the CFG builder
//! walks the AST and is read-only during emission.

use crate::ast::SourceLocation;
use crate::config::CompilerConfig;
use crate::diag::Diagnostic;
use crate::types::{BaseType, TypeDescriptor, descriptor_from_keyword, mangle, split_suffix};
use std::collections::HashMap;

/// A scalar variable.
#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub ty: TypeDescriptor,
    pub is_global: bool,
    /// Slot in `$__global_vector`, 8 bytes each
    pub global_slot: Option<usize>,
    pub first_use: SourceLocation,
}

/// A DIM'd array. Bounds are kept only when they fold to constants; the
/// generated code always reads the live bounds from the dope vector.
#[derive(Debug, Clone)]
pub struct ArrayInfo {
    pub element_type: TypeDescriptor,
    pub dimensions: usize,
    pub declared_bounds: Vec<(Option<i64>, Option<i64>)>,
    pub declared_at: SourceLocation,
}

/// A CONST value, inlined at every use.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i64),
    Double(f64),
    Str(String),
}

impl ConstValue {
    pub fn type_descriptor(&self) -> TypeDescriptor {
        match self {
            ConstValue::Int(_) => TypeDescriptor::new(BaseType::Integer),
            ConstValue::Double(_) => TypeDescriptor::new(BaseType::Double),
            ConstValue::Str(_) => TypeDescriptor::new(BaseType::String),
        }
    }
}

/// A FUNCTION/SUB signature. SUBs have return type Void.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub return_type: TypeDescriptor,
    pub params: Vec<(String, TypeDescriptor)>,
    pub is_sub: bool,
}

/// One field of a TYPE record.
#[derive(Debug, Clone)]
pub struct RecordField {
    pub name: String,
    pub ty: TypeDescriptor,
}

/// A TYPE ... END TYPE declaration.
#[derive(Debug, Clone)]
pub struct RecordInfo {
    pub fields: Vec<RecordField>,
}

/// Computed layout of a record: field offsets in declaration order.
#[derive(Debug, Clone)]
pub struct RecordLayout {
    pub size: u64,
    pub align: u64,
    pub offsets: Vec<u64>,
}

/// Variables and arrays of one routine (or of the main program).
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub variables: HashMap<String, VariableInfo>,
    pub arrays: HashMap<String, ArrayInfo>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    pub main: Scope,
    pub routines: HashMap<String, Scope>,
    /// Keys lowercased; lookup is case-insensitive
    constants: HashMap<String, ConstValue>,
    functions: HashMap<String, FunctionInfo>,
    records: HashMap<String, RecordInfo>,
    layouts: HashMap<String, RecordLayout>,
    /// Label name to program line index
    labels: HashMap<String, usize>,
    /// Names SHARED into each routine (resolved against globals)
    shared: HashMap<String, Vec<String>>,
    /// Plain-stripped FOR counters, keyed by scope ("" for main)
    for_variables: HashMap<String, Vec<String>>,
    next_global_slot: usize,
}

fn field_align(ty: &TypeDescriptor) -> u64 {
    match ty.base {
        BaseType::UserDefined(_)
        | BaseType::String
        | BaseType::Unicode
        | BaseType::Pointer => 8,
        _ => ty.width().max(1) as u64,
    }
}

fn align_up(offset: u64, align: u64) -> u64 {
    offset.div_ceil(align) * align
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    fn scope(&self, routine: Option<&str>) -> &Scope {
        match routine {
            Some(name) => self.routines.get(name).unwrap_or(&self.main),
            None => &self.main,
        }
    }

    fn scope_mut(&mut self, routine: Option<&str>) -> &mut Scope {
        match routine {
            Some(name) => self.routines.entry(name.to_string()).or_default(),
            None => &mut self.main,
        }
    }

    /// Enforce the one-namespace invariant: a name may live in at most one
    /// of variables / arrays / constants / functions within a scope.
    /// Routine locals may shadow unit-level function names; that is how
    /// the return-value variable of a FUNCTION works.
    fn check_name_free(
        &self,
        routine: Option<&str>,
        name: &str,
        loc: &SourceLocation,
    ) -> Result<(), Diagnostic> {
        let scope = self.scope(routine);
        if scope.arrays.contains_key(name) {
            return Err(Diagnostic::new(
                loc.clone(),
                format!("'{}' is already an array", name),
            ));
        }
        if self.constants.contains_key(&name.to_lowercase()) {
            return Err(Diagnostic::new(
                loc.clone(),
                format!("'{}' is already a constant", name),
            ));
        }
        if routine.is_none() && self.functions.contains_key(name) {
            return Err(Diagnostic::new(
                loc.clone(),
                format!("'{}' is already a function", name),
            ));
        }
        Ok(())
    }

    // ---- variables ----

    /// Explicit declaration (DIM ... AS, LOCAL, GLOBAL, parameters).
    pub fn declare_variable(
        &mut self,
        routine: Option<&str>,
        name: &str,
        ty: TypeDescriptor,
        loc: SourceLocation,
        is_global: bool,
    ) -> Result<(), Diagnostic> {
        debug_assert!(ty.base != BaseType::Unknown);
        let mangled = mangle(name);
        self.check_name_free(routine, &mangled, &loc)?;
        let scope = self.scope_mut(routine);
        if let Some(existing) = scope.variables.get(&mangled) {
            if existing.ty != ty {
                return Err(Diagnostic::new(
                    loc,
                    format!(
                        "'{}' was already declared as {} (here {})",
                        name, existing.ty, ty
                    ),
                ));
            }
            return Ok(());
        }
        let global_slot = if is_global {
            let slot = self.next_global_slot;
            self.next_global_slot += 1;
            Some(slot)
        } else {
            None
        };
        self.scope_mut(routine).variables.insert(
            mangled,
            VariableInfo {
                ty,
                is_global,
                global_slot,
                first_use: loc,
            },
        );
        Ok(())
    }

    /// Implicit declaration on first use. The descriptor comes from the
    /// suffix or the unit default; Unknown is never inserted.
    pub fn ensure_variable(
        &mut self,
        routine: Option<&str>,
        name: &str,
        config: &CompilerConfig,
        loc: &SourceLocation,
    ) -> Result<TypeDescriptor, Diagnostic> {
        let mangled = mangle(name);
        if let Some(info) = self.lookup_variable(routine, &mangled) {
            return Ok(info.ty.clone());
        }
        let ty = self.infer_type(name, config);
        self.check_name_free(routine, &mangled, loc)?;
        self.scope_mut(routine).variables.insert(
            mangled,
            VariableInfo {
                ty: ty.clone(),
                is_global: false,
                global_slot: None,
                first_use: loc.clone(),
            },
        );
        Ok(ty)
    }

    /// Suffix type, or the unit default for unsuffixed names.
    pub fn infer_type(&self, name: &str, config: &CompilerConfig) -> TypeDescriptor {
        let (_, suffix) = split_suffix(name);
        suffix
            .and_then(crate::types::descriptor_from_suffix)
            .unwrap_or_else(|| config.default_numeric_type())
    }

    /// Look a variable up in the routine scope, falling back to shared
    /// globals.
    pub fn lookup_variable(&self, routine: Option<&str>, name: &str) -> Option<&VariableInfo> {
        let mangled = mangle(name);
        match routine {
            Some(r) => {
                if let Some(info) = self.routines.get(r).and_then(|s| s.variables.get(&mangled)) {
                    return Some(info);
                }
                if self.is_shared_into(r, &mangled) {
                    return self.main.variables.get(&mangled).filter(|v| v.is_global);
                }
                None
            }
            None => self.main.variables.get(&mangled),
        }
    }

    pub fn variable_type(&self, routine: Option<&str>, name: &str) -> Option<TypeDescriptor> {
        self.lookup_variable(routine, name).map(|v| v.ty.clone())
    }

    // ---- SHARED ----

    pub fn add_shared(
        &mut self,
        routine: &str,
        name: &str,
        loc: &SourceLocation,
    ) -> Result<(), Diagnostic> {
        let mangled = mangle(name);
        match self.main.variables.get(&mangled) {
            Some(info) if info.is_global => {
                self.shared
                    .entry(routine.to_string())
                    .or_default()
                    .push(mangled);
                Ok(())
            }
            _ => Err(Diagnostic::new(
                loc.clone(),
                format!("SHARED '{}' requires a GLOBAL declaration", name),
            )),
        }
    }

    pub fn is_shared_into(&self, routine: &str, mangled: &str) -> bool {
        self.shared
            .get(routine)
            .is_some_and(|names| names.iter().any(|n| n == mangled))
    }

    // ---- arrays ----

    pub fn declare_array(
        &mut self,
        routine: Option<&str>,
        name: &str,
        info: ArrayInfo,
    ) -> Result<(), Diagnostic> {
        let mangled = mangle(name);
        let loc = info.declared_at.clone();
        if self.scope(routine).variables.contains_key(&mangled) {
            return Err(Diagnostic::new(
                loc,
                format!("'{}' is already a variable", name),
            ));
        }
        self.check_name_free(routine, &mangled, &loc)?;
        if let Some(existing) = self.scope(routine).arrays.get(&mangled) {
            if existing.element_type != info.element_type {
                return Err(Diagnostic::new(
                    loc,
                    format!("array '{}' was already declared with a different element type", name),
                ));
            }
        }
        self.scope_mut(routine).arrays.insert(mangled, info);
        Ok(())
    }

    pub fn lookup_array(&self, routine: Option<&str>, name: &str) -> Option<&ArrayInfo> {
        let mangled = mangle(name);
        match routine {
            Some(r) => self
                .routines
                .get(r)
                .and_then(|s| s.arrays.get(&mangled))
                .or_else(|| self.main.arrays.get(&mangled)),
            None => self.main.arrays.get(&mangled),
        }
    }

    pub fn is_array(&self, routine: Option<&str>, name: &str) -> bool {
        self.lookup_array(routine, name).is_some()
    }

    pub fn array_element_type(
        &self,
        routine: Option<&str>,
        name: &str,
    ) -> Option<TypeDescriptor> {
        self.lookup_array(routine, name)
            .map(|a| a.element_type.clone())
    }

    // ---- constants ----

    pub fn declare_constant(
        &mut self,
        name: &str,
        value: ConstValue,
        loc: &SourceLocation,
    ) -> Result<(), Diagnostic> {
        let key = name.to_lowercase();
        if self.constants.contains_key(&key) {
            return Err(Diagnostic::new(
                loc.clone(),
                format!("constant '{}' is already defined", name),
            ));
        }
        if self.main.variables.contains_key(&mangle(name))
            || self.main.arrays.contains_key(&mangle(name))
        {
            return Err(Diagnostic::new(
                loc.clone(),
                format!("'{}' is already in use", name),
            ));
        }
        self.constants.insert(key, value);
        Ok(())
    }

    /// Case-insensitive constant lookup.
    pub fn constant(&self, name: &str) -> Option<&ConstValue> {
        self.constants.get(&name.to_lowercase())
    }

    // ---- functions ----

    pub fn declare_function(
        &mut self,
        name: &str,
        info: FunctionInfo,
        loc: &SourceLocation,
    ) -> Result<(), Diagnostic> {
        let mangled = mangle(name);
        if self.functions.contains_key(&mangled) {
            return Err(Diagnostic::new(
                loc.clone(),
                format!("'{}' is already defined", name),
            ));
        }
        if self.main.variables.contains_key(&mangled) {
            return Err(Diagnostic::new(
                loc.clone(),
                format!("'{}' is already a variable", name),
            ));
        }
        self.check_name_free(None, &mangled, loc)?;
        self.functions.insert(mangled, info);
        Ok(())
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(&mangle(name))
    }

    pub fn functions(&self) -> impl Iterator<Item = (&String, &FunctionInfo)> {
        self.functions.iter()
    }

    // ---- records ----

    /// Register a record and compute its layout. Detects direct and
    /// indirect self-containment.
    pub fn declare_record(
        &mut self,
        name: &str,
        fields: Vec<RecordField>,
        loc: &SourceLocation,
    ) -> Result<(), Diagnostic> {
        if self.records.contains_key(name) {
            return Err(Diagnostic::new(
                loc.clone(),
                format!("TYPE '{}' is already defined", name),
            ));
        }
        self.records.insert(name.to_string(), RecordInfo { fields });
        let mut visiting = Vec::new();
        if let Err(msg) = self.layout_of(name, &mut visiting) {
            self.records.remove(name);
            return Err(Diagnostic::new(loc.clone(), msg));
        }
        Ok(())
    }

    pub fn record(&self, name: &str) -> Option<&RecordInfo> {
        self.records.get(name)
    }

    /// Layout with memoization. `visiting` carries the active recursion
    /// path so a record containing itself is reported rather than looping.
    fn layout_of(&mut self, name: &str, visiting: &mut Vec<String>) -> Result<RecordLayout, String> {
        if let Some(layout) = self.layouts.get(name) {
            return Ok(layout.clone());
        }
        if visiting.iter().any(|n| n == name) {
            return Err(format!("TYPE '{}' contains itself", name));
        }
        visiting.push(name.to_string());

        let fields = match self.records.get(name) {
            Some(info) => info.fields.clone(),
            None => {
                visiting.pop();
                return Err(format!("unknown TYPE '{}'", name));
            }
        };

        let mut offset = 0u64;
        let mut max_align = 1u64;
        let mut offsets = Vec::with_capacity(fields.len());
        for field in &fields {
            let (size, align) = match field.ty.record_name() {
                Some(nested) => {
                    let nested_layout = self.layout_of(nested, visiting)?;
                    (nested_layout.size, 8)
                }
                None => (field.ty.width().max(1) as u64, field_align(&field.ty)),
            };
            offset = align_up(offset, align);
            offsets.push(offset);
            offset += size;
            max_align = max_align.max(align);
        }
        let size = align_up(offset.max(1), max_align);

        visiting.pop();
        let layout = RecordLayout {
            size,
            align: max_align,
            offsets,
        };
        self.layouts.insert(name.to_string(), layout.clone());
        Ok(layout)
    }

    /// Cached layout. Records are laid out when declared, so this only
    /// misses for unknown names.
    pub fn record_layout(&self, name: &str) -> Option<&RecordLayout> {
        self.layouts.get(name)
    }

    /// Offset and type of a field. Fails for non-records and unknown
    /// fields.
    pub fn field_of(
        &self,
        record: &str,
        field: &str,
        loc: &SourceLocation,
    ) -> Result<(u64, TypeDescriptor), Diagnostic> {
        let info = self.records.get(record).ok_or_else(|| {
            Diagnostic::new(loc.clone(), format!("'{}' is not a TYPE", record))
        })?;
        let layout = self.layouts.get(record).ok_or_else(|| {
            Diagnostic::new(loc.clone(), format!("TYPE '{}' has no layout", record))
        })?;
        for (i, f) in info.fields.iter().enumerate() {
            if f.name.eq_ignore_ascii_case(field) {
                return Ok((layout.offsets[i], f.ty.clone()));
            }
        }
        Err(Diagnostic::new(
            loc.clone(),
            format!("TYPE '{}' has no field '{}'", record, field),
        ))
    }

    /// Descriptor for an `AS type` annotation: builtin keyword or record.
    pub fn descriptor_for_type_name(
        &self,
        type_name: &str,
        loc: &SourceLocation,
    ) -> Result<TypeDescriptor, Diagnostic> {
        if let Some(ty) = descriptor_from_keyword(type_name) {
            return Ok(ty);
        }
        if self.records.contains_key(type_name) {
            return Ok(TypeDescriptor::user_defined(type_name));
        }
        Err(Diagnostic::new(
            loc.clone(),
            format!("unknown type '{}'", type_name),
        ))
    }

    // ---- labels ----

    pub fn define_label(
        &mut self,
        name: &str,
        line_index: usize,
        loc: &SourceLocation,
    ) -> Result<(), Diagnostic> {
        if self.labels.contains_key(name) {
            return Err(Diagnostic::new(
                loc.clone(),
                format!("label '{}' is already defined", name),
            ));
        }
        self.labels.insert(name.to_string(), line_index);
        Ok(())
    }

    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    pub fn global_slot_count(&self) -> usize {
        self.next_global_slot
    }

    // ---- FOR counters ----

    /// Record a plain-stripped FOR counter; its storage is the bare
    /// `%<name>` temporary rather than a `%var_` slot.
    pub fn register_for_variable(&mut self, routine: Option<&str>, plain: &str) {
        let key = routine.unwrap_or("").to_string();
        let names = self.for_variables.entry(key).or_default();
        if !names.iter().any(|n| n == plain) {
            names.push(plain.to_string());
        }
    }

    pub fn is_for_variable(&self, routine: Option<&str>, name: &str) -> bool {
        let key = routine.unwrap_or("");
        self.for_variables
            .get(key)
            .is_some_and(|names| names.iter().any(|n| n == name))
    }

    /// Render the table for TRACE_SYMBOLS / --dump-symbols.
    pub fn dump(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        let _ = writeln!(out, "=== symbols: main ===");
        let mut names: Vec<_> = self.main.variables.keys().collect();
        names.sort();
        for name in names {
            let v = &self.main.variables[name];
            let _ = writeln!(
                out,
                "  var {} : {}{}",
                name,
                v.ty,
                if v.is_global { " (global)" } else { "" }
            );
        }
        let mut arrays: Vec<_> = self.main.arrays.keys().collect();
        arrays.sort();
        for name in arrays {
            let a = &self.main.arrays[name];
            let _ = writeln!(out, "  array {} : {} x{}", name, a.element_type, a.dimensions);
        }
        let mut consts: Vec<_> = self.constants.keys().collect();
        consts.sort();
        for name in consts {
            let _ = writeln!(out, "  const {} = {:?}", name, self.constants[name]);
        }
        let mut fns: Vec<_> = self.functions.keys().collect();
        fns.sort();
        for name in fns {
            let f = &self.functions[name];
            let _ = writeln!(
                out,
                "  {} {} ({} params) -> {}",
                if f.is_sub { "sub" } else { "function" },
                name,
                f.params.len(),
                f.return_type
            );
        }
        let mut recs: Vec<_> = self.records.keys().collect();
        recs.sort();
        for name in recs {
            let layout = &self.layouts[name];
            let _ = writeln!(out, "  type {} : {} bytes", name, layout.size);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn loc() -> SourceLocation {
        SourceLocation::new(PathBuf::from("t.bas"), 1)
    }

    fn int() -> TypeDescriptor {
        TypeDescriptor::new(BaseType::Integer)
    }

    fn dbl() -> TypeDescriptor {
        TypeDescriptor::new(BaseType::Double)
    }

    #[test]
    fn test_implicit_declaration_uses_suffix() {
        let mut table = SymbolTable::new();
        let config = CompilerConfig::default();
        let ty = table.ensure_variable(None, "X%", &config, &loc()).unwrap();
        assert_eq!(ty.base, BaseType::Integer);
        // Mangled key
        assert!(table.main.variables.contains_key("X_INT"));
        // Unsuffixed takes the unit default (Double)
        let ty = table.ensure_variable(None, "Y", &config, &loc()).unwrap();
        assert_eq!(ty.base, BaseType::Double);
    }

    #[test]
    fn test_constants_case_insensitive() {
        let mut table = SymbolTable::new();
        table
            .declare_constant("MaxSize", ConstValue::Int(10), &loc())
            .unwrap();
        assert_eq!(table.constant("MAXSIZE"), Some(&ConstValue::Int(10)));
        assert_eq!(table.constant("maxsize"), Some(&ConstValue::Int(10)));
        assert!(
            table
                .declare_constant("MAXSIZE", ConstValue::Int(11), &loc())
                .is_err()
        );
    }

    #[test]
    fn test_one_namespace_per_scope() {
        let mut table = SymbolTable::new();
        table
            .declare_array(
                None,
                "A%",
                ArrayInfo {
                    element_type: int(),
                    dimensions: 1,
                    declared_bounds: vec![(Some(0), Some(4))],
                    declared_at: loc(),
                },
            )
            .unwrap();
        assert!(table.declare_variable(None, "A%", int(), loc(), false).is_err());
    }

    #[test]
    fn test_conflicting_redeclaration() {
        let mut table = SymbolTable::new();
        table.declare_variable(None, "V", dbl(), loc(), false).unwrap();
        assert!(table.declare_variable(None, "V", int(), loc(), false).is_err());
        // Same type is fine
        assert!(table.declare_variable(None, "V", dbl(), loc(), false).is_ok());
    }

    #[test]
    fn test_record_layout_alignment() {
        let mut table = SymbolTable::new();
        table
            .declare_record(
                "PT",
                vec![
                    RecordField {
                        name: "X".into(),
                        ty: int(),
                    },
                    RecordField {
                        name: "Y".into(),
                        ty: dbl(),
                    },
                ],
                &loc(),
            )
            .unwrap();
        let layout = table.record_layout("PT").unwrap();
        assert_eq!(layout.offsets, vec![0, 8]);
        assert_eq!(layout.size, 16);
        assert_eq!(layout.align, 8);
        let (off, ty) = table.field_of("PT", "Y", &loc()).unwrap();
        assert_eq!(off, 8);
        assert_eq!(ty.base, BaseType::Double);
    }

    #[test]
    fn test_record_size_multiple_of_max_align() {
        let mut table = SymbolTable::new();
        table
            .declare_record(
                "MIXED",
                vec![
                    RecordField {
                        name: "A".into(),
                        ty: TypeDescriptor::new(BaseType::Byte),
                    },
                    RecordField {
                        name: "B".into(),
                        ty: TypeDescriptor::new(BaseType::Short),
                    },
                    RecordField {
                        name: "C".into(),
                        ty: dbl(),
                    },
                    RecordField {
                        name: "D".into(),
                        ty: TypeDescriptor::new(BaseType::Byte),
                    },
                ],
                &loc(),
            )
            .unwrap();
        let layout = table.record_layout("MIXED").unwrap();
        assert_eq!(layout.offsets, vec![0, 2, 8, 16]);
        // 17 rounded up to alignment 8
        assert_eq!(layout.size, 24);
        let field_total: u64 = 1 + 2 + 8 + 1;
        assert!(layout.size >= field_total);
        assert_eq!(layout.size % layout.align, 0);
    }

    #[test]
    fn test_nested_record_layout() {
        let mut table = SymbolTable::new();
        table
            .declare_record(
                "PT",
                vec![
                    RecordField {
                        name: "X".into(),
                        ty: int(),
                    },
                    RecordField {
                        name: "Y".into(),
                        ty: int(),
                    },
                ],
                &loc(),
            )
            .unwrap();
        table
            .declare_record(
                "SEG",
                vec![
                    RecordField {
                        name: "TAG".into(),
                        ty: TypeDescriptor::new(BaseType::Byte),
                    },
                    RecordField {
                        name: "A".into(),
                        ty: TypeDescriptor::user_defined("PT"),
                    },
                    RecordField {
                        name: "B".into(),
                        ty: TypeDescriptor::user_defined("PT"),
                    },
                ],
                &loc(),
            )
            .unwrap();
        let layout = table.record_layout("SEG").unwrap();
        // Nested records align to 8 and occupy their laid-out size
        assert_eq!(layout.offsets, vec![0, 8, 16]);
        assert_eq!(layout.size, 24);
    }

    #[test]
    fn test_self_containing_record_rejected() {
        let mut table = SymbolTable::new();
        let err = table.declare_record(
            "LOOPY",
            vec![RecordField {
                name: "AGAIN".into(),
                ty: TypeDescriptor::user_defined("LOOPY"),
            }],
            &loc(),
        );
        assert!(err.is_err());
        assert!(err.unwrap_err().message.contains("contains itself"));
    }

    #[test]
    fn test_field_errors_carry_location() {
        let mut table = SymbolTable::new();
        table
            .declare_record(
                "PT",
                vec![RecordField {
                    name: "X".into(),
                    ty: int(),
                }],
                &loc(),
            )
            .unwrap();
        assert!(table.field_of("PT", "NOPE", &loc()).is_err());
        assert!(table.field_of("NOTATYPE", "X", &loc()).is_err());
    }

    #[test]
    fn test_shared_requires_global() {
        let mut table = SymbolTable::new();
        table
            .declare_variable(None, "G#", dbl(), loc(), true)
            .unwrap();
        table.declare_variable(None, "L#", dbl(), loc(), false).unwrap();
        assert!(table.add_shared("DOIT", "G#", &loc()).is_ok());
        assert!(table.add_shared("DOIT", "L#", &loc()).is_err());
        assert!(table.lookup_variable(Some("DOIT"), "G#").is_some());
        assert!(table.lookup_variable(Some("DOIT"), "L#").is_none());
    }

    #[test]
    fn test_global_slots_assigned_in_order() {
        let mut table = SymbolTable::new();
        table.declare_variable(None, "A", dbl(), loc(), true).unwrap();
        table.declare_variable(None, "B", dbl(), loc(), true).unwrap();
        assert_eq!(table.lookup_variable(None, "A").unwrap().global_slot, Some(0));
        assert_eq!(table.lookup_variable(None, "B").unwrap().global_slot, Some(1));
        assert_eq!(table.global_slot_count(), 2);
    }

    #[test]
    fn test_labels() {
        let mut table = SymbolTable::new();
        table.define_label("again", 3, &loc()).unwrap();
        assert_eq!(table.label("again"), Some(3));
        assert!(table.define_label("again", 5, &loc()).is_err());
    }
}
