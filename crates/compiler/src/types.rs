//! Type descriptors and name mangling for FasterBASIC
//!
//! A single canonical descriptor carries the base kind; width, signedness,
//! QBE ABI class, and the legacy kind are all derived from it. Identifiers
//! with type suffixes (`X%`, `S$`, ...) are mangled once, up front, and the
//! mangled form is the only spelling the symbol table and the code
//! generator ever see.

use std::fmt;

/// Base kinds of the FasterBASIC type system.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BaseType {
    Byte,
    UByte,
    Short,
    UShort,
    Integer,
    UInteger,
    Long,
    ULong,
    Single,
    Double,
    String,
    Unicode,
    Pointer,
    /// A TYPE ... END TYPE record, referenced by name
    UserDefined(std::string::String),
    Unknown,
    Void,
}

/// Legacy type kinds, kept only as a derived view for older call sites.
///
/// The original compiler stored this enum *alongside* the descriptor and
/// the two drifted apart. Here it is a pure function of [`BaseType`] and
/// has no storage of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyKind {
    Int,
    Float,
    Double,
    String,
    Unicode,
    UserDefined,
    Unknown,
    Void,
}

/// QBE ABI class: the only typing granularity QBE enforces at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QbeClass {
    /// 32-bit integer
    W,
    /// 64-bit integer or pointer
    L,
    /// 32-bit IEEE float
    S,
    /// 64-bit IEEE float
    D,
}

impl QbeClass {
    pub fn is_float(self) -> bool {
        matches!(self, QbeClass::S | QbeClass::D)
    }
}

impl fmt::Display for QbeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            QbeClass::W => "w",
            QbeClass::L => "l",
            QbeClass::S => "s",
            QbeClass::D => "d",
        };
        write!(f, "{}", c)
    }
}

/// The canonical type descriptor used by the symbol table and both
/// emitters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    pub base: BaseType,
}

impl TypeDescriptor {
    pub fn new(base: BaseType) -> Self {
        TypeDescriptor { base }
    }

    pub fn unknown() -> Self {
        TypeDescriptor::new(BaseType::Unknown)
    }

    pub fn void() -> Self {
        TypeDescriptor::new(BaseType::Void)
    }

    pub fn user_defined(name: &str) -> Self {
        TypeDescriptor::new(BaseType::UserDefined(name.to_string()))
    }

    /// Storage width in bytes. User-defined records report pointer width
    /// here; their layout size lives in the symbol table.
    pub fn width(&self) -> u32 {
        match self.base {
            BaseType::Byte | BaseType::UByte => 1,
            BaseType::Short | BaseType::UShort => 2,
            BaseType::Integer | BaseType::UInteger | BaseType::Single => 4,
            BaseType::Long
            | BaseType::ULong
            | BaseType::Double
            | BaseType::String
            | BaseType::Unicode
            | BaseType::Pointer
            | BaseType::UserDefined(_) => 8,
            BaseType::Unknown | BaseType::Void => 0,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self.base,
            BaseType::Byte
                | BaseType::Short
                | BaseType::Integer
                | BaseType::Long
                | BaseType::Single
                | BaseType::Double
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self.base, BaseType::Single | BaseType::Double)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self.base,
            BaseType::Byte
                | BaseType::UByte
                | BaseType::Short
                | BaseType::UShort
                | BaseType::Integer
                | BaseType::UInteger
                | BaseType::Long
                | BaseType::ULong
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_string(&self) -> bool {
        matches!(self.base, BaseType::String | BaseType::Unicode)
    }

    pub fn is_record(&self) -> bool {
        matches!(self.base, BaseType::UserDefined(_))
    }

    pub fn record_name(&self) -> Option<&str> {
        match &self.base {
            BaseType::UserDefined(name) => Some(name),
            _ => None,
        }
    }

    /// The legacy kind, derived on demand and never stored.
    pub fn legacy_kind(&self) -> LegacyKind {
        match self.base {
            BaseType::Byte
            | BaseType::UByte
            | BaseType::Short
            | BaseType::UShort
            | BaseType::Integer
            | BaseType::UInteger
            | BaseType::Long
            | BaseType::ULong
            | BaseType::Pointer => LegacyKind::Int,
            BaseType::Single => LegacyKind::Float,
            BaseType::Double => LegacyKind::Double,
            BaseType::String => LegacyKind::String,
            BaseType::Unicode => LegacyKind::Unicode,
            BaseType::UserDefined(_) => LegacyKind::UserDefined,
            BaseType::Unknown => LegacyKind::Unknown,
            BaseType::Void => LegacyKind::Void,
        }
    }

    /// Primitive ABI class used at QBE call and copy sites.
    pub fn qbe_class(&self) -> QbeClass {
        match self.base {
            BaseType::Byte
            | BaseType::UByte
            | BaseType::Short
            | BaseType::UShort
            | BaseType::Integer
            | BaseType::UInteger => QbeClass::W,
            BaseType::Long
            | BaseType::ULong
            | BaseType::String
            | BaseType::Unicode
            | BaseType::Pointer
            | BaseType::UserDefined(_) => QbeClass::L,
            BaseType::Single => QbeClass::S,
            BaseType::Double => QbeClass::D,
            BaseType::Unknown | BaseType::Void => QbeClass::W,
        }
    }

    /// Suffix for `load*`: performs the correct sign or zero extension
    /// for sub-word integers.
    pub fn qbe_load_op(&self) -> &'static str {
        match self.base {
            BaseType::Byte => "sb",
            BaseType::UByte => "ub",
            BaseType::Short => "sh",
            BaseType::UShort => "uh",
            BaseType::Integer => "sw",
            BaseType::UInteger => "uw",
            BaseType::Long
            | BaseType::ULong
            | BaseType::String
            | BaseType::Unicode
            | BaseType::Pointer
            | BaseType::UserDefined(_) => "l",
            BaseType::Single => "s",
            BaseType::Double => "d",
            BaseType::Unknown | BaseType::Void => "w",
        }
    }

    /// Suffix for `store*`: the narrow store matching the storage width.
    pub fn qbe_store_op(&self) -> &'static str {
        match self.base {
            BaseType::Byte | BaseType::UByte => "b",
            BaseType::Short | BaseType::UShort => "h",
            BaseType::Integer | BaseType::UInteger => "w",
            BaseType::Long
            | BaseType::ULong
            | BaseType::String
            | BaseType::Unicode
            | BaseType::Pointer
            | BaseType::UserDefined(_) => "l",
            BaseType::Single => "s",
            BaseType::Double => "d",
            BaseType::Unknown | BaseType::Void => "w",
        }
    }

    /// The type suffix character this descriptor corresponds to, if any.
    /// Used to tag array descriptors (0 for records).
    pub fn suffix_char(&self) -> Option<char> {
        match self.base {
            BaseType::Integer => Some('%'),
            BaseType::Long => Some('&'),
            BaseType::Single => Some('!'),
            BaseType::Double => Some('#'),
            BaseType::String | BaseType::Unicode => Some('$'),
            BaseType::Byte => Some('@'),
            BaseType::Short => Some('^'),
            _ => None,
        }
    }
}

impl Default for TypeDescriptor {
    fn default() -> Self {
        TypeDescriptor::unknown()
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base {
            BaseType::UserDefined(name) => write!(f, "{}", name),
            other => write!(f, "{:?}", other),
        }
    }
}

/// All type suffix characters recognized in identifiers.
pub const TYPE_SUFFIXES: &[char] = &['%', '&', '!', '#', '$', '@', '^'];

/// Map a type suffix character to its descriptor.
pub fn descriptor_from_suffix(suffix: char) -> Option<TypeDescriptor> {
    let base = match suffix {
        '%' => BaseType::Integer,
        '&' => BaseType::Long,
        '!' => BaseType::Single,
        '#' => BaseType::Double,
        '$' => BaseType::String,
        '@' => BaseType::Byte,
        '^' => BaseType::Short,
        _ => return None,
    };
    Some(TypeDescriptor::new(base))
}

/// Map an `AS <keyword>` type name to its descriptor. Unrecognized names
/// are treated as user-defined record types by the caller.
pub fn descriptor_from_keyword(keyword: &str) -> Option<TypeDescriptor> {
    let base = match keyword.to_ascii_uppercase().as_str() {
        "BYTE" => BaseType::Byte,
        "UBYTE" => BaseType::UByte,
        "SHORT" => BaseType::Short,
        "USHORT" => BaseType::UShort,
        "INTEGER" => BaseType::Integer,
        "UINTEGER" => BaseType::UInteger,
        "LONG" => BaseType::Long,
        "ULONG" => BaseType::ULong,
        "SINGLE" => BaseType::Single,
        "DOUBLE" => BaseType::Double,
        "STRING" => BaseType::String,
        "UNICODE" => BaseType::Unicode,
        _ => return None,
    };
    Some(TypeDescriptor::new(base))
}

/// The mangling token for a suffix character.
fn mangle_token(suffix: char) -> Option<&'static str> {
    match suffix {
        '%' => Some("_INT"),
        '&' => Some("_LONG"),
        '!' => Some("_FLOAT"),
        '#' => Some("_DOUBLE"),
        '$' => Some("_STRING"),
        '@' => Some("_BYTE"),
        '^' => Some("_SHORT"),
        _ => None,
    }
}

/// Split an identifier into its stem and trailing type suffix, if any.
pub fn split_suffix(name: &str) -> (&str, Option<char>) {
    match name.chars().last() {
        Some(c) if TYPE_SUFFIXES.contains(&c) => (&name[..name.len() - c.len_utf8()], Some(c)),
        _ => (name, None),
    }
}

/// Mangle an identifier by replacing its type suffix with the matching
/// underscored token: `X%` becomes `X_INT`, `S$` becomes `S_STRING`.
/// Idempotent: names without a suffix (including already-mangled names)
/// pass through unchanged.
pub fn mangle(name: &str) -> String {
    let (stem, suffix) = split_suffix(name);
    match suffix.and_then(mangle_token) {
        Some(token) => format!("{}{}", stem, token),
        None => name.to_string(),
    }
}

/// Rewrite an identifier into a valid QBE name. QBE identifiers accept
/// `[A-Za-z_.][A-Za-z0-9_.]*`; every suffix character and anything else
/// outside `[A-Za-z0-9_]` becomes `_`.
pub fn sanitize_qbe_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_descriptors() {
        assert_eq!(descriptor_from_suffix('%').unwrap().base, BaseType::Integer);
        assert_eq!(descriptor_from_suffix('&').unwrap().base, BaseType::Long);
        assert_eq!(descriptor_from_suffix('!').unwrap().base, BaseType::Single);
        assert_eq!(descriptor_from_suffix('#').unwrap().base, BaseType::Double);
        assert_eq!(descriptor_from_suffix('$').unwrap().base, BaseType::String);
        assert_eq!(descriptor_from_suffix('@').unwrap().base, BaseType::Byte);
        assert_eq!(descriptor_from_suffix('^').unwrap().base, BaseType::Short);
        assert!(descriptor_from_suffix('?').is_none());
    }

    #[test]
    fn test_widths_and_classes() {
        let int = TypeDescriptor::new(BaseType::Integer);
        assert_eq!(int.width(), 4);
        assert_eq!(int.qbe_class(), QbeClass::W);
        assert_eq!(int.qbe_load_op(), "sw");
        assert_eq!(int.qbe_store_op(), "w");

        let long = TypeDescriptor::new(BaseType::Long);
        assert_eq!(long.width(), 8);
        assert_eq!(long.qbe_class(), QbeClass::L);

        let byte = TypeDescriptor::new(BaseType::Byte);
        assert_eq!(byte.width(), 1);
        assert_eq!(byte.qbe_load_op(), "sb");
        assert_eq!(byte.qbe_store_op(), "b");

        let ub = TypeDescriptor::new(BaseType::UByte);
        assert!(!ub.is_signed());
        assert_eq!(ub.qbe_load_op(), "ub");

        let dbl = TypeDescriptor::new(BaseType::Double);
        assert_eq!(dbl.qbe_class(), QbeClass::D);
        assert_eq!(dbl.width(), 8);

        let s = TypeDescriptor::new(BaseType::String);
        assert_eq!(s.qbe_class(), QbeClass::L);
        assert!(s.is_string());
    }

    #[test]
    fn test_legacy_kind_is_derived() {
        assert_eq!(
            TypeDescriptor::new(BaseType::Short).legacy_kind(),
            LegacyKind::Int
        );
        assert_eq!(
            TypeDescriptor::new(BaseType::Single).legacy_kind(),
            LegacyKind::Float
        );
        assert_eq!(
            TypeDescriptor::user_defined("PT").legacy_kind(),
            LegacyKind::UserDefined
        );
    }

    #[test]
    fn test_mangle() {
        assert_eq!(mangle("X%"), "X_INT");
        assert_eq!(mangle("Y#"), "Y_DOUBLE");
        assert_eq!(mangle("S$"), "S_STRING");
        assert_eq!(mangle("Z!"), "Z_FLOAT");
        assert_eq!(mangle("N&"), "N_LONG");
        assert_eq!(mangle("B@"), "B_BYTE");
        assert_eq!(mangle("W^"), "W_SHORT");
        assert_eq!(mangle("PLAIN"), "PLAIN");
    }

    #[test]
    fn test_mangle_is_idempotent() {
        for name in ["X%", "Y#", "S$", "Z!", "N&", "B@", "W^", "PLAIN", "A_INT"] {
            let once = mangle(name);
            assert_eq!(mangle(&once), once, "mangle not idempotent for {}", name);
        }
    }

    #[test]
    fn test_sanitize_qbe_name() {
        assert_eq!(sanitize_qbe_name("X%"), "X_");
        assert_eq!(sanitize_qbe_name("step_I%"), "step_I_");
        assert_eq!(sanitize_qbe_name("ok_name_9"), "ok_name_9");
        for name in ["A$", "B#", "weird name!", "a.b", "x^y&z"] {
            let s = sanitize_qbe_name(name);
            assert!(
                s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
                "sanitize left an invalid character in {:?}",
                s
            );
        }
    }

    #[test]
    fn test_split_suffix() {
        assert_eq!(split_suffix("COUNT%"), ("COUNT", Some('%')));
        assert_eq!(split_suffix("NAME$"), ("NAME", Some('$')));
        assert_eq!(split_suffix("PLAIN"), ("PLAIN", None));
    }
}
