//! Built-in function tables
//!
//! Maps BASIC built-in names to their fixed C runtime entry points. The
//! expression emitter consults these tables after ruling out arrays and
//! user-defined functions; statement-level runtime calls (PRINT, INPUT,
//! DATA, ...) use their entry points directly at the emission site.

/// Double-precision math built-ins: every argument and the result are
/// `d`. `(basic name, runtime symbol, arity)`.
const MATH_BUILTINS: &[(&str, &str, usize)] = &[
    ("SIN", "basic_sin", 1),
    ("COS", "basic_cos", 1),
    ("TAN", "basic_tan", 1),
    ("ATN", "basic_atan", 1),
    ("ATAN", "basic_atan", 1),
    ("ATAN2", "basic_atan2", 2),
    ("ASIN", "basic_asin", 1),
    ("ACOS", "basic_acos", 1),
    ("SINH", "basic_sinh", 1),
    ("COSH", "basic_cosh", 1),
    ("TANH", "basic_tanh", 1),
    ("ASINH", "basic_asinh", 1),
    ("ACOSH", "basic_acosh", 1),
    ("ATANH", "basic_atanh", 1),
    ("SQR", "basic_sqrt", 1),
    ("CBRT", "basic_cbrt", 1),
    ("LOG", "basic_log", 1),
    ("LOG10", "basic_log10", 1),
    ("LOG1P", "basic_log1p", 1),
    ("EXP", "basic_exp", 1),
    ("EXP2", "basic_exp2", 1),
    ("EXPM1", "basic_expm1", 1),
    ("POW", "basic_pow", 2),
    ("HYPOT", "basic_hypot", 2),
    ("FMOD", "basic_fmod", 2),
    ("REMAINDER", "basic_remainder", 2),
    ("INT", "basic_floor", 1),
    ("FLOOR", "basic_floor", 1),
    ("CEIL", "basic_ceil", 1),
    ("TRUNC", "basic_trunc", 1),
    ("ROUND", "basic_round", 1),
    ("COPYSIGN", "basic_copysign", 2),
    ("ERF", "basic_erf", 1),
    ("ERFC", "basic_erfc", 1),
    ("TGAMMA", "basic_tgamma", 1),
    ("LGAMMA", "basic_lgamma", 1),
    ("NEXTAFTER", "basic_nextafter", 2),
    ("FMAX", "basic_fmax", 2),
    ("FMIN", "basic_fmin", 2),
    ("FMA", "basic_fma", 3),
    ("DEG", "basic_deg", 1),
    ("RAD", "basic_rad", 1),
    ("SIGMOID", "basic_sigmoid", 1),
    ("LOGIT", "basic_logit", 1),
    ("NORMPDF", "basic_normpdf", 1),
    ("NORMCDF", "basic_normcdf", 1),
    ("FACT", "basic_fact", 1),
    ("COMB", "basic_comb", 2),
    ("PERM", "basic_perm", 2),
    ("CLAMP", "basic_clamp", 3),
    ("LERP", "basic_lerp", 3),
    ("PMT", "basic_pmt", 3),
    ("PV", "basic_pv", 3),
    ("FV", "basic_fv", 3),
];

/// Look up a double math built-in: `(runtime symbol, arity)`.
pub fn math_builtin(name: &str) -> Option<(&'static str, usize)> {
    let upper = name.to_ascii_uppercase();
    MATH_BUILTINS
        .iter()
        .find(|(n, _, _)| *n == upper)
        .map(|(_, sym, arity)| (*sym, *arity))
}

/// Argument classes for string-family built-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrArg {
    /// A string descriptor pointer
    Desc,
    /// A position or count, coerced to Long
    Long,
}

/// Result classes for string-family built-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrRet {
    /// A fresh descriptor pointer
    Desc,
    /// A Long count or position
    Long,
}

#[derive(Debug, Clone, Copy)]
pub struct StringBuiltin {
    pub symbol: &'static str,
    pub args: &'static [StrArg],
    pub ret: StrRet,
}

use StrArg::{Desc, Long};

const STRING_BUILTINS: &[(&str, StringBuiltin)] = &[
    (
        "LEFT$",
        StringBuiltin {
            symbol: "string_left",
            args: &[Desc, Long],
            ret: StrRet::Desc,
        },
    ),
    (
        "RIGHT$",
        StringBuiltin {
            symbol: "string_right",
            args: &[Desc, Long],
            ret: StrRet::Desc,
        },
    ),
    (
        "MID$",
        StringBuiltin {
            symbol: "string_mid",
            args: &[Desc, Long, Long],
            ret: StrRet::Desc,
        },
    ),
    (
        "UCASE$",
        StringBuiltin {
            symbol: "string_upper",
            args: &[Desc],
            ret: StrRet::Desc,
        },
    ),
    (
        "LCASE$",
        StringBuiltin {
            symbol: "string_lower",
            args: &[Desc],
            ret: StrRet::Desc,
        },
    ),
    (
        "TRIM$",
        StringBuiltin {
            symbol: "string_trim",
            args: &[Desc],
            ret: StrRet::Desc,
        },
    ),
    (
        "LTRIM$",
        StringBuiltin {
            symbol: "string_ltrim",
            args: &[Desc],
            ret: StrRet::Desc,
        },
    ),
    (
        "RTRIM$",
        StringBuiltin {
            symbol: "string_rtrim",
            args: &[Desc],
            ret: StrRet::Desc,
        },
    ),
    (
        "REVERSE$",
        StringBuiltin {
            symbol: "string_reverse",
            args: &[Desc],
            ret: StrRet::Desc,
        },
    ),
    (
        "REPLACE$",
        StringBuiltin {
            symbol: "string_replace",
            args: &[Desc, Desc, Desc],
            ret: StrRet::Desc,
        },
    ),
    (
        "INSTR",
        StringBuiltin {
            symbol: "string_instr",
            args: &[Desc, Desc],
            ret: StrRet::Long,
        },
    ),
    (
        "INSTRREV",
        StringBuiltin {
            symbol: "string_instrrev",
            args: &[Desc, Desc],
            ret: StrRet::Long,
        },
    ),
    (
        "TALLY",
        StringBuiltin {
            symbol: "string_tally",
            args: &[Desc, Desc],
            ret: StrRet::Long,
        },
    ),
    (
        "CHR$",
        StringBuiltin {
            symbol: "string_chr",
            args: &[Long],
            ret: StrRet::Desc,
        },
    ),
    (
        "SPACE$",
        StringBuiltin {
            symbol: "string_space",
            args: &[Long],
            ret: StrRet::Desc,
        },
    ),
    (
        "STRING$",
        StringBuiltin {
            symbol: "string_repeat",
            args: &[Long, Desc],
            ret: StrRet::Desc,
        },
    ),
];

/// Look up a string-family built-in by BASIC name.
pub fn string_builtin(name: &str) -> Option<StringBuiltin> {
    let upper = name.to_ascii_uppercase();
    STRING_BUILTINS
        .iter()
        .find(|(n, _)| *n == upper)
        .map(|(_, b)| *b)
}

/// Intrinsics the emitter folds over numeric literals.
pub fn is_foldable(name: &str) -> bool {
    matches!(
        name.to_ascii_uppercase().as_str(),
        "FIX" | "CINT" | "ABS" | "SGN" | "MIN" | "MAX"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_math_lookup() {
        assert_eq!(math_builtin("SQR"), Some(("basic_sqrt", 1)));
        assert_eq!(math_builtin("sqr"), Some(("basic_sqrt", 1)));
        assert_eq!(math_builtin("ATAN2"), Some(("basic_atan2", 2)));
        assert_eq!(math_builtin("FMA"), Some(("basic_fma", 3)));
        assert!(math_builtin("NOPE").is_none());
    }

    #[test]
    fn test_string_lookup() {
        let mid = string_builtin("mid$").unwrap();
        assert_eq!(mid.symbol, "string_mid");
        assert_eq!(mid.args, &[Desc, Long, Long][..]);
        assert_eq!(string_builtin("INSTR").unwrap().ret, StrRet::Long);
        assert!(string_builtin("LEN").is_none());
    }

    #[test]
    fn test_foldable_set() {
        for name in ["FIX", "CINT", "ABS", "SGN", "MIN", "MAX", "abs"] {
            assert!(is_foldable(name));
        }
        assert!(!is_foldable("SIN"));
    }
}
