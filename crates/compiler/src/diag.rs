//! Compiler diagnostics
//!
//! Every phase reports `(location, message)` pairs; the driver collects
//! them per phase and renders `<file>:<line>: <message>` on stderr.

use crate::ast::SourceLocation;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub location: SourceLocation,
    pub message: String,
}

impl Diagnostic {
    pub fn new(location: SourceLocation, message: impl Into<String>) -> Self {
        Diagnostic {
            location,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_render() {
        let d = Diagnostic::new(
            SourceLocation::new(PathBuf::from("prog.bas"), 12),
            "NEXT without FOR",
        );
        assert_eq!(d.to_string(), "prog.bas:12: NEXT without FOR");
    }
}
