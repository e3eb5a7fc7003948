//! Tokenizer for FasterBASIC source text
//!
//! Line-oriented: newlines are significant (they end statements), colons
//! separate statements within a line, and `'` comments run to end of line.
//! Keywords are not distinguished here; the parser compares identifier
//! text case-insensitively.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Number,
    Str,
    Ident,
    Op,
    Newline,
    Eof,
}

/// A token with source position (1-indexed line, 0-indexed column).
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    fn new(kind: TokenKind, text: String, line: usize, column: usize) -> Self {
        Token {
            kind,
            text,
            line,
            column,
        }
    }

    /// Case-insensitive keyword match against an identifier token.
    pub fn is_kw(&self, kw: &str) -> bool {
        self.kind == TokenKind::Ident && self.text.eq_ignore_ascii_case(kw)
    }

    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.text == op
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Newline => write!(f, "end of line"),
            TokenKind::Eof => write!(f, "end of file"),
            TokenKind::Str => write!(f, "\"{}\"", self.text),
            _ => write!(f, "'{}'", self.text),
        }
    }
}

/// Characters that may close an identifier as a type suffix.
const SUFFIX_CHARS: &[char] = &['%', '&', '!', '#', '$', '@', '^'];

/// Tokenize a whole source file. Never fails: unterminated strings are
/// delivered as a string token ending at the line break and the parser
/// reports them (it knows the statement context).
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut line_no = 0usize;

    for line in source.lines() {
        line_no += 1;
        tokenize_line(line, line_no, &mut tokens);
        tokens.push(Token::new(
            TokenKind::Newline,
            String::new(),
            line_no,
            line.chars().count(),
        ));
    }

    tokens.push(Token::new(TokenKind::Eof, String::new(), line_no + 1, 0));
    tokens
}

fn tokenize_line(line: &str, line_no: usize, tokens: &mut Vec<Token>) {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Comment to end of line
        if c == '\'' {
            break;
        }

        if c == '"' {
            let start = i;
            i += 1;
            let mut text = String::new();
            while i < chars.len() {
                if chars[i] == '"' {
                    // Doubled quote is an escaped quote
                    if i + 1 < chars.len() && chars[i + 1] == '"' {
                        text.push('"');
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                text.push(chars[i]);
                i += 1;
            }
            tokens.push(Token::new(TokenKind::Str, text, line_no, start));
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && i + 1 < chars.len() && chars[i + 1].is_ascii_digit())
        {
            let start = i;
            let mut text = String::new();
            let mut seen_dot = false;
            while i < chars.len() {
                let d = chars[i];
                if d.is_ascii_digit() {
                    text.push(d);
                    i += 1;
                } else if d == '.' && !seen_dot {
                    seen_dot = true;
                    text.push(d);
                    i += 1;
                } else if (d == 'e' || d == 'E')
                    && i + 1 < chars.len()
                    && (chars[i + 1].is_ascii_digit()
                        || ((chars[i + 1] == '+' || chars[i + 1] == '-')
                            && i + 2 < chars.len()
                            && chars[i + 2].is_ascii_digit()))
                {
                    text.push('e');
                    i += 1;
                    if chars[i] == '+' || chars[i] == '-' {
                        text.push(chars[i]);
                        i += 1;
                    }
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        text.push(chars[i]);
                        i += 1;
                    }
                    break;
                } else {
                    break;
                }
            }
            tokens.push(Token::new(TokenKind::Number, text, line_no, start));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            let mut text = String::new();
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                text.push(chars[i]);
                i += 1;
            }
            // Trailing type suffix. `^` doubles as the power operator: it
            // only counts as a suffix when what follows could not start an
            // operand.
            if i < chars.len() && SUFFIX_CHARS.contains(&chars[i]) {
                let is_suffix = if chars[i] == '^' {
                    match chars.get(i + 1) {
                        Some(n) => !(n.is_ascii_alphanumeric() || *n == '(' || *n == '.'),
                        None => true,
                    }
                } else {
                    true
                };
                if is_suffix {
                    text.push(chars[i]);
                    i += 1;
                }
            }
            tokens.push(Token::new(TokenKind::Ident, text, line_no, start));
            continue;
        }

        // Multi-character operators first
        let two: String = chars[i..chars.len().min(i + 2)].iter().collect();
        if two == "<=" || two == ">=" || two == "<>" {
            tokens.push(Token::new(TokenKind::Op, two, line_no, i));
            i += 2;
            continue;
        }

        tokens.push(Token::new(TokenKind::Op, c.to_string(), line_no, i));
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(src: &str) -> Vec<String> {
        tokenize(src)
            .into_iter()
            .filter(|t| !matches!(t.kind, TokenKind::Newline | TokenKind::Eof))
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn test_basic_line() {
        let toks = tokenize("10 PRINT \"HI\"; X%\n");
        let kinds: Vec<TokenKind> = toks.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Number,
                TokenKind::Ident,
                TokenKind::Str,
                TokenKind::Op,
                TokenKind::Ident,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
        assert_eq!(toks[4].text, "X%");
    }

    #[test]
    fn test_suffixes_stick_to_identifiers() {
        assert_eq!(texts("A$ B# C& D@ E^ = 1"), ["A$", "B#", "C&", "D@", "E^", "=", "1"]);
    }

    #[test]
    fn test_caret_is_power_before_operand() {
        // X^2 is exponentiation, not a SHORT-suffixed X
        assert_eq!(texts("X^2"), ["X", "^", "2"]);
        assert_eq!(texts("X^(Y)"), ["X", "^", "(", "Y", ")"]);
    }

    #[test]
    fn test_relational_operators() {
        assert_eq!(texts("A <= B >= C <> D"), ["A", "<=", "B", ">=", "C", "<>", "D"]);
    }

    #[test]
    fn test_comment_swallowed() {
        assert_eq!(texts("PRINT 1 ' the rest is ignored"), ["PRINT", "1"]);
    }

    #[test]
    fn test_doubled_quote_escapes() {
        let toks = tokenize("PRINT \"SAY \"\"HI\"\"\"");
        assert_eq!(toks[1].kind, TokenKind::Str);
        assert_eq!(toks[1].text, "SAY \"HI\"");
    }

    #[test]
    fn test_numbers() {
        assert_eq!(texts("1 2.5 .75 1e3 2.5e-2"), ["1", "2.5", ".75", "1e3", "2.5e-2"]);
    }

    #[test]
    fn test_line_numbers_are_one_indexed() {
        let toks = tokenize("A\nB\n");
        assert_eq!(toks[0].line, 1);
        assert_eq!(toks[2].line, 2);
    }
}
