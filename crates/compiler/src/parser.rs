//! Recursive-descent parser for FasterBASIC
//!
//! Consumes the token stream line by line and produces the [`Program`]
//! AST. The parser performs no type checking: it records identifiers with
//! their suffixes as written and leaves typing to the symbol table. On an
//! error it reports a diagnostic and resynchronizes at the next line, so
//! one run surfaces every syntax error in the unit.

use crate::ast::{
    BinOp, CaseArm, CaseTest, DataConst, DimDecl, DimRange, Expr, ExitKind, FieldDecl,
    JumpTarget, LValue, LoopCond, Param, PrintItem, PrintSep, Program, ProgramLine,
    SourceLocation, Statement, StatementKind, UnOp,
};
use crate::diag::Diagnostic;
use crate::lexer::{Token, TokenKind, tokenize};
use std::path::PathBuf;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: PathBuf,
    diagnostics: Vec<Diagnostic>,
}

type PResult<T> = Result<T, Diagnostic>;

impl Parser {
    pub fn new(source: &str, file: impl Into<PathBuf>) -> Self {
        Parser {
            tokens: tokenize(source),
            pos: 0,
            file: file.into(),
            diagnostics: Vec::new(),
        }
    }

    /// Parse the whole unit. The program is returned even when diagnostics
    /// were reported, so dump modes can inspect partial results.
    pub fn parse(mut self) -> (Program, Vec<Diagnostic>) {
        let mut program = Program::new();

        while !self.at_eof() {
            if self.peek().kind == TokenKind::Newline {
                self.advance();
                continue;
            }
            match self.parse_line() {
                Ok(line) => {
                    if !line.statements.is_empty() || line.number.is_some() {
                        program.lines.push(line);
                    }
                }
                Err(diag) => {
                    self.diagnostics.push(diag);
                    self.skip_to_eol();
                }
            }
        }

        (program, self.diagnostics)
    }

    // ---- token plumbing ----

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof)
    }

    fn loc(&self) -> SourceLocation {
        SourceLocation::new(self.file.clone(), self.peek().line)
    }

    fn error(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(self.loc(), message)
    }

    fn skip_to_eol(&mut self) {
        while !self.at_line_end() {
            self.advance();
        }
        if self.peek().kind == TokenKind::Newline {
            self.advance();
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek().kind == TokenKind::Newline {
            self.advance();
        }
    }

    fn match_kw(&mut self, kw: &str) -> bool {
        if self.peek().is_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> PResult<()> {
        if self.match_kw(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {}", kw, self.peek())))
        }
    }

    fn match_op(&mut self, op: &str) -> bool {
        if self.peek().is_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> PResult<()> {
        if self.match_op(op) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}', found {}", op, self.peek())))
        }
    }

    fn expect_ident(&mut self, what: &str) -> PResult<String> {
        if self.peek().kind == TokenKind::Ident {
            Ok(self.advance().text)
        } else {
            Err(self.error(format!("expected {}, found {}", what, self.peek())))
        }
    }

    // ---- lines and statements ----

    fn parse_line(&mut self) -> PResult<ProgramLine> {
        let location = self.loc();

        let number = if self.peek().kind == TokenKind::Number {
            let text = self.advance().text;
            match text.parse::<u32>() {
                Ok(n) => Some(n),
                Err(_) => {
                    return Err(Diagnostic::new(
                        location,
                        format!("invalid line number '{}'", text),
                    ));
                }
            }
        } else {
            None
        };

        let mut statements = Vec::new();
        let mut first = true;
        loop {
            if self.at_line_end() {
                break;
            }
            if self.match_op(":") {
                first = false;
                continue;
            }
            // A label definition only at the start of a line
            if first
                && self.peek().kind == TokenKind::Ident
                && self.peek_at(1).is_op(":")
                && !is_keyword(&self.peek().text)
            {
                let loc = self.loc();
                let name = self.advance().text;
                self.advance(); // ':'
                statements.push(Statement::new(StatementKind::Label { name }, loc));
                first = false;
                continue;
            }
            first = false;
            statements.push(self.parse_statement()?);
        }
        if self.peek().kind == TokenKind::Newline {
            self.advance();
        }

        Ok(ProgramLine {
            number,
            statements,
            location,
        })
    }

    fn parse_statement(&mut self) -> PResult<Statement> {
        let loc = self.loc();
        let kind = self.parse_statement_kind()?;
        Ok(Statement::new(kind, loc))
    }

    fn parse_statement_kind(&mut self) -> PResult<StatementKind> {
        let tok = self.peek().clone();
        if tok.kind != TokenKind::Ident {
            return Err(self.error(format!("expected a statement, found {}", tok)));
        }
        let upper = tok.text.to_ascii_uppercase();

        match upper.as_str() {
            "PRINT" => {
                self.advance();
                self.parse_print()
            }
            "INPUT" => {
                self.advance();
                self.parse_input()
            }
            "LET" => {
                self.advance();
                self.parse_assignment()
            }
            "MID$" if self.peek_at(1).is_op("(") => {
                self.advance();
                self.parse_mid_assign()
            }
            "IF" => {
                self.advance();
                self.parse_if()
            }
            "FOR" => {
                self.advance();
                self.parse_for()
            }
            "NEXT" => {
                self.advance();
                let var = if self.peek().kind == TokenKind::Ident && !self.at_line_end() {
                    Some(self.advance().text)
                } else {
                    None
                };
                Ok(StatementKind::Next { var })
            }
            "WHILE" => {
                self.advance();
                let condition = self.parse_expr()?;
                Ok(StatementKind::While { condition })
            }
            "WEND" => {
                self.advance();
                Ok(StatementKind::Wend)
            }
            "DO" => {
                self.advance();
                let cond = self.parse_loop_condition()?;
                Ok(StatementKind::Do { cond })
            }
            "LOOP" => {
                self.advance();
                let cond = self.parse_loop_condition()?;
                Ok(StatementKind::Loop { cond })
            }
            "REPEAT" => {
                self.advance();
                Ok(StatementKind::Repeat)
            }
            "UNTIL" => {
                self.advance();
                let condition = self.parse_expr()?;
                Ok(StatementKind::Until { condition })
            }
            "GOTO" => {
                self.advance();
                let target = self.parse_jump_target()?;
                Ok(StatementKind::Goto { target })
            }
            "GOSUB" => {
                self.advance();
                let target = self.parse_jump_target()?;
                Ok(StatementKind::Gosub { target })
            }
            "ON" => {
                self.advance();
                self.parse_on()
            }
            "RETURN" => {
                self.advance();
                Ok(StatementKind::Return)
            }
            "DIM" => {
                self.advance();
                let decls = self.parse_dim_decls()?;
                Ok(StatementKind::Dim { decls })
            }
            "REDIM" => {
                self.advance();
                let preserve = self.match_kw("PRESERVE");
                let decls = self.parse_dim_decls()?;
                Ok(StatementKind::Redim { preserve, decls })
            }
            "ERASE" => {
                self.advance();
                let mut arrays = vec![self.expect_ident("array name")?];
                while self.match_op(",") {
                    arrays.push(self.expect_ident("array name")?);
                }
                Ok(StatementKind::Erase { arrays })
            }
            "END" => {
                self.advance();
                // END IF / END SELECT / ... are consumed by their openers;
                // a bare END here terminates the program.
                Ok(StatementKind::End)
            }
            "REM" => {
                self.advance();
                while !self.at_line_end() {
                    self.advance();
                }
                Ok(StatementKind::Rem)
            }
            "CALL" => {
                self.advance();
                let name = self.expect_ident("subroutine name")?;
                let args = if self.match_op("(") {
                    let args = self.parse_arg_list()?;
                    self.expect_op(")")?;
                    args
                } else {
                    Vec::new()
                };
                Ok(StatementKind::Call { name, args })
            }
            "EXIT" => {
                self.advance();
                let kind = if self.match_kw("FOR") {
                    ExitKind::For
                } else if self.match_kw("WHILE") {
                    ExitKind::While
                } else if self.match_kw("DO") {
                    ExitKind::Do
                } else if self.match_kw("FUNCTION") {
                    ExitKind::Function
                } else if self.match_kw("SUB") {
                    ExitKind::Sub
                } else {
                    return Err(self.error("EXIT must name FOR, WHILE, DO, FUNCTION or SUB"));
                };
                Ok(StatementKind::Exit { kind })
            }
            "SELECT" => {
                self.advance();
                self.parse_select()
            }
            "LOCAL" => {
                self.advance();
                let decls = self.parse_name_decl_list()?;
                Ok(StatementKind::Local { decls })
            }
            "SHARED" => {
                self.advance();
                let mut names = vec![self.expect_ident("variable name")?];
                while self.match_op(",") {
                    names.push(self.expect_ident("variable name")?);
                }
                Ok(StatementKind::Shared { names })
            }
            "GLOBAL" => {
                self.advance();
                let decls = self.parse_name_decl_list()?;
                Ok(StatementKind::Global { decls })
            }
            "TYPE" => {
                self.advance();
                self.parse_type_decl()
            }
            "CONST" => {
                self.advance();
                let name = self.expect_ident("constant name")?;
                self.expect_op("=")?;
                let value = self.parse_expr()?;
                Ok(StatementKind::Constant { name, value })
            }
            "READ" => {
                self.advance();
                let mut targets = vec![self.parse_lvalue()?];
                while self.match_op(",") {
                    targets.push(self.parse_lvalue()?);
                }
                Ok(StatementKind::Read { targets })
            }
            "RESTORE" => {
                self.advance();
                let target = if self.at_line_end() || self.peek().is_op(":") {
                    None
                } else {
                    Some(self.parse_jump_target()?)
                };
                Ok(StatementKind::Restore { target })
            }
            "DATA" => {
                self.advance();
                self.parse_data()
            }
            "TRY" => {
                self.advance();
                self.parse_try()
            }
            "THROW" => {
                self.advance();
                let code = self.parse_expr()?;
                Ok(StatementKind::Throw { code })
            }
            "DEF" => {
                self.advance();
                self.parse_def()
            }
            "FUNCTION" => {
                self.advance();
                self.parse_function()
            }
            "SUB" => {
                self.advance();
                self.parse_sub()
            }
            "CLS" => {
                self.advance();
                Ok(StatementKind::Cls)
            }
            "COLOR" => {
                self.advance();
                let fg = self.parse_expr()?;
                self.expect_op(",")?;
                let bg = self.parse_expr()?;
                Ok(StatementKind::Color { fg, bg })
            }
            "LOCATE" | "AT" => {
                self.advance();
                let row = self.parse_expr()?;
                self.expect_op(",")?;
                let col = self.parse_expr()?;
                Ok(StatementKind::Locate { row, col })
            }
            "WIDTH" => {
                self.advance();
                let cols = self.parse_expr()?;
                Ok(StatementKind::Width { cols })
            }
            _ => {
                // Assignment, or a bare SUB call
                if self.looks_like_assignment() {
                    self.parse_assignment()
                } else {
                    let name = self.advance().text;
                    let args = if self.at_line_end() || self.peek().is_op(":") {
                        Vec::new()
                    } else {
                        let mut args = vec![self.parse_expr()?];
                        while self.match_op(",") {
                            args.push(self.parse_expr()?);
                        }
                        args
                    };
                    Ok(StatementKind::Call { name, args })
                }
            }
        }
    }

    /// An identifier starts an assignment when an `=` follows the
    /// identifier and its optional index / member-chain suffix.
    fn looks_like_assignment(&self) -> bool {
        let mut i = 1; // past the identifier
        loop {
            let tok = self.peek_at(i);
            if tok.is_op("(") {
                // Skip to the matching close paren
                let mut depth = 1;
                i += 1;
                while depth > 0 {
                    let t = self.peek_at(i);
                    match t.kind {
                        TokenKind::Newline | TokenKind::Eof => return false,
                        TokenKind::Op if t.text == "(" => depth += 1,
                        TokenKind::Op if t.text == ")" => depth -= 1,
                        _ => {}
                    }
                    i += 1;
                }
            } else if tok.is_op(".") {
                i += 2; // '.' plus the member name
            } else {
                return tok.is_op("=");
            }
        }
    }

    fn parse_loop_condition(&mut self) -> PResult<Option<(LoopCond, Expr)>> {
        if self.match_kw("WHILE") {
            Ok(Some((LoopCond::While, self.parse_expr()?)))
        } else if self.match_kw("UNTIL") {
            Ok(Some((LoopCond::Until, self.parse_expr()?)))
        } else {
            Ok(None)
        }
    }

    fn parse_jump_target(&mut self) -> PResult<JumpTarget> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Number => {
                self.advance();
                tok.text
                    .parse::<u32>()
                    .map(JumpTarget::Line)
                    .map_err(|_| self.error(format!("invalid line number '{}'", tok.text)))
            }
            TokenKind::Ident => {
                self.advance();
                Ok(JumpTarget::Label(tok.text))
            }
            _ => Err(self.error(format!("expected a line number or label, found {}", tok))),
        }
    }

    fn parse_print(&mut self) -> PResult<StatementKind> {
        let using = if self.match_kw("USING") {
            let fmt = self.parse_expr()?;
            self.expect_op(";")?;
            Some(fmt)
        } else {
            None
        };

        let mut items = Vec::new();
        while !self.at_line_end() && !self.peek().is_op(":") {
            let expr = self.parse_expr()?;
            let sep = if self.match_op(",") {
                Some(PrintSep::Comma)
            } else if self.match_op(";") {
                Some(PrintSep::Semicolon)
            } else {
                None
            };
            let done = sep.is_none();
            items.push(PrintItem { expr, sep });
            if done {
                break;
            }
            if self.at_line_end() || self.peek().is_op(":") {
                break;
            }
        }
        Ok(StatementKind::Print { using, items })
    }

    fn parse_input(&mut self) -> PResult<StatementKind> {
        let prompt = if self.peek().kind == TokenKind::Str {
            let text = self.advance().text;
            if !self.match_op(";") {
                self.expect_op(",")?;
            }
            Some(text)
        } else {
            None
        };
        let mut targets = vec![self.parse_lvalue()?];
        while self.match_op(",") {
            targets.push(self.parse_lvalue()?);
        }
        Ok(StatementKind::Input { prompt, targets })
    }

    fn parse_lvalue(&mut self) -> PResult<LValue> {
        let name = self.expect_ident("variable name")?;
        let mut indices = Vec::new();
        if self.match_op("(") {
            if !self.peek().is_op(")") {
                indices.push(self.parse_expr()?);
                while self.match_op(",") {
                    indices.push(self.parse_expr()?);
                }
            }
            self.expect_op(")")?;
        }
        let mut members = Vec::new();
        while self.match_op(".") {
            members.push(self.expect_ident("member name")?);
        }
        Ok(LValue {
            name,
            indices,
            members,
        })
    }

    fn parse_assignment(&mut self) -> PResult<StatementKind> {
        let name = self.expect_ident("variable name")?;
        let mut indices = Vec::new();
        if self.match_op("(") {
            if !self.peek().is_op(")") {
                let first = self.parse_expr()?;
                if self.match_kw("TO") {
                    // String slice assignment: v$(start TO end) = repl$
                    let end = self.parse_expr()?;
                    self.expect_op(")")?;
                    self.expect_op("=")?;
                    let value = self.parse_expr()?;
                    return Ok(StatementKind::SliceAssign {
                        var: name,
                        start: first,
                        end,
                        value,
                    });
                }
                indices.push(first);
                while self.match_op(",") {
                    indices.push(self.parse_expr()?);
                }
            }
            self.expect_op(")")?;
        }
        let mut members = Vec::new();
        while self.match_op(".") {
            members.push(self.expect_ident("member name")?);
        }
        self.expect_op("=")?;
        let value = self.parse_expr()?;
        Ok(StatementKind::Let {
            target: LValue {
                name,
                indices,
                members,
            },
            value,
        })
    }

    fn parse_mid_assign(&mut self) -> PResult<StatementKind> {
        self.expect_op("(")?;
        let var = self.expect_ident("string variable")?;
        self.expect_op(",")?;
        let start = self.parse_expr()?;
        self.expect_op(",")?;
        let length = self.parse_expr()?;
        self.expect_op(")")?;
        self.expect_op("=")?;
        let value = self.parse_expr()?;
        Ok(StatementKind::MidAssign {
            var,
            start,
            length,
            value,
        })
    }

    fn parse_if(&mut self) -> PResult<StatementKind> {
        let condition = self.parse_expr()?;
        self.expect_kw("THEN")?;

        if self.at_line_end() {
            // Multi-line IF
            self.advance();
            let mut then_stmts = Vec::new();
            let mut elseifs: Vec<(Expr, Vec<Statement>)> = Vec::new();
            let mut else_stmts = Vec::new();

            #[derive(Clone, Copy)]
            enum Section {
                Then,
                ElseIf,
                Else,
            }
            let mut section = Section::Then;

            loop {
                self.skip_newlines();
                if self.at_eof() {
                    return Err(self.error("IF without END IF"));
                }
                if self.peek().is_kw("END") && self.peek_at(1).is_kw("IF") {
                    self.advance();
                    self.advance();
                    break;
                }
                if self.peek().is_kw("ELSEIF") {
                    self.advance();
                    let cond = self.parse_expr()?;
                    self.expect_kw("THEN")?;
                    elseifs.push((cond, Vec::new()));
                    section = Section::ElseIf;
                    continue;
                }
                if self.peek().is_kw("ELSE") {
                    self.advance();
                    section = Section::Else;
                    continue;
                }
                if self.match_op(":") {
                    continue;
                }
                let stmt = self.parse_statement()?;
                match section {
                    Section::Then => then_stmts.push(stmt),
                    Section::ElseIf => elseifs.last_mut().unwrap().1.push(stmt),
                    Section::Else => else_stmts.push(stmt),
                }
            }

            Ok(StatementKind::If {
                condition,
                then_stmts,
                elseifs,
                else_stmts,
                multiline: true,
            })
        } else {
            // Single-line IF: THEN body to end of line, optional ELSE
            let mut then_stmts = Vec::new();
            let mut else_stmts = Vec::new();

            if self.peek().kind == TokenKind::Number {
                let loc = self.loc();
                let target = self.parse_jump_target()?;
                then_stmts.push(Statement::new(StatementKind::Goto { target }, loc));
            } else {
                then_stmts.push(self.parse_statement()?);
                while self.match_op(":") {
                    if self.at_line_end() || self.peek().is_kw("ELSE") {
                        break;
                    }
                    then_stmts.push(self.parse_statement()?);
                }
            }

            if self.match_kw("ELSE") {
                if self.peek().kind == TokenKind::Number {
                    let loc = self.loc();
                    let target = self.parse_jump_target()?;
                    else_stmts.push(Statement::new(StatementKind::Goto { target }, loc));
                } else {
                    else_stmts.push(self.parse_statement()?);
                    while self.match_op(":") {
                        if self.at_line_end() {
                            break;
                        }
                        else_stmts.push(self.parse_statement()?);
                    }
                }
            }

            Ok(StatementKind::If {
                condition,
                then_stmts,
                elseifs: Vec::new(),
                else_stmts,
                multiline: false,
            })
        }
    }

    fn parse_for(&mut self) -> PResult<StatementKind> {
        if self.match_kw("EACH") {
            let var = self.expect_ident("loop variable")?;
            self.expect_kw("IN")?;
            let array = self.expect_ident("array name")?;
            return Ok(StatementKind::ForEach { var, array });
        }
        let var = self.expect_ident("loop variable")?;
        self.expect_op("=")?;
        let start = self.parse_expr()?;
        self.expect_kw("TO")?;
        let end = self.parse_expr()?;
        let step = if self.match_kw("STEP") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(StatementKind::For {
            var,
            start,
            end,
            step,
        })
    }

    fn parse_on(&mut self) -> PResult<StatementKind> {
        let selector = self.parse_expr()?;
        let is_gosub = if self.match_kw("GOTO") {
            false
        } else if self.match_kw("GOSUB") {
            true
        } else {
            return Err(self.error("ON must be followed by GOTO or GOSUB"));
        };
        let mut targets = vec![self.parse_jump_target()?];
        while self.match_op(",") {
            targets.push(self.parse_jump_target()?);
        }
        if is_gosub {
            Ok(StatementKind::OnGosub { selector, targets })
        } else {
            Ok(StatementKind::OnGoto { selector, targets })
        }
    }

    fn parse_dim_decls(&mut self) -> PResult<Vec<DimDecl>> {
        let mut decls = vec![self.parse_dim_decl()?];
        while self.match_op(",") {
            decls.push(self.parse_dim_decl()?);
        }
        Ok(decls)
    }

    fn parse_dim_decl(&mut self) -> PResult<DimDecl> {
        let name = self.expect_ident("name")?;
        let mut bounds = Vec::new();
        if self.match_op("(") {
            loop {
                let first = self.parse_expr()?;
                if self.match_kw("TO") {
                    let upper = self.parse_expr()?;
                    bounds.push(DimRange {
                        lower: Some(first),
                        upper,
                    });
                } else {
                    bounds.push(DimRange {
                        lower: None,
                        upper: first,
                    });
                }
                if !self.match_op(",") {
                    break;
                }
            }
            self.expect_op(")")?;
        }
        let as_type = if self.match_kw("AS") {
            Some(self.expect_ident("type name")?)
        } else {
            None
        };
        Ok(DimDecl {
            name,
            bounds,
            as_type,
        })
    }

    fn parse_name_decl_list(&mut self) -> PResult<Vec<(String, Option<String>)>> {
        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident("variable name")?;
            let as_type = if self.match_kw("AS") {
                Some(self.expect_ident("type name")?)
            } else {
                None
            };
            decls.push((name, as_type));
            if !self.match_op(",") {
                break;
            }
        }
        Ok(decls)
    }

    fn parse_type_decl(&mut self) -> PResult<StatementKind> {
        let name = self.expect_ident("type name")?;
        let mut fields = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_eof() {
                return Err(self.error("TYPE without END TYPE"));
            }
            if self.peek().is_kw("END") && self.peek_at(1).is_kw("TYPE") {
                self.advance();
                self.advance();
                break;
            }
            let field_name = self.expect_ident("field name")?;
            self.expect_kw("AS")?;
            let type_name = self.expect_ident("type name")?;
            fields.push(FieldDecl {
                name: field_name,
                type_name,
            });
        }
        Ok(StatementKind::TypeDecl { name, fields })
    }

    fn parse_data(&mut self) -> PResult<StatementKind> {
        let mut values = Vec::new();
        loop {
            let negative = self.match_op("-");
            let tok = self.peek().clone();
            let value = match tok.kind {
                TokenKind::Number => {
                    self.advance();
                    if tok.text.contains('.') || tok.text.contains('e') {
                        let v: f64 = tok
                            .text
                            .parse()
                            .map_err(|_| self.error(format!("bad number '{}'", tok.text)))?;
                        DataConst::Double(if negative { -v } else { v })
                    } else {
                        let v: i64 = tok
                            .text
                            .parse()
                            .map_err(|_| self.error(format!("bad number '{}'", tok.text)))?;
                        DataConst::Int(if negative { -v } else { v })
                    }
                }
                TokenKind::Str => {
                    self.advance();
                    DataConst::Str(tok.text)
                }
                TokenKind::Ident if !negative => {
                    // Unquoted DATA strings
                    self.advance();
                    DataConst::Str(tok.text)
                }
                _ => return Err(self.error(format!("bad DATA constant {}", tok))),
            };
            values.push(value);
            if !self.match_op(",") {
                break;
            }
        }
        Ok(StatementKind::Data { values })
    }

    fn parse_try(&mut self) -> PResult<StatementKind> {
        let mut body = Vec::new();
        let mut catches: Vec<(i64, Vec<Statement>)> = Vec::new();
        let mut finally: Option<Vec<Statement>> = None;

        #[derive(Clone, Copy)]
        enum Section {
            Body,
            Catch,
            Finally,
        }
        let mut section = Section::Body;

        loop {
            self.skip_newlines();
            if self.at_eof() {
                return Err(self.error("TRY without END TRY"));
            }
            if self.peek().is_kw("END") && self.peek_at(1).is_kw("TRY") {
                self.advance();
                self.advance();
                break;
            }
            if self.peek().is_kw("CATCH") {
                self.advance();
                let tok = self.advance();
                let code = tok
                    .text
                    .parse::<i64>()
                    .map_err(|_| self.error(format!("CATCH needs an integer code, found {}", tok)))?;
                catches.push((code, Vec::new()));
                section = Section::Catch;
                continue;
            }
            if self.peek().is_kw("FINALLY") {
                self.advance();
                finally = Some(Vec::new());
                section = Section::Finally;
                continue;
            }
            if self.match_op(":") {
                continue;
            }
            let stmt = self.parse_statement()?;
            match section {
                Section::Body => body.push(stmt),
                Section::Catch => catches.last_mut().unwrap().1.push(stmt),
                Section::Finally => finally.as_mut().unwrap().push(stmt),
            }
        }

        Ok(StatementKind::TryCatch {
            body,
            catches,
            finally,
        })
    }

    fn parse_select(&mut self) -> PResult<StatementKind> {
        self.expect_kw("CASE")?;
        let selector = self.parse_expr()?;
        let mut arms: Vec<CaseArm> = Vec::new();
        let mut else_body: Option<Vec<Statement>> = None;

        loop {
            self.skip_newlines();
            if self.at_eof() {
                return Err(self.error("SELECT CASE without END SELECT"));
            }
            if self.peek().is_kw("END") && self.peek_at(1).is_kw("SELECT") {
                self.advance();
                self.advance();
                break;
            }
            if self.peek().is_kw("CASE") {
                self.advance();
                if self.match_kw("ELSE") {
                    else_body = Some(Vec::new());
                    continue;
                }
                let mut tests = vec![self.parse_case_test()?];
                while self.match_op(",") {
                    tests.push(self.parse_case_test()?);
                }
                arms.push(CaseArm {
                    tests,
                    body: Vec::new(),
                });
                continue;
            }
            if self.match_op(":") {
                continue;
            }
            let stmt = self.parse_statement()?;
            if let Some(body) = else_body.as_mut() {
                body.push(stmt);
            } else if let Some(arm) = arms.last_mut() {
                arm.body.push(stmt);
            } else {
                return Err(Diagnostic::new(
                    stmt.location.clone(),
                    "statement before the first CASE clause",
                ));
            }
        }

        Ok(StatementKind::Select {
            selector,
            arms,
            else_body,
        })
    }

    fn parse_case_test(&mut self) -> PResult<CaseTest> {
        if self.match_kw("IS") {
            let op = if self.match_op("=") {
                BinOp::Eq
            } else if self.match_op("<>") {
                BinOp::Ne
            } else if self.match_op("<=") {
                BinOp::Le
            } else if self.match_op(">=") {
                BinOp::Ge
            } else if self.match_op("<") {
                BinOp::Lt
            } else if self.match_op(">") {
                BinOp::Gt
            } else {
                return Err(self.error("CASE IS needs a relational operator"));
            };
            let value = self.parse_expr()?;
            return Ok(CaseTest::Relational(op, value));
        }
        let first = self.parse_expr()?;
        if self.match_kw("TO") {
            let hi = self.parse_expr()?;
            Ok(CaseTest::Range(first, hi))
        } else {
            Ok(CaseTest::Value(first))
        }
    }

    fn parse_def(&mut self) -> PResult<StatementKind> {
        let name = self.expect_ident("function name")?;
        if !name.to_ascii_uppercase().starts_with("FN") {
            return Err(self.error("DEF function names must start with FN"));
        }
        let params = self.parse_param_list()?;
        self.expect_op("=")?;
        let body = self.parse_expr()?;
        Ok(StatementKind::Def { name, params, body })
    }

    fn parse_param_list(&mut self) -> PResult<Vec<Param>> {
        let mut params = Vec::new();
        if self.match_op("(") {
            if !self.peek().is_op(")") {
                loop {
                    let name = self.expect_ident("parameter name")?;
                    let as_type = if self.match_kw("AS") {
                        Some(self.expect_ident("type name")?)
                    } else {
                        None
                    };
                    params.push(Param { name, as_type });
                    if !self.match_op(",") {
                        break;
                    }
                }
            }
            self.expect_op(")")?;
        }
        Ok(params)
    }

    fn parse_function(&mut self) -> PResult<StatementKind> {
        let name = self.expect_ident("function name")?;
        let params = self.parse_param_list()?;
        let return_type = if self.match_kw("AS") {
            Some(self.expect_ident("type name")?)
        } else {
            None
        };
        let body = self.parse_routine_body("FUNCTION")?;
        Ok(StatementKind::Function {
            name,
            params,
            return_type,
            body,
        })
    }

    fn parse_sub(&mut self) -> PResult<StatementKind> {
        let name = self.expect_ident("subroutine name")?;
        let params = self.parse_param_list()?;
        let body = self.parse_routine_body("SUB")?;
        Ok(StatementKind::Sub { name, params, body })
    }

    fn parse_routine_body(&mut self, closer: &str) -> PResult<Vec<Statement>> {
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_eof() {
                return Err(self.error(format!("{} without END {}", closer, closer)));
            }
            if self.peek().is_kw("END") && self.peek_at(1).is_kw(closer) {
                self.advance();
                self.advance();
                break;
            }
            if self.match_op(":") {
                continue;
            }
            // Labels are legal inside routines
            if self.peek().kind == TokenKind::Ident
                && self.peek_at(1).is_op(":")
                && !is_keyword(&self.peek().text)
            {
                let loc = self.loc();
                let name = self.advance().text;
                self.advance();
                body.push(Statement::new(StatementKind::Label { name }, loc));
                continue;
            }
            body.push(self.parse_statement()?);
        }
        Ok(body)
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_and()?;
        loop {
            let op = if self.match_kw("OR") {
                BinOp::Or
            } else if self.match_kw("XOR") {
                BinOp::Xor
            } else {
                break;
            };
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_not()?;
        while self.match_kw("AND") {
            let rhs = self.parse_not()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> PResult<Expr> {
        if self.match_kw("NOT") {
            let operand = self.parse_not()?;
            Ok(Expr::Unary {
                op: UnOp::Not,
                operand: Box::new(operand),
            })
        } else {
            self.parse_comparison()
        }
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let lhs = self.parse_additive()?;
        let op = if self.match_op("=") {
            BinOp::Eq
        } else if self.match_op("<>") {
            BinOp::Ne
        } else if self.match_op("<=") {
            BinOp::Le
        } else if self.match_op(">=") {
            BinOp::Ge
        } else if self.match_op("<") {
            BinOp::Lt
        } else if self.match_op(">") {
            BinOp::Gt
        } else {
            return Ok(lhs);
        };
        let rhs = self.parse_additive()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_modulo()?;
        loop {
            let op = if self.match_op("+") {
                BinOp::Add
            } else if self.match_op("-") {
                BinOp::Sub
            } else {
                break;
            };
            let rhs = self.parse_modulo()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_modulo(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_int_div()?;
        while self.match_kw("MOD") {
            let rhs = self.parse_int_div()?;
            lhs = Expr::Binary {
                op: BinOp::Mod,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_int_div(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        while self.match_op("\\") {
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op: BinOp::IntDiv,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.match_op("*") {
                BinOp::Mul
            } else if self.match_op("/") {
                BinOp::Div
            } else {
                break;
            };
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        if self.match_op("-") {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnOp::Neg,
                operand: Box::new(operand),
            });
        }
        if self.match_op("+") {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnOp::Plus,
                operand: Box::new(operand),
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let base = self.parse_postfix()?;
        if self.match_op("^") {
            // Right associative
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        while self.match_op(".") {
            let member = self.expect_ident("member name")?;
            expr = Expr::MemberAccess {
                object: Box::new(expr),
                member,
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Number => {
                self.advance();
                let v: f64 = tok
                    .text
                    .parse()
                    .map_err(|_| self.error(format!("bad number '{}'", tok.text)))?;
                Ok(Expr::Number(v))
            }
            TokenKind::Str => {
                self.advance();
                Ok(Expr::Str(tok.text))
            }
            TokenKind::Op if tok.text == "(" => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            TokenKind::Ident => {
                let name = self.advance().text;
                if self.match_op("(") {
                    if self.match_op(")") {
                        // Whole-array reference: the descriptor pointer
                        return Ok(Expr::ArrayAccess {
                            name,
                            indices: Vec::new(),
                        });
                    }
                    let args = self.parse_arg_list()?;
                    self.expect_op(")")?;
                    // Array reads and calls are spelled identically; the
                    // emitter resolves against the symbol table.
                    Ok(Expr::FunctionCall { name, args })
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            _ => Err(self.error(format!("expected an expression, found {}", tok))),
        }
    }

    fn parse_arg_list(&mut self) -> PResult<Vec<Expr>> {
        let mut args = vec![self.parse_expr()?];
        while self.match_op(",") {
            args.push(self.parse_expr()?);
        }
        Ok(args)
    }
}

/// Keywords that can never be labels or bare SUB calls.
fn is_keyword(text: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "PRINT", "INPUT", "LET", "IF", "THEN", "ELSE", "ELSEIF", "FOR", "EACH", "IN", "TO",
        "STEP", "NEXT", "WHILE", "WEND", "DO", "LOOP", "REPEAT", "UNTIL", "GOTO", "GOSUB", "ON",
        "RETURN", "DIM", "REDIM", "PRESERVE", "ERASE", "END", "REM", "CALL", "EXIT", "SELECT",
        "CASE", "IS", "LOCAL", "SHARED", "GLOBAL", "TYPE", "CONST", "READ", "RESTORE", "DATA",
        "TRY", "CATCH", "FINALLY", "THROW", "DEF", "FUNCTION", "SUB", "CLS", "COLOR", "LOCATE",
        "AT", "WIDTH", "AS", "AND", "OR", "XOR", "NOT", "MOD", "USING",
    ];
    KEYWORDS.iter().any(|k| text.eq_ignore_ascii_case(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        let (program, diags) = Parser::new(src, "test.bas").parse();
        assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        program
    }

    fn first_stmt(program: &Program) -> &Statement {
        program.lines[0].statements.first().expect("no statement")
    }

    #[test]
    fn test_numbered_line_and_print() {
        let p = parse_ok("10 PRINT \"HI\"; X%\n");
        assert_eq!(p.lines[0].number, Some(10));
        match &first_stmt(&p).kind {
            StatementKind::Print { items, using } => {
                assert!(using.is_none());
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].sep, Some(PrintSep::Semicolon));
                assert_eq!(items[1].sep, None);
            }
            other => panic!("expected PRINT, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_shapes() {
        let p = parse_ok("X% = 5\nA%(2) = 42\nP.X = 3\n");
        match &p.lines[0].statements[0].kind {
            StatementKind::Let { target, .. } => assert_eq!(target.name, "X%"),
            other => panic!("{:?}", other),
        }
        match &p.lines[1].statements[0].kind {
            StatementKind::Let { target, .. } => {
                assert_eq!(target.name, "A%");
                assert_eq!(target.indices.len(), 1);
            }
            other => panic!("{:?}", other),
        }
        match &p.lines[2].statements[0].kind {
            StatementKind::Let { target, .. } => {
                assert_eq!(target.members, vec!["X".to_string()]);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_for_next() {
        let p = parse_ok("FOR I = 1 TO 3\nPRINT I\nNEXT I\n");
        match &p.lines[0].statements[0].kind {
            StatementKind::For { var, step, .. } => {
                assert_eq!(var, "I");
                assert!(step.is_none());
            }
            other => panic!("{:?}", other),
        }
        match &p.lines[2].statements[0].kind {
            StatementKind::Next { var } => assert_eq!(var.as_deref(), Some("I")),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_multiline_if() {
        let p = parse_ok("IF X > 1 THEN\nPRINT 1\nELSE\nPRINT 2\nEND IF\n");
        match &first_stmt(&p).kind {
            StatementKind::If {
                multiline,
                then_stmts,
                else_stmts,
                ..
            } => {
                assert!(multiline);
                assert_eq!(then_stmts.len(), 1);
                assert_eq!(else_stmts.len(), 1);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_single_line_if_with_goto_shorthand() {
        let p = parse_ok("IF X THEN 100 ELSE 200\n");
        match &first_stmt(&p).kind {
            StatementKind::If {
                multiline,
                then_stmts,
                else_stmts,
                ..
            } => {
                assert!(!multiline);
                assert!(matches!(
                    then_stmts[0].kind,
                    StatementKind::Goto {
                        target: JumpTarget::Line(100)
                    }
                ));
                assert!(matches!(
                    else_stmts[0].kind,
                    StatementKind::Goto {
                        target: JumpTarget::Line(200)
                    }
                ));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_select_case() {
        let src = "SELECT CASE N\nCASE 1, 2\nPRINT 1\nCASE 5 TO 9\nPRINT 2\nCASE IS > 100\nPRINT 3\nCASE ELSE\nPRINT 4\nEND SELECT\n";
        let p = parse_ok(src);
        match &first_stmt(&p).kind {
            StatementKind::Select {
                arms, else_body, ..
            } => {
                assert_eq!(arms.len(), 3);
                assert_eq!(arms[0].tests.len(), 2);
                assert!(matches!(arms[1].tests[0], CaseTest::Range(..)));
                assert!(matches!(arms[2].tests[0], CaseTest::Relational(BinOp::Gt, _)));
                assert!(else_body.is_some());
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_type_and_dim_as() {
        let p = parse_ok("TYPE PT\nX AS INTEGER\nY AS DOUBLE\nEND TYPE\nDIM P AS PT\n");
        match &p.lines[0].statements[0].kind {
            StatementKind::TypeDecl { name, fields } => {
                assert_eq!(name, "PT");
                assert_eq!(fields.len(), 2);
            }
            other => panic!("{:?}", other),
        }
        match &p.lines[1].statements[0].kind {
            StatementKind::Dim { decls } => {
                assert_eq!(decls[0].as_type.as_deref(), Some("PT"));
                assert!(decls[0].bounds.is_empty());
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_data_values() {
        let p = parse_ok("DATA 1, -2.5, \"S\", RAW\n");
        match &first_stmt(&p).kind {
            StatementKind::Data { values } => {
                assert_eq!(values.len(), 4);
                assert_eq!(values[0], DataConst::Int(1));
                assert_eq!(values[1], DataConst::Double(-2.5));
                assert_eq!(values[2], DataConst::Str("S".into()));
                assert_eq!(values[3], DataConst::Str("RAW".into()));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_on_gosub() {
        let p = parse_ok("ON K% GOSUB 100, 200, 300\n");
        match &first_stmt(&p).kind {
            StatementKind::OnGosub { targets, .. } => assert_eq!(targets.len(), 3),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_function_definition() {
        let src = "FUNCTION AREA#(W#, H#)\nAREA# = W# * H#\nEND FUNCTION\n";
        let p = parse_ok(src);
        match &first_stmt(&p).kind {
            StatementKind::Function {
                name, params, body, ..
            } => {
                assert_eq!(name, "AREA#");
                assert_eq!(params.len(), 2);
                assert_eq!(body.len(), 1);
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_try_catch_finally() {
        let src = "TRY\nTHROW 7\nCATCH 7\nPRINT 1\nFINALLY\nPRINT 2\nEND TRY\n";
        let p = parse_ok(src);
        match &first_stmt(&p).kind {
            StatementKind::TryCatch {
                body,
                catches,
                finally,
            } => {
                assert_eq!(body.len(), 1);
                assert_eq!(catches.len(), 1);
                assert_eq!(catches[0].0, 7);
                assert!(finally.is_some());
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_operator_precedence() {
        let p = parse_ok("X = 1 + 2 * 3\n");
        match &first_stmt(&p).kind {
            StatementKind::Let { value, .. } => match value {
                Expr::Binary { op: BinOp::Add, rhs, .. } => {
                    assert!(matches!(**rhs, Expr::Binary { op: BinOp::Mul, .. }));
                }
                other => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_whole_array_reference() {
        let p = parse_ok("X = BOUNDSUM(A())\n");
        match &first_stmt(&p).kind {
            StatementKind::Let { value, .. } => match value {
                Expr::FunctionCall { args, .. } => {
                    assert!(matches!(
                        args[0],
                        Expr::ArrayAccess { ref indices, .. } if indices.is_empty()
                    ));
                }
                other => panic!("{:?}", other),
            },
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_error_recovery_collects_multiple() {
        let (_, diags) = Parser::new("GOTO +\nEXIT WAT\nPRINT 1\n", "bad.bas").parse();
        assert_eq!(diags.len(), 2);
        assert!(diags[0].to_string().contains("bad.bas:1"));
    }

    #[test]
    fn test_mid_assignment() {
        let p = parse_ok("MID$(S$, 2, 3) = \"abc\"\n");
        assert!(matches!(
            first_stmt(&p).kind,
            StatementKind::MidAssign { .. }
        ));
    }

    #[test]
    fn test_label_definition() {
        let p = parse_ok("again: PRINT 1\nGOTO again\n");
        assert!(matches!(
            p.lines[0].statements[0].kind,
            StatementKind::Label { .. }
        ));
    }
}
