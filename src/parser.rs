//! Parser for nash source code.
//!
//! Recursive descent over the lexer's token stream with exactly one token
//! of lookahead (a single-slot buffer). An `inside_pipe` latch routes
//! commands into pipelines and an `openblocks` counter balances `{`/`}`.
//!
//! Statement dispatch consults a keyword table first; otherwise the leading
//! token decides between function invocation, assignment and command.

use thiserror::Error;

use crate::ast::{
    AssignmentNode, BindFnNode, CommandNode, CommentNode, ConcatExpr, DumpNode, ExecAssignNode,
    ExecSource, Expr, FnDeclNode, FnInvNode, ForNode, IfNode, ImportNode, IndexExpr, IntExpr,
    ListExpr, ListNode, Node, PipeNode, RedirectNode, ReturnNode, RforkNode, SetenvNode,
    StringExpr, Tree, VarExpr, REDIR_MAP_NO_VALUE, REDIR_MAP_SUPRESS, RFORK_FLAGS,
};
use crate::lexer::{Lexer, Token, TokenKind};

/// Parse failure with source position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{file}:{line}:{column}: {msg}")]
pub struct ParseError {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub msg: String,
}

/// Parse a whole source buffer into a [`Tree`].
pub fn parse(name: &str, content: &str) -> Result<Tree, ParseError> {
    Parser::new(name, content).parse()
}

type KeywordParser = fn(&mut Parser, Token) -> Result<Node, ParseError>;

/// Keyword token → statement handler table.
fn keyword_parser(kind: TokenKind) -> Option<KeywordParser> {
    Some(match kind {
        TokenKind::For => Parser::parse_for,
        TokenKind::If => Parser::parse_if,
        TokenKind::Fn => Parser::parse_fn_decl,
        TokenKind::Return => Parser::parse_return,
        TokenKind::Import => Parser::parse_import,
        TokenKind::SetEnv => Parser::parse_setenv,
        TokenKind::Rfork => Parser::parse_rfork,
        TokenKind::BindFn => Parser::parse_bind_fn,
        TokenKind::Dump => Parser::parse_dump,
        TokenKind::Comment => Parser::parse_comment,
        _ => return None,
    })
}

fn is_valid_argument(t: &Token) -> bool {
    matches!(
        t.kind,
        TokenKind::String
            | TokenKind::Number
            | TokenKind::Arg
            | TokenKind::Ident
            | TokenKind::Variable
    ) || t.kind.is_keyword()
}

/// Parses one nash source buffer.
pub struct Parser {
    name: String,
    lexer: Lexer,
    tok: Option<Token>,
    openblocks: i32,
    inside_pipe: bool,
}

impl Parser {
    pub fn new(name: &str, content: &str) -> Self {
        Self {
            name: name.to_string(),
            lexer: Lexer::new(content),
            tok: None,
            openblocks: 0,
            inside_pipe: false,
        }
    }

    pub fn parse(mut self) -> Result<Tree, ParseError> {
        let root = self.parse_block()?;
        Ok(Tree {
            name: self.name,
            root,
        })
    }

    // ───────────────────────────────────────────────────────────────────
    // Token plumbing
    // ───────────────────────────────────────────────────────────────────

    /// Next token from the lookahead slot or the lexer. An `Illegal`
    /// token converts into a parse error here, so no caller ever sees it.
    fn next(&mut self) -> Result<Token, ParseError> {
        let tok = match self.tok.take() {
            Some(t) => t,
            None => self.lexer.next().unwrap_or_else(|| {
                Token::new(
                    TokenKind::Eof,
                    "",
                    crate::lexer::Pos { line: 0, column: 0 },
                )
            }),
        };
        if tok.kind == TokenKind::Illegal {
            return Err(ParseError {
                file: self.name.clone(),
                line: tok.pos.line,
                column: tok.pos.column,
                msg: tok.value,
            });
        }
        Ok(tok)
    }

    /// Put a token back into the single lookahead slot.
    fn backup(&mut self, tok: Token) {
        debug_assert!(self.tok.is_none(), "only one slot for backup/lookahead");
        self.tok = Some(tok);
    }

    /// Discard the next token.
    fn ignore(&mut self) {
        if self.tok.take().is_none() {
            let _ = self.lexer.next();
        }
    }

    /// Look at the next token without consuming it.
    fn peek(&mut self) -> Result<Token, ParseError> {
        let tok = self.next()?;
        self.tok = Some(tok.clone());
        Ok(tok)
    }

    fn err_at<T>(&self, tok: &Token, msg: String) -> Result<T, ParseError> {
        Err(ParseError {
            file: self.name.clone(),
            line: tok.pos.line,
            column: tok.pos.column,
            msg,
        })
    }

    // ───────────────────────────────────────────────────────────────────
    // Expressions
    // ───────────────────────────────────────────────────────────────────

    /// `$name` possibly followed by `[index]`.
    fn parse_variable(&mut self) -> Result<Expr, ParseError> {
        let it = self.next()?;
        if it.kind != TokenKind::Variable {
            return self.err_at(&it, format!("Unexpected token {}. Expected VARIABLE", it));
        }
        let var = VarExpr {
            pos: it.pos,
            name: it.value,
        };

        if self.peek()?.kind != TokenKind::LBrack {
            return Ok(Expr::Var(var));
        }
        self.ignore();

        let it = self.next()?;
        let index = match it.kind {
            TokenKind::Number => {
                let value: i64 = it
                    .value
                    .parse()
                    .map_err(|_| ParseError {
                        file: self.name.clone(),
                        line: it.pos.line,
                        column: it.pos.column,
                        msg: format!("invalid number: {}", it.value),
                    })?;
                Expr::Int(IntExpr { pos: it.pos, value })
            }
            TokenKind::Variable => {
                self.backup(it);
                self.parse_variable()?
            }
            _ => {
                return self.err_at(
                    &it,
                    format!("Expected number or variable in index. Found {}", it),
                )
            }
        };

        let it = self.next()?;
        if it.kind != TokenKind::RBrack {
            return self.err_at(&it, format!("Unexpected token {}. Expecting ']'", it));
        }

        Ok(Expr::Index(IndexExpr {
            pos: var.pos,
            var,
            index: Box::new(index),
        }))
    }

    /// One argument expression. `allow_arg` forbids bare unquoted words
    /// (assignment right sides, function arguments); `allow_concat` is
    /// cleared inside a concat chain to prevent nesting.
    fn get_argument(&mut self, allow_arg: bool, allow_concat: bool) -> Result<Expr, ParseError> {
        let it = self.next()?;
        if !is_valid_argument(&it) {
            return self.err_at(
                &it,
                format!("Unexpected token {}. Expected IDENT, STRING, VARIABLE or ARG", it),
            );
        }

        let first_kind = it.kind;
        let arg = match first_kind {
            TokenKind::Variable => {
                self.backup(it);
                self.parse_variable()?
            }
            TokenKind::String => Expr::Str(StringExpr {
                pos: it.pos,
                value: it.value,
                quoted: true,
            }),
            _ => Expr::Str(StringExpr {
                pos: it.pos,
                value: it.value,
                quoted: false,
            }),
        };

        let next = self.peek()?;
        if next.kind == TokenKind::Plus && allow_concat {
            return self.get_concat_arg(arg);
        }

        if matches!(first_kind, TokenKind::Arg | TokenKind::Ident) && !allow_arg {
            return self.err_at(
                &next,
                format!("Unquoted string not allowed at pos {} ({})", next.pos, next.value),
            );
        }

        Ok(arg)
    }

    fn get_concat_arg(&mut self, first: Expr) -> Result<Expr, ParseError> {
        let pos = first.pos();
        let mut parts = vec![first];
        loop {
            if self.peek()?.kind != TokenKind::Plus {
                break;
            }
            self.ignore();
            parts.push(self.get_argument(true, false)?);
        }
        Ok(Expr::Concat(ConcatExpr { pos, parts }))
    }

    // ───────────────────────────────────────────────────────────────────
    // Statements
    // ───────────────────────────────────────────────────────────────────

    fn parse_statement(&mut self) -> Result<Node, ParseError> {
        let it = self.next()?;
        let next = self.peek()?;

        if let Some(handler) = keyword_parser(it.kind) {
            return handler(self, it);
        }

        // statement starting with ident or variable:
        // - fn invocation
        // - variable assignment
        // - variable exec assignment
        // - command
        if (it.kind == TokenKind::Ident || it.kind == TokenKind::Variable)
            && next.kind == TokenKind::LParen
        {
            return Ok(Node::FnInv(self.parse_fn_inv(it)?));
        }

        if it.kind == TokenKind::Ident {
            if matches!(next.kind, TokenKind::Assign | TokenKind::AssignCmd) {
                return self.parse_assignment(it);
            }
            return self.parse_command(it);
        } else if it.kind == TokenKind::Arg {
            return self.parse_command(it);
        }

        self.err_at(&it, format!("Unexpected token parsing statement '{}'", it))
    }

    fn parse_block(&mut self) -> Result<ListNode, ParseError> {
        let mut ln = ListNode::default();
        loop {
            let it = self.peek()?;
            match it.kind {
                TokenKind::Eof => break,
                TokenKind::LBrace => {
                    self.ignore();
                    return self.err_at(&it, "Parser error: Unexpected '{'".into());
                }
                TokenKind::RBrace => {
                    self.ignore();
                    if self.openblocks <= 0 {
                        return self.err_at(&it, "Parser error: No block open for close".into());
                    }
                    self.openblocks -= 1;
                    return Ok(ln);
                }
                TokenKind::Semicolon => self.ignore(),
                _ => ln.nodes.push(self.parse_statement()?),
            }
        }

        if self.openblocks != 0 {
            let it = self.peek()?;
            return self.err_at(&it, "Unexpected EOF. Unfinished block".into());
        }
        Ok(ln)
    }

    fn parse_command(&mut self, it: Token) -> Result<Node, ParseError> {
        let mut n = CommandNode {
            pos: it.pos,
            name: it.value,
            args: Vec::new(),
            redirects: Vec::new(),
        };

        loop {
            let tok = self.peek()?;
            match tok.kind {
                TokenKind::Semicolon => {
                    self.ignore();
                    break;
                }
                TokenKind::RBrace => break,
                TokenKind::Ident
                | TokenKind::Arg
                | TokenKind::String
                | TokenKind::Number
                | TokenKind::Variable => {
                    let arg = self.get_argument(true, true)?;
                    n.args.push(arg);
                }
                TokenKind::Plus => return self.err_at(&tok, "Unexpected '+'".into()),
                TokenKind::Gt => {
                    let gt = self.next()?;
                    let redir = self.parse_redirection(gt)?;
                    n.redirects.push(redir);
                }
                TokenKind::Pipe => {
                    if self.inside_pipe {
                        self.next()?;
                        return Ok(Node::Command(n));
                    }
                    self.inside_pipe = true;
                    return self.parse_pipe(n);
                }
                TokenKind::Eof => return Ok(Node::Command(n)),
                _ => break,
            }
        }

        if self.inside_pipe {
            self.inside_pipe = false;
        }
        Ok(Node::Command(n))
    }

    fn parse_pipe(&mut self, first: CommandNode) -> Result<Node, ParseError> {
        let it = self.next()?; // the '|' token
        let mut n = PipeNode {
            pos: it.pos,
            commands: vec![first],
        };

        loop {
            let tok = self.peek()?;
            if tok.kind != TokenKind::Ident && tok.kind != TokenKind::Arg {
                break;
            }
            let tok = self.next()?;
            match self.parse_command(tok)? {
                Node::Command(cmd) => n.commands.push(cmd),
                other => {
                    return self.err_at(
                        &it,
                        format!("Unexpected node in pipeline: {}", other),
                    )
                }
            }
            if !self.inside_pipe {
                break;
            }
        }

        if self.peek()?.kind == TokenKind::Semicolon {
            self.ignore();
        }
        Ok(Node::Pipe(n))
    }

    /// `>[L]`, `>[L=R]`, `>[L=]`, each with an optional location, or a bare
    /// `> location`. Map and location both absent is an error.
    fn parse_redirection(&mut self, gt: Token) -> Result<RedirectNode, ParseError> {
        let mut lval = REDIR_MAP_NO_VALUE;
        let mut rval = REDIR_MAP_NO_VALUE;

        let mut tok = self.peek()?;
        if !is_valid_argument(&tok) && tok.kind != TokenKind::LBrack {
            return self.err_at(&tok, format!("Unexpected token: {}", tok));
        }

        if tok.kind == TokenKind::LBrack {
            self.next()?;
            tok = self.peek()?;

            if tok.kind != TokenKind::Number {
                return self.err_at(
                    &tok,
                    format!(
                        "Expected lefthand side of redirection map, but found '{}'",
                        tok.value
                    ),
                );
            }
            lval = self.parse_fd(&tok)?;
            self.next()?;
            tok = self.peek()?;

            if tok.kind != TokenKind::Assign && tok.kind != TokenKind::RBrack {
                return self.err_at(
                    &tok,
                    format!("Unexpected token {}. Expecting ASSIGN or ]", tok),
                );
            }

            if tok.kind == TokenKind::Assign {
                self.next()?;
                tok = self.peek()?;

                if tok.kind != TokenKind::Number && tok.kind != TokenKind::RBrack {
                    return self.err_at(
                        &tok,
                        format!("Unexpected token {}. Expecting REDIRMAPRSIDE or ]", tok),
                    );
                }

                if tok.kind == TokenKind::Number {
                    rval = self.parse_fd(&tok)?;
                    self.next()?;
                    tok = self.peek()?;
                } else {
                    rval = REDIR_MAP_SUPRESS;
                }
            }

            if tok.kind != TokenKind::RBrack {
                return self.err_at(&tok, format!("Unexpected token {}. Expecting ]", tok));
            }
            self.next()?;
            tok = self.peek()?;
        }

        if !is_valid_argument(&tok) {
            if rval != REDIR_MAP_NO_VALUE || lval != REDIR_MAP_NO_VALUE {
                return Ok(RedirectNode {
                    pos: gt.pos,
                    left_fd: lval,
                    right_fd: rval,
                    location: None,
                });
            }
            return self.err_at(
                &tok,
                format!("Unexpected token {}. Expecting STRING or ARG or VARIABLE", tok),
            );
        }

        let location = self.get_argument(true, true)?;
        Ok(RedirectNode {
            pos: gt.pos,
            left_fd: lval,
            right_fd: rval,
            location: Some(location),
        })
    }

    fn parse_fd(&self, tok: &Token) -> Result<i32, ParseError> {
        tok.value.parse().map_err(|_| ParseError {
            file: self.name.clone(),
            line: tok.pos.line,
            column: tok.pos.column,
            msg: format!("Redirection map expects integers. Found: {}", tok.value),
        })
    }

    fn parse_assignment(&mut self, ident: Token) -> Result<Node, ParseError> {
        let it = self.next()?;
        match it.kind {
            TokenKind::Assign => self.parse_assign_value(ident),
            TokenKind::AssignCmd => self.parse_assign_cmd_out(ident),
            _ => self.err_at(&it, format!("Unexpected token {}, expected '=' or '<='", it)),
        }
    }

    fn parse_assign_value(&mut self, name: Token) -> Result<Node, ParseError> {
        let it = self.peek()?;

        let value = if it.kind == TokenKind::Variable || it.kind == TokenKind::String {
            self.get_argument(false, true)?
        } else if it.kind == TokenKind::LParen {
            let lit = self.next()?;
            let mut items = Vec::new();
            let mut it = self.peek()?;
            while is_valid_argument(&it) {
                items.push(self.get_argument(true, true)?);
                it = self.peek()?;
            }
            if it.kind != TokenKind::RParen {
                return self.err_at(&it, format!("Unexpected token {}. Unfinished list", it));
            }
            self.ignore();
            Expr::List(ListExpr {
                pos: lit.pos,
                items,
            })
        } else {
            return self.err_at(
                &it,
                format!("Unexpected token {}. Expecting VARIABLE or STRING or (", it),
            );
        };

        if self.peek()?.kind == TokenKind::Semicolon {
            self.ignore();
        }
        Ok(Node::Assignment(AssignmentNode {
            pos: name.pos,
            ident: name.value,
            value,
        }))
    }

    fn parse_assign_cmd_out(&mut self, name: Token) -> Result<Node, ParseError> {
        let it = self.next()?;
        if it.kind != TokenKind::Ident {
            return self.err_at(
                &it,
                format!("Invalid token {}. Expected command or function invocation", it),
            );
        }

        let source = if self.peek()?.kind != TokenKind::LParen {
            match self.parse_command(it)? {
                Node::Command(cmd) => ExecSource::Command(cmd),
                Node::Pipe(pipe) => ExecSource::Pipe(pipe),
                other => {
                    return self.err_at(
                        &name,
                        format!("Unexpected node in assignment: {}", other),
                    )
                }
            }
        } else {
            ExecSource::FnInv(self.parse_fn_inv(it)?)
        };

        Ok(Node::ExecAssign(ExecAssignNode {
            pos: name.pos,
            ident: name.value,
            source,
        }))
    }

    fn parse_rfork(&mut self, it: Token) -> Result<Node, ParseError> {
        let pos = it.pos;

        let it = self.next()?;
        if it.kind != TokenKind::Ident {
            return self.err_at(
                &it,
                format!(
                    "rfork requires one or more of the following flags: {}",
                    RFORK_FLAGS
                ),
            );
        }
        let flags = StringExpr {
            pos: it.pos,
            value: it.value,
            quoted: false,
        };

        let mut tree = None;
        if self.peek()?.kind == TokenKind::LBrace {
            self.ignore();
            self.openblocks += 1;
            let root = self.parse_block()?;
            tree = Some(Tree {
                name: "rfork block".into(),
                root,
            });
        }

        if self.peek()?.kind == TokenKind::Semicolon {
            self.ignore();
        }
        Ok(Node::Rfork(RforkNode { pos, flags, tree }))
    }

    fn parse_if(&mut self, it: Token) -> Result<Node, ParseError> {
        let pos = it.pos;

        let tok = self.peek()?;
        let lvalue = match tok.kind {
            TokenKind::String => {
                self.next()?;
                Expr::Str(StringExpr {
                    pos: tok.pos,
                    value: tok.value,
                    quoted: true,
                })
            }
            TokenKind::Variable => self.parse_variable()?,
            _ => {
                return self.err_at(
                    &tok,
                    format!("if requires an lvalue of type string or variable. Found {}", tok),
                )
            }
        };

        let opt = self.next()?;
        if opt.kind != TokenKind::Equal && opt.kind != TokenKind::NotEqual {
            return self.err_at(&opt, format!("Expected comparison, but found {}", opt));
        }
        let op = opt.value;

        let tok = self.peek()?;
        let rvalue = match tok.kind {
            TokenKind::String => {
                self.next()?;
                Expr::Str(StringExpr {
                    pos: tok.pos,
                    value: tok.value,
                    quoted: true,
                })
            }
            TokenKind::Variable => self.parse_variable()?,
            _ => {
                return self.err_at(
                    &tok,
                    format!("if requires an rvalue of type string or variable. Found {}", tok),
                )
            }
        };

        let lb = self.next()?;
        if lb.kind != TokenKind::LBrace {
            return self.err_at(&lb, format!("Expected '{{' but found {}", lb));
        }
        self.openblocks += 1;

        let root = self.parse_block()?;
        let if_tree = Tree {
            name: "if block".into(),
            root,
        };

        let mut else_tree = None;
        let mut else_is_if = false;
        if self.peek()?.kind == TokenKind::Else {
            self.next()?;
            let (block, is_if) = self.parse_else()?;
            else_is_if = is_if;
            else_tree = Some(Tree {
                name: "else tree".into(),
                root: block,
            });
        }

        Ok(Node::If(IfNode {
            pos,
            lvalue,
            op,
            rvalue,
            if_tree,
            else_tree,
            else_is_if,
        }))
    }

    fn parse_else(&mut self) -> Result<(ListNode, bool), ParseError> {
        let it = self.next()?;

        if it.kind == TokenKind::LBrace {
            self.openblocks += 1;
            let block = self.parse_block()?;
            return Ok((block, false));
        }

        if it.kind == TokenKind::If {
            let if_node = self.parse_if(it)?;
            let block = ListNode {
                nodes: vec![if_node],
            };
            return Ok((block, true));
        }

        self.err_at(&it, format!("Unexpected token: {}", it))
    }

    fn parse_fn_args(&mut self) -> Result<Vec<String>, ParseError> {
        let mut args = Vec::new();

        if self.peek()?.kind == TokenKind::RParen {
            // no arguments
            self.ignore();
            return Ok(args);
        }

        loop {
            let it = self.next()?;
            if it.kind == TokenKind::Ident {
                args.push(it.value);
            } else {
                return self.err_at(
                    &it,
                    format!("Unexpected token {}. Expected identifier or ')'", it),
                );
            }

            let it = self.peek()?;
            if it.kind == TokenKind::Comma {
                self.ignore();
                let nx = self.peek()?;
                if nx.kind == TokenKind::RParen {
                    return self.err_at(&nx, format!("Unexpected '{}'.", nx));
                }
                continue;
            }

            if it.kind != TokenKind::RParen {
                return self.err_at(&it, format!("Unexpected '{}'. Expected ')'", it));
            }
            self.ignore();
            break;
        }

        Ok(args)
    }

    fn parse_fn_decl(&mut self, it: Token) -> Result<Node, ParseError> {
        let pos = it.pos;

        let mut it = self.next()?;
        let mut name = String::new();
        if it.kind == TokenKind::Ident {
            name = it.value.clone();
            it = self.next()?;
        }

        if it.kind != TokenKind::LParen {
            return self.err_at(&it, format!("Unexpected token {}. Expected '('", it));
        }

        let args = self.parse_fn_args()?;

        let it = self.next()?;
        if it.kind != TokenKind::LBrace {
            return self.err_at(&it, format!("Unexpected token {}. Expected '{{'", it));
        }
        self.openblocks += 1;

        let tree_name = format!("fn {} body", name);
        let root = self.parse_block()?;

        Ok(Node::FnDecl(FnDeclNode {
            pos,
            name,
            args,
            tree: Tree {
                name: tree_name,
                root,
            },
        }))
    }

    fn parse_fn_inv(&mut self, ident: Token) -> Result<FnInvNode, ParseError> {
        let mut n = FnInvNode {
            pos: ident.pos,
            name: ident.value,
            args: Vec::new(),
        };

        let it = self.next()?;
        if it.kind != TokenKind::LParen {
            return self.err_at(&it, format!("Invalid token {}. Expected '('", it));
        }

        loop {
            let it = self.peek()?;
            if it.kind == TokenKind::String || it.kind == TokenKind::Variable {
                n.args.push(self.get_argument(false, true)?);
            } else if it.kind == TokenKind::RParen {
                self.next()?;
                break;
            } else {
                return self.err_at(
                    &it,
                    format!("Unexpected token {}. Expecting STRING, VARIABLE or )", it),
                );
            }

            if self.peek()?.kind == TokenKind::Comma {
                self.ignore();
            }
        }

        // semicolon is optional here
        if self.peek()?.kind == TokenKind::Semicolon {
            self.next()?;
        }

        Ok(n)
    }

    fn parse_bind_fn(&mut self, it: Token) -> Result<Node, ParseError> {
        let name_it = self.next()?;
        if name_it.kind != TokenKind::Ident {
            return self.err_at(
                &name_it,
                format!("Expected identifier, but found '{}'", name_it),
            );
        }

        let cmd_it = self.next()?;
        if cmd_it.kind != TokenKind::Ident {
            return self.err_at(
                &cmd_it,
                format!("Expected identifier, but found '{}'", cmd_it),
            );
        }

        if self.peek()?.kind == TokenKind::Semicolon {
            self.ignore();
        }

        Ok(Node::BindFn(BindFnNode {
            pos: it.pos,
            name: name_it.value,
            cmd_name: cmd_it.value,
        }))
    }

    fn parse_dump(&mut self, it: Token) -> Result<Node, ParseError> {
        let mut dump = DumpNode {
            pos: it.pos,
            filename: None,
        };

        let tok = self.peek()?;
        let arg = match tok.kind {
            TokenKind::Semicolon => {
                self.ignore();
                return Ok(Node::Dump(dump));
            }
            TokenKind::String => Expr::Str(StringExpr {
                pos: tok.pos,
                value: tok.value,
                quoted: true,
            }),
            TokenKind::Arg => Expr::Str(StringExpr {
                pos: tok.pos,
                value: tok.value,
                quoted: false,
            }),
            TokenKind::Variable => Expr::Var(VarExpr {
                pos: tok.pos,
                name: tok.value,
            }),
            _ => return Ok(Node::Dump(dump)),
        };
        self.ignore();

        if self.peek()?.kind == TokenKind::Semicolon {
            self.ignore();
        }

        dump.filename = Some(arg);
        Ok(Node::Dump(dump))
    }

    fn parse_return(&mut self, it: Token) -> Result<Node, ParseError> {
        let mut ret = ReturnNode {
            pos: it.pos,
            value: None,
        };

        let tok = self.peek()?;
        match tok.kind {
            // return;
            TokenKind::Semicolon => {
                self.ignore();
                Ok(Node::Return(ret))
            }
            // return }
            TokenKind::RBrace => Ok(Node::Return(ret)),
            // return ( ... values ... )
            TokenKind::LParen => {
                self.ignore();
                let mut items = Vec::new();
                let mut tok = self.peek()?;
                while tok.kind != TokenKind::RParen && tok.kind != TokenKind::Eof {
                    items.push(self.get_argument(true, true)?);
                    tok = self.peek()?;
                }
                if tok.kind != TokenKind::RParen {
                    return self.err_at(&tok, format!("Unexpected token {}. Unfinished list", tok));
                }
                self.ignore();
                if self.peek()?.kind == TokenKind::Semicolon {
                    self.ignore();
                }
                ret.value = Some(Expr::List(ListExpr {
                    pos: ret.pos,
                    items,
                }));
                Ok(Node::Return(ret))
            }
            // return $v  |  return "<some>"
            TokenKind::Variable | TokenKind::String => {
                ret.value = Some(self.get_argument(false, true)?);
                if self.peek()?.kind == TokenKind::Semicolon {
                    self.ignore();
                }
                Ok(Node::Return(ret))
            }
            _ => self.err_at(
                &tok,
                format!("Expected ';', STRING, VARIABLE or LPAREN, but found {}", tok),
            ),
        }
    }

    fn parse_for(&mut self, it: Token) -> Result<Node, ParseError> {
        let pos = it.pos;
        let mut ident = None;
        let mut in_var = None;

        let tok = self.peek()?;
        if tok.kind == TokenKind::Ident {
            self.next()?;
            ident = Some(tok.value);

            let tok = self.next()?;
            if tok.kind != TokenKind::Ident || tok.value != "in" {
                return self.err_at(&tok, format!("Expected 'in' but found {}", tok));
            }

            let tok = self.next()?;
            if tok.kind != TokenKind::Variable {
                return self.err_at(&tok, format!("Expected variable but found {}", tok));
            }
            in_var = Some(tok.value);
        }

        let tok = self.peek()?;
        if tok.kind != TokenKind::LBrace {
            return self.err_at(&tok, format!("Expected '{{' but found {}", tok));
        }
        self.ignore();
        self.openblocks += 1;

        let root = self.parse_block()?;
        Ok(Node::For(ForNode {
            pos,
            ident,
            in_var,
            tree: Tree {
                name: "for block".into(),
                root,
            },
        }))
    }

    fn parse_comment(&mut self, it: Token) -> Result<Node, ParseError> {
        Ok(Node::Comment(CommentNode {
            pos: it.pos,
            text: it.value,
        }))
    }

    fn parse_import(&mut self, import_tok: Token) -> Result<Node, ParseError> {
        let it = self.next()?;

        let path = match it.kind {
            TokenKind::String => StringExpr {
                pos: it.pos,
                value: it.value,
                quoted: true,
            },
            TokenKind::Arg => StringExpr {
                pos: it.pos,
                value: it.value,
                quoted: false,
            },
            _ => {
                return self.err_at(
                    &it,
                    format!("Unexpected token {}. Expecting ARG or STRING", it),
                )
            }
        };

        if self.peek()?.kind == TokenKind::Semicolon {
            self.ignore();
        }

        Ok(Node::Import(ImportNode {
            pos: import_tok.pos,
            path,
        }))
    }

    fn parse_setenv(&mut self, it: Token) -> Result<Node, ParseError> {
        let pos = it.pos;

        let it = self.next()?;
        if it.kind != TokenKind::Ident {
            return self.err_at(&it, format!("Unexpected token {}, expected VARIABLE", it));
        }

        if self.peek()?.kind == TokenKind::Semicolon {
            self.ignore();
        }

        Ok(Node::Setenv(SetenvNode {
            pos,
            ident: it.value,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parse, print, and re-parse: the printed form must be stable.
    fn roundtrip(src: &str) {
        let tree = parse("test", src).unwrap_or_else(|e| panic!("parse failed: {}", e));
        let printed = tree.to_string();
        assert_eq!(printed, src, "printed tree differs from source");
        let again = parse("test", &printed)
            .unwrap_or_else(|e| panic!("re-parse failed: {}", e));
        assert_eq!(again.to_string(), printed, "re-parse is not idempotent");
    }

    #[test]
    fn command_roundtrip() {
        roundtrip("echo hello");
        roundtrip("echo \"hello world\"");
        roundtrip("/bin/ls -l /tmp");
        roundtrip("-false");
    }

    #[test]
    fn assignment_roundtrip() {
        roundtrip("a = \"hi\"");
        roundtrip("l = (\"a\" \"b\" \"c\")");
        roundtrip("path = $dir+\"/file\"");
        roundtrip("b = $a");
        roundtrip("x = $l[0]");
    }

    #[test]
    fn exec_assign_roundtrip() {
        roundtrip("out <= echo -n \"x y z\"");
        roundtrip("x <= fetch()");
        roundtrip("x <= two(\"a\", $b)");
        roundtrip("out <= cat /etc/passwd | wc -l");
    }

    #[test]
    fn index_roundtrip() {
        roundtrip("echo $l[1]");
        roundtrip("echo $l[$i]");
    }

    #[test]
    fn if_roundtrip() {
        roundtrip("if $a == \"b\" {\n\techo yes\n}");
        roundtrip("if $a != $b {\n\techo diff\n}");
        roundtrip("if $a == \"b\" {\n\techo yes\n} else {\n\techo no\n}");
        roundtrip(
            "if $a == \"1\" {\n\techo one\n} else if $a == \"2\" {\n\techo two\n} else {\n\techo other\n}",
        );
    }

    #[test]
    fn for_roundtrip() {
        roundtrip("for x in $list {\n\techo $x\n}");
        roundtrip("for {\n\techo tick\n}");
    }

    #[test]
    fn fn_roundtrip() {
        roundtrip("fn greet(who) {\n\techo hello $who\n}\ngreet(\"world\")");
        roundtrip("fn f() {\n\treturn \"2\"\n}");
        roundtrip("fn f() {\n\treturn ($a \"b\")\n}");
        roundtrip("fn f() {\n\treturn\n}");
        roundtrip("fn (a, b) {\n\techo $a $b\n}");
    }

    #[test]
    fn nested_blocks_roundtrip() {
        roundtrip("fn f(a, b) {\n\tif $a != $b {\n\t\techo diff\n\t}\n}");
    }

    #[test]
    fn keyword_statements_roundtrip() {
        roundtrip("bindfn greet hi");
        roundtrip("import util");
        roundtrip("import \"lib/util.sh\"");
        roundtrip("setenv PATH");
        roundtrip("dump");
        roundtrip("dump /tmp/state");
        roundtrip("rfork unp {\n\techo inside\n}");
    }

    #[test]
    fn pipe_roundtrip() {
        roundtrip("echo hello | cat");
        roundtrip("cat /etc/passwd | grep root | wc -l");
        roundtrip("-false | true");
    }

    #[test]
    fn redirect_roundtrip() {
        roundtrip("echo hello > /tmp/out");
        roundtrip("echo x >[2=1]");
        roundtrip("echo x >[1=]");
        roundtrip("echo x >[2] /tmp/err");
        roundtrip("echo x >[2=1] > /tmp/both");
        roundtrip("echo x > tcp://localhost:9999");
    }

    #[test]
    fn comment_roundtrip() {
        roundtrip("# top comment\necho ok");
    }

    #[test]
    fn multi_statement_roundtrip() {
        roundtrip("a = \"hi\"\necho $a");
        roundtrip("IFS = (\" \")\nout <= echo -n \"x y z\"\necho $out[2]");
    }

    #[test]
    fn fn_inv_via_variable() {
        let tree = parse("test", "$callback()").unwrap();
        assert_eq!(tree.to_string(), "$callback()");
    }

    #[test]
    fn semicolons_are_optional_terminators() {
        let tree = parse("test", "echo a; echo b;").unwrap();
        assert_eq!(tree.to_string(), "echo a\necho b");
    }

    #[test]
    fn error_carries_position() {
        let err = parse("script.sh", "a = ").unwrap_err();
        assert_eq!(err.file, "script.sh");
        assert_eq!(err.line, 1);
        assert!(err.msg.contains("Expecting VARIABLE or STRING or ("));
    }

    #[test]
    fn error_on_bare_if_lvalue() {
        let err = parse("test", "if a == \"b\" {\n}").unwrap_err();
        assert!(err.msg.contains("lvalue"), "got: {}", err.msg);
    }

    #[test]
    fn error_on_unfinished_block() {
        let err = parse("test", "fn f() {\necho x").unwrap_err();
        assert!(err.msg.contains("Unfinished block"), "got: {}", err.msg);
    }

    #[test]
    fn error_on_unbalanced_close() {
        let err = parse("test", "}").unwrap_err();
        assert!(err.msg.contains("No block open for close"), "got: {}", err.msg);
    }

    #[test]
    fn error_on_lex_failure() {
        let err = parse("test", "echo \"oops").unwrap_err();
        assert!(err.msg.contains("unterminated"), "got: {}", err.msg);
    }

    #[test]
    fn error_on_invalid_operator() {
        let err = parse("test", "if $a = \"b\" {\n}").unwrap_err();
        assert!(err.msg.contains("Expected comparison"), "got: {}", err.msg);
    }

    #[test]
    fn error_on_stray_plus() {
        let err = parse("test", "date +%d").unwrap_err();
        assert!(err.msg.contains("Unexpected '+'"), "got: {}", err.msg);
    }

    #[test]
    fn error_on_exec_assign_without_command() {
        let err = parse("test", "x <= 42").unwrap_err();
        assert!(
            err.msg.contains("Expected command or function invocation"),
            "got: {}",
            err.msg
        );
    }

    #[test]
    fn error_on_trailing_comma_in_fn_args() {
        let err = parse("test", "fn f(a, ) {\n}").unwrap_err();
        assert!(err.msg.contains("Unexpected"), "got: {}", err.msg);
    }

    #[test]
    fn redirect_without_map_or_location_fails() {
        let err = parse("test", "echo x >").unwrap_err();
        assert!(err.msg.contains("Unexpected token"), "got: {}", err.msg);
    }

    #[test]
    fn pipe_requires_following_command() {
        // a trailing pipe produces a pipeline with a single command; the
        // evaluator rejects it at run time, not the parser
        let tree = parse("test", "echo a |").unwrap();
        let Node::Pipe(pipe) = &tree.root.nodes[0] else {
            panic!("expected pipe node");
        };
        assert_eq!(pipe.commands.len(), 1);
    }

    #[test]
    fn return_position_is_kept() {
        let tree = parse("test", "fn f() {\n\treturn \"x\"\n}").unwrap();
        let Node::FnDecl(decl) = &tree.root.nodes[0] else {
            panic!("expected fn decl");
        };
        let Node::Return(ret) = &decl.tree.root.nodes[0] else {
            panic!("expected return");
        };
        assert_eq!(ret.pos.line, 2);
    }
}
