//! AST type definitions.
//!
//! One closed sum type per category: [`Expr`] for expressions, [`Node`]
//! for statements, with one struct per variant carrying its source
//! position. Exhaustive matches over these enums keep evaluator dispatch
//! checked by the compiler.

use std::fmt;

use crate::lexer::Pos;

/// Redirect map right side was not given: `>[1]`.
pub const REDIR_MAP_NO_VALUE: i32 = -1;
/// Redirect map right side was empty: `>[1=]` silences the descriptor.
pub const REDIR_MAP_SUPRESS: i32 = -2;

/// Namespace flags accepted by `rfork`.
pub const RFORK_FLAGS: &str = "cumnips";

/// A parsed source unit: named after the file (or buffer) it came from.
#[derive(Debug, Clone)]
pub struct Tree {
    pub name: String,
    pub root: ListNode,
}

/// An ordered list of statements (the body of a tree or block).
#[derive(Debug, Clone, Default)]
pub struct ListNode {
    pub nodes: Vec<Node>,
}

/// Statement nodes.
#[derive(Debug, Clone)]
pub enum Node {
    Command(CommandNode),
    Pipe(PipeNode),
    Assignment(AssignmentNode),
    ExecAssign(ExecAssignNode),
    Setenv(SetenvNode),
    Rfork(RforkNode),
    If(IfNode),
    For(ForNode),
    FnDecl(FnDeclNode),
    FnInv(FnInvNode),
    Return(ReturnNode),
    Import(ImportNode),
    BindFn(BindFnNode),
    Dump(DumpNode),
    Comment(CommentNode),
}

/// Expression nodes.
#[derive(Debug, Clone)]
pub enum Expr {
    Str(StringExpr),
    Int(IntExpr),
    Var(VarExpr),
    Index(IndexExpr),
    Concat(ConcatExpr),
    List(ListExpr),
}

#[derive(Debug, Clone)]
pub struct StringExpr {
    pub pos: Pos,
    pub value: String,
    /// Quoted strings re-print with quotes and escapes; unquoted ones are
    /// bare argument words.
    pub quoted: bool,
}

#[derive(Debug, Clone)]
pub struct IntExpr {
    pub pos: Pos,
    pub value: i64,
}

/// A variable reference. The name includes the leading `$`.
#[derive(Debug, Clone)]
pub struct VarExpr {
    pub pos: Pos,
    pub name: String,
}

/// `$var[N]` or `$var[$other]`.
#[derive(Debug, Clone)]
pub struct IndexExpr {
    pub pos: Pos,
    pub var: VarExpr,
    pub index: Box<Expr>,
}

#[derive(Debug, Clone)]
pub struct ConcatExpr {
    pub pos: Pos,
    pub parts: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct ListExpr {
    pub pos: Pos,
    pub items: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct CommandNode {
    pub pos: Pos,
    pub name: String,
    pub args: Vec<Expr>,
    pub redirects: Vec<RedirectNode>,
}

#[derive(Debug, Clone)]
pub struct PipeNode {
    pub pos: Pos,
    pub commands: Vec<CommandNode>,
}

#[derive(Debug, Clone)]
pub struct AssignmentNode {
    pub pos: Pos,
    pub ident: String,
    pub value: Expr,
}

/// Right side of `ident <= ...`.
#[derive(Debug, Clone)]
pub enum ExecSource {
    Command(CommandNode),
    Pipe(PipeNode),
    FnInv(FnInvNode),
}

#[derive(Debug, Clone)]
pub struct ExecAssignNode {
    pub pos: Pos,
    pub ident: String,
    pub source: ExecSource,
}

#[derive(Debug, Clone)]
pub struct SetenvNode {
    pub pos: Pos,
    pub ident: String,
}

#[derive(Debug, Clone)]
pub struct RforkNode {
    pub pos: Pos,
    pub flags: StringExpr,
    pub tree: Option<Tree>,
}

#[derive(Debug, Clone)]
pub struct IfNode {
    pub pos: Pos,
    pub lvalue: Expr,
    pub op: String,
    pub rvalue: Expr,
    pub if_tree: Tree,
    pub else_tree: Option<Tree>,
    /// When the else clause is itself an `if`, the else tree holds exactly
    /// that one node.
    pub else_is_if: bool,
}

#[derive(Debug, Clone)]
pub struct ForNode {
    pub pos: Pos,
    pub ident: Option<String>,
    /// Iteration source variable, with its leading `$`. `None` together
    /// with `ident: None` means an infinite loop.
    pub in_var: Option<String>,
    pub tree: Tree,
}

#[derive(Debug, Clone)]
pub struct FnDeclNode {
    pub pos: Pos,
    /// Empty for anonymous functions.
    pub name: String,
    pub args: Vec<String>,
    pub tree: Tree,
}

#[derive(Debug, Clone)]
pub struct FnInvNode {
    pub pos: Pos,
    pub name: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct ReturnNode {
    pub pos: Pos,
    pub value: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct ImportNode {
    pub pos: Pos,
    pub path: StringExpr,
}

#[derive(Debug, Clone)]
pub struct BindFnNode {
    pub pos: Pos,
    pub name: String,
    pub cmd_name: String,
}

#[derive(Debug, Clone)]
pub struct DumpNode {
    pub pos: Pos,
    pub filename: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct CommentNode {
    pub pos: Pos,
    /// Full comment text, including the leading `#`.
    pub text: String,
}

/// `>[L=R] location` after a command.
#[derive(Debug, Clone)]
pub struct RedirectNode {
    pub pos: Pos,
    pub left_fd: i32,
    pub right_fd: i32,
    pub location: Option<Expr>,
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Expr::Str(e) => e.pos,
            Expr::Int(e) => e.pos,
            Expr::Var(e) => e.pos,
            Expr::Index(e) => e.pos,
            Expr::Concat(e) => e.pos,
            Expr::List(e) => e.pos,
        }
    }
}

impl Node {
    pub fn pos(&self) -> Pos {
        match self {
            Node::Command(n) => n.pos,
            Node::Pipe(n) => n.pos,
            Node::Assignment(n) => n.pos,
            Node::ExecAssign(n) => n.pos,
            Node::Setenv(n) => n.pos,
            Node::Rfork(n) => n.pos,
            Node::If(n) => n.pos,
            Node::For(n) => n.pos,
            Node::FnDecl(n) => n.pos,
            Node::FnInv(n) => n.pos,
            Node::Return(n) => n.pos,
            Node::Import(n) => n.pos,
            Node::BindFn(n) => n.pos,
            Node::Dump(n) => n.pos,
            Node::Comment(n) => n.pos,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Source printing
// ═══════════════════════════════════════════════════════════════════════

/// Escape a string literal body the way the lexer unescapes it.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn write_tabs(f: &mut fmt::Formatter<'_>, level: usize) -> fmt::Result {
    for _ in 0..level {
        f.write_str("\t")?;
    }
    Ok(())
}

fn write_block(f: &mut fmt::Formatter<'_>, tree: &Tree, level: usize) -> fmt::Result {
    f.write_str("{\n")?;
    for node in &tree.root.nodes {
        write_tabs(f, level + 1)?;
        node.fmt_indent(f, level + 1)?;
        f.write_str("\n")?;
    }
    write_tabs(f, level)?;
    f.write_str("}")
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.root.nodes.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            node.fmt_indent(f, 0)?;
        }
        Ok(())
    }
}

impl Node {
    fn fmt_indent(&self, f: &mut fmt::Formatter<'_>, level: usize) -> fmt::Result {
        match self {
            Node::Command(n) => write!(f, "{}", n),
            Node::Pipe(n) => write!(f, "{}", n),
            Node::Assignment(n) => write!(f, "{}", n),
            Node::ExecAssign(n) => write!(f, "{}", n),
            Node::Setenv(n) => write!(f, "{}", n),
            Node::FnInv(n) => write!(f, "{}", n),
            Node::Return(n) => write!(f, "{}", n),
            Node::Import(n) => write!(f, "{}", n),
            Node::BindFn(n) => write!(f, "{}", n),
            Node::Dump(n) => write!(f, "{}", n),
            Node::Comment(n) => write!(f, "{}", n),
            Node::Rfork(n) => {
                write!(f, "rfork {}", n.flags.value)?;
                if let Some(tree) = &n.tree {
                    f.write_str(" ")?;
                    write_block(f, tree, level)?;
                }
                Ok(())
            }
            Node::If(n) => n.fmt_indent(f, level),
            Node::For(n) => {
                f.write_str("for ")?;
                if let (Some(id), Some(invar)) = (&n.ident, &n.in_var) {
                    write!(f, "{} in {} ", id, invar)?;
                }
                write_block(f, &n.tree, level)
            }
            Node::FnDecl(n) => n.fmt_indent(f, level),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}

impl FnDeclNode {
    fn fmt_indent(&self, f: &mut fmt::Formatter<'_>, level: usize) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str("fn (")?;
        } else {
            write!(f, "fn {}(", self.name)?;
        }
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(arg)?;
        }
        f.write_str(") ")?;
        write_block(f, &self.tree, level)
    }
}

impl fmt::Display for FnDeclNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}

impl IfNode {
    fn fmt_indent(&self, f: &mut fmt::Formatter<'_>, level: usize) -> fmt::Result {
        write!(f, "if {} {} {} ", self.lvalue, self.op, self.rvalue)?;
        write_block(f, &self.if_tree, level)?;
        if let Some(else_tree) = &self.else_tree {
            f.write_str(" else ")?;
            if self.else_is_if {
                if let Some(inner) = else_tree.root.nodes.first() {
                    inner.fmt_indent(f, level)?;
                }
            } else {
                write_block(f, else_tree, level)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Str(e) => write!(f, "{}", e),
            Expr::Int(e) => write!(f, "{}", e.value),
            Expr::Var(e) => f.write_str(&e.name),
            Expr::Index(e) => write!(f, "{}[{}]", e.var.name, e.index),
            Expr::Concat(e) => {
                for (i, part) in e.parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str("+")?;
                    }
                    write!(f, "{}", part)?;
                }
                Ok(())
            }
            Expr::List(e) => {
                f.write_str("(")?;
                for (i, item) in e.items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for StringExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.quoted {
            write!(f, "\"{}\"", escape_string(&self.value))
        } else {
            f.write_str(&self.value)
        }
    }
}

impl fmt::Display for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        for redir in &self.redirects {
            write!(f, " {}", redir)?;
        }
        Ok(())
    }
}

impl fmt::Display for PipeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, cmd) in self.commands.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", cmd)?;
        }
        Ok(())
    }
}

impl fmt::Display for AssignmentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.ident, self.value)
    }
}

impl fmt::Display for ExecSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecSource::Command(n) => write!(f, "{}", n),
            ExecSource::Pipe(n) => write!(f, "{}", n),
            ExecSource::FnInv(n) => write!(f, "{}", n),
        }
    }
}

impl fmt::Display for ExecAssignNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <= {}", self.ident, self.source)
    }
}

impl fmt::Display for SetenvNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "setenv {}", self.ident)
    }
}

impl fmt::Display for FnInvNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", arg)?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for ReturnNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "return {}", v),
            None => f.write_str("return"),
        }
    }
}

impl fmt::Display for ImportNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "import {}", self.path)
    }
}

impl fmt::Display for BindFnNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bindfn {} {}", self.name, self.cmd_name)
    }
}

impl fmt::Display for DumpNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.filename {
            Some(file) => write!(f, "dump {}", file),
            None => f.write_str("dump"),
        }
    }
}

impl fmt::Display for CommentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Display for RedirectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(">")?;
        if self.left_fd != REDIR_MAP_NO_VALUE {
            write!(f, "[{}", self.left_fd)?;
            if self.right_fd == REDIR_MAP_SUPRESS {
                f.write_str("=")?;
            } else if self.right_fd != REDIR_MAP_NO_VALUE {
                write!(f, "={}", self.right_fd)?;
            }
            f.write_str("]")?;
        }
        if let Some(loc) = &self.location {
            write!(f, " {}", loc)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> Pos {
        Pos { line: 1, column: 1 }
    }

    #[test]
    fn string_expr_prints_quotes_and_escapes() {
        let quoted = StringExpr {
            pos: pos(),
            value: "a\tb".into(),
            quoted: true,
        };
        assert_eq!(quoted.to_string(), "\"a\\tb\"");

        let bare = StringExpr {
            pos: pos(),
            value: "-n".into(),
            quoted: false,
        };
        assert_eq!(bare.to_string(), "-n");
    }

    #[test]
    fn list_and_concat_print() {
        let list = Expr::List(ListExpr {
            pos: pos(),
            items: vec![
                Expr::Str(StringExpr {
                    pos: pos(),
                    value: "a".into(),
                    quoted: true,
                }),
                Expr::Var(VarExpr {
                    pos: pos(),
                    name: "$b".into(),
                }),
            ],
        });
        assert_eq!(list.to_string(), "(\"a\" $b)");

        let concat = Expr::Concat(ConcatExpr {
            pos: pos(),
            parts: vec![
                Expr::Var(VarExpr {
                    pos: pos(),
                    name: "$dir".into(),
                }),
                Expr::Str(StringExpr {
                    pos: pos(),
                    value: "/x".into(),
                    quoted: true,
                }),
            ],
        });
        assert_eq!(concat.to_string(), "$dir+\"/x\"");
    }

    #[test]
    fn redirect_print_forms() {
        let mk = |l, r, loc: Option<&str>| RedirectNode {
            pos: pos(),
            left_fd: l,
            right_fd: r,
            location: loc.map(|s| {
                Expr::Str(StringExpr {
                    pos: pos(),
                    value: s.into(),
                    quoted: false,
                })
            }),
        };
        assert_eq!(
            mk(REDIR_MAP_NO_VALUE, REDIR_MAP_NO_VALUE, Some("/tmp/x")).to_string(),
            "> /tmp/x"
        );
        assert_eq!(mk(2, 1, None).to_string(), ">[2=1]");
        assert_eq!(mk(1, REDIR_MAP_SUPRESS, None).to_string(), ">[1=]");
        assert_eq!(
            mk(2, REDIR_MAP_NO_VALUE, Some("log")).to_string(),
            ">[2] log"
        );
    }

    #[test]
    fn index_prints_with_variable_name() {
        let idx = Expr::Index(IndexExpr {
            pos: pos(),
            var: VarExpr {
                pos: pos(),
                name: "$l".into(),
            },
            index: Box::new(Expr::Int(IntExpr { pos: pos(), value: 1 })),
        });
        assert_eq!(idx.to_string(), "$l[1]");
    }
}
