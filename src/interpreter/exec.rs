//! Statement evaluation and the tree walker.
//!
//! `execute_tree` walks a statement list and dispatches on the error
//! payload of each node: `Ignored` skips the node, `Interrupted` aborts
//! the walk, and `Return` stops the nearest *stopable* walk with its
//! value. Top-level execution, function bodies and loop bodies are
//! stopable; `if`/`else` blocks are not, so a `return` inside them
//! reaches the enclosing function.

use std::mem;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::ast::{
    AssignmentNode, BindFnNode, CommandNode, DumpNode, ExecAssignNode, ExecSource, Expr,
    FnDeclNode, FnInvNode, ForNode, IfNode, ImportNode, Node, ReturnNode, RforkNode, SetenvNode,
    StringExpr, Tree, VarExpr, RFORK_FLAGS,
};
use crate::parser::Parser;
use crate::runner::{CmdRunner, FnRunner, Runner};
use crate::scheduler::pipeline;
use crate::scheduler::redirect::apply_redirects;
use crate::streams::Output;

use super::object::{FnValue, Obj};
use super::result::{Control, EvalError, ENOTSTARTED};
use super::scope::Shell;

impl Shell {
    /// Parse and execute a source string in this scope.
    pub async fn exec(&self, name: &str, content: &str) -> Result<(), Control> {
        let tree = Parser::new(name, content).parse()?;
        self.execute_tree(&tree, true).await.map(|_| ())
    }

    /// Execute the nash file at the given path, tracking it as the
    /// current file for the duration (imports resolve relative to it).
    pub async fn exec_file(&self, path: &str) -> Result<(), Control> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(EvalError::from)?;
        let backup = self.current_file();
        self.set_current_file(path);
        let result = self.exec(path, &content).await;
        self.set_current_file(&backup);
        result
    }

    /// Walk a statement list. With `stopable` set, a `return` carrier
    /// ends the walk successfully, yielding its value.
    pub fn execute_tree<'a>(
        &'a self,
        tree: &'a Tree,
        stopable: bool,
    ) -> BoxFuture<'a, Result<Option<Obj>, Control>> {
        Box::pin(async move {
            for node in &tree.root.nodes {
                match self.execute_node(node).await {
                    Ok(_) => {}
                    Err(Control::Ignored(_)) => continue,
                    Err(err @ Control::Interrupted(_)) => return Err(err),
                    Err(Control::Return(value)) if stopable => return Ok(value),
                    Err(err) => return Err(err),
                }
            }
            Ok(None)
        })
    }

    async fn execute_node(&self, node: &Node) -> Result<Option<Obj>, Control> {
        debug!("executing node at {}: {}", node.pos(), node);
        match node {
            Node::Comment(_) => Ok(None),
            Node::Import(n) => self.execute_import(n).await.map(|_| None),
            Node::Setenv(n) => self.execute_setenv(n).map(|_| None),
            Node::Assignment(n) => self.execute_assignment(n).map(|_| None),
            Node::ExecAssign(n) => self.execute_exec_assign(n).await.map(|_| None),
            Node::Command(n) => self.execute_command(n).await.map(|_| None),
            Node::Pipe(n) => pipeline::run(self, n).await.map(|_| None),
            Node::Rfork(n) => self.execute_rfork(n).map(|_| None),
            Node::If(n) => self.execute_if(n).await,
            Node::FnDecl(n) => self.execute_fn_decl(n).map(|_| None),
            // invocation as a statement discards the result
            Node::FnInv(n) => self.execute_fn_inv(n).await.map(|_| None),
            Node::For(n) => self.execute_for(n).await.map(|_| None),
            Node::BindFn(n) => self.execute_bind_fn(n).map(|_| None),
            Node::Dump(n) => self.execute_dump(n).map(|_| None),
            Node::Return(n) => {
                if self.is_fn() {
                    self.execute_return(n)
                } else {
                    Err(EvalError::Runtime(
                        "Unexpected return outside of function declaration.".into(),
                    )
                    .into())
                }
            }
        }
    }

    fn execute_return(&self, n: &ReturnNode) -> Result<Option<Obj>, Control> {
        match &n.value {
            None => Err(Control::Return(None)),
            Some(expr) => {
                let value = self.eval_expr(expr)?;
                Err(Control::Return(Some(value)))
            }
        }
    }

    fn execute_assignment(&self, n: &AssignmentNode) -> Result<(), Control> {
        let value = self.eval_expr(&n.value)?;
        self.set_var(&n.ident, value);
        Ok(())
    }

    fn execute_setenv(&self, n: &SetenvNode) -> Result<(), Control> {
        let Some(value) = self.get_var(&n.ident) else {
            return Err(EvalError::VarNotSet {
                name: n.ident.clone(),
                shell: self.name().to_string(),
            }
            .into());
        };
        self.setenv(&n.ident, value);
        Ok(())
    }

    fn execute_bind_fn(&self, n: &BindFnNode) -> Result<(), Control> {
        match self.get_fn(&n.name) {
            Some(func) => {
                self.set_bindfn(&n.cmd_name, func);
                Ok(())
            }
            None => Err(EvalError::Runtime(format!("No such function '{}'", n.name)).into()),
        }
    }

    fn execute_fn_decl(&self, n: &FnDeclNode) -> Result<(), Control> {
        let name = if n.name.is_empty() {
            self.next_lambda_name()
        } else {
            n.name.clone()
        };
        let func = Arc::new(crate::runner::UserFn::new(
            &name,
            n.args.clone(),
            n.tree.clone(),
            self.strong(),
            n.to_string(),
        ));
        self.set_fn(&name, func.clone());
        self.set_var(&name, Obj::Fn(FnValue::User(func)));
        debug!("function {} declared on '{}'", name, self.name());
        Ok(())
    }

    fn execute_rfork(&self, n: &RforkNode) -> Result<(), Control> {
        let flags = &n.flags.value;
        if flags.is_empty() || !flags.chars().all(|c| RFORK_FLAGS.contains(c)) {
            return Err(EvalError::Runtime(format!(
                "invalid rfork flags: {} (valid flags: {})",
                flags, RFORK_FLAGS
            ))
            .into());
        }
        Err(EvalError::Exec {
            msg: "rfork requires the nash namespace daemon, which is not available".into(),
            status: ENOTSTARTED,
        }
        .into())
    }

    fn execute_dump(&self, n: &DumpNode) -> Result<(), Control> {
        let text = self.dump_string();
        match &n.filename {
            None => {
                self.stdout()
                    .write_all(text.as_bytes())
                    .map_err(EvalError::from)?;
            }
            Some(expr) => {
                let value = self.eval_expr(expr)?;
                let path = match value {
                    Obj::Str(path) => path,
                    other => {
                        return Err(EvalError::Runtime(format!(
                            "dump does not support argument of type {}",
                            other.kind()
                        ))
                        .into())
                    }
                };
                use std::io::Write;
                use std::os::unix::fs::OpenOptionsExt;
                let mut file = std::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .mode(0o644)
                    .open(&path)
                    .map_err(EvalError::from)?;
                file.write_all(text.as_bytes()).map_err(EvalError::from)?;
            }
        }
        Ok(())
    }

    async fn execute_if(&self, n: &IfNode) -> Result<Option<Obj>, Control> {
        let lobj = self.eval_expr(&n.lvalue)?;
        let robj = self.eval_expr(&n.rvalue)?;

        let Obj::Str(lstr) = &lobj else {
            return Err(EvalError::Runtime(format!(
                "lvalue is not comparable: ({}) -> {}.",
                lobj,
                lobj.kind()
            ))
            .into());
        };
        let Obj::Str(rstr) = &robj else {
            return Err(EvalError::Runtime("rvalue is not comparable".into()).into());
        };

        let holds = match n.op.as_str() {
            "==" => lstr == rstr,
            "!=" => lstr != rstr,
            op => {
                return Err(EvalError::Runtime(format!("Invalid operation '{}'.", op)).into())
            }
        };

        if holds {
            self.execute_tree(&n.if_tree, false).await
        } else if let Some(else_tree) = &n.else_tree {
            self.execute_tree(else_tree, false).await
        } else {
            Ok(None)
        }
    }

    async fn execute_for(&self, n: &ForNode) -> Result<(), Control> {
        self.set_looping(true);
        let result = self.run_for(n).await;
        self.set_looping(false);
        result
    }

    async fn run_for(&self, n: &ForNode) -> Result<(), Control> {
        let (ident, in_var) = match (&n.ident, &n.in_var) {
            (Some(ident), Some(in_var)) => (ident, in_var),
            _ => return self.execute_inf_loop(&n.tree).await,
        };

        let value = self.eval_variable(&Expr::Var(VarExpr {
            pos: n.pos,
            name: in_var.clone(),
        }))?;
        let values = match value {
            Obj::List(values) => values,
            other => {
                return Err(EvalError::Runtime(format!(
                    "Invalid variable type in for range: {}",
                    other.kind()
                ))
                .into())
            }
        };

        for value in values {
            self.set_var(ident, value);

            let err = match self.execute_tree(&n.tree, true).await {
                Err(err @ Control::Interrupted(_)) => return Err(err),
                Err(err) => Some(err),
                Ok(_) => None,
            };

            if self.take_intr() {
                let msg = match &err {
                    Some(err) => err.to_string(),
                    None => "loop interrupted".into(),
                };
                return Err(Control::Interrupted(msg));
            }

            if let Some(err) = err {
                return Err(err);
            }
        }

        Ok(())
    }

    async fn execute_inf_loop(&self, tree: &Tree) -> Result<(), Control> {
        loop {
            let walk = self.execute_tree(tree, true).await;
            tokio::task::yield_now().await;

            let err = match walk {
                Err(err @ Control::Interrupted(_)) => return Err(err),
                Err(err) => Some(err),
                Ok(_) => None,
            };

            if self.take_intr() {
                let msg = match &err {
                    Some(err) => err.to_string(),
                    None => "loop interrupted".into(),
                };
                return Err(Control::Interrupted(msg));
            }

            if let Some(err) = err {
                return Err(err);
            }
        }
    }

    /// Resolve a command node into a runner. A leading `-` strips and
    /// marks the stage as error-ignoring. Names missing from PATH fall
    /// back to the scope's bindfn table, padding absent arguments with
    /// empty strings.
    pub(crate) fn get_command(
        &self,
        c: &CommandNode,
        ignore: &mut bool,
    ) -> Result<(Box<dyn Runner>, Vec<Expr>), EvalError> {
        let mut cmd_name = c.name.as_str();
        if cmd_name.len() > 1 && cmd_name.starts_with('-') {
            *ignore = true;
            cmd_name = &cmd_name[1..];
        }
        if cmd_name.is_empty() {
            return Err(EvalError::Runtime("Empty command name.".into()));
        }

        match CmdRunner::new(cmd_name) {
            Ok(runner) => Ok((Box::new(runner), c.args.clone())),
            Err(err @ EvalError::CommandNotFound { .. }) => {
                let Some(func) = self.get_bindfn(cmd_name) else {
                    return Err(err);
                };
                debug!("resolved '{}' through bindfn {}", cmd_name, func.name());

                if c.args.len() > func.arg_names().len() {
                    return Err(EvalError::Runtime(format!(
                        "Too much arguments for function '{}'. It expects {} args, but given {}.",
                        func.name(),
                        func.arg_names().len(),
                        c.args.len()
                    )));
                }

                let mut args = c.args.clone();
                while args.len() < func.arg_names().len() {
                    args.push(Expr::Str(StringExpr {
                        pos: c.pos,
                        value: String::new(),
                        quoted: true,
                    }));
                }

                Ok((Box::new(FnRunner::new(func)), args))
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) async fn execute_command(&self, c: &CommandNode) -> Result<(), Control> {
        let mut ignore = false;
        match self.run_command(c, &mut ignore).await {
            Ok(()) => {
                self.set_var("status", Obj::Str("0".into()));
                Ok(())
            }
            Err(err) => {
                self.set_var("status", Obj::Str(err.status_or("127")));
                if ignore {
                    Err(Control::Ignored(err.to_string()))
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn run_command(&self, c: &CommandNode, ignore: &mut bool) -> Result<(), Control> {
        let (mut cmd, args) = self.get_command(c, ignore)?;

        // environ before args, so argument values bound into a function
        // stage are not shadowed by the environment import
        cmd.set_environ(self.environ());
        cmd.set_args(&args, self)?;

        cmd.set_stdin(self.stdin());
        cmd.set_stdout(self.stdout());
        cmd.set_stderr(self.stderr());

        let _close_after_wait = apply_redirects(cmd.as_mut(), &c.redirects, self)?;

        cmd.start().await?;
        cmd.wait().await?;
        Ok(())
    }

    pub(crate) async fn execute_fn_inv(&self, n: &FnInvNode) -> Result<Option<Obj>, Control> {
        let value = if n.name.len() > 1 && n.name.starts_with('$') {
            let obj = self.eval_variable(&Expr::Var(VarExpr {
                pos: n.pos,
                name: n.name.clone(),
            }))?;
            match obj {
                Obj::Fn(value) => value,
                _ => {
                    return Err(EvalError::Runtime(format!(
                        "Variable '{}' isnt a function.",
                        n.name
                    ))
                    .into())
                }
            }
        } else if let Some(builtin) = self.get_builtin(&n.name) {
            FnValue::Builtin(builtin)
        } else if let Some(func) = self.get_fn(&n.name) {
            FnValue::User(func)
        } else {
            return Err(EvalError::Runtime(format!("no such function '{}'", n.name)).into());
        };

        let mut runner = value.runner();
        runner.set_args(&n.args, self)?;
        runner.start().await?;
        runner.wait().await?;
        Ok(runner.results())
    }

    /// `ident <= command|pipe|fninv`: run the right side with stdout
    /// captured, then bind the output (split by IFS characters when IFS
    /// is a non-empty list) — or, for a function invocation, bind its
    /// result object directly.
    async fn execute_exec_assign(&self, n: &ExecAssignNode) -> Result<(), Control> {
        if let ExecSource::FnInv(inv) = &n.source {
            let (capture, _discarded) = Output::capture();
            let saved = self.swap_stdout(capture);
            let invoked = self.execute_fn_inv(inv).await;
            self.swap_stdout(saved);

            return match invoked? {
                Some(value) => {
                    self.set_var(&n.ident, value);
                    Ok(())
                }
                None => Err(EvalError::Runtime(format!(
                    "Invalid assignment from function that does not return values: {}",
                    n.source
                ))
                .into()),
            };
        }

        let (capture, buffer) = Output::capture();
        let saved = self.swap_stdout(capture);
        let result = if let ExecSource::Command(cmd) = &n.source {
            self.execute_command(cmd).await
        } else if let ExecSource::Pipe(pipe) = &n.source {
            pipeline::run(self, pipe).await
        } else {
            Ok(())
        };
        self.swap_stdout(saved);

        let output = {
            let data = buffer.lock().unwrap_or_else(|e| e.into_inner());
            String::from_utf8_lossy(&data).into_owned()
        };

        // the captured output is bound even when the command failed; the
        // failure still propagates afterwards
        if let Some(Obj::List(delims)) = self.get_var("IFS") {
            if !delims.is_empty() {
                let chars: Vec<char> = delims
                    .iter()
                    .filter_map(|d| match d {
                        Obj::Str(s) => s.chars().next(),
                        _ => None,
                    })
                    .collect();
                let fields = split_fields(&output, &chars);
                self.set_var(
                    &n.ident,
                    Obj::List(fields.into_iter().map(Obj::Str).collect()),
                );
                return result;
            }
        }

        self.set_var(&n.ident, Obj::Str(output));
        result
    }

    /// Resolve and execute an imported file. Search order: the literal
    /// path, the path with `.sh`, both relative to the current file's
    /// directory, then `$NASHPATH/lib`. Absolute paths load directly.
    async fn execute_import(&self, n: &ImportNode) -> Result<(), Control> {
        let fname = n.path.value.clone();
        debug!("importing '{}'", fname);

        if fname.starts_with('/') {
            return self.exec_file(&fname).await;
        }

        let has_ext = fname.ends_with(".sh");
        let mut tries = vec![fname.clone()];
        if !has_ext {
            tries.push(format!("{}.sh", fname));
        }

        let current = self.current_file();
        if !current.is_empty() {
            if let Some(dir) = std::path::Path::new(&current).parent() {
                tries.push(dir.join(&fname).display().to_string());
                if !has_ext {
                    tries.push(dir.join(format!("{}.sh", fname)).display().to_string());
                }
            }
        }

        let Some(nashpath) = self.getenv("NASHPATH") else {
            return Err(EvalError::Runtime(format!(
                "NASHPATH environment variable not set on shell {}",
                self.name()
            ))
            .into());
        };
        let lib_dir = match nashpath {
            Obj::Str(dir) => dir,
            _ => return Err(EvalError::Runtime("NASHPATH must be a string".into()).into()),
        };

        tries.push(format!("{}/lib/{}", lib_dir, fname));
        if !has_ext {
            tries.push(format!("{}/lib/{}.sh", lib_dir, fname));
        }

        for path in &tries {
            match std::fs::metadata(path) {
                Ok(meta) if !meta.is_dir() => return self.exec_file(path).await,
                _ => continue,
            }
        }

        Err(EvalError::Runtime(format!(
            "Failed to import path '{}'. The locations below have been tried:\n \"{}\"",
            fname,
            tries.join("\", \"")
        ))
        .into())
    }
}

/// Split on any of the delimiter characters, dropping empty fields.
fn split_fields(text: &str, delims: &[char]) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if delims.contains(&ch) {
            if !current.is_empty() {
                fields.push(mem::take(&mut current));
            }
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        fields.push(current);
    }
    fields
}
