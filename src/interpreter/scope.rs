//! Scopes.
//!
//! A [`Shell`] is one lexical activation frame: its own variables,
//! functions and command binds, a parent pointer, and the stream handles
//! commands inherit. The root frame additionally owns the environment
//! map, the builtin table and the interrupt flag; subshells delegate
//! those concerns up the chain.
//!
//! Lookup rules: variables, functions and binds search self first, then
//! the parent chain. Environment and builtins always resolve at the
//! root. `set_var` writes only into the current frame.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::debug;

use crate::builtins::{self, Builtin};
use crate::signals;
use crate::streams::{Input, Output};

use super::object::{FnValue, Obj};
use super::result::{Control, EvalError};
use crate::runner::UserFn;

const DEFAULT_PROMPT: &str = "\u{1b}[31m\u{3bb}>\u{1b}[0m ";

/// Source executed on the root at startup, after the builtin table is
/// registered.
const BOOTSTRAP: &str = "fn nash_builtin_cd(path) {
	if $path == \"\" {
		path = $HOME
	}

	chdir($path)
}

bindfn nash_builtin_cd cd
";

/// Interrupt flag shared by a whole scope chain. The signal listener and
/// the evaluator both take this lock; it is the mutex "shared with the
/// root".
pub(crate) struct Interrupt {
    flag: Mutex<bool>,
}

impl Interrupt {
    fn new() -> Self {
        Self {
            flag: Mutex::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.flag.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct ShellState {
    vars: HashMap<String, Obj>,
    fns: HashMap<String, Arc<UserFn>>,
    binds: HashMap<String, Arc<UserFn>>,
    /// Root only; mirrored into the process environment.
    env: HashMap<String, Obj>,
    /// Root only; subshells resolve builtins through the parent chain.
    builtins: HashMap<String, Arc<dyn Builtin>>,
    stdin: Input,
    stdout: Output,
    stderr: Output,
    current_file: String,
    lambdas: u32,
}

/// One lexical scope frame. See the module docs for the lookup rules.
pub struct Shell {
    name: String,
    is_fn: bool,
    parent: Option<Arc<Shell>>,
    me: Weak<Shell>,
    interrupt: Arc<Interrupt>,
    looping: AtomicBool,
    state: Mutex<ShellState>,
}

impl Shell {
    /// Root scope with no environment import and no signal listener.
    /// [`Shell::new_root`] builds on this; tests use it directly.
    pub(crate) fn new_bare_root() -> Arc<Shell> {
        Arc::new_cyclic(|me| Shell {
            name: "root".into(),
            is_fn: false,
            parent: None,
            me: me.clone(),
            interrupt: Arc::new(Interrupt::new()),
            looping: AtomicBool::new(false),
            state: Mutex::new(ShellState {
                vars: HashMap::new(),
                fns: HashMap::new(),
                binds: HashMap::new(),
                env: HashMap::new(),
                builtins: HashMap::new(),
                stdin: Input::Stdin,
                stdout: Output::Stdout,
                stderr: Output::Stderr,
                current_file: String::new(),
                lambdas: 0,
            }),
        })
    }

    /// Create the root scope: import the process environment, set the
    /// startup variables, register builtins, run the bootstrap source and
    /// start the signal listener.
    pub async fn new_root() -> Result<Arc<Shell>, Control> {
        let shell = Self::new_bare_root();
        shell.init_env()?;
        builtins::register_builtins(&shell);
        shell.exec("<bootstrap>", BOOTSTRAP).await?;
        signals::listen(shell.clone());
        Ok(shell)
    }

    /// Subshell for a function body. Shares the parent's streams and
    /// interrupt lock; holds no builtins or environment of its own.
    pub fn new_subshell(name: &str, parent: &Arc<Shell>) -> Arc<Shell> {
        let (stdin, stdout, stderr, current_file) = {
            let st = parent.st();
            (
                st.stdin.clone(),
                st.stdout.clone(),
                st.stderr.clone(),
                st.current_file.clone(),
            )
        };
        Arc::new_cyclic(|me| Shell {
            name: name.into(),
            is_fn: true,
            parent: Some(parent.clone()),
            me: me.clone(),
            interrupt: parent.interrupt.clone(),
            looping: AtomicBool::new(false),
            state: Mutex::new(ShellState {
                vars: HashMap::new(),
                fns: HashMap::new(),
                binds: HashMap::new(),
                env: HashMap::new(),
                builtins: HashMap::new(),
                stdin,
                stdout,
                stderr,
                current_file,
                lambdas: 0,
            }),
        })
    }

    fn st(&self) -> MutexGuard<'_, ShellState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn strong(&self) -> Arc<Shell> {
        self.me.upgrade().expect("scope accessed after drop")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_fn(&self) -> bool {
        self.is_fn
    }

    pub fn parent(&self) -> Option<&Arc<Shell>> {
        self.parent.as_ref()
    }

    fn init_env(&self) -> Result<(), EvalError> {
        let argv = Obj::List(std::env::args().map(Obj::Str).collect());
        self.setenv("argv", argv);

        for (key, value) in std::env::vars() {
            if key == "argv" {
                continue;
            }
            self.setenv(&key, Obj::Str(value));
        }

        self.setenv("PID", Obj::Str(std::process::id().to_string()));

        if self.getenv("SHELL").is_none() {
            let shell = std::env::current_exe()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| "nash".into());
            self.setenv("SHELL", Obj::Str(shell));
        }

        let cwd = std::env::current_dir()?;
        self.setenv("PWD", Obj::Str(cwd.display().to_string()));

        if self.getenv("PROMPT").is_none() {
            self.setenv("PROMPT", Obj::Str(DEFAULT_PROMPT.into()));
        }

        Ok(())
    }

    /// Clear vars, fns, binds and env of this scope.
    pub fn reset(&self) {
        let mut st = self.st();
        st.vars.clear();
        st.fns.clear();
        st.binds.clear();
        st.env.clear();
    }

    // ───────────────────────────────────────────────────────────────────
    // Variables, functions, binds
    // ───────────────────────────────────────────────────────────────────

    /// Lookup in self, then the parent chain.
    pub fn get_var(&self, name: &str) -> Option<Obj> {
        if let Some(value) = self.st().vars.get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref()?.get_var(name)
    }

    /// Write into the current scope only; never walks the chain.
    pub fn set_var(&self, name: &str, value: Obj) {
        self.st().vars.insert(name.to_string(), value);
    }

    pub fn get_fn(&self, name: &str) -> Option<Arc<UserFn>> {
        debug!("looking for function '{}' on shell '{}'", name, self.name);
        if let Some(f) = self.st().fns.get(name) {
            return Some(f.clone());
        }
        self.parent.as_ref()?.get_fn(name)
    }

    pub fn set_fn(&self, name: &str, func: Arc<UserFn>) {
        self.st().fns.insert(name.to_string(), func);
    }

    pub fn get_bindfn(&self, cmd_name: &str) -> Option<Arc<UserFn>> {
        if let Some(f) = self.st().binds.get(cmd_name) {
            return Some(f.clone());
        }
        self.parent.as_ref()?.get_bindfn(cmd_name)
    }

    pub fn set_bindfn(&self, cmd_name: &str, func: Arc<UserFn>) {
        self.st().binds.insert(cmd_name.to_string(), func);
    }

    // ───────────────────────────────────────────────────────────────────
    // Builtins and environment: root-only concerns
    // ───────────────────────────────────────────────────────────────────

    pub fn get_builtin(&self, name: &str) -> Option<Arc<dyn Builtin>> {
        debug!("looking for builtin '{}' on shell '{}'", name, self.name);
        if let Some(parent) = &self.parent {
            return parent.get_builtin(name);
        }
        self.st().builtins.get(name).cloned()
    }

    /// Register a builtin on the root and bind it as a function variable
    /// of the same name.
    pub fn add_builtin(&self, builtin: Arc<dyn Builtin>) {
        if let Some(parent) = &self.parent {
            return parent.add_builtin(builtin);
        }
        let name = builtin.name();
        self.st().builtins.insert(name.to_string(), builtin.clone());
        self.set_var(name, Obj::Fn(FnValue::Builtin(builtin)));
    }

    pub fn getenv(&self, name: &str) -> Option<Obj> {
        if let Some(parent) = &self.parent {
            return parent.getenv(name);
        }
        self.st().env.get(name).cloned()
    }

    /// Set an environment entry on the root: the root variable, the env
    /// map, and the process environment all receive it.
    pub fn setenv(&self, name: &str, value: Obj) {
        if let Some(parent) = &self.parent {
            return parent.setenv(name, value);
        }
        self.set_var(name, value.clone());
        std::env::set_var(name, value.to_string());
        self.st().env.insert(name.to_string(), value);
    }

    /// Render the root environment as sorted `k=v` strings for child
    /// processes.
    pub fn environ(&self) -> Vec<String> {
        if let Some(parent) = &self.parent {
            return parent.environ();
        }
        let st = self.st();
        let mut entries: Vec<String> =
            st.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        entries.sort();
        entries
    }

    /// Replace the root environment wholesale.
    pub fn set_environ(&self, entries: &[String]) {
        if let Some(parent) = &self.parent {
            return parent.set_environ(entries);
        }
        self.st().env.clear();
        for entry in entries {
            if let Some((key, value)) = entry.split_once('=') {
                self.setenv(key, Obj::Str(value.to_string()));
            }
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Interrupt and loop flags
    // ───────────────────────────────────────────────────────────────────

    pub(crate) fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::SeqCst);
    }

    pub(crate) fn looping(&self) -> bool {
        self.looping.load(Ordering::SeqCst)
    }

    pub(crate) fn set_intr(&self, value: bool) {
        *self.interrupt.lock() = value;
    }

    /// Consume the interrupted flag: returns true at most once per
    /// interrupt.
    pub(crate) fn take_intr(&self) -> bool {
        let mut flag = self.interrupt.lock();
        let was = *flag;
        *flag = false;
        was
    }

    /// Request cooperative cancellation; loops observe it at their next
    /// iteration boundary.
    pub fn trigger_interrupt(&self) {
        self.set_intr(true);
    }

    /// Used by the signal listener: set the flag only while this scope is
    /// looping, holding the shared lock for the check.
    pub(crate) fn interrupt_if_looping(&self) {
        let mut flag = self.interrupt.lock();
        if self.looping() {
            *flag = true;
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Streams and bookkeeping
    // ───────────────────────────────────────────────────────────────────

    pub fn stdin(&self) -> Input {
        self.st().stdin.clone()
    }

    pub fn stdout(&self) -> Output {
        self.st().stdout.clone()
    }

    pub fn stderr(&self) -> Output {
        self.st().stderr.clone()
    }

    pub fn set_stdin(&self, stdin: Input) {
        self.st().stdin = stdin;
    }

    pub fn set_stdout(&self, stdout: Output) {
        self.st().stdout = stdout;
    }

    pub fn set_stderr(&self, stderr: Output) {
        self.st().stderr = stderr;
    }

    pub(crate) fn swap_stdout(&self, stdout: Output) -> Output {
        std::mem::replace(&mut self.st().stdout, stdout)
    }

    pub fn current_file(&self) -> String {
        self.st().current_file.clone()
    }

    pub fn set_current_file(&self, path: &str) {
        self.st().current_file = path.to_string();
    }

    pub(crate) fn next_lambda_name(&self) -> String {
        let mut st = self.st();
        let n = st.lambdas;
        st.lambdas += 1;
        format!("lambda {}", n)
    }

    /// Textual dump of vars, env and fns, sorted for determinism.
    pub fn dump_string(&self) -> String {
        let st = self.st();
        let mut out = String::new();

        let mut vars: Vec<_> = st.vars.iter().collect();
        vars.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (name, value) in vars {
            out.push_str(&format!("{} = {}\n", name, value.repr()));
        }

        let mut envs: Vec<_> = st.env.keys().collect();
        envs.sort();
        for name in envs {
            out.push_str(&format!("setenv {}\n", name));
        }

        let mut fns: Vec<_> = st.fns.iter().collect();
        fns.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (_, func) in fns {
            out.push_str(&format!("{}\n\n", func.repr()));
        }

        out
    }
}
