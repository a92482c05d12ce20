//! Pipeline execution.
//!
//! A pipe of `N >= 2` commands runs in four phases: build every stage's
//! runner, wire each stage's stdout into the next stage's stdin through
//! an OS pipe, start the stages in order, then wait in order. Streams
//! opened by redirections stay alive until every wait has finished.
//!
//! Each stage tracks a status message and an exit code. A stage named
//! with a leading `-` is *ignoring*: its failure reports as `"none"` in
//! the combined error and does not fail the pipeline. The `status`
//! variable is always set — a single code when all stages agree,
//! otherwise the codes joined with `|`.

use crate::ast::PipeNode;
use crate::interpreter::{Control, EvalError, Obj, Shell, ENOTFOUND, ENOTSTARTED};
use crate::runner::Runner;
use crate::scheduler::redirect::apply_redirects;
use crate::streams::Output;

pub(crate) async fn run(shell: &Shell, pipe: &PipeNode) -> Result<(), Control> {
    let stages = pipe.commands.len();
    if stages < 2 {
        return Err(EvalError::Runtime("Pipe requires at least two commands.".into()).into());
    }

    let mut errs = vec!["not started".to_string(); stages];
    let mut cods = vec![ENOTSTARTED.to_string(); stages];
    let mut igns = vec![false; stages];
    let mut close_after_wait: Vec<Output> = Vec::new();

    let outcome = run_stages(
        shell,
        pipe,
        &mut errs,
        &mut cods,
        &mut igns,
        &mut close_after_wait,
    )
    .await;

    match outcome {
        Ok(()) => {
            shell.set_var("status", Obj::Str("0".into()));
            Ok(())
        }
        Err((failed, err)) => {
            errs[failed] = if igns[failed] {
                "none".into()
            } else {
                err.to_string()
            };
            cods[failed] = err.status_or(&cods[failed]);

            let uniform = cods.iter().all(|code| code == &cods[0]);
            let status = if uniform {
                cods[0].clone()
            } else {
                cods.join("|")
            };
            shell.set_var("status", Obj::Str(status));

            if igns[failed] {
                Ok(())
            } else {
                Err(EvalError::Runtime(errs.join("|")).into())
            }
        }
    }
}

async fn run_stages(
    shell: &Shell,
    pipe: &PipeNode,
    errs: &mut [String],
    cods: &mut [String],
    igns: &mut [bool],
    close_after_wait: &mut Vec<Output>,
) -> Result<(), (usize, Control)> {
    let stages = pipe.commands.len();
    let last = stages - 1;
    let environ = shell.environ();
    let mut cmds: Vec<Box<dyn Runner>> = Vec::with_capacity(stages);

    // build
    for (i, node_cmd) in pipe.commands.iter().enumerate() {
        let mut ignore = false;
        let resolved = shell.get_command(node_cmd, &mut ignore);
        igns[i] = ignore;
        let (mut cmd, args) = resolved.map_err(|e| {
            cods[i] = ENOTFOUND.to_string();
            (i, Control::from(e))
        })?;

        // environ before args, so the stage's bindings are not shadowed
        cmd.set_environ(environ.clone());
        cmd.set_args(&args, shell).map_err(|e| (i, Control::from(e)))?;

        cmd.set_stdin(shell.stdin());
        cmd.set_stderr(shell.stderr());

        if i < last {
            let closers = apply_redirects(cmd.as_mut(), &node_cmd.redirects, shell)
                .map_err(|e| (i, Control::from(e)))?;
            close_after_wait.extend(closers);
        }

        cmds.push(cmd);
    }

    // wire: stage 0 reads the evaluator's stdin (stdin redirection is
    // not supported); each following stage reads the previous stdout
    cmds[0].set_stdin(shell.stdin());
    for i in 0..last {
        cmds[i].set_stderr(shell.stderr());
        let reader = cmds[i].stdout_pipe().map_err(|e| (i, Control::from(e)))?;
        cmds[i + 1].set_stdin(reader);
    }

    cmds[last].set_stdout(shell.stdout());
    cmds[last].set_stderr(shell.stderr());
    let closers = apply_redirects(cmds[last].as_mut(), &pipe.commands[last].redirects, shell)
        .map_err(|e| (last, Control::from(e)))?;
    close_after_wait.extend(closers);

    // start
    for (i, cmd) in cmds.iter_mut().enumerate() {
        cmd.start().await.map_err(|e| (i, e))?;
        errs[i] = "success".to_string();
        cods[i] = "0".to_string();
    }

    // wait
    for (i, cmd) in cmds.iter_mut().enumerate() {
        cmd.wait().await.map_err(|e| (i, e))?;
        errs[i] = "success".to_string();
        cods[i] = "0".to_string();
    }

    Ok(())
}
