//! Signal listener.
//!
//! One long-lived task reads OS signals for the root scope. `SIGINT`
//! marks the scope interrupted while it is looping; the evaluator polls
//! the flag at loop boundaries. `SIGCHLD` is consumed and ignored (no
//! job control; every command is waited). Other delivered signals print
//! a diagnostic line to the evaluator's stdout.

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, warn};

use crate::interpreter::Shell;

pub(crate) fn listen(shell: Arc<Shell>) {
    let streams = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::child()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    );
    let (Ok(mut sigint), Ok(mut sigchld), Ok(mut sigterm), Ok(mut sighup)) = streams else {
        warn!("signal listener disabled: failed to register handlers");
        return;
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    debug!("SIGINT received");
                    shell.interrupt_if_looping();
                }
                _ = sigchld.recv() => {
                    // no reaping needed: every command is waited
                }
                _ = sigterm.recv() => {
                    let _ = shell.stdout().write_all(b"terminated\n");
                }
                _ = sighup.recv() => {
                    let _ = shell.stdout().write_all(b"hangup\n");
                }
            }
        }
    });
}
