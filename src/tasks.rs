//! Cooperative cancellation and the serve-mode task group.
//!
//! Serve mode runs a small fixed set of long-running threads (static server,
//! reload server, watch dispatcher). They share one [`CancelToken`]; the
//! first member to fail cancels the token, and cancelling the token runs the
//! registered hooks that unblock every member's blocking wait.

use anyhow::{Context, Result, anyhow};
use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
};

type CancelHook = Box<dyn FnOnce() + Send>;

struct TokenInner {
    cancelled: AtomicBool,
    hooks: Mutex<Vec<CancelHook>>,
}

/// Shared cancellation flag with run-once hooks.
///
/// Hooks registered with [`CancelToken::on_cancel`] run exactly once, on the
/// first call to [`CancelToken::cancel`]. A hook registered after
/// cancellation runs immediately.
#[derive(Clone)]
pub struct CancelToken(Arc<TokenInner>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(TokenInner {
            cancelled: AtomicBool::new(false),
            hooks: Mutex::new(Vec::new()),
        }))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel the token and run all registered hooks. Idempotent.
    pub fn cancel(&self) {
        if self.0.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let hooks: Vec<CancelHook> = {
            let mut hooks = self.0.hooks.lock().unwrap_or_else(PoisonError::into_inner);
            hooks.drain(..).collect()
        };
        for hook in hooks {
            hook();
        }
    }

    /// Register a hook to run on cancellation, typically unblocking a
    /// member's blocking wait (e.g. `Server::unblock`).
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        if self.is_cancelled() {
            hook();
            return;
        }
        let mut hooks = self.0.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        // Cancelled between the check and the lock: run it now
        if self.is_cancelled() {
            drop(hooks);
            hook();
        } else {
            hooks.push(Box::new(hook));
        }
    }
}

/// A fixed group of named worker threads sharing one [`CancelToken`].
///
/// The first member returning an error cancels the rest; [`TaskGroup::wait`]
/// joins every member and reports the first error.
pub struct TaskGroup {
    token: CancelToken,
    members: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl TaskGroup {
    pub fn new(token: CancelToken) -> Self {
        Self {
            token,
            members: Vec::new(),
        }
    }

    /// Spawn a named member thread. A member that returns an error cancels
    /// the whole group.
    pub fn spawn(
        &mut self,
        name: &'static str,
        task: impl FnOnce(CancelToken) -> Result<()> + Send + 'static,
    ) -> Result<()> {
        let token = self.token.clone();
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let result = task(token.clone());
                if result.is_err() {
                    token.cancel();
                }
                result
            })
            .with_context(|| format!("Failed to spawn {name} task"))?;

        self.members.push((name, handle));
        Ok(())
    }

    /// Join every member and return the first error, if any.
    pub fn wait(self) -> Result<()> {
        let mut first_error = None;

        for (name, handle) in self.members {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err.context(format!("{name} task failed")));
                    }
                }
                Err(_) => {
                    if first_error.is_none() {
                        first_error = Some(anyhow!("{name} task panicked"));
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
