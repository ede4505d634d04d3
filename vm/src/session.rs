use std::future::Future;

use crate::error::RuntimeError;
use crate::vm::{Choice, RunOutcome, Vm};

/// Why the host could not pick a choice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("choice was cancelled")]
    Cancelled,
    #[error("choice resolution failed: {0}")]
    Failed(String),
    #[error("choice {id} is not among the offered choices")]
    UnknownChoice { id: usize },
}

impl ResolveError {
    /// The host stopped asking on purpose, e.g. its input ended.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ResolveError::Cancelled)
    }
}

/// Picks one of the offered choices, asynchronously.
pub trait ChoiceResolver {
    fn choose_from(
        &mut self,
        choices: Vec<Choice>,
    ) -> impl Future<Output = Result<usize, ResolveError>> + Send;
}

impl<F, Fut> ChoiceResolver for F
where
    F: FnMut(Vec<Choice>) -> Fut,
    Fut: Future<Output = Result<usize, ResolveError>> + Send,
{
    fn choose_from(
        &mut self,
        choices: Vec<Choice>,
    ) -> impl Future<Output = Result<usize, ResolveError>> + Send {
        self(choices)
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed,
    /// A choice could not be resolved; the VM was terminated.
    Aborted(ResolveError),
}

/// Drives a VM against a resolver: run, offer choices, resume, repeat.
pub struct Session<R> {
    vm: Vm,
    resolver: R,
}

impl<R: ChoiceResolver> Session<R> {
    pub fn new(vm: Vm, resolver: R) -> Self {
        Session { vm, resolver }
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn into_vm(self) -> Vm {
        self.vm
    }

    /// Play until the story ends or a choice fails.
    ///
    /// Dropping the returned future while a choice is pending terminates the VM.
    pub async fn play(&mut self) -> Result<SessionOutcome, RuntimeError> {
        let mut outcome = self.vm.run()?;
        loop {
            let choices = match outcome {
                RunOutcome::Completed => return Ok(SessionOutcome::Completed),
                RunOutcome::Suspended(choices) => choices,
            };

            let guard = TerminateOnDrop::new(&mut self.vm);
            let id = match self.resolver.choose_from(choices).await {
                Ok(id) => id,
                Err(err) => {
                    if err.is_cancellation() {
                        tracing::debug!("choice cancelled, terminating");
                    } else {
                        tracing::error!(error = %err, "choice not resolved, terminating");
                    }
                    return Ok(SessionOutcome::Aborted(err));
                }
            };

            outcome = match guard.vm.resume(id) {
                Ok(next) => {
                    guard.disarm();
                    next
                }
                Err(RuntimeError::UnresolvedChoice { id }) => {
                    tracing::error!(id, "resolver picked an unknown choice, terminating");
                    return Ok(SessionOutcome::Aborted(ResolveError::UnknownChoice { id }));
                }
                Err(err) => return Err(err),
            };
        }
    }
}

/// Terminates the VM unless disarmed, covering cancellation at an `.await`.
struct TerminateOnDrop<'a> {
    vm: &'a mut Vm,
    armed: bool,
}

impl<'a> TerminateOnDrop<'a> {
    fn new(vm: &'a mut Vm) -> Self {
        TerminateOnDrop { vm, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TerminateOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.vm.terminate();
        }
    }
}
