mod builtin;
mod quest;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use questmark::{Instruction, Program};
use rand::rngs::StdRng;

pub use quest::quest_natives;

use crate::error::RuntimeError;
use crate::value::{Context, Value};
use crate::vm::{PendingChoice, Vm};

/// A native function. Natives see the VM through a [`Machine`].
pub type NativeFn = Arc<dyn Fn(&mut Machine<'_>) -> Result<(), RuntimeError> + Send + Sync>;

/// Name → native table. Built once, then shared read-only by every VM that uses it.
#[derive(Clone, Default)]
pub struct NativeRegistry {
    functions: HashMap<String, NativeFn>,
}

impl NativeRegistry {
    /// An empty registry: not even arithmetic.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arithmetic, comparison, strings, context, branching, `goto`, `exit` and `ppc`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    pub fn with<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Machine<'_>) -> Result<(), RuntimeError> + Send + Sync + 'static,
    {
        self.register(name, f);
        self
    }

    /// Add or replace a native.
    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut Machine<'_>) -> Result<(), RuntimeError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&NativeFn> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// What a native may do to the VM during one instruction.
///
/// Operands are popped through the typed helpers, which report the native's
/// name and the operand position on a mismatch. A native that changes control
/// flow calls [`Machine::jump`]; otherwise the VM moves to the next instruction.
pub struct Machine<'a> {
    vm: &'a mut Vm,
    native: &'a str,
    pc: usize,
    popped: usize,
    jump: Option<usize>,
}

impl<'a> Machine<'a> {
    pub(crate) fn new(vm: &'a mut Vm, native: &'a str, pc: usize) -> Self {
        Machine {
            vm,
            native,
            pc,
            popped: 0,
            jump: None,
        }
    }

    pub(crate) fn into_jump(self) -> Option<usize> {
        self.jump
    }

    /// Offset of the instruction being executed.
    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn program(&self) -> &Program {
        &self.vm.program
    }

    // -----------------------------------------------------------------------
    // Stack
    // -----------------------------------------------------------------------

    pub fn push(&mut self, value: impl Into<Value>) {
        self.vm.stack.push(value.into());
    }

    pub fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.popped += 1;
        self.vm.stack.pop().ok_or_else(|| RuntimeError::Type {
            native: self.native.to_string(),
            operand: self.popped,
            expected: "value",
            found: "an empty stack",
        })
    }

    pub fn pop_number(&mut self) -> Result<f64, RuntimeError> {
        match self.pop()? {
            Value::Number(n) => Ok(n),
            other => Err(self.type_error("number", &other)),
        }
    }

    pub fn pop_string(&mut self) -> Result<String, RuntimeError> {
        match self.pop()? {
            Value::String(s) => Ok(s),
            other => Err(self.type_error("string", &other)),
        }
    }

    fn type_error(&self, expected: &'static str, found: &Value) -> RuntimeError {
        RuntimeError::Type {
            native: self.native.to_string(),
            operand: self.popped,
            expected,
            found: found.type_name(),
        }
    }

    pub fn out_of_range(&self, value: f64) -> RuntimeError {
        RuntimeError::OutOfRange {
            native: self.native.to_string(),
            value,
        }
    }

    // -----------------------------------------------------------------------
    // Context
    // -----------------------------------------------------------------------

    pub fn context(&self) -> &Context {
        &self.vm.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.vm.context
    }

    // -----------------------------------------------------------------------
    // Control flow
    // -----------------------------------------------------------------------

    /// Continue at `offset` instead of the next instruction.
    pub fn jump(&mut self, offset: usize) {
        self.jump = Some(offset);
    }

    /// Continue at the offset bound to `label`.
    pub fn goto_label(&mut self, label: &str) -> Result<(), RuntimeError> {
        let offset = self
            .vm
            .program
            .label(label)
            .ok_or_else(|| RuntimeError::UndefinedLabel {
                label: label.to_string(),
            })?;
        tracing::debug!(label, offset, "goto");
        self.jump(offset);
        Ok(())
    }

    /// The `(open, close)` offsets of the block that must directly follow
    /// this instruction.
    pub fn next_block(&self) -> Result<(usize, usize), RuntimeError> {
        let open = self.pc + 1;
        let unguarded = || RuntimeError::UnguardedBranch {
            native: self.native.to_string(),
            at: self.pc,
        };
        match self.vm.program.get(open) {
            Some(Instruction::OpenBlock) => {
                let close = self.vm.program.block_end(open).ok_or_else(unguarded)?;
                Ok((open, close))
            }
            _ => Err(unguarded()),
        }
    }

    pub fn exit(&mut self) {
        self.vm.exit = true;
    }

    // -----------------------------------------------------------------------
    // Host interaction
    // -----------------------------------------------------------------------

    pub fn emit(&mut self, value: Value) {
        self.vm.sink.emit(value);
    }

    /// Queue a choice for the next [`Machine::suspend`].
    pub fn offer(&mut self, choice: PendingChoice) {
        self.vm.pending.push(choice);
    }

    /// Offer every queued choice to the host and pause. The queue is taken
    /// before pausing, so nothing can read it twice. With nothing queued the
    /// VM terminates instead.
    pub fn suspend(&mut self) {
        let choices = std::mem::take(&mut self.vm.pending);
        if choices.is_empty() {
            tracing::debug!(pc = self.pc, "no choices available, exiting");
            self.vm.exit = true;
            return;
        }
        tracing::debug!(pc = self.pc, choices = choices.len(), "suspending for a choice");
        self.vm.offered = choices;
        self.vm.pause = true;
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.vm.rng
    }
}
