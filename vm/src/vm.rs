use std::fmt;
use std::sync::Arc;

use questmark::{Instruction, Program};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, RuntimeError};
use crate::natives::{Machine, NativeRegistry};
use crate::sink::{Discard, OutputSink};
use crate::snapshot::Snapshot;
use crate::value::{Context, Value};

/// A choice as the host sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub id: usize,
    pub title: String,
}

/// A choice as the VM keeps it: the title and where its effect begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChoice {
    pub title: String,
    pub program_counter: usize,
}

/// Why [`Vm::run`] returned.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Waiting for [`Vm::resume`] with one of these ids.
    Suspended(Vec<Choice>),
    /// `exit` ran, or execution left the program.
    Completed,
}

/// One execution of a compiled program.
///
/// The program and native table are shared and read-only; everything else
/// (stack, context, program counter, flags, pending choices) belongs to this
/// instance alone.
pub struct Vm {
    pub(crate) program: Arc<Program>,
    pub(crate) natives: Arc<NativeRegistry>,
    pub(crate) stack: Vec<Value>,
    pub(crate) context: Context,
    pub(crate) pc: usize,
    pub(crate) exit: bool,
    pub(crate) pause: bool,
    /// Choices registered by `response` since the last suspension.
    pub(crate) pending: Vec<PendingChoice>,
    /// Choices offered to the host by the current suspension.
    pub(crate) offered: Vec<PendingChoice>,
    pub(crate) sink: Box<dyn OutputSink + Send>,
    pub(crate) rng: StdRng,
}

impl Vm {
    /// Build a VM at the start of `program`. Every native the program names
    /// must be in `natives`.
    pub fn new(program: Arc<Program>, natives: Arc<NativeRegistry>) -> Result<Self, LoadError> {
        check_natives(&program, &natives)?;
        Ok(Vm {
            program,
            natives,
            stack: Vec::new(),
            context: Context::new(),
            pc: 0,
            exit: false,
            pause: false,
            pending: Vec::new(),
            offered: Vec::new(),
            sink: Box::new(Discard),
            rng: StdRng::from_entropy(),
        })
    }

    pub fn with_sink(mut self, sink: impl OutputSink + Send + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Make `randInt` deterministic.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Seed the context before the first instruction runs.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context.extend(context);
        self
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Execute the instruction at the program counter. Past the end of the
    /// program this terminates the VM and touches nothing else.
    pub fn tick(&mut self) -> Result<(), RuntimeError> {
        if self.exit {
            return Ok(());
        }
        let pc = self.pc;
        let program = Arc::clone(&self.program);
        let Some(instruction) = program.get(pc) else {
            tracing::debug!(pc, "left the program, exiting");
            self.exit = true;
            return Ok(());
        };

        match self.execute(&program, instruction, pc) {
            Ok(Some(target)) => self.pc = target,
            Ok(None) => self.pc = pc + 1,
            Err(err) => {
                tracing::debug!(pc, error = %err, "runtime error, exiting");
                self.exit = true;
                return Err(err);
            }
        }
        Ok(())
    }

    fn execute(
        &mut self,
        program: &Program,
        instruction: &Instruction,
        pc: usize,
    ) -> Result<Option<usize>, RuntimeError> {
        match instruction {
            Instruction::PushNumber(n) => self.stack.push(Value::Number(*n)),
            Instruction::PushString(s) => self.stack.push(Value::String(s.clone())),
            // Only entered through `jz`/`jgz` or a jump into its body.
            Instruction::OpenBlock => return Ok(program.block_end(pc).map(|end| end + 1)),
            Instruction::CloseBlock => {}
            Instruction::InvokeFunction(name) => {
                let native = self
                    .natives
                    .get(name)
                    .cloned()
                    .ok_or_else(|| RuntimeError::UndefinedFunction { name: name.clone() })?;
                let mut machine = Machine::new(self, name, pc);
                native(&mut machine)?;
                return Ok(machine.into_jump());
            }
        }
        Ok(None)
    }

    /// Tick until the VM exits or suspends.
    ///
    /// A VM already waiting on offered choices stays suspended; use
    /// [`Vm::resume`] to continue it.
    pub fn run(&mut self) -> Result<RunOutcome, RuntimeError> {
        if self.pause && !self.offered.is_empty() {
            return Ok(RunOutcome::Suspended(self.choices()));
        }
        self.pause = false;
        while !self.exit && !self.pause {
            self.tick()?;
        }
        Ok(self.outcome())
    }

    /// Continue a suspended VM with the offered choice `id`.
    ///
    /// An unknown id leaves the VM suspended, so the host may try again.
    pub fn resume(&mut self, id: usize) -> Result<RunOutcome, RuntimeError> {
        if self.exit || !self.pause || self.offered.is_empty() {
            return Err(RuntimeError::NotSuspended);
        }
        let choice = self
            .offered
            .get(id)
            .ok_or(RuntimeError::UnresolvedChoice { id })?;
        tracing::debug!(id, title = %choice.title, target = choice.program_counter, "resuming");
        self.stack.push(Value::from(choice.program_counter));
        self.offered.clear();
        self.pause = false;
        self.run()
    }

    /// Stop for good, dropping any pending choices.
    pub fn terminate(&mut self) {
        self.exit = true;
        self.pause = false;
        self.pending.clear();
        self.offered.clear();
    }

    fn outcome(&self) -> RunOutcome {
        if self.exit {
            RunOutcome::Completed
        } else {
            RunOutcome::Suspended(self.choices())
        }
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Choices currently offered to the host, with their ids.
    pub fn choices(&self) -> Vec<Choice> {
        self.offered
            .iter()
            .enumerate()
            .map(|(id, choice)| Choice {
                id,
                title: choice.title.clone(),
            })
            .collect()
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn program_counter(&self) -> usize {
        self.pc
    }

    pub fn is_exited(&self) -> bool {
        self.exit
    }

    pub fn is_paused(&self) -> bool {
        self.pause
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            stack: self.stack.clone(),
            context: self.context.clone(),
            program_list: self.program.instructions().to_vec(),
            label_map: self.program.labels().clone(),
            program_counter: self.pc,
            exit: self.exit,
            pause: self.pause,
            pending_choices: if self.pause {
                self.offered.clone()
            } else {
                self.pending.clone()
            },
        }
    }

    /// Rebuild a VM from a snapshot, relinking its program.
    pub fn from_snapshot(snapshot: Snapshot, natives: Arc<NativeRegistry>) -> Result<Self, LoadError> {
        let program = Arc::new(Program::new(snapshot.program_list, snapshot.label_map)?);
        let mut vm = Vm::new(program, natives)?;
        vm.stack = snapshot.stack;
        vm.context = snapshot.context;
        vm.pc = snapshot.program_counter;
        vm.exit = snapshot.exit;
        vm.pause = snapshot.pause;
        if snapshot.pause {
            vm.offered = snapshot.pending_choices;
        } else {
            vm.pending = snapshot.pending_choices;
        }
        Ok(vm)
    }
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("pc", &self.pc)
            .field("stack", &self.stack)
            .field("context", &self.context)
            .field("exit", &self.exit)
            .field("pause", &self.pause)
            .field("offered", &self.offered)
            .finish_non_exhaustive()
    }
}

fn check_natives(program: &Program, natives: &NativeRegistry) -> Result<(), LoadError> {
    match program.function_names().into_iter().find(|name| !natives.contains(name)) {
        Some(name) => Err(LoadError::UndefinedFunction {
            name: name.to_string(),
        }),
        None => Ok(()),
    }
}
