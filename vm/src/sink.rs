use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::value::Value;

/// Receives values passed to `emit`, in emission order.
pub trait OutputSink {
    fn emit(&mut self, value: Value);
}

impl<F> OutputSink for F
where
    F: FnMut(Value),
{
    fn emit(&mut self, value: Value) {
        self(value)
    }
}

/// Drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl OutputSink for Discard {
    fn emit(&mut self, _value: Value) {}
}

/// Collects emitted values. Clones share one buffer, so a clone kept by the
/// host sees everything the VM's copy receives.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    values: Arc<Mutex<Vec<Value>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> Vec<Value> {
        self.lock().clone()
    }

    /// Everything emitted so far, concatenated.
    pub fn text(&self) -> String {
        self.lock().iter().map(Value::to_string).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OutputSink for Transcript {
    fn emit(&mut self, value: Value) {
        self.lock().push(value);
    }
}
