use super::{Machine, NativeRegistry};
use crate::error::RuntimeError;
use crate::value::Value;
use crate::vm::PendingChoice;

const OPTION_FLAG_PREFIX: &str = "optionEnabled_";

/// Builtins plus the natives compiled stories call: `emit`, `response`,
/// `getResponse`, and the legacy option-flag family.
pub fn quest_natives() -> NativeRegistry {
    NativeRegistry::builtin()
        .with("emit", |m| {
            let value = m.pop()?;
            m.emit(value);
            Ok(())
        })
        .with("response", |m| {
            let offset = m.pop_number()?;
            let title = m.pop_string()?;
            if offset < 0.0 || offset.fract() != 0.0 {
                return Err(m.out_of_range(offset));
            }
            m.offer(PendingChoice {
                title,
                program_counter: offset as usize,
            });
            Ok(())
        })
        .with("getResponse", |m| {
            m.suspend();
            Ok(())
        })
        .with("optionEnabled", option_enabled)
        .with("optionDisabled", option_disabled)
        .with("enableOption", |m| set_option_flag(m, "enableOption", 1.0))
        .with("disableOption", |m| set_option_flag(m, "disableOption", 0.0))
}

// ---------------------------------------------------------------------------
// Legacy option flags: superseded by `@once` and preconditions
// ---------------------------------------------------------------------------

fn option_flag(m: &mut Machine<'_>, native: &str) -> Result<String, RuntimeError> {
    tracing::warn!(native, "deprecated native; use `@once` or a precondition");
    let name = m.pop_string()?;
    Ok(format!("{}{}", OPTION_FLAG_PREFIX, name))
}

/// Pushes the flag, enabling it on first use.
fn option_enabled(m: &mut Machine<'_>) -> Result<(), RuntimeError> {
    let key = option_flag(m, "optionEnabled")?;
    let value = m
        .context_mut()
        .entry(key)
        .or_insert(Value::Number(1.0))
        .clone();
    m.push(value);
    Ok(())
}

/// Pushes the negated flag, enabling it on first use.
fn option_disabled(m: &mut Machine<'_>) -> Result<(), RuntimeError> {
    let key = option_flag(m, "optionDisabled")?;
    let value = m.context_mut().entry(key).or_insert(Value::Number(1.0)).clone();
    let disabled = value != Value::Number(1.0);
    m.push(Value::flag(disabled));
    Ok(())
}

fn set_option_flag(m: &mut Machine<'_>, native: &str, value: f64) -> Result<(), RuntimeError> {
    let key = option_flag(m, native)?;
    m.context_mut().insert(key, Value::Number(value));
    Ok(())
}
