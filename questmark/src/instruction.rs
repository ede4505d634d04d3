use std::fmt;

use serde::{Deserialize, Serialize};

/// Name under which the block-open instruction appears in serialized programs.
pub const OPEN_BLOCK: &str = "{";
/// Name under which the block-close instruction appears in serialized programs.
pub const CLOSE_BLOCK: &str = "}";

/// A single VM instruction.
///
/// Natives are referenced by name and resolved against the VM's registry;
/// the brace pair is structural and its jump targets are fixed when the
/// containing [`Program`](crate::program::Program) is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireInstruction", from = "WireInstruction")]
pub enum Instruction {
    PushNumber(f64),
    PushString(String),
    InvokeFunction(String),
    /// `{`: reached sequentially, skips to just past its matching `}`.
    OpenBlock,
    /// `}`: reached sequentially, ends an entered block.
    CloseBlock,
}

impl Instruction {
    /// Build the instruction for a bare identifier, recognizing the brace pair.
    pub fn from_function_name(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.as_str() {
            OPEN_BLOCK => Instruction::OpenBlock,
            CLOSE_BLOCK => Instruction::CloseBlock,
            _ => Instruction::InvokeFunction(name),
        }
    }

    pub fn invoke(name: &str) -> Self {
        Self::from_function_name(name)
    }

    /// The native this instruction calls, if any.
    pub fn function_name(&self) -> Option<&str> {
        match self {
            Instruction::InvokeFunction(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::PushNumber(n) => {
                if n.is_finite() && *n == n.floor() && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Instruction::PushString(s) => write!(f, "{:?}", s),
            Instruction::InvokeFunction(name) => write!(f, "{}", name),
            Instruction::OpenBlock => write!(f, "{}", OPEN_BLOCK),
            Instruction::CloseBlock => write!(f, "{}", CLOSE_BLOCK),
        }
    }
}

// ---------------------------------------------------------------------------
// Serialized form
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
#[serde(tag = "type")]
enum WireInstruction {
    #[serde(rename = "push-number-instruction")]
    PushNumber { value: f64 },
    #[serde(rename = "push-string-instruction")]
    PushString { value: String },
    #[serde(rename = "invoke-function-instruction", rename_all = "camelCase")]
    InvokeFunction { function_name: String },
}

impl From<Instruction> for WireInstruction {
    fn from(instruction: Instruction) -> Self {
        match instruction {
            Instruction::PushNumber(value) => WireInstruction::PushNumber { value },
            Instruction::PushString(value) => WireInstruction::PushString { value },
            Instruction::InvokeFunction(function_name) => {
                WireInstruction::InvokeFunction { function_name }
            }
            Instruction::OpenBlock => WireInstruction::InvokeFunction {
                function_name: OPEN_BLOCK.to_string(),
            },
            Instruction::CloseBlock => WireInstruction::InvokeFunction {
                function_name: CLOSE_BLOCK.to_string(),
            },
        }
    }
}

impl From<WireInstruction> for Instruction {
    fn from(wire: WireInstruction) -> Self {
        match wire {
            WireInstruction::PushNumber { value } => Instruction::PushNumber(value),
            WireInstruction::PushString { value } => Instruction::PushString(value),
            WireInstruction::InvokeFunction { function_name } => {
                Instruction::from_function_name(function_name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_uses_type_tags() {
        let json = serde_json::to_value(vec![
            Instruction::PushNumber(4.0),
            Instruction::PushString("north".into()),
            Instruction::InvokeFunction("goto".into()),
            Instruction::OpenBlock,
        ])
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"type": "push-number-instruction", "value": 4.0},
                {"type": "push-string-instruction", "value": "north"},
                {"type": "invoke-function-instruction", "functionName": "goto"},
                {"type": "invoke-function-instruction", "functionName": "{"},
            ])
        );
    }

    #[test]
    fn braces_are_recognized_when_reading() {
        let parsed: Vec<Instruction> = serde_json::from_str(
            r#"[{"type":"invoke-function-instruction","functionName":"}"},
                {"type":"push-number-instruction","value":7}]"#,
        )
        .unwrap();
        assert_eq!(parsed, vec![Instruction::CloseBlock, Instruction::PushNumber(7.0)]);
    }
}
