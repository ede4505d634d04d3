use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::instruction::Instruction;

/// Label name → instruction offset.
pub type LabelMap = BTreeMap<String, usize>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProgramError {
    #[error("`}}` at offset {at} has no matching `{{`")]
    UnmatchedClose { at: usize },
    #[error("`{{` at offset {at} is never closed")]
    UnclosedBlock { at: usize },
    #[error("label `{label}` points at offset {offset}, past the end of the program ({len} instructions)")]
    LabelOutOfRange {
        label: String,
        offset: usize,
        len: usize,
    },
}

/// A linked, read-only instruction stream.
///
/// Built once by [`Program::new`], which matches every `{` with its `}` in a
/// single forward scan. After that the program never changes, so one
/// `Arc<Program>` can back any number of VMs.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    instructions: Vec<Instruction>,
    labels: LabelMap,
    /// Offset of each `{` → offset of its matching `}`.
    block_ends: HashMap<usize, usize>,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>, labels: LabelMap) -> Result<Self, ProgramError> {
        let mut open: Vec<usize> = Vec::new();
        let mut block_ends = HashMap::new();

        for (offset, instruction) in instructions.iter().enumerate() {
            match instruction {
                Instruction::OpenBlock => open.push(offset),
                Instruction::CloseBlock => {
                    let start = open.pop().ok_or(ProgramError::UnmatchedClose { at: offset })?;
                    block_ends.insert(start, offset);
                }
                _ => {}
            }
        }
        if let Some(&at) = open.last() {
            return Err(ProgramError::UnclosedBlock { at });
        }

        let len = instructions.len();
        if let Some((label, &offset)) = labels.iter().find(|(_, offset)| **offset > len) {
            return Err(ProgramError::LabelOutOfRange {
                label: label.clone(),
                offset,
                len,
            });
        }

        Ok(Program {
            instructions,
            labels,
            block_ends,
        })
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn get(&self, offset: usize) -> Option<&Instruction> {
        self.instructions.get(offset)
    }

    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    /// Offset of the `}` matching the `{` at `open`.
    pub fn block_end(&self, open: usize) -> Option<usize> {
        self.block_ends.get(&open).copied()
    }

    /// All `(open, close)` pairs, ordered by opening offset.
    pub fn blocks(&self) -> Vec<(usize, usize)> {
        let mut pairs: Vec<(usize, usize)> =
            self.block_ends.iter().map(|(&open, &close)| (open, close)).collect();
        pairs.sort_unstable();
        pairs
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Names of every native the program invokes, deduplicated, in first-use order.
    pub fn function_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.instructions.iter().filter_map(Instruction::function_name) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    pub fn into_parts(self) -> (Vec<Instruction>, LabelMap) {
        (self.instructions, self.labels)
    }
}

/// Listing with labels interleaved: one instruction per line, nested blocks indented.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut by_offset: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
        for (name, &offset) in &self.labels {
            by_offset.entry(offset).or_default().push(name);
        }

        let mut depth = 0usize;
        for (offset, instruction) in self.instructions.iter().enumerate() {
            if let Some(names) = by_offset.get(&offset) {
                for name in names {
                    writeln!(f, "#{}", name)?;
                }
            }
            if matches!(instruction, Instruction::CloseBlock) {
                depth = depth.saturating_sub(1);
            }
            writeln!(f, "{:>6}  {}{}", offset, "  ".repeat(depth), instruction)?;
            if matches!(instruction, Instruction::OpenBlock) {
                depth += 1;
            }
        }
        if let Some(names) = by_offset.get(&self.instructions.len()) {
            for name in names {
                writeln!(f, "#{}", name)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoke(name: &str) -> Instruction {
        Instruction::from_function_name(name)
    }

    #[test]
    fn nested_blocks_are_matched() {
        let program = Program::new(
            vec![
                invoke("{"),
                invoke("{"),
                Instruction::PushNumber(1.0),
                invoke("}"),
                invoke("}"),
                invoke("{"),
                invoke("}"),
            ],
            LabelMap::new(),
        )
        .unwrap();
        assert_eq!(program.block_end(0), Some(4));
        assert_eq!(program.block_end(1), Some(3));
        assert_eq!(program.block_end(5), Some(6));
        assert_eq!(program.block_end(2), None);
        assert_eq!(program.blocks(), vec![(0, 4), (1, 3), (5, 6)]);
    }

    #[test]
    fn stray_close_is_rejected() {
        let err = Program::new(vec![invoke("}"), invoke("{")], LabelMap::new()).unwrap_err();
        assert_eq!(err, ProgramError::UnmatchedClose { at: 0 });
    }

    #[test]
    fn unclosed_open_is_rejected() {
        let err = Program::new(
            vec![invoke("{"), invoke("{"), invoke("}")],
            LabelMap::new(),
        )
        .unwrap_err();
        assert_eq!(err, ProgramError::UnclosedBlock { at: 0 });
    }

    #[test]
    fn labels_may_point_one_past_the_end() {
        let mut labels = LabelMap::new();
        labels.insert("end".into(), 1);
        assert!(Program::new(vec![invoke("exit")], labels.clone()).is_ok());

        labels.insert("beyond".into(), 2);
        assert!(matches!(
            Program::new(vec![invoke("exit")], labels),
            Err(ProgramError::LabelOutOfRange { offset: 2, .. })
        ));
    }

    #[test]
    fn function_names_are_deduplicated() {
        let program = Program::new(
            vec![invoke("emit"), invoke("goto"), invoke("emit"), invoke("{"), invoke("}")],
            LabelMap::new(),
        )
        .unwrap();
        assert_eq!(program.function_names(), vec!["emit", "goto"]);
    }
}
