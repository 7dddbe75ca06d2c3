//! Instructions, labels and the program container (`spec.md` §3, §4.A).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::opcode::Opcode;
use super::operand::{Operand, OperandParseError};

/// One emitted IC10 instruction, with the SBIL source-line index it was
/// derived from (preserved so [`crate::flow`] and the optimiser can
/// normalise relative jump offsets back to it).
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    source_line: usize,
    opcode: Opcode,
    operands: Vec<Operand>,
}

impl Instruction {
    /// Build an instruction, asserting the operand vector matches the
    /// opcode's fixed arity.
    pub fn new(source_line: usize, opcode: Opcode, operands: Vec<Operand>) -> Self {
        debug_assert_eq!(
            operands.len(),
            opcode.arity(),
            "{} expects {} operands, got {}",
            opcode.mnemonic(),
            opcode.arity(),
            operands.len()
        );
        Self {
            source_line,
            opcode,
            operands,
        }
    }

    /// The SBIL instruction index this fragment was compiled from.
    pub const fn source_line(&self) -> usize {
        self.source_line
    }

    /// The opcode.
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// The fixed-arity operand vector.
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// Name operand referenced by a jump-family instruction, if any. Used by
    /// [`crate::flow`] to resolve jump targets and by the optimiser to
    /// rewrite/rename labels.
    pub fn label_operand(&self) -> Option<&str> {
        use super::opcode::Behaviour::*;
        match self.opcode.behaviour() {
            Jump | JumpWithReturn => self.operands.iter().rev().find_map(|op| match op {
                Operand::Name(n) => Some(n.as_str()),
                _ => None,
            }),
            _ => None,
        }
    }

    /// Rewrite this instruction's label operand in place (used by label
    /// renaming / chained-label collapsing in the optimiser).
    pub fn rename_label(&mut self, from: &str, to: &str) {
        for op in &mut self.operands {
            if let Operand::Name(n) = op {
                if n == from {
                    *n = to.to_owned();
                }
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode.mnemonic())?;
        for op in &self.operands {
            write!(f, " {op}")?;
        }
        Ok(())
    }
}

/// A named position in a [`Program`]. Names are unique per program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    name: String,
    instruction_index: usize,
}

impl Label {
    /// Construct a label at the given instruction index.
    pub fn new(name: impl Into<String>, instruction_index: usize) -> Self {
        Self {
            name: name.into(),
            instruction_index,
        }
    }

    /// The label's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instruction index the label points at.
    pub const fn instruction_index(&self) -> usize {
        self.instruction_index
    }
}

/// `Program::parse` failure — malformed text the driver's own text
/// assembly should never itself produce, but flagged rather than panicked
/// on since a hand-edited or externally-assembled fragment could hit it.
#[derive(Debug, Error, PartialEq)]
pub enum ProgramParseError {
    #[error("line {line}: unknown mnemonic {mnemonic:?}")]
    UnknownMnemonic { line: usize, mnemonic: String },
    #[error("line {line}: {mnemonic} expects {expected} operands, found {found}")]
    ArityMismatch {
        line: usize,
        mnemonic: String,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: {source}")]
    Operand { line: usize, source: OperandParseError },
}

/// A sequence of instructions plus a label table. `Program::blank()` is the
/// identity element for the concatenation monoid the optimiser's
/// slice/splice/append operations rely on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    instructions: Vec<Instruction>,
    labels: HashMap<String, usize>,
}

impl Program {
    /// The empty program — identity for [`Program::append`].
    pub fn blank() -> Self {
        Self::default()
    }

    /// Instructions, in order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Mutable access to the instruction vector, for passes that rewrite in
    /// place (e.g. label renaming).
    pub fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.instructions
    }

    /// Push an instruction, returning its index.
    pub fn push(&mut self, instruction: Instruction) -> usize {
        let index = self.instructions.len();
        self.instructions.push(instruction);
        index
    }

    /// Declare a label at the given instruction index. Panics if the name
    /// is already taken (labels are unique per program — a caller that
    /// wants to merge two labels should rename first).
    pub fn set_label(&mut self, name: impl Into<String>, instruction_index: usize) {
        let name = name.into();
        let prior = self.labels.insert(name.clone(), instruction_index);
        debug_assert!(prior.is_none() || prior == Some(instruction_index), "label {name} redefined");
    }

    /// The label at instruction index, if this index is labelled. When more
    /// than one name aliases the same index, returns the lexicographically
    /// first (deterministic, but arbitrary) — callers that must see every
    /// alias (rendering, the driver's `main`/`ctor` dual-labelling) use
    /// [`Program::labels_at`] instead.
    pub fn label_at(&self, instruction_index: usize) -> Option<&str> {
        self.labels_at(instruction_index).next()
    }

    /// Every label name pointing at `instruction_index`, sorted for
    /// deterministic output. Multiple names can alias the same index (the
    /// driver labels a method both `main`/`ctor` and its qualified name) —
    /// the optimiser's chained-label pass is a different case (two
    /// *consecutive* indices, not two names on one index) and doesn't
    /// collapse these.
    pub fn labels_at(&self, instruction_index: usize) -> impl Iterator<Item = &str> {
        let mut names: Vec<&str> = self
            .labels
            .iter()
            .filter(|(_, idx)| **idx == instruction_index)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names.into_iter()
    }

    /// Resolve a label by name to its instruction index.
    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    /// All labels as `(name, index)` pairs.
    pub fn labels(&self) -> impl Iterator<Item = (&str, usize)> {
        self.labels.iter().map(|(n, i)| (n.as_str(), *i))
    }

    /// Remove a label by name.
    pub fn remove_label(&mut self, name: &str) {
        self.labels.remove(name);
    }

    /// Rename every operand reference and the label table entry from `from`
    /// to `to`. Used by chained-label collapsing.
    pub fn rename_label(&mut self, from: &str, to: &str) {
        if let Some(index) = self.labels.remove(from) {
            self.labels.insert(to.to_owned(), index);
        }
        for instr in &mut self.instructions {
            instr.rename_label(from, to);
        }
    }

    /// Concatenate another program after this one, shifting its label
    /// indices by this program's current length. `Program::blank()` is the
    /// identity.
    pub fn append(&mut self, other: Program) {
        let offset = self.instructions.len();
        for (name, index) in other.labels {
            self.labels.insert(name, index + offset);
        }
        self.instructions.extend(other.instructions);
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True if there are no instructions.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Parse IC10 text back into a `Program` — the driver's re-ingestion
    /// step between per-method text assembly ([`crate::output::OutputWriter`])
    /// and flow analysis/optimisation (`spec.md` §4.G, §4.H). Blank lines and
    /// `#`-prefixed comments are skipped; a `name:` line attaches a label to
    /// whichever instruction is pushed next, so any run of consecutive
    /// labels collapses onto the same instruction index; labels trailing
    /// the last instruction point one-past-the-end (`render`'s mirror-image
    /// handling of a method's `_end` label).
    pub fn parse(text: &str) -> Result<Self, ProgramParseError> {
        let mut program = Self::blank();
        let mut pending_labels: Vec<String> = Vec::new();

        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_suffix(':') {
                pending_labels.push(name.to_owned());
                continue;
            }

            let mut parts = line.split_whitespace();
            let mnemonic = parts.next().expect("non-empty line has a first token");
            let opcode = Opcode::decode_mnemonic(mnemonic).ok_or_else(|| ProgramParseError::UnknownMnemonic {
                line: line_no + 1,
                mnemonic: mnemonic.to_owned(),
            })?;
            let operands = parts
                .map(Operand::from_str)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|source| ProgramParseError::Operand { line: line_no + 1, source })?;
            if operands.len() != opcode.arity() {
                return Err(ProgramParseError::ArityMismatch {
                    line: line_no + 1,
                    mnemonic: mnemonic.to_owned(),
                    expected: opcode.arity(),
                    found: operands.len(),
                });
            }

            let index = program.push(Instruction::new(line_no, opcode, operands));
            for name in pending_labels.drain(..) {
                program.set_label(name, index);
            }
        }

        // Labels with nothing after them point one past the last
        // instruction, mirroring `render`'s trailing-label handling.
        for name in pending_labels.drain(..) {
            program.set_label(name, program.len());
        }

        Ok(program)
    }

    /// Render the whole program as IC10 text, one instruction per line,
    /// with `name:` lines emitted immediately before the instruction they
    /// label.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, instr) in self.instructions.iter().enumerate() {
            for label in self.labels_at(i) {
                out.push_str(label);
                out.push_str(":\n");
            }
            out.push_str(&instr.to_string());
            out.push('\n');
        }
        // A label pointing one-past-the-end (e.g. a method's `_end` label)
        // has no instruction to attach to; emit it as a trailing line.
        for label in self.labels_at(self.instructions.len()) {
            out.push_str(label);
            out.push_str(":\n");
        }
        out
    }
}
