//! Component H: flow analysis — a static (non-executing) abstract
//! interpretation over an assembled [`crate::isa::Program`], recording
//! enter/follow-state sets per instruction and grouping the program into
//! basic blocks (`spec.md` §4.H).

use std::collections::{HashSet, VecDeque};

use thiserror::Error;

use crate::isa::{Behaviour, Condition, Instruction, Opcode, Operand, Program, ValueRegister};

/// Failure while walking the program's control flow: an unresolvable jump
/// target, surfaced as `CompileError::InternalInvariant` at the call site
/// (`spec.md` §7: "flow analysis saw an unresolvable label ... didn't
/// hold").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("instruction {pc} is a jump/jump-with-return with no resolvable target")]
    UnresolvableJump { pc: usize },
    #[error("instruction {pc} jumps to unknown label {label:?}")]
    UnknownLabel { pc: usize, label: String },
}

/// One control-flow edge, with whether it represents in-order fallthrough
/// (`spec.md` §4.H: "tagged `natural` when they represent in-order
/// fallthrough").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: usize,
    pub to: usize,
    pub natural: bool,
}

/// A maximal straight-line run of instructions: entered only at `start`,
/// left only at the last instruction before `end` (exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub start: usize,
    pub end: usize,
}

/// The result of one flow-analysis pass: per-instruction predecessor/
/// successor edges and the block partition they induce.
#[derive(Debug, Clone, Default)]
pub struct FlowAnalysis {
    /// Known return addresses (⊥ = `None`, "unknown") that have been
    /// observed entering each instruction, merged to `{None}` the moment
    /// two different known addresses collide (the "least-known state"
    /// merge rule).
    return_addresses: Vec<HashSet<Option<usize>>>,
    successors: Vec<Vec<Edge>>,
    predecessors: Vec<Vec<Edge>>,
    blocks: Vec<Block>,
}

/// `j ra` — returning through the call stack's saved address rather than a
/// named label. `Operand::from_str("ra")` resolves to
/// `ValueRegister(Ra)`, not `Name`, so this can't be told apart from an
/// ordinary unconditional jump by `label_operand()` alone; flow analysis
/// must special-case it as a call-stack return rather than error on the
/// missing label.
pub(crate) fn is_stack_return(instr: &Instruction) -> bool {
    instr.opcode() == Opcode::J && matches!(instr.operands().first(), Some(Operand::ValueRegister(ValueRegister::Ra)))
}

fn merge_return_address(set: &mut HashSet<Option<usize>>, ra: Option<usize>) -> bool {
    if set.contains(&None) {
        return false;
    }
    if ra.is_none() && !set.is_empty() {
        let changed = set.iter().any(|r| r.is_some());
        set.clear();
        set.insert(None);
        return changed;
    }
    set.insert(ra)
}

impl FlowAnalysis {
    /// Run the analysis starting at instruction 0 with return address ⊥
    /// (`spec.md` §4.H). Arrays are sized `len + 1`: index `len` is the
    /// one-past-the-end position a trailing label (e.g. a method's `_end` or
    /// the driver's `end`) can legally be jumped to — a terminal state with
    /// no successors, not an instruction to decode.
    pub fn analyze(program: &Program) -> Result<Self, FlowError> {
        let len = program.len();
        let mut return_addresses = vec![HashSet::new(); len + 1];
        let mut successors = vec![Vec::new(); len + 1];
        let mut predecessors = vec![Vec::new(); len + 1];
        let mut edge_seen: HashSet<(usize, usize, bool)> = HashSet::new();

        let mut worklist: VecDeque<(usize, Option<usize>)> = VecDeque::new();
        if len > 0 {
            merge_return_address(&mut return_addresses[0], None);
            worklist.push_back((0, None));
        }

        while let Some((pc, ra)) = worklist.pop_front() {
            if pc >= len {
                // Terminal: a trailing one-past-the-end label has no body
                // to step through.
                continue;
            }
            for edge in Self::step(program, pc, ra)? {
                if edge_seen.insert((edge.from, edge.to, edge.natural)) {
                    successors[edge.from].push(edge);
                    predecessors[edge.to].push(edge);
                }
                let target_ra = Self::ra_carried_into(program, pc, ra, edge.to);
                if merge_return_address(&mut return_addresses[edge.to], target_ra) {
                    worklist.push_back((edge.to, target_ra));
                } else if !return_addresses[edge.to].is_empty() && !worklist.contains(&(edge.to, target_ra)) {
                    // Already merged to an equal-or-more-precise state;
                    // nothing new to propagate from here.
                }
            }
        }

        let mut analysis = Self {
            return_addresses,
            successors,
            predecessors,
            blocks: Vec::new(),
        };
        analysis.blocks = analysis.compute_blocks(len);
        Ok(analysis)
    }

    fn ra_carried_into(program: &Program, from: usize, from_ra: Option<usize>, to: usize) -> Option<usize> {
        let instr = &program.instructions()[from];
        if matches!(instr.opcode().behaviour(), Behaviour::JumpWithReturn) && to != from + 1 {
            Some(from + 1)
        } else {
            from_ra
        }
    }

    /// Successor edges out of `pc` under return-address context `ra`
    /// (`spec.md` §4.H's per-state successor enumeration).
    fn step(program: &Program, pc: usize, ra: Option<usize>) -> Result<Vec<Edge>, FlowError> {
        let instr = &program.instructions()[pc];
        let len = program.len();
        let next = pc + 1;
        let mut out = Vec::new();

        let behaviour = instr.opcode().behaviour();
        let is_jump = matches!(behaviour, Behaviour::Jump | Behaviour::JumpWithReturn);

        if is_jump {
            if is_stack_return(instr) {
                if let Some(target) = ra {
                    out.push(Edge { from: pc, to: target, natural: false });
                } else {
                    // Worst case: every instruction following a
                    // jump-with-return in the program is a possible return
                    // site.
                    for (i, candidate) in program.instructions().iter().enumerate() {
                        if matches!(candidate.opcode().behaviour(), Behaviour::JumpWithReturn) && i + 1 < len {
                            out.push(Edge { from: pc, to: i + 1, natural: false });
                        }
                    }
                }
            } else {
                let label = instr.label_operand().ok_or(FlowError::UnresolvableJump { pc })?;
                let target = program.label_index(label).ok_or_else(|| FlowError::UnknownLabel {
                    pc,
                    label: label.to_owned(),
                })?;
                out.push(Edge {
                    from: pc,
                    to: target,
                    natural: target == next,
                });
            }
            if instr.opcode().condition() != Condition::Always && next < len {
                out.push(Edge { from: pc, to: next, natural: true });
            }
        } else if next < len {
            out.push(Edge { from: pc, to: next, natural: true });
        }

        Ok(out)
    }

    fn compute_blocks(&self, len: usize) -> Vec<Block> {
        if len == 0 {
            return Vec::new();
        }
        let mut starts = HashSet::new();
        starts.insert(0);
        for i in 0..len {
            let preds = &self.predecessors[i];
            let is_single_natural_fallthrough = preds.len() == 1
                && preds[0].natural
                && preds[0].from + 1 == i
                && self.successors[preds[0].from].len() == 1;
            if !is_single_natural_fallthrough {
                starts.insert(i);
            }
        }
        let mut sorted: Vec<usize> = starts.into_iter().collect();
        sorted.sort_unstable();
        sorted
            .iter()
            .enumerate()
            .map(|(i, &start)| Block {
                start,
                end: sorted.get(i + 1).copied().unwrap_or(len),
            })
            .collect()
    }

    /// Successor edges recorded leaving instruction `pc`.
    pub fn successors(&self, pc: usize) -> &[Edge] {
        &self.successors[pc]
    }

    /// Predecessor edges recorded entering instruction `pc`.
    pub fn predecessors(&self, pc: usize) -> &[Edge] {
        &self.predecessors[pc]
    }

    /// The basic-block partition induced by this analysis.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// The merged return-address knowledge reaching `pc`: `None` inside the
    /// set means ⊥ (unknown/merged); any concrete addresses are exact.
    pub fn return_addresses_at(&self, pc: usize) -> &HashSet<Option<usize>> {
        &self.return_addresses[pc]
    }

    /// True if `pc` is unreachable from the entry instruction — its enter-set
    /// is empty (`spec.md` §4.I's `ControlFlow` pass drops these blocks).
    pub fn is_unreachable(&self, pc: usize) -> bool {
        pc != 0 && self.predecessors[pc].is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::operand::ValueRegister as VR;
    use crate::isa::{Instruction as Instr, Opcode as Op, Operand as Opd};

    fn push(p: &mut Program, op: Op, operands: Vec<Opd>) -> usize {
        p.push(Instr::new(0, op, operands))
    }

    #[test]
    fn straight_line_program_is_one_block() {
        let mut p = Program::blank();
        push(&mut p, Op::Yield, vec![]);
        push(&mut p, Op::Yield, vec![]);
        push(&mut p, Op::Yield, vec![]);
        let flow = FlowAnalysis::analyze(&p).unwrap();
        assert_eq!(flow.blocks(), &[Block { start: 0, end: 3 }]);
    }

    #[test]
    fn unconditional_jump_starts_a_new_block_at_its_target() {
        let mut p = Program::blank();
        push(&mut p, Op::J, vec![Opd::Name("target".into())]);
        push(&mut p, Op::Yield, vec![]);
        push(&mut p, Op::Yield, vec![]);
        p.set_label("target", 2);
        let flow = FlowAnalysis::analyze(&p).unwrap();
        assert_eq!(
            flow.blocks(),
            &[Block { start: 0, end: 1 }, Block { start: 1, end: 2 }, Block { start: 2, end: 3 }]
        );
        assert!(flow.is_unreachable(1));
    }

    #[test]
    fn conditional_branch_has_both_fallthrough_and_target_successors() {
        let mut p = Program::blank();
        push(
            &mut p,
            Op::Beq,
            vec![
                Opd::ValueRegister(VR::Indexed(0)),
                Opd::ValueRegister(VR::Indexed(1)),
                Opd::Name("target".into()),
            ],
        );
        push(&mut p, Op::Yield, vec![]);
        push(&mut p, Op::Yield, vec![]);
        p.set_label("target", 2);
        let flow = FlowAnalysis::analyze(&p).unwrap();
        let succ = flow.successors(0);
        assert_eq!(succ.len(), 2);
        assert!(succ.iter().any(|e| e.to == 1));
        assert!(succ.iter().any(|e| e.to == 2));
    }

    #[test]
    fn unresolvable_jump_is_an_error() {
        let mut p = Program::blank();
        push(&mut p, Op::J, vec![Opd::Name("nowhere".into())]);
        let err = FlowAnalysis::analyze(&p).unwrap_err();
        assert!(matches!(err, FlowError::UnknownLabel { .. }));
    }

    #[test]
    fn jal_then_stack_return_resolves_to_the_call_site_successor() {
        let mut p = Program::blank();
        push(&mut p, Op::Jal, vec![Opd::Name("callee".into())]);
        push(&mut p, Op::Yield, vec![]);
        push(&mut p, Op::J, vec![Opd::ValueRegister(VR::Ra)]);
        p.set_label("callee", 2);
        let flow = FlowAnalysis::analyze(&p).unwrap();
        let succ = flow.successors(2);
        assert_eq!(succ, &[Edge { from: 2, to: 1, natural: false }]);
    }
}
