//! The IC10 opcode table: mnemonic, arity, operand-kind expectations, and the
//! `(behaviour, condition)` algebra the rest of the compiler reasons with
//! instead of pattern-matching on mnemonic strings.

use std::fmt;

use super::operand::OperandKind;

/// The branch/comparison condition an opcode tests, if any.
///
/// The `*Z` variants compare against an implicit zero operand (as IC10's
/// `beqz`/`bgez`/... mnemonics do) rather than taking an explicit RHS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum Condition {
    /// No condition: always taken / always applies.
    Always,
    Eq,
    EqZ,
    Gt,
    GtZ,
    Ge,
    GeZ,
    Lt,
    LtZ,
    Le,
    LeZ,
    Ne,
    NeZ,
    /// Approximately equal (`bap`).
    Approx,
    ApproxZ,
    /// Not approximately equal (`bna`).
    NotApprox,
    NotApproxZ,
    /// Device-is-set predicate (`dse`).
    DeviceSet,
    DeviceSetZ,
    /// Device-is-not-set predicate (`dns`).
    DeviceNotSet,
    DeviceNotSetZ,
}

/// The structural category of an opcode, independent of its mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum Behaviour {
    /// Unconditional or conditional relative/absolute jump, no return address saved.
    Jump,
    /// Jump that saves a return address (`jal`, and the `*al` branch forms).
    JumpWithReturn,
    /// Relative jump encoded as an instruction offset (`ji`-style, folded
    /// into `Jump`/`JumpWithReturn` by [`Opcode::is_relative`]).
    RelativeJump,
    /// Sets a destination register from a pure function of its operands.
    SetRegister,
    /// Arithmetic/logic opcode writing a register result.
    Arithmetic,
    /// Compiler/assembler meta-instruction (`alias`, `define`, `label`).
    Meta,
    /// Call-stack traffic (`push`, `pop`).
    Stack,
    /// Device I/O (`l`, `s`, `ls`, `lb`, `sb`).
    DeviceInterop,
    /// Timing/yielding (`yield`, `sleep`).
    Timing,
    /// Anything else (math intrinsics, `hcf`, `select`, trigonometric ops).
    Other,
}

/// Table entry describing one IC10 opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum Opcode {
    // -- arithmetic / logic -------------------------------------------------
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Nor,
    Not,
    Sll,
    Srl,
    Abs,
    Max,
    Min,
    Trunc,
    Ceil,
    Floor,
    Round,
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    // -- register/data movement ---------------------------------------------
    Move,
    // -- set-from-comparison -------------------------------------------------
    Seq,
    SeqZ,
    Sgt,
    SgtZ,
    Sge,
    SgeZ,
    Slt,
    SltZ,
    Sle,
    SleZ,
    Sne,
    SneZ,
    Sap,
    SapZ,
    Sna,
    SnaZ,
    Sdse,
    SdseZ,
    Sdns,
    SdnsZ,
    // -- branches -------------------------------------------------------------
    Beq,
    BeqZ,
    Bgt,
    BgtZ,
    Bge,
    BgeZ,
    Blt,
    BltZ,
    Ble,
    BleZ,
    Bne,
    BneZ,
    Bap,
    BapZ,
    Bna,
    BnaZ,
    Bdse,
    BdseZ,
    Bdns,
    BdnsZ,
    J,
    // -- branch-and-link / call -------------------------------------------------
    BeqAl,
    BneAl,
    Jal,
    // -- stack ------------------------------------------------------------------
    Push,
    Pop,
    Peek,
    // -- device I/O ---------------------------------------------------------------
    L,
    S,
    Ls,
    Lb,
    Sb,
    // -- timing / misc --------------------------------------------------------------
    Yield,
    Sleep,
    Hcf,
    Select,
    // -- meta ----------------------------------------------------------------------
    Alias,
    Define,
}

impl Opcode {
    /// The canonical lower-case mnemonic, as it appears in emitted IC10 text.
    pub const fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Mod => "mod",
            And => "and",
            Or => "or",
            Xor => "xor",
            Nor => "nor",
            Not => "not",
            Sll => "sll",
            Srl => "srl",
            Abs => "abs",
            Max => "max",
            Min => "min",
            Trunc => "trunc",
            Ceil => "ceil",
            Floor => "floor",
            Round => "round",
            Exp => "exp",
            Log => "log",
            Sqrt => "sqrt",
            Sin => "sin",
            Cos => "cos",
            Tan => "tan",
            Asin => "asin",
            Acos => "acos",
            Atan => "atan",
            Move => "move",
            Seq => "seq",
            SeqZ => "seqz",
            Sgt => "sgt",
            SgtZ => "sgtz",
            Sge => "sge",
            SgeZ => "sgez",
            Slt => "slt",
            SltZ => "sltz",
            Sle => "sle",
            SleZ => "slez",
            Sne => "sne",
            SneZ => "snez",
            Sap => "sap",
            SapZ => "sapz",
            Sna => "sna",
            SnaZ => "snaz",
            Sdse => "sdse",
            SdseZ => "sdsez",
            Sdns => "sdns",
            SdnsZ => "sdnsz",
            Beq => "beq",
            BeqZ => "beqz",
            Bgt => "bgt",
            BgtZ => "bgtz",
            Bge => "bge",
            BgeZ => "bgez",
            Blt => "blt",
            BltZ => "bltz",
            Ble => "ble",
            BleZ => "blez",
            Bne => "bne",
            BneZ => "bnez",
            Bap => "bap",
            BapZ => "bapz",
            Bna => "bna",
            BnaZ => "bnaz",
            Bdse => "bdse",
            BdseZ => "bdsez",
            Bdns => "bdns",
            BdnsZ => "bdnsz",
            J => "j",
            BeqAl => "beqal",
            BneAl => "bneal",
            Jal => "jal",
            Push => "push",
            Pop => "pop",
            Peek => "peek",
            L => "l",
            S => "s",
            Ls => "ls",
            Lb => "lb",
            Sb => "sb",
            Yield => "yield",
            Sleep => "sleep",
            Hcf => "hcf",
            Select => "select",
            Alias => "alias",
            Define => "define",
        }
    }

    /// Number of operands this opcode takes.
    pub fn arity(self) -> usize {
        self.operand_kinds().len()
    }

    /// Expected operand kinds, in order, used for validation and pretty
    /// printing (not for parsing — the operand parser is total and doesn't
    /// consult this table).
    pub fn operand_kinds(self) -> &'static [OperandKind] {
        use OperandKind::*;
        use Opcode::*;
        match self {
            Add | Sub | Mul | Div | Mod | And | Or | Xor | Nor | Sll | Srl | Max | Min | Exp | Log | Atan => {
                &[ValueRegister, ValueRegister, ValueRegister]
            }
            Not | Abs | Trunc | Ceil | Floor | Round | Sqrt | Sin | Cos | Tan | Asin | Acos | Move => {
                &[ValueRegister, ValueRegister]
            }
            Seq | Sgt | Sge | Slt | Sle | Sne | Sap | Sna => {
                &[ValueRegister, ValueRegister, ValueRegister]
            }
            // Device-set/not-set predicates are inherently unary (there is no
            // second operand to compare against): both the plain and `Z`
            // forms take just `dest, device`.
            Sdse | Sdns | SdseZ | SdnsZ => &[ValueRegister, ValueRegister],
            SeqZ | SgtZ | SgeZ | SltZ | SleZ | SneZ | SapZ | SnaZ => &[ValueRegister, ValueRegister],
            Beq | Bgt | Bge | Blt | Ble | Bne | Bap | Bna | BeqAl | BneAl => {
                &[ValueRegister, ValueRegister, Name]
            }
            Bdse | Bdns | BdseZ | BdnsZ => &[ValueRegister, Name],
            BeqZ | BgtZ | BgeZ | BltZ | BleZ | BneZ | BapZ | BnaZ => &[ValueRegister, Name],
            J | Jal => &[Name],
            Push | Peek => &[ValueRegister],
            Pop => &[ValueRegister],
            L => &[ValueRegister, Name, Name],
            S => &[Name, Name, ValueRegister],
            Ls => &[ValueRegister, Name, Number(), Name],
            Lb => &[ValueRegister, Name, Name, Name, Number()],
            Sb => &[Name, Name, ValueRegister],
            Yield | Hcf => &[],
            Sleep => &[ValueRegister],
            Select => &[ValueRegister, ValueRegister, ValueRegister, ValueRegister],
            Alias => &[Name, Name],
            Define => &[Name, Number()],
        }
    }

    /// The [`Condition`] this opcode tests, for branch/comparison opcodes;
    /// [`Condition::Always`] otherwise.
    pub const fn condition(self) -> Condition {
        use Condition::*;
        use Opcode::*;
        match self {
            Seq | Beq | BeqAl => Eq,
            SeqZ | BeqZ => EqZ,
            Sgt | Bgt => Gt,
            SgtZ | BgtZ => GtZ,
            Sge | Bge => Ge,
            SgeZ | BgeZ => GeZ,
            Slt | Blt => Lt,
            SltZ | BltZ => LtZ,
            Sle | Ble => Le,
            SleZ | BleZ => LeZ,
            Sne | Bne | BneAl => Ne,
            SneZ | BneZ => NeZ,
            Sap | Bap => Approx,
            SapZ | BapZ => ApproxZ,
            Sna | Bna => NotApprox,
            SnaZ | BnaZ => NotApproxZ,
            Sdse | Bdse => DeviceSet,
            SdseZ | BdseZ => DeviceSetZ,
            Sdns | Bdns => DeviceNotSet,
            SdnsZ | BdnsZ => DeviceNotSetZ,
            _ => Always,
        }
    }

    /// The [`Behaviour`] category of this opcode.
    pub const fn behaviour(self) -> Behaviour {
        use Behaviour::*;
        use Opcode::*;
        match self {
            J | Beq | BeqZ | Bgt | BgtZ | Bge | BgeZ | Blt | BltZ | Ble | BleZ | Bne | BneZ | Bap | BapZ | Bna
            | BnaZ | Bdse | BdseZ | Bdns | BdnsZ => Jump,
            Jal | BeqAl | BneAl => JumpWithReturn,
            Add | Sub | Mul | Div | Mod | And | Or | Xor | Nor | Not | Sll | Srl | Abs | Max | Min | Trunc | Ceil
            | Floor | Round | Exp | Log | Sqrt | Sin | Cos | Tan | Asin | Acos | Atan => Arithmetic,
            Move | Seq | SeqZ | Sgt | SgtZ | Sge | SgeZ | Slt | SltZ | Sle | SleZ | Sne | SneZ | Sap | SapZ | Sna
            | SnaZ | Sdse | SdseZ | Sdns | SdnsZ => SetRegister,
            Push | Pop | Peek => Stack,
            L | S | Ls | Lb | Sb => DeviceInterop,
            Yield | Sleep => Timing,
            Alias | Define => Meta,
            Hcf | Select => Other,
        }
    }

    /// True for opcodes whose target is a relative instruction offset
    /// rather than a label name (none of the hand-modeled IC10 mnemonics
    /// above use relative encoding directly — all branches take label
    /// operands — but [`crate::flow`] still distinguishes jump behaviours
    /// via this hook so a relative-offset dialect could be added without
    /// touching callers).
    pub const fn is_relative(self) -> bool {
        false
    }

    /// Look up an opcode by its exact mnemonic text.
    pub fn decode_mnemonic(text: &str) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|op| op.mnemonic() == text)
    }

    /// Look up the opcode for a `(behaviour, condition)` pair. The data
    /// model invariant (`spec.md` §3) guarantees at most one match among the
    /// conditional opcode families (branches and set-from-comparison); for
    /// unconditional behaviours (arithmetic, meta, stack, ...) many opcodes
    /// share `Condition::Always` and this intentionally returns the first
    /// match — callers that need an unconditional opcode look it up by
    /// mnemonic instead. See `behaviour_condition_is_injective_for_conditionals`.
    pub fn decode(behaviour: Behaviour, condition: Condition) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|op| op.behaviour() == behaviour && op.condition() == condition)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

// `Number` conflicts with the `Number(f64)` variant name used by `Operand`;
// `OperandKind::Number` has no payload, so this tiny shim keeps the match
// arms above readable without importing both.
#[allow(non_snake_case)]
const fn Number() -> OperandKind {
    OperandKind::Number
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use strum::IntoEnumIterator;

    #[test]
    fn mnemonics_are_unique() {
        let mut seen = HashSet::new();
        for op in Opcode::iter() {
            assert!(seen.insert(op.mnemonic()), "duplicate mnemonic {}", op.mnemonic());
        }
    }

    #[test]
    fn mnemonic_round_trips_through_decode() {
        for op in Opcode::iter() {
            assert_eq!(Opcode::decode_mnemonic(op.mnemonic()), Some(op));
        }
    }

    /// §3 invariant: for any `(behaviour, condition)` at most one opcode,
    /// scoped to the conditional opcode families (branches and
    /// set-from-comparison) where `Condition` is meaningful. Unconditional
    /// families (arithmetic, meta, stack, device I/O, timing, other) all
    /// carry `Condition::Always` and are intentionally many-to-one — they're
    /// looked up by mnemonic, not by this algebra.
    #[test]
    fn behaviour_condition_is_injective_for_conditionals() {
        let mut seen = HashSet::new();
        for op in Opcode::iter() {
            if op.condition() == Condition::Always {
                continue;
            }
            let key = (op.behaviour(), op.condition());
            assert!(
                seen.insert(key),
                "behaviour/condition collision at {:?} for {}",
                key,
                op.mnemonic()
            );
        }
    }

    #[test]
    fn decode_by_behaviour_condition_finds_the_same_opcode_for_conditionals() {
        for op in Opcode::iter() {
            if op.condition() == Condition::Always {
                continue;
            }
            assert_eq!(Opcode::decode(op.behaviour(), op.condition()), Some(op));
        }
    }
}
