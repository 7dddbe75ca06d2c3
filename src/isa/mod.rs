//! Component A: the target ISA model — opcodes, operands, instructions and
//! the program container (`spec.md` §4.A).

pub mod instruction;
pub mod opcode;
pub mod operand;

pub use instruction::{Instruction, Label, Program, ProgramParseError};
pub use opcode::{Behaviour, Condition, Opcode};
pub use operand::{DeviceRegister, Operand, OperandKind, ValueRegister};
