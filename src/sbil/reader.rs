//! Component E: the SBIL reader — decodes a method's raw instruction bytes
//! into a typed, offset-addressed instruction stream (`spec.md` §4.E).
//!
//! The byte encoding below is this crate's own compact shape (CIL/JVM-like:
//! one tag byte plus a fixed payload per operand kind); the actual producer
//! is an external front-end (`spec.md` §1, §6) and out of scope — this
//! decoder only needs to be total and round-trippable for whatever shape
//! that front-end emits.

use super::metadata::{FieldRef, MethodRef};
use crate::error::CompileError;

/// A single decoded SBIL instruction: the byte offset it starts at, its
/// resolved opcode and payload. `spec.md` §4.E: "given a method handle,
/// yield a vector of `(byte-offset, size, opcode, payload)`".
#[derive(Debug, Clone, PartialEq)]
pub struct SbilInstruction {
    pub offset: usize,
    pub size: usize,
    pub op: SbilOp,
}

/// The decoded opcode, with its payload already resolved against the
/// enclosing method's generic/metadata context (`spec.md` §4.E).
#[derive(Debug, Clone, PartialEq)]
pub enum SbilOp {
    Nop,
    Dup,
    Pop,
    LdArg(u16),
    LdLoc(u16),
    LdLocA(u16),
    StLoc(u16),
    LdcI4(i32),
    LdcR4(f32),
    LdNull,
    LdStr(String),
    LdFld(FieldRef),
    StFld(FieldRef),
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,
    Not,
    Neg,
    Ceq,
    Cgt,
    CgtUn,
    Clt,
    CltUn,
    /// Unconditional branch; payload is the byte offset of the target.
    Br(i32),
    BrFalse(i32),
    BrTrue(i32),
    Beq(i32),
    Bge(i32),
    Bgt(i32),
    Ble(i32),
    Blt(i32),
    Bne(i32),
    /// `switch` — one target byte offset per case, tested in order.
    Switch(Vec<i32>),
    Call(MethodRef),
    CallVirt(MethodRef),
    Ret,
    ConvI,
    ConvU,
    LdIndRef,
}

impl SbilOp {
    /// Human-readable rendering for error messages — `spec.md` §7 requires
    /// failures to surface "the offending instruction ... rendered as
    /// text."
    pub fn render(&self) -> String {
        format!("{self:?}")
    }
}

const TAG_NOP: u8 = 0x00;
const TAG_DUP: u8 = 0x01;
const TAG_POP: u8 = 0x02;
const TAG_LDARG: u8 = 0x03;
const TAG_LDLOC: u8 = 0x04;
const TAG_LDLOCA: u8 = 0x05;
const TAG_STLOC: u8 = 0x06;
const TAG_LDC_I4: u8 = 0x07;
const TAG_LDC_R4: u8 = 0x08;
const TAG_LDNULL: u8 = 0x09;
const TAG_LDSTR: u8 = 0x0a;
const TAG_LDFLD: u8 = 0x0b;
const TAG_STFLD: u8 = 0x0c;
const TAG_ADD: u8 = 0x0d;
const TAG_SUB: u8 = 0x0e;
const TAG_MUL: u8 = 0x0f;
const TAG_DIV: u8 = 0x10;
const TAG_REM: u8 = 0x11;
const TAG_AND: u8 = 0x12;
const TAG_OR: u8 = 0x13;
const TAG_XOR: u8 = 0x14;
const TAG_SHL: u8 = 0x15;
const TAG_SHR: u8 = 0x16;
const TAG_SHR_UN: u8 = 0x17;
const TAG_NOT: u8 = 0x18;
const TAG_NEG: u8 = 0x19;
const TAG_CEQ: u8 = 0x1a;
const TAG_CGT: u8 = 0x1b;
const TAG_CGT_UN: u8 = 0x1c;
const TAG_CLT: u8 = 0x1d;
const TAG_CLT_UN: u8 = 0x1e;
const TAG_BR: u8 = 0x1f;
const TAG_BRFALSE: u8 = 0x20;
const TAG_BRTRUE: u8 = 0x21;
const TAG_BEQ: u8 = 0x22;
const TAG_BGE: u8 = 0x23;
const TAG_BGT: u8 = 0x24;
const TAG_BLE: u8 = 0x25;
const TAG_BLT: u8 = 0x26;
const TAG_BNE: u8 = 0x27;
const TAG_SWITCH: u8 = 0x28;
const TAG_CALL: u8 = 0x29;
const TAG_CALLVIRT: u8 = 0x2a;
const TAG_RET: u8 = 0x2b;
const TAG_CONV_I: u8 = 0x2c;
const TAG_CONV_U: u8 = 0x2d;
const TAG_LDIND_REF: u8 = 0x2e;

/// Resolves the token tables a method body references. The actual binding
/// of a token to a field/method/string is external-front-end territory; a
/// `MetadataTables` is just the resolved lookup the reader is handed.
pub struct MetadataTables<'a> {
    pub strings: &'a [String],
    pub fields: &'a [FieldRef],
    pub methods: &'a [MethodRef],
}

/// Decode a method body into a flat, offset-addressed instruction vector.
pub fn decode(body: &[u8], tables: &MetadataTables<'_>) -> Result<Vec<SbilInstruction>, CompileError> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < body.len() {
        let start = offset;
        let tag = read_u8(body, offset)?;
        offset += 1;
        let op = match tag {
            TAG_NOP => SbilOp::Nop,
            TAG_DUP => SbilOp::Dup,
            TAG_POP => SbilOp::Pop,
            TAG_LDARG => SbilOp::LdArg(read_u16(body, &mut offset)?),
            TAG_LDLOC => SbilOp::LdLoc(read_u16(body, &mut offset)?),
            TAG_LDLOCA => SbilOp::LdLocA(read_u16(body, &mut offset)?),
            TAG_STLOC => SbilOp::StLoc(read_u16(body, &mut offset)?),
            TAG_LDC_I4 => SbilOp::LdcI4(read_i32(body, &mut offset)?),
            TAG_LDC_R4 => SbilOp::LdcR4(f32::from_bits(read_u32(body, &mut offset)?)),
            TAG_LDNULL => SbilOp::LdNull,
            TAG_LDSTR => SbilOp::LdStr(read_token(body, &mut offset, tables.strings, "string")?.clone()),
            TAG_LDFLD => SbilOp::LdFld(read_token(body, &mut offset, tables.fields, "field")?.clone()),
            TAG_STFLD => SbilOp::StFld(read_token(body, &mut offset, tables.fields, "field")?.clone()),
            TAG_ADD => SbilOp::Add,
            TAG_SUB => SbilOp::Sub,
            TAG_MUL => SbilOp::Mul,
            TAG_DIV => SbilOp::Div,
            TAG_REM => SbilOp::Rem,
            TAG_AND => SbilOp::And,
            TAG_OR => SbilOp::Or,
            TAG_XOR => SbilOp::Xor,
            TAG_SHL => SbilOp::Shl,
            TAG_SHR => SbilOp::Shr,
            TAG_SHR_UN => SbilOp::ShrUn,
            TAG_NOT => SbilOp::Not,
            TAG_NEG => SbilOp::Neg,
            TAG_CEQ => SbilOp::Ceq,
            TAG_CGT => SbilOp::Cgt,
            TAG_CGT_UN => SbilOp::CgtUn,
            TAG_CLT => SbilOp::Clt,
            TAG_CLT_UN => SbilOp::CltUn,
            TAG_BR => SbilOp::Br(read_i32(body, &mut offset)?),
            TAG_BRFALSE => SbilOp::BrFalse(read_i32(body, &mut offset)?),
            TAG_BRTRUE => SbilOp::BrTrue(read_i32(body, &mut offset)?),
            TAG_BEQ => SbilOp::Beq(read_i32(body, &mut offset)?),
            TAG_BGE => SbilOp::Bge(read_i32(body, &mut offset)?),
            TAG_BGT => SbilOp::Bgt(read_i32(body, &mut offset)?),
            TAG_BLE => SbilOp::Ble(read_i32(body, &mut offset)?),
            TAG_BLT => SbilOp::Blt(read_i32(body, &mut offset)?),
            TAG_BNE => SbilOp::Bne(read_i32(body, &mut offset)?),
            TAG_SWITCH => {
                let count = read_u32(body, &mut offset)? as usize;
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(read_i32(body, &mut offset)?);
                }
                SbilOp::Switch(targets)
            }
            TAG_CALL => SbilOp::Call(read_token(body, &mut offset, tables.methods, "method")?.clone()),
            TAG_CALLVIRT => SbilOp::CallVirt(read_token(body, &mut offset, tables.methods, "method")?.clone()),
            TAG_RET => SbilOp::Ret,
            TAG_CONV_I => SbilOp::ConvI,
            TAG_CONV_U => SbilOp::ConvU,
            TAG_LDIND_REF => SbilOp::LdIndRef,
            other => {
                return Err(CompileError::Decoder {
                    offset: start,
                    detail: format!("unknown opcode tag 0x{other:02x}"),
                })
            }
        };
        out.push(SbilInstruction {
            offset: start,
            size: offset - start,
            op,
        });
    }
    Ok(out)
}

fn read_u8(body: &[u8], offset: usize) -> Result<u8, CompileError> {
    body.get(offset).copied().ok_or_else(|| CompileError::Decoder {
        offset,
        detail: "unexpected end of method body".into(),
    })
}

fn read_u16(body: &[u8], offset: &mut usize) -> Result<u16, CompileError> {
    let bytes = body.get(*offset..*offset + 2).ok_or_else(|| CompileError::Decoder {
        offset: *offset,
        detail: "truncated u16 operand".into(),
    })?;
    *offset += 2;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(body: &[u8], offset: &mut usize) -> Result<u32, CompileError> {
    let bytes = body.get(*offset..*offset + 4).ok_or_else(|| CompileError::Decoder {
        offset: *offset,
        detail: "truncated u32 operand".into(),
    })?;
    *offset += 4;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i32(body: &[u8], offset: &mut usize) -> Result<i32, CompileError> {
    read_u32(body, offset).map(|v| v as i32)
}

fn read_token<'a, T>(body: &[u8], offset: &mut usize, table: &'a [T], kind: &str) -> Result<&'a T, CompileError> {
    let index = read_u32(body, offset)? as usize;
    table.get(index).ok_or_else(|| CompileError::Decoder {
        offset: *offset,
        detail: format!("unresolvable {kind} token index {index}"),
    })
}
