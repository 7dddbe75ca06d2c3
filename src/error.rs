//! Error handling (`spec.md` §7): failure kinds for a single method compile,
//! and the driver-level wrapper that lets other classes keep compiling
//! after one fails.

use thiserror::Error;

/// Failure kinds for compiling a single method. All are fatal at the
/// method level: there is no recovery inside [`crate::context`] — the
/// failure surfaces with the offending instruction or fragment rendered as
/// text, matching `spec.md` §7's policy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    /// The SBIL byte stream was malformed, or referenced a metadata token
    /// the resolver couldn't bind.
    #[error("malformed SBIL at byte offset {offset}: {detail}")]
    Decoder { offset: usize, detail: String },

    /// SBIL used a shape the core doesn't lower: field access on a
    /// non-`This` target, a multicast pin read through a non-multicast
    /// path, a ref-typed local other than `DeviceSlots`, or an opcode no
    /// handler matched.
    #[error("unsupported construct at instruction {instruction_index} ({instruction_text}): {detail}")]
    UnsupportedConstruct {
        instruction_index: usize,
        instruction_text: String,
        detail: String,
    },

    /// First-free register allocation failed: all 16 registers were live.
    #[error("register file exhausted at instruction {instruction_index}")]
    RegisterExhausted { instruction_index: usize },

    /// The post-check found differing virtual-stack contents or
    /// register-allocation sets between the source of an emitted jump and
    /// its target.
    #[error("branch inconsistency jumping from instruction {from} to {to}: {detail}")]
    BranchInconsistent { from: usize, to: usize, detail: String },

    /// Flow analysis saw an unresolvable label, the operand parser's
    /// round-trip failed, or some other invariant the core relies on
    /// internally didn't hold.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

impl CompileError {
    /// Render the offending fragment/instruction as text, when available —
    /// the presentation `spec.md` §7 requires of every failure.
    pub fn offending_text(&self) -> Option<&str> {
        match self {
            Self::UnsupportedConstruct { instruction_text, .. } => Some(instruction_text),
            Self::Decoder { detail, .. } | Self::BranchInconsistent { detail, .. } | Self::InternalInvariant(detail) => {
                Some(detail)
            }
            Self::RegisterExhausted { .. } => None,
        }
    }
}

/// A single class's compile failure, as surfaced by the driver
/// (`spec.md` §6: "Exit code: ... non-zero on any typed compile failure";
/// §6 Driver CLI: "other classes still compile").
#[derive(Debug, Error)]
#[error("failed to compile {class_name}: {source}")]
pub struct DriverError {
    pub class_name: String,
    #[source]
    pub source: CompileError,
}
