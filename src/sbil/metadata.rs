//! Consumed metadata shapes (`spec.md` §6): the attributes an external
//! front-end attaches to fields and methods, already resolved into an IR —
//! no runtime reflection, per `spec.md` §9.

use serde::{Deserialize, Serialize};

use crate::value::DeviceTypeDescriptor;

/// A method-local or parameter's storage width, per `spec.md` §4.F:
/// "Allocates one register per local variable whose type is a primitive or
/// enum (width 1); skips locals of reference or wide-value type (width 0 →
/// mapping ⊥); fails for width > 1."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalType {
    /// A numeric primitive.
    Primitive,
    /// An enum (backed by a primitive, width 1).
    Enum,
    /// A reference type (`DeviceSlots`, or any other reference) — width 0,
    /// unbacked by a register.
    Reference,
    /// A value type wider than one register (e.g. a struct of more than
    /// one field) — always rejected where it would need a mapping.
    Wide,
}

impl LocalType {
    /// Register width per `spec.md` §4.F.
    pub const fn width(self) -> usize {
        match self {
            Self::Primitive | Self::Enum => 1,
            Self::Reference => 0,
            Self::Wide => 2,
        }
    }
}

/// How a user method should be expanded at its call sites (`spec.md` §6's
/// compile-hint tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompileHintKind {
    /// Substitute the pattern text directly at the call site.
    Inline,
    /// Reserved for future call-stack lowering (`spec.md` §4.F: "any other
    /// kind is reserved for future call-stack lowering").
    CallStack,
}

/// A user-supplied compile hint attached to a method (`spec.md` §4.F call
/// lowering, shape 2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileHint {
    pub pattern: String,
    pub kind: CompileHintKind,
}

/// How a field lowers to IC10 (`spec.md` §6's device/multicast field tags).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// An ordinary field, backed by a persistent register.
    Plain,
    /// A device field bound to a specific pin.
    Device { pin_name: String, pin_index: u8, device_type: DeviceTypeDescriptor },
    /// A multicast device field (no alias emitted; addressed by type hash).
    MulticastDevice { device_type: DeviceTypeDescriptor },
}

/// One instance field, with its resolved metadata tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub kind: FieldKind,
}

/// A resolved reference to another method, used as a call target and as a
/// key for the driver's memoised method-dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub declaring_class: String,
    pub name: String,
}

impl MethodRef {
    /// The global IC10 label this method's non-inlined body is entered
    /// through — qualified by declaring class so two classes can each
    /// define a same-named method without colliding (`spec.md` §4.F's
    /// call-stack lowering, §4.G assembly).
    pub fn label(&self) -> String {
        format!("{}_{}", self.declaring_class, self.name)
    }
}

/// A resolved reference to a field, used by `ldfld`/`stfld` payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    pub declaring_class: String,
    pub name: String,
}

/// One method's already-resolved shape: parameter/local widths and a flat,
/// offset-addressed instruction body (`spec.md` §9: "methods carry
/// parameter/local/body triples").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    pub params: Vec<LocalType>,
    pub locals: Vec<LocalType>,
    pub body: Vec<u8>,
    pub compile_hint: Option<CompileHint>,
    pub returns_value: bool,
}

/// The token tables a class's method bodies resolve `ldstr`/`ldfld`/
/// `stfld`/`call`/`callvirt` payloads against (`spec.md` §4.E). Owned here
/// (rather than borrowed, as [`super::reader::MetadataTables`] is) so the
/// driver can build a borrowing `MetadataTables` view per decode call
/// without fighting the borrow checker over per-class lifetimes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenTables {
    pub strings: Vec<String>,
    pub fields: Vec<FieldRef>,
    pub methods: Vec<MethodRef>,
}

/// A program class: the entry-point type plus every method and field the
/// driver needs (`spec.md` §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub is_program: bool,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub ctor: Option<MethodInfo>,
    pub tokens: TokenTables,
}

impl ClassInfo {
    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Every method that needs decoding: the constructor, if present,
    /// followed by the declared methods in order.
    pub fn all_methods(&self) -> impl Iterator<Item = &MethodInfo> {
        self.ctor.iter().chain(self.methods.iter())
    }
}

/// The full set of classes one compile run processes (`spec.md` §4.G's
/// `compile_program` input) — an external front-end resolves a whole
/// SBIL module down to this before the core ever runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceProgram {
    pub classes: Vec<ClassInfo>,
}

impl SourceProgram {
    /// The program class and its `Run` method, per `spec.md` §4.G/§6: "the
    /// compiler looks for a public, instance method named `Run`" on the
    /// type tagged as the entry point.
    pub fn entry_point(&self) -> Option<(&ClassInfo, &MethodInfo)> {
        self.classes.iter().find(|c| c.is_program).and_then(|c| c.method("Run").map(|m| (c, m)))
    }
}
