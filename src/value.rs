//! Component C: the symbolic stack value model and the immutable virtual
//! stack (`spec.md` §3, §4.C).

use serde::{Deserialize, Serialize};

use crate::regalloc::RegisterSet;

/// A field's device-interface descriptor, as resolved from attached
/// metadata (`spec.md` §6's device-interface / multicast tags). Cheap to
/// clone: one allocation for the type name, used to build `HASH("...")`
/// text at emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTypeDescriptor {
    type_name: String,
}

impl DeviceTypeDescriptor {
    /// Build a descriptor from the surface type's `TypeName` metadata.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }

    /// The surface type name, hashed with `HASH("...")` at emission time.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

/// A non-device field's backing-register descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackingFieldDescriptor {
    register: u8,
}

impl BackingFieldDescriptor {
    /// A field backed by persistent register `register`.
    pub const fn new(register: u8) -> Self {
        Self { register }
    }

    /// The backing register index.
    pub const fn register(&self) -> u8 {
        self.register
    }
}

/// A symbolic value living on the virtual operand stack (`spec.md` §3).
///
/// `This`, `Null`, `DeviceSlots` and `DeviceSlot` are not directly
/// renderable: they must be lowered (by the call-lowering or
/// field-lowering passes in [`crate::context`]) before reaching an
/// emitter. `DeferredExpression` is renderable only in the degenerate sense
/// that its `$` sink must first be bound to a concrete register.
#[derive(Debug, Clone, PartialEq)]
pub enum StackValue {
    /// A compile-time-known numeric constant.
    Static(f64),
    /// The implicit receiver of an instance method.
    This,
    /// A single device, addressed by pin name; `multicast` marks a
    /// multicast-bus field (no alias emitted, addressed by type hash).
    Device {
        pin_name: String,
        device_type: DeviceTypeDescriptor,
        multicast: bool,
    },
    /// The slot table of a device (`gen.Slots`), prior to indexing.
    DeviceSlots { pin_name: String, device_type: DeviceTypeDescriptor },
    /// One indexed slot of a device's slot table.
    DeviceSlot {
        pin_name: String,
        device_type: DeviceTypeDescriptor,
        slot_index: Box<StackValue>,
    },
    /// A value currently held in a register.
    Register(u8),
    /// A non-device instance field, with its alias name and backing
    /// register.
    Field {
        alias: String,
        backing: BackingFieldDescriptor,
    },
    /// A string literal.
    String(String),
    /// A string whose hash (`HASH("...")`) is what's actually wanted —
    /// produced by `GetTypeHash<T>()`/`Hash(string)` call lowering.
    HashString(String),
    /// The null literal.
    Null,
    /// A partially-formed IC10 fragment awaiting a result-register binding.
    /// `fragment` contains the literal `$` sink token; `free_on_resolve`
    /// lists registers to release once the expression is materialised.
    DeferredExpression {
        fragment: String,
        free_on_resolve: RegisterSet,
    },
}

impl StackValue {
    /// Render this value as IC10 operand text, or `None` if it is one of
    /// the non-renderable variants that must be lowered first.
    pub fn render_as_ic10(&self) -> Option<String> {
        match self {
            Self::Static(v) => Some(render_number(*v)),
            Self::Register(i) => Some(format!("r{i}")),
            Self::Device { pin_name, .. } => Some(pin_name.clone()),
            Self::Field { alias, .. } => Some(alias.clone()),
            Self::String(s) => Some(s.clone()),
            Self::HashString(s) => Some(format!("HASH(\"{s}\")")),
            Self::This | Self::Null | Self::DeviceSlots { .. } | Self::DeviceSlot { .. } | Self::DeferredExpression { .. } => None,
        }
    }

    /// True if folding two `Static` operands at compile time applies to
    /// this value (used by the arithmetic handlers' constant-folding path).
    pub const fn as_static(&self) -> Option<f64> {
        match self {
            Self::Static(v) => Some(*v),
            _ => None,
        }
    }
}

fn render_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// An immutable, ordered sequence of [`StackValue`]s. Push/Pop/Pop2/Peek
/// never mutate in place — they return a new stack (or the popped
/// value(s) plus a new stack). Equality is structural and drives branch
/// consistency checking (`spec.md` §3, §4.C).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VirtualStack {
    values: Vec<StackValue>,
}

impl VirtualStack {
    /// The empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of values on the stack.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the stack holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Push a value, returning the new stack.
    pub fn push(&self, value: StackValue) -> Self {
        let mut values = self.values.clone();
        values.push(value);
        Self { values }
    }

    /// Pop the top value, returning it and the new stack.
    pub fn pop(&self) -> Option<(StackValue, Self)> {
        let mut values = self.values.clone();
        let top = values.pop()?;
        Some((top, Self { values }))
    }

    /// Pop the top two values (`(top, second)` order) and the new stack.
    pub fn pop2(&self) -> Option<((StackValue, StackValue), Self)> {
        let (top, rest) = self.pop()?;
        let (second, rest) = rest.pop()?;
        Some(((top, second), rest))
    }

    /// Pop `n` values. Returned **top-of-stack first**, matching SBIL pop
    /// semantics (`spec.md` §4.C); callers reverse when a call's
    /// left-to-right parameter order is needed.
    pub fn pop_n(&self, n: usize) -> Option<(Vec<StackValue>, Self)> {
        if self.values.len() < n {
            return None;
        }
        let mut values = self.values.clone();
        let mut popped = Vec::with_capacity(n);
        for _ in 0..n {
            popped.push(values.pop().expect("length checked above"));
        }
        Some((popped, Self { values }))
    }

    /// Peek the top value without popping.
    pub fn peek(&self) -> Option<&StackValue> {
        self.values.last()
    }

    /// Peek the `n`-th value from the top (0 = top).
    pub fn peek_at(&self, n: usize) -> Option<&StackValue> {
        self.values.len().checked_sub(n + 1).map(|i| &self.values[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_of_push_is_identity() {
        let s = VirtualStack::new();
        let pushed = s.push(StackValue::Static(1.0));
        let (v, popped) = pushed.pop().unwrap();
        assert_eq!(v, StackValue::Static(1.0));
        assert_eq!(popped, s);
    }

    #[test]
    fn pop2_obeys_lifo_order() {
        let s = VirtualStack::new().push(StackValue::Static(1.0)).push(StackValue::Static(2.0));
        let ((top, second), rest) = s.pop2().unwrap();
        assert_eq!(top, StackValue::Static(2.0));
        assert_eq!(second, StackValue::Static(1.0));
        assert!(rest.is_empty());
    }

    #[test]
    fn pop_n_returns_top_of_stack_first() {
        let s = VirtualStack::new()
            .push(StackValue::Static(1.0))
            .push(StackValue::Static(2.0))
            .push(StackValue::Static(3.0));
        let (popped, rest) = s.pop_n(3).unwrap();
        assert_eq!(
            popped,
            vec![StackValue::Static(3.0), StackValue::Static(2.0), StackValue::Static(1.0)]
        );
        assert!(rest.is_empty());
    }

    #[test]
    fn structural_equality_ignores_identity() {
        let a = VirtualStack::new().push(StackValue::Register(3));
        let b = VirtualStack::new().push(StackValue::Register(3));
        assert_eq!(a, b);
    }

    #[test]
    fn non_renderable_variants_report_none() {
        assert_eq!(StackValue::This.render_as_ic10(), None);
        assert_eq!(StackValue::Null.render_as_ic10(), None);
        assert_eq!(
            StackValue::DeferredExpression {
                fragment: "add $ r0 r1".into(),
                free_on_resolve: RegisterSet::empty(),
            }
            .render_as_ic10(),
            None
        );
    }

    #[test]
    fn hash_string_renders_as_hash_call() {
        assert_eq!(
            StackValue::HashString("StructureBattery".into()).render_as_ic10(),
            Some("HASH(\"StructureBattery\")".into())
        );
    }
}
