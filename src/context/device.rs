//! Field lowering (`spec.md` §4.F, §6): turns `ldfld`/`stfld` against the
//! implicit receiver into the symbolic device/field values the rest of the
//! engine renders.

use std::collections::HashMap;

use crate::error::CompileError;
use crate::sbil::{FieldInfo, FieldKind};
use crate::value::{BackingFieldDescriptor, StackValue};

/// `ldfld` on the implicit receiver: device-tagged fields become symbolic
/// `Device` values (to be lowered further by call-lowering's property
/// get/set shapes); plain fields become `Field` values backed by their
/// persistent register.
pub fn lower_ldfld(field: &FieldInfo, field_registers: &HashMap<String, u8>) -> Result<StackValue, CompileError> {
    match &field.kind {
        FieldKind::Device { pin_name, device_type, .. } => Ok(StackValue::Device {
            pin_name: pin_name.clone(),
            device_type: device_type.clone(),
            multicast: false,
        }),
        FieldKind::MulticastDevice { device_type } => Ok(StackValue::Device {
            pin_name: String::new(),
            device_type: device_type.clone(),
            multicast: true,
        }),
        FieldKind::Plain => {
            let register = *field_registers
                .get(&field.name)
                .ok_or_else(|| CompileError::InternalInvariant(format!("field {} has no persistent register", field.name)))?;
            Ok(StackValue::Field {
                alias: field.name.clone(),
                backing: BackingFieldDescriptor::new(register),
            })
        }
    }
}

/// `stfld` on the implicit receiver: only plain fields are directly
/// assignable — a device-tagged field is written through its property
/// setter (call lowering), never by a raw field store.
pub fn lower_stfld(field: &FieldInfo, value_text: &str, field_registers: &HashMap<String, u8>) -> Result<String, CompileError> {
    match &field.kind {
        FieldKind::Device { .. } | FieldKind::MulticastDevice { .. } => Err(CompileError::UnsupportedConstruct {
            instruction_index: 0,
            instruction_text: format!("stfld {}", field.name),
            detail: "a device-tagged field is not directly assignable; use its property setter".into(),
        }),
        FieldKind::Plain => {
            let register = *field_registers
                .get(&field.name)
                .ok_or_else(|| CompileError::InternalInvariant(format!("field {} has no persistent register", field.name)))?;
            Ok(format!("move r{register} {value_text}"))
        }
    }
}
