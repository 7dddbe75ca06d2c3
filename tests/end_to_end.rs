//! End-to-end scenarios compiling a small program class straight through
//! `driver::compile_program`, mirroring the shapes real front-end output
//! takes: device property read-modify-write, multicast set/aggregate reads,
//! slot indexing, constant folding, and an intra-procedural branch.

use ic10c::driver::{compile_program, Options};
use ic10c::sbil::metadata::FieldRef;
use ic10c::sbil::{ClassInfo, FieldInfo, FieldKind, MethodInfo, MethodRef, SourceProgram, TokenTables};
use ic10c::value::DeviceTypeDescriptor;

const TAG_LDARG: u8 = 0x03;
const TAG_LDC_I4: u8 = 0x07;
const TAG_LDC_R4: u8 = 0x08;
const TAG_LDFLD: u8 = 0x0b;
const TAG_ADD: u8 = 0x0d;
const TAG_MUL: u8 = 0x0f;
const TAG_BR: u8 = 0x1f;
const TAG_BLT: u8 = 0x26;
const TAG_CALL: u8 = 0x29;
const TAG_CALLVIRT: u8 = 0x2a;
const TAG_RET: u8 = 0x2b;
const TAG_STLOC: u8 = 0x06;

fn ldarg(n: u16) -> Vec<u8> {
    let mut b = vec![TAG_LDARG];
    b.extend_from_slice(&n.to_le_bytes());
    b
}

fn stloc(n: u16) -> Vec<u8> {
    let mut b = vec![TAG_STLOC];
    b.extend_from_slice(&n.to_le_bytes());
    b
}

fn ldfld(token: u32) -> Vec<u8> {
    let mut b = vec![TAG_LDFLD];
    b.extend_from_slice(&token.to_le_bytes());
    b
}

fn ldc_i4(v: i32) -> Vec<u8> {
    let mut b = vec![TAG_LDC_I4];
    b.extend_from_slice(&v.to_le_bytes());
    b
}

fn ldc_r4(v: f32) -> Vec<u8> {
    let mut b = vec![TAG_LDC_R4];
    b.extend_from_slice(&v.to_bits().to_le_bytes());
    b
}

fn callvirt(token: u32) -> Vec<u8> {
    let mut b = vec![TAG_CALLVIRT];
    b.extend_from_slice(&token.to_le_bytes());
    b
}

fn call(token: u32) -> Vec<u8> {
    let mut b = vec![TAG_CALL];
    b.extend_from_slice(&token.to_le_bytes());
    b
}

fn br(delta: i32) -> Vec<u8> {
    let mut b = vec![TAG_BR];
    b.extend_from_slice(&delta.to_le_bytes());
    b
}

fn blt(delta: i32) -> Vec<u8> {
    let mut b = vec![TAG_BLT];
    b.extend_from_slice(&delta.to_le_bytes());
    b
}

fn run_method(body: Vec<u8>, returns_value: bool) -> MethodInfo {
    MethodInfo {
        name: "Run".into(),
        params: vec![],
        locals: vec![],
        body,
        compile_hint: None,
        returns_value,
    }
}

fn compile_one(class: ClassInfo) -> String {
    let program = SourceProgram { classes: vec![class] };
    let outputs = compile_program(&program, &Options { optimize: false, ..Options::default() }).expect("compiles");
    outputs.into_iter().next().expect("one program class").1
}

#[test]
fn read_modify_write_a_device_property() {
    let class = ClassInfo {
        name: "Controller".into(),
        is_program: true,
        fields: vec![
            FieldInfo {
                name: "Panel".into(),
                kind: FieldKind::Device {
                    pin_name: "dPanel".into(),
                    pin_index: 1,
                    device_type: DeviceTypeDescriptor::new("StructureSolarPanel"),
                },
            },
            FieldInfo {
                name: "Sensor".into(),
                kind: FieldKind::Device {
                    pin_name: "dSensor".into(),
                    pin_index: 0,
                    device_type: DeviceTypeDescriptor::new("StructureGasSensor"),
                },
            },
        ],
        methods: vec![run_method(
            {
                let mut b = ldarg(0);
                b.extend(ldfld(0)); // Panel
                b.extend(ldarg(0));
                b.extend(ldfld(1)); // Sensor
                b.extend(callvirt(0)); // get_Horizontal
                b.extend(ldc_r4(180.0));
                b.push(TAG_ADD);
                b.extend(callvirt(1)); // set_Horizontal
                b.extend(call(2)); // Yield
                b.extend(br(-42));
                b
            },
            false,
        )],
        ctor: None,
        tokens: TokenTables {
            strings: vec![],
            fields: vec![
                FieldRef { declaring_class: "Controller".into(), name: "Panel".into() },
                FieldRef { declaring_class: "Controller".into(), name: "Sensor".into() },
            ],
            methods: vec![
                MethodRef { declaring_class: "Controller".into(), name: "get_Horizontal".into() },
                MethodRef { declaring_class: "Controller".into(), name: "set_Horizontal".into() },
                MethodRef { declaring_class: "Controller".into(), name: "Yield".into() },
            ],
        },
    };

    let text = compile_one(class);
    assert!(text.contains("alias dSensor d0"));
    assert!(text.contains("alias dPanel d1"));
    assert!(text.contains("main_il_0:"));
    assert!(text.contains("l r0 dSensor Horizontal"));
    assert!(text.contains("add r1 r0 180"));
    assert!(text.contains("s dPanel Horizontal r1"));
    assert!(text.contains("yield"));
    assert!(text.contains("j main_il_0"));
}

#[test]
fn multicast_set_hashes_the_device_type() {
    let class = ClassInfo {
        name: "Controller".into(),
        is_program: true,
        fields: vec![FieldInfo {
            name: "Heaters".into(),
            kind: FieldKind::MulticastDevice {
                device_type: DeviceTypeDescriptor::new("StructureWallHeater"),
            },
        }],
        methods: vec![run_method(
            {
                let mut b = ldarg(0);
                b.extend(ldfld(0));
                b.extend(ldc_i4(1));
                b.extend(callvirt(0)); // set_On
                b.push(TAG_RET);
                b
            },
            false,
        )],
        ctor: None,
        tokens: TokenTables {
            strings: vec![],
            fields: vec![FieldRef { declaring_class: "Controller".into(), name: "Heaters".into() }],
            methods: vec![MethodRef { declaring_class: "Controller".into(), name: "set_On".into() }],
        },
    };

    let text = compile_one(class);
    assert!(text.contains("sb HASH(\"StructureWallHeater\") On 1"));
}

#[test]
fn multicast_aggregation_read_carries_the_mode_index() {
    let class = ClassInfo {
        name: "Controller".into(),
        is_program: true,
        fields: vec![FieldInfo {
            name: "Batteries".into(),
            kind: FieldKind::MulticastDevice {
                device_type: DeviceTypeDescriptor::new("StructureBattery"),
            },
        }],
        methods: vec![run_method(
            {
                let mut b = ldarg(0);
                b.extend(ldfld(0));
                b.extend(ldc_i4(1)); // Sum aggregation mode
                b.extend(callvirt(0)); // GetCharge
                b.push(TAG_RET);
                b
            },
            true,
        )],
        ctor: None,
        tokens: TokenTables {
            strings: vec![],
            fields: vec![FieldRef { declaring_class: "Controller".into(), name: "Batteries".into() }],
            methods: vec![MethodRef { declaring_class: "Controller".into(), name: "GetCharge".into() }],
        },
    };

    let text = compile_one(class);
    assert!(text.contains("lb r0 HASH(\"StructureBattery\")"));
    assert!(text.contains("Charge 1"));
    assert!(text.contains("push r0"));
}

#[test]
fn slot_read_indexes_then_reads_a_property() {
    let class = ClassInfo {
        name: "Controller".into(),
        is_program: true,
        fields: vec![FieldInfo {
            name: "Gen".into(),
            kind: FieldKind::Device {
                pin_name: "dGen".into(),
                pin_index: 0,
                device_type: DeviceTypeDescriptor::new("StructureSolidGenerator"),
            },
        }],
        methods: vec![run_method(
            {
                let mut b = ldarg(0);
                b.extend(ldfld(0));
                b.extend(callvirt(0)); // get_Slots
                b.extend(ldc_i4(0));
                b.extend(callvirt(1)); // get_Item
                b.extend(callvirt(2)); // get_Quantity
                b.push(TAG_RET);
                b
            },
            true,
        )],
        ctor: None,
        tokens: TokenTables {
            strings: vec![],
            fields: vec![FieldRef { declaring_class: "Controller".into(), name: "Gen".into() }],
            methods: vec![
                MethodRef { declaring_class: "Controller".into(), name: "get_Slots".into() },
                MethodRef { declaring_class: "Controller".into(), name: "get_Item".into() },
                MethodRef { declaring_class: "Controller".into(), name: "get_Quantity".into() },
            ],
        },
    };

    let text = compile_one(class);
    assert!(text.contains("ls r0 dGen 0 Quantity"));
    assert!(text.contains("push r0"));
}

#[test]
fn constant_expressions_fold_without_emitting_an_instruction() {
    let class = ClassInfo {
        name: "Controller".into(),
        is_program: true,
        fields: vec![],
        methods: vec![run_method(
            {
                let mut b = ldc_r4(31.0);
                b.extend(ldc_r4(0.95));
                b.push(TAG_MUL);
                b.push(TAG_RET);
                b
            },
            true,
        )],
        ctor: None,
        tokens: Default::default(),
    };

    let text = compile_one(class);
    assert!(!text.contains("mul"));
    assert!(text.contains("push "));
    assert!(text.contains("j ra"));
}

#[test]
fn intra_procedural_branch_compares_against_a_constant_directly() {
    let class = ClassInfo {
        name: "Controller".into(),
        is_program: true,
        fields: vec![],
        methods: vec![MethodInfo {
            name: "Run".into(),
            params: vec![ic10c::sbil::LocalType::Primitive],
            locals: vec![ic10c::sbil::LocalType::Primitive],
            body: {
                let mut b = ldarg(1); // t
                b.extend(ldc_r4(20.0)); // MinTemp
                b.extend(blt(5)); // to the "heating" block
                b.extend(br(8)); // skip it otherwise
                b.extend(ldc_i4(1)); // Heating
                b.extend(stloc(0)); // state = Heating
                b.push(TAG_RET);
                b
            },
            compile_hint: None,
            returns_value: false,
        }],
        ctor: None,
        tokens: Default::default(),
    };

    let text = compile_one(class);
    assert!(text.contains("blt r0 20 main_il_4"));
    assert!(!text.contains("slt"));
    assert!(text.contains("move r1 1"));
    assert!(text.contains("main_il_4:"));
    assert!(text.contains("main_il_6:"));
    assert!(text.contains("j ra"));
}

/// `Run` keeps a local alive across a call-stack-lowered call to `Helper`.
/// Both methods are compiled top-level from the same `reserved` baseline (one
/// `Plain` field pins r0), so `Run`'s own local lands in r1 — past that
/// baseline, not at r0. The call site must save/restore r1 (the register
/// `Helper` will actually reuse for its own local), not r0.
#[test]
fn call_stack_fallback_saves_the_callers_live_register_past_the_shared_baseline() {
    let class = ClassInfo {
        name: "Controller".into(),
        is_program: true,
        fields: vec![FieldInfo { name: "Counter".into(), kind: FieldKind::Plain }],
        methods: vec![
            MethodInfo {
                name: "Run".into(),
                params: vec![],
                locals: vec![ic10c::sbil::LocalType::Primitive],
                body: {
                    let mut b = ldc_i4(7);
                    b.extend(stloc(0));
                    b.extend(call(0)); // Helper
                    b.push(TAG_RET);
                    b
                },
                compile_hint: None,
                returns_value: false,
            },
            MethodInfo {
                name: "Helper".into(),
                params: vec![],
                locals: vec![ic10c::sbil::LocalType::Primitive],
                body: {
                    let mut b = ldc_i4(1);
                    b.extend(stloc(0));
                    b.push(TAG_RET);
                    b
                },
                compile_hint: None,
                returns_value: false,
            },
        ],
        ctor: None,
        tokens: TokenTables {
            strings: vec![],
            fields: vec![],
            methods: vec![MethodRef { declaring_class: "Controller".into(), name: "Helper".into() }],
        },
    };

    let program = SourceProgram { classes: vec![class] };
    let outputs = compile_program(&program, &Options { optimize: false, max_inline_depth: 0, ..Options::default() }).expect("compiles");
    let text = outputs.get("Controller").expect("program class output");

    assert!(text.contains("push r1"), "must save the caller's live local register:\n{text}");
    assert!(text.contains("pop r1"), "must restore the caller's live local register:\n{text}");
    assert!(!text.contains("push r0"), "must not save the shared field register, it was never clobbered by this call:\n{text}");
    assert!(!text.contains("pop r0"), "must not restore the shared field register:\n{text}");
    assert!(text.contains("jal Controller_Helper"));
}
