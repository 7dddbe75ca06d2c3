//! Call lowering (`spec.md` §4.F): the call shapes, checked in order — void
//! intrinsics (`yield()`), math intrinsics, inline compile hints, device
//! property set/get, type/string hashing, multicast aggregate reads, and
//! finally the call-site engine for ordinary user methods.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::error::CompileError;
use crate::output::OutputWriter;
use crate::regalloc::RegisterSet;
use crate::sbil::{ClassInfo, CompileHintKind, MethodInfo, MethodRef};
use crate::value::{StackValue, VirtualStack};

use super::engine::ExecutionContext;

/// One math-intrinsic entry: `name` is the surface method name, `arity` the
/// argument count, `pattern` the substitution template (`#N` = rendered
/// actual argument N, `%N` = a fresh temp register shared across all uses of
/// the same index within one pattern, `$` = the eventual result sink).
struct Intrinsic {
    name: &'static str,
    arity: usize,
    pattern: &'static str,
}

/// A zero-result intrinsic: substitutes `#N`/`%N` the same way as
/// [`Intrinsic`] but emits its pattern as a bare statement and pushes
/// nothing back (`spec.md` §8's `yield()` scenario — a void call has no
/// result to bind, unlike every [`MATH_INTRINSICS`] entry).
struct VoidIntrinsic {
    name: &'static str,
    arity: usize,
    pattern: &'static str,
}

const VOID_INTRINSICS: &[VoidIntrinsic] = &[VoidIntrinsic { name: "Yield", arity: 0, pattern: "yield" }];

const MATH_INTRINSICS: &[Intrinsic] = &[
    Intrinsic { name: "Abs", arity: 1, pattern: "abs $ #0" },
    Intrinsic { name: "Max", arity: 2, pattern: "max $ #0 #1" },
    Intrinsic { name: "Min", arity: 2, pattern: "min $ #0 #1" },
    Intrinsic { name: "Clamp", arity: 3, pattern: "max %0 #1 #0\nmin $ #2 %0" },
    Intrinsic { name: "Sqrt", arity: 1, pattern: "sqrt $ #0" },
    Intrinsic { name: "Sin", arity: 1, pattern: "sin $ #0" },
    Intrinsic { name: "Cos", arity: 1, pattern: "cos $ #0" },
    Intrinsic { name: "Tan", arity: 1, pattern: "tan $ #0" },
    Intrinsic { name: "Asin", arity: 1, pattern: "asin $ #0" },
    Intrinsic { name: "Acos", arity: 1, pattern: "acos $ #0" },
    Intrinsic { name: "Atan", arity: 1, pattern: "atan $ #0 1" },
    Intrinsic { name: "Floor", arity: 1, pattern: "floor $ #0" },
    Intrinsic { name: "Ceiling", arity: 1, pattern: "ceil $ #0" },
    Intrinsic { name: "Round", arity: 1, pattern: "round $ #0" },
    Intrinsic { name: "Exp", arity: 1, pattern: "exp $ #0" },
    Intrinsic { name: "Log", arity: 1, pattern: "log $ #0" },
];

/// Arguments already popped off the virtual stack for one call, in
/// left-to-right order.
pub(super) struct CallArgs {
    pub receiver: Option<StackValue>,
    pub args: Vec<StackValue>,
}

fn pop_args(ctx: &mut ExecutionContext, i: usize, is_virtual: bool, arity: usize) -> Result<CallArgs, CompileError> {
    let (mut args, rest) = ctx.stack.pop_n(arity).ok_or_else(|| underflow(i))?;
    args.reverse();
    ctx.stack = rest;
    let receiver = if is_virtual {
        let (r, rest) = ctx.stack.pop().ok_or_else(|| underflow(i))?;
        ctx.stack = rest;
        Some(r)
    } else {
        None
    };
    Ok(CallArgs { receiver, args })
}

fn underflow(i: usize) -> CompileError {
    CompileError::UnsupportedConstruct {
        instruction_index: i,
        instruction_text: String::new(),
        detail: "virtual stack underflow at a call site".into(),
    }
}

/// Substitute `#N`/`%N`/`$` tokens in a compile-hint or math-intrinsic
/// pattern. `#N` is replaced by `args_text[N]`; `%N` allocates (once per
/// index) a fresh temp register; `$` is left as the literal sink token for
/// the caller to bind.
fn apply_pattern(ctx: &mut ExecutionContext, i: usize, pattern: &str, args_text: &[String]) -> Result<(String, RegisterSet), CompileError> {
    let mut temp_map: HashMap<usize, u8> = HashMap::new();
    let mut temps = RegisterSet::empty();
    let mut out = String::with_capacity(pattern.len());
    let bytes = pattern.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        let c = bytes[idx] as char;
        if c == '#' || c == '%' {
            let start = idx + 1;
            let mut end = start;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end == start {
                out.push(c);
                idx += 1;
                continue;
            }
            let num: usize = pattern[start..end]
                .parse()
                .map_err(|_| CompileError::InternalInvariant(format!("malformed pattern token in '{pattern}'")))?;
            if c == '#' {
                let text = args_text.get(num).ok_or_else(|| {
                    CompileError::InternalInvariant(format!("pattern '{pattern}' references out-of-range argument #{num}"))
                })?;
                out.push_str(text);
            } else if let Some(reg) = temp_map.get(&num) {
                out.push_str(&format!("r{reg}"));
            } else {
                let (reg, next) = ctx.registers.allocate_first_free().ok_or(CompileError::RegisterExhausted { instruction_index: i })?;
                ctx.registers = next;
                temp_map.insert(num, reg);
                temps = temps.allocate_at(reg);
                out.push_str(&format!("r{reg}"));
            }
            idx = end;
        } else {
            out.push(c);
            idx += 1;
        }
    }
    Ok((out, temps))
}

fn lower_pattern_call(
    ctx: &mut ExecutionContext,
    i: usize,
    pattern: &str,
    args: Vec<StackValue>,
    writer: &mut OutputWriter,
) -> Result<StackValue, CompileError> {
    let mut args_text = Vec::with_capacity(args.len());
    for arg in args {
        args_text.push(ctx.resolve_to_text(i, arg, writer)?);
    }
    let (fragment, temps) = apply_pattern(ctx, i, pattern, &args_text)?;
    Ok(StackValue::DeferredExpression { fragment, free_on_resolve: temps })
}

fn resolve_user_method<'a>(classes: &'a [ClassInfo], target: &MethodRef) -> Option<(&'a ClassInfo, &'a MethodInfo)> {
    let class = classes.iter().find(|c| c.name == target.declaring_class)?;
    class.method(&target.name).map(|m| (class, m))
}

/// Estimate of a method's register demand when inlined at a fresh call
/// site: one register per width-1 parameter plus one per width-1 local.
/// Used as the pre-estimate for the inline-vs-call-stack decision — a
/// static upper bound computed before any code is emitted, so the decision
/// is made exactly once (`spec.md` §9 open question: no discard-and-re-emit
/// path).
fn estimate_register_demand(method: &MethodInfo) -> usize {
    method.params.iter().filter(|k| k.width() == 1).count() + method.locals.iter().filter(|k| k.width() == 1).count()
}

pub(super) fn lower_call(ctx: &mut ExecutionContext, i: usize, target: &MethodRef, is_virtual: bool, writer: &mut OutputWriter) -> Result<(), CompileError> {
    // Shape 1: math intrinsics (static calls only).
    if !is_virtual {
        if let Some(intrinsic) = VOID_INTRINSICS.iter().find(|v| v.name == target.name) {
            let CallArgs { args, .. } = pop_args(ctx, i, false, intrinsic.arity)?;
            let mut args_text = Vec::with_capacity(args.len());
            for arg in args {
                args_text.push(ctx.resolve_to_text(i, arg, writer)?);
            }
            let (fragment, temps) = apply_pattern(ctx, i, intrinsic.pattern, &args_text)?;
            writer.append_code(i, fragment);
            ctx.free_registers(temps);
            return Ok(());
        }
        if let Some(intrinsic) = MATH_INTRINSICS.iter().find(|m| m.name == target.name) {
            let CallArgs { args, .. } = pop_args(ctx, i, false, intrinsic.arity)?;
            let value = lower_pattern_call(ctx, i, intrinsic.pattern, args, writer)?;
            ctx.stack = ctx.stack.push(value);
            return Ok(());
        }
        if target.name == "GetTypeHash" {
            ctx.stack = ctx.stack.push(StackValue::HashString(target.declaring_class.clone()));
            return Ok(());
        }
        if target.name == "Hash" {
            let CallArgs { args, .. } = pop_args(ctx, i, false, 1)?;
            let content = match &args[0] {
                StackValue::String(s) => s.clone(),
                _ => {
                    return Err(CompileError::UnsupportedConstruct {
                        instruction_index: i,
                        instruction_text: "Hash".into(),
                        detail: "Hash(..) requires a string literal argument".into(),
                    })
                }
            };
            ctx.stack = ctx.stack.push(StackValue::HashString(content));
            return Ok(());
        }
    }

    let resolved = resolve_user_method(ctx.env.classes, target);

    // Shape 2: inline compile hint (non-virtual helper methods only — a
    // virtual hinted method still takes the call-site-engine path below).
    if !is_virtual {
        if let Some((_, method)) = resolved {
            if let Some(hint) = &method.compile_hint {
                if hint.kind == CompileHintKind::Inline {
                    let CallArgs { args, .. } = pop_args(ctx, i, false, method.params.len())?;
                    let value = lower_pattern_call(ctx, i, &hint.pattern, args, writer)?;
                    if method.returns_value {
                        ctx.stack = ctx.stack.push(value);
                    }
                    return Ok(());
                }
            }
        }
    }

    // Shapes 3-4: device property set/get.
    if is_virtual {
        if let Some(property) = target.name.strip_prefix("set_") {
            let CallArgs { receiver, args } = pop_args(ctx, i, true, 1)?;
            return lower_device_set(ctx, i, property, receiver, args.into_iter().next().expect("arity 1"), writer);
        }
        if target.name == "get_Slots" {
            let CallArgs { receiver, .. } = pop_args(ctx, i, true, 0)?;
            return lower_get_slots(ctx, i, receiver);
        }
        if target.name == "get_Length" {
            return Err(CompileError::UnsupportedConstruct {
                instruction_index: i,
                instruction_text: "get_Length".into(),
                detail: "slot-table length is not tracked in the consumed metadata".into(),
            });
        }
        // The slot-table indexer (`gen.Slots[i]`) compiles to a one-argument
        // `get_Item` call, ahead of the zero-argument `get_*` property shape
        // below — it only selects a slot, it doesn't read through it yet.
        if target.name == "get_Item" {
            let CallArgs { receiver, args } = pop_args(ctx, i, true, 1)?;
            return lower_slot_index(ctx, i, receiver, args.into_iter().next().expect("arity 1"), writer);
        }
        if let Some(property) = target.name.strip_prefix("get_") {
            let CallArgs { receiver, .. } = pop_args(ctx, i, true, 0)?;
            return lower_device_get(ctx, i, property, receiver);
        }
        // Shape 6: multicast aggregate read (`Get*`, capital G — distinct
        // from the `get_*` property convention above).
        if let Some(property) = target.name.strip_prefix("Get") {
            if !property.is_empty() {
                let CallArgs { receiver, args } = pop_args(ctx, i, true, 1)?;
                return lower_multicast_aggregate(ctx, i, property, receiver, args.into_iter().next().expect("arity 1"), writer);
            }
        }
    }

    // Shape 7: an ordinary user method call.
    let (target_class, target_method) = resolved.ok_or_else(|| CompileError::UnsupportedConstruct {
        instruction_index: i,
        instruction_text: format!("{}.{}", target.declaring_class, target.name),
        detail: "call target is not a known method or recognised intrinsic shape".into(),
    })?;
    let args_arity = target_method.params.len();
    let call_args = pop_args(ctx, i, is_virtual, args_arity)?;
    emit_call_site(ctx, i, target_class, target_method, call_args, writer)
}

fn lower_device_set(ctx: &mut ExecutionContext, i: usize, property: &str, receiver: Option<StackValue>, value: StackValue, writer: &mut OutputWriter) -> Result<(), CompileError> {
    let value_text = ctx.resolve_to_text(i, value, writer)?;
    match receiver {
        Some(StackValue::Device { pin_name, multicast: false, .. }) => {
            writer.append_code(i, format!("s {pin_name} {property} {value_text}"));
            Ok(())
        }
        Some(StackValue::Device { device_type, multicast: true, .. }) => {
            writer.append_code(i, format!("sb HASH(\"{}\") {property} {value_text}", device_type.type_name()));
            Ok(())
        }
        _ => Err(CompileError::UnsupportedConstruct {
            instruction_index: i,
            instruction_text: format!("set_{property}"),
            detail: "property setter called on a non-device receiver".into(),
        }),
    }
}

fn lower_get_slots(ctx: &mut ExecutionContext, i: usize, receiver: Option<StackValue>) -> Result<(), CompileError> {
    match receiver {
        Some(StackValue::Device { pin_name, device_type, multicast: false }) => {
            ctx.stack = ctx.stack.push(StackValue::DeviceSlots { pin_name, device_type });
            Ok(())
        }
        _ => Err(CompileError::UnsupportedConstruct {
            instruction_index: i,
            instruction_text: "get_Slots".into(),
            detail: "get_Slots called on a non-device (or multicast) receiver".into(),
        }),
    }
}

fn lower_slot_index(
    ctx: &mut ExecutionContext,
    i: usize,
    receiver: Option<StackValue>,
    index: StackValue,
    writer: &mut OutputWriter,
) -> Result<(), CompileError> {
    match receiver {
        Some(StackValue::DeviceSlots { pin_name, device_type }) => {
            // A deferred expression has no directly renderable form, and a
            // slot index is read at most once here but potentially rendered
            // twice downstream (index arg of `ls`) — force it to a concrete
            // value up front.
            let resolved_index = ctx.resolve(i, index, writer)?;
            ctx.stack = ctx.stack.push(StackValue::DeviceSlot {
                pin_name,
                device_type,
                slot_index: Box::new(resolved_index),
            });
            Ok(())
        }
        _ => Err(CompileError::UnsupportedConstruct {
            instruction_index: i,
            instruction_text: "get_Item".into(),
            detail: "slot indexer called on a receiver that isn't a slot table".into(),
        }),
    }
}

fn lower_device_get(ctx: &mut ExecutionContext, i: usize, property: &str, receiver: Option<StackValue>) -> Result<(), CompileError> {
    match receiver {
        Some(StackValue::Device { pin_name, multicast: false, .. }) => {
            ctx.stack = ctx.stack.push(StackValue::DeferredExpression {
                fragment: format!("l $ {pin_name} {property}"),
                free_on_resolve: RegisterSet::empty(),
            });
            Ok(())
        }
        Some(StackValue::DeviceSlot { pin_name, slot_index, .. }) => {
            let slot_text = slot_index.render_as_ic10().ok_or_else(|| CompileError::UnsupportedConstruct {
                instruction_index: i,
                instruction_text: format!("get_{property}"),
                detail: "slot index has no directly renderable form".into(),
            })?;
            ctx.stack = ctx.stack.push(StackValue::DeferredExpression {
                fragment: format!("ls $ {pin_name} {slot_text} {property}"),
                free_on_resolve: RegisterSet::empty(),
            });
            Ok(())
        }
        _ => Err(CompileError::UnsupportedConstruct {
            instruction_index: i,
            instruction_text: format!("get_{property}"),
            detail: "property getter called on a receiver that isn't a single device or slot".into(),
        }),
    }
}

fn lower_multicast_aggregate(
    ctx: &mut ExecutionContext,
    i: usize,
    property: &str,
    receiver: Option<StackValue>,
    mode: StackValue,
    writer: &mut OutputWriter,
) -> Result<(), CompileError> {
    match receiver {
        Some(StackValue::Device { device_type, multicast: true, .. }) => {
            let mode_text = ctx.resolve_to_text(i, mode, writer)?;
            ctx.stack = ctx.stack.push(StackValue::DeferredExpression {
                fragment: format!("lb $ HASH(\"{}\") HASH(\"\") {property} {mode_text}", device_type.type_name()),
                free_on_resolve: RegisterSet::empty(),
            });
            Ok(())
        }
        _ => Err(CompileError::UnsupportedConstruct {
            instruction_index: i,
            instruction_text: format!("Get{property}"),
            detail: "multicast aggregate read called on a non-multicast receiver".into(),
        }),
    }
}

fn emit_call_site(
    ctx: &mut ExecutionContext,
    i: usize,
    target_class: &ClassInfo,
    target_method: &MethodInfo,
    call_args: CallArgs,
    writer: &mut OutputWriter,
) -> Result<(), CompileError> {
    let target_ref = MethodRef {
        declaring_class: target_class.name.clone(),
        name: target_method.name.clone(),
    };
    ctx.dependencies.insert(target_ref.clone());

    let can_inline = ctx.inline_depth < ctx.env.max_inline_depth
        && ctx.registers.num_allocated() as usize + estimate_register_demand(target_method) <= 16;

    if can_inline {
        trace!(target = %target_ref.name, "inlining call");
        emit_inline_call(ctx, i, target_class, target_method, call_args, writer)
    } else {
        debug!(target = %target_ref.name, "falling back to call-stack lowering");
        emit_call_stack_call(ctx, i, &target_ref, target_method, call_args, writer)
    }
}

fn emit_inline_call(
    ctx: &mut ExecutionContext,
    i: usize,
    target_class: &ClassInfo,
    target_method: &MethodInfo,
    call_args: CallArgs,
    writer: &mut OutputWriter,
) -> Result<(), CompileError> {
    let body = ctx
        .env
        .decoded
        .get(&MethodRef {
            declaring_class: target_class.name.clone(),
            name: target_method.name.clone(),
        })
        .ok_or_else(|| CompileError::InternalInvariant(format!("method {} was not pre-decoded", target_method.name)))?;

    let mut initial_stack = VirtualStack::new();
    for arg in call_args.args {
        initial_stack = initial_stack.push(arg);
    }

    let return_sink = if target_method.returns_value {
        let (reg, next) = ctx.registers.allocate_first_free().ok_or(CompileError::RegisterExhausted { instruction_index: i })?;
        ctx.registers = next;
        ctx.temp_registers = ctx.temp_registers.allocate_at(reg);
        Some(reg)
    } else {
        None
    };

    let label_prefix = format!("{}_inl{i}", writer.label_prefix());
    let mut callee = ExecutionContext::new(
        ctx.env,
        target_class,
        target_method,
        true,
        label_prefix.clone(),
        ctx.registers,
        Some(initial_stack),
        return_sink,
        ctx.inline_depth + 1,
        )?;

    let mut callee_writer = OutputWriter::new(label_prefix, body.len());
    callee.compile(body, &mut callee_writer)?;

    writer.append_code(i, callee_writer.assemble().trim_end().to_owned());
    ctx.registers = ctx.registers.union(callee.live_registers());
    ctx.dependencies.extend(callee.dependencies().iter().cloned());

    if target_method.returns_value {
        ctx.stack = ctx.stack.push(StackValue::Register(return_sink.expect("returns_value implies a sink")));
    }
    Ok(())
}

/// Simulate the backing-register allocation an as-yet-uncompiled callee will
/// get if it's later compiled as a top-level method: every top-level context
/// for one compile run starts from the same `reserved` baseline
/// (`driver::compile_entry_class`) and allocates its params'/locals' backing
/// registers with `allocate_first_free()` from there (`ExecutionContext::new`).
/// Replaying that same number of allocations from the same baseline gives the
/// exact set the callee will occupy, without needing the callee's own
/// compile to have run yet.
fn callee_register_estimate(reserved: RegisterSet, target_method: &MethodInfo) -> RegisterSet {
    let mut regs = reserved;
    let mut picked = RegisterSet::empty();
    for _ in 0..estimate_register_demand(target_method) {
        match regs.allocate_first_free() {
            Some((r, next)) => {
                regs = next;
                picked = picked.allocate_at(r);
            }
            None => break,
        }
    }
    picked
}

fn emit_call_stack_call(
    ctx: &mut ExecutionContext,
    i: usize,
    target: &MethodRef,
    target_method: &MethodInfo,
    call_args: CallArgs,
    writer: &mut OutputWriter,
) -> Result<(), CompileError> {
    // The callee may not have been compiled yet (forward/cyclic reference),
    // so its exact post-compile footprint isn't available here — but every
    // top-level context shares the same `reserved` baseline, so replaying its
    // backing-register allocation from that baseline (`callee_register_estimate`)
    // gives the real clobbered set rather than assuming it starts at r0.
    let callee_estimate = callee_register_estimate(ctx.reserved, target_method);
    let saved = ctx.registers.intersect(callee_estimate);

    for r in saved.iter_rev() {
        writer.append_code(i, format!("push r{r}"));
    }
    writer.append_code(i, "push ra".to_owned());

    let mut args_text = Vec::with_capacity(call_args.args.len());
    for arg in call_args.args {
        args_text.push(ctx.resolve_to_text(i, arg, writer)?);
    }
    for text in &args_text {
        writer.append_code(i, format!("push {text}"));
    }

    writer.append_code(i, format!("jal {}", target.label()));
    writer.append_code(i, "pop ra".to_owned());
    for r in saved.iter() {
        writer.append_code(i, format!("pop r{r}"));
    }

    if target_method.returns_value {
        let (reg, next) = ctx.registers.allocate_first_free().ok_or(CompileError::RegisterExhausted { instruction_index: i })?;
        ctx.registers = next;
        ctx.temp_registers = ctx.temp_registers.allocate_at(reg);
        writer.append_code(i, format!("pop r{reg}"));
        ctx.stack = ctx.stack.push(StackValue::Register(reg));
    }
    Ok(())
}
