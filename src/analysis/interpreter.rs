//! Reference frame provider: forward abstract interpretation over the flow graph.
//!
//! [`ValueInterpreter`] computes, for every instruction, the merge of all abstract states that
//! reach it. Values are tracked per kind with an optional known constant, references with
//! nullness, string contents and array lengths. Control flow follows the [`FlowGraph`]: the
//! interpreter never prunes a branch because its condition is known, so every frame soundly
//! over-approximates all executions.
//!
//! # Architecture
//!
//! ```text
//! analyze(body)
//!   ├─ entry frame from receiver and parameter types
//!   └─ worklist over positions
//!        ├─ step(insn, frame, env)    shared with the concrete Evaluator
//!        ├─ normal successors          merge the post-state
//!        └─ exception successors       merge locals, stack = [caught type]
//! ```
//!
//! Static calls and static field reads are resolved through [`crate::analysis::lookup`]. When a
//! [`MethodLookup`] is attached, static callees receiving only known arguments are executed by
//! the [`Evaluator`] with a step budget; exceeding it yields an unknown result.

use std::{collections::VecDeque, sync::Arc};

use crate::{
    analysis::{
        evaluator::{EvalFailure, Evaluator},
        lookup::{builtin_static_call, builtin_static_field, MethodLookup},
        AbstractValue, EdgeKind, FlowGraph, Frame, FrameProvider, Nullness, RefValue,
    },
    assembly::{
        descriptor::{parse_field, FieldType, MethodDescriptor},
        BinaryOp, CompareOp, Condition, FieldOp, Insn, InsnId, InvokeKind, MemberRef, MethodBody,
        MethodKey, NarrowKind, NumKind, StackOp, VarKind,
    },
    utils::BitSet,
    Error, Result,
};

/// Default number of times a single position may be re-visited before analysis gives up.
pub const DEFAULT_MAX_VISITS: usize = 64;

/// Default step budget for evaluating one static callee.
pub const DEFAULT_CALL_BUDGET: usize = 1_000;

/// Default nesting depth for callee evaluation.
pub const DEFAULT_CALL_DEPTH: usize = 4;

/// Control transfer produced by executing one instruction.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Flow {
    /// Continue with the next instruction.
    Next,
    /// Unconditional transfer.
    Jump(InsnId),
    /// Conditional jump; `taken` is `None` when the operands are not known.
    Branch { target: InsnId, taken: Option<bool> },
    /// Switch; `target` is `None` when the selector is not known.
    Switch { target: Option<InsnId> },
    /// Method exit.
    Return(Option<AbstractValue>),
    /// `athrow`
    Throw,
    /// The instruction would throw for the known operands (division by zero, null dereference).
    Fault,
}

/// Resolution of static reads and calls during a step.
pub(crate) trait Environment {
    fn get_static(&self, field: &MemberRef) -> Option<AbstractValue>;
    fn invoke_static(&self, method: &MemberRef, args: &[AbstractValue]) -> Option<AbstractValue>;
}

/// Frame provider based on forward abstract interpretation.
#[derive(Clone)]
pub struct ValueInterpreter {
    callees: Option<Arc<dyn MethodLookup>>,
    call_budget: usize,
    max_call_depth: usize,
    max_visits: usize,
}

impl Default for ValueInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ValueInterpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueInterpreter")
            .field("callees", &self.callees.is_some())
            .field("call_budget", &self.call_budget)
            .field("max_call_depth", &self.max_call_depth)
            .field("max_visits", &self.max_visits)
            .finish()
    }
}

impl ValueInterpreter {
    /// Creates an interpreter that resolves only the built-in library table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            callees: None,
            call_budget: DEFAULT_CALL_BUDGET,
            max_call_depth: DEFAULT_CALL_DEPTH,
            max_visits: DEFAULT_MAX_VISITS,
        }
    }

    /// Evaluates static calls into bodies found through `lookup`.
    #[must_use]
    pub fn with_callees(mut self, lookup: Arc<dyn MethodLookup>) -> Self {
        self.callees = Some(lookup);
        self
    }

    /// Step budget for one callee evaluation.
    #[must_use]
    pub fn with_call_budget(mut self, steps: usize) -> Self {
        self.call_budget = steps;
        self
    }

    /// Maximum nesting of callee evaluations.
    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Maximum visits of one position.
    #[must_use]
    pub fn with_max_visits(mut self, visits: usize) -> Self {
        self.max_visits = visits.max(1);
        self
    }

    /// The state on method entry: receiver and parameters in their slots, empty stack.
    #[must_use]
    pub fn entry_frame(body: &MethodBody) -> Frame {
        let mut frame = Frame::new(usize::from(body.max_locals));
        for (slot, kind, ty) in body.parameters() {
            let value = match (kind, ty) {
                (VarKind::Ref, Some(ty)) if slot == 0 && !body.is_static() => {
                    AbstractValue::Ref(RefValue::not_null(ty))
                }
                (VarKind::Ref, Some(ty)) => AbstractValue::Ref(RefValue::of_type(ty)),
                (kind, _) => AbstractValue::unknown(kind),
            };
            frame.set_local(usize::from(slot), value);
        }
        frame
    }

    pub(crate) fn env(&self, depth: usize) -> CallEnv<'_> {
        CallEnv {
            interpreter: self,
            depth,
        }
    }
}

impl FrameProvider for ValueInterpreter {
    fn analyze(&self, body: &MethodBody) -> Result<Vec<Option<Frame>>> {
        let graph = FlowGraph::build(body)?;
        let positions = graph.positions();
        let len = graph.len();
        let mut frames: Vec<Option<Frame>> = vec![None; len];
        if len == 0 {
            return Ok(frames);
        }

        let mut caught: Vec<Option<String>> = vec![None; len];
        for tcb in &body.try_catch_blocks {
            if let Some(pos) = positions.of(tcb.handler) {
                caught[pos] = Some(match &caught[pos] {
                    Some(existing) if existing != tcb.caught_type() => {
                        "java/lang/Throwable".to_string()
                    }
                    _ => tcb.caught_type().to_string(),
                });
            }
        }

        let env = self.env(0);
        let mut visits = vec![0usize; len];
        let mut queued = BitSet::new(len);
        let mut worklist = VecDeque::from([0usize]);
        queued.insert(0);
        frames[0] = Some(Self::entry_frame(body));

        while let Some(pos) = worklist.pop_front() {
            queued.remove(pos);
            visits[pos] += 1;
            if visits[pos] > self.max_visits {
                return Err(Error::Analysis(format!(
                    "{}: position {pos} visited more than {} times",
                    body.key(),
                    self.max_visits
                )));
            }

            let Some(before) = frames[pos].clone() else {
                continue;
            };
            let Some(insn) = positions.at(pos).and_then(|id| body.instructions.get(id)) else {
                continue;
            };
            let mut after = before.clone();
            step(insn, &mut after, &env).map_err(|e| match e {
                Error::Analysis(message) => {
                    Error::Analysis(format!("{} at {pos} ({insn}): {message}", body.key()))
                }
                other => other,
            })?;

            for &(to, kind) in graph.edges(pos) {
                let mut incoming = Vec::with_capacity(2);
                if kind == EdgeKind::Exception {
                    let ty = caught[to].as_deref().unwrap_or("java/lang/Throwable");
                    for state in [&before, &after] {
                        let mut handler = state.clone();
                        handler.clear_stack();
                        handler.push(AbstractValue::Ref(RefValue::not_null(ty)));
                        incoming.push(handler);
                    }
                } else {
                    incoming.push(after.clone());
                }

                for state in incoming {
                    let changed = if let Some(existing) = frames[to].as_mut() {
                        existing.merge(&state)?
                    } else {
                        frames[to] = Some(state);
                        true
                    };
                    if changed && queued.insert(to) {
                        worklist.push_back(to);
                    }
                }
            }
        }

        Ok(frames)
    }
}

/// Call resolution at a given evaluation depth.
#[derive(Clone, Copy)]
pub(crate) struct CallEnv<'a> {
    interpreter: &'a ValueInterpreter,
    depth: usize,
}

impl Environment for CallEnv<'_> {
    fn get_static(&self, field: &MemberRef) -> Option<AbstractValue> {
        builtin_static_field(field)
    }

    fn invoke_static(&self, method: &MemberRef, args: &[AbstractValue]) -> Option<AbstractValue> {
        if let Some(value) = builtin_static_call(method, args) {
            return Some(value);
        }
        let callees = self.interpreter.callees.as_ref()?;
        if !args.iter().all(|a| a.has_known_value() || a.is_null()) {
            return None;
        }
        if self.depth >= self.interpreter.max_call_depth {
            tracing::debug!("call depth limit reached evaluating {}", method);
            return None;
        }
        let key = MethodKey::new(&method.owner, &method.name, &method.desc);
        let body = callees.find(&key)?;
        if !body.is_static() {
            return None;
        }

        let evaluator = Evaluator::with_env(
            self.interpreter.env(self.depth + 1),
            self.interpreter.call_budget,
        );
        match evaluator.invoke(&body, args) {
            Ok(Some(value)) if value.has_known_value() => Some(value),
            Ok(_) => None,
            Err(EvalFailure::BudgetExceeded(steps)) => {
                tracing::debug!("evaluation of {} aborted after {} steps", key, steps);
                None
            }
            Err(_) => None,
        }
    }
}

/// Unknown value for a field type.
fn unknown_of(ty: &FieldType) -> AbstractValue {
    match ty.internal_name() {
        Some(name) => AbstractValue::Ref(RefValue::of_type(name)),
        None => AbstractValue::unknown(ty.var_kind()),
    }
}

fn array_ref(descriptor: String, length: Option<i32>) -> AbstractValue {
    AbstractValue::Ref(RefValue {
        array_length: length.filter(|n| *n >= 0),
        ..RefValue::not_null(descriptor)
    })
}

/// Executes `insn` on `frame` in place.
///
/// # Errors
///
/// Returns [`Error::Analysis`] on stack underflow and [`Error::InvalidDescriptor`] for malformed
/// member descriptors.
#[allow(clippy::too_many_lines)]
pub(crate) fn step(insn: &Insn, frame: &mut Frame, env: &dyn Environment) -> Result<Flow> {
    let mut flow = Flow::Next;
    match insn {
        Insn::Label | Insn::Line(_) | Insn::Nop => {}
        Insn::Const(c) => frame.push(AbstractValue::from_constant(c)),
        Insn::Load(kind, slot) => {
            let local = frame.get_local(usize::from(*slot));
            let value = if local.kind() == Some(*kind) {
                local.clone()
            } else {
                AbstractValue::unknown(*kind)
            };
            frame.push(value);
        }
        Insn::Store(_, slot) => {
            let value = frame.pop()?;
            frame.set_local(usize::from(*slot), value);
        }
        Insn::Iinc { slot, delta } => {
            let slot = usize::from(*slot);
            let value = frame
                .get_local(slot)
                .as_int()
                .map(|v| v.wrapping_add(i32::from(*delta)));
            frame.set_local(slot, AbstractValue::Int(value));
        }
        Insn::Stack(op) => shuffle(*op, frame)?,
        Insn::Binary(op, kind) => {
            let rhs = frame.pop()?;
            let lhs = frame.pop()?;
            let (value, faults) = binary(*op, *kind, &lhs, &rhs);
            if faults {
                flow = Flow::Fault;
            }
            frame.push(value);
        }
        Insn::Neg(kind) => {
            let v = frame.pop()?;
            frame.push(match kind {
                NumKind::Int => AbstractValue::Int(v.as_int().map(i32::wrapping_neg)),
                NumKind::Long => AbstractValue::Long(v.as_long().map(i64::wrapping_neg)),
                NumKind::Float => AbstractValue::Float(v.as_float().map(|f| -f)),
                NumKind::Double => AbstractValue::Double(v.as_double().map(|d| -d)),
            });
        }
        Insn::Convert(from, to) => {
            let v = frame.pop()?;
            frame.push(convert(*from, *to, &v));
        }
        Insn::Narrow(kind) => {
            let v = frame.pop()?;
            frame.push(AbstractValue::Int(v.as_int().map(|i| match kind {
                NarrowKind::Byte => i32::from(i as i8),
                NarrowKind::Char => i32::from(i as u16),
                NarrowKind::Short => i32::from(i as i16),
            })));
        }
        Insn::Compare(op) => {
            let rhs = frame.pop()?;
            let lhs = frame.pop()?;
            frame.push(AbstractValue::Int(compare(*op, &lhs, &rhs)));
        }
        Insn::If(condition, target) => {
            let taken = if condition.operand_count() == 1 {
                let v = frame.pop()?;
                match condition {
                    Condition::Null => reference_nullness(&v).map(|n| n == Nullness::Null),
                    Condition::NonNull => reference_nullness(&v).map(|n| n == Nullness::NotNull),
                    _ => v.as_int().and_then(|i| condition.test(i, 0)),
                }
            } else {
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                if condition.is_reference() {
                    reference_equality(&lhs, &rhs).map(|eq| eq == (*condition == Condition::ACmpEq))
                } else {
                    match (lhs.as_int(), rhs.as_int()) {
                        (Some(l), Some(r)) => condition.test(l, r),
                        _ => None,
                    }
                }
            };
            flow = Flow::Branch {
                target: *target,
                taken,
            };
        }
        Insn::Goto(target) => flow = Flow::Jump(*target),
        Insn::TableSwitch {
            low,
            default,
            targets,
        } => {
            let key = frame.pop()?.as_int();
            flow = Flow::Switch {
                target: key.map(|k| {
                    let index = i64::from(k) - i64::from(*low);
                    usize::try_from(index)
                        .ok()
                        .and_then(|i| targets.get(i).copied())
                        .unwrap_or(*default)
                }),
            };
        }
        Insn::LookupSwitch {
            default,
            keys,
            targets,
        } => {
            let key = frame.pop()?.as_int();
            flow = Flow::Switch {
                target: key.map(|k| {
                    keys.iter()
                        .position(|case| *case == k)
                        .and_then(|i| targets.get(i).copied())
                        .unwrap_or(*default)
                }),
            };
        }
        Insn::Return(kind) => {
            let value = match kind {
                Some(_) => Some(frame.pop()?),
                None => None,
            };
            flow = Flow::Return(value);
        }
        Insn::Throw => {
            frame.pop()?;
            flow = Flow::Throw;
        }
        Insn::Field(op, member) => {
            let ty = parse_field(&member.desc)?;
            match op {
                FieldOp::GetStatic => {
                    let value = env.get_static(member).unwrap_or_else(|| unknown_of(&ty));
                    frame.push(value);
                }
                FieldOp::PutStatic => {
                    frame.pop()?;
                }
                FieldOp::GetField => {
                    if frame.pop()?.is_null() {
                        flow = Flow::Fault;
                    }
                    frame.push(unknown_of(&ty));
                }
                FieldOp::PutField => {
                    frame.pop()?;
                    if frame.pop()?.is_null() {
                        flow = Flow::Fault;
                    }
                }
            }
        }
        Insn::Invoke(kind, member) => {
            let desc = MethodDescriptor::parse(&member.desc)?;
            let mut args = Vec::with_capacity(desc.params.len());
            for _ in &desc.params {
                args.push(frame.pop()?);
            }
            args.reverse();
            if *kind != InvokeKind::Static && frame.pop()?.is_null() {
                flow = Flow::Fault;
            }
            if let Some(ret) = &desc.ret {
                let value = if *kind == InvokeKind::Static {
                    env.invoke_static(member, &args)
                        .filter(|v| v.kind() == Some(ret.var_kind()))
                } else {
                    None
                };
                frame.push(value.unwrap_or_else(|| unknown_of(ret)));
            }
        }
        Insn::InvokeDynamic { desc, .. } => {
            let desc = MethodDescriptor::parse(desc)?;
            for _ in &desc.params {
                frame.pop()?;
            }
            if let Some(ret) = &desc.ret {
                frame.push(unknown_of(ret));
            }
        }
        Insn::New(ty) => frame.push(AbstractValue::Ref(RefValue::not_null(ty.clone()))),
        Insn::NewArray(prim) => {
            let length = frame.pop()?.as_int();
            if length.is_some_and(|n| n < 0) {
                flow = Flow::Fault;
            }
            frame.push(array_ref(prim.array_descriptor().to_string(), length));
        }
        Insn::ANewArray(ty) => {
            let length = frame.pop()?.as_int();
            if length.is_some_and(|n| n < 0) {
                flow = Flow::Fault;
            }
            let descriptor = if ty.starts_with('[') {
                format!("[{ty}")
            } else {
                format!("[L{ty};")
            };
            frame.push(array_ref(descriptor, length));
        }
        Insn::MultiANewArray { desc, dims } => {
            let mut outer = None;
            for _ in 0..*dims {
                outer = frame.pop()?.as_int();
            }
            frame.push(array_ref(desc.clone(), outer));
        }
        Insn::ArrayLength => {
            let array = frame.pop()?;
            if array.is_null() {
                flow = Flow::Fault;
            }
            frame.push(AbstractValue::Int(array.array_length()));
        }
        Insn::ArrayLoad(kind) => {
            let index = frame.pop()?;
            let array = frame.pop()?;
            if array.is_null() || out_of_bounds(&array, &index) {
                flow = Flow::Fault;
            }
            let value = match kind.var_kind() {
                VarKind::Ref => array
                    .type_name()
                    .and_then(|t| t.strip_prefix('['))
                    .and_then(|component| parse_field(component).ok())
                    .map_or_else(|| AbstractValue::unknown(VarKind::Ref), |t| unknown_of(&t)),
                other => AbstractValue::unknown(other),
            };
            frame.push(value);
        }
        Insn::ArrayStore(_) => {
            frame.pop()?;
            let index = frame.pop()?;
            let array = frame.pop()?;
            if array.is_null() || out_of_bounds(&array, &index) {
                flow = Flow::Fault;
            }
        }
        Insn::CheckCast(ty) => {
            let value = frame.pop()?;
            frame.push(match value {
                AbstractValue::Ref(r) if r.nullness == Nullness::Null => AbstractValue::Ref(r),
                AbstractValue::Ref(r) => AbstractValue::Ref(RefValue {
                    ty: Some(ty.clone()),
                    string: r.string.filter(|_| ty == "java/lang/String"),
                    ..r
                }),
                _ => AbstractValue::Ref(RefValue::of_type(ty.clone())),
            });
        }
        Insn::InstanceOf(_) => {
            let value = frame.pop()?;
            frame.push(AbstractValue::Int(value.is_null().then_some(0)));
        }
        Insn::MonitorEnter | Insn::MonitorExit => {
            if frame.pop()?.is_null() {
                flow = Flow::Fault;
            }
        }
    }
    Ok(flow)
}

fn out_of_bounds(array: &AbstractValue, index: &AbstractValue) -> bool {
    match (array.array_length(), index.as_int()) {
        (Some(len), Some(i)) => i < 0 || i >= len,
        _ => false,
    }
}

fn reference_nullness(value: &AbstractValue) -> Option<Nullness> {
    match value.as_ref_value()?.nullness {
        Nullness::Unknown => None,
        known => Some(known),
    }
}

/// `Some(true)` if both references are null, `Some(false)` if exactly one is known null and the
/// other known non-null.
fn reference_equality(lhs: &AbstractValue, rhs: &AbstractValue) -> Option<bool> {
    match (reference_nullness(lhs)?, reference_nullness(rhs)?) {
        (Nullness::Null, Nullness::Null) => Some(true),
        (Nullness::Null, Nullness::NotNull) | (Nullness::NotNull, Nullness::Null) => Some(false),
        _ => None,
    }
}

fn shuffle(op: StackOp, frame: &mut Frame) -> Result<()> {
    let push_all = |frame: &mut Frame, values: &[AbstractValue]| {
        for v in values.iter().rev() {
            frame.push(v.clone());
        }
    };
    match op {
        StackOp::Pop => {
            frame.pop_slots(1)?;
        }
        StackOp::Pop2 => {
            frame.pop_slots(2)?;
        }
        StackOp::Dup => {
            let top = frame.pop_slots(1)?;
            push_all(frame, &top);
            push_all(frame, &top);
        }
        StackOp::DupX1 => {
            let top = frame.pop_slots(1)?;
            let under = frame.pop_slots(1)?;
            push_all(frame, &top);
            push_all(frame, &under);
            push_all(frame, &top);
        }
        StackOp::DupX2 => {
            let top = frame.pop_slots(1)?;
            let under = frame.pop_slots(2)?;
            push_all(frame, &top);
            push_all(frame, &under);
            push_all(frame, &top);
        }
        StackOp::Dup2 => {
            let top = frame.pop_slots(2)?;
            push_all(frame, &top);
            push_all(frame, &top);
        }
        StackOp::Dup2X1 => {
            let top = frame.pop_slots(2)?;
            let under = frame.pop_slots(1)?;
            push_all(frame, &top);
            push_all(frame, &under);
            push_all(frame, &top);
        }
        StackOp::Dup2X2 => {
            let top = frame.pop_slots(2)?;
            let under = frame.pop_slots(2)?;
            push_all(frame, &top);
            push_all(frame, &under);
            push_all(frame, &top);
        }
        StackOp::Swap => {
            let top = frame.pop_slots(1)?;
            let under = frame.pop_slots(1)?;
            push_all(frame, &top);
            push_all(frame, &under);
        }
    }
    Ok(())
}

/// Evaluates a binary operation. The flag is set when the operation is known to throw.
fn binary(op: BinaryOp, kind: NumKind, lhs: &AbstractValue, rhs: &AbstractValue) -> (AbstractValue, bool) {
    match kind {
        NumKind::Int => match (lhs.as_int(), rhs.as_int()) {
            (Some(_), Some(0)) if op.is_division() => (AbstractValue::Int(None), true),
            (Some(l), Some(r)) => (AbstractValue::Int(int_op(op, l, r)), false),
            (_, Some(0)) if op.is_division() => (AbstractValue::Int(None), true),
            _ => (AbstractValue::Int(None), false),
        },
        NumKind::Long => {
            let shift = if op.is_shift() { rhs.as_int().map(i64::from) } else { rhs.as_long() };
            match (lhs.as_long(), shift) {
                (_, Some(0)) if op.is_division() => (AbstractValue::Long(None), true),
                (Some(l), Some(r)) => (AbstractValue::Long(long_op(op, l, r)), false),
                _ => (AbstractValue::Long(None), false),
            }
        }
        NumKind::Float => (
            AbstractValue::Float(match (lhs.as_float(), rhs.as_float()) {
                (Some(l), Some(r)) => float_op(op, f64::from(l), f64::from(r)).map(|v| v as f32),
                _ => None,
            }),
            false,
        ),
        NumKind::Double => (
            AbstractValue::Double(match (lhs.as_double(), rhs.as_double()) {
                (Some(l), Some(r)) => float_op(op, l, r),
                _ => None,
            }),
            false,
        ),
    }
}

fn int_op(op: BinaryOp, l: i32, r: i32) -> Option<i32> {
    Some(match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Sub => l.wrapping_sub(r),
        BinaryOp::Mul => l.wrapping_mul(r),
        BinaryOp::Div => l.checked_div(r).unwrap_or(l),
        BinaryOp::Rem => l.checked_rem(r).unwrap_or(0),
        BinaryOp::Shl => l.wrapping_shl(r as u32),
        BinaryOp::Shr => l.wrapping_shr(r as u32),
        BinaryOp::Ushr => (l as u32).wrapping_shr(r as u32) as i32,
        BinaryOp::And => l & r,
        BinaryOp::Or => l | r,
        BinaryOp::Xor => l ^ r,
    })
}

fn long_op(op: BinaryOp, l: i64, r: i64) -> Option<i64> {
    Some(match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Sub => l.wrapping_sub(r),
        BinaryOp::Mul => l.wrapping_mul(r),
        BinaryOp::Div => l.checked_div(r).unwrap_or(l),
        BinaryOp::Rem => l.checked_rem(r).unwrap_or(0),
        BinaryOp::Shl => l.wrapping_shl(r as u32),
        BinaryOp::Shr => l.wrapping_shr(r as u32),
        BinaryOp::Ushr => (l as u64).wrapping_shr(r as u32) as i64,
        BinaryOp::And => l & r,
        BinaryOp::Or => l | r,
        BinaryOp::Xor => l ^ r,
    })
}

/// Floating point arithmetic; `%` matches the JVM's truncating remainder.
fn float_op(op: BinaryOp, l: f64, r: f64) -> Option<f64> {
    Some(match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div => l / r,
        BinaryOp::Rem => l % r,
        _ => return None,
    })
}

// Rust `as` casts from floats saturate and map NaN to zero, as the JVM does.
fn convert(from: NumKind, to: NumKind, v: &AbstractValue) -> AbstractValue {
    let as_f64 = || match from {
        NumKind::Int => v.as_int().map(f64::from),
        NumKind::Long => v.as_long().map(|l| l as f64),
        NumKind::Float => v.as_float().map(f64::from),
        NumKind::Double => v.as_double(),
    };
    match (from, to) {
        (NumKind::Long, NumKind::Int) => AbstractValue::Int(v.as_long().map(|l| l as i32)),
        (NumKind::Int, NumKind::Long) => AbstractValue::Long(v.as_int().map(i64::from)),
        (NumKind::Long, NumKind::Float) => AbstractValue::Float(v.as_long().map(|l| l as f32)),
        (NumKind::Int, NumKind::Float) => AbstractValue::Float(v.as_int().map(|i| i as f32)),
        (_, NumKind::Int) => AbstractValue::Int(as_f64().map(|f| f as i32)),
        (_, NumKind::Long) => AbstractValue::Long(as_f64().map(|f| f as i64)),
        (_, NumKind::Float) => AbstractValue::Float(as_f64().map(|f| f as f32)),
        (_, NumKind::Double) => AbstractValue::Double(as_f64()),
    }
}

fn compare(op: CompareOp, lhs: &AbstractValue, rhs: &AbstractValue) -> Option<i32> {
    let ordering = |o: std::cmp::Ordering| o as i32;
    match op {
        CompareOp::Lcmp => Some(ordering(lhs.as_long()?.cmp(&rhs.as_long()?))),
        CompareOp::Fcmpl | CompareOp::Fcmpg => {
            let (l, r) = (lhs.as_float()?, rhs.as_float()?);
            Some(match l.partial_cmp(&r) {
                Some(o) => ordering(o),
                None if op == CompareOp::Fcmpl => -1,
                None => 1,
            })
        }
        CompareOp::Dcmpl | CompareOp::Dcmpg => {
            let (l, r) = (lhs.as_double()?, rhs.as_double()?);
            Some(match l.partial_cmp(&r) {
                Some(o) => ordering(o),
                None if op == CompareOp::Dcmpl => -1,
                None => 1,
            })
        }
    }
}
