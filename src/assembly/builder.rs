//! Fluent construction of method bodies with symbolic labels.
//!
//! Labels are named with strings and may be referenced before they are placed. Everything is
//! resolved in [`MethodBuilder::build`], which fails if a referenced label was never placed or a
//! label was placed twice.
//!
//! # Example
//!
//! ```rust
//! use bytefold::assembly::{Condition, MethodBuilder};
//!
//! let body = MethodBuilder::new("Demo", "pick", "(I)I")
//!     .iload(0)
//!     .jump(Condition::Eq, "zero")
//!     .iconst(1)
//!     .ireturn()
//!     .label("zero")
//!     .iconst(2)
//!     .ireturn()
//!     .build()?;
//!
//! assert_eq!(body.instructions.len(), 7);
//! # Ok::<(), bytefold::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        ArrayKind, BinaryOp, Condition, Constant, FieldOp, Insn, InsnId, InvokeKind,
        LocalVariable, MemberRef, MethodAccess, MethodBody, NumKind, PrimitiveType, StackOp,
        TryCatchBlock, VarKind,
    },
    Error, Result,
};

enum Pending {
    Insn(Insn),
    Label(String),
    Jump(Option<Condition>, String),
    Table {
        low: i32,
        default: String,
        targets: Vec<String>,
    },
    Lookup {
        default: String,
        cases: Vec<(i32, String)>,
    },
}

struct PendingRange {
    start: String,
    end: String,
    handler: String,
    catch_type: Option<String>,
}

struct PendingLocal {
    name: String,
    descriptor: String,
    slot: u16,
    start: String,
    end: String,
}

/// Builder for [`MethodBody`]. Methods are `public static` unless [`MethodBuilder::access`] says
/// otherwise.
pub struct MethodBuilder {
    owner: String,
    name: String,
    descriptor: String,
    access: MethodAccess,
    items: Vec<Pending>,
    ranges: Vec<PendingRange>,
    locals: Vec<PendingLocal>,
}

impl MethodBuilder {
    /// Starts a new method.
    pub fn new(owner: impl Into<String>, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            access: MethodAccess::PUBLIC | MethodAccess::STATIC,
            items: Vec::new(),
            ranges: Vec::new(),
            locals: Vec::new(),
        }
    }

    /// Sets the access flags.
    #[must_use]
    pub fn access(mut self, access: MethodAccess) -> Self {
        self.access = access;
        self
    }

    /// Appends an arbitrary instruction. Jumps must go through the label-aware helpers.
    #[must_use]
    pub fn insn(mut self, insn: Insn) -> Self {
        self.items.push(Pending::Insn(insn));
        self
    }

    /// Places a label.
    #[must_use]
    pub fn label(mut self, name: &str) -> Self {
        self.items.push(Pending::Label(name.to_string()));
        self
    }

    /// Line number marker.
    #[must_use]
    pub fn line(self, line: u32) -> Self {
        self.insn(Insn::Line(line))
    }

    /// `nop`
    #[must_use]
    pub fn nop(self) -> Self {
        self.insn(Insn::Nop)
    }

    /// Pushes any literal.
    #[must_use]
    pub fn constant(self, value: Constant) -> Self {
        self.insn(Insn::Const(value))
    }

    /// Pushes an `int`.
    #[must_use]
    pub fn iconst(self, value: i32) -> Self {
        self.constant(Constant::Int(value))
    }

    /// Pushes a `long`.
    #[must_use]
    pub fn lconst(self, value: i64) -> Self {
        self.constant(Constant::Long(value))
    }

    /// Pushes a `double`.
    #[must_use]
    pub fn dconst(self, value: f64) -> Self {
        self.constant(Constant::Double(value))
    }

    /// Pushes a string literal.
    #[must_use]
    pub fn sconst(self, value: &str) -> Self {
        self.constant(Constant::String(value.to_string()))
    }

    /// `aconst_null`
    #[must_use]
    pub fn aconst_null(self) -> Self {
        self.constant(Constant::Null)
    }

    /// `xload slot`
    #[must_use]
    pub fn load(self, kind: VarKind, slot: u16) -> Self {
        self.insn(Insn::Load(kind, slot))
    }

    /// `xstore slot`
    #[must_use]
    pub fn store(self, kind: VarKind, slot: u16) -> Self {
        self.insn(Insn::Store(kind, slot))
    }

    /// `iload slot`
    #[must_use]
    pub fn iload(self, slot: u16) -> Self {
        self.load(VarKind::Int, slot)
    }

    /// `istore slot`
    #[must_use]
    pub fn istore(self, slot: u16) -> Self {
        self.store(VarKind::Int, slot)
    }

    /// `aload slot`
    #[must_use]
    pub fn aload(self, slot: u16) -> Self {
        self.load(VarKind::Ref, slot)
    }

    /// `astore slot`
    #[must_use]
    pub fn astore(self, slot: u16) -> Self {
        self.store(VarKind::Ref, slot)
    }

    /// `iinc slot delta`
    #[must_use]
    pub fn iinc(self, slot: u16, delta: i16) -> Self {
        self.insn(Insn::Iinc { slot, delta })
    }

    /// Stack manipulation.
    #[must_use]
    pub fn stack(self, op: StackOp) -> Self {
        self.insn(Insn::Stack(op))
    }

    /// `pop`
    #[must_use]
    pub fn pop(self) -> Self {
        self.stack(StackOp::Pop)
    }

    /// `dup`
    #[must_use]
    pub fn dup(self) -> Self {
        self.stack(StackOp::Dup)
    }

    /// `swap`
    #[must_use]
    pub fn swap(self) -> Self {
        self.stack(StackOp::Swap)
    }

    /// Arithmetic or bitwise operation.
    #[must_use]
    pub fn binary(self, op: BinaryOp, kind: NumKind) -> Self {
        self.insn(Insn::Binary(op, kind))
    }

    /// `iadd`
    #[must_use]
    pub fn iadd(self) -> Self {
        self.binary(BinaryOp::Add, NumKind::Int)
    }

    /// `imul`
    #[must_use]
    pub fn imul(self) -> Self {
        self.binary(BinaryOp::Mul, NumKind::Int)
    }

    /// `idiv`
    #[must_use]
    pub fn idiv(self) -> Self {
        self.binary(BinaryOp::Div, NumKind::Int)
    }

    /// Conditional jump to `label`.
    #[must_use]
    pub fn jump(mut self, condition: Condition, label: &str) -> Self {
        self.items
            .push(Pending::Jump(Some(condition), label.to_string()));
        self
    }

    /// `goto label`
    #[must_use]
    pub fn goto(mut self, label: &str) -> Self {
        self.items.push(Pending::Jump(None, label.to_string()));
        self
    }

    /// `tableswitch` over `low..low + targets.len()`.
    #[must_use]
    pub fn tableswitch(mut self, low: i32, default: &str, targets: &[&str]) -> Self {
        self.items.push(Pending::Table {
            low,
            default: default.to_string(),
            targets: targets.iter().map(ToString::to_string).collect(),
        });
        self
    }

    /// `lookupswitch` with explicit `(key, label)` cases.
    #[must_use]
    pub fn lookupswitch(mut self, default: &str, cases: &[(i32, &str)]) -> Self {
        self.items.push(Pending::Lookup {
            default: default.to_string(),
            cases: cases.iter().map(|(k, l)| (*k, l.to_string())).collect(),
        });
        self
    }

    /// `ireturn`
    #[must_use]
    pub fn ireturn(self) -> Self {
        self.insn(Insn::Return(Some(VarKind::Int)))
    }

    /// `areturn`
    #[must_use]
    pub fn areturn(self) -> Self {
        self.insn(Insn::Return(Some(VarKind::Ref)))
    }

    /// `return`
    #[must_use]
    pub fn vreturn(self) -> Self {
        self.insn(Insn::Return(None))
    }

    /// `athrow`
    #[must_use]
    pub fn athrow(self) -> Self {
        self.insn(Insn::Throw)
    }

    /// Field access.
    #[must_use]
    pub fn field(self, op: FieldOp, owner: &str, name: &str, desc: &str) -> Self {
        self.insn(Insn::Field(op, MemberRef::new(owner, name, desc)))
    }

    /// Method invocation.
    #[must_use]
    pub fn invoke(self, kind: InvokeKind, owner: &str, name: &str, desc: &str) -> Self {
        self.insn(Insn::Invoke(kind, MemberRef::new(owner, name, desc)))
    }

    /// `invokestatic`
    #[must_use]
    pub fn invokestatic(self, owner: &str, name: &str, desc: &str) -> Self {
        self.invoke(InvokeKind::Static, owner, name, desc)
    }

    /// `new type`
    #[must_use]
    pub fn new_object(self, ty: &str) -> Self {
        self.insn(Insn::New(ty.to_string()))
    }

    /// `newarray`
    #[must_use]
    pub fn newarray(self, ty: PrimitiveType) -> Self {
        self.insn(Insn::NewArray(ty))
    }

    /// `arraylength`
    #[must_use]
    pub fn arraylength(self) -> Self {
        self.insn(Insn::ArrayLength)
    }

    /// `xaload`
    #[must_use]
    pub fn array_load(self, kind: ArrayKind) -> Self {
        self.insn(Insn::ArrayLoad(kind))
    }

    /// `xastore`
    #[must_use]
    pub fn array_store(self, kind: ArrayKind) -> Self {
        self.insn(Insn::ArrayStore(kind))
    }

    /// `checkcast type`
    #[must_use]
    pub fn checkcast(self, ty: &str) -> Self {
        self.insn(Insn::CheckCast(ty.to_string()))
    }

    /// Adds an exception range. Ranges keep the order they are declared in.
    #[must_use]
    pub fn try_catch(mut self, start: &str, end: &str, handler: &str, catch_type: Option<&str>) -> Self {
        self.ranges.push(PendingRange {
            start: start.to_string(),
            end: end.to_string(),
            handler: handler.to_string(),
            catch_type: catch_type.map(ToString::to_string),
        });
        self
    }

    /// Adds a local variable debug range.
    #[must_use]
    pub fn local(mut self, name: &str, descriptor: &str, slot: u16, start: &str, end: &str) -> Self {
        self.locals.push(PendingLocal {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            slot,
            start: start.to_string(),
            end: end.to_string(),
        });
        self
    }

    /// Resolves labels and produces the body. `max_locals` covers parameters and every slot
    /// the code touches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if a label is placed twice or referenced but never placed,
    /// and propagates [`MethodBody::verify`] failures.
    pub fn build(self) -> Result<MethodBody> {
        let mut body = MethodBody::new(self.owner, self.name, self.descriptor, self.access);

        let mut labels: HashMap<String, InsnId> = HashMap::new();
        let mut deferred = Vec::new();
        for item in self.items {
            match item {
                Pending::Insn(insn) => {
                    body.instructions.push(insn);
                }
                Pending::Label(name) => {
                    let id = body.instructions.push(Insn::Label);
                    if labels.insert(name.clone(), id).is_some() {
                        return Err(malformed_error!("label '{}' placed twice", name));
                    }
                }
                other => {
                    let id = body.instructions.push(Insn::Nop);
                    deferred.push((id, other));
                }
            }
        }

        let resolve = |name: &str| -> Result<InsnId> {
            labels
                .get(name)
                .copied()
                .ok_or_else(|| malformed_error!("undefined label '{}'", name))
        };

        for (id, pending) in deferred {
            let insn = match pending {
                Pending::Jump(Some(cond), target) => Insn::If(cond, resolve(&target)?),
                Pending::Jump(None, target) => Insn::Goto(resolve(&target)?),
                Pending::Table {
                    low,
                    default,
                    targets,
                } => Insn::TableSwitch {
                    low,
                    default: resolve(&default)?,
                    targets: targets.iter().map(|t| resolve(t)).collect::<Result<_>>()?,
                },
                Pending::Lookup { default, cases } => Insn::LookupSwitch {
                    default: resolve(&default)?,
                    keys: cases.iter().map(|(k, _)| *k).collect(),
                    targets: cases.iter().map(|(_, t)| resolve(t)).collect::<Result<_>>()?,
                },
                Pending::Insn(_) | Pending::Label(_) => continue,
            };
            body.instructions.set(id, insn)?;
        }

        for range in self.ranges {
            body.try_catch_blocks.push(TryCatchBlock {
                start: resolve(&range.start)?,
                end: resolve(&range.end)?,
                handler: resolve(&range.handler)?,
                catch_type: range.catch_type,
            });
        }
        for local in self.locals {
            body.local_variables.push(LocalVariable {
                name: local.name,
                descriptor: local.descriptor,
                slot: local.slot,
                start: resolve(&local.start)?,
                end: resolve(&local.end)?,
            });
        }

        let touched = body
            .instructions
            .iter()
            .filter_map(|(_, insn)| match insn {
                Insn::Load(k, slot) | Insn::Store(k, slot) => Some(*slot as usize + k.size()),
                Insn::Iinc { slot, .. } => Some(*slot as usize + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        body.max_locals = body.max_locals.max(touched as u16);

        body.verify().map_err(|e| match e {
            Error::InvalidDescriptor(_) | Error::Malformed { .. } => e,
            other => malformed_error!("{}", other),
        })?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_and_backward_labels() {
        let body = MethodBuilder::new("A", "loop", "(I)V")
            .label("top")
            .iload(0)
            .jump(Condition::Le, "out")
            .iinc(0, -1)
            .goto("top")
            .label("out")
            .vreturn()
            .build()
            .unwrap();
        let ids = body.instructions.ids();
        assert_eq!(body.instructions.get(ids[2]), Some(&Insn::If(Condition::Le, ids[5])));
        assert_eq!(body.instructions.get(ids[4]), Some(&Insn::Goto(ids[0])));
        assert_eq!(body.max_locals, 1);
    }

    #[test]
    fn test_switch_resolution() {
        let body = MethodBuilder::new("A", "s", "(I)I")
            .iload(0)
            .lookupswitch("d", &[(1, "a"), (7, "d")])
            .label("a")
            .iconst(1)
            .ireturn()
            .label("d")
            .iconst(0)
            .ireturn()
            .build()
            .unwrap();
        let refs = body.flow_references();
        let ids = body.instructions.ids();
        assert_eq!(refs.get(&ids[2]), Some(&1));
        assert_eq!(refs.get(&ids[5]), Some(&2));
    }

    #[test]
    fn test_label_errors() {
        let undefined = MethodBuilder::new("A", "m", "()V").goto("nowhere").build();
        assert!(matches!(undefined, Err(Error::Malformed { .. })));

        let twice = MethodBuilder::new("A", "m", "()V")
            .label("x")
            .label("x")
            .vreturn()
            .build();
        assert!(twice.is_err());

        let bad_desc = MethodBuilder::new("A", "m", "()V")
            .invokestatic("B", "f", "(Q)V")
            .vreturn()
            .build();
        assert!(matches!(bad_desc, Err(Error::InvalidDescriptor(_))));
    }
}
