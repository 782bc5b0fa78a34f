//! Method bodies: instructions plus exception ranges and local variable debug ranges.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use bitflags::bitflags;

use crate::{
    assembly::{
        descriptor::{self, MethodDescriptor},
        Insn, InsnId, InsnList, Positions, VarKind,
    },
    Error, Result,
};

bitflags! {
    /// Method access flags, with the class-file bit values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodAccess: u16 {
        /// `public`
        const PUBLIC = 0x0001;
        /// `private`
        const PRIVATE = 0x0002;
        /// `protected`
        const PROTECTED = 0x0004;
        /// `static`
        const STATIC = 0x0008;
        /// `final`
        const FINAL = 0x0010;
        /// `synchronized`
        const SYNCHRONIZED = 0x0020;
        /// Compiler generated bridge
        const BRIDGE = 0x0040;
        /// Variable arity
        const VARARGS = 0x0080;
        /// `native`
        const NATIVE = 0x0100;
        /// `abstract`
        const ABSTRACT = 0x0400;
        /// `strictfp`
        const STRICT = 0x0800;
        /// Compiler generated
        const SYNTHETIC = 0x1000;
    }
}

/// Identity of a method: declaring class, name and descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    /// Internal name of the declaring class
    pub owner: String,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub desc: String,
}

impl MethodKey {
    /// Creates a key.
    pub fn new(owner: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.desc)
    }
}

/// An exception handler range.
///
/// Instructions from `start` up to (not including) `end` are protected; exceptions assignable to
/// `catch_type` transfer control to `handler`. A `None` type catches everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TryCatchBlock {
    /// First protected label
    pub start: InsnId,
    /// Exclusive end label
    pub end: InsnId,
    /// Handler entry label
    pub handler: InsnId,
    /// Internal name of the caught type, `None` for catch-all
    pub catch_type: Option<String>,
}

impl TryCatchBlock {
    /// Caught type, with catch-all reported as `java/lang/Throwable`.
    #[must_use]
    pub fn caught_type(&self) -> &str {
        self.catch_type.as_deref().unwrap_or("java/lang/Throwable")
    }

    /// Returns `true` if `label` is one of this block's three labels.
    #[must_use]
    pub fn references(&self, label: InsnId) -> bool {
        self.start == label || self.end == label || self.handler == label
    }
}

/// A local variable debug entry, live from `start` up to `end`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalVariable {
    /// Source name
    pub name: String,
    /// Field descriptor of the variable
    pub descriptor: String,
    /// Local slot
    pub slot: u16,
    /// Scope start label
    pub start: InsnId,
    /// Scope end label
    pub end: InsnId,
}

/// A method and its code.
#[derive(Debug, Clone)]
pub struct MethodBody {
    /// Internal name of the declaring class
    pub owner: String,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Access flags
    pub access: MethodAccess,
    /// Number of local slots, parameters included
    pub max_locals: u16,
    /// The code
    pub instructions: InsnList,
    /// Exception ranges in handler-precedence order
    pub try_catch_blocks: Vec<TryCatchBlock>,
    /// Local variable debug entries
    pub local_variables: Vec<LocalVariable>,
}

impl MethodBody {
    /// Creates an empty body. `max_locals` is initialised to the parameter slots.
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        access: MethodAccess,
    ) -> Self {
        let mut body = Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            access,
            max_locals: 0,
            instructions: InsnList::new(),
            try_catch_blocks: Vec::new(),
            local_variables: Vec::new(),
        };
        body.max_locals = body.parameter_slots() as u16;
        body
    }

    /// The identity of this method.
    #[must_use]
    pub fn key(&self) -> MethodKey {
        MethodKey::new(&self.owner, &self.name, &self.descriptor)
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.contains(MethodAccess::STATIC)
    }

    /// Slots occupied by the receiver (if any) and parameters.
    #[must_use]
    pub fn parameter_slots(&self) -> usize {
        let receiver = usize::from(!self.is_static());
        receiver + descriptor::method_slots(&self.descriptor).0
    }

    /// `(slot, kind, reference type)` of the receiver and each parameter, in slot order.
    #[must_use]
    pub fn parameters(&self) -> Vec<(u16, VarKind, Option<String>)> {
        let mut out = Vec::new();
        let mut slot = 0u16;
        if !self.is_static() {
            out.push((0, VarKind::Ref, Some(self.owner.clone())));
            slot = 1;
        }
        if let Ok(desc) = MethodDescriptor::parse(&self.descriptor) {
            for param in desc.params {
                out.push((slot, param.var_kind(), param.internal_name()));
                slot += param.size() as u16;
            }
        }
        out
    }

    /// Snapshot of instruction positions.
    #[must_use]
    pub fn positions(&self) -> Positions {
        self.instructions.positions()
    }

    /// Counts of jump and switch references per label. Switches count once per entry.
    #[must_use]
    pub fn flow_references(&self) -> HashMap<InsnId, usize> {
        let mut refs = HashMap::new();
        for (_, insn) in &self.instructions {
            for target in insn.jump_targets() {
                *refs.entry(target).or_insert(0) += 1;
            }
        }
        refs
    }

    /// Labels used by exception ranges.
    #[must_use]
    pub fn range_labels(&self) -> HashSet<InsnId> {
        self.try_catch_blocks
            .iter()
            .flat_map(|tcb| [tcb.start, tcb.end, tcb.handler])
            .collect()
    }

    /// Handler entry labels.
    #[must_use]
    pub fn handler_labels(&self) -> HashSet<InsnId> {
        self.try_catch_blocks.iter().map(|tcb| tcb.handler).collect()
    }

    /// Returns `true` if anything refers to `label`: a jump, switch, exception range or local
    /// variable range.
    #[must_use]
    pub fn is_referenced(&self, label: InsnId) -> bool {
        self.try_catch_blocks.iter().any(|tcb| tcb.references(label))
            || self
                .local_variables
                .iter()
                .any(|lv| lv.start == label || lv.end == label)
            || self
                .instructions
                .iter()
                .any(|(_, insn)| insn.reference_count(label) > 0)
    }

    /// Removes an instruction, refusing to remove a label that is still referenced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LabelInUse`] for referenced labels and [`Error::Malformed`] for unlinked
    /// handles.
    pub fn remove(&mut self, id: InsnId) -> Result<Insn> {
        if matches!(self.instructions.get(id), Some(Insn::Label)) && self.is_referenced(id) {
            return Err(Error::LabelInUse(id.index()));
        }
        self.instructions.remove(id)
    }

    /// Removes every `nop`. Returns the number removed.
    pub fn remove_nops(&mut self) -> usize {
        let nops: Vec<InsnId> = self
            .instructions
            .iter()
            .filter(|(_, insn)| matches!(insn, Insn::Nop))
            .map(|(id, _)| id)
            .collect();
        for &id in &nops {
            // Collected from the live list above
            let _ = self.instructions.remove(id);
        }
        nops.len()
    }

    /// Re-anchors local variable ranges whose labels were removed or reordered.
    ///
    /// A dangling start moves to the first label of the method and a dangling end to the last,
    /// inserting a boundary label when the method does not begin or end with one. An inverted
    /// range is widened to the whole method. Returns `true` if any range was changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if a range endpoint is linked but is not a label.
    pub fn repair_local_ranges(&mut self) -> Result<bool> {
        let mut changed = false;
        for index in 0..self.local_variables.len() {
            let (start, end) = {
                let lv = &self.local_variables[index];
                (lv.start, lv.end)
            };
            let start_ok = self.check_label(start, "local variable start")?;
            let end_ok = self.check_label(end, "local variable end")?;
            if !start_ok {
                let label = self.boundary_label(true)?;
                self.local_variables[index].start = label;
                changed = true;
            }
            if !end_ok {
                let label = self.boundary_label(false)?;
                self.local_variables[index].end = label;
                changed = true;
            }
        }

        // Code motion can leave a range whose end precedes its start.
        let positions = self.positions();
        for index in 0..self.local_variables.len() {
            let lv = &self.local_variables[index];
            if positions.of(lv.start) > positions.of(lv.end) {
                let start = self.boundary_label(true)?;
                let end = self.boundary_label(false)?;
                self.local_variables[index].start = start;
                self.local_variables[index].end = end;
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Checks that every label reference resolves to a linked label, that ranges are ordered,
    /// and that member descriptors parse.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] or [`Error::InvalidDescriptor`] describing the first
    /// violation found.
    pub fn verify(&self) -> Result<()> {
        let positions = self.positions();
        let label_at = |id: InsnId, what: &str| -> Result<usize> {
            match (self.instructions.get(id), positions.of(id)) {
                (Some(Insn::Label), Some(pos)) => Ok(pos),
                _ => Err(malformed_error!("{} {} is not a label of {}", what, id, self.key())),
            }
        };

        for (_, insn) in &self.instructions {
            for target in insn.jump_targets() {
                label_at(target, "jump target")?;
            }
            match insn {
                Insn::Field(_, m) => {
                    descriptor::parse_field(&m.desc)?;
                }
                Insn::Invoke(_, m) => {
                    MethodDescriptor::parse(&m.desc)?;
                }
                Insn::InvokeDynamic { desc, .. } => {
                    MethodDescriptor::parse(desc)?;
                }
                Insn::LookupSwitch { keys, targets, .. } if keys.len() != targets.len() => {
                    return Err(malformed_error!("lookupswitch key/target count mismatch"));
                }
                _ => {}
            }
        }

        for tcb in &self.try_catch_blocks {
            let start = label_at(tcb.start, "try start")?;
            let end = label_at(tcb.end, "try end")?;
            label_at(tcb.handler, "handler")?;
            if start > end {
                return Err(malformed_error!(
                    "try range {}..{} is inverted in {}",
                    tcb.start,
                    tcb.end,
                    self.key()
                ));
            }
        }

        for lv in &self.local_variables {
            let start = label_at(lv.start, "local start")?;
            let end = label_at(lv.end, "local end")?;
            if start > end {
                return Err(malformed_error!("local variable '{}' range is inverted", lv.name));
            }
        }
        Ok(())
    }

    fn check_label(&self, id: InsnId, what: &str) -> Result<bool> {
        match self.instructions.get(id) {
            None => Ok(false),
            Some(Insn::Label) => Ok(true),
            Some(other) => Err(malformed_error!("{} {} is '{}', not a label", what, id, other)),
        }
    }

    fn boundary_label(&mut self, at_start: bool) -> Result<InsnId> {
        let edge = if at_start {
            self.instructions.first()
        } else {
            self.instructions.last()
        };
        match edge {
            Some(id) if matches!(self.instructions.get(id), Some(Insn::Label)) => Ok(id),
            Some(id) if at_start => self.instructions.insert_before(id, Insn::Label),
            _ => Ok(self.instructions.push(Insn::Label)),
        }
    }
}

impl fmt::Display for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.key())?;
        for (id, insn) in &self.instructions {
            if insn.is_label() {
                writeln!(f, "{id}:")?;
            } else {
                writeln!(f, "    {insn}")?;
            }
        }
        for tcb in &self.try_catch_blocks {
            writeln!(
                f,
                "    try {} {} catch {} -> {}",
                tcb.start,
                tcb.end,
                tcb.caught_type(),
                tcb.handler
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::MethodBuilder;

    #[test]
    fn test_parameters() {
        let body = MethodBody::new("A", "m", "(IJLjava/lang/String;)V", MethodAccess::PUBLIC);
        assert_eq!(body.parameter_slots(), 5);
        assert_eq!(body.max_locals, 5);
        let params = body.parameters();
        assert_eq!(params[0], (0, VarKind::Ref, Some("A".to_string())));
        assert_eq!(params[2], (2, VarKind::Long, None));
        assert_eq!(params[3], (4, VarKind::Ref, Some("java/lang/String".into())));
    }

    #[test]
    fn test_remove_referenced_label() {
        let mut body = MethodBuilder::new("A", "m", "()V")
            .goto("end")
            .label("end")
            .vreturn()
            .build()
            .unwrap();
        let label = body.instructions.ids()[1];
        assert!(matches!(body.remove(label), Err(Error::LabelInUse(_))));

        let goto = body.instructions.first().unwrap();
        body.remove(goto).unwrap();
        body.remove(label).unwrap();
        assert_eq!(body.instructions.len(), 1);
    }

    #[test]
    fn test_repair_local_ranges() {
        let mut body = MethodBuilder::new("A", "m", "()V")
            .iconst(1)
            .label("s")
            .istore(0)
            .label("e")
            .vreturn()
            .local("x", "I", 0, "s", "e")
            .build()
            .unwrap();
        let ids = body.instructions.ids();
        body.instructions.remove(ids[1]).unwrap();
        body.instructions.remove(ids[3]).unwrap();
        assert!(body.verify().is_err());

        assert!(body.repair_local_ranges().unwrap());
        body.verify().unwrap();
        let lv = &body.local_variables[0];
        assert_eq!(body.instructions.first(), Some(lv.start));
        assert_eq!(body.instructions.last(), Some(lv.end));
        assert!(!body.repair_local_ranges().unwrap());
    }

    #[test]
    fn test_verify_inverted_range() {
        let mut body = MethodBuilder::new("A", "m", "()V")
            .label("a")
            .iconst(1)
            .label("b")
            .pop()
            .label("h")
            .vreturn()
            .try_catch("a", "b", "h", None)
            .build()
            .unwrap();
        body.verify().unwrap();
        let tcb = &mut body.try_catch_blocks[0];
        std::mem::swap(&mut tcb.start, &mut tcb.end);
        assert!(body.verify().is_err());
    }

    #[test]
    fn test_remove_nops() {
        let mut body = MethodBuilder::new("A", "m", "()V")
            .nop()
            .nop()
            .vreturn()
            .build()
            .unwrap();
        assert_eq!(body.remove_nops(), 2);
        assert_eq!(body.instructions.len(), 1);
    }
}
