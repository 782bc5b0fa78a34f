//! Abstract frames and the frame provider contract.
//!
//! A [`Frame`] is the abstract machine state *before* an instruction executes: one
//! [`AbstractValue`] per local slot and one per operand stack entry. Wide values (`long`,
//! `double`) occupy a single stack entry that reports a size of two slots, and two local slots
//! where the upper slot holds [`AbstractValue::Top`].
//!
//! Passes never compute frames themselves. They ask a [`FrameProvider`] for one frame per
//! instruction position and wrap the result in [`Frames`], which checks that the array matches
//! the body and translates stable [`InsnId`] handles into positions of the analysed snapshot.

use std::fmt;

use crate::{
    assembly::{Constant, InsnId, MethodBody, Positions, VarKind},
    Error, Result,
};

/// Nullness of a reference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Nullness {
    /// Definitely `null`.
    Null,
    /// Definitely not `null`.
    NotNull,
    /// Either.
    #[default]
    Unknown,
}

impl Nullness {
    fn merge(self, other: Self) -> Self {
        if self == other {
            self
        } else {
            Nullness::Unknown
        }
    }
}

/// Abstract state of a reference.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RefValue {
    /// Internal name or array descriptor of the static type, when known.
    pub ty: Option<String>,
    /// Nullness.
    pub nullness: Nullness,
    /// Literal content for string constants.
    pub string: Option<String>,
    /// Length for arrays of known size.
    pub array_length: Option<i32>,
}

impl RefValue {
    /// The `null` reference.
    #[must_use]
    pub fn null() -> Self {
        Self {
            nullness: Nullness::Null,
            ..Self::default()
        }
    }

    /// A non-null reference of type `ty`.
    #[must_use]
    pub fn not_null(ty: impl Into<String>) -> Self {
        Self {
            ty: Some(ty.into()),
            nullness: Nullness::NotNull,
            ..Self::default()
        }
    }

    /// A reference of type `ty` that may be `null`.
    #[must_use]
    pub fn of_type(ty: impl Into<String>) -> Self {
        Self {
            ty: Some(ty.into()),
            ..Self::default()
        }
    }

    fn merge(&self, other: &Self) -> Self {
        Self {
            // null carries no type, so the typed side wins
            ty: match (&self.ty, &other.ty) {
                (None, t) if self.nullness == Nullness::Null => t.clone(),
                (t, None) if other.nullness == Nullness::Null => t.clone(),
                (a, b) => agree(a, b),
            },
            nullness: self.nullness.merge(other.nullness),
            string: agree(&self.string, &other.string),
            array_length: agree(&self.array_length, &other.array_length),
        }
    }
}

/// `a` when both sides agree, `None` otherwise.
fn agree<T: PartialEq + Clone>(a: &Option<T>, b: &Option<T>) -> Option<T> {
    if a == b {
        a.clone()
    } else {
        None
    }
}

/// A value tracked by the abstract interpreter.
///
/// Primitive variants carry `Some` when the concrete value is known on every path reaching the
/// frame.
#[derive(Debug, Clone, Default)]
pub enum AbstractValue {
    /// Uninitialized local, the upper half of a wide local, or a merge of incompatible kinds.
    #[default]
    Top,
    /// `int` and sub-int primitives.
    Int(Option<i32>),
    /// `long`
    Long(Option<i64>),
    /// `float`
    Float(Option<f32>),
    /// `double`
    Double(Option<f64>),
    /// Object or array reference.
    Ref(RefValue),
}

impl PartialEq for AbstractValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AbstractValue::Top, AbstractValue::Top) => true,
            (AbstractValue::Int(a), AbstractValue::Int(b)) => a == b,
            (AbstractValue::Long(a), AbstractValue::Long(b)) => a == b,
            (AbstractValue::Float(a), AbstractValue::Float(b)) => {
                a.map(f32::to_bits) == b.map(f32::to_bits)
            }
            (AbstractValue::Double(a), AbstractValue::Double(b)) => {
                a.map(f64::to_bits) == b.map(f64::to_bits)
            }
            (AbstractValue::Ref(a), AbstractValue::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl AbstractValue {
    /// An unknown value of the given kind.
    #[must_use]
    pub fn unknown(kind: VarKind) -> Self {
        match kind {
            VarKind::Int => AbstractValue::Int(None),
            VarKind::Long => AbstractValue::Long(None),
            VarKind::Float => AbstractValue::Float(None),
            VarKind::Double => AbstractValue::Double(None),
            VarKind::Ref => AbstractValue::Ref(RefValue::default()),
        }
    }

    /// The value pushed by a constant instruction.
    #[must_use]
    pub fn from_constant(constant: &Constant) -> Self {
        match constant {
            Constant::Null => AbstractValue::Ref(RefValue::null()),
            Constant::Int(v) => AbstractValue::Int(Some(*v)),
            Constant::Long(v) => AbstractValue::Long(Some(*v)),
            Constant::Float(v) => AbstractValue::Float(Some(*v)),
            Constant::Double(v) => AbstractValue::Double(Some(*v)),
            Constant::String(s) => AbstractValue::Ref(RefValue {
                string: Some(s.clone()),
                ..RefValue::not_null("java/lang/String")
            }),
            Constant::Type(_) => AbstractValue::Ref(RefValue::not_null("java/lang/Class")),
        }
    }

    /// Slot width: 2 for `long`/`double`, 1 otherwise.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            AbstractValue::Long(_) | AbstractValue::Double(_) => 2,
            _ => 1,
        }
    }

    /// Stack kind, `None` for [`AbstractValue::Top`].
    #[must_use]
    pub fn kind(&self) -> Option<VarKind> {
        Some(match self {
            AbstractValue::Top => return None,
            AbstractValue::Int(_) => VarKind::Int,
            AbstractValue::Long(_) => VarKind::Long,
            AbstractValue::Float(_) => VarKind::Float,
            AbstractValue::Double(_) => VarKind::Double,
            AbstractValue::Ref(_) => VarKind::Ref,
        })
    }

    /// Returns `true` if the value can be materialized as a single constant instruction.
    ///
    /// `null` is not included: it is reported through [`AbstractValue::is_null`].
    #[must_use]
    pub fn has_known_value(&self) -> bool {
        match self {
            AbstractValue::Int(v) => v.is_some(),
            AbstractValue::Long(v) => v.is_some(),
            AbstractValue::Float(v) => v.is_some(),
            AbstractValue::Double(v) => v.is_some(),
            AbstractValue::Ref(r) => r.string.is_some(),
            AbstractValue::Top => false,
        }
    }

    /// The constant that pushes this value, if known.
    #[must_use]
    pub fn to_constant(&self) -> Option<Constant> {
        match self {
            AbstractValue::Int(v) => v.map(Constant::Int),
            AbstractValue::Long(v) => v.map(Constant::Long),
            AbstractValue::Float(v) => v.map(Constant::Float),
            AbstractValue::Double(v) => v.map(Constant::Double),
            AbstractValue::Ref(r) => r.string.clone().map(Constant::String),
            AbstractValue::Top => None,
        }
    }

    /// Known `int` value.
    #[must_use]
    pub fn as_int(&self) -> Option<i32> {
        match self {
            AbstractValue::Int(v) => *v,
            _ => None,
        }
    }

    /// Known `long` value.
    #[must_use]
    pub fn as_long(&self) -> Option<i64> {
        match self {
            AbstractValue::Long(v) => *v,
            _ => None,
        }
    }

    /// Known `float` value.
    #[must_use]
    pub fn as_float(&self) -> Option<f32> {
        match self {
            AbstractValue::Float(v) => *v,
            _ => None,
        }
    }

    /// Known `double` value.
    #[must_use]
    pub fn as_double(&self) -> Option<f64> {
        match self {
            AbstractValue::Double(v) => *v,
            _ => None,
        }
    }

    /// Known string literal.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AbstractValue::Ref(r) => r.string.as_deref(),
            _ => None,
        }
    }

    /// The reference state, for reference values.
    #[must_use]
    pub fn as_ref_value(&self) -> Option<&RefValue> {
        match self {
            AbstractValue::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Returns `true` for a reference known to be `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, AbstractValue::Ref(r) if r.nullness == Nullness::Null)
    }

    /// Returns `true` for a reference known not to be `null`.
    #[must_use]
    pub fn is_not_null(&self) -> bool {
        matches!(self, AbstractValue::Ref(r) if r.nullness == Nullness::NotNull)
    }

    /// Length of an array of known size.
    #[must_use]
    pub fn array_length(&self) -> Option<i32> {
        self.as_ref_value().and_then(|r| r.array_length)
    }

    /// Static type of a reference, when known.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        self.as_ref_value().and_then(|r| r.ty.as_deref())
    }

    /// Least upper bound of two values.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        match (self, other) {
            (AbstractValue::Int(a), AbstractValue::Int(b)) => AbstractValue::Int(agree(a, b)),
            (AbstractValue::Long(a), AbstractValue::Long(b)) => AbstractValue::Long(agree(a, b)),
            (AbstractValue::Float(a), AbstractValue::Float(b)) => AbstractValue::Float(
                agree(&a.map(f32::to_bits), &b.map(f32::to_bits)).map(f32::from_bits),
            ),
            (AbstractValue::Double(a), AbstractValue::Double(b)) => AbstractValue::Double(
                agree(&a.map(f64::to_bits), &b.map(f64::to_bits)).map(f64::from_bits),
            ),
            (AbstractValue::Ref(a), AbstractValue::Ref(b)) => AbstractValue::Ref(a.merge(b)),
            _ => AbstractValue::Top,
        }
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn known<T: fmt::Display>(f: &mut fmt::Formatter<'_>, tag: &str, v: Option<T>) -> fmt::Result {
            match v {
                Some(v) => write!(f, "{tag}:{v}"),
                None => write!(f, "{tag}:?"),
            }
        }
        match self {
            AbstractValue::Top => f.write_str("top"),
            AbstractValue::Int(v) => known(f, "I", *v),
            AbstractValue::Long(v) => known(f, "J", *v),
            AbstractValue::Float(v) => known(f, "F", *v),
            AbstractValue::Double(v) => known(f, "D", *v),
            AbstractValue::Ref(r) => match (r.nullness, &r.string, &r.ty) {
                (Nullness::Null, ..) => f.write_str("null"),
                (_, Some(s), _) => write!(f, "{s:?}"),
                (_, None, Some(ty)) => write!(f, "L{ty}"),
                _ => f.write_str("L?"),
            },
        }
    }
}

/// Abstract machine state before one instruction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Frame {
    locals: Vec<AbstractValue>,
    stack: Vec<AbstractValue>,
}

impl Frame {
    /// Creates a frame with `max_locals` uninitialized slots and an empty stack.
    #[must_use]
    pub fn new(max_locals: usize) -> Self {
        Self {
            locals: vec![AbstractValue::Top; max_locals],
            stack: Vec::new(),
        }
    }

    /// Number of stack entries (a wide value counts once).
    #[must_use]
    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    /// Number of occupied stack slots (a wide value counts twice).
    #[must_use]
    pub fn stack_slots(&self) -> usize {
        self.stack.iter().map(AbstractValue::size).sum()
    }

    /// Stack entry by index from the bottom.
    #[must_use]
    pub fn get_stack(&self, index: usize) -> Option<&AbstractValue> {
        self.stack.get(index)
    }

    /// Stack entry `depth` places below the top; `top(0)` is the top of stack.
    #[must_use]
    pub fn top(&self, depth: usize) -> Option<&AbstractValue> {
        self.stack.len().checked_sub(depth + 1).and_then(|i| self.stack.get(i))
    }

    /// All stack entries, bottom first.
    #[must_use]
    pub fn stack(&self) -> &[AbstractValue] {
        &self.stack
    }

    /// Number of local slots.
    #[must_use]
    pub fn locals_len(&self) -> usize {
        self.locals.len()
    }

    /// Local slot value; out-of-range slots read as [`AbstractValue::Top`].
    #[must_use]
    pub fn get_local(&self, slot: usize) -> &AbstractValue {
        static TOP: AbstractValue = AbstractValue::Top;
        self.locals.get(slot).unwrap_or(&TOP)
    }

    /// Writes a local slot, invalidating any wide value it overlaps.
    pub fn set_local(&mut self, slot: usize, value: AbstractValue) {
        let size = value.size();
        if self.locals.len() < slot + size {
            self.locals.resize(slot + size, AbstractValue::Top);
        }
        if slot > 0 && self.locals[slot - 1].size() == 2 {
            self.locals[slot - 1] = AbstractValue::Top;
        }
        self.locals[slot] = value;
        if size == 2 {
            self.locals[slot + 1] = AbstractValue::Top;
        }
    }

    /// Pushes a stack entry.
    pub fn push(&mut self, value: AbstractValue) {
        self.stack.push(value);
    }

    /// Pops a stack entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Analysis`] on stack underflow.
    pub fn pop(&mut self) -> Result<AbstractValue> {
        self.stack
            .pop()
            .ok_or_else(|| Error::Analysis("operand stack underflow".to_string()))
    }

    /// Pops entries until `slots` stack slots have been removed, returning them top first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Analysis`] on underflow or if a wide value straddles the boundary.
    pub fn pop_slots(&mut self, slots: usize) -> Result<Vec<AbstractValue>> {
        let mut taken = 0;
        let mut values = Vec::new();
        while taken < slots {
            let value = self.pop()?;
            taken += value.size();
            values.push(value);
        }
        if taken != slots {
            return Err(Error::Analysis(format!(
                "wide value split by a {slots}-slot stack operation"
            )));
        }
        Ok(values)
    }

    /// Empties the operand stack.
    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    /// Merges `other` into `self`, returning `true` if `self` changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Analysis`] if the stack heights differ.
    pub fn merge(&mut self, other: &Frame) -> Result<bool> {
        if self.stack.len() != other.stack.len() {
            return Err(Error::Analysis(format!(
                "stack height mismatch at merge: {} vs {}",
                self.stack.len(),
                other.stack.len()
            )));
        }
        let mut changed = false;
        for (mine, theirs) in self.stack.iter_mut().zip(&other.stack) {
            let merged = mine.merge(theirs);
            if merged != *mine {
                *mine = merged;
                changed = true;
            }
        }
        if self.locals.len() < other.locals.len() {
            self.locals.resize(other.locals.len(), AbstractValue::Top);
        }
        for (slot, mine) in self.locals.iter_mut().enumerate() {
            let theirs = other.get_local(slot);
            let merged = mine.merge(theirs);
            if merged != *mine {
                *mine = merged;
                changed = true;
            }
        }
        Ok(changed)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, local) in self.locals.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{local}")?;
        }
        f.write_str("] {")?;
        for (i, value) in self.stack.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str("}")
    }
}

/// Computes one frame per instruction position of a method body.
///
/// Entry `i` of the returned vector is the state before the `i`-th instruction in list order, or
/// `None` if that instruction is unreachable. Implementations must be usable from several worker
/// threads at once.
pub trait FrameProvider: Send + Sync {
    /// Analyses `body`.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be interpreted.
    fn analyze(&self, body: &MethodBody) -> Result<Vec<Option<Frame>>>;
}

/// Frames of one body snapshot, addressable by instruction handle.
#[derive(Debug, Clone)]
pub struct Frames {
    positions: Positions,
    frames: Vec<Option<Frame>>,
}

impl Frames {
    /// Wraps the provider output for `body`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameMismatch`] if `frames` does not have one entry per instruction.
    pub fn new(body: &MethodBody, frames: Vec<Option<Frame>>) -> Result<Self> {
        let positions = body.positions();
        if positions.len() != frames.len() {
            return Err(Error::FrameMismatch {
                expected: positions.len(),
                actual: frames.len(),
            });
        }
        Ok(Self { positions, frames })
    }

    /// Runs `provider` on `body` and wraps the result.
    ///
    /// # Errors
    ///
    /// Propagates provider failures and length mismatches.
    pub fn compute(provider: &dyn FrameProvider, body: &MethodBody) -> Result<Self> {
        Self::new(body, provider.analyze(body)?)
    }

    /// Frame before `id`, `None` if unreachable or not part of the snapshot.
    #[must_use]
    pub fn at(&self, id: InsnId) -> Option<&Frame> {
        self.positions.of(id).and_then(|pos| self.at_pos(pos))
    }

    /// Frame before the instruction that followed `id` in the snapshot.
    #[must_use]
    pub fn after(&self, id: InsnId) -> Option<&Frame> {
        self.positions.of(id).and_then(|pos| self.at_pos(pos + 1))
    }

    /// Frame at a snapshot position.
    #[must_use]
    pub fn at_pos(&self, pos: usize) -> Option<&Frame> {
        self.frames.get(pos).and_then(Option::as_ref)
    }

    /// Snapshot position of `id`.
    #[must_use]
    pub fn position(&self, id: InsnId) -> Option<usize> {
        self.positions.of(id)
    }

    /// Returns `true` if `id` was reachable in the snapshot.
    #[must_use]
    pub fn is_reachable(&self, id: InsnId) -> bool {
        self.at(id).is_some()
    }

    /// Number of positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Returns `true` for an empty body.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::MethodBuilder;

    #[test]
    fn test_merge_values() {
        let a = AbstractValue::Int(Some(3));
        assert_eq!(a.merge(&AbstractValue::Int(Some(3))), a);
        assert_eq!(a.merge(&AbstractValue::Int(Some(4))), AbstractValue::Int(None));
        assert_eq!(a.merge(&AbstractValue::Long(Some(3))), AbstractValue::Top);

        let null = AbstractValue::Ref(RefValue::null());
        let s = AbstractValue::Ref(RefValue::not_null("java/lang/String"));
        let merged = null.merge(&s);
        assert_eq!(merged.type_name(), Some("java/lang/String"));
        assert!(!merged.is_null());
        assert!(!merged.is_not_null());
    }

    #[test]
    fn test_merge_array_shapes() {
        let array = |len| {
            AbstractValue::Ref(RefValue {
                array_length: Some(len),
                ..RefValue::not_null("[I")
            })
        };
        assert_eq!(array(4).merge(&array(4)).array_length(), Some(4));
        let merged = array(4).merge(&array(5));
        assert_eq!(merged.array_length(), None);
        assert_eq!(merged.type_name(), Some("[I"));
        assert!(merged.is_not_null());
    }

    #[test]
    fn test_known_values() {
        let s = AbstractValue::from_constant(&Constant::String("x".into()));
        assert!(s.has_known_value());
        assert!(s.is_not_null());
        assert_eq!(s.as_str(), Some("x"));
        let null = AbstractValue::from_constant(&Constant::Null);
        assert!(!null.has_known_value());
        assert!(null.is_null());
        assert_eq!(null.to_constant(), None);
        assert_eq!(
            AbstractValue::Double(Some(1.5)).to_constant(),
            Some(Constant::Double(1.5))
        );
    }

    #[test]
    fn test_wide_locals() {
        let mut frame = Frame::new(3);
        frame.set_local(0, AbstractValue::Long(Some(1)));
        assert_eq!(frame.get_local(1), &AbstractValue::Top);
        frame.set_local(1, AbstractValue::Int(Some(2)));
        assert_eq!(frame.get_local(0), &AbstractValue::Top);
        assert_eq!(frame.get_local(7), &AbstractValue::Top);
    }

    #[test]
    fn test_stack_slots() {
        let mut frame = Frame::new(0);
        frame.push(AbstractValue::Int(Some(1)));
        frame.push(AbstractValue::Double(None));
        assert_eq!(frame.stack_size(), 2);
        assert_eq!(frame.stack_slots(), 3);
        assert_eq!(frame.top(0).and_then(AbstractValue::kind), Some(VarKind::Double));
        assert!(frame.pop_slots(1).is_err());
    }

    #[test]
    fn test_frame_merge_height_mismatch() {
        let mut a = Frame::new(1);
        let mut b = Frame::new(1);
        b.push(AbstractValue::Int(None));
        assert!(a.merge(&b).is_err());
        a.push(AbstractValue::Int(Some(1)));
        assert!(a.merge(&b).unwrap());
        assert!(!a.merge(&b).unwrap());
    }

    #[test]
    fn test_frames_length_checked() {
        let body = MethodBuilder::new("A", "m", "()V").vreturn().build().unwrap();
        match Frames::new(&body, vec![]) {
            Err(Error::FrameMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (1, 0));
            }
            other => panic!("unexpected: {other:?}"),
        }
        let frames = Frames::new(&body, vec![Some(Frame::new(0))]).unwrap();
        let first = body.instructions.first().unwrap();
        assert!(frames.is_reachable(first));
        assert!(frames.after(first).is_none());
    }
}
