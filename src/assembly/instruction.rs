//! The typed instruction model.
//!
//! [`Insn`] is a closed enum over JVM-style instructions, grouped by what they do to the operand
//! stack rather than by opcode. Branch targets and exception range endpoints are [`InsnId`]
//! handles naming [`Insn::Label`] nodes in the same [`crate::assembly::InsnList`].
//!
//! Stack effects are counted in *slots*: `long` and `double` values occupy two.

use std::fmt;

use strum::{EnumIter, IntoStaticStr};

use crate::assembly::{descriptor, opcodes, InsnId};

/// Computational type of a local variable access, return or value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, IntoStaticStr)]
pub enum VarKind {
    /// `int` and the sub-int primitives
    #[strum(serialize = "i")]
    Int,
    /// `long`
    #[strum(serialize = "l")]
    Long,
    /// `float`
    #[strum(serialize = "f")]
    Float,
    /// `double`
    #[strum(serialize = "d")]
    Double,
    /// Object and array references
    #[strum(serialize = "a")]
    Ref,
}

impl VarKind {
    /// Slot width.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            VarKind::Long | VarKind::Double => 2,
            _ => 1,
        }
    }

    const fn offset(self) -> u8 {
        self as u8
    }

    /// The numeric kind for primitive variable kinds.
    #[must_use]
    pub const fn num_kind(self) -> Option<NumKind> {
        match self {
            VarKind::Int => Some(NumKind::Int),
            VarKind::Long => Some(NumKind::Long),
            VarKind::Float => Some(NumKind::Float),
            VarKind::Double => Some(NumKind::Double),
            VarKind::Ref => None,
        }
    }
}

/// Primitive numeric type of an arithmetic operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum NumKind {
    /// `int`
    #[strum(serialize = "i")]
    Int,
    /// `long`
    #[strum(serialize = "l")]
    Long,
    /// `float`
    #[strum(serialize = "f")]
    Float,
    /// `double`
    #[strum(serialize = "d")]
    Double,
}

impl NumKind {
    /// Slot width.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            NumKind::Long | NumKind::Double => 2,
            _ => 1,
        }
    }

    /// The matching variable kind.
    #[must_use]
    pub const fn var_kind(self) -> VarKind {
        match self {
            NumKind::Int => VarKind::Int,
            NumKind::Long => VarKind::Long,
            NumKind::Float => VarKind::Float,
            NumKind::Double => VarKind::Double,
        }
    }

    const fn offset(self) -> u8 {
        self as u8
    }
}

/// A literal pushed by a constant instruction.
#[derive(Debug, Clone)]
pub enum Constant {
    /// `aconst_null`
    Null,
    /// `iconst_*`, `bipush`, `sipush`, `ldc int`
    Int(i32),
    /// `lconst_*`, `ldc2_w long`
    Long(i64),
    /// `fconst_*`, `ldc float`
    Float(f32),
    /// `dconst_*`, `ldc2_w double`
    Double(f64),
    /// `ldc "..."`
    String(String),
    /// `ldc Type;`
    Type(String),
}

impl Constant {
    /// Slot width of the pushed value.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }

    /// Opcode of the shortest encoding for this literal.
    #[must_use]
    pub fn opcode(&self) -> u8 {
        match self {
            Constant::Null => opcodes::ACONST_NULL,
            Constant::Int(v @ -1..=5) => (i32::from(opcodes::ICONST_0) + v) as u8,
            Constant::Int(v) if i8::try_from(*v).is_ok() => opcodes::BIPUSH,
            Constant::Int(v) if i16::try_from(*v).is_ok() => opcodes::SIPUSH,
            Constant::Int(_) | Constant::Float(_) | Constant::String(_) | Constant::Type(_)
                if !self.is_short_float() =>
            {
                opcodes::LDC
            }
            Constant::Float(v) => opcodes::FCONST_0 + *v as u8,
            Constant::Long(v @ 0..=1) => opcodes::LCONST_0 + *v as u8,
            Constant::Double(v) if *v == 0.0 && v.is_sign_positive() => opcodes::DCONST_0,
            Constant::Double(v) if *v == 1.0 => opcodes::DCONST_1,
            Constant::Long(_) | Constant::Double(_) => opcodes::LDC2_W,
            Constant::Int(_) | Constant::String(_) | Constant::Type(_) => opcodes::LDC,
        }
    }

    fn is_short_float(&self) -> bool {
        matches!(self, Constant::Float(v) if (*v == 0.0 && v.is_sign_positive()) || *v == 1.0 || *v == 2.0)
    }
}

impl PartialEq for Constant {
    /// Floating point literals compare by bit pattern, so `NaN` equals itself.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Null, Constant::Null) => true,
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::Long(a), Constant::Long(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Double(a), Constant::Double(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) | (Constant::Type(a), Constant::Type(b)) => {
                a == b
            }
            _ => false,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = opcodes::MNEMONICS[self.opcode() as usize];
        match self {
            Constant::Null => f.write_str(op),
            Constant::Int(-1..=5) | Constant::Long(0..=1) => f.write_str(op),
            Constant::Float(_) | Constant::Double(_) if op.contains("const") => f.write_str(op),
            Constant::Int(v) => write!(f, "{op} {v}"),
            Constant::Long(v) => write!(f, "{op} {v}L"),
            Constant::Float(v) => write!(f, "{op} {v}F"),
            Constant::Double(v) => write!(f, "{op} {v}D"),
            Constant::String(s) => write!(f, "{op} {s:?}"),
            Constant::Type(t) => write!(f, "{op} {t}"),
        }
    }
}

/// Operand stack manipulation instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum StackOp {
    /// Discard one slot.
    #[strum(serialize = "pop")]
    Pop,
    /// Discard two slots.
    #[strum(serialize = "pop2")]
    Pop2,
    /// Duplicate the top slot.
    #[strum(serialize = "dup")]
    Dup,
    /// Duplicate the top slot beneath the second.
    #[strum(serialize = "dup_x1")]
    DupX1,
    /// Duplicate the top slot beneath the third.
    #[strum(serialize = "dup_x2")]
    DupX2,
    /// Duplicate the top two slots.
    #[strum(serialize = "dup2")]
    Dup2,
    /// Duplicate the top two slots beneath the third.
    #[strum(serialize = "dup2_x1")]
    Dup2X1,
    /// Duplicate the top two slots beneath the fourth.
    #[strum(serialize = "dup2_x2")]
    Dup2X2,
    /// Exchange the top two slots.
    #[strum(serialize = "swap")]
    Swap,
}

impl StackOp {
    /// JVM opcode.
    #[must_use]
    pub const fn opcode(self) -> u8 {
        match self {
            StackOp::Pop => opcodes::POP,
            StackOp::Pop2 => opcodes::POP2,
            StackOp::Dup => opcodes::DUP,
            StackOp::DupX1 => opcodes::DUP_X1,
            StackOp::DupX2 => opcodes::DUP_X2,
            StackOp::Dup2 => opcodes::DUP2,
            StackOp::Dup2X1 => opcodes::DUP2_X1,
            StackOp::Dup2X2 => opcodes::DUP2_X2,
            StackOp::Swap => opcodes::SWAP,
        }
    }

    /// Minimum number of occupied slots the operation reads.
    #[must_use]
    pub const fn depth(self) -> usize {
        match self {
            StackOp::Pop | StackOp::Dup => 1,
            StackOp::Pop2 | StackOp::Dup2 | StackOp::DupX1 | StackOp::Swap => 2,
            StackOp::DupX2 | StackOp::Dup2X1 => 3,
            StackOp::Dup2X2 => 4,
        }
    }
}

/// Two-operand arithmetic and bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum BinaryOp {
    /// `+`
    #[strum(serialize = "add")]
    Add,
    /// `-`
    #[strum(serialize = "sub")]
    Sub,
    /// `*`
    #[strum(serialize = "mul")]
    Mul,
    /// `/`
    #[strum(serialize = "div")]
    Div,
    /// `%`
    #[strum(serialize = "rem")]
    Rem,
    /// `<<`
    #[strum(serialize = "shl")]
    Shl,
    /// `>>`
    #[strum(serialize = "shr")]
    Shr,
    /// `>>>`
    #[strum(serialize = "ushr")]
    Ushr,
    /// `&`
    #[strum(serialize = "and")]
    And,
    /// `|`
    #[strum(serialize = "or")]
    Or,
    /// `^`
    #[strum(serialize = "xor")]
    Xor,
}

impl BinaryOp {
    /// Returns `true` for shifts, whose right operand is always an `int`.
    #[must_use]
    pub const fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr)
    }

    /// Returns `true` for `div` and `rem`, which throw on an integral zero divisor.
    #[must_use]
    pub const fn is_division(self) -> bool {
        matches!(self, BinaryOp::Div | BinaryOp::Rem)
    }

    /// Returns `true` when this operation is only defined for `int` and `long`.
    #[must_use]
    pub const fn is_integral_only(self) -> bool {
        matches!(
            self,
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
        )
    }

    const fn opcode(self, kind: NumKind) -> u8 {
        match self {
            BinaryOp::Add => 0x60 + kind.offset(),
            BinaryOp::Sub => 0x64 + kind.offset(),
            BinaryOp::Mul => 0x68 + kind.offset(),
            BinaryOp::Div => 0x6c + kind.offset(),
            BinaryOp::Rem => 0x70 + kind.offset(),
            BinaryOp::Shl => opcodes::ISHL + (kind.offset() & 1),
            BinaryOp::Shr => opcodes::ISHR + (kind.offset() & 1),
            BinaryOp::Ushr => opcodes::IUSHR + (kind.offset() & 1),
            BinaryOp::And => opcodes::IAND + (kind.offset() & 1),
            BinaryOp::Or => opcodes::IOR + (kind.offset() & 1),
            BinaryOp::Xor => opcodes::IXOR + (kind.offset() & 1),
        }
    }
}

/// Truncating `int` conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum NarrowKind {
    /// `i2b`
    Byte,
    /// `i2c`
    Char,
    /// `i2s`
    Short,
}

/// Three-way comparisons producing `-1`, `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum CompareOp {
    /// `lcmp`
    #[strum(serialize = "lcmp")]
    Lcmp,
    /// `fcmpl`, `NaN` compares as `-1`
    #[strum(serialize = "fcmpl")]
    Fcmpl,
    /// `fcmpg`, `NaN` compares as `1`
    #[strum(serialize = "fcmpg")]
    Fcmpg,
    /// `dcmpl`
    #[strum(serialize = "dcmpl")]
    Dcmpl,
    /// `dcmpg`
    #[strum(serialize = "dcmpg")]
    Dcmpg,
}

impl CompareOp {
    /// Slot width of each operand.
    #[must_use]
    pub const fn operand_size(self) -> usize {
        match self {
            CompareOp::Fcmpl | CompareOp::Fcmpg => 1,
            _ => 2,
        }
    }
}

/// Condition of a conditional jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum Condition {
    /// `ifeq`
    #[strum(serialize = "ifeq")]
    Eq,
    /// `ifne`
    #[strum(serialize = "ifne")]
    Ne,
    /// `iflt`
    #[strum(serialize = "iflt")]
    Lt,
    /// `ifge`
    #[strum(serialize = "ifge")]
    Ge,
    /// `ifgt`
    #[strum(serialize = "ifgt")]
    Gt,
    /// `ifle`
    #[strum(serialize = "ifle")]
    Le,
    /// `if_icmpeq`
    #[strum(serialize = "if_icmpeq")]
    ICmpEq,
    /// `if_icmpne`
    #[strum(serialize = "if_icmpne")]
    ICmpNe,
    /// `if_icmplt`
    #[strum(serialize = "if_icmplt")]
    ICmpLt,
    /// `if_icmpge`
    #[strum(serialize = "if_icmpge")]
    ICmpGe,
    /// `if_icmpgt`
    #[strum(serialize = "if_icmpgt")]
    ICmpGt,
    /// `if_icmple`
    #[strum(serialize = "if_icmple")]
    ICmpLe,
    /// `if_acmpeq`
    #[strum(serialize = "if_acmpeq")]
    ACmpEq,
    /// `if_acmpne`
    #[strum(serialize = "if_acmpne")]
    ACmpNe,
    /// `ifnull`
    #[strum(serialize = "ifnull")]
    Null,
    /// `ifnonnull`
    #[strum(serialize = "ifnonnull")]
    NonNull,
}

impl Condition {
    /// JVM opcode.
    #[must_use]
    pub const fn opcode(self) -> u8 {
        match self {
            Condition::Null => opcodes::IFNULL,
            Condition::NonNull => opcodes::IFNONNULL,
            other => opcodes::IFEQ + other as u8,
        }
    }

    /// Number of stack slots the jump pops.
    #[must_use]
    pub const fn operand_count(self) -> usize {
        match self {
            Condition::Eq
            | Condition::Ne
            | Condition::Lt
            | Condition::Ge
            | Condition::Gt
            | Condition::Le
            | Condition::Null
            | Condition::NonNull => 1,
            _ => 2,
        }
    }

    /// Returns `true` when the operands are references.
    #[must_use]
    pub const fn is_reference(self) -> bool {
        matches!(
            self,
            Condition::ACmpEq | Condition::ACmpNe | Condition::Null | Condition::NonNull
        )
    }

    /// Evaluates an integral comparison `lhs <op> rhs`. Unary conditions compare against zero.
    ///
    /// Returns `None` for reference conditions.
    #[must_use]
    pub fn test(self, lhs: i32, rhs: i32) -> Option<bool> {
        Some(match self {
            Condition::Eq | Condition::ICmpEq => lhs == rhs,
            Condition::Ne | Condition::ICmpNe => lhs != rhs,
            Condition::Lt | Condition::ICmpLt => lhs < rhs,
            Condition::Ge | Condition::ICmpGe => lhs >= rhs,
            Condition::Gt | Condition::ICmpGt => lhs > rhs,
            Condition::Le | Condition::ICmpLe => lhs <= rhs,
            _ => return None,
        })
    }
}

/// Static and instance field accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum FieldOp {
    /// `getstatic`
    #[strum(serialize = "getstatic")]
    GetStatic,
    /// `putstatic`
    #[strum(serialize = "putstatic")]
    PutStatic,
    /// `getfield`
    #[strum(serialize = "getfield")]
    GetField,
    /// `putfield`
    #[strum(serialize = "putfield")]
    PutField,
}

/// Method invocation flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum InvokeKind {
    /// `invokevirtual`
    #[strum(serialize = "invokevirtual")]
    Virtual,
    /// `invokespecial`
    #[strum(serialize = "invokespecial")]
    Special,
    /// `invokestatic`
    #[strum(serialize = "invokestatic")]
    Static,
    /// `invokeinterface`
    #[strum(serialize = "invokeinterface")]
    Interface,
}

/// Element kind of an array load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum ArrayKind {
    /// `int[]`
    #[strum(serialize = "i")]
    Int,
    /// `long[]`
    #[strum(serialize = "l")]
    Long,
    /// `float[]`
    #[strum(serialize = "f")]
    Float,
    /// `double[]`
    #[strum(serialize = "d")]
    Double,
    /// Reference arrays
    #[strum(serialize = "a")]
    Ref,
    /// `byte[]` and `boolean[]`
    #[strum(serialize = "b")]
    Byte,
    /// `char[]`
    #[strum(serialize = "c")]
    Char,
    /// `short[]`
    #[strum(serialize = "s")]
    Short,
}

impl ArrayKind {
    /// Slot width of an element on the stack.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            ArrayKind::Long | ArrayKind::Double => 2,
            _ => 1,
        }
    }

    /// The stack kind of an element.
    #[must_use]
    pub const fn var_kind(self) -> VarKind {
        match self {
            ArrayKind::Long => VarKind::Long,
            ArrayKind::Float => VarKind::Float,
            ArrayKind::Double => VarKind::Double,
            ArrayKind::Ref => VarKind::Ref,
            _ => VarKind::Int,
        }
    }
}

/// Primitive component type of `newarray`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum PrimitiveType {
    /// `boolean`
    #[strum(serialize = "boolean")]
    Boolean,
    /// `char`
    #[strum(serialize = "char")]
    Char,
    /// `float`
    #[strum(serialize = "float")]
    Float,
    /// `double`
    #[strum(serialize = "double")]
    Double,
    /// `byte`
    #[strum(serialize = "byte")]
    Byte,
    /// `short`
    #[strum(serialize = "short")]
    Short,
    /// `int`
    #[strum(serialize = "int")]
    Int,
    /// `long`
    #[strum(serialize = "long")]
    Long,
}

impl PrimitiveType {
    /// Descriptor of an array of this primitive, e.g. `[I`.
    #[must_use]
    pub const fn array_descriptor(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "[Z",
            PrimitiveType::Char => "[C",
            PrimitiveType::Float => "[F",
            PrimitiveType::Double => "[D",
            PrimitiveType::Byte => "[B",
            PrimitiveType::Short => "[S",
            PrimitiveType::Int => "[I",
            PrimitiveType::Long => "[J",
        }
    }
}

/// A symbolic field or method reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberRef {
    /// Internal name of the declaring class.
    pub owner: String,
    /// Member name.
    pub name: String,
    /// Field or method descriptor.
    pub desc: String,
}

impl MemberRef {
    /// Creates a member reference.
    pub fn new(owner: impl Into<String>, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            desc: desc.into(),
        }
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.desc)
    }
}

/// Slots consumed and produced by an instruction.
///
/// Stack shuffles report their *net* effect: `dup` consumes nothing and produces one slot, `swap`
/// and `checkcast` neither consume nor produce. This is the accounting the sequence folder uses
/// to decide whether a backwards scan has collected every contributing instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackEffect {
    /// Slots popped.
    pub consumed: usize,
    /// Slots pushed.
    pub produced: usize,
}

impl StackEffect {
    const fn new(consumed: usize, produced: usize) -> Self {
        Self { consumed, produced }
    }

    /// `produced - consumed`.
    #[must_use]
    pub const fn delta(self) -> isize {
        self.produced as isize - self.consumed as isize
    }
}

/// A single instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// A zero-effect anchor for jumps and ranges.
    Label,
    /// Source line metadata.
    Line(u32),
    /// `nop`
    Nop,
    /// Pushes a literal.
    Const(Constant),
    /// `xload slot`
    Load(VarKind, u16),
    /// `xstore slot`
    Store(VarKind, u16),
    /// `iinc slot delta`
    Iinc {
        /// Local slot
        slot: u16,
        /// Signed increment
        delta: i16,
    },
    /// `pop`, `dup*`, `swap`
    Stack(StackOp),
    /// Arithmetic or bitwise operation.
    Binary(BinaryOp, NumKind),
    /// `xneg`
    Neg(NumKind),
    /// Primitive widening or narrowing: `from`, `to`.
    Convert(NumKind, NumKind),
    /// `i2b`, `i2c`, `i2s`
    Narrow(NarrowKind),
    /// `lcmp`, `fcmpl`, ...
    Compare(CompareOp),
    /// Conditional jump to a label.
    If(Condition, InsnId),
    /// Unconditional jump to a label.
    Goto(InsnId),
    /// `tableswitch`
    TableSwitch {
        /// Key of the first target
        low: i32,
        /// Target for keys outside the table
        default: InsnId,
        /// Targets for `low..low + targets.len()`
        targets: Vec<InsnId>,
    },
    /// `lookupswitch`
    LookupSwitch {
        /// Target for unmatched keys
        default: InsnId,
        /// Case keys, parallel to `targets`
        keys: Vec<i32>,
        /// Case targets
        targets: Vec<InsnId>,
    },
    /// `xreturn`, or `return` for `None`.
    Return(Option<VarKind>),
    /// `athrow`
    Throw,
    /// Field read or write.
    Field(FieldOp, MemberRef),
    /// Method call.
    Invoke(InvokeKind, MemberRef),
    /// `invokedynamic`
    InvokeDynamic {
        /// Call site name
        name: String,
        /// Call site descriptor
        desc: String,
    },
    /// `new Type`
    New(String),
    /// `newarray` of a primitive
    NewArray(PrimitiveType),
    /// `anewarray Type`
    ANewArray(String),
    /// `multianewarray desc dims`
    MultiANewArray {
        /// Array descriptor
        desc: String,
        /// Number of dimensions popped
        dims: u8,
    },
    /// `arraylength`
    ArrayLength,
    /// `xaload`
    ArrayLoad(ArrayKind),
    /// `xastore`
    ArrayStore(ArrayKind),
    /// `checkcast Type`
    CheckCast(String),
    /// `instanceof Type`
    InstanceOf(String),
    /// `monitorenter`
    MonitorEnter,
    /// `monitorexit`
    MonitorExit,
}

impl Insn {
    /// Shorthand for an `int` constant.
    #[must_use]
    pub const fn int(value: i32) -> Self {
        Insn::Const(Constant::Int(value))
    }

    /// JVM opcode, `None` for labels and line numbers.
    #[must_use]
    pub fn opcode(&self) -> Option<u8> {
        Some(match self {
            Insn::Label | Insn::Line(_) => return None,
            Insn::Nop => opcodes::NOP,
            Insn::Const(c) => c.opcode(),
            Insn::Load(k, _) => opcodes::ILOAD + k.offset(),
            Insn::Store(k, _) => opcodes::ISTORE + k.offset(),
            Insn::Iinc { .. } => opcodes::IINC,
            Insn::Stack(op) => op.opcode(),
            Insn::Binary(op, k) => op.opcode(*k),
            Insn::Neg(k) => opcodes::INEG + k.offset(),
            Insn::Convert(from, to) => {
                let rank = if to.offset() > from.offset() {
                    to.offset() - 1
                } else {
                    to.offset()
                };
                opcodes::I2L + from.offset() * 3 + rank
            }
            Insn::Narrow(n) => opcodes::I2B + *n as u8,
            Insn::Compare(c) => opcodes::LCMP + *c as u8,
            Insn::If(c, _) => c.opcode(),
            Insn::Goto(_) => opcodes::GOTO,
            Insn::TableSwitch { .. } => opcodes::TABLESWITCH,
            Insn::LookupSwitch { .. } => opcodes::LOOKUPSWITCH,
            Insn::Return(Some(k)) => opcodes::IRETURN + k.offset(),
            Insn::Return(None) => opcodes::RETURN,
            Insn::Throw => opcodes::ATHROW,
            Insn::Field(op, _) => opcodes::GETSTATIC + *op as u8,
            Insn::Invoke(k, _) => opcodes::INVOKEVIRTUAL + *k as u8,
            Insn::InvokeDynamic { .. } => opcodes::INVOKEDYNAMIC,
            Insn::New(_) => opcodes::NEW,
            Insn::NewArray(_) => opcodes::NEWARRAY,
            Insn::ANewArray(_) => opcodes::ANEWARRAY,
            Insn::MultiANewArray { .. } => opcodes::MULTIANEWARRAY,
            Insn::ArrayLength => opcodes::ARRAYLENGTH,
            Insn::ArrayLoad(k) => opcodes::IALOAD + *k as u8,
            Insn::ArrayStore(k) => opcodes::IASTORE + *k as u8,
            Insn::CheckCast(_) => opcodes::CHECKCAST,
            Insn::InstanceOf(_) => opcodes::INSTANCEOF,
            Insn::MonitorEnter => opcodes::MONITORENTER,
            Insn::MonitorExit => opcodes::MONITOREXIT,
        })
    }

    /// Returns `true` for labels and line numbers, which never execute.
    #[must_use]
    pub const fn is_meta(&self) -> bool {
        matches!(self, Insn::Label | Insn::Line(_))
    }

    /// Returns `true` for label nodes.
    #[must_use]
    pub const fn is_label(&self) -> bool {
        matches!(self, Insn::Label)
    }

    /// Returns `true` for `nop` and metadata, none of which affect execution.
    #[must_use]
    pub const fn is_inert(&self) -> bool {
        matches!(self, Insn::Label | Insn::Line(_) | Insn::Nop)
    }

    /// Returns `true` for value returns and `return`.
    #[must_use]
    pub const fn is_return(&self) -> bool {
        matches!(self, Insn::Return(_))
    }

    /// Returns `true` for switches.
    #[must_use]
    pub const fn is_switch(&self) -> bool {
        matches!(self, Insn::TableSwitch { .. } | Insn::LookupSwitch { .. })
    }

    /// Returns `true` for instructions after which control never falls through:
    /// `goto`, switches, returns and `athrow`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Insn::Goto(_)
                | Insn::TableSwitch { .. }
                | Insn::LookupSwitch { .. }
                | Insn::Return(_)
                | Insn::Throw
        )
    }

    /// Returns `true` for any instruction that transfers control: jumps, switches, returns and
    /// `athrow`.
    #[must_use]
    pub const fn is_flow_control(&self) -> bool {
        self.is_terminal() || matches!(self, Insn::If(..))
    }

    /// Labels this instruction may jump to, default target first for switches.
    #[must_use]
    pub fn jump_targets(&self) -> Vec<InsnId> {
        match self {
            Insn::If(_, target) | Insn::Goto(target) => vec![*target],
            Insn::TableSwitch {
                default, targets, ..
            }
            | Insn::LookupSwitch {
                default, targets, ..
            } => std::iter::once(*default).chain(targets.iter().copied()).collect(),
            _ => Vec::new(),
        }
    }

    /// Number of references from this instruction to `label`.
    #[must_use]
    pub fn reference_count(&self, label: InsnId) -> usize {
        self.jump_targets().iter().filter(|&&t| t == label).count()
    }

    /// Rewrites every reference to `from` into `to`. Returns `true` if anything changed.
    pub fn retarget(&mut self, from: InsnId, to: InsnId) -> bool {
        let mut changed = false;
        let mut swap = |slot: &mut InsnId| {
            if *slot == from {
                *slot = to;
                changed = true;
            }
        };
        match self {
            Insn::If(_, target) | Insn::Goto(target) => swap(target),
            Insn::TableSwitch {
                default, targets, ..
            }
            | Insn::LookupSwitch {
                default, targets, ..
            } => {
                swap(default);
                targets.iter_mut().for_each(swap);
            }
            _ => {}
        }
        changed
    }

    /// Returns `true` for instructions with effects beyond the operand stack and locals:
    /// heap writes, allocation, monitors, `athrow`, dynamic calls and non-static calls.
    ///
    /// Static calls are treated as effect-free here; they only ever fold when their result is
    /// known, which requires a side-effect-free callee evaluation.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        match self {
            Insn::Field(op, _) => matches!(op, FieldOp::PutStatic | FieldOp::PutField),
            Insn::Invoke(kind, _) => *kind != InvokeKind::Static,
            Insn::ArrayStore(_)
            | Insn::MonitorEnter
            | Insn::MonitorExit
            | Insn::New(_)
            | Insn::NewArray(_)
            | Insn::ANewArray(_)
            | Insn::MultiANewArray { .. }
            | Insn::Throw
            | Insn::InvokeDynamic { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the instruction pushes a single value without consuming anything:
    /// constants, local loads, static field reads, and static calls with no arguments and a
    /// non-void result.
    #[must_use]
    pub fn is_value_producer(&self) -> bool {
        match self {
            Insn::Const(_) | Insn::Load(..) => true,
            Insn::Field(FieldOp::GetStatic, _) => true,
            Insn::Invoke(InvokeKind::Static, m) => m.desc.starts_with("()") && !m.desc.ends_with(")V"),
            _ => false,
        }
    }

    /// Returns `true` if the instruction pushes a value with no observable effect and can be
    /// deleted outright when that value is unused: constants and local loads.
    #[must_use]
    pub const fn is_pure_producer(&self) -> bool {
        matches!(self, Insn::Const(_) | Insn::Load(..))
    }

    /// Local slot read by this instruction, if any.
    #[must_use]
    pub const fn reads_local(&self) -> Option<u16> {
        match self {
            Insn::Load(_, slot) | Insn::Iinc { slot, .. } => Some(*slot),
            _ => None,
        }
    }

    /// Local slot written by this instruction, if any.
    #[must_use]
    pub const fn writes_local(&self) -> Option<u16> {
        match self {
            Insn::Store(_, slot) | Insn::Iinc { slot, .. } => Some(*slot),
            _ => None,
        }
    }

    /// Stack effect in slots, using net accounting for shuffles.
    #[must_use]
    pub fn stack_effect(&self) -> StackEffect {
        let e = StackEffect::new;
        match self {
            Insn::Label | Insn::Line(_) | Insn::Nop | Insn::Iinc { .. } | Insn::Goto(_) => e(0, 0),
            Insn::Const(c) => e(0, c.size()),
            Insn::Load(k, _) => e(0, k.size()),
            Insn::Store(k, _) => e(k.size(), 0),
            Insn::Stack(op) => match op {
                StackOp::Pop => e(1, 0),
                StackOp::Pop2 => e(2, 0),
                StackOp::Dup | StackOp::DupX1 | StackOp::DupX2 => e(0, 1),
                StackOp::Dup2 | StackOp::Dup2X1 | StackOp::Dup2X2 => e(0, 2),
                StackOp::Swap => e(0, 0),
            },
            Insn::Binary(op, k) => {
                let right = if op.is_shift() { 1 } else { k.size() };
                e(k.size() + right, k.size())
            }
            Insn::Neg(k) => e(k.size(), k.size()),
            Insn::Convert(from, to) => e(from.size(), to.size()),
            Insn::Narrow(_) => e(1, 1),
            Insn::Compare(c) => e(c.operand_size() * 2, 1),
            Insn::If(c, _) => e(c.operand_count(), 0),
            Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => e(1, 0),
            Insn::Return(k) => e(k.map_or(0, VarKind::size), 0),
            Insn::Throw => e(1, 0),
            Insn::Field(op, m) => {
                let size = descriptor::field_slots(&m.desc);
                match op {
                    FieldOp::GetStatic => e(0, size),
                    FieldOp::PutStatic => e(size, 0),
                    FieldOp::GetField => e(1, size),
                    FieldOp::PutField => e(1 + size, 0),
                }
            }
            Insn::Invoke(kind, m) => {
                let (args, ret) = descriptor::method_slots(&m.desc);
                let receiver = usize::from(*kind != InvokeKind::Static);
                e(args + receiver, ret)
            }
            Insn::InvokeDynamic { desc, .. } => {
                let (args, ret) = descriptor::method_slots(desc);
                e(args, ret)
            }
            Insn::New(_) => e(0, 1),
            Insn::NewArray(_) | Insn::ANewArray(_) | Insn::ArrayLength => e(1, 1),
            Insn::MultiANewArray { dims, .. } => e(usize::from(*dims), 1),
            Insn::ArrayLoad(k) => e(2, k.size()),
            Insn::ArrayStore(k) => e(2 + k.size(), 0),
            Insn::CheckCast(_) => e(0, 0),
            Insn::InstanceOf(_) => e(1, 1),
            Insn::MonitorEnter | Insn::MonitorExit => e(1, 0),
        }
    }

    /// Stack effect in values, where a `long` or `double` counts once.
    ///
    /// Shuffles are net, like [`Insn::stack_effect`]. Returns `None` for `pop2` and the `dup2`
    /// family, whose value count depends on the widths of the operands.
    #[must_use]
    pub fn value_effect(&self) -> Option<StackEffect> {
        let e = StackEffect::new;
        Some(match self {
            Insn::Label
            | Insn::Line(_)
            | Insn::Nop
            | Insn::Iinc { .. }
            | Insn::Goto(_)
            | Insn::CheckCast(_) => e(0, 0),
            Insn::Const(_) | Insn::Load(..) | Insn::New(_) => e(0, 1),
            Insn::Store(..) => e(1, 0),
            Insn::Stack(op) => match op {
                StackOp::Pop => e(1, 0),
                StackOp::Dup | StackOp::DupX1 | StackOp::DupX2 => e(0, 1),
                StackOp::Swap => e(0, 0),
                StackOp::Pop2 | StackOp::Dup2 | StackOp::Dup2X1 | StackOp::Dup2X2 => return None,
            },
            Insn::Binary(..) | Insn::Compare(_) => e(2, 1),
            Insn::Neg(_)
            | Insn::Convert(..)
            | Insn::Narrow(_)
            | Insn::NewArray(_)
            | Insn::ANewArray(_)
            | Insn::ArrayLength
            | Insn::InstanceOf(_) => e(1, 1),
            Insn::If(c, _) => e(c.operand_count(), 0),
            Insn::TableSwitch { .. }
            | Insn::LookupSwitch { .. }
            | Insn::Throw
            | Insn::MonitorEnter
            | Insn::MonitorExit => e(1, 0),
            Insn::Return(k) => e(usize::from(k.is_some()), 0),
            Insn::Field(op, _) => match op {
                FieldOp::GetStatic => e(0, 1),
                FieldOp::PutStatic => e(1, 0),
                FieldOp::GetField => e(1, 1),
                FieldOp::PutField => e(2, 0),
            },
            Insn::Invoke(kind, m) => {
                let (args, ret) = descriptor::method_values(&m.desc);
                e(args + usize::from(*kind != InvokeKind::Static), ret)
            }
            Insn::InvokeDynamic { desc, .. } => {
                let (args, ret) = descriptor::method_values(desc);
                e(args, ret)
            }
            Insn::MultiANewArray { dims, .. } => e(usize::from(*dims), 1),
            Insn::ArrayLoad(_) => e(2, 1),
            Insn::ArrayStore(_) => e(3, 0),
        })
    }

    /// Slots consumed, see [`Insn::stack_effect`].
    #[must_use]
    pub fn size_consumed(&self) -> usize {
        self.stack_effect().consumed
    }

    /// Slots produced, see [`Insn::stack_effect`].
    #[must_use]
    pub fn size_produced(&self) -> usize {
        self.stack_effect().produced
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = || self.opcode().map_or("", |op| opcodes::MNEMONICS[op as usize]);
        match self {
            Insn::Label => f.write_str("label"),
            Insn::Line(n) => write!(f, "line {n}"),
            Insn::Const(c) => write!(f, "{c}"),
            Insn::Load(_, slot) | Insn::Store(_, slot) => write!(f, "{} {slot}", mnemonic()),
            Insn::Iinc { slot, delta } => write!(f, "iinc {slot} {delta}"),
            Insn::If(_, target) | Insn::Goto(target) => write!(f, "{} {target}", mnemonic()),
            Insn::TableSwitch {
                low,
                default,
                targets,
            } => {
                write!(f, "tableswitch {low}")?;
                for target in targets {
                    write!(f, " {target}")?;
                }
                write!(f, " default {default}")
            }
            Insn::LookupSwitch {
                default,
                keys,
                targets,
            } => {
                f.write_str("lookupswitch")?;
                for (key, target) in keys.iter().zip(targets) {
                    write!(f, " {key}:{target}")?;
                }
                write!(f, " default {default}")
            }
            Insn::Field(_, m) | Insn::Invoke(_, m) => write!(f, "{} {m}", mnemonic()),
            Insn::InvokeDynamic { name, desc } => write!(f, "invokedynamic {name}{desc}"),
            Insn::New(t) | Insn::ANewArray(t) | Insn::CheckCast(t) | Insn::InstanceOf(t) => {
                write!(f, "{} {t}", mnemonic())
            }
            Insn::NewArray(p) => write!(f, "newarray {}", <&str>::from(*p)),
            Insn::MultiANewArray { desc, dims } => write!(f, "multianewarray {desc} {dims}"),
            _ => f.write_str(mnemonic()),
        }
    }
}
