//! # bytefold Prelude
//!
//! The most commonly used types, for glob import.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all bytefold operations
pub use crate::Error;

/// The result type used throughout bytefold
pub use crate::Result;

// ================================================================================================
// Instruction Model
// ================================================================================================

/// Instructions and their operands
pub use crate::assembly::{
    BinaryOp, Condition, Constant, Insn, InsnId, InsnList, InvokeKind, NumKind, StackOp, VarKind,
};

/// Method bodies and their construction
pub use crate::assembly::{MethodBody, MethodBuilder, MethodKey, TryCatchBlock};

// ================================================================================================
// Analysis
// ================================================================================================

/// Frames, flow and liveness
pub use crate::analysis::{
    AbstractValue, ClassHierarchy, FlowGraph, Frame, FrameProvider, Frames, Liveness, TypeOracle,
    ValueInterpreter,
};

// ================================================================================================
// Pass Infrastructure
// ================================================================================================

/// Pass trait, registry, scheduler and events
pub use crate::compiler::{
    DerivedStats, Event, EventKind, EventLog, MethodPass, PassRegistry, PassScheduler,
};

// ================================================================================================
// Deobfuscation
// ================================================================================================

/// Engine and its surroundings
pub use crate::deobfuscation::{
    AnalysisContext, DeobfuscationEngine, DeobfuscationResult, EngineConfig, MethodContext,
    RenameMappings, Workspace,
};

/// Built-in passes
pub use crate::deobfuscation::passes::{
    default_registry, ConstantFoldingPass, DeadCodePass, DuplicateCatchPass, GotoInliningPass,
    OpaquePredicatePass, RedundantTryCatchPass, VariableFoldingPass,
};
