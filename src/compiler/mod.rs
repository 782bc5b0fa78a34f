//! Pass infrastructure: the pass trait, name registry, scheduler and event log.
//!
//! This module is the middle layer between analysis and the concrete passes:
//!
//! - [`crate::analysis`] - flow graph, frames, liveness, type queries
//! - [`compiler`](self) - how passes are described, ordered, run and observed
//! - [`crate::deobfuscation`] - the passes themselves, contexts and the engine
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Pass Pipeline                               │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  PassRegistry                 name -> factory                    │
//! │                                                                  │
//! │  PassScheduler                dependency-ordered fixpoint loop   │
//! │    ├─ hard dependencies       pulled in, always run first        │
//! │    ├─ soft hints              applied when acyclic               │
//! │    ├─ per-method sessions     rayon across methods               │
//! │    └─ prune-after-no-work     idle passes drop out               │
//! │                                                                  │
//! │  MethodPass trait             Interface for all passes           │
//! │    ├─ run_on_method()         Per-method transformation          │
//! │    ├─ initialize()            Setup before each iteration        │
//! │    └─ finalize()              Cleanup after each iteration       │
//! │                                                                  │
//! │  EventLog                     Change tracking and diagnostics    │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod events;
mod pass;
mod registry;
mod scheduler;

pub use events::{DerivedStats, Event, EventBuilder, EventKind, EventLog};
pub use pass::{MethodPass, PassDescriptor};
pub use registry::PassRegistry;
pub use scheduler::PassScheduler;
