//! Bounded concrete evaluation.
//!
//! The [`Evaluator`] executes instructions along a single path using the same transfer function
//! as the abstract interpreter, following branches whose outcome is known and giving up as soon
//! as a branch, a side effect or a fault cannot be modelled. Every run has a step budget;
//! running out of steps is an [`EvalFailure`], not a crate error, and only aborts the attempt.

use std::fmt;

use crate::{
    analysis::{
        interpreter::{step, CallEnv, Flow},
        AbstractValue, Frame, ValueInterpreter,
    },
    assembly::{Insn, MethodBody},
};

/// Why an evaluation attempt stopped without a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalFailure {
    /// The step budget was exhausted after the given number of steps.
    BudgetExceeded(usize),
    /// Execution reached something the evaluator cannot decide or model.
    Inconclusive(String),
}

impl fmt::Display for EvalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalFailure::BudgetExceeded(steps) => write!(f, "step budget exhausted after {steps} steps"),
            EvalFailure::Inconclusive(reason) => write!(f, "inconclusive: {reason}"),
        }
    }
}

/// Single-path evaluator with a step budget.
pub struct Evaluator<'a> {
    env: CallEnv<'a>,
    budget: usize,
}

impl<'a> Evaluator<'a> {
    /// Creates an evaluator that resolves calls through `interpreter`.
    #[must_use]
    pub fn new(interpreter: &'a ValueInterpreter, budget: usize) -> Self {
        Self::with_env(interpreter.env(0), budget)
    }

    pub(crate) fn with_env(env: CallEnv<'a>, budget: usize) -> Self {
        Self { env, budget }
    }

    /// Executes a straight-line sequence starting from `frame`, returning the final state.
    ///
    /// # Errors
    ///
    /// Fails on any control flow, side effect or fault inside the sequence, on a malformed
    /// stack, and when the sequence is longer than the budget.
    pub fn evaluate_sequence<'i>(
        &self,
        insns: impl IntoIterator<Item = &'i Insn>,
        frame: &Frame,
    ) -> Result<Frame, EvalFailure> {
        let mut state = frame.clone();
        for (steps, insn) in insns.into_iter().enumerate() {
            if steps >= self.budget {
                return Err(EvalFailure::BudgetExceeded(steps));
            }
            if insn.is_flow_control() || insn.has_side_effects() {
                return Err(EvalFailure::Inconclusive(format!("cannot evaluate {insn}")));
            }
            match step(insn, &mut state, &self.env) {
                Ok(Flow::Next) => {}
                Ok(_) => return Err(EvalFailure::Inconclusive(format!("{insn} faults"))),
                Err(e) => return Err(EvalFailure::Inconclusive(e.to_string())),
            }
        }
        Ok(state)
    }

    /// Runs a static method on the given arguments and returns its result.
    ///
    /// Arguments are laid out in parameter order, one entry per value. Returns `Ok(None)` for
    /// `void` methods.
    ///
    /// # Errors
    ///
    /// Fails when a branch depends on an unknown value, when the method throws or has side
    /// effects, and when the budget is exhausted.
    pub fn invoke(
        &self,
        body: &MethodBody,
        args: &[AbstractValue],
    ) -> Result<Option<AbstractValue>, EvalFailure> {
        let mut frame = Frame::new(usize::from(body.max_locals));
        let mut slot = usize::from(!body.is_static());
        if !body.is_static() {
            frame.set_local(0, ValueInterpreter::entry_frame(body).get_local(0).clone());
        }
        for arg in args {
            frame.set_local(slot, arg.clone());
            slot += arg.size();
        }

        let mut pc = body.instructions.first();
        let mut steps = 0;
        while let Some(id) = pc {
            if steps >= self.budget {
                return Err(EvalFailure::BudgetExceeded(steps));
            }
            steps += 1;

            let Some(insn) = body.instructions.get(id) else {
                break;
            };
            if insn.has_side_effects() && !matches!(insn, Insn::Throw) {
                return Err(EvalFailure::Inconclusive(format!("side effect: {insn}")));
            }
            let flow = step(insn, &mut frame, &self.env)
                .map_err(|e| EvalFailure::Inconclusive(e.to_string()))?;
            pc = match flow {
                Flow::Next => body.instructions.next(id),
                Flow::Jump(target)
                | Flow::Branch {
                    target,
                    taken: Some(true),
                }
                | Flow::Switch {
                    target: Some(target),
                } => Some(target),
                Flow::Branch {
                    taken: Some(false), ..
                } => body.instructions.next(id),
                Flow::Branch { taken: None, .. } | Flow::Switch { target: None } => {
                    return Err(EvalFailure::Inconclusive(format!("unknown branch at {insn}")));
                }
                Flow::Return(value) => return Ok(value),
                Flow::Throw | Flow::Fault => {
                    return Err(EvalFailure::Inconclusive(format!("{insn} throws")));
                }
            };
        }
        Err(EvalFailure::Inconclusive("fell off the end of the method".to_string()))
    }
}
