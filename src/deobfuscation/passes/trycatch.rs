//! Redundant exception range removal.
//!
//! Obfuscators wrap ordinary code in exception ranges whose handlers can never run, which breaks
//! decompilers and hides the real control flow behind fake handler blocks. This pass drops:
//!
//! 1. **Shadowed ranges.** For ranges with the same span, the first handler whose type catches an
//!    exception wins; a later one catching a subtype of an earlier one is never selected.
//! 2. **Ranges that never fire.** Every reachable instruction inside the range is classified as
//!    never, possibly or always throwing something the handler catches. A range without a
//!    throwing instruction protects nothing.
//!    A handler for a workspace exception type that no workspace method ever instantiates is
//!    treated the same way, whatever the range contains.
//! 3. **Duplicates.** Ranges with the same catch type, handler and span of throwing instructions
//!    are interchangeable; only the last one in table order is kept.
//!
//! Handlers left without a range become unreachable and are removed by dead-code pruning.
//!
//! Catch questions go through the [`TypeOracle`]. When either type is unknown to it, the answer is
//! [`Handling::Unknown`] and the range is left alone.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

use crate::{
    analysis::{AbstractValue, Frame, TypeOracle},
    assembly::{ArrayKind, BinaryOp, FieldOp, Insn, NumKind, TryCatchBlock},
    compiler::{EventKind, MethodPass},
    deobfuscation::{passes::DeadCodePass, MethodContext},
    Result,
};

const NPE: &str = "java/lang/NullPointerException";
const ASE: &str = "java/lang/ArrayStoreException";
const AIOOBE: &str = "java/lang/ArrayIndexOutOfBoundsException";
const NASE: &str = "java/lang/NegativeArraySizeException";
const IMSE: &str = "java/lang/IllegalMonitorStateException";
const CCE: &str = "java/lang/ClassCastException";
const AE: &str = "java/lang/ArithmeticException";
const THROWABLE: &str = "java/lang/Throwable";

/// Whether a handler catches a thrown type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handling {
    /// The handler catches it.
    Caught,
    /// The handler does not catch it.
    NotCaught,
    /// One of the types is unknown to the oracle.
    Unknown,
}

/// Throwing behavior of one instruction with respect to one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Throws {
    Never,
    Possibly,
    Always,
}

impl Throws {
    fn can_throw(self) -> bool {
        self > Throws::Never
    }
}

/// Removes exception ranges that are shadowed, never fire, or duplicate another range.
#[derive(Debug, Default)]
pub struct RedundantTryCatchPass {
    /// `(thrown, caught) -> handling`, shared across methods.
    handling: DashMap<(String, String), Handling>,
}

impl RedundantTryCatchPass {
    /// Pass name.
    pub const NAME: &'static str = "redundant-try-catch-removal";

    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// How `block` handles any of `thrown`.
    ///
    /// `Caught` wins over `Unknown`, which wins over `NotCaught`.
    fn handles(&self, oracle: &dyn TypeOracle, block: &TryCatchBlock, thrown: &[&str]) -> Handling {
        let caught = match block.catch_type.as_deref() {
            None | Some(THROWABLE) => return Handling::Caught,
            Some(caught) => caught,
        };
        let mut result = Handling::NotCaught;
        for &exception in thrown {
            if exception == caught {
                return Handling::Caught;
            }
            let key = (exception.to_string(), caught.to_string());
            let handling = *self.handling.entry(key).or_insert_with(|| {
                if !oracle.is_known(exception) || !oracle.is_known(caught) {
                    Handling::Unknown
                } else if oracle.is_assignable_from(caught, exception) {
                    Handling::Caught
                } else {
                    Handling::NotCaught
                }
            });
            match handling {
                Handling::Caught => return Handling::Caught,
                Handling::Unknown => result = Handling::Unknown,
                Handling::NotCaught => {}
            }
        }
        result
    }

    /// Classifies `insn` executing in `frame` against `block`. `None` when the oracle cannot
    /// decide.
    fn classify(
        &self,
        oracle: &dyn TypeOracle,
        block: &TryCatchBlock,
        insn: &Insn,
        frame: &Frame,
    ) -> Option<Throws> {
        let catches = |exception: &str| self.handles(oracle, block, &[exception]) == Handling::Caught;
        let fallback = |thrown: &[&str]| match self.handles(oracle, block, thrown) {
            Handling::Caught => Some(Throws::Possibly),
            Handling::NotCaught => Some(Throws::Never),
            Handling::Unknown => None,
        };
        let null_at = |depth: usize| frame.top(depth).is_some_and(AbstractValue::is_null);
        let negative_at = |depth: usize| {
            frame
                .top(depth)
                .and_then(AbstractValue::as_int)
                .is_some_and(|size| size < 0)
        };

        match insn {
            Insn::ArrayLoad(_) | Insn::ArrayStore(_) => {
                let store = matches!(insn, Insn::ArrayStore(_));
                let base = usize::from(store);
                let array = frame.top(base + 1);
                if null_at(base + 1) && catches(NPE) {
                    return Some(Throws::Always);
                }
                if let Some(index) = frame.top(base).and_then(AbstractValue::as_int) {
                    let beyond = array
                        .and_then(AbstractValue::array_length)
                        .is_some_and(|length| index >= length);
                    if (index < 0 || beyond) && catches(AIOOBE) {
                        return Some(Throws::Always);
                    }
                }
                if matches!(insn, Insn::ArrayStore(ArrayKind::Ref))
                    && store_mismatch(oracle, array, frame.top(0))
                    && catches(ASE)
                {
                    return Some(Throws::Always);
                }
                if store {
                    fallback(&[NPE, AIOOBE, ASE])
                } else {
                    fallback(&[NPE, AIOOBE])
                }
            }
            Insn::NewArray(_) | Insn::ANewArray(_) => {
                if negative_at(0) && catches(NASE) {
                    return Some(Throws::Always);
                }
                fallback(&[NASE])
            }
            Insn::MultiANewArray { dims, .. } => {
                if (0..usize::from(*dims)).any(negative_at) && catches(NASE) {
                    return Some(Throws::Always);
                }
                fallback(&[NASE])
            }
            Insn::ArrayLength | Insn::MonitorEnter | Insn::Field(FieldOp::GetField, _) => {
                if null_at(0) && catches(NPE) {
                    return Some(Throws::Always);
                }
                fallback(&[NPE])
            }
            Insn::Field(FieldOp::PutField, _) => {
                if null_at(1) && catches(NPE) {
                    return Some(Throws::Always);
                }
                fallback(&[NPE])
            }
            Insn::MonitorExit => {
                if null_at(0) && catches(NPE) {
                    return Some(Throws::Always);
                }
                fallback(&[NPE, IMSE])
            }
            Insn::Return(_) => fallback(&[IMSE]),
            Insn::CheckCast(target) => {
                let value = frame.top(0);
                let failing = value.is_some_and(|value| !value.is_null())
                    && value
                        .and_then(AbstractValue::type_name)
                        .is_some_and(|ty| {
                            oracle.is_known(ty)
                                && oracle.is_known(target)
                                && !oracle.is_assignable_from(target, ty)
                        });
                if failing && catches(CCE) {
                    return Some(Throws::Always);
                }
                fallback(&[CCE])
            }
            Insn::Binary(BinaryOp::Div | BinaryOp::Rem, NumKind::Int | NumKind::Long) => {
                let divisor = frame.top(0);
                let zero = match divisor {
                    Some(AbstractValue::Int(Some(value))) => Some(*value == 0),
                    Some(AbstractValue::Long(Some(value))) => Some(*value == 0),
                    _ => None,
                };
                match zero {
                    Some(true) if catches(AE) => Some(Throws::Always),
                    Some(true) => Some(Throws::Never),
                    Some(false) => Some(Throws::Never),
                    None => fallback(&[AE]),
                }
            }
            Insn::Invoke(..) | Insn::InvokeDynamic { .. } => Some(Throws::Possibly),
            Insn::Throw => {
                if null_at(0) && catches(NPE) {
                    return Some(Throws::Always);
                }
                let Some(thrown) = frame.top(0).and_then(AbstractValue::type_name) else {
                    return Some(Throws::Possibly);
                };
                match self.handles(oracle, block, &[thrown]) {
                    Handling::Caught => Some(Throws::Always),
                    Handling::Unknown => None,
                    // a subtype of the static type may still be caught
                    Handling::NotCaught => {
                        let caught = block.caught_type();
                        if oracle.is_assignable_from(thrown, caught) {
                            Some(Throws::Possibly)
                        } else {
                            Some(Throws::Never)
                        }
                    }
                }
            }
            _ => Some(Throws::Never),
        }
    }
}

/// Returns `true` if storing `value` into `array` is known to fail its element type check.
fn store_mismatch(
    oracle: &dyn TypeOracle,
    array: Option<&AbstractValue>,
    value: Option<&AbstractValue>,
) -> bool {
    let Some(element) = array
        .and_then(AbstractValue::type_name)
        .and_then(|ty| ty.strip_prefix('['))
        .map(|element| {
            element
                .strip_prefix('L')
                .and_then(|name| name.strip_suffix(';'))
                .unwrap_or(element)
        })
    else {
        return false;
    };
    let Some(value) = value.filter(|value| !value.is_null()) else {
        return false;
    };
    value.type_name().is_some_and(|ty| {
        oracle.is_known(ty) && oracle.is_known(element) && !oracle.is_assignable_from(element, ty)
    })
}

/// Drops ranges whose handler is shadowed by an earlier handler of the same span. Returns the
/// number of dropped ranges.
///
/// # Errors
///
/// Returns an error if dead code cannot be pruned afterwards.
pub fn remove_shadowed_handlers(ctx: &mut MethodContext<'_>) -> Result<usize> {
    let oracle = ctx.analysis().oracle();
    let positions = ctx.body().positions();

    let mut seen: HashMap<(usize, usize), Vec<&str>> = HashMap::new();
    let mut shadowed = Vec::new();
    for (index, block) in ctx.body().try_catch_blocks.iter().enumerate() {
        let (Some(start), Some(end)) = (positions.of(block.start), positions.of(block.end)) else {
            continue;
        };
        if start >= end {
            continue;
        }
        let handled = block.catch_type.as_deref().unwrap_or(THROWABLE);
        let types = seen.entry((start, end)).or_default();
        if let Some(earlier) = types
            .iter()
            .find(|earlier| oracle.is_assignable_from(earlier, handled))
        {
            shadowed.push((index, format!("{handled} is shadowed by {earlier}")));
        } else {
            types.push(handled);
        }
    }
    if shadowed.is_empty() {
        return Ok(0);
    }

    let dropped: HashSet<usize> = shadowed.iter().map(|(index, _)| *index).collect();
    let mut index = 0;
    ctx.body_mut().try_catch_blocks.retain(|_| {
        let keep = !dropped.contains(&index);
        index += 1;
        keep
    });
    for (_, message) in shadowed.iter() {
        ctx.record(EventKind::TryCatchRemoved).message(message.clone());
    }
    ctx.prune_unreachable()?;
    Ok(dropped.len())
}

impl RedundantTryCatchPass {
    /// Drops ranges that never fire and duplicate ranges. Returns the number of dropped ranges.
    ///
    /// # Errors
    ///
    /// Returns an error if frames cannot be computed or dead code cannot be pruned afterwards.
    pub fn remove_redundant_ranges(&self, ctx: &mut MethodContext<'_>) -> Result<usize> {
        let frames = ctx.frames()?;
        let oracle = ctx.analysis().oracle();
        let usage = ctx.analysis().exception_usage();
        let body = ctx.body();
        let positions = body.positions();

        // Throwing span per block: None when unknown, Some(None) when nothing throws.
        let mut spans: Vec<Option<Option<(usize, usize)>>> = Vec::new();
        let mut unthrown = HashSet::new();
        for (index, block) in body.try_catch_blocks.iter().enumerate() {
            let never_thrown = usage
                .zip(block.catch_type.as_deref())
                .is_some_and(|(usage, caught)| usage.is_never_thrown(oracle, caught));
            if never_thrown {
                unthrown.insert(index);
                spans.push(Some(None));
                continue;
            }
            let (Some(start), Some(end)) = (positions.of(block.start), positions.of(block.end))
            else {
                spans.push(None);
                continue;
            };
            let mut span: Option<(usize, usize)> = None;
            let mut decided = true;
            for pos in start..end {
                let Some(id) = positions.at(pos) else {
                    continue;
                };
                let (Some(frame), Some(insn)) = (frames.at(id), body.instructions.get(id)) else {
                    continue;
                };
                match self.classify(oracle, block, insn, frame) {
                    None => {
                        decided = false;
                        break;
                    }
                    Some(throws) if throws.can_throw() => {
                        span = Some(span.map_or((pos, pos), |(first, _)| (first, pos)));
                    }
                    Some(_) => {}
                }
            }
            spans.push(decided.then_some(span));
        }

        let mut removed: Vec<(usize, String)> = Vec::new();
        for (index, span) in spans.iter().enumerate() {
            if let Some(None) = span {
                let block = &body.try_catch_blocks[index];
                let message = if unthrown.contains(&index) {
                    format!("{} is never instantiated", block.caught_type())
                } else {
                    format!("handler for {} never fires", block.caught_type())
                };
                removed.push((index, message));
            }
        }
        // walk backwards so the last of each group of duplicates survives
        let mut models = HashSet::new();
        for (index, span) in spans.iter().enumerate().rev() {
            let Some(Some((first, last))) = span else {
                continue;
            };
            let block = &body.try_catch_blocks[index];
            let handler = positions.of(block.handler);
            if !models.insert((block.catch_type.clone(), *first, *last, handler)) {
                removed.push((
                    index,
                    format!("duplicate handler for {}", block.caught_type()),
                ));
            }
        }
        if removed.is_empty() {
            return Ok(0);
        }

        let dropped: HashSet<usize> = removed.iter().map(|(index, _)| *index).collect();
        let mut index = 0;
        ctx.body_mut().try_catch_blocks.retain(|_| {
            let keep = !dropped.contains(&index);
            index += 1;
            keep
        });
        for (_, message) in removed {
            ctx.record(EventKind::TryCatchRemoved).message(message);
        }
        ctx.prune_unreachable()?;
        Ok(dropped.len())
    }
}

impl MethodPass for RedundantTryCatchPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Removes exception ranges that are shadowed, never fire, or duplicate another range"
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[DeadCodePass::NAME]
    }

    fn run_on_method(&self, ctx: &mut MethodContext<'_>) -> Result<bool> {
        if ctx.body().try_catch_blocks.is_empty() {
            return Ok(false);
        }
        let shadowed = remove_shadowed_handlers(ctx)?;
        if ctx.body().try_catch_blocks.is_empty() {
            return Ok(shadowed > 0);
        }
        let redundant = self.remove_redundant_ranges(ctx)?;
        Ok(shadowed + redundant > 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        analysis::ClassHierarchy,
        assembly::{MethodBody, MethodBuilder, PrimitiveType},
        deobfuscation::{AnalysisContext, EngineConfig, Workspace},
    };

    fn analysis() -> AnalysisContext {
        AnalysisContext::new(EngineConfig::default(), Arc::new(ClassHierarchy::new()), None)
    }

    fn run(body: MethodBody) -> (bool, MethodBody) {
        let analysis = analysis();
        let pass = RedundantTryCatchPass::new();
        let mut ctx = MethodContext::new(body, RedundantTryCatchPass::NAME, &analysis);
        let changed = pass.run_on_method(&mut ctx).unwrap();
        assert!(!pass.run_on_method(&mut ctx).unwrap());
        ctx.body().verify().unwrap();
        (changed, ctx.into_body())
    }

    fn real(body: &MethodBody) -> Vec<String> {
        body.instructions
            .iter()
            .filter(|(_, insn)| !insn.is_meta())
            .map(|(_, insn)| insn.to_string())
            .collect()
    }

    #[test]
    fn test_handling() {
        let pass = RedundantTryCatchPass::new();
        let oracle = ClassHierarchy::new();
        let body = MethodBuilder::new("A", "m", "()V")
            .label("start")
            .vreturn()
            .label("end")
            .label("handler")
            .athrow()
            .try_catch("start", "end", "handler", None)
            .build()
            .unwrap();
        let template = body.try_catch_blocks[0].clone();
        let block = |ty: Option<&str>| TryCatchBlock {
            catch_type: ty.map(str::to_string),
            ..template.clone()
        };
        let runtime = block(Some("java/lang/RuntimeException"));
        assert_eq!(pass.handles(&oracle, &runtime, &[NPE]), Handling::Caught);
        assert_eq!(pass.handles(&oracle, &runtime, &["java/io/IOException"]), Handling::NotCaught);
        assert_eq!(pass.handles(&oracle, &runtime, &["x/Custom"]), Handling::Unknown);
        assert_eq!(pass.handles(&oracle, &runtime, &["x/Custom", AE]), Handling::Caught);
        assert_eq!(pass.handles(&oracle, &block(None), &["x/Custom"]), Handling::Caught);
        assert_eq!(pass.handles(&oracle, &block(Some(AE)), &[IMSE]), Handling::NotCaught);
    }

    #[test]
    fn test_arithmetic_range_without_division_removed() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .label("start")
            .iload(0)
            .iconst(1)
            .iadd()
            .istore(0)
            .label("end")
            .iload(0)
            .ireturn()
            .label("handler")
            .pop()
            .iconst(-1)
            .ireturn()
            .try_catch("start", "end", "handler", Some(AE))
            .build()
            .unwrap();
        let (changed, body) = run(body);
        assert!(changed);
        assert!(body.try_catch_blocks.is_empty());
        assert_eq!(real(&body), ["iload 0", "iconst_1", "iadd", "istore 0", "iload 0", "ireturn"]);
    }

    #[test]
    fn test_unknown_division_kept() {
        let body = MethodBuilder::new("A", "m", "(II)I")
            .label("start")
            .iload(0)
            .iload(1)
            .idiv()
            .ireturn()
            .label("end")
            .label("handler")
            .pop()
            .iconst(0)
            .ireturn()
            .try_catch("start", "end", "handler", Some(AE))
            .build()
            .unwrap();
        let (changed, body) = run(body);
        assert!(!changed);
        assert_eq!(body.try_catch_blocks.len(), 1);
    }

    #[test]
    fn test_known_divisor_removed() {
        let body = MethodBuilder::new("A", "m", "(I)I")
            .label("start")
            .iload(0)
            .iconst(3)
            .idiv()
            .istore(0)
            .label("end")
            .iload(0)
            .ireturn()
            .label("handler")
            .pop()
            .iconst(0)
            .ireturn()
            .try_catch("start", "end", "handler", Some(AE))
            .build()
            .unwrap();
        let (changed, body) = run(body);
        assert!(changed);
        assert!(body.try_catch_blocks.is_empty());
    }

    #[test]
    fn test_call_keeps_range() {
        let body = MethodBuilder::new("A", "m", "()V")
            .label("start")
            .invokestatic("A", "work", "()V")
            .label("end")
            .vreturn()
            .label("handler")
            .pop()
            .vreturn()
            .try_catch("start", "end", "handler", Some("java/lang/IllegalStateException"))
            .build()
            .unwrap();
        let (changed, body) = run(body);
        assert!(!changed);
        assert_eq!(body.try_catch_blocks.len(), 1);
    }

    #[test]
    fn test_unknown_catch_type_keeps_range() {
        let body = MethodBuilder::new("A", "m", "()I")
            .label("start")
            .iconst(1)
            .ireturn()
            .label("end")
            .label("handler")
            .pop()
            .iconst(0)
            .ireturn()
            .try_catch("start", "end", "handler", Some("x/CustomException"))
            .build()
            .unwrap();
        let (changed, body) = run(body);
        assert!(!changed);
        assert_eq!(body.try_catch_blocks.len(), 1);
    }

    #[test]
    fn test_negative_array_size_always_throws() {
        let body = MethodBuilder::new("A", "m", "()V")
            .label("start")
            .iconst(-1)
            .newarray(PrimitiveType::Int)
            .pop()
            .label("end")
            .vreturn()
            .label("handler")
            .pop()
            .vreturn()
            .try_catch("start", "end", "handler", Some(NASE))
            .build()
            .unwrap();
        let (changed, body) = run(body);
        assert!(!changed);
        assert_eq!(body.try_catch_blocks.len(), 1);
    }

    fn guarded_call(catch_type: &str) -> MethodBody {
        MethodBuilder::new("x/Main", "m", "()V")
            .label("start")
            .invokestatic("x/Main", "work", "()V")
            .label("end")
            .vreturn()
            .label("handler")
            .pop()
            .vreturn()
            .try_catch("start", "end", "handler", Some(catch_type))
            .build()
            .unwrap()
    }

    fn run_in(workspace: &Workspace, body: MethodBody) -> (bool, MethodBody) {
        let analysis =
            AnalysisContext::new(EngineConfig::default(), workspace.hierarchy().clone(), None)
                .with_exception_usage(workspace.exception_usage());
        let pass = RedundantTryCatchPass::new();
        let mut ctx = MethodContext::new(body, RedundantTryCatchPass::NAME, &analysis);
        let changed = pass.run_on_method(&mut ctx).unwrap();
        ctx.body().verify().unwrap();
        (changed, ctx.into_body())
    }

    #[test]
    fn test_never_instantiated_exception_removed() {
        let workspace = Workspace::new();
        workspace.hierarchy().add_class("x/Fake", Some("java/lang/RuntimeException"), &[]);
        workspace.add_method(MethodBuilder::new("x/Fake", "<init>", "()V").vreturn().build().unwrap());
        let body = guarded_call("x/Fake");
        workspace.add_method(body.clone());

        let (changed, body) = run_in(&workspace, body);
        assert!(changed);
        assert!(body.try_catch_blocks.is_empty());
        assert_eq!(real(&body), ["invokestatic x/Main.work()V", "return"]);
    }

    #[test]
    fn test_instantiated_exception_kept() {
        let workspace = Workspace::new();
        workspace.hierarchy().add_class("x/Real", Some("java/lang/RuntimeException"), &[]);
        workspace.add_method(MethodBuilder::new("x/Real", "<init>", "()V").vreturn().build().unwrap());
        workspace.add_method(
            MethodBuilder::new("x/Main", "work", "()V")
                .new_object("x/Real")
                .athrow()
                .build()
                .unwrap(),
        );
        let body = guarded_call("x/Real");
        workspace.add_method(body.clone());

        let (changed, body) = run_in(&workspace, body);
        assert!(!changed);
        assert_eq!(body.try_catch_blocks.len(), 1);
    }

    #[test]
    fn test_shadowed_handler_removed() {
        let body = MethodBuilder::new("A", "m", "()V")
            .label("start")
            .invokestatic("A", "work", "()V")
            .label("end")
            .vreturn()
            .label("any")
            .pop()
            .vreturn()
            .label("npe")
            .pop()
            .vreturn()
            .try_catch("start", "end", "any", None)
            .try_catch("start", "end", "npe", Some(NPE))
            .build()
            .unwrap();
        let (changed, body) = run(body);
        assert!(changed);
        assert_eq!(body.try_catch_blocks.len(), 1);
        assert_eq!(body.try_catch_blocks[0].catch_type, None);
        assert_eq!(real(&body), ["invokestatic A.work()V", "return", "pop", "return"]);
    }

    #[test]
    fn test_catch_all_after_throwable_removed() {
        let body = MethodBuilder::new("A", "m", "()V")
            .label("start")
            .invokestatic("A", "work", "()V")
            .label("end")
            .vreturn()
            .label("throwable")
            .pop()
            .vreturn()
            .label("any")
            .pop()
            .iconst(1)
            .pop()
            .vreturn()
            .try_catch("start", "end", "throwable", Some(THROWABLE))
            .try_catch("start", "end", "any", None)
            .build()
            .unwrap();
        let (changed, body) = run(body);
        assert!(changed);
        assert_eq!(body.try_catch_blocks.len(), 1);
        assert_eq!(body.try_catch_blocks[0].catch_type.as_deref(), Some(THROWABLE));
        assert_eq!(real(&body), ["invokestatic A.work()V", "return", "pop", "return"]);
    }

    #[test]
    fn test_duplicate_range_keeps_last() {
        let body = MethodBuilder::new("A", "m", "()V")
            .label("outer")
            .iconst(0)
            .pop()
            .label("start")
            .invokestatic("A", "work", "()V")
            .label("end")
            .vreturn()
            .label("handler")
            .pop()
            .vreturn()
            .try_catch("outer", "end", "handler", None)
            .try_catch("start", "end", "handler", None)
            .build()
            .unwrap();
        let (changed, body) = run(body);
        assert!(changed);
        assert_eq!(body.try_catch_blocks.len(), 1);
        let positions = body.positions();
        let kept = &body.try_catch_blocks[0];
        let start = positions.of(kept.start).unwrap();
        // the later, narrower declaration survives
        assert!(body
            .instructions
            .iter()
            .skip(start)
            .take_while(|(_, insn)| !matches!(insn, Insn::Invoke(..)))
            .all(|(_, insn)| insn.is_meta()));
    }
}
