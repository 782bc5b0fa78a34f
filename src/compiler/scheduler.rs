//! Pass scheduler for orchestrating pass execution.
//!
//! The `PassScheduler` resolves the requested passes and their hard dependencies, orders them,
//! and runs the resulting pipeline over every method of a workspace until no pass changes
//! anything or the iteration cap is reached.

use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    assembly::MethodKey,
    compiler::{MethodPass, PassRegistry},
    deobfuscation::{AnalysisContext, MethodContext, Workspace},
    Error, Result,
};

/// Orchestrates pass execution as a dependency-ordered pipeline.
///
/// Ordering rules:
///
/// 1. Hard dependencies are pulled in transitively and always precede their dependents.
///    A cycle is an [`Error::DependencyCycle`].
/// 2. Soft hints (recommended predecessors/successors) add an ordering edge only when both
///    passes are scheduled and the edge keeps the graph acyclic.
/// 3. Remaining ties keep the order in which passes were requested.
///
/// Each iteration runs every active pass once over all methods. Passes that report
/// [`MethodPass::prune_after_no_work`] are dropped after an iteration in which they changed
/// nothing. The pipeline stops at the first iteration without changes.
pub struct PassScheduler {
    /// Maximum iterations for the entire pipeline.
    max_iterations: usize,
    /// Passes in execution order.
    passes: Vec<Box<dyn MethodPass>>,
}

impl fmt::Debug for PassScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassScheduler")
            .field("max_iterations", &self.max_iterations)
            .field("passes", &self.pass_names())
            .finish()
    }
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::new(10)
    }
}

impl PassScheduler {
    /// Creates an empty scheduler with the given iteration limit.
    #[must_use]
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
            passes: Vec::new(),
        }
    }

    /// Creates a scheduler for the named passes and their dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPass`] for a name the registry cannot resolve and
    /// [`Error::DependencyCycle`] if hard dependencies are cyclic.
    pub fn from_names(names: &[&str], registry: &PassRegistry, max_iterations: usize) -> Result<Self> {
        let mut passes: Vec<Box<dyn MethodPass>> = Vec::new();
        let mut state: HashMap<String, Visit> = HashMap::new();
        for name in names {
            resolve(name, registry, &mut state, &mut passes)?;
        }
        Self::with_passes(passes, max_iterations)
    }

    /// Creates a scheduler for an explicit set of passes.
    ///
    /// Every hard dependency must be part of `passes`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownPass`] for a missing dependency or a duplicate pass name and
    /// [`Error::DependencyCycle`] if hard dependencies are cyclic.
    pub fn with_passes(passes: Vec<Box<dyn MethodPass>>, max_iterations: usize) -> Result<Self> {
        let order = order(&passes)?;
        let mut slots: Vec<Option<Box<dyn MethodPass>>> = passes.into_iter().map(Some).collect();
        let passes = order
            .into_iter()
            .filter_map(|index| slots[index].take())
            .collect();
        Ok(Self {
            max_iterations: max_iterations.max(1),
            passes,
        })
    }

    /// Names of the scheduled passes in execution order.
    #[must_use]
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Maximum number of pipeline iterations.
    #[must_use]
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Runs the pipeline over every method of `workspace`.
    ///
    /// # Returns
    ///
    /// The number of iterations completed. Events are accumulated in `ctx.events`.
    ///
    /// # Errors
    ///
    /// With `abort_on_error` set, returns the first pass failure. Otherwise failures are
    /// recorded in `ctx` and only initialization/finalization errors are returned.
    pub fn run_pipeline(&mut self, ctx: &AnalysisContext, workspace: &Workspace) -> Result<usize> {
        let methods = workspace.keys();
        let mut active = vec![true; self.passes.len()];
        let mut iterations = 0;

        for iteration in 0..self.max_iterations {
            iterations = iteration + 1;
            let mut iteration_changed = false;

            for (index, pass) in self.passes.iter_mut().enumerate() {
                if !active[index] {
                    continue;
                }
                let changed = Self::run_pass(ctx, pass.as_mut(), workspace, &methods)?;
                debug!(pass = pass.name(), iteration, changed, "pass finished");
                if changed {
                    iteration_changed = true;
                } else if pass.prune_after_no_work() {
                    debug!(pass = pass.name(), "pruned after finding no work");
                    active[index] = false;
                }
            }

            if !iteration_changed {
                break;
            }
        }

        Ok(iterations)
    }

    /// Runs one pass once over all methods.
    ///
    /// Returns `true` if the pass changed any method.
    ///
    /// Each method body is taken out of the workspace, transformed with no lock held, and put
    /// back. A failing method gets its pre-pass body back.
    fn run_pass(
        ctx: &AnalysisContext,
        pass: &mut dyn MethodPass,
        workspace: &Workspace,
        methods: &[MethodKey],
    ) -> Result<bool> {
        pass.initialize(ctx)?;

        let any_changed = AtomicBool::new(false);
        let shared: &dyn MethodPass = &*pass;
        let process = |key: &MethodKey| -> Result<()> {
            if ctx.has_failed(key) || !shared.should_run(key, ctx) {
                return Ok(());
            }
            let Some(body) = workspace.take(key) else {
                return Ok(());
            };
            let original = body.clone();

            let mut session = MethodContext::new(body, shared.name(), ctx);
            let result = shared.run_on_method(&mut session).and_then(|changed| {
                if changed && ctx.config.verify_structure {
                    session.body().verify()?;
                }
                Ok(changed)
            });

            match result {
                Ok(changed) => {
                    workspace.replace_body(session.into_body());
                    if changed {
                        any_changed.store(true, Ordering::Relaxed);
                        ctx.processed_methods.insert(key.clone());
                    }
                    Ok(())
                }
                Err(error) => {
                    let error = error.in_pass(shared.name(), key);
                    workspace.replace_body(original);
                    if ctx.config.abort_on_error {
                        return Err(error);
                    }
                    warn!(pass = shared.name(), method = %key, %error, "pass failed, method restored");
                    ctx.record_failure(key, shared.name(), error.to_string());
                    Ok(())
                }
            }
        };

        if ctx.config.parallel {
            methods.par_iter().try_for_each(process)?;
        } else {
            methods.iter().try_for_each(process)?;
        }

        pass.finalize(ctx)?;
        Ok(any_changed.load(Ordering::Relaxed))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Instantiates `name` after its dependencies, depth first.
fn resolve(
    name: &str,
    registry: &PassRegistry,
    state: &mut HashMap<String, Visit>,
    out: &mut Vec<Box<dyn MethodPass>>,
) -> Result<()> {
    match state.get(name) {
        Some(Visit::Done) => return Ok(()),
        Some(Visit::InProgress) => return Err(Error::DependencyCycle(name.to_string())),
        None => {}
    }
    state.insert(name.to_string(), Visit::InProgress);
    let pass = registry.create(name)?;
    for dep in pass.dependencies() {
        resolve(dep, registry, state, out)?;
    }
    state.insert(name.to_string(), Visit::Done);
    out.push(pass);
    Ok(())
}

/// Execution order of `passes` as indices.
fn order(passes: &[Box<dyn MethodPass>]) -> Result<Vec<usize>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, pass) in passes.iter().enumerate() {
        if index.insert(pass.name(), i).is_some() {
            return Err(Error::UnknownPass(format!("{} is scheduled twice", pass.name())));
        }
    }

    let n = passes.len();
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, pass) in passes.iter().enumerate() {
        for dep in pass.dependencies() {
            let &d = index
                .get(dep)
                .ok_or_else(|| Error::UnknownPass(format!("{dep} (required by {})", pass.name())))?;
            edges[d].push(i);
        }
    }
    if let Some(at) = find_cycle(&edges) {
        return Err(Error::DependencyCycle(passes[at].name().to_string()));
    }

    for (i, pass) in passes.iter().enumerate() {
        let before = pass
            .recommended_predecessors()
            .iter()
            .filter_map(|p| index.get(p).map(|&p| (p, i)));
        let after = pass
            .recommended_successors()
            .iter()
            .filter_map(|s| index.get(s).map(|&s| (i, s)));
        for (from, to) in before.chain(after).collect::<Vec<_>>() {
            if from != to && !edges[from].contains(&to) && !reaches(&edges, to, from) {
                edges[from].push(to);
            }
        }
    }

    // Kahn's algorithm, lowest index first
    let mut indegree = vec![0usize; n];
    for targets in &edges {
        for &t in targets {
            indegree[t] += 1;
        }
    }
    let mut ready: std::collections::BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut out = Vec::with_capacity(n);
    while let Some(next) = ready.pop_first() {
        out.push(next);
        for &t in &edges[next] {
            indegree[t] -= 1;
            if indegree[t] == 0 {
                ready.insert(t);
            }
        }
    }
    Ok(out)
}

fn reaches(edges: &[Vec<usize>], from: usize, to: usize) -> bool {
    let mut seen = vec![false; edges.len()];
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if std::mem::replace(&mut seen[node], true) {
            continue;
        }
        stack.extend(edges[node].iter().copied());
    }
    false
}

/// A node on a cycle, if the graph has one.
fn find_cycle(edges: &[Vec<usize>]) -> Option<usize> {
    (0..edges.len()).find(|&node| edges[node].iter().any(|&next| reaches(edges, next, node)))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::{
        analysis::ClassHierarchy,
        assembly::{MethodBuilder, MethodKey},
        compiler::EventKind,
        deobfuscation::EngineConfig,
    };

    struct TestPass {
        name: &'static str,
        deps: &'static [&'static str],
        after: &'static [&'static str],
        changes_left: Arc<AtomicUsize>,
        prune: bool,
        fail: bool,
        runs: Arc<AtomicUsize>,
    }

    impl TestPass {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                deps: &[],
                after: &[],
                changes_left: Arc::new(AtomicUsize::new(0)),
                prune: false,
                fail: false,
                runs: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl MethodPass for TestPass {
        fn name(&self) -> &'static str {
            self.name
        }

        fn dependencies(&self) -> &'static [&'static str] {
            self.deps
        }

        fn recommended_successors(&self) -> &'static [&'static str] {
            self.after
        }

        fn prune_after_no_work(&self) -> bool {
            self.prune
        }

        fn run_on_method(&self, ctx: &mut MethodContext<'_>) -> Result<bool> {
            self.runs.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                ctx.body_mut().instructions.push(crate::assembly::Insn::Nop);
                return Err(malformed_error!("broken"));
            }
            let changed = self
                .changes_left
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok();
            if changed {
                ctx.record(EventKind::ConstantFolded).location(0).message("test");
            }
            Ok(changed)
        }
    }

    fn names(passes: Vec<TestPass>) -> Result<Vec<&'static str>> {
        let boxed = passes
            .into_iter()
            .map(|p| Box::new(p) as Box<dyn MethodPass>)
            .collect();
        PassScheduler::with_passes(boxed, 5).map(|s| s.pass_names())
    }

    fn setup(config: EngineConfig) -> (AnalysisContext, Workspace) {
        let ctx = AnalysisContext::new(config, Arc::new(ClassHierarchy::new()), None);
        let ws = Workspace::from_bodies([
            MethodBuilder::new("A", "a", "()V").vreturn().build().unwrap(),
            MethodBuilder::new("A", "b", "()V").vreturn().build().unwrap(),
        ]);
        (ctx, ws)
    }

    #[test]
    fn test_default_scheduler() {
        let scheduler = PassScheduler::default();
        assert_eq!(scheduler.max_iterations(), 10);
        assert!(scheduler.pass_names().is_empty());
        assert_eq!(
            format!("{scheduler:?}"),
            "PassScheduler { max_iterations: 10, passes: [] }"
        );
    }

    #[test]
    fn test_dependencies_first() {
        let mut late = TestPass::new("late");
        late.deps = &["early"];
        let order = names(vec![late, TestPass::new("early")]).unwrap();
        assert_eq!(order, vec!["early", "late"]);
    }

    #[test]
    fn test_soft_hint_never_overrides_dependency() {
        // "b" asks to run before "a", but "b" hard-depends on "a"
        let a = TestPass::new("a");
        let mut b = TestPass::new("b");
        b.deps = &["a"];
        b.after = &["a"];
        assert_eq!(names(vec![b, a]).unwrap(), vec!["a", "b"]);

        let x = TestPass::new("x");
        let mut y = TestPass::new("y");
        y.after = &["x"];
        assert_eq!(names(vec![x, y]).unwrap(), vec!["y", "x"]);
    }

    #[test]
    fn test_cycle_and_missing() {
        let mut a = TestPass::new("a");
        a.deps = &["b"];
        let mut b = TestPass::new("b");
        b.deps = &["a"];
        assert!(matches!(names(vec![a, b]), Err(Error::DependencyCycle(_))));

        let mut c = TestPass::new("c");
        c.deps = &["missing"];
        assert!(matches!(names(vec![c]), Err(Error::UnknownPass(_))));
    }

    #[test]
    fn test_registry_pulls_dependencies() {
        let mut registry = PassRegistry::new();
        registry.register("base", || Box::new(TestPass::new("base")));
        registry.register("top", || {
            let mut pass = TestPass::new("top");
            pass.deps = &["base"];
            Box::new(pass)
        });
        let scheduler = PassScheduler::from_names(&["top"], &registry, 3).unwrap();
        assert_eq!(scheduler.pass_names(), vec!["base", "top"]);
        assert!(matches!(
            PassScheduler::from_names(&["nope"], &registry, 3),
            Err(Error::UnknownPass(_))
        ));
    }

    #[test]
    fn test_fixpoint_and_pruning() {
        let (ctx, ws) = setup(EngineConfig::default());
        let busy = TestPass::new("busy");
        busy.changes_left.store(3, Ordering::Relaxed);
        let mut idle = TestPass::new("idle");
        idle.prune = true;
        let idle_runs = Arc::clone(&idle.runs);

        let mut scheduler =
            PassScheduler::with_passes(vec![Box::new(busy), Box::new(idle)], 10).unwrap();
        let iterations = scheduler.run_pipeline(&ctx, &ws).unwrap();
        // two methods per iteration consume the three changes in two iterations,
        // the third finds nothing
        assert_eq!(iterations, 3);
        // idle ran once per method, then was pruned
        assert_eq!(idle_runs.load(Ordering::Relaxed), 2);
        assert_eq!(ctx.events.count_kind(EventKind::ConstantFolded), 3);
        assert!(!ctx.processed_methods.is_empty());
    }

    #[test]
    fn test_failure_restores_method() {
        let (ctx, ws) = setup(EngineConfig::default().with_parallel(false));
        let mut broken = TestPass::new("broken");
        broken.fail = true;
        let mut scheduler = PassScheduler::with_passes(vec![Box::new(broken)], 3).unwrap();
        assert_eq!(scheduler.run_pipeline(&ctx, &ws).unwrap(), 1);

        let key = MethodKey::new("A", "a", "()V");
        assert!(ctx.has_failed(&key));
        assert_eq!(ws.with_method(&key, |b| b.instructions.len()), Some(1));
        assert_eq!(ctx.events.count_kind(EventKind::PassFailed), 2);
    }

    #[test]
    fn test_abort_on_error() {
        let (ctx, ws) = setup(EngineConfig::default().with_abort_on_error(true));
        let mut broken = TestPass::new("broken");
        broken.fail = true;
        let mut scheduler = PassScheduler::with_passes(vec![Box::new(broken)], 3).unwrap();
        match scheduler.run_pipeline(&ctx, &ws) {
            Err(Error::Transform { pass, .. }) => assert_eq!(pass, "broken"),
            other => panic!("unexpected {other:?}"),
        }
        // the failing body was put back
        assert_eq!(ws.len(), 2);
    }
}
