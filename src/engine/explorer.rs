//! Path exploration.
//!
//! The [`Explorer`] seeds an initial state for a [`Query`], then repeatedly steps pending
//! states until none remain, a bound or the timeout stops it, the caller cancels, or the
//! query target is reached.
//!
//! # Architecture
//!
//! ```text
//! Query ──► initial state ──► worklist ──► step ──► successors ──► admit ──┬─► worklist
//!                                 ▲                                         └─► records
//!                                 └── DFS: back / BFS: front / rayon tasks
//! ```
//!
//! Every successor passes through one admission point. Constant-false constraints drop it
//! without a solver call; a successor whose path condition grew is checked with
//! [`Solver::check`], and `Unknown` answers follow [`UnknownPolicy`]. Terminal successors
//! become [`TerminalRecord`]s, and when the query has a [`Target`] each returning record is
//! asked for a model of `path ∧ ret == target`.
//!
//! With [`ExplorationConfig::parallel`] the worklist is replaced by `rayon` tasks: a task
//! keeps stepping its first successor and spawns the others. Records are then collected in
//! nondeterministic order, but the set of records is the same as in a sequential run.
//!
//! # Key Components
//!
//! - [`Explorer`] - Owns configuration and solver, runs queries
//! - [`Query`] - Entry function, argument bindings, assumptions and target
//! - [`ArgSpec`] - How one parameter is seeded
//! - [`CancellationToken`] - Cooperative stop signal, checked before every step

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Instant,
};

use tracing::{debug, info, warn};

use crate::{
    engine::{
        config::{ExplorationConfig, ExplorationOrder, UnknownPolicy},
        interpreter::{self, StepContext, Successor},
        result::{Completion, Input, Report, TerminalRecord, Witness},
        state::{ExecutionState, Frame},
        stats::Stats,
    },
    ir::{Function, Type},
    memory::{Fill, ObjectKind, Pointer, Value},
    project::{FunctionId, Project},
    memory::Watchpoint,
    solver::{CachingSolver, SatResult, Solver, Z3Solver},
    symbolic::{SymbolicExpr, SymbolicOp},
    Error, Result,
};

/// Cooperative cancellation signal shared between an explorer and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates an unfired token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that exploration stop before its next step.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once [`CancellationToken::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// How an entry parameter is seeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ArgSpec {
    /// A fresh symbol named after the parameter; pointers get a fresh uninitialized buffer
    /// of [`ExplorationConfig::default_pointee_size`] bytes
    #[default]
    Symbolic,
    /// A concrete integer; for pointers only `0`, the null pointer
    Concrete(u64),
    /// A symbol constrained to the signed range `min..=max`
    Range {
        /// Smallest value
        min: i64,
        /// Largest value
        max: i64,
    },
    /// A pointer to a fresh uninitialized buffer sized for the given type
    Buffer(Type),
}

/// Condition that stops exploration early once a path satisfies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The entry function returns this value
    Returns(u64),
}

/// One exploration request.
#[derive(Debug, Clone)]
pub struct Query {
    function: String,
    args: Vec<Option<ArgSpec>>,
    assumptions: Vec<SymbolicExpr>,
    target: Option<Target>,
}

impl Query {
    /// Explores `function` with every parameter symbolic.
    #[must_use]
    pub fn new(function: impl Into<String>) -> Self {
        Query {
            function: function.into(),
            args: Vec::new(),
            assumptions: Vec::new(),
            target: None,
        }
    }

    /// Seeds parameter `index` according to `spec`.
    #[must_use]
    pub fn arg(mut self, index: usize, spec: ArgSpec) -> Self {
        if self.args.len() <= index {
            self.args.resize(index + 1, None);
        }
        self.args[index] = Some(spec);
        self
    }

    /// Adds a precondition over the parameter symbols.
    #[must_use]
    pub fn assume(mut self, constraint: SymbolicExpr) -> Self {
        self.assumptions.push(constraint);
        self
    }

    /// Stops at the first path satisfying `target` and reports a witness for it.
    #[must_use]
    pub fn target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    /// Entry function name.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    fn spec(&self, index: usize) -> ArgSpec {
        self.args.get(index).cloned().flatten().unwrap_or_default()
    }
}

/// Runs queries against a linked project.
pub struct Explorer<'p> {
    project: &'p Project,
    config: ExplorationConfig,
    solver: Arc<dyn Solver>,
    cancellation: CancellationToken,
}

impl<'p> Explorer<'p> {
    /// Creates an explorer.
    ///
    /// # Arguments
    ///
    /// * `project` - The linked program
    /// * `config` - Bounds, policies and hooks
    /// * `solver` - Backend deciding path feasibility
    #[must_use]
    pub fn new(project: &'p Project, config: ExplorationConfig, solver: Arc<dyn Solver>) -> Self {
        Explorer {
            project,
            config,
            solver,
            cancellation: CancellationToken::new(),
        }
    }

    /// Creates an explorer with `config` and a [`Z3Solver`] behind a cache.
    ///
    /// The solver gets [`ExplorationConfig::solver_timeout`] as its per-query limit.
    #[must_use]
    pub fn with_config(project: &'p Project, config: ExplorationConfig) -> Self {
        let backend = match config.solver_timeout {
            Some(timeout) => Z3Solver::new().with_timeout(timeout),
            None => Z3Solver::new(),
        };
        Self::new(project, config, Arc::new(CachingSolver::new(backend)))
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// A handle that cancels this explorer's runs.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// The explored project.
    #[must_use]
    pub fn project(&self) -> &'p Project {
        self.project
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ExplorationConfig {
        &self.config
    }

    /// The solver backend.
    #[must_use]
    pub fn solver(&self) -> &dyn Solver {
        self.solver.as_ref()
    }

    /// Explores every path of the query's entry function.
    ///
    /// Stopping early is not an error: the report's [`Report::completion`] tells whether the
    /// run was complete, cancelled, timed out or stopped at its target.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownFunction`] if the entry function is not defined
    /// - [`Error::Unsupported`] if a parameter cannot be seeded as requested
    /// - Malformed IR, unresolved externals and hook failures met on any path
    pub fn explore(&self, query: &Query) -> Result<Report> {
        let started = Instant::now();
        let (function, body) = self.project.defined(query.function())?;
        let body = Arc::clone(body);
        info!(
            function = %body.name,
            order = %self.config.order,
            parallel = self.config.parallel,
            "exploration started"
        );

        let (initial, inputs) = self.initial_state(query, function, body)?;
        let run = Run {
            explorer: self,
            ctx: StepContext {
                project: self.project,
                config: &self.config,
            },
            target: query.target,
            stats: Stats::default(),
            records: Mutex::new(Vec::new()),
            witness: Mutex::new(None),
            found: AtomicBool::new(false),
            abandoned: AtomicU64::new(0),
            failure: Mutex::new(None),
            deadline: self.config.timeout.map(|timeout| started + timeout),
        };
        if let Some(initial) = run.admit(Successor::Active(initial)) {
            if self.config.parallel {
                run.run_parallel(initial)?;
            } else {
                run.run_sequential(initial)?;
            }
        }

        let report = run.finish(query.function(), inputs, started);
        if matches!(
            report.completion,
            Completion::Cancelled | Completion::TimedOut
        ) {
            warn!(
                function = %report.function,
                completion = %report.completion,
                abandoned = report.abandoned,
                "exploration stopped early"
            );
        }
        info!(
            function = %report.function,
            completion = %report.completion,
            records = report.records.len(),
            states = report.stats.states,
            pruned = report.stats.pruned,
            elapsed_ms = report.stats.elapsed.as_millis() as u64,
            "exploration finished"
        );
        Ok(report)
    }

    fn initial_state(
        &self,
        query: &Query,
        function: FunctionId,
        body: Arc<Function>,
    ) -> Result<(ExecutionState, Vec<Input>)> {
        if query.args.len() > body.params.len() {
            return Err(Error::Unsupported(format!(
                "query seeds argument {} but {} takes {}",
                query.args.len() - 1,
                body.name,
                body.params.len()
            )));
        }
        let image = self.project.image();
        let mut state = ExecutionState::new(image.memory.clone(), image.symbols.clone());
        state
            .memory
            .set_max_symbolic_span(self.config.max_symbolic_span);
        for watch in &self.config.watchpoints {
            let global = self
                .project
                .global(&watch.global)
                .ok_or_else(|| Error::UnknownGlobal(watch.global.clone()))?;
            let watchpoint = Watchpoint::new(global.object, watch.offset, watch.bytes)?;
            debug!(name = %watch.name, global = %watch.global, "watchpoint installed");
            state
                .memory
                .watchpoints_mut()
                .add(watch.name.as_str(), watchpoint);
        }

        let mut args = Vec::with_capacity(body.params.len());
        let mut inputs = Vec::with_capacity(body.params.len());
        for (index, param) in body.params.iter().enumerate() {
            let name = if param.name.is_empty() {
                format!("arg{index}")
            } else {
                param.name.clone()
            };
            let value = self.seed(&mut state, &name, &param.ty, query.spec(index))?;
            inputs.push(Input {
                name,
                ty: param.ty.clone(),
                value: value.clone(),
            });
            args.push(value);
        }
        for constraint in &query.assumptions {
            state.assume(constraint.clone());
        }

        let entry = body.entry();
        state.stack.push(Frame::new(function, body, args, None, None));
        if self.config.record_path {
            state.record_block(function, entry);
        }
        Ok((state, inputs))
    }

    fn seed(&self, state: &mut ExecutionState, name: &str, ty: &Type, spec: ArgSpec) -> Result<Value> {
        match (spec, ty) {
            (ArgSpec::Symbolic, Type::Int { bits, signed }) => {
                Ok(Value::int(SymbolicExpr::symbol(name, *bits), *signed))
            }
            (ArgSpec::Concrete(value), Type::Int { bits, signed }) => {
                Ok(Value::from_u64(value, *bits, *signed))
            }
            (ArgSpec::Range { min, max }, Type::Int { bits, signed }) => {
                let symbol = SymbolicExpr::symbol(name, *bits);
                state.assume(SymbolicExpr::binary(
                    SymbolicOp::GeS,
                    symbol.clone(),
                    SymbolicExpr::from_i64(min, *bits),
                ));
                state.assume(SymbolicExpr::binary(
                    SymbolicOp::LeS,
                    symbol.clone(),
                    SymbolicExpr::from_i64(max, *bits),
                ));
                Ok(Value::int(symbol, *signed))
            }
            (ArgSpec::Symbolic, Type::Ptr) => {
                Ok(Self::buffer(state, name, self.config.default_pointee_size))
            }
            (ArgSpec::Buffer(pointee), Type::Ptr) => Ok(Self::buffer(state, name, pointee.size()?)),
            (ArgSpec::Concrete(0), Type::Ptr) => Ok(Value::null()),
            (ArgSpec::Symbolic, Type::Vector { element, len }) => {
                let bits = element
                    .bits()
                    .ok_or_else(|| Error::MalformedType(format!("vector of {element}")))?;
                Ok(Value::Vector {
                    elements: (0..*len)
                        .map(|lane| SymbolicExpr::symbol(format!("{name}[{lane}]"), bits))
                        .collect(),
                    signed: element.is_signed(),
                })
            }
            (spec, ty) => Err(Error::Unsupported(format!(
                "parameter '{name}' of type {ty} seeded as {spec:?}"
            ))),
        }
    }

    fn buffer(state: &mut ExecutionState, name: &str, size: u64) -> Value {
        let id = state
            .memory
            .allocate(ObjectKind::Argument, name, size, Fill::Uninit);
        Value::Pointer(Pointer::to_object(id))
    }
}

/// Shared bookkeeping of one exploration.
struct Run<'e, 'p> {
    explorer: &'e Explorer<'p>,
    ctx: StepContext<'e>,
    target: Option<Target>,
    stats: Stats,
    records: Mutex<Vec<TerminalRecord>>,
    witness: Mutex<Option<Witness>>,
    found: AtomicBool,
    abandoned: AtomicU64,
    failure: Mutex<Option<Error>>,
    deadline: Option<Instant>,
}

impl Run<'_, '_> {
    fn interrupted(&self) -> bool {
        self.found.load(Ordering::Relaxed)
            || self.explorer.cancellation.is_cancelled()
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn step(&self, state: ExecutionState) -> Result<Vec<Successor>> {
        self.stats.step();
        let successors = interpreter::step(state, &self.ctx)?;
        if successors.len() > 1 {
            self.stats.fork(successors.len() as u64 - 1);
            debug!(successors = successors.len(), "fork");
        }
        Ok(successors)
    }

    fn unknown_is_feasible(&self) -> bool {
        self.explorer.config.unknown_policy == UnknownPolicy::AssumeFeasible
    }

    fn feasible(&self, state: &ExecutionState) -> bool {
        if state.infeasible {
            return false;
        }
        if !state.pending_check {
            return true;
        }
        self.stats.solver_query();
        match self.explorer.solver().check(&state.constraints()) {
            Ok(SatResult::Sat) => true,
            Ok(SatResult::Unsat) => false,
            Ok(SatResult::Unknown) => {
                self.stats.solver_unknown();
                warn!(state = state.id, "solver could not decide path feasibility");
                self.unknown_is_feasible()
            }
            Err(error) => {
                self.stats.solver_unknown();
                warn!(state = state.id, %error, "solver failed on a feasibility check");
                self.unknown_is_feasible()
            }
        }
    }

    /// Feasibility-checks a successor; returns it if it should keep running.
    fn admit(&self, successor: Successor) -> Option<ExecutionState> {
        match successor {
            Successor::Active(mut state) => {
                if !self.feasible(&state) {
                    self.stats.prune();
                    debug!(state = state.id, "pruned infeasible path");
                    return None;
                }
                state.pending_check = false;
                state.id = self.stats.new_state();
                Some(state)
            }
            Successor::Terminal { state, outcome } => {
                if !self.feasible(&state) {
                    self.stats.prune();
                    debug!(state = state.id, %outcome, "pruned infeasible terminal");
                    return None;
                }
                self.stats.terminal();
                debug!(state = state.id, %outcome, steps = state.steps, "path terminated");
                let record = state.into_record(outcome);
                self.check_target(&record);
                lock!(self.records).push(record);
                None
            }
        }
    }

    fn check_target(&self, record: &TerminalRecord) {
        let Some(Target::Returns(expected)) = self.target else {
            return;
        };
        let Some(Value::Int { expr, .. }) = record.return_value() else {
            return;
        };
        let mut constraints = record.path_condition.clone();
        constraints.push(expr.equals(&SymbolicExpr::constant(expected, expr.width())));
        self.stats.solver_query();
        match self.explorer.solver().model(&constraints) {
            Ok(Some(model)) => {
                let mut witness = lock!(self.witness);
                if witness.is_none() {
                    info!(value = expected, "target reached");
                    *witness = Some(Witness {
                        record: record.clone(),
                        model,
                    });
                    self.found.store(true, Ordering::Relaxed);
                }
            }
            Ok(None) => {}
            Err(error) => warn!(%error, "solver failed on a target check"),
        }
    }

    fn run_sequential(&self, initial: ExecutionState) -> Result<()> {
        let order = self.explorer.config.order;
        let mut worklist = VecDeque::from([initial]);
        loop {
            if self.interrupted() {
                self.abandoned
                    .fetch_add(worklist.len() as u64, Ordering::Relaxed);
                break;
            }
            let next = match order {
                ExplorationOrder::DepthFirst => worklist.pop_back(),
                ExplorationOrder::BreadthFirst => worklist.pop_front(),
            };
            let Some(state) = next else {
                break;
            };
            let admitted: Vec<ExecutionState> = self
                .step(state)?
                .into_iter()
                .filter_map(|successor| self.admit(successor))
                .collect();
            match order {
                // Reversed so the first successor (the taken branch) is popped next.
                ExplorationOrder::DepthFirst => worklist.extend(admitted.into_iter().rev()),
                ExplorationOrder::BreadthFirst => worklist.extend(admitted),
            }
        }
        Ok(())
    }

    fn run_parallel(&self, initial: ExecutionState) -> Result<()> {
        rayon::scope(|scope| self.spawn(scope, initial));
        match lock!(self.failure).take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn spawn<'s>(&'s self, scope: &rayon::Scope<'s>, state: ExecutionState) {
        scope.spawn(move |scope| self.work(scope, state));
    }

    fn work<'s>(&'s self, scope: &rayon::Scope<'s>, state: ExecutionState) {
        let mut current = Some(state);
        while let Some(state) = current.take() {
            if self.interrupted() || lock!(self.failure).is_some() {
                self.abandoned.fetch_add(1, Ordering::Relaxed);
                return;
            }
            match self.step(state) {
                Ok(successors) => {
                    let mut admitted = successors
                        .into_iter()
                        .filter_map(|successor| self.admit(successor));
                    current = admitted.next();
                    for other in admitted {
                        self.spawn(scope, other);
                    }
                }
                Err(error) => {
                    lock!(self.failure).get_or_insert(error);
                    return;
                }
            }
        }
    }

    fn finish(self, function: &str, inputs: Vec<Input>, started: Instant) -> Report {
        let records = self
            .records
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let witness = self
            .witness
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let abandoned = self.abandoned.load(Ordering::Relaxed);
        let completion = if witness.is_some() {
            Completion::TargetFound
        } else if abandoned == 0 {
            Completion::Complete
        } else if self.explorer.cancellation.is_cancelled() {
            Completion::Cancelled
        } else {
            Completion::TimedOut
        };
        Report {
            function: function.to_string(),
            inputs,
            records,
            witness,
            stats: self.stats.snapshot(started.elapsed()),
            completion,
            abandoned,
        }
    }
}
