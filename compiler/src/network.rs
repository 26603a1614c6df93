// network.rs — Groups, monitors, and the tick scheduler
//
// A `Network` owns a clock, the groups (one code object plus its state
// arrays each) and the monitors watching them. `run(duration)` executes
// every group once per tick in registration order, then every monitor, then
// advances the clock.
//
// Preconditions: groups are built from code objects that compiled cleanly.
// Postconditions: after `run` returns `Ok`, every monitor holds one more row
//                 per tick; on `Err`, rows recorded before the failure stay.
// Failure modes: `NetworkError` for bad durations, state access errors, and
//                execution failures (which abort the remaining ticks).
// Side effects: diagnostics go to the configured sink; native groups may
//               build their kernel on the first run.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::clock::{Clock, ClockError};
use crate::codeobject::{Backend, CodeObject, Compiler, Outputs, Snapshot};
use crate::diag::{codes, Diagnostic, DiagnosticSink, NullSink};
use crate::error::{CompileError, ExecError};
use crate::id::{GroupId, IdAllocator, MonitorId};
use crate::monitor::StateMonitor;
use crate::resolve::Constants;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("group `{group}`: {source}")]
    Exec { group: String, source: ExecError },

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error("group `{group}` has no variable `{name}`")]
    UnknownVariable { group: String, name: String },

    #[error("no group with id {0:?}")]
    UnknownGroup(GroupId),

    #[error("`{name}` needs {expected} values, got {found}")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
}

// ── Group ───────────────────────────────────────────────────────────────────

/// A population of `len` elements sharing one compiled equation set.
#[derive(Debug)]
pub struct Group {
    name: String,
    len: usize,
    code: CodeObject,
    state: BTreeMap<String, Vec<f64>>,
    /// State captured when a run starts from step 0; `reset` restores it.
    initial: Option<BTreeMap<String, Vec<f64>>>,
}

impl Group {
    /// Every state variable starts at zero.
    pub fn new(name: impl Into<String>, len: usize, code: CodeObject) -> Self {
        let state = code
            .namespace()
            .variables()
            .iter()
            .map(|v| (v.name.clone(), vec![0.0; len]))
            .collect();
        Group {
            name: name.into(),
            len,
            code,
            state,
            initial: None,
        }
    }

    /// Compile `source` and wrap the result in a group.
    pub fn from_source(
        name: impl Into<String>,
        len: usize,
        compiler: &Compiler<'_>,
        source: &str,
        constants: &Constants,
        backend: Backend,
    ) -> Result<Self, NetworkError> {
        let code = compiler.compile_source(source, constants, backend)?;
        Ok(Group::new(name, len, code))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn code(&self) -> &CodeObject {
        &self.code
    }

    pub fn get(&self, variable: &str) -> Option<&[f64]> {
        self.state.get(variable).map(Vec::as_slice)
    }

    pub fn set(&mut self, variable: &str, values: &[f64]) -> Result<(), NetworkError> {
        let len = self.len;
        let slot = self
            .state
            .get_mut(variable)
            .ok_or_else(|| NetworkError::UnknownVariable {
                group: self.name.clone(),
                name: variable.to_string(),
            })?;
        if values.len() != len {
            return Err(NetworkError::LengthMismatch {
                name: variable.to_string(),
                expected: len,
                found: values.len(),
            });
        }
        slot.copy_from_slice(values);
        Ok(())
    }

    /// Set every element of `variable` to `value`.
    pub fn fill(&mut self, variable: &str, value: f64) -> Result<(), NetworkError> {
        self.set(variable, &vec![value; self.len])
    }

    fn exec_error(&self, source: ExecError) -> NetworkError {
        NetworkError::Exec {
            group: self.name.clone(),
            source,
        }
    }

    /// Run the code object once and write its outputs back into the state.
    /// Returns how many elements of each target turned NaN from valid inputs.
    fn step(&mut self, t: f64, dt: f64) -> Result<Vec<(String, usize)>, NetworkError> {
        let outputs = {
            let snapshot = Snapshot::new(self.len, &self.state).at(t, dt);
            self.code
                .execute(&snapshot)
                .map_err(|e| self.exec_error(e))?
        };
        let invalid = self.invalid_counts(&outputs);
        self.state.extend(outputs);
        Ok(invalid)
    }

    /// Count, per update in declaration order, the elements that are NaN
    /// although every value the update read at that element was not. An
    /// update reads the pre-tick state, except for targets written earlier
    /// in the same tick, which it sees through `outputs`.
    fn invalid_counts(&self, outputs: &Outputs) -> Vec<(String, usize)> {
        let resolved = self.code.resolved();
        let namespace = &resolved.namespace;
        let mut written: BTreeMap<&str, &[f64]> = BTreeMap::new();
        let mut counts = Vec::new();
        let mut slots = Vec::new();

        for update in &resolved.updates {
            let target = namespace.variable(update.target).name.as_str();
            let Some(values) = outputs.get(target) else {
                continue;
            };
            slots.clear();
            update.expr.collect_slots(&mut slots);
            let inputs: Vec<&[f64]> = slots
                .iter()
                .filter_map(|slot| {
                    let name = namespace.variable(*slot).name.as_str();
                    written
                        .get(name)
                        .copied()
                        .or_else(|| self.state.get(name).map(Vec::as_slice))
                })
                .collect();
            let count = values
                .iter()
                .enumerate()
                .filter(|(i, v)| {
                    v.is_nan() && !inputs.iter().any(|col| col.get(*i).is_some_and(|x| x.is_nan()))
                })
                .count();
            if count > 0 {
                counts.push((target.to_string(), count));
            }
            written.insert(target, values.as_slice());
        }
        counts
    }
}

// ── Network ─────────────────────────────────────────────────────────────────

pub struct Network {
    clock: Clock,
    ids: IdAllocator,
    groups: Vec<Group>,
    monitors: Vec<StateMonitor>,
    sink: Arc<dyn DiagnosticSink>,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("clock", &self.clock)
            .field("groups", &self.groups.len())
            .field("monitors", &self.monitors.len())
            .finish_non_exhaustive()
    }
}

impl Network {
    pub fn new(clock: Clock) -> Self {
        Network {
            clock,
            ids: IdAllocator::new(),
            groups: Vec::new(),
            monitors: Vec::new(),
            sink: Arc::new(NullSink),
        }
    }

    /// Route runtime diagnostics (invalid values) to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn t(&self) -> f64 {
        self.clock.t()
    }

    pub fn add_group(&mut self, group: Group) -> GroupId {
        let id = self.ids.alloc_group();
        debug!(group = %group.name, len = group.len, backend = %group.code.backend(), "group added");
        self.groups.push(group);
        id
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(id.index())
    }

    pub fn group_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.get_mut(id.index())
    }

    /// Watch `variable` of `group`, recording it after every tick.
    pub fn add_monitor(
        &mut self,
        group: GroupId,
        variable: &str,
    ) -> Result<MonitorId, NetworkError> {
        let g = self.group(group).ok_or(NetworkError::UnknownGroup(group))?;
        if g.get(variable).is_none() {
            return Err(NetworkError::UnknownVariable {
                group: g.name.clone(),
                name: variable.to_string(),
            });
        }
        let id = self.ids.alloc_monitor();
        self.monitors.push(StateMonitor::new(group, variable));
        Ok(id)
    }

    pub fn monitor(&self, id: MonitorId) -> Option<&StateMonitor> {
        self.monitors.get(id.index())
    }

    pub fn monitors(&self) -> &[StateMonitor] {
        &self.monitors
    }

    /// Advance the simulation until `duration` seconds have elapsed.
    /// Code objects are prepared before the first tick, so a native group
    /// that cannot run fails before any group has stepped. `run(0.0)`
    /// performs no tick and touches no code object.
    pub fn run(&mut self, duration: f64) -> Result<(), NetworkError> {
        let steps = self.clock.steps_for(duration)?;
        if steps > 0 {
            for group in &self.groups {
                group.code.prepare().map_err(|e| group.exec_error(e))?;
            }
        }
        if self.clock.step() == 0 {
            for group in &mut self.groups {
                group.initial = Some(group.state.clone());
            }
        }
        debug!(steps, t = self.clock.t(), dt = self.clock.dt(), "run");
        for _ in 0..steps {
            self.tick()?;
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<(), NetworkError> {
        let t = self.clock.t();
        let dt = self.clock.dt();
        trace!(step = self.clock.step(), t, "tick");

        for group in &mut self.groups {
            for (variable, count) in group.step(t, dt)? {
                self.sink.emit(
                    Diagnostic::warning("invalid value encountered")
                        .with_code(codes::W0100)
                        .with_context("group", &group.name)
                        .with_context("variable", variable)
                        .with_context("t", t)
                        .with_context("count", count),
                );
            }
        }

        for monitor in &mut self.monitors {
            let group = &self.groups[monitor.group().index()];
            if let Some(values) = group.get(monitor.variable()) {
                monitor.record(t, values);
            }
        }

        self.clock.tick();
        Ok(())
    }

    /// Rewind to t = 0: restore the state captured when the first run
    /// started and drop every recorded row.
    pub fn reset(&mut self) {
        self.clock.reset();
        for group in &mut self.groups {
            if let Some(initial) = group.initial.take() {
                group.state = initial;
            }
        }
        for monitor in &mut self.monitors {
            monitor.clear();
        }
    }
}
