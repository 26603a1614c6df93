// monitor.rs — Per-tick recording of one state variable
//
// A monitor keeps one row per tick (the whole array of the watched variable)
// together with the tick time. Rows are only ever appended; `flatten` reads
// them back in recording order.

use crate::id::GroupId;

#[derive(Debug, Clone, PartialEq)]
pub struct StateMonitor {
    group: GroupId,
    variable: String,
    times: Vec<f64>,
    rows: Vec<Vec<f64>>,
}

impl StateMonitor {
    pub fn new(group: GroupId, variable: impl Into<String>) -> Self {
        StateMonitor {
            group,
            variable: variable.into(),
            times: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Append one row recorded at time `t`.
    pub fn record(&mut self, t: f64, values: &[f64]) {
        self.times.push(t);
        self.rows.push(values.to_vec());
    }

    /// Every recorded value, row after row.
    pub fn flatten(&self) -> Vec<f64> {
        self.rows.iter().flatten().copied().collect()
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Number of recorded rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.times.clear();
        self.rows.clear();
    }
}
