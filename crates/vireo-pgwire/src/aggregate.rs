//! Result-set aggregation
//!
//! A generic aggregator applied by the simple-query executor when a SELECT
//! projects aggregate functions. Input values are coerced to `f64`; when a
//! group-by column is set, the first column of each row is the group key
//! and accumulators are kept per key. Finalized rows come out sorted by
//! group key.

use std::collections::BTreeMap;
use vireo_common::{Result, VireoError};

/// Supported aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    /// `COUNT(col)` — counts non-null inputs
    Count,
    /// `COUNT(*)` — counts rows
    CountStar,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateKind {
    /// Match a SQL function name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "COUNT" => Some(AggregateKind::Count),
            "SUM" => Some(AggregateKind::Sum),
            "AVG" => Some(AggregateKind::Avg),
            "MIN" => Some(AggregateKind::Min),
            "MAX" => Some(AggregateKind::Max),
            _ => None,
        }
    }

    /// Result type name for the RowDescription field.
    pub fn result_type(&self) -> &'static str {
        match self {
            AggregateKind::Count | AggregateKind::CountStar => "int8",
            _ => "float8",
        }
    }
}

/// One accumulator: reset / accumulate / finalize hooks driven by kind
#[derive(Debug, Clone)]
struct Accumulator {
    kind: AggregateKind,
    sum: f64,
    count: u64,
    min: f64,
    max: f64,
}

impl Accumulator {
    fn new(kind: AggregateKind) -> Self {
        let mut acc = Self {
            kind,
            sum: 0.0,
            count: 0,
            min: 0.0,
            max: 0.0,
        };
        acc.reset();
        acc
    }

    fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
        self.min = f64::INFINITY;
        self.max = f64::NEG_INFINITY;
    }

    fn accumulate(&mut self, value: Option<f64>) {
        match (self.kind, value) {
            (AggregateKind::CountStar, _) => self.count += 1,
            (_, None) => {}
            (_, Some(v)) => {
                self.count += 1;
                self.sum += v;
                if v < self.min {
                    self.min = v;
                }
                if v > self.max {
                    self.max = v;
                }
            }
        }
    }

    fn finalize(&self) -> Option<String> {
        match self.kind {
            AggregateKind::Count | AggregateKind::CountStar => Some(self.count.to_string()),
            AggregateKind::Sum => Some(format_float(self.sum)),
            AggregateKind::Avg => {
                if self.count == 0 {
                    Some("0".to_string())
                } else {
                    Some(format_float(self.sum / self.count as f64))
                }
            }
            AggregateKind::Min => {
                if self.count == 0 {
                    None
                } else {
                    Some(format_float(self.min))
                }
            }
            AggregateKind::Max => {
                if self.count == 0 {
                    None
                } else {
                    Some(format_float(self.max))
                }
            }
        }
    }
}

fn format_float(v: f64) -> String {
    // 6.0 prints as "6", 2.5 as "2.5"
    format!("{}", v)
}

/// Aggregates buffered result rows through per-function accumulators
pub struct Aggregator {
    /// Index of the group-key column; the first column when grouping is
    /// in effect
    group_by: Option<usize>,
    /// Input column index per aggregate function
    column_args: Vec<usize>,
    kinds: Vec<AggregateKind>,
    groups: BTreeMap<Option<String>, Vec<Accumulator>>,
}

impl Aggregator {
    pub fn new(kinds: Vec<AggregateKind>, column_args: Vec<usize>, group_by: Option<usize>) -> Self {
        let mut aggregator = Self {
            group_by,
            column_args,
            kinds,
            groups: BTreeMap::new(),
        };
        aggregator.reset();
        aggregator
    }

    /// Initialize accumulators. Without grouping a single default group
    /// exists so an empty input still finalizes to one row.
    pub fn reset(&mut self) {
        self.groups.clear();
        if self.group_by.is_none() {
            self.groups.insert(None, self.fresh_accumulators());
        }
    }

    fn fresh_accumulators(&self) -> Vec<Accumulator> {
        self.kinds.iter().map(|k| Accumulator::new(*k)).collect()
    }

    /// Feed one input row.
    pub fn aggregate(&mut self, row: &[Option<String>]) -> Result<()> {
        let needed = self
            .column_args
            .iter()
            .chain(self.group_by.iter())
            .copied()
            .max()
            .map(|i| i + 1)
            .unwrap_or(0);
        if row.len() < needed {
            return Err(VireoError::ColumnsNotEqual {
                expected: needed,
                actual: row.len(),
            });
        }

        // NULL group keys collapse into the None bucket
        let key: Option<String> = match self.group_by {
            Some(i) => row[i].clone(),
            None => None,
        };

        let kinds = &self.kinds;
        let accumulators = self
            .groups
            .entry(key)
            .or_insert_with(|| kinds.iter().map(|k| Accumulator::new(*k)).collect());

        for (slot, arg) in self.column_args.iter().enumerate() {
            let value = match &row[*arg] {
                None => None,
                Some(text) => Some(text.parse::<f64>().map_err(|_| {
                    VireoError::InvalidMessage(format!(
                        "value \"{}\" is not coercible to a number",
                        text
                    ))
                })?),
            };
            accumulators[slot].accumulate(value);
        }
        Ok(())
    }

    /// Produce the aggregated rows, sorted by group key.
    pub fn finalize(&self) -> Vec<Vec<Option<String>>> {
        self.groups
            .iter()
            .map(|(key, accumulators)| {
                let mut row = Vec::with_capacity(accumulators.len() + 1);
                if self.group_by.is_some() {
                    row.push(key.clone());
                }
                row.extend(accumulators.iter().map(|a| a.finalize()));
                row
            })
            .collect()
    }
}
