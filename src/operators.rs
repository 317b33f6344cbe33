//! Statistical operators applied to one entity group of one column.
//!
//! Every operator is total: an empty or all-missing group yields a defined
//! value (a sentinel or a missing cell), never an error. The only error is
//! asking a numeric-only operator to reduce a text column.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

use crate::frame::ColumnKind;

/// `dispersion` of a group with no non-missing value.
pub const DISPERSION_EMPTY: f64 = 0.0;
/// `share_na` of a group with no rows.
pub const SHARE_NA_EMPTY: f64 = 0.0;

pub const DISPERSION: Operator = Operator::Custom(CustomOperator {
    name: "dispersion",
    numeric: dispersion,
    text: None,
});

pub const SHARE_NA: Operator = Operator::Custom(CustomOperator {
    name: "share_na",
    numeric: share_na,
    text: Some(share_na_text),
});

const BUILTIN_OPERATORS: [Operator; 6] = [
    Operator::Sum,
    Operator::Mean,
    Operator::Max,
    Operator::Min,
    Operator::Count,
    Operator::DistinctCount,
];

const CUSTOM_OPERATORS: [Operator; 2] = [DISPERSION, SHARE_NA];

/// Values of one column restricted to one entity group.
#[derive(Debug, Clone, Copy)]
pub enum GroupValues<'a> {
    Numeric(&'a [Option<f64>]),
    Text(&'a [Option<&'a str>]),
}

impl GroupValues<'_> {
    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::Numeric(_) => ColumnKind::Numeric,
            Self::Text(_) => ColumnKind::Text,
        }
    }
}

/// A named reduction registered outside the built-in set.
#[derive(Clone, Copy)]
pub struct CustomOperator {
    pub name: &'static str,
    pub numeric: fn(&[Option<f64>]) -> Option<f64>,
    pub text: Option<fn(&[Option<&str>]) -> Option<f64>>,
}

impl fmt::Debug for CustomOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomOperator")
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Operator {
    Sum,
    Mean,
    Max,
    Min,
    Count,
    DistinctCount,
    Custom(CustomOperator),
}

impl PartialEq for Operator {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for Operator {}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OperatorError {
    #[error("operator '{operator}' cannot reduce a {kind:?} column")]
    Unsupported {
        operator: &'static str,
        kind: ColumnKind,
    },
}

impl Operator {
    /// Readable name used as the last component of flat feature names.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Max => "max",
            Self::Min => "min",
            Self::Count => "count",
            Self::DistinctCount => "nunique",
            Self::Custom(custom) => custom.name,
        }
    }

    /// Resolves a registered operator (built-in or custom) by name.
    pub fn from_name(name: &str) -> Option<Self> {
        BUILTIN_OPERATORS
            .iter()
            .chain(CUSTOM_OPERATORS.iter())
            .find(|op| op.name() == name)
            .copied()
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }

    pub fn apply(&self, group: GroupValues<'_>) -> Result<Option<f64>, OperatorError> {
        match (self, group) {
            (Self::Sum, GroupValues::Numeric(values)) => Ok(Some(present(values).sum())),
            (Self::Mean, GroupValues::Numeric(values)) => Ok(mean(values)),
            (Self::Max, GroupValues::Numeric(values)) => {
                Ok(present(values).reduce(f64::max))
            }
            (Self::Min, GroupValues::Numeric(values)) => {
                Ok(present(values).reduce(f64::min))
            }
            (Self::Count, GroupValues::Numeric(values)) => Ok(Some(present(values).count() as f64)),
            (Self::Count, GroupValues::Text(values)) => {
                Ok(Some(values.iter().flatten().count() as f64))
            }
            (Self::DistinctCount, GroupValues::Numeric(values)) => {
                let distinct: HashSet<u64> = present(values).map(normalized_bits).collect();
                Ok(Some(distinct.len() as f64))
            }
            (Self::DistinctCount, GroupValues::Text(values)) => {
                let distinct: HashSet<&str> = values.iter().flatten().copied().collect();
                Ok(Some(distinct.len() as f64))
            }
            (Self::Custom(custom), GroupValues::Numeric(values)) => Ok((custom.numeric)(values)),
            (Self::Custom(custom), GroupValues::Text(values)) => match custom.text {
                Some(text) => Ok(text(values)),
                None => Err(self.unsupported(group)),
            },
            (Self::Sum | Self::Mean | Self::Max | Self::Min, GroupValues::Text(_)) => {
                Err(self.unsupported(group))
            }
        }
    }

    fn unsupported(&self, group: GroupValues<'_>) -> OperatorError {
        OperatorError::Unsupported {
            operator: self.name(),
            kind: group.kind(),
        }
    }
}

/// `max - min` over non-missing values, [`DISPERSION_EMPTY`] when there are none.
pub fn dispersion(values: &[Option<f64>]) -> Option<f64> {
    let mut iter = present(values);
    let Some(first) = iter.next() else {
        return Some(DISPERSION_EMPTY);
    };
    let (lo, hi) = iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
    Some(hi - lo)
}

/// Fraction of missing entries, [`SHARE_NA_EMPTY`] for an empty group.
pub fn share_na(values: &[Option<f64>]) -> Option<f64> {
    Some(missing_share(values.iter().filter(|v| v.is_none()).count(), values.len()))
}

fn share_na_text(values: &[Option<&str>]) -> Option<f64> {
    Some(missing_share(values.iter().filter(|v| v.is_none()).count(), values.len()))
}

fn missing_share(missing: usize, total: usize) -> f64 {
    if total == 0 {
        SHARE_NA_EMPTY
    } else {
        missing as f64 / total as f64
    }
}

fn present(values: &[Option<f64>]) -> impl Iterator<Item = f64> + '_ {
    values.iter().flatten().copied().filter(|v| !v.is_nan())
}

fn mean(values: &[Option<f64>]) -> Option<f64> {
    let (sum, count) = present(values).fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

fn normalized_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}
