//! Features of the main applicant table.
//!
//! Ratio features, an implied interest-rate curve per applicant, and
//! per-partition frequency counts of categorical attributes. Count failures
//! are logged and skipped column by column; every other failure is fatal.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::frame::{Column, ColumnKind, EntityId, Frame, FrameError};
use crate::numeric::{divide, light_divide, median};
use crate::segments::ENTITY_KEY;

pub const TARGET: &str = "TARGET";

/// Rates at or below this level are not plausible consumer-credit interest.
pub const INTEREST_THRESHOLD: f64 = 0.085;
/// Rate reported for a term where the curve is undefined.
pub const UNDEFINED_RATE: f64 = -1.0;
pub const INTEREST_TERMS: [u32; 10] = [6, 12, 18, 24, 30, 36, 42, 48, 54, 60];

pub const CATEGORICAL_COLUMNS: [&str; 48] = [
    "NAME_CONTRACT_TYPE",
    "CODE_GENDER",
    "FLAG_OWN_CAR",
    "FLAG_OWN_REALTY",
    "NAME_TYPE_SUITE",
    "NAME_INCOME_TYPE",
    "NAME_EDUCATION_TYPE",
    "NAME_FAMILY_STATUS",
    "NAME_HOUSING_TYPE",
    "FLAG_MOBIL",
    "FLAG_EMP_PHONE",
    "FLAG_WORK_PHONE",
    "FLAG_CONT_MOBILE",
    "FLAG_PHONE",
    "FLAG_EMAIL",
    "OCCUPATION_TYPE",
    "WEEKDAY_APPR_PROCESS_START",
    "REG_REGION_NOT_LIVE_REGION",
    "REG_REGION_NOT_WORK_REGION",
    "LIVE_REGION_NOT_WORK_REGION",
    "REG_CITY_NOT_LIVE_CITY",
    "REG_CITY_NOT_WORK_CITY",
    "LIVE_CITY_NOT_WORK_CITY",
    "ORGANIZATION_TYPE",
    "FLAG_DOCUMENT_2",
    "FONDKAPREMONT_MODE",
    "HOUSETYPE_MODE",
    "WALLSMATERIAL_MODE",
    "EMERGENCYSTATE_MODE",
    "FLAG_DOCUMENT_3",
    "FLAG_DOCUMENT_4",
    "FLAG_DOCUMENT_5",
    "FLAG_DOCUMENT_6",
    "FLAG_DOCUMENT_7",
    "FLAG_DOCUMENT_8",
    "FLAG_DOCUMENT_9",
    "FLAG_DOCUMENT_10",
    "FLAG_DOCUMENT_11",
    "FLAG_DOCUMENT_12",
    "FLAG_DOCUMENT_13",
    "FLAG_DOCUMENT_14",
    "FLAG_DOCUMENT_15",
    "FLAG_DOCUMENT_16",
    "FLAG_DOCUMENT_17",
    "FLAG_DOCUMENT_18",
    "FLAG_DOCUMENT_19",
    "FLAG_DOCUMENT_20",
    "FLAG_DOCUMENT_21",
];

const RATIO_FEATURES: [(&str, &str, &str); 15] = [
    ("loan_to_income", "AMT_CREDIT", "AMT_INCOME_TOTAL"),
    ("loan_to_disp_income", "AMT_CREDIT", DISPOSABLE_INCOME),
    ("loan_to_car", "AMT_CREDIT", "OWN_CAR_AGE"),
    ("loan_to_good", "AMT_CREDIT", "AMT_GOODS_PRICE"),
    ("loan_to_age", "AMT_CREDIT", "DAYS_BIRTH"),
    ("loan_to_score", "AMT_CREDIT", "EXT_SOURCE_1"),
    ("ann_to_income", "AMT_ANNUITY", "AMT_INCOME_TOTAL"),
    ("ann_to_disp_income", "AMT_ANNUITY", DISPOSABLE_INCOME),
    ("ann_to_car", "AMT_ANNUITY", "OWN_CAR_AGE"),
    ("ann_to_good", "AMT_ANNUITY", "AMT_GOODS_PRICE"),
    ("ann_to_age", "AMT_ANNUITY", "DAYS_BIRTH"),
    ("ann_to_score", "AMT_ANNUITY", "EXT_SOURCE_1"),
    ("score1_2", "EXT_SOURCE_1", "EXT_SOURCE_2"),
    ("score1_3", "EXT_SOURCE_1", "EXT_SOURCE_3"),
    ("score2_3", "EXT_SOURCE_2", "EXT_SOURCE_3"),
];

// Pseudo-column: income per family member, computed on the fly.
const DISPOSABLE_INCOME: &str = "<disposable_income>";

const INTEREST_STAT_NAMES: [&str; 6] = [
    "min_int", "max_int", "mean_int", "med_int", "disp_int", "num_int",
];
const TERM_STAT_NAMES: [&str; 5] = ["min_cnt", "max_cnt", "mean_cnt", "median_cnt", "disp_cnt"];

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("training table has no '{TARGET}' column")]
    MissingTarget,
    #[error("main table has no entity id at row {row}")]
    MissingEntityId { row: usize },
}

/// Train and test applicants stacked, train rows first.
#[derive(Debug, Clone)]
pub struct MainTable {
    pub frame: Frame,
    pub entity_ids: Vec<EntityId>,
    /// Outcome label; missing for test rows.
    pub target: Vec<Option<f64>>,
    pub train_rows: usize,
}

impl MainTable {
    pub fn from_parts(mut train: Frame, test: Option<Frame>) -> Result<Self, ApplicationError> {
        let target = match train.remove_column(TARGET) {
            Ok(Column::Numeric(values)) => values,
            Ok(Column::Text(values)) if values.iter().all(Option::is_none) => {
                vec![None; values.len()]
            }
            Ok(other) => {
                return Err(FrameError::TypeMismatch {
                    column: TARGET.to_string(),
                    expected: ColumnKind::Numeric,
                    found: other.kind(),
                }
                .into())
            }
            Err(_) => return Err(ApplicationError::MissingTarget),
        };

        let train_rows = train.len();
        let mut frame = train;
        let mut target = target;
        if let Some(mut test) = test {
            // A labelled test file is treated as unlabelled.
            let _ = test.remove_column(TARGET);
            target.extend(std::iter::repeat(None).take(test.len()));
            frame.append_rows(&test)?;
        }

        let entity_ids = frame
            .entity_key(ENTITY_KEY)?
            .into_iter()
            .enumerate()
            .map(|(row, id)| id.ok_or(ApplicationError::MissingEntityId { row }))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            frame,
            entity_ids,
            target,
            train_rows,
        })
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    pub fn test_rows(&self) -> usize {
        self.len() - self.train_rows
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedColumn {
    pub column: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalCountReport {
    pub counted: usize,
    pub skipped: Vec<SkippedColumn>,
}

/// Runs every main-table feature step in order.
pub fn engineer_main_features(
    main: &mut MainTable,
) -> Result<CategoricalCountReport, ApplicationError> {
    add_ratio_features(&mut main.frame)?;
    let completeness = main.frame.missing_per_row();
    main.frame.set_numeric("app_completeness", completeness)?;
    add_interest_features(&mut main.frame)?;
    let report = add_categorical_counts(&mut main.frame, main.train_rows, &CATEGORICAL_COLUMNS);

    info!(
        component = "application",
        event = "main.features.built",
        rows = main.len(),
        train_rows = main.train_rows,
        columns = main.frame.width(),
        counted = report.counted,
        skipped = report.skipped.len()
    );
    Ok(report)
}

pub fn add_ratio_features(frame: &mut Frame) -> Result<(), FrameError> {
    let income = frame.numeric("AMT_INCOME_TOTAL")?;
    let members = frame.numeric("CNT_FAM_MEMBERS")?;
    let disposable: Vec<Option<f64>> = income
        .iter()
        .zip(members)
        .map(|(&i, &m)| divide(i, m))
        .collect();

    let mut derived = Vec::with_capacity(RATIO_FEATURES.len() + 1);
    for (name, num, den) in RATIO_FEATURES {
        let num = frame.numeric(num)?;
        let den = if den == DISPOSABLE_INCOME {
            disposable.as_slice()
        } else {
            frame.numeric(den)?
        };
        let values: Vec<Option<f64>> = num
            .iter()
            .zip(den)
            .map(|(&n, &d)| light_divide(n, d))
            .collect();
        derived.push((name, values));
    }
    let credit = frame.numeric("AMT_CREDIT")?;
    let annuity = frame.numeric("AMT_ANNUITY")?;
    derived.push((
        "loan_to_ann",
        credit
            .iter()
            .zip(annuity)
            .map(|(&c, &a)| light_divide(c, a))
            .collect(),
    ));

    for (name, values) in derived {
        frame.set_numeric(name, values)?;
    }
    Ok(())
}

/// Annual rate implied by repaying `credit` with `annuity` over each term.
/// Undefined and `-inf` rates are [`UNDEFINED_RATE`].
pub fn interest_curve(credit: Option<f64>, annuity: Option<f64>) -> [f64; 10] {
    let mut rates = [UNDEFINED_RATE; 10];
    let (Some(credit), Some(annuity)) = (credit, annuity) else {
        return rates;
    };
    for (rate, term) in rates.iter_mut().zip(INTEREST_TERMS) {
        let term = f64::from(term);
        let value = ((annuity * term) / credit).powf(12.0 / term) - 1.0;
        // +inf (zero credit) is a rate above any threshold and is kept.
        if !(value.is_nan() || value == f64::NEG_INFINITY) {
            *rate = value;
        }
    }
    rates
}

/// `[min, max, mean, median, dispersion, count]` of plausible rates.
pub fn interest_stats(rates: &[f64]) -> [f64; 6] {
    let plausible: Vec<f64> = rates
        .iter()
        .copied()
        .filter(|r| *r > INTEREST_THRESHOLD)
        .collect();
    let Some(med) = median(&plausible) else {
        return [
            INTEREST_THRESHOLD,
            INTEREST_THRESHOLD,
            INTEREST_THRESHOLD,
            INTEREST_THRESHOLD,
            0.0,
            0.0,
        ];
    };
    let min = plausible.iter().copied().fold(f64::INFINITY, f64::min);
    let max = plausible.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = plausible.iter().sum::<f64>() / plausible.len() as f64;
    [min, max, mean, med, max - min, plausible.len() as f64]
}

/// `[min, max, mean, median, dispersion]` of the terms with a positive rate.
pub fn term_stats(rates: &[f64]) -> [Option<f64>; 5] {
    let terms: Vec<f64> = rates
        .iter()
        .zip(INTEREST_TERMS)
        .filter(|(rate, _)| **rate > 0.0)
        .map(|(_, term)| f64::from(term))
        .collect();
    let Some(med) = median(&terms) else {
        return [None; 5];
    };
    let min = terms.iter().copied().fold(f64::INFINITY, f64::min);
    let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = terms.iter().sum::<f64>() / terms.len() as f64;
    [Some(min), Some(max), Some(mean), Some(med), Some(max - min)]
}

pub fn add_interest_features(frame: &mut Frame) -> Result<(), FrameError> {
    let credit = frame.numeric("AMT_CREDIT")?;
    let annuity = frame.numeric("AMT_ANNUITY")?;
    let curves: Vec<[f64; 10]> = credit
        .iter()
        .zip(annuity)
        .map(|(&c, &a)| interest_curve(c, a))
        .collect();

    let rows = curves.len();
    let mut stats = vec![Vec::with_capacity(rows); INTEREST_STAT_NAMES.len()];
    let mut terms = vec![Vec::with_capacity(rows); TERM_STAT_NAMES.len()];
    for curve in &curves {
        for (column, value) in stats.iter_mut().zip(interest_stats(curve)) {
            // inf - inf dispersion is undefined.
            column.push(Some(value).filter(|v| !v.is_nan()));
        }
        for (column, value) in terms.iter_mut().zip(term_stats(curve)) {
            column.push(value);
        }
    }

    for (name, values) in INTEREST_STAT_NAMES.iter().zip(&stats) {
        frame.set_numeric(*name, values.clone())?;
    }
    for (idx, term) in INTEREST_TERMS.iter().enumerate() {
        frame.set_numeric(
            format!("ir_{term}"),
            curves.iter().map(|curve| Some(curve[idx])).collect(),
        )?;
    }
    for (name, values) in TERM_STAT_NAMES.iter().zip(&terms) {
        frame.set_numeric(*name, values.clone())?;
    }

    let min_cnt = &terms[0];
    for (name, source) in [
        ("int_to_time_min", &stats[0]),
        ("int_to_time_max", &stats[1]),
        ("int_to_time_disp", &stats[4]),
    ] {
        let values = source
            .iter()
            .zip(min_cnt)
            .map(|(&v, &cnt)| divide(v, cnt))
            .collect();
        frame.set_numeric(name, values)?;
    }
    Ok(())
}

/// Adds `<col>_count_train`, `<col>_count_test` and `<col>_count_total` for
/// each column: the frequency of the row's value in that partition.
///
/// A column that cannot be counted is logged, recorded and skipped.
pub fn add_categorical_counts(
    frame: &mut Frame,
    train_rows: usize,
    columns: &[&str],
) -> CategoricalCountReport {
    let mut report = CategoricalCountReport::default();
    for &column in columns {
        match count_column(frame, train_rows, column) {
            Ok(()) => report.counted += 1,
            Err(err) => {
                warn!(
                    component = "application",
                    event = "categorical_count.skipped",
                    column,
                    error = %err
                );
                report.skipped.push(SkippedColumn {
                    column: column.to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }
    report
}

fn count_column(frame: &mut Frame, train_rows: usize, column: &str) -> Result<(), FrameError> {
    let keys = category_keys(frame.column(column)?);
    let split = train_rows.min(keys.len());

    let train = frequencies(&keys[..split]);
    let test = frequencies(&keys[split..]);
    let total = frequencies(&keys);

    for (suffix, counts) in [("train", &train), ("test", &test), ("total", &total)] {
        let values = keys
            .iter()
            .map(|key| {
                key.as_ref()
                    .and_then(|k| counts.get(k.as_str()))
                    .map(|&n| n as f64)
            })
            .collect();
        frame.set_numeric(format!("{column}_count_{suffix}"), values)?;
    }
    Ok(())
}

fn category_keys(column: &Column) -> Vec<Option<String>> {
    match column {
        Column::Text(values) => values.clone(),
        Column::Numeric(values) => values.iter().map(|v| v.map(|n| format!("{n}"))).collect(),
    }
}

fn frequencies(keys: &[Option<String>]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for key in keys.iter().flatten() {
        *counts.entry(key.as_str()).or_insert(0) += 1;
    }
    counts
}
