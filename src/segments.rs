//! Per-table engine configuration: which rows form each segment, and under
//! which prefix its features are published.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::frame::{Column, ColumnKind, Frame, FrameError};
use crate::recipes::{
    bureau_balance_recipe, bureau_recipe, credit_card_balance_recipe, cross_sell_recipe,
    installments_recipe, pos_balance_recipe, previous_application_recipe, Recipe,
};

pub const ENTITY_KEY: &str = "SK_ID_CURR";
pub const BUREAU_KEY: &str = "SK_ID_BUREAU";

const BUREAU_STATUSES: [(&str, &str); 2] = [("active", "Active"), ("closed", "Closed")];
const BUREAU_CREDIT_TYPES: [(&str, Option<&str>); 6] = [
    ("all", None),
    ("consumer_credit", Some("Consumer credit")),
    ("credit_card", Some("Credit card")),
    ("car_loan", Some("Car loan")),
    ("mortgage", Some("Mortgage")),
    ("microloan", Some("Microloan")),
];

const CONTRACT_STATUSES: [(&str, &str); 2] = [("approved", "Approved"), ("refused", "Refused")];
const CROSS_SELL_WINDOWS: [(&str, Option<f64>); 3] =
    [("30", Some(30.0)), ("360", Some(360.0)), ("all", None)];

const INSTALMENT_WINDOWS: [(&str, Option<f64>); 5] = [
    ("all", None),
    ("720", Some(720.0)),
    ("360", Some(360.0)),
    ("90", Some(90.0)),
    ("30", Some(30.0)),
];
const INSTALMENT_VERSIONS: [(&str, Option<(CompareOp, f64)>); 6] = [
    ("all", None),
    ("0", Some((CompareOp::Eq, 0.0))),
    ("1", Some((CompareOp::Eq, 1.0))),
    ("2andmore", Some((CompareOp::Ge, 2.0))),
    ("first_2", Some((CompareOp::Lt, 3.0))),
    ("first_5", Some((CompareOp::Lt, 6.0))),
];

const FIRST_INSTALMENTS: [u32; 3] = [1, 5, 12];
const RECENT_MONTHS: [u32; 3] = [1, 6, 12];
/// Bureau balance `recent_N` windows also keep the snapshot `N` months back:
/// `(N, lookback)` selects `MONTHS_BALANCE > -lookback`.
const BUREAU_BALANCE_WINDOWS: [(u32, f64); 3] = [(1, 1.0), (6, 7.0), (12, 13.0)];

/// The six transactional sources the engine knows how to aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableKind {
    Bureau,
    BureauBalance,
    PreviousApplication,
    Installments,
    PosBalance,
    CreditCardBalance,
}

impl TableKind {
    pub const ALL: [TableKind; 6] = [
        TableKind::Bureau,
        TableKind::BureauBalance,
        TableKind::PreviousApplication,
        TableKind::Installments,
        TableKind::PosBalance,
        TableKind::CreditCardBalance,
    ];

    /// Name used as the first component of every feature prefix.
    pub fn dataset_name(self) -> &'static str {
        match self {
            Self::Bureau => "bureau",
            Self::BureauBalance => "buro_bal",
            Self::PreviousApplication => "previous_app",
            Self::Installments => "installments_payments",
            Self::PosBalance => "pos_bal",
            Self::CreditCardBalance => "cc_bal",
        }
    }

    pub fn from_dataset_name(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.dataset_name() == normalized)
    }

    /// Input file name without extension.
    pub fn file_stem(self) -> &'static str {
        match self {
            Self::Bureau => "bureau",
            Self::BureauBalance => "bureau_balance",
            Self::PreviousApplication => "previous_application",
            Self::Installments => "installments_payments",
            Self::PosBalance => "POS_CASH_balance",
            Self::CreditCardBalance => "credit_card_balance",
        }
    }

    pub fn entity_source(self) -> EntitySource {
        match self {
            Self::BureauBalance => EntitySource::Bridged { sub_key: BUREAU_KEY },
            _ => EntitySource::Direct {
                entity_key: ENTITY_KEY,
            },
        }
    }

    /// Bureau balance is read in full; it is already thinned through the
    /// bridge built from the sampled bureau table.
    pub fn is_sampled(self) -> bool {
        !matches!(self, Self::BureauBalance)
    }

    /// Stable position of the table, used to derive per-table sampling seeds.
    pub fn ordinal(self) -> u64 {
        match self {
            Self::Bureau => 1,
            Self::BureauBalance => 2,
            Self::PreviousApplication => 3,
            Self::Installments => 4,
            Self::PosBalance => 5,
            Self::CreditCardBalance => 6,
        }
    }

    pub fn spec(self) -> TableSpec {
        TableSpec {
            kind: self,
            dataset_name: self.dataset_name(),
            file_stem: self.file_stem(),
            entity_source: self.entity_source(),
            segments: enumerate_segments(self),
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dataset_name())
    }
}

/// How a table's rows are tied to the entity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntitySource {
    Direct { entity_key: &'static str },
    /// Rows carry a sub-entity key that the foreign-key bridge resolves first.
    Bridged { sub_key: &'static str },
}

#[derive(Debug, Clone)]
pub struct TableSpec {
    pub kind: TableKind,
    pub dataset_name: &'static str,
    pub file_stem: &'static str,
    pub entity_source: EntitySource,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Row filter of a segment. A missing cell never satisfies a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All,
    TextEquals { column: String, value: String },
    Compare {
        column: String,
        op: CompareOp,
        value: f64,
    },
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn text_equals(column: &str, value: &str) -> Self {
        Self::TextEquals {
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    pub fn compare(column: &str, op: CompareOp, value: f64) -> Self {
        Self::Compare {
            column: column.to_string(),
            op,
            value,
        }
    }

    /// Conjunction that collapses to `All` or to its single member.
    pub fn all_of(parts: Vec<Predicate>) -> Self {
        let mut parts: Vec<Predicate> = parts
            .into_iter()
            .filter(|p| !matches!(p, Predicate::All))
            .collect();
        match parts.len() {
            0 => Self::All,
            1 => parts.remove(0),
            _ => Self::And(parts),
        }
    }

    /// Columns the predicate reads.
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Self::All => Vec::new(),
            Self::TextEquals { column, .. } | Self::Compare { column, .. } => {
                vec![column.as_str()]
            }
            Self::And(parts) => parts.iter().flat_map(Predicate::columns).collect(),
        }
    }

    /// Indices of the rows of `frame` that satisfy the predicate, ascending.
    pub fn select(&self, frame: &Frame) -> Result<Vec<usize>, FrameError> {
        let mut keep = vec![true; frame.len()];
        self.restrict(frame, &mut keep)?;
        Ok(keep
            .iter()
            .enumerate()
            .filter_map(|(row, &kept)| kept.then_some(row))
            .collect())
    }

    fn restrict(&self, frame: &Frame, keep: &mut [bool]) -> Result<(), FrameError> {
        match self {
            Self::All => {}
            Self::TextEquals { column, value } => match frame.column(column)? {
                Column::Text(values) => {
                    for (kept, cell) in keep.iter_mut().zip(values) {
                        *kept &= cell.as_deref() == Some(value.as_str());
                    }
                }
                other if other.all_missing() => keep.fill(false),
                other => return Err(kind_mismatch(column, ColumnKind::Text, other)),
            },
            Self::Compare { column, op, value } => match frame.column(column)? {
                Column::Numeric(values) => {
                    for (kept, cell) in keep.iter_mut().zip(values) {
                        *kept &= cell.is_some_and(|v| op.holds(v, *value));
                    }
                }
                other if other.all_missing() => keep.fill(false),
                other => return Err(kind_mismatch(column, ColumnKind::Numeric, other)),
            },
            Self::And(parts) => {
                for part in parts {
                    part.restrict(frame, keep)?;
                }
            }
        }
        Ok(())
    }
}

fn kind_mismatch(column: &str, expected: ColumnKind, found: &Column) -> FrameError {
    FrameError::TypeMismatch {
        column: column.to_string(),
        expected,
        found: found.kind(),
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::TextEquals { column, value } => write!(f, "{column} == \"{value}\""),
            Self::Compare { column, op, value } => write!(f, "{column} {} {value}", op.symbol()),
            Self::And(parts) => {
                for (idx, part) in parts.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(" && ")?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
        }
    }
}

/// One independent aggregation job: a row filter, a unique prefix, a recipe.
#[derive(Debug, Clone)]
pub struct Segment {
    pub prefix: String,
    pub predicate: Predicate,
    pub recipe: Arc<Recipe>,
}

impl Segment {
    fn new(prefix: String, predicate: Predicate, recipe: &Arc<Recipe>) -> Self {
        Self {
            prefix,
            predicate,
            recipe: Arc::clone(recipe),
        }
    }

    /// Columns a worker needs: predicate inputs are not included.
    pub fn recipe_columns(&self) -> Vec<&str> {
        self.recipe.columns().collect()
    }
}

/// Exhaustive segment list of one table, in a fixed enumeration order.
pub fn enumerate_segments(kind: TableKind) -> Vec<Segment> {
    let name = kind.dataset_name();
    match kind {
        TableKind::Bureau => bureau_segments(name),
        TableKind::BureauBalance => bureau_balance_segments(name),
        TableKind::PreviousApplication => previous_application_segments(name),
        TableKind::Installments => installments_segments(name),
        TableKind::PosBalance => pos_balance_segments(name),
        TableKind::CreditCardBalance => {
            recent_month_segments(name, credit_card_balance_recipe())
        }
    }
}

fn bureau_segments(name: &str) -> Vec<Segment> {
    let recipe = Arc::new(bureau_recipe());
    let mut segments = Vec::with_capacity(BUREAU_STATUSES.len() * BUREAU_CREDIT_TYPES.len());
    for (status_label, status) in BUREAU_STATUSES {
        for (type_label, credit_type) in BUREAU_CREDIT_TYPES {
            let mut parts = vec![Predicate::text_equals("CREDIT_ACTIVE", status)];
            if let Some(credit_type) = credit_type {
                parts.push(Predicate::text_equals("CREDIT_TYPE", credit_type));
            }
            segments.push(Segment::new(
                format!("{name}_{status_label}_{type_label}"),
                Predicate::all_of(parts),
                &recipe,
            ));
        }
    }
    segments
}

fn previous_application_segments(name: &str) -> Vec<Segment> {
    let recipe = Arc::new(previous_application_recipe());
    let cross_sell = Arc::new(cross_sell_recipe());
    let mut segments = Vec::new();

    for (label, status) in CONTRACT_STATUSES {
        segments.push(Segment::new(
            format!("{name}_status_{label}"),
            Predicate::text_equals("NAME_CONTRACT_STATUS", status),
            &recipe,
        ));
    }

    for (label, flag) in [("active", 1.0), ("closed", 0.0)] {
        segments.push(Segment::new(
            format!("{name}_{label}"),
            Predicate::compare("active", CompareOp::Eq, flag),
            &recipe,
        ));
    }

    for (label, window) in CROSS_SELL_WINDOWS {
        let predicate = match window {
            Some(days) => Predicate::compare("DAYS_DECISION", CompareOp::Gt, -days),
            None => Predicate::All,
        };
        segments.push(Segment::new(
            format!("{name}_xsell_in_{label}"),
            predicate,
            &cross_sell,
        ));
    }

    segments
}

fn installments_segments(name: &str) -> Vec<Segment> {
    let recipe = Arc::new(installments_recipe());
    let mut segments = Vec::with_capacity(INSTALMENT_WINDOWS.len() * INSTALMENT_VERSIONS.len());
    for (window_label, window) in INSTALMENT_WINDOWS {
        for (version_label, version) in INSTALMENT_VERSIONS {
            let mut parts = Vec::new();
            if let Some(days) = window {
                parts.push(Predicate::compare(
                    "DAYS_INSTALMENT",
                    CompareOp::Gt,
                    -days,
                ));
            }
            if let Some((op, value)) = version {
                parts.push(Predicate::compare("NUM_INSTALMENT_VERSION", op, value));
            }
            segments.push(Segment::new(
                format!("{name}_{window_label}_{version_label}"),
                Predicate::all_of(parts),
                &recipe,
            ));
        }
    }
    segments
}

fn pos_balance_segments(name: &str) -> Vec<Segment> {
    let recipe = Arc::new(pos_balance_recipe());
    let mut segments = vec![Segment::new(format!("{name}_all"), Predicate::All, &recipe)];
    for n in FIRST_INSTALMENTS {
        segments.push(Segment::new(
            format!("{name}_first_{n}"),
            Predicate::compare("no_inst", CompareOp::Lt, f64::from(n)),
            &recipe,
        ));
    }
    segments.extend(recent_months(name, &recipe));
    segments
}

fn bureau_balance_segments(name: &str) -> Vec<Segment> {
    let recipe = Arc::new(bureau_balance_recipe());
    let mut segments = vec![Segment::new(format!("{name}_all"), Predicate::All, &recipe)];
    for (n, lookback) in BUREAU_BALANCE_WINDOWS {
        segments.push(Segment::new(
            format!("{name}_recent_{n}"),
            Predicate::compare("MONTHS_BALANCE", CompareOp::Gt, -lookback),
            &recipe,
        ));
    }
    segments
}

fn recent_month_segments(name: &str, recipe: Recipe) -> Vec<Segment> {
    let recipe = Arc::new(recipe);
    let mut segments = vec![Segment::new(format!("{name}_all"), Predicate::All, &recipe)];
    segments.extend(recent_months(name, &recipe));
    segments
}

fn recent_months<'a>(
    name: &'a str,
    recipe: &'a Arc<Recipe>,
) -> impl Iterator<Item = Segment> + 'a {
    RECENT_MONTHS.into_iter().map(move |n| {
        Segment::new(
            format!("{name}_recent_{n}"),
            Predicate::compare("MONTHS_BALANCE", CompareOp::Gt, -f64::from(n)),
            recipe,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::NameRegistry;
    use std::collections::HashSet;

    fn prefixes(kind: TableKind) -> Vec<String> {
        enumerate_segments(kind)
            .into_iter()
            .map(|s| s.prefix)
            .collect()
    }

    #[test]
    fn segment_counts_per_table() {
        assert_eq!(enumerate_segments(TableKind::Bureau).len(), 12);
        assert_eq!(enumerate_segments(TableKind::PreviousApplication).len(), 7);
        assert_eq!(enumerate_segments(TableKind::Installments).len(), 30);
        assert_eq!(enumerate_segments(TableKind::PosBalance).len(), 7);
        assert_eq!(enumerate_segments(TableKind::CreditCardBalance).len(), 4);
        assert_eq!(enumerate_segments(TableKind::BureauBalance).len(), 4);
    }

    #[test]
    fn bureau_prefixes_cross_status_and_type() {
        let prefixes = prefixes(TableKind::Bureau);
        assert_eq!(prefixes[0], "bureau_active_all");
        assert_eq!(prefixes[1], "bureau_active_consumer_credit");
        assert_eq!(prefixes[6], "bureau_closed_all");
        assert_eq!(prefixes[11], "bureau_closed_microloan");
    }

    #[test]
    fn installments_prefixes_cover_window_version_grid() {
        let prefixes = prefixes(TableKind::Installments);
        assert_eq!(prefixes[0], "installments_payments_all_all");
        assert!(prefixes.contains(&"installments_payments_90_2andmore".to_string()));
        assert_eq!(prefixes[29], "installments_payments_30_first_5");
    }

    #[test]
    fn previous_application_cross_sell_uses_its_own_recipe() {
        let segments = enumerate_segments(TableKind::PreviousApplication);
        let xsell: Vec<&Segment> = segments
            .iter()
            .filter(|s| s.prefix.contains("_xsell_in_"))
            .collect();
        assert_eq!(xsell.len(), 3);
        for segment in xsell {
            assert_eq!(segment.recipe_columns(), vec!["is_x_sell"]);
        }
    }

    #[test]
    fn flat_names_are_unique_across_a_full_run() {
        let mut registry = NameRegistry::default();
        let mut expected = 0;
        for kind in TableKind::ALL {
            for segment in enumerate_segments(kind) {
                for name in segment.recipe.output_names(&segment.prefix) {
                    let owner = segment.prefix.clone();
                    registry.register(&name, || owner).unwrap();
                    expected += 1;
                }
            }
        }
        assert_eq!(registry.len(), expected);
    }

    #[test]
    fn prefixes_are_unique_and_carry_dataset_name() {
        let mut seen = HashSet::new();
        for kind in TableKind::ALL {
            for prefix in prefixes(kind) {
                assert!(prefix.starts_with(kind.dataset_name()));
                assert!(seen.insert(prefix));
            }
        }
    }

    #[test]
    fn dataset_names_round_trip() {
        for kind in TableKind::ALL {
            assert_eq!(TableKind::from_dataset_name(kind.dataset_name()), Some(kind));
        }
        assert_eq!(TableKind::from_dataset_name(" CC_BAL "), Some(TableKind::CreditCardBalance));
        assert_eq!(TableKind::from_dataset_name("loans"), None);
    }

    #[test]
    fn predicate_select_skips_missing_cells() {
        let frame = Frame::from_columns([
            (
                "status".to_string(),
                Column::Text(vec![
                    Some("Active".to_string()),
                    None,
                    Some("Closed".to_string()),
                    Some("Active".to_string()),
                ]),
            ),
            (
                "days".to_string(),
                Column::Numeric(vec![Some(-10.0), Some(-5.0), None, Some(-400.0)]),
            ),
        ])
        .unwrap();

        let predicate = Predicate::all_of(vec![
            Predicate::text_equals("status", "Active"),
            Predicate::compare("days", CompareOp::Gt, -30.0),
        ]);
        assert_eq!(predicate.select(&frame).unwrap(), vec![0]);
        assert_eq!(Predicate::All.select(&frame).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(predicate.to_string(), "status == \"Active\" && days > -30");
    }

    #[test]
    fn predicate_on_wrong_column_kind_fails() {
        let frame = Frame::from_columns([(
            "days".to_string(),
            Column::Numeric(vec![Some(1.0)]),
        )])
        .unwrap();
        assert!(matches!(
            Predicate::text_equals("days", "x").select(&frame).unwrap_err(),
            FrameError::TypeMismatch { .. }
        ));
        assert!(matches!(
            Predicate::compare("nope", CompareOp::Eq, 1.0)
                .select(&frame)
                .unwrap_err(),
            FrameError::UnknownColumn(_)
        ));
    }

    fn months_frame(months: &[f64]) -> Frame {
        Frame::from_columns([(
            "MONTHS_BALANCE".to_string(),
            Column::Numeric(months.iter().map(|&m| Some(m)).collect()),
        )])
        .unwrap()
    }

    fn selected_by_prefix(kind: TableKind, frame: &Frame) -> Vec<(String, Vec<usize>)> {
        enumerate_segments(kind)
            .into_iter()
            .map(|s| (s.prefix.clone(), s.predicate.select(frame).unwrap()))
            .collect()
    }

    #[test]
    fn bureau_balance_windows_include_the_oldest_month() {
        let frame = months_frame(&[0.0, -1.0, -6.0, -7.0, -12.0, -13.0]);
        assert_eq!(
            selected_by_prefix(TableKind::BureauBalance, &frame),
            vec![
                ("buro_bal_all".to_string(), vec![0, 1, 2, 3, 4, 5]),
                ("buro_bal_recent_1".to_string(), vec![0]),
                ("buro_bal_recent_6".to_string(), vec![0, 1, 2]),
                ("buro_bal_recent_12".to_string(), vec![0, 1, 2, 3, 4]),
            ]
        );
    }

    #[test]
    fn card_balance_windows_are_strict() {
        let frame = months_frame(&[0.0, -1.0, -6.0, -11.0, -12.0]);
        assert_eq!(
            selected_by_prefix(TableKind::CreditCardBalance, &frame),
            vec![
                ("cc_bal_all".to_string(), vec![0, 1, 2, 3, 4]),
                ("cc_bal_recent_1".to_string(), vec![0]),
                ("cc_bal_recent_6".to_string(), vec![0, 1]),
                ("cc_bal_recent_12".to_string(), vec![0, 1, 2, 3]),
            ]
        );
    }

    #[test]
    fn bridged_table_is_bureau_balance_only() {
        for kind in TableKind::ALL {
            let bridged = matches!(kind.entity_source(), EntitySource::Bridged { .. });
            assert_eq!(bridged, kind == TableKind::BureauBalance);
            assert_eq!(kind.is_sampled(), !bridged);
        }
    }
}
