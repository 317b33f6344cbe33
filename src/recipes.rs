//! Static aggregation recipes: which operators run over which source column.

use std::collections::HashSet;

use thiserror::Error;

use crate::naming::flat_column_name;
use crate::operators::{Operator, DISPERSION, SHARE_NA};

const STATS: &[Operator] = &[
    Operator::Sum,
    Operator::Mean,
    Operator::Max,
    Operator::Min,
    DISPERSION,
];
const STATS_NA: &[Operator] = &[
    Operator::Sum,
    Operator::Mean,
    Operator::Max,
    Operator::Min,
    DISPERSION,
    SHARE_NA,
];
const COUNT_STATS: &[Operator] = &[
    Operator::Count,
    Operator::Sum,
    Operator::Mean,
    Operator::Max,
    Operator::Min,
    DISPERSION,
];
const COUNT_STATS_NA: &[Operator] = &[
    Operator::Count,
    Operator::Sum,
    Operator::Mean,
    Operator::Max,
    Operator::Min,
    DISPERSION,
    SHARE_NA,
];
const SUM_ONLY: &[Operator] = &[Operator::Sum];
const SUM_MEAN: &[Operator] = &[Operator::Sum, Operator::Mean];
const DISTINCT_NA: &[Operator] = &[Operator::DistinctCount, SHARE_NA];
const SIMPLE: &[Operator] = &[Operator::Sum, Operator::Mean, Operator::Max, Operator::Min];
const COUNT_SIMPLE: &[Operator] = &[
    Operator::Count,
    Operator::Sum,
    Operator::Mean,
    Operator::Max,
    Operator::Min,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeEntry {
    pub column: String,
    pub operators: Vec<Operator>,
}

/// Ordered mapping from source column to the operators applied to it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Recipe {
    entries: Vec<RecipeEntry>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecipeError {
    #[error("recipe is empty")]
    Empty,
    #[error("recipe lists column '{0}' more than once")]
    DuplicateColumn(String),
    #[error("recipe column '{0}' has no operators")]
    NoOperators(String),
    #[error("recipe applies operator '{operator}' to column '{column}' more than once")]
    DuplicateOperator {
        column: String,
        operator: &'static str,
    },
}

impl Recipe {
    pub fn new(entries: Vec<RecipeEntry>) -> Self {
        Self { entries }
    }

    fn from_static(table: &[(&str, &[Operator])]) -> Self {
        Self::new(
            table.iter()
                .map(|(column, operators)| RecipeEntry {
                    column: (*column).to_string(),
                    operators: operators.to_vec(),
                })
                .collect(),
        )
    }

    pub fn entries(&self) -> &[RecipeEntry] {
        &self.entries
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.column.as_str())
    }

    /// Number of output columns one segment produces with this recipe.
    pub fn output_width(&self) -> usize {
        self.entries.iter().map(|e| e.operators.len()).sum()
    }

    /// Ordered (column, operator) header pairs a grouped aggregation produces.
    pub fn headers(&self) -> impl Iterator<Item = (&str, Operator)> {
        self.entries
            .iter()
            .flat_map(|e| e.operators.iter().map(move |op| (e.column.as_str(), *op)))
    }

    pub fn validate(&self) -> Result<(), RecipeError> {
        if self.entries.is_empty() {
            return Err(RecipeError::Empty);
        }

        let mut columns = HashSet::new();
        for entry in &self.entries {
            if !columns.insert(entry.column.as_str()) {
                return Err(RecipeError::DuplicateColumn(entry.column.clone()));
            }
            if entry.operators.is_empty() {
                return Err(RecipeError::NoOperators(entry.column.clone()));
            }
            let mut names = HashSet::new();
            for op in &entry.operators {
                if !names.insert(op.name()) {
                    return Err(RecipeError::DuplicateOperator {
                        column: entry.column.clone(),
                        operator: op.name(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Flat output names for a given segment prefix, in header order.
    pub fn output_names(&self, prefix: &str) -> Vec<String> {
        self.headers()
            .map(|(column, op)| flat_column_name(prefix, column, op.name()))
            .collect()
    }
}

pub fn bureau_recipe() -> Recipe {
    Recipe::from_static(&[
        ("AMT_CREDIT_SUM_DEBT", STATS_NA),
        ("AMT_CREDIT_SUM", STATS_NA),
        ("AMT_CREDIT_SUM_LIMIT", STATS_NA),
        ("AMT_CREDIT_SUM_OVERDUE", STATS_NA),
        ("AMT_CREDIT_MAX_OVERDUE", STATS_NA),
        ("CREDIT_DAY_OVERDUE", STATS_NA),
        ("AMT_ANNUITY", STATS_NA),
        ("CREDIT_CURRENCY", DISTINCT_NA),
        ("SK_ID_BUREAU", COUNT_STATS_NA),
        ("DAYS_CREDIT", STATS_NA),
        ("DAYS_CREDIT_UPDATE", STATS_NA),
        ("DAYS_CREDIT_ENDDATE", STATS_NA),
        ("DAYS_ENDDATE_FACT", STATS_NA),
        ("CNT_CREDIT_PROLONG", STATS_NA),
        ("credit_duration", STATS_NA),
        ("credit_advance", STATS_NA),
        ("AMT_CREDIT_SUM_DEBT_to_credit", STATS_NA),
        ("AMT_CREDIT_MAX_OVERDUE_to_credit", STATS_NA),
        ("missing_info", STATS_NA),
        ("AMT_CREDIT_SUM_OVERDUE_to_credit", STATS_NA),
        ("AMT_CREDIT_SUM_LIMIT_to_credit", STATS_NA),
        ("repaid_to_credit", STATS_NA),
        ("interest", STATS_NA),
        ("princ_to_repay_per_month", SUM_ONLY),
        ("amt_repaid", SUM_ONLY),
    ])
}

pub fn previous_application_recipe() -> Recipe {
    Recipe::from_static(&[
        ("AMT_ANNUITY", STATS_NA),
        ("AMT_APPLICATION", STATS_NA),
        ("AMT_CREDIT", STATS_NA),
        ("AMT_DOWN_PAYMENT", STATS_NA),
        ("AMT_GOODS_PRICE", STATS_NA),
        ("HOUR_APPR_PROCESS_START", STATS_NA),
        ("DAYS_DECISION", STATS_NA),
        ("CNT_PAYMENT", STATS_NA),
        ("NFLAG_INSURED_ON_APPROVAL", STATS_NA),
        ("DAYS_FIRST_DRAWING", STATS_NA),
        ("DAYS_FIRST_DUE", STATS_NA),
        ("DAYS_LAST_DUE_1ST_VERSION", STATS_NA),
        ("DAYS_LAST_DUE", STATS_NA),
        ("DAYS_TERMINATION", STATS_NA),
        ("RATE_DOWN_PAYMENT", STATS_NA),
        ("RATE_INTEREST_PRIMARY", STATS_NA),
        ("RATE_INTEREST_PRIVILEGED", STATS_NA),
        ("active", SUM_MEAN),
        ("credit_to_app", STATS_NA),
        ("credit_to_good", STATS_NA),
        ("annuity_to_good", STATS_NA),
        ("annuity_to_credit", STATS_NA),
        ("down_to_good", STATS_NA),
        ("missing_info", STATS_NA),
        ("days_diff_last_first", STATS_NA),
        ("credit_duration", STATS_NA),
        ("credit_duration2", STATS_NA),
        ("days_diff_last_last", STATS_NA),
    ])
}

/// Recipe of the previous-application cross-sell lookback segments.
pub fn cross_sell_recipe() -> Recipe {
    Recipe::from_static(&[("is_x_sell", SUM_ONLY)])
}

pub fn installments_recipe() -> Recipe {
    Recipe::from_static(&[
        ("delay", COUNT_STATS),
        ("lacking_money", STATS),
        ("surplus_money", STATS),
        ("delay_money", STATS),
        ("advance_money", STATS),
        ("lacking_money_ratio", STATS),
        ("surplus_money_ratio", STATS),
    ])
}

pub fn pos_balance_recipe() -> Recipe {
    Recipe::from_static(&[
        ("MONTHS_BALANCE", COUNT_STATS),
        ("CNT_INSTALMENT", STATS),
        ("CNT_INSTALMENT_FUTURE", STATS),
        ("SK_DPD", STATS),
        ("SK_DPD_DEF", STATS),
        ("no_inst", STATS),
    ])
}

pub fn credit_card_balance_recipe() -> Recipe {
    Recipe::from_static(&[
        ("count_missing", COUNT_STATS_NA),
        ("bal_to_limit", STATS_NA),
        ("draw_atm_to_limit", STATS_NA),
        ("draw_pos_to_limit", STATS_NA),
        ("draw_other_to_limit", STATS_NA),
        ("draw_atm_to_min_inst", STATS_NA),
        ("draw_pos_to_min_inst", STATS_NA),
        ("draw_other_to_min_inst", STATS_NA),
        ("AMT_CREDIT_LIMIT_ACTUAL", STATS_NA),
        ("AMT_DRAWINGS_ATM_CURRENT", STATS_NA),
        ("AMT_DRAWINGS_CURRENT", STATS_NA),
        ("AMT_DRAWINGS_OTHER_CURRENT", STATS_NA),
        ("AMT_DRAWINGS_POS_CURRENT", STATS_NA),
        ("AMT_INST_MIN_REGULARITY", STATS_NA),
        ("AMT_PAYMENT_CURRENT", STATS_NA),
        ("AMT_PAYMENT_TOTAL_CURRENT", STATS_NA),
        ("AMT_RECEIVABLE_PRINCIPAL", STATS_NA),
        ("AMT_RECIVABLE", STATS_NA),
        ("AMT_TOTAL_RECEIVABLE", STATS_NA),
        ("CNT_DRAWINGS_ATM_CURRENT", STATS_NA),
        ("CNT_DRAWINGS_CURRENT", STATS_NA),
        ("CNT_DRAWINGS_OTHER_CURRENT", STATS_NA),
        ("CNT_DRAWINGS_POS_CURRENT", STATS_NA),
        ("CNT_INSTALMENT_MATURE_CUM", STATS_NA),
        ("SK_DPD", STATS_NA),
        ("SK_DPD_DEF", STATS_NA),
    ])
}

pub fn bureau_balance_recipe() -> Recipe {
    Recipe::from_static(&[
        ("0_col", COUNT_SIMPLE),
        ("1_col", SIMPLE),
        ("2_col", SIMPLE),
        ("3_col", SIMPLE),
        ("4_col", SIMPLE),
        ("5_col", SIMPLE),
        ("C_col", SIMPLE),
        ("X_col", SIMPLE),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_recipes_are_valid() {
        for recipe in [
            bureau_recipe(),
            previous_application_recipe(),
            cross_sell_recipe(),
            installments_recipe(),
            pos_balance_recipe(),
            credit_card_balance_recipe(),
            bureau_balance_recipe(),
        ] {
            recipe.validate().unwrap();
        }
    }

    #[test]
    fn headers_follow_declaration_order() {
        let recipe = installments_recipe();
        let headers: Vec<(&str, &str)> = recipe
            .headers()
            .take(7)
            .map(|(column, op)| (column, op.name()))
            .collect();
        assert_eq!(
            headers,
            vec![
                ("delay", "count"),
                ("delay", "sum"),
                ("delay", "mean"),
                ("delay", "max"),
                ("delay", "min"),
                ("delay", "dispersion"),
                ("lacking_money", "sum"),
            ]
        );
        assert_eq!(recipe.output_width(), 6 + 6 * 5);
    }

    #[test]
    fn validate_rejects_duplicates_and_empty_lists() {
        let dup_column = Recipe::new(vec![
            RecipeEntry {
                column: "a".to_string(),
                operators: vec![Operator::Sum],
            },
            RecipeEntry {
                column: "a".to_string(),
                operators: vec![Operator::Mean],
            },
        ]);
        assert_eq!(
            dup_column.validate().unwrap_err(),
            RecipeError::DuplicateColumn("a".to_string())
        );

        let dup_op = Recipe::new(vec![RecipeEntry {
            column: "a".to_string(),
            operators: vec![Operator::Sum, Operator::Sum],
        }]);
        assert!(matches!(
            dup_op.validate().unwrap_err(),
            RecipeError::DuplicateOperator { operator: "sum", .. }
        ));

        let no_ops = Recipe::new(vec![RecipeEntry {
            column: "a".to_string(),
            operators: Vec::new(),
        }]);
        assert_eq!(
            no_ops.validate().unwrap_err(),
            RecipeError::NoOperators("a".to_string())
        );
        assert_eq!(Recipe::default().validate().unwrap_err(), RecipeError::Empty);
    }

    #[test]
    fn output_names_use_segment_prefix() {
        let names = cross_sell_recipe().output_names("previous_app_xsell_in_30");
        assert_eq!(names, vec!["previous_app_xsell_in_30_is_x_sell_sum".to_string()]);
    }
}
