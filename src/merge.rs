//! Left joins of aggregated feature tables onto the main entity table.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::aggregate::FeatureTable;
use crate::frame::{EntityId, Frame, FrameError};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MergeError {
    #[error("main table has {rows} rows but {ids} entity ids")]
    KeyLengthMismatch { rows: usize, ids: usize },
    #[error("feature column '{column}' from segment '{prefix}' already exists")]
    DuplicateColumn { column: String, prefix: String },
    #[error("segment '{prefix}' has more than one row for entity {entity}")]
    DuplicateEntity { prefix: String, entity: EntityId },
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub tables: usize,
    pub columns: usize,
}

/// Adds the columns of `table` to `main`, matching rows on entity id.
///
/// Row count and order of `main` never change. Entities absent from `table`
/// get a missing value in every new column. Returns how many main rows
/// found a match.
pub fn left_join(
    main: &mut Frame,
    main_ids: &[EntityId],
    table: &FeatureTable,
) -> Result<usize, MergeError> {
    if main_ids.len() != main.len() {
        return Err(MergeError::KeyLengthMismatch {
            rows: main.len(),
            ids: main_ids.len(),
        });
    }

    for name in &table.names {
        if main.has_column(name) {
            return Err(MergeError::DuplicateColumn {
                column: name.clone(),
                prefix: table.prefix.clone(),
            });
        }
    }

    let mut index: HashMap<EntityId, usize> = HashMap::with_capacity(table.len());
    for (row, &entity) in table.entity_ids.iter().enumerate() {
        if index.insert(entity, row).is_some() {
            return Err(MergeError::DuplicateEntity {
                prefix: table.prefix.clone(),
                entity,
            });
        }
    }

    let lookup: Vec<Option<usize>> = main_ids.iter().map(|id| index.get(id).copied()).collect();
    for (name, values) in table.names.iter().zip(&table.values) {
        let joined = lookup
            .iter()
            .map(|row| row.and_then(|r| values[r]))
            .collect();
        main.set_numeric(name.clone(), joined)?;
    }

    let matched = lookup.iter().filter(|row| row.is_some()).count();
    debug!(
        component = "merge",
        event = "merge.table",
        prefix = %table.prefix,
        columns = table.width(),
        matched,
        unmatched = main_ids.len() - matched
    );
    Ok(matched)
}

/// Folds every table onto `main` in the given order.
pub fn merge_feature_tables(
    main: &mut Frame,
    main_ids: &[EntityId],
    tables: &[FeatureTable],
) -> Result<MergeSummary, MergeError> {
    let mut summary = MergeSummary::default();
    for table in tables {
        left_join(main, main_ids, table)?;
        summary.tables += 1;
        summary.columns += table.width();
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_frame(ids: &[EntityId]) -> Frame {
        let mut frame = Frame::new(ids.len());
        frame
            .set_numeric("SK_ID_CURR", ids.iter().map(|&id| Some(id as f64)).collect())
            .unwrap();
        frame
    }

    fn feature_table(prefix: &str, ids: Vec<EntityId>, values: Vec<Option<f64>>) -> FeatureTable {
        FeatureTable {
            prefix: prefix.to_string(),
            segment_ordinal: 0,
            entity_ids: ids,
            names: vec![format!("{prefix}_value_sum")],
            values: vec![values],
        }
    }

    #[test]
    fn left_join_keeps_row_count_and_order() {
        let ids = [5, 3, 9, 3];
        let mut main = main_frame(&ids);
        let table = feature_table("seg", vec![3, 5, 42], vec![Some(30.0), Some(50.0), Some(1.0)]);

        let matched = left_join(&mut main, &ids, &table).unwrap();
        assert_eq!(matched, 3);
        assert_eq!(main.len(), 4);
        assert_eq!(
            main.numeric("SK_ID_CURR").unwrap(),
            &[Some(5.0), Some(3.0), Some(9.0), Some(3.0)]
        );
        assert_eq!(
            main.numeric("seg_value_sum").unwrap(),
            &[Some(50.0), Some(30.0), None, Some(30.0)]
        );
    }

    #[test]
    fn join_order_does_not_change_values() {
        let ids = [1, 2, 3];
        let a = feature_table("a", vec![1, 3], vec![Some(1.0), Some(3.0)]);
        let b = feature_table("b", vec![2], vec![Some(20.0)]);

        let mut forward = main_frame(&ids);
        merge_feature_tables(&mut forward, &ids, &[a.clone(), b.clone()]).unwrap();
        let mut backward = main_frame(&ids);
        merge_feature_tables(&mut backward, &ids, &[b, a]).unwrap();

        for name in ["a_value_sum", "b_value_sum"] {
            assert_eq!(forward.numeric(name).unwrap(), backward.numeric(name).unwrap());
        }
    }

    #[test]
    fn duplicate_column_is_rejected_without_touching_main() {
        let ids = [1];
        let mut main = main_frame(&ids);
        let table = feature_table("seg", vec![1], vec![Some(1.0)]);
        left_join(&mut main, &ids, &table).unwrap();

        let err = left_join(&mut main, &ids, &table).unwrap_err();
        assert!(matches!(err, MergeError::DuplicateColumn { .. }));
        assert_eq!(main.width(), 2);
    }

    #[test]
    fn duplicate_entity_in_feature_table_is_rejected() {
        let ids = [1];
        let mut main = main_frame(&ids);
        let table = feature_table("seg", vec![1, 1], vec![Some(1.0), Some(2.0)]);
        assert_eq!(
            left_join(&mut main, &ids, &table).unwrap_err(),
            MergeError::DuplicateEntity {
                prefix: "seg".to_string(),
                entity: 1
            }
        );
    }

    #[test]
    fn summary_counts_tables_and_columns() {
        let ids = [1, 2];
        let mut main = main_frame(&ids);
        let tables = vec![
            feature_table("a", vec![1], vec![Some(1.0)]),
            feature_table("b", Vec::new(), Vec::new()),
        ];
        let summary = merge_feature_tables(&mut main, &ids, &tables).unwrap();
        assert_eq!(summary, MergeSummary { tables: 2, columns: 2 });
        assert_eq!(main.numeric("b_value_sum").unwrap(), &[None, None]);
    }
}
