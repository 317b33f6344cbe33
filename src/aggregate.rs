//! Group-by-entity aggregation of one segment.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use crate::frame::{Column, EntityId, Frame, FrameError};
use crate::naming::{reduce_column_names, NamingError};
use crate::operators::{GroupValues, Operator, OperatorError};
use crate::recipes::Recipe;
use crate::segments::Segment;

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("column '{column}': {source}")]
    Operator {
        column: String,
        #[source]
        source: OperatorError,
    },
    #[error("naming error: {0}")]
    Naming(#[from] NamingError),
    #[error("table '{table}' has no entity id at row {row}")]
    MissingEntityId { table: String, row: usize },
    #[error("slice has {ids} entity ids but {rows} rows")]
    SliceLengthMismatch { ids: usize, rows: usize },
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
}

/// A transactional table whose rows are already tied to an entity id.
#[derive(Debug, Clone)]
pub struct TransactionalTable {
    pub name: String,
    pub entity_ids: Vec<EntityId>,
    pub frame: Frame,
}

impl TransactionalTable {
    /// Reads entity ids from `key`; every row must carry one.
    pub fn keyed_by(name: &str, frame: Frame, key: &str) -> Result<Self, AggregationError> {
        let entity_ids = frame
            .entity_key(key)?
            .into_iter()
            .enumerate()
            .map(|(row, id)| {
                id.ok_or_else(|| AggregationError::MissingEntityId {
                    table: name.to_string(),
                    row,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.to_string(),
            entity_ids,
            frame,
        })
    }

    pub fn with_entity_ids(
        name: &str,
        frame: Frame,
        entity_ids: Vec<EntityId>,
    ) -> Result<Self, AggregationError> {
        if entity_ids.len() != frame.len() {
            return Err(AggregationError::SliceLengthMismatch {
                ids: entity_ids.len(),
                rows: frame.len(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            entity_ids,
            frame,
        })
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Copies the rows selected by the segment, restricted to the recipe columns.
    pub fn slice(&self, segment: &Segment) -> Result<SegmentSlice, AggregationError> {
        let rows = segment.predicate.select(&self.frame)?;
        let frame = self.frame.project(&rows, &segment.recipe_columns())?;
        let entity_ids = rows.iter().map(|&row| self.entity_ids[row]).collect();
        SegmentSlice::new(entity_ids, frame)
    }
}

/// Owned, already-filtered rows handed to one worker.
#[derive(Debug, Clone)]
pub struct SegmentSlice {
    entity_ids: Vec<EntityId>,
    frame: Frame,
}

impl SegmentSlice {
    pub fn new(entity_ids: Vec<EntityId>, frame: Frame) -> Result<Self, AggregationError> {
        if entity_ids.len() != frame.len() {
            return Err(AggregationError::SliceLengthMismatch {
                ids: entity_ids.len(),
                rows: frame.len(),
            });
        }
        Ok(Self { entity_ids, frame })
    }

    pub fn len(&self) -> usize {
        self.entity_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
    }
}

/// Aggregated features of one segment: one row per distinct entity, sorted
/// by entity id. Values are stored column-major.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub prefix: String,
    pub segment_ordinal: usize,
    pub entity_ids: Vec<EntityId>,
    pub names: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.entity_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
    }

    pub fn width(&self) -> usize {
        self.names.len()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.values[idx].as_slice())
    }

    /// Value of `name` for `entity`, `None` when either is absent.
    pub fn value(&self, entity: EntityId, name: &str) -> Option<f64> {
        let row = self.entity_ids.binary_search(&entity).ok()?;
        self.column(name)?[row]
    }

    pub fn row_index(&self) -> HashMap<EntityId, usize> {
        self.entity_ids
            .iter()
            .enumerate()
            .map(|(row, &id)| (id, row))
            .collect()
    }
}

/// Groups the slice by entity id and applies every recipe operator per group.
pub fn aggregate_segment(
    prefix: &str,
    segment_ordinal: usize,
    slice: &SegmentSlice,
    recipe: &Recipe,
) -> Result<FeatureTable, AggregationError> {
    let names = reduce_column_names(prefix, recipe.headers().map(|(c, op)| (c, op.name())))?;

    let mut groups: BTreeMap<EntityId, Vec<usize>> = BTreeMap::new();
    for (row, &id) in slice.entity_ids.iter().enumerate() {
        groups.entry(id).or_default().push(row);
    }
    let entity_ids: Vec<EntityId> = groups.keys().copied().collect();

    let mut values = Vec::with_capacity(names.len());
    for entry in recipe.entries() {
        let column = slice.frame.column(&entry.column)?;
        let mut per_operator = vec![Vec::with_capacity(groups.len()); entry.operators.len()];

        for rows in groups.values() {
            match column {
                Column::Numeric(cells) => {
                    let group: Vec<Option<f64>> = rows.iter().map(|&r| cells[r]).collect();
                    let group = GroupValues::Numeric(&group);
                    apply_all(&entry.column, &entry.operators, group, &mut per_operator)?;
                }
                Column::Text(cells) => {
                    let group: Vec<Option<&str>> =
                        rows.iter().map(|&r| cells[r].as_deref()).collect();
                    let group = GroupValues::Text(&group);
                    apply_all(&entry.column, &entry.operators, group, &mut per_operator)?;
                }
            }
        }
        values.extend(per_operator);
    }

    Ok(FeatureTable {
        prefix: prefix.to_string(),
        segment_ordinal,
        entity_ids,
        names,
        values,
    })
}

fn apply_all(
    column: &str,
    operators: &[Operator],
    group: GroupValues<'_>,
    out: &mut [Vec<Option<f64>>],
) -> Result<(), AggregationError> {
    for (op, column_out) in operators.iter().zip(out.iter_mut()) {
        let value = op
            .apply(group)
            .map_err(|source| AggregationError::Operator {
                column: column.to_string(),
                source,
            })?;
        column_out.push(value);
    }
    Ok(())
}
