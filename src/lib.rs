//! Credit-risk feature builder.
//!
//! Turns an applicant table plus six transactional histories (credit bureau,
//! bureau balance, previous applications, instalments, POS and card balances)
//! into one wide feature table keyed by applicant:
//! - per-table derived columns and segment enumeration
//! - segment aggregation on a bounded per-step worker pool
//! - left joins onto the applicant table with a fingerprinted output schema

mod aggregate;
mod application;
mod bridge;
mod coordinator;
mod derive;
mod frame;
mod loader;
mod merge;
mod naming;
mod numeric;
mod observability;
mod operators;
mod pipeline;
mod recipes;
mod schema;
mod segments;

pub use aggregate::{
    aggregate_segment, AggregationError, FeatureTable, SegmentSlice, TransactionalTable,
};
pub use application::{
    add_categorical_counts, add_interest_features, add_ratio_features, engineer_main_features,
    interest_curve, interest_stats, term_stats, ApplicationError, CategoricalCountReport,
    MainTable, SkippedColumn, CATEGORICAL_COLUMNS, INTEREST_TERMS, INTEREST_THRESHOLD, TARGET,
    UNDEFINED_RATE,
};
pub use bridge::{BridgeError, ForeignKeyBridge, Resolution, UNMAPPED_ENTITY};
pub use coordinator::{run_segments, CoordinatorError, WorkerPool};
pub use derive::{derive_columns, BUREAU_BALANCE_STATUSES, DAYS_IN_MONTH, SURPLUS_RATIO_CAP};
pub use frame::{Column, ColumnKind, EntityId, Frame, FrameError};
pub use loader::{
    load_optional_table, load_table, locate_input, read_csv_frame, read_zip_frame, sample_rows,
    LoadError, MISSING_TOKENS,
};
pub use merge::{left_join, merge_feature_tables, MergeError, MergeSummary};
pub use naming::{flat_column_name, reduce_column_names, NameRegistry, NamingError};
pub use numeric::{clamp_non_finite, finite_ratio, floor_divide, light_divide, RATIO_DEFAULT};
pub use observability::{
    init_logging, log_app_start, log_config_selected, log_run_failed, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use operators::{
    dispersion, share_na, CustomOperator, GroupValues, Operator, OperatorError, DISPERSION,
    DISPERSION_EMPTY, SHARE_NA, SHARE_NA_EMPTY,
};
pub use pipeline::{
    output_columns, parse_table_list, pipeline_config_from_env, run_pipeline, validate_config,
    write_feature_csv, write_run_report, ConfigError, ConfigSummary, OutputError, PipelineConfig,
    PipelineError, RunReport, StepError, TableStepReport, MAIN_TABLE_NAME, TEST_STEM, TRAIN_STEM,
};
pub use recipes::{
    bureau_balance_recipe, bureau_recipe, credit_card_balance_recipe, cross_sell_recipe,
    installments_recipe, pos_balance_recipe, previous_application_recipe, Recipe, RecipeEntry,
    RecipeError,
};
pub use schema::{
    assert_schema_compatible, build_feature_schema, schema_fingerprint, FeatureColumn,
    FeatureDType, FeatureSchema, SchemaError, FEATURE_SCHEMA_VERSION,
};
pub use segments::{
    enumerate_segments, CompareOp, EntitySource, Predicate, Segment, TableKind, TableSpec,
    BUREAU_KEY, ENTITY_KEY,
};
