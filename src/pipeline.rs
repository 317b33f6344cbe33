//! Run-level orchestration: main table, one aggregation step per configured
//! table, merge, output and run report.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::aggregate::{AggregationError, TransactionalTable};
use crate::application::{
    engineer_main_features, ApplicationError, CategoricalCountReport, MainTable, TARGET,
};
use crate::bridge::{BridgeError, ForeignKeyBridge};
use crate::coordinator::{run_segments, CoordinatorError, WorkerPool};
use crate::derive::derive_columns;
use crate::frame::{Column, FrameError};
use crate::loader::{load_optional_table, load_table, sample_rows, LoadError};
use crate::merge::{merge_feature_tables, MergeError};
use crate::naming::{NameRegistry, NamingError};
use crate::recipes::RecipeError;
use crate::schema::{
    assert_schema_compatible, build_feature_schema, FeatureColumn, FeatureDType, FeatureSchema,
    SchemaError, FEATURE_SCHEMA_VERSION,
};
use crate::segments::{enumerate_segments, EntitySource, TableKind, BUREAU_KEY, ENTITY_KEY};

pub const TRAIN_STEM: &str = "application_train";
pub const TEST_STEM: &str = "application_test";
/// Table name used in errors and reports for the main applicant table.
pub const MAIN_TABLE_NAME: &str = "application";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub output_path: PathBuf,
    pub report_path: Option<PathBuf>,
    pub sampling_fraction: f64,
    pub workers: usize,
    pub sampling_seed: u64,
    pub tables: Vec<TableKind>,
    pub expected_fingerprint: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_path: PathBuf::from("output/features.csv"),
            report_path: None,
            sampling_fraction: 1.0,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            sampling_seed: 42,
            tables: TableKind::ALL.to_vec(),
            expected_fingerprint: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),
    #[error("segment '{prefix}' has an invalid recipe: {source}")]
    Recipe {
        prefix: String,
        #[source]
        source: RecipeError,
    },
    #[error("feature names collide: {0}")]
    Naming(#[from] NamingError),
}

/// Failure inside one table step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("load failed: {0}")]
    Load(#[from] LoadError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("main table: {0}")]
    Application(#[from] ApplicationError),
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),
    #[error("bridge failed: {0}")]
    Bridge(#[from] BridgeError),
    #[error("no foreign-key bridge available; the owning table must run first")]
    MissingBridge,
    #[error("{0}")]
    Coordinator(#[from] CoordinatorError),
    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid output path: {0}")]
    InvalidPath(PathBuf),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("table '{table}' failed: {source}")]
    Table {
        table: String,
        #[source]
        source: StepError,
    },
    #[error("output schema rejected: {0}")]
    Schema(#[from] SchemaError),
    #[error("output failed: {0}")]
    Output(#[from] OutputError),
}

impl PipelineError {
    /// Name of the table whose step failed, if the failure is table-scoped.
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::Table { table, .. } => Some(table),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub data_dir: String,
    pub output_path: String,
    pub sampling_fraction: f64,
    pub workers: usize,
    pub sampling_seed: u64,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStepReport {
    pub table: String,
    pub input_rows: usize,
    pub sampled_rows: usize,
    pub segments: usize,
    pub feature_columns: usize,
    /// Rows whose sub-entity key had no owner.
    pub unmapped_rows: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at_utc: String,
    pub config: ConfigSummary,
    pub main_rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub steps: Vec<TableStepReport>,
    pub categorical_counts: CategoricalCountReport,
    pub schema: FeatureSchema,
    pub elapsed_ms: u64,
}

pub fn pipeline_config_from_env() -> Result<PipelineConfig, ConfigError> {
    let mut config = PipelineConfig::default();

    if let Some(raw) = env_value("CREDIT_FEATURES_DATA_DIR") {
        config.data_dir = PathBuf::from(raw);
    }
    if let Some(raw) = env_value("CREDIT_FEATURES_OUTPUT") {
        config.output_path = PathBuf::from(raw);
    }
    if let Some(raw) = env_value("CREDIT_FEATURES_REPORT") {
        config.report_path = Some(PathBuf::from(raw));
    }
    if let Some(raw) = env_value("CREDIT_FEATURES_SAMPLING") {
        config.sampling_fraction = parse_env("CREDIT_FEATURES_SAMPLING", &raw)?;
    }
    if let Some(raw) = env_value("CREDIT_FEATURES_WORKERS") {
        config.workers = parse_env("CREDIT_FEATURES_WORKERS", &raw)?;
    }
    if let Some(raw) = env_value("CREDIT_FEATURES_SEED") {
        config.sampling_seed = parse_env("CREDIT_FEATURES_SEED", &raw)?;
    }
    if let Some(raw) = env_value("CREDIT_FEATURES_TABLES") {
        config.tables = parse_table_list(&raw)?;
    }
    if let Some(raw) = env_value("CREDIT_FEATURES_EXPECTED_FINGERPRINT") {
        config.expected_fingerprint = Some(raw);
    }

    Ok(config)
}

fn env_value(var: &str) -> Option<String> {
    let raw = env::var(var).ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_env<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: raw.to_string(),
    })
}

/// Comma-separated dataset names, e.g. `bureau,buro_bal,pos_bal`.
pub fn parse_table_list(raw: &str) -> Result<Vec<TableKind>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            TableKind::from_dataset_name(name)
                .ok_or_else(|| ConfigError::UnknownTable(name.to_string()))
        })
        .collect()
}

pub fn validate_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    if !(config.sampling_fraction > 0.0 && config.sampling_fraction <= 1.0) {
        return Err(ConfigError::InvalidConfig(format!(
            "sampling_fraction must be in (0, 1], got {}",
            config.sampling_fraction
        )));
    }

    if config.workers == 0 {
        return Err(ConfigError::InvalidConfig("workers must be >= 1".to_string()));
    }

    let mut seen = HashSet::new();
    for kind in &config.tables {
        if !seen.insert(*kind) {
            return Err(ConfigError::InvalidConfig(format!(
                "table '{kind}' is listed more than once"
            )));
        }
    }

    if seen.contains(&TableKind::BureauBalance) && !seen.contains(&TableKind::Bureau) {
        return Err(ConfigError::InvalidConfig(format!(
            "table '{}' requires table '{}'",
            TableKind::BureauBalance,
            TableKind::Bureau
        )));
    }

    let mut registry = NameRegistry::default();
    for kind in &config.tables {
        for segment in enumerate_segments(*kind) {
            segment
                .recipe
                .validate()
                .map_err(|source| ConfigError::Recipe {
                    prefix: segment.prefix.clone(),
                    source,
                })?;
            for name in segment.recipe.output_names(&segment.prefix) {
                registry.register(&name, || segment.prefix.clone())?;
            }
        }
    }

    Ok(())
}

/// Configured tables in their fixed execution order.
fn execution_order(config: &PipelineConfig) -> Vec<TableKind> {
    TableKind::ALL
        .into_iter()
        .filter(|kind| config.tables.contains(kind))
        .collect()
}

pub fn run_pipeline(config: &PipelineConfig) -> Result<RunReport, PipelineError> {
    validate_config(config)?;
    let started = Instant::now();
    let tables = execution_order(config);

    info!(
        component = "pipeline",
        event = "run.start",
        data_dir = %config.data_dir.display(),
        output = %config.output_path.display(),
        sampling_fraction = config.sampling_fraction,
        workers = config.workers,
        seed = config.sampling_seed,
        tables = tables.len()
    );

    let (mut main, categorical_counts) =
        build_main_table(config).map_err(|source| table_failure(MAIN_TABLE_NAME, source))?;

    let mut bridge = None;
    let mut steps = Vec::with_capacity(tables.len());
    for kind in tables {
        let step = run_table_step(config, kind, &mut main, &mut bridge)
            .map_err(|source| table_failure(kind.dataset_name(), source))?;
        steps.push(step);
    }

    let schema = build_feature_schema(output_columns(&main));
    if let Some(expected) = &config.expected_fingerprint {
        assert_schema_compatible(FEATURE_SCHEMA_VERSION, expected, &schema)?;
    }

    write_feature_csv(&config.output_path, &main)?;
    info!(
        component = "pipeline",
        event = "output.written",
        path = %config.output_path.display(),
        rows = main.len(),
        columns = schema.columns.len(),
        fingerprint = %schema.fingerprint
    );

    let report = RunReport {
        generated_at_utc: Utc::now().to_rfc3339(),
        config: ConfigSummary {
            data_dir: config.data_dir.display().to_string(),
            output_path: config.output_path.display().to_string(),
            sampling_fraction: config.sampling_fraction,
            workers: config.workers,
            sampling_seed: config.sampling_seed,
            tables: steps.iter().map(|s| s.table.clone()).collect(),
        },
        main_rows: main.len(),
        train_rows: main.train_rows,
        test_rows: main.test_rows(),
        steps,
        categorical_counts,
        schema,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    if let Some(path) = &config.report_path {
        write_run_report(path, &report)?;
        info!(
            component = "pipeline",
            event = "report.written",
            path = %path.display()
        );
    }

    info!(
        component = "pipeline",
        event = "run.finish",
        rows = report.main_rows,
        columns = report.schema.columns.len(),
        elapsed_ms = report.elapsed_ms
    );
    Ok(report)
}

fn table_failure(table: &str, source: StepError) -> PipelineError {
    error!(
        component = "pipeline",
        event = "table.step.failed",
        table,
        error = %source
    );
    PipelineError::Table {
        table: table.to_string(),
        source,
    }
}

fn build_main_table(
    config: &PipelineConfig,
) -> Result<(MainTable, CategoricalCountReport), StepError> {
    let train = load_table(&config.data_dir, TRAIN_STEM)?;
    let train = sample_rows(train, config.sampling_fraction, config.sampling_seed)?;
    let test = load_optional_table(&config.data_dir, TEST_STEM)?;

    let mut main = MainTable::from_parts(train, test)?;
    let report = engineer_main_features(&mut main)?;
    Ok((main, report))
}

/// Load, sample, derive, aggregate every segment and merge one table.
fn run_table_step(
    config: &PipelineConfig,
    kind: TableKind,
    main: &mut MainTable,
    bridge: &mut Option<ForeignKeyBridge>,
) -> Result<TableStepReport, StepError> {
    let started = Instant::now();
    let spec = kind.spec();
    info!(
        component = "pipeline",
        event = "table.step.start",
        table = spec.dataset_name,
        segments = spec.segments.len()
    );

    let raw = load_table(&config.data_dir, spec.file_stem)?;
    let input_rows = raw.len();
    let fraction = if kind.is_sampled() {
        config.sampling_fraction
    } else {
        1.0
    };
    let mut frame = sample_rows(
        raw,
        fraction,
        config.sampling_seed.wrapping_add(kind.ordinal()),
    )?;
    let sampled_rows = frame.len();
    derive_columns(kind, &mut frame)?;

    if kind == TableKind::Bureau && config.tables.contains(&TableKind::BureauBalance) {
        *bridge = Some(ForeignKeyBridge::from_frame(&frame, BUREAU_KEY, ENTITY_KEY)?);
    }

    let (source, unmapped_rows) = match spec.entity_source {
        EntitySource::Direct { entity_key } => (
            TransactionalTable::keyed_by(spec.dataset_name, frame, entity_key)?,
            0,
        ),
        EntitySource::Bridged { sub_key } => {
            let bridge = bridge.as_ref().ok_or(StepError::MissingBridge)?;
            let resolution = bridge.resolve(&frame.entity_key(sub_key)?);
            info!(
                component = "pipeline",
                event = "bridge.resolved",
                table = spec.dataset_name,
                rows = resolution.entity_ids.len(),
                unmapped = resolution.unmapped
            );
            let unmapped = resolution.unmapped;
            (
                TransactionalTable::with_entity_ids(
                    spec.dataset_name,
                    frame,
                    resolution.entity_ids,
                )?,
                unmapped,
            )
        }
    };

    let mut tables = {
        let pool = WorkerPool::acquire(spec.dataset_name, config.workers)?;
        run_segments(&pool, &source, &spec.segments)?
    };
    tables.sort_by_key(|table| table.segment_ordinal);
    let summary = merge_feature_tables(&mut main.frame, &main.entity_ids, &tables)?;

    let report = TableStepReport {
        table: spec.dataset_name.to_string(),
        input_rows,
        sampled_rows,
        segments: summary.tables,
        feature_columns: summary.columns,
        unmapped_rows,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        component = "pipeline",
        event = "table.step.finish",
        table = spec.dataset_name,
        input_rows,
        sampled_rows,
        segments = report.segments,
        feature_columns = report.feature_columns,
        elapsed_ms = report.elapsed_ms
    );
    Ok(report)
}

/// Output columns in file order: main and feature columns, then `TARGET`.
pub fn output_columns(main: &MainTable) -> Vec<FeatureColumn> {
    main.frame
        .columns()
        .map(|(name, column)| FeatureColumn {
            name: name.to_string(),
            dtype: FeatureDType::from(column.kind()),
        })
        .chain(std::iter::once(FeatureColumn {
            name: TARGET.to_string(),
            dtype: FeatureDType::F64,
        }))
        .collect()
}

/// Writes the wide table; missing values are empty cells.
pub fn write_feature_csv(path: &Path, main: &MainTable) -> Result<(), OutputError> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header: Vec<&str> = main.frame.names().iter().map(String::as_str).collect();
    header.push(TARGET);
    writer.write_record(&header)?;

    let columns: Vec<&Column> = main.frame.columns().map(|(_, column)| column).collect();
    let mut record = Vec::with_capacity(header.len());
    for row in 0..main.len() {
        record.clear();
        for column in &columns {
            record.push(match column {
                Column::Numeric(values) => format_number(values[row]),
                Column::Text(values) => values[row].clone().unwrap_or_default(),
            });
        }
        record.push(format_number(main.target[row]));
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| OutputError::Csv(err.into_error().into()))?;
    write_atomic(path, &bytes)
}

fn format_number(value: Option<f64>) -> String {
    value.map(|v| format!("{v}")).unwrap_or_default()
}

pub fn write_run_report(path: &Path, report: &RunReport) -> Result<(), OutputError> {
    let bytes = serde_json::to_vec_pretty(report)?;
    write_atomic(path, &bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), OutputError> {
    let io_err = |source: std::io::Error| OutputError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| OutputError::InvalidPath(path.to_path_buf()))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    {
        let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
        file.write_all(bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }

    fs::rename(tmp_path, path).map_err(io_err)?;
    Ok(())
}
