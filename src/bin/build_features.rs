use credit_features::{
    init_logging, log_app_start, log_config_selected, log_run_failed, logging_config_from_env,
    pipeline_config_from_env, run_pipeline,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let config = pipeline_config_from_env()?;
    log_config_selected(&config);

    let report = match run_pipeline(&config) {
        Ok(report) => report,
        Err(err) => {
            log_run_failed(&err);
            return Err(err.into());
        }
    };

    println!(
        "wrote {} rows x {} columns to {} (schema {})",
        report.main_rows,
        report.schema.columns.len(),
        config.output_path.display(),
        report.schema.fingerprint
    );
    for step in &report.steps {
        println!(
            "  {:<24} {:>9} rows  {:>3} segments  {:>5} columns  {:>7} ms",
            step.table, step.sampled_rows, step.segments, step.feature_columns, step.elapsed_ms
        );
    }
    if !report.categorical_counts.skipped.is_empty() {
        println!(
            "  skipped categorical counts: {}",
            report
                .categorical_counts
                .skipped
                .iter()
                .map(|s| s.column.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(())
}
