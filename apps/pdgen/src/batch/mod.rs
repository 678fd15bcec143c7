// Batch orchestration.
// Rows run sequentially; the pacing counter is the only state shared between them.
// Each row's output is written atomically, and the combined CSV is rebuilt after
// every row, so an interrupted run keeps everything finished so far.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::errors::AppError;
use crate::llm_client::TextModel;

pub mod backoff;
pub mod input;
pub mod output;
pub mod row;
pub mod state;

use backoff::Pacer;
use output::{file_stem, CombinedSummary, OutputLayout, RowStatus, SummaryRow};
use row::{process_row, GenerateOptions};
use state::RowTracker;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input: PathBuf,
    pub out_dir: PathBuf,
    /// First row (0-based) to process.
    pub start: usize,
    /// Maximum rows to process; 0 means no limit.
    pub max: usize,
    /// Base pause between rows.
    pub delay: Duration,
    pub delay_increase_factor: f64,
    pub generate: GenerateOptions,
}

impl BatchOptions {
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.delay_increase_factor.is_finite() || self.delay_increase_factor < 1.0 {
            return Err(AppError::Config(format!(
                "--delay-increase-factor must be >= 1.0, got {}",
                self.delay_increase_factor
            )));
        }
        self.generate.validate()
    }
}

/// Outcome of a batch run. Only rows inside the `--start`/`--max` window count
/// towards `processed` and `skipped`.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub total_rows: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rows: Vec<RowTracker>,
}

/// Runs the whole batch. Returns `Err` only for fatal problems (unreadable
/// input, unwritable output); individual row failures end up in the report.
pub async fn run_batch<M>(model: &M, options: &BatchOptions) -> Result<BatchReport, AppError>
where
    M: TextModel + ?Sized,
{
    options.validate()?;
    let products = input::read_products(&options.input)?;

    let mut report = BatchReport {
        total_rows: products.len(),
        ..BatchReport::default()
    };
    if products.is_empty() {
        info!("{} has no product rows, nothing to do", options.input.display());
        return Ok(report);
    }

    let layout = OutputLayout::create(&options.out_dir)?;
    let mut summary = CombinedSummary::load(layout.combined_csv())?;
    if !summary.is_empty() {
        info!("Resuming: {} rows already in the combined summary", summary.len());
    }

    let end = match options.max {
        0 => products.len(),
        max => options.start.saturating_add(max).min(products.len()),
    };
    let window = products.get(options.start..end).unwrap_or(&[]);
    info!(
        "Processing rows {}..{} of {} from {} into {}",
        options.start,
        end.max(options.start),
        products.len(),
        options.input.display(),
        options.out_dir.display()
    );

    let mut pacer = Pacer::new(
        options.delay,
        options.delay_increase_factor,
        options.generate.retry.cap,
    );

    for (position, product) in window.iter().enumerate() {
        let path = layout.description_path(&file_stem(product));
        if path.exists() {
            info!(
                "Row {} '{}' already has {}, skipping",
                product.index,
                product.name,
                layout.relative(&path)
            );
            report.skipped += 1;
            if !summary.contains(product.index) {
                match SummaryRow::from_description_file(product, &layout, &path) {
                    Ok(row) => {
                        summary.upsert(row);
                        summary.write()?;
                    }
                    Err(e) => warn!(
                        "Cannot restore summary line for row {} from {}: {e}",
                        product.index,
                        layout.relative(&path)
                    ),
                }
            }
            continue;
        }

        info!(
            "[{}/{}] Generating row {}: {}",
            position + 1,
            window.len(),
            product.index,
            product.name
        );
        let (tracker, row) =
            process_row(model, product, &path, &layout, &options.generate, &mut pacer).await?;

        report.processed += 1;
        match row.status {
            RowStatus::Ok => report.succeeded += 1,
            RowStatus::Failed => report.failed += 1,
        }
        summary.upsert(row);
        summary.write()?;
        debug_assert!(tracker.current().is_terminal());
        report.rows.push(tracker);

        if position + 1 < window.len() {
            let pause = pacer.pause_after_row();
            if !pause.is_zero() {
                info!("Sleeping {:.1}s before next row", pause.as_secs_f64());
                tokio::time::sleep(pause).await;
            }
        }
    }

    info!(
        "Batch finished: {} processed ({} ok, {} failed), {} skipped; summary at {}",
        report.processed,
        report.succeeded,
        report.failed,
        report.skipped,
        layout.relative(&layout.combined_csv())
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::backoff::RetryPolicy;
    use super::state::RowState;
    use super::*;
    use crate::generation::testing::sample_json;
    use crate::generation::GenerationResult;
    use crate::llm_client::testing::ScriptedModel;
    use crate::llm_client::LlmError;

    const THREE_ROWS: &str = "name,features,category,audience,keywords\n\
        Trail Bottle,\"steel; insulated\",Outdoor,Hikers,water bottle\n\
        Desk Lamp,\"dimmable; usb-c\",Home,Students,desk lamp\n\
        Camp Mug,\"enamel; stackable\",Outdoor,Campers,camp mug\n";

    fn options(dir: &Path, csv: &str, max_retries: u32) -> BatchOptions {
        let input = dir.join("products.csv");
        std::fs::write(&input, csv).unwrap();
        BatchOptions {
            input,
            out_dir: dir.join("outputs"),
            start: 0,
            max: 0,
            delay: Duration::from_millis(500),
            delay_increase_factor: 1.5,
            generate: GenerateOptions {
                retry: RetryPolicy {
                    max_retries,
                    base: Duration::from_millis(100),
                    cap: Duration::from_secs(30),
                    jitter: 0.0,
                },
                ..GenerateOptions::default()
            },
        }
    }

    fn description_files(out_dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(out_dir.join("descriptions"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn combined_rows(out_dir: &Path) -> Vec<SummaryRow> {
        CombinedSummary::load(out_dir.join("combined").join("combined.csv"))
            .unwrap()
            .rows()
            .cloned()
            .collect()
    }

    fn missing_closing_brace() -> String {
        let json = sample_json();
        json.trim_end().trim_end_matches('}').to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_rows_with_repairable_middle_row() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), THREE_ROWS, 2);
        let model = ScriptedModel::new(vec![
            Ok(sample_json()),
            Ok(missing_closing_brace()),
            Ok(sample_json()),
        ]);

        let report = run_batch(&model, &opts).await.unwrap();

        assert_eq!(model.calls(), 3, "heuristic repair needs no extra request");
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.processed, 3);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 0);

        let files = description_files(&opts.out_dir);
        assert_eq!(files.len(), 3);
        assert!(files[1].starts_with("001_desk-lamp_"));

        let doc: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(opts.out_dir.join("descriptions").join(&files[1])).unwrap(),
        )
        .unwrap();
        let parsed: GenerationResult = serde_json::from_value(doc.clone()).unwrap();
        assert!(!parsed.title.is_empty());
        assert!(doc["seo_report"]["metrics"]["title_length"].is_number());

        let rows = combined_rows(&opts.out_dir);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.status == RowStatus::Ok));
        assert_eq!(rows[1].description_file, format!("descriptions/{}", files[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_input_processes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), "name,features\n", 2);
        let model = ScriptedModel::new(vec![]);

        let report = run_batch(&model, &opts).await.unwrap();

        assert_eq!(report.total_rows, 0);
        assert_eq!(report.processed, 0);
        assert_eq!(model.calls(), 0);
        assert!(!opts.out_dir.join("descriptions").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_row_fails_without_affecting_others() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path(), THREE_ROWS, 3);
        opts.max = 2;
        let limited = || Err(LlmError::RateLimited { retry_after: None });
        let model = ScriptedModel::new(vec![
            limited(),
            limited(),
            limited(),
            limited(),
            Ok(sample_json()),
        ]);

        let report = run_batch(&model, &opts).await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 1);

        let first = &report.rows[0];
        assert!(matches!(first.current(), RowState::Failed { .. }));
        assert_eq!(first.attempts(), 4);
        let delays = first.backoff_delays();
        assert_eq!(delays.len(), 3);
        assert!(delays.windows(2).all(|w| w[0] < w[1]), "delays {delays:?}");
        assert_eq!(report.rows[1].current(), &RowState::Done);

        assert_eq!(description_files(&opts.out_dir).len(), 1);
        let rows = combined_rows(&opts.out_dir);
        assert_eq!(rows[0].status, RowStatus::Failed);
        assert_eq!(rows[0].attempts, 4);
        assert!(rows[0].error.contains("Rate limited"));
        assert_eq!(rows[1].status, RowStatus::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_skips_rows_with_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), THREE_ROWS, 0);
        let first = ScriptedModel::new(vec![
            Ok(sample_json()),
            Err(LlmError::Timeout { secs: 60 }),
            Ok(sample_json()),
        ]);
        let report = run_batch(&first, &opts).await.unwrap();
        assert_eq!((report.succeeded, report.failed), (2, 1));

        let second = ScriptedModel::new(vec![Ok(sample_json())]);
        let report = run_batch(&second, &opts).await.unwrap();

        assert_eq!(second.calls(), 1, "only the failed row is retried");
        assert_eq!(report.skipped, 2);
        assert_eq!(report.succeeded, 1);
        let rows = combined_rows(&opts.out_dir);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.status == RowStatus::Ok));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_rows_restore_missing_summary_lines() {
        let dir = tempfile::tempdir().unwrap();
        let opts = options(dir.path(), THREE_ROWS, 0);
        let first = ScriptedModel::new(vec![
            Ok(sample_json()),
            Ok(sample_json()),
            Ok(sample_json()),
        ]);
        run_batch(&first, &opts).await.unwrap();
        let before = combined_rows(&opts.out_dir);
        std::fs::remove_file(opts.out_dir.join("combined").join("combined.csv")).unwrap();

        let second = ScriptedModel::new(vec![]);
        let report = run_batch(&second, &opts).await.unwrap();

        assert_eq!(second.calls(), 0);
        assert_eq!(report.skipped, 3);
        let rows = combined_rows(&opts.out_dir);
        assert_eq!(rows.len(), 3);
        for (restored, original) in rows.iter().zip(&before) {
            assert_eq!(restored.status, RowStatus::Ok);
            assert_eq!(restored.description_file, original.description_file);
            assert_eq!(restored.title, original.title);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_max_select_a_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path(), THREE_ROWS, 0);
        opts.start = 1;
        opts.max = 1;
        let model = ScriptedModel::new(vec![Ok(sample_json())]);

        let report = run_batch(&model, &opts).await.unwrap();

        assert_eq!(report.processed, 1);
        assert!(model.prompts()[0].contains("Desk Lamp"));
        let files = description_files(&opts.out_dir);
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("001_"));
    }

    #[tokio::test]
    async fn test_unreadable_input_is_fatal_before_any_call() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path(), THREE_ROWS, 0);
        opts.input = dir.path().join("missing.csv");
        let model = ScriptedModel::new(vec![]);

        let err = run_batch(&model, &opts).await.unwrap_err();

        assert!(matches!(err, AppError::Input(_)));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_validate_rejects_shrinking_delay_factor() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path(), THREE_ROWS, 0);
        opts.delay_increase_factor = 0.5;
        assert!(matches!(opts.validate(), Err(AppError::Config(_))));
    }
}
