//! One row through the pipeline: request → parse/repair → score → write.

use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::batch::backoff::{Pacer, RetryPolicy};
use crate::batch::output::{write_json_atomic, OutputLayout, ProductDocument, SummaryRow};
use crate::batch::state::{RowState, RowTracker};
use crate::errors::AppError;
use crate::generation::features::{build_request, GenerationRequest, ProductInput};
use crate::generation::parser::{parse_with_repair, ParseOutcome};
use crate::generation::{GenerationError, GenerationResult};
use crate::llm_client::TextModel;
use crate::seo::{self, SeoMode, SeoReport};

/// Knobs shared by the batch and single-product paths.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub retry: RetryPolicy,
    pub seo_mode: SeoMode,
    pub auto_fix: bool,
}

impl GenerateOptions {
    pub fn validate(&self) -> Result<(), AppError> {
        let retry = &self.retry;
        if retry.base.is_zero() {
            return Err(AppError::Config("--backoff-base must be > 0".to_string()));
        }
        if retry.cap < retry.base {
            return Err(AppError::Config(format!(
                "--max-backoff ({:.1}s) must not be below --backoff-base ({:.1}s)",
                retry.cap.as_secs_f64(),
                retry.base.as_secs_f64()
            )));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(AppError::Config(format!(
                "jitter must be within 0.0..=1.0, got {}",
                retry.jitter
            )));
        }
        Ok(())
    }
}

/// Requests and parses a result, retrying transient failures with back-off.
///
/// Leaves the tracker in `Parsing` on success, or in `Requesting`/`Parsing`
/// on a final error; the caller records the terminal state.
pub async fn generate_with_retry<M>(
    model: &M,
    request: &GenerationRequest,
    policy: &RetryPolicy,
    pacer: &mut Pacer,
    tracker: &mut RowTracker,
) -> Result<ParseOutcome, GenerationError>
where
    M: TextModel + ?Sized,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        tracker.transition(RowState::Requesting { attempt });

        let err = match model.complete(&request.prompt, request.system).await {
            Ok(raw) => {
                tracker.transition(RowState::Parsing);
                match parse_with_repair(model, &raw).await {
                    Ok(outcome) => {
                        if outcome.model_repairs > 0 || !outcome.repairs.is_empty() {
                            debug!(
                                "'{}' needed repairs {:?} and {} repair request(s)",
                                request.product_name, outcome.repairs, outcome.model_repairs
                            );
                        }
                        pacer.record_success();
                        return Ok(outcome);
                    }
                    Err(e) => e,
                }
            }
            Err(e) => GenerationError::from(e),
        };

        if err.is_rate_limited() {
            pacer.record_rate_limit();
        }
        if !err.is_retriable() || attempt >= max_attempts {
            return Err(err);
        }

        let delay = policy.delay_for(attempt, err.retry_after());
        warn!(
            "'{}' attempt {}/{} failed: {}, retrying in {:.1}s",
            request.product_name,
            attempt,
            max_attempts,
            err,
            delay.as_secs_f64()
        );
        tracker.transition(RowState::Retrying {
            attempt,
            delay,
            reason: err.to_string(),
        });
        tokio::time::sleep(delay).await;
    }
}

/// Full generation for one product, without touching the filesystem.
pub async fn generate_document<M>(
    model: &M,
    product: &ProductInput,
    options: &GenerateOptions,
    pacer: &mut Pacer,
    tracker: &mut RowTracker,
) -> Result<(GenerationResult, SeoReport), GenerationError>
where
    M: TextModel + ?Sized,
{
    let request = build_request(product)?;
    let outcome = generate_with_retry(model, &request, &options.retry, pacer, tracker).await?;

    tracker.transition(RowState::Scoring);
    let mut result = outcome.result;
    let keywords = seo::target_keywords(&request.target_keywords, &result);
    if options.auto_fix {
        seo::apply_auto_fixes(&mut result, &keywords);
    }
    let report = seo::analyze(&result, &keywords, options.seo_mode);
    Ok((result, report))
}

/// Runs one row end to end. A generation failure becomes a `FAILED` summary
/// row; only output I/O errors abort the batch.
pub async fn process_row<M>(
    model: &M,
    product: &ProductInput,
    description_path: &Path,
    layout: &OutputLayout,
    options: &GenerateOptions,
    pacer: &mut Pacer,
) -> Result<(RowTracker, SummaryRow), AppError>
where
    M: TextModel + ?Sized,
{
    let mut tracker = RowTracker::new(product.index);

    match generate_document(model, product, options, pacer, &mut tracker).await {
        Ok((result, report)) => {
            tracker.transition(RowState::Writing);
            write_json_atomic(
                description_path,
                &ProductDocument {
                    result: &result,
                    seo_report: &report,
                },
            )?;
            tracker.transition(RowState::Done);
            info!(
                "Row {} saved: {} ({} suggestions)",
                product.index,
                layout.relative(description_path),
                report.suggestions.len()
            );
            let row = SummaryRow::succeeded(
                product,
                layout.relative(description_path),
                &result,
                tracker.attempts(),
            );
            Ok((tracker, row))
        }
        Err(err) => {
            let reason = err.to_string();
            error!(
                "Row {} FAILED after {} attempt(s): {}",
                product.index,
                tracker.attempts(),
                reason
            );
            tracker.transition(RowState::Failed {
                reason: reason.clone(),
            });
            let row = SummaryRow::failed(product, tracker.attempts(), reason);
            Ok((tracker, row))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::generation::testing::{sample_json, sample_result};
    use crate::llm_client::testing::ScriptedModel;
    use crate::llm_client::LlmError;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base: Duration::from_millis(100),
            cap: Duration::from_secs(30),
            jitter: 0.0,
        }
    }

    fn pacer() -> Pacer {
        Pacer::new(Duration::ZERO, 1.5, Duration::from_secs(30))
    }

    fn product() -> ProductInput {
        ProductInput::from_raw(0, "Trail Bottle", "steel; insulated", "", "", "water bottle")
    }

    fn rate_limited() -> Result<String, LlmError> {
        Err(LlmError::RateLimited { retry_after: None })
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_row_backs_off_with_increasing_delays_then_fails() {
        let model = ScriptedModel::new(vec![
            rate_limited(),
            rate_limited(),
            rate_limited(),
            rate_limited(),
        ]);
        let mut tracker = RowTracker::new(0);
        let mut pacer = pacer();
        let request = build_request(&product()).unwrap();

        let err = generate_with_retry(&model, &request, &policy(3), &mut pacer, &mut tracker)
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(model.calls(), 4);
        assert_eq!(tracker.attempts(), 4);
        let delays = tracker.backoff_delays();
        assert_eq!(delays.len(), 3, "every failure with attempts left is a Retrying");
        assert!(delays.windows(2).all(|w| w[0] < w[1]), "delays {delays:?}");
        assert_eq!(pacer.consecutive_rate_limits(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let model = ScriptedModel::new(vec![
            Err(LlmError::Timeout { secs: 60 }),
            Ok(sample_json()),
        ]);
        let mut tracker = RowTracker::new(0);
        let request = build_request(&product()).unwrap();

        let outcome = generate_with_retry(&model, &request, &policy(3), &mut pacer(), &mut tracker)
            .await
            .unwrap();

        assert_eq!(outcome.result, sample_result());
        assert_eq!(tracker.attempts(), 2);
        assert_eq!(tracker.current(), &RowState::Parsing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_response_falls_back_to_fresh_request() {
        let model = ScriptedModel::new(vec![
            Ok("no json here".to_string()),
            Ok("still nothing".to_string()), // repair request answer
            Ok(sample_json()),
        ]);
        let mut tracker = RowTracker::new(0);
        let request = build_request(&product()).unwrap();

        let outcome = generate_with_retry(&model, &request, &policy(2), &mut pacer(), &mut tracker)
            .await
            .unwrap();

        assert_eq!(outcome.result, sample_result());
        assert_eq!(model.calls(), 3);
        assert_eq!(tracker.attempts(), 2);
        assert!(matches!(tracker.history()[3], RowState::Retrying { .. }));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let model = ScriptedModel::new(vec![Err(LlmError::Service {
            status: Some(401),
            message: "bad key".to_string(),
        })]);
        let mut tracker = RowTracker::new(0);
        let request = build_request(&product()).unwrap();

        let err = generate_with_retry(&model, &request, &policy(5), &mut pacer(), &mut tracker)
            .await
            .unwrap_err();

        assert!(!err.is_retriable());
        assert_eq!(model.calls(), 1);
        assert!(tracker.backoff_delays().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_row_fails_without_model_call() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::create(dir.path()).unwrap();
        let model = ScriptedModel::new(vec![]);
        let bad = ProductInput::from_raw(5, "Nameless features", "", "", "", "");
        let path = layout.description_path("005_x");

        let (tracker, row) = process_row(
            &model,
            &bad,
            &path,
            &layout,
            &GenerateOptions::default(),
            &mut pacer(),
        )
        .await
        .unwrap();

        assert_eq!(model.calls(), 0);
        assert!(matches!(tracker.current(), RowState::Failed { .. }));
        assert_eq!(row.attempts, 0);
        assert!(row.error.contains("no features"));
        assert!(!path.exists());
    }

    #[test]
    fn test_validate_rejects_zero_base_and_cap_below_base() {
        assert!(GenerateOptions::default().validate().is_ok());

        let zero_base = GenerateOptions {
            retry: RetryPolicy {
                base: Duration::ZERO,
                ..RetryPolicy::default()
            },
            ..GenerateOptions::default()
        };
        assert!(matches!(zero_base.validate(), Err(AppError::Config(_))));

        let small_cap = GenerateOptions {
            retry: RetryPolicy {
                base: Duration::from_secs(10),
                cap: Duration::from_secs(1),
                ..RetryPolicy::default()
            },
            ..GenerateOptions::default()
        };
        let err = small_cap.validate().unwrap_err();
        assert!(err.to_string().contains("--max-backoff"));
    }

    #[tokio::test]
    async fn test_auto_fix_runs_before_scoring() {
        let mut long = sample_result();
        long.title = format!("{} {}", long.title, "with extra words ".repeat(5));
        let model = ScriptedModel::new(vec![Ok(serde_json::to_string(&long).unwrap())]);
        let options = GenerateOptions {
            auto_fix: true,
            ..GenerateOptions::default()
        };
        let mut tracker = RowTracker::new(0);

        let (result, report) =
            generate_document(&model, &product(), &options, &mut pacer(), &mut tracker)
                .await
                .unwrap();

        assert!(result.title.chars().count() <= seo::MAX_TITLE_CHARS);
        assert_eq!(report.metrics.title_length, result.title.chars().count());
        assert_eq!(tracker.current(), &RowState::Scoring);
    }
}
