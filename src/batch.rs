use crate::Result;
use futures::{stream, Future, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};

/// Runs `f` over `items` with at most `limit` calls in flight.
///
/// # Arguments
///
/// * `items` - The inputs, one call each.
/// * `limit` - The maximum number of concurrent calls.
/// * `label` - Shown on the progress bar and in log lines.
/// * `f` - The fallible operation.
///
/// # Returns
///
/// One slot per input, in input order. A failed call is logged and leaves `None` in its slot;
/// it never aborts the other calls.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, label: &str, f: F) -> Vec<Option<R>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress.set_message(label.to_string());

    let results = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| {
            let progress = progress.clone();
            let call = f(item);
            async move {
                let outcome = call.await;
                progress.inc(1);
                match outcome {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(task = label, index, error = %e, "Item failed, skipping");
                        None
                    }
                }
            }
        })
        .buffered(limit.max(1))
        .collect::<Vec<_>>()
        .await;

    let succeeded = results.iter().filter(|r| r.is_some()).count();
    progress.finish_with_message(format!("{}: {} of {} done", label, succeeded, total));
    debug!(task = label, succeeded, total, "Batch finished");

    results
}
