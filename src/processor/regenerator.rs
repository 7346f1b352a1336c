use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::RegenerateConfig;
use crate::photos::PhotosetEngine;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegenerationReport {
    pub total: usize,
    pub composed: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Composed,
    Skipped,
    Failed,
}

/// Rebuilds animations for anchors that have followers but no animation,
/// e.g. after a crash between a membership change and its recompute.
pub async fn regenerate_missing_animations(
    config: &RegenerateConfig,
    engine: Arc<PhotosetEngine>,
) -> RegenerationReport {
    let roots = match engine.roots_missing_animation() {
        Ok(roots) => roots,
        Err(e) => {
            error!("Failed to list chains without animation: {}", e);
            return RegenerationReport::default();
        }
    };

    let mut report = RegenerationReport {
        total: roots.len(),
        ..RegenerationReport::default()
    };

    if roots.is_empty() {
        return report;
    }

    info!("Regenerating animations for {} chains", roots.len());

    let concurrency = if config.num_cpus > 0 {
        config.num_cpus
    } else {
        num_cpus::get()
    };
    let semaphore = Arc::new(Semaphore::new(concurrency));

    let mut stream = stream::iter(roots)
        .map(|root_id| {
            let semaphore = semaphore.clone();
            let engine = engine.clone();

            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return Outcome::Skipped;
                };

                match engine.recompute(root_id).await {
                    Ok(Some(_)) => Outcome::Composed,
                    Ok(None) => Outcome::Skipped,
                    Err(e) => {
                        warn!("Animation for chain {} not regenerated: {}", root_id, e);
                        Outcome::Failed
                    }
                }
            }
        })
        .buffer_unordered(concurrency);

    while let Some(outcome) = stream.next().await {
        match outcome {
            Outcome::Composed => report.composed += 1,
            Outcome::Skipped => report.skipped += 1,
            Outcome::Failed => report.failed += 1,
        }
    }

    info!(
        "Animation regeneration completed. Composed: {}, failed: {}",
        report.composed, report.failed
    );
    report
}
