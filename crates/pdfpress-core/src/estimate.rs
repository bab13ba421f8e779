//! Size estimation
//!
//! Forecasts before/after totals using the same per-page decision as
//! assembly. After sizes are what a page costs once emitted, so JPEG and PNG
//! payloads include the page that wraps them. A page that is not examined
//! counts at its original emitted cost; one that fails counts at its
//! original size on both sides. The forecast never promises more savings
//! than assembly delivers.

use serde::Serialize;
use tracing::{info, instrument};

use crate::cancel::CancelToken;
use crate::engine::Engine;
use crate::error::RenderError;
use crate::page::{OriginKind, Page, Profile};
use crate::report::{PageOutcome, PageStatus};

/// Which profile each page is estimated under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilePlan {
    /// The profile currently assigned to each page
    Assigned,
    /// One profile for every page, to preview a global change
    Uniform(Profile),
}

impl ProfilePlan {
    fn profile_for(self, page: &Page) -> Profile {
        match self {
            ProfilePlan::Assigned => page.profile,
            ProfilePlan::Uniform(profile) => profile,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateStrategy {
    /// Decide every page
    Exact,
    /// Decide at most `max_pages` evenly spaced pages
    Sampled { max_pages: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeEstimate {
    pub before_total: usize,
    pub after_total: usize,
    pub pages: Vec<PageOutcome>,
}

impl SizeEstimate {
    pub fn totals(&self) -> (usize, usize) {
        (self.before_total, self.after_total)
    }

    /// Whole-percent reduction, never negative
    pub fn savings_percent(&self) -> u32 {
        if self.before_total == 0 {
            return 0;
        }
        let ratio = self.after_total as f64 / self.before_total as f64;
        (100.0 * (1.0 - ratio)).round().max(0.0) as u32
    }

    /// Reduction as shown to users: `-NN%`, or `0%` when nothing is saved
    pub fn format_savings(&self) -> String {
        match self.savings_percent() {
            0 => "0%".to_string(),
            pct => format!("-{}%", pct),
        }
    }
}

/// Human-readable size in B, kB or MB
pub fn format_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;

    let value = bytes as f64;
    if value >= MB {
        format!("{:.2} MB", value / MB)
    } else if value >= KB {
        format!("{:.0} kB", value / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Indices of `count` evenly spaced samples out of `len`
fn sample_indices(len: usize, count: usize) -> Vec<usize> {
    if count >= len {
        return (0..len).collect();
    }
    (0..count).map(|i| i * len / count).collect()
}

/// Emitted cost of a page nobody looked at: its original, wrapped if it
/// is a standalone image
fn unsampled_size(page: &Page, overhead: usize) -> usize {
    match page.origin_kind() {
        OriginKind::Image => page.original_size() + overhead,
        OriginKind::PdfPage => page.original_size(),
    }
}

/// Estimate totals for the kept pages, in position order
#[instrument(skip_all, fields(pages = pages.len()))]
pub fn estimate(
    engine: &Engine,
    pages: &[Page],
    plan: ProfilePlan,
    strategy: EstimateStrategy,
    cancel: &CancelToken,
) -> Result<SizeEstimate, RenderError> {
    let mut kept: Vec<&Page> = pages.iter().filter(|p| p.keep).collect();
    kept.sort_by_key(|p| p.position);

    let sampled = match strategy {
        EstimateStrategy::Exact => sample_indices(kept.len(), kept.len()),
        EstimateStrategy::Sampled { max_pages } => sample_indices(kept.len(), max_pages),
    };

    let jobs: Vec<(&Page, Profile)> = sampled
        .iter()
        .map(|&i| (kept[i], plan.profile_for(kept[i])))
        .collect();
    let mut results = engine.decide_all(&jobs, cancel).into_iter();
    let mut next_sample = sampled.iter().copied().peekable();

    let overhead = engine.config().remux_overhead_per_page;
    let mut outcomes = Vec::with_capacity(kept.len());
    for (i, page) in kept.iter().enumerate() {
        let profile = plan.profile_for(page);
        let original_size = page.original_size();

        let (result_size, status, fallback_reason) = if next_sample.next_if_eq(&i).is_some() {
            match results.next() {
                Some(Ok(result)) => (
                    result.emitted_size(overhead),
                    result.status(),
                    result.fallback_reason,
                ),
                Some(Err(RenderError::Cancelled)) | None => return Err(RenderError::Cancelled),
                Some(Err(err)) => (original_size, PageStatus::Excluded(err), None),
            }
        } else {
            (unsampled_size(page, overhead), PageStatus::NotSampled, None)
        };

        outcomes.push(PageOutcome {
            page: page.id(),
            source_name: page.source_name().to_string(),
            profile,
            original_size,
            result_size,
            status,
            fallback_reason,
        });
    }

    let estimate = SizeEstimate {
        before_total: outcomes.iter().map(|o| o.original_size).sum(),
        after_total: outcomes.iter().map(|o| o.result_size).sum(),
        pages: outcomes,
    };
    info!(
        before = estimate.before_total,
        after = estimate.after_total,
        sampled = sampled.len(),
        "Estimated output size"
    );
    Ok(estimate)
}
