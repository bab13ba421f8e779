//! Per-page outcome reporting shared by estimation and assembly

use serde::Serialize;

use crate::error::RenderError;
use crate::page::{PageId, Profile};

/// What happened to one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PageStatus {
    /// Original bytes kept because no transformation applies
    Unchanged,
    /// A smaller candidate was produced and used
    Compressed,
    /// A candidate was attempted but the original was kept
    FellBack,
    /// Left out of the output
    Excluded(RenderError),
    /// Not examined by a sampled estimate; counted at original size
    NotSampled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageOutcome {
    pub page: PageId,
    pub source_name: String,
    pub profile: Profile,
    pub original_size: usize,
    pub result_size: usize,
    pub status: PageStatus,
    /// Why a page fell back, when a render failure caused it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<RenderError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedPage {
    pub page: PageId,
    pub source_name: String,
    pub reason: RenderError,
}

/// Pages left out of an assembly, with reasons
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PartialFailureReport {
    pub excluded: Vec<ExcludedPage>,
}

impl PartialFailureReport {
    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    pub fn contains(&self, page: PageId) -> bool {
        self.excluded.iter().any(|e| e.page == page)
    }
}

impl From<&[PageOutcome]> for PartialFailureReport {
    fn from(outcomes: &[PageOutcome]) -> Self {
        let excluded = outcomes
            .iter()
            .filter_map(|o| match &o.status {
                PageStatus::Excluded(reason) => Some(ExcludedPage {
                    page: o.page,
                    source_name: o.source_name.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect();
        Self { excluded }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::SourceId;
    use serde_json::json;

    fn outcome(index: u32, status: PageStatus) -> PageOutcome {
        PageOutcome {
            page: PageId {
                source: SourceId::derive("a.pdf", b"x"),
                index,
            },
            source_name: "a.pdf".into(),
            profile: Profile::Medium,
            original_size: 100,
            result_size: 60,
            status,
            fallback_reason: None,
        }
    }

    #[test]
    fn test_report_lists_only_excluded_pages() {
        let outcomes = vec![
            outcome(0, PageStatus::Compressed),
            outcome(1, PageStatus::Excluded(RenderError::Decode("bad".into()))),
            outcome(2, PageStatus::FellBack),
        ];
        let report = PartialFailureReport::from(outcomes.as_slice());

        assert_eq!(report.excluded.len(), 1);
        assert!(report.contains(outcomes[1].page));
        assert!(!report.contains(outcomes[0].page));
    }

    #[test]
    fn test_fallback_reason_is_reported_when_present() {
        let mut fell_back = outcome(0, PageStatus::FellBack);
        let plain = serde_json::to_value(&fell_back).unwrap();
        assert!(plain.get("fallback_reason").is_none());

        fell_back.fallback_reason = Some(RenderError::Unsupported("vector content".into()));
        let value = serde_json::to_value(&fell_back).unwrap();
        assert_eq!(
            value["fallback_reason"],
            json!({"kind": "unsupported", "detail": "vector content"})
        );
    }

    #[test]
    fn test_status_serializes_with_reason() {
        let excluded = PageStatus::Excluded(RenderError::Decode("bad".into()));
        assert_eq!(
            serde_json::to_value(&excluded).unwrap(),
            json!({"status": "excluded", "reason": {"kind": "decode", "detail": "bad"}})
        );
        assert_eq!(
            serde_json::to_value(PageStatus::Compressed).unwrap(),
            json!({"status": "compressed"})
        );
    }
}
