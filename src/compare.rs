//! Set-based document comparison.
//!
//! Each document's items (skills, requirements, keywords) come from the
//! orchestrator's map phase as JSON arrays. They are normalized and aligned
//! locally, so the similarity score never depends on model arithmetic.

use std::collections::BTreeSet;

use crate::cancel::CancelToken;
use crate::models::{
    AnalysisContent, AnalysisIntent, AnalysisRequest, AnalysisState, AnalysisStatus,
    ComparisonReport,
};
use crate::orchestrator::{Analyzer, Partial, Trace};

/// Lowercase, collapse inner whitespace, and strip surrounding punctuation.
pub fn normalize_item(item: &str) -> String {
    let collapsed = item
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_matches(|c: char| c.is_ascii_punctuation() && c != '+' && c != '#')
        .trim()
        .to_string()
}

fn item_set(items: &[String]) -> BTreeSet<String> {
    items
        .iter()
        .map(|i| normalize_item(i))
        .filter(|i| !i.is_empty())
        .collect()
}

/// Align two item lists. Swapping the inputs swaps `missing` and `extra`
/// and leaves `matched` and `similarity` unchanged.
pub fn align(
    document_a: &str,
    items_a: &[String],
    document_b: &str,
    items_b: &[String],
) -> ComparisonReport {
    let a = item_set(items_a);
    let b = item_set(items_b);

    let matched: Vec<String> = a.intersection(&b).cloned().collect();
    let missing: Vec<String> = a.difference(&b).cloned().collect();
    let extra: Vec<String> = b.difference(&a).cloned().collect();
    let union = matched.len() + missing.len() + extra.len();
    let similarity = if union == 0 {
        0.0
    } else {
        matched.len() as f64 / union as f64
    };

    ComparisonReport {
        document_a: document_a.to_string(),
        document_b: document_b.to_string(),
        matched,
        missing,
        extra,
        similarity,
    }
}

/// Extract items from both documents in one map phase, then align.
pub(crate) async fn run(
    analyzer: &Analyzer,
    request: &AnalysisRequest,
    trace: &mut Trace,
    cancel: &CancelToken,
) -> (AnalysisStatus, Option<AnalysisContent>) {
    let Some(outcomes) = analyzer
        .map_phase(AnalysisIntent::Compare, None, &request.documents, trace, cancel)
        .await
    else {
        return (AnalysisStatus::Cancelled, None);
    };
    trace.enter(AnalysisState::Merging);

    let mut items: [Vec<String>; 2] = [Vec::new(), Vec::new()];
    let mut succeeded = [0usize; 2];
    let mut failed = 0usize;
    for outcome in outcomes {
        match outcome.result {
            Ok(Partial::Items(found)) => {
                items[outcome.document].extend(found);
                succeeded[outcome.document] += 1;
            }
            Ok(_) => {}
            Err(_) => failed += 1,
        }
    }

    // Without any items from one side there is nothing to align.
    if succeeded.contains(&0) {
        return (AnalysisStatus::Failed, None);
    }

    let report = align(
        &request.documents[0].document_id,
        &items[0],
        &request.documents[1].document_id,
        &items[1],
    );
    let status = if failed > 0 {
        AnalysisStatus::Partial
    } else {
        AnalysisStatus::Complete
    };
    (status, Some(AnalysisContent::Comparison(report)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_item("  Project   Management. "), "project management");
        assert_eq!(normalize_item("C++"), "c++");
        assert_eq!(normalize_item("C#"), "c#");
        assert_eq!(normalize_item("..."), "");
    }

    #[test]
    fn set_difference() {
        let report = align(
            "resume",
            &items(&["Rust", "SQL", "Kubernetes"]),
            "job",
            &items(&["rust", "Go", "sql"]),
        );
        assert_eq!(report.matched, items(&["rust", "sql"]));
        assert_eq!(report.missing, items(&["kubernetes"]));
        assert_eq!(report.extra, items(&["go"]));
        assert!((report.similarity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn swap_symmetry() {
        let a = items(&["Rust", "SQL", "Docker"]);
        let b = items(&["SQL", "Terraform"]);
        let ab = align("a", &a, "b", &b);
        let ba = align("b", &b, "a", &a);
        assert_eq!(ab.matched, ba.matched);
        assert_eq!(ab.missing, ba.extra);
        assert_eq!(ab.extra, ba.missing);
        assert_eq!(ab.similarity, ba.similarity);
    }

    #[test]
    fn empty_union_scores_zero() {
        let report = align("a", &[], "b", &items(&["  "]));
        assert!(report.matched.is_empty());
        assert_eq!(report.similarity, 0.0);
    }

    #[test]
    fn duplicates_collapse() {
        let report = align("a", &items(&["SQL", "sql", "SQL."]), "b", &items(&["SQL"]));
        assert_eq!(report.matched, items(&["sql"]));
        assert_eq!(report.similarity, 1.0);
    }
}
