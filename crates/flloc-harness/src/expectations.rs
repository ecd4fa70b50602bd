//! Expected-defect matching.

use serde::{Deserialize, Serialize};

use crate::classifier::{ClassifiedOutput, DiagnosticCategory};
use crate::error::HarnessError;

/// Fragments the allocator is expected to report for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationSet {
    pub category: DiagnosticCategory,
    /// Trimmed, lower-cased fragments in file order.
    pub fragments: Vec<String>,
}

impl ExpectationSet {
    /// Parse an expectation file: one fragment per non-blank line.
    pub fn parse(category: DiagnosticCategory, content: &str) -> Self {
        let fragments = content
            .lines()
            .map(|line| line.trim().to_lowercase())
            .filter(|line| !line.is_empty())
            .collect();
        Self {
            category,
            fragments,
        }
    }

    pub fn empty(category: DiagnosticCategory) -> Self {
        Self {
            category,
            fragments: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Outcome of checking expectation sets against classified output.
#[derive(Debug, Default)]
pub struct VerificationReport {
    /// Number of fragments checked.
    pub checked: usize,

    /// One `ExpectationNotFound` per fragment that was not reported.
    pub failures: Vec<HarnessError>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Check every fragment of `set` against its category's blob.
///
/// Does not stop at the first miss.
pub fn verify(set: &ExpectationSet, output: &ClassifiedOutput) -> Vec<HarnessError> {
    set.fragments
        .iter()
        .filter(|fragment| !output.contains(set.category, fragment))
        .map(|fragment| HarnessError::ExpectationNotFound {
            category: set.category,
            fragment: fragment.clone(),
        })
        .collect()
}

/// Check all sets, in order, and aggregate the misses.
pub fn verify_all(sets: &[ExpectationSet], output: &ClassifiedOutput) -> VerificationReport {
    let mut report = VerificationReport::default();
    for set in sets {
        report.checked += set.len();
        report.failures.extend(verify(set, output));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;

    fn scenario_output() -> ClassifiedOutput {
        classify("Corruption detected at 0x1000\nLeak detected at 0x2000\n").unwrap()
    }

    #[test]
    fn test_parse_trims_and_lowercases() {
        let set = ExpectationSet::parse(DiagnosticCategory::Leak, "  0xABCD \n\n\t\n0x10\n");
        assert_eq!(set.fragments, vec!["0xabcd".to_string(), "0x10".to_string()]);
    }

    #[test]
    fn test_all_expectations_found() {
        let sets = vec![
            ExpectationSet::parse(DiagnosticCategory::Corruption, "corruption detected at 0x1000\n"),
            ExpectationSet::parse(DiagnosticCategory::Leak, "leak detected at 0x2000\n"),
        ];
        let report = verify_all(&sets, &scenario_output());
        assert!(report.passed());
        assert_eq!(report.checked, 2);
    }

    #[test]
    fn test_missing_fragment_is_named() {
        let set = ExpectationSet::parse(DiagnosticCategory::Corruption, "0x1000\n0x9999\n");
        let failures = verify(&set, &scenario_output());
        assert_eq!(failures.len(), 1);
        match &failures[0] {
            HarnessError::ExpectationNotFound { category, fragment } => {
                assert_eq!(*category, DiagnosticCategory::Corruption);
                assert_eq!(fragment, "0x9999");
            }
            other => panic!("expected ExpectationNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_fragment_only_in_other_category_fails() {
        let set = ExpectationSet::parse(DiagnosticCategory::Leak, "0x1000\n");
        assert_eq!(verify(&set, &scenario_output()).len(), 1);
    }

    #[test]
    fn test_all_misses_reported_across_sets() {
        let sets = vec![
            ExpectationSet::parse(DiagnosticCategory::Corruption, "0xaaaa\n0xbbbb\n"),
            ExpectationSet::parse(DiagnosticCategory::Leak, "0xcccc\n0x2000\n"),
        ];
        let report = verify_all(&sets, &scenario_output());
        assert!(!report.passed());
        assert_eq!(report.checked, 4);
        assert_eq!(report.failures.len(), 3);
    }

    #[test]
    fn test_empty_set_passes() {
        let sets = vec![ExpectationSet::empty(DiagnosticCategory::Leak)];
        assert!(verify_all(&sets, &ClassifiedOutput::default()).passed());
    }
}
