//! Diagnostic artifact classification.
//!
//! Every non-blank line the allocator writes must carry one of the category
//! tokens in [`TOKEN_TABLE`]. Categories are tried in table order and the
//! first match wins, so a line mentioning both tokens is a corruption.
//! Anything else means the artifact format is not what the harness was
//! built against, and classification stops with
//! [`HarnessError::UnclassifiedLine`].

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// Version of the recognized token table. Bump when [`TOKEN_TABLE`] changes.
pub const CLASSIFIER_VERSION: u32 = 1;

/// Category tokens, matched case-insensitively, in priority order.
pub const TOKEN_TABLE: &[(DiagnosticCategory, &[&str])] = &[
    (DiagnosticCategory::Corruption, &["corruption"]),
    (DiagnosticCategory::Leak, &["leak"]),
];

/// Kind of heap defect a diagnostic line reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCategory {
    /// Write past an allocation's guarded region.
    Corruption,

    /// Allocation never released before exit.
    Leak,
}

impl DiagnosticCategory {
    /// All categories in classification order.
    pub const ALL: [DiagnosticCategory; 2] = [DiagnosticCategory::Corruption, DiagnosticCategory::Leak];

    pub fn name(&self) -> &'static str {
        match self {
            DiagnosticCategory::Corruption => "corruption",
            DiagnosticCategory::Leak => "leak",
        }
    }

    /// Noun used in human-readable failure messages.
    pub fn noun(&self) -> &'static str {
        self.name()
    }

    /// Tokens that select this category.
    pub fn tokens(&self) -> &'static [&'static str] {
        TOKEN_TABLE
            .iter()
            .find(|(category, _)| category == self)
            .map(|(_, tokens)| *tokens)
            .unwrap_or(&[])
    }

    /// Categorize a single line, or `None` if no token matches.
    pub fn of_line(line: &str) -> Option<DiagnosticCategory> {
        let lowered = line.to_lowercase();
        TOKEN_TABLE
            .iter()
            .find(|(_, tokens)| tokens.iter().any(|t| lowered.contains(t)))
            .map(|(category, _)| *category)
    }
}

impl std::fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One classified line of the diagnostic artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    /// 1-based line number in the artifact.
    pub line_no: usize,
    pub category: DiagnosticCategory,
    /// Line text as written, without the line terminator.
    pub text: String,
}

/// All records of one artifact, with one accumulated blob per category.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedOutput {
    records: Vec<DiagnosticRecord>,
    corruptions: String,
    leaks: String,
    corruptions_lower: String,
    leaks_lower: String,
}

impl ClassifiedOutput {
    fn push(&mut self, record: DiagnosticRecord) {
        let (blob, lower) = match record.category {
            DiagnosticCategory::Corruption => (&mut self.corruptions, &mut self.corruptions_lower),
            DiagnosticCategory::Leak => (&mut self.leaks, &mut self.leaks_lower),
        };
        blob.push_str(&record.text);
        blob.push('\n');
        lower.push_str(&record.text.to_lowercase());
        lower.push('\n');
        self.records.push(record);
    }

    pub fn records(&self) -> &[DiagnosticRecord] {
        &self.records
    }

    /// Accumulated text of a category, case preserved, in artifact order.
    pub fn blob(&self, category: DiagnosticCategory) -> &str {
        match category {
            DiagnosticCategory::Corruption => &self.corruptions,
            DiagnosticCategory::Leak => &self.leaks,
        }
    }

    /// Case-insensitive substring test against one category's blob.
    pub fn contains(&self, category: DiagnosticCategory, fragment: &str) -> bool {
        let lower = match category {
            DiagnosticCategory::Corruption => &self.corruptions_lower,
            DiagnosticCategory::Leak => &self.leaks_lower,
        };
        lower.contains(&fragment.to_lowercase())
    }

    pub fn count(&self, category: DiagnosticCategory) -> usize {
        self.records.iter().filter(|r| r.category == category).count()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Classify the raw diagnostic artifact.
///
/// Blank lines are skipped. The first line that matches no category aborts
/// classification and is returned verbatim in the error.
pub fn classify(content: &str) -> HarnessResult<ClassifiedOutput> {
    let mut output = ClassifiedOutput::default();

    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let category = DiagnosticCategory::of_line(line).ok_or_else(|| {
            HarnessError::UnclassifiedLine {
                line: line.trim().to_string(),
            }
        })?;
        output.push(DiagnosticRecord {
            line_no: idx + 1,
            category,
            text: line.to_string(),
        });
    }

    Ok(output)
}
