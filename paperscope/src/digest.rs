use crate::types::SummaryFragment;

/// Separator placed between subject sections.
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Fragments belonging to one arXiv subject.
#[derive(Debug, Clone)]
pub struct SubjectSection {
    pub subject: String,
    pub fragments: Vec<SummaryFragment>,
}

impl SubjectSection {
    pub fn render(&self) -> String {
        if self.fragments.is_empty() {
            return format!("# No papers found for {}\n", self.subject);
        }
        let bodies: Vec<&str> = self.fragments.iter().map(|f| f.body.as_str()).collect();
        format!(
            "# Latest arXiv Papers for {}\n\n{}",
            self.subject,
            bodies.join("\n\n")
        )
    }
}

/// The aggregated markdown digest of one run.
#[derive(Debug, Clone)]
pub struct AggregatedDocument {
    /// Scope shown in the delivery banner, e.g. "arXiv astro-ph.GA"
    pub scope: String,
    pub sections: Vec<SubjectSection>,
}

impl AggregatedDocument {
    pub fn new(scope: impl Into<String>, sections: Vec<SubjectSection>) -> Self {
        Self {
            scope: scope.into(),
            sections,
        }
    }

    pub fn fragment_count(&self) -> usize {
        self.sections.iter().map(|s| s.fragments.len()).sum()
    }

    pub fn fragments(&self) -> impl Iterator<Item = &SummaryFragment> {
        self.sections.iter().flat_map(|s| s.fragments.iter())
    }

    /// Markdown: one `#` heading per subject, `##` per paper, sections split by `---`.
    pub fn to_markdown(&self) -> String {
        self.sections
            .iter()
            .map(SubjectSection::render)
            .collect::<Vec<_>>()
            .join(SECTION_SEPARATOR)
    }
}
