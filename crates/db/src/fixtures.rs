/// A support article seeded into an empty vector store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedDocument {
    pub topic: &'static str,
    pub text: &'static str,
}

pub const DEFAULT_DOCUMENTS: &[SeedDocument] = &[
    SeedDocument {
        topic: "templates",
        text: "To duplicate a Notion template, click the \"Duplicate\" button in the top right corner \
               of the template page. Select \"Include content\" to copy everything the template contains.",
    },
    SeedDocument {
        topic: "troubleshooting",
        text: "If Notion is not loading, clear your browser cache and cookies or try a different browser.",
    },
    SeedDocument {
        topic: "languages",
        text: "Notion supports multiple languages. Change the language under \
               Settings & Members > My account > Language & region.",
    },
    SeedDocument {
        topic: "sharing",
        text: "To share a Notion page, click the \"Share\" button in the top right corner and enter the \
               email addresses of the people to share with.",
    },
    SeedDocument {
        topic: "billing",
        text: "The Notion free plan includes unlimited pages and blocks for personal use, with limits on \
               collaboration features.",
    },
];

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::DEFAULT_DOCUMENTS;

    #[test]
    fn default_documents_have_distinct_topics() {
        let topics: HashSet<_> = DEFAULT_DOCUMENTS.iter().map(|doc| doc.topic).collect();
        assert_eq!(topics.len(), DEFAULT_DOCUMENTS.len());
        assert!(DEFAULT_DOCUMENTS.iter().all(|doc| !doc.text.trim().is_empty()));
    }
}
