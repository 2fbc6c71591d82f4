//! Context retrieval for prompt grounding.
//!
//! Combines the company text acquired for the current request with the
//! top-k knowledge-base hits for a query. Company text always comes first.
//! Sites indexed for other companies never appear in the knowledge list.

use std::sync::Arc;

use crate::index::RetrievalIndex;
use crate::models::Outcome;

/// Grounding text for one query.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub company_text: Option<String>,
    pub knowledge: Vec<String>,
}

pub struct ContextRetriever {
    index: Arc<RetrievalIndex>,
    k: usize,
    max_company_chars: usize,
}

impl ContextRetriever {
    pub fn new(index: Arc<RetrievalIndex>, k: usize, max_company_chars: usize) -> Self {
        Self {
            index,
            k,
            max_company_chars,
        }
    }

    pub fn index(&self) -> &Arc<RetrievalIndex> {
        &self.index
    }

    /// Ground `query` for a report about `company_name`. Index degradation
    /// is absorbed here: the knowledge list then holds keyword hits or
    /// default sentences.
    pub async fn retrieve(
        &self,
        query: &str,
        company_name: &str,
        company_text: Option<&str>,
    ) -> RetrievedContext {
        let knowledge = self
            .index
            .search_knowledge(Some(company_name), query, self.k)
            .await
            .into_value()
            .into_iter()
            .map(|hit| hit.content)
            .collect();

        RetrievedContext {
            company_text: company_text
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| truncate_chars(t, self.max_company_chars).to_string()),
            knowledge,
        }
    }

    /// Snippets from one namespace, e.g. the provider's own service catalog.
    pub async fn namespace_context(
        &self,
        namespace: &str,
        query: &str,
        k: usize,
    ) -> Outcome<Vec<String>> {
        self.index
            .search_namespace(namespace, query, k)
            .await
            .map(|hits| hits.into_iter().map(|h| h.content).collect())
    }
}

/// Longest prefix of `text` with at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}
