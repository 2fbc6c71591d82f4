//! Knowledge-base ingestion.
//!
//! Acquires one or more pages, concatenates their text, chunks it and
//! rebuilds a namespace of the retrieval index. Used to load the provider's
//! own service catalog (namespace `provider`) and, optionally, reference
//! material for other companies.
//!
//! Pages that could not be acquired are skipped rather than indexed as
//! placeholder text. Ingestion fails only when nothing usable is left.

use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::acquire::Acquirer;
use crate::chunk::Chunker;
use crate::index::RetrievalIndex;

/// Combined text shorter than this is treated as an acquisition failure.
pub const MIN_CONTENT_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub namespace: String,
    pub pages_acquired: usize,
    pub pages_skipped: usize,
    pub chunks: usize,
}

pub async fn ingest_sites(
    acquirer: &Acquirer,
    chunker: &Chunker,
    index: &RetrievalIndex,
    namespace: &str,
    company: &str,
    urls: &[String],
) -> Result<IngestReport> {
    if urls.is_empty() {
        bail!("No URLs given for namespace '{}'", namespace);
    }

    let mut sections = Vec::new();
    let mut skipped = 0;
    for url in urls {
        let fetched = acquirer.fetch(url).await;
        if let Some(reason) = fetched.reason() {
            warn!(url = %url, %reason, "skipping page");
            skipped += 1;
            continue;
        }
        let doc = fetched.into_value();
        sections.push(format!("From {}:\n{}", doc.source_url, doc.text));
    }

    let combined = sections.join("\n\n");
    if combined.chars().count() < MIN_CONTENT_CHARS {
        bail!(
            "No usable content for namespace '{}' ({} of {} pages failed)",
            namespace,
            skipped,
            urls.len()
        );
    }

    let source_url = if urls.len() == 1 {
        urls[0].clone()
    } else {
        urls.join(" ")
    };
    let mut metadata = BTreeMap::new();
    metadata.insert("company".to_string(), company.to_string());
    metadata.insert("source_url".to_string(), source_url);

    let chunks = chunker.split(&combined, &metadata);
    let stored = index.build(namespace, chunks).await?;

    info!(
        namespace,
        pages = sections.len(),
        skipped,
        chunks = stored,
        "namespace ingested"
    );
    Ok(IngestReport {
        namespace: namespace.to_string(),
        pages_acquired: sections.len(),
        pages_skipped: skipped,
        chunks: stored,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::PageRenderer;
    use crate::index::SearchStrategy;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    /// Serves a fixed page per URL; unknown URLs fail.
    struct MapRenderer(BTreeMap<String, String>);

    #[async_trait]
    impl PageRenderer for MapRenderer {
        fn name(&self) -> &str {
            "map"
        }
        async fn render(&self, url: &str) -> anyhow::Result<String> {
            self.0
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("connection refused"))
        }
    }

    fn acquirer(pages: &[(&str, &str)]) -> Acquirer {
        let map = pages
            .iter()
            .map(|(u, html)| (u.to_string(), html.to_string()))
            .collect();
        Acquirer::new(Arc::new(MapRenderer(map)), Duration::from_secs(5))
    }

    const SERVICES: &str = "<main><p>We deliver AI literacy workshops for leadership teams and \
        build data readiness assessments, governance frameworks and pilot programs.</p></main>";

    #[tokio::test]
    async fn test_ingest_skips_failed_pages() {
        let acq = acquirer(&[("https://beacon.example", SERVICES)]);
        let index = RetrievalIndex::new(SearchStrategy::Keyword, vec![]);
        let report = ingest_sites(
            &acq,
            &Chunker::default(),
            &index,
            "provider",
            "Beacon",
            &["beacon.example".to_string(), "https://down.example".to_string()],
        )
        .await
        .unwrap();

        assert_eq!(report.pages_acquired, 1);
        assert_eq!(report.pages_skipped, 1);
        assert!(report.chunks >= 1);
        assert_eq!(index.namespaces(), vec![("provider".to_string(), report.chunks)]);

        let hits = index
            .search_namespace("provider", "literacy workshops", 2)
            .await
            .into_value();
        assert!(hits[0].content.starts_with("From https://beacon.example:"));
        assert_eq!(hits[0].metadata["company"], "Beacon");
        assert_eq!(
            hits[0].metadata["source_url"],
            "beacon.example https://down.example"
        );
    }

    #[tokio::test]
    async fn test_ingest_rejects_thin_content() {
        let acq = acquirer(&[("https://thin.example", "<p>Hi</p>")]);
        let index = RetrievalIndex::new(SearchStrategy::Keyword, vec![]);
        let err = ingest_sites(
            &acq,
            &Chunker::default(),
            &index,
            "provider",
            "Thin",
            &["https://thin.example".to_string()],
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("No usable content"));
        assert!(index.is_empty());
    }
}
