//! Closing recommendation narrative.
//!
//! Aggregates every insight with the provider's service catalog (retrieved
//! from the provider namespace with a fixed capability query) and the
//! company's own text. Never fails: a generation error yields a degraded
//! outcome whose text is the diagnostic, so the recommendations section is
//! still rendered.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::llm::{self, GenerationParams, TextGenerator};
use crate::models::Outcome;
use crate::prompt::{build_synthesis_prompt, SynthesisPrompt};
use crate::retrieve::{truncate_chars, ContextRetriever};

pub struct SynthesisGenerator {
    generator: Arc<dyn TextGenerator>,
    retriever: Arc<ContextRetriever>,
    params: GenerationParams,
    provider_name: String,
    service_namespace: String,
    service_query: String,
    service_k: usize,
    max_company_chars: usize,
}

impl SynthesisGenerator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        retriever: Arc<ContextRetriever>,
        config: &Config,
    ) -> Self {
        Self {
            generator,
            retriever,
            params: GenerationParams::from_config(&config.generation),
            provider_name: config.branding.provider_name.clone(),
            service_namespace: config.retrieval.service_namespace.clone(),
            service_query: config.retrieval.service_query.clone(),
            service_k: config.retrieval.service_k,
            max_company_chars: config.retrieval.max_company_chars,
        }
    }

    pub async fn synthesize(&self, insights: &[String], company_text: Option<&str>) -> Outcome<String> {
        let services = self
            .retriever
            .namespace_context(&self.service_namespace, &self.service_query, self.service_k)
            .await;
        if let Some(reason) = services.reason() {
            info!(%reason, "service context degraded");
        }
        let services = services.into_value();

        let prompt = build_synthesis_prompt(&SynthesisPrompt {
            provider_name: &self.provider_name,
            insights,
            company_text: company_text.map(|t| truncate_chars(t, self.max_company_chars)),
            service_context: &services,
        });

        match self.generator.generate(&prompt, &self.params).await {
            Ok(text) => Outcome::Ok(text),
            Err(e) => {
                warn!(error = %e, "synthesis generation failed");
                Outcome::degraded(e.to_string(), llm::diagnostic(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{RetrievalIndex, SearchStrategy};
    use crate::llm::GenerationError;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records prompts; answers with a fixed result.
    struct RecordingGenerator {
        prompts: Mutex<Vec<String>>,
        result: Result<String, GenerationError>,
    }

    #[async_trait]
    impl TextGenerator for RecordingGenerator {
        fn name(&self) -> &str {
            "recording"
        }
        async fn generate(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.result.clone()
        }
    }

    async fn synthesizer(result: Result<String, GenerationError>) -> (SynthesisGenerator, Arc<RecordingGenerator>) {
        let index = RetrievalIndex::new(SearchStrategy::Keyword, vec!["fallback".into()]);
        index
            .build(
                "provider",
                vec![Chunk {
                    content: "AI consulting services for culture change.".into(),
                    metadata: BTreeMap::new(),
                    hash: String::new(),
                }],
            )
            .await
            .unwrap();
        let retriever = Arc::new(ContextRetriever::new(Arc::new(index), 4, 2000));
        let generator = Arc::new(RecordingGenerator {
            prompts: Mutex::new(Vec::new()),
            result,
        });
        (
            SynthesisGenerator::new(generator.clone(), retriever, &Config::minimal()),
            generator,
        )
    }

    #[tokio::test]
    async fn test_synthesis_uses_service_context() {
        let (synth, recorder) = synthesizer(Ok("Your roadmap starts now.".into())).await;
        let out = synth
            .synthesize(&["You lack training.".to_string()], Some("Acme builds anvils."))
            .await;
        assert_eq!(out, Outcome::Ok("Your roadmap starts now.".to_string()));

        let prompts = recorder.prompts.lock().unwrap();
        assert!(prompts[0].contains("AI consulting services for culture change."));
        assert!(prompts[0].contains("- You lack training."));
        assert!(prompts[0].contains("Acme builds anvils."));
    }

    #[tokio::test]
    async fn test_empty_insights_and_failure_still_return_text() {
        let (synth, _) = synthesizer(Err(GenerationError::EmptyCompletion)).await;
        let out = synth.synthesize(&[], None).await;
        assert!(out.is_degraded());
        assert_eq!(
            out.value(),
            "LLM generation failed: endpoint returned an empty completion"
        );
    }
}
