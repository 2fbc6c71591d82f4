//! Per-question insight generation.
//!
//! Each answer is grounded, prompted and generated independently. Answers
//! are fanned out with bounded concurrency and results come back in input
//! order. A failed generation yields a degraded insight whose text is the
//! diagnostic; it never affects the other answers.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::{self, GenerationParams, TextGenerator};
use crate::models::{Insight, Outcome, SurveyAnswer};
use crate::prompt::{build_insight_prompt, InsightPrompt};
use crate::retrieve::ContextRetriever;

/// Request-level facts shared by every insight in a report.
#[derive(Debug, Clone, Copy)]
pub struct InsightContext<'a> {
    pub persona: &'a str,
    pub company_name: &'a str,
    pub company_text: Option<&'a str>,
}

pub struct InsightGenerator {
    generator: Arc<dyn TextGenerator>,
    retriever: Arc<ContextRetriever>,
    params: GenerationParams,
    concurrency: usize,
}

impl InsightGenerator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        retriever: Arc<ContextRetriever>,
        params: GenerationParams,
        concurrency: usize,
    ) -> Self {
        Self {
            generator,
            retriever,
            params,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn generate_one(
        &self,
        ctx: InsightContext<'_>,
        answer: &SurveyAnswer,
    ) -> Outcome<Insight> {
        let grounding = self
            .retriever
            .retrieve(&answer.question_text, ctx.company_name, ctx.company_text)
            .await;
        let prompt = build_insight_prompt(&InsightPrompt {
            persona: ctx.persona,
            company_name: ctx.company_name,
            category: answer.category(),
            question: &answer.question_text,
            answer: &answer.answer_text,
            company_background: grounding.company_text.as_deref(),
            knowledge: &grounding.knowledge,
        });

        let insight = |text: String, failure: Option<String>| Insight {
            question_id: answer.question_id.clone(),
            category: answer.category,
            question_text: answer.question_text.clone(),
            answer_text: answer.answer_text.clone(),
            insight_text: text,
            failure,
        };

        match self.generator.generate(&prompt, &self.params).await {
            Ok(text) => {
                debug!(question_id = %answer.question_id, chars = text.len(), "insight generated");
                Outcome::Ok(insight(text, None))
            }
            Err(e) => {
                warn!(question_id = %answer.question_id, error = %e, "insight generation failed");
                let reason = e.to_string();
                Outcome::degraded(reason.clone(), insight(llm::diagnostic(&e), Some(reason)))
            }
        }
    }

    /// One outcome per answer, in answer order.
    pub async fn generate_all(
        &self,
        ctx: InsightContext<'_>,
        answers: &[SurveyAnswer],
    ) -> Vec<Outcome<Insight>> {
        // Collected first: axum handlers need a future general over lifetimes.
        let pending: Vec<_> = answers
            .iter()
            .map(|answer| self.generate_one(ctx, answer))
            .collect();
        stream::iter(pending)
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{RetrievalIndex, SearchStrategy};
    use crate::llm::GenerationError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes the answer line of the prompt; fails when the answer says FAIL.
    #[derive(Default)]
    struct EchoGenerator {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        fn name(&self) -> &str {
            "echo"
        }
        async fn generate(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<String, GenerationError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let answer = prompt
                .lines()
                .find_map(|l| l.strip_prefix("Their answer: "))
                .unwrap_or_default();
            if answer == "FAIL" {
                Err(GenerationError::Auth("HTTP 401".into()))
            } else {
                Ok(format!("Insight for {}", answer))
            }
        }
    }

    fn answers(values: &[&str]) -> Vec<SurveyAnswer> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| SurveyAnswer {
                question_id: format!("C{}", i + 1),
                category: 'C',
                question_text: format!("Question {}", i + 1),
                answer_text: v.to_string(),
            })
            .collect()
    }

    fn generator(echo: Arc<EchoGenerator>, concurrency: usize) -> InsightGenerator {
        let index = Arc::new(RetrievalIndex::new(SearchStrategy::Keyword, vec![]));
        let retriever = Arc::new(ContextRetriever::new(index, 4, 2000));
        InsightGenerator::new(echo, retriever, GenerationParams::default(), concurrency)
    }

    const CTX: InsightContext<'static> = InsightContext {
        persona: "CTO",
        company_name: "Acme",
        company_text: None,
    };

    #[tokio::test]
    async fn test_single_failure_is_isolated() {
        let gen = generator(Arc::new(EchoGenerator::default()), 3);
        let out = gen
            .generate_all(CTX, &answers(&["one", "FAIL", "three", "four"]))
            .await;

        assert_eq!(out.len(), 4);
        let ids: Vec<&str> = out.iter().map(|o| o.value().question_id.as_str()).collect();
        assert_eq!(ids, vec!["C1", "C2", "C3", "C4"]);

        assert!(out[1].is_degraded());
        assert!(out[1]
            .value()
            .insight_text
            .starts_with("LLM generation failed: authentication rejected"));
        for i in [0, 2, 3] {
            assert!(!out[i].is_degraded());
            assert!(out[i].value().failure.is_none());
        }
        assert_eq!(out[2].value().insight_text, "Insight for three");
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let echo = Arc::new(EchoGenerator::default());
        let gen = generator(echo.clone(), 2);
        let out = gen
            .generate_all(CTX, &answers(&["a", "b", "c", "d", "e", "f"]))
            .await;
        assert_eq!(out.len(), 6);
        assert!(echo.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let gen = generator(Arc::new(EchoGenerator::default()), 2);
        assert!(gen.generate_all(CTX, &[]).await.is_empty());
    }
}
