//! Delivery coordinator: the per-request report state machine.
//!
//! ```text
//! Generate ──▶ Log lead ──▶ Deliver ──▶ Respond
//! (fatal)     (best-effort)  (optional)
//! ```
//!
//! Only **Generate** can fail the request, and only for an invalid request
//! or a document that cannot be assembled. Acquisition, retrieval and
//! generation inside it degrade instead of failing. Lead logging and email
//! each set their own status field and never affect each other or the
//! artifact.
//!
//! All collaborators are injected, so the same service backs the CLI, the
//! HTTP surface and the tests.

use anyhow::Result;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::acquire::Acquirer;
use crate::config::{BrandingConfig, Config, ReportConfig};
use crate::email::{EmailStatus, Mailer};
use crate::index::RetrievalIndex;
use crate::insight::{InsightContext, InsightGenerator};
use crate::leads::{self, LeadRecord, LeadStore};
use crate::llm::{self, GenerationParams, TextGenerator};
use crate::models::{DeliveryOutcome, Insight, ReportDraft, ReportRequest};
use crate::report;
use crate::retrieve::ContextRetriever;
use crate::synthesis::SynthesisGenerator;

/// Why a saved report could not be emailed.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Invalid report file name: '{0}'")]
    InvalidName(String),

    #[error("Report not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read report {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of the mandatory Generate state.
#[derive(Debug, Clone)]
pub struct GeneratedReport {
    pub report_id: String,
    pub draft: ReportDraft,
    pub bytes: Vec<u8>,
    pub filename: String,
    pub path: Option<PathBuf>,
    pub degraded_insights: usize,
    pub synthesis_failure: Option<String>,
}

pub struct ReportService {
    acquirer: Arc<Acquirer>,
    retriever: Arc<ContextRetriever>,
    insights: InsightGenerator,
    synthesis: SynthesisGenerator,
    leads: Arc<dyn LeadStore>,
    mailer: Mailer,
    branding: BrandingConfig,
    report: ReportConfig,
}

impl ReportService {
    /// Wire a service from explicit collaborators.
    pub fn new(
        config: &Config,
        index: Arc<RetrievalIndex>,
        acquirer: Acquirer,
        generator: Arc<dyn TextGenerator>,
        leads: Arc<dyn LeadStore>,
        mailer: Mailer,
    ) -> Self {
        let retriever = Arc::new(ContextRetriever::new(
            index,
            config.retrieval.top_k,
            config.retrieval.max_company_chars,
        ));
        Self {
            acquirer: Arc::new(acquirer),
            insights: InsightGenerator::new(
                generator.clone(),
                retriever.clone(),
                GenerationParams::from_config(&config.generation),
                config.generation.concurrency,
            ),
            synthesis: SynthesisGenerator::new(generator, retriever.clone(), config),
            retriever,
            leads,
            mailer,
            branding: config.branding.clone(),
            report: config.report.clone(),
        }
    }

    /// Wire a service from configuration. Unconfigured optional
    /// collaborators (lead log, email) become no-ops.
    pub fn from_config(config: &Config, index: Arc<RetrievalIndex>) -> Result<Self> {
        let acquirer = Acquirer::from_config(&config.acquire)?;
        let generator = llm::create_generator(&config.generation)?;

        let mut lead_config = config.leads.clone();
        lead_config.credentials_file = config.report.resolve_path(&lead_config.credentials_file);
        let leads = leads::create_lead_store(&lead_config);

        let mailer = Mailer::from_config(&config.delivery, &config.branding)?;
        Ok(Self::new(config, index, acquirer, generator, leads, mailer))
    }

    pub fn acquirer(&self) -> &Acquirer {
        &self.acquirer
    }

    pub fn index(&self) -> &Arc<RetrievalIndex> {
        self.retriever.index()
    }

    pub fn email_configured(&self) -> bool {
        self.mailer.is_configured()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.report.output_dir()
    }

    // ============ Generate ============

    /// Run acquisition, insights, synthesis and assembly. Errors only for an
    /// invalid request or a failed assembly.
    #[instrument(skip_all, fields(company = %request.company_name, persona = %request.persona))]
    pub async fn generate(&self, request: &ReportRequest) -> Result<GeneratedReport> {
        request.validate()?;
        let report_id = Uuid::new_v4().to_string();

        let company_text = match request
            .company_website
            .as_deref()
            .map(str::trim)
            .filter(|w| !w.is_empty())
        {
            Some(website) => {
                let fetched = self.acquirer.fetch(website).await;
                if let Some(reason) = fetched.reason() {
                    info!(%reason, "company site unavailable, continuing with fallback text");
                }
                Some(fetched.into_value().text)
            }
            None => None,
        };

        let ctx = InsightContext {
            persona: &request.persona,
            company_name: &request.company_name,
            company_text: company_text.as_deref(),
        };
        let outcomes = self.insights.generate_all(ctx, &request.answers).await;
        let degraded_insights = outcomes.iter().filter(|o| o.is_degraded()).count();
        let insights: Vec<Insight> = outcomes.into_iter().map(|o| o.into_value()).collect();

        let narratives: Vec<String> = insights
            .iter()
            .filter(|i| i.failure.is_none())
            .map(|i| i.insight_text.clone())
            .collect();
        let synthesis = self
            .synthesis
            .synthesize(&narratives, company_text.as_deref())
            .await;
        let synthesis_failure = synthesis.reason().map(String::from);

        let draft = ReportDraft {
            company_name: request.company_name.trim().to_string(),
            company_website: request.company_website.clone(),
            persona: request.persona.clone(),
            generated_at: Utc::now(),
            insights,
            synthesis: synthesis.into_value(),
        };

        let bytes = report::assemble(&draft, &self.branding)?;
        let filename = report::report_filename(&draft);
        let path = if self.report.save {
            match report::save_report(&self.report.output_dir(), &filename, &bytes) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!(error = %format!("{:#}", e), "report not saved");
                    None
                }
            }
        } else {
            None
        };
        // A disambiguated save path renames the artifact too.
        let filename = path
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(filename);

        info!(
            report_id = %report_id,
            insights = draft.insights.len(),
            degraded_insights,
            synthesis_degraded = synthesis_failure.is_some(),
            bytes = bytes.len(),
            "report generated"
        );

        Ok(GeneratedReport {
            report_id,
            draft,
            bytes,
            filename,
            path,
            degraded_insights,
            synthesis_failure,
        })
    }

    // ============ Full state machine ============

    /// Generate, log the lead, email when a recipient is given, respond.
    #[instrument(skip_all, fields(company = %request.company_name))]
    pub async fn run(&self, request: &ReportRequest) -> Result<DeliveryOutcome> {
        let generated = self.generate(request).await?;

        let lead_logged = self
            .leads
            .record(&LeadRecord {
                timestamp: generated.draft.generated_at,
                request,
                report_filename: &generated.filename,
            })
            .await;

        let email = self
            .mailer
            .deliver_report(
                request.recipient(),
                &generated.draft.company_name,
                &generated.draft.persona,
                &generated.bytes,
                &generated.filename,
            )
            .await;

        info!(
            report_id = %generated.report_id,
            lead_logged,
            email_sent = email.sent,
            email_status = %email.status,
            "delivery finished"
        );

        Ok(DeliveryOutcome {
            report_id: generated.report_id,
            artifact_bytes: generated.bytes,
            artifact_name: generated.filename,
            artifact_path: generated.path,
            email_sent: email.sent,
            email_status: email.status,
            lead_logged,
            synthesis_failure: generated.synthesis_failure,
        })
    }

    // ============ Deliver only ============

    /// Email a report previously saved to the output directory. `filename`
    /// must be a bare file name; paths are rejected.
    pub async fn send_existing(
        &self,
        filename: &str,
        recipient: &str,
        company_name: &str,
        persona: &str,
    ) -> Result<EmailStatus, SendError> {
        let name = filename.trim();
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
        {
            return Err(SendError::InvalidName(filename.to_string()));
        }
        let path = self.report.output_dir().join(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SendError::NotFound(path))
            }
            Err(source) => return Err(SendError::Unreadable { path, source }),
        };

        Ok(self
            .mailer
            .deliver_report(Some(recipient), company_name, persona, &bytes, name)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::PageRenderer;
    use crate::config::DeliveryConfig;
    use crate::index::SearchStrategy;
    use crate::leads::DisabledLeadStore;
    use crate::llm::GenerationError;
    use crate::models::SurveyAnswer;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::time::Duration;

    struct DownRenderer;

    #[async_trait]
    impl PageRenderer for DownRenderer {
        fn name(&self) -> &str {
            "down"
        }
        async fn render(&self, _url: &str) -> Result<String> {
            bail!("dns failure")
        }
    }

    struct FixedGenerator;

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn generate(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> std::result::Result<String, GenerationError> {
            if prompt.contains("7-8 sentence") {
                Ok("Closing narrative.".to_string())
            } else {
                Ok("Per-question insight.".to_string())
            }
        }
    }

    fn service(dir: &Path) -> ReportService {
        let mut config = Config::minimal();
        config.report.output_dir = Some(dir.to_path_buf());
        let index = Arc::new(RetrievalIndex::new(SearchStrategy::Keyword, vec![]));
        ReportService::new(
            &config,
            index,
            Acquirer::new(Arc::new(DownRenderer), Duration::from_secs(1)),
            Arc::new(FixedGenerator),
            Arc::new(DisabledLeadStore::new("test")),
            Mailer::from_config(&DeliveryConfig::default(), &config.branding).unwrap(),
        )
    }

    fn request() -> ReportRequest {
        ReportRequest {
            company_name: "Acme".into(),
            company_website: Some("acme.example".into()),
            persona: "CTO".into(),
            answers: vec![SurveyAnswer {
                question_id: "C1".into(),
                category: 'C',
                question_text: "Do you train staff on AI?".into(),
                answer_text: "No training offered".into(),
            }],
            recipient_email: None,
            client: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_generate_saves_and_names_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let generated = svc.generate(&request()).await.unwrap();
        assert!(generated.filename.starts_with("Acme_CTO_"));
        assert!(generated.filename.ends_with(".pdf"));
        assert_eq!(generated.path.as_deref(), Some(dir.path().join(&generated.filename).as_path()));
        assert_eq!(generated.draft.synthesis, "Closing narrative.");
        assert_eq!(generated.degraded_insights, 0);
        assert!(generated.synthesis_failure.is_none());
    }

    #[tokio::test]
    async fn test_invalid_request_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let mut req = request();
        req.answers.clear();
        assert!(svc.run(&req).await.is_err());
        req = request();
        req.company_name = "  ".into();
        assert!(svc.generate(&req).await.is_err());
    }

    #[tokio::test]
    async fn test_run_without_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        let outcome = svc.run(&request()).await.unwrap();
        assert!(!outcome.artifact_bytes.is_empty());
        assert!(!outcome.email_sent);
        assert_eq!(outcome.email_status, "Email not requested");
        assert!(!outcome.lead_logged);
    }

    #[tokio::test]
    async fn test_send_existing_rejects_paths() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path());
        for bad in ["../etc/passwd", "a/b.pdf", "a\\b.pdf", ""] {
            let err = svc.send_existing(bad, "a@b.example", "Acme", "CTO").await.unwrap_err();
            assert!(matches!(err, SendError::InvalidName(_)), "{}", err);
        }
        let missing = svc
            .send_existing("missing.pdf", "a@b.example", "Acme", "CTO")
            .await
            .unwrap_err();
        assert!(matches!(missing, SendError::NotFound(ref p) if p.ends_with("missing.pdf")));
    }

    #[tokio::test]
    async fn test_send_existing_reports_unconfigured() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("r.pdf"), b"%PDF").unwrap();
        let svc = service(dir.path());
        let status = svc
            .send_existing("r.pdf", "a@b.example", "Acme", "CTO")
            .await
            .unwrap();
        assert!(!status.sent);
        assert_eq!(
            status.status,
            "Email delivery not configured: MAILGUN_API_KEY is not set"
        );
    }
}
