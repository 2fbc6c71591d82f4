//! Best-effort report delivery by email (Mailgun).
//!
//! Delivery never fails the pipeline. Every path ends in an
//! [`EmailStatus`] whose `status` string is shown to the caller:
//!
//! | Situation | Status |
//! |-----------|--------|
//! | no recipient | `Email not requested` |
//! | key or domain missing | `Email delivery not configured: <VAR> is not set` |
//! | key or domain is a placeholder | `Email delivery not configured: <VAR> is a placeholder value` |
//! | accepted by Mailgun | `Report sent to <address>` |
//! | transport or API error | `Email delivery failed: <message>` |

use anyhow::{bail, Context, Result};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{BrandingConfig, DeliveryConfig};

const PLACEHOLDER_KEY: &str = "your_mailgun_api_key_here";
const PLACEHOLDER_DOMAIN: &str = "your_domain.com";

/// Why an email was not attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmailSkip {
    #[error("Email not requested")]
    NoRecipient,
    #[error("Email delivery not configured: {0} is not set")]
    MissingCredential(String),
    #[error("Email delivery not configured: MAILGUN_DOMAIN is not set")]
    MissingDomain,
    #[error("Email delivery not configured: {0} is a placeholder value")]
    PlaceholderCredential(String),
    #[error("Email delivery not configured: MAILGUN_DOMAIN is a placeholder value")]
    PlaceholderDomain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailStatus {
    pub sent: bool,
    pub status: String,
    pub provider_message_id: Option<String>,
}

impl EmailStatus {
    fn skipped(reason: &EmailSkip) -> Self {
        Self {
            sent: false,
            status: reason.to_string(),
            provider_message_id: None,
        }
    }

    fn failed(message: impl std::fmt::Display) -> Self {
        Self {
            sent: false,
            status: format!("Email delivery failed: {}", message),
            provider_message_id: None,
        }
    }
}

pub struct Attachment<'a> {
    pub filename: &'a str,
    pub content: &'a [u8],
    pub content_type: &'a str,
}

pub struct OutgoingEmail<'a> {
    pub to: &'a str,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub attachments: Vec<Attachment<'a>>,
}

// ============ Mailgun client ============

#[derive(Deserialize)]
struct MailgunResponse {
    #[serde(default)]
    id: Option<String>,
}

pub struct MailgunClient {
    client: reqwest::Client,
    messages_url: String,
    api_key: String,
    from: String,
}

/// The API key and domain, or why they cannot be used.
pub fn mailgun_credentials(config: &DeliveryConfig) -> std::result::Result<(String, String), EmailSkip> {
    let api_key = match config.api_key.as_deref().map(str::trim) {
        None | Some("") => return Err(EmailSkip::MissingCredential(config.api_key_env.clone())),
        Some(PLACEHOLDER_KEY) => {
            return Err(EmailSkip::PlaceholderCredential(config.api_key_env.clone()))
        }
        Some(key) => key.to_string(),
    };
    let domain = match config.domain.as_deref().map(str::trim) {
        None | Some("") => return Err(EmailSkip::MissingDomain),
        Some(PLACEHOLDER_DOMAIN) => return Err(EmailSkip::PlaceholderDomain),
        Some(domain) => domain.to_string(),
    };
    Ok((api_key, domain))
}

impl MailgunClient {
    pub fn new(config: &DeliveryConfig, api_key: String, domain: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            messages_url: format!(
                "{}/{}/messages",
                config.base_url.trim_end_matches('/'),
                domain
            ),
            api_key,
            from: format!("{} <{}>", config.sender_name, config.sender_email),
        })
    }

    /// Sends one message; the provider message id on success.
    pub async fn send(&self, email: &OutgoingEmail<'_>) -> Result<Option<String>> {
        let mut form = Form::new()
            .text("from", self.from.clone())
            .text("to", email.to.to_string())
            .text("subject", email.subject.clone())
            .text("html", email.html.clone())
            .text("text", email.text.clone());
        for attachment in &email.attachments {
            let part = Part::bytes(attachment.content.to_vec())
                .file_name(attachment.filename.to_string())
                .mime_str(attachment.content_type)
                .context("Invalid attachment content type")?;
            form = form.part("attachment", part);
        }

        let resp = self
            .client
            .post(&self.messages_url)
            .basic_auth("api", Some(&self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("Email sending timed out")
                } else {
                    anyhow::anyhow!("Request error: {}", e)
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Mailgun returned {}: {}", status.as_u16(), body.trim());
        }
        let parsed: MailgunResponse = resp.json().await.unwrap_or(MailgunResponse { id: None });
        Ok(parsed.id)
    }
}

// ============ Report mailer ============

enum MailerState {
    Ready(MailgunClient),
    Unconfigured(EmailSkip),
}

/// Sends generated reports. Constructed once; a missing configuration is
/// remembered and reported on every delivery attempt.
pub struct Mailer {
    state: MailerState,
    branding: BrandingConfig,
}

impl Mailer {
    pub fn from_config(delivery: &DeliveryConfig, branding: &BrandingConfig) -> Result<Self> {
        let state = match mailgun_credentials(delivery) {
            Ok((key, domain)) => MailerState::Ready(MailgunClient::new(delivery, key, &domain)?),
            Err(skip) => {
                warn!(reason = %skip, "email delivery disabled");
                MailerState::Unconfigured(skip)
            }
        };
        Ok(Self {
            state,
            branding: branding.clone(),
        })
    }

    pub fn is_configured(&self) -> bool {
        matches!(self.state, MailerState::Ready(_))
    }

    pub async fn deliver_report(
        &self,
        recipient: Option<&str>,
        company_name: &str,
        persona: &str,
        pdf: &[u8],
        filename: &str,
    ) -> EmailStatus {
        let Some(to) = recipient.map(str::trim).filter(|r| !r.is_empty()) else {
            return EmailStatus::skipped(&EmailSkip::NoRecipient);
        };
        let client = match &self.state {
            MailerState::Ready(client) => client,
            MailerState::Unconfigured(skip) => return EmailStatus::skipped(skip),
        };

        let email = OutgoingEmail {
            to,
            subject: report_subject(company_name),
            html: report_html(&self.branding, company_name, persona),
            text: report_text(&self.branding, company_name, persona),
            attachments: vec![Attachment {
                filename,
                content: pdf,
                content_type: "application/pdf",
            }],
        };

        match client.send(&email).await {
            Ok(id) => {
                info!(to = %to, company = %company_name, "report emailed");
                EmailStatus {
                    sent: true,
                    status: format!("Report sent to {}", to),
                    provider_message_id: id,
                }
            }
            Err(e) => {
                warn!(to = %to, error = %e, "report email failed");
                EmailStatus::failed(e)
            }
        }
    }
}

pub fn report_subject(company_name: &str) -> String {
    format!("Your AI Readiness Assessment Report - {}", company_name)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const REPORT_CONTENTS: [&str; 4] = [
    "Comprehensive CARE framework analysis",
    "Strategic insights tailored to your organization",
    "Actionable recommendations for AI implementation",
    "Next steps for your AI transformation journey",
];

fn report_html(branding: &BrandingConfig, company_name: &str, persona: &str) -> String {
    let provider = escape_html(&branding.provider_name);
    let items: String = REPORT_CONTENTS
        .iter()
        .map(|item| format!("<li style=\"margin-bottom: 8px;\">{}</li>", item))
        .collect();
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Your AI Readiness Report</title></head>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333; margin: 0; background-color: #f4f4f4;">
<div style="max-width: 600px; margin: 0 auto; background-color: white;">
<div style="background-color: #0A3161; color: white; padding: 30px 40px; text-align: center;">
<h1 style="margin: 0; font-size: 28px;">{provider}</h1>
<p style="margin: 10px 0 0 0; font-size: 16px;">{tagline}</p>
</div>
<div style="background-color: #FFA500; height: 5px;"></div>
<div style="padding: 40px;">
<h2 style="color: #0A3161; margin-top: 0;">Your AI Readiness Assessment Report</h2>
<p>Dear {persona},</p>
<p>Thank you for completing the {provider} AI Readiness Assessment for <strong>{company}</strong>.
Your personalized report is attached to this email.</p>
<div style="background-color: #f8f9fa; border-left: 4px solid #FFA500; padding: 20px; margin: 30px 0;">
<h3 style="color: #0A3161; margin-top: 0;">What's inside your report</h3>
<ul>{items}</ul>
</div>
<p style="text-align: center;"><a href="{consultation}" style="background-color: #FFA500; color: white; padding: 15px 30px; text-decoration: none; border-radius: 5px; font-weight: bold;">Schedule Strategy Session</a></p>
</div>
<div style="background-color: #0A3161; color: white; padding: 30px 40px; text-align: center; font-size: 14px;">
<p>Email: {email} | Phone: {phone}</p>
<p>Website: <a href="{website}" style="color: #FFA500;">{website}</a></p>
</div>
</div>
</body>
</html>"#,
        provider = provider,
        tagline = escape_html(&branding.tagline),
        persona = escape_html(persona),
        company = escape_html(company_name),
        items = items,
        consultation = escape_html(&branding.consultation_link),
        email = escape_html(&branding.email),
        phone = escape_html(&branding.phone),
        website = escape_html(&branding.website),
    )
}

fn report_text(branding: &BrandingConfig, company_name: &str, persona: &str) -> String {
    let items: String = REPORT_CONTENTS
        .iter()
        .map(|item| format!("- {}\n", item))
        .collect();
    format!(
        "Dear {persona},\n\n\
         Thank you for completing the {provider} AI Readiness Assessment for {company}. \
         Your personalized report is attached to this email.\n\n\
         What's inside your report:\n{items}\n\
         Schedule a strategy session: {consultation}\n\n\
         {provider}\nEmail: {email}\nPhone: {phone}\nWebsite: {website}\n",
        persona = persona,
        provider = branding.provider_name,
        company = company_name,
        items = items,
        consultation = branding.consultation_link,
        email = branding.email,
        phone = branding.phone,
        website = branding.website,
    )
}
