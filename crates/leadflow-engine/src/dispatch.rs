//! Mail dispatch — the outbound boundary the scheduler talks to.
//!
//! `MailDispatcher` is the collaborator contract; `SmtpMailer` is the real
//! async SMTP implementation and `MemoryMailer` records sends for dry-runs,
//! test-sends, and tests. Dispatch failures are returned, never retried here.

use async_trait::async_trait;
use leadflow_core::config::SmtpConfig;
use leadflow_core::{EngineError, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// Result of one send attempt.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn ok(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Outbound mail collaborator. One call per recipient; batching strategies
/// live behind this same trait.
#[async_trait]
pub trait MailDispatcher: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> SendOutcome;
}

/// Render `{{var}}` placeholders from the variable map; placeholders with no
/// binding are stripped.
pub fn render_template(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    strip_unresolved(&out)
}

/// Remove any `{{...}}` placeholder left after substitution.
fn strip_unresolved(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        match rest[open..].find("}}") {
            Some(close) => rest = &rest[open + close + 2..],
            None => {
                // Unterminated placeholder, keep the tail verbatim.
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Async SMTP dispatcher (lettre).
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    async fn send_smtp(&self, to: &str, subject: &str, html_body: &str) -> Result<()> {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message, message::Mailbox,
            message::header::ContentType, transport::smtp::authentication::Credentials,
        };

        let from_name = self.config.display_name.as_deref().unwrap_or("LeadFlow");
        let from: Mailbox = format!("{from_name} <{}>", self.config.from_address)
            .parse()
            .map_err(|e| EngineError::Dispatch(format!("Invalid from: {e}")))?;
        let to: Mailbox = to
            .parse()
            .map_err(|e| EngineError::Dispatch(format!("Invalid to: {e}")))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| EngineError::Dispatch(format!("Build email: {e}")))?;

        let creds = Credentials::new(self.config.username.clone(), self.config.password.clone());
        let mailer = AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.config.host)
            .map_err(|e| EngineError::Dispatch(format!("SMTP relay: {e}")))?
            .port(self.config.port)
            .credentials(creds)
            .timeout(Some(std::time::Duration::from_secs(self.config.timeout_secs)))
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| EngineError::Dispatch(format!("SMTP send: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl MailDispatcher for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> SendOutcome {
        match self.send_smtp(to, subject, html_body).await {
            Ok(()) => {
                tracing::info!("📤 Email sent to {to}");
                SendOutcome::ok(None)
            }
            Err(e) => {
                tracing::warn!("⚠️ Email to {to} failed: {e}");
                SendOutcome::failed(e.to_string())
            }
        }
    }
}

/// Recording dispatcher — keeps every send in memory and can be told to fail
/// specific recipients. Backs dry-runs, single-address test-sends, and the
/// scheduler tests.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<(String, String, String)>>,
    fail_for: Mutex<Vec<String>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make future sends to `address` fail.
    pub fn fail_recipient(&self, address: &str) {
        self.fail_for.lock().unwrap().push(address.to_string());
    }

    /// Every (to, subject, body) recorded so far.
    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MailDispatcher for MemoryMailer {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> SendOutcome {
        if self.fail_for.lock().unwrap().iter().any(|a| a == to) {
            return SendOutcome::failed(format!("simulated failure for {to}"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), html_body.to_string()));
        SendOutcome::ok(Some(format!("mem-{}", self.sent_count())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_vars() {
        let vars = HashMap::from([
            ("name".to_string(), "Mai".to_string()),
            ("course".to_string(), "IELTS".to_string()),
        ]);
        assert_eq!(
            render_template("Hi {{name}}, about {{course}}.", &vars),
            "Hi Mai, about IELTS."
        );
    }

    #[test]
    fn strips_unresolved_vars() {
        let vars = HashMap::from([("name".to_string(), "Mai".to_string())]);
        assert_eq!(
            render_template("Hi {{name}}{{unknown}}!", &vars),
            "Hi Mai!"
        );
        assert_eq!(render_template("{{a}}{{b}}", &HashMap::new()), "");
    }

    #[test]
    fn unterminated_placeholder_kept_verbatim() {
        assert_eq!(render_template("oops {{tail", &HashMap::new()), "oops {{tail");
    }

    #[tokio::test]
    async fn memory_mailer_records_and_fails() {
        let mailer = MemoryMailer::new();
        mailer.fail_recipient("bad@example.com");

        let ok = mailer.send("a@example.com", "s", "b").await;
        assert!(ok.success);
        let bad = mailer.send("bad@example.com", "s", "b").await;
        assert!(!bad.success);
        assert_eq!(mailer.sent_count(), 1);
    }
}
