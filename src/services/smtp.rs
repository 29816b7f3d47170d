// SMTP RCPT probing: TCP preflight, EHLO, opportunistic STARTTLS,
// MAIL FROM / RCPT TO, and raw outcome classification. DATA is never sent.

use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lettre::transport::smtp::client::SmtpConnection;
use lettre::transport::smtp::commands::{Ehlo, Mail, Rcpt};
use lettre::transport::smtp::extension::ClientId;
use lettre::Address;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::app_config::AppConfig;
use crate::models::SmtpCategory;
use crate::services::mx::{BehaviorSink, ProbeObservation};

#[derive(Debug, Error)]
pub enum SmtpProbeError {
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Invalid SMTP identity: {0}")]
    InvalidIdentity(String),

    #[error("Probe task failed: {0}")]
    Join(String),
}

/// SMTP identity presented in conversations. Both fields must be under
/// operator control with matching PTR and SPF records.
#[derive(Debug, Clone, Serialize)]
pub struct SmtpIdentity {
    pub helo_domain: String,
    pub mail_from: String,
}

/// TCP reachability check to port 25 before any SMTP conversation.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightResult {
    pub ok: bool,
    pub mx_host: String,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Raw outcome of one RCPT probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub ok: bool,
    pub category: SmtpCategory,
    pub code: Option<u16>,
    pub message: String,
    pub mx_host: String,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl ProbeOutcome {
    fn unknown(mx_host: &str, error: &str, started: Instant) -> Self {
        Self {
            ok: false,
            category: SmtpCategory::Unknown,
            code: None,
            message: String::new(),
            mx_host: mx_host.to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            error: Some(error.to_string()),
        }
    }
}

// =============================================================================
// PROBER
// =============================================================================

pub struct SmtpProber {
    identity: SmtpIdentity,
    connect_timeout: Duration,
    command_timeout: Duration,
    preflight_timeout: Duration,
    probes_enabled: bool,
    behavior: Arc<dyn BehaviorSink>,
}

impl SmtpProber {
    pub fn new(config: &AppConfig, behavior: Arc<dyn BehaviorSink>) -> Self {
        Self {
            identity: SmtpIdentity {
                helo_domain: config.smtp_helo_domain.clone(),
                mail_from: config.smtp_mail_from.clone(),
            },
            connect_timeout: Duration::from_secs(config.smtp_connect_timeout_sec),
            command_timeout: Duration::from_secs(config.smtp_command_timeout_sec),
            preflight_timeout: Duration::from_secs_f64(config.smtp_preflight_timeout_sec),
            probes_enabled: config.smtp_probes_enabled,
            behavior,
        }
    }

    pub fn identity(&self) -> &SmtpIdentity {
        &self.identity
    }

    /// Fast TCP connect to `mx_host:25`. A blocked port fails here within
    /// the preflight timeout instead of hanging a full SMTP conversation.
    #[instrument(skip(self))]
    pub async fn preflight(&self, mx_host: &str) -> PreflightResult {
        let started = Instant::now();
        let addr = format!("{}:25", mx_host);

        match timeout(self.preflight_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => PreflightResult {
                ok: true,
                mx_host: mx_host.to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
                error: None,
            },
            Ok(Err(e)) => PreflightResult {
                ok: false,
                mx_host: mx_host.to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
                error: Some(format!("connect:{}", e)),
            },
            Err(_) => PreflightResult {
                ok: false,
                mx_host: mx_host.to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
                error: Some("preflight_timeout".to_string()),
            },
        }
    }

    /// Issue one RCPT probe against an MX host. Every probe records exactly
    /// one behavior observation, whatever the outcome.
    #[instrument(skip(self), fields(email, mx_host))]
    pub async fn probe(&self, email: &str, mx_host: &str) -> Result<ProbeOutcome, SmtpProbeError> {
        let started = Instant::now();

        if !self.probes_enabled {
            debug!("SMTP probes disabled; returning unknown for {}", email);
            return Ok(ProbeOutcome::unknown(mx_host, "probes_disabled", started));
        }

        let recipient = Address::from_str(email.trim())
            .map_err(|e| SmtpProbeError::InvalidEmail(format!("{}: {}", email, e)))?;
        let sender = Address::from_str(&self.identity.mail_from)
            .map_err(|e| SmtpProbeError::InvalidIdentity(e.to_string()))?;

        let preflight = self.preflight(mx_host).await;
        if !preflight.ok {
            let outcome = ProbeOutcome::unknown(mx_host, "tcp25_blocked", started);
            self.record(&outcome).await;
            return Ok(outcome);
        }

        // Behavior-aware timeout tuning for tarpits and fast hosts
        let (connect_to, command_to) = match self.behavior.behavior_hint(mx_host).await {
            Some(hint) => hint.tuned_timeouts(self.connect_timeout, self.command_timeout),
            None => (self.connect_timeout, self.command_timeout),
        };

        let helo = ClientId::Domain(self.identity.helo_domain.clone());
        let host = mx_host.to_string();
        let outcome = tokio::task::spawn_blocking(move || {
            run_conversation(&host, helo, &sender, &recipient, connect_to, command_to, started)
        })
        .await
        .map_err(|e| SmtpProbeError::Join(e.to_string()))?;

        self.record(&outcome).await;
        Ok(outcome)
    }

    async fn record(&self, outcome: &ProbeOutcome) {
        let error_kind = outcome
            .error
            .as_ref()
            .map(|e| e.split(':').next().unwrap_or("error").to_string());
        self.behavior
            .record_probe(ProbeObservation {
                mx_host: outcome.mx_host.clone(),
                elapsed_ms: outcome.elapsed_ms as i32,
                category: outcome.category.as_str().to_string(),
                code: outcome.code.map(|c| c as i32),
                error_kind,
            })
            .await;
    }
}

// =============================================================================
// BLOCKING CONVERSATION
// =============================================================================

/// The wire conversation itself. Runs on the blocking pool; lettre's
/// SmtpConnection is synchronous.
fn run_conversation(
    mx_host: &str,
    helo: ClientId,
    sender: &Address,
    recipient: &Address,
    connect_timeout: Duration,
    _command_timeout: Duration,
    started: Instant,
) -> ProbeOutcome {
    let socket_addr = match resolve_socket(mx_host) {
        Some(addr) => addr,
        None => return ProbeOutcome::unknown(mx_host, "resolve_failed", started),
    };

    match try_conversation(socket_addr, mx_host, &helo, sender, recipient, connect_timeout, false) {
        ConversationResult::Done(code, message, error) => {
            finish(mx_host, code, message, error, started)
        }
        ConversationResult::NeedsTls => {
            debug!("{} requires STARTTLS, retrying with TLS", mx_host);
            match try_conversation(
                socket_addr,
                mx_host,
                &helo,
                sender,
                recipient,
                connect_timeout,
                true,
            ) {
                ConversationResult::Done(code, message, error) => {
                    finish(mx_host, code, message, error, started)
                }
                ConversationResult::NeedsTls => {
                    ProbeOutcome::unknown(mx_host, "starttls_loop", started)
                }
            }
        }
    }
}

enum ConversationResult {
    Done(Option<u16>, String, Option<String>),
    NeedsTls,
}

fn try_conversation(
    socket_addr: SocketAddr,
    mx_host: &str,
    helo: &ClientId,
    sender: &Address,
    recipient: &Address,
    connect_timeout: Duration,
    use_tls: bool,
) -> ConversationResult {
    let tls_parameters = if use_tls {
        match lettre::transport::smtp::client::TlsParameters::new(mx_host.to_string()) {
            Ok(params) => Some(params),
            Err(e) => {
                return ConversationResult::Done(None, String::new(), Some(format!("tls:{}", e)))
            }
        }
    } else {
        None
    };

    let mut conn = match SmtpConnection::connect(
        socket_addr,
        Some(connect_timeout),
        helo,
        tls_parameters.as_ref(),
        None,
    ) {
        Ok(conn) => conn,
        Err(e) => {
            let err = e.to_string();
            if err.contains("timed out") {
                return ConversationResult::Done(None, String::new(), Some(format!("timeout:{}", err)));
            }
            return ConversationResult::Done(None, String::new(), Some(format!("connect:{}", err)));
        }
    };

    if let Err(e) = conn.command(Ehlo::new(helo.clone())) {
        conn.quit().ok();
        return ConversationResult::Done(None, String::new(), Some(format!("ehlo:{}", e)));
    }

    match conn.command(Mail::new(Some(sender.clone()), vec![])) {
        Ok(response) if response.is_positive() => {}
        Ok(response) => {
            let message = response.message().collect::<Vec<&str>>().join(" ");
            let code = parse_code(&response);
            conn.quit().ok();
            if !use_tls && requires_starttls(code, &message) {
                return ConversationResult::NeedsTls;
            }
            return ConversationResult::Done(
                code,
                message,
                Some("mail_from_rejected".to_string()),
            );
        }
        Err(e) => {
            conn.quit().ok();
            return ConversationResult::Done(None, String::new(), Some(format!("mail_from:{}", e)));
        }
    }

    let result = match conn.command(Rcpt::new(recipient.clone(), vec![])) {
        Ok(response) => {
            let code = parse_code(&response);
            let message = response.message().collect::<Vec<&str>>().join(" ");
            ConversationResult::Done(code, message, None)
        }
        Err(e) => {
            // A 5xx RCPT surfaces as an error from lettre; recover the code
            // from the error text so hard fails classify correctly.
            let err = e.to_string();
            let code = extract_code_from_error(&err);
            match code {
                Some(c) => ConversationResult::Done(Some(c), err, None),
                None => ConversationResult::Done(None, String::new(), Some(format!("rcpt:{}", err))),
            }
        }
    };

    conn.quit().ok();
    result
}

fn finish(
    mx_host: &str,
    code: Option<u16>,
    message: String,
    error: Option<String>,
    started: Instant,
) -> ProbeOutcome {
    let category = SmtpCategory::from_code(code);
    ProbeOutcome {
        ok: code.is_some() && error.is_none(),
        category,
        code,
        message,
        mx_host: mx_host.to_string(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        error,
    }
}

fn resolve_socket(mx_host: &str) -> Option<SocketAddr> {
    match (mx_host, 25u16).to_socket_addrs() {
        Ok(mut addrs) => addrs.next(),
        Err(e) => {
            warn!("could not resolve {}: {}", mx_host, e);
            None
        }
    }
}

fn parse_code(response: &lettre::transport::smtp::response::Response) -> Option<u16> {
    response.code().to_string().parse::<u16>().ok()
}

fn requires_starttls(code: Option<u16>, message: &str) -> bool {
    let msg = message.to_lowercase();
    if msg.contains("starttls") {
        return true;
    }
    code == Some(530) && msg.contains("5.7.0") && !msg.contains("authentication required")
}

/// Pull a reply code out of a lettre error string like
/// "permanent error (550): 5.1.1 user unknown".
fn extract_code_from_error(err: &str) -> Option<u16> {
    let bytes = err.as_bytes();
    for i in 0..bytes.len().saturating_sub(2) {
        let window = &bytes[i..i + 3];
        if window.iter().all(|b| b.is_ascii_digit()) {
            let before_ok = i == 0 || !bytes[i - 1].is_ascii_digit();
            let after_ok = i + 3 >= bytes.len() || !bytes[i + 3].is_ascii_digit();
            if before_ok && after_ok {
                if let Ok(code) = err[i..i + 3].parse::<u16>() {
                    if (200..600).contains(&code) {
                        return Some(code);
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_code_from_error() {
        assert_eq!(
            extract_code_from_error("permanent error (550): 5.1.1 user unknown"),
            Some(550)
        );
        assert_eq!(extract_code_from_error("transient error (451)"), Some(451));
        assert_eq!(extract_code_from_error("connection reset"), None);
        // Out-of-range numbers are not reply codes
        assert_eq!(extract_code_from_error("error 999"), None);
    }

    #[test]
    fn test_requires_starttls() {
        assert!(requires_starttls(None, "Must issue a STARTTLS command first"));
        assert!(requires_starttls(Some(530), "5.7.0 TLS needed"));
        assert!(!requires_starttls(Some(530), "5.7.0 authentication required x"));
        assert!(!requires_starttls(Some(550), "user unknown"));
    }
}
