// Canonical verification classifier: combines MX, catch-all, SMTP, and
// fallback signals into one (verify_status, verify_reason) verdict.
//
// Pure function of its inputs — identical signals always produce the same
// verdict, which is what makes probe retries idempotent at the verdict level.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{CatchAllStatus, FallbackStatus, SmtpCategory, VerifyStatus};

/// Inputs for one classification pass. Built from the probe pipeline or
/// re-hydrated from stored rows; plain data either way.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationSignals {
    /// MX resolution found no MX and no A/AAAA fallback.
    pub no_mx: bool,
    /// Domain-level catch-all verdict, if a probe ran.
    pub catch_all: Option<CatchAllStatus>,
    /// RCPT probe outcome, if one ran.
    pub smtp: Option<SmtpSignal>,
    /// Third-party fallback verdict, if consulted.
    pub fallback: Option<FallbackStatus>,
    /// A previous confirmed delivery exists for this exact address.
    pub prior_delivery_confirmed: bool,
    /// Timestamp of the newest contributing signal, for staleness gating.
    pub signal_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SmtpSignal {
    pub category: SmtpCategory,
    pub code: Option<u16>,
    /// Short machine reason from the prober (e.g. "tcp25_blocked",
    /// "timeout", "probes_disabled").
    pub reason: Option<String>,
}

/// Classifier policy knobs. `fallback_configured` distinguishes "fallback
/// said unknown" from "no fallback to ask".
#[derive(Debug, Clone, Copy)]
pub struct ClassifierPolicy {
    pub fallback_configured: bool,
    pub result_ttl_days: i64,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            fallback_configured: false,
            result_ttl_days: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub status: VerifyStatus,
    pub reason: String,
}

impl Verdict {
    fn new(status: VerifyStatus, reason: &str) -> Self {
        Self {
            status,
            reason: reason.to_string(),
        }
    }
}

/// Classify verification signals into the canonical verdict.
///
/// Rule order:
///   1. staleness guard
///   2. no MX → invalid
///   3. confirmed catch-all → risky (or valid on prior confirmed delivery)
///   4. SMTP accept / hard fail / soft fail, with fallback consultation
///   5. fallback-only when no SMTP signal exists
pub fn classify(
    signals: &VerificationSignals,
    policy: &ClassifierPolicy,
    now: DateTime<Utc>,
) -> Verdict {
    if let Some(at) = signals.signal_at {
        if now - at > Duration::days(policy.result_ttl_days) {
            return Verdict::new(VerifyStatus::UnknownTimeout, "stale_result_ttl_exceeded");
        }
    }

    if signals.no_mx {
        return Verdict::new(VerifyStatus::Invalid, "no_mx");
    }

    if signals.catch_all == Some(CatchAllStatus::CatchAll) {
        // Domain accepts everything: an accept carries no signal about this
        // mailbox unless an actual delivery confirmed it before.
        if signals.prior_delivery_confirmed {
            return Verdict::new(VerifyStatus::Valid, "delivered_on_catchall");
        }
        if signals.fallback == Some(FallbackStatus::Undeliverable) {
            return Verdict::new(VerifyStatus::Invalid, "fallback_undeliverable");
        }
        return Verdict::new(VerifyStatus::RiskyCatchAll, "catch_all_domain");
    }

    match &signals.smtp {
        Some(smtp) => match smtp.category {
            SmtpCategory::Accept => {
                if signals.catch_all == Some(CatchAllStatus::NotCatchAll) {
                    Verdict::new(VerifyStatus::Valid, "rcpt_2xx_non_catchall")
                } else {
                    // Catch-all probe tempfailed, errored, or never ran: a
                    // 2xx alone cannot prove the mailbox. Conservative.
                    Verdict::new(VerifyStatus::RiskyCatchAll, "catchall_unknown_rcpt_2xx")
                }
            }
            SmtpCategory::HardFail => Verdict::new(VerifyStatus::Invalid, "rcpt_5xx"),
            SmtpCategory::TempFail | SmtpCategory::Unknown => {
                classify_soft_fail(signals, policy, smtp)
            }
        },
        None => classify_without_smtp(signals, policy),
    }
}

fn classify_soft_fail(
    signals: &VerificationSignals,
    policy: &ClassifierPolicy,
    smtp: &SmtpSignal,
) -> Verdict {
    if policy.fallback_configured {
        match signals.fallback {
            Some(FallbackStatus::Deliverable) => {
                return Verdict::new(VerifyStatus::Valid, "fallback_deliverable")
            }
            Some(FallbackStatus::Undeliverable) => {
                return Verdict::new(VerifyStatus::Invalid, "fallback_undeliverable")
            }
            Some(FallbackStatus::Unknown) | None => {
                return Verdict::new(VerifyStatus::UnknownTimeout, "fallback_unknown")
            }
        }
    }

    let reason = smtp
        .reason
        .clone()
        .unwrap_or_else(|| match smtp.category {
            SmtpCategory::TempFail => "rcpt_4xx".to_string(),
            _ => "smtp_unknown".to_string(),
        });
    Verdict::new(VerifyStatus::UnknownTimeout, &reason)
}

fn classify_without_smtp(signals: &VerificationSignals, policy: &ClassifierPolicy) -> Verdict {
    if policy.fallback_configured {
        match signals.fallback {
            Some(FallbackStatus::Deliverable) => {
                return Verdict::new(VerifyStatus::Valid, "fallback_deliverable_no_smtp")
            }
            Some(FallbackStatus::Undeliverable) => {
                return Verdict::new(VerifyStatus::Invalid, "fallback_undeliverable_no_smtp")
            }
            _ => {}
        }
    }
    Verdict::new(VerifyStatus::UnknownTimeout, "no_verification_attempt")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_fallback() -> ClassifierPolicy {
        ClassifierPolicy {
            fallback_configured: false,
            result_ttl_days: 90,
        }
    }

    fn with_fallback() -> ClassifierPolicy {
        ClassifierPolicy {
            fallback_configured: true,
            result_ttl_days: 90,
        }
    }

    fn smtp(category: SmtpCategory, code: Option<u16>) -> Option<SmtpSignal> {
        Some(SmtpSignal {
            category,
            code,
            reason: None,
        })
    }

    #[test]
    fn test_no_mx_is_invalid() {
        let signals = VerificationSignals {
            no_mx: true,
            ..Default::default()
        };
        let verdict = classify(&signals, &no_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::Invalid);
        assert_eq!(verdict.reason, "no_mx");
    }

    #[test]
    fn test_valid_corporate_email() {
        // Catch-all probe got 550, RCPT got 250
        let signals = VerificationSignals {
            catch_all: Some(CatchAllStatus::NotCatchAll),
            smtp: smtp(SmtpCategory::Accept, Some(250)),
            ..Default::default()
        };
        let verdict = classify(&signals, &no_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::Valid);
        assert_eq!(verdict.reason, "rcpt_2xx_non_catchall");
    }

    #[test]
    fn test_catch_all_domain_is_risky() {
        let signals = VerificationSignals {
            catch_all: Some(CatchAllStatus::CatchAll),
            smtp: smtp(SmtpCategory::Accept, Some(250)),
            ..Default::default()
        };
        let verdict = classify(&signals, &no_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::RiskyCatchAll);
        assert_eq!(verdict.reason, "catch_all_domain");
    }

    #[test]
    fn test_catch_all_without_per_address_probe() {
        // Catch-all domains may skip the per-address probe entirely
        let signals = VerificationSignals {
            catch_all: Some(CatchAllStatus::CatchAll),
            ..Default::default()
        };
        let verdict = classify(&signals, &no_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::RiskyCatchAll);
        assert_eq!(verdict.reason, "catch_all_domain");
    }

    #[test]
    fn test_delivery_confirmed_upgrades_catch_all() {
        let signals = VerificationSignals {
            catch_all: Some(CatchAllStatus::CatchAll),
            prior_delivery_confirmed: true,
            ..Default::default()
        };
        let verdict = classify(&signals, &no_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::Valid);
        assert_eq!(verdict.reason, "delivered_on_catchall");
    }

    #[test]
    fn test_hard_fail_is_invalid() {
        let signals = VerificationSignals {
            catch_all: Some(CatchAllStatus::NotCatchAll),
            smtp: smtp(SmtpCategory::HardFail, Some(550)),
            ..Default::default()
        };
        let verdict = classify(&signals, &no_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::Invalid);
        assert_eq!(verdict.reason, "rcpt_5xx");
    }

    #[test]
    fn test_catchall_tempfail_plus_accept_is_conservative() {
        // Catch-all probe inconclusive + RCPT 2xx must NOT produce valid
        let signals = VerificationSignals {
            catch_all: Some(CatchAllStatus::Tempfail),
            smtp: smtp(SmtpCategory::Accept, Some(250)),
            ..Default::default()
        };
        let verdict = classify(&signals, &no_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::RiskyCatchAll);
        assert_eq!(verdict.reason, "catchall_unknown_rcpt_2xx");

        let signals = VerificationSignals {
            catch_all: Some(CatchAllStatus::Error),
            smtp: smtp(SmtpCategory::Accept, Some(250)),
            ..Default::default()
        };
        assert_eq!(
            classify(&signals, &no_fallback(), Utc::now()).reason,
            "catchall_unknown_rcpt_2xx"
        );
    }

    #[test]
    fn test_temp_fail_without_fallback() {
        let signals = VerificationSignals {
            catch_all: Some(CatchAllStatus::NotCatchAll),
            smtp: Some(SmtpSignal {
                category: SmtpCategory::TempFail,
                code: Some(451),
                reason: Some("rcpt_4xx".into()),
            }),
            ..Default::default()
        };
        let verdict = classify(&signals, &no_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::UnknownTimeout);
        assert_eq!(verdict.reason, "rcpt_4xx");
    }

    #[test]
    fn test_tcp25_blocked_reason_propagates() {
        let signals = VerificationSignals {
            smtp: Some(SmtpSignal {
                category: SmtpCategory::Unknown,
                code: None,
                reason: Some("tcp25_blocked".into()),
            }),
            ..Default::default()
        };
        let verdict = classify(&signals, &no_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::UnknownTimeout);
        assert_eq!(verdict.reason, "tcp25_blocked");
    }

    #[test]
    fn test_fallback_resolves_temp_fail() {
        let base = VerificationSignals {
            catch_all: Some(CatchAllStatus::NotCatchAll),
            smtp: smtp(SmtpCategory::TempFail, Some(451)),
            ..Default::default()
        };

        let deliverable = VerificationSignals {
            fallback: Some(FallbackStatus::Deliverable),
            ..base.clone()
        };
        let verdict = classify(&deliverable, &with_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::Valid);
        assert_eq!(verdict.reason, "fallback_deliverable");

        let undeliverable = VerificationSignals {
            fallback: Some(FallbackStatus::Undeliverable),
            ..base.clone()
        };
        let verdict = classify(&undeliverable, &with_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::Invalid);
        assert_eq!(verdict.reason, "fallback_undeliverable");

        let unknown = VerificationSignals {
            fallback: Some(FallbackStatus::Unknown),
            ..base
        };
        let verdict = classify(&unknown, &with_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::UnknownTimeout);
        assert_eq!(verdict.reason, "fallback_unknown");
    }

    #[test]
    fn test_fallback_undeliverable_beats_catch_all() {
        let signals = VerificationSignals {
            catch_all: Some(CatchAllStatus::CatchAll),
            fallback: Some(FallbackStatus::Undeliverable),
            ..Default::default()
        };
        let verdict = classify(&signals, &with_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::Invalid);
    }

    #[test]
    fn test_fallback_only_classification() {
        let signals = VerificationSignals {
            fallback: Some(FallbackStatus::Deliverable),
            ..Default::default()
        };
        let verdict = classify(&signals, &with_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::Valid);
        assert_eq!(verdict.reason, "fallback_deliverable_no_smtp");
    }

    #[test]
    fn test_no_signals_is_unknown() {
        let verdict = classify(&VerificationSignals::default(), &no_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::UnknownTimeout);
        assert_eq!(verdict.reason, "no_verification_attempt");
    }

    #[test]
    fn test_stale_signals_gate_everything() {
        let signals = VerificationSignals {
            catch_all: Some(CatchAllStatus::NotCatchAll),
            smtp: smtp(SmtpCategory::Accept, Some(250)),
            signal_at: Some(Utc::now() - Duration::days(120)),
            ..Default::default()
        };
        let verdict = classify(&signals, &no_fallback(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::UnknownTimeout);
        assert_eq!(verdict.reason, "stale_result_ttl_exceeded");
    }

    #[test]
    fn test_classifier_is_pure() {
        let signals = VerificationSignals {
            catch_all: Some(CatchAllStatus::NotCatchAll),
            smtp: smtp(SmtpCategory::Accept, Some(250)),
            ..Default::default()
        };
        let now = Utc::now();
        let first = classify(&signals, &no_fallback(), now);
        for _ in 0..10 {
            assert_eq!(classify(&signals, &no_fallback(), now), first);
        }
    }
}
