// End-to-end classification scenarios: the canonical verdict table driven
// through the public classifier API.

use chrono::Utc;
use leadpipe_backend_core::models::{CatchAllStatus, FallbackStatus, SmtpCategory};
use leadpipe_backend_core::services::classifier::{
    classify, ClassifierPolicy, SmtpSignal, VerificationSignals,
};
use leadpipe_backend_core::VerifyStatus;

fn policy() -> ClassifierPolicy {
    ClassifierPolicy {
        fallback_configured: false,
        result_ttl_days: 90,
    }
}

fn smtp(category: SmtpCategory, code: u16) -> Option<SmtpSignal> {
    Some(SmtpSignal {
        category,
        code: Some(code),
        reason: None,
    })
}

#[test]
fn valid_corporate_email_scenario() {
    // Team page email on example.com: catch-all probe got 550, RCPT got 250
    let signals = VerificationSignals {
        no_mx: false,
        catch_all: Some(CatchAllStatus::NotCatchAll),
        smtp: smtp(SmtpCategory::Accept, 250),
        ..Default::default()
    };
    let verdict = classify(&signals, &policy(), Utc::now());
    assert_eq!(verdict.status, VerifyStatus::Valid);
    assert_eq!(verdict.reason, "rcpt_2xx_non_catchall");
}

#[test]
fn catch_all_domain_scenario() {
    // Random local part accepted with 250: every address on the domain is
    // risky, with or without a per-address probe
    for smtp_signal in [None, smtp(SmtpCategory::Accept, 250)] {
        let signals = VerificationSignals {
            catch_all: Some(CatchAllStatus::CatchAll),
            smtp: smtp_signal,
            ..Default::default()
        };
        let verdict = classify(&signals, &policy(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::RiskyCatchAll);
        assert_eq!(verdict.reason, "catch_all_domain");
    }
}

#[test]
fn hard_invalid_address_scenario() {
    // RCPT 550 5.1.1 on a non-catch-all domain
    let signals = VerificationSignals {
        catch_all: Some(CatchAllStatus::NotCatchAll),
        smtp: smtp(SmtpCategory::HardFail, 550),
        ..Default::default()
    };
    let verdict = classify(&signals, &policy(), Utc::now());
    assert_eq!(verdict.status, VerifyStatus::Invalid);
    assert_eq!(verdict.reason, "rcpt_5xx");
}

#[test]
fn port_25_blocked_scenario() {
    // Preflight failed: the probe never got an SMTP reply
    let signals = VerificationSignals {
        smtp: Some(SmtpSignal {
            category: SmtpCategory::Unknown,
            code: None,
            reason: Some("tcp25_blocked".to_string()),
        }),
        ..Default::default()
    };
    let verdict = classify(&signals, &policy(), Utc::now());
    assert_eq!(verdict.status, VerifyStatus::UnknownTimeout);
    assert_eq!(verdict.reason, "tcp25_blocked");
}

#[test]
fn no_mx_scenario() {
    let signals = VerificationSignals {
        no_mx: true,
        // Any other signal present must not override the MX verdict
        smtp: smtp(SmtpCategory::Accept, 250),
        ..Default::default()
    };
    let verdict = classify(&signals, &policy(), Utc::now());
    assert_eq!(verdict.status, VerifyStatus::Invalid);
    assert_eq!(verdict.reason, "no_mx");
}

#[test]
fn inconclusive_catchall_with_accept_stays_risky() {
    // The key misclassification guard: tempfail/error on the catch-all
    // probe plus a 2xx RCPT must not report valid
    for status in [CatchAllStatus::Tempfail, CatchAllStatus::Error] {
        let signals = VerificationSignals {
            catch_all: Some(status),
            smtp: smtp(SmtpCategory::Accept, 250),
            ..Default::default()
        };
        let verdict = classify(&signals, &policy(), Utc::now());
        assert_eq!(verdict.status, VerifyStatus::RiskyCatchAll);
        assert_eq!(verdict.reason, "catchall_unknown_rcpt_2xx");
    }
}

#[test]
fn rcpt_200_class_counts_as_accept() {
    // Any 2xx to the RCPT is accept; only the reply class matters
    let signals = VerificationSignals {
        catch_all: Some(CatchAllStatus::NotCatchAll),
        smtp: smtp(SmtpCategory::from_code(Some(200)), 200),
        ..Default::default()
    };
    let verdict = classify(&signals, &policy(), Utc::now());
    assert_eq!(verdict.status, VerifyStatus::Valid);
}

#[test]
fn fallback_settles_inconclusive_probes() {
    let policy = ClassifierPolicy {
        fallback_configured: true,
        result_ttl_days: 90,
    };
    let base = VerificationSignals {
        catch_all: Some(CatchAllStatus::NotCatchAll),
        smtp: smtp(SmtpCategory::TempFail, 451),
        ..Default::default()
    };

    let cases = [
        (Some(FallbackStatus::Deliverable), VerifyStatus::Valid),
        (Some(FallbackStatus::Undeliverable), VerifyStatus::Invalid),
        (Some(FallbackStatus::Unknown), VerifyStatus::UnknownTimeout),
        (None, VerifyStatus::UnknownTimeout),
    ];
    for (fallback, expected) in cases {
        let signals = VerificationSignals {
            fallback,
            ..base.clone()
        };
        assert_eq!(classify(&signals, &policy, Utc::now()).status, expected);
    }
}

#[test]
fn identical_inputs_identical_verdicts() {
    // Purity across the whole signal space we can enumerate cheaply
    let now = Utc::now();
    let catchalls = [
        None,
        Some(CatchAllStatus::CatchAll),
        Some(CatchAllStatus::NotCatchAll),
        Some(CatchAllStatus::Tempfail),
        Some(CatchAllStatus::Error),
    ];
    let smtps = [
        None,
        smtp(SmtpCategory::Accept, 250),
        smtp(SmtpCategory::HardFail, 550),
        smtp(SmtpCategory::TempFail, 451),
        smtp(SmtpCategory::Unknown, 0),
    ];
    for catch_all in &catchalls {
        for smtp_signal in &smtps {
            let signals = VerificationSignals {
                catch_all: *catch_all,
                smtp: smtp_signal.clone(),
                ..Default::default()
            };
            let first = classify(&signals, &policy(), now);
            let second = classify(&signals, &policy(), now);
            assert_eq!(first, second, "verdict drifted for {:?}", signals);
        }
    }
}
