// Domain catch-all detection: probe a random local part and cache the
// verdict on the latest domain resolution row.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::app_config::AppConfig;
use crate::models::{CatchAllStatus, NewDomainResolution};
use crate::services::mx::{MxError, MxResolver};
use crate::services::smtp::{SmtpProbeError, SmtpProber};
use crate::services::store::{IdempotentStore, StoreError};

#[derive(Debug, Error)]
pub enum CatchAllError {
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Mx(#[from] MxError),

    #[error(transparent)]
    Probe(#[from] SmtpProbeError),
}

#[derive(Debug, Clone)]
pub struct CatchAllOutcome {
    pub domain: String,
    pub status: CatchAllStatus,
    pub mx_host: Option<String>,
    pub localpart: Option<String>,
    pub smtp_code: Option<i32>,
    pub cached: bool,
}

pub struct CatchAllDetector {
    store: Arc<IdempotentStore>,
    mx: Arc<MxResolver>,
    prober: Arc<SmtpProber>,
    cache_ttl: Duration,
}

impl CatchAllDetector {
    pub fn new(
        config: &AppConfig,
        store: Arc<IdempotentStore>,
        mx: Arc<MxResolver>,
        prober: Arc<SmtpProber>,
    ) -> Self {
        Self {
            store,
            mx,
            prober,
            cache_ttl: Duration::from_secs(config.catchall_cache_ttl_sec),
        }
    }

    /// Decide whether `domain` accepts mail for arbitrary local parts.
    /// A fresh cached verdict on the latest resolution wins unless `force`.
    #[instrument(skip(self))]
    pub async fn check(
        &self,
        tenant: Uuid,
        company_id: Uuid,
        domain: &str,
        force: bool,
    ) -> Result<CatchAllOutcome, CatchAllError> {
        let domain = domain.trim().to_lowercase();
        if domain.is_empty() || domain.contains('@') {
            return Err(CatchAllError::InvalidDomain(domain));
        }

        let latest = self.store.latest_resolution(tenant, &domain).await?;
        if !force {
            if let Some(ref resolution) = latest {
                if let (Some(status), Some(checked_at)) =
                    (resolution.catch_all(), resolution.catch_all_checked_at)
                {
                    let age = Utc::now() - checked_at;
                    if age.to_std().map_or(false, |a| a < self.cache_ttl) {
                        debug!("cached catch-all verdict for {}: {:?}", domain, status);
                        return Ok(CatchAllOutcome {
                            domain,
                            status,
                            mx_host: resolution.lowest_mx.clone(),
                            localpart: resolution.catch_all_localpart.clone(),
                            smtp_code: resolution.catch_all_smtp_code,
                            cached: true,
                        });
                    }
                }
            }
        }

        let mx_res = self.mx.resolve(&domain, force).await?;

        // Ensure there is a resolution row to hang the verdict on
        let resolution_id = match latest {
            Some(ref resolution) => resolution.id,
            None => {
                self.store
                    .record_resolution(NewDomainResolution {
                        id: Uuid::new_v4(),
                        tenant_id: tenant,
                        company_id,
                        chosen_domain: domain.clone(),
                        method: "catchall_probe".to_string(),
                        confidence: 0,
                        mx_hosts: mx_res.mx_hosts.clone(),
                        lowest_mx: mx_res.lowest_mx.clone(),
                        resolved_at: Utc::now(),
                    })
                    .await?
            }
        };

        let Some(mx_host) = mx_res.lowest_mx.clone() else {
            self.store
                .update_catchall_verdict(resolution_id, CatchAllStatus::NoMx, None, None)
                .await?;
            return Ok(CatchAllOutcome {
                domain,
                status: CatchAllStatus::NoMx,
                mx_host: None,
                localpart: None,
                smtp_code: None,
                cached: false,
            });
        };

        let localpart = random_localpart();
        let probe_email = format!("{}@{}", localpart, domain);
        let outcome = self.prober.probe(&probe_email, &mx_host).await?;
        let status = classify_catchall(outcome.code, outcome.error.as_deref());

        info!(
            "catch-all probe for {} via {}: code={:?} -> {:?}",
            domain, mx_host, outcome.code, status
        );

        self.store
            .update_catchall_verdict(
                resolution_id,
                status,
                Some(&localpart),
                outcome.code.map(|c| c as i32),
            )
            .await?;

        Ok(CatchAllOutcome {
            domain,
            status,
            mx_host: Some(mx_host),
            localpart: Some(localpart),
            smtp_code: outcome.code.map(|c| c as i32),
            cached: false,
        })
    }
}

/// Random local part guaranteed not to collide with a real mailbox:
/// 16 hex chars plus an epoch-seconds suffix.
fn random_localpart() -> String {
    let rand_part: u64 = rand::thread_rng().gen();
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{:016x}{}", rand_part, epoch)
}

/// Map an RCPT code / error into the catch-all verdict. Timeouts and
/// transient conditions are `tempfail`, never `error`.
fn classify_catchall(code: Option<u16>, error: Option<&str>) -> CatchAllStatus {
    if let Some(code) = code {
        return match code {
            200..=299 => CatchAllStatus::CatchAll,
            500..=599 => CatchAllStatus::NotCatchAll,
            400..=499 => CatchAllStatus::Tempfail,
            _ => CatchAllStatus::Error,
        };
    }
    match error {
        Some(e) => {
            let e = e.to_lowercase();
            if e.contains("timeout") || e.contains("temp") || e.contains("tcp25_blocked") {
                CatchAllStatus::Tempfail
            } else {
                CatchAllStatus::Error
            }
        }
        None => CatchAllStatus::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_code() {
        assert_eq!(classify_catchall(Some(250), None), CatchAllStatus::CatchAll);
        assert_eq!(classify_catchall(Some(550), None), CatchAllStatus::NotCatchAll);
        assert_eq!(classify_catchall(Some(451), None), CatchAllStatus::Tempfail);
        assert_eq!(classify_catchall(Some(354), None), CatchAllStatus::Error);
    }

    #[test]
    fn test_classify_by_error() {
        assert_eq!(
            classify_catchall(None, Some("timeout:read")),
            CatchAllStatus::Tempfail
        );
        assert_eq!(
            classify_catchall(None, Some("tcp25_blocked")),
            CatchAllStatus::Tempfail
        );
        assert_eq!(
            classify_catchall(None, Some("tls:handshake")),
            CatchAllStatus::Error
        );
        assert_eq!(classify_catchall(None, None), CatchAllStatus::Error);
    }

    #[test]
    fn test_random_localpart_shape() {
        let lp = random_localpart();
        assert!(lp.len() > 16);
        assert!(lp.chars().all(|c| c.is_ascii_hexdigit() || c.is_ascii_digit()));
        assert_ne!(random_localpart(), random_localpart());
    }
}
