//! Verifier: polls the observed power state until it matches the
//! operation's expected terminal state or the verification window elapses.
//! A read error aborts verification immediately rather than being retried
//! inline with non-matching reads, the window expiring mid-read is reported
//! as a timeout rather than a read failure.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use powerctl_redfish::{CredentialResolver, RedfishClient};
use powerctl_types::ExpectedPowerState;

use crate::executor::TaskExecutionContext;

#[async_trait]
pub trait PowerStateReader: Send + Sync {
    async fn read(&self, ctx: &TaskExecutionContext, system_path: &str) -> Result<String, String>;
}

pub struct RedfishPowerStateReader {
    redfish: Arc<dyn RedfishClient>,
    credentials: Arc<dyn CredentialResolver>,
}

impl RedfishPowerStateReader {
    pub fn new(redfish: Arc<dyn RedfishClient>, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self { redfish, credentials }
    }
}

#[async_trait]
impl PowerStateReader for RedfishPowerStateReader {
    async fn read(&self, ctx: &TaskExecutionContext, system_path: &str) -> Result<String, String> {
        let cred = self.credentials.resolve(&ctx.credential_id);
        self.redfish
            .get_system_power_state(&ctx.endpoint, system_path, &cred, ctx.insecure_skip_verify)
            .await
            .map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone)]
pub enum VerifyError {
    Timeout { expected: String, last_observed: Option<String> },
    ReadFailed(String),
    Canceled,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::Timeout { .. } => write!(f, "verification timed out"),
            VerifyError::ReadFailed(s) => write!(f, "verification read failed: {s}"),
            VerifyError::Canceled => write!(f, "verification canceled"),
        }
    }
}

pub struct VerifyOutcome {
    pub observed: String,
}

pub async fn verify(
    reader: &dyn PowerStateReader,
    ctx: &TaskExecutionContext,
    system_path: &str,
    expected: ExpectedPowerState,
    poll_interval: Duration,
    window: Duration,
    cancel: &CancellationToken,
) -> Result<VerifyOutcome, VerifyError> {
    let deadline = Instant::now() + window;
    let mut last_observed: Option<String> = None;

    loop {
        if Instant::now() >= deadline {
            return Err(timeout(expected, last_observed));
        }

        let read_result = tokio::select! {
            _ = cancel.cancelled() => return Err(VerifyError::Canceled),
            _ = tokio::time::sleep_until(deadline) => return Err(timeout(expected, last_observed)),
            r = reader.read(ctx, system_path) => r,
        };

        match read_result {
            Ok(observed) => {
                if expected.matches_observed(&observed) {
                    return Ok(VerifyOutcome { observed });
                }
                last_observed = Some(observed);
            }
            Err(e) => {
                if Instant::now() >= deadline {
                    return Err(timeout(expected, last_observed));
                }
                return Err(VerifyError::ReadFailed(e));
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        let sleep_for = poll_interval.min(remaining);
        tokio::select! {
            _ = cancel.cancelled() => return Err(VerifyError::Canceled),
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}

fn timeout(expected: ExpectedPowerState, last_observed: Option<String>) -> VerifyError {
    VerifyError::Timeout {
        expected: expected.as_str().to_string(),
        last_observed,
    }
}
