// ABOUTME: makes sure the op cli is signed in before each forwarded command runs.
// ABOUTME: concurrent checks for one account share a single status/sign-in sequence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::tool::SecretTool;

/// Terminal success states of one authentication check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// The status query succeeded; no sign-in was needed.
    Authenticated,
    /// The status query failed and a sign-in repaired it.
    SignedIn,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("failed to start sign-in: {0}")]
    Spawn(String),
    #[error("sign-in {status}{}", captured_suffix(.output))]
    SignInFailed { status: String, output: String },
}

fn captured_suffix(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(": {output}")
    }
}

type Flight = Shared<BoxFuture<'static, Result<AuthState, AuthError>>>;

/// Runs `op account get`, falling back to `op signin`, once per call.
///
/// Results are never cached: a call that arrives after the previous check
/// finished starts a new one. Calls that overlap an in-flight check for the
/// same account wait for it and receive its result.
#[derive(Debug)]
pub struct Authenticator {
    tool: Arc<SecretTool>,
    in_flight: Mutex<HashMap<String, (u64, Flight)>>,
    next_flight: AtomicU64,
}

impl Authenticator {
    pub fn new(tool: Arc<SecretTool>) -> Self {
        Self {
            tool,
            in_flight: Mutex::new(HashMap::new()),
            next_flight: AtomicU64::new(0),
        }
    }

    pub async fn ensure_signed_in(&self, account: &str) -> Result<AuthState, AuthError> {
        let (id, flight) = {
            let mut in_flight = self.lock_in_flight();
            if let Some((id, flight)) = in_flight.get(account) {
                debug!(account, "joining in-flight authentication check");
                (*id, flight.clone())
            } else {
                let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                let tool = Arc::clone(&self.tool);
                let owned_account = account.to_string();
                let flight = async move { check_and_sign_in(&tool, &owned_account).await }
                    .boxed()
                    .shared();
                in_flight.insert(account.to_string(), (id, flight.clone()));
                (id, flight)
            }
        };

        let result = flight.await;

        let mut in_flight = self.lock_in_flight();
        if in_flight
            .get(account)
            .is_some_and(|(current, _)| *current == id)
        {
            in_flight.remove(account);
        }
        result
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, (u64, Flight)>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn check_and_sign_in(tool: &SecretTool, account: &str) -> Result<AuthState, AuthError> {
    match tool.status_command(account).status().await {
        Ok(status) if status.success() => {
            debug!(account, "1Password account is already authenticated");
            return Ok(AuthState::Authenticated);
        }
        Ok(status) => {
            info!(account, %status, "1Password account is not signed in, attempting to sign in");
        }
        Err(err) => {
            warn!(account, error = %err, "status check could not run, attempting to sign in");
        }
    }

    let output = tool
        .signin_command(account)
        .output()
        .await
        .map_err(|err| AuthError::Spawn(err.to_string()))?;

    if output.status.success() {
        info!(account, "signed in to 1Password");
        return Ok(AuthState::SignedIn);
    }

    let mut combined = output.stdout;
    combined.extend_from_slice(&output.stderr);
    let captured = String::from_utf8_lossy(&combined).trim().to_string();
    warn!(account, status = %output.status, output = %captured, "sign-in attempt failed");
    Err(AuthError::SignInFailed {
        status: output.status.to_string(),
        output: captured,
    })
}
