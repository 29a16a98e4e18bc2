//! Retry logic with exponential backoff for HTTP requests
//!
//! Connection failures, read failures and a fixed set of gateway/server
//! statuses are retried. Each cause has its own budget inside an overall cap.

use std::thread;
use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use tracing::{debug, warn};

use crate::error::TimeoutPhase;
use crate::transport::{Transport, TransportError, TransportRequest, TransportResponse};
use crate::Result;

/// Statuses that trigger a retry by default
pub const DEFAULT_STATUS_FORCELIST: [u16; 13] = [
    429, 500, 502, 503, 504, 520, 521, 522, 523, 524, 525, 527, 530,
];

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries across all causes
    pub total: u32,
    /// Maximum retries for connection failures
    pub connect: u32,
    /// Maximum retries for failures while reading a response
    pub read: u32,
    /// Statuses that are retried
    pub status_forcelist: Vec<u16>,
    /// First backoff delay; doubles on each retry
    pub backoff_factor: Duration,
    /// Upper bound on a single backoff delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            total: 10,
            connect: 6,
            read: 3,
            status_forcelist: DEFAULT_STATUS_FORCELIST.to_vec(),
            backoff_factor: Duration::from_secs(1),
            max_backoff: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            total: 0,
            connect: 0,
            read: 0,
            ..Default::default()
        }
    }

    pub fn with_total(mut self, total: u32) -> Self {
        self.total = total;
        self
    }

    pub fn with_connect(mut self, connect: u32) -> Self {
        self.connect = connect;
        self
    }

    pub fn with_read(mut self, read: u32) -> Self {
        self.read = read;
        self
    }

    pub fn with_status_forcelist(mut self, statuses: impl Into<Vec<u16>>) -> Self {
        self.status_forcelist = statuses.into();
        self
    }

    pub fn with_backoff_factor(mut self, factor: Duration) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    /// Whether `status` is in the retry forcelist
    pub fn retries_status(&self, status: u16) -> bool {
        self.status_forcelist.contains(&status)
    }

    /// Create an exponential backoff instance without jitter
    pub fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.backoff_factor,
            initial_interval: self.backoff_factor,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// What went wrong on the last attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    Connect,
    Read,
    Status {
        status: u16,
        retry_after: Option<Duration>,
    },
}

impl RetryCause {
    /// Map a transport failure to a retry cause; `None` means not retryable.
    pub fn from_transport_error(err: &TransportError) -> Option<Self> {
        match err {
            TransportError::Connect { .. } => Some(RetryCause::Connect),
            TransportError::Timeout {
                phase: TimeoutPhase::Connect,
                ..
            } => Some(RetryCause::Connect),
            TransportError::Timeout {
                phase: TimeoutPhase::Read,
                ..
            }
            | TransportError::Read { .. } => Some(RetryCause::Read),
            TransportError::Redirect { .. }
            | TransportError::Http { .. }
            | TransportError::Request { .. } => None,
        }
    }
}

/// Decision on whether to retry a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the request after the specified delay
    Retry { delay: Duration },
    /// Do not retry the request
    NoRetry,
}

/// Tracks retry budgets for a single logical request
#[derive(Debug)]
pub struct RetryHandler {
    policy: RetryPolicy,
    attempts: u32,
    connect_attempts: u32,
    read_attempts: u32,
    backoff: ExponentialBackoff,
}

impl RetryHandler {
    pub fn new(policy: RetryPolicy) -> Self {
        let backoff = policy.create_backoff();
        Self {
            policy,
            attempts: 0,
            connect_attempts: 0,
            read_attempts: 0,
            backoff,
        }
    }

    /// Determine if a request should be retried after `cause`
    pub fn should_retry(&mut self, cause: &RetryCause) -> RetryDecision {
        if self.attempts >= self.policy.total {
            return RetryDecision::NoRetry;
        }

        match cause {
            RetryCause::Connect => {
                if self.connect_attempts >= self.policy.connect {
                    return RetryDecision::NoRetry;
                }
                self.connect_attempts += 1;
            }
            RetryCause::Read => {
                if self.read_attempts >= self.policy.read {
                    return RetryDecision::NoRetry;
                }
                self.read_attempts += 1;
            }
            RetryCause::Status { status, .. } => {
                if !self.policy.retries_status(*status) {
                    return RetryDecision::NoRetry;
                }
            }
        }

        self.attempts += 1;

        let backoff_delay = self
            .backoff
            .next_backoff()
            .unwrap_or(self.policy.max_backoff);
        let delay = match cause {
            RetryCause::Status {
                retry_after: Some(retry_after),
                ..
            } => *retry_after,
            _ => backoff_delay,
        };

        RetryDecision::Retry { delay }
    }

    /// Number of retries granted so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Parse a `Retry-After` header given in seconds
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Execute a request with retry logic.
///
/// Requests with a one-shot streaming body are sent exactly once. When the
/// status budget runs out, the last response is returned as-is so the caller
/// can classify it.
pub fn execute_with_retry(
    transport: &dyn Transport,
    request: TransportRequest,
    policy: &RetryPolicy,
) -> Result<TransportResponse> {
    let mut handler = RetryHandler::new(policy.clone());
    let mut request = request;

    loop {
        let method = request.method;
        let url = request.url.clone();
        let replay = request.try_clone();
        let outcome = transport.execute(request);

        let cause = match &outcome {
            Ok(response) if policy.retries_status(response.status()) => RetryCause::Status {
                status: response.status(),
                retry_after: parse_retry_after(response.header("retry-after")),
            },
            Ok(_) => return outcome.map_err(Into::into),
            Err(err) => match RetryCause::from_transport_error(err) {
                Some(cause) => cause,
                None => return outcome.map_err(Into::into),
            },
        };

        let Some(next) = replay else {
            debug!(%method, %url, "request body is not replayable, skipping retry");
            return outcome.map_err(Into::into);
        };

        match handler.should_retry(&cause) {
            RetryDecision::Retry { delay } => {
                warn!(
                    %method,
                    %url,
                    attempt = handler.attempts(),
                    ?cause,
                    ?delay,
                    "request failed, retrying"
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                request = next;
            }
            RetryDecision::NoRetry => {
                debug!(%method, %url, attempts = handler.attempts(), ?cause, "retries exhausted");
                return outcome.map_err(Into::into);
            }
        }
    }
}
