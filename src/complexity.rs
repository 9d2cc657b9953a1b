// Complexity verification against the external LLM.
//
// The verifier answers PASS/FAIL for "does this solution meet the expected
// asymptotic bound". A malformed reply is a hard error here — the session
// layer decides to fail open, this module never does.

use async_trait::async_trait;
use serde::Deserialize;

use crate::breaker::{BreakerError, CircuitBreaker};
use crate::error::{CoreError, Result};

const SYSTEM_INSTRUCTION: &str = "You are a complexity analyzer. Given source code and an \
expected asymptotic bound, derive the solution's time complexity and judge whether it meets \
the bound. Respond with strict JSON: {\"derived_complexity\": string, \"verdict\": \
\"PASS\" | \"FAIL\"}. No prose.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
}

#[derive(Debug, Clone)]
pub struct ComplexityReport {
    pub derived_complexity: String,
    pub verdict: Verdict,
}

#[async_trait]
pub trait ComplexityVerifier: Send + Sync {
    async fn verify(&self, source: &str, expected_bound: &str) -> Result<ComplexityReport>;
}

#[derive(Deserialize)]
struct VerifyReply {
    derived_complexity: String,
    verdict: String,
}

pub struct HttpComplexityVerifier {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    breaker: std::sync::Arc<CircuitBreaker>,
}

impl HttpComplexityVerifier {
    pub fn new(url: &str, api_key: Option<String>, breaker: std::sync::Arc<CircuitBreaker>) -> Self {
        HttpComplexityVerifier {
            client: reqwest::Client::new(),
            url: url.to_string(),
            api_key,
            breaker,
        }
    }
}

#[async_trait]
impl ComplexityVerifier for HttpComplexityVerifier {
    async fn verify(&self, source: &str, expected_bound: &str) -> Result<ComplexityReport> {
        let body = serde_json::json!({
            "system": SYSTEM_INSTRUCTION,
            "code": source,
            "expected_complexity": expected_bound,
        });

        let client = self.client.clone();
        let url = self.url.clone();
        let api_key = self.api_key.clone();
        let reply: VerifyReply = self
            .breaker
            .execute(|| async move {
                let mut request = client.post(&url).json(&body);
                if let Some(key) = api_key {
                    request = request.bearer_auth(key);
                }
                let response = request
                    .send()
                    .await
                    .map_err(|e| CoreError::ComplexityError(e.to_string()))?
                    .error_for_status()
                    .map_err(|e| CoreError::ComplexityError(e.to_string()))?;
                response
                    .json::<VerifyReply>()
                    .await
                    .map_err(|e| CoreError::ComplexityError(format!("malformed reply: {e}")))
            })
            .await
            .map_err(|e| match e {
                BreakerError::Open => CoreError::ComplexityError("circuit breaker open".into()),
                BreakerError::Inner(inner) => inner,
            })?;

        let verdict = match reply.verdict.as_str() {
            "PASS" => Verdict::Pass,
            "FAIL" => Verdict::Fail,
            other => {
                return Err(CoreError::ComplexityError(format!(
                    "unexpected verdict: {other}"
                )))
            }
        };
        Ok(ComplexityReport {
            derived_complexity: reply.derived_complexity,
            verdict,
        })
    }
}

/// Scripted verifier for tests: pops queued results; empty queue passes.
#[derive(Default)]
pub struct FakeVerifier {
    replies: std::sync::Mutex<std::collections::VecDeque<Result<ComplexityReport>>>,
    calls: std::sync::atomic::AtomicU32,
}

impl FakeVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_pass(&self, derived: &str) {
        self.replies.lock().unwrap().push_back(Ok(ComplexityReport {
            derived_complexity: derived.to_string(),
            verdict: Verdict::Pass,
        }));
    }

    pub fn push_fail(&self, derived: &str) {
        self.replies.lock().unwrap().push_back(Ok(ComplexityReport {
            derived_complexity: derived.to_string(),
            verdict: Verdict::Fail,
        }));
    }

    pub fn push_error(&self, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(CoreError::ComplexityError(message.to_string())));
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl ComplexityVerifier for FakeVerifier {
    async fn verify(&self, _source: &str, expected_bound: &str) -> Result<ComplexityReport> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(ComplexityReport {
                    derived_complexity: expected_bound.to_string(),
                    verdict: Verdict::Pass,
                })
            })
    }
}
