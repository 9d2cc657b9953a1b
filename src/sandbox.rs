// Sandbox executor client.
//
// Submits a (language id, base64 source, base64 stdin) job, receives a
// token, and fetches the outcome with all text fields base64-decoded.
// Every network call runs through the circuit breaker; polling cadence is
// owned by the test executor.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

use crate::breaker::{BreakerError, CircuitBreaker};
use crate::error::{CoreError, Result};

/// Sandbox status ids: 1-2 pending/running, 3 accepted, 4 wrong answer,
/// 5 and above are error classes.
pub const STATUS_ACCEPTED: u32 = 3;

/// Language ids understood by the sandbox.
pub const LANG_PYTHON: u32 = 71;
pub const LANG_JAVASCRIPT: u32 = 63;
pub const LANG_JAVA: u32 = 62;
pub const LANG_CPP: u32 = 54;

/// Languages that compile before running; these get an explicit memory
/// limit because the sandbox default is too tight for their runtimes.
pub const COMPILED_LANGUAGE_IDS: [u32; 2] = [LANG_JAVA, LANG_CPP];
pub const COMPILED_MEMORY_LIMIT_KB: u32 = 512_000;

/// Resolve a client-facing language name to its canonical key.
pub fn canonical_language(language: &str) -> Option<&'static str> {
    match language {
        "python" => Some("python"),
        "javascript" | "js" => Some("javascript"),
        "java" => Some("java"),
        "cpp" => Some("cpp"),
        _ => None,
    }
}

pub fn language_id(language: &str) -> Option<u32> {
    match canonical_language(language)? {
        "python" => Some(LANG_PYTHON),
        "javascript" => Some(LANG_JAVASCRIPT),
        "java" => Some(LANG_JAVA),
        "cpp" => Some(LANG_CPP),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct SandboxJob {
    pub language_id: u32,
    pub source: String,
    pub stdin: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SandboxOutcome {
    pub status_id: u32,
    pub status_description: String,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub message: Option<String>,
    /// Seconds, as reported by the sandbox.
    pub time: Option<f64>,
    /// Kilobytes.
    pub memory: Option<f64>,
}

impl SandboxOutcome {
    pub fn is_terminal(&self) -> bool {
        self.status_id > 2
    }

    pub fn is_accepted(&self) -> bool {
        self.status_id == STATUS_ACCEPTED
    }
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Submit a job; returns the poll token.
    async fn submit(&self, job: &SandboxJob) -> Result<String>;
    /// Fetch the current outcome for a token. Non-terminal outcomes have
    /// status id 1 or 2.
    async fn fetch(&self, token: &str) -> Result<SandboxOutcome>;
}

// ── HTTP implementation ───────────────────────────────────────────────

#[derive(Deserialize)]
struct SubmitReply {
    token: String,
}

#[derive(Deserialize)]
struct StatusReply {
    id: u32,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct FetchReply {
    status: StatusReply,
    stdout: Option<String>,
    stderr: Option<String>,
    compile_output: Option<String>,
    message: Option<String>,
    time: Option<serde_json::Value>,
    memory: Option<serde_json::Value>,
}

pub struct HttpSandbox {
    client: reqwest::Client,
    base_url: String,
    breaker: std::sync::Arc<CircuitBreaker>,
}

impl HttpSandbox {
    pub fn new(base_url: &str, breaker: std::sync::Arc<CircuitBreaker>) -> Self {
        HttpSandbox {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            breaker,
        }
    }

    fn map_breaker_error(e: BreakerError<CoreError>) -> CoreError {
        match e {
            BreakerError::Open => CoreError::SandboxError("circuit breaker open".into()),
            BreakerError::Inner(inner) => inner,
        }
    }
}

#[async_trait]
impl Sandbox for HttpSandbox {
    async fn submit(&self, job: &SandboxJob) -> Result<String> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let mut body = serde_json::json!({
            "language_id": job.language_id,
            "source_code": b64.encode(&job.source),
        });
        if let Some(ref stdin) = job.stdin {
            body["stdin"] = serde_json::Value::String(b64.encode(stdin));
        }
        if COMPILED_LANGUAGE_IDS.contains(&job.language_id) {
            body["memory_limit"] = serde_json::json!(COMPILED_MEMORY_LIMIT_KB);
        }

        let url = format!(
            "{}/submissions?base64_encoded=true&wait=false",
            self.base_url
        );
        let client = self.client.clone();
        let reply: SubmitReply = self
            .breaker
            .execute(|| async move {
                let response = client
                    .post(&url)
                    .json(&body)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok::<_, CoreError>(response.json::<SubmitReply>().await?)
            })
            .await
            .map_err(Self::map_breaker_error)?;
        Ok(reply.token)
    }

    async fn fetch(&self, token: &str) -> Result<SandboxOutcome> {
        let url = format!(
            "{}/submissions/{}?base64_encoded=true&fields=*",
            self.base_url, token
        );
        let client = self.client.clone();
        let reply: FetchReply = self
            .breaker
            .execute(|| async move {
                let response = client.get(&url).send().await?.error_for_status()?;
                Ok::<_, CoreError>(response.json::<FetchReply>().await?)
            })
            .await
            .map_err(Self::map_breaker_error)?;

        Ok(SandboxOutcome {
            status_id: reply.status.id,
            status_description: reply.status.description,
            stdout: decode_field(reply.stdout),
            stderr: decode_field(reply.stderr),
            compile_output: decode_field(reply.compile_output),
            message: decode_field(reply.message),
            time: numeric_field(reply.time),
            memory: numeric_field(reply.memory),
        })
    }
}

/// Decode a base64 text field; the sandbox line-wraps its base64 output.
fn decode_field(raw: Option<String>) -> Option<String> {
    let raw = raw?;
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// `time` and `memory` arrive as numbers or numeric strings.
fn numeric_field(raw: Option<serde_json::Value>) -> Option<f64> {
    match raw? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// ── Test double ───────────────────────────────────────────────────────

/// Scripted sandbox for tests: records submitted jobs and pops queued
/// outcomes in order. An empty queue yields an accepted, empty run.
#[derive(Default)]
pub struct FakeSandbox {
    jobs: std::sync::Mutex<Vec<SandboxJob>>,
    outcomes: std::sync::Mutex<std::collections::VecDeque<SandboxOutcome>>,
    submit_error: std::sync::Mutex<Option<String>>,
}

impl FakeSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outcome(&self, outcome: SandboxOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn accepted_with_stdout(stdout: &str) -> SandboxOutcome {
        SandboxOutcome {
            status_id: STATUS_ACCEPTED,
            status_description: "Accepted".into(),
            stdout: Some(stdout.to_string()),
            time: Some(0.05),
            memory: Some(8_192.0),
            ..Default::default()
        }
    }

    pub fn fail_submits_with(&self, message: &str) {
        *self.submit_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn submitted_jobs(&self) -> Vec<SandboxJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn submit(&self, job: &SandboxJob) -> Result<String> {
        if let Some(message) = self.submit_error.lock().unwrap().clone() {
            return Err(CoreError::SandboxError(message));
        }
        let mut jobs = self.jobs.lock().unwrap();
        jobs.push(job.clone());
        Ok(format!("fake-token-{}", jobs.len()))
    }

    async fn fetch(&self, _token: &str) -> Result<SandboxOutcome> {
        let queued = self.outcomes.lock().unwrap().pop_front();
        Ok(queued.unwrap_or_else(|| SandboxOutcome {
            status_id: STATUS_ACCEPTED,
            status_description: "Accepted".into(),
            stdout: Some(String::new()),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_mapping() {
        assert_eq!(language_id("python"), Some(71));
        assert_eq!(language_id("javascript"), Some(63));
        assert_eq!(language_id("js"), Some(63));
        assert_eq!(language_id("java"), Some(62));
        assert_eq!(language_id("cpp"), Some(54));
        assert_eq!(language_id("brainfuck"), None);

        assert_eq!(canonical_language("js"), Some("javascript"));
        assert_eq!(canonical_language("ruby"), None);
    }

    #[test]
    fn test_decode_field_handles_wrapped_base64() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("Test 0: [1,2]\n");
        // Simulate line wrapping
        let wrapped = format!("{}\n", encoded);
        assert_eq!(
            decode_field(Some(wrapped)).as_deref(),
            Some("Test 0: [1,2]\n")
        );
        assert_eq!(decode_field(None), None);
        assert_eq!(decode_field(Some("!!!not-base64!!!".into())), None);
    }

    #[test]
    fn test_numeric_field_variants() {
        assert_eq!(numeric_field(Some(serde_json::json!(0.42))), Some(0.42));
        assert_eq!(numeric_field(Some(serde_json::json!("0.42"))), Some(0.42));
        assert_eq!(numeric_field(Some(serde_json::json!(null))), None);
        assert_eq!(numeric_field(None), None);
    }

    #[test]
    fn test_outcome_terminality() {
        let pending = SandboxOutcome {
            status_id: 2,
            ..Default::default()
        };
        assert!(!pending.is_terminal());

        let accepted = SandboxOutcome {
            status_id: 3,
            ..Default::default()
        };
        assert!(accepted.is_terminal());
        assert!(accepted.is_accepted());

        let wrong = SandboxOutcome {
            status_id: 4,
            ..Default::default()
        };
        assert!(wrong.is_terminal());
        assert!(!wrong.is_accepted());
    }

    #[tokio::test]
    async fn test_fake_sandbox_records_jobs() {
        let fake = FakeSandbox::new();
        fake.push_outcome(FakeSandbox::accepted_with_stdout("Test 0: 1\n"));

        let token = fake
            .submit(&SandboxJob {
                language_id: LANG_PYTHON,
                source: "print(1)".into(),
                stdin: None,
            })
            .await
            .unwrap();
        let outcome = fake.fetch(&token).await.unwrap();
        assert!(outcome.is_accepted());
        assert_eq!(outcome.stdout.as_deref(), Some("Test 0: 1\n"));
        assert_eq!(fake.submitted_jobs().len(), 1);
    }
}
