// Test executor: runs a generated batch through the sandbox and grades
// per-case output.
//
// The whole batch runs as one sandbox job. A non-accepted sandbox status
// fails every case with that status id; grading problems (missing line,
// unparseable payload) fail only the affected case.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::runner::{self, Language, MAX_BATCH_CASES};
use crate::sandbox::{Sandbox, SandboxJob};
use crate::store::{ComparisonMode, Signature, TestCase};

/// Generated programs larger than this are rejected without a sandbox call.
pub const MAX_PROGRAM_BYTES: usize = 100 * 1024;
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const MAX_POLL_ATTEMPTS: u32 = 30;
/// Execution budget for a custom comparator expression.
pub const COMPARATOR_BUDGET: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub passed: bool,
    pub expected_output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Terminal sandbox status id when the whole batch failed. Never forged
    /// to the accepted id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox_status: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub all_passed: bool,
    pub total_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    pub results: Vec<TestCaseResult>,
    pub average_time: f64,
    pub average_memory: f64,
}

impl ExecutionReport {
    fn from_results(results: Vec<TestCaseResult>, time: Option<f64>, memory: Option<f64>) -> Self {
        let total = results.len() as u32;
        let passed = results.iter().filter(|r| r.passed).count() as u32;
        ExecutionReport {
            all_passed: total > 0 && passed == total,
            total_tests: total,
            passed_tests: passed,
            failed_tests: total - passed,
            results,
            average_time: time.unwrap_or(0.0),
            average_memory: memory.unwrap_or(0.0),
        }
    }

    fn all_failed(cases: &[TestCase], error: &str, sandbox_status: Option<u32>) -> Self {
        let results = cases
            .iter()
            .map(|case| TestCaseResult {
                passed: false,
                expected_output: case.output.clone(),
                actual_output: None,
                error: Some(error.to_string()),
                sandbox_status,
                time: None,
                memory: None,
            })
            .collect();
        Self::from_results(results, None, None)
    }
}

pub struct TestExecutor {
    sandbox: Arc<dyn Sandbox>,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl TestExecutor {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        TestExecutor {
            sandbox,
            poll_interval: POLL_INTERVAL,
            max_poll_attempts: MAX_POLL_ATTEMPTS,
        }
    }

    /// Override the polling cadence (tests).
    pub fn with_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.poll_interval = interval;
        self.max_poll_attempts = attempts;
        self
    }

    /// Run `source` against `cases` and grade each case under the
    /// signature's comparison mode.
    pub async fn execute(
        &self,
        language: Language,
        source: &str,
        signature: &Signature,
        cases: &[TestCase],
    ) -> Result<ExecutionReport> {
        if cases.len() > MAX_BATCH_CASES {
            return Ok(ExecutionReport::all_failed(
                cases,
                &format!("limit exceeded: {} cases (max {MAX_BATCH_CASES})", cases.len()),
                None,
            ));
        }

        let program = runner::generate(language, signature, source, cases)?;
        if program.len() > MAX_PROGRAM_BYTES {
            return Ok(ExecutionReport::all_failed(
                cases,
                "Generated code too large",
                None,
            ));
        }

        let job = SandboxJob {
            language_id: language.sandbox_id(),
            source: program,
            stdin: None,
        };

        let started = Instant::now();
        let token = self.sandbox.submit(&job).await?;

        let mut terminal = None;
        for attempt in 0..self.max_poll_attempts {
            let outcome = self.sandbox.fetch(&token).await?;
            if outcome.is_terminal() {
                terminal = Some(outcome);
                break;
            }
            if attempt + 1 < self.max_poll_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        crate::metrics::SANDBOX_EXECUTION_SECONDS
            .with_label_values(&[language.key()])
            .observe(started.elapsed().as_secs_f64());

        let Some(outcome) = terminal else {
            tracing::warn!(token = %token, "Sandbox never reached a terminal status");
            return Ok(ExecutionReport::all_failed(
                cases,
                "sandbox polling timed out",
                None,
            ));
        };

        crate::metrics::SANDBOX_JOBS_TOTAL
            .with_label_values(&[&outcome.status_id.to_string()])
            .inc();

        if !outcome.is_accepted() {
            let detail = outcome
                .compile_output
                .or(outcome.stderr)
                .or(outcome.message)
                .unwrap_or_else(|| outcome.status_description.clone());
            return Ok(ExecutionReport::all_failed(
                cases,
                &format!("sandbox status {}: {}", outcome.status_id, detail.trim()),
                Some(outcome.status_id),
            ));
        }

        let stdout = outcome.stdout.clone().unwrap_or_default();
        let outputs = parse_batch_stdout(&stdout);
        let mode = signature.comparison_mode();
        let comparator = signature.custom_comparator.as_deref();

        let results: Vec<TestCaseResult> = cases
            .iter()
            .enumerate()
            .map(|(i, case)| {
                grade_case(i, case, outputs.get(&i).copied(), mode, comparator, &outcome)
            })
            .collect();

        Ok(ExecutionReport::from_results(
            results,
            outcome.time,
            outcome.memory,
        ))
    }
}

fn grade_case(
    index: usize,
    case: &TestCase,
    raw: Option<&str>,
    mode: ComparisonMode,
    comparator: Option<&str>,
    outcome: &crate::sandbox::SandboxOutcome,
) -> TestCaseResult {
    let mut result = TestCaseResult {
        passed: false,
        expected_output: case.output.clone(),
        actual_output: None,
        error: None,
        sandbox_status: None,
        time: outcome.time,
        memory: outcome.memory,
    };

    let Some(raw) = raw else {
        result.error = Some(format!("no output line for test {index}"));
        return result;
    };

    let actual: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            result.error = Some(format!("unparseable output: {e}"));
            return result;
        }
    };
    result.actual_output = Some(actual.clone());

    match compare_outputs(mode, &case.output, &actual, comparator) {
        Ok(passed) => result.passed = passed,
        Err(e) => result.error = Some(e),
    }
    result
}

/// Split stdout into `Test <n>: <payload>` lines.
pub fn parse_batch_stdout(stdout: &str) -> HashMap<usize, &str> {
    let mut out = HashMap::new();
    for line in stdout.lines() {
        if let Some((index, payload)) = parse_test_line(line) {
            out.insert(index, payload);
        }
    }
    out
}

fn parse_test_line(line: &str) -> Option<(usize, &str)> {
    let rest = line.strip_prefix("Test ")?;
    let colon = rest.find(": ")?;
    let index: usize = rest[..colon].parse().ok()?;
    Some((index, &rest[colon + 2..]))
}

// ── Comparison ────────────────────────────────────────────────────────

/// Compare expected and actual under the given mode. `Err` carries a
/// grading failure (bad comparator, timeout), which fails the case.
pub fn compare_outputs(
    mode: ComparisonMode,
    expected: &Value,
    actual: &Value,
    comparator: Option<&str>,
) -> std::result::Result<bool, String> {
    match mode {
        ComparisonMode::Strict => Ok(canonicalize(expected) == canonicalize(actual)),
        ComparisonMode::Unordered => Ok(unordered_eq(expected, actual)),
        ComparisonMode::Set => Ok(set_eq(expected, actual)),
        ComparisonMode::Custom => {
            let Some(comparator) = comparator else {
                return Err("comparison mode is custom but no comparator is set".into());
            };
            custom_compare(comparator, expected, actual, COMPARATOR_BUDGET)
        }
    }
}

/// Canonical form for JSON equality: whole-valued floats collapse to
/// integers so `1` and `1.0` compare equal across language runtimes.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    return Value::from(f as i64);
                }
            }
            value.clone()
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Arrays compared as multisets of serialized elements.
fn unordered_eq(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Array(e), Value::Array(a)) => {
            if e.len() != a.len() {
                return false;
            }
            let mut es: Vec<String> = e.iter().map(|v| canonicalize(v).to_string()).collect();
            let mut as_: Vec<String> = a.iter().map(|v| canonicalize(v).to_string()).collect();
            es.sort();
            as_.sort();
            es == as_
        }
        _ => canonicalize(expected) == canonicalize(actual),
    }
}

/// Inner arrays sorted element-wise, outer deduplicated and compared as
/// sets.
fn set_eq(expected: &Value, actual: &Value) -> bool {
    match (set_normalize(expected), set_normalize(actual)) {
        (Some(e), Some(a)) => e == a,
        _ => canonicalize(expected) == canonicalize(actual),
    }
}

fn set_normalize(value: &Value) -> Option<BTreeSet<String>> {
    let items = value.as_array()?;
    let mut out = BTreeSet::new();
    for item in items {
        let normalized = match item {
            Value::Array(inner) => {
                let mut elems: Vec<Value> = inner.iter().map(canonicalize).collect();
                elems.sort_by_key(|v| v.to_string());
                Value::Array(elems).to_string()
            }
            other => canonicalize(other).to_string(),
        };
        out.insert(normalized);
    }
    Some(out)
}

/// Evaluate a single-expression Lua comparator with `expected` and `actual`
/// bound as globals. The interpreter hook enforces the wall-clock budget;
/// non-boolean results are grading failures.
fn custom_compare(
    comparator: &str,
    expected: &Value,
    actual: &Value,
    budget: Duration,
) -> std::result::Result<bool, String> {
    use mlua::LuaSerdeExt;

    let lua = mlua::Lua::new();
    let started = Instant::now();
    let _ = lua.set_hook(
        mlua::HookTriggers::new().every_nth_instruction(10_000),
        move |_lua, _debug| {
            if started.elapsed() > budget {
                Err(mlua::Error::RuntimeError(
                    "comparator budget exceeded".into(),
                ))
            } else {
                Ok(mlua::VmState::Continue)
            }
        },
    );

    let run = || -> mlua::Result<mlua::Value> {
        let globals = lua.globals();
        globals.set("expected", lua.to_value(expected)?)?;
        globals.set("actual", lua.to_value(actual)?)?;
        lua.load(format!("return ({comparator})")).eval()
    };

    match run() {
        Ok(mlua::Value::Boolean(b)) => Ok(b),
        Ok(other) => Err(format!(
            "comparator returned non-boolean ({})",
            other.type_name()
        )),
        Err(e) => Err(format!("comparator error: {e}")),
    }
}
