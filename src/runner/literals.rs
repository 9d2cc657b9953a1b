// JSON value → language-native literal rendering.
//
// A single mapping table covers all four languages; the per-language
// generators only decide which literal to wrap in a deserialize call.

use crate::error::{CoreError, Result};

use super::{Language, ValueType};

/// Render one input value as a literal for the target language.
///
/// Node-typed values (List/Tree) render as their element-array literal; the
/// caller wraps them in the matching deserialize helper.
pub fn render(language: Language, ty: ValueType, value: &serde_json::Value) -> Result<String> {
    match language {
        Language::Python => python_literal(value),
        Language::Javascript => Ok(value.to_string()),
        Language::Java => java_literal(ty, value),
        Language::Cpp => cpp_literal(ty, value),
    }
}

fn bad_value(ty: ValueType, value: &serde_json::Value) -> CoreError {
    CoreError::InvalidRequest(format!("input value {value} does not fit type {ty:?}"))
}

// ── Python ────────────────────────────────────────────────────────────

/// Python literals differ from JSON only in the singleton spellings.
fn python_literal(value: &serde_json::Value) -> Result<String> {
    Ok(match value {
        serde_json::Value::Null => "None".to_string(),
        serde_json::Value::Bool(true) => "True".to_string(),
        serde_json::Value::Bool(false) => "False".to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(_) => value.to_string(),
        serde_json::Value::Array(items) => {
            let parts: Result<Vec<String>> = items.iter().map(python_literal).collect();
            format!("[{}]", parts?.join(", "))
        }
        serde_json::Value::Object(_) => {
            return Err(CoreError::InvalidRequest(
                "object inputs are not supported".into(),
            ))
        }
    })
}

// ── Java ──────────────────────────────────────────────────────────────

fn java_literal(ty: ValueType, value: &serde_json::Value) -> Result<String> {
    match ty {
        ValueType::Int => value
            .as_i64()
            .map(|n| n.to_string())
            .ok_or_else(|| bad_value(ty, value)),
        ValueType::Long => value
            .as_i64()
            .map(|n| format!("{n}L"))
            .ok_or_else(|| bad_value(ty, value)),
        ValueType::Double => value
            .as_f64()
            .map(render_double)
            .ok_or_else(|| bad_value(ty, value)),
        ValueType::Bool => value
            .as_bool()
            .map(|b| b.to_string())
            .ok_or_else(|| bad_value(ty, value)),
        ValueType::Str => value
            .as_str()
            .map(quote_string)
            .ok_or_else(|| bad_value(ty, value)),
        ValueType::IntArray | ValueType::List | ValueType::Tree => {
            // Trees carry nulls; Java helpers take Integer[] so null survives.
            let items = value.as_array().ok_or_else(|| bad_value(ty, value))?;
            let parts: Result<Vec<String>> = items
                .iter()
                .map(|v| match v {
                    serde_json::Value::Null if ty == ValueType::Tree => Ok("null".to_string()),
                    other => other
                        .as_i64()
                        .map(|n| n.to_string())
                        .ok_or_else(|| bad_value(ty, other)),
                })
                .collect();
            let element = if ty == ValueType::IntArray {
                "int"
            } else {
                "Integer"
            };
            Ok(format!("new {element}[]{{{}}}", parts?.join(", ")))
        }
        ValueType::IntMatrix => {
            let rows = value.as_array().ok_or_else(|| bad_value(ty, value))?;
            let parts: Result<Vec<String>> = rows
                .iter()
                .map(|row| {
                    let items = row.as_array().ok_or_else(|| bad_value(ty, row))?;
                    let inner: Result<Vec<String>> = items
                        .iter()
                        .map(|v| {
                            v.as_i64()
                                .map(|n| n.to_string())
                                .ok_or_else(|| bad_value(ty, v))
                        })
                        .collect();
                    Ok(format!("{{{}}}", inner?.join(", ")))
                })
                .collect();
            Ok(format!("new int[][]{{{}}}", parts?.join(", ")))
        }
        ValueType::DoubleArray => {
            let items = value.as_array().ok_or_else(|| bad_value(ty, value))?;
            let parts: Result<Vec<String>> = items
                .iter()
                .map(|v| {
                    v.as_f64()
                        .map(render_double)
                        .ok_or_else(|| bad_value(ty, v))
                })
                .collect();
            Ok(format!("new double[]{{{}}}", parts?.join(", ")))
        }
        ValueType::BoolArray => {
            let items = value.as_array().ok_or_else(|| bad_value(ty, value))?;
            let parts: Result<Vec<String>> = items
                .iter()
                .map(|v| {
                    v.as_bool()
                        .map(|b| b.to_string())
                        .ok_or_else(|| bad_value(ty, v))
                })
                .collect();
            Ok(format!("new boolean[]{{{}}}", parts?.join(", ")))
        }
        ValueType::StrArray => {
            let items = value.as_array().ok_or_else(|| bad_value(ty, value))?;
            let parts: Result<Vec<String>> = items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(quote_string)
                        .ok_or_else(|| bad_value(ty, v))
                })
                .collect();
            Ok(format!("new String[]{{{}}}", parts?.join(", ")))
        }
        ValueType::StrMatrix => {
            let rows = value.as_array().ok_or_else(|| bad_value(ty, value))?;
            let parts: Result<Vec<String>> = rows
                .iter()
                .map(|row| {
                    let items = row.as_array().ok_or_else(|| bad_value(ty, row))?;
                    let inner: Result<Vec<String>> = items
                        .iter()
                        .map(|v| {
                            v.as_str()
                                .map(quote_string)
                                .ok_or_else(|| bad_value(ty, v))
                        })
                        .collect();
                    Ok(format!("{{{}}}", inner?.join(", ")))
                })
                .collect();
            Ok(format!("new String[][]{{{}}}", parts?.join(", ")))
        }
        ValueType::Void => Err(bad_value(ty, value)),
    }
}

// ── C++ ───────────────────────────────────────────────────────────────

fn cpp_literal(ty: ValueType, value: &serde_json::Value) -> Result<String> {
    match ty {
        ValueType::Int => value
            .as_i64()
            .map(|n| n.to_string())
            .ok_or_else(|| bad_value(ty, value)),
        ValueType::Long => value
            .as_i64()
            .map(|n| format!("{n}LL"))
            .ok_or_else(|| bad_value(ty, value)),
        ValueType::Double => value
            .as_f64()
            .map(render_double)
            .ok_or_else(|| bad_value(ty, value)),
        ValueType::Bool => value
            .as_bool()
            .map(|b| b.to_string())
            .ok_or_else(|| bad_value(ty, value)),
        ValueType::Str => value
            .as_str()
            .map(|s| format!("string({})", quote_string(s)))
            .ok_or_else(|| bad_value(ty, value)),
        ValueType::IntArray | ValueType::List | ValueType::Tree => {
            // C++ node helpers take vector<int>; null serializes as the -1
            // sentinel. Problems with -1 as a legitimate value must use a
            // language that can carry null.
            let items = value.as_array().ok_or_else(|| bad_value(ty, value))?;
            let parts: Result<Vec<String>> = items
                .iter()
                .map(|v| match v {
                    serde_json::Value::Null if ty == ValueType::Tree => Ok("-1".to_string()),
                    other => other
                        .as_i64()
                        .map(|n| n.to_string())
                        .ok_or_else(|| bad_value(ty, other)),
                })
                .collect();
            Ok(format!("vector<int>{{{}}}", parts?.join(", ")))
        }
        ValueType::IntMatrix => {
            let rows = value.as_array().ok_or_else(|| bad_value(ty, value))?;
            let parts: Result<Vec<String>> = rows
                .iter()
                .map(|row| {
                    let items = row.as_array().ok_or_else(|| bad_value(ty, row))?;
                    let inner: Result<Vec<String>> = items
                        .iter()
                        .map(|v| {
                            v.as_i64()
                                .map(|n| n.to_string())
                                .ok_or_else(|| bad_value(ty, v))
                        })
                        .collect();
                    Ok(format!("{{{}}}", inner?.join(", ")))
                })
                .collect();
            Ok(format!("vector<vector<int>>{{{}}}", parts?.join(", ")))
        }
        ValueType::DoubleArray => {
            let items = value.as_array().ok_or_else(|| bad_value(ty, value))?;
            let parts: Result<Vec<String>> = items
                .iter()
                .map(|v| {
                    v.as_f64()
                        .map(render_double)
                        .ok_or_else(|| bad_value(ty, v))
                })
                .collect();
            Ok(format!("vector<double>{{{}}}", parts?.join(", ")))
        }
        ValueType::BoolArray => {
            let items = value.as_array().ok_or_else(|| bad_value(ty, value))?;
            let parts: Result<Vec<String>> = items
                .iter()
                .map(|v| {
                    v.as_bool()
                        .map(|b| b.to_string())
                        .ok_or_else(|| bad_value(ty, v))
                })
                .collect();
            Ok(format!("vector<bool>{{{}}}", parts?.join(", ")))
        }
        ValueType::StrArray => {
            let items = value.as_array().ok_or_else(|| bad_value(ty, value))?;
            let parts: Result<Vec<String>> = items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(|s| format!("string({})", quote_string(s)))
                        .ok_or_else(|| bad_value(ty, v))
                })
                .collect();
            Ok(format!("vector<string>{{{}}}", parts?.join(", ")))
        }
        ValueType::StrMatrix => {
            let rows = value.as_array().ok_or_else(|| bad_value(ty, value))?;
            let parts: Result<Vec<String>> = rows
                .iter()
                .map(|row| {
                    let items = row.as_array().ok_or_else(|| bad_value(ty, row))?;
                    let inner: Result<Vec<String>> = items
                        .iter()
                        .map(|v| {
                            v.as_str()
                                .map(|s| format!("string({})", quote_string(s)))
                                .ok_or_else(|| bad_value(ty, v))
                        })
                        .collect();
                    Ok(format!("{{{}}}", inner?.join(", ")))
                })
                .collect();
            Ok(format!("vector<vector<string>>{{{}}}", parts?.join(", ")))
        }
        ValueType::Void => Err(bad_value(ty, value)),
    }
}

// ── Shared helpers ────────────────────────────────────────────────────

/// Double-quote a string with C-family escapes.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render a double so it parses as a floating literal (42 → 42.0).
fn render_double(v: f64) -> String {
    if v.fract() == 0.0 && v.is_finite() && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}
