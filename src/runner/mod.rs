// Batch runner generation.
//
// Wraps a candidate Solution in a per-language driver that materializes the
// test inputs as native literals, invokes the solution once per case, and
// prints one `Test i: <json>` line per case. The output program is fully
// self-contained; its stdout is deterministic line-per-test.

pub mod cpp;
pub mod java;
pub mod javascript;
pub mod literals;
pub mod python;

use crate::error::{CoreError, Result};
use crate::store::{Signature, TestCase};

/// Hard cap on cases per generated batch.
pub const MAX_BATCH_CASES: usize = 20;

/// Field in a case's `specialInputData` naming the linked-list cycle
/// position to attach to the first ListNode argument.
pub const CYCLE_POS_FIELD: &str = "cyclePos";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Javascript,
    Java,
    Cpp,
}

impl Language {
    pub fn parse(language: &str) -> Option<Language> {
        match crate::sandbox::canonical_language(language)? {
            "python" => Some(Language::Python),
            "javascript" => Some(Language::Javascript),
            "java" => Some(Language::Java),
            "cpp" => Some(Language::Cpp),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Java => "java",
            Language::Cpp => "cpp",
        }
    }

    pub fn sandbox_id(self) -> u32 {
        match self {
            Language::Python => crate::sandbox::LANG_PYTHON,
            Language::Javascript => crate::sandbox::LANG_JAVASCRIPT,
            Language::Java => crate::sandbox::LANG_JAVA,
            Language::Cpp => crate::sandbox::LANG_CPP,
        }
    }
}

/// The value shapes the driver knows how to pass and serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Int,
    Long,
    Double,
    Bool,
    Str,
    IntArray,
    IntMatrix,
    DoubleArray,
    BoolArray,
    StrArray,
    StrMatrix,
    /// Linked list, declared as `ListNode` or `ListNode[...]`.
    List,
    /// Binary tree, declared as `TreeNode` or `TreeNode[...]`.
    Tree,
    Void,
}

/// Map a signature type string to its value shape. Node types may carry an
/// element annotation (`ListNode[int]`) which is ignored beyond the prefix.
pub fn parse_type(ty: &str) -> Option<ValueType> {
    let ty = ty.trim();
    if ty.starts_with("ListNode") {
        return Some(ValueType::List);
    }
    if ty.starts_with("TreeNode") {
        return Some(ValueType::Tree);
    }

    let mut base = ty;
    let mut depth = 0;
    while let Some(stripped) = base.strip_suffix("[]") {
        base = stripped;
        depth += 1;
    }
    let scalar = match base {
        "int" | "integer" => ValueType::Int,
        "long" => ValueType::Long,
        "float" | "double" => ValueType::Double,
        "bool" | "boolean" => ValueType::Bool,
        "string" | "str" => ValueType::Str,
        "void" => ValueType::Void,
        _ => return None,
    };
    match (scalar, depth) {
        (v, 0) => Some(v),
        (ValueType::Int, 1) => Some(ValueType::IntArray),
        (ValueType::Int, 2) => Some(ValueType::IntMatrix),
        (ValueType::Double, 1) => Some(ValueType::DoubleArray),
        (ValueType::Bool, 1) => Some(ValueType::BoolArray),
        (ValueType::Str, 1) => Some(ValueType::StrArray),
        (ValueType::Str, 2) => Some(ValueType::StrMatrix),
        _ => None,
    }
}

/// Typed view of a signature, resolved once before generation.
pub struct ResolvedSignature {
    pub function_name: String,
    pub params: Vec<(String, ValueType, String)>,
    pub return_type: ValueType,
}

pub fn resolve_signature(signature: &Signature) -> Result<ResolvedSignature> {
    let mut params = Vec::with_capacity(signature.parameters.len());
    for p in &signature.parameters {
        let vt = parse_type(&p.ty).ok_or_else(|| {
            CoreError::InvalidRequest(format!("unsupported parameter type: {}", p.ty))
        })?;
        params.push((p.name.clone(), vt, p.ty.clone()));
    }
    let return_type = parse_type(&signature.return_type).ok_or_else(|| {
        CoreError::InvalidRequest(format!("unsupported return type: {}", signature.return_type))
    })?;
    Ok(ResolvedSignature {
        function_name: signature.function_name.clone(),
        params,
        return_type,
    })
}

impl ResolvedSignature {
    pub fn uses_list(&self) -> bool {
        self.return_type == ValueType::List
            || self.params.iter().any(|(_, vt, _)| *vt == ValueType::List)
    }

    pub fn uses_tree(&self) -> bool {
        self.return_type == ValueType::Tree
            || self.params.iter().any(|(_, vt, _)| *vt == ValueType::Tree)
    }
}

/// Cycle position for a case, from `specialInputData.cyclePos`.
pub fn cycle_pos(case: &TestCase) -> Option<i64> {
    case.special_input_data
        .as_ref()?
        .get(CYCLE_POS_FIELD)?
        .as_i64()
}

/// Generate the self-contained batch program.
pub fn generate(
    language: Language,
    signature: &Signature,
    solution: &str,
    cases: &[TestCase],
) -> Result<String> {
    if cases.len() > MAX_BATCH_CASES {
        return Err(CoreError::InvalidRequest(format!(
            "batch limit exceeded: {} cases (max {MAX_BATCH_CASES})",
            cases.len()
        )));
    }
    let resolved = resolve_signature(signature)?;
    for case in cases {
        if case.input.len() != resolved.params.len() {
            return Err(CoreError::InvalidRequest(format!(
                "case has {} inputs, signature takes {}",
                case.input.len(),
                resolved.params.len()
            )));
        }
    }
    match language {
        Language::Python => python::generate(&resolved, solution, cases),
        Language::Javascript => javascript::generate(&resolved, solution, cases),
        Language::Java => java::generate(&resolved, solution, cases),
        Language::Cpp => cpp::generate(&resolved, solution, cases),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use test_fixtures::*;

    #[test]
    fn test_parse_type_table() {
        assert_eq!(parse_type("int"), Some(ValueType::Int));
        assert_eq!(parse_type("int[]"), Some(ValueType::IntArray));
        assert_eq!(parse_type("int[][]"), Some(ValueType::IntMatrix));
        assert_eq!(parse_type("string"), Some(ValueType::Str));
        assert_eq!(parse_type("string[]"), Some(ValueType::StrArray));
        assert_eq!(parse_type("string[][]"), Some(ValueType::StrMatrix));
        assert_eq!(parse_type("double"), Some(ValueType::Double));
        assert_eq!(parse_type("float"), Some(ValueType::Double));
        assert_eq!(parse_type("bool"), Some(ValueType::Bool));
        assert_eq!(parse_type("boolean[]"), Some(ValueType::BoolArray));
        assert_eq!(parse_type("long"), Some(ValueType::Long));
        assert_eq!(parse_type("void"), Some(ValueType::Void));
        assert_eq!(parse_type("ListNode"), Some(ValueType::List));
        assert_eq!(parse_type("ListNode[int]"), Some(ValueType::List));
        assert_eq!(parse_type("TreeNode[int]"), Some(ValueType::Tree));
        assert_eq!(parse_type("map<string,int>"), None);
        assert_eq!(parse_type("int[][][]"), None);
    }

    #[test]
    fn test_generate_rejects_oversized_batch() {
        let sig = two_sum_signature();
        let case = two_sum_cases().remove(0);
        let cases: Vec<_> = (0..21).map(|_| case.clone()).collect();
        let err = generate(Language::Python, &sig, "class Solution: pass", &cases);
        assert!(matches!(err, Err(CoreError::InvalidRequest(_))));
    }

    #[test]
    fn test_generate_rejects_arity_mismatch() {
        let sig = two_sum_signature();
        let bad_case = TestCase {
            input: vec![serde_json::json!([1])],
            output: serde_json::json!([]),
            special_input_data: None,
        };
        let err = generate(Language::Python, &sig, "class Solution: pass", &[bad_case]);
        assert!(matches!(err, Err(CoreError::InvalidRequest(_))));
    }

    #[test]
    fn test_signature_helper_flags() {
        let sig = resolve_signature(&list_signature()).unwrap();
        assert!(sig.uses_list());
        assert!(!sig.uses_tree());

        let sig = resolve_signature(&tree_signature()).unwrap();
        assert!(sig.uses_tree());
        assert!(!sig.uses_list());

        let sig = resolve_signature(&two_sum_signature()).unwrap();
        assert!(!sig.uses_list());
        assert!(!sig.uses_tree());
    }

    #[test]
    fn test_cycle_pos_extraction() {
        let mut case = two_sum_cases().remove(0);
        assert_eq!(cycle_pos(&case), None);
        case.special_input_data = Some(serde_json::json!({ "cyclePos": 1 }));
        assert_eq!(cycle_pos(&case), Some(1));
    }

    #[test]
    fn test_all_languages_generate_for_common_signature() {
        let sig = two_sum_signature();
        let cases = two_sum_cases();
        for lang in [
            Language::Python,
            Language::Javascript,
            Language::Java,
            Language::Cpp,
        ] {
            let program = generate(lang, &sig, sample_solution(lang), &cases).unwrap();
            assert!(program.contains("Test 0: "), "{lang:?} missing case 0");
            assert!(program.contains("Test 1: "), "{lang:?} missing case 1");
        }
    }

    fn sample_solution(lang: Language) -> &'static str {
        match lang {
            Language::Python => "class Solution:\n    def twoSum(self, nums, target):\n        return []",
            Language::Javascript => "class Solution { twoSum(nums, target) { return []; } }",
            Language::Java => "class Solution { public int[] twoSum(int[] nums, int target) { return new int[]{}; } }",
            Language::Cpp => "class Solution { public: vector<int> twoSum(vector<int>& nums, int target) { return {}; } };",
        }
    }
}
