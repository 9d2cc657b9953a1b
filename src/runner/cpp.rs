// C++ batch driver generation.
//
// Inputs become named lvalue variables so solutions taking non-const
// references still bind. The linked-list/tree null sentinel is -1 because
// vector<int> cannot carry null.

use crate::error::Result;
use crate::store::TestCase;

use super::literals::render;
use super::{cycle_pos, Language, ResolvedSignature, ValueType};

const LIST_HELPERS: &str = r#"struct ListNode {
    int val;
    ListNode *next;
    ListNode() : val(0), next(nullptr) {}
    ListNode(int x) : val(x), next(nullptr) {}
    ListNode(int x, ListNode *next) : val(x), next(next) {}
};

ListNode* deserializeList(const vector<int>& arr) {
    ListNode* head = nullptr;
    ListNode* tail = nullptr;
    for (int v : arr) {
        ListNode* node = new ListNode(v);
        if (tail == nullptr) {
            head = node;
        } else {
            tail->next = node;
        }
        tail = node;
    }
    return head;
}

vector<int> serializeList(ListNode* head) {
    vector<int> out;
    int hops = 0;
    while (head != nullptr && hops < 100000) {
        out.push_back(head->val);
        head = head->next;
        hops++;
    }
    return out;
}

void attachCycle(ListNode* head, int pos) {
    if (head == nullptr || pos < 0) return;
    ListNode* tail = head;
    while (tail->next != nullptr) tail = tail->next;
    ListNode* target = head;
    for (int i = 0; i < pos && target->next != nullptr; i++) target = target->next;
    tail->next = target;
}
"#;

const TREE_HELPERS: &str = r#"struct TreeNode {
    int val;
    TreeNode *left;
    TreeNode *right;
    TreeNode() : val(0), left(nullptr), right(nullptr) {}
    TreeNode(int x) : val(x), left(nullptr), right(nullptr) {}
    TreeNode(int x, TreeNode *left, TreeNode *right) : val(x), left(left), right(right) {}
};

// -1 is the null sentinel in the level-order encoding.
TreeNode* deserializeTree(const vector<int>& arr) {
    if (arr.empty() || arr[0] == -1) return nullptr;
    TreeNode* root = new TreeNode(arr[0]);
    deque<TreeNode*> queue;
    queue.push_back(root);
    size_t i = 1;
    while (!queue.empty() && i < arr.size()) {
        TreeNode* node = queue.front();
        queue.pop_front();
        if (i < arr.size()) {
            int v = arr[i++];
            if (v != -1) {
                node->left = new TreeNode(v);
                queue.push_back(node->left);
            }
        }
        if (i < arr.size()) {
            int v = arr[i++];
            if (v != -1) {
                node->right = new TreeNode(v);
                queue.push_back(node->right);
            }
        }
    }
    return root;
}

vector<int> serializeTree(TreeNode* root) {
    vector<int> out;
    if (root == nullptr) return out;
    deque<TreeNode*> queue;
    queue.push_back(root);
    while (!queue.empty()) {
        TreeNode* node = queue.front();
        queue.pop_front();
        if (node == nullptr) {
            out.push_back(-1);
        } else {
            out.push_back(node->val);
            queue.push_back(node->left);
            queue.push_back(node->right);
        }
    }
    while (!out.empty() && out.back() == -1) out.pop_back();
    return out;
}
"#;

/// JSON printer overloads. The template covers nested vectors; node
/// overloads are appended only when the helper structs exist.
fn to_json_helpers(uses_list: bool, uses_tree: bool) -> String {
    let mut out = String::from(
        r#"string toJson(int v) { return to_string(v); }
string toJson(long long v) { return to_string(v); }
string toJson(bool v) { return v ? "true" : "false"; }
string toJson(double v) {
    ostringstream os;
    os << setprecision(17) << v;
    string s = os.str();
    if (s.find('.') == string::npos && s.find('e') == string::npos &&
        s.find("inf") == string::npos && s.find("nan") == string::npos) {
        s += ".0";
    }
    return s;
}
string toJson(const string& s) {
    string out = "\"";
    for (char c : s) {
        switch (c) {
            case '"': out += "\\\""; break;
            case '\\': out += "\\\\"; break;
            case '\n': out += "\\n"; break;
            case '\r': out += "\\r"; break;
            case '\t': out += "\\t"; break;
            default: out += c;
        }
    }
    out += "\"";
    return out;
}
template <typename T>
string toJson(const vector<T>& v) {
    string out = "[";
    for (size_t i = 0; i < v.size(); i++) {
        if (i > 0) out += ",";
        out += toJson(v[i]);
    }
    out += "]";
    return out;
}
"#,
    );
    if uses_list {
        out.push_str("string toJson(ListNode* head) { return toJson(serializeList(head)); }\n");
    }
    if uses_tree {
        out.push_str("string toJson(TreeNode* root) { return toJson(serializeTree(root)); }\n");
    }
    out
}

fn cpp_type(vt: ValueType) -> &'static str {
    match vt {
        ValueType::Int => "int",
        ValueType::Long => "long long",
        ValueType::Double => "double",
        ValueType::Bool => "bool",
        ValueType::Str => "string",
        ValueType::IntArray => "vector<int>",
        ValueType::IntMatrix => "vector<vector<int>>",
        ValueType::DoubleArray => "vector<double>",
        ValueType::BoolArray => "vector<bool>",
        ValueType::StrArray => "vector<string>",
        ValueType::StrMatrix => "vector<vector<string>>",
        ValueType::List => "ListNode*",
        ValueType::Tree => "TreeNode*",
        ValueType::Void => "void",
    }
}

pub fn generate(
    signature: &ResolvedSignature,
    solution: &str,
    cases: &[TestCase],
) -> Result<String> {
    let uses_list = signature.uses_list();
    let uses_tree = signature.uses_tree();

    let mut out = String::new();
    out.push_str("#include <bits/stdc++.h>\nusing namespace std;\n\n");
    if uses_list {
        out.push_str(LIST_HELPERS);
        out.push('\n');
    }
    if uses_tree {
        out.push_str(TREE_HELPERS);
        out.push('\n');
    }
    out.push_str(&to_json_helpers(uses_list, uses_tree));
    out.push('\n');

    out.push_str(solution);
    out.push_str("\n\nint main() {\n    Solution _sol;\n");

    for (i, case) in cases.iter().enumerate() {
        let mut arg_names = Vec::with_capacity(signature.params.len());
        for (j, ((_, vt, _), value)) in signature.params.iter().zip(&case.input).enumerate() {
            let name = format!("_arg_{i}_{j}");
            let literal = render(Language::Cpp, *vt, value)?;
            let expr = match vt {
                ValueType::List => format!("deserializeList({literal})"),
                ValueType::Tree => format!("deserializeTree({literal})"),
                _ => literal,
            };
            out.push_str(&format!("    {} {name} = {expr};\n", cpp_type(*vt)));
            if *vt == ValueType::List && j == 0 {
                if let Some(pos) = cycle_pos(case) {
                    out.push_str(&format!("    attachCycle({name}, {pos});\n"));
                }
            }
            arg_names.push(name);
        }
        let call = format!("_sol.{}({})", signature.function_name, arg_names.join(", "));
        if signature.return_type == ValueType::Void {
            out.push_str(&format!("    {call};\n"));
            out.push_str(&format!("    cout << \"Test {i}: null\" << \"\\n\";\n"));
        } else {
            out.push_str(&format!("    auto _res_{i} = {call};\n"));
            out.push_str(&format!(
                "    cout << \"Test {i}: \" << toJson(_res_{i}) << \"\\n\";\n"
            ));
        }
    }

    out.push_str("    return 0;\n}\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::runner::test_fixtures::*;
    use crate::runner::{generate, Language};
    use crate::store::TestCase;

    const TWO_SUM: &str = "class Solution { public: vector<int> twoSum(vector<int>& nums, int target) { return {}; } };";

    #[test]
    fn test_plain_signature_driver() {
        let program =
            generate(Language::Cpp, &two_sum_signature(), TWO_SUM, &two_sum_cases()).unwrap();
        assert!(program.contains("#include <bits/stdc++.h>"));
        // Named lvalues, not temporaries, so `vector<int>&` parameters bind
        assert!(program.contains("vector<int> _arg_0_0 = vector<int>{2, 7, 11, 15};"));
        assert!(program.contains("int _arg_0_1 = 9;"));
        assert!(program.contains("auto _res_0 = _sol.twoSum(_arg_0_0, _arg_0_1);"));
        assert!(program.contains("cout << \"Test 0: \" << toJson(_res_0)"));
        assert!(!program.contains("struct ListNode"));
    }

    #[test]
    fn test_list_driver_with_cycle() {
        let cases = vec![TestCase {
            input: vec![serde_json::json!([3, 2, 0, -4])],
            output: serde_json::json!(true),
            special_input_data: Some(serde_json::json!({ "cyclePos": 1 })),
        }];
        let program = generate(
            Language::Cpp,
            &list_signature(),
            "class Solution { public: ListNode* reverseList(ListNode* head) { return head; } };",
            &cases,
        )
        .unwrap();
        assert!(program.contains("struct ListNode"));
        assert!(program.contains("ListNode* _arg_0_0 = deserializeList(vector<int>{3, 2, 0, -4});"));
        assert!(program.contains("attachCycle(_arg_0_0, 1);"));
    }

    #[test]
    fn test_tree_null_becomes_sentinel() {
        let cases = vec![TestCase {
            input: vec![serde_json::json!([1, null, 2])],
            output: serde_json::json!([1, 2]),
            special_input_data: None,
        }];
        let program = generate(
            Language::Cpp,
            &tree_signature(),
            "class Solution { public: TreeNode* invertTree(TreeNode* root) { return root; } };",
            &cases,
        )
        .unwrap();
        assert!(program.contains("deserializeTree(vector<int>{1, -1, 2})"));
        assert!(program.contains("out.push_back(-1);"));
    }
}
