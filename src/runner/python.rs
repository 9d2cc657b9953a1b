// Python batch driver generation.

use crate::error::Result;
use crate::store::TestCase;

use super::literals::render;
use super::{cycle_pos, Language, ResolvedSignature, ValueType};

const LIST_HELPERS: &str = r#"class ListNode:
    def __init__(self, val=0, next=None):
        self.val = val
        self.next = next

def deserializeList(arr):
    head = None
    tail = None
    for v in arr:
        node = ListNode(v)
        if tail is None:
            head = node
        else:
            tail.next = node
        tail = node
    return head

def serializeList(head):
    out = []
    hops = 0
    while head is not None and hops < 100000:
        out.append(head.val)
        head = head.next
        hops += 1
    return out

def attachCycle(head, pos):
    if head is None or pos < 0:
        return head
    tail = head
    while tail.next is not None:
        tail = tail.next
    target = head
    for _ in range(pos):
        if target.next is None:
            break
        target = target.next
    tail.next = target
    return head
"#;

const TREE_HELPERS: &str = r#"class TreeNode:
    def __init__(self, val=0, left=None, right=None):
        self.val = val
        self.left = left
        self.right = right

def deserializeTree(arr):
    if not arr or arr[0] is None:
        return None
    root = TreeNode(arr[0])
    queue = [root]
    i = 1
    while queue and i < len(arr):
        node = queue.pop(0)
        if i < len(arr):
            v = arr[i]
            i += 1
            if v is not None:
                node.left = TreeNode(v)
                queue.append(node.left)
        if i < len(arr):
            v = arr[i]
            i += 1
            if v is not None:
                node.right = TreeNode(v)
                queue.append(node.right)
    return root

def serializeTree(root):
    if root is None:
        return []
    out = []
    queue = [root]
    while queue:
        node = queue.pop(0)
        if node is None:
            out.append(None)
        else:
            out.append(node.val)
            queue.append(node.left)
            queue.append(node.right)
    while out and out[-1] is None:
        out.pop()
    return out
"#;

pub fn generate(
    signature: &ResolvedSignature,
    solution: &str,
    cases: &[TestCase],
) -> Result<String> {
    let mut out = String::new();
    out.push_str("import json\n\n");
    if signature.uses_list() {
        out.push_str(LIST_HELPERS);
        out.push('\n');
    }
    if signature.uses_tree() {
        out.push_str(TREE_HELPERS);
        out.push('\n');
    }

    out.push_str(solution);
    out.push_str("\n\n_sol = Solution()\n");

    for (i, case) in cases.iter().enumerate() {
        let mut arg_names = Vec::with_capacity(signature.params.len());
        for (j, ((_, vt, _), value)) in signature.params.iter().zip(&case.input).enumerate() {
            let name = format!("_arg_{i}_{j}");
            let literal = render(Language::Python, *vt, value)?;
            let expr = match vt {
                ValueType::List => format!("deserializeList({literal})"),
                ValueType::Tree => format!("deserializeTree({literal})"),
                _ => literal,
            };
            out.push_str(&format!("{name} = {expr}\n"));
            if *vt == ValueType::List && j == 0 {
                if let Some(pos) = cycle_pos(case) {
                    out.push_str(&format!("attachCycle({name}, {pos})\n"));
                }
            }
            arg_names.push(name);
        }
        let call = format!("_sol.{}({})", signature.function_name, arg_names.join(", "));
        match signature.return_type {
            ValueType::Void => {
                out.push_str(&format!("{call}\nprint(\"Test {i}: null\")\n"));
            }
            ValueType::List => {
                out.push_str(&format!("_res_{i} = {call}\n"));
                out.push_str(&format!(
                    "print(\"Test {i}: \" + json.dumps(serializeList(_res_{i}), separators=(\",\", \":\")))\n"
                ));
            }
            ValueType::Tree => {
                out.push_str(&format!("_res_{i} = {call}\n"));
                out.push_str(&format!(
                    "print(\"Test {i}: \" + json.dumps(serializeTree(_res_{i}), separators=(\",\", \":\")))\n"
                ));
            }
            _ => {
                out.push_str(&format!("_res_{i} = {call}\n"));
                out.push_str(&format!(
                    "print(\"Test {i}: \" + json.dumps(_res_{i}, separators=(\",\", \":\")))\n"
                ));
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use crate::runner::test_fixtures::*;
    use crate::runner::{generate, Language};
    use crate::store::TestCase;

    #[test]
    fn test_plain_signature_skips_node_helpers() {
        let program = generate(
            Language::Python,
            &two_sum_signature(),
            "class Solution:\n    def twoSum(self, nums, target):\n        return []",
            &two_sum_cases(),
        )
        .unwrap();
        assert!(!program.contains("class ListNode"));
        assert!(!program.contains("class TreeNode"));
        assert!(program.contains("_arg_0_0 = [2, 7, 11, 15]"));
        assert!(program.contains("_arg_0_1 = 9"));
        assert!(program.contains("_sol.twoSum(_arg_0_0, _arg_0_1)"));
        assert!(program.contains("print(\"Test 0: \""));
        assert!(program.contains("print(\"Test 1: \""));
    }

    #[test]
    fn test_list_signature_inlines_helpers_and_cycle() {
        let cases = vec![TestCase {
            input: vec![serde_json::json!([1, 2, 3])],
            output: serde_json::json!([3, 2, 1]),
            special_input_data: Some(serde_json::json!({ "cyclePos": 0 })),
        }];
        let program = generate(
            Language::Python,
            &list_signature(),
            "class Solution:\n    def reverseList(self, head):\n        return head",
            &cases,
        )
        .unwrap();
        assert!(program.contains("class ListNode"));
        assert!(program.contains("_arg_0_0 = deserializeList([1, 2, 3])"));
        assert!(program.contains("attachCycle(_arg_0_0, 0)"));
        assert!(program.contains("serializeList(_res_0)"));
    }

    #[test]
    fn test_tree_signature_round_trips_through_helpers() {
        let cases = vec![TestCase {
            input: vec![serde_json::json!([1, null, 2])],
            output: serde_json::json!([1, 2]),
            special_input_data: None,
        }];
        let program = generate(
            Language::Python,
            &tree_signature(),
            "class Solution:\n    def invertTree(self, root):\n        return root",
            &cases,
        )
        .unwrap();
        assert!(program.contains("class TreeNode"));
        // Null carries through as None in the Python literal
        assert!(program.contains("deserializeTree([1, None, 2])"));
        assert!(program.contains("serializeTree(_res_0)"));
    }
}
