// JavaScript batch driver generation.

use crate::error::Result;
use crate::store::TestCase;

use super::literals::render;
use super::{cycle_pos, Language, ResolvedSignature, ValueType};

const LIST_HELPERS: &str = r#"class ListNode {
    constructor(val, next) {
        this.val = val === undefined ? 0 : val;
        this.next = next === undefined ? null : next;
    }
}

function deserializeList(arr) {
    let head = null;
    let tail = null;
    for (const v of arr) {
        const node = new ListNode(v);
        if (tail === null) {
            head = node;
        } else {
            tail.next = node;
        }
        tail = node;
    }
    return head;
}

function serializeList(head) {
    const out = [];
    let hops = 0;
    while (head !== null && hops < 100000) {
        out.push(head.val);
        head = head.next;
        hops += 1;
    }
    return out;
}

function attachCycle(head, pos) {
    if (head === null || pos < 0) return head;
    let tail = head;
    while (tail.next !== null) tail = tail.next;
    let target = head;
    for (let i = 0; i < pos && target.next !== null; i++) target = target.next;
    tail.next = target;
    return head;
}
"#;

const TREE_HELPERS: &str = r#"class TreeNode {
    constructor(val, left, right) {
        this.val = val === undefined ? 0 : val;
        this.left = left === undefined ? null : left;
        this.right = right === undefined ? null : right;
    }
}

function deserializeTree(arr) {
    if (!arr || arr.length === 0 || arr[0] === null) return null;
    const root = new TreeNode(arr[0]);
    const queue = [root];
    let i = 1;
    while (queue.length > 0 && i < arr.length) {
        const node = queue.shift();
        if (i < arr.length) {
            const v = arr[i++];
            if (v !== null) {
                node.left = new TreeNode(v);
                queue.push(node.left);
            }
        }
        if (i < arr.length) {
            const v = arr[i++];
            if (v !== null) {
                node.right = new TreeNode(v);
                queue.push(node.right);
            }
        }
    }
    return root;
}

function serializeTree(root) {
    if (root === null) return [];
    const out = [];
    const queue = [root];
    while (queue.length > 0) {
        const node = queue.shift();
        if (node === null) {
            out.push(null);
        } else {
            out.push(node.val);
            queue.push(node.left);
            queue.push(node.right);
        }
    }
    while (out.length > 0 && out[out.length - 1] === null) out.pop();
    return out;
}
"#;

pub fn generate(
    signature: &ResolvedSignature,
    solution: &str,
    cases: &[TestCase],
) -> Result<String> {
    let mut out = String::new();
    if signature.uses_list() {
        out.push_str(LIST_HELPERS);
        out.push('\n');
    }
    if signature.uses_tree() {
        out.push_str(TREE_HELPERS);
        out.push('\n');
    }

    out.push_str(solution);
    out.push_str("\n\nconst _sol = new Solution();\n");

    for (i, case) in cases.iter().enumerate() {
        let mut arg_names = Vec::with_capacity(signature.params.len());
        for (j, ((_, vt, _), value)) in signature.params.iter().zip(&case.input).enumerate() {
            let name = format!("_arg_{i}_{j}");
            let literal = render(Language::Javascript, *vt, value)?;
            let expr = match vt {
                ValueType::List => format!("deserializeList({literal})"),
                ValueType::Tree => format!("deserializeTree({literal})"),
                _ => literal,
            };
            out.push_str(&format!("const {name} = {expr};\n"));
            if *vt == ValueType::List && j == 0 {
                if let Some(pos) = cycle_pos(case) {
                    out.push_str(&format!("attachCycle({name}, {pos});\n"));
                }
            }
            arg_names.push(name);
        }
        let call = format!("_sol.{}({})", signature.function_name, arg_names.join(", "));
        match signature.return_type {
            ValueType::Void => {
                out.push_str(&format!("{call};\nconsole.log(\"Test {i}: null\");\n"));
            }
            ValueType::List => {
                out.push_str(&format!("const _res_{i} = {call};\n"));
                out.push_str(&format!(
                    "console.log(\"Test {i}: \" + JSON.stringify(serializeList(_res_{i})));\n"
                ));
            }
            ValueType::Tree => {
                out.push_str(&format!("const _res_{i} = {call};\n"));
                out.push_str(&format!(
                    "console.log(\"Test {i}: \" + JSON.stringify(serializeTree(_res_{i})));\n"
                ));
            }
            _ => {
                out.push_str(&format!("const _res_{i} = {call};\n"));
                // undefined is not valid JSON; fold it to null
                out.push_str(&format!(
                    "console.log(\"Test {i}: \" + JSON.stringify(_res_{i} === undefined ? null : _res_{i}));\n"
                ));
            }
        }
    }

    Ok(out)
}
