// Java batch driver generation.
//
// Layout: node classes first (top-level, so the Solution can name them),
// then the candidate Solution, then a Main class holding the helpers and
// the per-case driver.

use crate::error::Result;
use crate::store::TestCase;

use super::literals::render;
use super::{cycle_pos, Language, ResolvedSignature, ValueType};

const LIST_NODE_CLASS: &str = r#"class ListNode {
    int val;
    ListNode next;
    ListNode() {}
    ListNode(int val) { this.val = val; }
    ListNode(int val, ListNode next) { this.val = val; this.next = next; }
}
"#;

const TREE_NODE_CLASS: &str = r#"class TreeNode {
    int val;
    TreeNode left;
    TreeNode right;
    TreeNode() {}
    TreeNode(int val) { this.val = val; }
    TreeNode(int val, TreeNode left, TreeNode right) {
        this.val = val;
        this.left = left;
        this.right = right;
    }
}
"#;

const LIST_HELPERS: &str = r#"    static ListNode deserializeList(Integer[] arr) {
        ListNode head = null;
        ListNode tail = null;
        for (Integer v : arr) {
            ListNode node = new ListNode(v);
            if (tail == null) {
                head = node;
            } else {
                tail.next = node;
            }
            tail = node;
        }
        return head;
    }

    static List<Integer> serializeList(ListNode head) {
        List<Integer> out = new ArrayList<>();
        int hops = 0;
        while (head != null && hops < 100000) {
            out.add(head.val);
            head = head.next;
            hops++;
        }
        return out;
    }

    static void attachCycle(ListNode head, int pos) {
        if (head == null || pos < 0) return;
        ListNode tail = head;
        while (tail.next != null) tail = tail.next;
        ListNode target = head;
        for (int i = 0; i < pos && target.next != null; i++) target = target.next;
        tail.next = target;
    }
"#;

const TREE_HELPERS: &str = r#"    static TreeNode deserializeTree(Integer[] arr) {
        if (arr.length == 0 || arr[0] == null) return null;
        TreeNode root = new TreeNode(arr[0]);
        Deque<TreeNode> queue = new ArrayDeque<>();
        queue.add(root);
        int i = 1;
        while (!queue.isEmpty() && i < arr.length) {
            TreeNode node = queue.poll();
            if (i < arr.length) {
                Integer v = arr[i++];
                if (v != null) {
                    node.left = new TreeNode(v);
                    queue.add(node.left);
                }
            }
            if (i < arr.length) {
                Integer v = arr[i++];
                if (v != null) {
                    node.right = new TreeNode(v);
                    queue.add(node.right);
                }
            }
        }
        return root;
    }

    static List<Integer> serializeTree(TreeNode root) {
        List<Integer> out = new ArrayList<>();
        if (root == null) return out;
        Deque<TreeNode> queue = new ArrayDeque<>();
        queue.add(root);
        while (!queue.isEmpty()) {
            TreeNode node = queue.poll();
            if (node == null) {
                out.add(null);
            } else {
                out.add(node.val);
                queue.add(node.left);
                queue.add(node.right);
            }
        }
        while (!out.isEmpty() && out.get(out.size() - 1) == null) {
            out.remove(out.size() - 1);
        }
        return out;
    }
"#;

fn java_type(vt: ValueType) -> &'static str {
    match vt {
        ValueType::Int => "int",
        ValueType::Long => "long",
        ValueType::Double => "double",
        ValueType::Bool => "boolean",
        ValueType::Str => "String",
        ValueType::IntArray => "int[]",
        ValueType::IntMatrix => "int[][]",
        ValueType::DoubleArray => "double[]",
        ValueType::BoolArray => "boolean[]",
        ValueType::StrArray => "String[]",
        ValueType::StrMatrix => "String[][]",
        ValueType::List => "ListNode",
        ValueType::Tree => "TreeNode",
        ValueType::Void => "void",
    }
}

/// The JSON printer. Node branches are only emitted when the matching
/// helper classes exist, otherwise the program would not compile.
fn to_json_helper(uses_list: bool, uses_tree: bool) -> String {
    let mut out = String::from(
        r#"    static String quote(String s) {
        StringBuilder sb = new StringBuilder("\"");
        for (char c : s.toCharArray()) {
            switch (c) {
                case '"': sb.append("\\\""); break;
                case '\\': sb.append("\\\\"); break;
                case '\n': sb.append("\\n"); break;
                case '\r': sb.append("\\r"); break;
                case '\t': sb.append("\\t"); break;
                default:
                    if (c < 0x20) sb.append(String.format("\\u%04x", (int) c));
                    else sb.append(c);
            }
        }
        return sb.append('"').toString();
    }

    static String toJson(Object v) {
        if (v == null) return "null";
"#,
    );
    if uses_list {
        out.push_str("        if (v instanceof ListNode) return toJson(serializeList((ListNode) v));\n");
    }
    if uses_tree {
        out.push_str("        if (v instanceof TreeNode) return toJson(serializeTree((TreeNode) v));\n");
    }
    out.push_str(
        r#"        if (v instanceof String) return quote((String) v);
        if (v instanceof Double || v instanceof Float) {
            double d = ((Number) v).doubleValue();
            if (d == Math.floor(d) && !Double.isInfinite(d)) return String.format("%.1f", d);
            return String.valueOf(d);
        }
        if (v instanceof Number || v instanceof Boolean) return String.valueOf(v);
        if (v instanceof int[]) {
            StringBuilder sb = new StringBuilder("[");
            int[] a = (int[]) v;
            for (int i = 0; i < a.length; i++) {
                if (i > 0) sb.append(",");
                sb.append(a[i]);
            }
            return sb.append("]").toString();
        }
        if (v instanceof long[]) {
            StringBuilder sb = new StringBuilder("[");
            long[] a = (long[]) v;
            for (int i = 0; i < a.length; i++) {
                if (i > 0) sb.append(",");
                sb.append(a[i]);
            }
            return sb.append("]").toString();
        }
        if (v instanceof double[]) {
            StringBuilder sb = new StringBuilder("[");
            double[] a = (double[]) v;
            for (int i = 0; i < a.length; i++) {
                if (i > 0) sb.append(",");
                sb.append(toJson(a[i]));
            }
            return sb.append("]").toString();
        }
        if (v instanceof boolean[]) {
            StringBuilder sb = new StringBuilder("[");
            boolean[] a = (boolean[]) v;
            for (int i = 0; i < a.length; i++) {
                if (i > 0) sb.append(",");
                sb.append(a[i]);
            }
            return sb.append("]").toString();
        }
        if (v instanceof Object[]) {
            StringBuilder sb = new StringBuilder("[");
            Object[] a = (Object[]) v;
            for (int i = 0; i < a.length; i++) {
                if (i > 0) sb.append(",");
                sb.append(toJson(a[i]));
            }
            return sb.append("]").toString();
        }
        if (v instanceof List) {
            StringBuilder sb = new StringBuilder("[");
            List<?> a = (List<?>) v;
            for (int i = 0; i < a.size(); i++) {
                if (i > 0) sb.append(",");
                sb.append(toJson(a.get(i)));
            }
            return sb.append("]").toString();
        }
        return quote(String.valueOf(v));
    }
"#,
    );
    out
}

pub fn generate(
    signature: &ResolvedSignature,
    solution: &str,
    cases: &[TestCase],
) -> Result<String> {
    let uses_list = signature.uses_list();
    let uses_tree = signature.uses_tree();

    let mut out = String::new();
    out.push_str("import java.util.*;\n\n");
    if uses_list {
        out.push_str(LIST_NODE_CLASS);
        out.push('\n');
    }
    if uses_tree {
        out.push_str(TREE_NODE_CLASS);
        out.push('\n');
    }

    out.push_str(solution);
    out.push_str("\n\npublic class Main {\n");
    if uses_list {
        out.push_str(LIST_HELPERS);
        out.push('\n');
    }
    if uses_tree {
        out.push_str(TREE_HELPERS);
        out.push('\n');
    }
    out.push_str(&to_json_helper(uses_list, uses_tree));
    out.push_str("\n    public static void main(String[] args) {\n");
    out.push_str("        Solution _sol = new Solution();\n");

    for (i, case) in cases.iter().enumerate() {
        let mut arg_names = Vec::with_capacity(signature.params.len());
        for (j, ((_, vt, _), value)) in signature.params.iter().zip(&case.input).enumerate() {
            let name = format!("_arg_{i}_{j}");
            let literal = render(Language::Java, *vt, value)?;
            let expr = match vt {
                ValueType::List => format!("deserializeList({literal})"),
                ValueType::Tree => format!("deserializeTree({literal})"),
                _ => literal,
            };
            out.push_str(&format!("        {} {name} = {expr};\n", java_type(*vt)));
            if *vt == ValueType::List && j == 0 {
                if let Some(pos) = cycle_pos(case) {
                    out.push_str(&format!("        attachCycle({name}, {pos});\n"));
                }
            }
            arg_names.push(name);
        }
        let call = format!("_sol.{}({})", signature.function_name, arg_names.join(", "));
        if signature.return_type == ValueType::Void {
            out.push_str(&format!("        {call};\n"));
            out.push_str(&format!(
                "        System.out.println(\"Test {i}: null\");\n"
            ));
        } else {
            out.push_str(&format!(
                "        {} _res_{i} = {call};\n",
                java_type(signature.return_type)
            ));
            out.push_str(&format!(
                "        System.out.println(\"Test {i}: \" + toJson(_res_{i}));\n"
            ));
        }
    }

    out.push_str("    }\n}\n");
    Ok(out)
}
