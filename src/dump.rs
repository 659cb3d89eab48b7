//! Format decomposition trees for display (dump text, `bingram dump`).

use crate::tree::DecompositionNode;
use crate::value::Value;

/// Raw bytes shown per leaf before the dump truncates with `...`.
pub const MAX_HEX_BYTES: usize = 16;

fn hex_string(b: &[u8]) -> String {
    let shown = b.iter().take(MAX_HEX_BYTES).map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ");
    if b.len() > MAX_HEX_BYTES {
        format!("{} ... ({} bytes)", shown, b.len())
    } else {
        shown
    }
}

/// One-line summary of a node's content: the parsed value, or its raw bytes as hex.
pub fn value_summary(node: &DecompositionNode) -> Option<String> {
    match (&node.value, &node.raw) {
        (Some(Value::Int(n)), _) if node.derived => Some(format!("{} (derived)", n)),
        (Some(v), _) => Some(v.to_string()),
        (None, Some(raw)) => Some(format!("hex({})", hex_string(raw))),
        (None, None) => None,
    }
}

/// Render `tree` as text, one line per node, indented by depth:
/// `name @offset+length [PATTERN] = value`.
pub fn tree_to_dump(tree: &DecompositionNode) -> String {
    let mut lines = Vec::new();
    tree.walk(&mut |node, depth| {
        let pad = "  ".repeat(depth);
        let mut line = format!("{}{} @{}+{}", pad, node.name, node.byte_offset, node.byte_length);
        if let Some(p) = &node.pattern_name {
            line.push_str(&format!(" [{}]", p));
        }
        if let Some(case) = &node.case {
            line.push_str(&format!(" <case {}>", case));
        }
        if node.unparsed {
            line.push_str(" <unparsed>");
        }
        if node.children.is_empty() {
            if let Some(v) = value_summary(node) {
                line.push_str(" = ");
                line.push_str(&v);
            }
        }
        lines.push(line);
    });
    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_lines() {
        let mut root = DecompositionNode::branch("TOY", 0);
        let mut magic = DecompositionNode::leaf("magic", 0, b"TOY\0".to_vec());
        magic.pattern_name = Some("MAGIC_NUMBER".to_string());
        root.children.push(magic);
        let mut len = DecompositionNode::leaf("len", 4, Vec::new());
        len.raw = None;
        len.byte_length = 4;
        len.value = Some(Value::Int(40));
        len.derived = true;
        root.children.push(len);
        root.children.push(DecompositionNode::leaf("payload", 8, (0..40).collect()));
        root.byte_length = 48;

        let text = tree_to_dump(&root);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "TOY @0+48");
        assert_eq!(lines[1], "  magic @0+4 [MAGIC_NUMBER] = hex(54 4f 59 00)");
        assert_eq!(lines[2], "  len @4+4 = 40 (derived)");
        assert!(lines[3].starts_with("  payload @8+40 = hex(00 01 02"));
        assert!(lines[3].ends_with("... (40 bytes)"));
    }
}
