//! Decomposition tree: the offset-annotated result of applying a grammar to one file.
//!
//! Trees serialize to JSON (raw bytes as lowercase hex) and read back without loss, so
//! external tools can inspect or edit them and hand them to the reconstructor.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionNode {
    pub name: String,
    #[serde(default, rename = "pattern", skip_serializing_if = "Option::is_none")]
    pub pattern_name: Option<String>,
    #[serde(rename = "offset")]
    pub byte_offset: usize,
    #[serde(rename = "length")]
    pub byte_length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, with = "hex_bytes", skip_serializing_if = "Option::is_none")]
    pub raw: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DecompositionNode>,
    /// Recomputed at reconstruction (length, count or checksum field).
    #[serde(default, skip_serializing_if = "is_false")]
    pub derived: bool,
    /// Opaque bytes the grammar could not interpret (unknown variant, trailing data).
    #[serde(default, skip_serializing_if = "is_false")]
    pub unparsed: bool,
    /// Variant case key selected during decomposition (`None` for the default case).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case: Option<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_str(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(d)?;
        s.map(|s| hex::decode(s).map_err(serde::de::Error::custom)).transpose()
    }
}

impl DecompositionNode {
    pub fn leaf(name: impl Into<String>, byte_offset: usize, raw: Vec<u8>) -> Self {
        DecompositionNode {
            name: name.into(),
            pattern_name: None,
            byte_offset,
            byte_length: raw.len(),
            value: None,
            raw: Some(raw),
            children: Vec::new(),
            derived: false,
            unparsed: false,
            case: None,
        }
    }

    pub fn branch(name: impl Into<String>, byte_offset: usize) -> Self {
        DecompositionNode {
            name: name.into(),
            pattern_name: None,
            byte_offset,
            byte_length: 0,
            value: None,
            raw: None,
            children: Vec::new(),
            derived: false,
            unparsed: false,
            case: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty() && (self.raw.is_some() || self.value.is_some())
    }

    pub fn end(&self) -> usize {
        self.byte_offset.saturating_add(self.byte_length)
    }

    /// First direct child named `name`.
    pub fn child(&self, name: &str) -> Option<&DecompositionNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut DecompositionNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Descend by slash-separated names; `name[i]` picks the i-th child of that name.
    pub fn find(&self, path: &str) -> Option<&DecompositionNode> {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let (name, index) = split_index(segment);
            node = node.children.iter().filter(|c| c.name == name).nth(index)?;
        }
        Some(node)
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut DecompositionNode> {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let (name, index) = split_index(segment);
            node = node.children.iter_mut().filter(|c| c.name == name).nth(index)?;
        }
        Some(node)
    }

    /// Replace leaf content with raw bytes (clears any parsed value).
    pub fn set_raw(&mut self, bytes: impl Into<Vec<u8>>) {
        self.value = None;
        self.raw = Some(bytes.into());
    }

    /// Replace leaf content with a parsed value (encoded per the grammar type on
    /// reconstruction).
    pub fn set_value(&mut self, value: impl Into<Value>) {
        self.raw = None;
        self.value = Some(value.into());
    }

    /// Depth-first walk, parents before children.
    pub fn walk(&self, f: &mut impl FnMut(&DecompositionNode, usize)) {
        fn go(n: &DecompositionNode, depth: usize, f: &mut impl FnMut(&DecompositionNode, usize)) {
            f(n, depth);
            for c in &n.children {
                go(c, depth + 1, f);
            }
        }
        go(self, 0, f);
    }

    /// Check the layout invariant: children are contiguous, start at the parent's offset
    /// and exactly fill it; leaves hold as many bytes as they claim.
    pub fn check_layout(&self) -> Result<(), String> {
        if self.children.is_empty() {
            if let Some(raw) = &self.raw {
                if raw.len() != self.byte_length {
                    return Err(format!(
                        "{}: raw holds {} byte(s), length is {}",
                        self.name,
                        raw.len(),
                        self.byte_length
                    ));
                }
            }
            return Ok(());
        }
        let mut cursor = self.byte_offset;
        for c in &self.children {
            if c.byte_offset != cursor {
                return Err(format!(
                    "{}: child {} starts at {}, expected {}",
                    self.name, c.name, c.byte_offset, cursor
                ));
            }
            c.check_layout().map_err(|e| format!("{}/{}", self.name, e))?;
            cursor = c.end();
        }
        if cursor != self.end() {
            return Err(format!(
                "{}: children end at {}, node ends at {}",
                self.name,
                cursor,
                self.end()
            ));
        }
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(source: &str) -> serde_json::Result<Self> {
        serde_json::from_str(source)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&source)?)
    }
}

fn split_index(segment: &str) -> (&str, usize) {
    if let Some(open) = segment.find('[') {
        if let Some(idx) = segment[open + 1..].strip_suffix(']').and_then(|s| s.parse().ok()) {
            return (&segment[..open], idx);
        }
    }
    (segment, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DecompositionNode {
        let mut root = DecompositionNode::branch("TOY", 0);
        root.children.push(DecompositionNode::leaf("magic", 0, b"TOY\0".to_vec()));
        let mut len = DecompositionNode::leaf("len", 4, vec![3, 0, 0, 0]);
        len.raw = None;
        len.value = Some(Value::Int(3));
        len.derived = true;
        root.children.push(len);
        root.children.push(DecompositionNode::leaf("payload", 8, b"ABC".to_vec()));
        root.byte_length = 11;
        root
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let tree = sample();
        let json = tree.to_json().unwrap();
        assert!(json.contains("\"raw\": \"414243\""), "{}", json);
        assert!(json.contains("\"derived\": true"));
        assert!(!json.contains("unparsed"));
        let back = DecompositionNode::from_json(&json).unwrap();
        assert_eq!(back, tree);
    }

    #[test]
    fn layout_check() {
        let mut tree = sample();
        assert_eq!(tree.check_layout(), Ok(()));
        tree.children[2].byte_offset = 9;
        assert!(tree.check_layout().is_err());
    }

    #[test]
    fn find_with_index() {
        let mut root = DecompositionNode::branch("r", 0);
        let mut chunks = DecompositionNode::branch("chunks", 0);
        chunks.children.push(DecompositionNode::leaf("chunk", 0, vec![1]));
        chunks.children.push(DecompositionNode::leaf("chunk", 1, vec![2]));
        root.children.push(chunks);
        assert_eq!(root.find("chunks/chunk[1]").unwrap().raw, Some(vec![2]));
        assert_eq!(root.find("chunks/chunk").unwrap().raw, Some(vec![1]));
        assert!(root.find("chunks/chunk[2]").is_none());
        root.find_mut("chunks/chunk[1]").unwrap().set_raw(vec![9, 9]);
        assert_eq!(root.find("chunks/chunk[1]").unwrap().raw, Some(vec![9, 9]));
    }
}
