use crate::coords::{self, Point};
use crate::error::{ControlError, ParseError};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One element of a captured UI tree.
///
/// `index` is the node's position in the flattened sequence and `depth` its
/// nesting level (the root is 0). Together they let [`Tree::subtree`] hand out
/// a node's descendants as a contiguous slice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub index: usize,
    pub depth: usize,
}

impl Node {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn text(&self) -> Option<&str> {
        self.attr("text")
    }

    pub fn bounds(&self) -> Option<&str> {
        self.attr("bounds")
    }

    /// Tap target for this node. A node without `bounds` is malformed for this purpose.
    pub fn centroid(&self) -> Result<Point, ParseError> {
        coords::centroid(self.bounds().unwrap_or_default())
    }
}

/// A UI snapshot flattened in document (pre-)order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn parse(xml: &str) -> Result<Self, ParseError> {
        flatten(xml)
    }

    pub fn load(path: &Path) -> Result<Self, ControlError> {
        let xml = std::fs::read_to_string(path)
            .map_err(|e| ControlError::Store(format!("read {}: {}", path.display(), e)))?;
        Ok(flatten(&xml)?)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Descendants of `node`, in document order. Empty for leaves and for
    /// nodes that do not belong to this tree.
    pub fn subtree(&self, node: &Node) -> &[Node] {
        match self.nodes.get(node.index) {
            Some(own) if own == node => {
                let start = node.index + 1;
                let end = self.nodes[start..]
                    .iter()
                    .position(|n| n.depth <= node.depth)
                    .map_or(self.nodes.len(), |offset| start + offset);
                &self.nodes[start..end]
            }
            _ => &[],
        }
    }
}

/// Flattens a uiautomator XML dump into a pre-order sequence of nodes.
pub fn flatten(xml: &str) -> Result<Tree, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut nodes = Vec::new();
    let mut open: Vec<String> = Vec::new();
    let mut seen_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ParseError::Snapshot(format!("at byte {}: {}", reader.buffer_position(), e)))?;
        match event {
            Event::Start(start) => {
                let node = element(&reader, &start, nodes.len(), open.len(), &mut seen_root)?;
                open.push(node.tag.clone());
                nodes.push(node);
            }
            Event::Empty(start) => {
                let node = element(&reader, &start, nodes.len(), open.len(), &mut seen_root)?;
                nodes.push(node);
            }
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                match open.pop() {
                    Some(tag) if tag == name => {}
                    Some(tag) => {
                        return Err(ParseError::Snapshot(format!(
                            "expected </{tag}>, found </{name}>"
                        )))
                    }
                    None => return Err(ParseError::Snapshot(format!("unexpected </{name}>"))),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(tag) = open.pop() {
        return Err(ParseError::Snapshot(format!("unclosed <{tag}>")));
    }
    if nodes.is_empty() {
        return Err(ParseError::Snapshot("no elements".into()));
    }
    Ok(Tree { nodes })
}

fn element(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
    index: usize,
    depth: usize,
    seen_root: &mut bool,
) -> Result<Node, ParseError> {
    if depth == 0 {
        if *seen_root {
            return Err(ParseError::Snapshot("multiple root elements".into()));
        }
        *seen_root = true;
    }

    let tag = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| ParseError::Snapshot(e.to_string()))?
        .to_string();

    let mut attributes = BTreeMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| ParseError::Snapshot(format!("<{tag}>: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| ParseError::Snapshot(format!("<{tag} {key}>: {e}")))?;
        attributes.insert(key, value.into_owned());
    }

    Ok(Node { tag, attributes, index, depth })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="" resource-id="root" bounds="[0,0][1080,2400]">
    <node index="0" text="Chats" resource-id="title" bounds="[0,0][1080,200]" />
    <node index="1" text="" resource-id="list" bounds="[0,200][1080,2400]">
      <node index="2" text="Bob &amp; Co" resource-id="name" bounds="[0,200][540,300]" />
    </node>
  </node>
  <node index="1" text="Footer" resource-id="footer" bounds="[0,2300][1080,2400]" />
</hierarchy>"#;

    fn ids(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.attr("resource-id").unwrap_or(&n.tag)).collect()
    }

    #[test]
    fn flattens_in_pre_order() {
        let tree = flatten(DUMP).unwrap();
        assert_eq!(ids(tree.nodes()), vec!["hierarchy", "root", "title", "list", "name", "footer"]);
        let depths: Vec<usize> = tree.nodes().iter().map(|n| n.depth).collect();
        assert_eq!(depths, vec![0, 1, 2, 2, 3, 1]);
        for (i, n) in tree.nodes().iter().enumerate() {
            assert_eq!(n.index, i);
        }
    }

    #[test]
    fn attributes_are_unescaped() {
        let tree = flatten(DUMP).unwrap();
        assert_eq!(tree.nodes()[4].text(), Some("Bob & Co"));
        assert_eq!(tree.nodes()[0].attr("rotation"), Some("0"));
    }

    #[test]
    fn subtree_is_descendants_only() {
        let tree = flatten(DUMP).unwrap();
        let root = &tree.nodes()[1];
        assert_eq!(ids(tree.subtree(root)), vec!["title", "list", "name"]);
        let list = &tree.nodes()[3];
        assert_eq!(ids(tree.subtree(list)), vec!["name"]);
        assert!(tree.subtree(&tree.nodes()[5]).is_empty());
        assert_eq!(tree.subtree(&tree.nodes()[0]).len(), 5);
    }

    #[test]
    fn subtree_of_foreign_node_is_empty() {
        let tree = flatten(DUMP).unwrap();
        let other = flatten("<a><b/></a>").unwrap();
        assert!(tree.subtree(&other.nodes()[0]).is_empty());
    }

    #[test]
    fn malformed_snapshots_fail() {
        for bad in [
            "",
            "<hierarchy><node></hierarchy>",
            "<hierarchy><node>",
            "</node>",
            "<a/><b/>",
            "<node text=\"unterminated></node>",
        ] {
            assert!(matches!(flatten(bad), Err(ParseError::Snapshot(_))), "{bad:?}");
        }
    }

    #[test]
    fn node_centroid_uses_bounds() {
        let tree = flatten(DUMP).unwrap();
        assert_eq!(tree.nodes()[2].centroid().unwrap(), Point::new(540.0, 100.0));
        assert!(tree.nodes()[0].centroid().is_err());
    }
}
