//! Predicate queries over a flattened UI tree.
//!
//! A scope is any slice of nodes: the whole [`Tree`](crate::tree::Tree) or the
//! descendants of an earlier match via [`Tree::subtree`](crate::tree::Tree::subtree).
//! Finding nothing is an ordinary outcome (`None` / empty `Vec`), not an error.

use crate::tree::Node;

pub fn find_first<'a, P>(scope: &'a [Node], predicate: P) -> Option<&'a Node>
where
    P: Fn(&Node) -> bool,
{
    scope.iter().find(|n| predicate(n))
}

pub fn find_all<'a, P>(scope: &'a [Node], predicate: P) -> Vec<&'a Node>
where
    P: Fn(&Node) -> bool,
{
    scope.iter().filter(|n| predicate(n)).collect()
}

pub fn attr_eq<'a>(name: &'a str, value: &'a str) -> impl Fn(&Node) -> bool + 'a {
    move |n| n.attr(name) == Some(value)
}

pub fn attr_contains<'a>(name: &'a str, needle: &'a str) -> impl Fn(&Node) -> bool + 'a {
    move |n| n.attr(name).is_some_and(|v| v.contains(needle))
}

pub fn resource_id(id: &str) -> impl Fn(&Node) -> bool + '_ {
    attr_eq("resource-id", id)
}

pub fn content_desc(desc: &str) -> impl Fn(&Node) -> bool + '_ {
    attr_eq("content-desc", desc)
}

pub fn text_eq(text: &str) -> impl Fn(&Node) -> bool + '_ {
    attr_eq("text", text)
}

pub fn text_contains(needle: &str) -> impl Fn(&Node) -> bool + '_ {
    attr_contains("text", needle)
}

/// Matches the uiautomator `index` attribute (position among siblings).
pub fn index_eq(index: usize) -> impl Fn(&Node) -> bool {
    let index = index.to_string();
    move |n| n.attr("index") == Some(index.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Tree;

    const CHATS: &str = r#"<hierarchy>
  <node index="0" resource-id="app:id/ff_item" bounds="[0,0][1080,100]">
    <node index="2" text="Alice" />
    <node index="4" text="Received" />
  </node>
  <node index="1" resource-id="app:id/ff_item" bounds="[0,100][1080,200]">
    <node index="2" text="Bob" />
    <node index="4" text="New Chat" />
  </node>
  <node index="2" content-desc="Chat" bounds="[0,2200][200,2400]" />
</hierarchy>"#;

    #[test]
    fn find_all_preserves_document_order() {
        let tree = Tree::parse(CHATS).unwrap();
        let rows = find_all(tree.nodes(), resource_id("app:id/ff_item"));
        assert_eq!(rows.len(), 2);
        assert!(rows[0].index < rows[1].index);
        let texts: Vec<_> = find_all(tree.nodes(), |n| n.text().is_some())
            .into_iter()
            .filter_map(Node::text)
            .collect();
        assert_eq!(texts, vec!["Alice", "Received", "Bob", "New Chat"]);
    }

    #[test]
    fn nothing_found_is_empty_not_error() {
        let tree = Tree::parse(CHATS).unwrap();
        assert!(find_all(tree.nodes(), text_eq("Carol")).is_empty());
        assert!(find_first(tree.nodes(), text_eq("Carol")).is_none());
        assert!(find_all(&[], |_| true).is_empty());
        assert!(find_first(&[], |_| true).is_none());
    }

    #[test]
    fn first_match_wins() {
        let tree = Tree::parse(CHATS).unwrap();
        let hit = find_first(tree.nodes(), index_eq(2)).unwrap();
        assert_eq!(hit.text(), Some("Alice"));
    }

    #[test]
    fn nested_lookup_within_row() {
        let tree = Tree::parse(CHATS).unwrap();
        let unread: Vec<&str> = find_all(tree.nodes(), resource_id("app:id/ff_item"))
            .into_iter()
            .filter_map(|row| {
                let scope = tree.subtree(row);
                find_first(scope, text_contains("New"))?;
                find_first(scope, index_eq(2)).and_then(Node::text)
            })
            .collect();
        assert_eq!(unread, vec!["Bob"]);
    }

    #[test]
    fn caller_defined_predicates() {
        let tree = Tree::parse(CHATS).unwrap();
        let chat = find_first(tree.nodes(), content_desc("Chat")).unwrap();
        assert_eq!(chat.bounds(), Some("[0,2200][200,2400]"));
        let wide = find_all(tree.nodes(), |n| {
            n.centroid().map(|p| p.x > 500.0).unwrap_or(false)
        });
        assert_eq!(wide.len(), 2);
    }
}
