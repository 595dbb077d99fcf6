//! XFA datasets patching.
//!
//! The datasets packet is parsed into a small DOM, the node named by each
//! form patch path gets its content replaced, and the tree is dumped back
//! as ASCII-only XML.

use super::incremental::ChangeSet;
use crate::error::{PdfError, Result};
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::warn;

/// New content for a datasets node.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    /// Replaces the children with one text node.
    Text(String),
    /// Replaces the children with one `<value>` element per item.
    List(Vec<String>),
}

const TEXT_NODE: &str = "#text";

#[derive(Debug, Clone, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub value: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn element(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    fn text(value: impl Into<String>) -> Self {
        Self {
            name: TEXT_NODE.into(),
            value: Some(value.into()),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    fn valued(name: &str, value: &str) -> Self {
        Self {
            value: Some(value.to_string()),
            ..Self::element(name)
        }
    }

    fn at(&self, path: &[usize]) -> &Self {
        path.iter().fold(self, |node, &i| &node.children[i])
    }

    fn at_mut(&mut self, path: &[usize]) -> &mut Self {
        path.iter().fold(self, |node, &i| &mut node.children[i])
    }

    /// Child-index path of the node matching `paths[pos..]`, searching
    /// this node and its descendants in document order.
    pub fn search_node(&self, paths: &[PathComponent], pos: usize) -> Option<Vec<usize>> {
        let Some(component) = paths.get(pos) else {
            return Some(Vec::new());
        };
        if component.name.starts_with('#') && pos + 1 < paths.len() {
            return self.search_node(paths, pos + 1);
        }

        let mut stack: Vec<usize> = Vec::new();
        loop {
            let node = self.at(&stack);
            if component.name == node.name {
                if component.pos == 0 {
                    if let Some(rest) = node.search_node(paths, pos + 1) {
                        return Some([stack.as_slice(), &rest].concat());
                    }
                } else if stack.is_empty() {
                    return None;
                } else {
                    let parent_path = &stack[..stack.len() - 1];
                    let parent = self.at(parent_path);
                    let mut sibling_pos = 0;
                    for (i, child) in parent.children.iter().enumerate() {
                        if child.name == component.name {
                            if sibling_pos == component.pos {
                                let rest = child.search_node(paths, pos + 1)?;
                                return Some([parent_path, &[i], &rest].concat());
                            }
                            sibling_pos += 1;
                        }
                    }
                    // No sibling at that position: settle for the first match.
                    let rest = node.search_node(paths, pos + 1)?;
                    return Some([stack.as_slice(), &rest].concat());
                }
            }

            if !node.children.is_empty() {
                stack.push(0);
                continue;
            }
            loop {
                let last = stack.pop()?;
                if last + 1 < self.at(&stack).children.len() {
                    stack.push(last + 1);
                    break;
                }
            }
        }
    }

    pub fn dump(&self, out: &mut String) {
        if self.name == TEXT_NODE {
            out.push_str(&encode_to_xml_string(self.value.as_deref().unwrap_or_default()));
            return;
        }
        out.push('<');
        out.push_str(&self.name);
        for (name, value) in &self.attributes {
            out.push_str(&format!(" {name}=\"{}\"", encode_to_xml_string(value)));
        }
        if !self.children.is_empty() {
            out.push('>');
            for child in &self.children {
                child.dump(out);
            }
            out.push_str(&format!("</{}>", self.name));
        } else if let Some(value) = self.value.as_deref().filter(|v| !v.is_empty()) {
            out.push_str(&format!(">{}</{}>", encode_to_xml_string(value), self.name));
        } else {
            out.push_str("/>");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathComponent {
    pub name: String,
    pub pos: usize,
}

/// Split `a.b[2].c` into components; a missing index means 0.
pub fn parse_xfa_path(path: &str) -> Vec<PathComponent> {
    path.split('.')
        .map(|component| {
            let indexed = component
                .strip_suffix(']')
                .and_then(|head| head.rsplit_once('['))
                .filter(|(name, digits)| {
                    !name.is_empty() && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
                })
                .and_then(|(name, digits)| Some((name, digits.parse().ok()?)));
            match indexed {
                Some((name, pos)) => PathComponent {
                    name: name.to_string(),
                    pos,
                },
                None => PathComponent {
                    name: component.to_string(),
                    pos: 0,
                },
            }
        })
        .collect()
}

/// Parse an XML document into its root element. Whitespace-only text is dropped.
pub fn parse_xml(data: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(data);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root = None;

    let xml_err = |e: &dyn std::fmt::Display| PdfError::Xfa(e.to_string());
    loop {
        match reader.read_event().map_err(|e| xml_err(&e))? {
            Event::Start(e) => stack.push(start_node(&e)?),
            Event::Empty(e) => {
                let node = start_node(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = root.or(Some(node)),
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| PdfError::Xfa("unbalanced end tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = root.or(Some(node)),
                }
            }
            Event::Text(e) => {
                let text = e.unescape().map_err(|e| xml_err(&e))?;
                if let Some(parent) = stack.last_mut()
                    && !text.trim().is_empty()
                {
                    parent.children.push(XmlNode::text(text));
                }
            }
            Event::CData(e) => {
                if let Some(parent) = stack.last_mut() {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    parent.children.push(XmlNode::text(text));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    root.ok_or_else(|| PdfError::Xfa("document has no root element".into()))
}

fn start_node(e: &quick_xml::events::BytesStart<'_>) -> Result<XmlNode> {
    let mut node = XmlNode::element(String::from_utf8_lossy(e.name().as_ref()));
    for attr in e.attributes() {
        let attr = attr.map_err(|e| PdfError::Xfa(e.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|e| PdfError::Xfa(e.to_string()))?;
        node.attributes.push((
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            value.into_owned(),
        ));
    }
    Ok(node)
}

/// Escape markup characters and everything outside printable ASCII.
pub fn encode_to_xml_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            ' '..='~' => out.push(c),
            _ => out.push_str(&format!("&#x{:X};", c as u32)),
        }
    }
    out
}

/// Apply the form patches carried by `changes` to a datasets packet.
pub fn write_xfa_data_for_acroform(data: &str, changes: &ChangeSet) -> Result<String> {
    let mut root = parse_xml(data)?;
    for change in changes.values() {
        let Some(patch) = &change.form_patch else {
            continue;
        };
        if patch.path.is_empty() {
            continue;
        }
        let components = parse_xfa_path(&patch.path);
        let found = root.search_node(&components, 0).or_else(|| {
            // The last component alone may still identify the node.
            let last = components.last().filter(|_| components.len() > 1)?;
            root.search_node(std::slice::from_ref(last), 0)
        });
        let Some(found) = found else {
            warn!(path = %patch.path, "XFA node not found");
            continue;
        };
        root.at_mut(&found).children = match &patch.value {
            FormValue::List(items) => items.iter().map(|v| XmlNode::valued("value", v)).collect(),
            FormValue::Text(text) => vec![XmlNode::text(text.as_str())],
        };
    }
    let mut out = String::new();
    root.dump(&mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_xfa_path() {
        assert_eq!(
            parse_xfa_path("form1.sub[2].field"),
            vec![
                PathComponent { name: "form1".into(), pos: 0 },
                PathComponent { name: "sub".into(), pos: 2 },
                PathComponent { name: "field".into(), pos: 0 },
            ]
        );
        assert_eq!(parse_xfa_path("a[x]")[0].name, "a[x]");
    }

    #[test]
    fn test_dump_round_trips_structure() {
        let xml = r#"<xfa:datasets xmlns:xfa="http://www.xfa.org/schema/xfa-data/1.0/">
  <xfa:data><form1><name>Jo &amp; Al</name><empty/></form1></xfa:data>
</xfa:datasets>"#;
        let root = parse_xml(xml).unwrap();
        let mut out = String::new();
        root.dump(&mut out);
        assert_eq!(
            out,
            r#"<xfa:datasets xmlns:xfa="http://www.xfa.org/schema/xfa-data/1.0/"><xfa:data><form1><name>Jo &amp; Al</name><empty/></form1></xfa:data></xfa:datasets>"#
        );
    }

    #[test]
    fn test_search_indexed_sibling() {
        let root = parse_xml("<r><a><b>0</b><b>1</b><b>2</b></a></r>").unwrap();
        let path = parse_xfa_path("a.b[1]");
        let found = root.search_node(&path, 0).unwrap();
        assert_eq!(found, vec![0, 1]);
        // Out-of-range index falls back to the first match.
        let found = root.search_node(&parse_xfa_path("a.b[7]"), 0).unwrap();
        assert_eq!(found, vec![0, 0]);
    }

    #[test]
    fn test_encode_non_ascii() {
        assert_eq!(encode_to_xml_string("é<\n"), "&#xE9;&lt;&#xA;");
    }
}
