//! Minimal element tree over `quick-xml`, enough for blacklist, descriptor and graph documents.

use crate::error::XmlError;
use quick_xml::{events::BytesStart, events::Event, Reader};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    pub fn load(path: &Path) -> Result<Self, XmlError> {
        let source = std::fs::read_to_string(path).map_err(|source| XmlError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&source)
    }

    pub fn parse(source: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(source);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(element_from(&start)?),
                Event::Empty(start) => {
                    let element = element_from(&start)?;
                    attach(&mut stack, &mut root, element);
                }
                Event::End(end) => {
                    let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                    let element = stack.pop().ok_or(XmlError::Unbalanced(name))?;
                    attach(&mut stack, &mut root, element);
                }
                Event::Text(text) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&text.unescape()?);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.pop() {
            return Err(XmlError::Unbalanced(open.name));
        }
        root.ok_or(XmlError::NoRoot)
    }

    /// Attribute lookup, ignoring case of the attribute name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn attr_at(&self, index: usize) -> Option<&str> {
        self.attributes.get(index).map(|(_, value)| value.as_str())
    }

    pub fn bool_attr(&self, name: &str) -> bool {
        self.attr(name)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.is(name))
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.is(name))
    }
}

fn element_from(start: &BytesStart) -> Result<XmlElement, XmlError> {
    let mut element = XmlElement {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        ..Default::default()
    };
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        // Only the first top-level element counts as the document root.
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_and_attribute_order() {
        let doc = XmlElement::parse(
            r#"<?xml version="1.0"?>
            <BlackList>
                <Node Name="A" Replace="B"/>
                <Node Name="C"></Node>
                <Note>some &amp; text</Note>
            </BlackList>"#,
        )
        .unwrap();

        assert_eq!(doc.name, "BlackList");
        assert_eq!(doc.children.len(), 3);
        assert_eq!(doc.children[0].attr_at(0), Some("A"));
        assert_eq!(doc.children[0].attr_at(1), Some("B"));
        assert_eq!(doc.children[1].attr("name"), Some("C"));
        assert_eq!(doc.children_named("node").count(), 2);
        assert_eq!(doc.child("Note").unwrap().text, "some & text");
    }

    #[test]
    fn rejects_unbalanced_documents() {
        assert!(XmlElement::parse("<A><B></A>").is_err());
        assert!(XmlElement::parse("").is_err());
    }
}
