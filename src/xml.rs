//! Minimal owned XML element tree.
//!
//! Only what the TCX writer needs: ordered attributes, optional text on
//! leaves, ordered children, a deterministic pretty-printer and a parser
//! that reads the printer's output back.
//!
//! ## Rendering rules
//! - Two spaces of indentation per depth level
//! - Every element starts on its own line
//! - Leaves with text stay on one line: `<Time>2013-01-01T00:00:00Z</Time>`
//! - Elements without text (or with empty text) and no children self-close:
//!   `<Track/>`
//! - Attributes are written in insertion order
//! - Output ends with a newline
//!
//! Leaf text is kept byte for byte, surrounding whitespace included.
//! Whitespace between elements is layout and is dropped by the parser.

use std::mem;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{ExportError, Result};

const INDENT_WIDTH: usize = 2;

/// A single XML element with its attributes, text and children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }

    /// Create a leaf element holding text.
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut element = Self::new(name);
        element.text = Some(text.into());
        element
    }

    /// Builder-style attribute append.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Builder-style child append.
    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Look up an attribute value by key.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First direct child with the given name.
    pub fn find(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All direct children with the given name, in order.
    pub fn find_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Render this element and its subtree in canonical pretty-printed form.
    pub fn render(&self) -> String {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', INDENT_WIDTH);
        // Writing into a Vec<u8> cannot fail
        let _ = self.write_events(&mut writer);
        let mut out = String::from_utf8_lossy(&writer.into_inner()).into_owned();
        out.push('\n');
        out
    }

    fn write_events(&self, writer: &mut Writer<Vec<u8>>) -> quick_xml::Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if !self.children.is_empty() {
            writer.write_event(Event::Start(start))?;
            for child in &self.children {
                child.write_events(writer)?;
            }
            writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))
        } else if let Some(text) = self.text.as_deref().filter(|t| !t.is_empty()) {
            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))
        } else {
            writer.write_event(Event::Empty(start))
        }
    }
}

/// Parse XML text into an element tree.
///
/// The XML declaration, comments and whitespace between elements are
/// discarded. Text inside a leaf is kept as written, so `parse(&e.render())`
/// yields a tree equal to `e`.
pub fn parse(input: &str) -> Result<Element> {
    let mut reader = Reader::from_str(input);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    // Text seen since the last tag; it only becomes element text when the
    // element closes without children.
    let mut pending = String::new();

    loop {
        match reader.read_event().map_err(ExportError::xml)? {
            Event::Start(start) => {
                pending.clear();
                stack.push(element_from_start(&start)?);
            }
            Event::Empty(start) => {
                pending.clear();
                let element = element_from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let mut element = stack
                    .pop()
                    .ok_or_else(|| ExportError::xml("unbalanced closing tag"))?;
                if element.children.is_empty() && !pending.is_empty() {
                    element.text = Some(mem::take(&mut pending));
                } else {
                    pending.clear();
                }
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let text = text.unescape().map_err(ExportError::xml)?;
                push_text(&stack, &mut pending, &text)?;
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                push_text(&stack, &mut pending, &text)?;
            }
            Event::Eof => break,
            // Declaration, comments, processing instructions, doctype
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ExportError::xml(format!("unclosed element '{}'", open.name)));
    }
    root.ok_or_else(|| ExportError::xml("document has no root element"))
}

fn push_text(stack: &[Element], pending: &mut String, text: &str) -> Result<()> {
    if stack.is_empty() {
        if text.trim().is_empty() {
            return Ok(());
        }
        return Err(ExportError::xml("text outside of the root element"));
    }
    pending.push_str(text);
    Ok(())
}

fn element_from_start(start: &BytesStart<'_>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(name);
    for attribute in start.attributes() {
        let attribute = attribute.map_err(ExportError::xml)?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute.unescape_value().map_err(ExportError::xml)?;
        element.attributes.push((key, value.into_owned()));
    }
    Ok(element)
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(ExportError::xml("multiple root elements")),
    }
}
