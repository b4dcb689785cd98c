//! A decoded, order-preserving XML tree.
//!
//! Elements map child names to values the way report consumers expect: a
//! child that occurs once is stored as [`OneOrMany::Single`], a repeated
//! child as [`OneOrMany::Many`]. Text-only elements collapse to
//! [`XmlNode::Text`] and empty elements to [`XmlNode::Empty`].

use std::slice;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::OasisError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OneOrMany<T> {
    Single(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn as_slice(&self) -> &[T] {
        match self {
            OneOrMany::Single(value) => slice::from_ref(value),
            OneOrMany::Many(values) => values,
        }
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    pub fn first(&self) -> Option<&T> {
        self.as_slice().first()
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn is_single(&self) -> bool {
        matches!(self, OneOrMany::Single(_))
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Single(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }

    /// Rewrites a bare value as a one-element list in place.
    pub fn make_many(&mut self) -> &mut Vec<T> {
        if self.is_single() {
            let taken = std::mem::replace(self, OneOrMany::Many(Vec::new()));
            *self = OneOrMany::Many(taken.into_vec());
        }
        let OneOrMany::Many(values) = self else {
            unreachable!("value was converted to a list above")
        };
        values
    }

    fn push(&mut self, value: T) {
        self.make_many().push(value);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Empty,
    Text(String),
    Element(XmlElement),
}

impl XmlNode {
    pub fn as_element(&self) -> Option<&XmlElement> {
        match self {
            XmlNode::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut XmlElement> {
        match self {
            XmlNode::Element(element) => Some(element),
            _ => None,
        }
    }

    /// The text of a leaf node; `None` when the node has child elements.
    pub fn scalar(&self) -> Option<&str> {
        match self {
            XmlNode::Empty => Some(""),
            XmlNode::Text(text) => Some(text),
            XmlNode::Element(element) if element.children.is_empty() => {
                Some(element.text.as_deref().unwrap_or(""))
            }
            XmlNode::Element(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub attributes: Vec<(String, String)>,
    pub children: Vec<(String, OneOrMany<XmlNode>)>,
    pub text: Option<String>,
}

impl XmlElement {
    pub fn get(&self, key: &str) -> Option<&OneOrMany<XmlNode>> {
        self.children
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut OneOrMany<XmlNode>> {
        self.children
            .iter_mut()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|(name, _)| name.as_str())
    }

    /// First child name accepted by `predicate`, in document order.
    pub fn find_key(&self, predicate: impl Fn(&str) -> bool) -> Option<&str> {
        self.keys().find(|key| predicate(key))
    }

    fn push_child(&mut self, key: String, node: XmlNode) {
        match self.get_mut(&key) {
            Some(existing) => existing.push(node),
            None => self.children.push((key, OneOrMany::Single(node))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub root_name: String,
    pub root: XmlNode,
}

impl XmlDocument {
    pub fn parse(xml: &str) -> Result<Self, OasisError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Frame> = Vec::new();
        let mut root: Option<(String, XmlNode)> = None;

        loop {
            let event = reader.read_event().map_err(|err| {
                OasisError::XmlParse(format!("at byte {}: {err}", reader.error_position()))
            })?;
            match event {
                Event::Start(start) => stack.push(Frame::open(&start)?),
                Event::Empty(start) => {
                    let (name, node) = Frame::open(&start)?.close();
                    attach(&mut stack, &mut root, name, node)?;
                }
                Event::Text(text) => {
                    let value = text
                        .unescape()
                        .map_err(|err| OasisError::XmlParse(err.to_string()))?;
                    if let Some(frame) = stack.last_mut() {
                        frame.text.push_str(&value);
                    }
                }
                Event::CData(data) => {
                    let value = std::str::from_utf8(&data)
                        .map_err(|err| OasisError::XmlParse(err.to_string()))?;
                    if let Some(frame) = stack.last_mut() {
                        frame.text.push_str(value);
                    }
                }
                Event::End(_) => {
                    let frame = stack
                        .pop()
                        .ok_or_else(|| OasisError::XmlParse("unbalanced end tag".to_string()))?;
                    let (name, node) = frame.close();
                    attach(&mut stack, &mut root, name, node)?;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(OasisError::XmlParse(format!("unclosed element <{}>", open.name)));
        }
        let (root_name, root) =
            root.ok_or_else(|| OasisError::XmlParse("document has no root element".to_string()))?;
        Ok(Self { root_name, root })
    }

    /// Serializes the tree back to indented XML. Single and one-element list
    /// children produce the same markup.
    pub fn to_xml(&self) -> Result<String, OasisError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(write_error)?;
        write_node(&mut writer, &self.root_name, &self.root)?;
        String::from_utf8(writer.into_inner()).map_err(|err| OasisError::XmlParse(err.to_string()))
    }
}

struct Frame {
    name: String,
    attributes: Vec<(String, String)>,
    element: XmlElement,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self, OasisError> {
        let name = std::str::from_utf8(start.name().as_ref())
            .map_err(|err| OasisError::XmlParse(err.to_string()))?
            .to_string();
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|err| OasisError::XmlParse(err.to_string()))?;
            let key = std::str::from_utf8(attribute.key.as_ref())
                .map_err(|err| OasisError::XmlParse(err.to_string()))?
                .to_string();
            let value = attribute
                .unescape_value()
                .map_err(|err| OasisError::XmlParse(err.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            element: XmlElement::default(),
            text: String::new(),
        })
    }

    fn close(self) -> (String, XmlNode) {
        let node = if self.attributes.is_empty() && self.element.children.is_empty() {
            if self.text.is_empty() {
                XmlNode::Empty
            } else {
                XmlNode::Text(self.text)
            }
        } else {
            XmlNode::Element(XmlElement {
                attributes: self.attributes,
                children: self.element.children,
                text: (!self.text.is_empty()).then_some(self.text),
            })
        };
        (self.name, node)
    }
}

fn attach(
    stack: &mut [Frame],
    root: &mut Option<(String, XmlNode)>,
    name: String,
    node: XmlNode,
) -> Result<(), OasisError> {
    match stack.last_mut() {
        Some(parent) => parent.element.push_child(name, node),
        None if root.is_none() => *root = Some((name, node)),
        None => {
            return Err(OasisError::XmlParse(format!(
                "second root element <{name}>"
            )));
        }
    }
    Ok(())
}

fn write_node(writer: &mut Writer<Vec<u8>>, name: &str, node: &XmlNode) -> Result<(), OasisError> {
    match node {
        XmlNode::Empty => writer
            .write_event(Event::Empty(BytesStart::new(name)))
            .map_err(write_error),
        XmlNode::Text(text) => {
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(write_error)?;
            writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(write_error)?;
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(write_error)
        }
        XmlNode::Element(element) => {
            let mut start = BytesStart::new(name);
            for (key, value) in &element.attributes {
                start.push_attribute((key.as_str(), value.as_str()));
            }
            if element.children.is_empty() && element.text.is_none() {
                return writer.write_event(Event::Empty(start)).map_err(write_error);
            }
            writer.write_event(Event::Start(start)).map_err(write_error)?;
            if let Some(text) = &element.text {
                writer
                    .write_event(Event::Text(BytesText::new(text)))
                    .map_err(write_error)?;
            }
            for (key, values) in &element.children {
                for child in values.iter() {
                    write_node(writer, key, child)?;
                }
            }
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(write_error)
        }
    }
}

fn write_error(err: impl std::fmt::Display) -> OasisError {
    OasisError::XmlParse(format!("write failed: {err}"))
}
