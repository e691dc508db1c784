//! Small namespace aware XML tree.
//!
//! Prefixes and namespace declarations are kept exactly as written so that a parsed tree can be
//! canonicalized. Every element and attribute also carries its resolved namespace URI.

use super::{XmlError, XML_NS};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
    ProcessingInstruction { target: String, data: String },
}

/// `xmlns` or `xmlns:prefix` declaration. An empty URI on the default namespace undeclares it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDeclaration {
    pub prefix: Option<String>,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace: Option<String>,
    pub value: String,
}

impl Attribute {
    pub fn qualified_name(&self) -> Cow<'_, str> {
        qualified_name(self.prefix.as_deref(), &self.local_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    prefix: Option<String>,
    local_name: String,
    namespace: Option<String>,
    namespace_declarations: Vec<NamespaceDeclaration>,
    attributes: Vec<Attribute>,
    children: Vec<Node>,
}

impl Element {
    /// Creates an element in `namespace`.
    ///
    /// The prefix must be bound where the element is inserted, unless a declaration is added
    /// with [`Element::declare_namespace`].
    pub fn new(prefix: Option<&str>, local_name: &str, namespace: Option<&str>) -> Self {
        Self {
            prefix: prefix.map(str::to_owned),
            local_name: local_name.to_owned(),
            namespace: namespace.map(str::to_owned),
            namespace_declarations: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Parses a document and returns its root element.
    ///
    /// The prolog and anything outside of the root element is discarded.
    pub fn parse(xml: &[u8]) -> Result<Self, XmlError> {
        let xml = utf8(xml)?;

        // end-of-line handling (XML 1.0, section 2.11)
        let xml = xml.replace("\r\n", "\n").replace('\r', "\n");

        let mut reader = Reader::from_str(&xml);
        let mut open: Vec<Element> = Vec::new();
        let mut scopes: Vec<Vec<NamespaceDeclaration>> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let element = open_element(&start, &mut scopes)?;
                    open.push(element);
                }
                Event::Empty(start) => {
                    let element = open_element(&start, &mut scopes)?;
                    scopes.pop();
                    close_element(element, &mut open, &mut root)?;
                }
                Event::End(_) => {
                    let element = open
                        .pop()
                        .ok_or_else(|| XmlError::malformed("end tag without start tag"))?;
                    scopes.pop();
                    close_element(element, &mut open, &mut root)?;
                }
                Event::Text(text) => {
                    let text = text.unescape()?;
                    match open.last_mut() {
                        Some(parent) => parent.push_text(&text),
                        None if text.trim().is_empty() => {}
                        None => return Err(XmlError::malformed("text outside of the root element")),
                    }
                }
                Event::CData(cdata) => {
                    let cdata = cdata.into_inner();
                    let parent = open
                        .last_mut()
                        .ok_or_else(|| XmlError::malformed("CDATA outside of the root element"))?;
                    parent.push_text(utf8(&cdata)?);
                }
                Event::Comment(comment) => {
                    if let Some(parent) = open.last_mut() {
                        parent.children.push(Node::Comment(utf8(&comment)?.to_owned()));
                    }
                }
                Event::PI(pi) => {
                    if let Some(parent) = open.last_mut() {
                        let content = utf8(&pi)?;
                        let (target, data) = content
                            .split_once(|c: char| c.is_ascii_whitespace())
                            .map(|(target, data)| (target, data.trim_start()))
                            .unwrap_or((content, ""));
                        parent.children.push(Node::ProcessingInstruction {
                            target: target.to_owned(),
                            data: data.to_owned(),
                        });
                    }
                }
                Event::Decl(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        if !open.is_empty() {
            return Err(XmlError::malformed("unclosed element"));
        }

        root.ok_or_else(|| XmlError::malformed("no root element"))
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn qualified_name(&self) -> Cow<'_, str> {
        qualified_name(self.prefix.as_deref(), &self.local_name)
    }

    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.local_name == local_name
    }

    pub fn namespace_declarations(&self) -> &[NamespaceDeclaration] {
        &self.namespace_declarations
    }

    pub fn declare_namespace(&mut self, prefix: Option<&str>, uri: &str) {
        self.namespace_declarations.retain(|declaration| declaration.prefix.as_deref() != prefix);
        self.namespace_declarations.push(NamespaceDeclaration {
            prefix: prefix.map(str::to_owned),
            uri: uri.to_owned(),
        });
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Value of the unqualified attribute `local_name`.
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attribute| attribute.namespace.is_none() && attribute.local_name == local_name)
            .map(|attribute| attribute.value.as_str())
    }

    /// Sets the unqualified attribute `local_name`, keeping its position when it already exists.
    pub fn set_attribute(&mut self, local_name: &str, value: impl Into<String>) {
        let value = value.into();

        match self
            .attributes
            .iter_mut()
            .find(|attribute| attribute.namespace.is_none() && attribute.local_name == local_name)
        {
            Some(attribute) => attribute.value = value,
            None => self.attributes.push(Attribute {
                prefix: None,
                local_name: local_name.to_owned(),
                namespace: None,
                value,
            }),
        }
    }

    pub fn with_attribute(mut self, local_name: &str, value: impl Into<String>) -> Self {
        self.set_attribute(local_name, value);
        self
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    pub fn find_child(&self, namespace: &str, local_name: &str) -> Option<&Element> {
        self.child_elements().find(|child| child.is(namespace, local_name))
    }

    pub fn find_child_mut(&mut self, namespace: &str, local_name: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|node| match node {
            Node::Element(element) if element.is(namespace, local_name) => Some(element),
            _ => None,
        })
    }

    pub fn find_children<'a>(&'a self, namespace: &'a str, local_name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.child_elements().filter(move |child| child.is(namespace, local_name))
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            _ => None,
        })
    }

    /// First descendant (depth first, document order) with the given name, together with the
    /// namespace declarations in scope at that element, excluding its own.
    pub fn find_descendant(&self, namespace: &str, local_name: &str) -> Option<(&Element, Vec<NamespaceDeclaration>)> {
        let mut inherited = self.namespace_declarations.clone();
        self.find_descendant_inner(namespace, local_name, &mut inherited)
            .map(|element| (element, inherited))
    }

    fn find_descendant_inner<'a>(
        &'a self,
        namespace: &str,
        local_name: &str,
        inherited: &mut Vec<NamespaceDeclaration>,
    ) -> Option<&'a Element> {
        for child in self.child_elements() {
            if child.is(namespace, local_name) {
                return Some(child);
            }

            let depth = inherited.len();
            inherited.extend(child.namespace_declarations.iter().cloned());
            if let Some(found) = child.find_descendant_inner(namespace, local_name, inherited) {
                return Some(found);
            }
            inherited.truncate(depth);
        }

        None
    }

    /// Removes every child element with the given name and returns how many were removed.
    pub fn remove_children(&mut self, namespace: &str, local_name: &str) -> usize {
        let before = self.children.len();
        self.children
            .retain(|node| !matches!(node, Node::Element(element) if element.is(namespace, local_name)));
        before - self.children.len()
    }

    pub fn push_child(&mut self, element: Element) {
        self.children.push(Node::Element(element));
    }

    pub fn with_child(mut self, element: Element) -> Self {
        self.push_child(element);
        self
    }

    /// Inserts `element` before the `index`-th child element.
    pub fn insert_child_element(&mut self, index: usize, element: Element) {
        let position = self
            .children
            .iter()
            .enumerate()
            .filter(|(_, node)| matches!(node, Node::Element(_)))
            .nth(index)
            .map(|(position, _)| position)
            .unwrap_or(self.children.len());
        self.children.insert(position, Node::Element(element));
    }

    pub fn clear_children(&mut self) {
        self.children.clear();
    }

    /// Concatenated text content of the direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Node::Text(text.into()));
        self
    }

    fn push_text(&mut self, text: &str) {
        match self.children.last_mut() {
            Some(Node::Text(previous)) => previous.push_str(text),
            _ => self.children.push(Node::Text(text.to_owned())),
        }
    }

    /// Serializes the element with its declarations and attributes as stored.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    fn write_xml(&self, out: &mut String) {
        let name = self.qualified_name();
        out.push('<');
        out.push_str(&name);

        for declaration in &self.namespace_declarations {
            write_namespace_declaration(out, declaration.prefix.as_deref(), &declaration.uri);
        }

        for attribute in &self.attributes {
            write_attribute(out, &attribute.qualified_name(), &attribute.value);
        }

        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }

        out.push('>');
        for child in &self.children {
            match child {
                Node::Element(element) => element.write_xml(out),
                Node::Text(text) => escape_text(out, text),
                Node::Comment(comment) => {
                    let _ = write!(out, "<!--{comment}-->");
                }
                Node::ProcessingInstruction { target, data } => write_processing_instruction(out, target, data),
            }
        }
        let _ = write!(out, "</{name}>");
    }
}

fn qualified_name<'a>(prefix: Option<&str>, local_name: &'a str) -> Cow<'a, str> {
    match prefix {
        Some(prefix) => Cow::Owned(format!("{prefix}:{local_name}")),
        None => Cow::Borrowed(local_name),
    }
}

fn split_qualified_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local_name)) => (Some(prefix), local_name),
        None => (None, name),
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, XmlError> {
    std::str::from_utf8(bytes).map_err(|e| XmlError::Parse { source: e.into() })
}

fn resolve(scopes: &[Vec<NamespaceDeclaration>], prefix: Option<&str>) -> Result<Option<String>, XmlError> {
    if prefix == Some("xml") {
        return Ok(Some(XML_NS.to_owned()));
    }

    let uri = scopes
        .iter()
        .rev()
        .flat_map(|scope| scope.iter().rev())
        .find(|declaration| declaration.prefix.as_deref() == prefix)
        .map(|declaration| declaration.uri.clone());

    match (prefix, uri) {
        (None, Some(uri)) if uri.is_empty() => Ok(None),
        (None, uri) => Ok(uri),
        (Some(_), Some(uri)) if !uri.is_empty() => Ok(Some(uri)),
        (Some(prefix), _) => Err(XmlError::UnboundPrefix {
            prefix: prefix.to_owned(),
        }),
    }
}

/// Builds an element from a start tag and pushes its namespace scope.
fn open_element(start: &BytesStart<'_>, scopes: &mut Vec<Vec<NamespaceDeclaration>>) -> Result<Element, XmlError> {
    let mut declarations = Vec::new();
    let mut raw_attributes = Vec::new();

    for attribute in start.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        let key = utf8(attribute.key.as_ref())?.to_owned();

        // attribute-value normalization (XML 1.0, section 3.3.3) before reference expansion
        let raw = utf8(&attribute.value)?.replace(['\t', '\n', '\r'], " ");
        let value = quick_xml::escape::unescape(&raw)
            .map_err(quick_xml::Error::from)?
            .into_owned();

        if key == "xmlns" {
            declarations.push(NamespaceDeclaration { prefix: None, uri: value });
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declarations.push(NamespaceDeclaration {
                prefix: Some(prefix.to_owned()),
                uri: value,
            });
        } else {
            raw_attributes.push((key, value));
        }
    }

    scopes.push(declarations.clone());

    let name = utf8(start.name().as_ref())?.to_owned();
    let (prefix, local_name) = split_qualified_name(&name);
    let namespace = resolve(scopes, prefix)?;

    let mut attributes = Vec::with_capacity(raw_attributes.len());
    for (key, value) in raw_attributes {
        let (attribute_prefix, attribute_local_name) = split_qualified_name(&key);
        // unprefixed attributes are in no namespace
        let attribute_namespace = match attribute_prefix {
            Some(_) => resolve(scopes, attribute_prefix)?,
            None => None,
        };

        attributes.push(Attribute {
            prefix: attribute_prefix.map(str::to_owned),
            local_name: attribute_local_name.to_owned(),
            namespace: attribute_namespace,
            value,
        });
    }

    Ok(Element {
        prefix: prefix.map(str::to_owned),
        local_name: local_name.to_owned(),
        namespace,
        namespace_declarations: declarations,
        attributes,
        children: Vec::new(),
    })
}

fn close_element(element: Element, open: &mut [Element], root: &mut Option<Element>) -> Result<(), XmlError> {
    match open.last_mut() {
        Some(parent) => {
            parent.children.push(Node::Element(element));
            Ok(())
        }
        None if root.is_some() => Err(XmlError::malformed("more than one root element")),
        None => {
            *root = Some(element);
            Ok(())
        }
    }
}

pub(crate) fn write_namespace_declaration(out: &mut String, prefix: Option<&str>, uri: &str) {
    match prefix {
        Some(prefix) => write_attribute(out, &format!("xmlns:{prefix}"), uri),
        None => write_attribute(out, "xmlns", uri),
    }
}

pub(crate) fn write_attribute(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    escape_attribute(out, value);
    out.push('"');
}

pub(crate) fn write_processing_instruction(out: &mut String, target: &str, data: &str) {
    out.push_str("<?");
    out.push_str(target);
    if !data.is_empty() {
        out.push(' ');
        out.push_str(data);
    }
    out.push_str("?>");
}

pub(crate) fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

pub(crate) fn escape_attribute(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{XMLDSIG_NS, XADES_NS};
    use pretty_assertions::assert_eq;

    const OBJECT: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<ds:Object xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><xades:QualifyingProperties xmlns:xades="http://uri.etsi.org/01903/v1.3.2#" Target="#id-1"><xades:SignedProperties Id="xades-1"/></xades:QualifyingProperties></ds:Object>"##;

    #[test]
    fn resolves_namespaces() {
        let object = Element::parse(OBJECT.as_bytes()).unwrap();
        assert!(object.is(XMLDSIG_NS, "Object"));
        assert_eq!(object.qualified_name(), "ds:Object");

        let qualifying_properties = object.find_child(XADES_NS, "QualifyingProperties").unwrap();
        assert_eq!(qualifying_properties.attribute("Target"), Some("#id-1"));

        let (signed_properties, inherited) = object.find_descendant(XADES_NS, "SignedProperties").unwrap();
        assert_eq!(signed_properties.attribute("Id"), Some("xades-1"));
        assert_eq!(
            inherited,
            vec![
                NamespaceDeclaration {
                    prefix: Some("ds".to_owned()),
                    uri: XMLDSIG_NS.to_owned()
                },
                NamespaceDeclaration {
                    prefix: Some("xades".to_owned()),
                    uri: XADES_NS.to_owned()
                },
            ]
        );
    }

    #[test]
    fn serializes_as_stored() {
        let object = Element::parse(OBJECT.as_bytes()).unwrap();
        let expected = OBJECT.split_once('\n').unwrap().1;
        assert_eq!(object.to_xml(), expected);
        assert_eq!(Element::parse(object.to_xml().as_bytes()).unwrap(), object);
    }

    #[test]
    fn default_namespace_and_undeclaration() {
        let root = Element::parse(br#"<a xmlns="urn:a"><b xmlns=""><c/></b><d/></a>"#).unwrap();
        assert_eq!(root.namespace(), Some("urn:a"));

        let children: Vec<&Element> = root.child_elements().collect();
        assert_eq!(children[0].namespace(), None);
        assert_eq!(children[0].child_elements().next().unwrap().namespace(), None);
        assert_eq!(children[1].namespace(), Some("urn:a"));
    }

    #[test]
    fn text_and_references() {
        let root = Element::parse(b"<a>x &amp; y<![CDATA[ <z> ]]>&#x41;\r\n</a>").unwrap();
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.text(), "x & y <z> A\n");
    }

    #[test]
    fn attribute_value_normalization() {
        let root = Element::parse(b"<a v=\"1\n2&#xA;3\"/>").unwrap();
        assert_eq!(root.attribute("v"), Some("1 2\n3"));
    }

    #[test]
    fn unbound_prefix() {
        let err = Element::parse(b"<x:a/>").unwrap_err();
        assert!(matches!(err, XmlError::UnboundPrefix { prefix } if prefix == "x"));
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(Element::parse(b"<a><b></a>").is_err());
        assert!(Element::parse(b"<a/><b/>").is_err());
        assert!(Element::parse(b"").is_err());
        assert!(Element::parse(b"<a>").is_err());
    }

    #[test]
    fn edit_tree() {
        let mut root = Element::new(Some("ds"), "Reference", Some(XMLDSIG_NS))
            .with_child(Element::new(Some("ds"), "DigestMethod", Some(XMLDSIG_NS)))
            .with_child(Element::new(Some("ds"), "DigestValue", Some(XMLDSIG_NS)).with_text("AAAA"));
        root.declare_namespace(Some("ds"), XMLDSIG_NS);
        root.set_attribute("URI", "#a");
        root.set_attribute("URI", "#b");

        root.insert_child_element(0, Element::new(Some("ds"), "Transforms", Some(XMLDSIG_NS)));
        assert_eq!(root.remove_children(XMLDSIG_NS, "DigestMethod"), 1);

        assert_eq!(
            root.to_xml(),
            r##"<ds:Reference xmlns:ds="http://www.w3.org/2000/09/xmldsig#" URI="#b"><ds:Transforms/><ds:DigestValue>AAAA</ds:DigestValue></ds:Reference>"##
        );
    }
}
