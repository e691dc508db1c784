//! XML canonicalization of an element subtree.
//!
//! Supported: Canonical XML 1.0 and 1.1 and Exclusive XML Canonicalization 1.0, each with and
//! without comments. The apex element is canonicalized as a document subset; namespace
//! declarations of its ancestors are passed in explicitly.

use super::dom::{
    escape_text, write_attribute, write_namespace_declaration, write_processing_instruction, Element,
    NamespaceDeclaration, Node,
};
use super::XmlError;
use std::collections::BTreeMap;

pub const C14N_10: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const C14N_10_WITH_COMMENTS: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
pub const C14N_11: &str = "http://www.w3.org/2006/12/xml-c14n11";
pub const C14N_11_WITH_COMMENTS: &str = "http://www.w3.org/2006/12/xml-c14n11#WithComments";
pub const EXCLUSIVE_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const EXCLUSIVE_C14N_WITH_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalizationMethod {
    Inclusive10 { with_comments: bool },
    Inclusive11 { with_comments: bool },
    Exclusive { with_comments: bool },
}

impl CanonicalizationMethod {
    pub fn from_uri(uri: &str) -> Result<Self, XmlError> {
        match uri {
            C14N_10 => Ok(Self::Inclusive10 { with_comments: false }),
            C14N_10_WITH_COMMENTS => Ok(Self::Inclusive10 { with_comments: true }),
            C14N_11 => Ok(Self::Inclusive11 { with_comments: false }),
            C14N_11_WITH_COMMENTS => Ok(Self::Inclusive11 { with_comments: true }),
            EXCLUSIVE_C14N => Ok(Self::Exclusive { with_comments: false }),
            EXCLUSIVE_C14N_WITH_COMMENTS => Ok(Self::Exclusive { with_comments: true }),
            _ => Err(XmlError::UnsupportedCanonicalization {
                algorithm: uri.to_owned(),
            }),
        }
    }

    pub fn uri(self) -> &'static str {
        match self {
            Self::Inclusive10 { with_comments: false } => C14N_10,
            Self::Inclusive10 { with_comments: true } => C14N_10_WITH_COMMENTS,
            Self::Inclusive11 { with_comments: false } => C14N_11,
            Self::Inclusive11 { with_comments: true } => C14N_11_WITH_COMMENTS,
            Self::Exclusive { with_comments: false } => EXCLUSIVE_C14N,
            Self::Exclusive { with_comments: true } => EXCLUSIVE_C14N_WITH_COMMENTS,
        }
    }

    fn with_comments(self) -> bool {
        match self {
            Self::Inclusive10 { with_comments }
            | Self::Inclusive11 { with_comments }
            | Self::Exclusive { with_comments } => with_comments,
        }
    }

    fn is_exclusive(self) -> bool {
        matches!(self, Self::Exclusive { .. })
    }
}

/// Canonicalizes `element` as if it was the document element.
pub fn canonicalize(element: &Element, method: CanonicalizationMethod) -> Vec<u8> {
    canonicalize_in_scope(element, &[], method)
}

/// Canonicalizes `element` given the namespace declarations of its ancestors, outermost first.
pub fn canonicalize_in_scope(
    element: &Element,
    inherited: &[NamespaceDeclaration],
    method: CanonicalizationMethod,
) -> Vec<u8> {
    let mut in_scope = Namespaces::new();
    for declaration in inherited {
        in_scope.declare(declaration);
    }

    let mut canonicalizer = Canonicalizer {
        method,
        out: String::new(),
    };
    canonicalizer.write_element(element, &in_scope, &Namespaces::new());
    canonicalizer.out.into_bytes()
}

/// Prefix to URI map, the default namespace is keyed by the empty prefix.
type Namespaces = BTreeMap<String, String>;

trait NamespacesExt {
    fn declare(&mut self, declaration: &NamespaceDeclaration);
}

impl NamespacesExt for Namespaces {
    fn declare(&mut self, declaration: &NamespaceDeclaration) {
        let prefix = declaration.prefix.clone().unwrap_or_default();
        // the xml prefix is bound by definition and never rendered
        if prefix != "xml" {
            self.insert(prefix, declaration.uri.clone());
        }
    }
}

struct Canonicalizer {
    method: CanonicalizationMethod,
    out: String,
}

impl Canonicalizer {
    /// `in_scope` holds the namespaces in scope at the parent, `rendered` the ones already
    /// output by an ancestor.
    fn write_element(&mut self, element: &Element, in_scope: &Namespaces, rendered: &Namespaces) {
        let mut element_scope = in_scope.clone();
        for declaration in element.namespace_declarations() {
            element_scope.declare(declaration);
        }

        let to_render = if self.method.is_exclusive() {
            exclusive_namespaces(element, rendered)
        } else {
            inclusive_namespaces(&element_scope, rendered)
        };

        let mut element_rendered = rendered.clone();
        element_rendered.extend(to_render.iter().map(|(prefix, uri)| (prefix.clone(), uri.clone())));

        let name = element.qualified_name();
        self.out.push('<');
        self.out.push_str(&name);

        for (prefix, uri) in &to_render {
            let prefix = (!prefix.is_empty()).then_some(prefix.as_str());
            write_namespace_declaration(&mut self.out, prefix, uri);
        }

        let mut attributes: Vec<_> = element.attributes().iter().collect();
        attributes.sort_by(|a, b| {
            let a_key = (a.namespace.as_deref().unwrap_or(""), a.local_name.as_str());
            let b_key = (b.namespace.as_deref().unwrap_or(""), b.local_name.as_str());
            a_key.cmp(&b_key)
        });
        for attribute in attributes {
            write_attribute(&mut self.out, &attribute.qualified_name(), &attribute.value);
        }

        self.out.push('>');

        for child in element.children() {
            match child {
                Node::Element(child) => self.write_element(child, &element_scope, &element_rendered),
                Node::Text(text) => escape_text(&mut self.out, text),
                Node::Comment(comment) if self.method.with_comments() => {
                    self.out.push_str("<!--");
                    self.out.push_str(comment);
                    self.out.push_str("-->");
                }
                Node::Comment(_) => {}
                Node::ProcessingInstruction { target, data } => {
                    write_processing_instruction(&mut self.out, target, data)
                }
            }
        }

        self.out.push_str("</");
        self.out.push_str(&name);
        self.out.push('>');
    }
}

/// Namespace nodes in scope whose value differs from what the nearest output ancestor rendered.
fn inclusive_namespaces(element_scope: &Namespaces, rendered: &Namespaces) -> Namespaces {
    element_scope
        .iter()
        .filter(|(prefix, uri)| match rendered.get(prefix.as_str()) {
            Some(rendered_uri) => rendered_uri != *uri,
            // xmlns="" only undoes a rendered non-empty default namespace
            None => !(prefix.is_empty() && uri.is_empty()),
        })
        .map(|(prefix, uri)| (prefix.clone(), uri.clone()))
        .collect()
}

/// Visibly utilized namespaces not yet rendered with the same value.
fn exclusive_namespaces(element: &Element, rendered: &Namespaces) -> Namespaces {
    let mut utilized = Namespaces::new();
    utilized.insert(
        element.prefix().unwrap_or_default().to_owned(),
        element.namespace().unwrap_or_default().to_owned(),
    );

    for attribute in element.attributes() {
        if let (Some(prefix), Some(namespace)) = (&attribute.prefix, &attribute.namespace) {
            if prefix != "xml" {
                utilized.insert(prefix.clone(), namespace.clone());
            }
        }
    }

    utilized.retain(|prefix, uri| match rendered.get(prefix.as_str()) {
        Some(rendered_uri) => rendered_uri != uri,
        None => !(prefix.is_empty() && uri.is_empty()),
    });
    utilized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XADES_NS;
    use expect_test::expect;

    fn c14n(xml: &str, method: CanonicalizationMethod) -> String {
        let element = Element::parse(xml.as_bytes()).unwrap();
        let mut canonical = String::from_utf8(canonicalize(&element, method)).unwrap();
        canonical.push('\n');
        canonical
    }

    const NAMESPACES: &str = r#"<doc>
   <e1   />
   <e2   ></e2>
   <e3 name="elem3"   id="elem3"   />
   <e5 a:attr="out" b:attr="sorted" attr2="all" attr="I'm"
      xmlns:b="http://www.ietf.org"
      xmlns:a="http://www.w3.org"
      xmlns="http://example.org"/>
   <e6 xmlns="" xmlns:a="http://www.w3.org">
      <e7 xmlns="http://www.ietf.org">
         <e8 xmlns="" xmlns:a="http://www.w3.org">
            <e9 xmlns="" xmlns:a="http://www.ietf.org"/>
         </e8>
      </e7>
   </e6>
</doc>"#;

    #[test]
    fn inclusive_namespaces_and_attributes() {
        expect![[r#"
            <doc>
               <e1></e1>
               <e2></e2>
               <e3 id="elem3" name="elem3"></e3>
               <e5 xmlns="http://example.org" xmlns:a="http://www.w3.org" xmlns:b="http://www.ietf.org" attr="I'm" attr2="all" b:attr="sorted" a:attr="out"></e5>
               <e6 xmlns:a="http://www.w3.org">
                  <e7 xmlns="http://www.ietf.org">
                     <e8 xmlns="">
                        <e9 xmlns:a="http://www.ietf.org"></e9>
                     </e8>
                  </e7>
               </e6>
            </doc>
        "#]]
        .assert_eq(&c14n(NAMESPACES, CanonicalizationMethod::Inclusive10 { with_comments: false }));
    }

    #[test]
    fn exclusive_only_renders_utilized_namespaces() {
        expect![[r#"
            <doc>
               <e1></e1>
               <e2></e2>
               <e3 id="elem3" name="elem3"></e3>
               <e5 xmlns="http://example.org" xmlns:a="http://www.w3.org" xmlns:b="http://www.ietf.org" attr="I'm" attr2="all" b:attr="sorted" a:attr="out"></e5>
               <e6>
                  <e7 xmlns="http://www.ietf.org">
                     <e8 xmlns="">
                        <e9></e9>
                     </e8>
                  </e7>
               </e6>
            </doc>
        "#]]
        .assert_eq(&c14n(NAMESPACES, CanonicalizationMethod::Exclusive { with_comments: false }));
    }

    #[test]
    fn escaping_and_comments() {
        let xml = "<a b=\"&lt;&quot;&#x9;&#xA;&#xD;\">&amp;&lt;&gt;&#xD;\"'<!-- note --><?pi data?></a>";

        expect![[r#"
            <a b="&lt;&quot;&#x9;&#xA;&#xD;">&amp;&lt;&gt;&#xD;"'<?pi data?></a>
        "#]]
        .assert_eq(&c14n(xml, CanonicalizationMethod::Inclusive11 { with_comments: false }));

        expect![[r#"
            <a b="&lt;&quot;&#x9;&#xA;&#xD;">&amp;&lt;&gt;&#xD;"'<!-- note --><?pi data?></a>
        "#]]
        .assert_eq(&c14n(xml, CanonicalizationMethod::Exclusive { with_comments: true }));
    }

    #[test]
    fn subtree_with_inherited_namespaces() {
        let xml = r#"<ds:Object xmlns:ds="http://www.w3.org/2000/09/xmldsig#" xmlns:unused="urn:unused"><xades:QualifyingProperties xmlns:xades="http://uri.etsi.org/01903/v1.3.2#"><xades:SignedProperties Id="p1"><ds:DigestMethod Algorithm="urn:d"/></xades:SignedProperties></xades:QualifyingProperties></ds:Object>"#;
        let object = Element::parse(xml.as_bytes()).unwrap();
        let (signed_properties, inherited) = object.find_descendant(XADES_NS, "SignedProperties").unwrap();

        let exclusive = canonicalize_in_scope(
            signed_properties,
            &inherited,
            CanonicalizationMethod::Exclusive { with_comments: false },
        );
        assert_eq!(
            String::from_utf8(exclusive).unwrap(),
            r#"<xades:SignedProperties xmlns:xades="http://uri.etsi.org/01903/v1.3.2#" Id="p1"><ds:DigestMethod xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Algorithm="urn:d"></ds:DigestMethod></xades:SignedProperties>"#
        );

        let inclusive = canonicalize_in_scope(
            signed_properties,
            &inherited,
            CanonicalizationMethod::Inclusive10 { with_comments: false },
        );
        assert_eq!(
            String::from_utf8(inclusive).unwrap(),
            r#"<xades:SignedProperties xmlns:ds="http://www.w3.org/2000/09/xmldsig#" xmlns:unused="urn:unused" xmlns:xades="http://uri.etsi.org/01903/v1.3.2#" Id="p1"><ds:DigestMethod Algorithm="urn:d"></ds:DigestMethod></xades:SignedProperties>"#
        );
    }

    #[test]
    fn method_uris() {
        for uri in [
            C14N_10,
            C14N_10_WITH_COMMENTS,
            C14N_11,
            C14N_11_WITH_COMMENTS,
            EXCLUSIVE_C14N,
            EXCLUSIVE_C14N_WITH_COMMENTS,
        ] {
            assert_eq!(CanonicalizationMethod::from_uri(uri).unwrap().uri(), uri);
        }

        assert!(matches!(
            CanonicalizationMethod::from_uri("urn:unknown"),
            Err(XmlError::UnsupportedCanonicalization { .. })
        ));
    }
}
