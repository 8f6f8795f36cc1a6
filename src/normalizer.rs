//! Response body normalization.
//!
//! Remote services answer in whatever format they like; downstream plugin
//! code wants exactly one shape. [`normalize`] dispatches on the declared
//! content type (lowercased, parameters stripped) and produces a
//! [`CanonicalBody`]:
//!
//! - `application/json` and `*+json` suffixes parse into a
//!   [`serde_json::Value`]
//! - `application/xml`, `text/xml` and `*+xml` suffixes parse into an
//!   [`XmlElement`] tree
//! - `application/x-www-form-urlencoded` parses into an ordered
//!   multi-map of string pairs
//! - anything else (or no content type at all) passes through as raw
//!   bytes, never as a decode error
//!
//! Malformed JSON/XML produces a typed [`DecodeError`](crate::error::DecodeError)
//! so callers can distinguish a broken payload from a broken connection.

use bytes::Bytes;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::Value;

use crate::error::{Error, Result};

/// The normalized, content-type-independent representation of a response
/// payload.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalBody {
    /// Structured JSON value.
    Json(Value),
    /// XML document tree rooted at the document element.
    Xml(XmlElement),
    /// Ordered `key=value` pairs; keys may repeat, order is preserved.
    Form(Vec<(String, String)>),
    /// Undecoded passthrough for unrecognized content types.
    Raw(Bytes),
}

impl CanonicalBody {
    /// Returns the JSON value, if this body is JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            CanonicalBody::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the XML root element, if this body is XML.
    pub fn as_xml(&self) -> Option<&XmlElement> {
        match self {
            CanonicalBody::Xml(root) => Some(root),
            _ => None,
        }
    }

    /// Returns the form pairs, if this body is form-encoded.
    pub fn as_form(&self) -> Option<&[(String, String)]> {
        match self {
            CanonicalBody::Form(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Returns the raw bytes, if this body was passed through undecoded.
    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            CanonicalBody::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// One element of an XML document: tag name, attributes in document
/// order, ordered children, and accumulated text content.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    /// Tag name as written, namespace prefix included.
    pub name: String,
    /// Attributes in document order.
    pub attributes: Vec<(String, String)>,
    /// Child elements in document order.
    pub children: Vec<XmlElement>,
    /// Text content with surrounding whitespace trimmed.
    pub text: String,
}

impl XmlElement {
    /// Returns the first child with the given tag name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Returns the value of the given attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Normalizes a raw response body according to its declared content type.
///
/// An absent or unrecognized content type is not an error; the body
/// passes through as [`CanonicalBody::Raw`].
pub fn normalize(body: &Bytes, content_type: Option<&str>) -> Result<CanonicalBody> {
    let media = content_type.map(media_type);
    match media.as_deref() {
        Some(m) if is_json_media(m) => parse_json(body).map(CanonicalBody::Json),
        Some(m) if is_xml_media(m) => parse_xml(body).map(CanonicalBody::Xml),
        Some("application/x-www-form-urlencoded") => Ok(CanonicalBody::Form(parse_form(body))),
        _ => Ok(CanonicalBody::Raw(body.clone())),
    }
}

/// Like [`normalize`], but falls back to a raw passthrough when decoding
/// fails. Used for error-response bodies, where a broken payload must not
/// mask the HTTP failure itself.
pub fn normalize_lenient(body: &Bytes, content_type: Option<&str>) -> CanonicalBody {
    normalize(body, content_type).unwrap_or_else(|_| CanonicalBody::Raw(body.clone()))
}

/// Extracts the lowercased media type from a `Content-Type` header value,
/// dropping parameters such as `charset=utf-8`.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn is_json_media(media: &str) -> bool {
    media == "application/json" || media == "text/json" || media.ends_with("+json")
}

fn is_xml_media(media: &str) -> bool {
    media == "application/xml" || media == "text/xml" || media.ends_with("+xml")
}

fn parse_json(body: &Bytes) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| Error::malformed_json(e.to_string()))
}

fn parse_form(body: &Bytes) -> Vec<(String, String)> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

/// Encodes ordered `key=value` pairs as an `x-www-form-urlencoded` body.
/// Inverse of the form branch of [`normalize`].
pub fn encode_form<'a, I>(pairs: I) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish().into_bytes()
}

fn parse_xml(body: &Bytes) -> Result<XmlElement> {
    let text = std::str::from_utf8(body)
        .map_err(|e| Error::malformed_xml(format!("invalid UTF-8: {e}")))?;

    let mut reader = Reader::from_str(text);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                stack.push(element_from_start(&start)?);
            }
            Ok(Event::Empty(start)) => {
                let element = element_from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| Error::malformed_xml("closing tag without opening tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(t)) => {
                let unescaped = t
                    .unescape()
                    .map_err(|e| Error::malformed_xml(e.to_string()))?;
                append_text(&mut stack, unescaped.trim())?;
            }
            Ok(Event::CData(data)) => {
                let owned = data.into_inner();
                let content = String::from_utf8_lossy(&owned);
                append_text(&mut stack, &content)?;
            }
            Ok(Event::Eof) => break,
            // Declarations, comments, processing instructions and
            // doctypes carry no canonical content.
            Ok(_) => {}
            Err(e) => return Err(Error::malformed_xml(e.to_string())),
        }
    }

    if !stack.is_empty() {
        return Err(Error::malformed_xml("unclosed element"));
    }
    root.ok_or_else(|| Error::malformed_xml("document has no root element"))
}

fn element_from_start(start: &BytesStart<'_>) -> Result<XmlElement> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::malformed_xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::malformed_xml(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(XmlElement {
        name,
        attributes,
        ..XmlElement::default()
    })
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err(Error::malformed_xml("multiple root elements"))
    }
}

fn append_text(stack: &mut [XmlElement], content: &str) -> Result<()> {
    if content.is_empty() {
        return Ok(());
    }
    match stack.last_mut() {
        Some(element) => {
            element.text.push_str(content);
            Ok(())
        }
        // Text outside the root element is not well-formed XML.
        None => Err(Error::malformed_xml("text content outside root element")),
    }
}
