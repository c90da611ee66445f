//! XML encoding and decoding of JSON-shaped values.
//!
//! Objects map to elements whose properties become child elements (or
//! attributes, per [`XmlPropertyRule::attribute`]); arrays become repeated
//! elements, optionally wrapped in an element named after the property.

use std::borrow::Cow;
use std::collections::HashMap;

use opmarshal_core::{XmlPropertyRule, XmlRules};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::param::scalar_text;

/// Key under which mixed text content of an element with children or
/// attributes is stored.
pub const TEXT_KEY: &str = "#text";

/// Serialize `value` as an XML document with root element `root`.
pub fn to_xml(value: &Value, root: &str, rules: &XmlRules) -> Result<Vec<u8>, ApiError> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(encode_error)?;

    let root_name = match &rules.prefix {
        Some(prefix) => format!("{prefix}:{root}"),
        None => root.to_owned(),
    };
    let mut start = BytesStart::new(root_name.as_str());
    if let Some(namespace) = &rules.namespace {
        match &rules.prefix {
            Some(prefix) => start.push_attribute((format!("xmlns:{prefix}").as_str(), namespace.as_str())),
            None => start.push_attribute(("xmlns", namespace.as_str())),
        }
    }
    write_element(&mut writer, start, &root_name, value, rules)?;
    Ok(writer.into_inner())
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    mut start: BytesStart<'_>,
    name: &str,
    value: &Value,
    rules: &XmlRules,
) -> Result<(), ApiError> {
    match value {
        Value::Null => writer.write_event(Event::Empty(start)).map_err(encode_error),
        Value::Object(map) => {
            let mut children = Vec::with_capacity(map.len());
            for (key, child) in map {
                let rule = rules.property(key);
                match rule {
                    Some(rule) if rule.attribute && !child.is_array() && !child.is_object() => {
                        let text = scalar_text(child);
                        start.push_attribute((element_name(key, Some(rule)), text.as_str()));
                    }
                    _ if key == TEXT_KEY => children.push((key, child, None)),
                    _ => children.push((key, child, rule)),
                }
            }
            if children.is_empty() {
                return writer.write_event(Event::Empty(start)).map_err(encode_error);
            }
            writer.write_event(Event::Start(start)).map_err(encode_error)?;
            for (key, child, rule) in children {
                if key == TEXT_KEY {
                    write_text(writer, child)?;
                } else {
                    write_property(writer, key, child, rule, rules)?;
                }
            }
            writer.write_event(Event::End(BytesEnd::new(name))).map_err(encode_error)
        }
        Value::Array(items) => {
            writer.write_event(Event::Start(start)).map_err(encode_error)?;
            for item in items {
                write_element(writer, BytesStart::new("item"), "item", item, rules)?;
            }
            writer.write_event(Event::End(BytesEnd::new(name))).map_err(encode_error)
        }
        scalar => {
            writer.write_event(Event::Start(start)).map_err(encode_error)?;
            write_text(writer, scalar)?;
            writer.write_event(Event::End(BytesEnd::new(name))).map_err(encode_error)
        }
    }
}

fn write_property(
    writer: &mut Writer<Vec<u8>>,
    key: &str,
    value: &Value,
    rule: Option<&XmlPropertyRule>,
    rules: &XmlRules,
) -> Result<(), ApiError> {
    let name = element_name(key, rule);
    let Value::Array(items) = value else {
        return write_element(writer, BytesStart::new(name), name, value, rules);
    };

    let item_name = rule.and_then(|r| r.item_name.as_deref()).unwrap_or(name);
    let wrapped = rule.is_some_and(|r| r.wrapped);
    if wrapped {
        writer
            .write_event(Event::Start(BytesStart::new(name)))
            .map_err(encode_error)?;
    }
    for item in items {
        write_element(writer, BytesStart::new(item_name), item_name, item, rules)?;
    }
    if wrapped {
        writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(encode_error)?;
    }
    Ok(())
}

fn write_text(writer: &mut Writer<Vec<u8>>, value: &Value) -> Result<(), ApiError> {
    let text = scalar_text(value);
    writer
        .write_event(Event::Text(BytesText::new(&text)))
        .map_err(encode_error)
}

fn element_name<'a>(key: &'a str, rule: Option<&'a XmlPropertyRule>) -> &'a str {
    rule.and_then(|r| r.rename.as_deref()).unwrap_or(key)
}

fn encode_error(err: impl std::fmt::Display) -> ApiError {
    ApiError::Encode(format!("XML serialization failed: {err}"))
}

fn decode_error(err: impl std::fmt::Display) -> ApiError {
    ApiError::Decode(format!("XML parsing failed: {err}"))
}

/// An element being assembled.
struct Frame {
    name: String,
    properties: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self, ApiError> {
        let mut frame = Frame {
            name: local_name(start.name().as_ref())?.to_owned(),
            properties: Map::new(),
            text: String::new(),
        };
        for attribute in start.attributes() {
            let attribute = attribute.map_err(decode_error)?;
            let key = attribute.key.as_ref();
            if key == b"xmlns" || key.starts_with(b"xmlns:") {
                continue;
            }
            let key = local_name(key)?.to_owned();
            let raw = std::str::from_utf8(&attribute.value).map_err(decode_error)?;
            let value: Cow<'_, str> = unescape(raw).map_err(decode_error)?;
            frame.properties.insert(key, Value::String(value.into_owned()));
        }
        Ok(frame)
    }

    fn finish(self, rule: Option<&XmlPropertyRule>) -> Value {
        let Frame {
            mut properties,
            text,
            ..
        } = self;
        let text = text.trim();

        if rule.is_some_and(|r| r.wrapped) {
            return Value::Array(properties.into_iter().flat_map(|(_, v)| into_items(v)).collect());
        }
        if properties.is_empty() {
            return if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.to_owned())
            };
        }
        if !text.is_empty() {
            properties.insert(TEXT_KEY.to_owned(), Value::String(text.to_owned()));
        }
        Value::Object(properties)
    }

    fn attach(&mut self, property: String, rule: Option<&XmlPropertyRule>, value: Value) {
        let wrapped = rule.is_some_and(|r| r.wrapped);
        let listed = rule.is_some_and(|r| r.item_name.is_some() && !r.wrapped);
        match self.properties.get_mut(&property) {
            Some(Value::Array(items)) if wrapped => items.extend(into_items(value)),
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None if listed => {
                self.properties.insert(property, Value::Array(vec![value]));
            }
            None => {
                self.properties.insert(property, value);
            }
        }
    }
}

fn into_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Element-name to property resolution, honoring renames and item names.
struct Bindings<'a> {
    rules: &'a XmlRules,
    by_element: HashMap<&'a str, &'a str>,
}

impl<'a> Bindings<'a> {
    fn new(rules: &'a XmlRules) -> Self {
        let mut by_element = HashMap::new();
        for (property, rule) in &rules.properties {
            let element = match (&rule.item_name, rule.wrapped) {
                (Some(item), false) => item.as_str(),
                _ => rule.rename.as_deref().unwrap_or(property),
            };
            by_element.insert(element, property.as_str());
        }
        Self { rules, by_element }
    }

    fn resolve<'n>(&self, element: &'n str) -> (&'n str, Option<&'a XmlPropertyRule>)
    where
        'a: 'n,
    {
        let property = self.by_element.get(element).copied().unwrap_or(element);
        (property, self.rules.property(property))
    }
}

fn local_name(raw: &[u8]) -> Result<&str, ApiError> {
    let name = std::str::from_utf8(raw).map_err(decode_error)?;
    Ok(name.rsplit_once(':').map_or(name, |(_, local)| local))
}

/// Parse an XML document into a value.
///
/// The root element's content is returned (its name is dropped). Attributes
/// and child elements become properties, repeated elements become arrays,
/// text-only elements become strings and empty elements become `null`.
pub fn from_xml(data: &[u8], rules: &XmlRules) -> Result<Value, ApiError> {
    let text = std::str::from_utf8(data).map_err(decode_error)?;
    let bindings = Bindings::new(rules);
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<Frame> = Vec::new();

    loop {
        let closed = match reader.read_event().map_err(decode_error)? {
            Event::Start(start) => {
                stack.push(Frame::open(&start)?);
                None
            }
            Event::Empty(start) => Some(Frame::open(&start)?),
            Event::End(_) => match stack.pop() {
                Some(frame) => Some(frame),
                None => return Err(ApiError::Decode("unbalanced XML end tag".into())),
            },
            Event::Text(content) => {
                if let Some(frame) = stack.last_mut() {
                    let raw = std::str::from_utf8(&content).map_err(decode_error)?;
                    frame.text.push_str(&unescape(raw).map_err(decode_error)?);
                }
                None
            }
            Event::GeneralRef(reference) => {
                if let Some(frame) = stack.last_mut() {
                    match reference.resolve_char_ref().map_err(decode_error)? {
                        Some(ch) => frame.text.push(ch),
                        None => {
                            let name = reference.decode().map_err(decode_error)?;
                            let resolved = resolve_predefined_entity(&name)
                                .ok_or_else(|| ApiError::Decode(format!("unknown XML entity `&{name};`")))?;
                            frame.text.push_str(resolved);
                        }
                    }
                }
                None
            }
            Event::CData(content) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(std::str::from_utf8(&content).map_err(decode_error)?);
                }
                None
            }
            Event::Eof => {
                return Err(ApiError::Decode(if stack.is_empty() {
                    "XML document has no root element".into()
                } else {
                    "XML document ended inside an element".into()
                }));
            }
            _ => None,
        };

        let Some(frame) = closed else { continue };
        let Some(parent) = stack.last_mut() else {
            return Ok(frame.finish(None));
        };
        let (property, rule) = bindings.resolve(&frame.name);
        let property = property.to_owned();
        let value = frame.finish(rule);
        parent.attach(property, rule, value);
    }
}
