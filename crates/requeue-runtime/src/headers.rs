//! Message headers and their encoding in the message extension payload.
//!
//! Headers travel in the extension as an XML list of key/value pairs:
//!
//! ```xml
//! <ArrayOfHeaderInfo>
//!   <HeaderInfo><Key>FailedQ</Key><Value>orders@app01</Value></HeaderInfo>
//! </ArrayOfHeaderInfo>
//! ```

use crate::error::SerializationError;
use crate::message::Message;
use bytes::Bytes;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

const ROOT_ELEMENT: &str = "ArrayOfHeaderInfo";
const HEADER_ELEMENT: &str = "HeaderInfo";
const KEY_ELEMENT: &str = "Key";
const VALUE_ELEMENT: &str = "Value";

// ============================================================================
// HeaderMap
// ============================================================================

/// Insertion-ordered string map of message headers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Insert a header, replacing the value in place when the key exists
    ///
    /// Returns the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

// ============================================================================
// HeaderCodec
// ============================================================================

/// Reads and writes the header map carried in a message's extension
pub trait HeaderCodec: Send + Sync {
    fn extract_headers(&self, message: &Message) -> Result<HeaderMap, SerializationError>;

    /// Replace the message's extension with the encoded headers
    fn save_headers(
        &self,
        headers: &HeaderMap,
        message: &mut Message,
    ) -> Result<(), SerializationError>;
}

/// Header codec for the `ArrayOfHeaderInfo` XML layout
#[derive(Debug, Clone, Default)]
pub struct XmlHeaderCodec;

impl XmlHeaderCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, headers: &HeaderMap) -> Result<Bytes, SerializationError> {
        let mut writer = Writer::new(Vec::new());

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_error)?;
        writer
            .write_event(Event::Start(BytesStart::new(ROOT_ELEMENT).with_attributes([
                ("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance"),
                ("xmlns:xsd", "http://www.w3.org/2001/XMLSchema"),
            ])))
            .map_err(xml_error)?;

        for (key, value) in headers.iter() {
            writer
                .write_event(Event::Start(BytesStart::new(HEADER_ELEMENT)))
                .map_err(xml_error)?;
            write_text_element(&mut writer, KEY_ELEMENT, key)?;
            write_text_element(&mut writer, VALUE_ELEMENT, value)?;
            writer
                .write_event(Event::End(BytesEnd::new(HEADER_ELEMENT)))
                .map_err(xml_error)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new(ROOT_ELEMENT)))
            .map_err(xml_error)?;

        Ok(Bytes::from(writer.into_inner()))
    }

    pub fn decode(&self, payload: &[u8]) -> Result<HeaderMap, SerializationError> {
        let text = std::str::from_utf8(payload).map_err(|_| SerializationError::InvalidUtf8)?;
        let text = text.trim_start_matches('\u{feff}').trim_end_matches('\0');

        let mut headers = HeaderMap::new();
        if text.trim().is_empty() {
            return Ok(headers);
        }

        let mut reader = Reader::from_str(text);
        let mut in_header = false;
        let mut field: Option<Field> = None;
        let mut buffer = String::new();
        let mut key: Option<String> = None;
        let mut value: Option<String> = None;

        loop {
            match reader.read_event().map_err(xml_error)? {
                Event::Start(e) => match e.name().as_ref() {
                    b"HeaderInfo" => {
                        in_header = true;
                        key = None;
                        value = None;
                    }
                    b"Key" if in_header => {
                        field = Some(Field::Key);
                        buffer.clear();
                    }
                    b"Value" if in_header => {
                        field = Some(Field::Value);
                        buffer.clear();
                    }
                    _ => {}
                },
                Event::Empty(e) => match e.name().as_ref() {
                    b"HeaderInfo" => {
                        return Err(SerializationError::InvalidAttribute {
                            key: KEY_ELEMENT.to_string(),
                        })
                    }
                    b"Key" if in_header => key = Some(String::new()),
                    b"Value" if in_header => value = Some(String::new()),
                    _ => {}
                },
                Event::Text(e) if field.is_some() => {
                    buffer.push_str(&e.unescape().map_err(xml_error)?);
                }
                Event::CData(e) if field.is_some() => {
                    let data =
                        std::str::from_utf8(&e).map_err(|_| SerializationError::InvalidUtf8)?;
                    buffer.push_str(data);
                }
                Event::End(e) => match e.name().as_ref() {
                    b"Key" if field == Some(Field::Key) => {
                        key = Some(std::mem::take(&mut buffer));
                        field = None;
                    }
                    b"Value" if field == Some(Field::Value) => {
                        value = Some(std::mem::take(&mut buffer));
                        field = None;
                    }
                    b"HeaderInfo" => {
                        let header_key =
                            key.take().ok_or_else(|| SerializationError::InvalidAttribute {
                                key: KEY_ELEMENT.to_string(),
                            })?;
                        headers.insert(header_key, value.take().unwrap_or_default());
                        in_header = false;
                    }
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        if in_header || field.is_some() {
            return Err(SerializationError::InvalidXml {
                message: "document ended inside a header entry".to_string(),
            });
        }

        Ok(headers)
    }
}

impl HeaderCodec for XmlHeaderCodec {
    fn extract_headers(&self, message: &Message) -> Result<HeaderMap, SerializationError> {
        self.decode(&message.extension)
    }

    fn save_headers(
        &self,
        headers: &HeaderMap,
        message: &mut Message,
    ) -> Result<(), SerializationError> {
        message.extension = self.encode(headers)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Key,
    Value,
}

fn write_text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    text: &str,
) -> Result<(), SerializationError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_error)?;
    Ok(())
}

fn xml_error(error: quick_xml::Error) -> SerializationError {
    SerializationError::InvalidXml {
        message: error.to_string(),
    }
}

#[cfg(test)]
#[path = "headers_tests.rs"]
mod tests;
