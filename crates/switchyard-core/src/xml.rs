//! Flat XML documents as used by the platform's push protocol.
//!
//! Every inbound document is a single `<xml>` root with leaf children whose
//! text is either plain or wrapped in CDATA. Nested containers (such as
//! `ScanCodeInfo`) are flattened into the same map.

use std::collections::BTreeMap;

use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{GatewayError, GatewayResult};

/// Parse a flat document into `element name -> text`.
pub(crate) fn parse_flat(xml: &str) -> GatewayResult<BTreeMap<String, String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut depth = 0usize;
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                if depth == 1 {
                    saw_root = true;
                } else {
                    current = Some(local_name(&e));
                }
            }
            Ok(Event::Empty(e)) => {
                if depth >= 1 {
                    fields.entry(local_name(&e)).or_insert_with(String::new);
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(name) = &current {
                    let text = e
                        .unescape()
                        .map_err(|e| GatewayError::protocol(format!("XML text error: {e}")))?;
                    fields.entry(name.clone()).or_default().push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(name) = &current {
                    let text = std::str::from_utf8(&e)
                        .map_err(|e| GatewayError::protocol(format!("CDATA is not UTF-8: {e}")))?;
                    fields.entry(name.clone()).or_default().push_str(text);
                }
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                current = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(GatewayError::protocol(format!("XML parse error: {e}")));
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(GatewayError::protocol("document has no root element"));
    }
    Ok(fields)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Writer for reply documents rooted at `<xml>`.
pub(crate) struct XmlBuilder {
    writer: Writer<Vec<u8>>,
    error: Option<String>,
}

impl XmlBuilder {
    pub(crate) fn new() -> Self {
        let mut builder = Self {
            writer: Writer::new(Vec::new()),
            error: None,
        };
        builder.open("xml");
        builder
    }

    /// `<name><![CDATA[value]]></name>`
    pub(crate) fn cdata(&mut self, name: &str, value: &str) -> &mut Self {
        self.open(name);
        // "]]>" cannot appear inside one section; split it across two.
        let pieces: Vec<&str> = value.split("]]>").collect();
        let last = pieces.len() - 1;
        for (i, piece) in pieces.iter().enumerate() {
            let mut chunk = String::new();
            if i > 0 {
                chunk.push('>');
            }
            chunk.push_str(piece);
            if i < last {
                chunk.push_str("]]");
            }
            self.write(Event::CData(BytesCData::new(chunk)));
        }
        self.close(name)
    }

    /// `<name>value</name>`
    pub(crate) fn number(&mut self, name: &str, value: i64) -> &mut Self {
        self.open(name);
        self.write(Event::Text(BytesText::new(&value.to_string())));
        self.close(name)
    }

    pub(crate) fn open(&mut self, name: &str) -> &mut Self {
        self.write(Event::Start(BytesStart::new(name)));
        self
    }

    pub(crate) fn close(&mut self, name: &str) -> &mut Self {
        self.write(Event::End(BytesEnd::new(name)));
        self
    }

    pub(crate) fn finish(mut self) -> GatewayResult<String> {
        self.close("xml");
        if let Some(message) = self.error {
            return Err(GatewayError::protocol(format!("failed to write XML: {message}")));
        }
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| GatewayError::protocol(format!("reply is not UTF-8: {e}")))
    }

    fn write(&mut self, event: Event<'_>) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.writer.write_event(event) {
            self.error = Some(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_text_and_cdata() {
        let fields = parse_flat(
            "<xml>\n  <ToUserName><![CDATA[gh_123]]></ToUserName>\n  <CreateTime>1348831860</CreateTime>\n  <Content><![CDATA[a < b & c]]></Content>\n</xml>",
        )
        .unwrap();
        assert_eq!(fields["ToUserName"], "gh_123");
        assert_eq!(fields["CreateTime"], "1348831860");
        assert_eq!(fields["Content"], "a < b & c");
    }

    #[test]
    fn test_nested_containers_are_flattened() {
        let fields = parse_flat(
            "<xml><Event><![CDATA[scancode_push]]></Event><ScanCodeInfo><ScanType><![CDATA[qrcode]]></ScanType><ScanResult><![CDATA[1]]></ScanResult></ScanCodeInfo></xml>",
        )
        .unwrap();
        assert_eq!(fields["Event"], "scancode_push");
        assert_eq!(fields["ScanType"], "qrcode");
        assert_eq!(fields["ScanResult"], "1");
    }

    #[test]
    fn test_rejects_non_xml() {
        assert!(parse_flat("").is_err());
        assert!(parse_flat("<xml><a></b></xml>").is_err());
    }

    #[test]
    fn test_builder_writes_cdata_and_numbers() {
        let mut builder = XmlBuilder::new();
        builder.cdata("Content", "hi").number("CreateTime", 42);
        let xml = builder.finish().unwrap();
        assert_eq!(
            xml,
            "<xml><Content><![CDATA[hi]]></Content><CreateTime>42</CreateTime></xml>"
        );
    }

    #[test]
    fn test_cdata_terminator_is_split() {
        let mut builder = XmlBuilder::new();
        builder.cdata("Content", "x]]>y");
        let xml = builder.finish().unwrap();
        let fields = parse_flat(&xml).unwrap();
        assert_eq!(fields["Content"], "x]]>y");
    }
}
