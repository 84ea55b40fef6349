//! Descriptor documents: XML to `DescriptorNode` trees, and the device and
//! action records extracted from them.

pub mod devices;
pub mod tree;

use xmltree::Element;
use shared::types::DescriptorNode;

pub use devices::{extract_actions, extract_devices, ActionList, DeviceList};
pub use tree::{find_all, parse_element, KeyRule, KeyRules, KeyTransform};

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("invalid XML: {0}")]
    Parse(#[from] xmltree::ParseError),
}

/// Parse a (namespace-neutralized) document into an element tree
pub fn parse_xml(xml: &[u8]) -> Result<Element, DescriptorError> {
    Ok(Element::parse(xml)?)
}

/// Neutralize the namespaces of a fetched document and parse it
pub fn read_document(bytes: &[u8]) -> Result<Element, DescriptorError> {
    let xml = neutralize_namespaces(&String::from_utf8_lossy(bytes));
    parse_xml(xml.as_bytes())
}

pub fn parse_document(bytes: &[u8], rules: &KeyRules) -> Result<DescriptorNode, DescriptorError> {
    Ok(parse_element(&read_document(bytes)?, rules))
}

pub fn extract_devices_from(bytes: &[u8]) -> Result<DeviceList, DescriptorError> {
    Ok(extract_devices(&read_document(bytes)?))
}

/// Remove default namespace declarations (`xmlns="..."`, `xmlns='...'`).
/// Prefixed declarations such as `xmlns:dlna="..."` are left alone.
pub fn neutralize_namespaces(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut rest = xml;

    while let Some(pos) = rest.find("xmlns") {
        let (before, after) = rest.split_at(pos);
        let tail = &after["xmlns".len()..];
        let attribute_start = before.chars().last().is_some_and(char::is_whitespace);

        match default_declaration_len(tail) {
            Some(len) if attribute_start => {
                out.push_str(before.trim_end());
                rest = &tail[len..];
            }
            _ => {
                out.push_str(before);
                out.push_str("xmlns");
                rest = tail;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Length of `="..."` (with optional blanks around `=`) following an `xmlns` token
fn default_declaration_len(tail: &str) -> Option<usize> {
    let value = tail.trim_start().strip_prefix('=')?.trim_start();
    let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let close = value[1..].find(quote)?;
    Some(tail.len() - value.len() + close + 2)
}
