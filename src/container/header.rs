use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use encoding_rs::{Encoding, UTF_16LE};
use regex::Regex;

use super::ContainerKind;
use crate::codec::{self, NumberWidth};
use crate::error::{MdxError, Result};

#[derive(Debug, Clone)]
pub struct ContainerHeader {
    pub engine_version: f32,
    pub width: NumberWidth,
    pub encoding: &'static Encoding,
    /// Normalized label, persisted to the index metadata.
    pub encoding_label: String,
    pub title: String,
    pub description: String,
    /// Tag id -> (prefix, suffix) pairs from the StyleSheet attribute.
    pub stylesheet: HashMap<String, (String, String)>,
    /// File offset of the key catalog, right after the header checksum.
    pub key_block_offset: u64,
}

/// Read the length-prefixed UTF-16LE header block and its trailing
/// little-endian Adler-32, then scrape the attributes out of it.
pub(super) fn read_header(file: &mut File, kind: ContainerKind) -> Result<ContainerHeader> {
    let header_len = file.read_u32::<BigEndian>()? as usize;
    let mut raw = vec![0u8; header_len];
    file.read_exact(&mut raw)?;
    let checksum = file.read_u32::<LittleEndian>()?;
    if codec::adler32_of(&raw) != checksum {
        return Err(MdxError::CorruptHeader(
            "header Adler-32 checksum mismatch".to_string(),
        ));
    }
    let key_block_offset = file.stream_position()?;

    if raw.len() < 2 {
        return Err(MdxError::CorruptHeader(format!(
            "header of {} bytes cannot hold a UTF-16 terminator",
            raw.len()
        )));
    }
    // header text ends with \x00\x00
    let text = UTF_16LE.decode(&raw[..raw.len() - 2]).0;
    let attrs = parse_attrs(&text);

    let version_str = attrs
        .get("GeneratedByEngineVersion")
        .ok_or_else(|| MdxError::CorruptHeader("missing GeneratedByEngineVersion".to_string()))?;
    let engine_version: f32 = version_str.trim().parse().map_err(|_| {
        MdxError::CorruptHeader(format!("unparseable engine version {version_str:?}"))
    })?;

    let (encoding, encoding_label) = match kind {
        // MDD resource containers are always UTF-16LE keyed
        ContainerKind::Mdd => (UTF_16LE, "UTF-16".to_string()),
        ContainerKind::Mdx => {
            let label = attrs
                .get("Encoding")
                .ok_or_else(|| MdxError::CorruptHeader("missing Encoding attribute".to_string()))?;
            let (encoding, normalized) = codec::normalize_encoding(label)?;
            (encoding, normalized.to_string())
        }
    };

    let stylesheet = attrs
        .get("StyleSheet")
        .map(|raw| parse_stylesheet(raw))
        .unwrap_or_default();

    Ok(ContainerHeader {
        engine_version,
        width: NumberWidth::for_version(engine_version),
        encoding,
        encoding_label,
        title: attrs.get("Title").cloned().unwrap_or_default(),
        description: attrs.get("Description").cloned().unwrap_or_default(),
        stylesheet,
        key_block_offset,
    })
}

/// Extract attributes from `<Dictionary attr="value" ...>`, unescaping the
/// HTML entities the format uses in attribute values.
fn parse_attrs(text: &str) -> HashMap<String, String> {
    let re = Regex::new(r#"(?s)(\w+)="(.*?)""#).unwrap();
    let mut attrs = HashMap::new();
    for cap in re.captures_iter(text) {
        attrs.insert(
            cap[1].to_string(),
            html_escape::decode_html_entities(&cap[2]).into_owned(),
        );
    }
    attrs
}

/// The StyleSheet attribute is newline-separated triples:
/// tag number, begin text, end text.
fn parse_stylesheet(raw: &str) -> HashMap<String, (String, String)> {
    let lines: Vec<&str> = raw.lines().collect();
    let mut map = HashMap::new();
    for triple in lines.chunks(3) {
        if let [number, begin, end] = triple {
            map.insert(number.to_string(), (begin.to_string(), end.to_string()));
        }
    }
    map
}
