//! Synthetic v2.0 MDX/MDD containers, written bit-exactly for the tests.
#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::Path;

use adler32::RollingAdler32;
use flate2::write::ZlibEncoder;
use flate2::Compression;

pub const TAG_STORED: u32 = 0;
pub const TAG_LZO: u32 = 1;
pub const TAG_ZLIB: u32 = 2;

pub struct FixtureSpec {
    /// MDD containers carry UTF-16LE keys and raw record payloads.
    pub utf16_keys: bool,
    pub nul_terminated_records: bool,
    pub encoding_attr: String,
    pub title: String,
    pub description: String,
    pub stylesheet: Option<String>,
    pub entries: Vec<(String, Vec<u8>)>,
    pub key_block_tag: u32,
    pub record_block_tag: u32,
    /// 0 means a single record block.
    pub records_per_block: usize,
}

impl FixtureSpec {
    pub fn mdx(entries: &[(&str, &str)]) -> Self {
        Self {
            utf16_keys: false,
            nul_terminated_records: true,
            encoding_attr: "UTF-8".to_string(),
            title: "Test Dictionary".to_string(),
            description: String::new(),
            stylesheet: None,
            entries: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
            key_block_tag: TAG_ZLIB,
            record_block_tag: TAG_ZLIB,
            records_per_block: 0,
        }
    }

    pub fn mdd(entries: &[(&str, &[u8])]) -> Self {
        Self {
            utf16_keys: true,
            nul_terminated_records: false,
            encoding_attr: String::new(),
            title: "Test Resources".to_string(),
            description: String::new(),
            stylesheet: None,
            entries: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_vec()))
                .collect(),
            key_block_tag: TAG_ZLIB,
            record_block_tag: TAG_ZLIB,
            records_per_block: 0,
        }
    }
}

fn adler(data: &[u8]) -> u32 {
    RollingAdler32::from_buffer(data).hash()
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

fn slab(tag: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(tag.to_le_bytes());
    out.extend(adler(payload).to_be_bytes());
    match tag {
        TAG_ZLIB => out.extend(deflate(payload)),
        _ => out.extend_from_slice(payload),
    }
    out
}

fn encode_key(key: &str, utf16: bool) -> Vec<u8> {
    if utf16 {
        let mut out: Vec<u8> = key.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        out.extend([0, 0]);
        out
    } else {
        let mut out = key.as_bytes().to_vec();
        out.push(0);
        out
    }
}

fn push_info_text(info: &mut Vec<u8>, text: &str, utf16: bool) {
    if utf16 {
        let units: Vec<u16> = text.encode_utf16().collect();
        info.extend((units.len() as u16).to_be_bytes());
        for unit in units {
            info.extend(unit.to_le_bytes());
        }
        info.extend([0, 0]);
    } else {
        info.extend((text.len() as u16).to_be_bytes());
        info.extend_from_slice(text.as_bytes());
        info.push(0);
    }
}

fn header_text(spec: &FixtureSpec) -> String {
    let mut attrs = format!(
        r#"GeneratedByEngineVersion="2.0" Format="Html" Encoding="{}" Title="{}" Description="{}""#,
        spec.encoding_attr, spec.title, spec.description
    );
    if let Some(stylesheet) = &spec.stylesheet {
        attrs.push_str(&format!(r#" StyleSheet="{stylesheet}""#));
    }
    format!("<Dictionary {attrs}/>")
}

pub fn write_fixture(path: &Path, spec: &FixtureSpec) {
    assert!(!spec.entries.is_empty(), "fixture needs at least one entry");

    let record_payloads: Vec<Vec<u8>> = spec
        .entries
        .iter()
        .map(|(_, content)| {
            let mut record = content.clone();
            if spec.nul_terminated_records {
                record.push(0);
            }
            record
        })
        .collect();
    let mut offsets = Vec::with_capacity(record_payloads.len());
    let mut total = 0u64;
    for record in &record_payloads {
        offsets.push(total);
        total += record.len() as u64;
    }

    let mut key_payload = Vec::new();
    for ((key, _), offset) in spec.entries.iter().zip(&offsets) {
        key_payload.extend(offset.to_be_bytes());
        key_payload.extend(encode_key(key, spec.utf16_keys));
    }
    let key_slab = slab(spec.key_block_tag, &key_payload);

    let mut info = Vec::new();
    info.extend((spec.entries.len() as u64).to_be_bytes());
    push_info_text(&mut info, &spec.entries.first().unwrap().0, spec.utf16_keys);
    push_info_text(&mut info, &spec.entries.last().unwrap().0, spec.utf16_keys);
    info.extend((key_slab.len() as u64).to_be_bytes());
    info.extend((key_payload.len() as u64).to_be_bytes());
    let mut key_info_blob = vec![0x02, 0, 0, 0];
    key_info_blob.extend(adler(&info).to_be_bytes());
    key_info_blob.extend(deflate(&info));

    let mut section = Vec::new();
    section.extend(1u64.to_be_bytes());
    section.extend((spec.entries.len() as u64).to_be_bytes());
    section.extend((info.len() as u64).to_be_bytes());
    section.extend((key_info_blob.len() as u64).to_be_bytes());
    section.extend((key_slab.len() as u64).to_be_bytes());

    let per_block = if spec.records_per_block == 0 {
        record_payloads.len()
    } else {
        spec.records_per_block
    };
    let blocks: Vec<(Vec<u8>, u64)> = record_payloads
        .chunks(per_block)
        .map(|chunk| {
            let payload: Vec<u8> = chunk.concat();
            (slab(spec.record_block_tag, &payload), payload.len() as u64)
        })
        .collect();

    let mut header_bytes: Vec<u8> = header_text(spec)
        .encode_utf16()
        .flat_map(|u| u.to_le_bytes())
        .collect();
    header_bytes.extend([0, 0]);

    let mut out = Vec::new();
    out.extend((header_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend(adler(&header_bytes).to_le_bytes());
    out.extend_from_slice(&section);
    out.extend(adler(&section).to_be_bytes());
    out.extend_from_slice(&key_info_blob);
    out.extend_from_slice(&key_slab);
    out.extend((blocks.len() as u64).to_be_bytes());
    out.extend((spec.entries.len() as u64).to_be_bytes());
    out.extend(((blocks.len() * 16) as u64).to_be_bytes());
    out.extend(
        blocks
            .iter()
            .map(|(slab, _)| slab.len() as u64)
            .sum::<u64>()
            .to_be_bytes(),
    );
    for (slab, decompressed_size) in &blocks {
        out.extend((slab.len() as u64).to_be_bytes());
        out.extend(decompressed_size.to_be_bytes());
    }
    for (slab, _) in &blocks {
        out.extend_from_slice(slab);
    }

    fs::write(path, out).unwrap();
}
