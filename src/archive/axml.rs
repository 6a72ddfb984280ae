//! Decoder for Android's compiled binary XML.
//!
//! Only the chunks needed to rebuild the element tree are interpreted: the
//! string pool, the resource map, namespaces and start/end elements. The
//! result is rendered back to plain XML text, one element per line.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};

const RES_XML_TYPE: u16 = 0x0003;
const RES_STRING_POOL_TYPE: u16 = 0x0001;
const RES_XML_START_NAMESPACE_TYPE: u16 = 0x0100;
const RES_XML_END_NAMESPACE_TYPE: u16 = 0x0101;
const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;
const RES_XML_END_ELEMENT_TYPE: u16 = 0x0103;
const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;

const UTF8_FLAG: u32 = 1 << 8;
const NO_INDEX: u32 = 0xFFFF_FFFF;
const CHUNK_HEADER_MIN: usize = 8;

/// Deepest element nesting accepted. Real manifests stay below ten.
const MAX_DEPTH: usize = 256;

/// Decoded text may grow to this multiple of the input before decoding stops.
const OUTPUT_FACTOR: usize = 16;
const MIN_OUTPUT_BUDGET: usize = 1 << 20;

const TYPE_REFERENCE: u8 = 0x01;
const TYPE_ATTRIBUTE: u8 = 0x02;
const TYPE_STRING: u8 = 0x03;
const TYPE_FLOAT: u8 = 0x04;
const TYPE_INT_DEC: u8 = 0x10;
const TYPE_INT_HEX: u8 = 0x11;
const TYPE_INT_BOOLEAN: u8 = 0x12;
const TYPE_FIRST_COLOR: u8 = 0x1c;
const TYPE_LAST_COLOR: u8 = 0x1f;

/// Framework attribute ids for names that obfuscators commonly blank out.
const KNOWN_ATTRS: &[(u32, &str)] = &[
    (0x0101_0003, "name"),
    (0x0101_000f, "debuggable"),
    (0x0101_0010, "exported"),
    (0x0101_020c, "minSdkVersion"),
    (0x0101_021b, "versionCode"),
    (0x0101_021c, "versionName"),
    (0x0101_0270, "targetSdkVersion"),
    (0x0101_0280, "allowBackup"),
    (0x0101_04ec, "usesCleartextTraffic"),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AxmlError {
    #[error("truncated at offset {0}")]
    Truncated(usize),
    #[error("not a binary XML document")]
    NotBinaryXml,
    #[error("malformed chunk at offset {0}")]
    BadChunk(usize),
    #[error("string index {0} out of range")]
    BadString(u32),
    #[error("elements nested deeper than {0}")]
    TooDeep(usize),
    #[error("decoded text exceeds {0} bytes")]
    TooLarge(usize),
    #[error("decoding cancelled")]
    Cancelled,
}

/// Whether `bytes` starts with the binary XML file header.
pub fn is_binary_xml(bytes: &[u8]) -> bool {
    bytes.len() >= 8 && read_u16(bytes, 0) == Some(RES_XML_TYPE)
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn u16(&self, at: usize) -> Result<u16, AxmlError> {
        read_u16(self.bytes, at).ok_or(AxmlError::Truncated(at))
    }

    fn u32(&self, at: usize) -> Result<u32, AxmlError> {
        read_u32(self.bytes, at).ok_or(AxmlError::Truncated(at))
    }

    fn u8(&self, at: usize) -> Result<u8, AxmlError> {
        self.bytes.get(at).copied().ok_or(AxmlError::Truncated(at))
    }
}

fn parse_string_pool(r: &Reader<'_>, start: usize, budget: usize) -> Result<Vec<String>, AxmlError> {
    let count = r.u32(start + 8)? as usize;
    let flags = r.u32(start + 16)?;
    let strings_start = start + r.u32(start + 20)? as usize;
    let header_size = r.u16(start + 2)? as usize;
    let utf8 = flags & UTF8_FLAG != 0;

    let mut strings = Vec::with_capacity(count.min(1 << 16));
    let mut total = 0usize;
    for i in 0..count {
        let offset = r.u32(start + header_size + i * 4)? as usize;
        let at = strings_start + offset;
        let s = if utf8 {
            read_utf8_string(r, at)?
        } else {
            read_utf16_string(r, at)?
        };
        // offsets may alias one long string many times over
        total = total.saturating_add(s.len());
        if total > budget {
            return Err(AxmlError::TooLarge(budget));
        }
        strings.push(s);
    }
    Ok(strings)
}

/// One- or two-byte length prefix. Returns `(length, bytes consumed)`.
fn read_utf8_len(r: &Reader<'_>, at: usize) -> Result<(usize, usize), AxmlError> {
    let first = r.u8(at)?;
    if first & 0x80 != 0 {
        let second = r.u8(at + 1)?;
        Ok(((((first & 0x7f) as usize) << 8) | second as usize, 2))
    } else {
        Ok((first as usize, 1))
    }
}

fn read_utf8_string(r: &Reader<'_>, at: usize) -> Result<String, AxmlError> {
    // utf16 length first, then the utf8 byte length we actually need
    let (_, skip) = read_utf8_len(r, at)?;
    let (len, consumed) = read_utf8_len(r, at + skip)?;
    let start = at + skip + consumed;
    let bytes = r
        .bytes
        .get(start..start + len)
        .ok_or(AxmlError::Truncated(start))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn read_utf16_string(r: &Reader<'_>, mut at: usize) -> Result<String, AxmlError> {
    let first = r.u16(at)?;
    at += 2;
    let len = if first & 0x8000 != 0 {
        let second = r.u16(at)?;
        at += 2;
        (((first & 0x7fff) as usize) << 16) | second as usize
    } else {
        first as usize
    };
    let mut units = Vec::with_capacity(len.min(1 << 16));
    for i in 0..len {
        units.push(r.u16(at + i * 2)?);
    }
    Ok(String::from_utf16_lossy(&units))
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c if c.is_control() && c != '\t' => {}
            c => out.push(c),
        }
    }
    out
}

struct Decoder<'a> {
    reader: Reader<'a>,
    cancel: &'a AtomicBool,
    budget: usize,
    strings: Vec<String>,
    resource_ids: Vec<u32>,
    prefixes: HashMap<String, String>,
    pending_ns: Vec<(String, String)>,
    depth: usize,
    out: String,
}

impl<'a> Decoder<'a> {
    fn string(&self, index: u32) -> Result<&str, AxmlError> {
        self.strings
            .get(index as usize)
            .map(String::as_str)
            .ok_or(AxmlError::BadString(index))
    }

    fn optional_string(&self, index: u32) -> Result<Option<&str>, AxmlError> {
        if index == NO_INDEX {
            Ok(None)
        } else {
            self.string(index).map(Some)
        }
    }

    fn attribute_name(&self, index: u32) -> Result<String, AxmlError> {
        let name = self.string(index)?;
        if !name.is_empty() {
            return Ok(name.to_string());
        }
        let id = self.resource_ids.get(index as usize).copied();
        let known = id.and_then(|id| KNOWN_ATTRS.iter().find(|(k, _)| *k == id));
        Ok(match (known, id) {
            (Some((_, name)), _) => name.to_string(),
            (None, Some(id)) => format!("attr_{:08x}", id),
            (None, None) => format!("attr_{}", index),
        })
    }

    fn typed_value(&self, data_type: u8, data: u32) -> Result<String, AxmlError> {
        Ok(match data_type {
            TYPE_STRING => self.string(data)?.to_string(),
            TYPE_REFERENCE => format!("@0x{:08x}", data),
            TYPE_ATTRIBUTE => format!("?0x{:08x}", data),
            TYPE_FLOAT => f32::from_bits(data).to_string(),
            TYPE_INT_DEC => (data as i32).to_string(),
            TYPE_INT_HEX => format!("0x{:08x}", data),
            TYPE_INT_BOOLEAN => (data != 0).to_string(),
            TYPE_FIRST_COLOR..=TYPE_LAST_COLOR => format!("#{:08x}", data),
            _ => format!("0x{:08x}", data),
        })
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn check_budget(&self, pending: usize) -> Result<(), AxmlError> {
        if self.out.len().saturating_add(pending) > self.budget {
            return Err(AxmlError::TooLarge(self.budget));
        }
        Ok(())
    }

    fn start_element(&mut self, chunk: usize, header_size: usize) -> Result<(), AxmlError> {
        let body = chunk + header_size;
        let name = self.string(self.reader.u32(body + 4)?)?.to_string();
        let attr_start = self.reader.u16(body + 8)? as usize;
        let attr_size = self.reader.u16(body + 10)? as usize;
        let attr_count = self.reader.u16(body + 12)? as usize;
        if attr_size < 20 {
            return Err(AxmlError::BadChunk(chunk));
        }
        if self.depth >= MAX_DEPTH {
            return Err(AxmlError::TooDeep(MAX_DEPTH));
        }

        let mut rendered = String::new();
        for (prefix, uri) in self.pending_ns.drain(..) {
            let _ = write!(rendered, " xmlns:{}=\"{}\"", prefix, escape(&uri));
        }
        self.check_budget(rendered.len())?;

        for i in 0..attr_count {
            let at = body + attr_start + i * attr_size;
            let ns = self.reader.u32(at)?;
            let attr_name = self.attribute_name(self.reader.u32(at + 4)?)?;
            let raw = self.reader.u32(at + 8)?;
            let data_type = self.reader.u8(at + 15)?;
            let data = self.reader.u32(at + 16)?;

            let value = match self.optional_string(raw)? {
                Some(raw) => raw.to_string(),
                None => self.typed_value(data_type, data)?,
            };
            let qualified = match self.optional_string(ns)? {
                Some(uri) => match self.prefixes.get(uri) {
                    Some(prefix) => format!("{}:{}", prefix, attr_name),
                    None => attr_name,
                },
                None => attr_name,
            };
            let _ = write!(rendered, " {}=\"{}\"", qualified, escape(&value));
            self.check_budget(rendered.len())?;
        }

        self.check_budget(rendered.len() + 2 * self.depth + name.len() + 4)?;
        self.indent();
        let _ = writeln!(self.out, "<{}{}>", name, rendered);
        self.depth += 1;
        Ok(())
    }

    fn end_element(&mut self, chunk: usize, header_size: usize) -> Result<(), AxmlError> {
        let name = self
            .string(self.reader.u32(chunk + header_size + 4)?)?
            .to_string();
        self.depth = self.depth.saturating_sub(1);
        self.check_budget(2 * self.depth + name.len() + 4)?;
        self.indent();
        let _ = writeln!(self.out, "</{}>", name);
        Ok(())
    }

    fn run(mut self) -> Result<String, AxmlError> {
        let bytes = self.reader.bytes;
        let header_size = self.reader.u16(2)? as usize;
        let total = (self.reader.u32(4)? as usize).min(bytes.len());
        let mut at = header_size;

        self.out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");

        while at + CHUNK_HEADER_MIN <= total {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(AxmlError::Cancelled);
            }

            let chunk_type = self.reader.u16(at)?;
            let chunk_header = self.reader.u16(at + 2)? as usize;
            let chunk_size = self.reader.u32(at + 4)? as usize;
            if chunk_size < CHUNK_HEADER_MIN
                || chunk_header < CHUNK_HEADER_MIN
                || chunk_header > chunk_size
                || at + chunk_size > total
            {
                return Err(AxmlError::BadChunk(at));
            }

            match chunk_type {
                RES_STRING_POOL_TYPE => {
                    self.strings = parse_string_pool(&self.reader, at, self.budget)?
                }
                RES_XML_RESOURCE_MAP_TYPE => {
                    let count = chunk_size
                        .checked_sub(chunk_header)
                        .ok_or(AxmlError::BadChunk(at))?
                        / 4;
                    self.resource_ids = (0..count)
                        .map(|i| self.reader.u32(at + chunk_header + i * 4))
                        .collect::<Result<_, _>>()?;
                }
                RES_XML_START_NAMESPACE_TYPE => {
                    let body = at + chunk_header;
                    let prefix = self.string(self.reader.u32(body)?)?.to_string();
                    let uri = self.string(self.reader.u32(body + 4)?)?.to_string();
                    self.prefixes.insert(uri.clone(), prefix.clone());
                    self.pending_ns.push((prefix, uri));
                }
                RES_XML_END_NAMESPACE_TYPE => {}
                RES_XML_START_ELEMENT_TYPE => self.start_element(at, chunk_header)?,
                RES_XML_END_ELEMENT_TYPE => self.end_element(at, chunk_header)?,
                _ => {}
            }

            at += chunk_size;
        }

        Ok(self.out)
    }
}

/// Decode a binary XML document into equivalent XML text.
pub fn decode(bytes: &[u8]) -> Result<String, AxmlError> {
    decode_cancellable(bytes, &AtomicBool::new(false))
}

/// [`decode`], giving up with [`AxmlError::Cancelled`] once `cancel` is set.
///
/// Nesting is capped at 256 levels and the rendered text at sixteen times
/// the input size (at least 1 MiB).
pub fn decode_cancellable(bytes: &[u8], cancel: &AtomicBool) -> Result<String, AxmlError> {
    if !is_binary_xml(bytes) {
        return Err(AxmlError::NotBinaryXml);
    }
    Decoder {
        reader: Reader { bytes },
        cancel,
        budget: bytes.len().saturating_mul(OUTPUT_FACTOR).max(MIN_OUTPUT_BUDGET),
        strings: Vec::new(),
        resource_ids: Vec::new(),
        prefixes: HashMap::new(),
        pending_ns: Vec::new(),
        depth: 0,
        out: String::new(),
    }
    .run()
}
