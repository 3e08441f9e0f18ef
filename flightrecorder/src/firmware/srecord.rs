//! Motorola S-record firmware image parsing and page assembly.
//!
//! One textual record per line:
//!
//! ```text
//! S<type><count><address><data...><checksum>
//! ```
//!
//! Type 0 is the header, types 1/2/3 carry data at 16/24/32-bit addresses,
//! type 5 is a record count and types 7/8/9 carry the start address. The
//! count byte covers address, data and checksum; the checksum is the ones'
//! complement of the byte sum over count, address and data. Both the count
//! and the checksum are verified on every record; a corrupted firmware
//! byte silently accepted would end up in device flash.

use std::collections::BTreeMap;

use log::debug;

use crate::error::{Error, Result};

/// A parsed S-record image.
#[derive(Debug, Clone, Default)]
pub struct SRecordFile {
    header: Option<Vec<u8>>,
    data: BTreeMap<u32, Vec<u8>>,
    start_address: Option<u32>,
    records: Vec<String>,
}

/// One flash page: `data.len()` equals the page size used to produce it,
/// and `base` is aligned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// First flash address covered by this page.
    pub base: u32,
    /// Page contents, gaps and tail filled with `0xFF`.
    pub data: Vec<u8>,
}

impl Page {
    /// Page number for a given page size.
    #[must_use]
    pub fn index(&self, page_size: usize) -> u32 {
        self.base / page_size as u32
    }
}

fn malformed(line: &str) -> Error {
    Error::SRecord(format!("malformed record {line:?}"))
}

fn hex_to_bytes(line: &str, hex: &str) -> Result<Vec<u8>> {
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        return Err(malformed(line));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| malformed(line)))
        .collect()
}

fn address(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}

impl SRecordFile {
    /// Parse an image from its text lines.
    ///
    /// Any malformed, count-inconsistent or checksum-failing record is a
    /// fatal error, not a warning.
    pub fn parse<I>(lines: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut file = Self::default();
        let mut data_records = 0usize;
        for line in lines {
            let line = line.as_ref().trim_end();
            file.parse_record(line, &mut data_records)?;
            file.records.push(line.to_string());
        }
        debug!(
            "parsed {} records, {} data regions",
            file.records.len(),
            file.data.len()
        );
        Ok(file)
    }

    fn parse_record(&mut self, line: &str, data_records: &mut usize) -> Result<()> {
        let rest = line.strip_prefix('S').ok_or_else(|| malformed(line))?;
        if !rest.is_ascii() || rest.len() < 1 + 4 {
            return Err(malformed(line));
        }
        let (rtype, hex) = rest.split_at(1);
        let bytes = hex_to_bytes(line, hex)?;
        if bytes.len() < 2 {
            return Err(malformed(line));
        }

        let count = usize::from(bytes[0]);
        if bytes.len() - 1 != count {
            return Err(Error::SRecord(format!(
                "byte count mismatch in {line:?}: declared {count}, found {}",
                bytes.len() - 1
            )));
        }

        let sum: u8 = bytes[..bytes.len() - 1]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        let expected = !sum;
        let received = bytes[bytes.len() - 1];
        if expected != received {
            return Err(Error::SRecord(format!(
                "checksum mismatch in {line:?}: expected {expected:02X}, received {received:02X}"
            )));
        }

        let body = &bytes[1..bytes.len() - 1];
        match rtype {
            "0" => {
                if body.len() < 3 || body[0] != 0 || body[1] != 0 {
                    return Err(malformed(line));
                }
                self.header = Some(body[2..].to_vec());
            }
            "1" | "2" | "3" => {
                let width = match rtype {
                    "1" => 2,
                    "2" => 3,
                    _ => 4,
                };
                if body.len() < width + 1 {
                    return Err(malformed(line));
                }
                let addr = address(&body[..width]);
                self.data.insert(addr, body[width..].to_vec());
                *data_records += 1;
            }
            "5" => {
                if body.len() != 2 {
                    return Err(malformed(line));
                }
                let declared = address(body) as usize;
                if declared != *data_records {
                    return Err(Error::SRecord(format!(
                        "record count mismatch in {line:?}: declared {declared}, counted {data_records}"
                    )));
                }
            }
            "7" | "8" | "9" => {
                let width = match rtype {
                    "7" => 4,
                    "8" => 3,
                    _ => 2,
                };
                if body.len() != width {
                    return Err(malformed(line));
                }
                self.start_address = Some(address(body));
            }
            _ => return Err(malformed(line)),
        }
        Ok(())
    }

    /// Header payload of the S0 record, if present.
    #[must_use]
    pub fn header(&self) -> Option<&[u8]> {
        self.header.as_deref()
    }

    /// Data regions keyed by address, in ascending order.
    #[must_use]
    pub fn data(&self) -> &BTreeMap<u32, Vec<u8>> {
        &self.data
    }

    /// Start address of the S7/S8/S9 record, if present.
    #[must_use]
    pub fn start_address(&self) -> Option<u32> {
        self.start_address
    }

    /// The source lines, right-trimmed, in file order.
    #[must_use]
    pub fn records(&self) -> &[String] {
        &self.records
    }

    /// Whether the image carries any data records.
    #[must_use]
    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    /// Assemble the data regions into contiguous, aligned flash pages.
    ///
    /// Regions are walked in ascending address order; gaps between them and
    /// the tail of the final page are filled with `0xFF`. Overlapping
    /// regions are fatal.
    pub fn pages(&self, page_size: usize) -> Result<Pages> {
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(Error::SRecord(format!("invalid page size {page_size}")));
        }
        let mut base = 0u32;
        let mut assembled: Vec<u8> = Vec::new();
        for (&addr, chunk) in &self.data {
            if assembled.is_empty() {
                base = addr & !(page_size as u32 - 1);
            }
            let expected = u64::from(base) + assembled.len() as u64;
            if u64::from(addr) < expected {
                return Err(Error::SRecord(format!(
                    "overlapping data at address {addr:#010x}"
                )));
            }
            let fill = (u64::from(addr) - expected) as usize;
            assembled.extend(std::iter::repeat_n(0xFF, fill));
            assembled.extend_from_slice(chunk);
        }
        let tail = assembled.len() % page_size;
        if tail != 0 {
            assembled.extend(std::iter::repeat_n(0xFF, page_size - tail));
        }
        Ok(Pages {
            base,
            data: assembled,
            page_size,
            offset: 0,
        })
    }
}

/// Iterator over the assembled [`Page`]s of an image.
#[derive(Debug, Clone)]
pub struct Pages {
    base: u32,
    data: Vec<u8>,
    page_size: usize,
    offset: usize,
}

impl Pages {
    /// Total number of pages this iterator will yield.
    #[must_use]
    pub fn total(&self) -> usize {
        self.data.len() / self.page_size
    }
}

impl Iterator for Pages {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        if self.offset >= self.data.len() {
            return None;
        }
        let start = self.offset;
        self.offset += self.page_size;
        Some(Page {
            base: self.base + start as u32,
            data: self.data[start..start + self.page_size].to_vec(),
        })
    }
}
