//! System Use Sharing Protocol and Rock Ridge entries
//!
//! Every entry starts with a two-letter signature, a length byte and a
//! version byte. Entries may continue in Continuation Areas (CE) stored in
//! other blocks; chains are followed until no further CE is found and the
//! source position is restored afterwards, so a directory scan in progress
//! never notices the detour.

use std::collections::HashSet;
use std::io::SeekFrom;

use crate::disc::error::{VolumeError, VolumeResult};
use crate::disc::iso9660::read_733;
use crate::disc::source::{VolumeSource, BLOCK_SIZE};

use super::record::DirectoryRecord;

/// SP check bytes
const SP_CHECK: [u8; 2] = [0xBE, 0xEF];

/// Extension identifiers announcing Rock Ridge in an ER entry
const ROCK_RIDGE_IDS: [&[u8]; 3] = [b"RRIP_1991A", b"IEEE_P1282", b"IEEE_1282"];

/// NM flags
const NM_CONTINUE: u8 = 0x01;
const NM_CURRENT: u8 = 0x02;
const NM_PARENT: u8 = 0x04;

/// Volume-wide SUSP facts, detected once on the root "." record and then
/// passed unchanged through the whole descent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeCapabilities {
    /// The volume uses the sharing protocol (SP found)
    pub susp: bool,
    /// Rock Ridge entries are present
    pub rock_ridge: bool,
    /// Bytes to skip at the start of every System Use area
    pub skip: usize,
}

impl VolumeCapabilities {
    /// No SUSP: plain ISO 9660 names only
    pub const PLAIN: Self = Self {
        susp: false,
        rock_ridge: false,
        skip: 0,
    };

    /// Inspect the System Use area of the root directory's "." record
    ///
    /// Without an SP entry at its start the area holds no SUSP data (CD-ROM
    /// XA attributes, for one) and is not interpreted at all.
    pub fn detect(source: &VolumeSource, root_self: &DirectoryRecord) -> VolumeResult<Self> {
        let area = root_self.system_use_area(0);
        let Some(skip) = sharing_indicator(area) else {
            log::info!("No SUSP indicator on the root directory, using ISO 9660 names");
            return Ok(Self::PLAIN);
        };
        let context = parse_system_use(source, area)?;

        let capabilities = Self {
            susp: true,
            rock_ridge: context.rock_ridge,
            skip: skip as usize,
        };
        log::info!(
            "SUSP detected: Rock Ridge {}, skip {} bytes",
            if capabilities.rock_ridge { "present" } else { "absent" },
            capabilities.skip
        );
        Ok(capabilities)
    }
}

/// Skip length of an SP entry opening `area`
fn sharing_indicator(area: &[u8]) -> Option<u8> {
    let is_sp = area.len() >= 7 && area[..2] == *b"SP" && area[2] >= 7 && area[4..6] == SP_CHECK;
    is_sp.then(|| area[6])
}

/// Location of a Continuation Area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContinuationArea {
    pub block: u32,
    pub offset: u32,
    pub length: u32,
}

/// Fields gathered from one record's System Use area and its continuations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuspContext {
    /// SP found as the first entry, with its skip length
    pub sharing: Option<u8>,
    /// RR or a Rock Ridge ER entry seen
    pub rock_ridge: bool,
    /// Rock Ridge alternate name (NM)
    pub alternate_name: Option<String>,
    /// Child link: address of the relocated directory (CL)
    pub child_link: Option<u32>,
    /// Relocated directory placeholder (RE)
    pub relocated: bool,
}

#[derive(Default)]
struct EntryParser {
    context: SuspContext,
    name: Option<Vec<u8>>,
    name_continues: bool,
    entries: usize,
    /// ST seen
    done: bool,
}

impl EntryParser {
    /// Parse the entries of one area, returning the continuation it points to
    fn feed(&mut self, area: &[u8]) -> VolumeResult<Option<ContinuationArea>> {
        let mut continuation = None;
        let mut offset = 0;

        // Fewer than 4 bytes left, or a zero signature, is padding
        while !self.done && offset + 4 <= area.len() && area[offset] != 0 {
            let len = area[offset + 2] as usize;
            if len < 4 || offset + len > area.len() {
                return Err(VolumeError::format(format!(
                    "Malformed SUSP entry '{}' (length {}, {} bytes left)",
                    String::from_utf8_lossy(&area[offset..offset + 2]),
                    len,
                    area.len() - offset
                )));
            }
            let entry = &area[offset..offset + len];

            match &entry[..2] {
                b"SP" => {
                    if self.entries == 0 && len >= 7 && entry[4..6] == SP_CHECK {
                        self.context.sharing = Some(entry[6]);
                    }
                }
                b"ST" => self.done = true,
                b"CE" => {
                    require(entry, 28)?;
                    continuation = Some(ContinuationArea {
                        block: read_733(&entry[4..12]),
                        offset: read_733(&entry[12..20]),
                        length: read_733(&entry[20..28]),
                    });
                }
                b"ER" => {
                    require(entry, 8)?;
                    let id_len = entry[4] as usize;
                    let id = entry.get(8..8 + id_len).ok_or_else(|| {
                        VolumeError::format("ER identifier runs past the entry")
                    })?;
                    if ROCK_RIDGE_IDS.contains(&id) {
                        self.context.rock_ridge = true;
                    }
                }
                b"RR" => self.context.rock_ridge = true,
                b"NM" => self.name_entry(entry)?,
                b"CL" => {
                    require(entry, 12)?;
                    self.context.child_link = Some(read_733(&entry[4..12]));
                }
                b"RE" => self.context.relocated = true,
                // PL, PX, TF, SL and the rest carry nothing we use
                _ => {}
            }

            self.entries += 1;
            offset += len;
        }

        Ok(continuation)
    }

    fn name_entry(&mut self, entry: &[u8]) -> VolumeResult<()> {
        require(entry, 5)?;
        let flags = entry[4];
        if flags & (NM_CURRENT | NM_PARENT) != 0 {
            return Ok(());
        }

        let name = self.name.get_or_insert_with(Vec::new);
        if !self.name_continues {
            name.clear();
        }
        name.extend_from_slice(&entry[5..]);
        self.name_continues = flags & NM_CONTINUE != 0;
        Ok(())
    }

    fn finish(mut self) -> SuspContext {
        self.context.alternate_name = self
            .name
            .map(|name| String::from_utf8_lossy(&name).into_owned());
        self.context
    }
}

fn require(entry: &[u8], len: usize) -> VolumeResult<()> {
    if entry.len() < len {
        return Err(VolumeError::format(format!(
            "SUSP entry '{}' is {} bytes, expected at least {}",
            String::from_utf8_lossy(&entry[..2]),
            entry.len(),
            len
        )));
    }
    Ok(())
}

/// Parse a System Use area (already stripped of the volume's skip),
/// following any Continuation Area chain it starts
pub fn parse_system_use(source: &VolumeSource, area: &[u8]) -> VolumeResult<SuspContext> {
    let mut parser = EntryParser::default();

    if let Some(first) = parser.feed(area)? {
        let saved = source.position();
        let followed = follow_continuations(source, &mut parser, first);
        source.seek(SeekFrom::Start(saved))?;
        followed?;
    }

    Ok(parser.finish())
}

/// Parse a record's System Use area for Rock Ridge fields
pub fn parse_record(
    source: &VolumeSource,
    record: &DirectoryRecord,
    capabilities: &VolumeCapabilities,
) -> VolumeResult<SuspContext> {
    if !capabilities.susp {
        return Ok(SuspContext::default());
    }
    parse_system_use(source, record.system_use_area(capabilities.skip))
}

fn follow_continuations(
    source: &VolumeSource,
    parser: &mut EntryParser,
    first: ContinuationArea,
) -> VolumeResult<()> {
    let mut visited = HashSet::new();
    let mut next = Some(first);

    while let Some(area) = next {
        if !visited.insert(area) {
            return Err(VolumeError::format(format!(
                "Continuation area chain loops at block {}",
                area.block
            )));
        }
        log::debug!(
            "Following continuation area at block {} (+{}, {} bytes)",
            area.block,
            area.offset,
            area.length
        );

        let data = read_continuation(source, area)?;
        next = if parser.done { None } else { parser.feed(&data)? };
    }
    Ok(())
}

fn read_continuation(source: &VolumeSource, area: ContinuationArea) -> VolumeResult<Vec<u8>> {
    let start = area.offset as usize;
    let end = start + area.length as usize;
    if end > BLOCK_SIZE {
        return Err(VolumeError::format(format!(
            "Continuation area at block {} crosses the block boundary ({}+{})",
            area.block, area.offset, area.length
        )));
    }

    let mut block = [0u8; BLOCK_SIZE];
    source.read_block(area.block as u64, &mut block)?;
    Ok(block[start..end].to_vec())
}
