//! In-memory ISO 9660 images for tests
//!
//! [`IsoBuilder`] lays out an ordinary tree (optionally with Rock Ridge
//! names). [`RawImage`] places hand-made directory records and SUSP entries
//! at chosen blocks for layouts the builder does not produce.

use std::collections::HashMap;
use std::io::Cursor;

use super::iso9660::{encode_733, ISO9660_IDENTIFIER, PVD_BLOCK};
use super::source::{VolumeSource, BLOCK_SIZE};
use super::volume::record::FileFlags;

/// Write a u32 in "both-endian" format: 4 bytes LE followed by 4 bytes BE.
pub fn put_u32_both(buf: &mut [u8], value: u32) {
    buf[..8].copy_from_slice(&encode_733(value));
}

/// Write a u16 in "both-endian" format: 2 bytes LE followed by 2 bytes BE.
pub fn put_u16_both(buf: &mut [u8], value: u16) {
    buf[0..2].copy_from_slice(&value.to_le_bytes());
    buf[2..4].copy_from_slice(&value.to_be_bytes());
}

/// One directory record; the identifier is padded to even length
pub fn dir_record(id: &[u8], address: u32, size: u32, flags: u8, system_use: &[u8]) -> Vec<u8> {
    let padding = if id.len() % 2 == 0 { 1 } else { 0 };
    let record_len = 33 + id.len() + padding + system_use.len();
    assert!(record_len <= 255, "record too long: {}", record_len);

    let mut buf = vec![0u8; record_len];
    buf[0] = record_len as u8;
    put_u32_both(&mut buf[2..10], address);
    put_u32_both(&mut buf[10..18], size);
    buf[18..25].copy_from_slice(&[124, 6, 1, 12, 0, 0, 0]);
    buf[25] = flags;
    put_u16_both(&mut buf[28..32], 1);
    buf[32] = id.len() as u8;
    buf[33..33 + id.len()].copy_from_slice(id);
    let su_start = 33 + id.len() + padding;
    buf[su_start..].copy_from_slice(system_use);
    buf
}

fn put_padded(field: &mut [u8], text: &str) {
    field.fill(b' ');
    field[..text.len()].copy_from_slice(text.as_bytes());
}

/// A Primary Volume Descriptor block
pub fn pvd_block(label: &str, volume_size: u32, root_address: u32, root_size: u32) -> Vec<u8> {
    let mut block = vec![0u8; BLOCK_SIZE];
    block[0] = 1;
    block[1..6].copy_from_slice(ISO9660_IDENTIFIER);
    block[6] = 1;
    put_padded(&mut block[8..40], "LINUX");
    put_padded(&mut block[40..72], label);
    put_u32_both(&mut block[80..88], volume_size);
    put_u16_both(&mut block[120..124], 1);
    put_u16_both(&mut block[124..128], 1);
    put_u16_both(&mut block[128..132], BLOCK_SIZE as u16);
    let root = dir_record(&[0], root_address, root_size, FileFlags::DIRECTORY, &[]);
    block[156..156 + root.len()].copy_from_slice(&root);
    put_padded(&mut block[190..318], "");
    put_padded(&mut block[318..446], "");
    put_padded(&mut block[574..702], "DISC-VERIFY TESTS");
    block[881] = 1;
    block
}

fn terminator_block() -> Vec<u8> {
    let mut block = vec![0u8; BLOCK_SIZE];
    block[0] = 255;
    block[1..6].copy_from_slice(ISO9660_IDENTIFIER);
    block[6] = 1;
    block
}

/// SUSP SP: sharing protocol indicator with the per-record byte skip
pub fn susp_sp(skip: u8) -> Vec<u8> {
    vec![b'S', b'P', 7, 1, 0xBE, 0xEF, skip]
}

/// SUSP CE: continuation area pointer
pub fn susp_ce(block: u32, offset: u32, length: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 28];
    buf[..4].copy_from_slice(&[b'C', b'E', 28, 1]);
    put_u32_both(&mut buf[4..12], block);
    put_u32_both(&mut buf[12..20], offset);
    put_u32_both(&mut buf[20..28], length);
    buf
}

/// SUSP ER: extension reference with a short description
pub fn susp_er(id: &str) -> Vec<u8> {
    let desc = b"ROCK RIDGE";
    let total = 8 + id.len() + desc.len();
    let mut buf = vec![0u8; total];
    buf[..4].copy_from_slice(&[b'E', b'R', total as u8, 1]);
    buf[4] = id.len() as u8;
    buf[5] = desc.len() as u8;
    buf[6] = 0;
    buf[7] = 1;
    buf[8..8 + id.len()].copy_from_slice(id.as_bytes());
    buf[8 + id.len()..].copy_from_slice(desc);
    buf
}

/// SUSP ST: end of the System Use area
pub fn susp_st() -> Vec<u8> {
    vec![b'S', b'T', 4, 1]
}

/// Pre-1.12 Rock Ridge "RR" indicator
pub fn rrip_rr() -> Vec<u8> {
    vec![b'R', b'R', 5, 1, 0x89]
}

/// RRIP NM: alternate name
pub fn rrip_nm(flags: u8, name: &str) -> Vec<u8> {
    let total = 5 + name.len();
    let mut buf = vec![0u8; total];
    buf[..5].copy_from_slice(&[b'N', b'M', total as u8, 1, flags]);
    buf[5..].copy_from_slice(name.as_bytes());
    buf
}

/// RRIP CL: child link to a relocated directory
pub fn rrip_cl(address: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 12];
    buf[..4].copy_from_slice(&[b'C', b'L', 12, 1]);
    put_u32_both(&mut buf[4..12], address);
    buf
}

/// RRIP PL: parent link of a relocated directory
pub fn rrip_pl(address: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 12];
    buf[..4].copy_from_slice(&[b'P', b'L', 12, 1]);
    put_u32_both(&mut buf[4..12], address);
    buf
}

/// RRIP RE: relocated directory marker
pub fn rrip_re() -> Vec<u8> {
    vec![b'R', b'E', 4, 1]
}

/// Pack records into a directory extent without letting any record cross a
/// block boundary
pub fn pack_directory(records: &[Vec<u8>]) -> Vec<u8> {
    let mut data = Vec::new();
    for record in records {
        let used = data.len() % BLOCK_SIZE;
        if used != 0 && used + record.len() > BLOCK_SIZE {
            data.resize(data.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE, 0);
        }
        data.extend_from_slice(record);
    }
    let size = data.len().div_ceil(BLOCK_SIZE).max(1) * BLOCK_SIZE;
    data.resize(size, 0);
    data
}

/// Image assembled by placing bytes at block offsets
#[derive(Default)]
pub struct RawImage {
    data: Vec<u8>,
}

impl RawImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, block: u32, offset: usize, bytes: &[u8]) {
        let start = block as usize * BLOCK_SIZE + offset;
        let end = start + bytes.len();
        let needed = end.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        if self.data.len() < needed {
            self.data.resize(needed, 0);
        }
        self.data[start..end].copy_from_slice(bytes);
    }

    /// Write a packed directory extent, returning its byte size
    pub fn directory(&mut self, block: u32, records: &[Vec<u8>]) -> u32 {
        let extent = pack_directory(records);
        self.put(block, 0, &extent);
        extent.len() as u32
    }

    /// Write the descriptor set for a session starting at `start`
    pub fn pvd(&mut self, start: u32, label: &str, root_address: u32, root_size: u32) {
        let volume_size = (self.data.len() / BLOCK_SIZE) as u32;
        let pvd = pvd_block(label, volume_size.max(start + 18), root_address, root_size);
        self.put(start + PVD_BLOCK as u32, 0, &pvd);
        self.put(start + PVD_BLOCK as u32 + 1, 0, &terminator_block());
    }

    pub fn source(&self) -> VolumeSource {
        VolumeSource::from_reader(Cursor::new(self.data.clone())).unwrap()
    }
}

enum NodeKind {
    Directory(Vec<usize>),
    File(Vec<Vec<u8>>),
}

struct Node {
    iso_name: String,
    rr_name: Option<String>,
    parent: usize,
    kind: NodeKind,
}

#[derive(Default)]
struct Layout {
    directories: HashMap<usize, (u32, u32)>,
    files: HashMap<usize, Vec<u32>>,
}

/// Builder for well-formed images
pub struct IsoBuilder {
    label: String,
    rock_ridge: bool,
    nodes: Vec<Node>,
}

impl IsoBuilder {
    /// Plain ISO 9660 image
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            rock_ridge: false,
            nodes: vec![Node {
                iso_name: String::new(),
                rr_name: None,
                parent: 0,
                kind: NodeKind::Directory(Vec::new()),
            }],
        }
    }

    /// Image with SP/ER at the root and NM names on every record
    pub fn rock_ridge(label: &str) -> Self {
        let mut builder = Self::new(label);
        builder.rock_ridge = true;
        builder
    }

    pub fn root(&self) -> usize {
        0
    }

    fn add(&mut self, parent: usize, iso_name: &str, rr_name: Option<&str>, kind: NodeKind) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            iso_name: iso_name.to_string(),
            rr_name: rr_name.map(str::to_string),
            parent,
            kind,
        });
        match &mut self.nodes[parent].kind {
            NodeKind::Directory(children) => children.push(id),
            NodeKind::File(_) => panic!("parent {} is a file", parent),
        }
        id
    }

    pub fn dir(&mut self, parent: usize, iso_name: &str, rr_name: Option<&str>) -> usize {
        self.add(parent, iso_name, rr_name, NodeKind::Directory(Vec::new()))
    }

    pub fn file(&mut self, parent: usize, iso_name: &str, rr_name: Option<&str>, data: &[u8]) -> usize {
        self.add(parent, iso_name, rr_name, NodeKind::File(vec![data.to_vec()]))
    }

    /// File recorded as one extent per part
    pub fn multi_extent_file(
        &mut self,
        parent: usize,
        iso_name: &str,
        rr_name: Option<&str>,
        parts: &[&[u8]],
    ) -> usize {
        let parts = parts.iter().map(|p| p.to_vec()).collect();
        self.add(parent, iso_name, rr_name, NodeKind::File(parts))
    }

    fn name_entry(&self, node: usize) -> Vec<u8> {
        match (&self.nodes[node].rr_name, self.rock_ridge) {
            (Some(name), true) => rrip_nm(0, name),
            _ => Vec::new(),
        }
    }

    fn records(&self, dir: usize, layout: &Layout) -> Vec<Vec<u8>> {
        let location = |d: usize| layout.directories.get(&d).copied().unwrap_or((0, 0));
        let (address, size) = location(dir);
        let (parent_address, parent_size) = location(self.nodes[dir].parent);

        let mut self_su = Vec::new();
        if self.rock_ridge && dir == 0 {
            self_su.extend(susp_sp(0));
            self_su.extend(susp_er("RRIP_1991A"));
        }

        let mut records = vec![
            dir_record(&[0], address, size, FileFlags::DIRECTORY, &self_su),
            dir_record(&[1], parent_address, parent_size, FileFlags::DIRECTORY, &[]),
        ];

        let NodeKind::Directory(children) = &self.nodes[dir].kind else {
            return records;
        };
        for &child in children {
            let node = &self.nodes[child];
            let name_su = self.name_entry(child);
            match &node.kind {
                NodeKind::Directory(_) => {
                    let (address, size) = location(child);
                    records.push(dir_record(
                        node.iso_name.as_bytes(),
                        address,
                        size,
                        FileFlags::DIRECTORY,
                        &name_su,
                    ));
                }
                NodeKind::File(parts) => {
                    for (i, part) in parts.iter().enumerate() {
                        let block = layout.files.get(&child).map(|b| b[i]).unwrap_or(0);
                        let flags = if i + 1 < parts.len() { FileFlags::MULTI_EXTENT } else { 0 };
                        records.push(dir_record(
                            node.iso_name.as_bytes(),
                            block,
                            part.len() as u32,
                            flags,
                            &name_su,
                        ));
                    }
                }
            }
        }
        records
    }

    fn directories(&self) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![0];
        while let Some(dir) = stack.pop() {
            order.push(dir);
            if let NodeKind::Directory(children) = &self.nodes[dir].kind {
                for &child in children.iter().rev() {
                    if matches!(self.nodes[child].kind, NodeKind::Directory(_)) {
                        stack.push(child);
                    }
                }
            }
        }
        order
    }

    /// Image for a session starting at block 0
    pub fn build(&self) -> Vec<u8> {
        self.build_at(0)
    }

    /// Image for a session starting at `start`; addresses are absolute
    pub fn build_at(&self, start: u32) -> Vec<u8> {
        let directories = self.directories();
        let mut layout = Layout::default();
        let mut next = start + PVD_BLOCK as u32 + 2;

        for &dir in &directories {
            let size = pack_directory(&self.records(dir, &layout)).len() as u32;
            layout.directories.insert(dir, (next, size));
            next += size / BLOCK_SIZE as u32;
        }

        let mut contents = Vec::new();
        for (id, node) in self.nodes.iter().enumerate() {
            if let NodeKind::File(parts) = &node.kind {
                let mut blocks = Vec::new();
                for part in parts {
                    blocks.push(next);
                    contents.push((next, part.as_slice()));
                    next += part.len().div_ceil(BLOCK_SIZE) as u32;
                }
                layout.files.insert(id, blocks);
            }
        }

        let mut image = RawImage::new();
        image.put(next, 0, &[]);
        for &dir in &directories {
            let (address, _) = layout.directories[&dir];
            image.directory(address, &self.records(dir, &layout));
        }
        for (block, data) in contents {
            image.put(block, 0, data);
        }
        let (root_address, root_size) = layout.directories[&0];
        image.pvd(start, &self.label, root_address, root_size);
        image.data.resize(next as usize * BLOCK_SIZE, 0);
        image.data
    }

    pub fn source(&self) -> VolumeSource {
        VolumeSource::from_reader(Cursor::new(self.build())).unwrap()
    }
}
