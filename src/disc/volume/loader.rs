//! Directory hierarchy loading
//!
//! Each directory level is scanned completely before anything below it is
//! visited. Its records are then classified (file, directory to descend into,
//! relocation placeholder to skip) and only afterwards are the directories
//! expanded, so recursion never interleaves with a scan in progress.
//!
//! Relocation: Rock Ridge moves directories nested too deep for ISO 9660 to
//! a shallow "rr_moved" directory. The entry at the logical location carries
//! a CL entry pointing at the real directory; the real directory's own record
//! carries RE and is skipped. The full loader and the single-path lookup share
//! [`classify`], so both resolve a CL target before the record's address and
//! both skip RE records.

use std::collections::HashSet;

use crate::disc::error::{VolumeError, VolumeResult};
use crate::disc::iso9660::PrimaryVolumeDescriptor;
use crate::disc::source::{VolumeSource, BLOCK_SIZE};

use super::entry::{split_path, Extent, FileId, FileKind, VolumeFile, VolumeTree};
use super::record::DirectoryRecord;
use super::scanner::read_directory;
use super::susp::{parse_record, VolumeCapabilities};

/// Result of a full volume parse
#[derive(Debug, Clone)]
pub struct VolumeContents {
    pub tree: VolumeTree,
    /// Volume identifier from the descriptor
    pub label: String,
    /// Volume space size in blocks
    pub volume_size: u32,
    /// Blocks occupied by file data
    pub data_blocks: u64,
}

/// Build the whole file tree of a volume
pub fn get_contents(
    source: &VolumeSource,
    descriptor: &PrimaryVolumeDescriptor,
) -> VolumeResult<VolumeContents> {
    let root = &descriptor.root;
    let root_records = read_directory(source, root.address, root.size)?;
    let capabilities = detect_capabilities(source, &root_records)?;

    let mut tree = VolumeTree::new(VolumeFile::new_directory(
        String::new(),
        None,
        root.address,
        root.size,
    ));

    let mut loader = TreeLoader {
        source,
        capabilities,
        visited: HashSet::from([root.address]),
        data_blocks: 0,
    };
    let top = tree.root();
    loader.load_level(&mut tree, top, &root_records)?;

    log::info!(
        "Loaded {} entries from volume '{}' ({} data blocks)",
        tree.len(),
        descriptor.volume_id,
        loader.data_blocks
    );

    Ok(VolumeContents {
        tree,
        label: descriptor.volume_id.clone(),
        volume_size: descriptor.volume_size,
        data_blocks: loader.data_blocks,
    })
}

/// Resolve one path, descending a single directory per segment
///
/// An empty path, "/" or "." designates the root directory.
pub fn get_file(
    source: &VolumeSource,
    path: &str,
    descriptor: &PrimaryVolumeDescriptor,
) -> VolumeResult<VolumeFile> {
    let root = &descriptor.root;
    let mut records = read_directory(source, root.address, root.size)?;
    let capabilities = detect_capabilities(source, &records)?;

    let segments: Vec<&str> = split_path(path).collect();
    let Some((last, parents)) = segments.split_last() else {
        return Ok(VolumeFile::new_directory(
            String::new(),
            None,
            root.address,
            root.size,
        ));
    };

    for segment in parents {
        let found = find_entry(source, &records, &capabilities, segment, path)?;
        let FileKind::Directory { address, size } = found.kind else {
            return Err(VolumeError::NotADirectory(format!(
                "{} (in {})",
                found.display_name(),
                path
            )));
        };
        records = read_directory(source, address, size)?;
    }

    find_entry(source, &records, &capabilities, last, path)
}

fn find_entry(
    source: &VolumeSource,
    records: &[DirectoryRecord],
    capabilities: &VolumeCapabilities,
    name: &str,
    path: &str,
) -> VolumeResult<VolumeFile> {
    classify(source, records, capabilities)?
        .into_iter()
        .find(|entry| entry.matches(name))
        .ok_or_else(|| VolumeError::NotFound(path.to_string()))
}

/// List one directory level; `None` lists the root
pub fn get_directory_contents(
    source: &VolumeSource,
    descriptor: &PrimaryVolumeDescriptor,
    address: Option<u32>,
) -> VolumeResult<Vec<VolumeFile>> {
    let root = &descriptor.root;
    let root_records = read_directory(source, root.address, root.size)?;
    let capabilities = detect_capabilities(source, &root_records)?;

    let records = match address {
        None => root_records,
        Some(address) if address == root.address => root_records,
        Some(address) => {
            let size = self_record(source, address)?.size;
            read_directory(source, address, size)?
        }
    };

    classify(source, &records, &capabilities)
}

fn detect_capabilities(
    source: &VolumeSource,
    root_records: &[DirectoryRecord],
) -> VolumeResult<VolumeCapabilities> {
    let root_self = root_records
        .first()
        .filter(|record| record.is_self())
        .ok_or_else(|| VolumeError::format("Root directory has no '.' entry"))?;
    VolumeCapabilities::detect(source, root_self)
}

/// The "." record of the directory at `address`
fn self_record(source: &VolumeSource, address: u32) -> VolumeResult<DirectoryRecord> {
    let mut block = [0u8; BLOCK_SIZE];
    source.read_block(address as u64, &mut block)?;
    let record = DirectoryRecord::parse(&block)?;
    if !record.is_self() {
        return Err(VolumeError::format(format!(
            "Block {} does not start a directory",
            address
        )));
    }
    Ok(record)
}

/// Turn the records of one directory level into entries
///
/// "." and ".." are dropped, relocation placeholders skipped, child links
/// resolved to directories and consecutive records of one multi-extent file
/// merged.
pub fn classify(
    source: &VolumeSource,
    records: &[DirectoryRecord],
    capabilities: &VolumeCapabilities,
) -> VolumeResult<Vec<VolumeFile>> {
    let mut entries: Vec<VolumeFile> = Vec::new();

    for record in records {
        if record.is_self() || record.is_parent() {
            continue;
        }
        if record.flags.is_associated() {
            log::debug!("Skipping associated file record {}", record.iso_name());
            continue;
        }

        let (rr_name, child_link, placeholder) = if capabilities.rock_ridge {
            let context = parse_record(source, record, capabilities)?;
            (context.alternate_name, context.child_link, context.relocated)
        } else {
            (None, None, false)
        };
        let name = record.iso_name();

        if record.is_directory() && placeholder {
            log::debug!(
                "Skipping relocated directory placeholder {} at block {}",
                rr_name.as_deref().unwrap_or(&name),
                record.address
            );
            continue;
        }

        let entry = match child_link {
            Some(target) => {
                log::debug!(
                    "Following child link of {} to block {}",
                    rr_name.as_deref().unwrap_or(&name),
                    target
                );
                let size = self_record(source, target)?.size;
                let mut entry = VolumeFile::new_directory(name, rr_name, target, size);
                entry.relocated = true;
                entry
            }
            None if record.is_directory() => {
                VolumeFile::new_directory(name, rr_name, record.address, record.size)
            }
            None => VolumeFile::new_file(name, rr_name, Extent::new(record.address, record.size)),
        };

        match entries.last_mut() {
            Some(previous)
                if previous.is_file()
                    && entry.is_file()
                    && previous.display_name() == entry.display_name() =>
            {
                previous.merge(entry)?
            }
            _ => entries.push(entry),
        }
    }

    Ok(entries)
}

struct TreeLoader<'a> {
    source: &'a VolumeSource,
    capabilities: VolumeCapabilities,
    /// Directory addresses already expanded
    visited: HashSet<u32>,
    data_blocks: u64,
}

impl TreeLoader<'_> {
    fn load_level(
        &mut self,
        tree: &mut VolumeTree,
        parent: FileId,
        records: &[DirectoryRecord],
    ) -> VolumeResult<()> {
        let entries = classify(self.source, records, &self.capabilities)?;

        let mut directories = Vec::new();
        for entry in entries {
            match entry.kind {
                FileKind::File { ref extents, .. } => {
                    self.data_blocks += extents.iter().map(Extent::blocks).sum::<u64>();
                    tree.insert(parent, entry)?;
                }
                FileKind::Directory { address, size } => {
                    let id = tree.insert(parent, entry)?;
                    directories.push((id, address, size));
                }
            }
        }

        for (id, address, size) in directories {
            if !self.visited.insert(address) {
                return Err(VolumeError::format(format!(
                    "Directory at block {} is reached twice (relocation loop?)",
                    address
                )));
            }
            let records = read_directory(self.source, address, size)?;
            self.load_level(tree, id, &records)?;
        }
        Ok(())
    }
}
