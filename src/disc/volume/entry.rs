//! Volume file tree
//!
//! Files and directories live in an arena ([`VolumeTree`]) and refer to each
//! other through [`FileId`] handles: a node owns its children list, the
//! parent link is a plain index.

use crate::disc::error::{VolumeError, VolumeResult};

use super::record::blocks_for;

/// One contiguous on-disk run holding all or part of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    /// First block of the run
    pub block: u32,
    /// Length of the run in bytes
    pub size: u32,
}

impl Extent {
    pub fn new(block: u32, size: u32) -> Self {
        Self { block, size }
    }

    /// Blocks covered by this run
    pub fn blocks(&self) -> u64 {
        blocks_for(self.size as u64)
    }
}

/// What a volume entry is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// Regular file, extents in on-disk discovery order
    File { extents: Vec<Extent>, size: u64 },
    /// Directory and the address of its extent
    Directory { address: u32, size: u32 },
}

/// A file or directory of the volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeFile {
    /// ISO 9660 name, version suffix removed
    pub name: String,
    /// Rock Ridge name, when the volume has one for this entry
    pub rr_name: Option<String>,
    pub kind: FileKind,
    /// Reached through a Rock Ridge child link
    pub relocated: bool,
}

impl VolumeFile {
    pub fn new_file(name: String, rr_name: Option<String>, extent: Extent) -> Self {
        Self {
            name,
            rr_name,
            kind: FileKind::File {
                extents: vec![extent],
                size: extent.size as u64,
            },
            relocated: false,
        }
    }

    pub fn new_directory(name: String, rr_name: Option<String>, address: u32, size: u32) -> Self {
        Self {
            name,
            rr_name,
            kind: FileKind::Directory { address, size },
            relocated: false,
        }
    }

    /// Name to present: the Rock Ridge name when there is one
    pub fn display_name(&self) -> &str {
        self.rr_name.as_deref().unwrap_or(&self.name)
    }

    pub fn has_rock_ridge(&self) -> bool {
        self.rr_name.is_some()
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, FileKind::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        !self.is_directory()
    }

    /// Extents of a file; empty for directories
    pub fn extents(&self) -> &[Extent] {
        match &self.kind {
            FileKind::File { extents, .. } => extents,
            FileKind::Directory { .. } => &[],
        }
    }

    /// Byte size of a file; 0 for directories
    pub fn size(&self) -> u64 {
        match &self.kind {
            FileKind::File { size, .. } => *size,
            FileKind::Directory { .. } => 0,
        }
    }

    /// Directory extent address
    pub fn address(&self) -> Option<u32> {
        match &self.kind {
            FileKind::Directory { address, .. } => Some(*address),
            FileKind::File { .. } => None,
        }
    }

    /// Fold the next record of the same multi-extent file into this one:
    /// extents are appended in order, sizes summed, our metadata kept
    pub fn merge(&mut self, other: VolumeFile) -> VolumeResult<()> {
        if self.is_directory() || other.is_directory() {
            return Err(VolumeError::IsDirectory(format!(
                "cannot merge directory records for {}",
                self.display_name()
            )));
        }

        log::debug!(
            "Merging {} more extent(s) into {} ({} + {} bytes)",
            other.extents().len(),
            self.display_name(),
            self.size(),
            other.size()
        );
        if let (FileKind::File { extents, size }, FileKind::File { extents: more, size: extra }) =
            (&mut self.kind, other.kind)
        {
            extents.extend(more);
            *size += extra;
        }
        Ok(())
    }

    /// Whether `name` designates this entry
    pub fn matches(&self, name: &str) -> bool {
        match &self.rr_name {
            Some(rr_name) => rr_name == name,
            None => self.name.eq_ignore_ascii_case(name),
        }
    }
}

/// Handle of a node in a [`VolumeTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(usize);

#[derive(Debug, Clone)]
struct Node {
    file: VolumeFile,
    parent: Option<FileId>,
    children: Vec<FileId>,
}

/// In-memory file tree of a volume
#[derive(Debug, Clone)]
pub struct VolumeTree {
    nodes: Vec<Option<Node>>,
    root: FileId,
}

impl VolumeTree {
    /// Tree holding only `root`
    pub fn new(root: VolumeFile) -> Self {
        Self {
            nodes: vec![Some(Node {
                file: root,
                parent: None,
                children: Vec::new(),
            })],
            root: FileId(0),
        }
    }

    pub fn root(&self) -> FileId {
        self.root
    }

    fn node(&self, id: FileId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn get(&self, id: FileId) -> Option<&VolumeFile> {
        self.node(id).map(|node| &node.file)
    }

    /// Add `file` as the last child of `parent`
    pub fn insert(&mut self, parent: FileId, file: VolumeFile) -> VolumeResult<FileId> {
        let id = FileId(self.nodes.len());
        let parent_node = self
            .nodes
            .get_mut(parent.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| VolumeError::NotFound(format!("parent node {}", parent.0)))?;
        if !parent_node.file.is_directory() {
            return Err(VolumeError::NotADirectory(parent_node.file.display_name().to_string()));
        }
        parent_node.children.push(id);

        self.nodes.push(Some(Node {
            file,
            parent: Some(parent),
            children: Vec::new(),
        }));
        Ok(id)
    }

    pub fn children(&self, id: FileId) -> &[FileId] {
        self.node(id).map(|node| node.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: FileId) -> Option<FileId> {
        self.node(id).and_then(|node| node.parent)
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute path of a node, "/" for the root
    pub fn path_of(&self, id: FileId) -> Option<String> {
        let mut names = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            names.push(self.get(current)?.display_name());
            current = parent;
        }
        if current != self.root {
            return None;
        }

        names.reverse();
        Some(format!("/{}", names.join("/")))
    }

    /// Resolve an absolute path ("/a/b", "./a/b", "a/b/")
    pub fn lookup(&self, path: &str) -> Option<FileId> {
        let mut current = self.root;
        for segment in split_path(path) {
            current = *self
                .children(current)
                .iter()
                .find(|&&child| self.get(child).is_some_and(|f| f.matches(segment)))?;
        }
        Some(current)
    }

    /// Total byte size: file size, or the sum over a directory's subtree
    pub fn size_of(&self, id: FileId) -> u64 {
        match self.get(id) {
            Some(file) if file.is_file() => file.size(),
            Some(_) => self
                .children(id)
                .iter()
                .map(|&child| self.size_of(child))
                .sum(),
            None => 0,
        }
    }

    /// Remove the subtree rooted at `id` and return it as a tree of its own
    ///
    /// Dropping the returned tree frees the subtree. The root cannot be
    /// detached.
    pub fn detach(&mut self, id: FileId) -> Option<VolumeTree> {
        let parent = self.parent(id)?;
        if let Some(Some(parent_node)) = self.nodes.get_mut(parent.0) {
            parent_node.children.retain(|&child| child != id);
        }

        let top = self.nodes.get_mut(id.0)?.take()?;
        let mut detached = VolumeTree::new(top.file);
        let mut stack: Vec<(FileId, FileId)> = top
            .children
            .iter()
            .rev()
            .map(|&child| (child, detached.root()))
            .collect();

        while let Some((old, parent)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(old.0).and_then(Option::take) else {
                continue;
            };
            let new_id = detached.insert(parent, node.file).ok()?;
            stack.extend(node.children.iter().rev().map(|&child| (child, new_id)));
        }
        Some(detached)
    }

    /// Depth-first iterator over regular files
    pub fn files(&self) -> Files<'_> {
        Files {
            tree: self,
            stack: vec![self.root],
        }
    }
}

/// Iterator returned by [`VolumeTree::files`]
pub struct Files<'a> {
    tree: &'a VolumeTree,
    stack: Vec<FileId>,
}

impl<'a> Iterator for Files<'a> {
    type Item = (FileId, &'a VolumeFile);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            let Some(file) = self.tree.get(id) else {
                continue;
            };
            if file.is_file() {
                return Some((id, file));
            }
            self.stack
                .extend(self.tree.children(id).iter().rev().copied());
        }
        None
    }
}

/// Path segments, ignoring a leading "/" or "./" and empty segments
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    let path = path.strip_prefix("./").unwrap_or(path);
    path.split('/').filter(|s| !s.is_empty() && *s != ".")
}
