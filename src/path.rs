use crate::dir::{self, DirEntry, NamePolicy};
use crate::disk::ReadAt;
use crate::dot::DotTable;
use crate::error::ResolveError;
use crate::geometry::Geometry;

/// Outcome of path resolution.
///
/// The root and `..` land on directories that have no backing record, so the
/// decoded entry is optional; the start cluster is always known.
#[derive(Clone, Debug)]
pub struct Resolved {
    pub start_cluster: u32,
    pub entry: Option<DirEntry>,
}

impl Resolved {
    pub fn is_directory(&self) -> bool {
        self.entry.as_ref().is_none_or(DirEntry::is_directory)
    }
}

/// Walk `path` against the directory tree. An absolute path starts at the
/// root, a relative one at `base_cluster`. `.` and empty components are
/// consumed silently; `..` consults the parent-pointer table. Only live
/// entries match by name. The working directory is never touched.
pub(crate) fn resolve<D: ReadAt + ?Sized>(
    image: &D,
    geometry: &Geometry,
    dot: &mut DotTable,
    policy: NamePolicy,
    base_cluster: u32,
    path: &str,
) -> Result<Resolved, ResolveError> {
    if path.is_empty() {
        return Err(ResolveError::NotFound(path.to_owned()));
    }

    let start = if path.starts_with('/') { 1 } else { base_cluster };
    let mut current = Resolved { start_cluster: start, entry: None };

    for part in path.split('/') {
        if part.is_empty() || part == "." {
            continue;
        }
        if !current.is_directory() {
            return Err(ResolveError::NotFound(path.to_owned()));
        }
        if part == ".." {
            let parent = dot
                .lookup(current.start_cluster)
                .ok_or_else(|| ResolveError::NotFound(path.to_owned()))?;
            current = Resolved { start_cluster: parent.max(1), entry: None };
            continue;
        }
        let entries = dir::read_directory(image, geometry, current.start_cluster, policy, dot)?;
        let hit = entries
            .into_iter()
            .find(|e| e.allocated && e.name == part)
            .ok_or_else(|| ResolveError::NotFound(path.to_owned()))?;
        current = Resolved { start_cluster: hit.start_cluster.max(1), entry: Some(hit) };
    }
    Ok(current)
}
