use crate::core::policy::FolderSettings;
use std::path::PathBuf;
use walkdir::WalkDir;

/// Windows recycle directory; never worth inventorying even when the
/// watched root is a drive letter.
const RECYCLE_BIN: &str = "$RECYCLE.BIN";

/// Enumerate candidate video files under the configured root.
///
/// Excluded subtrees and the recycle directory are pruned without
/// descending; unreadable entries are logged and skipped so one
/// inaccessible subtree never aborts discovery.
pub fn discover_files(folder: &FolderSettings) -> Vec<PathBuf> {
    let max_depth = if folder.recursive { usize::MAX } else { 1 };
    let mut discovered = Vec::new();

    let walker = WalkDir::new(&folder.base_path)
        .follow_links(false)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|entry| {
            if !entry.file_type().is_dir() {
                return true;
            }
            if entry.file_name() == RECYCLE_BIN {
                return false;
            }
            !folder
                .excluded_directories
                .iter()
                .any(|excluded| entry.path() == excluded.as_path())
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("skipping unreadable entry during scan: {err}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if folder.allows_extension(entry.path()) {
            discovered.push(entry.path().to_path_buf());
        }
    }

    discovered
}
