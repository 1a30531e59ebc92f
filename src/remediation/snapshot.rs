use log::debug;

use crate::providers::RepoFile;

/// Picks the files embedded in a patch prompt.
///
/// The diagnosed failing file alone when the snapshot has it, otherwise the
/// first `limit` files.
pub fn select_context(files: &[RepoFile], failing_file: Option<&str>, limit: usize) -> Vec<RepoFile> {
    if let Some(wanted) = failing_file.map(|f| f.trim().trim_start_matches("./")) {
        if let Some(found) = files.iter().find(|f| f.path == wanted) {
            debug!("Using diagnosed failing file {wanted} as patch context");
            return vec![found.clone()];
        }
        debug!("Diagnosed file {wanted} not in snapshot, using first {limit} files");
    }

    files.iter().take(limit).cloned().collect()
}

/// Paths the model may edit.
pub(super) fn target_paths(files: &[RepoFile]) -> Vec<String> {
    files.iter().map(|f| f.path.clone()).collect()
}
