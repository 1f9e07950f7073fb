//! Git output parsing helpers.

use std::process::Output;

/// Object type of a `git ls-tree` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEntryKind {
    Tree,
    Blob,
    /// A submodule commit; listed as a directory.
    Commit,
}

/// One entry of `git ls-tree -r -t -z` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub kind: TreeEntryKind,
    pub path: String,
}

/// Formats a git error with both stdout and stderr for better debugging.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Parses NUL-separated `git ls-tree -r -t -z` output.
///
/// Each record is `<mode> SP <type> SP <object> TAB <path>`. Records with an
/// unknown type or a missing tab are skipped.
pub fn parse_ls_tree(output: &str) -> Vec<TreeEntry> {
    output
        .split('\0')
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let (meta, path) = record.split_once('\t')?;
            let kind = match meta.split_whitespace().nth(1)? {
                "tree" => TreeEntryKind::Tree,
                "blob" => TreeEntryKind::Blob,
                "commit" => TreeEntryKind::Commit,
                _ => return None,
            };
            Some(TreeEntry {
                kind,
                path: path.to_string(),
            })
        })
        .collect()
}
