//! Path helpers shared by the transport commands.

use camino::{Utf8Path, Utf8PathBuf};

/// Expands a leading `~/` to the value of `HOME`.
///
/// Paths without the prefix, and all paths when `HOME` is unset, are
/// returned unchanged.
///
/// # Examples
///
/// ```
/// # use exitnode::transport::expand_tilde;
/// let home = std::env::var("HOME").expect("HOME should be set");
/// assert_eq!(expand_tilde("~/.ssh/id_ed25519"), format!("{home}/.ssh/id_ed25519"));
/// assert_eq!(expand_tilde("../exit-node/.env"), "../exit-node/.env");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Splits a comma separated artifact list into expanded local paths.
#[must_use]
pub fn split_artifacts(list: &str) -> Vec<Utf8PathBuf> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| Utf8PathBuf::from(expand_tilde(entry)))
        .collect()
}

/// Name a shipped file has in the remote home directory.
pub(crate) fn remote_name(path: &Utf8Path) -> Option<&str> {
    path.file_name()
}
