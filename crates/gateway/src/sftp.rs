//! SFTP subsystem: one lazily-opened channel per session, bounded operations.
//!
//! The channel slot is a singleflight: the init critical section serializes
//! concurrent first callers, a failure leaves the slot empty so the next
//! caller retries, and a dead subsystem stream clears the slot so it
//! re-initializes on demand. Every operation takes sanitized paths and hard
//! limits so a hostile remote tree cannot wedge the gateway.

use std::{collections::HashSet, pin::Pin, sync::Arc};

use {
    russh_sftp::{
        client::{SftpSession, fs::Metadata},
        protocol::OpenFlags,
    },
    serde::Serialize,
    tokio::{
        io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
        sync::Mutex,
    },
    tracing::debug,
};

use crate::{error::GatewayError, transport::TransportControl};

// ── Limits ──────────────────────────────────────────────────────────────────

/// Directory listings stop after this many entries and set `truncated`.
pub const LIST_MAX_ENTRIES: usize = 5000;
/// Symlink chains longer than this report a loop.
pub const SYMLINK_MAX_DEPTH: usize = 12;
/// Previews never read more than this many bytes.
pub const PREVIEW_MAX_BYTES: u64 = 256 * 1024;
/// Downloads larger than this are refused.
pub const DOWNLOAD_MAX_BYTES: u64 = 250 * 1024 * 1024;
/// Uploads larger than this are refused.
pub const UPLOAD_MAX_BYTES: usize = 50 * 1024 * 1024;
/// Recursive deletes refuse trees nested deeper than this.
pub const DELETE_MAX_DEPTH: usize = 24;

// ── Result types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Other,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    pub mtime_ms: u64,
    pub mode: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirListing {
    pub entries: Vec<SftpEntry>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathStat {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    pub mtime_ms: u64,
    pub mode: u32,
    pub is_symlink: bool,
    /// First hop of the chain when `is_symlink`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewKind {
    Text,
    Binary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub kind: PreviewKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub bytes_read: u64,
    pub truncated: bool,
}

/// A streamed download. Dropping the reader cancels the remote read.
pub struct Download {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub filename: String,
    pub mime: String,
    pub size: u64,
}

// ── Path hygiene ────────────────────────────────────────────────────────────

/// Trim, refuse NUL, flip backslashes, then normalize `.`/`..` segments.
/// Paths beginning with `~` pass through untouched for the remote to expand.
pub fn sanitize_path(raw: &str) -> Result<String, GatewayError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::InvalidPath("empty path".to_string()));
    }
    if trimmed.contains('\0') {
        return Err(GatewayError::InvalidPath("path contains NUL".to_string()));
    }

    let forward = trimmed.replace('\\', "/");
    if forward.starts_with('~') {
        return Ok(forward);
    }
    Ok(normalize_segments(&forward))
}

/// Collapse `.`, `..`, and duplicate slashes without touching the remote.
fn normalize_segments(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {},
            ".." => {
                if !stack.is_empty() && *stack.last().unwrap_or(&"..") != ".." {
                    stack.pop();
                } else if !absolute {
                    stack.push("..");
                }
                // `..` above an absolute root is discarded.
            },
            other => stack.push(other),
        }
    }

    let joined = stack.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Directory containing `path`.
fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => ".".to_string(),
    }
}

/// Join a possibly-relative `target` against `base`, normalized.
fn join_remote(base: &str, target: &str) -> String {
    if target.starts_with('/') || target.starts_with('~') {
        return target.to_string();
    }
    normalize_segments(&format!("{base}/{target}"))
}

/// Final path component.
#[must_use]
pub fn basename(path: &str) -> String {
    path.rsplit('/')
        .find(|part| !part.is_empty())
        .unwrap_or(path)
        .to_string()
}

// ── Preview helpers ─────────────────────────────────────────────────────────

/// How many bytes a preview reads and whether content remains past it.
fn preview_window(size: u64, offset: u64, limit: u64) -> (u64, bool) {
    let capped = limit.min(PREVIEW_MAX_BYTES);
    let to_read = capped.min(size.saturating_sub(offset));
    (to_read, offset + to_read < size)
}

/// Text heuristic: no NUL, and at least 85% of bytes are printable ASCII,
/// common whitespace, ESC, or high bytes (UTF-8 sequences).
fn looks_like_text(bytes: &[u8]) -> bool {
    if bytes.contains(&0) {
        return false;
    }
    if bytes.is_empty() {
        return true;
    }
    let friendly = bytes
        .iter()
        .filter(|b| matches!(**b, 0x09 | 0x0A | 0x0D | 0x1B) || **b >= 0x20)
        .count();
    friendly * 100 >= bytes.len() * 85
}

fn kind_of(metadata: &Metadata) -> EntryKind {
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        EntryKind::Dir
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

fn size_of(metadata: &Metadata) -> u64 {
    metadata.size.unwrap_or(0)
}

fn mtime_ms_of(metadata: &Metadata) -> u64 {
    u64::from(metadata.mtime.unwrap_or(0)) * 1000
}

fn mode_of(metadata: &Metadata) -> u32 {
    metadata.permissions.unwrap_or(0)
}

/// Whether an error means the subsystem stream itself is unusable, as
/// opposed to a per-path status the server reported.
fn is_subsystem_dead(error: &russh_sftp::client::error::Error) -> bool {
    !matches!(error, russh_sftp::client::error::Error::Status(_))
}

// ── Service ─────────────────────────────────────────────────────────────────

/// The per-session SFTP facade.
pub struct SftpService {
    transport: TransportControl,
    slot: Mutex<Option<Arc<SftpSession>>>,
}

impl SftpService {
    #[must_use]
    pub fn new(transport: TransportControl) -> Self {
        Self {
            transport,
            slot: Mutex::new(None),
        }
    }

    /// Get or initialize the subsystem. Holding the slot lock across the
    /// init is the singleflight: concurrent callers queue here and observe
    /// the one outcome; a failure leaves the slot empty for the next caller.
    async fn session(&self) -> Result<Arc<SftpSession>, GatewayError> {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(Arc::clone(session));
        }

        let channel = self.transport.open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let session = Arc::new(SftpSession::new(channel.into_stream()).await?);
        *slot = Some(Arc::clone(&session));
        debug!("sftp subsystem initialized");
        Ok(session)
    }

    /// Forget the current subsystem so the next call re-initializes.
    pub async fn clear(&self) {
        *self.slot.lock().await = None;
    }

    /// Tear down at session close.
    pub async fn shutdown(&self) {
        if let Some(session) = self.slot.lock().await.take() {
            let _ = session.close().await;
        }
    }

    /// Clear the slot when an operation died with the stream.
    async fn fail<T>(&self, error: GatewayError) -> Result<T, GatewayError> {
        if let GatewayError::Sftp(ref e) = error
            && is_subsystem_dead(e)
        {
            debug!("sftp subsystem stream lost, clearing handle");
            self.clear().await;
        }
        Err(error)
    }

    /// Follow a symlink chain with cycle detection.
    ///
    /// Returns the final path and its (non-symlink) metadata.
    async fn resolve_chain(
        &self,
        sftp: &SftpSession,
        start: &str,
    ) -> Result<(String, Metadata), GatewayError> {
        let mut current = start.to_string();
        let mut visited: HashSet<String> = HashSet::new();

        for _ in 0..=SYMLINK_MAX_DEPTH {
            if !visited.insert(current.clone()) {
                return Err(GatewayError::SymlinkLoop);
            }
            let metadata = sftp.symlink_metadata(current.clone()).await?;
            if !metadata.file_type().is_symlink() {
                return Ok((current, metadata));
            }
            let target = sftp.read_link(current.clone()).await?;
            current = join_remote(&parent_dir(&current), &target);
        }
        Err(GatewayError::SymlinkLoop)
    }

    // ── Operations ──────────────────────────────────────────────────────────

    /// List a directory (symlinks on the path resolved), capped at
    /// [`LIST_MAX_ENTRIES`].
    pub async fn list_directory(&self, path: &str) -> Result<DirListing, GatewayError> {
        let path = sanitize_path(path)?;
        let sftp = self.session().await?;

        let result = async {
            let (resolved, metadata) = self.resolve_chain(&sftp, &path).await?;
            if !metadata.file_type().is_dir() {
                return Err(GatewayError::NotADirectory);
            }

            let mut entries = Vec::new();
            let mut truncated = false;
            for entry in sftp.read_dir(resolved.clone()).await? {
                if entries.len() >= LIST_MAX_ENTRIES {
                    truncated = true;
                    break;
                }
                let name = entry.file_name();
                let metadata = entry.metadata();
                entries.push(SftpEntry {
                    path: join_remote(&resolved, &name),
                    kind: kind_of(&metadata),
                    size: size_of(&metadata),
                    mtime_ms: mtime_ms_of(&metadata),
                    mode: mode_of(&metadata),
                    name,
                });
            }
            Ok(DirListing { entries, truncated })
        }
        .await;

        match result {
            Ok(listing) => Ok(listing),
            Err(e) => self.fail(e).await,
        }
    }

    /// `lstat` plus symlink resolution: symlinks report the resolved kind
    /// and size with `is_symlink = true` and their first-hop target.
    pub async fn stat_path(&self, path: &str) -> Result<PathStat, GatewayError> {
        let path = sanitize_path(path)?;
        let sftp = self.session().await?;

        let result = async {
            let metadata = sftp.symlink_metadata(path.clone()).await?;
            if !metadata.file_type().is_symlink() {
                return Ok(PathStat {
                    name: basename(&path),
                    kind: kind_of(&metadata),
                    size: size_of(&metadata),
                    mtime_ms: mtime_ms_of(&metadata),
                    mode: mode_of(&metadata),
                    is_symlink: false,
                    target: None,
                    path,
                });
            }

            let first_hop = sftp.read_link(path.clone()).await?;
            let (_, resolved_metadata) = self.resolve_chain(&sftp, &path).await?;
            Ok(PathStat {
                name: basename(&path),
                kind: kind_of(&resolved_metadata),
                size: size_of(&resolved_metadata),
                mtime_ms: mtime_ms_of(&resolved_metadata),
                mode: mode_of(&resolved_metadata),
                is_symlink: true,
                target: Some(first_hop),
                path,
            })
        }
        .await;

        match result {
            Ok(stat) => Ok(stat),
            Err(e) => self.fail(e).await,
        }
    }

    /// Read a bounded window of a file and classify it as text or binary.
    pub async fn read_preview(
        &self,
        path: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Preview, GatewayError> {
        let path = sanitize_path(path)?;
        let sftp = self.session().await?;

        let result = async {
            let metadata = sftp.metadata(path.clone()).await?;
            if !metadata.file_type().is_file() {
                return Err(GatewayError::NotAFile);
            }
            let size = size_of(&metadata);
            let (to_read, truncated) = preview_window(size, offset, limit);

            let mut file = sftp.open_with_flags(path.clone(), OpenFlags::READ).await?;
            file.seek(std::io::SeekFrom::Start(offset)).await?;

            let mut buf = vec![0u8; to_read as usize];
            let mut filled = 0;
            while filled < buf.len() {
                let n = file.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf.truncate(filled);

            if looks_like_text(&buf) {
                Ok(Preview {
                    kind: PreviewKind::Text,
                    encoding: Some("utf-8".to_string()),
                    data: Some(String::from_utf8_lossy(&buf).into_owned()),
                    bytes_read: filled as u64,
                    truncated,
                })
            } else {
                Ok(Preview {
                    kind: PreviewKind::Binary,
                    encoding: None,
                    data: None,
                    bytes_read: filled as u64,
                    truncated,
                })
            }
        }
        .await;

        match result {
            Ok(preview) => Ok(preview),
            Err(e) => self.fail(e).await,
        }
    }

    /// Open a streaming download. Dropping the returned reader destroys the
    /// remote read stream, which is how cancellation is expressed.
    pub async fn create_download(&self, path: &str) -> Result<Download, GatewayError> {
        let path = sanitize_path(path)?;
        let sftp = self.session().await?;

        let result = async {
            let (resolved, metadata) = self.resolve_chain(&sftp, &path).await?;
            if !metadata.file_type().is_file() {
                return Err(GatewayError::NotAFile);
            }
            let size = size_of(&metadata);
            if size > DOWNLOAD_MAX_BYTES {
                return Err(GatewayError::DownloadTooLarge);
            }

            let file = sftp
                .open_with_flags(resolved.clone(), OpenFlags::READ)
                .await?;
            let filename = basename(&resolved);
            let mime = mime_guess::from_path(&filename)
                .first_raw()
                .unwrap_or("application/octet-stream")
                .to_string();

            Ok(Download {
                reader: Box::new(file) as Box<dyn AsyncRead + Send + Unpin>,
                filename,
                mime,
                size,
            })
        }
        .await;

        match result {
            Ok(download) => Ok(download),
            Err(e) => self.fail(e).await,
        }
    }

    /// Write a whole file (create or truncate).
    pub async fn upload_file(&self, path: &str, bytes: &[u8]) -> Result<(), GatewayError> {
        if bytes.len() > UPLOAD_MAX_BYTES {
            return Err(GatewayError::UploadTooLarge);
        }
        let path = sanitize_path(path)?;
        let sftp = self.session().await?;

        let result = async {
            let mut file = sftp
                .open_with_flags(
                    path.clone(),
                    OpenFlags::CREATE | OpenFlags::WRITE | OpenFlags::TRUNCATE,
                )
                .await?;
            file.write_all(bytes).await?;
            file.shutdown().await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e).await,
        }
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), GatewayError> {
        let path = sanitize_path(path)?;
        let sftp = self.session().await?;
        match sftp.create_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e.into()).await,
        }
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), GatewayError> {
        let from = sanitize_path(from)?;
        let to = sanitize_path(to)?;
        let sftp = self.session().await?;
        match sftp.rename(from, to).await {
            Ok(()) => Ok(()),
            Err(e) => self.fail(e.into()).await,
        }
    }

    /// Delete a path. Directories recurse only when `recursive`, with a
    /// depth cap; a failure mid-recursion names the path that failed and
    /// leaves the partial deletion in place.
    pub async fn delete_path(&self, path: &str, recursive: bool) -> Result<(), GatewayError> {
        let path = sanitize_path(path)?;
        let sftp = self.session().await?;

        let result = async {
            let metadata = sftp.symlink_metadata(path.clone()).await?;
            if !metadata.file_type().is_dir() {
                // Files and symlinks unlink directly (never follow the link).
                return sftp.remove_file(path.clone()).await.map_err(|e| {
                    GatewayError::DeleteFailed {
                        path: path.clone(),
                        message: e.to_string(),
                    }
                });
            }

            if !recursive {
                // Fails remotely when non-empty.
                return sftp.remove_dir(path.clone()).await.map_err(|e| {
                    GatewayError::DeleteFailed {
                        path: path.clone(),
                        message: e.to_string(),
                    }
                });
            }

            delete_tree(&sftp, path, 0).await
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(e @ (GatewayError::DeleteFailed { .. } | GatewayError::DeleteDepthExceeded)) => {
                Err(e)
            },
            Err(e) => self.fail(e).await,
        }
    }
}

/// Depth-first recursive delete. Boxed because async recursion needs an
/// explicit pinned future type.
fn delete_tree<'a>(
    sftp: &'a SftpSession,
    path: String,
    depth: usize,
) -> Pin<Box<dyn Future<Output = Result<(), GatewayError>> + Send + 'a>> {
    Box::pin(async move {
        if depth >= DELETE_MAX_DEPTH {
            return Err(GatewayError::DeleteDepthExceeded);
        }

        let entries: Vec<(String, bool)> = sftp
            .read_dir(path.clone())
            .await
            .map_err(|e| GatewayError::DeleteFailed {
                path: path.clone(),
                message: e.to_string(),
            })?
            .map(|entry| {
                let child = join_remote(&path, &entry.file_name());
                let is_dir = entry.metadata().file_type().is_dir();
                (child, is_dir)
            })
            .collect();

        for (child, is_dir) in entries {
            if is_dir {
                delete_tree(sftp, child, depth + 1).await?;
            } else {
                sftp.remove_file(child.clone())
                    .await
                    .map_err(|e| GatewayError::DeleteFailed {
                        path: child,
                        message: e.to_string(),
                    })?;
            }
        }

        sftp.remove_dir(path.clone())
            .await
            .map_err(|e| GatewayError::DeleteFailed {
                path,
                message: e.to_string(),
            })
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_empty_and_nul() {
        assert!(matches!(
            sanitize_path("   "),
            Err(GatewayError::InvalidPath(_))
        ));
        assert!(matches!(
            sanitize_path("/tmp/\0evil"),
            Err(GatewayError::InvalidPath(_))
        ));
    }

    #[test]
    fn sanitize_normalizes() {
        assert_eq!(sanitize_path(" /var//log/./app ").unwrap(), "/var/log/app");
        assert_eq!(sanitize_path("/a/b/../c").unwrap(), "/a/c");
        assert_eq!(sanitize_path("/../..").unwrap(), "/");
        assert_eq!(sanitize_path("C:\\Users\\x").unwrap(), "C:/Users/x");
    }

    #[test]
    fn tilde_paths_pass_through() {
        assert_eq!(sanitize_path("~/logs/../x").unwrap(), "~/logs/../x");
        assert_eq!(sanitize_path("~").unwrap(), "~");
    }

    #[test]
    fn join_and_parent_and_basename() {
        assert_eq!(parent_dir("/a/b/c"), "/a/b");
        assert_eq!(parent_dir("/a"), "/");
        assert_eq!(parent_dir("rel"), ".");

        assert_eq!(join_remote("/a/b", "c"), "/a/b/c");
        assert_eq!(join_remote("/a/b", "../c"), "/a/c");
        assert_eq!(join_remote("/a/b", "/abs"), "/abs");

        assert_eq!(basename("/a/b/file.txt"), "file.txt");
        assert_eq!(basename("/a/b/"), "b");
        assert_eq!(basename("plain"), "plain");
    }

    #[test]
    fn preview_window_caps_and_flags() {
        // 300 KiB file, greedy limit: capped to 256 KiB with more remaining.
        assert_eq!(preview_window(307_200, 0, 1_000_000), (262_144, true));
        // Next window reads the tail and reports the end.
        assert_eq!(preview_window(307_200, 262_144, 65_536), (45_056, false));
        // A larger file keeps truncating.
        assert_eq!(preview_window(400_000, 262_144, 65_536), (65_536, true));
        // Offset past the end reads nothing.
        assert_eq!(preview_window(100, 200, 50), (0, false));
    }

    #[test]
    fn text_heuristic() {
        assert!(looks_like_text(b"plain ascii with\nnewlines\tand tabs"));
        assert!(looks_like_text("utf-8 snowman \u{2603}".as_bytes()));
        assert!(looks_like_text(b"\x1b[31mansi colors\x1b[0m"));
        assert!(looks_like_text(b""));

        assert!(!looks_like_text(b"has a \x00 nul"));
        // Control-heavy content fails the printable ratio without any NUL.
        let mostly_control: Vec<u8> = (1u8..32).chain(1u8..32).collect();
        assert!(!looks_like_text(&mostly_control));
    }

    #[test]
    fn mime_guessing_falls_back() {
        assert_eq!(
            mime_guess::from_path("notes.txt").first_raw().unwrap_or("application/octet-stream"),
            "text/plain"
        );
        assert_eq!(
            mime_guess::from_path("blob.weirdext")
                .first_raw()
                .unwrap_or("application/octet-stream"),
            "application/octet-stream"
        );
    }
}
