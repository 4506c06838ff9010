use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::RawStream;

/// Unix domain socket listening endpoint.
///
/// The socket file is created with mode 0600 and removed on drop, unless
/// the path was replaced by something else in the meantime.
pub struct UnixServer {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
    closed: AtomicBool,
    accepted: AtomicU64,
}

impl UnixServer {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on a filesystem-path Unix domain socket.
    ///
    /// A stale socket at `path` is removed first; any other kind of file
    /// makes the bind fail.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        let addr = path.display().to_string();
        let bind_err = |source: std::io::Error| TransportError::Bind {
            addr: addr.clone(),
            source,
        };

        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            listener,
            created_inode: (created.dev(), created.ino()),
            path,
            closed: AtomicBool::new(false),
            accepted: AtomicU64::new(0),
        })
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Endpoint for UnixServer {
    fn describe(&self) -> String {
        format!("unix-server:{}", self.path.display())
    }

    fn accept(&self) -> Result<Option<(String, RawStream)>> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let n = self.accepted.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(path = ?self.path, n, "accepted unix connection");
        Ok(Some((
            format!("unix:{}#{n}", self.path.display()),
            RawStream::from_unix(stream)?,
        )))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = UnixStream::connect(&self.path);
    }
}

impl Drop for UnixServer {
    fn drop(&mut self) {
        let Ok(metadata) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        if metadata.file_type().is_socket()
            && (metadata.dev(), metadata.ino()) == self.created_inode
        {
            debug!(path = ?self.path, "cleaning up socket file");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
        }
    }
}

impl std::fmt::Debug for UnixServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixServer").field("path", &self.path).finish()
    }
}

/// Unix domain socket client endpoint: connects once.
#[derive(Debug)]
pub struct UnixClient {
    path: PathBuf,
    used: AtomicBool,
}

impl UnixClient {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            used: AtomicBool::new(false),
        }
    }
}

impl Endpoint for UnixClient {
    fn describe(&self) -> String {
        format!("unix-client:{}", self.path.display())
    }

    fn accept(&self) -> Result<Option<(String, RawStream)>> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        let stream = UnixStream::connect(&self.path).map_err(|e| TransportError::Connect {
            addr: self.path.display().to_string(),
            source: e,
        })?;
        debug!(path = ?self.path, "connected to unix domain socket");
        Ok(Some((
            format!("unix:{}", self.path.display()),
            RawStream::from_unix(stream)?,
        )))
    }

    fn close(&self) {
        self.used.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mavwire-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_bind_accept_connect() {
        let dir = temp_dir("uds");
        let sock_path = dir.join("test.sock");

        let server = UnixServer::bind(&sock_path).unwrap();
        assert!(sock_path.exists());

        let client = UnixClient::new(&sock_path);
        let handle = std::thread::spawn(move || {
            let (_, stream) = client.accept().unwrap().unwrap();
            let (_, mut writer, _) = stream.into_parts();
            writer.write_all(b"hello").unwrap();
        });

        let (label, stream) = server.accept().unwrap().unwrap();
        assert!(label.ends_with("#1"));
        let (mut reader, _, _) = stream.into_parts();
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();

        drop(server);
        assert!(
            !sock_path.exists(),
            "socket file should be cleaned up on drop"
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = UnixServer::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn test_bind_default_permissions_hardened() {
        let dir = temp_dir("perms");
        let sock_path = dir.join("perm.sock");

        let server = UnixServer::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(server);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bind_rejects_existing_non_socket_file() {
        let dir = temp_dir("bind-file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = UnixServer::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_close_releases_pending_accept() {
        let dir = temp_dir("uds-close");
        let sock_path = dir.join("close.sock");
        let server = std::sync::Arc::new(UnixServer::bind(&sock_path).unwrap());

        let waiting = {
            let server = std::sync::Arc::clone(&server);
            std::thread::spawn(move || server.accept().unwrap().is_none())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        server.close();
        assert!(waiting.join().unwrap());

        drop(server);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
