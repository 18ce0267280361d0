//! SFTP fetches from the seedbox.
//!
//! ssh2 is blocking; everything here runs on the blocking pool via
//! [`Fetcher::get`](super::Fetcher::get).

use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::FetchProgress;
use crate::config::SeedboxConfig;
use crate::error::TransferError;
use crate::utils::sanitize_secret;
use crate::{Error, Result};

/// Entry returned by [`RemoteSession::read_dir`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Absolute remote path
    pub path: String,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// One authenticated connection to a remote filesystem
pub trait RemoteSession: Send {
    /// Whether `path` is a directory
    fn is_dir(&mut self, path: &str) -> Result<bool>;

    /// Immediate children of a directory
    fn read_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Copy a remote file to `local`, returning the bytes written
    fn download(&mut self, path: &str, local: &Path) -> Result<u64>;
}

/// Factory for [`RemoteSession`]s
pub trait RemoteFilesystem: Send + Sync {
    /// Open and authenticate a session
    fn connect(&self) -> Result<Box<dyn RemoteSession>>;
}

/// Fetch `remote_root` into `local_root`
///
/// A file lands at `local_root` itself. A directory is walked recursively and every
/// file is written below `local_root` at the same relative path. The first failing
/// file aborts the batch.
pub fn fetch_tree(
    fs: &dyn RemoteFilesystem,
    remote_root: &str,
    local_root: &Path,
    progress: &(dyn Fn(FetchProgress) + Send + Sync),
) -> Result<()> {
    let mut session = fs.connect()?;

    if !session.is_dir(remote_root)? {
        tracing::info!(path = remote_root, "Fetching remote file");
        session.download(remote_root, local_root)?;
        progress(FetchProgress::Files { done: 1, total: 1 });
        return Ok(());
    }

    let files = walk(session.as_mut(), remote_root)?;
    let total = files.len();
    tracing::info!(path = remote_root, files = total, "Fetching remote directory");
    std::fs::create_dir_all(local_root)?;

    for (done, remote_path) in files.iter().enumerate() {
        let relative = remote_path
            .strip_prefix(remote_root)
            .unwrap_or(remote_path)
            .trim_start_matches('/');
        let local_path = local_root.join(relative);

        let result = local_path
            .parent()
            .map(std::fs::create_dir_all)
            .transpose()
            .map_err(Error::from)
            .and_then(|_| session.download(remote_path, &local_path));

        if let Err(e) = result {
            tracing::error!(
                path = %remote_path,
                completed = done,
                total,
                error = %e,
                "Remote file failed, aborting batch"
            );
            return Err(TransferError::BatchFailed {
                path: remote_path.clone(),
                completed: done,
                total,
                reason: e.to_string(),
            }
            .into());
        }

        progress(FetchProgress::Files {
            done: done + 1,
            total,
        });
    }

    Ok(())
}

/// Every file below `root`, sorted by path
fn walk(session: &mut dyn RemoteSession, root: &str) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_string()];
    while let Some(dir) = pending.pop() {
        for entry in session.read_dir(&dir)? {
            if entry.is_dir {
                pending.push(entry.path);
            } else {
                files.push(entry.path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Password-authenticated SFTP access to the seedbox
#[derive(Clone, Debug)]
pub struct SftpFilesystem {
    host: String,
    port: u16,
    username: String,
    password: String,
    timeout: Duration,
}

impl SftpFilesystem {
    /// Build from seedbox configuration; `None` when no SFTP host can be determined
    pub fn from_config(config: &SeedboxConfig) -> Option<Self> {
        Some(Self {
            host: config.resolved_sftp_host()?,
            port: config.sftp_port,
            username: sanitize_secret(&config.resolved_sftp_username()),
            password: sanitize_secret(&config.resolved_sftp_password()),
            timeout: config.timeout,
        })
    }
}

impl RemoteFilesystem for SftpFilesystem {
    fn connect(&self) -> Result<Box<dyn RemoteSession>> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))?;
        tcp.set_read_timeout(Some(self.timeout))?;

        let mut session = ssh2::Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(self.timeout.as_millis().min(u32::MAX as u128) as u32);
        session.handshake()?;

        if session
            .userauth_password(&self.username, &self.password)
            .is_err()
            || !session.authenticated()
        {
            return Err(Error::RemoteAuth {
                host: self.host.clone(),
                user: self.username.clone(),
            });
        }

        let sftp = session.sftp()?;
        Ok(Box::new(SftpSession {
            _session: session,
            sftp,
        }))
    }
}

struct SftpSession {
    // keeps the transport alive for the channel
    _session: ssh2::Session,
    sftp: ssh2::Sftp,
}

impl RemoteSession for SftpSession {
    fn is_dir(&mut self, path: &str) -> Result<bool> {
        Ok(self.sftp.stat(Path::new(path))?.is_dir())
    }

    fn read_dir(&mut self, path: &str) -> Result<Vec<RemoteEntry>> {
        Ok(self
            .sftp
            .readdir(Path::new(path))?
            .into_iter()
            .filter_map(|(child, stat)| {
                let name = child.file_name()?.to_str()?;
                if name == "." || name == ".." {
                    return None;
                }
                Some(RemoteEntry {
                    path: path_to_string(&child),
                    is_dir: stat.is_dir(),
                })
            })
            .collect())
    }

    fn download(&mut self, path: &str, local: &Path) -> Result<u64> {
        let mut remote = self.sftp.open(Path::new(path))?;
        let mut file = std::fs::File::create(local)?;
        Ok(std::io::copy(&mut remote, &mut file)?)
    }
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
