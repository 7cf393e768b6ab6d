//! SSH client: command channel plus SFTP file channel on one connection.

use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ssh2::{ErrorCode, ExtendedData, FileStat, Session, Sftp};

use nginxops_core::config::{AuthMethod, ServerTarget};

use crate::error::{io_err, TransportError};

const KEEPALIVE_INTERVAL_SECS: u32 = 30;

/// Combined output and exit status of a remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub output: String,
    pub exit_status: i32,
}

/// One live SSH connection with an SFTP sub-channel.
///
/// A background heartbeat sends a keep-alive every 30 seconds; when the
/// heartbeat fails the client is marked dead and the pool discards it on the
/// next validation.
pub struct SshClient {
    session: Arc<Session>,
    sftp: Sftp,
    alive: Arc<AtomicBool>,
}

impl SshClient {
    /// Dial and authenticate against a target. Host-key verification is
    /// intentionally skipped, a known limitation of the deployment model.
    pub fn connect(target: &ServerTarget) -> Result<Self, TransportError> {
        let addr = format!("{}:{}", target.host, target.port);
        let tcp = TcpStream::connect(&addr).map_err(|e| io_err(&addr, e))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        match target.auth.method {
            AuthMethod::Password => {
                if target.auth.password.is_empty() {
                    return Err(TransportError::Auth(
                        "password authentication method requires a password".to_string(),
                    ));
                }
                session.userauth_password(&target.user, &target.auth.password)?;
            }
            AuthMethod::Key => {
                let key_path = target.auth.key_path.as_deref().ok_or_else(|| {
                    TransportError::Auth(
                        "key authentication method requires a key_path".to_string(),
                    )
                })?;
                session.userauth_pubkey_file(&target.user, None, key_path, None)?;
            }
        }

        session.set_keepalive(true, KEEPALIVE_INTERVAL_SECS);
        let sftp = session.sftp()?;

        let session = Arc::new(session);
        let alive = Arc::new(AtomicBool::new(true));
        spawn_heartbeat(
            Arc::downgrade(&session),
            alive.clone(),
            target.host.clone(),
        );

        Ok(Self {
            session,
            sftp,
            alive,
        })
    }

    /// Whether the heartbeat still considers this connection live.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Cheap liveness probe used by the pool before handing out an idle
    /// connection.
    pub fn validate(&self) -> bool {
        self.is_alive() && self.sftp.realpath(Path::new(".")).is_ok()
    }

    /// Close the connection. Errors during teardown are ignored.
    pub fn close(self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.session.disconnect(None, "closing", None);
    }

    /// Run a command on the remote host, returning combined stdout+stderr
    /// and the exit status. A nonzero exit status is not an error here;
    /// callers that need one use [`SshClient::run_checked`].
    pub fn run_command(&self, cmd: &str) -> Result<CommandOutput, TransportError> {
        let mut channel = self.session.channel_session()?;
        channel.handle_extended_data(ExtendedData::Merge)?;
        channel.exec(cmd)?;

        let mut raw = Vec::new();
        channel
            .read_to_end(&mut raw)
            .map_err(|e| io_err(cmd, e))?;
        channel.wait_close()?;
        let exit_status = channel.exit_status()?;

        Ok(CommandOutput {
            output: String::from_utf8_lossy(&raw).into_owned(),
            exit_status,
        })
    }

    /// Run a command and fail on nonzero exit status.
    pub fn run_checked(&self, cmd: &str) -> Result<String, TransportError> {
        let out = self.run_command(cmd)?;
        if out.exit_status != 0 {
            return Err(TransportError::Command {
                command: cmd.to_string(),
                status: out.exit_status,
                output: out.output,
            });
        }
        Ok(out.output)
    }

    /// Read a remote file fully over the file channel.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let mut file = self.sftp.open(Path::new(path))?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).map_err(|e| io_err(path, e))?;
        Ok(contents)
    }

    /// Create or truncate a remote file and write `data` to it.
    pub fn write_file(&self, path: &str, data: &[u8]) -> Result<(), TransportError> {
        use std::io::Write;
        let mut file = self.sftp.create(Path::new(path))?;
        file.write_all(data).map_err(|e| io_err(path, e))?;
        Ok(())
    }

    /// Create a remote directory and any missing parents.
    pub fn mkdir_all(&self, dir: &str) -> Result<(), TransportError> {
        let mut current = String::new();
        for part in dir.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            let path = Path::new(&current);
            if self.sftp.stat(path).is_ok() {
                continue;
            }
            if self.sftp.mkdir(path, 0o755).is_err() && self.sftp.stat(path).is_err() {
                return Err(io_err(
                    current.clone(),
                    std::io::Error::other("failed to create remote directory"),
                ));
            }
        }
        Ok(())
    }

    /// List a remote directory.
    pub fn read_dir(&self, dir: &str) -> Result<Vec<(PathBuf, FileStat)>, TransportError> {
        Ok(self.sftp.readdir(Path::new(dir))?)
    }

    /// Remove a remote file.
    pub fn remove_file(&self, path: &str) -> Result<(), TransportError> {
        self.sftp.unlink(Path::new(path)).map_err(|e| {
            io_err(path, std::io::Error::other(e))
        })
    }

    /// MD5 of a remote file, computed remotely. The remote host must provide
    /// `md5sum` and `awk`.
    pub fn file_hash(&self, path: &str) -> Result<String, TransportError> {
        let cmd = format!("md5sum {} | awk '{{print $1}}'", shell_quote(path));
        let output = self.run_checked(&cmd)?;
        Ok(output.trim().to_string())
    }
}

/// True when an SFTP error means "no such file or directory".
pub(crate) fn is_missing(err: &ssh2::Error) -> bool {
    matches!(err.code(), ErrorCode::SFTP(2))
}

/// Single-quote a path for the remote shell.
pub(crate) fn shell_quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

fn spawn_heartbeat(session: Weak<Session>, alive: Arc<AtomicBool>, host: String) {
    std::thread::spawn(move || loop {
        std::thread::sleep(Duration::from_secs(KEEPALIVE_INTERVAL_SECS as u64));
        let Some(session) = session.upgrade() else {
            return;
        };
        if !alive.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = session.keepalive_send() {
            tracing::warn!(host = %host, error = %err, "ssh keep-alive failed, marking connection dead");
            alive.store(false, Ordering::SeqCst);
            return;
        }
    });
}
