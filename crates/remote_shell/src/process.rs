//! [`RemoteChannel`] over the stdin/stdout of a child shell process.
//!
//! The child runs a plain `sh` without a terminal, so there is neither an
//! echo nor a real prompt. After every line a `printf` emits
//! [`PROMPT_MARKER`] followed by the line's sequence number and `$ `; the
//! quoting keeps the marker out of the command text. A prompt that shows up
//! after its wait ran out carries an older number and is skipped together
//! with the output in front of it.

use std::{
    io,
    path::PathBuf,
    process::Stdio,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use shared::error::{ShowError, ShowResult};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdin, Command},
    sync::Notify,
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{RemoteChannel, SessionConnector};

pub const PROMPT_MARKER: &str = "[LIGHTSHOW]";
const MARKER_SUFFIX: &[u8] = b"$ ";
const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(15);
const LOGOUT_GRACE: Duration = Duration::from_secs(2);

#[derive(Default)]
struct OutputBuffer {
    bytes: Mutex<Vec<u8>>,
    open_streams: AtomicUsize,
    changed: Notify,
}

impl OutputBuffer {
    fn push(&self, chunk: &[u8]) {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(chunk);
        self.changed.notify_one();
    }

    fn close_stream(&self) {
        self.open_streams.fetch_sub(1, Ordering::SeqCst);
        self.changed.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.open_streams.load(Ordering::SeqCst) == 0
    }

    /// Removes everything up to and including the first complete marker and
    /// returns its sequence number with the text in front of it.
    fn take_through_marker(&self) -> Option<(u64, Vec<u8>)> {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        let prefix = PROMPT_MARKER.as_bytes();
        let mut from = 0;
        while let Some(offset) = bytes[from..]
            .windows(prefix.len())
            .position(|window| window == prefix)
        {
            let pos = from + offset;
            let digits_start = pos + prefix.len();
            let digits = bytes[digits_start..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            let digits_end = digits_start + digits;
            let tail = &bytes[digits_end..];
            if tail.len() < MARKER_SUFFIX.len() && MARKER_SUFFIX.starts_with(tail) {
                // Rest of the marker has not arrived yet.
                return None;
            }
            let seq = std::str::from_utf8(&bytes[digits_start..digits_end])
                .ok()
                .and_then(|digits| digits.parse::<u64>().ok());
            let Some(seq) = seq.filter(|_| tail.starts_with(MARKER_SUFFIX)) else {
                from = pos + 1;
                continue;
            };
            let mut end = digits_end + MARKER_SUFFIX.len();
            if bytes.get(end) == Some(&b'\n') {
                end += 1;
            }
            let before = bytes[..pos].to_vec();
            bytes.drain(..end);
            return Some((seq, before));
        }
        None
    }

    fn snapshot(&self) -> String {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).trim().to_string()
    }
}

fn spawn_reader<R>(mut stream: R, output: Arc<OutputBuffer>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => output.push(&chunk[..n]),
                Err(err) => {
                    debug!(%err, "shell output stream failed");
                    break;
                }
            }
        }
        output.close_stream();
    })
}

pub struct ProcessShell {
    child: Child,
    stdin: ChildStdin,
    output: Arc<OutputBuffer>,
    /// Sequence number of the last line sent.
    sent: u64,
    before: Vec<u8>,
    readers: Vec<JoinHandle<()>>,
}

impl ProcessShell {
    /// Spawns `command` and waits for the first marker.
    pub async fn spawn(mut command: Command, login_timeout: Duration) -> ShowResult<Self> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|err| ShowError::connection(format!("failed to start shell: {err}")))?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(ShowError::connection("shell pipes unavailable"));
        };

        let output = Arc::new(OutputBuffer::default());
        output.open_streams.store(2, Ordering::SeqCst);
        let readers = vec![
            spawn_reader(stdout, Arc::clone(&output)),
            spawn_reader(stderr, Arc::clone(&output)),
        ];

        let mut shell = Self {
            child,
            stdin,
            output,
            sent: 0,
            before: Vec::new(),
            readers,
        };

        // Fold the shell's stderr into stdout so messages stay ordered with
        // the marker.
        let greeting = async {
            shell.send_line("exec 2>&1").await?;
            shell.await_prompt(login_timeout).await
        };
        match greeting.await {
            Ok(true) => Ok(shell),
            Ok(false) => Err(ShowError::connection(format!(
                "no prompt within {login_timeout:?}: {}",
                shell.output.snapshot()
            ))),
            Err(err) => Err(ShowError::connection(format!(
                "shell exited during login ({err}): {}",
                shell.output.snapshot()
            ))),
        }
    }
}

#[async_trait]
impl RemoteChannel for ProcessShell {
    async fn send_line(&mut self, text: &str) -> io::Result<()> {
        self.sent += 1;
        let line = format!(
            "{text}\nprintf '%s%s\\n' '{PROMPT_MARKER}' '{}$ '\n",
            self.sent
        );
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await
    }

    async fn await_prompt(&mut self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            while let Some((seq, before)) = self.output.take_through_marker() {
                if seq >= self.sent {
                    self.before = before;
                    return Ok(true);
                }
                debug!(seq, expected = self.sent, "dropping output of an earlier line");
            }
            if self.output.is_closed() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "remote shell closed its output",
                ));
            }
            if tokio::time::timeout_at(deadline, self.output.changed.notified())
                .await
                .is_err()
            {
                return Ok(false);
            }
        }
    }

    fn text_before_prompt(&self) -> &[u8] {
        &self.before
    }

    async fn logout(&mut self) -> io::Result<()> {
        let sent = self.stdin.write_all(b"exit\n").await;
        if sent.is_ok() {
            let _ = self.stdin.flush().await;
        }
        match tokio::time::timeout(LOGOUT_GRACE, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(?status, "shell exited");
            }
            Err(_) => {
                warn!("shell ignored exit, killing it");
                self.child.start_kill()?;
            }
        }
        sent
    }
}

impl Drop for ProcessShell {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

/// Logs in with the system `ssh` client and runs `sh` on the remote side.
#[derive(Debug, Clone)]
pub struct SshConnector {
    pub program: String,
    pub extra_args: Vec<String>,
    /// Pass a non-empty credential through `sshpass -e`.
    pub use_sshpass: bool,
    pub login_timeout: Duration,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self {
            program: "ssh".into(),
            extra_args: vec!["-o".into(), "ConnectTimeout=10".into()],
            use_sshpass: false,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }
}

impl SshConnector {
    fn command(&self, address: &str, user: &str, credential: &str) -> Command {
        let with_password = !credential.is_empty() && self.use_sshpass;
        let mut command = if with_password {
            let mut command = Command::new("sshpass");
            command.arg("-e").arg(&self.program).env("SSHPASS", credential);
            command
        } else {
            if !credential.is_empty() {
                warn!(address, "credential given without sshpass; relying on key authentication");
            }
            let mut command = Command::new(&self.program);
            command.args(["-o", "BatchMode=yes"]);
            command
        };
        command
            .arg("-T")
            .args(&self.extra_args)
            .arg(format!("{user}@{address}"))
            .arg("sh");
        command
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    async fn login(
        &self,
        address: &str,
        user: &str,
        credential: &str,
    ) -> ShowResult<Box<dyn RemoteChannel>> {
        let feedback = if credential.is_empty() {
            "without"
        } else {
            "with"
        };
        info!(address, user, "logging in {feedback} password");
        let shell = ProcessShell::spawn(self.command(address, user, credential), self.login_timeout)
            .await?;
        info!(address, "ssh session login successful");
        Ok(Box::new(shell))
    }
}

/// Runs `sh` on this machine inside `root`; useful against a directory of
/// fake `brightness` files.
#[derive(Debug, Clone)]
pub struct LocalShellConnector {
    pub root: PathBuf,
    pub login_timeout: Duration,
}

impl LocalShellConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
        }
    }
}

#[async_trait]
impl SessionConnector for LocalShellConnector {
    async fn login(
        &self,
        address: &str,
        _user: &str,
        _credential: &str,
    ) -> ShowResult<Box<dyn RemoteChannel>> {
        info!(address, root = %self.root.display(), "starting local shell");
        let mut command = Command::new("sh");
        command.current_dir(&self.root);
        let shell = ProcessShell::spawn(command, self.login_timeout).await?;
        Ok(Box::new(shell))
    }
}

#[cfg(test)]
#[path = "tests/process_tests.rs"]
mod tests;
