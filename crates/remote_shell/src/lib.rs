use std::{io, time::Duration};

use async_trait::async_trait;
use shared::error::ShowResult;

pub mod process;

pub use process::{LocalShellConnector, ProcessShell, SshConnector, PROMPT_MARKER};

pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(2);

/// A line-oriented command session on the remote host.
///
/// Every line sent is eventually followed by exactly one prompt. I/O errors
/// mean the session is gone; a `false` from [`RemoteChannel::await_prompt`]
/// only means the prompt did not show up in time.
#[async_trait]
pub trait RemoteChannel: Send {
    async fn send_line(&mut self, text: &str) -> io::Result<()>;

    async fn await_prompt(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Output captured between the previous prompt and the last one matched.
    fn text_before_prompt(&self) -> &[u8];

    async fn logout(&mut self) -> io::Result<()>;

    async fn is_alive(&mut self) -> bool {
        if self.send_line("").await.is_err() {
            return false;
        }
        matches!(self.await_prompt(LIVENESS_TIMEOUT).await, Ok(true))
    }
}

#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn login(
        &self,
        address: &str,
        user: &str,
        credential: &str,
    ) -> ShowResult<Box<dyn RemoteChannel>>;
}
