//! Connection lifecycle and the reader/writer loops that keep the remote
//! brightness files in line with the [`StateStore`].

use std::{sync::Arc, time::Duration};

use regex::Regex;
use remote_shell::{RemoteChannel, SessionConnector, PROMPT_MARKER};
use shared::{
    domain::{Brightness, Channel, ConnectionState},
    error::{ShowError, ShowResult},
    protocol::{
        change_dir_command, dir_probe_command, discovery_pattern, parse_channel_listing,
        parse_probe, parse_values, probe_pattern, read_all_command, values_pattern,
        write_batch_command, DISCOVERY_COMMAND, UPTIME_COMMAND,
    },
};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::state::{ObservedChange, StateStore};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Never let observed changes overwrite the goal.
    pub guard: bool,
    pub poll_interval: Duration,
    /// Wait per prompt attempt when reading.
    pub prompt_timeout: Duration,
    pub read_attempts: usize,
    /// Prompt wait for a write. The session lock is held meanwhile.
    pub write_timeout: Duration,
}

impl RouterConfig {
    /// Total time a read may wait for its prompt.
    pub fn read_budget(prompt_timeout: Duration, read_attempts: usize) -> Duration {
        prompt_timeout.saturating_mul(u32::try_from(read_attempts).unwrap_or(u32::MAX))
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        let prompt_timeout = Duration::from_secs(1);
        let read_attempts = 3;
        Self {
            guard: false,
            poll_interval: Duration::from_secs(1),
            prompt_timeout,
            read_attempts,
            write_timeout: Self::read_budget(prompt_timeout, read_attempts),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// `Some(address)` after a connect, `None` after any disconnect.
    ConnectionChanged(Option<String>),
    /// Goal values were replaced from the device; re-read the store.
    ModelChanged,
}

#[derive(Default)]
struct Session {
    channel: Option<Box<dyn RemoteChannel>>,
    address: Option<String>,
    generation: u64,
}

struct RouterShared {
    connector: Arc<dyn SessionConnector>,
    config: RouterConfig,
    session: Mutex<Session>,
    state: Arc<StateStore>,
    connection: watch::Sender<ConnectionState>,
    events: broadcast::Sender<RouterEvent>,
}

pub struct Router {
    shared: Arc<RouterShared>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Router {
    /// Spawns the reader and writer loops; must run inside a tokio runtime.
    pub fn new(connector: Arc<dyn SessionConnector>, config: RouterConfig) -> Self {
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(RouterShared {
            connector,
            config,
            session: Mutex::new(Session::default()),
            state: Arc::new(StateStore::new()),
            connection,
            events,
        });
        let reader = tokio::spawn(run_reader(Arc::clone(&shared)));
        let writer = tokio::spawn(run_writer(Arc::clone(&shared)));
        Self {
            shared,
            reader,
            writer,
        }
    }

    pub fn state(&self) -> Arc<StateStore> {
        Arc::clone(&self.shared.state)
    }

    pub fn config(&self) -> &RouterConfig {
        &self.shared.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.shared.connection.borrow()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.shared.connection.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RouterEvent> {
        self.shared.events.subscribe()
    }

    pub async fn connect(
        &self,
        address: &str,
        user: &str,
        credential: &str,
        base_path: &str,
    ) -> ShowResult<()> {
        self.shared
            .connect(address, user, credential, base_path)
            .await
    }

    pub async fn disconnect(&self) {
        let mut session = self.shared.session.lock().await;
        self.shared.close_session(&mut session, true).await;
    }

    /// Address of the live session, probing it first. A dead session is
    /// torn down on the way.
    pub async fn connected(&self) -> Option<String> {
        let mut session = self.shared.session.lock().await;
        self.shared.probe_session(&mut session).await
    }

    pub async fn shutdown(self) {
        self.disconnect().await;
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl RouterShared {
    async fn connect(
        &self,
        address: &str,
        user: &str,
        credential: &str,
        base_path: &str,
    ) -> ShowResult<()> {
        let mut session = self.session.lock().await;
        if let Some(current) = self.probe_session(&mut session).await {
            if current == address {
                info!(address, "already connected");
                return Ok(());
            }
            self.close_session(&mut session, true).await;
        }

        self.connection.send_replace(ConnectionState::Connecting);
        let (channel, channels, values) =
            match self.establish(address, user, credential, base_path).await {
                Ok(established) => established,
                Err(err) => {
                    warn!(address, %err, "connect failed");
                    self.connection.send_replace(ConnectionState::Disconnected);
                    return Err(err);
                }
            };

        info!(address, channels = channels.len(), "connected");
        self.state.reset(channels, values);
        session.channel = Some(channel);
        session.address = Some(address.to_string());
        session.generation += 1;
        self.connection.send_replace(ConnectionState::Connected);
        let _ = self
            .events
            .send(RouterEvent::ConnectionChanged(Some(address.to_string())));
        Ok(())
    }

    async fn establish(
        &self,
        address: &str,
        user: &str,
        credential: &str,
        base_path: &str,
    ) -> ShowResult<(Box<dyn RemoteChannel>, Vec<Channel>, Vec<Brightness>)> {
        let mut channel = self.connector.login(address, user, credential).await?;
        match self.prepare(channel.as_mut(), base_path).await {
            Ok((channels, values)) => Ok((channel, channels, values)),
            Err(err) => {
                if let Err(logout_err) = channel.logout().await {
                    debug!(%logout_err, "logout after failed connect");
                }
                Err(match err {
                    ShowError::Connection(_) => err,
                    other => ShowError::connection(other.to_string()),
                })
            }
        }
    }

    async fn prepare(
        &self,
        channel: &mut dyn RemoteChannel,
        base_path: &str,
    ) -> ShowResult<(Vec<Channel>, Vec<Brightness>)> {
        let probe = read_command(
            channel,
            &self.config,
            probe_pattern(),
            &dir_probe_command(base_path),
        )
        .await?;
        if !parse_probe(&probe) {
            return Err(ShowError::connection(format!(
                "directory '{base_path}' does not exist"
            )));
        }

        send_command(channel, &change_dir_command(base_path), self.config.write_timeout).await?;
        send_command(channel, UPTIME_COMMAND, self.config.write_timeout).await?;
        debug!(
            uptime = %String::from_utf8_lossy(channel.text_before_prompt()).trim(),
            "remote uptime"
        );

        let listing = read_command(channel, &self.config, discovery_pattern(), DISCOVERY_COMMAND)
            .await?;
        let channels = parse_channel_listing(&listing);
        let values = read_values(channel, &self.config, &channels).await?;
        Ok((channels, values))
    }

    async fn probe_session(&self, session: &mut Session) -> Option<String> {
        let address = session.address.clone()?;
        let alive = match session.channel.as_mut() {
            Some(channel) => channel.is_alive().await,
            None => false,
        };
        if alive {
            return Some(address);
        }
        warn!(address, "no connection");
        self.close_session(session, false).await;
        None
    }

    /// Always ends `Disconnected` with a `ConnectionChanged(None)` event.
    async fn close_session(&self, session: &mut Session, logout: bool) {
        let address = session.address.take();
        if let Some(mut channel) = session.channel.take() {
            if logout {
                match channel.logout().await {
                    Ok(()) => info!(address = address.as_deref(), "logged out"),
                    Err(err) => debug!(%err, "logout failed"),
                }
            }
        }
        self.state.clear();
        self.connection.send_replace(ConnectionState::Disconnected);
        let _ = self.events.send(RouterEvent::ConnectionChanged(None));
    }

    /// Session loss disconnects, as long as nobody reconnected meanwhile;
    /// anything else is only logged.
    async fn recover(&self, generation: u64, err: ShowError, operation: &'static str) {
        if !err.is_session_lost() {
            warn!(operation, code = ?err.code(), %err, "remote operation failed");
            return;
        }
        error!(operation, %err, "remote session lost");
        let mut session = self.session.lock().await;
        if session.generation == generation && session.channel.is_some() {
            self.close_session(&mut session, false).await;
        }
    }

    async fn read_tick(&self) {
        let (generation, result) = {
            let mut session = self.session.lock().await;
            let generation = session.generation;
            let Some(channel) = session.channel.as_mut() else {
                return;
            };
            let channels = self.state.channels();
            let result = match read_values(channel.as_mut(), &self.config, &channels).await {
                Ok(values) => self.state.apply_observed(values, self.config.guard),
                Err(err) => Err(err),
            };
            (generation, result)
        };

        match result {
            Ok(ObservedChange::Unchanged) => {}
            Ok(ObservedChange::Observed) => {
                debug!(observed = ?self.state.observed(), "observed state changed");
            }
            Ok(ObservedChange::Adopted) => {
                debug!(observed = ?self.state.observed(), "observed state adopted as goal");
                let _ = self.events.send(RouterEvent::ModelChanged);
            }
            Err(err) => self.recover(generation, err, "read").await,
        }
    }

    async fn write_tick(&self) {
        let (generation, result) = {
            let mut session = self.session.lock().await;
            let generation = session.generation;
            let Some(channel) = session.channel.as_mut() else {
                return;
            };
            let updates = self.state.take_pending_writes();
            if updates.is_empty() {
                return;
            }
            debug!(count = updates.len(), "sending channel updates");
            let command = write_batch_command(&updates);
            let result = send_command(channel.as_mut(), &command, self.config.write_timeout).await;
            (generation, result)
        };

        if let Err(err) = result {
            self.recover(generation, err, "write").await;
        }
    }
}

async fn run_reader(shared: Arc<RouterShared>) {
    let mut gate = shared.connection.subscribe();
    loop {
        let open = gate.wait_for(|state| state.is_connected()).await.is_ok();
        if !open {
            break;
        }
        shared.read_tick().await;
        tokio::time::sleep(shared.config.poll_interval).await;
    }
}

async fn run_writer(shared: Arc<RouterShared>) {
    let mut gate = shared.connection.subscribe();
    loop {
        let open = gate.wait_for(|state| state.is_connected()).await.is_ok();
        if !open {
            break;
        }
        shared.state.goal_changed().await;
        shared.write_tick().await;
    }
}

async fn send_command(
    channel: &mut dyn RemoteChannel,
    command: &str,
    timeout: Duration,
) -> ShowResult<()> {
    channel.send_line(command).await?;
    if !channel.await_prompt(timeout).await? {
        return Err(ShowError::ProtocolMismatch {
            pattern: PROMPT_MARKER.to_string(),
            text: format!("no prompt after {command:?}"),
        });
    }
    Ok(())
}

/// Sends `command` and returns the first capture group of `pattern`,
/// retrying the prompt a bounded number of times.
async fn read_command(
    channel: &mut dyn RemoteChannel,
    config: &RouterConfig,
    pattern: &Regex,
    command: &str,
) -> ShowResult<String> {
    channel.send_line(command).await?;
    let mut text = String::new();
    for attempt in 0..config.read_attempts {
        if !channel.await_prompt(config.prompt_timeout).await? {
            debug!(attempt, "no prompt");
            continue;
        }
        text = String::from_utf8_lossy(channel.text_before_prompt()).into_owned();
        if let Some(captures) = pattern.captures(&text) {
            return Ok(captures
                .get(1)
                .map_or_else(String::new, |group| group.as_str().to_string()));
        }
        debug!(attempt, pattern = pattern.as_str(), "failed matching attempt");
    }
    Err(ShowError::ProtocolMismatch {
        pattern: pattern.as_str().to_string(),
        text,
    })
}

async fn read_values(
    channel: &mut dyn RemoteChannel,
    config: &RouterConfig,
    channels: &[Channel],
) -> ShowResult<Vec<Brightness>> {
    if channels.is_empty() {
        return Ok(Vec::new());
    }
    let captured =
        read_command(channel, config, values_pattern(), &read_all_command(channels)).await?;
    parse_values(&captured, channels.len())
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
