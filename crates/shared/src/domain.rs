use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw value of a remote `brightness` file.
pub type Brightness = u32;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub usize);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ChannelId);

/// One discovered output on the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    /// Suffix after the last `:` of the directory entry, e.g. `wlan`.
    pub name: String,
    /// Directory entry relative to the base path, e.g. `tp-link:green:wlan`.
    pub remote_path: String,
}

impl Channel {
    pub fn from_entry(id: usize, entry: &str) -> Self {
        let name = entry.rsplit(':').next().unwrap_or(entry).to_string();
        Self {
            id: ChannelId(id),
            name,
            remote_path: entry.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// A single pending write produced by the reconciler diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub channel: Channel,
    pub brightness: Brightness,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_is_suffix_after_last_colon() {
        let channel = Channel::from_entry(2, "tp-link:green:wlan");
        assert_eq!(channel.id, ChannelId(2));
        assert_eq!(channel.name, "wlan");
        assert_eq!(channel.remote_path, "tp-link:green:wlan");
    }

    #[test]
    fn channel_without_colon_keeps_entry_as_name() {
        let channel = Channel::from_entry(0, "led0");
        assert_eq!(channel.name, "led0");
    }

    #[test]
    fn connection_state_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionState::Connecting).expect("serialize");
        assert_eq!(json, "\"connecting\"");
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::default().is_connected());
    }
}
