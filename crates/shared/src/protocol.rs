//! Shell idioms spoken to the remote device and parsers for their output.
//!
//! The command strings are matched by the device side as-is, so the exact
//! spelling (spacing, `;` separators) must not change.

use std::sync::OnceLock;

use regex::Regex;

use crate::{
    domain::{Brightness, Channel, ChannelUpdate},
    error::{ShowError, ShowResult},
};

pub const COMMAND_SEPARATOR: &str = " ; ";
pub const DISCOVERY_COMMAND: &str = "ls -x --color=never";
pub const UPTIME_COMMAND: &str = "uptime";

pub fn join_commands<I, S>(commands: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    commands
        .into_iter()
        .map(|command| command.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(COMMAND_SEPARATOR)
}

pub fn dir_probe_command(path: &str) -> String {
    format!("if test -d {path}; then echo 1; else echo 0; fi")
}

pub fn change_dir_command(path: &str) -> String {
    format!("cd {path}")
}

pub fn read_channel_command(channel: &Channel) -> String {
    format!("cat {}/brightness", channel.remote_path)
}

pub fn write_channel_command(channel: &Channel, brightness: Brightness) -> String {
    format!("echo {brightness} > {}/brightness", channel.remote_path)
}

/// One round trip that prints every channel's value, one per line.
pub fn read_all_command(channels: &[Channel]) -> String {
    join_commands(channels.iter().map(read_channel_command))
}

pub fn write_batch_command(updates: &[ChannelUpdate]) -> String {
    join_commands(
        updates
            .iter()
            .map(|update| write_channel_command(&update.channel, update.brightness)),
    )
}

pub fn probe_pattern() -> &'static Regex {
    static PROBE_RE: OnceLock<Regex> = OnceLock::new();
    PROBE_RE.get_or_init(|| Regex::new(r"(?s).*(\d)\s*$").expect("valid probe regex"))
}

/// Tolerates an echoed command line in front of the listing.
pub fn discovery_pattern() -> &'static Regex {
    static DISCOVERY_RE: OnceLock<Regex> = OnceLock::new();
    DISCOVERY_RE.get_or_init(|| {
        Regex::new(r"(?s)^(?:[^\n]*--color=never[^\n]*\n)?\s*(.*?)\s*$")
            .expect("valid discovery regex")
    })
}

pub fn values_pattern() -> &'static Regex {
    static VALUES_RE: OnceLock<Regex> = OnceLock::new();
    VALUES_RE.get_or_init(|| {
        Regex::new(r"(?m)((?:^[ \t]*\d+[ \t\r]*(?:\n|\z))+)").expect("valid values regex")
    })
}

pub fn parse_probe(captured: &str) -> bool {
    captured.trim() == "1"
}

pub fn parse_channel_listing(listing: &str) -> Vec<Channel> {
    listing
        .split_whitespace()
        .enumerate()
        .map(|(id, entry)| Channel::from_entry(id, entry))
        .collect()
}

pub fn parse_values(captured: &str, expected: usize) -> ShowResult<Vec<Brightness>> {
    let values = captured
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<Brightness>()
                .map_err(|_| ShowError::InvalidArgument(line.to_string()))
        })
        .collect::<ShowResult<Vec<_>>>()?;
    if values.len() != expected {
        return Err(ShowError::ProtocolMismatch {
            pattern: format!("{expected} brightness values"),
            text: captured.to_string(),
        });
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChannelId;

    fn channels() -> Vec<Channel> {
        parse_channel_listing("tp-link:blue:wps  tp-link:green:wlan")
    }

    #[test]
    fn probe_command_is_exact() {
        assert_eq!(
            dir_probe_command("/sys/class/leds"),
            "if test -d /sys/class/leds; then echo 1; else echo 0; fi"
        );
    }

    #[test]
    fn read_and_write_commands_are_joined_with_separator() {
        let channels = channels();
        assert_eq!(
            read_all_command(&channels),
            "cat tp-link:blue:wps/brightness ; cat tp-link:green:wlan/brightness"
        );

        let updates = vec![
            ChannelUpdate {
                channel: channels[1].clone(),
                brightness: 1,
            },
            ChannelUpdate {
                channel: channels[0].clone(),
                brightness: 0,
            },
        ];
        assert_eq!(
            write_batch_command(&updates),
            "echo 1 > tp-link:green:wlan/brightness ; echo 0 > tp-link:blue:wps/brightness"
        );
    }

    #[test]
    fn probe_pattern_takes_last_digit() {
        let text = "if test -d /tmp; then echo 1; else echo 0; fi\r\n1\r\n";
        let caps = probe_pattern().captures(text).expect("probe match");
        assert!(parse_probe(&caps[1]));

        let caps = probe_pattern().captures("0\n").expect("probe match");
        assert!(!parse_probe(&caps[1]));
    }

    #[test]
    fn discovery_skips_echoed_command() {
        let echoed = "ls -x --color=never\r\nath9k-phy0  tp-link:green:qss\r\n";
        let caps = discovery_pattern().captures(echoed).expect("listing");
        let channels = parse_channel_listing(&caps[1]);
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].name, "ath9k-phy0");
        assert_eq!(channels[1].name, "qss");
        assert_eq!(channels[1].id, ChannelId(1));

        let plain = "led0 led1\n";
        let caps = discovery_pattern().captures(plain).expect("listing");
        assert_eq!(parse_channel_listing(&caps[1]).len(), 2);
    }

    #[test]
    fn values_are_parsed_in_channel_order() {
        let text = "0\r\n255\r\n1\r\n";
        let caps = values_pattern().captures(text).expect("values");
        assert_eq!(parse_values(&caps[1], 3).expect("parse"), vec![0, 255, 1]);
    }

    #[test]
    fn values_count_mismatch_is_protocol_error() {
        let err = parse_values("1\n0\n", 3).expect_err("too few values");
        assert!(matches!(err, ShowError::ProtocolMismatch { .. }));
    }

    #[test]
    fn values_pattern_ignores_non_numeric_noise() {
        assert!(values_pattern().captures("cat: missing: No such file\n").is_none());
    }
}
