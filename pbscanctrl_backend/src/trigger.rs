//! Trigger-edge notifications.
//!
//! A [`TriggerSource`] watches one digital input line and calls a registered [`EdgeCallback`]
//! on every rising edge. The callback runs on the source's own thread.

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::error::ChannelError;

pub type EdgeCallback = Arc<dyn Fn() + Send + Sync>;

/// Identifies one registration with a [`TriggerSource`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TriggerHandle(pub u64);

pub trait TriggerSource {
    /// Whether `channel` exists on this machine.
    fn has_channel(&self, channel: &str) -> Result<bool, ChannelError>;

    fn register_edge_callback(
        &mut self,
        channel: &str,
        callback: EdgeCallback,
    ) -> Result<TriggerHandle, ChannelError>;

    fn unregister(&mut self, handle: TriggerHandle) -> Result<(), ChannelError>;
}

fn matches_channel_format(channel: &str) -> bool {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Dev[0-9]+/port[0-9]+/line[0-9]+$").ok())
        .as_ref()
        .map_or(false, |re| re.is_match(channel))
}

/// Trims `channel` and checks it reads `Dev<n>/port<n>/line<n>`.
pub fn check_channel_format(channel: &str) -> Result<&str, ChannelError> {
    let channel = channel.trim();
    if matches_channel_format(channel) {
        Ok(channel)
    } else {
        Err(ChannelError::Malformed(channel.to_string()))
    }
}

/// Format check, then existence check against `source`. Returns the trimmed channel name.
pub fn check_channel<T: TriggerSource + ?Sized>(
    source: &T,
    channel: &str,
) -> Result<String, ChannelError> {
    let channel = check_channel_format(channel)?;
    if !source.has_channel(channel)? {
        return Err(ChannelError::NotFound(channel.to_string()));
    }
    Ok(channel.to_string())
}
