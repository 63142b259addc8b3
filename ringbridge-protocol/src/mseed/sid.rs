//! FDSN source identifier mapping (`FDSN:NET_STA_LOC_B_S_SS`).

use crate::error::{ProtocolError, Result};

const PREFIX: &str = "FDSN:";

/// Build a source identifier from network/station/location/channel codes.
///
/// A conventional three-character channel is expanded into its
/// band/source/subsource form (`HHZ` → `H_H_Z`); a channel already carrying
/// underscores is taken verbatim.
pub fn to_sid(network: &str, station: &str, location: &str, channel: &str) -> String {
    let channel_part = if channel.contains('_') {
        channel.to_owned()
    } else if channel.len() == 3 {
        let mut chars = channel.chars();
        let (b, s, ss) = (
            chars.next().unwrap(),
            chars.next().unwrap(),
            chars.next().unwrap(),
        );
        format!("{b}_{s}_{ss}")
    } else {
        channel.to_owned()
    };
    format!("{PREFIX}{network}_{station}_{location}_{channel_part}")
}

/// Split a source identifier back into network/station/location/channel.
///
/// Three single-character trailing segments collapse back into a
/// conventional channel code.
pub fn from_sid(sid: &str) -> Result<(String, String, String, String)> {
    let rest = sid
        .strip_prefix(PREFIX)
        .ok_or_else(|| ProtocolError::UnpackFailed(format!("source id missing prefix: {sid:?}")))?;

    let parts: Vec<&str> = rest.split('_').collect();
    if parts.len() < 4 {
        return Err(ProtocolError::UnpackFailed(format!(
            "source id has too few segments: {sid:?}"
        )));
    }

    let network = parts[0].to_owned();
    let station = parts[1].to_owned();
    let location = parts[2].to_owned();

    let channel_parts = &parts[3..];
    let channel = if channel_parts.len() == 3 && channel_parts.iter().all(|p| p.len() <= 1) {
        channel_parts.concat()
    } else {
        channel_parts.join("_")
    };

    Ok((network, station, location, channel))
}
