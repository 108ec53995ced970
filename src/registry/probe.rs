//! CS1.6 server query wire protocol
//!
//! Handles the two reply dialects spoken by game servers in the wild: the
//! Source-engine binary info reply and the legacy backslash-delimited
//! key/value reply. Both arrive behind the same 4-byte `0xFF` prefix and a
//! single tag byte; challenge replies are answered by re-sending the query
//! with the 4-byte token appended.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time;
use tracing::trace;

/// Source Engine Query frame
const SOURCE_ENGINE_QUERY: &[u8] = b"\xff\xff\xff\xffTSource Engine Query\x00";

/// Legacy info query frame
const LEGACY_INFO_QUERY: &[u8] = b"\xff\xff\xff\xffinfo\x00";

/// Players query frame
const PLAYERS_QUERY: &[u8] = b"\xff\xff\xff\xffplayers\x00";

/// Reply prefix shared by every query dialect
const REPLY_PREFIX: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// Largest reply we accept from a game server
const PROBE_BUFFER_SIZE: usize = 1024;

/// Fallback display name for legacy replies without a `hostname` field
const LEGACY_DEFAULT_NAME: &str = "Legacy CS1.6 Server";

/// Fallback map name for legacy replies without a `map` field
const LEGACY_DEFAULT_MAP: &str = "unknown";

/// Parsed game-server information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Display name from the server's hostname cvar
    pub name: String,
    /// Current map
    pub map: String,
    /// Game folder, `cstrike` for both dialects
    pub game: String,
    /// Current player count
    pub players: u32,
    /// Server capacity
    pub max_players: u32,
}

/// A decoded probe reply, tagged by the fifth byte on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeReply {
    /// `'A'`: the server wants the query re-sent with this token appended
    Challenge([u8; 4]),
    /// `'I'`: Source-engine info reply
    SourceInfo(ServerInfo),
    /// `'m'`: legacy key/value info reply
    LegacyInfo(ServerInfo),
}

/// Decode a raw reply. Returns `None` for anything too short, without the
/// `0xFF` prefix, or carrying an unknown tag.
pub fn parse_probe_reply(data: &[u8]) -> Option<ProbeReply> {
    if data.len() < 5 || data[..4] != REPLY_PREFIX {
        return None;
    }

    let payload = &data[5..];
    match data[4] {
        b'A' => payload
            .get(..4)
            .and_then(|t| <[u8; 4]>::try_from(t).ok())
            .map(ProbeReply::Challenge),
        b'I' => parse_source_info(payload).map(ProbeReply::SourceInfo),
        b'm' => parse_legacy_info(payload).map(ProbeReply::LegacyInfo),
        _ => None,
    }
}

/// Read a NUL-terminated string starting at `*pos`, advancing past the NUL.
fn read_cstring(data: &[u8], pos: &mut usize) -> Option<String> {
    let nul = data[*pos..].iter().position(|&b| b == 0)?;
    let s = String::from_utf8_lossy(&data[*pos..*pos + nul]).into_owned();
    *pos += nul + 1;
    Some(s)
}

/// Parse the payload of a Source-engine `'I'` reply.
///
/// Truncated replies are acceptable: whatever fields were present before
/// the cut are kept and the rest stay at their defaults.
fn parse_source_info(data: &[u8]) -> Option<ServerInfo> {
    if data.len() < 2 {
        return None;
    }

    let mut info = ServerInfo::default();
    let mut pos = 1; // skip protocol version

    info.name = read_cstring(data, &mut pos)?;

    info.map = match read_cstring(data, &mut pos) {
        Some(map) => map,
        None => return Some(info),
    };

    // Folder and game name, unused beyond framing
    if read_cstring(data, &mut pos).is_none() {
        return Some(info);
    }
    if read_cstring(data, &mut pos).is_none() {
        return Some(info);
    }

    // 2-byte appid
    if pos + 2 > data.len() {
        return Some(info);
    }
    pos += 2;

    if pos >= data.len() {
        return Some(info);
    }
    info.players = u32::from(data[pos]);
    pos += 1;

    if pos >= data.len() {
        return Some(info);
    }
    info.max_players = u32::from(data[pos]);
    info.game = "cstrike".to_string();

    Some(info)
}

/// Parse the payload of a legacy `'m'` reply: backslash-separated
/// key/value pairs, pairs starting from the second element.
fn parse_legacy_info(data: &[u8]) -> Option<ServerInfo> {
    let text = String::from_utf8_lossy(data);
    if !text.contains('\\') {
        return None;
    }

    let parts: Vec<&str> = text.split('\\').collect();
    let mut fields: HashMap<&str, &str> = HashMap::new();
    let mut i = 1;
    while i + 1 < parts.len() {
        fields.insert(parts[i].trim(), parts[i + 1].trim());
        i += 2;
    }

    let name = fields
        .get("hostname")
        .filter(|v| !v.is_empty())
        .unwrap_or(&LEGACY_DEFAULT_NAME);
    let map = fields
        .get("map")
        .filter(|v| !v.is_empty())
        .unwrap_or(&LEGACY_DEFAULT_MAP);
    let players = fields
        .get("players")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let max_players = fields.get("max").and_then(|v| v.parse().ok()).unwrap_or(0);

    Some(ServerInfo {
        name: name.to_string(),
        map: map.to_string(),
        game: "cstrike".to_string(),
        players,
        max_players,
    })
}

/// Query a single host:port, trying each query dialect until one yields an
/// info reply. Returns the parsed info and the round-trip time in
/// milliseconds, or `None` when the port stays silent or malformed.
pub async fn probe_server(host: &str, port: u16, timeout: Duration) -> Option<(ServerInfo, f64)> {
    let started = Instant::now();

    for query in [SOURCE_ENGINE_QUERY, LEGACY_INFO_QUERY, PLAYERS_QUERY] {
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(_) => return None,
        };
        if socket.connect((host, port)).await.is_err() {
            continue;
        }
        if socket.send(query).await.is_err() {
            continue;
        }

        let mut buf = [0u8; PROBE_BUFFER_SIZE];
        let n = match time::timeout(timeout, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => n,
            _ => continue,
        };
        let rtt_ms = started.elapsed().as_secs_f64() * 1000.0;

        match parse_probe_reply(&buf[..n]) {
            Some(ProbeReply::SourceInfo(info)) | Some(ProbeReply::LegacyInfo(info)) => {
                return Some((info, rtt_ms));
            }
            Some(ProbeReply::Challenge(token)) => {
                trace!("Challenge from {}:{}, re-sending with token", host, port);
                let mut follow_up = query.to_vec();
                follow_up.extend_from_slice(&token);
                if socket.send(&follow_up).await.is_err() {
                    continue;
                }
                if let Ok(Ok(n)) = time::timeout(timeout, socket.recv(&mut buf)).await {
                    match parse_probe_reply(&buf[..n]) {
                        Some(ProbeReply::SourceInfo(info))
                        | Some(ProbeReply::LegacyInfo(info)) => {
                            return Some((info, rtt_ms));
                        }
                        _ => {}
                    }
                }
            }
            None => {}
        }
    }

    None
}
