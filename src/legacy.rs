//! Speculative detection of the two pre-framing legacy ping formats.
//!
//! The probe only ever sees the first chunk a connection sends. Each grammar
//! is tried against that chunk as a pure function; any short read or
//! mismatch along the way means "not legacy", and the caller hands the
//! untouched chunk to the modern framing path. A successful match yields
//! the complete raw reply to write before closing.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use log::debug;

use crate::config_loader::PingProperties;

/// The section sign, the legacy formatting escape character.
const SECTION: char = '\u{a7}';

/// The plugin-message channel the full 1.6 ping carries.
const PING_HOST_CHANNEL: &str = "MC|PingHost";

/// Tries the legacy grammars against the first inbound chunk.
///
/// Returns the reply bytes on a match, `None` when the chunk has to be
/// forwarded unconsumed to the modern protocol path.
pub fn inspect(chunk: &[u8], properties: &PingProperties) -> Option<Vec<u8>> {
    let mut cursor = Cursor::new(chunk);
    match cursor.read_u8().ok()? {
        0xFE => try_status_ping(&mut cursor, properties),
        // Make sure old clients don't attempt an actual login.
        0x02 => try_join(&mut cursor, properties),
        _ => None,
    }
}

/// The pre-1.7 status ping: a bare `0xFE` from the oldest clients, or
/// `0xFE 0x01` optionally followed by an `MC|PingHost` plugin message.
fn try_status_ping(cursor: &mut Cursor<&[u8]>, properties: &PingProperties) -> Option<Vec<u8>> {
    let readable = cursor.get_ref().len() - cursor.position() as usize;

    let mut full = false;
    if readable > 0 {
        if cursor.read_u8().ok()? != 0x01 {
            return None;
        }
        full = true;
    }
    if readable > 1 {
        if cursor.read_u8().ok()? != 0xFA {
            return None;
        }
        let units = cursor.read_u16::<BigEndian>().ok()? as usize;
        if read_utf16be(cursor, units)? != PING_HOST_CHANNEL {
            return None;
        }
        // The rest of the plugin message (protocol, hostname, port) is
        // irrelevant to the reply and left unread.
    }

    debug!("answering legacy status ping (full: {full})");
    let motd = first_line(&properties.legacy_message_of_the_day);
    let reply = if full {
        format!(
            "{SECTION}1\x00127\x00{}\x00{}\x00-1\x00-1",
            properties.outdated_message, motd
        )
    } else {
        format!("{motd}{SECTION}-1{SECTION}-1")
    };
    Some(kick_packet(&reply))
}

/// The pre-1.7 join attempt: protocol byte, UTF-16BE username and host with
/// 16-bit length fields, and a 32-bit port. Anything left over after the
/// port means this was not a legacy join.
fn try_join(cursor: &mut Cursor<&[u8]>, properties: &PingProperties) -> Option<Vec<u8>> {
    cursor.read_u8().ok()?; // protocol version, unused
    let username_units = cursor.read_i16::<BigEndian>().ok()?;
    if !(0..=16).contains(&username_units) {
        return None;
    }
    skip(cursor, username_units as usize * 2)?;
    let host_units = cursor.read_i16::<BigEndian>().ok()?;
    if !(0..=255).contains(&host_units) {
        return None;
    }
    skip(cursor, host_units as usize * 2)?;
    cursor.read_u32::<BigEndian>().ok()?; // port, unused
    if (cursor.position() as usize) < cursor.get_ref().len() {
        return None;
    }

    debug!("turning away legacy join attempt");
    Some(kick_packet(&properties.legacy_disconnect_message))
}

/// Legacy reply framing: `0xFF`, big-endian UTF-16 code unit count, then
/// the UTF-16BE units.
fn kick_packet(message: &str) -> Vec<u8> {
    let units: Vec<u16> = message.encode_utf16().collect();
    let mut out = Vec::with_capacity(3 + units.len() * 2);
    out.push(0xFF);
    out.extend_from_slice(&(units.len() as u16).to_be_bytes());
    for unit in &units {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out
}

fn read_utf16be(cursor: &mut Cursor<&[u8]>, units: usize) -> Option<String> {
    let mut data = vec![0u16; units];
    for unit in &mut data {
        *unit = cursor.read_u16::<BigEndian>().ok()?;
    }
    String::from_utf16(&data).ok()
}

fn skip(cursor: &mut Cursor<&[u8]>, bytes: usize) -> Option<()> {
    let mut sink = vec![0u8; bytes];
    cursor.read_exact(&mut sink).ok()
}

fn first_line(value: &str) -> &str {
    value.split('\n').next().unwrap_or(value)
}
