//! Packet diagnostics.
//!
//! The collector and fragmenter report every message and fragment through
//! [`dump_packet`]. What actually reaches the log depends on the
//! [`DumpLevel`] chosen in the relay configuration and on the `log` filter.

use core::fmt::Write as _;

use log::debug;

/// Bytes rendered per hex dump line.
pub const BYTES_PER_LINE: usize = 16;

/// How much of each packet is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpLevel {
    /// Nothing beyond the relay's own warnings.
    #[default]
    Off,

    /// One line per packet with its size and the transfer unit.
    Summary,

    /// Summary plus a hex and ASCII rendering of the payload.
    Hex,
}

/// Renders `data` as hex/ASCII lines, 16 bytes per line.
///
/// ```text
/// 48 65 6C 6C 6F                                    |Hello           |
/// ```
pub fn hex_ascii_lines(data: &[u8]) -> impl Iterator<Item = String> + '_ {
    data.chunks(BYTES_PER_LINE).map(|chunk| {
        let mut line = String::with_capacity(BYTES_PER_LINE * 4 + 2);

        for i in 0..BYTES_PER_LINE {
            match chunk.get(i) {
                Some(byte) => {
                    let _ = write!(line, "{:02X} ", byte);
                }
                None => line.push_str("   "),
            }
        }

        line.push('|');
        for i in 0..BYTES_PER_LINE {
            line.push(match chunk.get(i) {
                Some(&byte) if byte.is_ascii_graphic() || byte == b' ' => byte as char,
                Some(_) => '.',
                None => ' ',
            });
        }
        line.push('|');

        line
    })
}

/// Logs one packet at `level` under `target`.
pub fn dump_packet(target: &str, level: DumpLevel, transfer_unit: usize, data: &[u8]) {
    if level == DumpLevel::Off {
        return;
    }

    debug!(target: target, "MTU: {} Data packet size {} bytes", transfer_unit, data.len());

    if level == DumpLevel::Hex {
        for line in hex_ascii_lines(data) {
            debug!(target: target, "{}", line);
        }
        debug!(target: target, "--end of packet--");
    }
}
