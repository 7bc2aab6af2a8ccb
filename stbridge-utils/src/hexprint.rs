use std::fmt::Write;

/// Nicely format the given bytes as a hex block with an ASCII sidebar. The
/// listed addresses will start from `start`.
pub fn pretty_print_hex_block(buf: &[u8], start: usize) -> String {
    // Each full row is 10 characters of address, 50 of hex, 20 of ASCII
    // sidebar, and a newline.
    let mut out = String::with_capacity((buf.len() / 16 + 1) * 85);

    for (row, chunk) in buf.chunks(16).enumerate() {
        if row > 0 {
            out.push('\n');
        }
        // Address header.
        write!(out, "{:#010X}  ", start + row * 16).unwrap();
        // Hex bytes, double-spaced between groups of four.
        for (i, byte) in chunk.iter().enumerate() {
            out.push_str(if i % 4 == 0 { "  " } else { " " });
            write!(out, "{:02X}", byte).unwrap();
        }
        // Pad a short final row so the sidebar stays aligned.
        for i in chunk.len()..16 {
            out.push_str(if i % 4 == 0 { "    " } else { "   " });
        }
        // ASCII sidebar.
        out.push_str("  |");
        for byte in chunk {
            out.push(printable(*byte));
        }
        out.push('|');
    }

    out
}

/// Shortcut for starting the addresses at zero.
#[inline]
pub fn pretty_print_hex_block_zero(buf: &[u8]) -> String {
    pretty_print_hex_block(buf, 0)
}

fn printable(chr: u8) -> char {
    match chr {
        32..=126 => chr.into(),
        _ => '.',
    }
}
