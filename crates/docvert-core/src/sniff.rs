//! Guess a format from the first bytes/lines of a file, the way
//! `getFormatFromContents` does in the original before ever touching the
//! extension table.

use std::io::{BufRead, BufReader, Read};

const MAX_LINES: usize = 50;

/// Inspect up to the first 50 lines of `reader` and return the format name
/// it matches, or `None` if nothing recognized the content.
///
/// This never looks at a file extension; callers fall back to
/// extension-based lookup themselves when this returns `None`.
pub fn sniff<R: Read>(reader: R) -> Option<&'static str> {
    let mut reader = BufReader::new(reader);

    let mut head = [0u8; 4];
    let read = reader.read(&mut head).ok()?;
    let head = &head[..read];

    if read >= 2 {
        match &head[..2] {
            [0x1f, 0x8b] => return Some("gzip"),
            b"PK" => return Some("zip"),
            [0x1f, 0x9d] => return Some("compress"),
            b"BM" => return Some("bmp"),
            [0x01, 0xda] => return Some("sgi"),
            _ => {}
        }
    }

    if read >= 2 {
        match &head[..2] {
            b"P1" | b"P4" => return Some("pbm"),
            b"P2" | b"P5" => return Some("pgm"),
            b"P3" | b"P6" => return Some("ppm"),
            b"II" | b"MM" => return Some("tiff"),
            _ => {}
        }
    }

    if read == 4 && head == [0x00, 0x00, 0x00, 0x69] {
        return Some("xwd");
    }

    // Re-read from the top for the line-oriented marker scan; the magic
    // checks above only peek 4 bytes and never consume the stream for a
    // BufRead::lines() pass.
    let mut chain = head.chain(&mut reader);
    let mut lines = Vec::with_capacity(MAX_LINES);
    {
        let mut buf_reader = BufReader::new(&mut chain);
        let mut line = String::new();
        for _ in 0..MAX_LINES {
            line.clear();
            match buf_reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => lines.push(line.clone()),
                Err(_) => break,
            }
        }
    }

    for line in &lines {
        if line.starts_with("%TGIF") {
            return Some("tgif");
        }
        if line.starts_with("#FIG") {
            return Some("fig");
        }
        if line.contains("GIF") {
            return Some("gif");
        }
    }

    for line in &lines {
        if line.contains("EPSF") {
            return Some("eps");
        }
        if line.contains("Grace") {
            return Some("agr");
        }
        if line.contains("JFIF") {
            return Some("jpg");
        }
        if line.contains("%PDF") {
            return Some("pdf");
        }
        if line.contains("PNG") {
            return Some("png");
        }
        if line.contains("_bits[]") {
            return Some("xbm");
        }
        if line.contains("XPM") || line.contains("static char *") {
            return Some("xpm");
        }
        if line.contains("BITPIX") {
            return Some("fits");
        }
    }

    if let Some(first) = lines.first() {
        if first.starts_with("%!PS-Adobe") {
            let next_token = first.split_whitespace().nth(1);

            return match next_token {
                Some(token) if token.contains("EPSF") => Some("eps"),
                _ => Some("ps"),
            };
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn sniffs_gzip_magic() {
        assert_eq!(sniff(Cursor::new([0x1f, 0x8b, 0x08, 0x00])), Some("gzip"));
    }

    #[test]
    fn sniffs_zip_magic() {
        assert_eq!(sniff(Cursor::new(b"PK\x03\x04")), Some("zip"));
    }

    #[test]
    fn sniffs_pdf_marker_on_any_line() {
        let content = b"garbage header\n%PDF-1.4\nmore stuff\n";
        assert_eq!(sniff(Cursor::new(content)), Some("pdf"));
    }

    #[test]
    fn sniffs_eps_adobe_header_with_epsf_token() {
        let content = b"%!PS-Adobe-3.0 EPSF-3.0\n%%BoundingBox: 0 0 1 1\n";
        assert_eq!(sniff(Cursor::new(content)), Some("eps"));
    }

    #[test]
    fn sniffs_plain_postscript_without_epsf() {
        let content = b"%!PS-Adobe-3.0\n%%Pages: 1\n";
        assert_eq!(sniff(Cursor::new(content)), Some("ps"));
    }

    #[test]
    fn returns_none_for_unrecognized_content() {
        let content = b"just some plain text file\nwith nothing special\n";
        assert_eq!(sniff(Cursor::new(content)), None);
    }
}
