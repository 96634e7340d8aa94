//! `Transfer-Encoding: chunked` framing.

use memchr::memmem;

fn read_line<'a>(input: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    let rest = input.get(*pos..)?;
    let end = memmem::find(rest, b"\r\n")?;
    *pos += end + 2;
    Some(&rest[..end])
}

/// Strip chunk framing. Returns `None` when the framing is malformed.
///
/// Chunk extensions and trailers are discarded.
pub fn dechunk(input: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len());
    let mut pos = 0;

    loop {
        let line = read_line(input, &mut pos)?;
        let line = std::str::from_utf8(line).ok()?;
        let size_text = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_text, 16).ok()?;

        if size == 0 {
            // trailer section ends at an empty line; tolerate its absence
            while let Some(trailer) = read_line(input, &mut pos) {
                if trailer.is_empty() {
                    break;
                }
            }
            return Some(out);
        }

        let data = input.get(pos..pos.checked_add(size)?)?;
        out.extend_from_slice(data);
        pos += size;

        if input.get(pos..pos + 2)? != b"\r\n" {
            return None;
        }
        pos += 2;
    }
}

/// Frame `body` as a single chunk followed by the terminating chunk.
pub fn chunk(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 16);
    if !body.is_empty() {
        out.extend_from_slice(format!("{:x}\r\n", body.len()).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}
