//! Incremental server-sent-events decoding.

/// Buffers raw bytes and yields the `data:` payload of every complete event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some((pos, delim_len)) = find_event_boundary(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..pos + delim_len).take(pos).collect();
            if let Some(data) = extract_data(&String::from_utf8_lossy(&event)) {
                out.push(data);
            }
        }
        out
    }

    /// Flushes a trailing event the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        extract_data(&String::from_utf8_lossy(&rest))
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

fn extract_data(event: &str) -> Option<String> {
    let mut data = String::new();
    let mut found = false;
    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix("data:") {
            if found {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
            found = true;
        }
    }
    found.then_some(data)
}
