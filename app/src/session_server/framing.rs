//! Newline-delimited framing with a hard size cap.
//!
//! Shared by the server's connection threads and the client. Bytes are
//! buffered across calls, so a read timeout in the middle of a line loses
//! nothing.

use std::io::{self, BufRead, ErrorKind};

/// Outcome of one [`read_line`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum LineRead {
    /// A complete line, without its terminator.
    Line(Vec<u8>),
    /// The read timed out before a newline; call again.
    Pending,
    /// End of stream. A partial unterminated line is discarded.
    Closed,
    /// The line grew past the cap. The partial line is dropped.
    TooLarge,
}

/// Read until `\n`, accumulating into `buf`. A trailing `\r` is stripped.
pub fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>, max_bytes: usize) -> io::Result<LineRead> {
    loop {
        let available = match reader.fill_buf() {
            Ok(bytes) => bytes,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(LineRead::Pending);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            if !buf.is_empty() {
                log::debug!("Stream closed mid-line ({} bytes discarded)", buf.len());
                buf.clear();
            }
            return Ok(LineRead::Closed);
        }

        let (chunk_len, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (i, true),
            None => (available.len(), false),
        };
        buf.extend_from_slice(&available[..chunk_len]);
        reader.consume(if complete { chunk_len + 1 } else { chunk_len });

        if buf.len() > max_bytes {
            buf.clear();
            return Ok(LineRead::TooLarge);
        }
        if complete {
            let mut line = std::mem::take(buf);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(LineRead::Line(line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Read};

    #[test]
    fn test_reads_consecutive_lines() {
        let mut reader = Cursor::new(b"{\"a\":1}\r\n{\"b\":2}\n".to_vec());
        let mut buf = Vec::new();
        assert_eq!(
            read_line(&mut reader, &mut buf, 64).unwrap(),
            LineRead::Line(b"{\"a\":1}".to_vec())
        );
        assert_eq!(
            read_line(&mut reader, &mut buf, 64).unwrap(),
            LineRead::Line(b"{\"b\":2}".to_vec())
        );
        assert_eq!(read_line(&mut reader, &mut buf, 64).unwrap(), LineRead::Closed);
    }

    #[test]
    fn test_oversized_line_is_rejected() {
        let data = vec![b'x'; 100];
        let mut reader = Cursor::new(data);
        let mut buf = Vec::new();
        assert_eq!(read_line(&mut reader, &mut buf, 10).unwrap(), LineRead::TooLarge);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_exactly_at_limit_is_accepted() {
        let mut reader = Cursor::new(b"0123456789\n".to_vec());
        let mut buf = Vec::new();
        assert_eq!(
            read_line(&mut reader, &mut buf, 10).unwrap(),
            LineRead::Line(b"0123456789".to_vec())
        );
    }

    #[test]
    fn test_unterminated_tail_is_discarded() {
        let mut reader = Cursor::new(b"partial".to_vec());
        let mut buf = Vec::new();
        assert_eq!(read_line(&mut reader, &mut buf, 64).unwrap(), LineRead::Closed);
    }

    /// Hands out one chunk per read, then times out once between chunks.
    struct Stutter {
        chunks: Vec<&'static [u8]>,
        timed_out: bool,
    }

    impl Read for Stutter {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                return Ok(0);
            }
            if !self.timed_out {
                self.timed_out = true;
                return Err(io::Error::new(ErrorKind::WouldBlock, "not yet"));
            }
            self.timed_out = false;
            let chunk = self.chunks.remove(0);
            out[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_partial_line_survives_timeout() {
        let mut reader = BufReader::new(Stutter {
            chunks: vec![b"{\"com", b"mand\":1}\n"],
            timed_out: false,
        });
        let mut buf = Vec::new();
        let mut reads = Vec::new();
        loop {
            match read_line(&mut reader, &mut buf, 64).unwrap() {
                LineRead::Pending => reads.push("pending"),
                LineRead::Line(line) => {
                    assert_eq!(line, b"{\"command\":1}".to_vec());
                    break;
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(reads.len(), 2);
    }
}
