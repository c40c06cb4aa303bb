//! Splitting a TCP byte stream into protocol units.
//!
//! A unit is either a marked frame (`<mark>payload<mark>`) or an unmarked
//! line. Bytes are buffered until a whole unit is available, so a frame or a
//! multi-byte character split across reads is reassembled before decoding.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::MARKS;

pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
    max_frame_bytes: usize,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(1024),
            max_frame_bytes,
        }
    }

    /// Returns the next complete unit, or `None` once the peer closes.
    ///
    /// Cancel safe: the only await point is `read_buf`, and bytes it has
    /// already read stay buffered in `self` for the next call.
    pub async fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if let Some(unit) = self.take_frame() {
                return Ok(Some(unit));
            }

            if self.buffer.len() > self.max_frame_bytes {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame exceeds {} bytes", self.max_frame_bytes),
                ));
            }

            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                return Ok(None);
            }
        }
    }

    fn take_frame(&mut self) -> Option<Vec<u8>> {
        let blank = self
            .buffer
            .iter()
            .take_while(|byte| matches!(byte, b'\r' | b'\n'))
            .count();
        self.buffer.drain(..blank);

        let (len, consumed) = split_frame(&self.buffer)?;
        let unit = self.buffer[..len].to_vec();
        self.buffer.drain(..consumed);
        Some(unit)
    }
}

/// Locates the first unit in `buffer`.
///
/// Returns `(unit_len, consumed)`; the two differ only for newline-terminated
/// lines, whose line ending is consumed but not part of the unit.
pub(crate) fn split_frame(buffer: &[u8]) -> Option<(usize, usize)> {
    if buffer.is_empty() {
        return None;
    }

    for mark in MARKS.iter().map(|mark| mark.as_bytes()) {
        if buffer.starts_with(mark) {
            let payload = find(&buffer[mark.len()..], mark)?;
            let len = mark.len() * 2 + payload;
            return Some((len, len));
        }
    }

    // Possibly the start of a marker that has not fully arrived yet.
    if MARKS.iter().any(|mark| mark.as_bytes().starts_with(buffer)) {
        return None;
    }

    let newline = buffer.iter().position(|&byte| byte == b'\n');
    let next_mark = MARKS
        .iter()
        .filter_map(|mark| find(buffer, mark.as_bytes()))
        .min();

    match (newline, next_mark) {
        (Some(newline), Some(mark)) if mark < newline => Some((mark, mark)),
        (Some(newline), _) => {
            let len = if newline > 0 && buffer[newline - 1] == b'\r' {
                newline - 1
            } else {
                newline
            };
            Some((len, newline + 1))
        }
        (None, Some(mark)) => Some((mark, mark)),
        (None, None) => None,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

pub async fn write_frame<W>(writer: &mut W, frame: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use std::{
        pin::Pin,
        task::{Context, Poll},
    };

    use tokio::io::ReadBuf;

    use super::*;
    use crate::codec::{LOGIN_MARK, Message};

    /// Hands out one byte per read so every frame arrives in pieces.
    struct Trickle {
        data: Vec<u8>,
        position: usize,
    }

    impl AsyncRead for Trickle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.position < self.data.len() && buf.remaining() > 0 {
                let byte = self.data[self.position];
                buf.put_slice(&[byte]);
                self.position += 1;
            }
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn incomplete_frame_waits_for_more_bytes() {
        let frame = Message::Login {
            name: "alice".into(),
        }
        .encode();
        let bytes = frame.as_bytes();

        assert_eq!(split_frame(&bytes[..bytes.len() - 1]), None);
        assert_eq!(split_frame(&bytes[..1]), None);
        assert_eq!(split_frame(bytes), Some((bytes.len(), bytes.len())));
    }

    #[test]
    fn unmarked_line_stops_at_newline() {
        assert_eq!(split_frame(b"hello\r\nrest"), Some((5, 7)));
        assert_eq!(split_frame(b"hello"), None);
    }

    #[test]
    fn unmarked_text_stops_at_next_marker() {
        let buffer = format!("junk{LOGIN_MARK}bob{LOGIN_MARK}");
        assert_eq!(split_frame(buffer.as_bytes()), Some((4, 4)));
    }

    #[tokio::test]
    async fn reassembles_frames_delivered_byte_by_byte() {
        let first = Message::Broadcast {
            body: "你好，世界".into(),
        }
        .encode();
        let second = Message::Login { name: "bob".into() }.encode();
        let mut frames = FrameReader::new(
            Trickle {
                data: format!("{first}\r\n{second}").into_bytes(),
                position: 0,
            },
            1024,
        );

        let unit = frames.next_frame().await.expect("read").expect("first unit");
        assert_eq!(unit, first.as_bytes());
        let unit = frames.next_frame().await.expect("read").expect("second unit");
        assert_eq!(unit, second.as_bytes());
        assert!(frames.next_frame().await.expect("read").is_none());
    }

    #[tokio::test]
    async fn back_to_back_frames_in_one_read_are_split() {
        let first = Message::Broadcast { body: "one".into() }.encode();
        let second = Message::Broadcast { body: "two".into() }.encode();
        let data = format!("{first}{second}");
        let mut frames = FrameReader::new(data.as_bytes(), 1024);

        let unit = frames.next_frame().await.expect("read").expect("first unit");
        assert_eq!(unit, first.as_bytes());
        let unit = frames.next_frame().await.expect("read").expect("second unit");
        assert_eq!(unit, second.as_bytes());
    }

    #[tokio::test]
    async fn oversized_frame_is_an_error() {
        let data = format!("{LOGIN_MARK}{}", "x".repeat(64));
        let mut frames = FrameReader::new(data.as_bytes(), 16);

        let err = frames.next_frame().await.expect_err("frame too large");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn write_frame_flushes_whole_frame() {
        let (mut writer, reader) = tokio::io::duplex(64);
        write_frame(&mut writer, "∏∑OK∏∑").await.expect("write");
        drop(writer);

        let mut frames = FrameReader::new(reader, 64);
        let unit = frames.next_frame().await.expect("read").expect("unit");
        assert_eq!(unit, "∏∑OK∏∑".as_bytes());
    }
}
