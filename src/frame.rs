//! Inbound framer and outbound message builder.
//!
//! Every backend message after the startup exchange is
//! `[1-byte type][4-byte big-endian length including itself][payload]`. The
//! framer never blocks: it is fed whatever bytes the transport produced and
//! yields whole frames, buffering a partial header or a partial payload
//! across calls.

use crate::error::{Error, Result};

const HEADER_LEN: usize = 5;

#[derive(Debug, Clone, Copy)]
struct Header {
    type_byte: u8,
    payload_len: usize,
}

fn parse_header(bytes: &[u8; HEADER_LEN]) -> Result<Header> {
    let type_byte = bytes[0];
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    let payload_len = (len as usize)
        .checked_sub(4)
        .ok_or_else(|| Error::Protocol(format!("message length {len} smaller than header")))?;
    Ok(Header {
        type_byte,
        payload_len,
    })
}

/// A single complete backend message.
#[derive(Debug, Clone)]
pub struct Frame {
    pub type_byte: u8,
    pub payload: Vec<u8>,
}

enum State {
    Header { have: [u8; HEADER_LEN], filled: usize },
    Body { header: Header, body: Vec<u8> },
}

/// Stateful inbound message framer.
pub struct Framer {
    state: State,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self {
            state: State::Header {
                have: [0u8; HEADER_LEN],
                filled: 0,
            },
        }
    }

    /// Feed newly-read bytes in. Returns completed frames in arrival order;
    /// bytes beyond what completes a frame remain buffered for the next call.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        while !data.is_empty() {
            match &mut self.state {
                State::Header { have, filled } => {
                    let need = HEADER_LEN - *filled;
                    let take = need.min(data.len());
                    have[*filled..*filled + take].copy_from_slice(&data[..take]);
                    *filled += take;
                    data = &data[take..];
                    if *filled == HEADER_LEN {
                        let header = parse_header(have)?;
                        if header.payload_len == 0 {
                            frames.push(Frame {
                                type_byte: header.type_byte,
                                payload: Vec::new(),
                            });
                            self.state = State::Header {
                                have: [0u8; HEADER_LEN],
                                filled: 0,
                            };
                        } else {
                            self.state = State::Body {
                                header,
                                body: Vec::with_capacity(header.payload_len),
                            };
                        }
                    }
                }
                State::Body { header, body } => {
                    let need = header.payload_len - body.len();
                    let take = need.min(data.len());
                    body.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if body.len() == header.payload_len {
                        frames.push(Frame {
                            type_byte: header.type_byte,
                            payload: std::mem::take(body),
                        });
                        self.state = State::Header {
                            have: [0u8; HEADER_LEN],
                            filled: 0,
                        };
                    }
                }
            }
        }
        Ok(frames)
    }
}

/// Appends a single length-prefixed outbound message to `buf`.
///
/// `new_startup` omits the leading type byte, matching the untagged
/// `StartupMessage`.
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        let start = buf.len();
        buf.extend_from_slice(&[0u8; 4]);
        Self { buf, start }
    }

    pub fn new_startup(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0u8; 4]);
        Self { buf, start }
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_i16(&mut self, v: i16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(v);
        self
    }

    pub fn write_cstr(&mut self, v: &str) -> &mut Self {
        self.buf.extend_from_slice(v.as_bytes());
        self.buf.push(0);
        self
    }

    /// Underlying buffer, for callers (e.g. Bind parameter encoding) that
    /// need to append raw bytes directly.
    pub fn buf(&mut self) -> &mut Vec<u8> {
        self.buf
    }

    /// Patch the length field and finish the message.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        self.buf[self.start..self.start + 4].copy_from_slice(&len.to_be_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(type_byte: u8, f: impl FnOnce(&mut MessageBuilder)) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut msg = MessageBuilder::new(&mut buf, type_byte);
        f(&mut msg);
        msg.finish();
        buf
    }

    #[test]
    fn single_frame_in_one_chunk() {
        let bytes = build(b'S', |m| {
            m.write_cstr("hi");
        });
        let mut framer = Framer::new();
        let frames = framer.feed(&bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].type_byte, b'S');
        assert_eq!(frames[0].payload, b"hi\0");
    }

    #[test]
    fn split_mid_header() {
        let bytes = build(b'Z', |m| {
            m.write_u8(b'I');
        });
        let mut framer = Framer::new();
        assert!(framer.feed(&bytes[..2]).unwrap().is_empty());
        let frames = framer.feed(&bytes[2..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].type_byte, b'Z');
        assert_eq!(frames[0].payload, vec![b'I']);
    }

    #[test]
    fn split_mid_payload() {
        let bytes = build(b'D', |m| {
            m.write_bytes(&[1, 2, 3, 4, 5, 6, 7, 8]);
        });
        let mut framer = Framer::new();
        assert!(framer.feed(&bytes[..7]).unwrap().is_empty());
        let frames = framer.feed(&bytes[7..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn two_frames_in_one_chunk_and_excess_carries_over() {
        let third = build(b'3', |_| {});

        let mut bytes = build(b'1', |_| {});
        bytes.extend(build(b'2', |_| {}));
        bytes.push(third[0]); // excess byte: the type byte of a third, not-yet-complete frame

        let mut framer = Framer::new();
        let frames = framer.feed(&bytes).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].type_byte, b'1');
        assert_eq!(frames[1].type_byte, b'2');

        // finish the third frame with its remaining header bytes
        let frames = framer.feed(&third[1..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].type_byte, b'3');
    }

    #[test]
    fn header_only_frame() {
        let bytes = build(b'n', |_| {});
        assert_eq!(bytes.len(), HEADER_LEN);
        let mut framer = Framer::new();
        let frames = framer.feed(&bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
    }
}
