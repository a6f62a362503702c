//! Exec frame decoding.

/// Discriminator of the standard output channel.
pub const STDOUT_CHANNEL: u8 = 1;

/// A decoded exec frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text written to standard output.
    Stdout(String),

    /// Any other channel, or an empty frame. Dropped without error.
    Discarded { channel: Option<u8> },
}

/// Decode one `[channel][payload]` frame. Invalid UTF-8 is replaced.
pub fn decode_frame(raw: &[u8]) -> Frame {
    match raw.split_first() {
        Some((&STDOUT_CHANNEL, payload)) => {
            Frame::Stdout(String::from_utf8_lossy(payload).into_owned())
        }
        Some((&channel, _)) => Frame::Discarded {
            channel: Some(channel),
        },
        None => Frame::Discarded { channel: None },
    }
}
