//! Frame boundary detection for MPEG-audio style byte streams.
//!
//! A frame starts at a synchronization marker: a `0xFF` byte followed by a byte
//! whose top three bits are set (an 11-bit run of ones). The input is untrusted,
//! so every routine here tolerates arbitrary bytes and arbitrary start offsets.

use std::ops::Range;

/// First byte of a synchronization marker.
pub const SYNC_BYTE: u8 = 0xFF;
/// Bits of the second byte that must all be set for a synchronization marker.
pub const SYNC_MASK: u8 = 0xE0;

/// Returns `true` if the byte pair `(first, second)` forms a synchronization marker.
#[inline]
pub fn is_sync_marker(first: u8, second: u8) -> bool {
    first == SYNC_BYTE && (second & SYNC_MASK) == SYNC_MASK
}

/// Finds the offset of the next synchronization marker at or after `start`.
///
/// Offsets `start..=len - 2` are examined, so the second byte of a candidate pair
/// is always in bounds. Returns `buffer.len()` when no further marker exists,
/// including when `start` is past the end of the buffer or the buffer holds fewer
/// than two bytes.
pub fn find_next_frame(buffer: &[u8], start: usize) -> usize {
    buffer
        .get(start..)
        .and_then(|tail| {
            tail.windows(2)
                .position(|pair| is_sync_marker(pair[0], pair[1]))
        })
        .map_or(buffer.len(), |offset| start + offset)
}

/// Returns the frame that starts at the first marker at or after `pos`.
///
/// The frame ends where the next marker begins, or at the end of the buffer if
/// it is the last one. `None` means there is no marker left to start a frame.
pub fn frame_at(buffer: &[u8], pos: usize) -> Option<Range<usize>> {
    let start = find_next_frame(buffer, pos);
    if start == buffer.len() {
        return None;
    }
    let end = find_next_frame(buffer, start + 1);
    Some(start..end)
}

/// Iterator over the frames of a buffer, in the order the mutation driver visits them.
///
/// Bytes before the first marker are not part of any frame. Yielded ranges never
/// overlap, are strictly increasing and always satisfy `start < end <= len`.
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> Frames<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, pos: 0 }
    }
}

impl Iterator for Frames<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buffer.len() {
            return None;
        }
        let frame = frame_at(self.buffer, self.pos)?;
        self.pos = frame.end;
        Some(frame)
    }
}
