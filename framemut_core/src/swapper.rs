use crate::byte_mutator::chance;
use crate::config::SwapSearch;
use crate::scanner::find_next_frame;
use rand::Rng;
use std::ops::Range;

/// With the given probability, exchanges `frame` with a later frame of exactly the same length.
///
/// The partner is the first frame found from `search.start_after(frame.end)`. Nothing is
/// written when the draw fails, when no partner exists, or when the lengths differ.
/// Returns `true` if the two ranges were exchanged.
///
/// One random draw is consumed per call, before any scanning.
pub fn try_swap_adjacent<R: Rng + ?Sized>(
    buffer: &mut [u8],
    frame: Range<usize>,
    probability: f64,
    search: SwapSearch,
    rng: &mut R,
) -> bool {
    if !chance(rng, probability) {
        return false;
    }

    let len = buffer.len();
    let other_start = find_next_frame(buffer, search.start_after(frame.end));
    if other_start == len {
        return false;
    }
    let other_end = find_next_frame(buffer, other_start + 1);

    let frame_size = frame.end - frame.start;
    if frame_size != other_end - other_start {
        return false;
    }

    // other_start >= frame.end, so the split keeps the frame entirely in `head`.
    let (head, tail) = buffer.split_at_mut(other_start);
    head[frame].swap_with_slice(&mut tail[..frame_size]);
    true
}
