use crate::byte_mutator::mutate_range;
use crate::config::MutationConfig;
use crate::scanner::find_next_frame;
use crate::swapper::try_swap_adjacent;
use log::{debug, trace};
use rand::Rng;
use serde::Serialize;

/// Summary of one pass of the mutation driver over a buffer.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationReport {
    /// Logical length of the mutated buffer; never changed by the pass.
    pub len: usize,
    /// Number of frames visited.
    pub frames: usize,
    /// Number of bytes inverted by Bernoulli mutation.
    pub flipped_bytes: usize,
    /// Number of successful equal-length frame exchanges.
    pub swaps: usize,
}

/// Walks `buffer` frame by frame, corrupting each frame and occasionally swapping it
/// with a later frame of the same length.
///
/// Per frame, the pass scans for the frame's end, flips its bytes with
/// `config.mutation_probability`, then makes one swap attempt with
/// `config.swap_probability`. It stops when no further marker is found. Input without
/// any marker is left as is. The buffer length never changes.
pub fn mutate_frames<R: Rng + ?Sized>(
    buffer: &mut [u8],
    config: &MutationConfig,
    rng: &mut R,
) -> MutationReport {
    let len = buffer.len();
    let mut report = MutationReport {
        len,
        ..Default::default()
    };

    let mut pos = 0;
    while pos < len {
        let frame_start = find_next_frame(buffer, pos);
        if frame_start == len {
            break;
        }
        let frame_end = find_next_frame(buffer, frame_start + 1);
        report.frames += 1;

        let flipped = mutate_range(
            buffer,
            frame_start..frame_end,
            config.mutation_probability,
            rng,
        );
        report.flipped_bytes += flipped;

        let swapped = try_swap_adjacent(
            buffer,
            frame_start..frame_end,
            config.swap_probability,
            config.swap_search,
            rng,
        );
        if swapped {
            report.swaps += 1;
        }
        trace!("frame {frame_start}..{frame_end}: flipped {flipped}, swapped {swapped}");

        pos = frame_end;
    }

    debug!(
        "mutated {} bytes: {} frames, {} bytes flipped, {} swaps",
        report.len, report.frames, report.flipped_bytes, report.swaps
    );
    report
}
