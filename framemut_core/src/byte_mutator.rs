use rand::Rng;
use std::ops::Range;

/// Value every selected byte is XORed with; inverts all eight bits.
pub const FLIP_MASK: u8 = 0xFF;

/// Draws one uniform sample in `[0, 1)` and reports whether it fell below `probability`.
///
/// Unlike `Rng::random_bool`, this always consumes exactly one sample and accepts
/// any probability, so draw sequences stay aligned across configurations.
#[inline]
pub(crate) fn chance<R: Rng + ?Sized>(rng: &mut R, probability: f64) -> bool {
    rng.random::<f64>() < probability
}

/// Inverts each byte of `buffer[range]` independently with the given probability.
///
/// Returns how many bytes were flipped. The caller guarantees `range.end <= buffer.len()`.
pub fn mutate_range<R: Rng + ?Sized>(
    buffer: &mut [u8],
    range: Range<usize>,
    probability: f64,
    rng: &mut R,
) -> usize {
    let mut flipped = 0;
    for byte in &mut buffer[range] {
        if chance(rng, probability) {
            *byte ^= FLIP_MASK;
            flipped += 1;
        }
    }
    flipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    #[test]
    fn zero_probability_leaves_bytes_untouched() {
        let mut rng = ChaCha8Rng::from_seed([0u8; 32]);
        let original: Vec<u8> = (0..=255).collect();
        let mut data = original.clone();
        let len = data.len();

        let flipped = mutate_range(&mut data, 0..len, 0.0, &mut rng);

        assert_eq!(flipped, 0);
        assert_eq!(data, original);
    }

    #[test]
    fn full_probability_inverts_only_the_range() {
        let mut rng = ChaCha8Rng::from_seed([1u8; 32]);
        let mut data = vec![0x0Fu8; 10];

        let flipped = mutate_range(&mut data, 2..6, 1.0, &mut rng);

        assert_eq!(flipped, 4);
        assert_eq!(&data[..2], &[0x0F, 0x0F]);
        assert_eq!(&data[2..6], &[0xF0; 4]);
        assert_eq!(&data[6..], &[0x0F; 4]);
    }

    #[test]
    fn empty_range_draws_nothing() {
        let mut rng = ChaCha8Rng::from_seed([2u8; 32]);
        let mut reference = rng.clone();
        let mut data = vec![1u8, 2, 3];

        assert_eq!(mutate_range(&mut data, 1..1, 1.0, &mut rng), 0);
        assert_eq!(data, vec![1, 2, 3]);
        assert_eq!(
            rng.random::<u64>(),
            reference.random::<u64>(),
            "An empty range must not advance the generator"
        );
    }

    #[test]
    fn one_draw_per_byte_regardless_of_outcome() {
        let mut rng_low = ChaCha8Rng::seed_from_u64(7);
        let mut rng_high = ChaCha8Rng::seed_from_u64(7);
        let mut data = vec![0u8; 64];

        mutate_range(&mut data, 0..64, 0.0, &mut rng_low);
        mutate_range(&mut data, 0..64, 1.0, &mut rng_high);

        assert_eq!(rng_low.random::<u64>(), rng_high.random::<u64>());
    }

    #[test]
    fn flipped_fraction_tracks_probability() {
        let mut rng = ChaCha8Rng::seed_from_u64(0xC0FFEE);
        let len = 100_000;
        let mut data = vec![0x55u8; len];

        let flipped = mutate_range(&mut data, 0..len, 0.3, &mut rng);

        let changed = data.iter().filter(|&&b| b != 0x55).count();
        assert_eq!(changed, flipped);
        let fraction = flipped as f64 / len as f64;
        assert!(
            (fraction - 0.3).abs() < 0.05,
            "Flipped fraction {} too far from 0.3",
            fraction
        );
    }
}
