use crate::codec::{self, Bit, BitStream, BITS_PER_CHAR};
use crate::config::ModemConfig;
use crate::detector::FrequencyReading;
use crate::tone::FrequencyMap;

/// Folds frequency readings into characters
///
/// Readings near the bit 0 or bit 1 carrier contribute one bit each;
/// anything else is dropped silently. Every eighth accepted bit completes a
/// character. There is no framing, so a single lost or spurious reading
/// shifts every following character.
#[derive(Debug, Clone)]
pub struct SymbolDecoder {
    map: FrequencyMap,
    tolerance: f32,
    pending: BitStream,
}

impl SymbolDecoder {
    pub fn new(map: FrequencyMap, tolerance: f32) -> Self {
        Self {
            map,
            tolerance,
            pending: Vec::with_capacity(BITS_PER_CHAR),
        }
    }

    pub fn from_config(config: &ModemConfig) -> Self {
        Self::new(
            FrequencyMap::new(config.base_frequency, config.frequency_shift),
            config.tolerance_hz,
        )
    }

    /// Bit carried by `frequency`, if it falls in exactly one window.
    pub fn classify(&self, frequency: f32) -> Option<Bit> {
        let near = |bit: Bit| (frequency - self.map.frequency_for(bit)).abs() <= self.tolerance;
        match (near(Bit::Zero), near(Bit::One)) {
            (true, false) => Some(Bit::Zero),
            (false, true) => Some(Bit::One),
            _ => None,
        }
    }

    /// Feed one detector tick. Returns a character when one completes.
    pub fn push(&mut self, reading: Option<&FrequencyReading>) -> Option<char> {
        let bit = self.classify(reading?.frequency)?;
        self.push_bit(bit)
    }

    pub fn push_bit(&mut self, bit: Bit) -> Option<char> {
        self.pending.push(bit);
        if self.pending.len() < BITS_PER_CHAR {
            return None;
        }
        let character = codec::byte_to_char(&self.pending);
        self.pending.clear();
        Some(character)
    }

    /// Bits of the character currently being assembled
    pub fn pending_bits(&self) -> &[Bit] {
        &self.pending
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> SymbolDecoder {
        SymbolDecoder::new(FrequencyMap::new(18000.0, 1000.0), 250.0)
    }

    fn reading(frequency: f32) -> FrequencyReading {
        FrequencyReading {
            frequency,
            bin: 0,
            magnitude: 255,
            level_db: 0.0,
        }
    }

    #[test]
    fn test_classify_windows() {
        let decoder = decoder();
        assert_eq!(decoder.classify(18000.0), Some(Bit::Zero));
        assert_eq!(decoder.classify(17976.6), Some(Bit::Zero));
        assert_eq!(decoder.classify(18250.0), Some(Bit::Zero));
        assert_eq!(decoder.classify(19000.0), Some(Bit::One));
        assert_eq!(decoder.classify(18984.4), Some(Bit::One));
        assert_eq!(decoder.classify(18500.0), None);
        assert_eq!(decoder.classify(440.0), None);
    }

    #[test]
    fn test_overlapping_windows_are_ambiguous() {
        let decoder = SymbolDecoder::new(FrequencyMap::new(18000.0, 1000.0), 600.0);
        assert_eq!(decoder.classify(18500.0), None);
        assert_eq!(decoder.classify(17600.0), Some(Bit::Zero));
        assert_eq!(decoder.classify(19400.0), Some(Bit::One));
    }

    #[test]
    fn test_decodes_hi() {
        let mut decoder = decoder();
        let mut out = String::new();
        for bit in codec::encode("Hi").unwrap() {
            let frequency = if bit == Bit::One { 19000.0 } else { 18000.0 };
            if let Some(c) = decoder.push(Some(&reading(frequency))) {
                out.push(c);
            }
        }
        assert_eq!(out, "Hi");
        assert!(decoder.pending_bits().is_empty());
    }

    #[test]
    fn test_noise_and_silence_are_skipped() {
        let mut decoder = decoder();
        let mut out = String::new();
        for bit in codec::encode("A").unwrap() {
            assert_eq!(decoder.push(None), None);
            assert_eq!(decoder.push(Some(&reading(1234.0))), None);
            let frequency = if bit == Bit::One { 19000.0 } else { 18000.0 };
            out.extend(decoder.push(Some(&reading(frequency))));
        }
        assert_eq!(out, "A");
    }

    #[test]
    fn test_reset_discards_partial_character() {
        let mut decoder = decoder();
        for _ in 0..5 {
            decoder.push_bit(Bit::One);
        }
        assert_eq!(decoder.pending_bits().len(), 5);
        decoder.reset();
        assert!(decoder.pending_bits().is_empty());
    }

    #[test]
    fn test_lost_bit_shifts_following_characters() {
        let mut decoder = decoder();
        let mut bits = codec::encode("AB").unwrap();
        bits.remove(3);
        let out: String = bits.into_iter().filter_map(|bit| decoder.push_bit(bit)).collect();
        assert_eq!(out.len(), 1);
        assert_ne!(out, "A");
    }
}
