use bit_vec::BitVec;
use seahash::hash;

/// Bloom filter over primary-key bytes. Deletes are not reflected until the
/// filter is rebuilt, which only costs extra lookups.
#[derive(Debug, Clone)]
pub struct KeyFilter {
    bits: BitVec,
    num_hashes: u32,
    inserted: usize,
    capacity: usize,
}

impl KeyFilter {
    /// m = -(n ln p) / (ln 2)^2 bits and k = (m / n) ln 2 hashes.
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let expected = expected_items.max(1);
        let ln2 = 2.0f64.ln();
        let m = -((expected as f64 * false_positive_rate.ln()) / (ln2 * ln2));
        let k = (m / expected as f64) * ln2;
        Self {
            bits: BitVec::from_elem(m.ceil().max(64.0) as usize, false),
            num_hashes: (k.ceil() as u32).max(1),
            inserted: 0,
            capacity: expected,
        }
    }

    /// Sized for `live` keys with headroom to grow.
    pub fn with_headroom(live: usize) -> Self {
        Self::new((live * 2).max(1024), 0.01)
    }

    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hash_pair(key);
        let m = self.bits.len() as u64;
        for i in 0..self.num_hashes {
            let idx = h1.wrapping_add((i as u64).wrapping_mul(h2)) % m;
            self.bits.set(idx as usize, true);
        }
        self.inserted += 1;
    }

    /// `false` means definitely absent.
    pub fn contains(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hash_pair(key);
        let m = self.bits.len() as u64;
        (0..self.num_hashes).all(|i| {
            let idx = h1.wrapping_add((i as u64).wrapping_mul(h2)) % m;
            self.bits.get(idx as usize).unwrap_or(false)
        })
    }

    /// Whether more keys went in than the filter was sized for.
    pub fn is_saturated(&self) -> bool {
        self.inserted > self.capacity
    }

    fn hash_pair(key: &[u8]) -> (u64, u64) {
        let h1 = hash(key);
        let h2 = h1.wrapping_add(0x9E37_79B9_7F4A_7C15);
        (h1, h2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserted_keys_are_found() {
        let mut filter = KeyFilter::new(1000, 0.01);
        for i in 0u32..1000 {
            filter.insert(&i.to_le_bytes());
        }
        assert!((0u32..1000).all(|i| filter.contains(&i.to_le_bytes())));
        assert!(!filter.is_saturated());
        filter.insert(b"one more");
        assert!(filter.is_saturated());
    }

    #[test]
    fn test_false_positive_rate_is_bounded() {
        let mut filter = KeyFilter::new(1000, 0.01);
        for i in 0u32..1000 {
            filter.insert(&i.to_le_bytes());
        }
        let false_positives = (1000u32..11000).filter(|i| filter.contains(&i.to_le_bytes())).count();
        assert!(false_positives < 500, "{false_positives} false positives");
    }
}
