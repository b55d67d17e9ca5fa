//! Source coverage bitmaps for phrase-based decoding.

use std::hash::{Hash, Hasher};

use super::Span;

/// Which source positions a hypothesis has translated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coverage {
    bits: Vec<u64>,
    len: usize,
    covered: usize,
}

impl Coverage {
    pub fn new(len: usize) -> Self {
        Coverage {
            bits: vec![0; len.div_ceil(64)],
            len,
            covered: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn covered(&self) -> usize {
        self.covered
    }

    pub fn full(&self) -> bool {
        self.covered == self.len
    }

    pub fn is_set(&self, i: usize) -> bool {
        debug_assert!(i < self.len);
        self.bits[i / 64] & (1u64 << (i % 64)) != 0
    }

    /// Mark a span covered; the span must currently be free.
    pub fn set_range(&mut self, span: Span) {
        for i in span.start..span.end {
            debug_assert!(!self.is_set(i), "covering an already covered position");
            self.bits[i / 64] |= 1u64 << (i % 64);
        }
        self.covered += span.width();
    }

    pub fn is_range_free(&self, span: Span) -> bool {
        (span.start..span.end).all(|i| !self.is_set(i))
    }

    /// First uncovered position, if any.
    pub fn first_gap(&self) -> Option<usize> {
        (0..self.len).find(|&i| !self.is_set(i))
    }

    /// Maximal uncovered contiguous spans, left to right.
    pub fn free_spans(&self) -> Vec<Span> {
        let mut spans = Vec::new();
        let mut start = None;
        for i in 0..self.len {
            match (self.is_set(i), start) {
                (false, None) => start = Some(i),
                (true, Some(s)) => {
                    spans.push(Span::new(s, i));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            spans.push(Span::new(s, self.len));
        }
        spans
    }
}

impl Hash for Coverage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_query() {
        let mut c = Coverage::new(10);
        assert_eq!(c.covered(), 0);
        assert!(!c.full());
        c.set_range(Span::new(2, 5));
        assert!(c.is_set(2) && c.is_set(4));
        assert!(!c.is_set(1) && !c.is_set(5));
        assert_eq!(c.covered(), 3);
        assert!(c.is_range_free(Span::new(5, 10)));
        assert!(!c.is_range_free(Span::new(4, 6)));
        assert_eq!(c.first_gap(), Some(0));
    }

    #[test]
    fn free_spans_are_maximal() {
        let mut c = Coverage::new(8);
        c.set_range(Span::new(2, 4));
        c.set_range(Span::new(6, 7));
        assert_eq!(
            c.free_spans(),
            vec![Span::new(0, 2), Span::new(4, 6), Span::new(7, 8)]
        );
    }

    #[test]
    fn full_after_covering_everything() {
        let mut c = Coverage::new(3);
        c.set_range(Span::new(0, 3));
        assert!(c.full());
        assert_eq!(c.first_gap(), None);
        assert!(c.free_spans().is_empty());
    }

    #[test]
    fn wide_bitmaps_cross_word_boundaries() {
        let mut c = Coverage::new(130);
        c.set_range(Span::new(60, 70));
        assert!(c.is_set(63) && c.is_set(64) && c.is_set(69));
        assert!(!c.is_set(70));
        assert_eq!(c.covered(), 10);
        let gaps = c.free_spans();
        assert_eq!(gaps, vec![Span::new(0, 60), Span::new(70, 130)]);
    }

    #[test]
    fn equal_coverage_hashes_equal() {
        use std::collections::hash_map::DefaultHasher;
        let mut a = Coverage::new(5);
        a.set_range(Span::new(1, 3));
        let mut b = Coverage::new(5);
        b.set_range(Span::new(1, 2));
        b.set_range(Span::new(2, 3));
        assert_eq!(a, b);
        let hash = |c: &Coverage| {
            let mut h = DefaultHasher::new();
            c.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&a), hash(&b));
    }
}
