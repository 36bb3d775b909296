//! Resource Element Allocation Patterns
//!
//! Describes which resource elements of a slot belong to an allocation as
//! the product of a PRB set, an OFDM symbol set and a per-RB subcarrier
//! mask, and resolves lists of such patterns into per-symbol selection
//! masks.

use crate::PhyError;
use common::{BoundedBitset, MAX_NSYMB_PER_SLOT, MAX_RB, NRE};

/// One allocation pattern: a set of PRBs, repeated on a set of OFDM symbols,
/// selecting the same subcarriers within every PRB.
#[derive(Debug, Clone)]
pub struct RePattern {
    /// Selected PRBs, length [`MAX_RB`].
    prb_mask: BoundedBitset,
    /// Selected OFDM symbols, length [`MAX_NSYMB_PER_SLOT`].
    symbol_mask: BoundedBitset,
    /// Selected subcarriers within each PRB, length [`NRE`].
    re_mask: BoundedBitset,
}

impl RePattern {
    /// Pattern covering PRBs `rb_begin..rb_end` with the given per-RB RE
    /// mask and OFDM symbol mask.
    pub fn new(
        rb_begin: usize,
        rb_end: usize,
        re_mask: BoundedBitset,
        symbol_mask: BoundedBitset,
    ) -> Result<Self, PhyError> {
        if rb_begin >= rb_end || rb_end > MAX_RB {
            return Err(PhyError::InvalidConfiguration(format!(
                "PRB range {}..{} is not within 0..{}",
                rb_begin, rb_end, MAX_RB
            )));
        }
        if re_mask.len() != NRE {
            return Err(PhyError::InvalidConfiguration(format!(
                "RE mask length {} must be {}",
                re_mask.len(),
                NRE
            )));
        }
        if symbol_mask.len() != MAX_NSYMB_PER_SLOT {
            return Err(PhyError::InvalidConfiguration(format!(
                "Symbol mask length {} must be {}",
                symbol_mask.len(),
                MAX_NSYMB_PER_SLOT
            )));
        }
        let mut prb_mask = BoundedBitset::new(MAX_RB);
        prb_mask.set_range(rb_begin, rb_end);
        Ok(Self {
            prb_mask,
            symbol_mask,
            re_mask,
        })
    }

    /// Pattern selecting every RE of PRBs `rb_begin..rb_end` on the given
    /// OFDM symbols.
    pub fn full_prb(rb_begin: usize, rb_end: usize, symbols: &[usize]) -> Result<Self, PhyError> {
        let mut re_mask = BoundedBitset::new(NRE);
        re_mask.set_range(0, NRE);
        Self::new(rb_begin, rb_end, re_mask, symbol_mask_from(symbols))
    }

    /// OR the pattern's REs for `i_symbol` into `mask`.
    ///
    /// REs beyond the mask length are outside the grid and are ignored.
    pub fn get_inclusion_mask(&self, mask: &mut BoundedBitset, i_symbol: usize) {
        self.for_symbol_re(mask.len(), i_symbol, |pos| mask.set(pos));
    }

    /// Clear the pattern's REs for `i_symbol` from `mask`.
    pub fn get_exclusion_mask(&self, mask: &mut BoundedBitset, i_symbol: usize) {
        self.for_symbol_re(mask.len(), i_symbol, |pos| mask.reset(pos));
    }

    fn for_symbol_re(&self, mask_len: usize, i_symbol: usize, mut apply: impl FnMut(usize)) {
        if i_symbol >= self.symbol_mask.len() || !self.symbol_mask.test(i_symbol) {
            return;
        }
        for prb in self.prb_mask.iter_ones() {
            let base = prb * NRE;
            if base >= mask_len {
                break;
            }
            for re in self.re_mask.iter_ones() {
                let pos = base + re;
                if pos < mask_len {
                    apply(pos);
                }
            }
        }
    }
}

/// Build a symbol mask of length [`MAX_NSYMB_PER_SLOT`] from a list of
/// symbol indexes.
pub fn symbol_mask_from(symbols: &[usize]) -> BoundedBitset {
    let mut mask = BoundedBitset::new(MAX_NSYMB_PER_SLOT);
    for &i_symbol in symbols {
        mask.set(i_symbol);
    }
    mask
}

/// Ordered list of allocation patterns resolved together per OFDM symbol.
#[derive(Debug, Clone, Default)]
pub struct RePatternList {
    patterns: Vec<RePattern>,
}

impl RePatternList {
    /// Empty list; the identity for both inclusion and exclusion.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pattern to the list.
    pub fn push(&mut self, pattern: RePattern) {
        self.patterns.push(pattern);
    }

    /// OR the union of all member patterns for `i_symbol` into `mask`.
    pub fn get_inclusion_mask(&self, mask: &mut BoundedBitset, i_symbol: usize) {
        for pattern in &self.patterns {
            pattern.get_inclusion_mask(mask, i_symbol);
        }
    }

    /// Subtract the union of all member patterns for `i_symbol` from `mask`.
    pub fn get_exclusion_mask(&self, mask: &mut BoundedBitset, i_symbol: usize) {
        let mut excluded = BoundedBitset::new(mask.len());
        for pattern in &self.patterns {
            pattern.get_inclusion_mask(&mut excluded, i_symbol);
        }
        mask.and_not(&excluded);
    }
}

impl From<Vec<RePattern>> for RePatternList {
    fn from(patterns: Vec<RePattern>) -> Self {
        Self { patterns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inclusion_expands_prbs() {
        let pattern = RePattern::full_prb(1, 3, &[0, 2]).unwrap();

        let mut mask = BoundedBitset::new(48);
        pattern.get_inclusion_mask(&mut mask, 0);
        assert_eq!(mask.count(), 24);
        assert_eq!(mask.find_lowest(), Some(12));
        assert_eq!(mask.find_highest(), Some(35));
    }

    #[test]
    fn test_symbol_gating() {
        let pattern = RePattern::full_prb(0, 1, &[3]).unwrap();

        let mut mask = BoundedBitset::new(12);
        pattern.get_inclusion_mask(&mut mask, 0);
        assert!(mask.none());

        pattern.get_inclusion_mask(&mut mask, 3);
        assert_eq!(mask.count(), 12);
    }

    #[test]
    fn test_re_mask_selects_within_each_prb() {
        let mut re_mask = BoundedBitset::new(NRE);
        re_mask.set(0);
        re_mask.set(6);
        let pattern = RePattern::new(0, 2, re_mask, symbol_mask_from(&[0])).unwrap();

        let mut mask = BoundedBitset::new(24);
        pattern.get_inclusion_mask(&mut mask, 0);
        assert_eq!(mask.iter_ones().collect::<Vec<_>>(), vec![0, 6, 12, 18]);
    }

    #[test]
    fn test_list_resolution_subtracts_reserved() {
        let mut allocation = RePatternList::new();
        allocation.push(RePattern::full_prb(0, 1, &[0]).unwrap());

        // Reserve the odd subcarriers of the same PRB.
        let mut odd = BoundedBitset::new(NRE);
        for re in (1..NRE).step_by(2) {
            odd.set(re);
        }
        let mut reserved = RePatternList::new();
        reserved.push(RePattern::new(0, 1, odd, symbol_mask_from(&[0])).unwrap());

        let mut mask = BoundedBitset::new(12);
        allocation.get_inclusion_mask(&mut mask, 0);
        reserved.get_exclusion_mask(&mut mask, 0);
        assert_eq!(mask.count(), 6);
        assert_eq!(mask.iter_ones().collect::<Vec<_>>(), vec![0, 2, 4, 6, 8, 10]);
    }

    #[test]
    fn test_pattern_exclusion_clears_bits() {
        let pattern = RePattern::full_prb(0, 1, &[0]).unwrap();

        let mut mask = BoundedBitset::new(24);
        mask.set_range(0, 24);
        pattern.get_exclusion_mask(&mut mask, 0);
        assert_eq!(mask.count(), 12);
        assert_eq!(mask.find_lowest(), Some(12));
    }

    #[test]
    fn test_pattern_beyond_mask_is_clipped() {
        let pattern = RePattern::full_prb(0, 4, &[0]).unwrap();

        let mut mask = BoundedBitset::new(24);
        pattern.get_inclusion_mask(&mut mask, 0);
        assert_eq!(mask.count(), 24);
    }

    #[test]
    fn test_invalid_prb_range_is_rejected() {
        assert!(RePattern::full_prb(3, 3, &[0]).is_err());
        assert!(RePattern::full_prb(0, MAX_RB + 1, &[0]).is_err());
    }
}
