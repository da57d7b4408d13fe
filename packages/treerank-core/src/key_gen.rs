use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::rank_key::{
    decrement_integer, digit_value, increment_integer, RankKey, BASE, DIGITS, SMALLEST_INTEGER,
};

/// Random digits appended to every generated key (except the fixed default).
pub const DEFAULT_JITTER_DIGITS: usize = 4;
pub const MAX_JITTER_DIGITS: usize = 8;

/// Source of rank keys for the move transaction.
pub trait KeyGenerator {
    /// A key strictly between `prev` and `next`; an absent bound is open.
    fn generate(&mut self, prev: Option<&RankKey>, next: Option<&RankKey>) -> Result<RankKey>;

    /// `n` increasing keys strictly inside the bounds.
    fn generate_n(
        &mut self,
        prev: Option<&RankKey>,
        next: Option<&RankKey>,
        n: usize,
    ) -> Result<Vec<RankKey>> {
        check_order(prev, next)?;
        let mut out = Vec::with_capacity(n);
        match (prev, next) {
            (_, None) => {
                let mut last = prev.cloned();
                for _ in 0..n {
                    let key = self.generate(last.as_ref(), None)?;
                    out.push(key.clone());
                    last = Some(key);
                }
            }
            (None, Some(_)) => {
                let mut first = next.cloned();
                for _ in 0..n {
                    let key = self.generate(None, first.as_ref())?;
                    out.push(key.clone());
                    first = Some(key);
                }
                out.reverse();
            }
            (Some(a), Some(b)) => fill_between(self, a, b, n, &mut out)?,
        }
        Ok(out)
    }
}

/// Bisects `(a, b)` so the keys stay balanced instead of crowding one end.
fn fill_between<G: KeyGenerator + ?Sized>(
    keys: &mut G,
    a: &RankKey,
    b: &RankKey,
    n: usize,
    out: &mut Vec<RankKey>,
) -> Result<()> {
    if n == 0 {
        return Ok(());
    }
    let left = n / 2;
    let mid = keys.generate(Some(a), Some(b))?;
    fill_between(keys, a, &mid, left, out)?;
    out.push(mid.clone());
    fill_between(keys, &mid, b, n - left - 1, out)
}

impl<G: KeyGenerator + ?Sized> KeyGenerator for &mut G {
    fn generate(&mut self, prev: Option<&RankKey>, next: Option<&RankKey>) -> Result<RankKey> {
        (**self).generate(prev, next)
    }
}

/// Fractional-index generator that jitters the tail of every key so independent callers racing
/// for the same gap rarely pick the same key.
#[derive(Clone, Debug)]
pub struct JitteredKeys<R = StdRng> {
    rng: R,
    jitter_digits: usize,
}

impl JitteredKeys<StdRng> {
    /// Seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy(), DEFAULT_JITTER_DIGITS)
    }
}

impl Default for JitteredKeys<StdRng> {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl<R: Rng> JitteredKeys<R> {
    pub fn with_rng(rng: R, jitter_digits: usize) -> Self {
        Self {
            rng,
            jitter_digits: jitter_digits.clamp(1, MAX_JITTER_DIGITS),
        }
    }

    pub fn jitter_digits(&self) -> usize {
        self.jitter_digits
    }
}

impl<R: Rng> KeyGenerator for JitteredKeys<R> {
    fn generate(&mut self, prev: Option<&RankKey>, next: Option<&RankKey>) -> Result<RankKey> {
        key_between(prev, next, &mut self.rng, self.jitter_digits)
    }
}

/// One-off generation with a thread-local entropy source.
pub fn generate(prev: Option<&RankKey>, next: Option<&RankKey>) -> Result<RankKey> {
    key_between(prev, next, &mut rand::thread_rng(), DEFAULT_JITTER_DIGITS)
}

fn check_order(prev: Option<&RankKey>, next: Option<&RankKey>) -> Result<()> {
    match (prev, next) {
        (Some(a), Some(b)) if a >= b => Err(Error::InvalidBounds {
            prev: a.to_string(),
            next: b.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Core generation routine shared by every generator.
pub fn key_between<R: Rng + ?Sized>(
    prev: Option<&RankKey>,
    next: Option<&RankKey>,
    rng: &mut R,
    jitter_digits: usize,
) -> Result<RankKey> {
    check_order(prev, next)?;
    let jitter_digits = jitter_digits.clamp(1, MAX_JITTER_DIGITS);

    let key = match (prev, next) {
        (None, None) => return Ok(RankKey::default_key()),
        (Some(a), None) => {
            let (ia, fa) = a.split();
            match increment_integer(ia) {
                Some(i) => i + &jitter(rng, jitter_digits),
                None => ia.to_string() + &jittered_midpoint(fa, None, rng, jitter_digits),
            }
        }
        (None, Some(b)) => {
            let (ib, fb) = b.split();
            match decrement_integer(ib) {
                Some(i) => i + &jitter(rng, jitter_digits),
                // Only the smallest integer cannot be decremented; its keys always carry a
                // fraction.
                None => {
                    debug_assert_eq!(ib, SMALLEST_INTEGER);
                    ib.to_string() + &jittered_midpoint("", Some(fb), rng, jitter_digits)
                }
            }
        }
        (Some(a), Some(b)) => {
            let (ia, fa) = a.split();
            let (ib, fb) = b.split();
            if ia == ib {
                ia.to_string() + &jittered_midpoint(fa, Some(fb), rng, jitter_digits)
            } else {
                match increment_integer(ia) {
                    // Distinct integer parts never prefix one another, so any tail stays below b.
                    Some(i) if i != ib => i + &jitter(rng, jitter_digits),
                    _ => ia.to_string() + &jittered_midpoint(fa, None, rng, jitter_digits),
                }
            }
        }
    };

    let key = RankKey::from_validated(key);
    if prev.is_some_and(|a| &key <= a) || next.is_some_and(|b| &key >= b) {
        return Err(Error::InconsistentState(format!(
            "generated key {key} escaped bounds ({prev:?}, {next:?})"
        )));
    }
    tracing::trace!(?prev, ?next, %key, "generated rank key");
    Ok(key)
}

fn jitter<R: Rng + ?Sized>(rng: &mut R, digits: usize) -> String {
    let mut out = String::with_capacity(digits);
    for i in 0..digits {
        // The last digit is never `0`, keeping the fraction canonical.
        let lo = if i + 1 == digits { 1 } else { 0 };
        out.push(DIGITS[rng.gen_range(lo..BASE) as usize] as char);
    }
    out
}

/// Fraction strictly between `a` and `b` (open above when `b` is `None`).
///
/// Picks the shortest precision at which a window of at least `62^jitter_digits` values,
/// centred on the exact midpoint and one eighth of the gap wide, fits inside the gap, then
/// draws from that window. Keys stay close to the middle, so repeated insertion into one gap
/// halves it at a steady rate instead of crowding either bound.
fn jittered_midpoint<R: Rng + ?Sized>(
    a: &str,
    b: Option<&str>,
    rng: &mut R,
    jitter_digits: usize,
) -> String {
    let base = u64::from(BASE);
    let lo = to_digits(a);
    let hi = b.map(to_digits);
    let digit = |v: &[u8], i: usize| v.get(i).copied().map_or(0, u64::from);
    let min_span = 8 * base.pow(jitter_digits as u32);

    // Gap width in units of 62^-precision, measured on the truncated bounds.
    let mut diff = 0u64;
    let mut span = 0u64;
    let mut precision = 0;
    while span < min_span {
        let h = hi.as_deref().map_or(base - 1, |h| digit(h, precision));
        diff = diff * base + h - digit(&lo[..], precision);
        precision += 1;
        // An upper bound with digits below this precision admits its own truncation.
        let hi_extends = hi
            .as_deref()
            .map_or(true, |h| h.iter().skip(precision).any(|&d| d != 0));
        span = diff + u64::from(hi_extends);
    }

    let (mid, reach) = (span / 2, span / 16);
    let mut offset = rng.gen_range(mid - reach..=mid + reach);
    let mut out = vec![0u8; precision];
    let mut carry = 0;
    for i in (0..precision).rev() {
        let v = digit(&lo[..], i) + offset % base + carry;
        offset /= base;
        out[i] = (v % base) as u8;
        carry = v / base;
    }
    // The last digit is never `0`, keeping the fraction canonical.
    if let Some(last) = out.last_mut().filter(|d| **d == 0) {
        *last = 1;
    }
    out.iter().map(|d| DIGITS[*d as usize] as char).collect()
}

fn to_digits(s: &str) -> Vec<u8> {
    s.bytes().filter_map(digit_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn key(s: &str) -> RankKey {
        RankKey::parse(s).unwrap()
    }

    fn seeded(seed: u64) -> JitteredKeys<StdRng> {
        JitteredKeys::with_rng(StdRng::seed_from_u64(seed), DEFAULT_JITTER_DIGITS)
    }

    #[test]
    fn empty_group_gets_the_default_key() {
        let mut keys = seeded(1);
        assert_eq!(keys.generate(None, None).unwrap().as_str(), "a0");
        assert_eq!(generate(None, None).unwrap().as_str(), "a0");
    }

    #[test]
    fn open_bounds_extend_the_integer_part() {
        let mut keys = seeded(2);
        let after = keys.generate(Some(&key("a0")), None).unwrap();
        assert!(after > key("a0"));
        assert!(after.as_str().starts_with("a1"));

        let before = keys.generate(None, Some(&key("a0"))).unwrap();
        assert!(before < key("a0"));
        assert!(before.as_str().starts_with("Zz"));
    }

    #[test]
    fn out_of_order_bounds_are_rejected() {
        let mut keys = seeded(3);
        let err = keys.generate(Some(&key("a1")), Some(&key("a0"))).unwrap_err();
        assert!(matches!(err, Error::InvalidBounds { .. }));
        let err = keys.generate(Some(&key("a1")), Some(&key("a1"))).unwrap_err();
        assert!(matches!(err, Error::InvalidBounds { .. }));
    }

    #[test]
    fn same_bounds_yield_distinct_keys() {
        let (a0, a1) = (key("a0"), key("a1"));
        let k1 = generate(Some(&a0), Some(&a1)).unwrap();
        let k2 = generate(Some(&a0), Some(&a1)).unwrap();
        for k in [&k1, &k2] {
            assert!(&a0 < k && k < &a1, "{k} outside (a0, a1)");
        }
        assert_ne!(k1, k2);
    }

    #[test]
    fn thousand_racing_callers_rarely_collide() {
        let (a0, a1) = (key("a0"), key("a1"));
        let unique: HashSet<RankKey> = (0..1000)
            .map(|_| JitteredKeys::from_entropy().generate(Some(&a0), Some(&a1)).unwrap())
            .collect();
        assert!(unique.len() >= 999, "only {} unique keys", unique.len());
    }

    #[test]
    fn adjacent_bounds_extend_precision() {
        let mut keys = seeded(4);
        let (lo, hi) = (key("a0V"), key("a0W"));
        for _ in 0..100 {
            let k = keys.generate(Some(&lo), Some(&hi)).unwrap();
            assert!(lo < k && k < hi);
            assert!(k.as_str().starts_with("a0V"));
        }
    }

    #[test]
    fn alternating_insertions_in_the_narrowest_gap_stay_short() {
        let mut keys = seeded(5);
        let mut lo = key("a0");
        let mut hi = keys.generate(Some(&lo), Some(&key("a1"))).unwrap();
        let mut longest = 0;
        for step in 0..100 {
            let k = keys.generate(Some(&lo), Some(&hi)).unwrap();
            assert!(lo < k && k < hi);
            longest = longest.max(k.len());
            if step % 2 == 0 {
                lo = k;
            } else {
                hi = k;
            }
        }
        assert!(longest < 25, "key grew to {longest} chars");
    }

    #[test]
    fn narrowest_gap_growth_holds_across_seeds() {
        for seed in 0..200 {
            let mut keys = seeded(seed);
            let mut lo = key("a0");
            let mut hi = keys.generate(Some(&lo), Some(&key("a1"))).unwrap();
            for step in 0..100 {
                let k = keys.generate(Some(&lo), Some(&hi)).unwrap();
                assert!(k.len() < 25, "seed {seed}: {k} after {step} insertions");
                if step % 2 == 0 {
                    lo = k;
                } else {
                    hi = k;
                }
            }
        }
    }

    #[test]
    fn keys_land_near_the_middle_of_the_gap() {
        let mut keys = seeded(12);
        let (lo, hi) = (key("a0"), key("a1"));
        for _ in 0..200 {
            let k = keys.generate(Some(&lo), Some(&hi)).unwrap();
            // Middle of (a0, a1) is `a0V`; the window is an eighth of the gap wide.
            assert!(k > key("a0R") && k < key("a0Z"), "{k} strayed from the midpoint");
        }
    }

    #[test]
    fn jitter_width_is_clamped() {
        let rng = || StdRng::seed_from_u64(13);
        assert_eq!(JitteredKeys::with_rng(rng(), 0).jitter_digits(), 1);
        assert_eq!(JitteredKeys::with_rng(rng(), 99).jitter_digits(), MAX_JITTER_DIGITS);
        let mut narrow = JitteredKeys::with_rng(rng(), 1);
        let k = narrow.generate(Some(&key("a0")), Some(&key("a1"))).unwrap();
        assert!(k.len() < seeded(13).generate(Some(&key("a0")), Some(&key("a1"))).unwrap().len());
    }

    #[test]
    fn head_insertion_sorts_in_reverse_order() {
        let mut keys = seeded(6);
        let mut inserted = Vec::new();
        let mut head: Option<RankKey> = None;
        for _ in 0..200 {
            let k = keys.generate(None, head.as_ref()).unwrap();
            inserted.push(k.clone());
            head = Some(k);
        }
        let mut sorted = inserted.clone();
        sorted.sort();
        inserted.reverse();
        assert_eq!(sorted, inserted);
    }

    #[test]
    fn largest_integer_falls_back_to_fraction() {
        let mut keys = seeded(7);
        let top = key("zzzzzzzzzzzzzzzzzzzzzzzzzzz");
        let k = keys.generate(Some(&top), None).unwrap();
        assert!(k > top);
        assert!(k.as_str().starts_with(top.as_str()));
    }

    #[test]
    fn smallest_integer_falls_back_to_fraction() {
        let mut keys = seeded(8);
        let bottom = key("A000000000000000000000000001");
        let k = keys.generate(None, Some(&bottom)).unwrap();
        assert!(k < bottom);
        assert!(k.as_str().starts_with(SMALLEST_INTEGER));
    }

    #[test]
    fn generate_n_is_sorted_and_bounded() {
        let mut keys = seeded(9);
        let (a, b) = (key("a0"), key("a1"));
        let between = keys.generate_n(Some(&a), Some(&b), 17).unwrap();
        assert_eq!(between.len(), 17);
        assert!(between.windows(2).all(|w| w[0] < w[1]));
        assert!(between.first().unwrap() > &a && between.last().unwrap() < &b);

        let fresh = keys.generate_n(None, None, 5).unwrap();
        assert_eq!(fresh[0].as_str(), "a0");
        assert!(fresh.windows(2).all(|w| w[0] < w[1]));

        let below = keys.generate_n(None, Some(&a), 4).unwrap();
        assert!(below.windows(2).all(|w| w[0] < w[1]));
        assert!(below.last().unwrap() < &a);
    }
}
