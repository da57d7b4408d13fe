use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use treerank_core::{key_between, JitteredKeys, KeyGenerator, RankKey, DEFAULT_JITTER_DIGITS};

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Valid keys around the middle of the key space: heads `V`..`e`, up to four fraction digits.
fn rank_key() -> impl Strategy<Value = RankKey> {
    let heads = prop::sample::select(vec!['V', 'W', 'X', 'Y', 'Z', 'a', 'b', 'c', 'd', 'e']);
    let fraction = prop::option::of((prop::collection::vec(0usize..62, 0..4), 1usize..62));
    (heads, prop::collection::vec(0usize..62, 5), fraction).prop_map(|(head, int, fraction)| {
        let width = if head >= 'a' {
            head as usize - 'a' as usize + 1
        } else {
            'Z' as usize - head as usize + 1
        };
        let mut key = String::from(head);
        key.extend(int.iter().take(width).map(|&d| ALPHABET[d] as char));
        if let Some((digits, last)) = fraction {
            key.extend(digits.iter().map(|&d| ALPHABET[d] as char));
            key.push(ALPHABET[last] as char);
        }
        RankKey::parse(key).unwrap()
    })
}

proptest! {
    #[test]
    fn generated_key_lies_strictly_between(a in rank_key(), b in rank_key(), seed in any::<u64>()) {
        prop_assume!(a != b);
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let mut rng = StdRng::seed_from_u64(seed);
        let k = key_between(Some(&lo), Some(&hi), &mut rng, DEFAULT_JITTER_DIGITS).unwrap();
        prop_assert!(lo < k && k < hi, "{} not in ({}, {})", k, lo, hi);
    }

    #[test]
    fn one_sided_generation_respects_its_bound(a in rank_key(), seed in any::<u64>()) {
        let mut keys = JitteredKeys::with_rng(StdRng::seed_from_u64(seed), DEFAULT_JITTER_DIGITS);
        let after = keys.generate(Some(&a), None).unwrap();
        let before = keys.generate(None, Some(&a)).unwrap();
        prop_assert!(after > a);
        prop_assert!(before < a);
    }

    #[test]
    fn reversed_bounds_are_rejected(a in rank_key(), b in rank_key()) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let mut rng = StdRng::seed_from_u64(0);
        prop_assert!(key_between(Some(&hi), Some(&lo), &mut rng, DEFAULT_JITTER_DIGITS).is_err());
    }

    #[test]
    fn batches_are_sorted_and_bounded(
        a in rank_key(),
        b in rank_key(),
        n in 0usize..40,
        seed in any::<u64>(),
    ) {
        prop_assume!(a != b);
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let mut keys = JitteredKeys::with_rng(StdRng::seed_from_u64(seed), DEFAULT_JITTER_DIGITS);
        let batch = keys.generate_n(Some(&lo), Some(&hi), n).unwrap();
        prop_assert_eq!(batch.len(), n);
        prop_assert!(batch.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(batch.iter().all(|k| &lo < k && k < &hi));
    }

    #[test]
    fn repeated_subdivision_stays_ordered(steps in prop::collection::vec(any::<bool>(), 1..60), seed in any::<u64>()) {
        let mut keys = JitteredKeys::with_rng(StdRng::seed_from_u64(seed), DEFAULT_JITTER_DIGITS);
        let mut lo = keys.generate(None, None).unwrap();
        let mut hi = keys.generate(Some(&lo), None).unwrap();
        for go_low in steps {
            let k = keys.generate(Some(&lo), Some(&hi)).unwrap();
            prop_assert!(lo < k && k < hi);
            if go_low { hi = k } else { lo = k }
        }
    }
}
