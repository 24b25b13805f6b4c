//! Property-Based Tests for the Envelope Codec and Key Convention
//!
//! Uses proptest to verify the invariants the tiers rely on across a wide
//! range of inputs.
//!
//! # Test Properties
//!
//! 1. **Codec Roundtrip**: decode(encode(envelope)) preserves every field
//! 2. **Corruption Detection**: any flipped payload byte or truncation fails
//! 3. **Partition Matching**: token equality, never substring containment
//! 4. **Placement Monotonicity**: bigger values never route to a faster tier

#![cfg(test)]

use std::time::Duration;

use bytes::Bytes;
use proptest::prelude::*;

use super::entry::{Envelope, ENVELOPE_OVERHEAD};
use super::key::CacheKey;
use super::strategy::PlacementPolicy;
use super::tier::TierKind;

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for namespace strings (no ':' allowed)
fn namespace_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,7}"
}

/// Strategy for underscore-free name tokens
fn token_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,6}"
}

/// Strategy for logical names built from 1-4 underscore-joined tokens
fn name_tokens_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(token_strategy(), 1..=4)
}

/// Strategy for payloads of assorted sizes
fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

/// Tier order for monotonicity checks
fn tier_rank(kind: TierKind) -> u8 {
    match kind {
        TierKind::Fast => 0,
        TierKind::Durable => 1,
        TierKind::Bulk => 2,
    }
}

// =============================================================================
// Envelope Codec Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Encoding then decoding preserves every envelope field.
    #[test]
    fn prop_envelope_roundtrip(
        namespace in namespace_strategy(),
        tokens in name_tokens_strategy(),
        value in value_strategy(),
        ttl_secs in 1u64..86_400,
    ) {
        let key = CacheKey::new(&namespace, tokens.join("_"));
        let env = Envelope::new(&key, Bytes::from(value.clone()), Duration::from_secs(ttl_secs));

        let encoded = env.encode();
        prop_assert_eq!(encoded.len(), env.encoded_len());
        prop_assert_eq!(encoded.len(), ENVELOPE_OVERHEAD + key.full().len() + value.len());

        let decoded = Envelope::decode(&encoded)?;
        prop_assert_eq!(decoded.key(), key.full());
        prop_assert_eq!(decoded.value().as_ref(), value.as_slice());
        prop_assert_eq!(decoded.created_at(), env.created_at());
        prop_assert_eq!(decoded.expires_at(), env.expires_at());
        prop_assert!(!decoded.is_pointer());
    }

    /// Property: Pointer stubs survive the roundtrip with the flag intact.
    #[test]
    fn prop_pointer_roundtrip(
        namespace in namespace_strategy(),
        tokens in name_tokens_strategy(),
        ttl_secs in 1u64..86_400,
    ) {
        let key = CacheKey::new(&namespace, tokens.join("_"));
        let env = Envelope::pointer(&key, Duration::from_secs(ttl_secs));

        let decoded = Envelope::decode(&env.encode())?;
        prop_assert!(decoded.is_pointer());
        prop_assert!(decoded.value().is_empty());
    }

    /// Property: Flipping any single payload byte is detected as corruption.
    /// The hash mix is a per-byte bijection, so divergence never cancels out.
    #[test]
    fn prop_payload_corruption_detected(
        namespace in namespace_strategy(),
        tokens in name_tokens_strategy(),
        value in prop::collection::vec(any::<u8>(), 1..2048),
        flip_at in any::<prop::sample::Index>(),
    ) {
        let key = CacheKey::new(&namespace, tokens.join("_"));
        let env = Envelope::new(&key, Bytes::from(value.clone()), Duration::from_secs(60));

        let mut encoded = env.encode().to_vec();
        // The payload occupies the last value.len() bytes
        let value_start = encoded.len() - value.len();
        let pos = value_start + flip_at.index(value.len());
        encoded[pos] ^= 0xFF;

        prop_assert!(Envelope::decode(&encoded).is_err());
    }

    /// Property: Any strict prefix of an encoded envelope fails to decode.
    #[test]
    fn prop_truncation_detected(
        namespace in namespace_strategy(),
        tokens in name_tokens_strategy(),
        value in value_strategy(),
        cut in any::<prop::sample::Index>(),
    ) {
        let key = CacheKey::new(&namespace, tokens.join("_"));
        let env = Envelope::new(&key, Bytes::from(value), Duration::from_secs(60));

        let encoded = env.encode();
        let keep = cut.index(encoded.len());

        prop_assert!(Envelope::decode(&encoded[..keep]).is_err());
    }
}

// =============================================================================
// Key Convention Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: A partition matches exactly when it equals a whole token.
    #[test]
    fn prop_partition_is_token_equality(
        namespace in namespace_strategy(),
        tokens in name_tokens_strategy(),
        partition in token_strategy(),
    ) {
        let key = CacheKey::new(&namespace, tokens.join("_"));
        let expected = tokens.iter().any(|t| *t == partition);
        prop_assert_eq!(key.matches_partition(&partition), expected);
    }

    /// Property: Partitions sharing digits never cross-match; "42" must not
    /// invalidate "142" and vice versa.
    #[test]
    fn prop_partition_rejects_substrings(
        namespace in namespace_strategy(),
        id in "[1-9][0-9]{0,5}",
        prefix_digit in "[1-9]",
        suffix_digit in "[0-9]",
    ) {
        let key = CacheKey::new(&namespace, format!("items_{}_page1", id));
        prop_assert!(key.matches_partition(&id));

        let padded_front = format!("{}{}", prefix_digit, id);
        let padded_back = format!("{}{}", id, suffix_digit);
        prop_assert!(!key.matches_partition(&padded_front));
        prop_assert!(!key.matches_partition(&padded_back));
    }

    /// Property: Lock keys derive predictably and are invisible to
    /// partition matching.
    #[test]
    fn prop_lock_keys_excluded(
        namespace in namespace_strategy(),
        tokens in name_tokens_strategy(),
    ) {
        let key = CacheKey::new(&namespace, tokens.join("_"));
        let lock = key.lock_key();

        prop_assert!(lock.is_lock());
        prop_assert!(!key.is_lock());
        prop_assert!(lock.full().starts_with(key.full()));
        for token in &tokens {
            prop_assert!(!lock.matches_partition(token));
        }
    }

    /// Property: Keys compare equal exactly when their full strings do,
    /// regardless of hash behavior.
    #[test]
    fn prop_key_equality_is_string_equality(
        a in "[a-z0-9:_.]{1,32}",
        b in "[a-z0-9:_.]{1,32}",
    ) {
        let key_a = CacheKey::from_full(a.clone());
        let key_b = CacheKey::from_full(b.clone());
        prop_assert_eq!(key_a == key_b, a == b);
    }

    /// Property: Shard selection stays in range for any power-of-two count.
    #[test]
    fn prop_shard_index_in_range(
        namespace in namespace_strategy(),
        tokens in name_tokens_strategy(),
        exponent in 0u32..12,
    ) {
        let key = CacheKey::new(&namespace, tokens.join("_"));
        let count = 1usize << exponent;
        prop_assert!(key.shard_index(count) < count);
    }
}

// =============================================================================
// Placement Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: A larger value never routes to a faster tier.
    #[test]
    fn prop_placement_monotonic(
        fast_max in 1u64..100_000,
        headroom in 1u64..1_000_000,
        size_a in 0u64..10_000_000,
        size_b in 0u64..10_000_000,
    ) {
        let policy = PlacementPolicy::new(fast_max, fast_max + headroom);
        policy.validate()?;

        let (small, large) = if size_a <= size_b { (size_a, size_b) } else { (size_b, size_a) };
        prop_assert!(tier_rank(policy.tier_for(small)) <= tier_rank(policy.tier_for(large)));
    }

    /// Property: Thresholds are inclusive on the smaller tier's side.
    #[test]
    fn prop_placement_thresholds_inclusive(
        fast_max in 1u64..100_000,
        headroom in 1u64..1_000_000,
    ) {
        let policy = PlacementPolicy::new(fast_max, fast_max + headroom);

        prop_assert_eq!(policy.tier_for(0), TierKind::Fast);
        prop_assert_eq!(policy.tier_for(fast_max), TierKind::Fast);
        prop_assert_eq!(policy.tier_for(fast_max + 1), TierKind::Durable);
        prop_assert_eq!(policy.tier_for(fast_max + headroom), TierKind::Durable);
        prop_assert_eq!(policy.tier_for(fast_max + headroom + 1), TierKind::Bulk);
    }
}
