use sha1::{Digest, Sha1};

use crate::{AttributeValue, Context, Kind, Reference};

const BUCKET_SCALE: f64 = 0x0FFF_FFFF_FFFF_FFFF_u64 as f64;

/// What precedes the attribute value in the bucketing hash input.
#[derive(Clone, Copy, Debug)]
pub(crate) enum BucketPrefix<'a> {
    /// The flag or segment key and its salt.
    KeyAndSalt(&'a str, &'a str),
    /// A rollout seed, which replaces key and salt entirely.
    Seed(i64),
}

impl<'a> BucketPrefix<'a> {
    pub(crate) fn new(key: &'a str, salt: &'a str, seed: Option<i64>) -> Self {
        match seed {
            Some(seed) => BucketPrefix::Seed(seed),
            None => BucketPrefix::KeyAndSalt(key, salt),
        }
    }

    fn write(&self, hash: &mut Sha1) {
        match self {
            BucketPrefix::KeyAndSalt(key, salt) => {
                hash.update(key.as_bytes());
                hash.update(b".");
                hash.update(salt.as_bytes());
            }
            BucketPrefix::Seed(seed) => hash.update(seed.to_string().as_bytes()),
        }
    }
}

/// Places `context` in the rollout space [0, 1).
///
/// `bucket_by` is read from the part of the context whose kind is `context_kind`. The second
/// element of the result reports whether the context has that kind at all; experiments use it
/// to leave such contexts out of the experiment.
///
/// Values that cannot be bucketed (anything but a string or an integral number, a missing
/// attribute, an invalid reference or a missing kind) land in bucket `0.0`. Unless
/// `is_experiment` is set, a secondary key for the kind is appended to the hash input.
///
/// The hash is SHA-1 of `<prefix>.<value>[.<secondary>]`, where the prefix is the seed when
/// one is given and `<key>.<salt>` otherwise. Its first 15 hex digits are divided by
/// `0xFFFFFFFFFFFFFFF`; every SDK computes exactly this, so the truncation must not change.
pub fn bucket(
    context: &Context,
    key: &str,
    bucket_by: &Reference,
    salt: &str,
    is_experiment: bool,
    context_kind: &Kind,
    seed: Option<i64>,
) -> (f64, bool) {
    bucket_with_prefix(
        context,
        BucketPrefix::new(key, salt, seed),
        bucket_by,
        is_experiment,
        context_kind,
    )
}

pub(crate) fn bucket_with_prefix(
    context: &Context,
    prefix: BucketPrefix,
    bucket_by: &Reference,
    is_experiment: bool,
    context_kind: &Kind,
) -> (f64, bool) {
    let Some(kind_context) = context.as_kind(context_kind) else {
        return (0.0, false);
    };
    if !bucket_by.is_valid() {
        return (0.0, true);
    }

    let value = kind_context
        .get_value(bucket_by)
        .as_ref()
        .and_then(AttributeValue::as_bucketable);
    let secondary = if is_experiment {
        None
    } else {
        kind_context.secondary(context_kind)
    };

    let bucket = value
        .and_then(|value| hash_to_unit(prefix, &value, secondary))
        .unwrap_or(0.0);
    (bucket, true)
}

fn hash_to_unit(prefix: BucketPrefix, value: &str, secondary: Option<&str>) -> Option<f64> {
    let mut hash = Sha1::new();
    prefix.write(&mut hash);
    hash.update(b".");
    hash.update(value.as_bytes());
    if let Some(secondary) = secondary {
        hash.update(b".");
        hash.update(secondary.as_bytes());
    }

    let hex = base16ct::lower::encode_string(&hash.finalize());
    let truncated = u64::from_str_radix(hex.get(..15)?, 16).ok()?; // 15 digits, not 16
    Some(truncated as f64 / BUCKET_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContextBuilder;
    use proptest::prelude::*;
    use test_case::test_case;

    fn key_ref() -> Reference {
        Reference::new("key")
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-12,
            "expected bucket {} but got {}",
            expected,
            actual
        );
    }

    #[test_case("userKeyA", 0.4215758743392494)]
    #[test_case("userKeyB", 0.6708484965703435)]
    #[test_case("userKeyC", 0.1034310617276969)]
    fn buckets_by_key_and_salt(key: &str, expected: f64) {
        let context = ContextBuilder::new(key).build().unwrap();
        let (bucket, found) = bucket(&context, "hashKey", &key_ref(), "saltyA", false, &Kind::user(), None);
        assert!(found);
        assert_close(bucket, expected);
    }

    #[test]
    fn integer_attributes_are_bucketable() {
        let context = ContextBuilder::new("userKey")
            .set_float("intAttr", 33_333.0)
            .build()
            .unwrap();
        let (bucket, _) = bucket(
            &context,
            "hashKey",
            &Reference::new("intAttr"),
            "saltyA",
            false,
            &Kind::user(),
            None,
        );
        assert_close(bucket, 0.5477142345861467);
    }

    #[test_case(AttributeValue::Number(999.999); "non integral number")]
    #[test_case(AttributeValue::Bool(true); "boolean")]
    #[test_case(AttributeValue::from(vec!["a"]); "array")]
    fn unbucketable_attributes_land_in_zero(value: AttributeValue) {
        let context = ContextBuilder::new("userKey")
            .set_value("attr", value)
            .build()
            .unwrap();
        let result = bucket(
            &context,
            "hashKey",
            &Reference::new("attr"),
            "saltyA",
            false,
            &Kind::user(),
            None,
        );
        assert_eq!(result, (0.0, true));
    }

    #[test]
    fn missing_kind_lands_in_zero_and_is_reported() {
        let context = ContextBuilder::new("userKeyA").build().unwrap();
        let org = Kind::try_from("org").unwrap();
        let result = bucket(&context, "hashKey", &key_ref(), "saltyA", false, &org, None);
        assert_eq!(result, (0.0, false));
    }

    #[test]
    fn invalid_reference_lands_in_zero() {
        let context = ContextBuilder::new("userKeyA").build().unwrap();
        let result = bucket(
            &context,
            "hashKey",
            &Reference::new("//"),
            "saltyA",
            false,
            &Kind::user(),
            None,
        );
        assert_eq!(result, (0.0, true));
    }

    #[test]
    fn bucketing_uses_the_requested_kind() {
        let context = crate::MultiContextBuilder::new()
            .add_context(ContextBuilder::new("userKeyA").build().unwrap())
            .add_context(ContextBuilder::new("orgKeyA").kind("org").build().unwrap())
            .build()
            .unwrap();
        let org = Kind::try_from("org").unwrap();
        let (bucket, found) = bucket(&context, "hashKey", &key_ref(), "saltyA", false, &org, None);
        assert!(found);
        assert_close(bucket, 0.947931676559712);
    }

    #[test]
    fn secondary_key_changes_bucket_unless_experiment() {
        let context = ContextBuilder::new("userKeyA")
            .secondary("sec1")
            .build()
            .unwrap();

        let (rollout_bucket, _) = bucket(&context, "hashKey", &key_ref(), "saltyA", false, &Kind::user(), None);
        assert_close(rollout_bucket, 0.3815870773098201);

        let (experiment_bucket, _) = bucket(&context, "hashKey", &key_ref(), "saltyA", true, &Kind::user(), None);
        assert_close(experiment_bucket, 0.4215758743392494);
    }

    #[test]
    fn seed_replaces_key_and_salt() {
        let context = ContextBuilder::new("userKeyA").build().unwrap();
        let (a, _) = bucket(&context, "flagA", &key_ref(), "saltA", false, &Kind::user(), Some(61));
        let (b, _) = bucket(&context, "flagB", &key_ref(), "saltB", false, &Kind::user(), Some(61));
        assert_eq!(a, b);
        assert_close(a, 0.0980120652476667);

        let (unseeded, _) = bucket(&context, "flagA", &key_ref(), "saltA", false, &Kind::user(), None);
        assert_close(unseeded, 0.696868586472145);
    }

    proptest! {
        #[test]
        fn buckets_are_deterministic_and_in_range(
            key in "[a-zA-Z0-9]{1,32}",
            flag_key in "[a-z]{1,16}",
            salt in "[a-z]{0,8}",
            seed in proptest::option::of(any::<i64>()),
        ) {
            let context = ContextBuilder::new(key).build().unwrap();
            let first = bucket(&context, &flag_key, &key_ref(), &salt, false, &Kind::user(), seed);
            let second = bucket(&context, &flag_key, &key_ref(), &salt, false, &Kind::user(), seed);
            prop_assert_eq!(first, second);
            prop_assert!(first.0 >= 0.0 && first.0 <= 1.0);
        }

        #[test]
        fn unrelated_attributes_do_not_move_the_bucket(extra in "[a-z]{0,12}") {
            let plain = ContextBuilder::new("userKeyA").build().unwrap();
            let decorated = ContextBuilder::new("userKeyA")
                .set_string("unrelated", extra)
                .build()
                .unwrap();
            prop_assert_eq!(
                bucket(&plain, "hashKey", &key_ref(), "saltyA", false, &Kind::user(), None),
                bucket(&decorated, "hashKey", &key_ref(), "saltyA", false, &Kind::user(), None)
            );
        }
    }
}
