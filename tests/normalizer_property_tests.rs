//! Property-based tests for body normalization and retry arithmetic.

use std::time::Duration;

use bytes::Bytes;
use proptest::prelude::*;

use restbase::normalizer::{encode_form, normalize};
use restbase::{FailureClass, RetryConfig, RetryContext, RetryDecision, RetryPolicy, TransientKind};

fn form_pairs() -> impl Strategy<Value = Vec<(String, String)>> {
    let key = "[a-zA-Z0-9 _%&=+.-]{0,12}";
    let value = "[a-zA-Z0-9 _%&=+.-]{0,16}";
    prop::collection::vec((key, value), 0..8)
}

proptest! {
    #[test]
    fn form_encoding_round_trips(pairs in form_pairs()) {
        let encoded = Bytes::from(encode_form(
            pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        ));
        let body = normalize(&encoded, Some("application/x-www-form-urlencoded")).unwrap();
        let decoded = body.as_form().unwrap();
        prop_assert_eq!(decoded, pairs.as_slice());
    }

    #[test]
    fn arbitrary_bytes_never_fail_without_a_content_type(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let bytes = Bytes::from(data);
        let body = normalize(&bytes, None).unwrap();
        prop_assert_eq!(body.as_raw().unwrap(), &bytes);
    }

    #[test]
    fn server_statuses_classify_transient(status in 500u16..600) {
        prop_assert!(FailureClass::from_status(status).is_transient());
    }

    #[test]
    fn client_statuses_classify_fatal(status in 400u16..500) {
        let class = FailureClass::from_status(status);
        if status == 429 {
            prop_assert!(class.is_transient());
        } else {
            prop_assert!(class.is_fatal());
        }
    }

    #[test]
    fn backoff_delay_stays_within_the_jitter_band(
        attempt in 1u32..9,
        base_ms in 10u64..500,
        extra_ms in 0u64..5_000,
        jitter in 0.0f64..0.9,
    ) {
        let base = Duration::from_millis(base_ms);
        let max = base + Duration::from_millis(extra_ms);
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 10,
            base_delay: base,
            max_delay: max,
            jitter,
            retry_non_idempotent: true,
        });

        let ctx = RetryContext {
            attempt,
            elapsed: Duration::ZERO,
            remaining: Duration::from_secs(86_400),
            classification: FailureClass::Transient(TransientKind::ServerError(503)),
            idempotent: true,
            retry_after: None,
        };

        match policy.decide(&ctx) {
            RetryDecision::RetryAfter(delay) => {
                let uncapped = base_ms.saturating_mul(1 << (attempt - 1));
                let capped = uncapped.min(max.as_millis() as u64) as f64;
                let low = capped * (1.0 - jitter) - 1.0;
                let high = capped * (1.0 + jitter) + 1.0;
                let got = delay.as_millis() as f64;
                prop_assert!(got >= low, "delay {got}ms below {low}ms");
                prop_assert!(got <= high, "delay {got}ms above {high}ms");
            }
            RetryDecision::Stop => prop_assert!(false, "expected a retry decision"),
        }
    }

    #[test]
    fn fatal_classifications_never_retry(
        attempt in 1u32..9,
        status in prop_oneof![400u16..429, 430u16..500],
    ) {
        let policy = RetryPolicy::new(RetryConfig::default());
        let ctx = RetryContext {
            attempt,
            elapsed: Duration::ZERO,
            remaining: Duration::from_secs(60),
            classification: FailureClass::from_status(status),
            idempotent: true,
            retry_after: None,
        };
        prop_assert_eq!(policy.decide(&ctx), RetryDecision::Stop);
    }
}
