use mediarelay_core::remote::Backoff;
use mediarelay_core::utils::{clean_title, truncate_message};
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    #[test]
    fn backoff_never_decreases_and_respects_cap(
        initial in 1u64..60,
        max in 60u64..1000,
        steps in 1usize..40,
    ) {
        let mut backoff = Backoff::new(Duration::from_secs(initial), Duration::from_secs(max));
        let mut previous = Duration::ZERO;
        for _ in 0..steps {
            let delay = backoff.next_delay();
            prop_assert!(delay >= previous);
            prop_assert!(delay <= Duration::from_secs(max));
            previous = delay;
        }
    }

    #[test]
    fn backoff_reset_returns_to_initial(steps in 0usize..20) {
        let mut backoff = Backoff::default();
        for _ in 0..steps {
            backoff.next_delay();
        }
        backoff.reset();
        prop_assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn clean_title_never_panics_and_never_grows(raw in "\\PC{0,80}") {
        let cleaned = clean_title(&raw);
        prop_assert!(cleaned.chars().count() <= raw.chars().count());
        prop_assert_eq!(cleaned.trim(), cleaned.as_str());
    }

    #[test]
    fn truncated_message_fits(text in "[a-z<>/\\n ]{0,300}", max in 40usize..200) {
        let out = truncate_message(&text, max);
        prop_assert!(out.chars().count() <= max);
    }
}

#[test]
fn backoff_sequence_is_five_to_three_hundred() {
    let mut backoff = Backoff::default();
    let seq: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_secs()).collect();
    assert_eq!(seq, vec![5, 10, 20, 40, 80, 160, 300, 300, 300]);
}
