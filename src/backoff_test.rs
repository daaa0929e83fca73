use super::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[test]
fn ceiling_doubles_until_capped() {
    let mut backoff = Backoff::new(ms(1000), ms(30_000));
    let mut ceilings = Vec::new();
    for _ in 0..7 {
        ceilings.push(backoff.ceiling());
        backoff.next_delay();
    }
    assert_eq!(ceilings, vec![ms(1000), ms(2000), ms(4000), ms(8000), ms(16_000), ms(30_000), ms(30_000)]);
}

#[test]
fn delays_stay_within_half_to_full_ceiling() {
    let mut backoff = Backoff::new(ms(1000), ms(30_000));
    for _ in 0..50 {
        let ceiling = backoff.ceiling();
        let delay = backoff.next_delay();
        assert!(delay >= ceiling / 2, "{delay:?} below half of {ceiling:?}");
        assert!(delay <= ceiling, "{delay:?} above {ceiling:?}");
    }
}

#[test]
fn reset_returns_to_initial_ceiling() {
    let mut backoff = Backoff::new(ms(500), ms(8000));
    backoff.next_delay();
    backoff.next_delay();
    assert_eq!(backoff.attempt(), 2);

    backoff.reset();

    assert_eq!(backoff.attempt(), 0);
    assert_eq!(backoff.ceiling(), ms(500));
}

#[test]
fn huge_attempt_counts_saturate_at_max() {
    let mut backoff = Backoff::new(ms(1000), ms(30_000));
    backoff.attempt = 200;
    assert_eq!(backoff.ceiling(), ms(30_000));
}

#[test]
fn max_below_initial_is_raised_to_initial() {
    let backoff = Backoff::new(ms(1000), ms(10));
    assert_eq!(backoff.ceiling(), ms(1000));
}

#[test]
fn zero_settings_still_back_off_and_grow() {
    let mut backoff = Backoff::new(Duration::ZERO, Duration::ZERO);
    assert_eq!(backoff.ceiling(), MIN_INITIAL_DELAY);
    for _ in 0..5 {
        assert!(backoff.next_delay() >= MIN_INITIAL_DELAY / 2);
    }

    let mut growing = Backoff::new(Duration::ZERO, ms(1000));
    growing.next_delay();
    growing.next_delay();
    assert_eq!(growing.ceiling(), MIN_INITIAL_DELAY * 4);
}

#[test]
fn jitter_is_deterministic_for_seeded_rng() {
    let a = jittered(ms(4000), &mut StdRng::seed_from_u64(7));
    let b = jittered(ms(4000), &mut StdRng::seed_from_u64(7));
    assert_eq!(a, b);
    assert!(a >= ms(2000) && a <= ms(4000));
}
