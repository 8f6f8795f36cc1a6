//! Token-bucket properties under concurrent load with a simulated clock.
//!
//! The tokio clock is paused, so sleeps auto-advance deterministically
//! and the timings below are exact rather than best-effort.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use restbase::{RateLimiter, RateLimiterConfig};

const CAPACITY: u32 = 5;
const REFILL_PER_SECOND: f64 = 5.0;

/// Runs `n` concurrent acquirers and returns each grant's offset from the
/// start, in grant order.
async fn grant_times(limiter: &RateLimiter, n: usize) -> Vec<Duration> {
    let started = Instant::now();
    let grants: Arc<Mutex<Vec<Duration>>> = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..n {
        let limiter = limiter.clone();
        let grants = Arc::clone(&grants);
        handles.push(tokio::spawn(async move {
            limiter.acquire(1).await.unwrap();
            grants.lock().await.push(started.elapsed());
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut times = Arc::try_unwrap(grants).unwrap().into_inner();
    times.sort();
    times
}

#[tokio::test(start_paused = true)]
async fn grants_never_outpace_capacity_plus_refill() {
    let limiter = RateLimiter::new(RateLimiterConfig::new(CAPACITY, REFILL_PER_SECOND));
    let times = grant_times(&limiter, 25).await;

    assert_eq!(times.len(), 25);
    for (index, granted_at) in times.iter().enumerate() {
        let grants_so_far = (index + 1) as f64;
        let budget = f64::from(CAPACITY) + REFILL_PER_SECOND * granted_at.as_secs_f64();
        assert!(
            grants_so_far <= budget + 1e-6,
            "grant #{} at {:?} exceeds bucket budget {:.3}",
            index + 1,
            granted_at,
            budget
        );
    }
}

#[tokio::test(start_paused = true)]
async fn initial_burst_is_exactly_the_capacity() {
    let limiter = RateLimiter::new(RateLimiterConfig::new(CAPACITY, REFILL_PER_SECOND));
    let times = grant_times(&limiter, 25).await;

    let immediate = times
        .iter()
        .filter(|t| **t < Duration::from_millis(100))
        .count();
    assert_eq!(immediate, CAPACITY as usize);
}

#[tokio::test(start_paused = true)]
async fn one_second_windows_stay_bounded() {
    let limiter = RateLimiter::new(RateLimiterConfig::new(CAPACITY, REFILL_PER_SECOND));
    let times = grant_times(&limiter, 30).await;

    // In any one-second window the bucket can hand out at most its burst
    // capacity plus one second of refill.
    let max_per_window = (f64::from(CAPACITY) + REFILL_PER_SECOND) as usize;
    for (i, window_start) in times.iter().enumerate() {
        let window_end = *window_start + Duration::from_secs(1);
        let in_window = times[i..].iter().take_while(|t| **t <= window_end).count();
        assert!(
            in_window <= max_per_window,
            "{in_window} grants within one second starting at {window_start:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn drained_bucket_recovers_at_the_refill_rate() {
    let limiter = RateLimiter::new(RateLimiterConfig::new(4, 2.0));
    for _ in 0..4 {
        limiter.acquire(1).await.unwrap();
    }

    let started = Instant::now();
    limiter.acquire(1).await.unwrap();
    // 2 tokens/s: the fifth grant needs half a second of refill.
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(499), "waited {waited:?}");
    assert!(waited <= Duration::from_millis(600), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn late_arrivals_cannot_starve_earlier_waiters() {
    let limiter = RateLimiter::new(RateLimiterConfig::new(1, 2.0));
    limiter.acquire(1).await.unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    // An early waiter blocked on an empty bucket...
    {
        let limiter = limiter.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            limiter.acquire(1).await.unwrap();
            tx.send("early").unwrap();
        });
    }
    tokio::time::advance(Duration::from_millis(10)).await;

    // ...followed by a stream of cheap late arrivals.
    for _ in 0..5 {
        let limiter = limiter.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            limiter.acquire(1).await.unwrap();
            tx.send("late").unwrap();
        });
        tokio::time::advance(Duration::from_millis(1)).await;
    }
    drop(tx);

    let first = rx.recv().await.unwrap();
    assert_eq!(first, "early");
}
