//! Property tests for performance scoring and candidate weights

use proptest::prelude::*;
use switchyard::models::performance::{
    Factors, MAX_FACTOR, MIN_FACTOR, PerformanceScore, cost_factor, load_factor, smooth_total,
    speed_factor, success_factor,
};
use switchyard::router::RequestPriority;
use switchyard::router::scoring::{candidate_score, weights_for};

fn factor() -> impl Strategy<Value = f64> {
    MIN_FACTOR..=MAX_FACTOR
}

fn factors() -> impl Strategy<Value = Factors> {
    (factor(), factor(), factor(), factor()).prop_map(|(speed, success, cost, load)| Factors {
        speed,
        success,
        cost,
        load,
    })
}

fn priority() -> impl Strategy<Value = RequestPriority> {
    prop_oneof![
        Just(RequestPriority::Critical),
        Just(RequestPriority::High),
        Just(RequestPriority::Medium),
        Just(RequestPriority::Low),
    ]
}

proptest! {
    /// Higher latency never yields a higher speed factor, and strictly
    /// lowers it while above the floor
    #[test]
    fn speed_factor_is_monotonic(a in 100.0f64..20_000.0, delta in 1.0f64..5_000.0) {
        let b = a + delta;
        prop_assert!(speed_factor(b) <= speed_factor(a));
        if speed_factor(a) > MIN_FACTOR {
            prop_assert!(speed_factor(b) < speed_factor(a));
        }
    }

    /// Every factor stays within the clamp range for any input
    #[test]
    fn factors_are_clamped(
        latency in -1e6f64..1e6,
        rate in -10.0f64..10.0,
        success in any::<bool>(),
        cost in -10.0f64..10.0,
        load in -1000.0f64..1000.0,
    ) {
        for value in [
            speed_factor(latency),
            success_factor(rate, success),
            cost_factor(cost),
            load_factor(load),
        ] {
            prop_assert!((MIN_FACTOR..=MAX_FACTOR).contains(&value), "factor {} out of range", value);
        }
    }

    /// The smoothed total stays in range and between the old total and the
    /// composite it moves toward
    #[test]
    fn smooth_total_stays_bounded(old in factor(), f in factors(), alpha in 0.01f64..=1.0) {
        let total = smooth_total(old, &f, alpha);
        prop_assert!((MIN_FACTOR..=MAX_FACTOR).contains(&total));

        let composite = f.speed.powf(0.3) * f.success.powf(0.3) * f.cost.powf(0.2) * f.load.powf(0.2);
        let lo = old.min(composite).max(MIN_FACTOR) - 1e-9;
        let hi = old.max(composite) + 1e-9;
        prop_assert!(total >= lo && total <= hi, "total {} outside [{}, {}]", total, lo, hi);
    }

    /// Holding everything else fixed, slower observations cannot raise the total
    #[test]
    fn slower_latency_never_raises_total(
        old in factor(),
        f in factors(),
        alpha in 0.01f64..=1.0,
        latency in 100.0f64..10_000.0,
        delta in 1.0f64..5_000.0,
    ) {
        let fast = Factors { speed: speed_factor(latency), ..f };
        let slow = Factors { speed: speed_factor(latency + delta), ..f };
        prop_assert!(smooth_total(old, &slow, alpha) <= smooth_total(old, &fast, alpha) + 1e-12);
    }

    /// A zero traffic share always excludes a candidate; shares above one are capped
    #[test]
    fn traffic_share_scales_candidate_score(
        complexity in 0.0f64..=100.0,
        priority in priority(),
        share in 0.0f64..=1.0,
    ) {
        let weights = weights_for(complexity, priority);
        let score = PerformanceScore::neutral();
        let full = candidate_score(&score, &weights, 1.0);

        prop_assert_eq!(candidate_score(&score, &weights, 0.0), 0.0);
        prop_assert_eq!(candidate_score(&score, &weights, 5.0), full);
        prop_assert!(candidate_score(&score, &weights, share) <= full);
    }

    /// Caller priority decides quality and cost regardless of complexity
    #[test]
    fn priority_overrides_complexity(complexity in 0.0f64..=100.0) {
        let critical = weights_for(complexity, RequestPriority::Critical);
        prop_assert_eq!(critical.quality, 0.45);
        prop_assert_eq!(critical.cost, 0.10);

        let low = weights_for(complexity, RequestPriority::Low);
        prop_assert_eq!(low.cost, 0.45);
        prop_assert_eq!(low.quality, 0.10);
    }
}
