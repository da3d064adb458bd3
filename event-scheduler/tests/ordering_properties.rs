//! Property tests for fire ordering.

use chrono::{DateTime, FixedOffset, TimeZone};
use event_scheduler::{EventScheduler, ScheduleRequest};
use proptest::prelude::*;

fn base() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(0)
        .unwrap()
        .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .unwrap()
}

proptest! {
    #[test]
    fn prop_fires_in_time_then_insertion_order(seconds in proptest::collection::vec(0u32..30, 1..40)) {
        let mut scheduler = EventScheduler::new();
        for (index, second) in seconds.iter().enumerate() {
            let req = ScheduleRequest::new()
                .with_time(0, 1, *second)
                .with_payload("index", index as u64);
            scheduler.schedule_at(req, base()).unwrap();
        }

        let mut fired = Vec::new();
        scheduler.tick_at(base() + chrono::Duration::hours(1), |event| fired.push(event));
        prop_assert_eq!(fired.len(), seconds.len());
        prop_assert!(scheduler.is_empty());

        for pair in fired.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(a.scheduled_for <= b.scheduled_for);
            if a.scheduled_for == b.scheduled_for {
                prop_assert!(a.payload["index"].as_u64() < b.payload["index"].as_u64());
            }
        }
    }

    #[test]
    fn prop_next_fire_time_is_minimum(seconds in proptest::collection::vec(0u32..60, 1..20)) {
        let mut scheduler = EventScheduler::new();
        for second in &seconds {
            scheduler
                .schedule_at(ScheduleRequest::new().with_time(0, 5, *second), base())
                .unwrap();
        }
        let min = seconds.iter().min().copied().unwrap();
        let expected = base() + chrono::Duration::minutes(5) + chrono::Duration::seconds(i64::from(min));
        prop_assert_eq!(scheduler.next_fire_time(), Some(expected));
    }
}
