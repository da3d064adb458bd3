//! Property tests for announcement deduplication.

mod common;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use common::{alive, alive_at, bridge_info, byebye, fake_control_point, location, FakeTransport};
use control_point::ControlPointEvent;
use proptest::prelude::*;

const ROOTS: [&str; 3] = ["uuid:a", "uuid:b", "uuid:bridge"];
const LAMP: &str = "uuid:lamp";

#[derive(Debug, Clone)]
enum Op {
    /// Announce one of `ROOTS`
    Announce(usize),
    /// Announce the lamp embedded in `uuid:bridge`
    AnnounceLamp,
    /// Let one held description fetch complete
    Release,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..ROOTS.len()).prop_map(Op::Announce),
        2 => Just(Op::AnnounceLamp),
        2 => Just(Op::Release),
    ]
}

/// Outcome of one run: devices found per UDN and fetches issued.
fn run(ops: &[Op]) -> (HashMap<String, usize>, usize) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    runtime.block_on(async {
        let transport = Arc::new(FakeTransport::gated());
        transport.serve(bridge_info("uuid:bridge", &[LAMP]));
        let (control_point, _) = fake_control_point(Arc::clone(&transport));
        let mut events = control_point.events();
        let mut fetches = Vec::new();

        for op in ops {
            let notification = match op {
                Op::Announce(i) => alive(ROOTS[*i]),
                Op::AnnounceLamp => alive_at(LAMP, &location("uuid:bridge")),
                Op::Release => {
                    transport.fetch_gate.add_permits(1);
                    tokio::task::yield_now().await;
                    continue;
                }
            };
            fetches.extend(control_point.handle_notification(notification));
        }

        transport.fetch_gate.add_permits(ops.len());
        for fetch in fetches {
            fetch.await.expect("fetch task");
        }

        let mut found = HashMap::new();
        while let Ok(event) = events.try_recv() {
            if let ControlPointEvent::DeviceFound(device) = event {
                *found.entry(device.udn().to_string()).or_insert(0) += 1;
            }
        }
        (found, transport.fetch_count())
    })
}

proptest! {
    #[test]
    fn prop_each_device_found_once(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (found, _) = run(&ops);

        let expected: BTreeSet<&str> = ops
            .iter()
            .filter_map(|op| match op {
                Op::Announce(i) => Some(ROOTS[*i]),
                Op::AnnounceLamp => Some("uuid:bridge"),
                Op::Release => None,
            })
            .collect();
        let found_udns: BTreeSet<&str> = found.keys().map(String::as_str).collect();

        prop_assert_eq!(&found_udns, &expected);
        prop_assert!(found.values().all(|count| *count == 1), "duplicates: {:?}", found);
    }

    #[test]
    fn prop_plain_devices_fetched_once(indices in prop::collection::vec(0..2usize, 1..30)) {
        let ops: Vec<Op> = indices.iter().map(|i| Op::Announce(*i)).collect();
        let (_, fetches) = run(&ops);

        let distinct: BTreeSet<usize> = indices.iter().copied().collect();
        prop_assert_eq!(fetches, distinct.len());
    }
}

#[test]
fn test_byebye_then_announcement_fetches_again() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    runtime.block_on(async {
        let transport = Arc::new(FakeTransport::new());
        let (control_point, _) = fake_control_point(Arc::clone(&transport));

        for _ in 0..3 {
            control_point
                .handle_notification(alive("uuid:a"))
                .expect("unknown device is fetched")
                .await
                .unwrap();
            control_point.handle_notification(byebye("uuid:a"));
        }
        assert_eq!(transport.fetch_count(), 3);
    });
}
