mod common;

use common::*;
use solana_sdk::pubkey::Pubkey;
use solwatch_connector::{
    decoder::{DecodeOptions, EventDecoder},
    dispatcher::{Dispatcher, ListenerEntry},
    events::EventContext,
    listener::{EventFilter, ListenerId, Matcher},
    parser::EventParser,
    stats::Stats,
    transport::LogNotification,
    ParsedEvent,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Parses one transaction emitting a `Transfer` and a `Closed` event.
fn sample_events(slot: u64) -> Vec<ParsedEvent> {
    let program = Pubkey::new_unique();
    let parser = EventParser::new(
        program,
        EventDecoder::new(Arc::new(registry()), DecodeOptions::default()),
    );
    let logs = notification(&program, slot, &[transfer_payload(1), closed_payload("bye")]).logs;
    parser
        .parse_logs(
            &logs,
            EventContext {
                slot,
                ..EventContext::default()
            },
        )
        .unwrap()
}

fn counting(counter: &Arc<AtomicUsize>) -> Arc<dyn Fn(&ParsedEvent) -> anyhow::Result<()> + Send + Sync> {
    let counter = counter.clone();
    Arc::new(move |_: &ParsedEvent| -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

#[test]
fn test_failing_listeners_do_not_block_later_ones() {
    let stats = Arc::new(Stats::new());
    let dispatcher = Dispatcher::new(stats.clone());
    let received = Arc::new(AtomicUsize::new(0));

    dispatcher.register(ListenerEntry::event(
        ListenerId(1),
        Matcher::Wildcard,
        Arc::new(|_: &ParsedEvent| -> anyhow::Result<()> {
            Err(anyhow::anyhow!("listener is broken"))
        }),
    ));
    dispatcher.register(ListenerEntry::event(
        ListenerId(2),
        Matcher::Wildcard,
        Arc::new(|_: &ParsedEvent| -> anyhow::Result<()> { panic!("listener exploded") }),
    ));
    dispatcher.register(ListenerEntry::event(ListenerId(3), Matcher::Wildcard, counting(&received)));

    let events = sample_events(1);
    for event in &events {
        assert_eq!(dispatcher.dispatch(event), 3);
    }

    assert_eq!(received.load(Ordering::SeqCst), 2);
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.listener_errors, 4);
    assert_eq!(snapshot.errors, 4);
}

#[test]
fn test_named_and_filtered_listeners() {
    let stats = Arc::new(Stats::new());
    let dispatcher = Dispatcher::new(stats.clone());
    let transfers = Arc::new(AtomicUsize::new(0));
    let late = Arc::new(AtomicUsize::new(0));

    dispatcher.register(ListenerEntry::event(
        ListenerId(1),
        Matcher::Name("Transfer".into()),
        counting(&transfers),
    ));
    dispatcher.register(ListenerEntry::event(
        ListenerId(2),
        Matcher::Filter(EventFilter::new().min_slot(10).names(["Closed"])),
        counting(&late),
    ));

    for slot in [5, 10] {
        for event in &sample_events(slot) {
            dispatcher.dispatch(event);
        }
    }

    assert_eq!(transfers.load(Ordering::SeqCst), 2);
    assert_eq!(late.load(Ordering::SeqCst), 1);
    // Three events were rejected by the filter; name mismatches are not counted.
    assert_eq!(stats.snapshot().filtered, 3);
}

#[test]
fn test_filter_predicate_and_unknown_events() {
    let events = sample_events(1);
    let transfer = &events[0];

    let big = EventFilter::new().matching(|e| e.field("amount").and_then(|v| v.as_u64()) > Some(100));
    assert!(!big.accepts(transfer));
    assert!(EventFilter::new().accepts(transfer));

    let unknown = ParsedEvent {
        event: solwatch_connector::DecodedEvent::Unknown { data: vec![0; 8] },
        ..transfer.clone()
    };
    assert!(!EventFilter::new().accepts(&unknown));
    assert!(EventFilter::new().include_unknown(true).accepts(&unknown));
    assert_eq!(Matcher::Wildcard.matches(&unknown), Some(true));
    assert_eq!(Matcher::Raw.matches(&unknown), None);
}

#[test]
fn test_listener_added_during_dispatch_waits_for_next_round() {
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(Stats::new())));
    let late = Arc::new(AtomicUsize::new(0));
    let added = Arc::new(AtomicUsize::new(0));

    let d = dispatcher.clone();
    let (late_cb, added_flag) = (late.clone(), added.clone());
    dispatcher.register(ListenerEntry::event(
        ListenerId(1),
        Matcher::Wildcard,
        Arc::new(move |_: &ParsedEvent| -> anyhow::Result<()> {
            if added_flag.fetch_add(1, Ordering::SeqCst) == 0 {
                d.register(ListenerEntry::event(ListenerId(2), Matcher::Wildcard, counting(&late_cb)));
            }
            Ok(())
        }),
    ));

    let events = sample_events(1);
    assert_eq!(dispatcher.dispatch(&events[0]), 1);
    assert_eq!(late.load(Ordering::SeqCst), 0);
    assert_eq!(dispatcher.len(), 2);

    assert_eq!(dispatcher.dispatch(&events[1]), 2);
    assert_eq!(late.load(Ordering::SeqCst), 1);
}

#[test]
fn test_listener_removed_during_dispatch_does_not_skip_others() {
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(Stats::new())));
    let order = Arc::new(Mutex::new(Vec::new()));

    for id in 1..=3u64 {
        let d = dispatcher.clone();
        let order = order.clone();
        dispatcher.register(ListenerEntry::event(
            ListenerId(id),
            Matcher::Wildcard,
            Arc::new(move |_: &ParsedEvent| -> anyhow::Result<()> {
                order.lock().unwrap().push(id);
                // The first listener removes itself.
                if id == 1 {
                    d.unregister(ListenerId(1));
                }
                Ok(())
            }),
        ));
    }

    let events = sample_events(1);
    dispatcher.dispatch(&events[0]);
    dispatcher.dispatch(&events[1]);

    assert_eq!(*order.lock().unwrap(), [1, 2, 3, 2, 3]);
    assert!(!dispatcher.unregister(ListenerId(1)));
}

#[test]
fn test_raw_listeners_only_see_notifications() {
    let stats = Arc::new(Stats::new());
    let dispatcher = Dispatcher::new(stats);
    let raw = Arc::new(Mutex::new(Vec::new()));

    let sink = raw.clone();
    dispatcher.register(ListenerEntry::raw(
        ListenerId(1),
        Arc::new(move |n: &LogNotification| -> anyhow::Result<()> {
            sink.lock().unwrap().push(n.signature.clone());
            Ok(())
        }),
    ));

    let events = sample_events(3);
    assert_eq!(dispatcher.dispatch(&events[0]), 0);

    let notification = notification(&Pubkey::new_unique(), 3, &[]);
    assert_eq!(dispatcher.dispatch_raw(&notification), 1);
    assert_eq!(*raw.lock().unwrap(), ["sig-3"]);
}
