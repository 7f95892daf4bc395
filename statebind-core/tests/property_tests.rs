//! Property-based tests for dispatch and guard evaluation.
//!
//! These tests use proptest to check the service against a simple model
//! across many randomly generated event sequences.

use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;
use statebind_core::{Event, GuardExpr, Machine, Service};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Traffic light with a global reset and a self-loop.
fn light() -> Machine {
    Machine::from_json(&json!({
        "initial": "green",
        "states": {
            "green": {"on": {"NEXT": "yellow", "STAY": "green"}},
            "yellow": {"on": {"NEXT": "red"}},
            "red": {"on": {"NEXT": "green"}}
        },
        "on": {"RESET": "green"}
    }))
    .unwrap()
}

/// Reference model of `light()`.
fn model_step(state: &str, event: &str) -> String {
    match (state, event) {
        ("green", "NEXT") => "yellow",
        ("yellow", "NEXT") => "red",
        ("red", "NEXT") => "green",
        (_, "RESET") => "green",
        (s, _) => s,
    }
    .to_string()
}

prop_compose! {
    fn arbitrary_event()(variant in 0..4u8) -> &'static str {
        match variant {
            0 => "NEXT",
            1 => "STAY",
            2 => "RESET",
            _ => "BOGUS",
        }
    }
}

proptest! {
    #[test]
    fn dispatch_matches_model(events in prop::collection::vec(arbitrary_event(), 0..40)) {
        let service = Service::new(light()).unwrap();
        service.start();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _sub = service.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut state = "green".to_string();
        let mut changes = 0;
        for event in &events {
            let next = model_step(&state, event);
            if next != state {
                changes += 1;
            }
            state = next;

            service.send(*event);
            prop_assert_eq!(service.get_snapshot(), state.clone());
        }

        prop_assert_eq!(calls.load(Ordering::SeqCst), changes);
    }

    #[test]
    fn history_is_one_deep(events in prop::collection::vec(arbitrary_event(), 1..20)) {
        let service = Service::new(light()).unwrap();
        for (i, event) in events.iter().enumerate() {
            service.send(Event::new(*event).with("seq", i));
        }

        let view = service.event();
        let last = events.len() - 1;
        prop_assert_eq!(view.current().unwrap().get("seq"), Some(&json!(last)));
        match view.previous() {
            Some(prev) => prop_assert_eq!(prev.get("seq"), Some(&json!(last - 1))),
            None => prop_assert_eq!(events.len(), 1),
        }
        prop_assert!(view.to_value()["previousEvent"].get("previousEvent").is_none());
    }

    #[test]
    fn context_notifies_on_every_write(values in prop::collection::vec(0..3i64, 0..30)) {
        let service = Service::new(Machine::from_json(&json!({
            "initial": "idle",
            "context": {"n": 0},
            "states": {"idle": {}}
        })).unwrap()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let _sub = service.context().on_change(move |change| {
            log.lock().push(change.current.clone());
        });

        for v in &values {
            service.context().set("n", *v);
        }

        let expected: Vec<_> = values.iter().map(|v| json!(v)).collect();
        prop_assert_eq!(seen.lock().clone(), expected);
        prop_assert_eq!(service.context().initial("n"), Some(&json!(0)));
    }

    #[test]
    fn guard_comparisons_follow_numbers(n in -100i64..100, k in -100i64..100) {
        let ctx = json!({"n": n});
        let cases = [
            (format!("ctx.n > {}", k), n > k),
            (format!("ctx.n >= {}", k), n >= k),
            (format!("ctx.n < {}", k), n < k),
            (format!("ctx.n <= {}", k), n <= k),
            (format!("ctx.n == {}", k), n == k),
            (format!("ctx.n != {}", k), n != k),
            (format!("!(ctx.n > {})", k), n <= k),
        ];
        for (source, expected) in cases {
            let expr = GuardExpr::parse(&source).unwrap();
            prop_assert_eq!(expr.evaluate(&ctx), expected, "{}", source);
        }
    }

    #[test]
    fn guard_boolean_precedence(a: bool, b: bool, c: bool) {
        let ctx = json!({"a": a, "b": b, "c": c});
        let expr = GuardExpr::parse("ctx.a || ctx.b && !ctx.c").unwrap();
        prop_assert_eq!(expr.evaluate(&ctx), a || (b && !c));

        let grouped = GuardExpr::parse("(ctx.a || ctx.b) && !ctx.c").unwrap();
        prop_assert_eq!(grouped.evaluate(&ctx), (a || b) && !c);
    }
}
