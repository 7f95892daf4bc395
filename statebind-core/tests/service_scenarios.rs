//! End-to-end dispatch scenarios.

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use statebind_core::{
    Actor, Event, Machine, MachineBuilder, MachineDefinition, MachineStatus, Service, StateNode,
    Subscription, TransitionConfig, TransitionSpec,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

fn checkbox_definition() -> Value {
    json!({
        "initial": "unchecked",
        "context": {"checked": false},
        "states": {
            "unchecked": {"on": {"CHECK": "checked"}},
            "checked": {"on": {"UNCHECK": "unchecked"}}
        }
    })
}

fn counting_subscriber(service: &Service) -> (Arc<AtomicUsize>, Subscription) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let sub = service.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (calls, sub)
}

/// Registers `name` as an action that appends `name` to `log`.
fn logging(builder: MachineBuilder, log: &Log, names: &[&str]) -> MachineBuilder {
    names.iter().fold(builder, |builder, name| {
        let log = log.clone();
        let label = name.to_string();
        builder.action(*name, move |_| log.lock().push(label.clone()))
    })
}

#[test]
fn checkbox_end_to_end() {
    let service = Service::new(Machine::from_json(&checkbox_definition()).unwrap()).unwrap();
    let (calls, _sub) = counting_subscriber(&service);

    assert_eq!(service.get_status(), MachineStatus::NotStarted);
    service.start();
    assert_eq!(service.get_status(), MachineStatus::Started);
    assert_eq!(service.get_snapshot(), "unchecked");

    service.send("CHECK");
    assert_eq!(service.get_snapshot(), "checked");
    service.send(Event::new("UNCHECK"));
    assert_eq!(service.get_snapshot(), "unchecked");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    service.send("BOGUS");
    assert_eq!(service.get_snapshot(), "unchecked");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(service.context().get("checked"), Some(json!(false)));
}

#[test]
fn self_transition_does_not_notify() {
    let machine = Machine::from_json(&json!({
        "initial": "idle",
        "states": {"idle": {"on": {"PING": "idle"}}}
    }))
    .unwrap();
    let service = Service::new(machine).unwrap();
    let (calls, _sub) = counting_subscriber(&service);

    service.send("PING");
    service.send("PING");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn context_set_always_notifies() {
    let service = Service::new(Machine::from_json(&checkbox_definition()).unwrap()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let _sub = service.context().on_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    service.context().set("checked", false);
    service.context().set("checked", false);
    service.context().update("checked", |v| v.clone());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(service.context().initial("checked"), Some(&json!(false)));
    assert_eq!(service.context().hash("checked"), "false");
}

#[test]
fn first_passing_guard_wins() {
    let def = MachineDefinition::from_json(&json!({
        "initial": "start",
        "states": {
            "start": {"on": {"GO": [
                {"target": "a", "guard": "g1"},
                {"target": "b", "guard": "g2"},
                {"target": "c", "guard": "g3"}
            ]}},
            "a": {}, "b": {}, "c": {}
        }
    }))
    .unwrap();
    let evaluated: Log = Arc::default();
    let mut builder = Machine::builder(def);
    for (name, result) in [("g1", false), ("g2", true), ("g3", true)] {
        let evaluated = evaluated.clone();
        builder = builder.guard(name, move |_| {
            evaluated.lock().push(name.to_string());
            result
        });
    }

    let service = Service::new(builder.build().unwrap()).unwrap();
    service.send("GO");
    assert_eq!(service.get_snapshot(), "b");
    assert_eq!(*evaluated.lock(), vec!["g1", "g2"]);
}

#[test]
fn failing_guards_leave_everything_unchanged() {
    let machine = Machine::from_json(&json!({
        "initial": "idle",
        "context": {"n": 0},
        "states": {
            "idle": {"on": {"GO": {"target": "busy", "guard": "ctx.n > 0", "actions": "bump"}}},
            "busy": {}
        },
        "actions": {"bump": {"assign": {"n": 10}}}
    }))
    .unwrap();
    let service = Service::new(machine).unwrap();
    let (calls, _sub) = counting_subscriber(&service);

    service.send("GO");
    assert_eq!(service.get_snapshot(), "idle");
    assert_eq!(service.context().get("n"), Some(json!(0)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    service.context().set("n", 1);
    service.send("GO");
    assert_eq!(service.get_snapshot(), "busy");
    assert_eq!(service.context().get("n"), Some(json!(10)));
}

#[test]
fn unresolved_references_are_tolerated() {
    let machine = Machine::from_json(&json!({
        "initial": "a",
        "states": {
            "a": {"on": {"GO": {"target": "b", "guard": "missingGuard", "actions": ["missing"]}}},
            "b": {"entry": "alsoMissing", "effects": "noSuchEffect"}
        }
    }))
    .unwrap();
    let service = Service::new(machine).unwrap();
    service.start();
    service.send("GO");
    assert_eq!(service.get_snapshot(), "b");
}

#[test]
fn one_deep_event_history() {
    let service = Service::new(Machine::from_json(&checkbox_definition()).unwrap()).unwrap();
    service.send(Event::new("CHECK").with("n", 1));
    service.send(Event::new("UNCHECK").with("n", 2));
    service.send(Event::new("NOPE").with("n", 3));

    let view = service.event();
    assert_eq!(view.event_type(), "NOPE");
    assert_eq!(view.previous().unwrap().event_type, "UNCHECK");

    let value = view.to_value();
    assert_eq!(value["previousEvent"]["type"], "UNCHECK");
    assert_eq!(value["previousEvent"]["n"], 2);
    assert!(value["previousEvent"].get("previousEvent").is_none());
}

#[test]
fn action_order_on_transition() {
    let log: Log = Arc::default();
    let def = MachineDefinition::from_json(&json!({
        "initial": "a",
        "states": {
            "a": {"exit": "exitA", "on": {"GO": {"target": "b", "actions": ["t1", "t2"]}}},
            "b": {"entry": "enterB", "effects": "effectB"}
        }
    }))
    .unwrap();

    let subscriber_log = log.clone();
    let effect_log = log.clone();
    let builder = logging(Machine::builder(def), &log, &["exitA", "t1", "t2", "enterB"]).effect(
        "effectB",
        move |_| {
            effect_log.lock().push("effectB".to_string());
            None
        },
    );
    let service = Service::new(builder.build().unwrap()).unwrap();
    let _sub = service.subscribe(move |s| subscriber_log.lock().push(format!("commit:{}", s)));

    service.send("GO");
    assert_eq!(
        *log.lock(),
        vec!["exitA", "t1", "t2", "enterB", "commit:b", "effectB"]
    );
}

#[test]
fn entry_runs_once_and_self_target_skips_exit() {
    let log: Log = Arc::default();
    let def = MachineDefinition::from_json(&json!({
        "initial": "idle",
        "states": {
            "idle": {
                "entry": "enter",
                "exit": "leave",
                "on": {"RESET": "idle"}
            }
        }
    }))
    .unwrap();
    let machine = logging(Machine::builder(def), &log, &["enter", "leave"])
        .build()
        .unwrap();
    let service = Service::new(machine).unwrap();

    service.start();
    assert_eq!(*log.lock(), vec!["enter"]);

    service.send("RESET");
    assert_eq!(*log.lock(), vec!["enter", "enter"]);
}

#[test]
fn start_takes_eventless_transition_once() {
    let log: Log = Arc::default();
    let def = MachineDefinition::from_json(&json!({
        "initial": "boot",
        "context": {"ready": true},
        "states": {
            "boot": {"entry": "enterBoot", "always": [
                {"target": "waiting", "guard": "!ctx.ready"},
                {"target": "ready"}
            ]},
            "waiting": {},
            "ready": {"entry": "enterReady", "on": {"": "done"}},
            "done": {}
        }
    }))
    .unwrap();
    let machine = logging(Machine::builder(def), &log, &["enterBoot", "enterReady"])
        .build()
        .unwrap();
    let service = Service::new(machine).unwrap();

    service.start();
    assert_eq!(service.get_snapshot(), "ready");
    assert_eq!(*log.lock(), vec!["enterBoot", "enterReady"]);

    // A second start is a no-op.
    service.start();
    assert_eq!(service.get_snapshot(), "ready");
    assert_eq!(log.lock().len(), 2);
}

#[test]
fn eventless_via_empty_event_key() {
    let machine = Machine::from_json(&json!({
        "initial": "a",
        "states": {"a": {"on": {"": "b"}}, "b": {}}
    }))
    .unwrap();
    let service = Service::new(machine).unwrap();
    assert_eq!(service.get_snapshot(), "a");
    service.start();
    assert_eq!(service.get_snapshot(), "b");
}

#[test]
fn computed_reflects_post_transition_context() {
    let machine = Machine::from_json(&json!({
        "initial": "unchecked",
        "context": {"checked": false},
        "states": {
            "unchecked": {"on": {"CHECK": {"target": "checked", "actions": "mark"}}},
            "checked": {}
        },
        "actions": {"mark": {"assign": {"checked": true}}},
        "computed": {"isChecked": "ctx.checked"}
    }))
    .unwrap();
    let service = Service::new(machine).unwrap();

    let seen: Arc<Mutex<Option<Value>>> = Arc::default();
    let slot = seen.clone();
    let handle = service.sender();
    let _sub = service.subscribe(move |_| {
        if let Some(observer) = handle.upgrade() {
            *slot.lock() = observer.computed().get("isChecked");
        }
    });

    assert_eq!(service.computed().get("isChecked"), Some(json!(false)));
    service.send("CHECK");
    assert_eq!(*seen.lock(), Some(json!(true)));
    assert_eq!(service.computed().get("isChecked"), Some(json!(true)));

    // The subscriber must not keep the service alive.
    let handle = service.sender();
    drop(service);
    assert!(handle.upgrade().is_none());
}

#[test]
fn nested_sends_are_queued_in_order() {
    let log: Log = Arc::default();
    let def = MachineDefinition::from_json(&json!({
        "initial": "a",
        "states": {
            "a": {"on": {"GO": {"target": "b", "actions": ["relay", "note"]}}},
            "b": {"entry": "enterB", "on": {"NEXT": "c"}},
            "c": {"entry": "enterC"}
        }
    }))
    .unwrap();

    let relay_log = log.clone();
    let builder = logging(Machine::builder(def), &log, &["note", "enterB", "enterC"]).action(
        "relay",
        move |params| {
            params.send("NEXT");
            // Still processing GO: the nested event has not been handled.
            relay_log.lock().push(format!("relay:{}", params.event().event_type()));
        },
    );
    let service = Service::new(builder.build().unwrap()).unwrap();

    service.send("GO");
    assert_eq!(service.get_snapshot(), "c");
    assert_eq!(*log.lock(), vec!["relay:GO", "note", "enterB", "enterC"]);

    let view = service.event();
    assert_eq!(view.event_type(), "NEXT");
    assert_eq!(view.previous().unwrap().event_type, "GO");
}

#[test]
fn raise_and_subscriber_sends_are_queued() {
    let machine = Machine::from_json(&json!({
        "initial": "idle",
        "states": {
            "idle": {"on": {"SUBMIT": {"target": "validating", "actions": "validate"}}},
            "validating": {"on": {"VALID": "submitted"}},
            "submitted": {"on": {"RESET": "idle"}}
        },
        "actions": {"validate": {"raise": "VALID"}}
    }))
    .unwrap();
    let service = Service::new(machine).unwrap();

    let states: Log = Arc::default();
    let log = states.clone();
    let sender = service.sender();
    let _sub = service.subscribe(move |s| {
        log.lock().push(s.to_string());
        if s == "submitted" {
            sender.send("RESET");
        }
    });

    service.send("SUBMIT");
    assert_eq!(*states.lock(), vec!["validating", "submitted", "idle"]);
    assert_eq!(service.get_snapshot(), "idle");
}

#[test]
fn targetless_transition_runs_actions_only() {
    let machine = Machine::from_json(&json!({
        "initial": "editing",
        "context": {"value": "", "dirty": false},
        "states": {
            "editing": {
                "exit": "neverRuns",
                "on": {"INPUT": {"actions": ["merge", "markDirty"]}}
            }
        },
        "actions": {
            "merge": {"merge_event": true},
            "markDirty": {"toggle": "dirty"},
            "neverRuns": {"assign": {"value": "exited"}}
        }
    }))
    .unwrap();
    let service = Service::new(machine).unwrap();
    let (calls, _sub) = counting_subscriber(&service);

    service.send(Event::new("INPUT").with("value", "hello").with("ignored", 1));
    assert_eq!(service.get_snapshot(), "editing");
    assert_eq!(service.context().get("value"), Some(json!("hello")));
    assert_eq!(service.context().get("dirty"), Some(json!(true)));
    assert!(!service.context().contains("ignored"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn effects_cleanup_before_rerun_and_on_stop() {
    let log: Log = Arc::default();
    let def = MachineDefinition::from_json(&json!({
        "initial": "a",
        "states": {
            "a": {"effects": ["first", "second"], "on": {"GO": "b"}},
            "b": {"effects": "third", "on": {"BACK": "a"}}
        }
    }))
    .unwrap();
    let mut builder = Machine::builder(def);
    for name in ["first", "second", "third"] {
        let log = log.clone();
        builder = builder.effect(name, move |_| {
            log.lock().push(format!("run:{}", name));
            let log = log.clone();
            Some(Box::new(move || log.lock().push(format!("cleanup:{}", name))))
        });
    }
    let service = Service::new(builder.build().unwrap()).unwrap();

    service.start();
    service.send("GO");
    service.stop();

    assert_eq!(
        *log.lock(),
        vec![
            "run:first",
            "run:second",
            "cleanup:second",
            "cleanup:first",
            "run:third",
            "cleanup:third"
        ]
    );
    assert_eq!(service.status(), MachineStatus::Stopped);
}

#[test]
fn programmatic_definition() {
    let mut def = MachineDefinition {
        initial: "off".to_string(),
        ..Default::default()
    };
    let mut off = StateNode::default();
    off.on.insert(
        "FLIP".to_string(),
        TransitionSpec::List(vec![
            TransitionConfig::to("on").guard("ctx.enabled"),
            TransitionConfig::to("off"),
        ]),
    );
    def.states.insert("off".to_string(), off);
    def.states.insert("on".to_string(), Default::default());
    def.on.insert("OFF".to_string(), "off".into());

    let mut context = Map::new();
    context.insert("enabled".to_string(), json!(true));
    let service = Service::builder(Machine::new(def).unwrap())
        .context(context)
        .build()
        .unwrap();

    service.send("FLIP");
    assert_eq!(service.get_snapshot(), "on");
    service.send("OFF");
    assert_eq!(service.get_snapshot(), "off");
}

#[test]
fn actor_over_service() {
    let service = Service::new(Machine::from_json(&checkbox_definition()).unwrap()).unwrap();
    let actor = Actor::new(service.clone());
    let seen: Log = Arc::default();
    let log = seen.clone();
    let _sub = actor.subscribe(move |s| log.lock().push(s.to_string()));

    service.send("CHECK");
    actor.send("UNCHECK");
    assert_eq!(*seen.lock(), vec!["unchecked", "checked", "unchecked"]);
    assert_eq!(actor.state_value(), "unchecked");
}

#[test]
fn state_handle_queries() {
    let machine = Machine::from_json(&json!({
        "initial": "idle",
        "states": {"idle": {"on": {"LOAD": "loading"}}, "loading": {}, "error": {}},
        "tags": {"loading": ["busy", "pending"], "error": "failed"}
    }))
    .unwrap();
    let service = Service::new(machine).unwrap();
    let state = service.state();

    assert!(state.matches(&["idle", "error"]));
    assert!(!state.has_tag("busy"));
    service.send("LOAD");
    assert!(state.matches(&["loading"]));
    assert!(state.has_tag("busy"));
    assert_eq!(state.tags(), vec!["busy", "pending"]);
    assert_eq!(state.hash(), "\"loading\"");
    assert_eq!(state.initial(), "idle");
}

#[test]
fn concurrent_senders_are_serialized() {
    let def = MachineDefinition::from_json(&json!({
        "initial": "a",
        "context": {"hits": 0},
        "states": {"a": {"on": {"HIT": {"actions": "count"}}}}
    }))
    .unwrap();
    let machine = Machine::builder(def)
        .action("count", |params| {
            params
                .context()
                .update("hits", |v| json!(v.as_i64().unwrap_or(0) + 1));
        })
        .build()
        .unwrap();
    let service = Service::new(machine).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    service.send("HIT");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(service.context().get("hits"), Some(json!(200)));
}

#[test]
fn start_waits_for_other_thread_dispatch() {
    let log: Log = Arc::default();
    let (begin_tx, begin_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let begin_tx = Mutex::new(begin_tx);
    let release_rx = Mutex::new(release_rx);

    let def = MachineDefinition::from_json(&json!({
        "initial": "idle",
        "states": {"idle": {"entry": "enter", "on": {"SLOW": {"actions": "slow"}}}}
    }))
    .unwrap();
    let slow_log = log.clone();
    let enter_log = log.clone();
    let machine = Machine::builder(def)
        .action("enter", move |_| enter_log.lock().push("entry:idle".into()))
        .action("slow", move |_| {
            slow_log.lock().push("slow:begin".into());
            begin_tx.lock().send(()).unwrap();
            release_rx.lock().recv().unwrap();
            slow_log.lock().push("slow:end".into());
        })
        .build()
        .unwrap();
    let service = Service::new(machine).unwrap();

    let sender = {
        let service = service.clone();
        thread::spawn(move || service.send("SLOW"))
    };
    begin_rx.recv().unwrap();

    let starter = {
        let service = service.clone();
        thread::spawn(move || service.start())
    };
    thread::sleep(Duration::from_millis(50));
    release_tx.send(()).unwrap();

    sender.join().unwrap();
    starter.join().unwrap();

    assert_eq!(*log.lock(), vec!["slow:begin", "slow:end", "entry:idle"]);
    assert_eq!(service.get_status(), MachineStatus::Started);
}
