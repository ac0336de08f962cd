use super::helpers::*;
use crate::config::SchedulerConfig;
use crate::errors::SignalError;
use crate::executor::{EventDelivery, ExecutorOptions};
use crate::scheduler::ExitReason;
use crate::types::{EntityId, ExecutorState, HoldListType, RequestKind};
use crate::values::{Val, RUNAWAY, SCRIPT_FAULT};
use crate::vm::Instr;

#[test]
fn test_scripts_finish_in_ready_order() {
    let mut sched = scheduler();
    let a = sched
        .start_script(bytecode("a", vec![push(Val::Long(1)), Instr::Return]))
        .unwrap();
    let b = sched
        .start_script(bytecode("b", vec![push(Val::Long(2)), Instr::Return]))
        .unwrap();

    // One instruction per pass at the default priority
    sched.run_ready(0);
    assert_eq!(sched.executor(a).unwrap().instr_cycles(), 1);
    assert_eq!(sched.executor(b).unwrap().instr_cycles(), 1);
    assert_eq!(sched.ready_count(), 2);

    sched.run_ready(0);
    let exits = sched.take_exits();
    assert_eq!(exits.len(), 2);
    assert_eq!((exits[0].pid, &exits[0].result), (a, &Val::Long(1)));
    assert_eq!((exits[1].pid, &exits[1].result), (b, &Val::Long(2)));
    assert!(sched.is_empty());
}

#[test]
fn test_priority_sets_slice_length() {
    let mut sched = scheduler();
    let options = ExecutorOptions {
        priority: 3,
        ..ExecutorOptions::default()
    };
    let pid = sched
        .start_script_with(bytecode("loop", vec![Instr::Jump { target: 0 }]), options)
        .unwrap();

    sched.run_ready(0);
    assert_eq!(sched.executor(pid).unwrap().instr_cycles(), 3);
    assert!(sched.is_ready(pid));
}

#[test]
fn test_priority_divide_shrinks_slice() {
    let mut sched = scheduler_with(SchedulerConfig {
        priority_divide: 4,
        default_priority: 8,
        ..SchedulerConfig::default()
    });
    let pid = sched
        .start_script(bytecode("loop", vec![Instr::Jump { target: 0 }]))
        .unwrap();

    sched.run_ready(0);
    assert_eq!(sched.executor(pid).unwrap().instr_cycles(), 2);
}

#[test]
fn test_check_blocked_wakes_at_exact_clock() {
    let mut sched = scheduler();
    let pid = sched
        .start_script(bytecode("sleeper", vec![Instr::Sleep { ms: 100 }, Instr::Return]))
        .unwrap();

    sched.run_ready(0);
    assert_eq!(sched.executor_info(pid).unwrap().hold_list, HoldListType::Timeout);
    assert_eq!(sched.executor(pid).unwrap().state(), ExecutorState::Sleeping);

    let mut clocksleft = 1000;
    sched.check_blocked(99, &mut clocksleft);
    assert_eq!(clocksleft, 1);
    assert!(!sched.is_ready(pid));

    let mut clocksleft = 1000;
    sched.check_blocked(100, &mut clocksleft);
    assert!(sched.is_ready(pid));
    assert_eq!(clocksleft, 1000);
    assert_eq!(sched.executor(pid).unwrap().sleep_cycles(), 1);

    sched.run_ready(100);
    let exit = &sched.exits()[0];
    assert_eq!(exit.result, Val::sentinel());
    assert_eq!(exit.sleep_cycles, 1);
}

#[test]
fn test_clocksleft_is_never_raised() {
    let mut sched = scheduler();
    sched
        .start_script(bytecode("sleeper", vec![Instr::Sleep { ms: 500 }]))
        .unwrap();
    sched.run_ready(0);

    let mut clocksleft = 5;
    sched.check_blocked(0, &mut clocksleft);
    assert_eq!(clocksleft, 5);
}

#[test]
fn test_same_wake_clock_revives_in_sleep_order() {
    let mut sched = scheduler();
    let a = sched
        .start_script(bytecode("a", vec![Instr::Sleep { ms: 10 }, Instr::Return]))
        .unwrap();
    let b = sched
        .start_script(bytecode("b", vec![Instr::Sleep { ms: 10 }, Instr::Return]))
        .unwrap();
    sched.run_ready(0);

    let mut clocksleft = 100;
    sched.check_blocked(10, &mut clocksleft);
    sched.run_ready(10);
    let order: Vec<_> = sched.exits().iter().map(|e| e.pid).collect();
    assert_eq!(order, vec![a, b]);
}

#[test]
fn test_calc_script_clocksleft() {
    let mut sched = scheduler();
    assert_eq!(sched.calc_script_clocksleft(0), None);

    let pid = sched
        .start_script(bytecode("sleeper", vec![Instr::Sleep { ms: 250 }, Instr::Return]))
        .unwrap();
    assert_eq!(sched.calc_script_clocksleft(0), Some(0));

    sched.run_ready(1000);
    assert_eq!(sched.calc_script_clocksleft(1000), Some(250));
    assert_eq!(sched.calc_script_clocksleft(1200), Some(50));
    // Overdue wakes count as due now
    assert_eq!(sched.calc_script_clocksleft(2000), Some(0));

    sched.deschedule_executor(pid);
    assert_eq!(sched.calc_script_clocksleft(2000), None);
}

#[test]
fn test_wait_without_timeout_is_not_counted() {
    let mut sched = scheduler();
    sched
        .start_script(bytecode(
            "listener",
            vec![Instr::WaitForEvent { timeout: None }, Instr::Return],
        ))
        .unwrap();
    sched.run_ready(0);

    assert_eq!(sched.blocked_count(), 1);
    assert_eq!(sched.calc_script_clocksleft(0), None);
}

#[test]
fn test_deschedule_removes_from_all_tracking() {
    let mut sched = scheduler();
    let pid = sched
        .start_script(bytecode("sleeper", vec![Instr::Sleep { ms: 100 }, Instr::Return]))
        .unwrap();
    sched.run_ready(0);
    assert_eq!(sched.blocked_count(), 1);

    let ex = sched.deschedule_executor(pid).unwrap();
    assert_eq!(ex.pid(), pid);
    assert!(!sched.contains(pid));
    assert_eq!(sched.blocked_count(), 0);
    assert_eq!(sched.ready_count(), 0);

    // Nothing left to wake
    let mut clocksleft = 1000;
    sched.check_blocked(100, &mut clocksleft);
    assert_eq!(sched.ready_count(), 0);
    assert!(sched.deschedule_executor(pid).is_none());
}

#[test]
fn test_destroying_executor_aborts_every_request() {
    let engine = ScriptedEngine::new();
    engine.on("quest", Behavior::Defer);
    let mut sched = scheduler_with_engine(engine.clone());
    let pid = sched.start_script(engine_program("quest.js", "quest")).unwrap();
    sched.run_ready(0);
    sched
        .make_request(pid, EntityId(10), RequestKind::TargetObject, passthrough())
        .unwrap();
    sched
        .make_request(pid, EntityId(11), RequestKind::TextEntry, passthrough())
        .unwrap();
    assert_eq!(sched.requests().len(), 2);

    let ex = sched.deschedule_executor(pid).unwrap();
    assert!(ex.requests().is_empty());
    assert!(sched.requests().is_empty());
    assert!(!sched.requests().references(pid));
    assert!(sched.entity_requests(EntityId(10)).is_none());
    assert!(sched.entity_requests(EntityId(11)).is_none());
    assert_eq!(engine.delayed.lock().unwrap().len(), 2);
}

#[test]
fn test_destroying_executor_leaves_sentinel_in_slot() {
    let mut sched = scheduler();
    let pid = sched.start_script(bytecode("t", vec![push(Val::Long(4)), Instr::Return])).unwrap();
    sched.run_ready(0);
    sched
        .make_request(pid, EntityId(10), RequestKind::TargetObject, passthrough())
        .unwrap();

    let ex = sched.deschedule_executor(pid).unwrap();
    assert!(ex.requests().is_empty());
    assert!(sched.requests().is_empty());
    assert_eq!(ex.value_stack(), &[Val::Long(4), Val::sentinel()]);
}

#[test]
fn test_destroying_executor_discards_events() {
    let mut sched = scheduler();
    let pid = sched
        .start_script(bytecode("sleeper", vec![Instr::Sleep { ms: 100 }]))
        .unwrap();
    sched.signal_event(pid, Val::Long(1)).unwrap();
    sched.signal_event(pid, Val::Long(2)).unwrap();

    let mut ex = sched.deschedule_executor(pid).unwrap();
    assert_eq!(ex.events_waiting(), 0);
    assert_eq!(ex.clear_event_queue(), 0);
}

#[test]
fn test_event_wakes_waiting_script() {
    let mut sched = scheduler();
    let pid = sched
        .start_script(bytecode(
            "listener",
            vec![Instr::WaitForEvent { timeout: None }, Instr::Return],
        ))
        .unwrap();
    sched.run_ready(0);
    assert!(!sched.is_ready(pid));

    let delivery = sched.signal_event(pid, Val::Str("hello".into())).unwrap();
    assert_eq!(delivery, EventDelivery::Woke);
    assert!(sched.is_ready(pid));
    assert_eq!(sched.blocked_count(), 0);

    sched.run_ready(1);
    assert_eq!(sched.exits()[0].result, Val::Str("hello".into()));
}

#[test]
fn test_wait_for_event_times_out_with_sentinel() {
    let mut sched = scheduler();
    sched
        .start_script(bytecode(
            "listener",
            vec![Instr::WaitForEvent { timeout: Some(50) }, Instr::Return],
        ))
        .unwrap();
    sched.run_ready(0);

    let mut clocksleft = 1000;
    sched.check_blocked(50, &mut clocksleft);
    sched.run_ready(50);
    assert_eq!(sched.exits()[0].result, Val::sentinel());
}

#[test]
fn test_full_queue_rejects_third_event() {
    let mut sched = scheduler();
    let options = ExecutorOptions {
        event_queue_size: 2,
        priority: 2,
        ..ExecutorOptions::default()
    };
    let pid = sched
        .start_script_with(
            bytecode(
                "reader",
                vec![
                    Instr::WaitForEvent { timeout: Some(0) },
                    Instr::WaitForEvent { timeout: Some(0) },
                    Instr::Return,
                ],
            ),
            options,
        )
        .unwrap();

    assert_eq!(sched.signal_event(pid, Val::Str("A".into())), Ok(EventDelivery::Queued));
    assert_eq!(sched.signal_event(pid, Val::Str("B".into())), Ok(EventDelivery::Queued));
    let err = sched.signal_event(pid, Val::Str("C".into())).unwrap_err();
    assert!(matches!(err, SignalError::QueueFull { capacity: 2, .. }));
    assert_eq!(err.into_event(), Val::Str("C".into()));
    assert_eq!(sched.executor(pid).unwrap().events_waiting(), 2);

    // Both waits in one slice take the events in delivery order
    sched.run_ready(0);
    assert_eq!(
        sched.executor(pid).unwrap().value_stack(),
        &[Val::Str("A".into()), Val::Str("B".into())]
    );
}

#[test]
fn test_signal_unknown_pid_returns_event() {
    let mut sched = scheduler();
    let err = sched
        .signal_event(crate::types::Pid(99), Val::Long(3))
        .unwrap_err();
    assert_eq!(err.into_event(), Val::Long(3));
}

#[test]
fn test_faulted_script_is_retired_with_error() {
    let mut sched = scheduler();
    let pid = sched
        .start_script(bytecode(
            "bad",
            vec![push("text"), Instr::Incr { by: 1 }],
        ))
        .unwrap();
    run_passes(&mut sched, 0, 10);

    let exit = &sched.exits()[0];
    assert_eq!(exit.pid, pid);
    assert_eq!(exit.reason, ExitReason::Faulted);
    assert!(matches!(&exit.result, Val::Error(info) if info.code == SCRIPT_FAULT));
    assert!(!sched.contains(pid));
}

#[test]
fn test_runaway_script_is_terminated() {
    let mut sched = scheduler_with(SchedulerConfig {
        runaway_script_threshold: 10,
        max_runaway_cycles: Some(30),
        default_priority: 100,
        ..SchedulerConfig::default()
    });
    let pid = sched
        .start_script(bytecode("spin", vec![Instr::Jump { target: 0 }]))
        .unwrap();

    sched.run_ready(0);
    let exit = &sched.exits()[0];
    assert_eq!(exit.pid, pid);
    assert_eq!(exit.reason, ExitReason::Runaway);
    assert_eq!(exit.instr_cycles, 30);
    assert!(matches!(&exit.result, Val::Error(info) if info.code == RUNAWAY));
}

#[test]
fn test_runaway_warning_only_without_limit() {
    let mut sched = scheduler_with(SchedulerConfig {
        runaway_script_threshold: 10,
        default_priority: 100,
        ..SchedulerConfig::default()
    });
    let pid = sched
        .start_script(bytecode("spin", vec![Instr::Jump { target: 0 }]))
        .unwrap();

    sched.run_ready(0);
    assert!(sched.contains(pid));
    assert_eq!(sched.executor(pid).unwrap().runaway_cycles(), 100);
}

#[test]
fn test_halt_and_revive_debugged() {
    let mut sched = scheduler();
    let pid = sched
        .start_script(bytecode(
            "debug",
            vec![Instr::Breakpoint, push(Val::Long(3)), Instr::Return],
        ))
        .unwrap();

    sched.run_ready(0);
    assert_eq!(sched.executor(pid).unwrap().state(), ExecutorState::Debugging);
    assert_eq!(sched.executor_info(pid).unwrap().hold_list, HoldListType::Debugger);

    sched.run_ready(1);
    assert_eq!(sched.executor(pid).unwrap().instr_cycles(), 1);

    sched.revive_debugged(pid).unwrap();
    assert!(sched.is_ready(pid));
    run_passes(&mut sched, 2, 10);
    assert_eq!(sched.exits()[0].result, Val::Long(3));
}

#[test]
fn test_halt_sleeping_script_keeps_it_blocked() {
    let mut sched = scheduler();
    let pid = sched
        .start_script(bytecode("sleeper", vec![Instr::Sleep { ms: 100 }, Instr::Return]))
        .unwrap();
    sched.run_ready(0);

    sched.halt(pid).unwrap();
    assert_eq!(sched.blocked_count(), 0);
    assert!(sched.revive_debugged(crate::types::Pid(42)).is_err());

    sched.revive_debugged(pid).unwrap();
    assert_eq!(sched.executor_info(pid).unwrap().hold_list, HoldListType::Timeout);
}

#[test]
fn test_profile_log_does_not_change_exit() {
    let mut sched = scheduler_with(SchedulerConfig {
        profile_scripts: true,
        profile_min_cycles: 1,
        ..SchedulerConfig::default()
    });
    sched.start_script(bytecode("p", vec![push(Val::Long(1)), Instr::Return])).unwrap();
    run_passes(&mut sched, 0, 10);
    assert_eq!(sched.exits()[0].instr_cycles, 2);
}

#[test]
fn test_shutdown_aborts_outstanding_work() {
    let mut sched = scheduler();
    let a = sched.start_script(bytecode("a", waiter())).unwrap();
    sched
        .make_request(a, EntityId(5), RequestKind::TargetCursor, passthrough())
        .unwrap();
    sched
        .start_script(bytecode("b", vec![Instr::Sleep { ms: 10 }]))
        .unwrap();
    sched.run_ready(0);

    sched.shutdown();
    assert!(sched.is_empty());
    assert!(sched.requests().is_empty());
    assert!(sched
        .exits()
        .iter()
        .all(|e| e.reason == ExitReason::Shutdown));
}

#[test]
fn test_executor_info_serializes() {
    let mut sched = scheduler();
    let pid = sched.start_script(bytecode("info", waiter())).unwrap();
    let info = sched.executor_info(pid).unwrap();
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["scriptname"], "info");
    assert_eq!(json["state"], "Running");
    assert_eq!(json["program_type"], "bytecode");
    assert_eq!(sched.list_executors().len(), 1);
}
