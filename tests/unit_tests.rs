//! End-to-end tests: compile a program, load it into the VM and drive it
//! on a simulated bus.


use jacscript::{
    Binding, DeviceId, Packet, PanicCode, Runner, RunnerConfig, RunnerState, VmConfig, VmError,
};
use jacscript_core::format::Params;
use jacscript_core::{Instr, OpAsync, OpCall, OpSync, OpTop};
use jacscript_registry::builtin;
use test_harness::{GAUGE, SimEnv, compile_script, load, run_until};

fn decode(code: &[u16]) -> Vec<(Instr, Params)> {
    let mut out = Vec::new();
    let mut p = Params::default();
    for &w in code {
        let i = Instr(w);
        if p.absorb(i) {
            continue;
        }
        out.push((i, p.resolve(i)));
        p = Params::default();
    }
    out
}

// =============================================================================
// Scenario A: event subscription
// =============================================================================

#[test]
fn button_subscription_compiles_to_a_dispatcher() {
    let res = compile_script(|b| {
        vec![
            b.var("btn", Some(b.call(b.path("roles.button"), &[]))),
            b.var("led", Some(b.call(b.path("roles.led"), &[]))),
            b.expr_stmt(b.call(
                b.path("btn.pressed.sub"),
                &[b.arrow(&[], &[b.expr_stmt(b.call(b.path("led.on"), &[]))])],
            )),
        ]
    });
    assert_eq!(res.roles.len(), 2);

    let disp = res.functions.iter().find(|f| f.name == "btn_disp").unwrap();
    let code = decode(&disp.code);
    let observe = code
        .iter()
        .position(|(i, _)| i.op() == Some(OpTop::Sync) && i.arg8() == OpSync::ObserveRole as u16)
        .expect("dispatcher observes its role");
    let call = code
        .iter()
        .position(|(i, _)| {
            i.op() == Some(OpTop::Call) && (i.arg8() >> 6) as u8 == OpCall::BgMax1Pend1 as u8
        })
        .expect("dispatcher starts the handler");
    assert!(observe < call);
    assert!(
        code[observe..call]
            .iter()
            .any(|(i, _)| i.op() == Some(OpTop::Jump) && i.jump_if_zero())
    );
}

#[test]
fn button_press_turns_the_led_on() {
    let env = SimEnv::new()
        .with_device(1, &[builtin::BUTTON])
        .with_device(2, &[builtin::LED]);
    let mut vm = load(env, VmConfig::new(), |b| {
        vec![
            b.var("btn", Some(b.call(b.path("roles.button"), &[]))),
            b.var("led", Some(b.call(b.path("roles.led"), &[]))),
            b.expr_stmt(b.call(
                b.path("btn.pressed.sub"),
                &[b.arrow(&[], &[b.expr_stmt(b.call(b.path("led.on"), &[]))])],
            )),
        ]
    });
    vm.start().unwrap();
    run_until(&mut vm, 600).unwrap();
    assert_eq!(
        vm.role_binding(0),
        Some(Binding {
            device: DeviceId(1),
            service_index: 1
        })
    );
    assert!(vm.env().sent.is_empty());

    vm.process_packet(Packet::event(DeviceId(1), 1, 0x01, vec![]))
        .unwrap();
    let sent = &vm.env().sent;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], Packet::command(DeviceId(2), 1, 0x80, vec![]));
    // only the dispatcher is left
    assert_eq!(vm.num_fibers(), 1);

    // other events and other devices are ignored
    vm.process_packet(Packet::event(DeviceId(1), 1, 0x02, vec![0; 4]))
        .unwrap();
    vm.process_packet(Packet::event(DeviceId(3), 1, 0x01, vec![]))
        .unwrap();
    assert_eq!(vm.env().sent.len(), 1);
}

// =============================================================================
// Scenario B: sleeping
// =============================================================================

#[test]
fn wait_compiles_to_a_millisecond_yield() {
    let res = compile_script(|b| vec![b.expr_stmt(b.call(b.ident("wait"), &[b.num(1.0)]))]);
    let sleep = decode(&res.functions[0].code)
        .into_iter()
        .find(|(i, _)| i.op() == Some(OpTop::Async) && i.arg8() == OpAsync::Yield as u16)
        .map(|(_, p)| p.a);
    assert_eq!(sleep, Some(1001));
}

#[test]
fn wait_resumes_after_the_delay() {
    let mut vm = load(SimEnv::new(), VmConfig::new(), |b| {
        vec![
            b.expr_stmt(b.call(b.ident("wait"), &[b.num(1.0)])),
            b.expr_stmt(b.call(b.ident("print"), &[b.str("awake")])),
        ]
    });
    vm.start().unwrap();
    assert_eq!(vm.next_deadline(), Some(500));

    run_until(&mut vm, 999).unwrap();
    assert!(vm.env().logs.is_empty());
    run_until(&mut vm, 1001).unwrap();
    assert_eq!(vm.env().logs, vec!["awake"]);
    assert_eq!(vm.num_fibers(), 0);
}

// =============================================================================
// Scenario C: register writes
// =============================================================================

fn write_gauge(env: SimEnv) -> jacscript::Vm<SimEnv> {
    load(env, VmConfig::new(), |b| {
        vec![
            b.var("g", Some(b.call(b.path("roles.gauge"), &[]))),
            b.expr_stmt(b.call(b.path("g.value.write"), &[b.num(5.0)])),
        ]
    })
}

#[test]
fn register_write_sends_little_endian_payload() {
    let mut vm = write_gauge(SimEnv::new().with_device(7, &[builtin::LED, GAUGE]));
    vm.device_connected(DeviceId(7)).unwrap();
    assert!(vm.is_role_connected(0));
    vm.start().unwrap();

    let sent = &vm.env().sent;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], Packet::command(DeviceId(7), 2, 0x2002, vec![5, 0, 0, 0]));
    assert_eq!(vm.num_fibers(), 0);
}

#[test]
fn register_write_waits_for_binding() {
    let mut vm = write_gauge(SimEnv::new());
    vm.start().unwrap();
    assert!(vm.env().sent.is_empty());
    assert_eq!(vm.num_fibers(), 1);

    run_until(&mut vm, 1200).unwrap();
    assert!(vm.env().sent.is_empty());

    vm.env_mut().add_device(3, &[GAUGE]);
    run_until(&mut vm, 1500).unwrap();
    assert_eq!(
        vm.env().sent,
        vec![Packet::command(DeviceId(3), 1, 0x2002, vec![5, 0, 0, 0])]
    );
    assert_eq!(vm.num_fibers(), 0);
}

// =============================================================================
// Scenario D: runaway code
// =============================================================================

#[test]
fn step_budget_stops_only_the_runaway_fiber() {
    let config = VmConfig::new().with_step_budget(1000);
    let mut vm = load(SimEnv::new(), config, |b| {
        vec![
            b.function("spin", &[], &[b.expr_stmt(b.call(b.ident("spin"), &[]))]),
            b.expr_stmt(b.call(
                b.ident("every"),
                &[
                    b.num(0.1),
                    b.arrow(&[], &[b.expr_stmt(b.call(b.ident("print"), &[b.str("tick")]))]),
                ],
            )),
            b.expr_stmt(b.call(b.ident("spin"), &[])),
        ]
    });

    let err = vm.start().unwrap_err();
    assert!(matches!(err, VmError::Timeout { steps: 1000, .. }), "{err}");
    assert_eq!(vm.panic_code(), None);
    assert_eq!(vm.num_fibers(), 1);

    run_until(&mut vm, 300).unwrap();
    assert_eq!(vm.env().logs, vec!["tick", "tick"]);
}

#[test]
fn runaway_fiber_does_not_hide_the_packet_from_others() {
    let config = VmConfig::new().with_step_budget(1000);
    let env = SimEnv::new().with_device(1, &[builtin::BUTTON]);
    let mut vm = load(env, config, |b| {
        vec![
            b.function("spin", &[], &[b.expr_stmt(b.call(b.ident("spin"), &[]))]),
            b.var("btn", Some(b.call(b.path("roles.button"), &[]))),
            b.expr_stmt(b.call(
                b.path("btn.pressed.sub"),
                &[b.arrow(&[], &[b.expr_stmt(b.call(b.ident("print"), &[b.str("sub")]))])],
            )),
            b.expr_stmt(b.call(b.path("btn.pressed.wait"), &[])),
            b.expr_stmt(b.call(b.ident("spin"), &[])),
        ]
    });
    vm.start().unwrap();
    run_until(&mut vm, 600).unwrap();

    let err = vm
        .process_packet(Packet::event(DeviceId(1), 1, 0x01, vec![]))
        .unwrap_err();
    assert!(matches!(err, VmError::Timeout { steps: 1000, .. }), "{err}");
    assert_eq!(vm.panic_code(), None);
    assert_eq!(vm.env().logs, vec!["sub"]);

    // the error is reported once
    run_until(&mut vm, 2000).unwrap();
    assert_eq!(vm.env().logs, vec!["sub"]);
}

// =============================================================================
// Scheduling
// =============================================================================

#[test]
fn busy_handler_runs_once_more() {
    let env = SimEnv::new().with_device(1, &[builtin::BUTTON]);
    let mut vm = load(env, VmConfig::new(), |b| {
        vec![
            b.var("btn", Some(b.call(b.path("roles.button"), &[]))),
            b.expr_stmt(b.call(
                b.path("btn.pressed.sub"),
                &[b.arrow(
                    &[],
                    &[
                        b.expr_stmt(b.call(b.ident("wait"), &[b.num(1.0)])),
                        b.expr_stmt(b.call(b.ident("print"), &[b.str("pressed")])),
                    ],
                )],
            )),
        ]
    });
    vm.start().unwrap();
    run_until(&mut vm, 600).unwrap();

    let press = || Packet::event(DeviceId(1), 1, 0x01, vec![]);
    vm.process_packet(press()).unwrap();
    assert_eq!(vm.num_fibers(), 2);
    for t in [700, 800] {
        vm.env_mut().now = t;
        vm.process_packet(press()).unwrap();
    }
    assert_eq!(vm.num_fibers(), 2);

    run_until(&mut vm, 1601).unwrap();
    assert_eq!(vm.env().logs.len(), 1);
    run_until(&mut vm, 4000).unwrap();
    assert_eq!(vm.env().logs, vec!["pressed", "pressed"]);
    assert_eq!(vm.num_fibers(), 1);
}

#[test]
fn disconnect_fires_handler_and_unbinds() {
    let env = SimEnv::new().with_device(1, &[builtin::BUTTON]);
    let mut vm = load(env, VmConfig::new(), |b| {
        vec![
            b.var("btn", Some(b.call(b.path("roles.button"), &[]))),
            b.expr_stmt(b.call(
                b.path("btn.onDisconnected"),
                &[b.arrow(&[], &[b.expr_stmt(b.call(b.ident("print"), &[b.str("gone")]))])],
            )),
        ]
    });
    vm.start().unwrap();
    run_until(&mut vm, 600).unwrap();
    assert!(vm.is_role_connected(0));

    vm.env_mut().remove_device(1);
    vm.device_disconnected(DeviceId(1)).unwrap();
    assert!(!vm.is_role_connected(0));
    assert_eq!(vm.env().logs, vec!["gone"]);
}

#[test]
fn condition_signal_wakes_subscribers() {
    let mut vm = load(SimEnv::new(), VmConfig::new(), |b| {
        vec![
            b.var("c", Some(b.call(b.ident("condition"), &[]))),
            b.expr_stmt(b.call(
                b.path("c.signalled.sub"),
                &[b.arrow(&[], &[b.expr_stmt(b.call(b.ident("print"), &[b.str("signalled")]))])],
            )),
            b.expr_stmt(b.call(b.path("c.signal"), &[])),
        ]
    });
    vm.start().unwrap();
    assert!(vm.is_role_connected(0));
    assert_eq!(vm.env().logs, vec!["signalled"]);
    // local roles never reach the bus
    assert!(vm.env().sent.is_empty());
}

// =============================================================================
// Registers
// =============================================================================

#[test]
fn register_read_is_queried_and_cached() {
    let env = SimEnv::new().with_device(4, &[builtin::POTENTIOMETER]);
    let mut vm = load(env, VmConfig::new(), |b| {
        vec![
            b.var("p", Some(b.call(b.path("roles.potentiometer"), &[]))),
            b.expr_stmt(b.call(
                b.ident("print"),
                &[b.str("{0}"), b.call(b.path("p.position.read"), &[])],
            )),
        ]
    });
    vm.start().unwrap();
    run_until(&mut vm, 560).unwrap();

    // sent at bind time, then resent after 20 and 40 ms
    let gets = vm.env().sent_with(0x1101);
    assert_eq!(gets.len(), 3);
    assert_eq!(*gets[0], Packet::command(DeviceId(4), 1, 0x1101, vec![]));

    vm.process_packet(Packet::report(DeviceId(4), 1, 0x1101, vec![0x00, 0x80]))
        .unwrap();
    assert_eq!(vm.env().logs, vec!["0.5"]);
    assert_eq!(vm.cached_registers(), 1);
    assert_eq!(vm.num_fibers(), 0);
}

fn read_gauge(env: SimEnv) -> jacscript::Vm<SimEnv> {
    load(env, VmConfig::new(), |b| {
        vec![
            b.var("g", Some(b.call(b.path("roles.gauge"), &[]))),
            b.expr_stmt(b.call(
                b.ident("print"),
                &[b.str("{0}"), b.call(b.path("g.value.read"), &[])],
            )),
        ]
    })
}

/// Times at which ticking the VM up to `until` sent something.
fn send_times(vm: &mut jacscript::Vm<SimEnv>, until: u64) -> Vec<u64> {
    let mut times = Vec::new();
    while let Some(next) = vm.next_deadline() {
        if next > until {
            break;
        }
        let before = vm.env().sent.len();
        vm.env_mut().now = next;
        vm.tick().unwrap();
        if vm.env().sent.len() > before {
            times.push(next);
        }
    }
    times
}

#[test]
fn unanswered_query_backs_off() {
    let mut vm = read_gauge(SimEnv::new().with_device(7, &[GAUGE]));
    vm.start().unwrap();

    let times = send_times(&mut vm, 4000);
    // bound at 500, then 20, 40, 80, ... capped at 1000
    assert_eq!(times, vec![500, 520, 560, 640, 800, 1120, 1760, 2760, 3760]);
    assert!(vm.env().sent.iter().all(|p| p.service_command == 0x1002));
    assert_eq!(vm.num_fibers(), 1);
}

#[test]
fn query_waits_while_the_device_is_gone() {
    let mut vm = read_gauge(SimEnv::new().with_device(7, &[GAUGE]));
    vm.start().unwrap();
    run_until(&mut vm, 600).unwrap();
    assert_eq!(vm.env().sent_with(0x1002).len(), 3);

    vm.env_mut().remove_device(7);
    vm.device_disconnected(DeviceId(7)).unwrap();
    assert!(!vm.is_role_connected(0));
    run_until(&mut vm, 2000).unwrap();
    assert_eq!(vm.env().sent_with(0x1002).len(), 3);
    assert_eq!(vm.num_fibers(), 1);

    vm.env_mut().add_device(7, &[GAUGE]);
    run_until(&mut vm, 2600).unwrap();
    assert_eq!(vm.env().sent_with(0x1002).len(), 4);
    assert_eq!(
        vm.env().sent.last(),
        Some(&Packet::command(DeviceId(7), 1, 0x1002, vec![]))
    );

    vm.process_packet(Packet::report(DeviceId(7), 1, 0x1002, vec![5, 0, 0, 0]))
        .unwrap();
    assert_eq!(vm.env().logs, vec!["5"]);
    assert_eq!(vm.num_fibers(), 0);
}

#[test]
fn auto_refresh_skips_unbound_roles() {
    let env = SimEnv::new().with_device(7, &[GAUGE]);
    let mut vm = load(env, VmConfig::new(), |b| {
        let watch = |role: &str| {
            b.expr_stmt(b.call(
                b.path(&format!("{role}.value.onChange")),
                &[
                    b.num(1.0),
                    b.arrow(&[], &[b.expr_stmt(b.call(b.ident("print"), &[b.str(role)]))]),
                ],
            ))
        };
        vec![
            b.var("a", Some(b.call(b.path("roles.gauge"), &[]))),
            b.var("b", Some(b.call(b.path("roles.gauge"), &[]))),
            watch("a"),
            watch("b"),
        ]
    });
    vm.start().unwrap();
    run_until(&mut vm, 600).unwrap();
    assert!(vm.is_role_connected(0));
    assert!(!vm.is_role_connected(1));

    run_until(&mut vm, 3000).unwrap();
    let before = vm.env().sent_with(0x1002).len();
    assert!(before >= 4, "{before} gets");
    vm.process_packet(Packet::report(DeviceId(7), 1, 0x1002, vec![5, 0, 0, 0]))
        .unwrap();
    assert_eq!(vm.env().logs, vec!["a"]);

    // a silent device does not stop the loop either
    run_until(&mut vm, 6000).unwrap();
    assert!(vm.env().sent_with(0x1002).len() >= before + 5);
    assert!(
        vm.env()
            .sent
            .iter()
            .all(|p| *p == Packet::command(DeviceId(7), 1, 0x1002, vec![]))
    );
}

// =============================================================================
// Builtins and panics
// =============================================================================

#[test]
fn print_formats_arguments() {
    let mut vm = load(SimEnv::new(), VmConfig::new(), |b| {
        vec![b.expr_stmt(b.call(
            b.ident("print"),
            &[b.str("x={0} y={1} {{2}"), b.num(1.0), b.num(2.5)],
        ))]
    });
    vm.start().unwrap();
    assert_eq!(vm.env().logs, vec!["x=1 y=2.5 {2}"]);
}

#[test]
fn upload_passes_label_and_values() {
    let mut vm = load(SimEnv::new(), VmConfig::new(), |b| {
        vec![b.expr_stmt(b.call(
            b.ident("upload"),
            &[b.str("temp"), b.num(21.5), b.num(3.0)],
        ))]
    });
    vm.start().unwrap();
    assert_eq!(
        vm.env().uploads,
        vec![("temp".to_string(), vec![21.5, 3.0])]
    );
    // the uploader backs off before finishing
    assert_eq!(vm.num_fibers(), 1);
    run_until(&mut vm, 200).unwrap();
    assert_eq!(vm.num_fibers(), 0);
}

#[test]
fn panic_is_reported_once() {
    let mut vm = load(SimEnv::new(), VmConfig::new(), |b| {
        vec![
            b.expr_stmt(b.call(b.ident("panic"), &[b.num(7.0)])),
            b.expr_stmt(b.call(b.ident("print"), &[b.str("unreachable")])),
        ]
    });
    assert_eq!(vm.start(), Err(VmError::Panic(PanicCode::User(7))));
    assert_eq!(vm.panic_code(), Some(PanicCode::User(7)));
    assert_eq!(vm.next_deadline(), None);
    assert_eq!(vm.tick(), Ok(()));
    assert_eq!(vm.start(), Ok(()));
    assert!(vm.into_env().logs.is_empty());
}

// =============================================================================
// Runner
// =============================================================================

fn runner(config: RunnerConfig, code: f64) -> Runner<SimEnv> {
    let res = compile_script(|b| {
        let stmt = if code == 0.0 {
            b.expr_stmt(b.call(b.ident("reboot"), &[]))
        } else {
            b.expr_stmt(b.call(b.ident("panic"), &[b.num(code)]))
        };
        vec![stmt]
    });
    Runner::new(&res.image, SimEnv::new(), VmConfig::new(), config).unwrap()
}

#[test]
fn runner_waits_then_reports_panic() {
    let mut runner = runner(RunnerConfig::new(), 42.0);
    assert_eq!(runner.poll(), Ok(None));
    assert_eq!(runner.state(), RunnerState::Initializing);
    assert_eq!(runner.next_deadline(), Some(500));

    runner.vm_mut().env_mut().now = 1100;
    assert_eq!(runner.poll(), Ok(Some(42)));
    assert_eq!(runner.state(), RunnerState::Error);
    assert_eq!(runner.poll(), Ok(None));
    assert_eq!(runner.next_deadline(), None);
}

#[test]
fn runner_restarts_after_reboot() {
    let mut runner = runner(RunnerConfig::new().with_start_delay(100), 0.0);
    runner.vm_mut().env_mut().now = 100;
    assert_eq!(runner.poll(), Ok(Some(0)));
    assert_eq!(runner.state(), RunnerState::Initializing);
    assert_eq!(runner.vm().panic_code(), None);
    assert_eq!(runner.next_deadline(), Some(200));

    runner.vm_mut().env_mut().now = 200;
    assert_eq!(runner.poll(), Ok(Some(0)));
}

#[test]
fn runner_auto_restart() {
    let mut runner = runner(RunnerConfig::new().with_auto_restart(true), 3.0);
    runner.vm_mut().env_mut().now = 1100;
    assert_eq!(runner.poll(), Ok(Some(3)));
    assert_eq!(runner.state(), RunnerState::Initializing);
}
