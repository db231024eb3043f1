use std::{
    thread,
    time::{Duration, Instant},
};

use motion_engine::{
    AxisConfig, AxisPoll, AxisSample, AxisStatus, CardConfig, CommHealth, Controller, Direction,
    MotionPrimitive, Poller, PollerConfig,
    mock::{MockChannel, ScriptedDriver, Step},
};

fn poller_config() -> PollerConfig {
    PollerConfig {
        moving_period_ms: 10,
        idle_period_ms: 50,
        update_delay_ms: 0,
        timeout_ms: 1000,
    }
}

fn card_with(driver: &ScriptedDriver, axes: Vec<AxisConfig>) -> (Controller, Poller) {
    let config = CardConfig {
        name: "bench".to_string(),
        poller: poller_config(),
        axes,
    };
    Controller::new(config, Box::new(driver.clone()), Box::new(MockChannel::new()))
}

fn card(driver: &ScriptedDriver) -> (Controller, Poller) {
    card_with(driver, vec![AxisConfig::default()])
}

fn settle(controller: &Controller, poller: &mut Poller, max_cycles: usize) -> AxisStatus {
    for _ in 0..max_cycles {
        poller.cycle();
        let status = controller.read_status(0).unwrap();
        if status.is_done() && !status.has_pending_motion() {
            return status;
        }
    }
    panic!("axis did not settle in {max_cycles} cycles");
}

fn count(commands: &[String], wanted: &str) -> usize {
    commands.iter().filter(|command| *command == wanted).count()
}

#[test]
fn comm_error_only_after_two_consecutive_failures() {
    let driver = ScriptedDriver::new(1);
    let (controller, mut poller) = card(&driver);
    driver.set_position(0, 1000);

    poller.cycle();
    assert_eq!(poller.health(), CommHealth::Normal);

    driver.fail_next(0, 2);
    let report = poller.cycle();
    assert_eq!(report.axes, vec![AxisPoll::Skipped]);
    assert_eq!(poller.health(), CommHealth::Retry);
    let status = controller.read_status(0).unwrap();
    assert!(!status.flags.problem);
    assert!(!status.flags.comm_error);

    let report = poller.cycle();
    assert_eq!(report.axes, vec![AxisPoll::Faulted]);
    assert_eq!(poller.health(), CommHealth::CommErr);
    let status = controller.read_status(0).unwrap();
    assert!(status.flags.problem);
    assert!(status.flags.comm_error);

    let report = poller.cycle();
    assert_eq!(report.axes, vec![AxisPoll::Updated]);
    assert_eq!(poller.health(), CommHealth::Normal);
    let status = controller.read_status(0).unwrap();
    assert!(!status.flags.comm_error);
    assert!(!status.flags.problem);
}

#[test]
fn comm_fault_completes_the_pending_motion() {
    let driver = ScriptedDriver::new(1);
    let (controller, mut poller) = card(&driver);
    poller.cycle();

    controller
        .request_motion(0, MotionPrimitive::MoveAbsolute(5000))
        .unwrap();
    driver.fail_next(0, 2);
    poller.cycle();
    assert!(!controller.read_status(0).unwrap().is_done());

    let watcher = controller.subscribe(0).unwrap();
    poller.cycle();
    assert!(watcher.has_changed().unwrap());
    let status = controller.read_status(0).unwrap();
    assert!(status.is_done());
    assert!(status.flags.comm_error);
    assert!(!status.has_pending_motion());
}

#[test]
fn identical_samples_debounce_into_done() {
    let driver = ScriptedDriver::new(1);
    let (controller, mut poller) = card(&driver);
    driver.set_position(0, 1000);

    poller.cycle();
    let status = controller.read_status(0).unwrap();
    assert_eq!(status.position, 1000);
    assert_eq!(status.no_motion_count, 1);
    assert!(!status.is_done());

    poller.cycle();
    let status = controller.read_status(0).unwrap();
    assert_eq!(status.no_motion_count, 2);
    assert!(status.is_done());

    for _ in 0..5 {
        poller.cycle();
        assert!(controller.read_status(0).unwrap().is_done());
    }
}

#[test]
fn position_change_resets_the_counter() {
    let driver = ScriptedDriver::new(1);
    let (controller, mut poller) = card(&driver);
    driver.set_position(0, 1000);
    poller.cycle();
    poller.cycle();

    driver.set_position(0, 1050);
    poller.cycle();
    let status = controller.read_status(0).unwrap();
    assert_eq!(status.no_motion_count, 0);
    assert_eq!(status.position, 1050);
    assert_eq!(status.flags.direction, Direction::Positive);
    assert!(!status.is_done());
}

#[test]
fn relative_move_round_trip() {
    let driver = ScriptedDriver::new(1);
    let (controller, mut poller) = card(&driver);
    driver.set_position(0, 1000);
    settle(&controller, &mut poller, 5);

    controller
        .request_motion(0, MotionPrimitive::MoveRelative(100))
        .unwrap();
    let status = settle(&controller, &mut poller, 10);

    assert_eq!(status.position, 1100);
    assert_eq!(driver.axis(0).position, 1100);
}

#[test]
fn limit_strike_recovers_once_per_strike() {
    let driver = ScriptedDriver::new(1)
        .with_latching_limits()
        .with_recovery(|position| {
            vec![
                MotionPrimitive::EnableTorque,
                MotionPrimitive::LoadPosition(position),
            ]
        });
    let (controller, mut poller) = card(&driver);
    driver.set_position(0, 1000);
    driver.set_travel(0, None, Some(1050));
    poller.cycle();

    controller
        .request_motion(0, MotionPrimitive::MoveAbsolute(2000))
        .unwrap();
    poller.cycle();

    let status = controller.read_status(0).unwrap();
    assert_eq!(status.position, 1050);
    assert!(status.flags.plus_limit);
    assert_eq!(status.flags.direction, Direction::Positive);
    assert!(status.is_done());
    assert!(!status.has_pending_motion());
    assert_eq!(count(&driver.commands(), "0 LP 1050"), 1);
    assert_eq!(count(&driver.commands(), "0 EN"), 1);

    // still sitting on the switch: no repeat
    for _ in 0..5 {
        poller.cycle();
    }
    assert_eq!(count(&driver.commands(), "0 LP 1050"), 1);

    // back off, then strike again
    controller
        .request_motion(0, MotionPrimitive::MoveAbsolute(900))
        .unwrap();
    settle(&controller, &mut poller, 10);
    assert!(!controller.read_status(0).unwrap().flags.plus_limit);

    controller
        .request_motion(0, MotionPrimitive::MoveAbsolute(2000))
        .unwrap();
    settle(&controller, &mut poller, 10);
    assert_eq!(count(&driver.commands(), "0 LP 1050"), 2);
}

#[test]
fn limit_behind_the_axis_is_not_a_strike() {
    let driver = ScriptedDriver::new(1).with_recovery(|position| {
        vec![MotionPrimitive::LoadPosition(position)]
    });
    let (controller, mut poller) = card(&driver);
    driver.set_position(0, 500);
    driver.set_travel(0, Some(0), None);
    poller.cycle();

    controller
        .request_motion(0, MotionPrimitive::MoveAbsolute(-100))
        .unwrap();
    settle(&controller, &mut poller, 20);
    assert!(controller.read_status(0).unwrap().flags.minus_limit);
    assert_eq!(count(&driver.commands(), "0 LP 0"), 1);

    controller
        .request_motion(0, MotionPrimitive::MoveAbsolute(200))
        .unwrap();
    settle(&controller, &mut poller, 20);
    assert_eq!(controller.read_status(0).unwrap().position, 200);

    // a minus switch seen while travelling forward
    driver.push(
        0,
        Step::Sample(AxisSample {
            position: 250,
            minus_limit: true,
            power_on: true,
            ..Default::default()
        }),
    );
    poller.cycle();
    let status = controller.read_status(0).unwrap();
    assert!(status.flags.minus_limit);
    assert_eq!(status.flags.direction, Direction::Positive);
    assert_eq!(count(&driver.commands(), "0 LP 0"), 1);
    assert!(!driver.commands().iter().any(|command| command == "0 LP 250"));
}

#[test]
fn switch_jitter_does_not_repeat_the_recovery() {
    let driver = ScriptedDriver::new(1).with_recovery(|position| {
        vec![MotionPrimitive::LoadPosition(position)]
    });
    let (controller, mut poller) = card(&driver);
    driver.set_position(0, 1000);
    poller.cycle();

    let on_switch = |position| {
        Step::Sample(AxisSample {
            position,
            plus_limit: true,
            power_on: true,
            ..Default::default()
        })
    };
    for position in [1050, 1049, 1050, 1049, 1050] {
        driver.push(0, on_switch(position));
    }
    for _ in 0..5 {
        poller.cycle();
        assert!(controller.read_status(0).unwrap().flags.plus_limit);
    }
    assert_eq!(count(&driver.commands(), "0 LP 1050"), 1);

    // released, then struck again
    driver.push(
        0,
        Step::Sample(AxisSample {
            position: 1000,
            power_on: true,
            ..Default::default()
        }),
    );
    driver.push(0, on_switch(1050));
    poller.cycle();
    poller.cycle();
    assert_eq!(count(&driver.commands(), "0 LP 1050"), 2);
}

#[test]
fn stale_zero_velocity_does_not_finish_a_new_move() {
    let driver = ScriptedDriver::new(1).with_velocity_done();
    let (controller, mut poller) = card(&driver);
    settle(&controller, &mut poller, 5);

    controller
        .request_motion(0, MotionPrimitive::MoveAbsolute(500))
        .unwrap();
    driver.push(
        0,
        Step::Sample(AxisSample {
            position: 0,
            velocity: Some(0),
            power_on: true,
            ..Default::default()
        }),
    );
    poller.cycle();
    let status = controller.read_status(0).unwrap();
    assert!(!status.is_done());
    assert!(status.has_pending_motion());

    let status = settle(&controller, &mut poller, 20);
    assert_eq!(status.position, 500);
}

#[test]
fn post_move_command_follows_completion_once() {
    let driver = ScriptedDriver::new(1);
    let config = AxisConfig {
        post_motion: Some("DI".to_string()),
        ..Default::default()
    };
    let (controller, mut poller) = card_with(&driver, vec![config]);
    poller.cycle();

    controller
        .request_motion(0, MotionPrimitive::MoveAbsolute(100))
        .unwrap();
    poller.cycle();
    assert_eq!(count(&driver.commands(), "0 DI"), 0);

    settle(&controller, &mut poller, 10);
    for _ in 0..3 {
        poller.cycle();
    }
    assert_eq!(count(&driver.commands(), "0 DI"), 1);
}

#[test]
fn stalled_motion_times_out_with_a_stop() {
    let driver = ScriptedDriver::new(1).with_native_done();
    let config = AxisConfig {
        motion_timeout_cycles: Some(3),
        ..Default::default()
    };
    let (controller, mut poller) = card_with(&driver, vec![config]);
    poller.cycle();

    controller
        .request_motion(0, MotionPrimitive::DisableTorque)
        .unwrap();
    controller
        .request_motion(0, MotionPrimitive::MoveAbsolute(500))
        .unwrap();

    for _ in 0..3 {
        poller.cycle();
        assert!(controller.read_status(0).unwrap().has_pending_motion());
    }
    assert_eq!(count(&driver.commands(), "0 ST"), 0);

    poller.cycle();
    let status = controller.read_status(0).unwrap();
    assert!(status.flags.problem);
    assert!(status.is_done());
    assert!(!status.has_pending_motion());
    assert_eq!(count(&driver.commands(), "0 ST"), 1);
}

#[test]
fn jog_ends_on_zero_velocity() {
    let driver = ScriptedDriver::new(1);
    let (controller, mut poller) = card(&driver);
    settle(&controller, &mut poller, 5);

    controller
        .request_motion(0, MotionPrimitive::Jog { velocity: -200.0 })
        .unwrap();
    for _ in 0..4 {
        poller.cycle();
        let status = controller.read_status(0).unwrap();
        assert!(!status.is_done());
        assert_eq!(status.flags.direction, Direction::Negative);
        assert_eq!(status.velocity, -50);
    }

    controller.request_motion(0, MotionPrimitive::Stop).unwrap();
    poller.cycle();
    let status = controller.read_status(0).unwrap();
    assert!(status.is_done());
    assert!(!status.has_pending_motion());
    assert_eq!(status.position, -200);
}

#[test]
fn native_done_bit_drives_completion() {
    let driver = ScriptedDriver::new(1).with_native_done();
    let (controller, mut poller) = card(&driver);
    poller.cycle();
    assert!(controller.read_status(0).unwrap().is_done());

    controller
        .request_motion(0, MotionPrimitive::MoveAbsolute(120))
        .unwrap();
    let report = poller.cycle();
    assert!(report.active);
    assert!(!controller.read_status(0).unwrap().is_done());

    // 50 steps per sample: 50, 100, 120
    poller.cycle();
    let report = poller.cycle();
    let status = controller.read_status(0).unwrap();
    assert_eq!(status.position, 120);
    assert!(status.is_done());
    assert!(!report.active);
}

#[test]
fn fresh_motion_waits_for_the_update_delay() {
    let driver = ScriptedDriver::new(1);
    let config = CardConfig {
        name: "bench".to_string(),
        poller: PollerConfig {
            update_delay_ms: 30,
            ..poller_config()
        },
        axes: vec![AxisConfig::default()],
    };
    let (controller, mut poller) =
        Controller::new(config, Box::new(driver.clone()), Box::new(MockChannel::new()));
    poller.cycle();

    controller
        .request_motion(0, MotionPrimitive::MoveAbsolute(300))
        .unwrap();
    let report = poller.cycle();
    assert_eq!(report.axes, vec![AxisPoll::Deferred]);
    assert!(report.active);

    thread::sleep(Duration::from_millis(40));
    let report = poller.cycle();
    assert_eq!(report.axes, vec![AxisPoll::Updated]);
    assert!(controller.read_status(0).unwrap().has_pending_motion());
}

#[test]
fn background_poller_completes_a_move() {
    let driver = ScriptedDriver::new(2);
    let config = CardConfig {
        name: "threaded".to_string(),
        poller: poller_config(),
        axes: vec![AxisConfig::default(); 2],
    };
    let mut controller =
        Controller::start(config, Box::new(driver.clone()), Box::new(MockChannel::new())).unwrap();
    assert_eq!(controller.ident(), Some("SIM-1 v1.0"));

    controller.set_poll_period(Duration::from_millis(5), Duration::from_millis(20));
    assert_eq!(controller.poll_periods().moving, Duration::from_millis(5));

    controller
        .request_motion(1, MotionPrimitive::MoveAbsolute(250))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = controller.read_status(1).unwrap();
        if status.position == 250 && status.is_done() && !status.has_pending_motion() {
            break;
        }
        assert!(Instant::now() < deadline, "move did not finish: {status:?}");
        thread::sleep(Duration::from_millis(5));
    }

    controller.shutdown();
    assert_eq!(driver.axis(1).position, 250);
    assert_eq!(driver.axis(0).position, 0);
}
