//! End-to-end tests against the simulated controller, one pass per dialect

use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use focuser::{
    DeviceModel, FocusDirection, FocuserError, FocuserEvent, FocuserSession, HostRequest,
    PropertyState, Runner, SessionOptions, SimulatedFocuser,
};
use strum::IntoEnumIterator;

fn open(
    sim: SimulatedFocuser,
    model: DeviceModel,
) -> (FocuserSession<SimulatedFocuser>, Receiver<FocuserEvent>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let options = SessionOptions {
        handshake_delay: Duration::ZERO,
        ..SessionOptions::for_model(model)
    };
    let session = FocuserSession::new(sim, model, Box::new(tx)).with_options(options);
    (session, rx)
}

fn connect(model: DeviceModel) -> (FocuserSession<SimulatedFocuser>, Receiver<FocuserEvent>) {
    let sim = SimulatedFocuser::new(model).with_step(250);
    let (mut session, rx) = open(sim, model);
    session.connect().unwrap();
    (session, rx)
}

/// Poll until nothing is busy; panics after `limit` ticks.
fn poll_until_idle(session: &mut FocuserSession<SimulatedFocuser>, limit: usize) {
    for _ in 0..limit {
        if session.motion_state() != PropertyState::Busy
            && session.calibration_state() != PropertyState::Busy
        {
            return;
        }
        session.poll_tick();
    }
    panic!("still busy after {limit} polls at {}", session.position());
}

#[test]
fn test_absolute_move_completes_in_every_dialect() {
    for model in DeviceModel::iter() {
        let (mut session, rx) = connect(model);
        assert!(session.is_connected(), "{model}");

        assert_eq!(session.move_absolute(1000), PropertyState::Busy, "{model}");
        poll_until_idle(&mut session, 20);

        assert_eq!(session.position(), 1000, "{model}");
        assert_eq!(session.flags().absolute, PropertyState::Ok, "{model}");
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events.last(),
            Some(&FocuserEvent::PositionReached(1000)),
            "{model}"
        );
        assert!(events.contains(&FocuserEvent::PositionChanged(250)), "{model}");
    }
}

#[test]
fn test_handshake_reports_device_state() {
    let sim = SimulatedFocuser::new(DeviceModel::OwltoFocus)
        .with_position(1234)
        .with_max_position(60_000);
    let (mut session, rx) = open(sim, DeviceModel::OwltoFocus);

    session.connect().unwrap();

    assert_eq!(session.position(), 1234);
    assert_eq!(session.max_position(), 60_000);
    assert!(rx.try_iter().any(|e| e
        == FocuserEvent::Connected {
            position: 1234,
            max_position: 60_000
        }));
}

#[test]
fn test_colon_dialect_keeps_default_travel() {
    let sim = SimulatedFocuser::new(DeviceModel::OwltoFocusClassic).with_max_position(5000);
    let (mut session, _rx) = open(sim, DeviceModel::OwltoFocusClassic);
    session.connect().unwrap();
    assert_eq!(session.max_position(), 100_000);
}

#[test]
fn test_silent_device_fails_handshake() {
    for model in DeviceModel::iter() {
        let mut sim = SimulatedFocuser::new(model);
        sim.set_silent(true);
        let (mut session, _rx) = open(sim, model);

        let err = session.connect().unwrap_err();

        assert!(matches!(err, FocuserError::Handshake(_)), "{model}");
        assert!(!session.is_connected());
    }
}

#[test]
fn test_relative_move_stops_at_travel_limit() {
    let sim = SimulatedFocuser::new(DeviceModel::OwltoFocus)
        .with_position(1500)
        .with_max_position(2000)
        .with_step(1000);
    let (mut session, _rx) = open(sim, DeviceModel::OwltoFocus);
    session.connect().unwrap();

    session.move_relative(FocusDirection::Outward, 10_000);
    poll_until_idle(&mut session, 10);
    assert_eq!(session.position(), 2000);

    session.move_relative(FocusDirection::Inward, 10_000);
    poll_until_idle(&mut session, 10);
    assert_eq!(session.position(), 0);
}

#[test]
fn test_sync_is_picked_up_by_next_poll() {
    let (mut session, rx) = connect(DeviceModel::WilliamOpticsOwlto);

    session.sync(5000).unwrap();
    assert_eq!(session.position(), 0);
    assert_eq!(session.transport().position(), 5000);

    session.poll_tick();
    assert_eq!(session.position(), 5000);
    assert_eq!(rx.try_iter().last(), Some(FocuserEvent::PositionChanged(5000)));
}

#[test]
fn test_timed_move_aborts_device() {
    let (mut session, rx) = connect(DeviceModel::OwltoFocus);

    session.move_timed(FocusDirection::Outward, Duration::from_millis(50));
    session.poll_tick();
    assert!(session.transport().is_moving());

    session.fire_due_timers(Instant::now() + Duration::from_secs(1));

    assert!(!session.transport().is_moving());
    assert_eq!(session.motion_state(), PropertyState::Idle);
    assert_eq!(rx.try_iter().last(), Some(FocuserEvent::TimedMoveFinished));
}

#[test]
fn test_earlier_timed_stop_still_fires_after_new_move() {
    let (mut session, _rx) = connect(DeviceModel::OwltoFocus);

    session.move_timed(FocusDirection::Outward, Duration::from_millis(10));
    session.move_absolute(50_000);
    assert_eq!(session.status().pending_timed_stops, 1);

    session.fire_due_timers(Instant::now() + Duration::from_secs(1));

    assert!(!session.transport().is_moving());
    assert_eq!(session.flags().absolute, PropertyState::Idle);
}

#[test]
fn test_calibration_runs_to_home() {
    let sim = SimulatedFocuser::new(DeviceModel::OwltoFocus)
        .with_position(900)
        .with_step(300);
    let (mut session, rx) = open(sim, DeviceModel::OwltoFocus);
    session.connect().unwrap();

    session.calibrate().unwrap();
    assert_eq!(session.calibration_state(), PropertyState::Busy);
    poll_until_idle(&mut session, 10);

    assert_eq!(session.calibration_state(), PropertyState::Ok);
    assert_eq!(session.position(), 0);
    assert!(rx
        .try_iter()
        .any(|e| e == FocuserEvent::CalibrationStateChanged(PropertyState::Ok)));
}

#[test]
fn test_driver_settings_reach_device() {
    let (mut session, rx) = connect(DeviceModel::OwltoFocus);

    session.set_stallguard(-12).unwrap();
    session.set_move_current(20).unwrap();
    session.set_reverse(true).unwrap();

    let sim = session.transport();
    assert_eq!(sim.stallguard(), -12);
    assert_eq!(sim.move_current(), 20);
    assert!(sim.is_reversed());
    assert!(rx
        .try_iter()
        .any(|e| e == FocuserEvent::StallguardChanged(-12)));
}

#[test]
fn test_paren_dialect_rejects_bracket_only_settings() {
    let (mut session, _rx) = connect(DeviceModel::WilliamOpticsOwlto);
    assert!(matches!(
        session.set_stallguard(10),
        Err(FocuserError::Unsupported { .. })
    ));
    assert!(matches!(
        session.set_reverse(true),
        Err(FocuserError::Unsupported { .. })
    ));
}

#[test]
fn test_runner_reports_completed_move() {
    let (session, events) = connect(DeviceModel::OwltoFocusClassic);
    let (tx, rx) = crossbeam_channel::unbounded();
    let handle = Runner::new(session, rx, Duration::from_millis(5))
        .unwrap()
        .spawn()
        .unwrap();
    let _ = events.try_iter().count();

    tx.send(HostRequest::MoveAbsolute(750)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut reached = None;
    while Instant::now() < deadline {
        if let Ok(FocuserEvent::PositionReached(pos)) =
            events.recv_timeout(Duration::from_millis(100))
        {
            reached = Some(pos);
            break;
        }
    }

    drop(tx);
    let session = handle.join().unwrap();
    assert_eq!(reached, Some(750));
    assert_eq!(session.transport().position(), 750);
    assert_eq!(session.motion_state(), PropertyState::Ok);
}
