#![cfg(feature = "test-support")]

#[path = "engine_support.rs"]
mod support;

use std::thread;
use std::time::{Duration, Instant};

use robolink::{EngineProcess, ItemType, LinkError, Matrix};
use support::{engine_config, start_engine, start_engine_with_station};

const TOLERANCE: f64 = 1e-9;

#[test]
fn lists_and_finds_seeded_items() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().expect("link should connect");

    assert_eq!(
        link.item_names(None).expect("listing should succeed"),
        vec!["Robot".to_string(), "Work Frame".to_string()]
    );
    assert_eq!(
        link.item_names(Some(ItemType::Robot)).unwrap(),
        vec!["Robot".to_string()]
    );

    let robot = link.item("Robot", Some(ItemType::Robot)).unwrap();
    assert!(robot.is_valid());
    assert_eq!(robot.kind(), ItemType::Robot);
    assert_eq!(robot.name().unwrap(), "Robot");

    let frames = link.items(Some(ItemType::Frame)).unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].name().unwrap(), "Work Frame");

    // A robot filter does not match the frame.
    assert!(!link.item("Work Frame", Some(ItemType::Robot)).unwrap().is_valid());
    assert!(!link.item("Nothing Here", None).unwrap().is_valid());

    assert!(!engine.logs_matching("listening on").is_empty());
    engine.shutdown().expect("engine should stop");
}

#[test]
fn poses_resolve_through_the_parent_chain() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().unwrap();

    let work = link.item("Work Frame", Some(ItemType::Frame)).unwrap();
    let fixture = link.add_frame("Fixture", Some(&work)).unwrap();
    assert_eq!(fixture.kind(), ItemType::Frame);

    fixture
        .set_pose(&Matrix::from_translation(0.0, 0.0, 100.0))
        .unwrap();
    assert!(fixture
        .pose_absolute()
        .unwrap()
        .approx_eq(&Matrix::from_translation(500.0, 0.0, 100.0), TOLERANCE));

    fixture.set_pose_absolute(&Matrix::identity(4)).unwrap();
    assert!(fixture
        .pose()
        .unwrap()
        .approx_eq(&Matrix::from_translation(-500.0, 0.0, 0.0), TOLERANCE));

    let children = work.children().unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].handle(), fixture.handle());

    // Re-parenting to the root while keeping the absolute pose.
    let root_frame = link.add_frame("Floor", None).unwrap();
    fixture.set_parent_static(&root_frame).unwrap();
    assert!(fixture.pose().unwrap().approx_eq(&Matrix::identity(4), TOLERANCE));
    assert!(work.children().unwrap().is_empty());

    engine.shutdown().unwrap();
}

#[test]
fn robot_tool_and_frame_anchors() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().unwrap();

    let robot = link.item("Robot", Some(ItemType::Robot)).unwrap();
    let work = link.item("Work Frame", None).unwrap();

    let tcp = Matrix::from_xyzwpr([0.0, 0.0, 150.0, 0.0, 0.0, 180.0]);
    robot.set_pose_tool(&tcp).unwrap();
    assert!(robot.pose_tool().unwrap().approx_eq(&tcp, TOLERANCE));

    robot.set_frame_item(&work).unwrap();
    assert!(robot
        .pose_frame()
        .unwrap()
        .approx_eq(&Matrix::from_translation(500.0, 0.0, 0.0), TOLERANCE));

    let offset = Matrix::from_translation(10.0, 0.0, 0.0);
    robot.set_geometry_pose(&offset).unwrap();
    assert_eq!(robot.geometry_pose().unwrap(), offset);

    // Rejected locally, before anything reaches the engine.
    assert!(matches!(
        robot.set_pose_frame(&Matrix::identity(3)),
        Err(LinkError::Matrix(_))
    ));
    assert!(link.is_connected());

    engine.shutdown().unwrap();
}

#[test]
fn names_visibility_and_deletion() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().unwrap();

    let mut fixture = link.add_frame("Fixture", None).unwrap();
    fixture.set_name("Fixture A").unwrap();
    assert_eq!(fixture.name().unwrap(), "Fixture A");

    assert!(fixture.is_visible().unwrap());
    fixture.set_visible(false, None).unwrap();
    assert!(!fixture.is_visible().unwrap());

    let stale = link.wrap(fixture.handle());
    let twin = fixture.clone();
    fixture.delete().unwrap();
    assert!(!fixture.is_valid());
    assert!(matches!(fixture.name(), Err(LinkError::InvalidItem)));

    // The engine no longer knows the old handle; that is recoverable.
    match stale.name() {
        Err(err @ LinkError::InvalidItem) => assert!(err.is_recoverable()),
        other => panic!("expected invalid item, got {other:?}"),
    }
    assert!(twin.is_valid());
    assert!(matches!(twin.name(), Err(LinkError::InvalidItem)));
    assert!(link.is_connected());
    assert_eq!(link.item_names(None).unwrap().len(), 2);

    engine.shutdown().unwrap();
}

#[test]
fn parent_cycles_are_refused_without_dropping_the_link() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().unwrap();

    let outer = link.add_frame("Outer", None).unwrap();
    let inner = link.add_frame("Inner", Some(&outer)).unwrap();
    match outer.set_parent(&inner) {
        Err(LinkError::RemoteHardFailure(message)) => assert!(message.contains("below itself")),
        other => panic!("expected a refusal, got {other:?}"),
    }
    assert_eq!(inner.name().unwrap(), "Inner");

    engine.shutdown().unwrap();
}

#[test]
fn station_parameters_round_trip() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().unwrap();

    assert_eq!(link.param("CYCLE").unwrap(), None);
    link.set_param("CYCLE", "3").unwrap();
    link.set_param("MODE", "sim").unwrap();
    assert_eq!(link.param("CYCLE").unwrap().as_deref(), Some("3"));
    assert_eq!(
        link.params().unwrap(),
        vec![
            ("CYCLE".to_string(), "3".to_string()),
            ("MODE".to_string(), "sim".to_string())
        ]
    );

    engine.shutdown().unwrap();
}

#[test]
fn seeds_station_from_file() {
    let station = r#"{
        "items": [
            { "name": "Cell", "kind": 3, "position": [0.0, 1000.0, 0.0] },
            { "name": "Arm", "kind": 2, "parent": "Cell", "joints": [0, 0, 0, 0, 0, 0] },
            { "name": "Gripper", "kind": 4, "parent": "Arm" }
        ],
        "params": { "LINE": "7" }
    }"#;
    let (mut engine, _dir) = start_engine_with_station(station).expect("engine should launch");
    let link = engine.connect().unwrap();

    assert_eq!(
        link.item_names(None).unwrap(),
        vec!["Cell".to_string(), "Arm".to_string(), "Gripper".to_string()]
    );
    let arm = link.item("Arm", Some(ItemType::Robot)).unwrap();
    assert!(arm
        .pose_absolute()
        .unwrap()
        .approx_eq(&Matrix::from_translation(0.0, 1000.0, 0.0), TOLERANCE));
    assert_eq!(arm.joints().unwrap(), vec![0.0; 6]);
    assert_eq!(link.param("LINE").unwrap().as_deref(), Some("7"));

    let mut gripper = link.item("Gripper", None).unwrap();
    assert_eq!(gripper.refresh_type().unwrap(), ItemType::Tool);

    engine.shutdown().unwrap();
}

#[test]
fn closing_the_station_clears_it() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().unwrap();
    link.close_station().unwrap();
    assert!(link.item_names(None).unwrap().is_empty());
    engine.shutdown().unwrap();
}

#[test]
fn engine_logs_client_connections() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().unwrap();
    link.item_names(None).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while engine.logs_matching("client connected").is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert!(!engine.logs_matching("client connected").is_empty());

    drop(link);
    engine.shutdown().unwrap();
}

#[test]
fn bad_engine_arguments_surface_as_early_exit() {
    match EngineProcess::spawn(engine_config().with_arg("--bogus")) {
        Err(LinkError::EngineExited(status)) => assert!(!status.success()),
        Err(other) => panic!("expected early exit, got {other}"),
        Ok(_) => panic!("engine should refuse unknown arguments"),
    }
}
