#![cfg(feature = "test-support")]

#[path = "engine_support.rs"]
mod support;

use std::time::Duration;

use robolink::{
    Instruction, InstructionKind, ItemHandle, ItemType, LinkError, Matrix, MoveKind, MoveTarget,
    Speeds,
};
use support::start_engine;

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn blocking_moves_land_on_their_targets() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().unwrap();
    let robot = link.item("Robot", Some(ItemType::Robot)).unwrap();

    let home = robot.joints_home().unwrap();
    assert_eq!(robot.joints().unwrap(), home);

    let joints = vec![100.0, 50.0, 400.0, 0.0, 0.0, 0.0];
    robot.move_joint(joints.clone(), true).unwrap();
    assert!(!robot.is_busy().unwrap());
    assert_eq!(robot.joints().unwrap(), joints);

    // Pose targets go through the engine's inverse kinematics.
    robot
        .move_linear(Matrix::from_translation(200.0, 0.0, 300.0), true)
        .unwrap();
    assert_eq!(robot.joints().unwrap(), vec![200.0, 0.0, 300.0, 0.0, 0.0, 0.0]);

    robot
        .move_circular(
            Matrix::from_translation(250.0, 50.0, 300.0),
            Matrix::from_translation(300.0, 0.0, 300.0),
            true,
        )
        .unwrap();
    assert_eq!(robot.joints().unwrap()[..3], [300.0, 0.0, 300.0]);

    engine.shutdown().unwrap();
}

#[test]
fn non_blocking_move_reports_busy_until_waited() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().unwrap();
    let robot = link.item("Robot", Some(ItemType::Robot)).unwrap();

    robot.move_joint(vec![0.0, 0.0, 600.0, 0.0, 0.0, 0.0], false).unwrap();
    assert!(robot.is_busy().unwrap());
    robot.wait_move(WAIT).unwrap();
    assert!(!robot.is_busy().unwrap());

    robot.move_joint(vec![10.0, 0.0, 600.0, 0.0, 0.0, 0.0], false).unwrap();
    robot.stop().unwrap();
    assert!(!robot.is_busy().unwrap());

    engine.shutdown().unwrap();
}

#[test]
fn item_targets_carry_their_joints() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().unwrap();
    let robot = link.item("Robot", Some(ItemType::Robot)).unwrap();

    let approach = link.add_target("Approach", None, Some(&robot)).unwrap();
    assert_eq!(approach.kind(), ItemType::Target);
    assert_eq!(approach.joints().unwrap(), robot.joints().unwrap());

    let joints = [10.0, 20.0, 30.0, 0.0, 90.0, 0.0];
    approach.set_joints(&joints).unwrap();
    assert!(approach
        .pose()
        .unwrap()
        .approx_eq(&Matrix::from_translation(10.0, 20.0, 30.0), 1e-9));

    robot.move_joint(&approach, true).unwrap();
    assert_eq!(robot.joints().unwrap(), joints);

    let target = MoveTarget::from_parts(Some(approach.handle()), None, None).unwrap();
    robot.move_linear(target, true).unwrap();

    engine.shutdown().unwrap();
}

#[test]
fn kinematics_queries() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().unwrap();
    let robot = link.item("Robot", Some(ItemType::Robot)).unwrap();

    let flange = robot.solve_fk(&[1.0, 2.0, 3.0, 0.0, 0.0, 0.0]).unwrap();
    assert_eq!(flange, Matrix::from_translation(1.0, 2.0, 3.0));

    let pose = Matrix::from_translation(7.0, 8.0, 9.0);
    assert_eq!(robot.solve_ik(&pose).unwrap(), vec![7.0, 8.0, 9.0, 0.0, 0.0, 0.0]);
    let all = robot.solve_ik_all(&pose).unwrap();
    assert_eq!(all.shape(), (6, 1));
    assert_eq!(all.column(0).unwrap()[..3], [7.0, 8.0, 9.0]);

    assert_eq!(robot.joints_config(&robot.joints().unwrap()).unwrap().len(), 3);

    let limits = robot.joint_limits().unwrap();
    assert_eq!(limits.lower.len(), 6);
    assert!(limits.lower.iter().zip(&limits.upper).all(|(lo, hi)| lo < hi));

    let [a, b]: [Vec<f64>; 2] = link
        .joints_of(&[&robot, &robot])
        .unwrap()
        .try_into()
        .expect("two joint vectors");
    assert_eq!(a, b);

    robot.set_speed(Speeds::linear(500.0).with_joints(90.0)).unwrap();
    robot.set_zone_data(5.0).unwrap();
    assert_eq!(link.collisions().unwrap(), 0);

    engine.shutdown().unwrap();
}

#[test]
fn bad_targets_are_rejected_locally() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().unwrap();
    let robot = link.item("Robot", Some(ItemType::Robot)).unwrap();

    assert!(matches!(
        robot.move_linear(Matrix::identity(3), true),
        Err(LinkError::InvalidTarget(_))
    ));
    assert!(matches!(
        MoveTarget::from_parts(None, Some(vec![0.0; 6]), Some(Matrix::identity(4))),
        Err(LinkError::InvalidTarget(_))
    ));
    let nothing = link.item("Nothing", None).unwrap();
    assert!(matches!(
        nothing.move_joint(vec![0.0; 6], true),
        Err(LinkError::InvalidItem)
    ));

    // Unknown to the engine: both wait statuses still arrive.
    let ghost = link.wrap(ItemHandle::new(999, ItemType::Robot));
    assert!(matches!(ghost.wait_move(WAIT), Err(LinkError::InvalidItem)));

    // The link is still good for real work.
    assert_eq!(robot.joints().unwrap().len(), 6);
    engine.shutdown().unwrap();
}

#[test]
fn programs_record_and_replay_moves() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().unwrap();
    let robot = link.item("Robot", Some(ItemType::Robot)).unwrap();

    let pick = link.add_target("Pick", None, Some(&robot)).unwrap();
    pick.set_joints(&[50.0, 0.0, 450.0, 0.0, 0.0, 0.0]).unwrap();
    let place = link.add_target("Place", None, Some(&robot)).unwrap();
    place.set_joints(&[-50.0, 0.0, 450.0, 0.0, 0.0, 0.0]).unwrap();

    let program = link.add_program("PickPlace", Some(&robot)).unwrap();
    assert_eq!(program.kind(), ItemType::Program);
    program.add_move_joint(&pick).unwrap();
    program.add_move_linear(&place).unwrap();
    assert_eq!(program.instruction_count().unwrap(), 2);

    let first = program.instruction(0).unwrap();
    assert_eq!(first.kind, InstructionKind::Move);
    let motion = first.motion.expect("move instructions carry motion");
    assert_eq!(motion.kind(), Some(MoveKind::Joint));
    assert!(motion.is_joint_target);
    assert_eq!(motion.joints, vec![50.0, 0.0, 450.0, 0.0, 0.0, 0.0]);

    program
        .set_instruction(1, &Instruction::new("Wait for sensor", InstructionKind::Pause))
        .unwrap();
    let second = program.instruction(1).unwrap();
    assert_eq!(second.kind, InstructionKind::Pause);
    assert_eq!(second.name, "Wait for sensor");
    assert!(second.motion.is_none());

    assert!(matches!(
        program.set_instruction(0, &Instruction::new("broken", InstructionKind::Move)),
        Err(LinkError::InvalidArgument(_))
    ));

    assert_eq!(program.run_program().unwrap(), 2);
    robot.wait_move(WAIT).unwrap();
    assert_eq!(robot.joints().unwrap(), vec![50.0, 0.0, 450.0, 0.0, 0.0, 0.0]);

    engine.shutdown().unwrap();
}

#[test]
fn unsupported_command_fails_hard_and_a_new_link_recovers() {
    let mut engine = start_engine().expect("engine should launch");
    let link = engine.connect().unwrap();

    match link.run_message("hello", false) {
        Err(LinkError::RemoteHardFailure(message)) => assert!(message.contains("RunMessage")),
        other => panic!("expected a hard failure, got {other:?}"),
    }
    drop(link);

    let link = engine.connect().expect("engine should accept a new link");
    assert_eq!(link.item_names(None).unwrap().len(), 2);
    engine.shutdown().unwrap();
}
