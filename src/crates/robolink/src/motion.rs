//! Robot motion, kinematics and robot setup.
//!
//! Motion runs asynchronously inside the engine. A move request returns once
//! the engine has queued it; [`Item::wait_move`] blocks until the engine
//! reports the robot idle again. Every move first waits for the previous one.

use std::time::Duration;

use crate::error::{LinkError, LinkResult};
use crate::item::{optional_raw, Item, ItemHandle};
use crate::math::Matrix;
use crate::station::scaled;
use crate::transport::Transport;

/// Kind of robot move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Joint,
    Linear,
    Circular,
}

impl MoveKind {
    pub fn to_wire(self) -> i32 {
        match self {
            MoveKind::Joint => 1,
            MoveKind::Linear => 2,
            MoveKind::Circular => 3,
        }
    }

    pub fn from_wire(code: i32) -> Option<Self> {
        match code {
            1 => Some(MoveKind::Joint),
            2 => Some(MoveKind::Linear),
            3 => Some(MoveKind::Circular),
            _ => None,
        }
    }
}

/// Destination of a move: exactly one of a target item, a joint vector or a
/// pose.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveTarget {
    Item(ItemHandle),
    Joints(Vec<f64>),
    Pose(Matrix),
}

impl MoveTarget {
    /// Build from optional parts; exactly one must be present.
    pub fn from_parts(
        item: Option<ItemHandle>,
        joints: Option<Vec<f64>>,
        pose: Option<Matrix>,
    ) -> LinkResult<Self> {
        let target = match (item, joints, pose) {
            (Some(handle), None, None) => MoveTarget::Item(handle),
            (None, Some(joints), None) => MoveTarget::Joints(joints),
            (None, None, Some(pose)) => MoveTarget::Pose(pose),
            (None, None, None) => {
                return Err(LinkError::invalid_target("no target given"));
            }
            _ => {
                return Err(LinkError::invalid_target(
                    "give exactly one of item, joints or pose",
                ));
            }
        };
        target.validate()?;
        Ok(target)
    }

    /// Check the target could be sent.
    pub fn validate(&self) -> LinkResult<()> {
        match self {
            MoveTarget::Item(handle) if !handle.is_valid() => {
                Err(LinkError::invalid_target("target item is null"))
            }
            MoveTarget::Joints(joints) if joints.is_empty() => {
                Err(LinkError::invalid_target("joint vector is empty"))
            }
            MoveTarget::Pose(pose) if !pose.is_homogeneous() => Err(LinkError::invalid_target(
                format!("pose is not homogeneous ({}x{})", pose.rows(), pose.cols()),
            )),
            _ => Ok(()),
        }
    }

    fn encode(&self, t: &mut Transport) -> LinkResult<()> {
        match self {
            MoveTarget::Item(handle) => {
                t.send_int(3)?;
                t.send_array(&[])?;
                t.send_handle(handle.raw())
            }
            MoveTarget::Joints(joints) => {
                t.send_int(1)?;
                t.send_array(joints)?;
                t.send_handle(0)
            }
            MoveTarget::Pose(pose) => {
                t.send_int(2)?;
                t.send_array(&pose.to_column_major())?;
                t.send_handle(0)
            }
        }
    }
}

impl From<&Item<'_>> for MoveTarget {
    fn from(item: &Item<'_>) -> Self {
        MoveTarget::Item(item.handle())
    }
}

impl From<Vec<f64>> for MoveTarget {
    fn from(joints: Vec<f64>) -> Self {
        MoveTarget::Joints(joints)
    }
}

impl From<&[f64]> for MoveTarget {
    fn from(joints: &[f64]) -> Self {
        MoveTarget::Joints(joints.to_vec())
    }
}

impl From<Matrix> for MoveTarget {
    fn from(pose: Matrix) -> Self {
        MoveTarget::Pose(pose)
    }
}

/// Joint limits of a robot.
#[derive(Debug, Clone, PartialEq)]
pub struct JointLimits {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Joint type code reported alongside the limits.
    pub joint_type: f64,
}

/// Speed and acceleration settings. `None` leaves a value unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Speeds {
    /// mm/s
    pub linear: Option<f64>,
    /// mm/s²
    pub linear_accel: Option<f64>,
    /// deg/s
    pub joints: Option<f64>,
    /// deg/s²
    pub joints_accel: Option<f64>,
}

impl Speeds {
    pub fn linear(speed: f64) -> Self {
        Self {
            linear: Some(speed),
            ..Self::default()
        }
    }

    pub fn with_linear_accel(mut self, accel: f64) -> Self {
        self.linear_accel = Some(accel);
        self
    }

    pub fn with_joints(mut self, speed: f64) -> Self {
        self.joints = Some(speed);
        self
    }

    pub fn with_joints_accel(mut self, accel: f64) -> Self {
        self.joints_accel = Some(accel);
        self
    }

    fn to_wire(self) -> [f64; 4] {
        [self.linear, self.linear_accel, self.joints, self.joints_accel].map(|v| v.unwrap_or(-1.0))
    }
}

impl<'l> Item<'l> {
    /// Joint move to `target`.
    pub fn move_joint(&self, target: impl Into<MoveTarget>, blocking: bool) -> LinkResult<()> {
        self.queue_move(MoveKind::Joint, &[target.into()], blocking)
    }

    /// Linear move to `target`.
    pub fn move_linear(&self, target: impl Into<MoveTarget>, blocking: bool) -> LinkResult<()> {
        self.queue_move(MoveKind::Linear, &[target.into()], blocking)
    }

    /// Circular move through `via` to `end`.
    pub fn move_circular(
        &self,
        via: impl Into<MoveTarget>,
        end: impl Into<MoveTarget>,
        blocking: bool,
    ) -> LinkResult<()> {
        self.queue_move(MoveKind::Circular, &[via.into(), end.into()], blocking)
    }

    fn queue_move(&self, kind: MoveKind, targets: &[MoveTarget], blocking: bool) -> LinkResult<()> {
        for target in targets {
            target.validate()?;
        }
        self.live_raw()?;
        let wait = self.link().config().wait_timeout;
        self.wait_move(wait)?;

        let command = match kind {
            MoveKind::Circular => "MoveC",
            MoveKind::Joint | MoveKind::Linear => "MoveX",
        };
        self.call(command, |t, raw| {
            t.send_int(kind.to_wire())?;
            for target in targets {
                target.encode(t)?;
            }
            t.send_handle(raw)?;
            t.recv_status()
        })?;

        if blocking {
            self.wait_move(wait)?;
        }
        Ok(())
    }

    /// Block until the robot finishes its queued motion.
    ///
    /// The engine acknowledges the request with one status and sends a second
    /// when the motion completes. The second read runs under `timeout`; if it
    /// expires the link is torn down. A recoverable acknowledgement failure is
    /// still followed by the completion status, which is consumed before the
    /// failure is returned. Any other acknowledgement failure leaves the
    /// completion status unread, so the link is torn down.
    pub fn wait_move(&self, timeout: Duration) -> LinkResult<()> {
        self.call("WaitMove", |t, raw| {
            t.send_handle(raw)?;
            match t.recv_status() {
                Ok(()) => t.with_read_timeout(timeout, Transport::recv_status),
                Err(err) if err.is_recoverable() => {
                    t.with_read_timeout(timeout, Transport::recv_status)?;
                    Err(err)
                }
                Err(err) => {
                    if !err.is_connection_fatal() {
                        t.abort(&format!("WaitMove acknowledgement failed: {err}"));
                    }
                    Err(err)
                }
            }
        })
    }

    /// Whether the robot is currently moving.
    pub fn is_busy(&self) -> LinkResult<bool> {
        self.call("IsBusy", |t, raw| {
            t.send_handle(raw)?;
            let busy = t.recv_int()?;
            t.recv_status()?;
            Ok(busy > 0)
        })
    }

    /// Stop the current motion.
    pub fn stop(&self) -> LinkResult<()> {
        self.call("Stop", |t, raw| {
            t.send_handle(raw)?;
            t.recv_status()
        })
    }

    pub fn joints(&self) -> LinkResult<Vec<f64>> {
        self.recv_joints("G_Thetas")
    }

    pub fn joints_home(&self) -> LinkResult<Vec<f64>> {
        self.recv_joints("G_Home")
    }

    fn recv_joints(&self, command: &'static str) -> LinkResult<Vec<f64>> {
        self.call(command, |t, raw| {
            t.send_handle(raw)?;
            let joints = t.recv_array()?;
            t.recv_status()?;
            Ok(joints)
        })
    }

    /// Teleport the robot to `joints` without simulating the motion.
    pub fn set_joints(&self, joints: &[f64]) -> LinkResult<()> {
        self.call("S_Thetas", |t, raw| {
            t.send_array(joints)?;
            t.send_handle(raw)?;
            t.recv_status()
        })
    }

    pub fn joint_limits(&self) -> LinkResult<JointLimits> {
        self.call("G_RobLimits", |t, raw| {
            t.send_handle(raw)?;
            let lower = t.recv_array()?;
            let upper = t.recv_array()?;
            let joint_type = f64::from(t.recv_int()?) / 1000.0;
            t.recv_status()?;
            Ok(JointLimits {
                lower,
                upper,
                joint_type,
            })
        })
    }

    /// Link a program or target to a robot (or unlink with `None`).
    pub fn set_robot(&self, robot: Option<&Item<'_>>) -> LinkResult<()> {
        let robot_raw = optional_raw(robot)?;
        self.call("S_Robot", |t, raw| {
            t.send_handle(raw)?;
            t.send_handle(robot_raw)?;
            t.recv_status()
        })
    }

    /// Add a tool centre point to this robot.
    pub fn add_tool(&self, tool_pose: &Matrix, name: &str) -> LinkResult<Item<'l>> {
        tool_pose.ensure_homogeneous()?;
        let wire = self.call("AddToolEmpty", |t, raw| {
            t.send_handle(raw)?;
            t.send_pose(tool_pose)?;
            t.send_line(name)?;
            let wire = t.recv_item()?;
            t.recv_status()?;
            Ok(wire)
        })?;
        Ok(self.adopt(wire))
    }

    /// Forward kinematics: flange pose for `joints`.
    pub fn solve_fk(&self, joints: &[f64]) -> LinkResult<Matrix> {
        self.call("G_FK", |t, raw| {
            t.send_array(joints)?;
            t.send_handle(raw)?;
            let pose = t.recv_pose()?;
            t.recv_status()?;
            Ok(pose)
        })
    }

    /// Configuration flags (rear/front, lower/upper elbow, flip) for `joints`.
    pub fn joints_config(&self, joints: &[f64]) -> LinkResult<Vec<f64>> {
        self.call("G_Thetas_Config", |t, raw| {
            t.send_array(joints)?;
            t.send_handle(raw)?;
            let config = t.recv_array()?;
            t.recv_status()?;
            Ok(config)
        })
    }

    /// Inverse kinematics closest to the current joints. Empty when the pose
    /// is unreachable.
    pub fn solve_ik(&self, pose: &Matrix) -> LinkResult<Vec<f64>> {
        pose.ensure_homogeneous()?;
        self.call("G_IK", |t, raw| {
            t.send_pose(pose)?;
            t.send_handle(raw)?;
            let joints = t.recv_array()?;
            t.recv_status()?;
            Ok(joints)
        })
    }

    /// Every inverse kinematics solution, one per column.
    pub fn solve_ik_all(&self, pose: &Matrix) -> LinkResult<Matrix> {
        pose.ensure_homogeneous()?;
        self.call("G_IK_cmpl", |t, raw| {
            t.send_pose(pose)?;
            t.send_handle(raw)?;
            let solutions = t.recv_matrix()?;
            t.recv_status()?;
            Ok(solutions)
        })
    }

    /// Check a joint move between two configurations for collisions.
    /// Returns the number of collisions found (0 when clear).
    pub fn move_joint_collision(
        &self,
        from: &[f64],
        to: &[f64],
        min_step_deg: Option<f64>,
    ) -> LinkResult<i32> {
        self.collision_move("CollisionMove", from, to, min_step_deg)
    }

    /// Check a linear move between two configurations for collisions.
    pub fn move_linear_collision(
        &self,
        from: &[f64],
        to: &[f64],
        min_step_deg: Option<f64>,
    ) -> LinkResult<i32> {
        self.collision_move("CollisionMoveL", from, to, min_step_deg)
    }

    fn collision_move(
        &self,
        command: &'static str,
        from: &[f64],
        to: &[f64],
        min_step_deg: Option<f64>,
    ) -> LinkResult<i32> {
        let step = scaled(min_step_deg.unwrap_or(-1.0), "collision step")?;
        self.call(command, |t, raw| {
            t.send_handle(raw)?;
            t.send_array(from)?;
            t.send_array(to)?;
            t.send_int(step)?;
            let collisions = t.recv_int()?;
            t.recv_status()?;
            Ok(collisions)
        })
    }

    pub fn set_speed(&self, speeds: Speeds) -> LinkResult<()> {
        let values = speeds.to_wire();
        self.call("S_Speed4", |t, raw| {
            t.send_handle(raw)?;
            t.send_array(&values)?;
            t.recv_status()
        })
    }

    /// Blending radius in mm; negative for fine positioning.
    pub fn set_zone_data(&self, zone: f64) -> LinkResult<()> {
        let zone = scaled(zone, "zone data")?;
        self.call("S_ZoneData", |t, raw| {
            t.send_int(zone)?;
            t.send_handle(raw)?;
            t.recv_status()
        })
    }

    /// Display a sequence of joint configurations, one per column.
    pub fn show_sequence(&self, sequence: &Matrix) -> LinkResult<()> {
        self.call("Show_Seq", |t, raw| {
            t.send_matrix(sequence)?;
            t.send_handle(raw)?;
            t.recv_status()
        })
    }

    /// Connect the engine to the real robot controller. An empty `ip` uses
    /// the address configured in the station.
    pub fn connect_robot(&self, ip: &str) -> LinkResult<bool> {
        self.call("Connect", |t, raw| {
            t.send_handle(raw)?;
            t.send_line(ip)?;
            let status = t.recv_int()?;
            t.recv_status()?;
            Ok(status != 0)
        })
    }

    pub fn disconnect_robot(&self) -> LinkResult<bool> {
        self.call("Disconnect", |t, raw| {
            t.send_handle(raw)?;
            let status = t.recv_int()?;
            t.recv_status()?;
            Ok(status != 0)
        })
    }
}
