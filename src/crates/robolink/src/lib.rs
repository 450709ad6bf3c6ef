//! Blocking client for a remote robot simulation engine.
//!
//! A [`Link`] owns one TCP connection to the engine. Scene objects (robots,
//! frames, tools, targets, programs) come back as [`Item`] proxies borrowed
//! from that link; every accessor is one request/response round trip. Poses
//! travel as 4×4 homogeneous [`Matrix`] values, built and decomposed with the
//! helpers in [`math`].
//!
//! Typical usage:
//! ```no_run
//! use robolink::{ItemType, Link, LinkConfig};
//!
//! let link = Link::connect(LinkConfig::default()).expect("engine should be running");
//! let robot = link.item("UR10", Some(ItemType::Robot)).unwrap();
//! robot.move_joint(robot.joints_home().unwrap(), true).unwrap();
//!
//! let flange = robot.solve_fk(&robot.joints().unwrap()).unwrap();
//! let approach = flange.translate(0.0, 0.0, -50.0).unwrap();
//! robot.move_linear(approach, true).unwrap();
//! ```
//!
//! A `Link` is `Send` but not `Sync`. Workers that run in parallel open one
//! link each and coordinate through [`SharedQueue`] and [`ParamSignal`].

mod config;
mod coordination;
mod error;
mod item;
mod launcher;
mod link;
pub mod math;
mod motion;
mod program;
mod station;
pub mod status;
mod transport;
pub mod wire;

pub use config::{EngineConfig, LinkConfig, DEFAULT_PORT};
pub use coordination::{ParamSignal, SharedQueue, DEFAULT_POLL_INTERVAL};
pub use error::{LinkError, LinkResult};
pub use item::{Item, ItemHandle, ItemType};
pub use launcher::{EngineProcess, LogLine, LogStream};
pub use link::Link;
pub use math::{Matrix, MatrixError};
pub use motion::{JointLimits, MoveKind, MoveTarget, Speeds};
pub use program::{
    Instruction, InstructionCallType, InstructionKind, InstructionList, InstructionMove,
    JointListResult, MakeProgramResult, ProgramRunType, RunMode,
};
pub use station::Projection;
pub use status::StatusCode;
pub use transport::READY;
