//! Program generation, execution and instruction introspection.

use crate::error::{LinkError, LinkResult};
use crate::item::{optional_raw, Item};
use crate::link::Link;
use crate::math::Matrix;
use crate::motion::MoveKind;
use crate::station::scaled;
use crate::transport::Transport;

/// What the engine does with programs and moves it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Simulate,
    QuickValidate,
    MakeRobotProgram,
    MakeRobotProgramAndUpload,
    MakeRobotProgramAndStart,
    RunRobot,
    Unknown(i32),
}

impl RunMode {
    pub fn from_wire(code: i32) -> Self {
        match code {
            1 => RunMode::Simulate,
            2 => RunMode::QuickValidate,
            3 => RunMode::MakeRobotProgram,
            4 => RunMode::MakeRobotProgramAndUpload,
            5 => RunMode::MakeRobotProgramAndStart,
            6 => RunMode::RunRobot,
            other => RunMode::Unknown(other),
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            RunMode::Simulate => 1,
            RunMode::QuickValidate => 2,
            RunMode::MakeRobotProgram => 3,
            RunMode::MakeRobotProgramAndUpload => 4,
            RunMode::MakeRobotProgramAndStart => 5,
            RunMode::RunRobot => 6,
            RunMode::Unknown(code) => code,
        }
    }
}

/// Where a program runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramRunType {
    Simulator,
    Robot,
}

impl ProgramRunType {
    pub fn to_wire(self) -> i32 {
        match self {
            ProgramRunType::Simulator => 1,
            ProgramRunType::Robot => 2,
        }
    }
}

/// How [`Item::run_instruction`] inserts its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstructionCallType {
    #[default]
    CallProgram,
    InsertCode,
    StartThread,
    Comment,
}

impl InstructionCallType {
    pub fn to_wire(self) -> i32 {
        match self {
            InstructionCallType::CallProgram => 0,
            InstructionCallType::InsertCode => 1,
            InstructionCallType::StartThread => 2,
            InstructionCallType::Comment => 3,
        }
    }
}

/// Kind of a program instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    Invalid,
    Move,
    MoveCircular,
    ChangeSpeed,
    ChangeFrame,
    ChangeTool,
    ChangeRobot,
    Pause,
    Event,
    Code,
    Print,
    Unknown(i32),
}

impl InstructionKind {
    pub fn from_wire(code: i32) -> Self {
        match code {
            -1 => InstructionKind::Invalid,
            0 => InstructionKind::Move,
            1 => InstructionKind::MoveCircular,
            2 => InstructionKind::ChangeSpeed,
            3 => InstructionKind::ChangeFrame,
            4 => InstructionKind::ChangeTool,
            5 => InstructionKind::ChangeRobot,
            6 => InstructionKind::Pause,
            7 => InstructionKind::Event,
            8 => InstructionKind::Code,
            9 => InstructionKind::Print,
            other => InstructionKind::Unknown(other),
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            InstructionKind::Invalid => -1,
            InstructionKind::Move => 0,
            InstructionKind::MoveCircular => 1,
            InstructionKind::ChangeSpeed => 2,
            InstructionKind::ChangeFrame => 3,
            InstructionKind::ChangeTool => 4,
            InstructionKind::ChangeRobot => 5,
            InstructionKind::Pause => 6,
            InstructionKind::Event => 7,
            InstructionKind::Code => 8,
            InstructionKind::Print => 9,
            InstructionKind::Unknown(code) => code,
        }
    }
}

/// Motion payload of a [`InstructionKind::Move`] instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionMove {
    /// Raw move type code; see [`InstructionMove::kind`].
    pub move_type: i32,
    pub is_joint_target: bool,
    pub pose: Matrix,
    pub joints: Vec<f64>,
}

impl InstructionMove {
    pub fn kind(&self) -> Option<MoveKind> {
        MoveKind::from_wire(self.move_type)
    }
}

/// One instruction of a program.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub name: String,
    pub kind: InstructionKind,
    /// Present exactly when `kind` is [`InstructionKind::Move`].
    pub motion: Option<InstructionMove>,
}

impl Instruction {
    /// A non-move instruction.
    pub fn new(name: impl Into<String>, kind: InstructionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            motion: None,
        }
    }

    /// A move instruction.
    pub fn movement(name: impl Into<String>, motion: InstructionMove) -> Self {
        Self {
            name: name.into(),
            kind: InstructionKind::Move,
            motion: Some(motion),
        }
    }

    fn validate(&self) -> LinkResult<()> {
        match (self.kind, &self.motion) {
            (InstructionKind::Move, Some(motion)) => {
                motion.pose.ensure_homogeneous()?;
                Ok(())
            }
            (InstructionKind::Move, None) => Err(LinkError::invalid_argument(
                "move instruction without motion data",
            )),
            (_, Some(_)) => Err(LinkError::invalid_argument(
                "only move instructions carry motion data",
            )),
            (_, None) => Ok(()),
        }
    }
}

/// Outcome of generating robot code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeProgramResult {
    /// Raw engine status; above 1 means the program was generated.
    pub status: i32,
    pub log: String,
}

impl MakeProgramResult {
    pub fn succeeded(&self) -> bool {
        self.status > 1
    }
}

/// Every instruction of a program, one per column.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionList {
    pub instructions: Matrix,
    pub errors: i32,
}

/// Joint trajectory of a program.
#[derive(Debug, Clone, PartialEq)]
pub struct JointListResult {
    /// `None` when the engine wrote the list to a file instead.
    pub joints: Option<Matrix>,
    /// 0 when the whole program is reachable.
    pub error_code: i32,
    pub message: String,
}

fn flag(value: bool) -> i32 {
    i32::from(value)
}

impl Link {
    /// Start a new offline program. Later moves and calls on this link are
    /// recorded into it. Returns the number of errors reported.
    pub fn program_start(
        &self,
        name: &str,
        folder: &str,
        post_processor: &str,
        robot: Option<&Item<'_>>,
    ) -> LinkResult<i32> {
        let robot_raw = optional_raw(robot)?;
        self.exchange("ProgramStart", 0, |t| {
            t.send_line(name)?;
            t.send_line(folder)?;
            t.send_line(post_processor)?;
            t.send_handle(robot_raw)?;
            let errors = t.recv_int()?;
            t.recv_status()?;
            Ok(errors)
        })
    }

    /// Add code to the generated program. With `function_call`, `code` is a
    /// call with parameters rather than a program name.
    pub fn run_code(&self, code: &str, function_call: bool) -> LinkResult<i32> {
        self.exchange("RunCode", 0, |t| {
            t.send_int(flag(function_call))?;
            t.send_line(code)?;
            let status = t.recv_int()?;
            t.recv_status()?;
            Ok(status)
        })
    }

    /// Add a message (or a comment) to the generated program.
    pub fn run_message(&self, message: &str, comment: bool) -> LinkResult<()> {
        self.exchange("RunMessage", 0, |t| {
            t.send_int(flag(comment))?;
            t.send_line(message)?;
            t.recv_status()
        })
    }
}

impl<'l> Item<'l> {
    /// Generate the robot program into `path`.
    pub fn make_program(&self, path: &str) -> LinkResult<MakeProgramResult> {
        self.call("MakeProg", |t, raw| {
            t.send_handle(raw)?;
            t.send_line(path)?;
            let status = t.recv_int()?;
            let log = t.recv_line()?;
            t.recv_status()?;
            Ok(MakeProgramResult { status, log })
        })
    }

    pub fn set_run_type(&self, run_type: ProgramRunType) -> LinkResult<()> {
        self.call("S_ProgRunType", |t, raw| {
            t.send_handle(raw)?;
            t.send_int(run_type.to_wire())?;
            t.recv_status()
        })
    }

    /// Start the program without waiting for it. Returns the number of
    /// instructions that can run; poll [`Item::is_busy`] for completion.
    pub fn run_program(&self) -> LinkResult<i32> {
        self.call("RunProg", |t, raw| {
            t.send_handle(raw)?;
            let status = t.recv_int()?;
            t.recv_status()?;
            Ok(status)
        })
    }

    /// Start the program with parameters.
    pub fn run_program_with(&self, params: &str) -> LinkResult<i32> {
        self.call("RunProgParam", |t, raw| {
            t.send_handle(raw)?;
            t.send_line(params)?;
            let status = t.recv_int()?;
            t.recv_status()?;
            Ok(status)
        })
    }

    /// Add a program call, code block, thread start or comment.
    pub fn run_instruction(&self, code: &str, call_type: InstructionCallType) -> LinkResult<i32> {
        let code = code.replace("\n\n", "<br>").replace('\n', "<br>");
        self.call("RunCode2", |t, raw| {
            t.send_handle(raw)?;
            t.send_line(&code)?;
            t.send_int(call_type.to_wire())?;
            let status = t.recv_int()?;
            t.recv_status()?;
            Ok(status)
        })
    }

    /// Add a pause. `None` waits for the operator to resume.
    pub fn pause(&self, millis: Option<f64>) -> LinkResult<()> {
        let millis = scaled(millis.unwrap_or(-1.0), "pause")?;
        self.call("RunPause", |t, raw| {
            t.send_handle(raw)?;
            t.send_int(millis)?;
            t.recv_status()
        })
    }

    pub fn set_digital_output(&self, variable: &str, value: &str) -> LinkResult<()> {
        self.call("setDO", |t, raw| {
            t.send_handle(raw)?;
            t.send_line(variable)?;
            t.send_line(value)?;
            t.recv_status()
        })
    }

    /// Wait for an input to reach `value`. `None` waits forever.
    pub fn wait_digital_input(
        &self,
        variable: &str,
        value: &str,
        timeout_ms: Option<f64>,
    ) -> LinkResult<()> {
        let timeout = scaled(timeout_ms.unwrap_or(-1.0), "input timeout")?;
        self.call("waitDI", |t, raw| {
            t.send_handle(raw)?;
            t.send_line(variable)?;
            t.send_line(value)?;
            t.send_int(timeout)?;
            t.recv_status()
        })
    }

    /// Append a joint move to `target` to this program.
    pub fn add_move_joint(&self, target: &Item<'_>) -> LinkResult<()> {
        self.add_move(target, MoveKind::Joint)
    }

    /// Append a linear move to `target` to this program.
    pub fn add_move_linear(&self, target: &Item<'_>) -> LinkResult<()> {
        self.add_move(target, MoveKind::Linear)
    }

    fn add_move(&self, target: &Item<'_>, kind: MoveKind) -> LinkResult<()> {
        let target_raw = target.live_raw()?;
        self.call("Add_INSMOVE", |t, raw| {
            t.send_handle(target_raw)?;
            t.send_handle(raw)?;
            t.send_int(kind.to_wire())?;
            t.recv_status()
        })
    }

    pub fn instruction_count(&self) -> LinkResult<i32> {
        self.call("Prog_Nins", |t, raw| {
            t.send_handle(raw)?;
            let count = t.recv_int()?;
            t.recv_status()?;
            Ok(count)
        })
    }

    pub fn instruction(&self, index: i32) -> LinkResult<Instruction> {
        self.call("Prog_GIns", |t, raw| {
            t.send_handle(raw)?;
            t.send_int(index)?;
            let name = t.recv_line()?;
            let kind = InstructionKind::from_wire(t.recv_int()?);
            let motion = match kind {
                InstructionKind::Move => Some(recv_instruction_move(t)?),
                _ => None,
            };
            t.recv_status()?;
            Ok(Instruction { name, kind, motion })
        })
    }

    pub fn set_instruction(&self, index: i32, instruction: &Instruction) -> LinkResult<()> {
        instruction.validate()?;
        self.call("Prog_SIns", |t, raw| {
            t.send_handle(raw)?;
            t.send_int(index)?;
            t.send_line(&instruction.name)?;
            t.send_int(instruction.kind.to_wire())?;
            if let Some(motion) = &instruction.motion {
                t.send_int(motion.move_type)?;
                t.send_int(flag(motion.is_joint_target))?;
                t.send_pose(&motion.pose)?;
                t.send_array(&motion.joints)?;
            }
            t.recv_status()
        })
    }

    pub fn instruction_list(&self) -> LinkResult<InstructionList> {
        self.call("G_ProgInsList", |t, raw| {
            t.send_handle(raw)?;
            let instructions = t.recv_matrix()?;
            let errors = t.recv_int()?;
            t.recv_status()?;
            Ok(InstructionList {
                instructions,
                errors,
            })
        })
    }

    /// Joint trajectory sampled every `mm_step` mm and `deg_step` degrees.
    /// With `save_to`, the engine writes the list to that file and no matrix
    /// is returned.
    pub fn instruction_list_joints(
        &self,
        mm_step: f64,
        deg_step: f64,
        save_to: Option<&str>,
    ) -> LinkResult<JointListResult> {
        let path = save_to.unwrap_or_default();
        self.call("G_ProgJointList", |t, raw| {
            t.send_handle(raw)?;
            t.send_array(&[mm_step, deg_step])?;
            t.send_line(path)?;
            let joints = if path.is_empty() {
                Some(t.recv_matrix()?)
            } else {
                None
            };
            let error_code = t.recv_int()?;
            let message = t.recv_line()?;
            t.recv_status()?;
            Ok(JointListResult {
                joints,
                error_code,
                message,
            })
        })
    }
}

fn recv_instruction_move(t: &mut Transport) -> LinkResult<InstructionMove> {
    let move_type = t.recv_int()?;
    let is_joint_target = t.recv_int()? > 0;
    let pose = t.recv_pose()?;
    let joints = t.recv_array()?;
    Ok(InstructionMove {
        move_type,
        is_joint_target,
        pose,
        joints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_mode_codes_round_trip() {
        for code in -1..8 {
            assert_eq!(RunMode::from_wire(code).to_wire(), code);
        }
        assert_eq!(RunMode::from_wire(6), RunMode::RunRobot);
    }

    #[test]
    fn instruction_kind_codes_round_trip() {
        for code in -2..12 {
            assert_eq!(InstructionKind::from_wire(code).to_wire(), code);
        }
        assert_eq!(InstructionKind::from_wire(0), InstructionKind::Move);
        assert_eq!(InstructionKind::from_wire(-1), InstructionKind::Invalid);
    }

    #[test]
    fn move_instructions_need_motion_data() {
        assert!(Instruction::new("Pause", InstructionKind::Pause).validate().is_ok());
        assert!(Instruction::new("MoveJ", InstructionKind::Move).validate().is_err());

        let mut motion = InstructionMove {
            move_type: 1,
            is_joint_target: true,
            pose: Matrix::identity(4),
            joints: vec![0.0; 6],
        };
        assert_eq!(motion.kind(), Some(MoveKind::Joint));
        assert!(Instruction::movement("MoveJ", motion.clone()).validate().is_ok());

        motion.pose = Matrix::identity(3);
        assert!(matches!(
            Instruction::movement("MoveJ", motion).validate(),
            Err(LinkError::Matrix(_))
        ));
    }

    #[test]
    fn make_program_success_threshold() {
        let result = |status| MakeProgramResult {
            status,
            log: String::new(),
        };
        assert!(!result(1).succeeded());
        assert!(result(2).succeeded());
    }
}
