//! In-memory engine that speaks the robolink wire protocol.
//!
//! It keeps a small station (frames, targets, programs and a Cartesian toy
//! robot whose first three joints are the flange position) and serves every
//! connection on its own thread. Integration tests start it through
//! `EngineProcess`.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use robolink::{wire, ItemType, LinkError, LinkResult, Matrix, MatrixError, StatusCode, READY};
use serde::Deserialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// How long a simulated move keeps the robot busy.
const MOVE_DURATION: Duration = Duration::from_millis(150);
const ROOT: u64 = 1;

#[derive(Parser, Debug)]
#[command(about = "In-memory robot simulation engine for integration tests")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:0")]
    bind_addr: SocketAddr,
    /// JSON station description loaded at startup
    #[arg(long)]
    station: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StationSeed {
    #[serde(default)]
    items: Vec<ItemSeed>,
    #[serde(default)]
    params: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ItemSeed {
    name: String,
    kind: ItemType,
    /// Name of an item seeded earlier; the station root when absent.
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    position: [f64; 3],
    #[serde(default)]
    joints: Vec<f64>,
}

impl StationSeed {
    fn demo() -> Self {
        Self {
            items: vec![
                ItemSeed {
                    name: "Robot".to_string(),
                    kind: ItemType::Robot,
                    parent: None,
                    position: [0.0; 3],
                    joints: vec![300.0, 0.0, 500.0, 0.0, 0.0, 0.0],
                },
                ItemSeed {
                    name: "Work Frame".to_string(),
                    kind: ItemType::Frame,
                    parent: None,
                    position: [500.0, 0.0, 0.0],
                    joints: Vec::new(),
                },
            ],
            params: BTreeMap::new(),
        }
    }

    fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(io::stderr)
        .init();

    let seed = match &args.station {
        Some(path) => StationSeed::load(path)?,
        None => StationSeed::demo(),
    };
    let station = Arc::new(Mutex::new(Station::from_seed(seed)?));

    let listener = TcpListener::bind(args.bind_addr)?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;
    println!("listening on {addr}");
    io::stdout().flush()?;

    let running = Arc::new(AtomicBool::new(true));
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                let station = station.clone();
                let running = running.clone();
                thread::spawn(move || {
                    if let Err(err) = serve(stream, &station, &running) {
                        warn!(%peer, error = %err, "connection ended with an error");
                    }
                });
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => return Err(err.into()),
        }
    }

    info!("quit requested, shutting down");
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Anchor {
    Local,
    Absolute,
    Tool,
    Frame,
    Geometry,
}

#[derive(Debug)]
enum Target {
    Joints(Vec<f64>),
    Pose(Matrix),
    Item(u64),
}

#[derive(Debug, Clone)]
struct FakeInstruction {
    name: String,
    kind: i32,
    move_type: i32,
    is_joint: bool,
    pose: Matrix,
    joints: Vec<f64>,
}

#[derive(Debug)]
struct FakeItem {
    name: String,
    kind: ItemType,
    parent: u64,
    pose: Matrix,
    tool: Matrix,
    frame: Matrix,
    geometry: Matrix,
    joints: Vec<f64>,
    home: Vec<f64>,
    visible: bool,
    robot: u64,
    busy_until: Option<Instant>,
    instructions: Vec<FakeInstruction>,
}

impl FakeItem {
    fn new(name: impl Into<String>, kind: ItemType, parent: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            parent,
            pose: Matrix::identity(4),
            tool: Matrix::identity(4),
            frame: Matrix::identity(4),
            geometry: Matrix::identity(4),
            joints: Vec::new(),
            home: Vec::new(),
            visible: true,
            robot: 0,
            busy_until: None,
            instructions: Vec::new(),
        }
    }

    fn is_busy(&self) -> bool {
        self.busy_until.is_some_and(|until| Instant::now() < until)
    }

    fn anchor(&self, anchor: Anchor) -> &Matrix {
        match anchor {
            Anchor::Local | Anchor::Absolute => &self.pose,
            Anchor::Tool => &self.tool,
            Anchor::Frame => &self.frame,
            Anchor::Geometry => &self.geometry,
        }
    }
}

enum Value {
    Int(i32),
    Line(String),
    Lines(Vec<String>),
    Item(u64, i32),
    Items(Vec<(u64, i32)>),
    Array(Vec<f64>),
    Pose(Matrix),
    Matrix(Matrix),
}

enum Failure {
    InvalidItem,
    Hard(String),
}

impl From<MatrixError> for Failure {
    fn from(err: MatrixError) -> Self {
        Failure::Hard(err.to_string())
    }
}

type Reply = Result<Vec<Value>, Failure>;

fn done() -> Reply {
    Ok(Vec::new())
}

/// Toy forward kinematics: the first three joints are the flange position.
fn forward(joints: &[f64]) -> Matrix {
    let axis = |i: usize| joints.get(i).copied().unwrap_or(0.0);
    Matrix::from_translation(axis(0), axis(1), axis(2))
}

fn inverse(pose: &Matrix, dof: usize) -> Result<Vec<f64>, Failure> {
    let mut joints = pose.position()?.to_vec();
    joints.resize(dof.max(3), 0.0);
    Ok(joints)
}

struct Station {
    items: BTreeMap<u64, FakeItem>,
    params: BTreeMap<String, String>,
    next_handle: u64,
}

impl Station {
    fn from_seed(seed: StationSeed) -> Result<Self, String> {
        let mut station = Self {
            items: BTreeMap::new(),
            params: seed.params,
            next_handle: ROOT,
        };
        station.insert(FakeItem::new("Station", ItemType::Station, 0));
        for item in seed.items {
            let parent = match &item.parent {
                Some(name) => station
                    .find_handle(name, None)
                    .ok_or_else(|| format!("unknown parent {name:?} for {:?}", item.name))?,
                None => ROOT,
            };
            let mut fake = FakeItem::new(item.name, item.kind, parent);
            let [x, y, z] = item.position;
            fake.pose = Matrix::from_translation(x, y, z);
            fake.home = item.joints.clone();
            fake.joints = item.joints;
            station.insert(fake);
        }
        Ok(station)
    }

    fn insert(&mut self, item: FakeItem) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.items.insert(handle, item);
        handle
    }

    fn item(&self, handle: u64) -> Result<&FakeItem, Failure> {
        self.items.get(&handle).ok_or(Failure::InvalidItem)
    }

    fn item_mut(&mut self, handle: u64) -> Result<&mut FakeItem, Failure> {
        self.items.get_mut(&handle).ok_or(Failure::InvalidItem)
    }

    fn wire_item(&self, handle: u64) -> Value {
        match self.items.get(&handle) {
            Some(item) => Value::Item(handle, item.kind.to_wire()),
            None => Value::Item(0, -1),
        }
    }

    fn matches(item: &FakeItem, filter: Option<i32>) -> bool {
        filter.map_or(true, |code| code < 0 || item.kind.to_wire() == code)
    }

    fn find_handle(&self, name: &str, filter: Option<i32>) -> Option<u64> {
        self.items
            .iter()
            .find(|(_, item)| item.name == name && Self::matches(item, filter))
            .map(|(handle, _)| *handle)
    }

    fn listed(&self, filter: Option<i32>) -> impl Iterator<Item = (&u64, &FakeItem)> + '_ {
        self.items
            .iter()
            .filter(move |(handle, item)| **handle != ROOT && Self::matches(item, filter))
    }

    fn find(&self, name: &str, filter: Option<i32>) -> Reply {
        let handle = self.find_handle(name, filter).unwrap_or(0);
        Ok(vec![self.wire_item(handle)])
    }

    fn names(&self, filter: Option<i32>) -> Reply {
        let names: Vec<String> = self.listed(filter).map(|(_, item)| item.name.clone()).collect();
        Ok(vec![Value::Int(names.len() as i32), Value::Lines(names)])
    }

    fn handles(&self, filter: Option<i32>) -> Reply {
        let items = self
            .listed(filter)
            .map(|(handle, item)| (*handle, item.kind.to_wire()))
            .collect();
        Ok(vec![Value::Items(items)])
    }

    fn children(&self, handle: u64) -> Reply {
        self.item(handle)?;
        let items = self
            .items
            .iter()
            .filter(|(_, item)| item.parent == handle)
            .map(|(child, item)| (*child, item.kind.to_wire()))
            .collect();
        Ok(vec![Value::Items(items)])
    }

    fn absolute(&self, handle: u64) -> Result<Matrix, Failure> {
        let mut chain = Vec::new();
        let mut current = handle;
        while current != 0 {
            let item = self.item(current)?;
            chain.push(&item.pose);
            if chain.len() > self.items.len() {
                return Err(Failure::Hard("parent cycle".to_string()));
            }
            current = item.parent;
        }
        let mut pose = Matrix::identity(4);
        for local in chain.iter().rev() {
            pose = pose.multiply(local)?;
        }
        Ok(pose)
    }

    fn pose_of(&self, handle: u64, anchor: Anchor) -> Reply {
        let pose = match anchor {
            Anchor::Absolute => self.absolute(handle)?,
            other => self.item(handle)?.anchor(other).clone(),
        };
        Ok(vec![Value::Pose(pose)])
    }

    fn set_pose(&mut self, handle: u64, anchor: Anchor, pose: Matrix) -> Reply {
        let local = match anchor {
            Anchor::Absolute => {
                let parent = self.item(handle)?.parent;
                self.absolute(parent)?.invert()?.multiply(&pose)?
            }
            _ => pose,
        };
        let item = self.item_mut(handle)?;
        match anchor {
            Anchor::Local | Anchor::Absolute => item.pose = local,
            Anchor::Tool => item.tool = local,
            Anchor::Frame => item.frame = local,
            Anchor::Geometry => item.geometry = local,
        }
        done()
    }

    /// `S_Tool_ptr` / `S_Frame_ptr`: copy the pose of another item.
    fn set_anchor_item(&mut self, robot: u64, anchor: Anchor, source: u64) -> Reply {
        let pose = self.item(source)?.pose.clone();
        self.set_pose(robot, anchor, pose)
    }

    fn set_parent(&mut self, handle: u64, parent: u64, keep_absolute: bool) -> Reply {
        self.item(handle)?;
        let parent = self.parent_or_root(parent)?;
        let mut current = parent;
        while current != 0 {
            if current == handle {
                return Err(Failure::Hard("cannot attach an item below itself".to_string()));
            }
            current = self.item(current)?.parent;
        }
        let local = if keep_absolute {
            Some(self.absolute(parent)?.invert()?.multiply(&self.absolute(handle)?)?)
        } else {
            None
        };
        let item = self.item_mut(handle)?;
        item.parent = parent;
        if let Some(local) = local {
            item.pose = local;
        }
        done()
    }

    fn remove(&mut self, handle: u64) -> Reply {
        if handle == 0 || handle == ROOT {
            self.items.retain(|handle, _| *handle == ROOT);
            return done();
        }
        self.item(handle)?;
        let mut doomed = vec![handle];
        let mut idx = 0;
        while idx < doomed.len() {
            let parent = doomed[idx];
            doomed.extend(
                self.items
                    .iter()
                    .filter(|(_, item)| item.parent == parent)
                    .map(|(child, _)| *child),
            );
            idx += 1;
        }
        for handle in doomed {
            self.items.remove(&handle);
        }
        done()
    }

    fn parent_or_root(&self, parent: u64) -> Result<u64, Failure> {
        if parent == 0 {
            Ok(ROOT)
        } else {
            self.item(parent).map(|_| parent)
        }
    }

    fn add(&mut self, name: String, kind: ItemType, parent: u64, robot: u64) -> Reply {
        let parent = self.parent_or_root(parent)?;
        let mut item = FakeItem::new(name, kind, parent);
        if robot != 0 {
            let joints = self.item(robot)?.joints.clone();
            item.robot = robot;
            if kind == ItemType::Target {
                item.pose = forward(&joints);
                item.joints = joints;
            }
        }
        let handle = self.insert(item);
        Ok(vec![self.wire_item(handle)])
    }

    fn joints(&self, handle: u64, home: bool) -> Reply {
        let item = self.item(handle)?;
        let joints = if home { &item.home } else { &item.joints };
        Ok(vec![Value::Array(joints.clone())])
    }

    fn set_joints(&mut self, handle: u64, joints: Vec<f64>) -> Reply {
        let item = self.item_mut(handle)?;
        if item.kind == ItemType::Target {
            item.pose = forward(&joints);
        }
        item.joints = joints;
        done()
    }

    fn resolve(&self, robot: u64, target: Target) -> Result<Vec<f64>, Failure> {
        let dof = self.item(robot)?.joints.len();
        match target {
            Target::Joints(joints) => Ok(joints),
            Target::Pose(pose) => inverse(&pose, dof),
            Target::Item(handle) => {
                let target = self.item(handle)?;
                if target.joints.is_empty() {
                    inverse(&self.absolute(handle)?, dof)
                } else {
                    Ok(target.joints.clone())
                }
            }
        }
    }

    fn start_move(&mut self, robot: u64, target: Target) -> Reply {
        let joints = self.resolve(robot, target)?;
        let item = self.item_mut(robot)?;
        item.joints = joints;
        item.busy_until = Some(Instant::now() + MOVE_DURATION);
        done()
    }

    fn param(&self, name: &str) -> Reply {
        let value = self
            .params
            .get(name)
            .cloned()
            .unwrap_or_else(|| format!("UNKNOWN {name}"));
        Ok(vec![Value::Line(value)])
    }

    fn all_params(&self) -> Reply {
        let flat = self
            .params
            .iter()
            .flat_map(|(name, value)| [name.clone(), value.clone()])
            .collect();
        Ok(vec![Value::Int(self.params.len() as i32), Value::Lines(flat)])
    }

    fn add_move(&mut self, target: u64, program: u64, move_type: i32) -> Reply {
        self.item(program)?;
        let target_item = self.item(target)?;
        let instruction = FakeInstruction {
            name: format!(
                "Move{} ({})",
                if move_type == 1 { "J" } else { "L" },
                target_item.name
            ),
            kind: 0,
            move_type,
            is_joint: !target_item.joints.is_empty(),
            pose: target_item.pose.clone(),
            joints: target_item.joints.clone(),
        };
        self.item_mut(program)?.instructions.push(instruction);
        done()
    }

    fn instruction(&self, program: u64, index: i32) -> Reply {
        let program = self.item(program)?;
        let ins = usize::try_from(index)
            .ok()
            .and_then(|idx| program.instructions.get(idx))
            .ok_or_else(|| Failure::Hard(format!("no instruction {index}")))?;
        let mut values = vec![Value::Line(ins.name.clone()), Value::Int(ins.kind)];
        if ins.kind == 0 {
            values.push(Value::Int(ins.move_type));
            values.push(Value::Int(i32::from(ins.is_joint)));
            values.push(Value::Pose(ins.pose.clone()));
            values.push(Value::Array(ins.joints.clone()));
        }
        Ok(values)
    }

    fn set_instruction(&mut self, program: u64, index: i32, ins: FakeInstruction) -> Reply {
        let program = self.item_mut(program)?;
        let slot = usize::try_from(index)
            .ok()
            .and_then(|idx| program.instructions.get_mut(idx))
            .ok_or_else(|| Failure::Hard(format!("no instruction {index}")))?;
        *slot = ins;
        done()
    }

    /// Play every move instruction on the program's robot.
    fn run_program(&mut self, program: u64) -> Reply {
        let item = self.item(program)?;
        let count = item.instructions.len() as i32;
        let last = item
            .instructions
            .iter()
            .rev()
            .find(|ins| ins.kind == 0 && !ins.joints.is_empty())
            .map(|ins| ins.joints.clone());
        let robot = item.robot;
        if let (Some(joints), true) = (last, robot != 0) {
            self.start_move(robot, Target::Joints(joints))?;
        }
        Ok(vec![Value::Int(count)])
    }
}

fn lock(station: &Mutex<Station>) -> MutexGuard<'_, Station> {
    station.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Conn {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

enum Flow {
    Continue,
    Quit,
    Hangup,
}

impl Conn {
    fn new(stream: TcpStream) -> io::Result<Self> {
        let writer = BufWriter::new(stream.try_clone()?);
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn line(&mut self) -> LinkResult<String> {
        wire::read_line(&mut self.reader)
    }

    fn int(&mut self) -> LinkResult<i32> {
        wire::read_i32(&mut self.reader)
    }

    fn handle(&mut self) -> LinkResult<u64> {
        wire::read_handle(&mut self.reader)
    }

    fn array(&mut self) -> LinkResult<Vec<f64>> {
        wire::read_array(&mut self.reader)
    }

    fn pose(&mut self) -> LinkResult<Matrix> {
        wire::read_pose(&mut self.reader)
    }

    fn target(&mut self) -> LinkResult<Target> {
        let kind = self.int()?;
        let values = self.array()?;
        let handle = self.handle()?;
        match kind {
            1 => Ok(Target::Joints(values)),
            2 => Ok(Target::Pose(Matrix::from_column_major(4, 4, &values)?)),
            3 => Ok(Target::Item(handle)),
            other => Err(LinkError::ProtocolViolation(format!(
                "unknown target discriminator {other}"
            ))),
        }
    }

    fn put(&mut self, value: Value) -> io::Result<()> {
        let w = &mut self.writer;
        match value {
            Value::Int(v) => wire::write_i32(w, v),
            Value::Line(text) => wire::write_line(w, &text),
            Value::Lines(lines) => lines.iter().try_for_each(|line| wire::write_line(w, line)),
            Value::Item(handle, kind) => {
                wire::write_handle(w, handle)?;
                wire::write_i32(w, kind)
            }
            Value::Items(items) => {
                wire::write_i32(w, items.len() as i32)?;
                items.iter().try_for_each(|(handle, kind)| {
                    wire::write_handle(w, *handle)?;
                    wire::write_i32(w, *kind)
                })
            }
            Value::Array(values) => wire::write_array(w, &values),
            Value::Pose(pose) => wire::write_pose(w, &pose),
            Value::Matrix(matrix) => wire::write_matrix(w, &matrix),
        }
    }

    fn status(&mut self, status: StatusCode, message: &str) -> io::Result<()> {
        wire::write_i32(&mut self.writer, status.to_wire())?;
        if status.carries_message() {
            wire::write_line(&mut self.writer, message)?;
        }
        Ok(())
    }

    fn reply(&mut self, reply: Reply) -> io::Result<()> {
        match reply {
            Ok(values) => {
                for value in values {
                    self.put(value)?;
                }
                self.status(StatusCode::Ok, "")
            }
            Err(Failure::InvalidItem) => self.status(StatusCode::InvalidItem, ""),
            Err(Failure::Hard(message)) => self.status(StatusCode::HardFailure, &message),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn handshake(&mut self) -> LinkResult<bool> {
        let start = self.line()?;
        let flags = self.line()?;
        if start != "CMD_START" {
            wire::write_line(&mut self.writer, "UNEXPECTED")?;
            self.flush()?;
            return Ok(false);
        }
        debug!(flags = %flags, "handshake");
        wire::write_line(&mut self.writer, READY)?;
        self.flush()?;
        Ok(true)
    }
}

fn serve(stream: TcpStream, station: &Mutex<Station>, running: &AtomicBool) -> LinkResult<()> {
    let peer = stream.peer_addr()?;
    let mut conn = Conn::new(stream)?;
    if !conn.handshake()? {
        warn!(%peer, "rejected client with a bad handshake");
        return Ok(());
    }
    info!(%peer, "client connected");

    loop {
        let command = match conn.line() {
            Ok(command) => command,
            Err(LinkError::ConnectionClosed) => break,
            Err(err) => return Err(err),
        };
        debug!(%peer, command, "request");
        let flow = dispatch(&command, &mut conn, station)?;
        conn.flush()?;
        match flow {
            Flow::Continue => {}
            Flow::Quit => {
                running.store(false, Ordering::SeqCst);
                break;
            }
            Flow::Hangup => break,
        }
    }

    info!(%peer, "client disconnected");
    Ok(())
}

fn dispatch(command: &str, c: &mut Conn, station: &Mutex<Station>) -> LinkResult<Flow> {
    let reply = match command {
        "G_Item" => {
            let name = c.line()?;
            lock(station).find(&name, None)
        }
        "G_Item2" => {
            let name = c.line()?;
            let kind = c.int()?;
            lock(station).find(&name, Some(kind))
        }
        "G_List_Items" => lock(station).names(None),
        "G_List_Items_Type" => {
            let kind = c.int()?;
            lock(station).names(Some(kind))
        }
        "G_List_Items_ptr" => lock(station).handles(None),
        "G_List_Items_Type_ptr" => {
            let kind = c.int()?;
            lock(station).handles(Some(kind))
        }
        "G_Item_Type" => {
            let handle = c.handle()?;
            lock(station)
                .item(handle)
                .map(|item| vec![Value::Int(item.kind.to_wire())])
        }
        "G_Name" => {
            let handle = c.handle()?;
            lock(station)
                .item(handle)
                .map(|item| vec![Value::Line(item.name.clone())])
        }
        "S_Name" => {
            let handle = c.handle()?;
            let name = c.line()?;
            lock(station).item_mut(handle).map(|item| {
                item.name = name;
                Vec::new()
            })
        }
        "G_Childs" => {
            let handle = c.handle()?;
            lock(station).children(handle)
        }
        "G_Visible" => {
            let handle = c.handle()?;
            lock(station)
                .item(handle)
                .map(|item| vec![Value::Int(i32::from(item.visible))])
        }
        "S_Visible" => {
            let handle = c.handle()?;
            let visible = c.int()? != 0;
            let _frame_visible = c.int()?;
            lock(station).item_mut(handle).map(|item| {
                item.visible = visible;
                Vec::new()
            })
        }
        "S_Parent" | "S_Parent_Static" => {
            let handle = c.handle()?;
            let parent = c.handle()?;
            lock(station).set_parent(handle, parent, command == "S_Parent_Static")
        }
        "G_Hlocal" | "G_Hlocal_Abs" | "G_Tool" | "G_Frame" | "G_Hgeom" => {
            let handle = c.handle()?;
            lock(station).pose_of(handle, anchor_of(command))
        }
        "S_Hlocal" | "S_Hlocal_Abs" | "S_Hgeom" => {
            let handle = c.handle()?;
            let pose = c.pose()?;
            lock(station).set_pose(handle, anchor_of(command), pose)
        }
        "S_Tool" | "S_Frame" => {
            let pose = c.pose()?;
            let handle = c.handle()?;
            lock(station).set_pose(handle, anchor_of(command), pose)
        }
        "S_Tool_ptr" | "S_Frame_ptr" => {
            let source = c.handle()?;
            let robot = c.handle()?;
            lock(station).set_anchor_item(robot, anchor_of(command), source)
        }
        "Remove" => {
            let handle = c.handle()?;
            lock(station).remove(handle)
        }
        "Add_FRAME" => {
            let name = c.line()?;
            let parent = c.handle()?;
            lock(station).add(name, ItemType::Frame, parent, 0)
        }
        "Add_TARGET" => {
            let name = c.line()?;
            let parent = c.handle()?;
            let robot = c.handle()?;
            lock(station).add(name, ItemType::Target, parent, robot)
        }
        "Add_PROG" => {
            let name = c.line()?;
            let robot = c.handle()?;
            lock(station).add(name, ItemType::Program, 0, robot)
        }
        "G_Thetas" | "G_Home" => {
            let handle = c.handle()?;
            lock(station).joints(handle, command == "G_Home")
        }
        "S_Thetas" => {
            let joints = c.array()?;
            let handle = c.handle()?;
            lock(station).set_joints(handle, joints)
        }
        "G_ThetasList" => return joints_list(c, station),
        "S_ThetasList" => {
            let count = c.int()?;
            let mut updates = Vec::new();
            for _ in 0..count {
                let handle = c.handle()?;
                updates.push((handle, c.array()?));
            }
            let mut station = lock(station);
            updates
                .into_iter()
                .try_for_each(|(handle, joints)| station.set_joints(handle, joints).map(drop))
                .map(|()| Vec::new())
        }
        "G_FK" => {
            let joints = c.array()?;
            let handle = c.handle()?;
            lock(station)
                .item(handle)
                .map(|_| vec![Value::Pose(forward(&joints))])
        }
        "G_IK" | "G_IK_cmpl" => {
            let pose = c.pose()?;
            let handle = c.handle()?;
            let station = lock(station);
            station
                .item(handle)
                .and_then(|robot| inverse(&pose, robot.joints.len()))
                .and_then(|joints| {
                    if command == "G_IK" {
                        return Ok(vec![Value::Array(joints)]);
                    }
                    let column = Matrix::from_column_major(joints.len(), 1, &joints)?;
                    Ok(vec![Value::Matrix(column)])
                })
        }
        "G_Thetas_Config" => {
            let _joints = c.array()?;
            let handle = c.handle()?;
            lock(station)
                .item(handle)
                .map(|_| vec![Value::Array(vec![0.0; 3])])
        }
        "G_RobLimits" => {
            let handle = c.handle()?;
            lock(station).item(handle).map(|robot| {
                let dof = robot.joints.len();
                vec![
                    Value::Array(vec![-1000.0; dof]),
                    Value::Array(vec![1000.0; dof]),
                    Value::Int(0),
                ]
            })
        }
        "MoveX" => {
            let _move_type = c.int()?;
            let target = c.target()?;
            let robot = c.handle()?;
            lock(station).start_move(robot, target)
        }
        "MoveC" => {
            let _move_type = c.int()?;
            let _via = c.target()?;
            let end = c.target()?;
            let robot = c.handle()?;
            lock(station).start_move(robot, end)
        }
        "WaitMove" => return wait_move(c, station),
        "IsBusy" => {
            let handle = c.handle()?;
            lock(station)
                .item(handle)
                .map(|robot| vec![Value::Int(i32::from(robot.is_busy()))])
        }
        "Stop" => {
            let handle = c.handle()?;
            lock(station).item_mut(handle).map(|robot| {
                robot.busy_until = None;
                Vec::new()
            })
        }
        "S_Speed4" => {
            let handle = c.handle()?;
            let _speeds = c.array()?;
            lock(station).item(handle).map(|_| Vec::new())
        }
        "S_ZoneData" => {
            let _zone = c.int()?;
            let handle = c.handle()?;
            lock(station).item(handle).map(|_| Vec::new())
        }
        "G_Param" => {
            let name = c.line()?;
            lock(station).param(&name)
        }
        "S_Param" => {
            let name = c.line()?;
            let value = c.line()?;
            lock(station).params.insert(name, value);
            done()
        }
        "G_Params" => lock(station).all_params(),
        "Collisions" => Ok(vec![Value::Int(0)]),
        "Collided" => {
            let a = c.handle()?;
            let b = c.handle()?;
            let station = lock(station);
            station
                .item(a)
                .and_then(|_| station.item(b))
                .map(|_| vec![Value::Int(0)])
        }
        "Render" => {
            let _auto_render = c.int()?;
            done()
        }
        "Add_INSMOVE" => {
            let target = c.handle()?;
            let program = c.handle()?;
            let move_type = c.int()?;
            lock(station).add_move(target, program, move_type)
        }
        "Prog_Nins" => {
            let handle = c.handle()?;
            lock(station)
                .item(handle)
                .map(|program| vec![Value::Int(program.instructions.len() as i32)])
        }
        "Prog_GIns" => {
            let handle = c.handle()?;
            let index = c.int()?;
            lock(station).instruction(handle, index)
        }
        "Prog_SIns" => {
            let handle = c.handle()?;
            let index = c.int()?;
            let name = c.line()?;
            let kind = c.int()?;
            let mut ins = FakeInstruction {
                name,
                kind,
                move_type: 0,
                is_joint: false,
                pose: Matrix::identity(4),
                joints: Vec::new(),
            };
            if kind == 0 {
                ins.move_type = c.int()?;
                ins.is_joint = c.int()? > 0;
                ins.pose = c.pose()?;
                ins.joints = c.array()?;
            }
            lock(station).set_instruction(handle, index, ins)
        }
        "RunProg" => {
            let handle = c.handle()?;
            lock(station).run_program(handle)
        }
        "QUIT" => {
            c.status(StatusCode::Ok, "")?;
            return Ok(Flow::Quit);
        }
        other => {
            // Arguments of an unknown command cannot be skipped.
            warn!(command = other, "unsupported command");
            c.status(StatusCode::HardFailure, &format!("unsupported command {other}"))?;
            return Ok(Flow::Hangup);
        }
    };
    c.reply(reply)?;
    Ok(Flow::Continue)
}

fn anchor_of(command: &str) -> Anchor {
    match command {
        "G_Hlocal_Abs" | "S_Hlocal_Abs" => Anchor::Absolute,
        "G_Tool" | "S_Tool" | "S_Tool_ptr" => Anchor::Tool,
        "G_Frame" | "S_Frame" | "S_Frame_ptr" => Anchor::Frame,
        "G_Hgeom" | "S_Hgeom" => Anchor::Geometry,
        _ => Anchor::Local,
    }
}

/// The client sends one robot at a time and waits for its joints.
fn joints_list(c: &mut Conn, station: &Mutex<Station>) -> LinkResult<Flow> {
    let count = c.int()?;
    let mut missing = false;
    for _ in 0..count {
        let handle = c.handle()?;
        let joints = match lock(station).item(handle) {
            Ok(robot) => robot.joints.clone(),
            Err(_) => {
                missing = true;
                Vec::new()
            }
        };
        wire::write_array(&mut c.writer, &joints)?;
        c.flush()?;
    }
    let status = if missing {
        StatusCode::InvalidItem
    } else {
        StatusCode::Ok
    };
    c.status(status, "")?;
    Ok(Flow::Continue)
}

/// Acknowledge at once, answer again when the robot stops.
fn wait_move(c: &mut Conn, station: &Mutex<Station>) -> LinkResult<Flow> {
    let handle = c.handle()?;
    let until = match lock(station).item(handle) {
        Ok(robot) => robot.busy_until,
        Err(_) => {
            c.status(StatusCode::InvalidItem, "")?;
            c.status(StatusCode::Ok, "")?;
            return Ok(Flow::Continue);
        }
    };
    c.status(StatusCode::Ok, "")?;
    c.flush()?;
    if let Some(until) = until {
        thread::sleep(until.saturating_duration_since(Instant::now()));
    }
    c.status(StatusCode::Ok, "")?;
    Ok(Flow::Continue)
}
