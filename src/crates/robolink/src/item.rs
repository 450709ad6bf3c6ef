use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, LinkResult};
use crate::link::Link;
use crate::math::Matrix;
use crate::station::{recv_items, Projection};
use crate::transport::Transport;

/// Kind of scene object behind a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ItemType {
    Station,
    Robot,
    Frame,
    Tool,
    Object,
    Target,
    Program,
    Instruction,
    ProgramPython,
    Machining,
    BallbarValidation,
    CalibProject,
    ValidIso9283,
    Unknown(i32),
}

impl ItemType {
    pub fn from_wire(code: i32) -> Self {
        match code {
            1 => ItemType::Station,
            2 => ItemType::Robot,
            3 => ItemType::Frame,
            4 => ItemType::Tool,
            5 => ItemType::Object,
            6 => ItemType::Target,
            8 => ItemType::Program,
            9 => ItemType::Instruction,
            10 => ItemType::ProgramPython,
            11 => ItemType::Machining,
            12 => ItemType::BallbarValidation,
            13 => ItemType::CalibProject,
            14 => ItemType::ValidIso9283,
            other => ItemType::Unknown(other),
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            ItemType::Station => 1,
            ItemType::Robot => 2,
            ItemType::Frame => 3,
            ItemType::Tool => 4,
            ItemType::Object => 5,
            ItemType::Target => 6,
            ItemType::Program => 8,
            ItemType::Instruction => 9,
            ItemType::ProgramPython => 10,
            ItemType::Machining => 11,
            ItemType::BallbarValidation => 12,
            ItemType::CalibProject => 13,
            ItemType::ValidIso9283 => 14,
            ItemType::Unknown(code) => code,
        }
    }

    /// Wire value of a type filter; `None` matches any type.
    pub fn filter_code(filter: Option<ItemType>) -> i32 {
        filter.map_or(-1, ItemType::to_wire)
    }
}

impl From<i32> for ItemType {
    fn from(code: i32) -> Self {
        ItemType::from_wire(code)
    }
}

impl From<ItemType> for i32 {
    fn from(kind: ItemType) -> Self {
        kind.to_wire()
    }
}

/// Engine-issued identifier of a scene object plus its last known type.
///
/// Handles are plain values that can cross threads, but they only mean
/// something to the engine that issued them. Raw value 0 is the null handle.
/// Equality and hashing consider the raw value only.
#[derive(Debug, Clone, Copy)]
pub struct ItemHandle {
    raw: u64,
    kind: ItemType,
}

impl ItemHandle {
    pub const NULL: ItemHandle = ItemHandle {
        raw: 0,
        kind: ItemType::Unknown(-1),
    };

    pub fn new(raw: u64, kind: ItemType) -> Self {
        Self { raw, kind }
    }

    pub(crate) fn from_wire((raw, kind): (u64, i32)) -> Self {
        Self::new(raw, ItemType::from_wire(kind))
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }

    pub fn kind(&self) -> ItemType {
        self.kind
    }

    pub fn is_valid(&self) -> bool {
        self.raw != 0
    }
}

impl PartialEq for ItemHandle {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for ItemHandle {}

impl Hash for ItemHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

/// Proxy for one remote scene object, bound to the link that produced it.
///
/// Nothing is cached: every accessor is a round trip to the engine.
#[derive(Clone)]
pub struct Item<'l> {
    link: &'l Link,
    handle: ItemHandle,
}

impl<'l> Item<'l> {
    pub(crate) fn new(link: &'l Link, handle: ItemHandle) -> Self {
        Self { link, handle }
    }

    pub fn link(&self) -> &'l Link {
        self.link
    }

    pub fn handle(&self) -> ItemHandle {
        self.handle
    }

    pub fn raw(&self) -> u64 {
        self.handle.raw
    }

    /// Type reported when the handle was received.
    pub fn kind(&self) -> ItemType {
        self.handle.kind
    }

    /// Whether the handle is non-null. Says nothing about whether the engine
    /// still knows the object.
    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub(crate) fn live_raw(&self) -> LinkResult<u64> {
        if self.handle.is_valid() {
            Ok(self.handle.raw)
        } else {
            Err(LinkError::InvalidItem)
        }
    }

    pub(crate) fn adopt(&self, wire: (u64, i32)) -> Item<'l> {
        Item::new(self.link, ItemHandle::from_wire(wire))
    }

    /// One exchange about this item. The handle is checked before anything
    /// is sent.
    pub(crate) fn call<T>(
        &self,
        command: &'static str,
        body: impl FnOnce(&mut Transport, u64) -> LinkResult<T>,
    ) -> LinkResult<T> {
        let raw = self.live_raw()?;
        self.link.exchange(command, raw, |t| body(t, raw))
    }

    /// Common shape: send this item, read the status.
    fn call_unit(&self, command: &'static str) -> LinkResult<()> {
        self.call(command, |t, raw| {
            t.send_handle(raw)?;
            t.recv_status()
        })
    }

    fn get_pose(&self, command: &'static str) -> LinkResult<Matrix> {
        self.call(command, |t, raw| {
            t.send_handle(raw)?;
            let pose = t.recv_pose()?;
            t.recv_status()?;
            Ok(pose)
        })
    }

    /// Item first, pose second.
    fn set_pose_after_item(&self, command: &'static str, pose: &Matrix) -> LinkResult<()> {
        pose.ensure_homogeneous()?;
        self.call(command, |t, raw| {
            t.send_handle(raw)?;
            t.send_pose(pose)?;
            t.recv_status()
        })
    }

    /// Pose first, item second.
    fn set_pose_before_item(&self, command: &'static str, pose: &Matrix) -> LinkResult<()> {
        pose.ensure_homogeneous()?;
        self.call(command, |t, raw| {
            t.send_pose(pose)?;
            t.send_handle(raw)?;
            t.recv_status()
        })
    }

    /// Query the engine for the current type and update the cached tag.
    pub fn refresh_type(&mut self) -> LinkResult<ItemType> {
        let code = self.call("G_Item_Type", |t, raw| {
            t.send_handle(raw)?;
            let code = t.recv_int()?;
            t.recv_status()?;
            Ok(code)
        })?;
        self.handle.kind = ItemType::from_wire(code);
        Ok(self.handle.kind)
    }

    pub fn name(&self) -> LinkResult<String> {
        self.call("G_Name", |t, raw| {
            t.send_handle(raw)?;
            let name = t.recv_line()?;
            t.recv_status()?;
            Ok(name)
        })
    }

    pub fn set_name(&self, name: &str) -> LinkResult<()> {
        self.call("S_Name", |t, raw| {
            t.send_handle(raw)?;
            t.send_line(name)?;
            t.recv_status()
        })
    }

    /// Direct children, in engine order.
    pub fn children(&self) -> LinkResult<Vec<Item<'l>>> {
        let handles = self.call("G_Childs", |t, raw| {
            t.send_handle(raw)?;
            let handles = recv_items(t)?;
            t.recv_status()?;
            Ok(handles)
        })?;
        Ok(handles.into_iter().map(|wire| self.adopt(wire)).collect())
    }

    pub fn is_visible(&self) -> LinkResult<bool> {
        self.call("G_Visible", |t, raw| {
            t.send_handle(raw)?;
            let visible = t.recv_int()?;
            t.recv_status()?;
            Ok(visible != 0)
        })
    }

    /// Show or hide the item. `frame_visible` defaults to `visible`.
    pub fn set_visible(&self, visible: bool, frame_visible: Option<bool>) -> LinkResult<()> {
        let frame = i32::from(frame_visible.unwrap_or(visible));
        self.call("S_Visible", |t, raw| {
            t.send_handle(raw)?;
            t.send_int(i32::from(visible))?;
            t.send_int(frame)?;
            t.recv_status()
        })
    }

    /// Re-parent, keeping the pose relative to the parent.
    pub fn set_parent(&self, parent: &Item<'_>) -> LinkResult<()> {
        let parent_raw = parent.live_raw()?;
        self.call("S_Parent", |t, raw| {
            t.send_handle(raw)?;
            t.send_handle(parent_raw)?;
            t.recv_status()
        })
    }

    /// Re-parent, keeping the absolute pose.
    pub fn set_parent_static(&self, parent: &Item<'_>) -> LinkResult<()> {
        let parent_raw = parent.live_raw()?;
        self.call("S_Parent_Static", |t, raw| {
            t.send_handle(raw)?;
            t.send_handle(parent_raw)?;
            t.recv_status()
        })
    }

    /// Attach the closest object to this tool. May return a null item.
    pub fn attach_closest(&self) -> LinkResult<Item<'l>> {
        let wire = self.call("Attach_Closest", |t, raw| {
            t.send_handle(raw)?;
            let wire = t.recv_item()?;
            t.recv_status()?;
            Ok(wire)
        })?;
        Ok(self.adopt(wire))
    }

    /// Detach the closest attached object, optionally onto `parent`.
    pub fn detach_closest(&self, parent: Option<&Item<'_>>) -> LinkResult<Item<'l>> {
        let parent_raw = optional_raw(parent)?;
        let wire = self.call("Detach_Closest", |t, raw| {
            t.send_handle(raw)?;
            t.send_handle(parent_raw)?;
            let wire = t.recv_item()?;
            t.recv_status()?;
            Ok(wire)
        })?;
        Ok(self.adopt(wire))
    }

    pub fn detach_all(&self, parent: Option<&Item<'_>>) -> LinkResult<()> {
        let parent_raw = optional_raw(parent)?;
        self.call("Detach_All", |t, raw| {
            t.send_handle(raw)?;
            t.send_handle(parent_raw)?;
            t.recv_status()
        })
    }

    /// Copy to the engine clipboard.
    pub fn copy(&self) -> LinkResult<()> {
        self.link.copy(self)
    }

    /// Paste the clipboard under this item.
    pub fn paste(&self) -> LinkResult<Item<'l>> {
        self.live_raw()?;
        self.link.paste(Some(self))
    }

    pub fn save(&self, path: &str) -> LinkResult<()> {
        self.live_raw()?;
        self.link.save(path, Some(self))
    }

    /// Replace colors within `tolerance` of `from` by `to` (RGBA in `[0, 1]`).
    /// Without `from` every color is replaced.
    pub fn recolor(&self, to: [f64; 4], from: Option<[f64; 4]>, tolerance: f64) -> LinkResult<()> {
        let (from, tolerance) = match from {
            Some(from) => (from, tolerance),
            None => ([0.0; 4], 2.0),
        };
        let mut combined = Vec::with_capacity(9);
        combined.push(tolerance);
        combined.extend_from_slice(&from);
        combined.extend_from_slice(&to);
        self.call("Recolor", |t, raw| {
            t.send_handle(raw)?;
            t.send_array(&combined)?;
            t.recv_status()
        })
    }

    /// Scale the geometry per axis.
    pub fn scale(&self, factors: [f64; 3]) -> LinkResult<()> {
        self.call("Scale", |t, raw| {
            t.send_handle(raw)?;
            t.send_array(&factors)?;
            t.recv_status()
        })
    }

    /// Number of collisions between this item and `other` (0 when clear).
    pub fn collision(&self, other: &Item<'_>) -> LinkResult<i32> {
        self.link.collision(self, other)
    }

    pub fn set_as_cartesian_target(&self) -> LinkResult<()> {
        self.call_unit("S_Target_As_RT")
    }

    pub fn set_as_joint_target(&self) -> LinkResult<()> {
        self.call_unit("S_Target_As_JT")
    }

    /// Add a curve attached to this object.
    pub fn add_curve(
        &self,
        points: &Matrix,
        add_to_ref: bool,
        projection: Projection,
    ) -> LinkResult<Item<'l>> {
        self.live_raw()?;
        self.link.add_curve(points, Some(self), add_to_ref, projection)
    }

    /// Project points onto this object's surface.
    pub fn project_points(&self, points: &Matrix, projection: Projection) -> LinkResult<Matrix> {
        self.link.project_points(points, self, projection)
    }

    /// Pose relative to the parent.
    pub fn pose(&self) -> LinkResult<Matrix> {
        self.get_pose("G_Hlocal")
    }

    pub fn set_pose(&self, pose: &Matrix) -> LinkResult<()> {
        self.set_pose_after_item("S_Hlocal", pose)
    }

    /// Pose relative to the station root.
    pub fn pose_absolute(&self) -> LinkResult<Matrix> {
        self.get_pose("G_Hlocal_Abs")
    }

    pub fn set_pose_absolute(&self, pose: &Matrix) -> LinkResult<()> {
        self.set_pose_after_item("S_Hlocal_Abs", pose)
    }

    /// Tool centre point relative to the robot flange.
    pub fn pose_tool(&self) -> LinkResult<Matrix> {
        self.get_pose("G_Tool")
    }

    pub fn set_pose_tool(&self, pose: &Matrix) -> LinkResult<()> {
        self.set_pose_before_item("S_Tool", pose)
    }

    /// Make `tool` the active tool of this robot.
    pub fn set_tool_item(&self, tool: &Item<'_>) -> LinkResult<()> {
        let tool_raw = tool.live_raw()?;
        self.call("S_Tool_ptr", |t, raw| {
            t.send_handle(tool_raw)?;
            t.send_handle(raw)?;
            t.recv_status()
        })
    }

    /// Active reference frame of this robot.
    pub fn pose_frame(&self) -> LinkResult<Matrix> {
        self.get_pose("G_Frame")
    }

    pub fn set_pose_frame(&self, pose: &Matrix) -> LinkResult<()> {
        self.set_pose_before_item("S_Frame", pose)
    }

    /// Make `frame` the active reference frame of this robot.
    pub fn set_frame_item(&self, frame: &Item<'_>) -> LinkResult<()> {
        let frame_raw = frame.live_raw()?;
        self.call("S_Frame_ptr", |t, raw| {
            t.send_handle(frame_raw)?;
            t.send_handle(raw)?;
            t.recv_status()
        })
    }

    /// Geometry offset relative to the object's own frame.
    pub fn geometry_pose(&self) -> LinkResult<Matrix> {
        self.get_pose("G_Hgeom")
    }

    pub fn set_geometry_pose(&self, pose: &Matrix) -> LinkResult<()> {
        self.set_pose_after_item("S_Hgeom", pose)
    }

    /// Remove the item from the station. The proxy becomes null once the
    /// engine confirms, and later calls on it fail locally with
    /// [`LinkError::InvalidItem`].
    ///
    /// Clones and other proxies wrapping the same handle keep the stale raw
    /// handle. The engine answers their requests with status 1, which also
    /// surfaces as [`LinkError::InvalidItem`] and leaves the link usable.
    pub fn delete(&mut self) -> LinkResult<()> {
        self.call_unit("Remove")?;
        self.handle.raw = 0;
        Ok(())
    }
}

/// Raw handle of an optional item argument; a present but null item is an error.
pub(crate) fn optional_raw(item: Option<&Item<'_>>) -> LinkResult<u64> {
    item.map_or(Ok(0), |item| item.live_raw())
}

impl PartialEq for Item<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.handle.raw == other.handle.raw
    }
}

impl Eq for Item<'_> {}

impl fmt::Debug for Item<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("raw", &self.handle.raw)
            .field("kind", &self.handle.kind)
            .finish()
    }
}

impl fmt::Display for Item<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "item {} of type {:?}", self.handle.raw, self.handle.kind)
        } else {
            f.write_str("item (invalid)")
        }
    }
}
