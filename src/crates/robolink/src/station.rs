//! Station-wide requests: lookup, creation, clipboard, files, simulation
//! settings and parameters.

use crate::error::{LinkError, LinkResult};
use crate::item::{optional_raw, Item, ItemHandle, ItemType};
use crate::link::Link;
use crate::math::Matrix;
use crate::program::RunMode;
use crate::transport::Transport;

/// How curve points are projected onto a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    None,
    Closest,
    AlongNormal,
    #[default]
    AlongNormalRecalc,
}

impl Projection {
    pub fn to_wire(self) -> i32 {
        match self {
            Projection::None => 0,
            Projection::Closest => 1,
            Projection::AlongNormal => 2,
            Projection::AlongNormalRecalc => 3,
        }
    }
}

pub(crate) fn recv_items(t: &mut Transport) -> LinkResult<Vec<(u64, i32)>> {
    let count = t.recv_count("item")?;
    (0..count).map(|_| t.recv_item()).collect()
}

impl Link {
    fn adopt(&self, wire: (u64, i32)) -> Item<'_> {
        self.wrap(ItemHandle::from_wire(wire))
    }

    /// Look an item up by name. Returns a null item when nothing matches.
    pub fn item(&self, name: &str, filter: Option<ItemType>) -> LinkResult<Item<'_>> {
        let wire = match filter {
            None => self.exchange("G_Item", 0, |t| {
                t.send_line(name)?;
                let wire = t.recv_item()?;
                t.recv_status()?;
                Ok(wire)
            })?,
            Some(kind) => self.exchange("G_Item2", 0, |t| {
                t.send_line(name)?;
                t.send_int(kind.to_wire())?;
                let wire = t.recv_item()?;
                t.recv_status()?;
                Ok(wire)
            })?,
        };
        Ok(self.adopt(wire))
    }

    /// Names of all items, optionally of one type, in engine order.
    pub fn item_names(&self, filter: Option<ItemType>) -> LinkResult<Vec<String>> {
        let read = |t: &mut Transport| -> LinkResult<Vec<String>> {
            let count = t.recv_count("item name")?;
            let names = (0..count)
                .map(|_| t.recv_line())
                .collect::<LinkResult<Vec<_>>>()?;
            t.recv_status()?;
            Ok(names)
        };
        match filter {
            None => self.exchange("G_List_Items", 0, read),
            Some(kind) => self.exchange("G_List_Items_Type", 0, |t| {
                t.send_int(kind.to_wire())?;
                read(t)
            }),
        }
    }

    /// All items, optionally of one type, in engine order.
    pub fn items(&self, filter: Option<ItemType>) -> LinkResult<Vec<Item<'_>>> {
        let wires = match filter {
            None => self.exchange("G_List_Items_ptr", 0, |t| {
                let items = recv_items(t)?;
                t.recv_status()?;
                Ok(items)
            })?,
            Some(kind) => self.exchange("G_List_Items_Type_ptr", 0, |t| {
                t.send_int(kind.to_wire())?;
                let items = recv_items(t)?;
                t.recv_status()?;
                Ok(items)
            })?,
        };
        Ok(wires.into_iter().map(|wire| self.adopt(wire)).collect())
    }

    /// Copy `item` to the engine clipboard.
    pub fn copy(&self, item: &Item<'_>) -> LinkResult<()> {
        let raw = item.live_raw()?;
        self.exchange("Copy", raw, |t| {
            t.send_handle(raw)?;
            t.recv_status()
        })
    }

    /// Paste the clipboard under `parent` (the station root when `None`).
    pub fn paste(&self, parent: Option<&Item<'_>>) -> LinkResult<Item<'_>> {
        let parent_raw = optional_raw(parent)?;
        let wire = self.exchange("Paste", parent_raw, |t| {
            t.send_handle(parent_raw)?;
            let wire = t.recv_item()?;
            t.recv_status()?;
            Ok(wire)
        })?;
        Ok(self.adopt(wire))
    }

    /// Load a file (station, robot, object, tool) into the station.
    pub fn add_file(&self, path: &str, parent: Option<&Item<'_>>) -> LinkResult<Item<'_>> {
        let parent_raw = optional_raw(parent)?;
        let wire = self.exchange("Add", parent_raw, |t| {
            t.send_line(path)?;
            t.send_handle(parent_raw)?;
            let wire = t.recv_item()?;
            t.recv_status()?;
            Ok(wire)
        })?;
        Ok(self.adopt(wire))
    }

    /// Save `item`, or the whole station when `None`.
    pub fn save(&self, path: &str, item: Option<&Item<'_>>) -> LinkResult<()> {
        let raw = optional_raw(item)?;
        self.exchange("Save", raw, |t| {
            t.send_line(path)?;
            t.send_handle(raw)?;
            t.recv_status()
        })
    }

    /// Close the active station without saving.
    pub fn close_station(&self) -> LinkResult<()> {
        self.exchange("Remove", 0, |t| {
            t.send_handle(0)?;
            t.recv_status()
        })
    }

    pub fn add_target(
        &self,
        name: &str,
        parent: Option<&Item<'_>>,
        robot: Option<&Item<'_>>,
    ) -> LinkResult<Item<'_>> {
        let parent_raw = optional_raw(parent)?;
        let robot_raw = optional_raw(robot)?;
        let wire = self.exchange("Add_TARGET", parent_raw, |t| {
            t.send_line(name)?;
            t.send_handle(parent_raw)?;
            t.send_handle(robot_raw)?;
            let wire = t.recv_item()?;
            t.recv_status()?;
            Ok(wire)
        })?;
        Ok(self.adopt(wire))
    }

    pub fn add_frame(&self, name: &str, parent: Option<&Item<'_>>) -> LinkResult<Item<'_>> {
        let parent_raw = optional_raw(parent)?;
        let wire = self.exchange("Add_FRAME", parent_raw, |t| {
            t.send_line(name)?;
            t.send_handle(parent_raw)?;
            let wire = t.recv_item()?;
            t.recv_status()?;
            Ok(wire)
        })?;
        Ok(self.adopt(wire))
    }

    pub fn add_program(&self, name: &str, robot: Option<&Item<'_>>) -> LinkResult<Item<'_>> {
        let robot_raw = optional_raw(robot)?;
        let wire = self.exchange("Add_PROG", robot_raw, |t| {
            t.send_line(name)?;
            t.send_handle(robot_raw)?;
            let wire = t.recv_item()?;
            t.recv_status()?;
            Ok(wire)
        })?;
        Ok(self.adopt(wire))
    }

    /// Add a curve through `points` (one point per column, 3 or 6 rows).
    pub fn add_curve(
        &self,
        points: &Matrix,
        reference: Option<&Item<'_>>,
        add_to_ref: bool,
        projection: Projection,
    ) -> LinkResult<Item<'_>> {
        check_points(points)?;
        let reference_raw = optional_raw(reference)?;
        let wire = self.exchange("AddWire", reference_raw, |t| {
            t.send_matrix(points)?;
            t.send_handle(reference_raw)?;
            t.send_int(i32::from(add_to_ref))?;
            t.send_int(projection.to_wire())?;
            let wire = t.recv_item()?;
            t.recv_status()?;
            Ok(wire)
        })?;
        Ok(self.adopt(wire))
    }

    /// Project points (one per column) onto `object`.
    pub fn project_points(
        &self,
        points: &Matrix,
        object: &Item<'_>,
        projection: Projection,
    ) -> LinkResult<Matrix> {
        check_points(points)?;
        let object_raw = object.live_raw()?;
        self.exchange("ProjectPoints", object_raw, |t| {
            t.send_matrix(points)?;
            t.send_handle(object_raw)?;
            t.send_int(projection.to_wire())?;
            let projected = t.recv_matrix()?;
            t.recv_status()?;
            Ok(projected)
        })
    }

    /// Redraw the scene. With `always` the engine keeps rendering after
    /// every command.
    pub fn render(&self, always: bool) -> LinkResult<()> {
        self.exchange("Render", 0, |t| {
            t.send_int(i32::from(!always))?;
            t.recv_status()
        })
    }

    /// Number of colliding pairs in the station.
    pub fn collisions(&self) -> LinkResult<i32> {
        self.exchange("Collisions", 0, |t| {
            let count = t.recv_int()?;
            t.recv_status()?;
            Ok(count)
        })
    }

    /// Collisions between two items (0 when clear).
    pub fn collision(&self, a: &Item<'_>, b: &Item<'_>) -> LinkResult<i32> {
        let a_raw = a.live_raw()?;
        let b_raw = b.live_raw()?;
        self.exchange("Collided", a_raw, |t| {
            t.send_handle(a_raw)?;
            t.send_handle(b_raw)?;
            let count = t.recv_int()?;
            t.recv_status()?;
            Ok(count)
        })
    }

    /// Simulation speed relative to real time.
    pub fn set_simulation_speed(&self, speed: f64) -> LinkResult<()> {
        let scaled = scaled(speed, "simulation speed")?;
        self.exchange("SimulateSpeed", 0, |t| {
            t.send_int(scaled)?;
            t.recv_status()
        })
    }

    pub fn simulation_speed(&self) -> LinkResult<f64> {
        self.exchange("GetSimulateSpeed", 0, |t| {
            let scaled = t.recv_int()?;
            t.recv_status()?;
            Ok(f64::from(scaled) / 1000.0)
        })
    }

    pub fn set_run_mode(&self, mode: RunMode) -> LinkResult<()> {
        self.exchange("S_RunMode", 0, |t| {
            t.send_int(mode.to_wire())?;
            t.recv_status()
        })
    }

    pub fn run_mode(&self) -> LinkResult<RunMode> {
        self.exchange("G_RunMode", 0, |t| {
            let mode = t.recv_int()?;
            t.recv_status()?;
            Ok(RunMode::from_wire(mode))
        })
    }

    /// All station parameters as `(name, value)` pairs in engine order.
    pub fn params(&self) -> LinkResult<Vec<(String, String)>> {
        self.exchange("G_Params", 0, |t| {
            let count = t.recv_count("parameter")?;
            let params = (0..count)
                .map(|_| -> LinkResult<(String, String)> { Ok((t.recv_line()?, t.recv_line()?)) })
                .collect::<LinkResult<Vec<_>>>()?;
            t.recv_status()?;
            Ok(params)
        })
    }

    /// One station parameter, or `None` when the engine does not know it.
    pub fn param(&self, name: &str) -> LinkResult<Option<String>> {
        self.exchange("G_Param", 0, |t| {
            t.send_line(name)?;
            let value = t.recv_line()?;
            t.recv_status()?;
            Ok((!value.starts_with("UNKNOWN ")).then_some(value))
        })
    }

    pub fn set_param(&self, name: &str, value: &str) -> LinkResult<()> {
        self.exchange("S_Param", 0, |t| {
            t.send_line(name)?;
            t.send_line(value)?;
            t.recv_status()
        })
    }

    /// Joints of several robots in one request.
    pub fn joints_of(&self, robots: &[&Item<'_>]) -> LinkResult<Vec<Vec<f64>>> {
        let raws = robots
            .iter()
            .map(|robot| robot.live_raw())
            .collect::<LinkResult<Vec<_>>>()?;
        let count = list_len(raws.len())?;
        self.exchange("G_ThetasList", 0, |t| {
            t.send_int(count)?;
            let mut joints = Vec::with_capacity(raws.len());
            for raw in &raws {
                t.send_handle(*raw)?;
                joints.push(t.recv_array()?);
            }
            t.recv_status()?;
            Ok(joints)
        })
    }

    /// Set joints of several robots in one request.
    pub fn set_joints_of(&self, robots: &[&Item<'_>], joints: &[Vec<f64>]) -> LinkResult<()> {
        if robots.len() != joints.len() {
            return Err(LinkError::invalid_argument(format!(
                "{} robots but {} joint vectors",
                robots.len(),
                joints.len()
            )));
        }
        let raws = robots
            .iter()
            .map(|robot| robot.live_raw())
            .collect::<LinkResult<Vec<_>>>()?;
        let count = list_len(raws.len())?;
        self.exchange("S_ThetasList", 0, |t| {
            t.send_int(count)?;
            for (raw, values) in raws.iter().zip(joints) {
                t.send_handle(*raw)?;
                t.send_array(values)?;
            }
            t.recv_status()
        })
    }
}

fn list_len(len: usize) -> LinkResult<i32> {
    i32::try_from(len).map_err(|_| LinkError::invalid_argument(format!("list of {len} is too long")))
}

fn check_points(points: &Matrix) -> LinkResult<()> {
    if points.rows() == 3 || points.rows() == 6 {
        Ok(())
    } else {
        Err(LinkError::invalid_argument(format!(
            "points must have 3 or 6 rows (one point per column), got {}",
            points.rows()
        )))
    }
}

/// Fixed-point argument with three decimals.
pub(crate) fn scaled(value: f64, what: &str) -> LinkResult<i32> {
    let scaled = (value * 1000.0).round();
    if scaled.is_finite() && scaled >= f64::from(i32::MIN) && scaled <= f64::from(i32::MAX) {
        Ok(scaled as i32)
    } else {
        Err(LinkError::invalid_argument(format!("{what} {value} is out of range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_arguments_keep_three_decimals() {
        assert_eq!(scaled(1.5, "speed").unwrap(), 1500);
        assert_eq!(scaled(-1.0, "step").unwrap(), -1000);
        assert!(scaled(f64::NAN, "speed").is_err());
        assert!(scaled(1e12, "speed").is_err());
    }

    #[test]
    fn curve_points_need_three_or_six_rows() {
        assert!(check_points(&Matrix::zeros(3, 10)).is_ok());
        assert!(check_points(&Matrix::zeros(6, 1)).is_ok());
        assert!(matches!(
            check_points(&Matrix::zeros(4, 4)),
            Err(LinkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn projection_codes() {
        assert_eq!(Projection::default().to_wire(), 3);
        assert_eq!(Projection::None.to_wire(), 0);
    }
}
