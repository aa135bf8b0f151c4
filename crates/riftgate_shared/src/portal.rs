use std::fmt;

use glam::{Quat, Vec2, Vec3};
use tracing::warn;

use crate::physics::AABB;
use crate::transform::{self, Pose, TransformError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortalId(u32);

impl PortalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PortalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "portal#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PortalConfigError {
    NonPositiveHeight(f32),
    NonPositiveWidthRatio(f32),
    WidthRatioMismatch {
        source: PortalId,
        destination: PortalId,
    },
    UnknownPortal(PortalId),
}

impl fmt::Display for PortalConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveHeight(height) => {
                write!(f, "portal height must be positive, got {height}")
            }
            Self::NonPositiveWidthRatio(ratio) => {
                write!(f, "portal width ratio must be positive, got {ratio}")
            }
            Self::WidthRatioMismatch {
                source,
                destination,
            } => write!(
                f,
                "{source} and {destination} have different width ratios and cannot be linked"
            ),
            Self::UnknownPortal(id) => write!(f, "{id} is not registered"),
        }
    }
}

impl std::error::Error for PortalConfigError {}

/// Placement and size of a portal before it is registered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalDesc {
    pub pose: Pose,
    pub height: f32,
    pub width_ratio: f32,
}

impl PortalDesc {
    pub fn new(position: Vec3, rotation: Quat, height: f32, width_ratio: f32) -> Self {
        Self {
            pose: Pose::new(position, rotation),
            height,
            width_ratio,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalCorners {
    pub top_left: Vec3,
    pub top_right: Vec3,
    pub bottom_left: Vec3,
    pub bottom_right: Vec3,
}

impl PortalCorners {
    pub fn to_array(&self) -> [Vec3; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_left,
            self.bottom_right,
        ]
    }
}

/// A rectangular surface in its local XY plane. Local +Z is the front
/// normal: the side a viewer must stand on to see through it.
#[derive(Debug, Clone)]
pub struct Portal {
    id: PortalId,
    pose: Pose,
    height: f32,
    width_ratio: f32,
    destination: Option<PortalId>,
    corners: PortalCorners,
    bounds: AABB,
}

impl Portal {
    fn new(id: PortalId, desc: PortalDesc) -> Result<Self, PortalConfigError> {
        validate_size(desc.height, desc.width_ratio)?;
        let mut portal = Self {
            id,
            pose: desc.pose,
            height: desc.height,
            width_ratio: desc.width_ratio,
            destination: None,
            corners: PortalCorners {
                top_left: Vec3::ZERO,
                top_right: Vec3::ZERO,
                bottom_left: Vec3::ZERO,
                bottom_right: Vec3::ZERO,
            },
            bounds: AABB {
                min: Vec3::ZERO,
                max: Vec3::ZERO,
            },
        };
        portal.recompute_geometry();
        Ok(portal)
    }

    pub fn id(&self) -> PortalId {
        self.id
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn width_ratio(&self) -> f32 {
        self.width_ratio
    }

    pub fn width(&self) -> f32 {
        self.height * self.width_ratio
    }

    pub fn half_extents(&self) -> Vec2 {
        Vec2::new(self.width() * 0.5, self.height * 0.5)
    }

    pub fn destination(&self) -> Option<PortalId> {
        self.destination
    }

    pub fn corners(&self) -> &PortalCorners {
        &self.corners
    }

    pub fn bounds(&self) -> &AABB {
        &self.bounds
    }

    pub fn right(&self) -> Vec3 {
        self.pose.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.pose.rotation * Vec3::Y
    }

    pub fn normal(&self) -> Vec3 {
        self.pose.rotation * Vec3::Z
    }

    /// Direction pointing into the surface, away from a viewer that can see it.
    pub fn forward(&self) -> Vec3 {
        -self.normal()
    }

    /// The frame travelers leave through when this portal is a destination.
    pub fn flip_pose(&self) -> Pose {
        self.pose.mirrored()
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        (point - self.pose.position).dot(self.normal())
    }

    pub fn faces(&self, viewer: Vec3) -> bool {
        (self.pose.position - viewer).dot(self.forward()) > 0.0
    }

    /// Box of `depth` on either side of the surface, spanning the full rectangle.
    pub fn trigger_contains(&self, point: Vec3, depth: f32) -> bool {
        let local = self.pose.inverse_transform_point(point);
        let half = self.half_extents();
        local.x.abs() <= half.x && local.y.abs() <= half.y && local.z.abs() <= depth
    }

    fn reconfigure(&mut self, height: f32, width_ratio: f32) -> Result<(), PortalConfigError> {
        validate_size(height, width_ratio)?;
        self.height = height;
        self.width_ratio = width_ratio;
        self.recompute_geometry();
        Ok(())
    }

    fn recompute_geometry(&mut self) {
        let half = self.half_extents();
        let center = self.pose.position;
        let right = self.right() * half.x;
        let up = self.up() * half.y;

        self.corners = PortalCorners {
            top_left: center + up - right,
            top_right: center + up + right,
            bottom_left: center - up - right,
            bottom_right: center - up + right,
        };
        self.bounds = AABB::from_points(&self.corners.to_array());
    }
}

fn validate_size(height: f32, width_ratio: f32) -> Result<(), PortalConfigError> {
    if !(height > 0.0) {
        return Err(PortalConfigError::NonPositiveHeight(height));
    }
    if !(width_ratio > 0.0) {
        return Err(PortalConfigError::NonPositiveWidthRatio(width_ratio));
    }
    Ok(())
}

/// The live portal registry. Iteration follows activation order.
#[derive(Debug, Default, Clone)]
pub struct PortalSet {
    slots: Vec<Option<Portal>>,
    live: Vec<PortalId>,
}

impl PortalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuses the lowest slot freed by `deactivate` before growing.
    pub fn activate(&mut self, desc: PortalDesc) -> Result<PortalId, PortalConfigError> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.slots.len());
        let id = PortalId(index as u32);
        let portal = Portal::new(id, desc).inspect_err(|err| {
            warn!("Rejected portal configuration: {err}");
        })?;
        match self.slots.get_mut(index) {
            Some(slot) => *slot = Some(portal),
            None => self.slots.push(Some(portal)),
        }
        self.live.push(id);
        Ok(id)
    }

    /// Removes the portal and clears every link that pointed at it.
    pub fn deactivate(&mut self, id: PortalId) -> Option<Portal> {
        let portal = self.slots.get_mut(id.index())?.take()?;
        self.live.retain(|live| *live != id);
        for other in self.slots.iter_mut().flatten() {
            if other.destination == Some(id) {
                other.destination = None;
            }
        }
        Some(portal)
    }

    pub fn get(&self, id: PortalId) -> Option<&Portal> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn destination_of(&self, id: PortalId) -> Option<&Portal> {
        self.get(id)?.destination.and_then(|dest| self.get(dest))
    }

    pub fn ids(&self) -> &[PortalId] {
        &self.live
    }

    pub fn iter(&self) -> impl Iterator<Item = &Portal> {
        self.live.iter().filter_map(|id| self.get(*id))
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Points `source` at `destination`. A width ratio mismatch severs the
    /// link on both sides instead of keeping a half-valid pair.
    pub fn link(
        &mut self,
        source: PortalId,
        destination: Option<PortalId>,
    ) -> Result<(), PortalConfigError> {
        if self.get(source).is_none() {
            return Err(PortalConfigError::UnknownPortal(source));
        }
        if let Some(dest) = destination {
            if self.get(dest).is_none() {
                return Err(PortalConfigError::UnknownPortal(dest));
            }
        }

        if let Some(portal) = self.portal_mut(source) {
            portal.destination = destination;
        }
        match destination {
            Some(dest) if !self.link_is_valid(source, dest) => {
                self.sever(source, dest);
                Err(PortalConfigError::WidthRatioMismatch {
                    source,
                    destination: dest,
                })
            }
            _ => Ok(()),
        }
    }

    /// Resizes a portal in place, then drops any link the new size invalidates.
    pub fn resize(
        &mut self,
        id: PortalId,
        height: f32,
        width_ratio: f32,
    ) -> Result<(), PortalConfigError> {
        let portal = self
            .portal_mut(id)
            .ok_or(PortalConfigError::UnknownPortal(id))?;
        portal.reconfigure(height, width_ratio).inspect_err(|err| {
            warn!("Rejected resize of {id}: {err}");
        })?;
        self.validate_links();
        Ok(())
    }

    /// Returns how many invalid links were found. A mutual pair counts once.
    pub fn validate_links(&mut self) -> usize {
        let mut broken: Vec<(PortalId, PortalId)> = Vec::new();
        for portal in self.iter() {
            let Some(dest) = portal.destination else {
                continue;
            };
            if self.link_is_valid(portal.id, dest) || broken.contains(&(dest, portal.id)) {
                continue;
            }
            broken.push((portal.id, dest));
        }

        for (source, dest) in &broken {
            self.sever(*source, *dest);
        }
        broken.len()
    }

    pub fn scale_ratio(&self, id: PortalId) -> Result<f32, TransformError> {
        let portal = self.get(id).ok_or(TransformError::MissingDestination)?;
        let destination = self
            .destination_of(id)
            .ok_or(TransformError::MissingDestination)?;
        Ok(transform::scale_ratio(portal.height, destination.height))
    }

    pub fn position_through(&self, id: PortalId, point: Vec3) -> Vec3 {
        match self.endpoints(id) {
            Some((source, dest)) => transform::position_through(
                &source.pose,
                &dest.pose,
                transform::scale_ratio(source.height, dest.height),
                point,
            ),
            None => point,
        }
    }

    pub fn direction_through(&self, id: PortalId, direction: Vec3) -> Vec3 {
        match self.endpoints(id) {
            Some((source, dest)) => {
                transform::direction_through(&source.pose, &dest.pose, direction)
            }
            None => direction,
        }
    }

    pub fn rotation_through(&self, id: PortalId, rotation: Quat) -> Quat {
        match self.endpoints(id) {
            Some((source, dest)) => {
                transform::rotation_through(&source.pose, &dest.pose, rotation)
            }
            None => rotation,
        }
    }

    fn endpoints(&self, id: PortalId) -> Option<(&Portal, &Portal)> {
        let source = self.get(id);
        let dest = self.destination_of(id);
        match (source, dest) {
            (Some(source), Some(dest)) => Some((source, dest)),
            _ => {
                warn!("{id} has no destination, passing value through unchanged");
                None
            }
        }
    }

    fn link_is_valid(&self, source: PortalId, dest: PortalId) -> bool {
        match (self.get(source), self.get(dest)) {
            (Some(a), Some(b)) => a.width_ratio == b.width_ratio,
            _ => false,
        }
    }

    fn sever(&mut self, source: PortalId, dest: PortalId) {
        warn!("Severing link between {source} and {dest}: width ratios differ");
        if let Some(portal) = self.portal_mut(source) {
            portal.destination = None;
        }
        if let Some(portal) = self.portal_mut(dest) {
            if portal.destination == Some(source) {
                portal.destination = None;
            }
        }
    }

    fn portal_mut(&mut self, id: PortalId) -> Option<&mut Portal> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }
}
