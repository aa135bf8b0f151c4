use glam::Vec3;
use riftgate_core::events::{EventObservers, ObserverId};
use riftgate_shared::portal::{PortalId, PortalSet};
use riftgate_shared::transform::Pose;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TeleportEvent {
    pub portal: PortalId,
    pub destination: PortalId,
    pub new_scale: f32,
}

/// Detects a traveler crossing the plane of the portal it occupies and
/// moves it to the other side.
pub struct TeleportGateway {
    pose: Pose,
    /// Offset of the crossing test point from the traveler origin, in
    /// traveler space at unit scale.
    test_offset: Vec3,
    cumulative_scale: f32,
    occupied: Option<PortalId>,
    observers: EventObservers<TeleportEvent>,
}

impl TeleportGateway {
    pub fn new(pose: Pose) -> Self {
        Self {
            pose,
            test_offset: Vec3::ZERO,
            cumulative_scale: 1.0,
            occupied: None,
            observers: EventObservers::new(),
        }
    }

    pub fn with_test_offset(mut self, offset: Vec3) -> Self {
        self.test_offset = offset;
        self
    }

    pub fn pose(&self) -> &Pose {
        &self.pose
    }

    pub fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
    }

    pub fn cumulative_scale(&self) -> f32 {
        self.cumulative_scale
    }

    pub fn occupied(&self) -> Option<PortalId> {
        self.occupied
    }

    pub fn test_point(&self) -> Vec3 {
        self.pose
            .transform_point(self.test_offset * self.cumulative_scale)
    }

    pub fn register_observer<F>(&mut self, observer: F) -> ObserverId
    where
        F: FnMut(&TeleportEvent) + 'static,
    {
        self.observers.register(observer)
    }

    pub fn unregister_observer(&mut self, id: ObserverId) -> bool {
        self.observers.unregister(id)
    }

    pub fn on_enter_portal_trigger(&mut self, portal: PortalId) {
        if let Some(current) = self.occupied {
            if current != portal {
                debug!("Entered {portal} while still inside {current}, tracking {portal}");
            }
        }
        self.occupied = Some(portal);
    }

    /// Exits from anything but the tracked portal are ignored, which covers
    /// the stale exit reported for the source right after a teleport.
    pub fn on_exit_portal_trigger(&mut self, portal: PortalId) {
        if self.occupied == Some(portal) {
            self.occupied = None;
        } else {
            trace!("Ignoring exit from untracked {portal}");
        }
    }

    /// Derives enter and exit calls from the portals' trigger boxes.
    pub fn update_occupancy(&mut self, portals: &PortalSet, trigger_depth: f32) {
        let point = self.test_point();
        if let Some(current) = self.occupied {
            let still_inside = portals
                .get(current)
                .is_some_and(|portal| portal.trigger_contains(point, trigger_depth));
            if still_inside {
                return;
            }
            self.on_exit_portal_trigger(current);
        }

        let entered = portals
            .iter()
            .find(|portal| portal.trigger_contains(point, trigger_depth))
            .map(|portal| portal.id());
        if let Some(portal) = entered {
            self.on_enter_portal_trigger(portal);
        }
    }

    /// Teleports the traveler when its test point is behind the occupied
    /// portal, then notifies observers in registration order.
    pub fn update(&mut self, portals: &PortalSet) -> Option<TeleportEvent> {
        let portal_id = self.occupied?;
        let Some(portal) = portals.get(portal_id) else {
            warn!("Occupied {portal_id} is no longer live");
            self.occupied = None;
            return None;
        };
        if portal.signed_distance(self.test_point()) >= 0.0 {
            return None;
        }
        let Some(destination) = portal.destination() else {
            trace!("{portal_id} has no destination, not teleporting");
            return None;
        };
        let ratio = portals.scale_ratio(portal_id).ok()?;

        self.pose = Pose::new(
            portals.position_through(portal_id, self.pose.position),
            portals.rotation_through(portal_id, self.pose.rotation),
        );
        self.cumulative_scale *= ratio;
        self.occupied = Some(destination);

        let event = TeleportEvent {
            portal: portal_id,
            destination,
            new_scale: self.cumulative_scale,
        };
        debug!(
            "Teleported through {portal_id} to {destination}, scale {:.3}",
            self.cumulative_scale
        );
        self.observers.notify(&event);
        Some(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeldLink {
    /// Portal the held object is seen through from the traveler's side.
    pub via: PortalId,
    /// Crossing this portal brings the traveler back to the object.
    pub back: PortalId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeldObject {
    pub object: u32,
    pub link: Option<HeldLink>,
}

/// Keeps a held object attached across one portal hop. A second hop in
/// another direction drops it.
#[derive(Debug, Default)]
pub struct GrabLink {
    held: Option<HeldObject>,
}

impl GrabLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grab(&mut self, object: u32) {
        self.held = Some(HeldObject { object, link: None });
    }

    pub fn release(&mut self) -> Option<HeldObject> {
        self.held.take()
    }

    pub fn held(&self) -> Option<&HeldObject> {
        self.held.as_ref()
    }

    pub fn on_teleport(&mut self, event: &TeleportEvent) {
        let Some(held) = self.held.as_mut() else {
            return;
        };
        let current = held.link;
        match current {
            None => {
                held.link = Some(HeldLink {
                    via: event.portal,
                    back: event.destination,
                });
            }
            Some(link) if link.back == event.portal => held.link = None,
            Some(link) => {
                warn!(
                    "Dropping object {} held through {}: second portal hop via {}",
                    held.object, link.via, event.portal
                );
                self.held = None;
            }
        }
    }
}
