use glam::Vec3;
use tracing::trace;

use crate::physics::{HitTarget, Ray, RayCastScene, RayHit};
use crate::portal::{PortalId, PortalSet};

/// Line trace that continues through portal receivers.
///
/// Every receiver hit consumes one hop and the distance travelled so far;
/// the trace resumes from the mapped hit point in the destination's frame.
/// The returned hit is never a portal receiver. When the trace fails the
/// trail is cleared so a partial chain is not mistaken for a result.
pub fn raycast<S: RayCastScene>(
    scene: &S,
    portals: &PortalSet,
    origin: Vec3,
    direction: Vec3,
    max_distance: f32,
    max_hops: u32,
    mut trail: Option<&mut Vec<PortalId>>,
) -> Option<RayHit> {
    if let Some(trail) = trail.as_deref_mut() {
        trail.clear();
    }

    let hit = trace_hops(
        scene,
        portals,
        origin,
        direction,
        max_distance,
        max_hops,
        &mut trail,
    );
    if hit.is_none() {
        if let Some(trail) = trail {
            trail.clear();
        }
    }
    hit
}

fn trace_hops<S: RayCastScene>(
    scene: &S,
    portals: &PortalSet,
    origin: Vec3,
    direction: Vec3,
    max_distance: f32,
    hops_left: u32,
    trail: &mut Option<&mut Vec<PortalId>>,
) -> Option<RayHit> {
    let direction = direction.normalize_or_zero();
    if direction == Vec3::ZERO || max_distance <= 0.0 {
        return None;
    }

    let ray = Ray { origin, direction };
    let hit = scene.cast_ray(&ray, max_distance)?;
    let portal = match hit.target {
        HitTarget::Solid(_) => return Some(hit),
        HitTarget::PortalReceiver(portal) => portal,
    };

    if hops_left == 0 {
        trace!("Raycast reached {portal} with no hops left");
        return None;
    }
    if portals.destination_of(portal).is_none() {
        trace!("Raycast stopped at unlinked {portal}");
        return None;
    }

    let next_origin = portals.position_through(portal, hit.point);
    let next_direction = portals.direction_through(portal, direction);
    if let Some(trail) = trail.as_deref_mut() {
        trail.push(portal);
    }

    trace_hops(
        scene,
        portals,
        next_origin,
        next_direction,
        max_distance - hit.distance,
        hops_left - 1,
        trail,
    )
}
