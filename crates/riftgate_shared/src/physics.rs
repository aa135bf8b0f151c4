use glam::{Vec2, Vec3};

use crate::portal::{Portal, PortalId};

const RAY_EPSILON: f32 = 1.0e-4;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AABB {
    pub min: Vec3,
    pub max: Vec3,
}

impl AABB {
    pub fn from_points(points: &[Vec3]) -> Self {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for point in points {
            min = min.min(*point);
            max = max.max(*point);
        }
        Self { min, max }
    }

    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn intersects(&self, other: &AABB) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Slab test. Returns the entry distance and the face normal hit, or
    /// `None` when the ray starts inside or misses.
    pub fn ray_intersection(&self, ray: &Ray, max_distance: f32) -> Option<(f32, Vec3)> {
        let mut t_enter = f32::NEG_INFINITY;
        let mut t_exit = f32::INFINITY;
        let mut normal = Vec3::ZERO;

        for axis in 0..3 {
            let origin = ray.origin[axis];
            let direction = ray.direction[axis];
            if direction.abs() < f32::EPSILON {
                if origin < self.min[axis] || origin > self.max[axis] {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / direction;
            let mut t0 = (self.min[axis] - origin) * inv;
            let mut t1 = (self.max[axis] - origin) * inv;
            let mut axis_normal = Vec3::ZERO;
            axis_normal[axis] = -direction.signum();
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            if t0 > t_enter {
                t_enter = t0;
                normal = axis_normal;
            }
            t_exit = t_exit.min(t1);
            if t_enter > t_exit {
                return None;
            }
        }

        if t_enter <= RAY_EPSILON || t_enter > max_distance {
            return None;
        }
        Some((t_enter, normal))
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HitTarget {
    Solid(u32),
    /// The pass-through surface of a portal.
    PortalReceiver(PortalId),
}

#[derive(Debug, Copy, Clone)]
pub struct RayHit {
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
    pub target: HitTarget,
}

/// Anything a linear trace can be run against.
pub trait RayCastScene {
    fn cast_ray(&self, ray: &Ray, max_distance: f32) -> Option<RayHit>;
}

#[derive(Debug, Clone, Copy)]
struct PortalReceiver {
    portal: PortalId,
    center: Vec3,
    normal: Vec3,
    right: Vec3,
    up: Vec3,
    half_extents: Vec2,
}

impl PortalReceiver {
    /// Receivers only catch rays arriving at the front face.
    fn ray_intersection(&self, ray: &Ray, max_distance: f32) -> Option<f32> {
        let denom = ray.direction.dot(self.normal);
        if denom >= -f32::EPSILON {
            return None;
        }

        let t = (self.center - ray.origin).dot(self.normal) / denom;
        if t <= RAY_EPSILON || t > max_distance {
            return None;
        }

        let local = ray.at(t) - self.center;
        if local.dot(self.right).abs() > self.half_extents.x
            || local.dot(self.up).abs() > self.half_extents.y
        {
            return None;
        }
        Some(t)
    }
}

/// Flat list of box solids and portal receivers, tested brute force.
#[derive(Debug, Default, Clone)]
pub struct ColliderScene {
    solids: Vec<(u32, AABB)>,
    receivers: Vec<PortalReceiver>,
}

impl ColliderScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_solid(&mut self, id: u32, bounds: AABB) {
        self.solids.push((id, bounds));
    }

    pub fn add_portal_receiver(&mut self, portal: &Portal) {
        self.receivers.push(PortalReceiver {
            portal: portal.id(),
            center: portal.pose().position,
            normal: portal.normal(),
            right: portal.right(),
            up: portal.up(),
            half_extents: portal.half_extents(),
        });
    }

    pub fn remove_portal_receiver(&mut self, portal: PortalId) {
        self.receivers.retain(|receiver| receiver.portal != portal);
    }
}

impl RayCastScene for ColliderScene {
    fn cast_ray(&self, ray: &Ray, max_distance: f32) -> Option<RayHit> {
        let mut closest: Option<RayHit> = None;
        let mut limit = max_distance;

        for (id, bounds) in &self.solids {
            if let Some((distance, normal)) = bounds.ray_intersection(ray, limit) {
                limit = distance;
                closest = Some(RayHit {
                    point: ray.at(distance),
                    normal,
                    distance,
                    target: HitTarget::Solid(*id),
                });
            }
        }

        for receiver in &self.receivers {
            if let Some(distance) = receiver.ray_intersection(ray, limit) {
                limit = distance;
                closest = Some(RayHit {
                    point: ray.at(distance),
                    normal: receiver.normal,
                    distance,
                    target: HitTarget::PortalReceiver(receiver.portal),
                });
            }
        }

        closest
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::{ColliderScene, HitTarget, Ray, RayCastScene, AABB};

    #[test]
    fn aabb_collision_detection() {
        let a = AABB {
            min: Vec3::new(0.0, 0.0, 0.0),
            max: Vec3::new(1.0, 1.0, 1.0),
        };
        let b = AABB {
            min: Vec3::new(0.5, 0.25, 0.5),
            max: Vec3::new(1.5, 1.25, 1.5),
        };
        let c = AABB {
            min: Vec3::new(1.0, 1.0, 1.0),
            max: Vec3::new(2.0, 2.0, 2.0),
        };

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn from_points_encapsulates_every_point() {
        let bounds = AABB::from_points(&[
            Vec3::new(1.0, -2.0, 0.0),
            Vec3::new(-1.0, 2.0, 0.5),
            Vec3::new(0.0, 0.0, -0.5),
        ]);
        assert_eq!(bounds.min, Vec3::new(-1.0, -2.0, -0.5));
        assert_eq!(bounds.max, Vec3::new(1.0, 2.0, 0.5));
        assert!(bounds.contains_point(Vec3::ZERO));
    }

    #[test]
    fn ray_hits_nearest_box_face() {
        let mut scene = ColliderScene::new();
        scene.add_solid(
            1,
            AABB::from_center_half_extents(Vec3::new(0.0, 0.0, -5.0), Vec3::ONE),
        );
        scene.add_solid(
            2,
            AABB::from_center_half_extents(Vec3::new(0.0, 0.0, -10.0), Vec3::ONE),
        );

        let ray = Ray {
            origin: Vec3::ZERO,
            direction: Vec3::NEG_Z,
        };
        let hit = scene.cast_ray(&ray, 100.0).expect("ray should hit the first box");
        assert_eq!(hit.target, HitTarget::Solid(1));
        assert!((hit.distance - 4.0).abs() < 1.0e-4);
        assert_eq!(hit.normal, Vec3::Z);

        assert!(scene.cast_ray(&ray, 3.0).is_none());
    }
}
