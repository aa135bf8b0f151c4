use glam::{Quat, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightId(u32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    pub base_rotation: Quat,
    pub intensity: f32,
}

/// Live directional lights plus the rotation offset applied to all of
/// them while a view through one or more portals is being drawn.
#[derive(Debug, Clone)]
pub struct LightSet {
    next_id: u32,
    lights: Vec<(LightId, DirectionalLight)>,
    offset: Quat,
}

impl Default for LightSet {
    fn default() -> Self {
        Self {
            next_id: 0,
            lights: Vec::new(),
            offset: Quat::IDENTITY,
        }
    }
}

impl LightSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, light: DirectionalLight) -> LightId {
        let id = LightId(self.next_id);
        self.next_id += 1;
        self.lights.push((id, light));
        id
    }

    pub fn unregister(&mut self, id: LightId) -> bool {
        let before = self.lights.len();
        self.lights.retain(|(light_id, _)| *light_id != id);
        self.lights.len() != before
    }

    pub fn offset(&self) -> Quat {
        self.offset
    }

    pub fn set_offset(&mut self, offset: Quat) {
        self.offset = offset.normalize();
    }

    pub fn reset_offset(&mut self) {
        self.offset = Quat::IDENTITY;
    }

    /// Direction the light travels in, for every live light.
    pub fn directions(&self) -> impl Iterator<Item = (LightId, Vec3, f32)> + '_ {
        self.lights.iter().map(|(id, light)| {
            let rotation = self.offset * light.base_rotation;
            (*id, rotation * Vec3::NEG_Z, light.intensity)
        })
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use glam::{Quat, Vec3};

    use super::{DirectionalLight, LightSet};

    #[test]
    fn offset_rotates_every_light() {
        let mut lights = LightSet::new();
        let sun = lights.register(DirectionalLight {
            base_rotation: Quat::IDENTITY,
            intensity: 1.0,
        });

        lights.set_offset(Quat::from_rotation_y(PI));
        let (_, direction, _) = lights.directions().next().unwrap();
        assert!((direction - Vec3::Z).length() < 1.0e-5);
        assert_eq!(lights.directions().map(|(id, _, _)| id).collect::<Vec<_>>(), vec![sun]);

        lights.reset_offset();
        assert_eq!(lights.offset(), Quat::IDENTITY);
    }

    #[test]
    fn unregister_removes_light() {
        let mut lights = LightSet::new();
        let id = lights.register(DirectionalLight {
            base_rotation: Quat::IDENTITY,
            intensity: 0.5,
        });
        assert!(lights.unregister(id));
        assert!(!lights.unregister(id));
        assert_eq!(lights.directions().count(), 0);
        assert!(lights.is_empty());
    }
}
