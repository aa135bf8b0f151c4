pub mod frustum;
pub mod physics;
pub mod portal;
pub mod portal_raycast;
pub mod transform;
