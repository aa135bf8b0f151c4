use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

const MAX_RECURSION_LIMIT: u32 = 8;
const MIN_NEAR_CLIP: f32 = 0.001;
const MAX_NEAR_CLIP: f32 = 1.0;
const MIN_OUTPUT_DIMENSION: u32 = 1;
const MAX_OUTPUT_DIMENSION: u32 = 8192;
const MIN_FOV: f32 = 30.0;
const MAX_FOV: f32 = 120.0;
const MAX_RAYCAST_HOPS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "default_max_recursion")]
    pub max_recursion: u32,
    #[serde(default = "default_min_near_clip")]
    pub min_near_clip: f32,
    #[serde(default = "default_clip_plane_offset")]
    pub clip_plane_offset: f32,
    #[serde(default = "default_output_width")]
    pub output_width: u32,
    #[serde(default = "default_output_height")]
    pub output_height: u32,
    #[serde(default = "default_fov_degrees")]
    pub fov_degrees: f32,
    #[serde(default = "default_near_clip")]
    pub near_clip: f32,
    #[serde(default = "default_far_clip")]
    pub far_clip: f32,
    #[serde(default = "default_raycast_max_hops")]
    pub raycast_max_hops: u32,
    #[serde(default = "default_trigger_depth")]
    pub trigger_depth: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            max_recursion: default_max_recursion(),
            min_near_clip: default_min_near_clip(),
            clip_plane_offset: default_clip_plane_offset(),
            output_width: default_output_width(),
            output_height: default_output_height(),
            fov_degrees: default_fov_degrees(),
            near_clip: default_near_clip(),
            far_clip: default_far_clip(),
            raycast_max_hops: default_raycast_max_hops(),
            trigger_depth: default_trigger_depth(),
        }
    }
}

impl RenderSettings {
    pub fn sanitize(mut self) -> Self {
        self.max_recursion = self.max_recursion.min(MAX_RECURSION_LIMIT);
        self.min_near_clip = self.min_near_clip.clamp(MIN_NEAR_CLIP, MAX_NEAR_CLIP);
        self.clip_plane_offset = self.clip_plane_offset.clamp(0.0, 1.0);
        self.output_width = self
            .output_width
            .clamp(MIN_OUTPUT_DIMENSION, MAX_OUTPUT_DIMENSION);
        self.output_height = self
            .output_height
            .clamp(MIN_OUTPUT_DIMENSION, MAX_OUTPUT_DIMENSION);
        self.fov_degrees = self.fov_degrees.clamp(MIN_FOV, MAX_FOV);
        self.near_clip = self.near_clip.clamp(MIN_NEAR_CLIP, MAX_NEAR_CLIP);
        if self.far_clip < self.near_clip + 1.0 {
            self.far_clip = self.near_clip + 1.0;
        }
        self.raycast_max_hops = self.raycast_max_hops.min(MAX_RAYCAST_HOPS);
        self.trigger_depth = self.trigger_depth.max(0.01);
        self
    }

    /// Missing files yield the defaults.
    pub fn load(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        let parsed = toml::from_str::<Self>(&contents).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to deserialize render settings: {e}"),
            )
        })?;
        Ok(parsed.sanitize())
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let settings = self.clone().sanitize();
        let serialized = toml::to_string_pretty(&settings).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to serialize render settings: {e}"),
            )
        })?;
        fs::write(path, serialized)
    }

    pub fn aspect(&self) -> f32 {
        self.output_width as f32 / self.output_height as f32
    }
}

fn default_max_recursion() -> u32 {
    4
}

fn default_min_near_clip() -> f32 {
    0.01
}

fn default_clip_plane_offset() -> f32 {
    0.05
}

fn default_output_width() -> u32 {
    1280
}

fn default_output_height() -> u32 {
    720
}

fn default_fov_degrees() -> f32 {
    70.0
}

fn default_near_clip() -> f32 {
    0.1
}

fn default_far_clip() -> f32 {
    1000.0
}

fn default_raycast_max_hops() -> u32 {
    4
}

fn default_trigger_depth() -> f32 {
    0.5
}
