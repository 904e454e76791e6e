//! Records exchanged between wavefront stages.
//!
//! Every record is `#[repr(C)]` + `Pod` so the same layout can live in a host
//! [`AtomicBuffer`](crate::buffers::AtomicBuffer) or a GPU storage buffer.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// A ray in flight. Consumed exactly once by a trace pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Ray {
    pub origin: [f32; 3],
    pub pixel_index: u32,
    pub direction: [f32; 3],
    pub _pad: u32,
    /// Path throughput accumulated up to this ray's origin.
    pub throughput: [f32; 3],
    pub _pad1: u32,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3, throughput: Vec3, pixel_index: u32) -> Self {
        Self {
            origin: origin.to_array(),
            pixel_index,
            direction: direction.to_array(),
            _pad: 0,
            throughput: throughput.to_array(),
            _pad1: 0,
        }
    }

    #[inline]
    pub fn origin(&self) -> Vec3 {
        Vec3::from(self.origin)
    }

    #[inline]
    pub fn direction(&self) -> Vec3 {
        Vec3::from(self.direction)
    }

    #[inline]
    pub fn throughput(&self) -> Vec3 {
        Vec3::from(self.throughput)
    }
}

/// Closest hit (or miss) of one ray.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Intersection {
    pub ray_index: u32,
    pub t: f32,
    /// Index into the backend scene table, [`Intersection::MISS`] when nothing was hit.
    pub instance_id: u32,
    /// Triangle index within the hit primitive.
    pub primitive_index: u32,
    pub barycentrics: [f32; 2],
}

impl Intersection {
    pub const MISS: u32 = u32::MAX;

    pub fn miss(ray_index: u32) -> Self {
        Self {
            ray_index,
            t: f32::INFINITY,
            instance_id: Self::MISS,
            primitive_index: 0,
            barycentrics: [0.0; 2],
        }
    }

    #[inline]
    pub fn is_hit(&self) -> bool {
        self.instance_id != Self::MISS
    }
}

/// Segment of a ray inside a participating medium.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct VolumetricIntersection {
    pub ray_index: u32,
    pub volume_id: u32,
    pub entry_t: f32,
    pub exit_t: f32,
    /// Extinction coefficient of the medium.
    pub density: f32,
}

/// Per-pixel attenuation along the current depth's ray.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct VolumetricData {
    pub transmittance: [f32; 3],
    /// Distance travelled inside media.
    pub distance: f32,
}

impl VolumetricData {
    pub const CLEAR: Self = Self {
        transmittance: [1.0; 3],
        distance: 0.0,
    };

    #[inline]
    pub fn transmittance(&self) -> Vec3 {
        Vec3::from(self.transmittance)
    }
}

impl Default for VolumetricData {
    fn default() -> Self {
        Self::CLEAR
    }
}

/// Surface state of a path vertex.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    /// No ray reached this pixel at this depth.
    Empty = 0,
    Hit = 1,
    /// The ray escaped the scene.
    Miss = 2,
}

/// Cached shading-point attributes, keyed by pixel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SurfaceData {
    pub position: [f32; 3],
    pub state: u32,
    /// Shading normal, oriented towards the incoming ray.
    pub normal: [f32; 3],
    pub material_id: u32,
    pub albedo: [f32; 3],
    /// Hit distance along the incoming ray.
    pub t: f32,
    pub emission: [f32; 3],
    pub _pad: u32,
    /// Direction towards the previous path vertex.
    pub incoming: [f32; 3],
    pub _pad1: u32,
    pub throughput: [f32; 3],
    pub _pad2: u32,
}

impl SurfaceData {
    pub const EMPTY: Self = Self {
        position: [0.0; 3],
        state: SurfaceState::Empty as u32,
        normal: [0.0; 3],
        material_id: 0,
        albedo: [0.0; 3],
        t: f32::INFINITY,
        emission: [0.0; 3],
        _pad: 0,
        incoming: [0.0; 3],
        _pad1: 0,
        throughput: [0.0; 3],
        _pad2: 0,
    };

    pub fn miss(ray: &Ray) -> Self {
        Self {
            state: SurfaceState::Miss as u32,
            incoming: (-ray.direction()).to_array(),
            throughput: ray.throughput,
            ..Self::EMPTY
        }
    }

    #[inline]
    pub fn is_hit(&self) -> bool {
        self.state == SurfaceState::Hit as u32
    }

    #[inline]
    pub fn is_miss(&self) -> bool {
        self.state == SurfaceState::Miss as u32
    }

    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::from(self.position)
    }

    #[inline]
    pub fn normal(&self) -> Vec3 {
        Vec3::from(self.normal)
    }

    #[inline]
    pub fn albedo(&self) -> Vec3 {
        Vec3::from(self.albedo)
    }

    #[inline]
    pub fn emission(&self) -> Vec3 {
        Vec3::from(self.emission)
    }

    #[inline]
    pub fn throughput(&self) -> Vec3 {
        Vec3::from(self.throughput)
    }

    /// Whether `other` is close enough in orientation and depth to share samples.
    pub fn is_similar(&self, other: &SurfaceData) -> bool {
        if !self.is_hit() || !other.is_hit() {
            return false;
        }
        let normal_ok = self.normal().dot(other.normal()) > 0.9;
        let depth_ok = (self.t - other.t).abs() <= 0.1 * self.t.max(other.t);
        normal_ok && depth_ok
    }
}

impl Default for SurfaceData {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Radiance channel a contribution is accumulated into.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightChannel {
    /// Light sampled at the primary hit.
    Direct = 0,
    /// Light sampled at deeper bounces, and background seen through bounces.
    Indirect = 1,
    /// Emitters and background seen directly by the camera.
    Emissive = 2,
}

impl LightChannel {
    pub const COUNT: usize = 3;
    pub const ALL: [LightChannel; Self::COUNT] =
        [LightChannel::Direct, LightChannel::Indirect, LightChannel::Emissive];

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Direct),
            1 => Some(Self::Indirect),
            2 => Some(Self::Emissive),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Direct => "Direct",
            Self::Indirect => "Indirect",
            Self::Emissive => "Emissive",
        }
    }
}

/// Visibility query towards a selected light sample, with its pending contribution.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShadowRay {
    pub origin: [f32; 3],
    pub max_distance: f32,
    pub direction: [f32; 3],
    pub pixel_index: u32,
    pub contribution: [f32; 3],
    /// A [`LightChannel`] discriminant.
    pub channel: u32,
    pub reservoir_index: u32,
    pub _pad: [u32; 3],
}

impl ShadowRay {
    pub fn new(
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        contribution: Vec3,
        pixel_index: u32,
        channel: LightChannel,
        reservoir_index: u32,
    ) -> Self {
        Self {
            origin: origin.to_array(),
            max_distance,
            direction: direction.to_array(),
            pixel_index,
            contribution: contribution.to_array(),
            channel: channel as u32,
            reservoir_index,
            _pad: [0; 3],
        }
    }

    #[inline]
    pub fn origin(&self) -> Vec3 {
        Vec3::from(self.origin)
    }

    #[inline]
    pub fn direction(&self) -> Vec3 {
        Vec3::from(self.direction)
    }

    #[inline]
    pub fn contribution(&self) -> Vec3 {
        Vec3::from(self.contribution)
    }
}

/// Emissive triangle in world space.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TriangleLight {
    pub p0: [f32; 3],
    pub area: f32,
    pub p1: [f32; 3],
    pub instance_id: u32,
    pub p2: [f32; 3],
    pub primitive_index: u32,
    pub normal: [f32; 3],
    pub _pad: u32,
    pub radiance: [f32; 3],
    pub _pad1: u32,
}

impl TriangleLight {
    pub fn new(p: [Vec3; 3], radiance: Vec3, instance_id: u32, primitive_index: u32) -> Self {
        let cross = (p[1] - p[0]).cross(p[2] - p[0]);
        let len = cross.length();
        let normal = if len > 0.0 { cross / len } else { Vec3::Z };
        Self {
            p0: p[0].to_array(),
            area: 0.5 * len,
            p1: p[1].to_array(),
            instance_id,
            p2: p[2].to_array(),
            primitive_index,
            normal: normal.to_array(),
            _pad: 0,
            radiance: radiance.to_array(),
            _pad1: 0,
        }
    }

    /// Point at barycentrics (b1, b2).
    #[inline]
    pub fn point(&self, b1: f32, b2: f32) -> Vec3 {
        let p0 = Vec3::from(self.p0);
        p0 + (Vec3::from(self.p1) - p0) * b1 + (Vec3::from(self.p2) - p0) * b2
    }

    #[inline]
    pub fn normal(&self) -> Vec3 {
        Vec3::from(self.normal)
    }

    #[inline]
    pub fn radiance(&self) -> Vec3 {
        Vec3::from(self.radiance)
    }
}
