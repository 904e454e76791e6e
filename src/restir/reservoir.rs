//! Weighted reservoir over light samples.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::wavefront::data::{SurfaceData, TriangleLight};

/// A point on an emissive triangle.
///
/// Position, normal and radiance are stored by value so a sample stays
/// meaningful after the light list it was drawn from has been rebuilt.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct LightSample {
    pub position: [f32; 3],
    pub light_index: u32,
    pub normal: [f32; 3],
    pub _pad: u32,
    pub radiance: [f32; 3],
    pub _pad1: u32,
}

impl LightSample {
    pub fn on_light(light: &TriangleLight, light_index: u32, b1: f32, b2: f32) -> Self {
        Self {
            position: light.point(b1, b2).to_array(),
            light_index,
            normal: light.normal,
            _pad: 0,
            radiance: light.radiance,
            _pad1: 0,
        }
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
    pub fn radiance(&self) -> Vec3 {
        Vec3::from(self.radiance)
    }
}

/// Geometry between a shading point and a light sample.
#[derive(Clone, Copy, Debug)]
pub struct SampleGeometry {
    /// Unit direction from the shading point towards the sample.
    pub direction: Vec3,
    pub distance: f32,
    pub distance_sq: f32,
    /// Cosine at the shading point.
    pub cos_surface: f32,
    /// Cosine at the emitter, zero when it faces away.
    pub cos_light: f32,
}

impl SampleGeometry {
    pub fn new(surface: &SurfaceData, sample: &LightSample) -> Option<Self> {
        let to_light = sample.position() - surface.position();
        let distance_sq = to_light.length_squared();
        if distance_sq < 1e-8 {
            return None;
        }
        let distance = distance_sq.sqrt();
        let direction = to_light / distance;
        Some(Self {
            direction,
            distance,
            distance_sq,
            cos_surface: surface.normal().dot(direction).max(0.0),
            cos_light: (-sample.normal().dot(direction)).max(0.0),
        })
    }
}

/// Unshadowed target density of `sample` at `surface`, in solid angle.
///
/// Luminance of the Lambertian reflected radiance; visibility is left to the
/// shadow ray.
pub fn target_pdf(surface: &SurfaceData, sample: &LightSample) -> f32 {
    if !surface.is_hit() {
        return 0.0;
    }
    match SampleGeometry::new(surface, sample) {
        Some(g) if g.cos_light > 0.0 => {
            let reflected = surface.albedo() * std::f32::consts::FRAC_1_PI * sample.radiance();
            crate::util::luminance(reflected) * g.cos_surface
        }
        _ => 0.0,
    }
}

/// Solid-angle Jacobian moving a sample chosen at `source` to `receiver`.
pub fn reuse_jacobian(receiver: &SurfaceData, source: &SurfaceData, sample: &LightSample) -> f32 {
    let (Some(r), Some(q)) = (
        SampleGeometry::new(receiver, sample),
        SampleGeometry::new(source, sample),
    ) else {
        return 0.0;
    };
    let denom = q.cos_light * r.distance_sq;
    if denom <= 0.0 {
        return 0.0;
    }
    (r.cos_light * q.distance_sq) / denom
}

/// Streaming weighted reservoir.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Reservoir {
    pub sample: LightSample,
    /// Sum of candidate weights (w_sum).
    pub w_sum: f32,
    /// Number of candidates seen (M).
    pub m: u32,
    /// Unbiased contribution weight of the selected sample (W).
    pub weight: f32,
    /// Target density of the selected sample at this reservoir's shading point.
    pub target_pdf: f32,
}

impl Default for Reservoir {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl Reservoir {
    /// Stream one candidate with resampling weight `weight`.
    ///
    /// `count` is the number of candidates the entry stands for (1 for a fresh
    /// candidate, `M` of a merged reservoir). Returns true if it was selected.
    #[inline]
    pub fn update(&mut self, sample: LightSample, weight: f32, target_pdf: f32, count: u32, random: f32) -> bool {
        self.m += count;
        if !(weight > 0.0) || !weight.is_finite() {
            return false;
        }
        self.w_sum += weight;
        if random * self.w_sum < weight {
            self.sample = sample;
            self.target_pdf = target_pdf;
            true
        } else {
            false
        }
    }

    /// `W = w_sum / (M * p_hat)`.
    #[inline]
    pub fn finalize(&mut self) {
        self.finalize_with(self.m as f32);
    }

    /// `W = w_sum / (Z * p_hat)` with an explicit normalization `Z`.
    #[inline]
    pub fn finalize_with(&mut self, z: f32) {
        self.weight = if self.w_sum > 0.0 && self.target_pdf > 0.0 && z > 0.0 {
            self.w_sum / (z * self.target_pdf)
        } else {
            0.0
        };
    }

    /// Drop the selected sample but keep the history length.
    #[inline]
    pub fn invalidate(&mut self) {
        self.w_sum = 0.0;
        self.weight = 0.0;
        self.target_pdf = 0.0;
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.m > 0 && self.weight > 0.0 && self.target_pdf > 0.0
    }

    /// Clamp the history length, scaling the weight sum along with it.
    #[inline]
    pub fn clamp_history(&mut self, max_m: u32) {
        if self.m > max_m {
            self.w_sum *= max_m as f32 / self.m as f32;
            self.m = max_m;
        }
    }
}

/// A reservoir together with the shading point it was built for.
#[derive(Clone, Copy)]
pub struct ReuseCandidate<'a> {
    pub reservoir: &'a Reservoir,
    pub surface: &'a SurfaceData,
}

/// Merge `candidates` into a new reservoir for `receiver`.
///
/// Each candidate's sample is weighted by `p_hat_receiver(y) * W * J * M` and the
/// result is normalized by the summed `M` of candidates whose own surface gives
/// the selected sample a non-zero density. The receiver's own reservoir should
/// be among the candidates.
pub fn combine_reservoirs(
    receiver: &SurfaceData,
    candidates: &[ReuseCandidate<'_>],
    mut random: impl FnMut() -> f32,
) -> Reservoir {
    let mut out = Reservoir::default();
    for c in candidates {
        let r = c.reservoir;
        if !r.is_valid() {
            out.m += r.m;
            continue;
        }
        let p_hat = target_pdf(receiver, &r.sample);
        let jacobian = if std::ptr::eq(c.surface, receiver) {
            1.0
        } else {
            reuse_jacobian(receiver, c.surface, &r.sample)
        };
        let weight = p_hat * r.weight * jacobian * r.m as f32;
        out.update(r.sample, weight, p_hat, r.m, random());
    }

    if out.w_sum > 0.0 {
        let z: u32 = candidates
            .iter()
            .filter(|c| target_pdf(c.surface, &out.sample) > 0.0)
            .map(|c| c.reservoir.m)
            .sum();
        out.finalize_with(z as f32);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavefront::data::SurfaceState;

    fn surface(position: Vec3, normal: Vec3) -> SurfaceData {
        SurfaceData {
            position: position.to_array(),
            state: SurfaceState::Hit as u32,
            normal: normal.to_array(),
            albedo: [0.8; 3],
            t: 1.0,
            ..SurfaceData::EMPTY
        }
    }

    fn sample_above(height: f32) -> LightSample {
        LightSample {
            position: [0.0, height, 0.0],
            normal: [0.0, -1.0, 0.0],
            radiance: [10.0; 3],
            ..LightSample::zeroed()
        }
    }

    #[test]
    fn test_update_tracks_weight_and_count() {
        let mut r = Reservoir::default();
        assert!(r.update(sample_above(1.0), 2.0, 1.0, 1, 0.5));
        assert!(!r.update(sample_above(2.0), 0.0, 1.0, 1, 0.0));
        assert_eq!(r.m, 2);
        assert_eq!(r.w_sum, 2.0);
        r.finalize();
        assert!((r.weight - 1.0).abs() < 1e-6);
        assert!(r.is_valid());
    }

    #[test]
    fn test_selection_probability_proportional() {
        // Stream two candidates with weights 1 and 3 many times.
        let mut rng = crate::util::Rng::new(1, 2, 3);
        let mut second = 0;
        let trials = 20_000;
        for _ in 0..trials {
            let mut r = Reservoir::default();
            r.update(sample_above(1.0), 1.0, 1.0, 1, rng.next_f32());
            if r.update(sample_above(2.0), 3.0, 1.0, 1, rng.next_f32()) {
                second += 1;
            }
        }
        let ratio = second as f32 / trials as f32;
        assert!((ratio - 0.75).abs() < 0.02, "ratio {ratio}");
    }

    #[test]
    fn test_target_pdf_zero_behind_light() {
        let s = surface(Vec3::ZERO, Vec3::Y);
        assert!(target_pdf(&s, &sample_above(1.0)) > 0.0);
        let mut flipped = sample_above(1.0);
        flipped.normal = [0.0, 1.0, 0.0];
        assert_eq!(target_pdf(&s, &flipped), 0.0);
        assert_eq!(target_pdf(&SurfaceData::EMPTY, &sample_above(1.0)), 0.0);
    }

    #[test]
    fn test_jacobian_identity_for_same_point() {
        let s = surface(Vec3::ZERO, Vec3::Y);
        let j = reuse_jacobian(&s, &s, &sample_above(2.0));
        assert!((j - 1.0).abs() < 1e-6);

        let far = surface(Vec3::new(0.0, -2.0, 0.0), Vec3::Y);
        // Receiver twice as far away sees a quarter of the solid angle.
        let j = reuse_jacobian(&far, &s, &sample_above(2.0));
        assert!((j - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_combine_keeps_history_and_weight() {
        let s = surface(Vec3::ZERO, Vec3::Y);
        let mut a = Reservoir::default();
        a.update(sample_above(1.0), target_pdf(&s, &sample_above(1.0)), target_pdf(&s, &sample_above(1.0)), 4, 0.1);
        a.finalize();
        let b = a;
        let merged = combine_reservoirs(
            &s,
            &[
                ReuseCandidate { reservoir: &a, surface: &s },
                ReuseCandidate { reservoir: &b, surface: &s },
            ],
            || 0.5,
        );
        assert_eq!(merged.m, 8);
        assert!(merged.is_valid());
        // Identical reservoirs at the same point keep the same contribution weight.
        assert!((merged.weight - a.weight).abs() / a.weight < 1e-4);
    }

    #[test]
    fn test_combine_with_invalid_neighbors() {
        let s = surface(Vec3::ZERO, Vec3::Y);
        let empty = Reservoir { m: 3, ..Reservoir::default() };
        let merged = combine_reservoirs(&s, &[ReuseCandidate { reservoir: &empty, surface: &s }], || 0.5);
        assert_eq!(merged.m, 3);
        assert!(!merged.is_valid());
    }
}
