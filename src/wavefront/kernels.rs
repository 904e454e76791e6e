//! Compute kernels of the wavefront pipeline.
//!
//! Each kernel is a rayon parallel pass over one stage's input. Stages hand
//! data to each other only through [`AtomicBuffer`] appends and per-pixel
//! slices, and every kernel returns only after the whole pass has finished.

use std::f32::consts::FRAC_1_PI;

use glam::{UVec2, Vec2, Vec3};
use rayon::prelude::*;

use crate::buffers::AtomicBuffer;
use crate::restir::reservoir::SampleGeometry;
use crate::restir::{Reservoir, RAY_EPSILON};
use crate::scene::{Camera, Scene};
use crate::util::{cosine_sample_hemisphere, Rng};
use crate::wavefront::data::{
    Intersection, LightChannel, Ray, ShadowRay, SurfaceData, SurfaceState, VolumetricData, VolumetricIntersection,
};

const STREAM_PRIMARY: u32 = 11;
const STREAM_BOUNCE: u32 = 12;

/// One camera ray per pixel, jittered inside the pixel when `jitter` is set.
pub fn generate_primary_rays(rays: &mut AtomicBuffer<Ray>, camera: &Camera, resolution: UVec2, seed: u32, jitter: bool) {
    let size = resolution.as_vec2();
    let inverse = camera.view_projection(size.x / size.y).inverse();
    let width = resolution.x as usize;
    rays.fill_par(resolution.x as usize * resolution.y as usize, |i| {
        let offset = if jitter {
            let mut rng = Rng::new(seed, i as u32, STREAM_PRIMARY);
            Vec2::new(rng.next_f32(), rng.next_f32())
        } else {
            Vec2::splat(0.5)
        };
        let pixel = Vec2::new((i % width) as f32, (i / width) as f32) + offset;
        let (origin, direction) = camera.primary_ray_with(&inverse, pixel, size);
        Ray::new(origin, direction, Vec3::ONE, i as u32)
    });
}

/// Turn this depth's intersections into per-pixel surfaces.
///
/// `out` is expected to be cleared; pixels without a ray stay `Empty`.
pub fn extract_surfaces(scene: &Scene, rays: &[Ray], hits: &[Intersection], out: &mut [SurfaceData]) {
    let surfaces: Vec<(usize, SurfaceData)> = hits
        .par_iter()
        .filter_map(|hit| {
            let ray = rays.get(hit.ray_index as usize)?;
            let pixel = ray.pixel_index as usize;
            let attributes = hit
                .is_hit()
                .then(|| scene.hit_attributes(hit.instance_id, hit.primitive_index, hit.barycentrics))
                .flatten();
            let Some(attr) = attributes else {
                return Some((pixel, SurfaceData::miss(ray)));
            };

            let direction = ray.direction();
            let normal = if attr.normal.dot(direction) > 0.0 {
                -attr.normal
            } else {
                attr.normal
            };
            Some((
                pixel,
                SurfaceData {
                    position: attr.position.to_array(),
                    state: SurfaceState::Hit as u32,
                    normal: normal.to_array(),
                    material_id: attr.material_id,
                    albedo: attr.albedo.to_array(),
                    t: hit.t,
                    emission: attr.emission.to_array(),
                    incoming: (-direction).to_array(),
                    throughput: ray.throughput,
                    ..SurfaceData::EMPTY
                },
            ))
        })
        .collect();

    for (pixel, surface) in surfaces {
        if let Some(slot) = out.get_mut(pixel) {
            *slot = surface;
        }
    }
}

/// Per-pixel transmittance through the media each ray crossed before its hit.
pub fn extract_volumetric(
    rays: &[Ray],
    hits: &[Intersection],
    segments: &[VolumetricIntersection],
    out: &mut [VolumetricData],
) {
    out.par_iter_mut().for_each(|v| *v = VolumetricData::CLEAR);
    if segments.is_empty() {
        return;
    }

    let mut hit_t = vec![f32::INFINITY; rays.len()];
    for hit in hits {
        if let Some(t) = hit_t.get_mut(hit.ray_index as usize) {
            *t = hit.t;
        }
    }

    for seg in segments {
        let Some(ray) = rays.get(seg.ray_index as usize) else {
            continue;
        };
        let exit = seg.exit_t.min(hit_t[seg.ray_index as usize]);
        let length = exit - seg.entry_t;
        if length <= 0.0 {
            continue;
        }
        if let Some(v) = out.get_mut(ray.pixel_index as usize) {
            let attenuation = (-seg.density * length).exp();
            v.transmittance = (v.transmittance() * attenuation).to_array();
            v.distance += length;
        }
    }
}

/// Inputs of [`shade`].
pub struct ShadeInputs<'a> {
    pub depth: u32,
    pub max_depth: u32,
    pub surfaces: &'a [SurfaceData],
    pub volumetric: &'a [VolumetricData],
    /// `reservoirs_per_pixel` consecutive reservoirs per pixel.
    pub reservoirs: &'a [Reservoir],
    pub reservoirs_per_pixel: usize,
    pub background: Vec3,
    pub seed: u32,
}

/// Shade every surface of one depth.
///
/// Emits one shadow ray per valid reservoir, appends bounce rays for the next
/// depth (only surviving paths, so the next batch is compact) and adds
/// unoccluded radiance (emission, background) to `channels`.
pub fn shade(
    inputs: &ShadeInputs<'_>,
    shadow_rays: &AtomicBuffer<ShadowRay>,
    next_rays: &AtomicBuffer<Ray>,
    channels: &mut [Vec<Vec3>; LightChannel::COUNT],
) {
    let rpp = inputs.reservoirs_per_pixel;
    let primary = inputs.depth == 0;
    let light_channel = if primary {
        LightChannel::Direct
    } else {
        LightChannel::Indirect
    };
    let seen_channel = if primary {
        LightChannel::Emissive
    } else {
        LightChannel::Indirect
    };
    let bounce = inputs.depth + 1 < inputs.max_depth;
    let seed = inputs.seed ^ crate::util::wang_hash(inputs.depth.wrapping_add(0x9e37));

    // Direct light only arrives through shadow rays.
    let [_, indirect, emissive] = channels;
    indirect
        .par_iter_mut()
        .zip(emissive.par_iter_mut())
        .enumerate()
        .for_each(|(pixel, (indirect, emissive))| {
            let surface = &inputs.surfaces[pixel];
            let transmittance = inputs.volumetric[pixel].transmittance();
            let throughput = surface.throughput() * transmittance;
            let seen = match seen_channel {
                LightChannel::Emissive => &mut *emissive,
                _ => &mut *indirect,
            };

            if surface.is_miss() {
                *seen += throughput * inputs.background;
                return;
            }
            if !surface.is_hit() {
                return;
            }
            if primary {
                *seen += throughput * surface.emission();
            }

            let position = surface.position();
            let normal = surface.normal();
            let origin = position + normal * RAY_EPSILON;
            let brdf = surface.albedo() * FRAC_1_PI;

            for r in 0..rpp {
                let index = pixel * rpp + r;
                let Some(reservoir) = inputs.reservoirs.get(index) else {
                    break;
                };
                if !reservoir.is_valid() {
                    continue;
                }
                let Some(g) = SampleGeometry::new(surface, &reservoir.sample) else {
                    continue;
                };
                let contribution =
                    throughput * brdf * reservoir.sample.radiance() * (g.cos_surface * reservoir.weight / rpp as f32);
                if contribution.max_element() <= 0.0 {
                    continue;
                }
                shadow_rays.append(ShadowRay::new(
                    origin,
                    g.direction,
                    g.distance * (1.0 - RAY_EPSILON),
                    contribution,
                    pixel as u32,
                    light_channel,
                    index as u32,
                ));
            }

            if bounce {
                let mut rng = Rng::new(seed, pixel as u32, STREAM_BOUNCE);
                let direction = cosine_sample_hemisphere(normal, rng.next_f32(), rng.next_f32());
                // Cosine sampling cancels the cosine and the 1/pi of the BRDF.
                let next = throughput * surface.albedo();
                if next.max_element() > 0.0 {
                    next_rays.append(Ray::new(origin, direction, next, pixel as u32));
                }
            }
        });
}

/// Add the contribution of every unoccluded shadow ray to its pixel and channel.
pub fn accumulate_shadow_rays(rays: &[ShadowRay], visible: &[u32], channels: &mut [Vec<Vec3>; LightChannel::COUNT]) {
    for &index in visible {
        let Some(ray) = rays.get(index as usize) else {
            continue;
        };
        let Some(channel) = LightChannel::from_u32(ray.channel) else {
            continue;
        };
        if let Some(px) = channels[channel as usize].get_mut(ray.pixel_index as usize) {
            *px += ray.contribution();
        }
    }
}

/// Sum the channels into `combined`.
///
/// With `blend_counter = Some(n)` the result is averaged with the `n` frames
/// already accumulated in `combined`; otherwise `combined` is overwritten.
pub fn merge_channels(channels: &[Vec<Vec3>; LightChannel::COUNT], combined: &mut [Vec3], blend_counter: Option<u32>) {
    let [direct, indirect, emissive] = channels;
    combined
        .par_iter_mut()
        .zip(direct.par_iter())
        .zip(indirect.par_iter())
        .zip(emissive.par_iter())
        .for_each(|(((out, &d), &i), &e)| {
            let frame = d + i + e;
            *out = match blend_counter {
                Some(n) if n > 0 => (*out * n as f32 + frame) / (n as f32 + 1.0),
                _ => frame,
            };
        });
}

/// Reinhard tone mapping with exposure and 2.2 gamma into RGBA8.
pub fn tone_map(input: &[Vec3], exposure: f32, out: &mut [u8]) {
    out.par_chunks_mut(4).zip(input.par_iter()).for_each(|(px, &c)| {
        let c = c * exposure;
        let mapped = (c / (Vec3::ONE + c)).max(Vec3::ZERO).powf(1.0 / 2.2);
        let rgb = (mapped * 255.0 + 0.5).min(Vec3::splat(255.0));
        px[0] = rgb.x as u8;
        px[1] = rgb.y as u8;
        px[2] = rgb.z as u8;
        px[3] = 255;
    });
}

/// Scatter a per-ray quantity into a per-pixel image (pixels without a ray stay black).
pub fn ray_image(rays: &[Ray], num_pixels: usize, f: impl Fn(&Ray) -> Vec3) -> Vec<Vec3> {
    let mut image = vec![Vec3::ZERO; num_pixels];
    for ray in rays {
        if let Some(px) = image.get_mut(ray.pixel_index as usize) {
            *px = f(ray);
        }
    }
    image
}

/// Per-pixel sum of pending shadow-ray contributions, before visibility.
pub fn contribution_image(rays: &[ShadowRay], num_pixels: usize) -> Vec<Vec3> {
    let mut image = vec![Vec3::ZERO; num_pixels];
    for ray in rays {
        if let Some(px) = image.get_mut(ray.pixel_index as usize) {
            *px += ray.contribution();
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restir::LightSample;
    use crate::wavefront::data::TriangleLight;

    fn channels(n: usize) -> [Vec<Vec3>; LightChannel::COUNT] {
        [vec![Vec3::ZERO; n], vec![Vec3::ZERO; n], vec![Vec3::ZERO; n]]
    }

    fn floor_hit(throughput: Vec3) -> SurfaceData {
        SurfaceData {
            position: [0.0; 3],
            state: SurfaceState::Hit as u32,
            normal: [0.0, 1.0, 0.0],
            albedo: [0.5; 3],
            t: 1.0,
            emission: [0.0; 3],
            throughput: throughput.to_array(),
            ..SurfaceData::EMPTY
        }
    }

    #[test]
    fn test_primary_rays_cover_every_pixel() {
        let mut rays = AtomicBuffer::new("rays", 12);
        let camera = Camera::default();
        generate_primary_rays(&mut rays, &camera, UVec2::new(4, 3), 0, false);
        assert_eq!(rays.count(), 12);
        let rays = rays.as_slice();
        for (i, ray) in rays.iter().enumerate() {
            assert_eq!(ray.pixel_index, i as u32);
            assert!((ray.direction().length() - 1.0).abs() < 1e-4);
            assert_eq!(ray.throughput(), Vec3::ONE);
        }
    }

    #[test]
    fn test_volumetric_clipped_at_hit() {
        let rays = vec![Ray::new(Vec3::ZERO, Vec3::Z, Vec3::ONE, 1)];
        let hits = vec![Intersection {
            ray_index: 0,
            t: 4.0,
            instance_id: 0,
            primitive_index: 0,
            barycentrics: [0.0; 2],
        }];
        let segments = vec![VolumetricIntersection {
            ray_index: 0,
            volume_id: 1,
            entry_t: 2.0,
            exit_t: 10.0,
            density: 0.5,
        }];
        let mut out = vec![VolumetricData::CLEAR; 2];
        extract_volumetric(&rays, &hits, &segments, &mut out);
        assert_eq!(out[0].transmittance(), Vec3::ONE);
        assert!((out[1].distance - 2.0).abs() < 1e-6);
        assert!((out[1].transmittance().x - (-1.0f32).exp()).abs() < 1e-6);
    }

    #[test]
    fn test_shade_emits_shadow_and_bounce_rays() {
        let light = TriangleLight::new(
            [Vec3::new(-1.0, 2.0, -1.0), Vec3::new(2.0, 2.0, -1.0), Vec3::new(-1.0, 2.0, 2.0)],
            Vec3::splat(2.0),
            0,
            0,
        );
        let surfaces = vec![floor_hit(Vec3::ONE), SurfaceData::EMPTY, SurfaceData::miss(&Ray::new(
            Vec3::ZERO,
            Vec3::Z,
            Vec3::splat(0.5),
            2,
        ))];
        let volumetric = vec![VolumetricData::CLEAR; 3];
        let mut reservoirs = vec![Reservoir::default(); 3];
        reservoirs[0] = Reservoir {
            sample: LightSample::on_light(&light, 0, 0.1, 0.1),
            w_sum: 1.0,
            m: 1,
            weight: 2.0,
            target_pdf: 0.5,
        };

        let shadow = AtomicBuffer::new("shadow", 8);
        let next = AtomicBuffer::new("next", 8);
        let mut ch = channels(3);
        shade(
            &ShadeInputs {
                depth: 0,
                max_depth: 2,
                surfaces: &surfaces,
                volumetric: &volumetric,
                reservoirs: &reservoirs,
                reservoirs_per_pixel: 1,
                background: Vec3::ONE,
                seed: 0,
            },
            &shadow,
            &next,
            &mut ch,
        );
        let (mut shadow, mut next) = (shadow, next);
        assert_eq!(shadow.count(), 1);
        assert_eq!(next.count(), 1);
        let ray = shadow.as_slice()[0];
        assert_eq!(ray.channel, LightChannel::Direct as u32);
        assert_eq!(ray.reservoir_index, 0);
        assert!(ray.contribution().x > 0.0);
        assert_eq!(next.as_slice()[0].throughput(), Vec3::splat(0.5));
        // Background seen directly by the camera.
        assert_eq!(ch[LightChannel::Emissive as usize][2], Vec3::splat(0.5));
    }

    #[test]
    fn test_last_depth_emits_no_bounce() {
        let surfaces = vec![floor_hit(Vec3::ONE)];
        let shadow = AtomicBuffer::new("shadow", 1);
        let mut next = AtomicBuffer::new("next", 1);
        let mut ch = channels(1);
        shade(
            &ShadeInputs {
                depth: 1,
                max_depth: 2,
                surfaces: &surfaces,
                volumetric: &[VolumetricData::CLEAR],
                reservoirs: &[Reservoir::default()],
                reservoirs_per_pixel: 1,
                background: Vec3::ZERO,
                seed: 0,
            },
            &shadow,
            &next,
            &mut ch,
        );
        assert_eq!(next.count(), 0);
    }

    #[test]
    fn test_accumulate_and_merge() {
        let rays = vec![
            ShadowRay::new(Vec3::ZERO, Vec3::Y, 1.0, Vec3::ONE, 0, LightChannel::Direct, 0),
            ShadowRay::new(Vec3::ZERO, Vec3::Y, 1.0, Vec3::ONE, 1, LightChannel::Indirect, 1),
        ];
        let mut ch = channels(2);
        accumulate_shadow_rays(&rays, &[1], &mut ch);
        assert_eq!(ch[0][0], Vec3::ZERO);
        assert_eq!(ch[1][1], Vec3::ONE);

        let mut combined = vec![Vec3::splat(3.0); 2];
        merge_channels(&ch, &mut combined, None);
        assert_eq!(combined, vec![Vec3::ZERO, Vec3::ONE]);

        // Average of the accumulated frame and the new one.
        let mut combined = vec![Vec3::splat(3.0); 2];
        merge_channels(&ch, &mut combined, Some(1));
        assert_eq!(combined, vec![Vec3::splat(1.5), Vec3::splat(2.0)]);
    }

    #[test]
    fn test_tone_map() {
        let mut out = vec![0u8; 8];
        tone_map(&[Vec3::ZERO, Vec3::splat(1e6)], 1.0, &mut out);
        assert_eq!(out, vec![0, 0, 0, 255, 255, 255, 255, 255]);
    }
}
