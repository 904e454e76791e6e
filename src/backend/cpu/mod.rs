//! Reference ray tracing backend on the CPU.
//!
//! One SAH BVH per triangle geometry, an instance table with world transforms
//! and parallel traversal with rayon. Volumes are axis-aligned boxes tested
//! with a slab test.

pub mod bvh;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::{Mat4, Vec3};
use parking_lot::RwLock;
use rayon::prelude::*;

use self::bvh::{build_bvh, intersect_triangle, Bvh};
use super::{AccelHandle, Geometry, InstanceDesc, LaunchParams, RayTracingBackend};
use crate::util::{BBox3f, Error, Result};
use crate::wavefront::data::{Intersection, VolumetricIntersection};

/// Bottom-level structure.
enum Blas {
    Triangles {
        positions: Vec<Vec3>,
        indices: Vec<[u32; 3]>,
        bvh: Bvh,
        bounds: BBox3f,
    },
    Volume {
        bounds: BBox3f,
        density: f32,
    },
}

impl Blas {
    fn bounds(&self) -> BBox3f {
        match self {
            Blas::Triangles { bounds, .. } | Blas::Volume { bounds, .. } => *bounds,
        }
    }
}

struct TableEntry {
    blas: Arc<Blas>,
    world_to_object: Mat4,
    world_bounds: BBox3f,
    instance_id: u32,
}

/// Closest triangle hit in world-space ray parameterization.
#[derive(Clone, Copy)]
struct Hit {
    t: f32,
    instance_id: u32,
    primitive: u32,
    b1: f32,
    b2: f32,
}

/// Built structures indexed by handle; destroyed slots are reused.
#[derive(Default)]
struct Structures {
    slots: Vec<Option<Arc<Blas>>>,
    free: Vec<u32>,
}

/// BVH ray tracer running on the rayon pool.
#[derive(Default)]
pub struct CpuBackend {
    structures: RwLock<Structures>,
    table: RwLock<Arc<Vec<TableEntry>>>,
    launches: AtomicU64,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `trace_rays` calls served.
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    /// Acceleration structures built and not yet destroyed.
    pub fn structure_count(&self) -> usize {
        self.structures.read().slots.iter().filter(|s| s.is_some()).count()
    }

    fn closest_hit(table: &[TableEntry], origin: Vec3, dir: Vec3, t_min: f32, t_max: f32) -> Option<Hit> {
        let inv_dir = dir.recip();
        let mut best: Option<Hit> = None;
        let mut limit = t_max;
        for entry in table {
            let Blas::Triangles {
                positions,
                indices,
                bvh,
                ..
            } = entry.blas.as_ref()
            else {
                continue;
            };
            if entry.world_bounds.intersect_ray(origin, inv_dir, t_min, limit).is_none() {
                continue;
            }
            // The object-space direction is not renormalized so `t` stays comparable.
            let o = entry.world_to_object.transform_point3(origin);
            let d = entry.world_to_object.transform_vector3(dir);
            bvh.traverse(o, d, t_min, &mut limit, false, |prim, t_max| {
                let tri = indices[prim as usize];
                let v = tri.map(|i| positions[i as usize]);
                let (t, b1, b2) = intersect_triangle(o, d, v, t_min, t_max)?;
                best = Some(Hit {
                    t,
                    instance_id: entry.instance_id,
                    primitive: prim,
                    b1,
                    b2,
                });
                Some(t)
            });
        }
        best
    }

    fn occluded(table: &[TableEntry], origin: Vec3, dir: Vec3, t_min: f32, t_max: f32) -> bool {
        let inv_dir = dir.recip();
        table.iter().any(|entry| {
            let Blas::Triangles {
                positions,
                indices,
                bvh,
                ..
            } = entry.blas.as_ref()
            else {
                return false;
            };
            if entry.world_bounds.intersect_ray(origin, inv_dir, t_min, t_max).is_none() {
                return false;
            }
            let o = entry.world_to_object.transform_point3(origin);
            let d = entry.world_to_object.transform_vector3(dir);
            let mut limit = t_max;
            bvh.traverse(o, d, t_min, &mut limit, true, |prim, t_max| {
                let v = indices[prim as usize].map(|i| positions[i as usize]);
                intersect_triangle(o, d, v, t_min, t_max).map(|(t, _, _)| t)
            })
        })
    }
}

impl RayTracingBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn build_acceleration_structure(&self, geometry: &Geometry<'_>) -> Result<AccelHandle> {
        let blas = match *geometry {
            Geometry::Triangles { positions, indices } => {
                if let Some(bad) = indices.iter().flatten().find(|&&i| i as usize >= positions.len()) {
                    return Err(Error::backend(
                        "cpu",
                        format!("index {bad} out of range for {} vertices", positions.len()),
                    ));
                }
                let prim_bounds: Vec<BBox3f> = indices
                    .iter()
                    .map(|tri| {
                        let mut b = BBox3f::EMPTY;
                        for &i in tri {
                            b.expand_by_point(positions[i as usize]);
                        }
                        b
                    })
                    .collect();
                let mut bounds = BBox3f::EMPTY;
                prim_bounds.iter().for_each(|b| bounds.expand_by_box(b));
                Blas::Triangles {
                    positions: positions.to_vec(),
                    indices: indices.to_vec(),
                    bvh: build_bvh(&prim_bounds),
                    bounds,
                }
            }
            Geometry::Volume { bounds, density } => {
                if bounds.is_empty() || !(density >= 0.0) {
                    return Err(Error::backend("cpu", "volume needs non-empty bounds and density >= 0"));
                }
                Blas::Volume { bounds, density }
            }
        };
        let mut structures = self.structures.write();
        let blas = Some(Arc::new(blas));
        let index = match structures.free.pop() {
            Some(index) => {
                structures.slots[index as usize] = blas;
                index
            }
            None => {
                structures.slots.push(blas);
                structures.slots.len() as u32 - 1
            }
        };
        Ok(AccelHandle(index))
    }

    fn destroy_acceleration_structure(&self, handle: AccelHandle) -> Result<()> {
        let mut structures = self.structures.write();
        structures
            .slots
            .get_mut(handle.0 as usize)
            .and_then(Option::take)
            .ok_or_else(|| Error::InvalidHandle(format!("acceleration structure {}", handle.0)))?;
        structures.free.push(handle.0);
        Ok(())
    }

    fn update_scene_table(&self, instances: &[InstanceDesc]) -> Result<()> {
        let structures = self.structures.read();
        let entries = instances
            .iter()
            .map(|desc| {
                let blas = structures
                    .slots
                    .get(desc.accel.0 as usize)
                    .cloned()
                    .flatten()
                    .ok_or_else(|| Error::InvalidHandle(format!("acceleration structure {}", desc.accel.0)))?;
                Ok(TableEntry {
                    world_bounds: blas.bounds().transformed(&desc.transform),
                    world_to_object: desc.transform.inverse(),
                    blas,
                    instance_id: desc.instance_id,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!("CPU scene table: {} instances", entries.len());
        *self.table.write() = Arc::new(entries);
        Ok(())
    }

    fn trace_rays(&self, count: usize, params: LaunchParams<'_>) -> Result<()> {
        self.launches.fetch_add(1, Ordering::Relaxed);
        let table = Arc::clone(&self.table.read());
        let _span = tracing::trace_span!("cpu_trace", kind = params.kind(), count).entered();

        match params {
            LaunchParams::Intersection {
                rays,
                intersections,
                volumetric,
                t_min,
                t_max,
                ..
            } => {
                let rays = rays
                    .get(..count)
                    .ok_or_else(|| Error::backend("cpu", format!("launch of {count} rays, {} provided", rays.len())))?;
                rays.par_iter().enumerate().for_each(|(i, ray)| {
                    let origin = ray.origin();
                    let dir = ray.direction();
                    let hit = Self::closest_hit(&table, origin, dir, t_min, t_max);
                    intersections.append(match hit {
                        Some(h) => Intersection {
                            ray_index: i as u32,
                            t: h.t,
                            instance_id: h.instance_id,
                            primitive_index: h.primitive,
                            barycentrics: [h.b1, h.b2],
                        },
                        None => Intersection::miss(i as u32),
                    });

                    for entry in table.iter() {
                        let Blas::Volume { bounds, density } = entry.blas.as_ref() else {
                            continue;
                        };
                        let o = entry.world_to_object.transform_point3(origin);
                        let d = entry.world_to_object.transform_vector3(dir);
                        if let Some((entry_t, exit_t)) = bounds.intersect_ray(o, d.recip(), t_min, t_max) {
                            volumetric.append(VolumetricIntersection {
                                ray_index: i as u32,
                                volume_id: entry.instance_id,
                                entry_t,
                                exit_t,
                                density: *density,
                            });
                        }
                    }
                });
            }
            LaunchParams::Shadow { rays, visible, t_min } => {
                let rays = rays
                    .get(..count)
                    .ok_or_else(|| Error::backend("cpu", format!("launch of {count} shadow rays, {} provided", rays.len())))?;
                rays.par_iter().enumerate().for_each(|(i, ray)| {
                    if !Self::occluded(&table, ray.origin(), ray.direction(), t_min, ray.max_distance) {
                        visible.append(i as u32);
                    }
                });
            }
        }
        Ok(())
    }
}
