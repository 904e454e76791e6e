//! Resource creation on top of a ray tracing backend.

use std::fmt;
use std::sync::{Arc, Weak};

use glam::{Vec2, Vec3};

use super::{
    Material, MaterialHandle, Mesh, MeshHandle, Primitive, PrimitiveHandle, Scene, Texture, TextureHandle, Volume,
    VolumeHandle,
};
use crate::backend::{AccelHandle, Geometry, RayTracingBackend};
use crate::util::{BBox3f, Error, Result};

/// Triangle geometry to register.
#[derive(Debug, Clone)]
pub struct PrimitiveDesc {
    pub positions: Vec<Vec3>,
    pub normals: Option<Vec<Vec3>>,
    pub uvs: Option<Vec<Vec2>>,
    pub indices: Vec<[u32; 3]>,
    pub material: MaterialHandle,
    /// Per-triangle emissive flags; `None` marks every triangle emissive
    /// when the material emits.
    pub emissive: Option<Vec<bool>>,
}

/// Homogeneous medium to register.
#[derive(Debug, Clone, Copy)]
pub struct VolumeDesc {
    pub bounds: BBox3f,
    pub density: f32,
}

/// Backend structure owned by a scene arena. Shared by every copy of the
/// scene; the structure is destroyed when the last copy drops.
pub(crate) struct AccelLease {
    handle: AccelHandle,
    backend: Weak<dyn RayTracingBackend>,
}

impl AccelLease {
    pub(crate) fn new(handle: AccelHandle, backend: &Arc<dyn RayTracingBackend>) -> Arc<Self> {
        Arc::new(Self {
            handle,
            backend: Arc::downgrade(backend),
        })
    }
}

impl fmt::Debug for AccelLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccelLease({})", self.handle.0)
    }
}

impl Drop for AccelLease {
    fn drop(&mut self) {
        let Some(backend) = self.backend.upgrade() else {
            return;
        };
        if let Err(e) = backend.destroy_acceleration_structure(self.handle) {
            tracing::warn!("Releasing acceleration structure {}: {}", self.handle.0, e);
        }
    }
}

/// Creates scene resources, building backend acceleration structures where needed.
pub trait ResourceFactory {
    fn create_scene(&self) -> Scene {
        Scene::new()
    }

    fn create_texture(&self, scene: &mut Scene, texture: Texture) -> Result<TextureHandle>;

    fn create_material(&self, scene: &mut Scene, material: Material) -> Result<MaterialHandle>;

    fn create_primitive(&self, scene: &mut Scene, desc: PrimitiveDesc) -> Result<PrimitiveHandle>;

    fn create_mesh(&self, scene: &mut Scene, primitives: Vec<PrimitiveHandle>) -> Result<MeshHandle>;

    fn create_volume(&self, scene: &mut Scene, desc: VolumeDesc) -> Result<VolumeHandle>;
}

/// [`ResourceFactory`] registering geometry with a [`RayTracingBackend`].
#[derive(Clone)]
pub struct BackendResourceFactory {
    backend: Arc<dyn RayTracingBackend>,
}

impl BackendResourceFactory {
    pub fn new(backend: Arc<dyn RayTracingBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<dyn RayTracingBackend> {
        &self.backend
    }
}

impl ResourceFactory for BackendResourceFactory {
    fn create_texture(&self, scene: &mut Scene, texture: Texture) -> Result<TextureHandle> {
        scene.push_texture(texture)
    }

    fn create_material(&self, scene: &mut Scene, material: Material) -> Result<MaterialHandle> {
        scene.push_material(material)
    }

    fn create_primitive(&self, scene: &mut Scene, desc: PrimitiveDesc) -> Result<PrimitiveHandle> {
        let vertex_count = desc.positions.len();
        if let Some(bad) = desc.indices.iter().flatten().find(|&&i| i as usize >= vertex_count) {
            return Err(Error::other(format!(
                "index {bad} out of range for {vertex_count} vertices"
            )));
        }
        if desc.normals.as_ref().is_some_and(|n| n.len() != vertex_count)
            || desc.uvs.as_ref().is_some_and(|uv| uv.len() != vertex_count)
        {
            return Err(Error::other("vertex attribute count differs from position count"));
        }
        let triangles = desc.indices.len();
        let emissive = match desc.emissive {
            Some(flags) if flags.len() != triangles => {
                return Err(Error::other(format!(
                    "{} emissive flags for {} triangles",
                    flags.len(),
                    triangles
                )));
            }
            Some(flags) => flags,
            None => vec![true; triangles],
        };
        if scene.material(desc.material).is_none() {
            return Err(Error::InvalidHandle(format!("{:?}", desc.material)));
        }

        let accel = self.backend.build_acceleration_structure(&Geometry::Triangles {
            positions: &desc.positions,
            indices: &desc.indices,
        })?;
        tracing::debug!(
            "Built {} acceleration structure {:?} ({} triangles)",
            self.backend.name(),
            accel,
            triangles
        );
        scene.retain_accel(AccelLease::new(accel, &self.backend));
        scene.push_primitive(Primitive {
            positions: desc.positions,
            normals: desc.normals,
            uvs: desc.uvs,
            indices: desc.indices,
            material: desc.material,
            emissive,
            accel,
        })
    }

    fn create_mesh(&self, scene: &mut Scene, primitives: Vec<PrimitiveHandle>) -> Result<MeshHandle> {
        scene.push_mesh(Mesh { primitives })
    }

    fn create_volume(&self, scene: &mut Scene, desc: VolumeDesc) -> Result<VolumeHandle> {
        if desc.bounds.is_empty() || desc.density < 0.0 {
            return Err(Error::other(format!(
                "invalid volume {:?} with density {}",
                desc.bounds, desc.density
            )));
        }
        let accel = self.backend.build_acceleration_structure(&Geometry::Volume {
            bounds: desc.bounds,
            density: desc.density,
        })?;
        scene.retain_accel(AccelLease::new(accel, &self.backend));
        Ok(scene.push_volume(Volume {
            bounds: desc.bounds,
            density: desc.density,
            accel,
        }))
    }
}
