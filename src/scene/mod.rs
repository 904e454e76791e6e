//! Scene description consumed by the frame loop.
//!
//! Resources live in a [`Scene`] arena and are referenced by typed
//! [`Handle`]s. Geometry is registered with the ray tracing backend when it is
//! created (see [`ResourceFactory`]); [`Scene::build_table`] flattens mesh and
//! volume instances into the backend's scene table.
//!
//! - [`Camera`] - pinhole camera with previous-frame matrix
//! - [`SceneProvider`] / [`SharedScene`] - what the scheduler reads each frame
//! - [`cornell::cornell_box`] - procedural demo scene

mod camera;
pub mod cornell;
mod factory;

pub use camera::Camera;
pub use factory::{BackendResourceFactory, PrimitiveDesc, ResourceFactory, VolumeDesc};

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use glam::{Mat3, Mat4, Vec2, Vec3};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;

use crate::backend::{AccelHandle, InstanceDesc};
use crate::buffers::AtomicBuffer;
use crate::util::{BBox3f, Error, Result};
use crate::wavefront::data::TriangleLight;

// ============================================================================
// Handles
// ============================================================================

/// Index of a resource of type `T` inside a [`Scene`].
pub struct Handle<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[inline]
    fn new(index: usize) -> Self {
        Self {
            index: index as u32,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = std::any::type_name::<T>().rsplit("::").next().unwrap_or("?");
        write!(f, "Handle<{}>({})", name, self.index)
    }
}

pub type TextureHandle = Handle<Texture>;
pub type MaterialHandle = Handle<Material>;
pub type PrimitiveHandle = Handle<Primitive>;
pub type MeshHandle = Handle<Mesh>;
pub type VolumeHandle = Handle<Volume>;

// ============================================================================
// Resources
// ============================================================================

/// Linear RGB texture, sampled with nearest lookup and wrapping.
#[derive(Debug, Clone)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Vec3>,
}

impl Texture {
    pub fn sample(&self, uv: Vec2) -> Vec3 {
        let u = uv.x - uv.x.floor();
        let v = uv.y - uv.y.floor();
        let x = ((u * self.width as f32) as u32).min(self.width - 1);
        let y = ((v * self.height as f32) as u32).min(self.height - 1);
        self.pixels[(y * self.width + x) as usize]
    }
}

/// Lambertian material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub diffuse: Vec3,
    /// Multiplied into `diffuse` at the interpolated UV.
    pub diffuse_texture: Option<TextureHandle>,
    /// Radiance of emissive triangles using this material.
    pub emission: Vec3,
}

impl Material {
    pub fn diffuse(color: Vec3) -> Self {
        Self {
            diffuse: color,
            diffuse_texture: None,
            emission: Vec3::ZERO,
        }
    }

    pub fn emissive(radiance: Vec3) -> Self {
        Self {
            diffuse: Vec3::ZERO,
            diffuse_texture: None,
            emission: radiance,
        }
    }
}

/// Indexed triangle geometry with one material.
#[derive(Debug, Clone)]
pub struct Primitive {
    pub positions: Vec<Vec3>,
    pub normals: Option<Vec<Vec3>>,
    pub uvs: Option<Vec<Vec2>>,
    pub indices: Vec<[u32; 3]>,
    pub material: MaterialHandle,
    /// Per-triangle emissive flag.
    pub emissive: Vec<bool>,
    pub accel: AccelHandle,
}

impl Primitive {
    #[inline]
    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn triangle(&self, index: usize) -> [Vec3; 3] {
        self.indices[index].map(|i| self.positions[i as usize])
    }

    pub fn bounds(&self) -> BBox3f {
        let mut b = BBox3f::EMPTY;
        for &p in &self.positions {
            b.expand_by_point(p);
        }
        b
    }
}

/// A group of primitives instanced together.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub primitives: Vec<PrimitiveHandle>,
}

/// Axis-aligned homogeneous medium.
#[derive(Debug, Clone, Copy)]
pub struct Volume {
    pub bounds: BBox3f,
    /// Extinction coefficient.
    pub density: f32,
    pub accel: AccelHandle,
}

/// How an instance contributes to the light list.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum EmissionMode {
    /// Never a light, whatever the material says.
    Disabled,
    /// Triangles flagged emissive use their material's emission.
    #[default]
    Enabled,
    /// Every triangle is a light with this radiance.
    Override(Vec3),
}

/// A placed mesh.
#[derive(Debug, Clone, Copy)]
pub struct MeshInstance {
    pub mesh: MeshHandle,
    pub transform: Mat4,
    pub emission: EmissionMode,
}

/// A placed volume.
#[derive(Debug, Clone, Copy)]
pub struct VolumeInstance {
    pub volume: VolumeHandle,
    pub transform: Mat4,
}

/// What a backend scene table entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableEntry {
    Primitive { instance: u32, primitive: PrimitiveHandle },
    Volume { instance: u32 },
}

/// Shading attributes at a ray hit, in world space.
#[derive(Debug, Clone, Copy)]
pub struct HitAttributes {
    pub position: Vec3,
    /// Shading normal (not yet oriented towards the ray).
    pub normal: Vec3,
    pub albedo: Vec3,
    pub emission: Vec3,
    pub material_id: u32,
}

// ============================================================================
// Scene
// ============================================================================

/// Arena of scene resources plus the instances placing them.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    textures: Vec<Texture>,
    materials: Vec<Material>,
    primitives: Vec<Primitive>,
    meshes: Vec<Mesh>,
    volumes: Vec<Volume>,
    instances: Vec<MeshInstance>,
    volume_instances: Vec<VolumeInstance>,
    /// Backend table index -> resource, rebuilt by `build_table`.
    table: Vec<TableEntry>,
    /// Per table entry: world transform and normal matrix.
    table_transforms: Vec<(Mat4, Mat3)>,
    descs: Vec<InstanceDesc>,
    /// Backend structures referenced by `primitives` and `volumes`.
    accels: Vec<Arc<factory::AccelLease>>,
    pub camera: Camera,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(handle.index())
    }

    pub fn material(&self, handle: MaterialHandle) -> Option<&Material> {
        self.materials.get(handle.index())
    }

    pub fn primitive(&self, handle: PrimitiveHandle) -> Option<&Primitive> {
        self.primitives.get(handle.index())
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&Mesh> {
        self.meshes.get(handle.index())
    }

    pub fn volume(&self, handle: VolumeHandle) -> Option<&Volume> {
        self.volumes.get(handle.index())
    }

    pub fn instances(&self) -> &[MeshInstance] {
        &self.instances
    }

    pub fn volume_instances(&self) -> &[VolumeInstance] {
        &self.volume_instances
    }

    pub(crate) fn push_texture(&mut self, texture: Texture) -> Result<TextureHandle> {
        if texture.width == 0
            || texture.height == 0
            || texture.pixels.len() != texture.width as usize * texture.height as usize
        {
            return Err(Error::other(format!(
                "texture {}x{} has {} pixels",
                texture.width,
                texture.height,
                texture.pixels.len()
            )));
        }
        self.textures.push(texture);
        Ok(Handle::new(self.textures.len() - 1))
    }

    pub(crate) fn push_material(&mut self, material: Material) -> Result<MaterialHandle> {
        if let Some(tex) = material.diffuse_texture {
            if self.texture(tex).is_none() {
                return Err(Error::InvalidHandle(format!("{tex:?}")));
            }
        }
        self.materials.push(material);
        Ok(Handle::new(self.materials.len() - 1))
    }

    pub(crate) fn push_primitive(&mut self, primitive: Primitive) -> Result<PrimitiveHandle> {
        if self.material(primitive.material).is_none() {
            return Err(Error::InvalidHandle(format!("{:?}", primitive.material)));
        }
        self.primitives.push(primitive);
        Ok(Handle::new(self.primitives.len() - 1))
    }

    pub(crate) fn push_mesh(&mut self, mesh: Mesh) -> Result<MeshHandle> {
        if let Some(bad) = mesh.primitives.iter().find(|&&p| self.primitive(p).is_none()) {
            return Err(Error::InvalidHandle(format!("{bad:?}")));
        }
        self.meshes.push(mesh);
        Ok(Handle::new(self.meshes.len() - 1))
    }

    pub(crate) fn retain_accel(&mut self, lease: Arc<factory::AccelLease>) {
        self.accels.push(lease);
    }

    pub(crate) fn push_volume(&mut self, volume: Volume) -> VolumeHandle {
        self.volumes.push(volume);
        Handle::new(self.volumes.len() - 1)
    }

    /// Place `mesh` in the scene. Returns the instance index.
    pub fn add_instance(&mut self, mesh: MeshHandle, transform: Mat4, emission: EmissionMode) -> Result<usize> {
        if self.mesh(mesh).is_none() {
            return Err(Error::InvalidHandle(format!("{mesh:?}")));
        }
        self.instances.push(MeshInstance {
            mesh,
            transform,
            emission,
        });
        Ok(self.instances.len() - 1)
    }

    pub fn add_volume_instance(&mut self, volume: VolumeHandle, transform: Mat4) -> Result<usize> {
        if self.volume(volume).is_none() {
            return Err(Error::InvalidHandle(format!("{volume:?}")));
        }
        self.volume_instances.push(VolumeInstance { volume, transform });
        Ok(self.volume_instances.len() - 1)
    }

    pub fn set_instance_transform(&mut self, instance: usize, transform: Mat4) -> Result<()> {
        let inst = self
            .instances
            .get_mut(instance)
            .ok_or_else(|| Error::InvalidHandle(format!("instance {instance}")))?;
        inst.transform = transform;
        Ok(())
    }

    pub fn set_emission_mode(&mut self, instance: usize, mode: EmissionMode) -> Result<()> {
        let inst = self
            .instances
            .get_mut(instance)
            .ok_or_else(|| Error::InvalidHandle(format!("instance {instance}")))?;
        inst.emission = mode;
        Ok(())
    }

    /// Flatten instances into backend table entries.
    ///
    /// Every (mesh instance, primitive) pair and every volume instance gets one
    /// entry; its position in the returned list is its `instance_id`.
    pub fn build_table(&mut self) -> &[InstanceDesc] {
        self.table.clear();
        self.table_transforms.clear();
        let mut descs = std::mem::take(&mut self.descs);
        descs.clear();

        for (i, inst) in self.instances.iter().enumerate() {
            let Some(mesh) = self.meshes.get(inst.mesh.index()) else {
                continue;
            };
            let normal_matrix = Mat3::from_mat4(inst.transform).inverse().transpose();
            for &prim in &mesh.primitives {
                let Some(p) = self.primitives.get(prim.index()) else {
                    continue;
                };
                descs.push(InstanceDesc {
                    accel: p.accel,
                    transform: inst.transform,
                    instance_id: self.table.len() as u32,
                });
                self.table.push(TableEntry::Primitive {
                    instance: i as u32,
                    primitive: prim,
                });
                self.table_transforms.push((inst.transform, normal_matrix));
            }
        }
        for (i, inst) in self.volume_instances.iter().enumerate() {
            let Some(v) = self.volumes.get(inst.volume.index()) else {
                continue;
            };
            descs.push(InstanceDesc {
                accel: v.accel,
                transform: inst.transform,
                instance_id: self.table.len() as u32,
            });
            self.table.push(TableEntry::Volume { instance: i as u32 });
            self.table_transforms.push((inst.transform, Mat3::IDENTITY));
        }
        self.descs = descs;
        &self.descs
    }

    /// Table built by the last [`build_table`](Self::build_table).
    #[inline]
    pub fn instance_descs(&self) -> &[InstanceDesc] {
        &self.descs
    }

    #[inline]
    pub fn table(&self) -> &[TableEntry] {
        &self.table
    }

    /// Triangles referenced by the scene table, the upper bound of the light count.
    pub fn table_triangle_count(&self) -> usize {
        self.table
            .iter()
            .filter_map(|e| match e {
                TableEntry::Primitive { primitive, .. } => self.primitive(*primitive),
                TableEntry::Volume { .. } => None,
            })
            .map(Primitive::triangle_count)
            .sum()
    }

    /// Radiance of triangle `triangle` of `primitive` placed by `instance`.
    fn triangle_emission(&self, instance: &MeshInstance, primitive: &Primitive, triangle: usize) -> Vec3 {
        match instance.emission {
            EmissionMode::Disabled => Vec3::ZERO,
            EmissionMode::Override(radiance) => radiance,
            EmissionMode::Enabled => {
                if primitive.emissive.get(triangle).copied().unwrap_or(false) {
                    self.materials
                        .get(primitive.material.index())
                        .map_or(Vec3::ZERO, |m| m.emission)
                } else {
                    Vec3::ZERO
                }
            }
        }
    }

    /// Append every emissive triangle of the table, in world space, to `out`.
    pub fn collect_lights(&self, out: &AtomicBuffer<TriangleLight>) {
        self.table.par_iter().enumerate().for_each(|(id, entry)| {
            let TableEntry::Primitive { instance, primitive } = *entry else {
                return;
            };
            let (Some(inst), Some(prim)) = (self.instances.get(instance as usize), self.primitive(primitive)) else {
                return;
            };
            if inst.emission == EmissionMode::Disabled {
                return;
            }
            let transform = self.table_transforms[id].0;
            (0..prim.triangle_count()).into_par_iter().for_each(|tri| {
                let radiance = self.triangle_emission(inst, prim, tri);
                if radiance.max_element() <= 0.0 {
                    return;
                }
                let p = prim.triangle(tri).map(|v| transform.transform_point3(v));
                out.append(TriangleLight::new(p, radiance, id as u32, tri as u32));
            });
        });
    }

    /// Shading attributes of a hit reported by the backend.
    pub fn hit_attributes(&self, instance_id: u32, triangle: u32, barycentrics: [f32; 2]) -> Option<HitAttributes> {
        let TableEntry::Primitive { instance, primitive } = *self.table.get(instance_id as usize)? else {
            return None;
        };
        let inst = self.instances.get(instance as usize)?;
        let prim = self.primitive(primitive)?;
        let idx = *prim.indices.get(triangle as usize)?;
        let (transform, normal_matrix) = self.table_transforms[instance_id as usize];

        let [b1, b2] = barycentrics;
        let b0 = 1.0 - b1 - b2;
        let [i0, i1, i2] = idx.map(|i| i as usize);
        let [p0, p1, p2] = [prim.positions[i0], prim.positions[i1], prim.positions[i2]];
        let position = transform.transform_point3(p0 * b0 + p1 * b1 + p2 * b2);

        let object_normal = match &prim.normals {
            Some(n) => n[i0] * b0 + n[i1] * b1 + n[i2] * b2,
            None => (p1 - p0).cross(p2 - p0),
        };
        let normal = (normal_matrix * object_normal).normalize_or_zero();

        let material = self.material(prim.material)?;
        let mut albedo = material.diffuse;
        if let (Some(tex), Some(uvs)) = (material.diffuse_texture.and_then(|t| self.texture(t)), &prim.uvs) {
            albedo *= tex.sample(uvs[i0] * b0 + uvs[i1] * b1 + uvs[i2] * b2);
        }

        Some(HitAttributes {
            position,
            normal,
            albedo,
            emission: self.triangle_emission(inst, prim, triangle as usize),
            material_id: prim.material.index() as u32,
        })
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Per-frame view of the scene for the scheduler.
pub trait SceneProvider: Send + Sync {
    /// Current scene and its revision, read together. The revision is
    /// incremented whenever the scene (not the camera) changes.
    fn scene(&self) -> Option<(Arc<Scene>, u64)>;

    fn camera(&self) -> Camera;

    /// Called once per traced frame, after the camera was used.
    fn end_frame(&self, aspect: f32);
}

#[derive(Debug, Default)]
struct SceneSlot {
    scene: Option<Arc<Scene>>,
    revision: u64,
}

/// Scene slot shared between the control API and the worker.
#[derive(Debug, Default)]
pub struct SharedScene {
    slot: RwLock<SceneSlot>,
    camera: Mutex<Camera>,
}

impl SharedScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the scene. The camera is reset to the scene's camera.
    pub fn set(&self, mut scene: Scene) {
        scene.build_table();
        *self.camera.lock() = scene.camera.clone();
        let old = {
            let mut slot = self.slot.write();
            slot.revision += 1;
            slot.scene.replace(Arc::new(scene))
        };
        // Released outside the lock: dropping the last copy frees backend structures.
        drop(old);
    }

    /// Drop the current scene.
    pub fn clear(&self) -> Option<Arc<Scene>> {
        let mut slot = self.slot.write();
        slot.revision += 1;
        slot.scene.take()
    }

    /// Edit the scene in place (copy-on-write when a frame still holds it).
    pub fn modify<R>(&self, f: impl FnOnce(&mut Scene) -> R) -> Option<R> {
        let mut slot = self.slot.write();
        let scene = Arc::make_mut(slot.scene.as_mut()?);
        let r = f(scene);
        scene.build_table();
        slot.revision += 1;
        Some(r)
    }

    /// Incremented whenever the scene (not the camera) changes.
    pub fn revision(&self) -> u64 {
        self.slot.read().revision
    }

    pub fn set_camera(&self, camera: Camera) {
        *self.camera.lock() = camera;
    }

    pub fn update_camera(&self, f: impl FnOnce(&mut Camera)) {
        f(&mut self.camera.lock());
    }
}

impl SceneProvider for SharedScene {
    fn scene(&self) -> Option<(Arc<Scene>, u64)> {
        let slot = self.slot.read();
        slot.scene.as_ref().map(|scene| (Arc::clone(scene), slot.revision))
    }

    fn camera(&self) -> Camera {
        self.camera.lock().clone()
    }

    fn end_frame(&self, aspect: f32) {
        self.camera.lock().update_previous_frame_matrix(aspect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_scene() -> (Scene, MeshHandle) {
        let mut scene = Scene::new();
        let light = scene.push_material(Material::emissive(Vec3::splat(4.0))).unwrap();
        let prim = scene
            .push_primitive(Primitive {
                positions: vec![
                    Vec3::new(0.0, 0.0, 0.0),
                    Vec3::new(1.0, 0.0, 0.0),
                    Vec3::new(1.0, 1.0, 0.0),
                    Vec3::new(0.0, 1.0, 0.0),
                ],
                normals: None,
                uvs: None,
                indices: vec![[0, 1, 2], [0, 2, 3]],
                material: light,
                emissive: vec![true, false],
                accel: AccelHandle(0),
            })
            .unwrap();
        let mesh = scene
            .push_mesh(Mesh {
                primitives: vec![prim],
            })
            .unwrap();
        (scene, mesh)
    }

    fn lights(scene: &Scene) -> Vec<TriangleLight> {
        let mut out = AtomicBuffer::new("lights", scene.table_triangle_count().max(1));
        scene.collect_lights(&out);
        out.as_slice().to_vec()
    }

    #[test]
    fn test_handle_validation() {
        let mut scene = Scene::new();
        let bogus: MaterialHandle = Handle::new(3);
        let err = scene.push_primitive(Primitive {
            positions: vec![],
            normals: None,
            uvs: None,
            indices: vec![],
            material: bogus,
            emissive: vec![],
            accel: AccelHandle(0),
        });
        assert!(matches!(err, Err(Error::InvalidHandle(_))));
        assert!(scene.add_instance(Handle::new(0), Mat4::IDENTITY, EmissionMode::Enabled).is_err());
        assert!(format!("{bogus:?}").contains("Material"));
    }

    #[test]
    fn test_table_layout() {
        let (mut scene, mesh) = quad_scene();
        scene.add_instance(mesh, Mat4::IDENTITY, EmissionMode::Enabled).unwrap();
        scene
            .add_instance(mesh, Mat4::from_translation(Vec3::X * 5.0), EmissionMode::Enabled)
            .unwrap();
        let volume = scene.push_volume(Volume {
            bounds: BBox3f::new(Vec3::ZERO, Vec3::ONE),
            density: 0.5,
            accel: AccelHandle(1),
        });
        scene.add_volume_instance(volume, Mat4::IDENTITY).unwrap();

        let descs = scene.build_table();
        assert_eq!(descs.len(), 3);
        assert_eq!(descs.iter().map(|d| d.instance_id).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(scene.table()[2], TableEntry::Volume { instance: 0 });
        assert_eq!(scene.table_triangle_count(), 4);
    }

    #[test]
    fn test_emission_modes() {
        let (mut scene, mesh) = quad_scene();
        let inst = scene.add_instance(mesh, Mat4::IDENTITY, EmissionMode::Enabled).unwrap();
        scene.build_table();
        let found = lights(&scene);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].radiance(), Vec3::splat(4.0));

        scene.set_emission_mode(inst, EmissionMode::Override(Vec3::ONE)).unwrap();
        assert_eq!(lights(&scene).len(), 2);

        scene.set_emission_mode(inst, EmissionMode::Disabled).unwrap();
        assert!(lights(&scene).is_empty());
    }

    #[test]
    fn test_lights_in_world_space() {
        let (mut scene, mesh) = quad_scene();
        scene
            .add_instance(mesh, Mat4::from_translation(Vec3::Z * 2.0), EmissionMode::Enabled)
            .unwrap();
        scene.build_table();
        let found = lights(&scene);
        assert_eq!(found[0].p0, [0.0, 0.0, 2.0]);
        assert!((found[0].area - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_hit_attributes() {
        let (mut scene, mesh) = quad_scene();
        scene
            .add_instance(mesh, Mat4::from_translation(Vec3::Y), EmissionMode::Enabled)
            .unwrap();
        scene.build_table();

        let hit = scene.hit_attributes(0, 0, [0.5, 0.25]).unwrap();
        assert!((hit.position - Vec3::new(0.75, 1.25, 0.0)).length() < 1e-5);
        assert!((hit.normal - Vec3::Z).length() < 1e-5);
        assert_eq!(hit.emission, Vec3::splat(4.0));

        let other = scene.hit_attributes(0, 1, [0.3, 0.3]).unwrap();
        assert_eq!(other.emission, Vec3::ZERO);
        assert!(scene.hit_attributes(7, 0, [0.0, 0.0]).is_none());
    }

    #[test]
    fn test_textured_albedo() {
        let mut scene = Scene::new();
        let tex = scene
            .push_texture(Texture {
                width: 2,
                height: 1,
                pixels: vec![Vec3::X, Vec3::Y],
            })
            .unwrap();
        let mat = scene
            .push_material(Material {
                diffuse: Vec3::ONE,
                diffuse_texture: Some(tex),
                emission: Vec3::ZERO,
            })
            .unwrap();
        let prim = scene
            .push_primitive(Primitive {
                positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
                normals: None,
                uvs: Some(vec![Vec2::ZERO, Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0)]),
                indices: vec![[0, 1, 2]],
                material: mat,
                emissive: vec![false],
                accel: AccelHandle(0),
            })
            .unwrap();
        let mesh = scene.push_mesh(Mesh { primitives: vec![prim] }).unwrap();
        scene.add_instance(mesh, Mat4::IDENTITY, EmissionMode::Enabled).unwrap();
        scene.build_table();

        assert_eq!(scene.hit_attributes(0, 0, [0.1, 0.1]).unwrap().albedo, Vec3::X);
        assert_eq!(scene.hit_attributes(0, 0, [0.8, 0.1]).unwrap().albedo, Vec3::Y);
    }

    #[test]
    fn test_shared_scene_revision() {
        let shared = SharedScene::new();
        assert!(shared.scene().is_none());
        assert!(shared.modify(|_| ()).is_none());

        let (scene, _) = quad_scene();
        shared.set(scene);
        let (held, r0) = shared.scene().unwrap();
        assert_eq!(r0, shared.revision());
        shared.modify(|s| s.camera.fov_y = 10.0).unwrap();
        let (edited, r1) = shared.scene().unwrap();
        assert!(r1 > r0);
        assert_eq!(edited.camera.fov_y, 10.0);
        // The frame's copy is unaffected.
        assert_ne!(held.camera.fov_y, 10.0);

        shared.clear();
        assert!(shared.scene().is_none());
        assert!(shared.revision() > r1);
    }
}
