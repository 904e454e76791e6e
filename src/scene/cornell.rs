//! Procedural Cornell box.
//!
//! The box spans `[-1, 1]` in x and z and `[0, 2]` in y, open towards +z,
//! with a square area light just below the ceiling.

use glam::{Mat4, Quat, Vec3};

use super::{Camera, EmissionMode, Material, MaterialHandle, PrimitiveDesc, PrimitiveHandle, ResourceFactory, Scene, VolumeDesc};
use crate::util::{BBox3f, Result};

/// Radiance of the ceiling light.
pub const LIGHT_RADIANCE: Vec3 = Vec3::new(17.0, 12.0, 4.0);

/// Optional additions to the base box.
#[derive(Debug, Clone, Copy, Default)]
pub struct CornellOptions {
    /// Fill the box with a thin homogeneous medium of this density.
    pub fog_density: Option<f32>,
}

fn quad(
    factory: &dyn ResourceFactory,
    scene: &mut Scene,
    corners: [Vec3; 4],
    material: MaterialHandle,
    emissive: bool,
) -> Result<PrimitiveHandle> {
    factory.create_primitive(
        scene,
        PrimitiveDesc {
            positions: corners.to_vec(),
            normals: None,
            uvs: None,
            indices: vec![[0, 1, 2], [0, 2, 3]],
            material,
            emissive: Some(vec![emissive; 2]),
        },
    )
}

/// Axis-aligned unit box centred at the origin, to be placed by an instance transform.
fn unit_box(factory: &dyn ResourceFactory, scene: &mut Scene, material: MaterialHandle) -> Result<PrimitiveHandle> {
    let positions: Vec<Vec3> = (0..8)
        .map(|i| {
            Vec3::new(
                if i & 1 == 0 { -0.5 } else { 0.5 },
                if i & 2 == 0 { -0.5 } else { 0.5 },
                if i & 4 == 0 { -0.5 } else { 0.5 },
            )
        })
        .collect();
    let faces = [
        [0, 2, 3, 1],
        [4, 5, 7, 6],
        [0, 1, 5, 4],
        [2, 6, 7, 3],
        [0, 4, 6, 2],
        [1, 3, 7, 5],
    ];
    let indices = faces
        .iter()
        .flat_map(|f| [[f[0], f[1], f[2]], [f[0], f[2], f[3]]])
        .collect::<Vec<[u32; 3]>>();
    let triangles = indices.len();
    factory.create_primitive(
        scene,
        PrimitiveDesc {
            positions,
            normals: None,
            uvs: None,
            indices,
            material,
            emissive: Some(vec![false; triangles]),
        },
    )
}

/// Build the Cornell box through `factory`.
pub fn cornell_box(factory: &dyn ResourceFactory, options: CornellOptions) -> Result<Scene> {
    let mut scene = factory.create_scene();
    let white = factory.create_material(&mut scene, Material::diffuse(Vec3::splat(0.73)))?;
    let red = factory.create_material(&mut scene, Material::diffuse(Vec3::new(0.65, 0.05, 0.05)))?;
    let green = factory.create_material(&mut scene, Material::diffuse(Vec3::new(0.12, 0.45, 0.15)))?;
    let light = factory.create_material(&mut scene, Material::emissive(LIGHT_RADIANCE))?;

    let v = |x: f32, y: f32, z: f32| Vec3::new(x, y, z);
    let walls = vec![
        // floor, ceiling, back
        quad(factory, &mut scene, [v(-1., 0., -1.), v(-1., 0., 1.), v(1., 0., 1.), v(1., 0., -1.)], white, false)?,
        quad(factory, &mut scene, [v(-1., 2., -1.), v(1., 2., -1.), v(1., 2., 1.), v(-1., 2., 1.)], white, false)?,
        quad(factory, &mut scene, [v(-1., 0., -1.), v(1., 0., -1.), v(1., 2., -1.), v(-1., 2., -1.)], white, false)?,
        quad(factory, &mut scene, [v(-1., 0., -1.), v(-1., 2., -1.), v(-1., 2., 1.), v(-1., 0., 1.)], red, false)?,
        quad(factory, &mut scene, [v(1., 0., -1.), v(1., 0., 1.), v(1., 2., 1.), v(1., 2., -1.)], green, false)?,
    ];
    let room = factory.create_mesh(&mut scene, walls)?;
    scene.add_instance(room, Mat4::IDENTITY, EmissionMode::Enabled)?;

    // Faces down.
    let lamp = quad(
        factory,
        &mut scene,
        [v(-0.25, 1.98, -0.25), v(0.25, 1.98, -0.25), v(0.25, 1.98, 0.25), v(-0.25, 1.98, 0.25)],
        light,
        true,
    )?;
    let lamp = factory.create_mesh(&mut scene, vec![lamp])?;
    scene.add_instance(lamp, Mat4::IDENTITY, EmissionMode::Enabled)?;

    let block = unit_box(factory, &mut scene, white)?;
    let block = factory.create_mesh(&mut scene, vec![block])?;
    scene.add_instance(
        block,
        Mat4::from_scale_rotation_translation(
            Vec3::new(0.6, 1.2, 0.6),
            Quat::from_rotation_y(0.3),
            Vec3::new(-0.35, 0.6, -0.3),
        ),
        EmissionMode::Disabled,
    )?;
    scene.add_instance(
        block,
        Mat4::from_scale_rotation_translation(
            Vec3::splat(0.6),
            Quat::from_rotation_y(-0.3),
            Vec3::new(0.35, 0.3, 0.35),
        ),
        EmissionMode::Disabled,
    )?;

    if let Some(density) = options.fog_density {
        let fog = factory.create_volume(
            &mut scene,
            VolumeDesc {
                bounds: BBox3f::new(v(-1.0, 0.0, -1.0), v(1.0, 2.0, 1.0)),
                density,
            },
        )?;
        scene.add_volume_instance(fog, Mat4::IDENTITY)?;
    }

    scene.camera = Camera::look_at(v(0.0, 1.0, 3.9), v(0.0, 1.0, 0.0), 40.0);
    Ok(scene)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;
    use crate::buffers::AtomicBuffer;
    use crate::scene::BackendResourceFactory;
    use std::sync::Arc;

    #[test]
    fn test_cornell_box_has_one_downward_light() {
        let factory = BackendResourceFactory::new(Arc::new(CpuBackend::new()));
        let mut scene = cornell_box(&factory, CornellOptions::default()).unwrap();
        let table = scene.build_table();
        // Five walls, the lamp, two blocks.
        assert_eq!(table.len(), 8);

        let mut lights = AtomicBuffer::new("lights", scene.table_triangle_count());
        scene.collect_lights(&lights);
        let lights = lights.as_slice();
        assert_eq!(lights.len(), 2);
        for light in lights {
            assert!(light.normal().y < -0.99);
            assert_eq!(light.radiance(), LIGHT_RADIANCE);
        }
    }

    #[test]
    fn test_fog_adds_volume_entry() {
        let factory = BackendResourceFactory::new(Arc::new(CpuBackend::new()));
        let mut scene = cornell_box(
            &factory,
            CornellOptions {
                fog_density: Some(0.05),
            },
        )
        .unwrap();
        assert_eq!(scene.build_table().len(), 9);
        assert_eq!(scene.volume_instances().len(), 1);
    }
}
