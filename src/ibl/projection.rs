//! Fixed camera rig for rendering the six cube faces.

use glam::{Mat4, Vec3};

use crate::backend::{AttachmentTarget, CubeFace, RenderContext, TextureHandle, UniformValue};
use crate::error::IblResult;
use crate::shader::{UNIFORM_PROJECTION, UNIFORM_VIEW};

use super::CaptureTarget;

const CAPTURE_FOV_DEGREES: f32 = 90.0;
const CAPTURE_NEAR: f32 = 0.1;
const CAPTURE_FAR: f32 = 10.0;

/// 90 degree projection plus one view per cube face.
///
/// Built once per bake. Only the capture resolution changes between passes.
#[derive(Debug, Clone)]
pub struct CubeProjectionRig {
    projection: Mat4,
    views: [Mat4; 6],
}

impl Default for CubeProjectionRig {
    fn default() -> Self {
        Self::new()
    }
}

impl CubeProjectionRig {
    pub fn new() -> Self {
        // Framebuffer row 0 is the top of the face image, so clip space y is
        // flipped relative to the usual right-handed projection.
        let projection = Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0))
            * Mat4::perspective_rh(
                CAPTURE_FOV_DEGREES.to_radians(),
                1.0,
                CAPTURE_NEAR,
                CAPTURE_FAR,
            );
        let views = CubeFace::ALL.map(|face| Mat4::look_at_rh(Vec3::ZERO, face.direction(), face.up()));
        Self { projection, views }
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self, face: CubeFace) -> Mat4 {
        self.views[face.layer() as usize]
    }

    pub fn views(&self) -> &[Mat4; 6] {
        &self.views
    }

    /// Upload the projection to the current program.
    pub fn upload_projection(&self, ctx: &mut dyn RenderContext) -> IblResult<()> {
        ctx.set_uniform(UNIFORM_PROJECTION, UniformValue::Mat4(self.projection))?;
        Ok(())
    }

    /// Render the current program into all six faces of `cubemap` at `mip`.
    ///
    /// The capture target must already be sized to that mip's extent.
    pub fn render_faces(
        &self,
        ctx: &mut dyn RenderContext,
        capture: &CaptureTarget,
        cubemap: TextureHandle,
        mip: u32,
    ) -> IblResult<()> {
        for face in CubeFace::ALL {
            ctx.set_uniform(UNIFORM_VIEW, UniformValue::Mat4(self.view(face)))?;
            capture.attach_color(
                ctx,
                AttachmentTarget::CubeFace {
                    texture: cubemap,
                    face,
                    mip,
                },
            )?;
            capture.clear(ctx)?;
            ctx.draw_unit_cube()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec4};

    fn clip(rig: &CubeProjectionRig, face: CubeFace, dir: Vec3) -> Vec3 {
        let clip = rig.projection() * rig.view(face) * Vec4::new(dir.x, dir.y, dir.z, 1.0);
        clip.truncate() / clip.w
    }

    #[test]
    fn test_face_direction_projects_to_centre() {
        let rig = CubeProjectionRig::new();
        for face in CubeFace::ALL {
            let ndc = clip(&rig, face, face.direction());
            assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5, "{face:?}: {ndc}");
            assert!((0.0..=1.0).contains(&ndc.z));
        }
    }

    #[test]
    fn test_face_corners_land_on_ndc_corners() {
        let rig = CubeProjectionRig::new();
        for face in CubeFace::ALL {
            for (u, v) in [(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0), (1.0, 1.0)] {
                let ndc = clip(&rig, face, face.texel_direction(u, v));
                // Texel v grows downwards, NDC y grows upwards.
                let expected = Vec2::new(u, -v);
                assert!(
                    (ndc.truncate() - expected).length() < 1e-4,
                    "{face:?} corner ({u}, {v}) -> {ndc}"
                );
            }
        }
    }

    #[test]
    fn test_six_frustums_tile_the_sphere() {
        let rig = CubeProjectionRig::new();
        let mut inside_counts = Vec::new();
        for i in 0..64 {
            for j in 1..32 {
                let phi = i as f32 / 64.0 * std::f32::consts::TAU + 0.013;
                let theta = j as f32 / 32.0 * std::f32::consts::PI + 0.007;
                let dir = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
                let count = CubeFace::ALL
                    .iter()
                    .filter(|&&face| {
                        let view_space = rig.view(face).transform_point3(dir);
                        if view_space.z >= 0.0 {
                            return false;
                        }
                        let ndc = clip(&rig, face, dir);
                        ndc.x.abs() < 1.0 && ndc.y.abs() < 1.0
                    })
                    .count();
                inside_counts.push(count);
            }
        }
        assert!(inside_counts.iter().all(|&c| c == 1));
    }

    #[test]
    fn test_views_are_constant() {
        let a = CubeProjectionRig::new();
        let b = CubeProjectionRig::default();
        assert_eq!(a.views(), b.views());
        assert_eq!(a.projection(), b.projection());
    }
}
