//! Shared offscreen render target for every bake pass.

use crate::backend::{
    AttachmentTarget, BackendError, FramebufferHandle, RenderContext, RenderbufferHandle,
};
use crate::error::IblResult;

use super::CAPTURE_CLEAR_COLOR;

/// One framebuffer plus one depth renderbuffer, resized between passes.
///
/// Only the bake orchestrator touches it. After [`CaptureTarget::release`]
/// the default framebuffer is bound again.
#[derive(Debug)]
pub struct CaptureTarget {
    framebuffer: FramebufferHandle,
    renderbuffer: RenderbufferHandle,
    size: Option<(u32, u32)>,
}

impl CaptureTarget {
    /// Create the framebuffer and its depth renderbuffer.
    ///
    /// Failure here is fatal for the bake; the error names the resource.
    pub fn new(ctx: &mut dyn RenderContext) -> IblResult<Self> {
        let framebuffer = ctx.create_framebuffer().map_err(|e| {
            log::error!("Capture framebuffer creation failed: {}", e);
            e
        })?;
        let renderbuffer = ctx.create_renderbuffer().map_err(|e| {
            log::error!("Capture renderbuffer creation failed: {}", e);
            e
        })?;
        log::trace!(
            "Created capture target (framebuffer {:?}, renderbuffer {:?})",
            framebuffer,
            renderbuffer
        );
        Ok(Self {
            framebuffer,
            renderbuffer,
            size: None,
        })
    }

    /// Resolution set by the last [`CaptureTarget::bind_for_size`].
    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }

    /// Bind the target, reallocate depth storage and resize the viewport.
    pub fn bind_for_size(
        &mut self,
        ctx: &mut dyn RenderContext,
        width: u32,
        height: u32,
    ) -> IblResult<()> {
        ctx.bind_framebuffer(Some(self.framebuffer))?;
        ctx.renderbuffer_storage(self.renderbuffer, width, height)?;
        ctx.attach_depth(self.framebuffer, self.renderbuffer)?;
        ctx.set_viewport(width, height);
        self.size = Some((width, height));
        log::debug!("Capture target resized to {}x{}", width, height);
        Ok(())
    }

    /// Attach a cube face or 2D texture level as color attachment 0.
    pub fn attach_color(
        &self,
        ctx: &mut dyn RenderContext,
        target: AttachmentTarget,
    ) -> IblResult<()> {
        if self.size.is_none() {
            return Err(BackendError::InvalidOperation(
                "capture target attached before it was sized".into(),
            )
            .into());
        }
        ctx.attach_color(self.framebuffer, target)?;
        Ok(())
    }

    /// Clear color and depth before a capture draw.
    pub fn clear(&self, ctx: &mut dyn RenderContext) -> IblResult<()> {
        ctx.clear(CAPTURE_CLEAR_COLOR)?;
        Ok(())
    }

    /// Restore the default framebuffer.
    pub fn release(&mut self, ctx: &mut dyn RenderContext) -> IblResult<()> {
        ctx.bind_framebuffer(None)?;
        self.size = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::faulty::{FaultyBackend, Faults};
    use crate::backend::software::SoftwareBackend;
    use crate::backend::{CubeFace, TextureDescriptor, TextureFormat};
    use crate::error::IblError;

    #[test]
    fn test_attach_before_sizing_fails() {
        let mut ctx = SoftwareBackend::new();
        let capture = CaptureTarget::new(&mut ctx).unwrap();
        let cube = ctx
            .create_texture(&TextureDescriptor::new_cube(4, TextureFormat::Rgba16Float))
            .unwrap();
        let result = capture.attach_color(
            &mut ctx,
            AttachmentTarget::CubeFace {
                texture: cube,
                face: CubeFace::PositiveX,
                mip: 0,
            },
        );
        assert!(matches!(
            result,
            Err(IblError::Backend(BackendError::InvalidOperation(_)))
        ));
    }

    #[test]
    fn test_resize_between_passes() {
        let mut ctx = SoftwareBackend::new();
        let mut capture = CaptureTarget::new(&mut ctx).unwrap();
        let cube = ctx
            .create_texture(
                &TextureDescriptor::new_cube(8, TextureFormat::Rgba16Float).with_mip_levels(2),
            )
            .unwrap();

        capture.bind_for_size(&mut ctx, 8, 8).unwrap();
        capture
            .attach_color(
                &mut ctx,
                AttachmentTarget::CubeFace { texture: cube, face: CubeFace::NegativeY, mip: 0 },
            )
            .unwrap();
        capture.clear(&mut ctx).unwrap();

        capture.bind_for_size(&mut ctx, 4, 4).unwrap();
        assert_eq!(capture.size(), Some((4, 4)));
        capture
            .attach_color(
                &mut ctx,
                AttachmentTarget::CubeFace { texture: cube, face: CubeFace::NegativeY, mip: 1 },
            )
            .unwrap();
        capture.clear(&mut ctx).unwrap();

        let texels = ctx.read_texture(cube, CubeFace::NegativeY.layer(), 1).unwrap();
        assert_eq!(texels.len(), 16);
        assert!(texels.iter().all(|t| *t == CAPTURE_CLEAR_COLOR));
    }

    #[test]
    fn test_creation_failure_is_reported() {
        let mut ctx = FaultyBackend::new(Faults {
            framebuffer: true,
            ..Default::default()
        });
        assert!(matches!(
            CaptureTarget::new(&mut ctx),
            Err(IblError::Backend(BackendError::FramebufferCreationFailed(_)))
        ));

        let mut ctx = FaultyBackend::new(Faults {
            renderbuffer: true,
            ..Default::default()
        });
        assert!(matches!(
            CaptureTarget::new(&mut ctx),
            Err(IblError::Backend(BackendError::RenderbufferCreationFailed(_)))
        ));
    }

    #[test]
    fn test_release_restores_default_framebuffer() {
        let mut ctx = SoftwareBackend::new();
        let mut capture = CaptureTarget::new(&mut ctx).unwrap();
        capture.bind_for_size(&mut ctx, 2, 2).unwrap();
        capture.release(&mut ctx).unwrap();
        assert_eq!(capture.size(), None);
        // Nothing is bound, so a clear has no target.
        assert!(ctx.clear([0.0; 4]).is_err());
    }
}
