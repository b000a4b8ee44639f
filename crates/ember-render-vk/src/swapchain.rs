// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use ember_render::RenderSize;
use tracing::info;

use crate::device::DeviceContext;
use crate::error::{ResultExt, VkResult};
use crate::gpu::{Gpu, ImageDesc};
use crate::memory::GpuImage;

const FALLBACK_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::R8G8B8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// An `UNDEFINED` (or missing) list means the surface takes anything.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    match formats {
        [] => FALLBACK_FORMAT,
        [only] if only.format == vk::Format::UNDEFINED => FALLBACK_FORMAT,
        _ => formats
            .iter()
            .copied()
            .find(|f| {
                matches!(
                    f.format,
                    vk::Format::R8G8B8A8_UNORM | vk::Format::B8G8R8A8_UNORM
                ) && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .unwrap_or(formats[0]),
    }
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR], prefer_mailbox: bool) -> vk::PresentModeKHR {
    if prefer_mailbox && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum; `max_image_count == 0` means unbounded.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

pub unsafe fn pick_depth_format(ctx: &DeviceContext) -> vk::Format {
    // Prefer 32f, then 24+S8, then 16
    let candidates = [
        vk::Format::D32_SFLOAT,
        vk::Format::D24_UNORM_S8_UINT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D16_UNORM,
    ];
    for &fmt in &candidates {
        let props = ctx
            .instance()
            .get_physical_device_format_properties(ctx.phys, fmt);
        if props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        {
            return fmt;
        }
    }
    vk::Format::D32_SFLOAT
}

/// Presentable images with their views, a shared depth buffer and, once
/// attached to a render pass, one framebuffer per image.
#[derive(Default)]
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: Option<GpuImage>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl Swapchain {
    /// `old` is handed to the driver for reuse; the caller still destroys it.
    pub unsafe fn new(
        ctx: &DeviceContext,
        size: RenderSize,
        prefer_mailbox: bool,
        depth_format: vk::Format,
        old: vk::SwapchainKHR,
    ) -> VkResult<Self> {
        let loader = ctx.surface_loader();
        let surface = ctx.surface();
        let caps = loader
            .get_physical_device_surface_capabilities(ctx.phys, surface)
            .creating("get_physical_device_surface_capabilities")?;
        let formats = loader
            .get_physical_device_surface_formats(ctx.phys, surface)
            .creating("get_physical_device_surface_formats")?;
        let modes = loader
            .get_physical_device_surface_present_modes(ctx.phys, surface)
            .creating("get_physical_device_surface_present_modes")?;

        let format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&modes, prefer_mailbox);
        let extent = choose_extent(&caps, size);
        let image_count = choose_image_count(&caps);

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let families = ctx.families();
        let family_indices = families.unique();
        let sharing = families.sharing_mode();
        let (index_count, p_indices) = if sharing == vk::SharingMode::CONCURRENT {
            (family_indices.len() as u32, family_indices.as_ptr())
        } else {
            (0, std::ptr::null())
        };

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface,
            min_image_count: image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing,
            queue_family_index_count: index_count,
            p_queue_family_indices: p_indices,
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };
        let handle = ctx
            .swapchain_loader
            .create_swapchain(&info, None)
            .creating("create_swapchain")?;

        let mut chain = Self {
            handle,
            format,
            present_mode,
            extent,
            images: Vec::new(),
            views: Vec::new(),
            depth: None,
            framebuffers: Vec::new(),
        };
        if let Err(e) = chain.populate(ctx, depth_format) {
            chain.destroy(ctx);
            return Err(e);
        }

        info!(
            "swapchain {}x{} {:?}/{:?} {:?}, {} images (min {})",
            extent.width,
            extent.height,
            format.format,
            format.color_space,
            present_mode,
            chain.images.len(),
            caps.min_image_count
        );
        Ok(chain)
    }

    unsafe fn populate(&mut self, ctx: &DeviceContext, depth_format: vk::Format) -> VkResult<()> {
        self.images = ctx
            .swapchain_loader
            .get_swapchain_images(self.handle)
            .creating("get_swapchain_images")?;
        for &image in &self.images {
            let view = ctx
                .create_image_view(image, self.format.format, vk::ImageAspectFlags::COLOR)
                .creating("create_image_view(swapchain)")?;
            self.views.push(view);
        }
        self.depth = Some(GpuImage::new(
            ctx,
            &ImageDesc {
                extent: self.extent,
                format: depth_format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            },
            vk::ImageAspectFlags::DEPTH,
        )?);
        Ok(())
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    /// Builds one framebuffer per image for `render_pass`, replacing any existing ones.
    pub unsafe fn attach(&mut self, ctx: &DeviceContext, render_pass: vk::RenderPass) -> VkResult<()> {
        self.destroy_framebuffers(ctx);
        let depth_view = self
            .depth
            .as_ref()
            .map_or(vk::ImageView::null(), |d| d.view);

        for &view in &self.views {
            let attachments = [view, depth_view];
            let info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            match ctx.device.create_framebuffer(&info, None) {
                Ok(fb) => self.framebuffers.push(fb),
                Err(result) => {
                    self.destroy_framebuffers(ctx);
                    return Err::<(), _>(result).creating("create_framebuffer");
                }
            }
        }
        Ok(())
    }

    unsafe fn destroy_framebuffers(&mut self, ctx: &DeviceContext) {
        for fb in self.framebuffers.drain(..) {
            ctx.device.destroy_framebuffer(fb, None);
        }
    }

    /// Framebuffers, views, depth buffer, then the swapchain itself.
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        self.destroy_framebuffers(ctx);
        for view in self.views.drain(..) {
            ctx.destroy_image_view(view);
        }
        if let Some(depth) = self.depth.take() {
            depth.destroy(ctx);
        }
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            ctx.swapchain_loader.destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
    }
}
