// SPDX-License-Identifier: CEPL-1.0
//! Fixed-function state, descriptor-set layout and the graphics pipeline.
use std::fmt;
use std::io::Cursor;
use std::mem::{offset_of, size_of};

use ash::vk;
use prism_render::Vertex;
use tracing::debug;

use crate::device::{Owned, SharedDevice};
use crate::error::{GpuError, GpuResult};
use crate::render_pass::RenderPass;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    CombinedImageSampler,
}

impl DescriptorKind {
    pub fn vk_type(self) -> vk::DescriptorType {
        match self {
            DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// One entry of the shader resource contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorBinding {
    pub slot: u32,
    pub kind: DescriptorKind,
    pub stages: vk::ShaderStageFlags,
}

impl DescriptorBinding {
    pub const fn new(slot: u32, kind: DescriptorKind, stages: vk::ShaderStageFlags) -> Self {
        Self { slot, kind, stages }
    }
}

/// A descriptor-set layout built from an ordered binding list.
pub struct DescriptorLayout {
    handle: Owned<vk::DescriptorSetLayout>,
    bindings: Vec<DescriptorBinding>,
}

impl DescriptorLayout {
    pub fn new(device: &SharedDevice, bindings: &[DescriptorBinding]) -> GpuResult<Self> {
        for (i, b) in bindings.iter().enumerate() {
            if bindings[..i].iter().any(|prev| prev.slot == b.slot) {
                return Err(GpuError::InvalidInput(format!(
                    "descriptor slot {} bound twice",
                    b.slot
                )));
            }
        }
        let raw: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| vk::DescriptorSetLayoutBinding {
                binding: b.slot,
                descriptor_type: b.kind.vk_type(),
                descriptor_count: 1,
                stage_flags: b.stages,
                ..Default::default()
            })
            .collect();
        let ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: raw.len() as u32,
            p_bindings: raw.as_ptr(),
            ..Default::default()
        };
        let layout = unsafe { device.create_descriptor_set_layout(&ci) }
            .map_err(GpuError::creation("descriptor set layout"))?;
        Ok(Self {
            handle: Owned::new(device.clone(), layout, |d, l| unsafe {
                d.destroy_descriptor_set_layout(l)
            }),
            bindings: bindings.to_vec(),
        })
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle.get()
    }

    pub fn bindings(&self) -> &[DescriptorBinding] {
        &self.bindings
    }
}

impl fmt::Debug for DescriptorLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorLayout")
            .field("handle", &self.handle)
            .field("bindings", &self.bindings)
            .finish()
    }
}

/// SPIR-V for the two programmable stages. Both use `main` as entry point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderSet {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderSet {
    pub fn new(vertex: Vec<u32>, fragment: Vec<u32>) -> Self {
        Self { vertex, fragment }
    }

    /// Decodes raw `.spv` file contents; the length must be a multiple of four.
    pub fn from_spv_bytes(vertex: &[u8], fragment: &[u8]) -> GpuResult<Self> {
        let decode = |bytes: &[u8], stage: &str| {
            ash::util::read_spv(&mut Cursor::new(bytes))
                .map_err(|e| GpuError::InvalidInput(format!("{stage} shader is not SPIR-V: {e}")))
        };
        Ok(Self {
            vertex: decode(vertex, "vertex")?,
            fragment: decode(fragment, "fragment")?,
        })
    }
}

/// Knobs of the otherwise fixed pipeline state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineSettings {
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_test: false,
            depth_write: false,
        }
    }
}

pub fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

/// position, color, uv at locations 0, 1, 2.
pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, pos) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset_of!(Vertex, color) as u32,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: offset_of!(Vertex, uv) as u32,
        },
    ]
}

pub const DYNAMIC_STATES: [vk::DynamicState; 2] =
    [vk::DynamicState::VIEWPORT, vk::DynamicState::LINE_WIDTH];

pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// An immutable graphics pipeline and its layout. Rebuilt, never mutated,
/// when the extent or shaders change.
pub struct GraphicsPipeline {
    pipeline: Owned<vk::Pipeline>,
    layout: Owned<vk::PipelineLayout>,
    extent: vk::Extent2D,
}

impl GraphicsPipeline {
    pub fn build(
        device: &SharedDevice,
        render_pass: &RenderPass,
        extent: vk::Extent2D,
        shaders: &ShaderSet,
        descriptors: &DescriptorLayout,
        settings: &PipelineSettings,
    ) -> GpuResult<Self> {
        // modules only need to outlive pipeline creation
        let vs = shader_module(device, &shaders.vertex, "vertex shader module")?;
        let fs = shader_module(device, &shaders.fragment, "fragment shader module")?;
        let entry = c"main";

        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs.get(),
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs.get(),
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        let vb = vertex_binding();
        let va = vertex_attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &vb,
            vertex_attribute_description_count: va.len() as u32,
            p_vertex_attribute_descriptions: va.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart_enable: vk::FALSE,
            ..Default::default()
        };

        let viewport = full_viewport(extent);
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            p_viewports: &viewport,
            scissor_count: 1,
            p_scissors: &scissor,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: settings.cull_mode,
            front_face: settings.front_face,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            min_sample_shading: 1.0,
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: settings.depth_test.into(),
            depth_write_enable: settings.depth_write.into(),
            depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
            max_depth_bounds: 1.0,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: DYNAMIC_STATES.len() as u32,
            p_dynamic_states: DYNAMIC_STATES.as_ptr(),
            ..Default::default()
        };

        let set_layout = descriptors.handle();
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &set_layout,
            ..Default::default()
        };
        let layout = unsafe { device.create_pipeline_layout(&layout_info) }
            .map_err(GpuError::creation("pipeline layout"))?;
        let layout = Owned::new(device.clone(), layout, |d, l| unsafe {
            d.destroy_pipeline_layout(l)
        });

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: layout.get(),
            render_pass: render_pass.handle(),
            subpass: 0,
            ..Default::default()
        };
        let pipeline = unsafe { device.create_graphics_pipeline(&pipeline_info) }
            .map_err(GpuError::creation("graphics pipeline"))?;
        let pipeline = Owned::new(device.clone(), pipeline, |d, p| unsafe {
            d.destroy_pipeline(p)
        });
        drop((vs, fs));

        debug!(
            width = extent.width,
            height = extent.height,
            depth_test = settings.depth_test,
            "graphics pipeline built"
        );
        Ok(Self {
            pipeline,
            layout,
            extent,
        })
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline.get()
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout.get()
    }

    /// Extent baked into the static scissor.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl fmt::Debug for GraphicsPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsPipeline")
            .field("pipeline", &self.pipeline)
            .field("layout", &self.layout)
            .field("extent", &self.extent)
            .finish()
    }
}

fn shader_module(
    device: &SharedDevice,
    code: &[u32],
    what: &'static str,
) -> GpuResult<Owned<vk::ShaderModule>> {
    if code.is_empty() {
        return Err(GpuError::InvalidInput(format!("{what}: empty SPIR-V")));
    }
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    let module = unsafe { device.create_shader_module(&ci) }.map_err(GpuError::creation(what))?;
    Ok(Owned::new(device.clone(), module, |d, m| unsafe {
        d.destroy_shader_module(m)
    }))
}
