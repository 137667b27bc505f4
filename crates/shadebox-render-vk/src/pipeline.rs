// SPDX-License-Identifier: CEPL-1.0
//! Graphics pipeline for the full-screen pass, and the slot holding the
//! active one.
use crate::error::PipelineBuildError;
use ash::vk;
use shadebox_render::spirv::SpirvModule;
use shadebox_render::{ShaderProgram, ShaderStage};
use std::ffi::CStr;
use tracing::info;

const ENTRY: &CStr = c"main";
/// Two triangles, no vertex buffer.
pub const QUAD_VERTICES: u32 = 6;

pub struct Pipeline {
    pub set_layout: vk::DescriptorSetLayout,
    pub layout: vk::PipelineLayout,
    pub handle: vk::Pipeline,
}

impl Pipeline {
    /// # Safety
    /// No pending GPU work may use the pipeline.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_pipeline(self.handle, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

/// Exactly one value is installed at a time. A replacement is built while the
/// current value is still installed and only swapped in on success.
pub struct Active<T> {
    current: T,
}

impl<T> Active<T> {
    pub fn new(current: T) -> Self {
        Self { current }
    }

    pub fn get(&self) -> &T {
        &self.current
    }

    /// On `Err` nothing changes and `retire` is not called. On `Ok` the
    /// previous value goes to `retire`.
    pub fn try_replace<E>(
        &mut self,
        build: impl FnOnce(&T) -> Result<T, E>,
        retire: impl FnOnce(T),
    ) -> Result<(), E> {
        let next = build(&self.current)?;
        retire(std::mem::replace(&mut self.current, next));
        Ok(())
    }

}

/// Stage mask for binding 0; the geometry stage reads it too when present.
pub fn uniform_stages(has_geometry: bool) -> vk::ShaderStageFlags {
    let base = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
    if has_geometry {
        base | vk::ShaderStageFlags::GEOMETRY
    } else {
        base
    }
}

/// 0: uniform block, 1: `iChannel0`, 2: `iChannel1` (feedback).
pub fn set_layout_bindings(has_geometry: bool) -> [vk::DescriptorSetLayoutBinding<'static>; 3] {
    let binding = |binding, descriptor_type, stage_flags| vk::DescriptorSetLayoutBinding {
        binding,
        descriptor_type,
        descriptor_count: 1,
        stage_flags,
        ..Default::default()
    };
    [
        binding(
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
            uniform_stages(has_geometry),
        ),
        binding(
            1,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        ),
        binding(
            2,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        ),
    ]
}

/// Picks the module for each stage, in pipeline order, and checks that each
/// declares a `main` entry point for the stage it is bound to. Runs before
/// any GPU call.
pub fn stage_modules<'a>(
    program: &'a ShaderProgram,
    builtin_vertex: &'a SpirvModule,
) -> Result<Vec<(ShaderStage, &'a SpirvModule)>, PipelineBuildError> {
    let mut stages = vec![(
        ShaderStage::Vertex,
        program.vertex.as_ref().unwrap_or(builtin_vertex),
    )];
    if let Some(geometry) = &program.geometry {
        stages.push((ShaderStage::Geometry, geometry));
    }
    stages.push((ShaderStage::Fragment, &program.fragment));

    for (stage, module) in &stages {
        module
            .require_entry_point(*stage, "main")
            .map_err(|source| PipelineBuildError::Stage {
                stage: *stage,
                source,
            })?;
    }
    Ok(stages)
}

fn stage_flag(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
    }
}

fn vk_err(op: &'static str) -> impl FnOnce(vk::Result) -> PipelineBuildError {
    move |result| PipelineBuildError::Vk { op, result }
}

/// Builds the pipeline for `program`. On error every object created along
/// the way has been destroyed again.
///
/// # Safety
/// `render_pass` must be live on `device`.
pub unsafe fn build(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    program: &ShaderProgram,
    builtin_vertex: &SpirvModule,
) -> Result<Pipeline, PipelineBuildError> {
    let stages = stage_modules(program, builtin_vertex)?;
    let has_geometry = program.has_geometry();

    // 1) Descriptor set layout + pipeline layout
    let bindings = set_layout_bindings(has_geometry);
    let set_ci = vk::DescriptorSetLayoutCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
        binding_count: bindings.len() as u32,
        p_bindings: bindings.as_ptr(),
        ..Default::default()
    };
    let set_layout = unsafe { device.create_descriptor_set_layout(&set_ci, None) }
        .map_err(vk_err("vkCreateDescriptorSetLayout"))?;
    let layout_ci = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: 1,
        p_set_layouts: &set_layout,
        ..Default::default()
    };
    let layout = match unsafe { device.create_pipeline_layout(&layout_ci, None) } {
        Ok(l) => l,
        Err(e) => {
            unsafe { device.destroy_descriptor_set_layout(set_layout, None) };
            return Err(vk_err("vkCreatePipelineLayout")(e));
        }
    };
    let discard_layouts = || unsafe {
        device.destroy_pipeline_layout(layout, None);
        device.destroy_descriptor_set_layout(set_layout, None);
    };

    // 2) Shader modules (destroyed before return)
    let mut modules = Vec::with_capacity(stages.len());
    for (stage, module) in &stages {
        let words = module.words();
        let ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            p_code: words.as_ptr(),
            code_size: std::mem::size_of_val(words),
            ..Default::default()
        };
        match unsafe { device.create_shader_module(&ci, None) } {
            Ok(m) => modules.push((*stage, m)),
            Err(e) => {
                for (_, m) in &modules {
                    unsafe { device.destroy_shader_module(*m, None) };
                }
                discard_layouts();
                return Err(vk_err("vkCreateShaderModule")(e));
            }
        }
    }

    // 3) Pipeline
    let result = unsafe { create_graphics_pipeline(device, render_pass, layout, &modules) };
    for (_, m) in &modules {
        unsafe { device.destroy_shader_module(*m, None) };
    }
    match result {
        Ok(handle) => {
            info!(
                "vk: pipeline for `{}` ({} stages{})",
                program.name,
                modules.len(),
                if has_geometry { ", geometry" } else { "" }
            );
            Ok(Pipeline {
                set_layout,
                layout,
                handle,
            })
        }
        Err(e) => {
            discard_layouts();
            Err(e)
        }
    }
}

unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    modules: &[(ShaderStage, vk::ShaderModule)],
) -> Result<vk::Pipeline, PipelineBuildError> {
    let stages: Vec<_> = modules
        .iter()
        .map(|&(stage, module)| vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: stage_flag(stage),
            module,
            p_name: ENTRY.as_ptr(),
            ..Default::default()
        })
        .collect();

    // Vertices come from gl_VertexIndex.
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        ..Default::default()
    };
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: vk::CullModeFlags::NONE,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        blend_enable: vk::FALSE,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    match unsafe {
        device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        )
    } {
        Ok(p) => Ok(p[0]),
        Err((_, result)) => Err(PipelineBuildError::Vk {
            op: "vkCreateGraphicsPipelines",
            result,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shadebox_render::spirv::MAGIC;
    use std::path::PathBuf;

    /// Header plus one `OpEntryPoint <model> %1 "main"`.
    fn module(stage: ShaderStage) -> SpirvModule {
        let name = u32::from_le_bytes(*b"main");
        let words = vec![
            MAGIC,
            0x0001_0000,
            0,
            2,
            0,
            (5 << 16) | 15,
            stage.execution_model(),
            1,
            name,
            0,
        ];
        SpirvModule::from_words(words).unwrap()
    }

    fn program(
        vertex: Option<SpirvModule>,
        geometry: Option<SpirvModule>,
        fragment: SpirvModule,
    ) -> ShaderProgram {
        ShaderProgram {
            name: "t".into(),
            fragment,
            vertex,
            geometry,
            fragment_artifact: PathBuf::from("t.frag.spv"),
            texture: None,
        }
    }

    #[test]
    fn geometry_widens_uniform_binding_only() {
        let plain = set_layout_bindings(false);
        let geom = set_layout_bindings(true);
        assert!(!plain[0].stage_flags.contains(vk::ShaderStageFlags::GEOMETRY));
        assert_eq!(
            geom[0].stage_flags,
            vk::ShaderStageFlags::VERTEX
                | vk::ShaderStageFlags::FRAGMENT
                | vk::ShaderStageFlags::GEOMETRY
        );
        for b in [&plain[1], &plain[2], &geom[1], &geom[2]] {
            assert_eq!(b.stage_flags, vk::ShaderStageFlags::FRAGMENT);
            assert_eq!(b.descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        }
        assert_eq!(plain[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
    }

    #[test]
    fn builtin_vertex_fills_in_when_missing() {
        let builtin = module(ShaderStage::Vertex);
        let p = program(None, None, module(ShaderStage::Fragment));
        let stages = stage_modules(&p, &builtin).unwrap();
        let order: Vec<_> = stages.iter().map(|(s, _)| *s).collect();
        assert_eq!(order, [ShaderStage::Vertex, ShaderStage::Fragment]);
        assert!(std::ptr::eq(stages[0].1, &builtin));
    }

    #[test]
    fn geometry_sits_between_vertex_and_fragment() {
        let builtin = module(ShaderStage::Vertex);
        let p = program(
            Some(module(ShaderStage::Vertex)),
            Some(module(ShaderStage::Geometry)),
            module(ShaderStage::Fragment),
        );
        let order: Vec<_> = stage_modules(&p, &builtin)
            .unwrap()
            .iter()
            .map(|(s, _)| *s)
            .collect();
        assert_eq!(
            order,
            [ShaderStage::Vertex, ShaderStage::Geometry, ShaderStage::Fragment]
        );
    }

    #[test]
    fn stage_mismatch_is_rejected_before_the_gpu() {
        let builtin = module(ShaderStage::Vertex);
        // A vertex module in the fragment slot.
        let p = program(None, None, module(ShaderStage::Vertex));
        assert!(matches!(
            stage_modules(&p, &builtin),
            Err(PipelineBuildError::Stage {
                stage: ShaderStage::Fragment,
                ..
            })
        ));
    }

    #[test]
    fn failed_replacement_keeps_current() {
        let mut active = Active::new(1);
        let mut retired = Vec::new();
        let r: Result<(), &str> = active.try_replace(|_| Err("bad"), |old| retired.push(old));
        assert_eq!(r, Err("bad"));
        assert_eq!(*active.get(), 1);
        assert!(retired.is_empty());
    }

    #[test]
    fn successful_replacement_retires_old_once() {
        let mut active = Active::new(1);
        let mut retired = Vec::new();
        active
            .try_replace(|cur| Ok::<_, ()>(cur + 1), |old| retired.push(old))
            .unwrap();
        active
            .try_replace(|cur| Ok::<_, ()>(cur + 1), |old| retired.push(old))
            .unwrap();
        assert_eq!(*active.get(), 3);
        assert_eq!(retired, [1, 2]);
    }
}
