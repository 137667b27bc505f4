use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Built-in vertex stage: six vertices covering the viewport, no vertex
    // buffer. fragCoord is in pixels with a top-left origin,
    // matching gl_FragCoord and the cursor.
    // Block offsets must stay in step with `UniformBlock`.
    let vs_src = r#"
#version 450
layout(binding = 0) uniform ShaderInputs {
    layout(offset = 0) vec3 iResolution;
    layout(offset = 16) float iTime;
};

layout(location = 0) out vec2 fragCoord;

const vec2 CORNERS[6] = vec2[](
    vec2(-1.0, -1.0), vec2(1.0, -1.0), vec2(1.0, 1.0),
    vec2(-1.0, -1.0), vec2(1.0, 1.0), vec2(-1.0, 1.0)
);

void main() {
    vec2 p = CORNERS[gl_VertexIndex];
    gl_Position = vec4(p, 0.0, 1.0);
    // clip-space +y points down in Vulkan, so y = -1 is the top row
    fragCoord = (p + 1.0) * 0.5 * iResolution.xy;
}
"#;

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let vs_spv = comp
        .compile_into_spirv(
            vs_src,
            shaderc::ShaderKind::Vertex,
            "fullscreen.vert",
            "main",
            Some(&opts),
        )
        .unwrap();

    fs::write(out.join("fullscreen.vert.spv"), vs_spv.as_binary_u8()).unwrap();

    println!("cargo:rerun-if-changed=build.rs");
}
