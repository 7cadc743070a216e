// SPDX-License-Identifier: CEPL-1.0
use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

    // Vertex layout mirrors prism_render::Vertex:
    //   location 0: R32G32B32_SFLOAT (pos)
    //   location 1: R32G32B32_SFLOAT (color)
    //   location 2: R32G32_SFLOAT    (uv)
    let vs_src = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inColor;
layout(location = 2) in vec2 inUv;

layout(set = 0, binding = 0) uniform Transform { mat4 mvp; } u;

layout(location = 0) out vec3 vColor;
layout(location = 1) out vec2 vUv;

void main() {
    vColor = inColor;
    vUv = inUv;
    gl_Position = u.mvp * vec4(inPos, 1.0);
}
"#;

    let fs_src = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 1) in vec2 vUv;

layout(set = 0, binding = 1) uniform sampler2D tex;

layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0) * texture(tex, vUv);
}
"#;

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (src, kind, name) in [
        (vs_src, shaderc::ShaderKind::Vertex, "prism.vert"),
        (fs_src, shaderc::ShaderKind::Fragment, "prism.frag"),
    ] {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())
            .unwrap_or_else(|e| panic!("write {name}.spv: {e}"));
    }

    println!("cargo:rerun-if-changed=build.rs");
}
