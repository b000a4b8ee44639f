// SPDX-License-Identifier: CEPL-1.0
use std::{env, fs, path::PathBuf};

// Vertex layout (binding 0): location 0 pos vec3, 1 color vec3, 2 uv vec2.
// Set 0: binding 0 camera block, binding 1 per-object block (dynamic offset).
// Set 1: binding 0 the mesh texture.
const VERTEX: &str = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inColor;
layout(location = 2) in vec2 inUv;

layout(set = 0, binding = 0) uniform ViewProjection {
    mat4 projection;
    mat4 view;
} vp;

layout(set = 0, binding = 1) uniform Object {
    mat4 model;
} obj;

layout(location = 0) out vec3 vColor;
layout(location = 1) out vec2 vUv;

void main() {
    vColor = inColor;
    vUv = inUv;
    gl_Position = vp.projection * vp.view * obj.model * vec4(inPos, 1.0);
}
"#;

const FRAGMENT: &str = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 1) in vec2 vUv;

layout(set = 1, binding = 0) uniform sampler2D tex;

layout(location = 0) out vec4 outColor;

void main() {
    outColor = texture(tex, vUv) * vec4(vColor, 1.0);
}
"#;

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (src, kind, name) in [
        (VERTEX, shaderc::ShaderKind::Vertex, "scene.vert"),
        (FRAGMENT, shaderc::ShaderKind::Fragment, "scene.frag"),
    ] {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())
            .unwrap_or_else(|e| panic!("writing {name}.spv: {e}"));
    }

    println!("cargo:rerun-if-changed=build.rs");
}
