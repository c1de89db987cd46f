//! A ready-made shader program for hosts without their own.
//!
//! Targets GLSL 1.40 (OpenGL 3.1). Positions are read as a `vec4`, so any
//! tuple width from 1 to 4 works: GL fills the missing components with
//! `(0, 0, 1)`.

use glow::HasContext;

use crate::backend::DrawBindings;
use crate::error::AdError;

/// Vertex shader for ad surfaces.
///
/// # Uniforms
///
/// | Name    | Type   | Description                                  |
/// |---------|--------|----------------------------------------------|
/// | `u_mvp` | `mat4` | Camera matrix from [`AdSdk::camera`](crate::AdSdk::camera) |
pub const AD_VERTEX_SRC: &str = r"#version 140

in vec4 a_position;
in vec2 a_texcoord;

uniform mat4 u_mvp;

out vec2 v_uv;

void main() {
    v_uv = a_texcoord;
    gl_Position = u_mvp * a_position;
}
";

/// Fragment shader for ad surfaces. Samples the creative as-is.
pub const AD_FRAGMENT_SRC: &str = r"#version 140

in vec2 v_uv;

uniform sampler2D u_texture;

out vec4 frag_color;

void main() {
    frag_color = texture(u_texture, v_uv);
}
";

/// The bundled ad program and its locations.
#[derive(Debug)]
pub struct AdProgram {
    program: glow::Program,
    bindings: DrawBindings,
    mvp: Option<glow::UniformLocation>,
}

impl AdProgram {
    /// Compiles and links the bundled program.
    ///
    /// # Safety
    ///
    /// Requires a valid, current OpenGL context.
    ///
    /// # Errors
    ///
    /// [`AdError::Gpu`] if compilation or linking fails.
    pub unsafe fn new(gl: &glow::Context) -> Result<Self, AdError> {
        let program =
            unsafe { compile_program(gl, AD_VERTEX_SRC, AD_FRAGMENT_SRC) }.map_err(AdError::Gpu)?;

        let (position, texcoord, texture, mvp) = unsafe {
            (
                gl.get_attrib_location(program, "a_position"),
                gl.get_attrib_location(program, "a_texcoord"),
                gl.get_uniform_location(program, "u_texture"),
                gl.get_uniform_location(program, "u_mvp"),
            )
        };
        let Some(position_attrib) = position else {
            unsafe { gl.delete_program(program) };
            return Err(AdError::Gpu("a_position was optimized out".into()));
        };

        Ok(Self {
            program,
            bindings: DrawBindings {
                position_attrib,
                texcoord_attrib: texcoord,
                texture_uniform: texture.and_then(|l| i32::try_from(l.0).ok()),
            },
            mvp,
        })
    }

    /// Locations to hand to [`AdSdk::on_draw`](crate::AdSdk::on_draw).
    #[must_use]
    pub fn bindings(&self) -> DrawBindings {
        self.bindings
    }

    /// Binds the program and uploads the camera matrix.
    ///
    /// # Safety
    ///
    /// Requires the context this program was created with to be current.
    pub unsafe fn bind(&self, gl: &glow::Context, mvp: &[f32; 16]) {
        unsafe {
            gl.use_program(Some(self.program));
            gl.uniform_matrix_4_f32_slice(self.mvp.as_ref(), false, mvp);
        }
    }

    /// Deletes the program.
    ///
    /// # Safety
    ///
    /// Requires the context this program was created with to be current.
    pub unsafe fn delete(self, gl: &glow::Context) {
        unsafe { gl.delete_program(self.program) };
    }
}

/// Compile a shader program from vertex and fragment source strings.
///
/// The compiled shader objects are detached and deleted after successful
/// linking, so only the program handle needs to be cleaned up by the caller.
///
/// # Safety
///
/// Requires a valid, current OpenGL context.
unsafe fn compile_program(
    gl: &glow::Context,
    vertex_src: &str,
    fragment_src: &str,
) -> Result<glow::Program, String> {
    let program = unsafe { gl.create_program() }?;

    let vs = unsafe { compile_shader(gl, glow::VERTEX_SHADER, vertex_src) }?;
    let fs = match unsafe { compile_shader(gl, glow::FRAGMENT_SHADER, fragment_src) } {
        Ok(fs) => fs,
        Err(e) => {
            unsafe {
                gl.delete_shader(vs);
                gl.delete_program(program);
            }
            return Err(e);
        }
    };

    unsafe {
        gl.attach_shader(program, vs);
        gl.attach_shader(program, fs);
        gl.link_program(program);

        if !gl.get_program_link_status(program) {
            let log = gl.get_program_info_log(program);
            gl.delete_program(program);
            gl.delete_shader(vs);
            gl.delete_shader(fs);
            return Err(format!("ad program link error: {log}"));
        }

        gl.detach_shader(program, vs);
        gl.detach_shader(program, fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);
    }

    Ok(program)
}

/// Compile a single shader stage.
///
/// # Safety
///
/// Requires a valid, current OpenGL context.
unsafe fn compile_shader(
    gl: &glow::Context,
    shader_type: u32,
    source: &str,
) -> Result<glow::Shader, String> {
    unsafe {
        let shader = gl.create_shader(shader_type)?;
        gl.shader_source(shader, source);
        gl.compile_shader(shader);

        if !gl.get_shader_compile_status(shader) {
            let log = gl.get_shader_info_log(shader);
            gl.delete_shader(shader);
            return Err(format!("ad shader compile error: {log}"));
        }

        Ok(shader)
    }
}
