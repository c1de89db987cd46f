//! OpenGL backend on top of [`glow`].

use std::sync::Arc;

use glow::{HasContext, PixelUnpackData};

use super::{DrawBindings, GpuBackend, GpuResource};
use crate::error::AdError;
use crate::types::{DecodedAsset, Geometry};

/// GL internal format for RGBA8 textures, pre-cast to the `i32` that
/// `tex_image_2d` expects.
#[expect(clippy::cast_possible_wrap)]
const RGBA8_INTERNAL_FORMAT: i32 = glow::RGBA8 as i32;

/// Converts a size or count to the `i32` GL calls take.
fn gl_int<T: TryInto<i32>>(value: T) -> Option<i32> {
    value.try_into().ok()
}

/// [`GpuBackend`] that issues real GL calls through a shared [`glow::Context`].
///
/// Ad surfaces are drawn with `glDrawArrays` from a single vertex buffer
/// holding positions followed by texcoords. Attribute pointers are set up at
/// draw time because attribute locations belong to the host's program.
pub struct GlowBackend {
    gl: Arc<glow::Context>,
}

impl GlowBackend {
    /// Wraps a context.
    ///
    /// # Safety
    ///
    /// `gl` must be current on the calling thread, and every later use of
    /// this backend must happen on a thread where it is current. The ad
    /// store only calls in from the thread that created the SDK.
    #[must_use]
    pub unsafe fn new(gl: Arc<glow::Context>) -> Self {
        Self { gl }
    }

    /// The wrapped context.
    #[must_use]
    pub fn context(&self) -> &Arc<glow::Context> {
        &self.gl
    }

    /// Set default texture filtering and wrapping parameters.
    unsafe fn set_default_tex_params(gl: &glow::Context) {
        // GL constant values are small enough that the cast is always safe.
        #[expect(clippy::cast_possible_wrap)]
        unsafe {
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_S,
                glow::CLAMP_TO_EDGE as i32,
            );
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_T,
                glow::CLAMP_TO_EDGE as i32,
            );
        }
    }
}

impl GpuBackend for GlowBackend {
    type Texture = glow::Texture;
    type Buffer = glow::Buffer;
    type VertexArray = glow::VertexArray;

    fn create_texture(&mut self, asset: &DecodedAsset) -> Result<glow::Texture, AdError> {
        // SAFETY: the context is current on this thread (constructor contract).
        let texture = unsafe { self.gl.create_texture() }.map_err(AdError::Gpu)?;
        self.upload_texture(texture, asset);
        Ok(texture)
    }

    fn upload_texture(&mut self, texture: glow::Texture, asset: &DecodedAsset) {
        let (Some(width), Some(height)) = (gl_int(asset.width()), gl_int(asset.height())) else {
            log::error!(
                "creative {}x{} exceeds GL texture limits",
                asset.width(),
                asset.height()
            );
            return;
        };
        let gl = &self.gl;
        // SAFETY: the context is current on this thread (constructor contract).
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                RGBA8_INTERNAL_FORMAT,
                width,
                height,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                PixelUnpackData::Slice(Some(asset.pixels())),
            );
            Self::set_default_tex_params(gl);
            gl.bind_texture(glow::TEXTURE_2D, None);
        }
    }

    fn create_mesh(&mut self) -> Result<(glow::VertexArray, glow::Buffer), AdError> {
        let gl = &self.gl;
        // SAFETY: the context is current on this thread (constructor contract).
        unsafe {
            let vao = gl.create_vertex_array().map_err(AdError::Gpu)?;
            match gl.create_buffer() {
                Ok(vbo) => Ok((vao, vbo)),
                Err(e) => {
                    gl.delete_vertex_array(vao);
                    Err(AdError::Gpu(e))
                }
            }
        }
    }

    fn upload_geometry(
        &mut self,
        vertex_array: glow::VertexArray,
        buffer: glow::Buffer,
        geometry: &Geometry,
    ) {
        let data = geometry.buffer_data();
        let gl = &self.gl;
        // SAFETY: the context is current on this thread (constructor contract).
        unsafe {
            gl.bind_vertex_array(Some(vertex_array));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice(&data),
                glow::STATIC_DRAW,
            );
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            gl.bind_vertex_array(None);
        }
    }

    fn draw(&mut self, resource: &GpuResource<Self>, bindings: &DrawBindings) {
        let (Some(count), Some(size)) = (
            gl_int(resource.vertex_count),
            gl_int(resource.components_per_vertex),
        ) else {
            log::error!("ad mesh too large to draw ({} vertices)", resource.vertex_count);
            return;
        };
        if count == 0 {
            return;
        }
        let gl = &self.gl;

        // SAFETY: the context is current on this thread (constructor contract).
        unsafe {
            gl.bind_vertex_array(Some(resource.vertex_array));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(resource.vertex_buffer));

            gl.enable_vertex_attrib_array(bindings.position_attrib);
            gl.vertex_attrib_pointer_f32(bindings.position_attrib, size, glow::FLOAT, false, 0, 0);

            let texcoords = bindings
                .texcoord_attrib
                .zip(resource.texcoord_offset.and_then(gl_int));
            if let Some((attrib, offset)) = texcoords {
                gl.enable_vertex_attrib_array(attrib);
                gl.vertex_attrib_pointer_f32(attrib, 2, glow::FLOAT, false, 0, offset);
            }

            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(glow::TEXTURE_2D, Some(resource.texture));
            if let Some(location) = bindings.texture_uniform.and_then(|l| u32::try_from(l).ok()) {
                gl.uniform_1_i32(Some(&glow::NativeUniformLocation(location)), 0);
            }

            match resource.cull_face.gl_enum() {
                Some(mode) => {
                    gl.enable(glow::CULL_FACE);
                    gl.cull_face(mode);
                }
                None => gl.disable(glow::CULL_FACE),
            }

            gl.draw_arrays(resource.draw_mode.gl_enum(), 0, count);

            gl.disable(glow::CULL_FACE);
            gl.bind_texture(glow::TEXTURE_2D, None);
            gl.disable_vertex_attrib_array(bindings.position_attrib);
            if let Some((attrib, _)) = texcoords {
                gl.disable_vertex_attrib_array(attrib);
            }
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            gl.bind_vertex_array(None);
        }
    }

    fn delete_texture(&mut self, texture: glow::Texture) {
        // SAFETY: the context is current on this thread (constructor contract).
        unsafe { self.gl.delete_texture(texture) };
    }

    fn delete_mesh(&mut self, vertex_array: glow::VertexArray, buffer: glow::Buffer) {
        // SAFETY: the context is current on this thread (constructor contract).
        unsafe {
            self.gl.delete_buffer(buffer);
            self.gl.delete_vertex_array(vertex_array);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gl_int_rejects_overflow() {
        assert_eq!(gl_int(4_usize), Some(4));
        assert_eq!(gl_int(u32::MAX), None);
        assert_eq!(gl_int(usize::MAX), None);
    }
}
