//! The GL seam: everything that actually talks to the graphics driver.
//!
//! [`GpuResourceStore`](crate::store::GpuResourceStore) owns resource
//! bookkeeping and delegates object creation, upload, drawing and deletion to
//! a [`GpuBackend`]. [`GlowBackend`] drives a real OpenGL context;
//! [`RecordingBackend`] keeps everything on the CPU and records what would
//! have been issued.

#[cfg(feature = "glow")]
mod gl;
mod recording;

#[cfg(feature = "glow")]
pub use gl::GlowBackend;
pub use recording::{DrawRecord, RecordingBackend};

use std::fmt;

use crate::error::AdError;
use crate::types::{CullFace, DecodedAsset, DrawMode, Geometry};

/// Attribute and uniform locations of the host's bound shader program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawBindings {
    /// Vertex position attribute.
    pub position_attrib: u32,
    /// Texcoord attribute, if the program has one.
    pub texcoord_attrib: Option<u32>,
    /// `sampler2D` uniform, if the program has one. Always bound to unit 0.
    pub texture_uniform: Option<i32>,
}

impl DrawBindings {
    /// Builds bindings from raw `GLint` locations; negative means absent,
    /// as returned by `glGetAttribLocation` for unknown names.
    ///
    /// Returns `None` if the position attribute is absent.
    #[must_use]
    pub fn from_gl_locations(
        attribute_position: i32,
        attribute_texcoord: i32,
        uniform_texture: i32,
    ) -> Option<Self> {
        Some(Self {
            position_attrib: u32::try_from(attribute_position).ok()?,
            texcoord_attrib: u32::try_from(attribute_texcoord).ok(),
            texture_uniform: (uniform_texture >= 0).then_some(uniform_texture),
        })
    }
}

/// GPU objects backing one ad surface, plus the render state applied when it
/// is drawn.
pub struct GpuResource<B: GpuBackend> {
    /// The creative.
    pub texture: B::Texture,
    /// Vertex layout object.
    pub vertex_array: B::VertexArray,
    /// Positions followed by texcoords.
    pub vertex_buffer: B::Buffer,
    /// Vertices uploaded to `vertex_buffer`.
    pub vertex_count: usize,
    /// Width of each position tuple.
    pub components_per_vertex: usize,
    /// Byte offset of the texcoord block, if any.
    pub texcoord_offset: Option<usize>,
    /// Face culling.
    pub cull_face: CullFace,
    /// Primitive mode.
    pub draw_mode: DrawMode,
}

impl<B: GpuBackend> fmt::Debug for GpuResource<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuResource")
            .field("texture", &self.texture)
            .field("vertex_array", &self.vertex_array)
            .field("vertex_buffer", &self.vertex_buffer)
            .field("vertex_count", &self.vertex_count)
            .field("components_per_vertex", &self.components_per_vertex)
            .field("cull_face", &self.cull_face)
            .field("draw_mode", &self.draw_mode)
            .finish_non_exhaustive()
    }
}

/// Driver operations needed by the resource store.
///
/// Implementations must only be used on the thread owning the graphics
/// context; the store enforces this before calling in.
pub trait GpuBackend {
    /// Texture object name.
    type Texture: Copy + fmt::Debug;
    /// Buffer object name.
    type Buffer: Copy + fmt::Debug;
    /// Vertex array object name.
    type VertexArray: Copy + fmt::Debug;

    /// Creates a texture and uploads the creative into it.
    ///
    /// # Errors
    ///
    /// [`AdError::Gpu`] if the driver cannot allocate the texture.
    fn create_texture(&mut self, asset: &DecodedAsset) -> Result<Self::Texture, AdError>;

    /// Replaces the pixels of an existing texture.
    fn upload_texture(&mut self, texture: Self::Texture, asset: &DecodedAsset);

    /// Creates an empty vertex array and vertex buffer pair.
    ///
    /// # Errors
    ///
    /// [`AdError::Gpu`] if the driver cannot allocate either object.
    fn create_mesh(&mut self) -> Result<(Self::VertexArray, Self::Buffer), AdError>;

    /// Uploads [`Geometry::buffer_data`] into `buffer`.
    fn upload_geometry(
        &mut self,
        vertex_array: Self::VertexArray,
        buffer: Self::Buffer,
        geometry: &Geometry,
    );

    /// Issues the draw call for one resource.
    fn draw(&mut self, resource: &GpuResource<Self>, bindings: &DrawBindings)
    where
        Self: Sized;

    /// Deletes a texture.
    fn delete_texture(&mut self, texture: Self::Texture);

    /// Deletes a vertex array and its buffer.
    fn delete_mesh(&mut self, vertex_array: Self::VertexArray, buffer: Self::Buffer);
}
