//! A [`GpuBackend`] that needs no graphics context.

use std::collections::HashSet;

use super::{DrawBindings, GpuBackend, GpuResource};
use crate::error::AdError;
use crate::types::{CullFace, DecodedAsset, DrawMode, Geometry};

/// One draw call as it would have been issued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawRecord {
    /// Texture bound for the call.
    pub texture: u32,
    /// Vertex array bound for the call.
    pub vertex_array: u32,
    /// Vertices drawn.
    pub vertex_count: usize,
    /// Culling state at the time of the call.
    pub cull_face: CullFace,
    /// Primitive mode of the call.
    pub draw_mode: DrawMode,
    /// Host bindings used.
    pub bindings: DrawBindings,
}

/// Headless backend that hands out integer object names and records every
/// create, upload, draw and delete.
///
/// Useful for tests and for hosts that want to exercise the ad lifecycle
/// before a context exists. Deleting an unknown or already deleted object
/// is counted in [`double_deletes`](Self::double_deletes) instead of
/// corrupting anything.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    next_name: u32,
    live_textures: HashSet<u32>,
    live_meshes: HashSet<(u32, u32)>,
    textures_created: u64,
    textures_deleted: u64,
    texture_uploads: u64,
    meshes_created: u64,
    meshes_deleted: u64,
    geometry_uploads: u64,
    double_deletes: u64,
    draws: Vec<DrawRecord>,
}

impl RecordingBackend {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_name(&mut self) -> u32 {
        self.next_name += 1;
        self.next_name
    }

    /// Textures created so far.
    #[must_use]
    pub fn textures_created(&self) -> u64 {
        self.textures_created
    }

    /// Textures deleted so far.
    #[must_use]
    pub fn textures_deleted(&self) -> u64 {
        self.textures_deleted
    }

    /// Pixel uploads, including the initial one per texture.
    #[must_use]
    pub fn texture_uploads(&self) -> u64 {
        self.texture_uploads
    }

    /// Vertex array + buffer pairs created so far.
    #[must_use]
    pub fn meshes_created(&self) -> u64 {
        self.meshes_created
    }

    /// Vertex array + buffer pairs deleted so far.
    #[must_use]
    pub fn meshes_deleted(&self) -> u64 {
        self.meshes_deleted
    }

    /// Vertex buffer uploads so far.
    #[must_use]
    pub fn geometry_uploads(&self) -> u64 {
        self.geometry_uploads
    }

    /// Deletes of objects that were not live.
    #[must_use]
    pub fn double_deletes(&self) -> u64 {
        self.double_deletes
    }

    /// Objects created and not yet deleted.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.live_textures.len() + self.live_meshes.len()
    }

    /// Every draw call so far, oldest first.
    #[must_use]
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Forgets recorded draws, e.g. between frames.
    pub fn clear_draws(&mut self) {
        self.draws.clear();
    }
}

impl GpuBackend for RecordingBackend {
    type Texture = u32;
    type Buffer = u32;
    type VertexArray = u32;

    fn create_texture(&mut self, asset: &DecodedAsset) -> Result<u32, AdError> {
        let name = self.next_name();
        self.live_textures.insert(name);
        self.textures_created += 1;
        self.upload_texture(name, asset);
        Ok(name)
    }

    fn upload_texture(&mut self, texture: u32, asset: &DecodedAsset) {
        debug_assert!(self.live_textures.contains(&texture));
        log::trace!(
            "upload {}x{} into texture {texture}",
            asset.width(),
            asset.height()
        );
        self.texture_uploads += 1;
    }

    fn create_mesh(&mut self) -> Result<(u32, u32), AdError> {
        let vao = self.next_name();
        let vbo = self.next_name();
        self.live_meshes.insert((vao, vbo));
        self.meshes_created += 1;
        Ok((vao, vbo))
    }

    fn upload_geometry(&mut self, vertex_array: u32, buffer: u32, geometry: &Geometry) {
        debug_assert!(self.live_meshes.contains(&(vertex_array, buffer)));
        log::trace!(
            "upload {} vertices into buffer {buffer}",
            geometry.vertex_count()
        );
        self.geometry_uploads += 1;
    }

    fn draw(&mut self, resource: &GpuResource<Self>, bindings: &DrawBindings) {
        self.draws.push(DrawRecord {
            texture: resource.texture,
            vertex_array: resource.vertex_array,
            vertex_count: resource.vertex_count,
            cull_face: resource.cull_face,
            draw_mode: resource.draw_mode,
            bindings: *bindings,
        });
    }

    fn delete_texture(&mut self, texture: u32) {
        if self.live_textures.remove(&texture) {
            self.textures_deleted += 1;
        } else {
            self.double_deletes += 1;
        }
    }

    fn delete_mesh(&mut self, vertex_array: u32, buffer: u32) {
        if self.live_meshes.remove(&(vertex_array, buffer)) {
            self.meshes_deleted += 1;
        } else {
            self.double_deletes += 1;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn counts_balance_after_deletes() {
        let mut backend = RecordingBackend::new();
        let asset = DecodedAsset::from_rgba8(vec![0; 4], 1, 1).unwrap();
        let tex = backend.create_texture(&asset).unwrap();
        let (vao, vbo) = backend.create_mesh().unwrap();
        assert_eq!(backend.live_objects(), 2);

        backend.delete_texture(tex);
        backend.delete_mesh(vao, vbo);
        assert_eq!(backend.live_objects(), 0);
        assert_eq!(backend.textures_created(), backend.textures_deleted());
        assert_eq!(backend.meshes_created(), backend.meshes_deleted());
        assert_eq!(backend.double_deletes(), 0);
    }

    #[test]
    fn second_delete_is_flagged() {
        let mut backend = RecordingBackend::new();
        let asset = DecodedAsset::from_rgba8(vec![0; 4], 1, 1).unwrap();
        let tex = backend.create_texture(&asset).unwrap();
        backend.delete_texture(tex);
        backend.delete_texture(tex);
        assert_eq!(backend.double_deletes(), 1);
    }
}
