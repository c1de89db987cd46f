//! GPU-side objects for every built ad, keyed by [`ResourceId`].
//!
//! Every operation is GL-thread-only and checks affinity before touching the
//! backend. An entry is removed from the map when it is destroyed, so a
//! second `destroy` finds nothing and reports [`AdError::InvalidHandle`]
//! rather than freeing GL names twice.

use std::collections::HashMap;

use crate::backend::{DrawBindings, GpuBackend, GpuResource};
use crate::error::AdError;
use crate::session::GlThread;
use crate::types::{CullFace, DecodedAsset, DrawMode, Geometry};

/// Key of one store entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceId(u32);

#[cfg(test)]
impl ResourceId {
    pub(crate) fn for_tests(raw: u32) -> Self {
        Self(raw)
    }
}

/// Lifetime counters of a [`GpuResourceStore`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Entries ever created.
    pub created: u64,
    /// Entries ever destroyed.
    pub destroyed: u64,
    /// Entries alive right now.
    pub live: usize,
}

/// Owns the texture, vertex buffer and vertex array of every built ad.
pub struct GpuResourceStore<B: GpuBackend> {
    backend: B,
    gl_thread: GlThread,
    entries: HashMap<ResourceId, GpuResource<B>>,
    next_id: u32,
    created: u64,
    destroyed: u64,
}

impl<B: GpuBackend> GpuResourceStore<B> {
    /// Creates an empty store bound to the calling thread.
    pub(crate) fn new(backend: B) -> Self {
        Self {
            backend,
            gl_thread: GlThread::current(),
            entries: HashMap::new(),
            next_id: 0,
            created: 0,
            destroyed: 0,
        }
    }

    /// The backend, e.g. to inspect a [`RecordingBackend`](crate::backend::RecordingBackend).
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend access.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Lifetime counters.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            created: self.created,
            destroyed: self.destroyed,
            live: self.entries.len(),
        }
    }

    /// Looks up an entry.
    pub fn get(&self, id: ResourceId) -> Option<&GpuResource<B>> {
        self.entries.get(&id)
    }

    fn entry_mut(&mut self, id: ResourceId) -> Result<&mut GpuResource<B>, AdError> {
        self.entries.get_mut(&id).ok_or(AdError::InvalidHandle)
    }

    /// Uploads a creative and its mesh. Uses the unit quad when no geometry
    /// is given.
    ///
    /// # Errors
    ///
    /// [`AdError::WrongThread`] off the GL thread, [`AdError::Gpu`] if the
    /// driver cannot allocate objects. Nothing leaks on failure.
    pub fn create(
        &mut self,
        asset: &DecodedAsset,
        geometry: Option<&Geometry>,
    ) -> Result<ResourceId, AdError> {
        self.gl_thread.check("GpuResourceStore::create")?;

        let quad;
        let geometry = if let Some(geometry) = geometry {
            geometry
        } else {
            quad = Geometry::unit_quad();
            &quad
        };

        let texture = self.backend.create_texture(asset)?;
        let (vertex_array, vertex_buffer) = match self.backend.create_mesh() {
            Ok(mesh) => mesh,
            Err(e) => {
                self.backend.delete_texture(texture);
                return Err(e);
            }
        };
        self.backend
            .upload_geometry(vertex_array, vertex_buffer, geometry);

        self.next_id = self.next_id.wrapping_add(1);
        let id = ResourceId(self.next_id);
        self.entries.insert(
            id,
            GpuResource {
                texture,
                vertex_array,
                vertex_buffer,
                vertex_count: geometry.vertex_count(),
                components_per_vertex: geometry.components_per_vertex(),
                texcoord_offset: geometry.texcoord_offset(),
                cull_face: CullFace::default(),
                draw_mode: DrawMode::default(),
            },
        );
        self.created += 1;
        log::debug!(
            "created ad resource {id:?} ({}x{}, {} vertices)",
            asset.width(),
            asset.height(),
            geometry.vertex_count()
        );
        Ok(id)
    }

    /// Replaces the creative of an existing entry, keeping its GL names.
    ///
    /// # Errors
    ///
    /// [`AdError::WrongThread`] or [`AdError::InvalidHandle`].
    pub fn update_texture(&mut self, id: ResourceId, asset: &DecodedAsset) -> Result<(), AdError> {
        self.gl_thread.check("GpuResourceStore::update_texture")?;
        let texture = self.entry_mut(id)?.texture;
        self.backend.upload_texture(texture, asset);
        Ok(())
    }

    /// Replaces the mesh with already validated geometry.
    ///
    /// # Errors
    ///
    /// [`AdError::WrongThread`] or [`AdError::InvalidHandle`].
    pub fn rebind(&mut self, id: ResourceId, geometry: &Geometry) -> Result<(), AdError> {
        self.gl_thread.check("GpuResourceStore::rebind")?;
        let entry = self.entries.get_mut(&id).ok_or(AdError::InvalidHandle)?;
        self.backend
            .upload_geometry(entry.vertex_array, entry.vertex_buffer, geometry);
        entry.vertex_count = geometry.vertex_count();
        entry.components_per_vertex = geometry.components_per_vertex();
        entry.texcoord_offset = geometry.texcoord_offset();
        Ok(())
    }

    /// Replaces the mesh with `components_per_vertex`-wide position tuples.
    /// Returns the geometry now on the GPU.
    ///
    /// # Errors
    ///
    /// [`AdError::InvalidGeometry`] if `vertices.len()` is not a multiple of
    /// `components_per_vertex`; the previous mesh is left untouched.
    pub fn rebind_vertices(
        &mut self,
        id: ResourceId,
        vertices: Vec<f32>,
        components_per_vertex: usize,
    ) -> Result<Geometry, AdError> {
        self.gl_thread.check("GpuResourceStore::rebind_vertices")?;
        let geometry = Geometry::new(vertices, components_per_vertex)?;
        self.rebind(id, &geometry)?;
        Ok(geometry)
    }

    /// Like [`rebind_vertices`](Self::rebind_vertices) with a parallel
    /// texcoord array.
    ///
    /// # Errors
    ///
    /// [`AdError::InvalidGeometry`] if the arrays are malformed or the
    /// texcoord pair count differs from the vertex count.
    pub fn rebind_vertices_with_texcoords(
        &mut self,
        id: ResourceId,
        vertices: Vec<f32>,
        components_per_vertex: usize,
        texcoords: Vec<f32>,
    ) -> Result<Geometry, AdError> {
        self.gl_thread
            .check("GpuResourceStore::rebind_vertices_with_texcoords")?;
        let geometry = Geometry::with_texcoords(vertices, components_per_vertex, texcoords)?;
        self.rebind(id, &geometry)?;
        Ok(geometry)
    }

    /// Sets face culling for an entry.
    ///
    /// # Errors
    ///
    /// [`AdError::WrongThread`] or [`AdError::InvalidHandle`].
    pub fn set_cull_face(&mut self, id: ResourceId, mode: CullFace) -> Result<(), AdError> {
        self.gl_thread.check("GpuResourceStore::set_cull_face")?;
        self.entry_mut(id)?.cull_face = mode;
        Ok(())
    }

    /// Sets the primitive mode for an entry.
    ///
    /// # Errors
    ///
    /// [`AdError::WrongThread`] or [`AdError::InvalidHandle`].
    pub fn set_draw_mode(&mut self, id: ResourceId, mode: DrawMode) -> Result<(), AdError> {
        self.gl_thread.check("GpuResourceStore::set_draw_mode")?;
        self.entry_mut(id)?.draw_mode = mode;
        Ok(())
    }

    /// Draws one entry with the host's bindings.
    ///
    /// # Errors
    ///
    /// [`AdError::WrongThread`] or [`AdError::InvalidHandle`].
    pub fn draw(&mut self, id: ResourceId, bindings: &DrawBindings) -> Result<(), AdError> {
        self.gl_thread.check("GpuResourceStore::draw")?;
        let entry = self.entries.get(&id).ok_or(AdError::InvalidHandle)?;
        self.backend.draw(entry, bindings);
        Ok(())
    }

    /// Deletes the GL objects of an entry and forgets it.
    ///
    /// # Errors
    ///
    /// [`AdError::WrongThread`], or [`AdError::InvalidHandle`] if the entry
    /// was already destroyed.
    pub fn destroy(&mut self, id: ResourceId) -> Result<(), AdError> {
        self.gl_thread.check("GpuResourceStore::destroy")?;
        let entry = self.entries.remove(&id).ok_or(AdError::InvalidHandle)?;
        self.backend.delete_texture(entry.texture);
        self.backend
            .delete_mesh(entry.vertex_array, entry.vertex_buffer);
        self.destroyed += 1;
        log::debug!("destroyed ad resource {id:?}");
        Ok(())
    }

    /// Destroys every entry. Returns how many were destroyed.
    ///
    /// # Errors
    ///
    /// [`AdError::WrongThread`] off the GL thread.
    pub fn destroy_all(&mut self) -> Result<usize, AdError> {
        self.gl_thread.check("GpuResourceStore::destroy_all")?;
        let ids: Vec<ResourceId> = self.entries.keys().copied().collect();
        for id in &ids {
            self.destroy(*id)?;
        }
        Ok(ids.len())
    }
}
