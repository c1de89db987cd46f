//! Plain data handed to the GPU: ad geometry, render modes, decoded creatives.

use std::sync::Arc;

use crate::error::{AdError, FetchError};

/// Corner positions of the default ad surface: a unit quad with one corner at
/// the origin, wound counter-clockwise when seen from +Z.
pub const UNIT_QUAD: [[f32; 3]; 4] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [1.0, 1.0, 0.0],
    [0.0, 1.0, 0.0],
];

/// Texcoords matching [`UNIT_QUAD`]. Image rows arrive top-first, so V is
/// flipped to keep the creative upright.
pub const UNIT_QUAD_TEXCOORDS: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

/// Largest tuple width accepted by `glVertexAttribPointer`.
pub const MAX_COMPONENTS_PER_VERTEX: usize = 4;

/// Vertex data for one ad surface.
///
/// Positions are stored as flat `components_per_vertex`-wide tuples.
/// Texcoords, when present, are a parallel array of `(u, v)` pairs with one
/// pair per vertex. On the GPU both live in a single buffer: positions first,
/// texcoords after them.
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    positions: Vec<f32>,
    components_per_vertex: usize,
    texcoords: Option<Vec<f32>>,
}

impl Geometry {
    /// Geometry from positions only.
    ///
    /// Four-vertex meshes get the default quad texcoords so a repositioned
    /// quad keeps showing the whole creative.
    ///
    /// # Errors
    ///
    /// [`AdError::InvalidGeometry`] unless `1 <= components_per_vertex <= 4`
    /// and `positions.len()` is a multiple of it.
    pub fn new(positions: Vec<f32>, components_per_vertex: usize) -> Result<Self, AdError> {
        let vertex_count = check_positions(&positions, components_per_vertex)?;
        let texcoords = (vertex_count == UNIT_QUAD.len())
            .then(|| bytemuck::cast_slice::<[f32; 2], f32>(&UNIT_QUAD_TEXCOORDS).to_vec());
        Ok(Self {
            positions,
            components_per_vertex,
            texcoords,
        })
    }

    /// Geometry with an explicit texcoord array.
    ///
    /// # Errors
    ///
    /// Same rules as [`Geometry::new`], plus `texcoords.len()` must be even
    /// and hold exactly one pair per vertex.
    pub fn with_texcoords(
        positions: Vec<f32>,
        components_per_vertex: usize,
        texcoords: Vec<f32>,
    ) -> Result<Self, AdError> {
        let vertex_count = check_positions(&positions, components_per_vertex)?;
        if texcoords.len() % 2 != 0 {
            return Err(AdError::InvalidGeometry(format!(
                "{} texcoord floats is not a whole number of (u, v) pairs",
                texcoords.len()
            )));
        }
        if texcoords.len() / 2 != vertex_count {
            return Err(AdError::InvalidGeometry(format!(
                "{} texcoord pairs for {vertex_count} vertices",
                texcoords.len() / 2
            )));
        }
        Ok(Self {
            positions,
            components_per_vertex,
            texcoords: Some(texcoords),
        })
    }

    /// The default ad surface.
    #[must_use]
    pub fn unit_quad() -> Self {
        Self {
            positions: bytemuck::cast_slice::<[f32; 3], f32>(&UNIT_QUAD).to_vec(),
            components_per_vertex: 3,
            texcoords: Some(bytemuck::cast_slice::<[f32; 2], f32>(&UNIT_QUAD_TEXCOORDS).to_vec()),
        }
    }

    /// Number of vertices.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / self.components_per_vertex
    }

    /// Width of each position tuple.
    #[must_use]
    pub fn components_per_vertex(&self) -> usize {
        self.components_per_vertex
    }

    /// Flat position array.
    #[must_use]
    pub fn positions(&self) -> &[f32] {
        &self.positions
    }

    /// Flat `(u, v)` array, if any.
    #[must_use]
    pub fn texcoords(&self) -> Option<&[f32]> {
        self.texcoords.as_deref()
    }

    /// Byte offset of the texcoord block inside [`buffer_data`](Self::buffer_data).
    #[must_use]
    pub fn texcoord_offset(&self) -> Option<usize> {
        self.texcoords
            .as_ref()
            .map(|_| self.positions.len() * std::mem::size_of::<f32>())
    }

    /// Positions followed by texcoords, ready for a single vertex buffer.
    #[must_use]
    pub fn buffer_data(&self) -> Vec<f32> {
        let mut data = self.positions.clone();
        if let Some(texcoords) = &self.texcoords {
            data.extend_from_slice(texcoords);
        }
        data
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::unit_quad()
    }
}

/// Validates a position array and returns its vertex count.
fn check_positions(positions: &[f32], components_per_vertex: usize) -> Result<usize, AdError> {
    if !(1..=MAX_COMPONENTS_PER_VERTEX).contains(&components_per_vertex) {
        return Err(AdError::InvalidGeometry(format!(
            "components_per_vertex must be in 1..={MAX_COMPONENTS_PER_VERTEX}, got {components_per_vertex}"
        )));
    }
    if positions.len() % components_per_vertex != 0 {
        return Err(AdError::InvalidGeometry(format!(
            "{} floats is not a multiple of {components_per_vertex} components",
            positions.len()
        )));
    }
    Ok(positions.len() / components_per_vertex)
}

/// Which faces of the ad surface are culled. `Back` by default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullFace {
    /// Cull front faces.
    Front,
    /// Cull back faces.
    #[default]
    Back,
    /// Cull everything (the surface is never rasterized).
    FrontAndBack,
    /// Face culling disabled.
    Disabled,
}

impl CullFace {
    /// Maps a raw `glCullFace` enum. `0` means culling disabled.
    #[must_use]
    pub fn from_gl_enum(mode: u32) -> Option<Self> {
        match mode {
            0 => Some(Self::Disabled),
            0x0404 => Some(Self::Front),
            0x0405 => Some(Self::Back),
            0x0408 => Some(Self::FrontAndBack),
            _ => None,
        }
    }

    /// The `glCullFace` enum, or `None` when culling is disabled.
    #[must_use]
    pub fn gl_enum(self) -> Option<u32> {
        match self {
            Self::Front => Some(0x0404),
            Self::Back => Some(0x0405),
            Self::FrontAndBack => Some(0x0408),
            Self::Disabled => None,
        }
    }
}

/// Primitive mode passed to `glDrawArrays`. `TriangleFan` by default, which
/// draws the unit quad as two triangles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum DrawMode {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    Triangles,
    TriangleStrip,
    #[default]
    TriangleFan,
}

impl DrawMode {
    /// Maps a raw `glDrawArrays` mode enum.
    #[must_use]
    pub fn from_gl_enum(mode: u32) -> Option<Self> {
        Some(match mode {
            0 => Self::Points,
            1 => Self::Lines,
            2 => Self::LineLoop,
            3 => Self::LineStrip,
            4 => Self::Triangles,
            5 => Self::TriangleStrip,
            6 => Self::TriangleFan,
            _ => return None,
        })
    }

    /// The `glDrawArrays` mode enum.
    #[must_use]
    pub fn gl_enum(self) -> u32 {
        match self {
            Self::Points => 0,
            Self::Lines => 1,
            Self::LineLoop => 2,
            Self::LineStrip => 3,
            Self::Triangles => 4,
            Self::TriangleStrip => 5,
            Self::TriangleFan => 6,
        }
    }
}

/// A creative decoded to RGBA8, ready for texture upload.
///
/// Pixels are shared so a refresh job and a snapshot can hold the same bytes
/// without copying.
#[derive(Clone, Debug)]
pub struct DecodedAsset {
    pixels: Arc<Vec<u8>>,
    width: u32,
    height: u32,
}

impl DecodedAsset {
    /// Wraps already-decoded RGBA8 pixels.
    ///
    /// # Errors
    ///
    /// [`FetchError::Decode`] if the buffer is not `width * height * 4`
    /// bytes or either dimension is zero.
    pub fn from_rgba8(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self, FetchError> {
        let expected = u64::from(width) * u64::from(height) * 4;
        if width == 0 || height == 0 || pixels.len() as u64 != expected {
            return Err(FetchError::Decode(format!(
                "{} bytes do not describe a {width}x{height} RGBA8 image",
                pixels.len()
            )));
        }
        Ok(Self {
            pixels: Arc::new(pixels),
            width,
            height,
        })
    }

    /// Decodes PNG or JPEG creative bytes.
    ///
    /// # Errors
    ///
    /// [`FetchError::Decode`] if the format is unsupported or the data is
    /// corrupt.
    pub fn decode(bytes: &[u8]) -> Result<Self, FetchError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| FetchError::Decode(e.to_string()))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        Self::from_rgba8(img.into_raw(), width, height)
    }

    /// RGBA8 pixel rows, top row first.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Width over height.
    #[must_use]
    #[expect(clippy::cast_precision_loss)]
    pub fn aspect_ratio(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}
