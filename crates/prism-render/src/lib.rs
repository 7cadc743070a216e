// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic data handed to the GPU layer.
//!
//! Decoding files into these shapes is the job of whoever loads assets; the
//! renderer only ever sees plain vertices, indices and RGBA8 pixels.
use bytemuck::{Pod, Zeroable};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// The one vertex layout every pipeline consumes (binding 0).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self { pos, color, uv }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("image is {width}x{height} but carries {actual} bytes (expected {expected})")]
    PixelCount {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("image has zero area")]
    EmptyImage,
    #[error("mesh has no vertices")]
    EmptyMesh,
    #[error("index {index} points past the {vertex_count} vertices of the mesh")]
    IndexOutOfRange { index: u32, vertex_count: usize },
}

/// Ordered vertices plus optional 32-bit indices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshAsset {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshAsset {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Result<Self, AssetError> {
        if vertices.is_empty() {
            return Err(AssetError::EmptyMesh);
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(AssetError::IndexOutOfRange {
                index,
                vertex_count: vertices.len(),
            });
        }
        Ok(Self { vertices, indices })
    }

    pub fn non_indexed(vertices: Vec<Vertex>) -> Result<Self, AssetError> {
        Self::new(vertices, Vec::new())
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Tightly packed RGBA8 pixels, row-major, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageAsset {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl ImageAsset {
    pub const BYTES_PER_PIXEL: usize = 4;

    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, AssetError> {
        if width == 0 || height == 0 {
            return Err(AssetError::EmptyImage);
        }
        let expected = width as usize * height as usize * Self::BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(AssetError::PixelCount {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Two-color checkerboard with square cells of `cell` pixels.
    pub fn checkerboard(
        width: u32,
        height: u32,
        cell: u32,
        a: [u8; 4],
        b: [u8; 4],
    ) -> Result<Self, AssetError> {
        let cell = cell.max(1);
        let mut pixels = Vec::with_capacity(width as usize * height as usize * Self::BYTES_PER_PIXEL);
        for y in 0..height {
            for x in 0..width {
                let texel = if ((x / cell) + (y / cell)) % 2 == 0 { a } else { b };
                pixels.extend_from_slice(&texel);
            }
        }
        Self::new(width, height, pixels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}
