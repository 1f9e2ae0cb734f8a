//! Voxel grid contract and a bit-packed implementation

use glam::{IVec3, UVec3};

/// Read-only pore/solid classification of a 3D lattice
pub trait VoxelGrid: Send + Sync {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn depth(&self) -> u32;
    fn is_solid(&self, x: u32, y: u32, z: u32) -> bool;

    fn dimensions(&self) -> UVec3 {
        UVec3::new(self.width(), self.height(), self.depth())
    }

    fn voxel_count(&self) -> u64 {
        self.width() as u64 * self.height() as u64 * self.depth() as u64
    }

    /// Bit-packed solid mask, x fastest, one bit per voxel, 32 voxels per word.
    /// This is the layout the GPU walk reads.
    fn solid_words(&self) -> Vec<u32> {
        let (w, h, d) = (self.width(), self.height(), self.depth());
        let mut words = vec![0u32; (self.voxel_count() as usize).div_ceil(32)];
        let mut index = 0usize;
        for z in 0..d {
            for y in 0..h {
                for x in 0..w {
                    if self.is_solid(x, y, z) {
                        words[index >> 5] |= 1 << (index & 31);
                    }
                    index += 1;
                }
            }
        }
        words
    }
}

/// Check a signed candidate against grid bounds
#[inline]
pub fn in_bounds(candidate: IVec3, dimensions: UVec3) -> bool {
    candidate.cmpge(IVec3::ZERO).all() && candidate.as_uvec3().cmplt(dimensions).all()
}

/// Bit-packed voxel grid (1 = solid)
#[derive(Clone, Debug)]
pub struct BitGrid {
    width: u32,
    height: u32,
    depth: u32,
    words: Vec<u32>,
}

impl BitGrid {
    /// Grid of all pore voxels
    pub fn all_pore(width: u32, height: u32, depth: u32) -> Self {
        let count = width as usize * height as usize * depth as usize;
        Self {
            width,
            height,
            depth,
            words: vec![0; count.div_ceil(32)],
        }
    }

    /// Build a grid from a solid predicate
    pub fn from_fn(
        width: u32,
        height: u32,
        depth: u32,
        mut solid: impl FnMut(u32, u32, u32) -> bool,
    ) -> Self {
        let mut grid = Self::all_pore(width, height, depth);
        for z in 0..depth {
            for y in 0..height {
                for x in 0..width {
                    if solid(x, y, z) {
                        grid.set_solid(x, y, z, true);
                    }
                }
            }
        }
        grid
    }

    /// All-pore grid with one solid plane `x = plane_x`
    pub fn with_solid_plane(width: u32, height: u32, depth: u32, plane_x: u32) -> Self {
        Self::from_fn(width, height, depth, |x, _, _| x == plane_x)
    }

    pub fn set_solid(&mut self, x: u32, y: u32, z: u32, solid: bool) {
        let index = self.index(x, y, z);
        if solid {
            self.words[index >> 5] |= 1 << (index & 31);
        } else {
            self.words[index >> 5] &= !(1 << (index & 31));
        }
    }

    /// Fraction of pore voxels
    pub fn porosity(&self) -> f64 {
        let total = self.voxel_count();
        if total == 0 {
            return 0.0;
        }
        let solid: u64 = self.words.iter().map(|w| w.count_ones() as u64).sum();
        1.0 - solid as f64 / total as f64
    }

    #[inline]
    fn index(&self, x: u32, y: u32, z: u32) -> usize {
        (z as usize * self.height as usize + y as usize) * self.width as usize + x as usize
    }
}

impl VoxelGrid for BitGrid {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn depth(&self) -> u32 {
        self.depth
    }

    #[inline]
    fn is_solid(&self, x: u32, y: u32, z: u32) -> bool {
        let index = self.index(x, y, z);
        self.words[index >> 5] & (1 << (index & 31)) != 0
    }

    fn solid_words(&self) -> Vec<u32> {
        self.words.clone()
    }
}
