//! Scalar types stored in device buffers.

use bytemuck::Pod;
use num_traits::Float;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// A floating-point element type the kernels operate on.
///
/// Host buffers store each element in a [`Scalar::Cell`], an atomic holding the element’s bits,
/// so that emulated work-items of the same launch can read and write the buffer concurrently.
pub trait Scalar: Float + Pod + Debug + Send + Sync + 'static {
    /// The atomic cell storing one element of a host buffer.
    type Cell: Send + Sync;

    /// Name of this type in WGSL sources.
    const WGSL_TYPE: &'static str;

    /// Creates a new cell containing `value`.
    fn new_cell(value: Self) -> Self::Cell;
    /// Reads the value stored in `cell`.
    fn load(cell: &Self::Cell) -> Self;
    /// Overwrites the value stored in `cell`.
    fn store(cell: &Self::Cell, value: Self);
    /// Packs `self` into one slot of a kernel parameter buffer.
    fn to_param(self) -> [u32; 4];
}

impl Scalar for f32 {
    type Cell = AtomicU32;
    const WGSL_TYPE: &'static str = "f32";

    fn new_cell(value: Self) -> Self::Cell {
        AtomicU32::new(value.to_bits())
    }

    fn load(cell: &Self::Cell) -> Self {
        f32::from_bits(cell.load(Ordering::Relaxed))
    }

    fn store(cell: &Self::Cell, value: Self) {
        cell.store(value.to_bits(), Ordering::Relaxed)
    }

    fn to_param(self) -> [u32; 4] {
        [self.to_bits(), 0, 0, 0]
    }
}

impl Scalar for f64 {
    type Cell = AtomicU64;
    const WGSL_TYPE: &'static str = "f64";

    fn new_cell(value: Self) -> Self::Cell {
        AtomicU64::new(value.to_bits())
    }

    fn load(cell: &Self::Cell) -> Self {
        f64::from_bits(cell.load(Ordering::Relaxed))
    }

    fn store(cell: &Self::Cell, value: Self) {
        cell.store(value.to_bits(), Ordering::Relaxed)
    }

    fn to_param(self) -> [u32; 4] {
        let bits = self.to_bits();
        [bits as u32, (bits >> 32) as u32, 0, 0]
    }
}

#[cfg(test)]
mod test {
    use super::Scalar;

    #[test]
    fn cells_roundtrip_bits() {
        let cell = f64::new_cell(-3.25);
        assert_eq!(f64::load(&cell), -3.25);
        f64::store(&cell, f64::MAX);
        assert_eq!(f64::load(&cell), f64::MAX);

        let cell = f32::new_cell(1.5);
        assert_eq!(f32::load(&cell), 1.5);
        assert_eq!(1.5f32.to_param(), [1.5f32.to_bits(), 0, 0, 0]);
    }
}
