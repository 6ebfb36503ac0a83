//! Dense embedding matrices.

use std::cell::UnsafeCell;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::distributions::Uniform;
use rand::Rng;

use crate::error::{Error, Result};

/// Dense row-major matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    inner: Array2<f32>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Matrix {
            inner: Array2::zeros((rows, cols)),
        }
    }

    /// Construct a matrix with components drawn from *U(-bound, bound)*.
    pub fn uniform(rows: usize, cols: usize, bound: f32, rng: &mut impl Rng) -> Self {
        let uniform = Uniform::new_inclusive(-bound, bound);
        let data = (0..rows * cols).map(|_| rng.sample(uniform)).collect();
        Matrix {
            inner: Array2::from_shape_vec((rows, cols), data)
                .expect("Shape mismatch in uniform initialization"),
        }
    }

    pub fn rows(&self) -> usize {
        self.inner.nrows()
    }

    pub fn cols(&self) -> usize {
        self.inner.ncols()
    }

    pub fn view(&self) -> ArrayView2<f32> {
        self.inner.view()
    }

    pub fn row(&self, idx: usize) -> ArrayView1<f32> {
        self.inner.row(idx)
    }

    pub fn row_mut(&mut self, idx: usize) -> ndarray::ArrayViewMut1<f32> {
        self.inner.row_mut(idx)
    }

    /// Dot product of a row with the given vector.
    pub fn dot_row(&self, vec: ArrayView1<f32>, idx: usize) -> f32 {
        self.inner.row(idx).dot(&vec)
    }

    /// Read a matrix block: row and column counts followed by the
    /// row-major components.
    pub(crate) fn read<R>(reader: &mut R) -> Result<Matrix>
    where
        R: Read,
    {
        let rows = reader
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read number of matrix rows", e))?;
        let cols = reader
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::read_error("Cannot read number of matrix columns", e))?;

        let mut data = vec![0.0; (rows * cols) as usize];
        reader
            .read_f32_into::<LittleEndian>(&mut data)
            .map_err(|e| Error::read_error("Cannot read matrix", e))?;

        let inner = Array2::from_shape_vec((rows as usize, cols as usize), data)?;

        Ok(Matrix { inner })
    }

    /// Write a matrix block.
    pub(crate) fn write<W>(&self, writer: &mut W) -> Result<()>
    where
        W: Write,
    {
        writer
            .write_u64::<LittleEndian>(self.rows() as u64)
            .map_err(|e| Error::write_error("Cannot write number of matrix rows", e))?;
        writer
            .write_u64::<LittleEndian>(self.cols() as u64)
            .map_err(|e| Error::write_error("Cannot write number of matrix columns", e))?;

        for &component in self.inner.iter() {
            writer
                .write_f32::<LittleEndian>(component)
                .map_err(|e| Error::write_error("Cannot write matrix component", e))?;
        }

        Ok(())
    }
}

impl From<Array2<f32>> for Matrix {
    fn from(inner: Array2<f32>) -> Self {
        Matrix { inner }
    }
}

/// Matrix shared across training threads without synchronization.
///
/// Rows may be read and written concurrently by multiple workers.
/// Interleaved updates to the same row can drop each other's writes;
/// asynchronous SGD tolerates these lost updates.
pub(crate) struct HogwildMatrix {
    inner: UnsafeCell<Matrix>,
}

unsafe impl Sync for HogwildMatrix {}

impl HogwildMatrix {
    pub fn new(matrix: Matrix) -> Self {
        HogwildMatrix {
            inner: UnsafeCell::new(matrix),
        }
    }

    pub fn into_inner(self) -> Matrix {
        self.inner.into_inner()
    }

    pub fn rows(&self) -> usize {
        self.get().rows()
    }

    fn get(&self) -> &Matrix {
        unsafe { &*self.inner.get() }
    }

    #[allow(clippy::mut_from_ref)]
    fn get_mut(&self) -> &mut Matrix {
        unsafe { &mut *self.inner.get() }
    }

    /// Dot product of a row with the given vector.
    pub fn dot_row(&self, vec: ArrayView1<f32>, idx: usize) -> f32 {
        self.get().dot_row(vec, idx)
    }

    /// Add a row to the accumulator, scaled.
    pub fn add_row_to(&self, acc: &mut Array1<f32>, idx: usize, scale: f32) {
        acc.scaled_add(scale, &self.get().row(idx));
    }

    /// Add a scaled vector to a row.
    pub fn add_to_row(&self, idx: usize, vec: ArrayView1<f32>, scale: f32) {
        self.get_mut().row_mut(idx).scaled_add(scale, &vec);
    }
}
