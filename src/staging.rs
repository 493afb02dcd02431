//! Address-stable staging storage handed to the driver during a write.
//!
//! Drivers read staged samples straight from process memory by address, so the storage must
//! not move while a write is in flight. A [`StagingArena`] owns one fixed boxed allocation.
//! [`StagingArena::pin`] lends it out as [`PinnedSamples`]; the lease mutably borrows the
//! arena, so the allocation cannot be replaced until the lease is dropped, and dropping the
//! lease releases the pin on every exit path, including errors and unwinding.
use ndarray::ArrayView2;

use crate::Error;
use crate::Sample;

/// Reusable, row-major `f64` staging storage.
#[derive(Debug, Default)]
pub struct StagingArena {
    storage: Box<[f64]>,
    pinned: bool,
}

impl StagingArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(samples: usize) -> Self {
        Self {
            storage: vec![0.0; samples].into_boxed_slice(),
            pinned: false,
        }
    }

    /// Number of `f64` samples the arena can stage without reallocating.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Whether a [`PinnedSamples`] lease is outstanding.
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Lease `rows` × `cols` samples. Grows the allocation first if it is too small.
    pub fn pin(&mut self, rows: usize, cols: usize) -> PinnedSamples<'_> {
        if self.pinned {
            log::warn!("staging arena was never unpinned, a lease has been leaked");
        }
        let len = rows * cols;
        if self.storage.len() < len {
            log::trace!("growing staging arena from {} to {len} samples", self.storage.len());
            self.storage = vec![0.0; len].into_boxed_slice();
        }
        self.pinned = true;
        PinnedSamples {
            data: &mut self.storage[..len],
            rows,
            cols,
            pinned: &mut self.pinned,
        }
    }
}

/// Staged samples, laid out row-major with one row per channel. Unpins on drop.
#[derive(Debug)]
pub struct PinnedSamples<'a> {
    data: &'a mut [f64],
    rows: usize,
    cols: usize,
    pinned: &'a mut bool,
}

impl PinnedSamples<'_> {
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Samples per channel.
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_slice(&self) -> &[f64] {
        self.data
    }

    /// Address of the first sample, stable until the lease is dropped.
    pub fn as_ptr(&self) -> *const f64 {
        self.data.as_ptr()
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.data[index * self.cols..(index + 1) * self.cols]
    }

    /// Fill the lease from `src`: a direct copy for contiguous `f64` buffers, an exact
    /// element-wise conversion otherwise.
    pub fn stage<S: Sample>(&mut self, src: ArrayView2<'_, S>) -> Result<(), Error> {
        if src.dim() != (self.rows, self.cols) {
            return Err(Error::Conversion(format!(
                "buffer is {:?}, staging area is {:?}",
                src.dim(),
                (self.rows, self.cols)
            )));
        }

        if let Some(s) = src.as_slice().and_then(S::as_f64_slice) {
            self.data.copy_from_slice(s);
            return Ok(());
        }

        for (dst, ((row, col), v)) in self.data.iter_mut().zip(src.indexed_iter()) {
            *dst = v.to_f64().ok_or_else(|| {
                Error::Conversion(format!(
                    "{:?} sample at ({row}, {col}) has no exact f64 representation",
                    S::DEPTH
                ))
            })?;
        }
        Ok(())
    }
}

impl Drop for PinnedSamples<'_> {
    fn drop(&mut self) {
        *self.pinned = false;
    }
}
