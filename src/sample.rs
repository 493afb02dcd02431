//! Element types accepted in sample buffers and their conversion to `f64`.
use ndarray::ArrayBase;
use ndarray::ArrayView2;
use ndarray::Data;
use ndarray::Ix2;

/// Numeric representation of buffer elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

// Largest magnitude below which every integer has an exact f64 representation.
const MAX_EXACT_INT: u64 = 1 << f64::MANTISSA_DIGITS;

/// An element type that can be staged as device samples.
pub trait Sample: Copy + Send + Sync + 'static {
    const DEPTH: Depth;

    /// Convert to `f64`, or `None` if the value has no exact `f64` representation.
    fn to_f64(self) -> Option<f64>;

    /// Reinterpret a slice as `f64` samples, if the element type already is `f64`.
    fn as_f64_slice(_s: &[Self]) -> Option<&[f64]> {
        None
    }
}

macro_rules! widening {
    ($($t:ty => $depth:ident),*) => {
        $(
            impl Sample for $t {
                const DEPTH: Depth = Depth::$depth;

                fn to_f64(self) -> Option<f64> {
                    Some(f64::from(self))
                }
            }
        )*
    };
}

widening!(u8 => U8, i8 => I8, u16 => U16, i16 => I16, u32 => U32, i32 => I32, f32 => F32);

impl Sample for u64 {
    const DEPTH: Depth = Depth::U64;

    fn to_f64(self) -> Option<f64> {
        (self <= MAX_EXACT_INT).then_some(self as f64)
    }
}

impl Sample for i64 {
    const DEPTH: Depth = Depth::I64;

    fn to_f64(self) -> Option<f64> {
        (self.unsigned_abs() <= MAX_EXACT_INT).then_some(self as f64)
    }
}

impl Sample for f64 {
    const DEPTH: Depth = Depth::F64;

    fn to_f64(self) -> Option<f64> {
        Some(self)
    }

    fn as_f64_slice(s: &[Self]) -> Option<&[f64]> {
        Some(s)
    }
}

/// A two-dimensional buffer with one row per channel and one column per sample.
pub trait SampleBuffer {
    type Elem: Sample;

    fn samples(&self) -> ArrayView2<'_, Self::Elem>;
}

impl<S, A> SampleBuffer for ArrayBase<S, Ix2>
where
    S: Data<Elem = A>,
    A: Sample,
{
    type Elem = A;

    fn samples(&self) -> ArrayView2<'_, A> {
        self.view()
    }
}
