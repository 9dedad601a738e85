//! Tensor headers and the owned/borrowed buffer sum type (spec §3, §9).
//!
//! A buffer is either owning (heap-allocated, freed with its node) or
//! borrowing (points into an mmap whose lifetime exceeds the graph).
//! Mutating a borrowing buffer is forbidden; the type system enforces
//! this by only handing out `&mut` slices for the `Owned` variant.

use half::f16;

use crate::precision::Precision;

/// A tensor header: shape, element count, byte size, precision and an
/// optional dequantization scale (for I8 buffers).
#[derive(Debug, Clone, PartialEq)]
pub struct BufferDesc {
    pub shape: Vec<usize>,
    pub precision: Precision,
    pub scale: Option<f32>,
}

impl BufferDesc {
    pub fn new(shape: Vec<usize>, precision: Precision) -> Self {
        Self {
            shape,
            precision,
            scale: None,
        }
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn total_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn byte_size(&self) -> usize {
        self.total_elements() * self.precision.element_size()
    }
}

/// Owned, heap-allocated, precision-tagged contiguous storage.
#[derive(Debug, Clone)]
pub enum OwnedData {
    I8(Vec<i8>),
    F16(Vec<f16>),
    F32(Vec<f32>),
}

impl OwnedData {
    pub fn zeroed(precision: Precision, len: usize) -> Self {
        match precision {
            Precision::I8 => OwnedData::I8(vec![0i8; len]),
            Precision::F16 => OwnedData::F16(vec![f16::ZERO; len]),
            Precision::F32 => OwnedData::F32(vec![0.0f32; len]),
        }
    }

    pub fn precision(&self) -> Precision {
        match self {
            OwnedData::I8(_) => Precision::I8,
            OwnedData::F16(_) => Precision::F16,
            OwnedData::F32(_) => Precision::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            OwnedData::I8(v) => v.len(),
            OwnedData::F16(v) => v.len(),
            OwnedData::F32(v) => v.len(),
        }
    }

    pub fn as_view(&self) -> TypedSlice<'_> {
        match self {
            OwnedData::I8(v) => TypedSlice::I8(v),
            OwnedData::F16(v) => TypedSlice::F16(v),
            OwnedData::F32(v) => TypedSlice::F32(v),
        }
    }

    pub fn as_view_mut(&mut self) -> TypedSliceMut<'_> {
        match self {
            OwnedData::I8(v) => TypedSliceMut::I8(v),
            OwnedData::F16(v) => TypedSliceMut::F16(v),
            OwnedData::F32(v) => TypedSliceMut::F32(v),
        }
    }
}

/// A read-only typed view, either into owned storage or a borrowed mmap
/// region. `BorrowedData` relies on the model directory's weight files
/// being naturally aligned (spec §6), which is what makes reinterpreting
/// the mapped bytes as a typed slice sound.
#[derive(Debug, Clone, Copy)]
pub struct BorrowedData {
    ptr: *const u8,
    len: usize,
    precision: Precision,
}

impl BorrowedData {
    /// # Safety
    /// `ptr` must point to `len` naturally-aligned elements of `precision`
    /// that outlive every `Buffer::Borrowed` constructed from it.
    pub unsafe fn new(ptr: *const u8, len: usize, precision: Precision) -> Self {
        Self {
            ptr,
            len,
            precision,
        }
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_view(&self) -> TypedSlice<'_> {
        // SAFETY: upheld by the constructor's contract.
        unsafe {
            match self.precision {
                Precision::I8 => {
                    TypedSlice::I8(std::slice::from_raw_parts(self.ptr as *const i8, self.len))
                }
                Precision::F16 => {
                    TypedSlice::F16(std::slice::from_raw_parts(self.ptr as *const f16, self.len))
                }
                Precision::F32 => {
                    TypedSlice::F32(std::slice::from_raw_parts(self.ptr as *const f32, self.len))
                }
            }
        }
    }
}

// SAFETY: BorrowedData is a read-only view; the pointed-to region is
// never mutated through it and outlives the graph per its constructor's
// contract, so sharing the view across threads is sound.
unsafe impl Send for BorrowedData {}
unsafe impl Sync for BorrowedData {}

/// Data ownership as described in spec §3/§9.
#[derive(Debug, Clone)]
pub enum Buffer {
    Owned(OwnedData),
    Borrowed(BorrowedData),
    Unallocated,
}

impl Buffer {
    pub fn precision(&self) -> Option<Precision> {
        match self {
            Buffer::Owned(d) => Some(d.precision()),
            Buffer::Borrowed(d) => Some(d.precision()),
            Buffer::Unallocated => None,
        }
    }

    pub fn view(&self) -> TypedSlice<'_> {
        match self {
            Buffer::Owned(d) => d.as_view(),
            Buffer::Borrowed(d) => d.as_view(),
            Buffer::Unallocated => TypedSlice::F32(&[]),
        }
    }

    pub fn view_mut(&mut self) -> TypedSliceMut<'_> {
        match self {
            Buffer::Owned(d) => d.as_view_mut(),
            Buffer::Borrowed(_) => panic!("attempted to mutate a borrowed buffer"),
            Buffer::Unallocated => TypedSliceMut::F32(&mut []),
        }
    }
}

/// Typed, read-only contiguous view over a buffer's elements.
#[derive(Debug, Clone, Copy)]
pub enum TypedSlice<'a> {
    I8(&'a [i8]),
    F16(&'a [f16]),
    F32(&'a [f32]),
}

impl<'a> TypedSlice<'a> {
    pub fn len(&self) -> usize {
        match self {
            TypedSlice::I8(s) => s.len(),
            TypedSlice::F16(s) => s.len(),
            TypedSlice::F32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn precision(&self) -> Precision {
        match self {
            TypedSlice::I8(_) => Precision::I8,
            TypedSlice::F16(_) => Precision::F16,
            TypedSlice::F32(_) => Precision::F32,
        }
    }

    /// Dequantizes/widens every element to `f32`, applying `scale` for
    /// I8 data (a scale of `1.0` is used when none is given).
    pub fn to_f32_vec(&self, scale: Option<f32>) -> Vec<f32> {
        match self {
            TypedSlice::I8(s) => {
                let scale = scale.unwrap_or(1.0);
                s.iter().map(|&x| x as f32 * scale).collect()
            }
            TypedSlice::F16(s) => s.iter().map(|&x| x.to_f32()).collect(),
            TypedSlice::F32(s) => s.to_vec(),
        }
    }
}

#[derive(Debug)]
pub enum TypedSliceMut<'a> {
    I8(&'a mut [i8]),
    F16(&'a mut [f16]),
    F32(&'a mut [f32]),
}

impl<'a> TypedSliceMut<'a> {
    pub fn len(&self) -> usize {
        match self {
            TypedSliceMut::I8(s) => s.len(),
            TypedSliceMut::F16(s) => s.len(),
            TypedSliceMut::F32(s) => s.len(),
        }
    }

    /// Writes dequantized-to-real-precision `f32` values into this slice,
    /// quantizing/narrowing as needed. For I8 output, `scale` must be
    /// supplied by the caller (the node's `BufferDesc::scale`).
    pub fn write_from_f32(&mut self, values: &[f32], scale: Option<f32>) {
        debug_assert_eq!(self.len(), values.len());
        match self {
            TypedSliceMut::I8(s) => {
                let scale = scale.unwrap_or(1.0);
                for (dst, &v) in s.iter_mut().zip(values) {
                    let q = (v / scale).round();
                    *dst = q.clamp(-128.0, 127.0) as i8;
                }
            }
            TypedSliceMut::F16(s) => {
                for (dst, &v) in s.iter_mut().zip(values) {
                    *dst = f16::from_f32(v);
                }
            }
            TypedSliceMut::F32(s) => {
                s.copy_from_slice(values);
            }
        }
    }
}
