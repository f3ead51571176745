use std::cell::RefCell;

use crate::dim::{Dimension, FixedDimensions};
use ndarray::{ArrayD, ArrayViewD, IxDyn, ShapeError};
use rand::{rngs::StdRng, thread_rng, Rng, SeedableRng};

thread_local!(static RNG: RefCell<StdRng> =
    RefCell::new(StdRng::from_rng(thread_rng()).expect("Failed to seed StdRng.")));

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dims: FixedDimensions,
    data: TensorData,
}

/// Element storage of a [`Tensor`]. Always laid out in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Bool(Vec<bool>),
    F32(Vec<f32>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

/// Represents a type and shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypedShape {
    pub dims: Vec<Dimension>,
    pub elem_ty: TensorElemType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorElemType {
    Bool,
    F32,
    I32,
    I64,
}

pub trait TensorElemTypeExt: PartialEq + PartialOrd + Copy {
    fn get_type() -> TensorElemType;
    fn zero() -> Self;
    fn close(a: Self, b: Self) -> bool;
    fn slice(data: &TensorData) -> Option<&[Self]>;
    fn wrap(data: Vec<Self>) -> TensorData;
}

impl Tensor {
    pub fn new<T: TensorElemTypeExt>(dims: FixedDimensions, data: Vec<T>) -> Self {
        debug_assert_eq!(dims.total_elems(), data.len());
        Self {
            dims,
            data: T::wrap(data),
        }
    }

    pub fn from_data(dims: FixedDimensions, data: TensorData) -> Self {
        Self { dims, data }
    }

    pub fn zeros<T: TensorElemTypeExt>(dims: FixedDimensions) -> Self {
        let total_elems = dims.total_elems();
        Self::new(dims, vec![T::zero(); total_elems])
    }

    /// Samples `f32` elements uniformly from `[low, high)`.
    pub fn rand_range(dims: FixedDimensions, low: f32, high: f32) -> Self {
        let total_elems = dims.total_elems();
        Self::new(
            dims,
            RNG.with(|r| {
                let mut r = r.borrow_mut();
                (0..total_elems)
                    .map(|_| r.gen_range(low..high))
                    .collect::<Vec<f32>>()
            }),
        )
    }

    pub fn seed_rng_from_u64(seed: u64) {
        RNG.with(|r| *r.borrow_mut() = StdRng::seed_from_u64(seed));
    }

    pub fn dims(&self) -> &FixedDimensions {
        &self.dims
    }

    pub fn elem_ty(&self) -> TensorElemType {
        match self.data {
            TensorData::Bool(_) => TensorElemType::Bool,
            TensorData::F32(_) => TensorElemType::F32,
            TensorData::I32(_) => TensorElemType::I32,
            TensorData::I64(_) => TensorElemType::I64,
        }
    }

    pub fn total_elems(&self) -> usize {
        self.dims.total_elems()
    }

    pub fn is_empty(&self) -> bool {
        self.total_elems() == 0
    }

    pub fn raw(&self) -> &TensorData {
        &self.data
    }

    /// Panics if `T` is not the element type of this tensor.
    pub fn data<T: TensorElemTypeExt>(&self) -> &[T] {
        assert_eq!(self.elem_ty(), T::get_type());
        T::slice(&self.data).unwrap_or_default()
    }

    pub fn try_data<T: TensorElemTypeExt>(&self) -> Option<&[T]> {
        T::slice(&self.data)
    }

    pub fn allclose<T: TensorElemTypeExt>(&self, other: &[T]) -> bool {
        let Some(x) = self.try_data::<T>() else {
            return false;
        };
        x.len() == other.len() && x.iter().zip(other.iter()).all(|(&x, &y)| T::close(x, y))
    }

    pub fn verify(&self) -> bool {
        let len = match &self.data {
            TensorData::Bool(v) => v.len(),
            TensorData::F32(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I64(v) => v.len(),
        };
        len == self.dims.total_elems()
    }

    pub fn view<T: TensorElemTypeExt>(&self) -> Option<Result<ArrayViewD<'_, T>, ShapeError>> {
        self.try_data::<T>()
            .map(|data| ArrayViewD::from_shape(IxDyn(self.dims.as_slice()), data))
    }

    pub fn from_array<T: TensorElemTypeExt>(array: ArrayD<T>) -> Self {
        let dims = FixedDimensions(array.shape().to_vec());
        let data = if array.is_standard_layout() {
            array.into_raw_vec()
        } else {
            array.iter().copied().collect()
        };
        Self::new(dims, data)
    }

    /// Concatenates `tensors` along the leading axis. Returns `None` when element types or
    /// trailing dimensions disagree, or when `tensors` is empty.
    pub fn concat_leading(tensors: &[&Tensor]) -> Option<Tensor> {
        let (first, rest) = tensors.split_first()?;
        if first.dims.is_empty() {
            return None;
        }
        let mut dims = first.dims.clone();
        let mut data = first.data.clone();
        for t in rest {
            if t.dims.len() != dims.len() || t.dims.as_slice()[1..] != dims.as_slice()[1..] {
                return None;
            }
            dims.0[0] += t.dims[0];
            match (&mut data, &t.data) {
                (TensorData::Bool(d), TensorData::Bool(s)) => d.extend_from_slice(s),
                (TensorData::F32(d), TensorData::F32(s)) => d.extend_from_slice(s),
                (TensorData::I32(d), TensorData::I32(s)) => d.extend_from_slice(s),
                (TensorData::I64(d), TensorData::I64(s)) => d.extend_from_slice(s),
                _ => return None,
            }
        }
        Some(Tensor { dims, data })
    }
}

impl TypedShape {
    pub fn new(dims: Vec<Dimension>, elem_ty: TensorElemType) -> Self {
        Self { dims, elem_ty }
    }

    pub fn fixed(dims: &[usize], elem_ty: TensorElemType) -> Self {
        Self {
            dims: dims.iter().map(|&d| Dimension::Fixed(d)).collect(),
            elem_ty,
        }
    }

    /// Returns true if `tensor` has this element type and a compatible shape.
    pub fn accepts(&self, tensor: &Tensor) -> bool {
        tensor.elem_ty() == self.elem_ty
            && tensor.dims().len() == self.dims.len()
            && self
                .dims
                .iter()
                .zip(tensor.dims().iter())
                .all(|(d, &n)| d.accepts(n))
    }
}

impl TensorElemTypeExt for f32 {
    fn get_type() -> TensorElemType {
        TensorElemType::F32
    }

    fn zero() -> Self {
        0.
    }

    fn close(a: Self, b: Self) -> bool {
        (a - b).abs() < 1e-5
    }

    fn slice(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }

    fn wrap(data: Vec<Self>) -> TensorData {
        TensorData::F32(data)
    }
}

impl TensorElemTypeExt for i32 {
    fn get_type() -> TensorElemType {
        TensorElemType::I32
    }

    fn zero() -> Self {
        0
    }

    fn close(a: Self, b: Self) -> bool {
        a == b
    }

    fn slice(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::I32(v) => Some(v),
            _ => None,
        }
    }

    fn wrap(data: Vec<Self>) -> TensorData {
        TensorData::I32(data)
    }
}

impl TensorElemTypeExt for i64 {
    fn get_type() -> TensorElemType {
        TensorElemType::I64
    }

    fn zero() -> Self {
        0
    }

    fn close(a: Self, b: Self) -> bool {
        a == b
    }

    fn slice(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::I64(v) => Some(v),
            _ => None,
        }
    }

    fn wrap(data: Vec<Self>) -> TensorData {
        TensorData::I64(data)
    }
}

impl TensorElemTypeExt for bool {
    fn get_type() -> TensorElemType {
        TensorElemType::Bool
    }

    fn zero() -> Self {
        false
    }

    fn close(a: Self, b: Self) -> bool {
        a == b
    }

    fn slice(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::Bool(v) => Some(v),
            _ => None,
        }
    }

    fn wrap(data: Vec<Self>) -> TensorData {
        TensorData::Bool(data)
    }
}

#[test]
fn concat_along_leading_axis() {
    let a = Tensor::new(vec![1, 2].into(), vec![1.0f32, 2.0]);
    let b = Tensor::new(vec![2, 2].into(), vec![3.0f32, 4.0, 5.0, 6.0]);
    let c = Tensor::concat_leading(&[&a, &b]).unwrap();
    assert_eq!(c.dims().as_slice(), &[3, 2]);
    assert_eq!(c.data::<f32>(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    let d = Tensor::new(vec![1, 3].into(), vec![0.0f32; 3]);
    assert!(Tensor::concat_leading(&[&a, &d]).is_none());
    let e = Tensor::new(vec![1, 2].into(), vec![0i64; 2]);
    assert!(Tensor::concat_leading(&[&a, &e]).is_none());
}

#[test]
fn typed_shape_accepts() {
    let shape = TypedShape::new(
        vec![Dimension::Dynamic("batch".into()), Dimension::Fixed(2)],
        TensorElemType::F32,
    );
    assert!(shape.accepts(&Tensor::zeros::<f32>(vec![5, 2].into())));
    assert!(!shape.accepts(&Tensor::zeros::<f32>(vec![5, 3].into())));
    assert!(!shape.accepts(&Tensor::zeros::<i32>(vec![5, 2].into())));
    assert!(!shape.accepts(&Tensor::zeros::<f32>(vec![2].into())));
}

#[test]
fn array_round_trip_keeps_logical_order() {
    let t = Tensor::new(vec![2, 3].into(), vec![0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0]);
    let view = t.view::<f32>().unwrap().unwrap();
    let transposed = view.t().to_owned();
    let t2 = Tensor::from_array(transposed);
    assert_eq!(t2.dims().as_slice(), &[3, 2]);
    assert_eq!(t2.data::<f32>(), &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
}
