use std::{
    fmt,
    ops::{Deref, Index},
};

/// A dimension of a signature tensor. `Dynamic` carries a symbolic name (e.g. `batch`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    Fixed(usize),
    Dynamic(String),
}

pub type FixedDimension = usize;

#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct FixedDimensions(pub Vec<FixedDimension>);

impl Dimension {
    pub fn accepts(&self, dim: FixedDimension) -> bool {
        match self {
            Self::Fixed(d) => *d == dim,
            Self::Dynamic(_) => true,
        }
    }
}

impl fmt::Debug for FixedDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl FixedDimensions {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_elems(&self) -> usize {
        self.0.iter().product()
    }

    pub fn as_slice(&self) -> &[FixedDimension] {
        self.0.as_slice()
    }

    pub fn to_i64_vec(&self) -> Vec<i64> {
        self.0.iter().map(|&x| x as i64).collect()
    }

    pub fn from_i64(dims: &[i64]) -> Self {
        Self(dims.iter().map(|&x| x as FixedDimension).collect())
    }
}

impl Deref for FixedDimensions {
    type Target = [FixedDimension];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Index<usize> for FixedDimensions {
    type Output = FixedDimension;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl From<Vec<FixedDimension>> for FixedDimensions {
    fn from(v: Vec<FixedDimension>) -> FixedDimensions {
        FixedDimensions(v)
    }
}

#[test]
fn total_elems() {
    assert_eq!(FixedDimensions(vec![1, 1, 28, 28]).total_elems(), 784);
    assert_eq!(FixedDimensions(vec![]).total_elems(), 1);
}

#[test]
fn dynamic_dimension_accepts_anything() {
    assert!(Dimension::Dynamic("batch".into()).accepts(7));
    assert!(Dimension::Fixed(3).accepts(3));
    assert!(!Dimension::Fixed(3).accepts(4));
}
