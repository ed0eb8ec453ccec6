// src/array.rs
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{OpeError, OpeResult};

/// Dense row-major array whose dimensionality is only known at runtime.
///
/// Inputs arrive from external collaborators (policies, reward models,
/// serialized logs), so shape is checked where the data is consumed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NdArray<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: Copy> NdArray<T> {
    pub fn from_shape_vec(shape: Vec<usize>, data: Vec<T>) -> OpeResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(OpeError::Shape(format!(
                "shape {:?} expects {} elements, but {} were given",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn full(shape: Vec<usize>, value: T) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![value; len],
        }
    }

    /// Builds a 3-D array from nested `[round][action][slot]` vectors.
    pub fn from_nested(nested: Vec<Vec<Vec<T>>>) -> OpeResult<Self> {
        let d0 = nested.len();
        let d1 = nested.first().map_or(0, |m| m.len());
        let d2 = nested
            .first()
            .and_then(|m| m.first())
            .map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(d0 * d1 * d2);
        for matrix in nested {
            if matrix.len() != d1 {
                return Err(OpeError::Shape("nested array is ragged".to_string()));
            }
            for row in matrix {
                if row.len() != d2 {
                    return Err(OpeError::Shape("nested array is ragged".to_string()));
                }
                data.extend(row);
            }
        }
        Ok(Self {
            shape: vec![d0, d1, d2],
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Length of the first axis.
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Element of a 3-D array. Callers validate the shape first.
    pub fn get3(&self, i: usize, j: usize, k: usize) -> T {
        self.data[(i * self.shape[1] + j) * self.shape[2] + k]
    }

    /// Drops the last axis by taking index `k` along it.
    pub fn slice_last_axis(&self, k: usize) -> OpeResult<Self> {
        let last = *self
            .shape
            .last()
            .ok_or_else(|| OpeError::Shape("cannot slice a 0D array".to_string()))?;
        if k >= last {
            return Err(OpeError::Value(format!(
                "index {} out of bounds for last axis of size {}",
                k, last
            )));
        }
        let data = self.data.iter().skip(k).step_by(last).copied().collect();
        Ok(Self {
            shape: self.shape[..self.shape.len() - 1].to_vec(),
            data,
        })
    }

    /// Appends a trailing axis of length 1.
    pub fn insert_last_axis(mut self) -> Self {
        self.shape.push(1);
        self
    }
}

// Deserialized arrays go through the same element-count check as `from_shape_vec`.
impl<'de, T> Deserialize<'de> for NdArray<T>
where
    T: Deserialize<'de> + Copy,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct RawNdArray<T> {
            shape: Vec<usize>,
            data: Vec<T>,
        }

        let raw = RawNdArray::<T>::deserialize(deserializer)?;
        NdArray::from_shape_vec(raw.shape, raw.data).map_err(serde::de::Error::custom)
    }
}
