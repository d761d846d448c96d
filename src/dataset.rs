//! Labelled n-dimensional arrays used by every acquisition.
//!
//! A [`Dataset`] holds coordinate and data variables whose axes are named,
//! plus free-form attributes. Times are stored as epoch seconds with NaN as
//! not-a-time, so every variable is a plain `f64` array.

use crate::types::{ColocError, ColocResult};
use ndarray::{Array1, Array2, ArrayD, ArrayViewD, Axis, IxDyn, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute value attached to a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Text(String),
    Int(i64),
    Float(f64),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Text(_) => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(s) => write!(f, "{}", s),
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

/// Broadcast `data` (axes named `dims`) onto `target_dims` with `target_shape`.
///
/// Every source dimension must exist in the target with the same length;
/// missing target dimensions are repeated.
fn broadcast_named<T: Clone>(
    dims: &[String],
    data: &ArrayD<T>,
    target_dims: &[String],
    target_shape: &[usize],
) -> ColocResult<ArrayD<T>> {
    let mut positions = Vec::with_capacity(dims.len());
    for (axis, dim) in dims.iter().enumerate() {
        let position = target_dims.iter().position(|d| d == dim).ok_or_else(|| {
            ColocError::Processing(format!(
                "dimension '{}' is not part of {:?}",
                dim, target_dims
            ))
        })?;
        if data.shape()[axis] != target_shape[position] {
            return Err(ColocError::Processing(format!(
                "dimension '{}' has length {} but {} was expected",
                dim,
                data.shape()[axis],
                target_shape[position]
            )));
        }
        positions.push((position, axis));
    }
    positions.sort_unstable();
    let permutation: Vec<usize> = positions.iter().map(|(_, axis)| *axis).collect();

    let mut view: ArrayViewD<T> = data.view().permuted_axes(IxDyn(&permutation));
    for (index, dim) in target_dims.iter().enumerate() {
        if !dims.contains(dim) {
            view = view.insert_axis(Axis(index));
        }
    }
    let broadcast = view.broadcast(IxDyn(target_shape)).ok_or_else(|| {
        ColocError::Processing(format!("cannot broadcast {:?} onto {:?}", dims, target_dims))
    })?;
    Ok(broadcast.to_owned())
}

/// Union of two named shapes, keeping the order of `a` then the new dims of `b`
pub(crate) fn union_dims(
    a_dims: &[String],
    a_shape: &[usize],
    b_dims: &[String],
    b_shape: &[usize],
) -> (Vec<String>, Vec<usize>) {
    let mut dims = a_dims.to_vec();
    let mut shape = a_shape.to_vec();
    for (dim, len) in b_dims.iter().zip(b_shape) {
        if !dims.contains(dim) {
            dims.push(dim.clone());
            shape.push(*len);
        }
    }
    (dims, shape)
}

/// A named-axis `f64` array
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub dims: Vec<String>,
    pub data: ArrayD<f64>,
}

impl Variable {
    pub fn new(dims: &[&str], data: ArrayD<f64>) -> ColocResult<Self> {
        if dims.len() != data.ndim() {
            return Err(ColocError::Processing(format!(
                "{} dimension names given for a {}-dimensional array",
                dims.len(),
                data.ndim()
            )));
        }
        Ok(Self {
            dims: dims.iter().map(|d| d.to_string()).collect(),
            data,
        })
    }

    pub fn from_vec(dim: &str, values: Vec<f64>) -> Self {
        Self {
            dims: vec![dim.to_string()],
            data: Array1::from(values).into_dyn(),
        }
    }

    pub fn from_array2(dims: [&str; 2], values: Array2<f64>) -> Self {
        Self {
            dims: dims.iter().map(|d| d.to_string()).collect(),
            data: values.into_dyn(),
        }
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            dims: Vec::new(),
            data: ArrayD::from_elem(IxDyn(&[]), value),
        }
    }

    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn len_of(&self, dim: &str) -> Option<usize> {
        self.axis_of(dim).map(|axis| self.data.shape()[axis])
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.axis_of(dim).is_some()
    }

    /// Values of a 1D variable
    pub fn values_1d(&self) -> ColocResult<Vec<f64>> {
        if self.data.ndim() > 1 {
            return Err(ColocError::Processing(format!(
                "expected a 1D variable, got dimensions {:?}",
                self.dims
            )));
        }
        Ok(self.data.iter().copied().collect())
    }

    pub fn finite_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().copied().filter(|v| v.is_finite())
    }

    pub fn finite_min(&self) -> Option<f64> {
        self.finite_values().fold(None, |acc, v| match acc {
            Some(m) if m <= v => Some(m),
            _ => Some(v),
        })
    }

    pub fn finite_max(&self) -> Option<f64> {
        self.finite_values().fold(None, |acc, v| match acc {
            Some(m) if m >= v => Some(m),
            _ => Some(v),
        })
    }

    /// Mask of the finite samples
    pub fn finite_mask(&self) -> Mask {
        self.predicate_mask(|v| v.is_finite())
    }

    pub fn predicate_mask<F: Fn(f64) -> bool>(&self, predicate: F) -> Mask {
        Mask {
            dims: self.dims.clone(),
            data: self.data.mapv(predicate),
        }
    }

    /// Data broadcast onto a named shape
    pub fn broadcast_to(&self, dims: &[String], shape: &[usize]) -> ColocResult<ArrayD<f64>> {
        broadcast_named(&self.dims, &self.data, dims, shape)
    }

    /// Replace samples where `mask` is false by NaN.
    ///
    /// When the mask carries dimensions the variable lacks, the variable is
    /// broadcast onto the union first.
    pub fn masked(&self, mask: &Mask) -> ColocResult<Variable> {
        let (dims, shape) = union_dims(&self.dims, self.data.shape(), &mask.dims, mask.data.shape());
        let mut data = if dims.len() == self.dims.len() {
            self.data.clone()
        } else {
            self.broadcast_to(&dims, &shape)?
        };
        let keep = broadcast_named(&mask.dims, &mask.data, &dims, &shape)?;
        Zip::from(&mut data).and(&keep).for_each(|value, &k| {
            if !k {
                *value = f64::NAN;
            }
        });
        Ok(Variable { dims, data })
    }

    fn renamed_dim(mut self, old: &str, new: &str) -> Self {
        for dim in self.dims.iter_mut() {
            if dim == old {
                *dim = new.to_string();
            }
        }
        self
    }

    fn index_axis(&self, dim: &str, index: usize) -> Variable {
        match self.axis_of(dim) {
            Some(axis) => {
                let mut dims = self.dims.clone();
                dims.remove(axis);
                Variable {
                    dims,
                    data: self.data.index_axis(Axis(axis), index).to_owned(),
                }
            }
            None => self.clone(),
        }
    }

    fn select(&self, dim: &str, indices: &[usize]) -> Variable {
        match self.axis_of(dim) {
            Some(axis) => Variable {
                dims: self.dims.clone(),
                data: self.data.select(Axis(axis), indices),
            },
            None => self.clone(),
        }
    }

    /// Permute axes so that `trailing` come last, in the given order
    pub fn with_trailing_dims(&self, trailing: &[&str]) -> Variable {
        if !trailing.iter().all(|d| self.has_dim(d)) {
            return self.clone();
        }
        let mut order: Vec<usize> = (0..self.dims.len())
            .filter(|&axis| !trailing.contains(&self.dims[axis].as_str()))
            .collect();
        for dim in trailing {
            if let Some(axis) = self.axis_of(dim) {
                order.push(axis);
            }
        }
        let dims = order.iter().map(|&axis| self.dims[axis].clone()).collect();
        Variable {
            dims,
            data: self.data.clone().permuted_axes(IxDyn(&order)),
        }
    }
}

/// Named-axis boolean array
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub dims: Vec<String>,
    pub data: ArrayD<bool>,
}

impl Mask {
    pub fn new(dims: &[&str], data: ArrayD<bool>) -> ColocResult<Self> {
        if dims.len() != data.ndim() {
            return Err(ColocError::Processing(format!(
                "{} dimension names given for a {}-dimensional mask",
                dims.len(),
                data.ndim()
            )));
        }
        Ok(Self {
            dims: dims.iter().map(|d| d.to_string()).collect(),
            data,
        })
    }

    /// Element-wise conjunction, broadcasting both masks onto the union of their dimensions
    pub fn and(&self, other: &Mask) -> ColocResult<Mask> {
        let (dims, shape) = union_dims(&self.dims, self.data.shape(), &other.dims, other.data.shape());
        let mut data = broadcast_named(&self.dims, &self.data, &dims, &shape)?;
        let rhs = broadcast_named(&other.dims, &other.data, &dims, &shape)?;
        Zip::from(&mut data).and(&rhs).for_each(|a, &b| *a = *a && b);
        Ok(Mask { dims, data })
    }

    pub fn any(&self) -> bool {
        self.data.iter().any(|&v| v)
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// Stack per-segment masks along a new leading dimension
    pub fn stack(dim: &str, masks: &[Mask]) -> ColocResult<Mask> {
        let first = masks
            .first()
            .ok_or_else(|| ColocError::Processing("no mask to stack".to_string()))?;
        if masks.iter().any(|m| m.dims != first.dims) {
            return Err(ColocError::Processing(
                "stacked masks must share their dimensions".to_string(),
            ));
        }
        let views: Vec<_> = masks.iter().map(|m| m.data.view()).collect();
        let data = ndarray::stack(Axis(0), &views)
            .map_err(|e| ColocError::Processing(format!("cannot stack masks: {}", e)))?;
        let mut dims = vec![dim.to_string()];
        dims.extend(first.dims.iter().cloned());
        Ok(Mask { dims, data })
    }
}

/// Coordinates, data variables and attributes sharing named dimensions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub coords: BTreeMap<String, Variable>,
    pub data_vars: BTreeMap<String, Variable>,
    pub attrs: BTreeMap<String, AttrValue>,
    /// EPSG code of the horizontal reference system, when known
    pub crs: Option<u32>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_coord(mut self, name: &str, variable: Variable) -> Self {
        self.coords.insert(name.to_string(), variable);
        self
    }

    pub fn with_var(mut self, name: &str, variable: Variable) -> Self {
        self.data_vars.insert(name.to_string(), variable);
        self
    }

    pub fn with_attr<V: Into<AttrValue>>(mut self, name: &str, value: V) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    /// Coordinate or data variable by name
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.coords.get(name).or_else(|| self.data_vars.get(name))
    }

    pub fn require(&self, name: &str) -> ColocResult<&Variable> {
        self.get(name)
            .ok_or_else(|| ColocError::MissingVariable(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn variables(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.coords.iter().chain(self.data_vars.iter())
    }

    /// Dimension lengths across every variable
    pub fn dims(&self) -> BTreeMap<String, usize> {
        let mut dims = BTreeMap::new();
        for (_, variable) in self.variables() {
            for (dim, len) in variable.dims.iter().zip(variable.data.shape()) {
                dims.entry(dim.clone()).or_insert(*len);
            }
        }
        dims
    }

    pub fn dim_len(&self, dim: &str) -> ColocResult<usize> {
        self.dims()
            .get(dim)
            .copied()
            .ok_or_else(|| ColocError::MissingVariable(format!("dimension {}", dim)))
    }

    /// True when every dimension has length zero
    pub fn are_dimensions_empty(&self) -> bool {
        self.dims().values().all(|&len| len == 0)
    }

    /// True when at least one dimension has length zero
    pub fn has_empty_dimension(&self) -> bool {
        self.dims().values().any(|&len| len == 0)
    }

    /// Rename a variable and the dimension of the same name
    pub fn rename(mut self, old: &str, new: &str) -> Dataset {
        if old == new {
            return self;
        }
        if let Some(variable) = self.coords.remove(old) {
            self.coords.insert(new.to_string(), variable);
        }
        if let Some(variable) = self.data_vars.remove(old) {
            self.data_vars.insert(new.to_string(), variable);
        }
        self.coords = std::mem::take(&mut self.coords)
            .into_iter()
            .map(|(k, v)| (k, v.renamed_dim(old, new)))
            .collect();
        self.data_vars = std::mem::take(&mut self.data_vars)
            .into_iter()
            .map(|(k, v)| (k, v.renamed_dim(old, new)))
            .collect();
        self
    }

    /// Select one index along `dim`; the coordinate of that dimension is kept as a scalar
    pub fn isel(&self, dim: &str, index: usize) -> ColocResult<Dataset> {
        let len = self.dim_len(dim)?;
        if index >= len {
            return Err(ColocError::Processing(format!(
                "index {} out of bounds for dimension {} of length {}",
                index, dim, len
            )));
        }
        Ok(Dataset {
            coords: self
                .coords
                .iter()
                .map(|(k, v)| (k.clone(), v.index_axis(dim, index)))
                .collect(),
            data_vars: self
                .data_vars
                .iter()
                .map(|(k, v)| (k.clone(), v.index_axis(dim, index)))
                .collect(),
            attrs: self.attrs.clone(),
            crs: self.crs,
        })
    }

    pub fn select_indices(&self, dim: &str, indices: &[usize]) -> Dataset {
        Dataset {
            coords: self
                .coords
                .iter()
                .map(|(k, v)| (k.clone(), v.select(dim, indices)))
                .collect(),
            data_vars: self
                .data_vars
                .iter()
                .map(|(k, v)| (k.clone(), v.select(dim, indices)))
                .collect(),
            attrs: self.attrs.clone(),
            crs: self.crs,
        }
    }

    /// Set data variables to NaN where `mask` is false.
    ///
    /// Only data variables spanning every mask dimension are touched; coordinates are kept.
    pub fn where_mask(&self, mask: &Mask) -> ColocResult<Dataset> {
        let mut data_vars = BTreeMap::new();
        for (name, variable) in &self.data_vars {
            let masked = if mask.dims.iter().all(|d| variable.has_dim(d)) {
                variable.masked(mask)?
            } else {
                variable.clone()
            };
            data_vars.insert(name.clone(), masked);
        }
        Ok(Dataset {
            coords: self.coords.clone(),
            data_vars,
            attrs: self.attrs.clone(),
            crs: self.crs,
        })
    }

    /// Drop every index along each mask dimension whose slice holds no true value
    pub fn drop_false(&self, mask: &Mask) -> Dataset {
        let mut result = self.clone();
        for (axis, dim) in mask.dims.iter().enumerate() {
            let keep: Vec<usize> = (0..mask.data.shape()[axis])
                .filter(|&i| mask.data.index_axis(Axis(axis), i).iter().any(|&v| v))
                .collect();
            if keep.len() != mask.data.shape()[axis] {
                result = result.select_indices(dim, &keep);
            }
        }
        result
    }

    /// Mask then drop fully-masked indices
    pub fn where_drop(&self, mask: &Mask) -> ColocResult<Dataset> {
        Ok(self.where_mask(mask)?.drop_false(mask))
    }

    /// Drop indices along `dim` where every data variable spanning it is NaN
    pub fn dropna_all(&self, dim: &str) -> Dataset {
        let spanning: Vec<&Variable> = self.data_vars.values().filter(|v| v.has_dim(dim)).collect();
        let len = match spanning.first().and_then(|v| v.len_of(dim)) {
            Some(len) => len,
            None => return self.clone(),
        };
        let keep: Vec<usize> = (0..len)
            .filter(|&i| {
                spanning.iter().any(|v| {
                    v.axis_of(dim)
                        .map(|axis| v.data.index_axis(Axis(axis), i).iter().any(|x| x.is_finite()))
                        .unwrap_or(false)
                })
            })
            .collect();
        if keep.len() == len {
            self.clone()
        } else {
            self.select_indices(dim, &keep)
        }
    }

    pub fn drop_vars<S: AsRef<str>>(mut self, names: &[S]) -> Dataset {
        for name in names {
            self.coords.remove(name.as_ref());
            self.data_vars.remove(name.as_ref());
        }
        self
    }

    /// Remove length-one dimensions except those listed in `keep`
    pub fn squeeze_except(&self, keep: &[&str]) -> ColocResult<Dataset> {
        let mut result = self.clone();
        for (dim, len) in self.dims() {
            if len == 1 && !keep.contains(&dim.as_str()) {
                result = result.isel(&dim, 0)?;
            }
        }
        Ok(result)
    }

    /// Drop coordinate `name` when no data variable spans the dimension of that name
    pub fn drop_unused_dim_coord(self, name: &str) -> Dataset {
        if self.data_vars.values().any(|v| v.has_dim(name)) {
            self
        } else {
            self.drop_vars(&[name])
        }
    }

    /// Move `trailing` dimensions to the end of every variable spanning them
    pub fn with_trailing_dims(&self, trailing: &[&str]) -> Dataset {
        Dataset {
            coords: self.coords.clone(),
            data_vars: self
                .data_vars
                .iter()
                .map(|(k, v)| (k.clone(), v.with_trailing_dims(trailing)))
                .collect(),
            attrs: self.attrs.clone(),
            crs: self.crs,
        }
    }

    /// Put the latitude then longitude dimensions last, the layout written to products
    pub fn transpose_spatial(&self, lat_dim: &str, lon_dim: &str) -> Dataset {
        self.with_trailing_dims(&[lat_dim, lon_dim])
    }

    /// Finite-sample mask of a variable
    pub fn finite_mask(&self, name: &str) -> ColocResult<Mask> {
        Ok(self.require(name)?.finite_mask())
    }

    /// Merge with an override policy: entries of `other` replace those of `self`
    pub fn merge_override(&self, other: &Dataset) -> Dataset {
        let mut merged = self.clone();
        merged
            .coords
            .extend(other.coords.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
            .data_vars
            .extend(other.data_vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
            .attrs
            .extend(other.attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.crs = other.crs.or(self.crs);
        merged
    }

    pub fn text_attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(|v| v.as_text())
    }
}
