//! Unit-aware axes and n-dimensional datasets.

use crate::error::{ScanError, ScanResult};
use crate::units::{Quantity, Unit, UnitError};
use ndarray::{ArrayD, ArrayViewD, IxDyn, Slice};
use serde::{Deserialize, Serialize};

/// An ordered sequence of magnitudes sharing one [`Unit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    #[serde(default)]
    name: String,
    values: Vec<f64>,
    unit: Unit,
}

impl Axis {
    /// Longest axis [`Axis::arange`] will enumerate.
    pub const MAX_LEN: usize = 1 << 24;

    /// Unnamed axis over `values`.
    pub fn new(values: Vec<f64>, unit: Unit) -> Self {
        Self {
            name: String::new(),
            values,
            unit,
        }
    }

    /// Build an axis from quantities, converting all of them to the unit of
    /// the first one.
    pub fn from_quantities(quantities: &[Quantity]) -> Result<Self, UnitError> {
        let Some(first) = quantities.first() else {
            return Err(UnitError::Parse("empty quantity list".to_string()));
        };
        let unit = first.unit();
        let values = quantities
            .iter()
            .map(|q| q.value_in(unit))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(values, unit))
    }

    /// Half-open arithmetic sequence `[start, start + step, ...)` stopping
    /// before `stop`.
    ///
    /// `step` must point from `start` towards `stop`; a sequence whose next
    /// element lies within `1e-9 * |step|` of `stop` excludes that element.
    /// Non-finite arguments, or a span too wide to enumerate, give an empty
    /// axis.
    pub fn arange(start: f64, stop: f64, step: f64, unit: Unit) -> Self {
        let mut values = Vec::new();
        let finite = start.is_finite() && stop.is_finite() && step.is_finite();
        if !finite || step == 0.0 || (stop - start) * step <= 0.0 {
            return Self::new(values, unit);
        }
        let count = ((stop - start) / step).ceil();
        if !count.is_finite() || count > Self::MAX_LEN as f64 {
            return Self::new(values, unit);
        }

        let tolerance = 1e-9 * step.abs();
        let span = (stop - start).abs();
        let mut i = 0usize;
        loop {
            let offset = i as f64 * step;
            if offset.abs() >= span - tolerance {
                break;
            }
            values.push(start + offset);
            i += 1;
        }
        Self::new(values, unit)
    }

    /// `count` evenly spaced values from `start` to `stop`, both inclusive.
    pub fn linspace(start: f64, stop: f64, count: usize, unit: Unit) -> Self {
        let values = match count {
            0 => Vec::new(),
            1 => vec![start],
            n => {
                let delta = (stop - start) / (n - 1) as f64;
                (0..n).map(|i| start + i as f64 * delta).collect()
            }
        };
        Self::new(values, unit)
    }

    /// Sample index axis `0, 1, ..., len - 1` (dimensionless).
    pub fn index(len: usize) -> Self {
        Self::new((0..len).map(|i| i as f64).collect(), crate::units::DIMENSIONLESS)
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Display name (empty if unset)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unit of every position
    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Raw positions in [`Axis::unit`]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of positions
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the axis has no positions
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position at `index` as a quantity.
    pub fn get(&self, index: usize) -> Option<Quantity> {
        self.values.get(index).map(|v| Quantity::new(*v, self.unit))
    }

    /// First position
    pub fn first(&self) -> Option<Quantity> {
        self.get(0)
    }

    /// Last position
    pub fn last(&self) -> Option<Quantity> {
        self.values.last().map(|v| Quantity::new(*v, self.unit))
    }

    /// Positions as quantities, in order.
    pub fn iter(&self) -> impl Iterator<Item = Quantity> + '_ {
        self.values.iter().map(|v| Quantity::new(*v, self.unit))
    }

    /// Same positions expressed in `unit`.
    pub fn to_unit(&self, unit: Unit) -> Result<Axis, UnitError> {
        let values = self
            .iter()
            .map(|q| q.value_in(unit))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Axis {
            name: self.name.clone(),
            values,
            unit,
        })
    }

    /// Keep only the first `len` positions.
    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    /// Whether the values are non-strictly monotonic in either direction.
    pub fn is_monotonic(&self) -> bool {
        let ascending = self.values.windows(2).all(|w| w[0] <= w[1]);
        let descending = self.values.windows(2).all(|w| w[0] >= w[1]);
        ascending || descending
    }

    /// Whether the last value is smaller than the first.
    pub fn is_descending(&self) -> bool {
        match (self.values.first(), self.values.last()) {
            (Some(first), Some(last)) => last < first,
            _ => false,
        }
    }
}

// =============================================================================
// DataSet
// =============================================================================

/// An n-dimensional array of samples with a unit and one [`Axis`] per
/// dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    data: ArrayD<f64>,
    unit: Unit,
    axes: Vec<Axis>,
}

impl DataSet {
    /// Create a dataset, checking that the axes match the data shape.
    pub fn new(data: ArrayD<f64>, unit: Unit, axes: Vec<Axis>) -> ScanResult<Self> {
        check_shape(data.shape(), &axes)?;
        Ok(Self { data, unit, axes })
    }

    /// A single 0-dimensional sample.
    pub fn scalar(sample: Quantity) -> Self {
        Self {
            data: ArrayD::from_elem(IxDyn(&[]), sample.value()),
            unit: sample.unit(),
            axes: Vec::new(),
        }
    }

    /// A 1-d dataset over `axis`.
    pub fn from_vec(values: Vec<f64>, unit: Unit, axis: Axis) -> ScanResult<Self> {
        let data = ArrayD::from_shape_vec(IxDyn(&[values.len()]), values)?;
        Self::new(data, unit, vec![axis])
    }

    /// Sample values
    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    /// Unit of every sample
    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// One axis per dimension, leading dimension first
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Dimension lengths
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Sample at `index` (one entry per dimension).
    pub fn get(&self, index: &[usize]) -> Option<Quantity> {
        self.data
            .get(IxDyn(index))
            .map(|v| Quantity::new(*v, self.unit))
    }

    /// Re-check the axes/shape invariant.
    pub fn validate(&self) -> ScanResult<()> {
        check_shape(self.data.shape(), &self.axes)
    }

    /// Replace the axis of dimension `dim`; lengths must agree.
    pub fn replace_axis(&mut self, dim: usize, axis: Axis) -> ScanResult<()> {
        let Some(len) = self.data.shape().get(dim).copied() else {
            return Err(ScanError::Shape(format!(
                "dataset has {} dimensions, cannot replace axis {}",
                self.ndim(),
                dim
            )));
        };
        if axis.len() != len {
            return Err(ScanError::Shape(format!(
                "axis {} has {} entries but dimension has length {}",
                dim,
                axis.len(),
                len
            )));
        }
        self.axes[dim] = axis;
        Ok(())
    }

    /// Drop trailing entries along the leading dimension so that at most
    /// `len` remain.
    pub fn truncate_leading(&mut self, len: usize) -> ScanResult<()> {
        if self.ndim() == 0 {
            return Err(ScanError::Shape(
                "cannot truncate a 0-dimensional dataset".to_string(),
            ));
        }
        if len >= self.data.shape()[0] {
            return Ok(());
        }
        self.data = self
            .data
            .slice_axis(ndarray::Axis(0), Slice::from(..len))
            .to_owned();
        self.axes[0].truncate(len);
        Ok(())
    }

    /// Stack `samples` along a new leading dimension described by `leading`.
    ///
    /// The result's axes are `[leading] ++ samples[0].axes`; the samples'
    /// secondary axes are not compared, only their data shapes.
    pub fn stack(leading: Axis, samples: &[DataSet]) -> ScanResult<DataSet> {
        let Some(first) = samples.first() else {
            return Err(ScanError::Shape("no samples to stack".to_string()));
        };
        if leading.len() != samples.len() {
            return Err(ScanError::Shape(format!(
                "leading axis has {} entries but {} samples were acquired",
                leading.len(),
                samples.len()
            )));
        }

        let views: Vec<ArrayViewD<'_, f64>> = samples.iter().map(|s| s.data.view()).collect();
        let data = ndarray::stack(ndarray::Axis(0), &views)?;

        let mut axes = Vec::with_capacity(first.axes.len() + 1);
        axes.push(leading);
        axes.extend(first.axes.iter().cloned());
        DataSet::new(data, first.unit, axes)
    }

    /// Split into samples, unit and axes.
    pub fn into_parts(self) -> (ArrayD<f64>, Unit, Vec<Axis>) {
        (self.data, self.unit, self.axes)
    }
}

fn check_shape(shape: &[usize], axes: &[Axis]) -> ScanResult<()> {
    if shape.len() != axes.len() {
        return Err(ScanError::Shape(format!(
            "data has {} dimensions but {} axes were given",
            shape.len(),
            axes.len()
        )));
    }
    for (dim, (len, axis)) in shape.iter().zip(axes).enumerate() {
        if axis.len() != *len {
            return Err(ScanError::Shape(format!(
                "axis {} has {} entries but dimension has length {}",
                dim,
                axis.len(),
                len
            )));
        }
    }
    Ok(())
}
