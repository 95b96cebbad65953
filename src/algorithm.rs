//! Convolution geometry and algorithm/workspace selection.

use crate::config::AlgoPreference;
use crate::descriptor::Layout;
use crate::error::Error;
use std::fmt;

/// Shapes, strides and padding of one configured convolution.
///
/// Filters are zero-padded by `(fr-1)/2` rows and `(fc-1)/2` columns before the
/// data, which yields an output of `1+(nr-1)/stride_y` by `1+(nc-1)/stride_x`
/// for every filter size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub data: Layout,
    pub filters: Layout,
    pub output: Layout,
    pub stride: (usize, usize),
    pub padding: (usize, usize),
}

impl ConvGeometry {
    pub fn new(data: Layout, filters: Layout, stride_y: usize, stride_x: usize) -> Result<Self, Error> {
        if stride_y == 0 || stride_x == 0 {
            return Err(Error::InvalidOperation(format!(
                "convolution strides must be positive, got ({}, {})",
                stride_y, stride_x
            )));
        }
        if data.element_count() == 0 || filters.element_count() == 0 {
            return Err(Error::EmptyTensor);
        }
        if filters.k() != data.k() {
            return Err(Error::InvalidOperation(format!(
                "filters have {} channels but data has {}",
                filters.k(),
                data.k()
            )));
        }

        let output = Layout::new(
            data.num_samples(),
            filters.num_samples(),
            1 + (data.nr() - 1) / stride_y,
            1 + (data.nc() - 1) / stride_x,
        );
        Ok(Self {
            data,
            filters,
            output,
            stride: (stride_y, stride_x),
            padding: ((filters.nr() - 1) / 2, (filters.nc() - 1) / 2),
        })
    }

    /// Rows of the lowered column matrix: one per filter tap.
    pub fn column_rows(&self) -> usize {
        self.filters.k() * self.filters.nr() * self.filters.nc()
    }

    /// Columns of the lowered column matrix: one per output location.
    pub fn column_cols(&self) -> usize {
        self.output.plane_size()
    }

    /// Maps output row `r` and filter row `fr` to a data row, if it lands inside the data.
    #[inline]
    pub fn input_row(&self, r: usize, fr: usize) -> Option<usize> {
        (r * self.stride.0 + fr).checked_sub(self.padding.0).filter(|&y| y < self.data.nr())
    }

    #[inline]
    pub fn input_col(&self, c: usize, fc: usize) -> Option<usize> {
        (c * self.stride.1 + fc).checked_sub(self.padding.1).filter(|&x| x < self.data.nc())
    }
}

/// The three computations a convolution operator performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvPass {
    Forward,
    BackwardData,
    BackwardFilter,
}

impl ConvPass {
    pub const ALL: [ConvPass; 3] = [ConvPass::Forward, ConvPass::BackwardData, ConvPass::BackwardFilter];
}

impl fmt::Display for ConvPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConvPass::Forward => "forward",
            ConvPass::BackwardData => "backward-data",
            ConvPass::BackwardFilter => "backward-filter",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvAlgorithm {
    /// Each output (or input/filter gradient) element is computed on its own.
    /// Needs no workspace.
    Direct,
    /// Lowers one sample's receptive fields into a column matrix and runs a GEMM.
    Im2ColGemm,
}

impl ConvAlgorithm {
    /// Candidates in decreasing order of expected speed.
    pub const BY_SPEED: [ConvAlgorithm; 2] = [ConvAlgorithm::Im2ColGemm, ConvAlgorithm::Direct];

    /// Workspace, in `f32` elements, this algorithm needs for `pass` on `geometry`.
    pub fn workspace_elements(&self, _pass: ConvPass, geometry: &ConvGeometry) -> usize {
        match self {
            ConvAlgorithm::Direct => 0,
            // Every pass works one sample at a time on a single column matrix.
            ConvAlgorithm::Im2ColGemm => geometry.column_rows() * geometry.column_cols(),
        }
    }

    pub fn workspace_bytes(&self, pass: ConvPass, geometry: &ConvGeometry) -> usize {
        self.workspace_elements(pass, geometry) * std::mem::size_of::<f32>()
    }
}

/// Picks the fastest algorithm for `pass` whose workspace fits `preference`.
pub fn select_algorithm(pass: ConvPass, geometry: &ConvGeometry, preference: AlgoPreference) -> ConvAlgorithm {
    let cap = preference.workspace_cap();
    let chosen = ConvAlgorithm::BY_SPEED
        .iter()
        .copied()
        .find(|algo| algo.workspace_bytes(pass, geometry) <= cap)
        .unwrap_or(ConvAlgorithm::Direct);

    if chosen == ConvAlgorithm::Direct && cap > 0 {
        log::warn!(
            "{} convolution falls back to the direct algorithm: GEMM workspace of {} bytes exceeds the {} byte limit",
            pass,
            ConvAlgorithm::Im2ColGemm.workspace_bytes(pass, geometry),
            cap
        );
    }
    chosen
}
