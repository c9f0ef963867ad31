//! Slice artifact generation
//!
//! Each candidate item gets one grayscale PNG montage per plane, an
//! intensity histogram PNG and a small intensity-statistics CSV. Decoding
//! and slice drawing sit behind the [`SliceRenderer`] trait;
//! [`NiftiSliceRenderer`] is the implementation used by the commands,
//! tests substitute their own.
//!
//! Generation is idempotent: when every artifact of an item exists and is
//! not older than the source volume, the item is skipped without writing.

use crate::layout::ResultsLayout;
use crate::model::{CandidateItem, VolumeStats};
use crate::table::{replace_file, CsvTable};
use crate::time::is_fresh;
use crate::worklist::{BatchReport, ItemOutcome, WorkList};
use crate::{Error, Result};
use ndarray::{Array3, ArrayView2, Axis, Ix3};
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Anatomical viewing plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plane {
    Axial,
    Sagittal,
    Coronal,
}

impl Plane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plane::Axial => "axial",
            Plane::Sagittal => "sagittal",
            Plane::Coronal => "coronal",
        }
    }

    /// Voxel axis the plane cuts across (NIfTI i, j, k order)
    pub fn axis(&self) -> usize {
        match self {
            Plane::Sagittal => 0,
            Plane::Coronal => 1,
            Plane::Axial => 2,
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plane {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "axial" | "ax" => Ok(Plane::Axial),
            "sagittal" | "sag" => Ok(Plane::Sagittal),
            "coronal" | "cor" => Ok(Plane::Coronal),
            other => Err(Error::InvalidInput(format!("Unknown plane: {}", other))),
        }
    }
}

/// How slice indices are picked along a plane's axis
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "values", rename_all = "lowercase")]
pub enum SliceSelection {
    /// Evenly spaced slices around the brightest slice
    #[default]
    Heuristic,
    /// Fixed voxel indices (clamped to the axis)
    Indices(Vec<usize>),
    /// Positions as fractions of the axis length, 0.0..=1.0
    Fractions(Vec<f64>),
}

impl SliceSelection {
    pub fn validate(&self) -> Result<()> {
        match self {
            SliceSelection::Heuristic => Ok(()),
            SliceSelection::Indices(v) if v.is_empty() => Err(Error::Config(
                "selection.values must not be empty".to_string(),
            )),
            SliceSelection::Indices(_) => Ok(()),
            SliceSelection::Fractions(v) => {
                if v.is_empty() {
                    return Err(Error::Config(
                        "selection.values must not be empty".to_string(),
                    ));
                }
                if v.iter().any(|f| !(0.0..=1.0).contains(f)) {
                    return Err(Error::Config(
                        "selection fractions must lie in 0.0..=1.0".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Pick slice indices along an axis of length `sums.len()`
///
/// `sums[i]` is the total intensity of slice `i`. The heuristic finds the
/// brightest slice, opens a window of `num_slices * 5` slices on either
/// side (clamped), and spreads `num_slices` indices evenly across it.
/// Output is sorted and de-duplicated.
pub fn select_slices(sums: &[f64], num_slices: usize, selection: &SliceSelection) -> Vec<usize> {
    let len = sums.len();
    if len == 0 || num_slices == 0 {
        return Vec::new();
    }
    let last = len - 1;

    let mut indices: Vec<usize> = match selection {
        SliceSelection::Heuristic => {
            let best = sums
                .iter()
                .enumerate()
                .fold((0usize, f64::NEG_INFINITY), |(bi, bv), (i, &v)| {
                    if v > bv {
                        (i, v)
                    } else {
                        (bi, bv)
                    }
                })
                .0;
            let margin = num_slices * 5;
            let start = best.saturating_sub(margin);
            let end = (best + margin).min(last);
            linspace(start, end, num_slices)
        }
        SliceSelection::Indices(v) => v.iter().map(|&i| i.min(last)).collect(),
        SliceSelection::Fractions(v) => v
            .iter()
            .map(|f| ((f * last as f64).round() as usize).min(last))
            .collect(),
    };

    indices.sort_unstable();
    indices.dedup();
    indices
}

/// `num` integer points from `start` to `end` inclusive, truncated
fn linspace(start: usize, end: usize, num: usize) -> Vec<usize> {
    if num == 1 {
        return vec![start];
    }
    let step = (end - start) as f64 / (num - 1) as f64;
    let mut points: Vec<usize> = (0..num)
        .map(|i| start + (i as f64 * step) as usize)
        .collect();
    points[num - 1] = end;
    points
}

/// Rendering failures
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("cannot decode volume: {0}")]
    Decode(String),

    #[error("unsupported volume shape: {0}")]
    Shape(String),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to draw for one volume
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    /// Montage destination per plane
    pub targets: &'a [(Plane, PathBuf)],
    pub num_slices: usize,
    pub selection: &'a SliceSelection,
    pub columns: usize,
}

/// Bins of the intensity histogram
pub const HISTOGRAM_BINS: usize = 128;

/// Histogram plot size in pixels
const HISTOGRAM_SIZE: (u32, u32) = (512, 160);

/// Intensity distribution of a volume's finite voxels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub counts: Vec<u64>,
}

impl Histogram {
    /// Equal-width bins over `min..=max` of the finite values
    pub fn from_values(values: &[f32], bins: usize) -> Self {
        let finite = || values.iter().copied().filter(|v| v.is_finite());
        let Some(min) = finite().reduce(f32::min) else {
            return Self::default();
        };
        let max = finite().fold(min, f32::max);

        let mut counts = vec![0u64; bins.max(1)];
        let last = counts.len() - 1;
        let span = (max - min) as f64;
        for v in finite() {
            let bin = if span > 0.0 {
                ((v - min) as f64 / span * counts.len() as f64) as usize
            } else {
                0
            };
            counts[bin.min(last)] += 1;
        }
        Self {
            min: min as f64,
            max: max as f64,
            counts,
        }
    }

    /// Bar plot on a white background
    ///
    /// Bar heights are square-root scaled so the background peak does not
    /// flatten the tissue distribution.
    pub fn plot(&self, width: u32, height: u32) -> image::GrayImage {
        let mut img = image::GrayImage::from_pixel(width, height, image::Luma([255]));
        let peak = self.counts.iter().copied().max().unwrap_or(0);
        if peak == 0 {
            return img;
        }
        let peak = (peak as f64).sqrt();
        let bins = self.counts.len() as u64;
        for x in 0..width {
            let bin = (x as u64 * bins / width as u64) as usize;
            let bar = ((self.counts[bin] as f64).sqrt() / peak * height as f64).round() as u32;
            for y in height.saturating_sub(bar)..height {
                img.put_pixel(x, y, image::Luma([40]));
            }
        }
        img
    }
}

/// What a renderer learned about the volume it drew
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOutput {
    pub stats: VolumeStats,
    pub histogram: Histogram,
}

/// Black-box volume → montage renderer
pub trait SliceRenderer: Send + Sync {
    /// Write one montage per target and summarise the volume's intensities
    fn render(
        &self,
        source: &Path,
        request: &RenderRequest<'_>,
    ) -> std::result::Result<RenderOutput, RenderError>;
}

/// 3D intensity volume in NIfTI voxel order `[i, j, k]`
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<f32>,
}

impl Volume {
    pub fn from_array(data: Array3<f32>) -> Self {
        Self { data }
    }

    /// Load a `.nii` / `.nii.gz` file; 4D series use their first volume
    pub fn open(path: &Path) -> std::result::Result<Self, RenderError> {
        let obj = ReaderOptions::new()
            .read_file(path)
            .map_err(|e| RenderError::Decode(e.to_string()))?;
        let data = obj
            .into_volume()
            .into_ndarray::<f32>()
            .map_err(|e| RenderError::Decode(e.to_string()))?;

        let data = match data.ndim() {
            3 => data,
            4 => data.index_axis_move(Axis(3), 0),
            n => return Err(RenderError::Shape(format!("{} dimensions", n))),
        };
        let data = data
            .into_dimensionality::<Ix3>()
            .map_err(|e| RenderError::Shape(e.to_string()))?;
        if data.is_empty() {
            return Err(RenderError::Shape("empty volume".to_string()));
        }
        Ok(Self { data })
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Total intensity of every slice along the plane's axis
    pub fn slice_sums(&self, plane: Plane) -> Vec<f64> {
        self.data
            .axis_iter(Axis(plane.axis()))
            .map(|s| s.iter().filter(|v| v.is_finite()).map(|&v| v as f64).sum())
            .collect()
    }

    pub fn slice(&self, plane: Plane, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(plane.axis()), index)
    }

    /// Finite voxel values, unsorted
    fn finite_values(&self) -> Vec<f32> {
        self.data.iter().copied().filter(|v| v.is_finite()).collect()
    }

    pub fn stats(&self) -> VolumeStats {
        let mut values = self.finite_values();
        if values.is_empty() {
            return VolumeStats {
                mean: 0.0,
                median: 0.0,
                min: 0.0,
                max: 0.0,
                std: 0.0,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = values
            .iter()
            .map(|&v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n;
        let min = values.iter().cloned().fold(f32::INFINITY, f32::min) as f64;
        let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max) as f64;
        let median = median(&mut values);
        VolumeStats {
            mean,
            median,
            min,
            max,
            std: var.sqrt(),
        }
    }

    pub fn histogram(&self, bins: usize) -> Histogram {
        Histogram::from_values(&self.finite_values(), bins)
    }

    /// Display window: 1st and 99th percentile of finite voxels
    pub fn window(&self) -> (f32, f32) {
        let mut values = self.finite_values();
        if values.is_empty() {
            return (0.0, 1.0);
        }
        let lo = percentile(&mut values, 0.01);
        let hi = percentile(&mut values, 0.99);
        if hi > lo {
            (lo, hi)
        } else {
            (lo, lo + 1.0)
        }
    }
}

fn percentile(values: &mut [f32], q: f64) -> f32 {
    let idx = ((values.len() - 1) as f64 * q).round() as usize;
    let (_, v, _) = values.select_nth_unstable_by(idx, |a, b| a.total_cmp(b));
    *v
}

fn median(values: &mut [f32]) -> f64 {
    let n = values.len();
    let mid = n / 2;
    let (_, hi, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    let hi = *hi as f64;
    if n % 2 == 1 {
        return hi;
    }
    // Lower middle is the max of the left partition
    let lo = values[..mid]
        .iter()
        .cloned()
        .fold(f32::NEG_INFINITY, f32::max) as f64;
    (lo + hi) / 2.0
}

/// Compose the chosen slices of one plane into a grid image
///
/// Tiles are drawn with the second in-plane axis pointing up, so superior
/// and anterior sit at the top of each tile.
pub fn montage(
    volume: &Volume,
    plane: Plane,
    indices: &[usize],
    columns: usize,
    window: (f32, f32),
) -> image::GrayImage {
    let (ni, nj, nk) = volume.shape();
    let (w, h) = match plane {
        Plane::Sagittal => (nj, nk),
        Plane::Coronal => (ni, nk),
        Plane::Axial => (ni, nj),
    };
    let columns = columns.max(1).min(indices.len().max(1));
    let rows = indices.len().div_ceil(columns).max(1);
    let mut img = image::GrayImage::new((w * columns) as u32, (h * rows) as u32);

    let (lo, hi) = window;
    let scale = 255.0 / (hi - lo);
    for (n, &idx) in indices.iter().enumerate() {
        let slice = volume.slice(plane, idx);
        let ox = (n % columns) * w;
        let oy = (n / columns) * h;
        for ((x, y), &v) in slice.indexed_iter() {
            let v = if v.is_finite() { v } else { lo };
            let gray = ((v - lo) * scale).clamp(0.0, 255.0) as u8;
            let px = (ox + x) as u32;
            let py = (oy + (h - 1 - y)) as u32;
            img.put_pixel(px, py, image::Luma([gray]));
        }
    }
    img
}

/// Default renderer backed by the `nifti` and `image` crates
#[derive(Debug, Default, Clone, Copy)]
pub struct NiftiSliceRenderer;

impl SliceRenderer for NiftiSliceRenderer {
    fn render(
        &self,
        source: &Path,
        request: &RenderRequest<'_>,
    ) -> std::result::Result<RenderOutput, RenderError> {
        let volume = Volume::open(source)?;
        let window = volume.window();
        for (plane, dest) in request.targets {
            let sums = volume.slice_sums(*plane);
            let indices = select_slices(&sums, request.num_slices, request.selection);
            debug!("{} {}: slices {:?}", source.display(), plane, indices);
            let img = montage(&volume, *plane, &indices, request.columns, window);
            write_png(dest, &img)?;
        }
        Ok(RenderOutput {
            stats: volume.stats(),
            histogram: volume.histogram(HISTOGRAM_BINS),
        })
    }
}

fn write_png(dest: &Path, img: &image::GrayImage) -> std::result::Result<(), RenderError> {
    replace_file(dest, |file| -> std::result::Result<(), RenderError> {
        img.write_to(file, image::ImageOutputFormat::Png)?;
        Ok(())
    })
}

/// Draw `histogram` to a PNG at `dest`
pub fn write_histogram(dest: &Path, histogram: &Histogram) -> std::result::Result<(), RenderError> {
    let (width, height) = HISTOGRAM_SIZE;
    write_png(dest, &histogram.plot(width, height))
}

/// Per-item outcome of artifact generation
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactOutcome {
    /// Artifacts were (re)written
    Rendered(Vec<PathBuf>),
    /// Every artifact was already newer than the source
    Skipped(Vec<PathBuf>),
}

impl ItemOutcome for ArtifactOutcome {
    fn was_skipped(&self) -> bool {
        matches!(self, ArtifactOutcome::Skipped(_))
    }
}

/// Slice rendering settings
#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    pub planes: Vec<Plane>,
    pub num_slices: usize,
    pub selection: SliceSelection,
    pub columns: usize,
    /// Re-render even when artifacts are up to date
    pub force: bool,
}

impl ArtifactSettings {
    pub fn from_config(config: &crate::config::QcConfig, force: bool) -> Self {
        Self {
            planes: config.planes.clone(),
            num_slices: config.num_slices,
            selection: config.selection.clone(),
            columns: config.montage_columns,
            force,
        }
    }
}

/// Renders artifacts for candidate items into the results directory
pub struct ArtifactGenerator<'a> {
    layout: &'a ResultsLayout,
    renderer: &'a dyn SliceRenderer,
    settings: ArtifactSettings,
}

impl<'a> ArtifactGenerator<'a> {
    pub fn new(
        layout: &'a ResultsLayout,
        renderer: &'a dyn SliceRenderer,
        settings: ArtifactSettings,
    ) -> Self {
        Self {
            layout,
            renderer,
            settings,
        }
    }

    /// Montage destinations of an item, in configured plane order
    pub fn targets(&self, item: &CandidateItem) -> Vec<(Plane, PathBuf)> {
        self.settings
            .planes
            .iter()
            .map(|&p| (p, self.layout.slice_path(&item.key, item.stage, p)))
            .collect()
    }

    /// Render one item, or skip it when its artifacts are current
    pub fn generate(&self, item: &CandidateItem) -> Result<ArtifactOutcome> {
        let targets = self.targets(item);
        let stats_path = self.layout.stats_path(&item.key, item.stage);
        let histogram_path = self.layout.histogram_path(&item.key, item.stage);
        let mut paths: Vec<PathBuf> = targets.iter().map(|(_, p)| p.clone()).collect();
        paths.push(histogram_path.clone());
        paths.push(stats_path.clone());

        if !item.source.exists() {
            return Err(Error::ArtifactGeneration {
                item: item.key.to_string(),
                reason: format!("source {} does not exist", item.source.display()),
            });
        }

        if !self.settings.force && paths.iter().all(|p| is_fresh(p, &item.source)) {
            debug!("Artifacts for {} are up to date", item.key);
            return Ok(ArtifactOutcome::Skipped(paths));
        }

        let request = RenderRequest {
            targets: &targets,
            num_slices: self.settings.num_slices,
            selection: &self.settings.selection,
            columns: self.settings.columns,
        };
        let output = self
            .renderer
            .render(&item.source, &request)
            .map_err(|e| Error::ArtifactGeneration {
                item: item.key.to_string(),
                reason: e.to_string(),
            })?;
        write_histogram(&histogram_path, &output.histogram).map_err(|e| Error::ArtifactGeneration {
            item: item.key.to_string(),
            reason: format!("writing histogram: {}", e),
        })?;
        write_stats(&stats_path, &output.stats).map_err(|e| Error::ArtifactGeneration {
            item: item.key.to_string(),
            reason: format!("writing stats: {}", e),
        })?;

        Ok(ArtifactOutcome::Rendered(paths))
    }

    /// Run generation over every item with per-item failure isolation
    pub fn generate_all(
        &self,
        items: Vec<CandidateItem>,
        parallel: bool,
    ) -> BatchReport<ArtifactOutcome> {
        let list = WorkList::new(items);
        if parallel {
            list.run_parallel("artifacts", |item| self.generate(item))
        } else {
            list.run("artifacts", |item| self.generate(item))
        }
    }
}

/// Write the one-row statistics CSV next to the montages
pub fn write_stats(path: &Path, stats: &VolumeStats) -> std::result::Result<(), crate::table::TableError> {
    replace_file(path, |file| -> std::result::Result<(), crate::table::TableError> {
        let mut writer = csv::Writer::from_writer(file);
        writer.serialize(stats)?;
        writer.flush()?;
        Ok(())
    })
}

/// Read statistics written by [`write_stats`]; `None` if absent or unreadable
pub fn read_stats(path: &Path) -> Option<VolumeStats> {
    CsvTable::new(path)
        .read::<VolumeStats>()
        .ok()
        .and_then(|rows| rows.into_iter().next())
}
