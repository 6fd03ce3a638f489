//! Terrain metrics and per-asset-type suitability rasters.
//!
//! Elevation is gap-filled and Gaussian smoothed before derivatives so a
//! single noisy sample does not produce a spurious slope spike. Slope and
//! aspect use Horn's 3×3 weighted gradient; curvature uses the
//! Zevenbergen-Thorne quadratic surface (values ×100, positive = convex).

use crate::config::{AssetCatalog, AssetType, AssetTypeConfig, Orientation, TerrainConfig};
use crate::error::LayoutError;
use crate::raster::{Cell, ElevationRaster, Grid, RasterFrame, NEIGHBORS_8};
use crate::spatial::angle_difference_deg;
use std::collections::BTreeMap;

/// Derived terrain rasters, same shape as the elevation raster.
#[derive(Debug, Clone)]
pub struct TerrainMetrics {
    /// Gap-filled, smoothed elevation used for derivatives
    pub elevation: Grid<f64>,
    pub slope_deg: Grid<f64>,
    /// Downslope compass azimuth; 0 on flat cells
    pub aspect_deg: Grid<f64>,
    pub profile_curvature: Grid<f64>,
    pub plan_curvature: Grid<f64>,
    pub curvature: Grid<f64>,
    pub roughness: Grid<f64>,
    /// False where the source raster had nodata
    pub valid: Grid<bool>,
}

/// Suitability raster for every asset type.
#[derive(Debug, Clone)]
pub struct SuitabilitySet {
    rasters: BTreeMap<AssetType, Grid<f64>>,
}

impl SuitabilitySet {
    pub fn get(&self, asset_type: AssetType) -> &Grid<f64> {
        // Built for every type in `TerrainAnalyzer::suitability`.
        &self.rasters[&asset_type]
    }
}

pub struct TerrainAnalyzer<'a> {
    config: &'a TerrainConfig,
    catalog: &'a AssetCatalog,
}

impl<'a> TerrainAnalyzer<'a> {
    pub fn new(config: &'a TerrainConfig, catalog: &'a AssetCatalog) -> Self {
        Self { config, catalog }
    }

    pub fn analyze(
        &self,
        raster: &ElevationRaster,
        boundary_mask: &Grid<bool>,
    ) -> Result<TerrainMetrics, LayoutError> {
        raster.validate()?;
        if !raster.elevations.same_shape(boundary_mask) {
            return Err(LayoutError::InvalidInput(
                "boundary mask does not match elevation raster".to_string(),
            ));
        }

        let valid = raster
            .elevations
            .map(|_, value| raster.is_valid_value(*value));
        let valid_inside = valid
            .cells()
            .filter(|(cell, ok)| **ok && boundary_mask[*cell])
            .count();
        if valid_inside == 0 {
            return Err(LayoutError::InvalidInput(
                "elevation raster has no valid cells inside the boundary".to_string(),
            ));
        }

        let filled = fill_nodata(&raster.elevations, &valid);
        let smoothed = gaussian_smooth(&filled, &valid, self.config.smoothing_sigma_cells);
        let frame = raster.frame();

        let rows = frame.rows;
        let cols = frame.cols;
        let mut slope_deg = Grid::filled(rows, cols, 0.0);
        let mut aspect_deg = Grid::filled(rows, cols, 0.0);
        let mut profile_curvature = Grid::filled(rows, cols, 0.0);
        let mut plan_curvature = Grid::filled(rows, cols, 0.0);
        let mut curvature = Grid::filled(rows, cols, 0.0);

        for row in 0..rows {
            for col in 0..cols {
                let cell = (row, col);
                let window = window_3x3(&smoothed, cell);
                let (slope, aspect) = horn_slope_aspect(&window, &frame);
                slope_deg[cell] = slope;
                aspect_deg[cell] = aspect;
                let (profile, plan, general) = zevenbergen_thorne(&window, frame.cell_size_m);
                profile_curvature[cell] = profile;
                plan_curvature[cell] = plan;
                curvature[cell] = general;
            }
        }

        let roughness = filled.map(|cell, _| window_std(&window_3x3(&filled, cell)));

        tracing::debug!(
            rows,
            cols,
            valid_inside,
            "terrain metrics derived"
        );

        Ok(TerrainMetrics {
            elevation: smoothed,
            slope_deg,
            aspect_deg,
            profile_curvature,
            plan_curvature,
            curvature,
            roughness,
            valid,
        })
    }

    /// Suitability in [0, 1] for every asset type; 0 outside the boundary.
    pub fn suitability(&self, metrics: &TerrainMetrics, boundary_mask: &Grid<bool>) -> SuitabilitySet {
        let rasters = AssetType::ALL
            .iter()
            .map(|asset_type| {
                let config = self.catalog.get(*asset_type);
                let raster = metrics.slope_deg.map(|cell, _| {
                    if !boundary_mask[cell] || !metrics.valid[cell] {
                        return 0.0;
                    }
                    cell_suitability(metrics, cell, config, self.config.flat_slope_deg)
                });
                (*asset_type, raster)
            })
            .collect();
        SuitabilitySet { rasters }
    }
}

/// Weighted suitability of one cell for one asset type.
pub fn cell_suitability(
    metrics: &TerrainMetrics,
    cell: Cell,
    config: &AssetTypeConfig,
    flat_slope_deg: f64,
) -> f64 {
    let weights = &config.suitability;
    let total = weights.total();
    if total <= 0.0 {
        return 0.0;
    }
    let slope = metrics.slope_deg[cell];
    let score = weights.slope * slope_score(slope, config)
        + weights.aspect
            * aspect_score(metrics.aspect_deg[cell], slope, config.orientation.as_ref(), flat_slope_deg)
        + weights.curvature * curvature_score(metrics.curvature[cell], config.curvature_scale)
        + weights.roughness * roughness_score(metrics.roughness[cell], config.roughness_scale_m);
    (score / total).clamp(0.0, 1.0)
}

/// 1 up to the optimal slope, exponential decay past it, and an extra
/// linear penalty beyond the hard limit.
pub fn slope_score(slope_deg: f64, config: &AssetTypeConfig) -> f64 {
    if slope_deg <= config.optimal_slope_deg {
        return 1.0;
    }
    let decay = config.slope_decay_deg.max(1e-6);
    let mut score = (-(slope_deg - config.optimal_slope_deg) / decay).exp();
    if slope_deg > config.max_slope_deg {
        score -= config.over_limit_penalty_per_deg * (slope_deg - config.max_slope_deg);
    }
    score.clamp(0.0, 1.0)
}

/// Cosine alignment of the local aspect with the preferred facing.
/// Neutral (1.0) for flat cells and types without an aspect preference.
pub fn aspect_score(
    aspect_deg: f64,
    slope_deg: f64,
    orientation: Option<&Orientation>,
    flat_slope_deg: f64,
) -> f64 {
    let Some(orientation) = orientation else {
        return 1.0;
    };
    if !orientation.follows_aspect || slope_deg < flat_slope_deg {
        return 1.0;
    }
    let diff = angle_difference_deg(aspect_deg, orientation.preferred_azimuth_deg);
    0.5 * (1.0 + diff.to_radians().cos())
}

pub fn curvature_score(curvature: f64, scale: f64) -> f64 {
    (-curvature.abs() / scale.max(1e-6)).exp()
}

pub fn roughness_score(roughness_m: f64, scale_m: f64) -> f64 {
    (-roughness_m.max(0.0) / scale_m.max(1e-6)).exp()
}

/// Replace nodata with the mean of valid neighbours, else the global mean.
fn fill_nodata(elevations: &Grid<f64>, valid: &Grid<bool>) -> Grid<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (cell, value) in elevations.cells() {
        if valid[cell] {
            sum += *value;
            count += 1;
        }
    }
    let global_mean = if count > 0 { sum / count as f64 } else { 0.0 };

    elevations.map(|cell, value| {
        if valid[cell] {
            return *value;
        }
        let mut local_sum = 0.0;
        let mut local_count = 0usize;
        for (d_row, d_col) in NEIGHBORS_8 {
            if let Some((next, neighbour)) = elevations.get_offset(cell, d_row, d_col) {
                if valid[next] {
                    local_sum += *neighbour;
                    local_count += 1;
                }
            }
        }
        if local_count > 0 {
            local_sum / local_count as f64
        } else {
            global_mean
        }
    })
}

/// Separable Gaussian with weights renormalized over valid cells.
fn gaussian_smooth(elevations: &Grid<f64>, valid: &Grid<bool>, sigma_cells: f64) -> Grid<f64> {
    if sigma_cells <= 0.0 {
        return elevations.clone();
    }
    let radius = (3.0 * sigma_cells).ceil() as i64;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|offset| (-(offset * offset) as f64 / (2.0 * sigma_cells * sigma_cells)).exp())
        .collect();

    let pass = |source: &Grid<f64>, horizontal: bool| -> Grid<f64> {
        source.map(|cell, own| {
            let mut sum = 0.0;
            let mut weight = 0.0;
            for (k, offset) in (-radius..=radius).enumerate() {
                let (d_row, d_col) = if horizontal { (0, offset) } else { (offset, 0) };
                if let Some((next, value)) = source.get_offset(cell, d_row, d_col) {
                    if valid[next] {
                        sum += value * kernel[k];
                        weight += kernel[k];
                    }
                }
            }
            if weight > 0.0 {
                sum / weight
            } else {
                *own
            }
        })
    };

    let horizontal = pass(elevations, true);
    pass(&horizontal, false)
}

/// 3×3 neighbourhood, row-major (a b c / d e f / g h i); edges clamp.
fn window_3x3(grid: &Grid<f64>, (row, col): Cell) -> [f64; 9] {
    let max_row = grid.rows() - 1;
    let max_col = grid.cols() - 1;
    let mut window = [0.0; 9];
    for (idx, (d_row, d_col)) in [
        (-1i64, -1i64),
        (-1, 0),
        (-1, 1),
        (0, -1),
        (0, 0),
        (0, 1),
        (1, -1),
        (1, 0),
        (1, 1),
    ]
    .iter()
    .enumerate()
    {
        let r = (row as i64 + d_row).clamp(0, max_row as i64) as usize;
        let c = (col as i64 + d_col).clamp(0, max_col as i64) as usize;
        window[idx] = grid[(r, c)];
    }
    window
}

fn horn_slope_aspect(w: &[f64; 9], frame: &RasterFrame) -> (f64, f64) {
    let [a, b, c, d, _e, f, g, h, i] = *w;
    let cs = frame.cell_size_m;
    let dz_dcol = ((c + 2.0 * f + i) - (a + 2.0 * d + g)) / (8.0 * cs);
    let dz_drow = ((g + 2.0 * h + i) - (a + 2.0 * b + c)) / (8.0 * cs);
    let dz_deast = dz_dcol * frame.east_per_col_m().signum();
    let dz_dnorth = dz_drow * frame.north_per_row_m().signum();

    let gradient = dz_deast.hypot(dz_dnorth);
    let slope = gradient.atan().to_degrees();
    if gradient < 1e-9 {
        return (slope, 0.0);
    }
    let aspect = (-dz_deast).atan2(-dz_dnorth).to_degrees().rem_euclid(360.0);
    (slope, aspect)
}

fn zevenbergen_thorne(w: &[f64; 9], cell_size_m: f64) -> (f64, f64, f64) {
    let [a, b, c, d, e, f, g, h, i] = *w;
    let l = cell_size_m;
    let l2 = l * l;
    let dd = ((d + f) / 2.0 - e) / l2;
    let ee = ((b + h) / 2.0 - e) / l2;
    let ff = (-a + c + g - i) / (4.0 * l2);
    let gg = (-d + f) / (2.0 * l);
    let hh = (b - h) / (2.0 * l);

    let general = -2.0 * (dd + ee) * 100.0;
    let grad_sq = gg * gg + hh * hh;
    if grad_sq < 1e-12 {
        return (0.0, 0.0, general);
    }
    let profile = -2.0 * (dd * gg * gg + ee * hh * hh + ff * gg * hh) / grad_sq * 100.0;
    let plan = -2.0 * (dd * hh * hh + ee * gg * gg - ff * gg * hh) / grad_sq * 100.0;
    (profile, plan, general)
}

fn window_std(w: &[f64; 9]) -> f64 {
    let mean = w.iter().sum::<f64>() / 9.0;
    let var = w.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / 9.0;
    var.sqrt()
}
