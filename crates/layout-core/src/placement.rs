//! Asset placement: hub siting, Poisson-disk candidates, greedy selection
//! against the strategy mix, and the block campus layout.

use crate::config::{
    AssetCatalog, AssetType, AssetTypeConfig, BlockLayout, LayoutMode, StrategyProfile,
};
use crate::error::LayoutError;
use crate::exclusion::ExclusionMasks;
use crate::models::{FlagKind, LayoutFlag, PlacedAsset};
use crate::raster::{Cell, ElevationRaster, Grid, RasterFrame, NEIGHBORS_8};
use crate::spatial::{footprint_corners, polygon_centroid, polygon_contains, Bounds, Point};
use crate::terrain::{aspect_score, curvature_score, SuitabilitySet, TerrainMetrics};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::f64::consts::{SQRT_2, TAU};
use std::ops::Range;

/// Bridson attempts around each active sample.
const POISSON_ATTEMPTS: usize = 30;
const MAX_CANDIDATES: usize = 20_000;
/// Anchor score penalty for a block grid that covers the hub.
const HUB_OVERLAP_PENALTY: f64 = 0.5;

/// Read-only per-run inputs shared by placement, relocation and routing.
#[derive(Clone, Copy)]
pub struct SiteContext<'a> {
    pub raster: &'a ElevationRaster,
    pub metrics: &'a TerrainMetrics,
    pub suitability: &'a SuitabilitySet,
    pub masks: &'a ExclusionMasks,
    pub catalog: &'a AssetCatalog,
    pub flat_slope_deg: f64,
}

impl<'a> SiteContext<'a> {
    pub fn frame(&self) -> &RasterFrame {
        &self.masks.frame
    }

    /// Unsmoothed elevation, falling back to the gap-filled value on nodata.
    pub fn raw_elevation(&self, cell: Cell) -> f64 {
        self.raster
            .value_at(cell)
            .unwrap_or(self.metrics.elevation[cell])
    }

    /// Rotated footprint lies inside the boundary and on cells buildable
    /// for `asset_type`.
    pub fn footprint_fits(&self, asset_type: AssetType, center: &Point, rotation_deg: f64) -> bool {
        let frame = self.frame();
        let Some(center_cell) = frame.cell_at(center) else {
            return false;
        };
        let mask = self.masks.buildable_for(asset_type);
        if !mask[center_cell] {
            return false;
        }
        let config = self.catalog.get(asset_type);
        let corners = footprint_corners(center, config.length_m, config.width_m, rotation_deg);
        if corners
            .iter()
            .any(|corner| frame.cell_at(corner).is_none() || !polygon_contains(&self.masks.boundary, corner))
        {
            return false;
        }
        let Some(bounds) = Bounds::from_points(&corners) else {
            return false;
        };
        frame
            .cells_in_box(
                &Point::new(bounds.min_x, bounds.min_y),
                &Point::new(bounds.max_x, bounds.max_y),
            )
            .filter(|cell| polygon_contains(&corners, &frame.cell_center(*cell)))
            .all(|cell| mask[cell])
    }

    pub fn build_asset(
        &self,
        id: String,
        asset_type: AssetType,
        local: &Point,
        rotation_deg: f64,
        score: f64,
        block_index: Option<usize>,
    ) -> PlacedAsset {
        let frame = self.frame();
        let cell = frame.nearest_cell(local);
        let config = self.catalog.get(asset_type);
        PlacedAsset {
            id,
            asset_type,
            position: frame.to_world(local),
            capacity_kw: config.effective_capacity_kw(asset_type),
            length_m: config.length_m,
            width_m: config.width_m,
            rotation_deg,
            elevation_m: self.raw_elevation(cell),
            slope_deg: self.metrics.slope_deg[cell],
            aspect_deg: self.metrics.aspect_deg[cell],
            suitability: self.suitability.get(asset_type)[cell],
            score,
            block_index,
            cut_m3: 0.0,
            fill_m3: 0.0,
            cut_l: 0,
            fill_l: 0,
        }
    }

    /// Move an asset and recompute its terrain-derived fields. Earthwork
    /// volumes are zeroed for the caller to recompute.
    pub fn relocate_asset(&self, asset: &PlacedAsset, position: Point) -> Result<PlacedAsset, LayoutError> {
        let frame = self.frame();
        let local = frame.to_local(&position);
        let Some(cell) = frame.cell_at(&local) else {
            return Err(LayoutError::InvalidInput(format!(
                "{} cannot move off the elevation raster",
                asset.id
            )));
        };
        if !self.masks.point_allowed(asset.asset_type, &local) {
            return Err(LayoutError::InvalidInput(format!(
                "{} cannot move outside the boundary or into a hard exclusion",
                asset.id
            )));
        }
        let config = self.catalog.get(asset.asset_type);
        let rotation = rotation_for(
            config,
            self.metrics.aspect_deg[cell],
            self.metrics.slope_deg[cell],
            self.flat_slope_deg,
        );
        if !self.footprint_fits(asset.asset_type, &local, rotation) {
            return Err(LayoutError::InvalidInput(format!(
                "{} footprint does not fit at the new position",
                asset.id
            )));
        }
        Ok(self.build_asset(
            asset.id.clone(),
            asset.asset_type,
            &local,
            rotation,
            asset.score,
            asset.block_index,
        ))
    }
}

/// Footprint rotation from local aspect, or the fixed heading for types
/// that do not follow aspect.
pub fn rotation_for(config: &AssetTypeConfig, aspect_deg: f64, slope_deg: f64, flat_slope_deg: f64) -> f64 {
    let Some(orientation) = &config.orientation else {
        return 0.0;
    };
    if !orientation.follows_aspect {
        return orientation.preferred_azimuth_deg;
    }
    if slope_deg < flat_slope_deg {
        return 0.0;
    }
    let deviation = (aspect_deg - orientation.preferred_azimuth_deg + 540.0).rem_euclid(360.0) - 180.0;
    deviation.clamp(-orientation.max_rotation_deg, orientation.max_rotation_deg)
}

/// Slope term of the candidate score: exponential decay past the optimum,
/// scaled down linearly as the slope approaches the hard limit.
pub fn placement_slope_score(slope_deg: f64, config: &AssetTypeConfig) -> f64 {
    if slope_deg > config.max_slope_deg {
        return 0.0;
    }
    if slope_deg <= config.optimal_slope_deg {
        return 1.0;
    }
    let excess = slope_deg - config.optimal_slope_deg;
    let decay = (-excess / config.slope_decay_deg.max(1e-6)).exp();
    let span = (config.max_slope_deg - config.optimal_slope_deg).max(1e-6);
    (decay * (1.0 - 0.5 * excess / span)).clamp(0.0, 1.0)
}

/// 1 at the hub, 0 one site diagonal away.
pub fn proximity_score(distance_m: f64, diagonal_m: f64) -> f64 {
    if diagonal_m <= 0.0 {
        return 1.0;
    }
    (1.0 - (distance_m / diagonal_m).max(0.0).sqrt()).max(0.0)
}

/// Geometry of a placed block campus, in the local plane. Blocks run along
/// +x; row `r`, column `c` starts at `origin + (c·col_pitch, r·row_pitch)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockGrid {
    pub origin: Point,
    pub rows: usize,
    pub cols: usize,
    pub blocks: usize,
    pub unit_pitch_m: f64,
    pub row_pitch_m: f64,
    pub col_pitch_m: f64,
    /// Distance from the first to the last unit center of one block
    pub block_length_m: f64,
    pub corridor_offset_m: f64,
}

impl BlockGrid {
    fn new(origin: Point, rows: usize, cols: usize, blocks: usize, layout: &BlockLayout) -> Self {
        Self {
            origin,
            rows,
            cols,
            blocks,
            unit_pitch_m: layout.unit_pitch_m,
            row_pitch_m: layout.row_pitch_m,
            col_pitch_m: layout.col_pitch_m,
            block_length_m: layout.unit_pitch_m * layout.units.len().saturating_sub(1) as f64,
            corridor_offset_m: layout.corridor_offset_m,
        }
    }

    pub fn unit_position(&self, block: usize, unit: usize) -> Point {
        let row = block / self.cols;
        let col = block % self.cols;
        Point::new(
            self.origin.x + col as f64 * self.col_pitch_m + unit as f64 * self.unit_pitch_m,
            self.origin.y + row as f64 * self.row_pitch_m,
        )
    }

    /// Rectangle covering every unit plus the corridor margin.
    pub fn extent(&self) -> (Point, Point) {
        let off = self.corridor_offset_m;
        let min = Point::new(self.origin.x - off, self.origin.y - off);
        let max = Point::new(
            self.origin.x + (self.cols - 1) as f64 * self.col_pitch_m + self.block_length_m + off,
            self.origin.y + (self.rows - 1) as f64 * self.row_pitch_m + off,
        );
        (min, max)
    }

    /// One straight corridor in front of each block row.
    pub fn row_corridors(&self) -> Vec<[Point; 2]> {
        let (min, max) = self.extent();
        (0..self.rows)
            .map(|row| {
                let y = self.origin.y + row as f64 * self.row_pitch_m - self.corridor_offset_m;
                [Point::new(min.x, y), Point::new(max.x, y)]
            })
            .collect()
    }

    /// Corridors at both outer edges and midway between adjacent columns.
    pub fn col_corridors(&self) -> Vec<[Point; 2]> {
        let (min, max) = self.extent();
        (0..=self.cols)
            .map(|col| {
                let x = if col == 0 {
                    min.x
                } else if col == self.cols {
                    max.x
                } else {
                    let prev_end =
                        self.origin.x + (col - 1) as f64 * self.col_pitch_m + self.block_length_m;
                    let next_start = self.origin.x + col as f64 * self.col_pitch_m;
                    (prev_end + next_start) / 2.0
                };
                [Point::new(x, min.y), Point::new(x, max.y)]
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct PlacementOutcome {
    /// Hub first when one was sited
    pub assets: Vec<PlacedAsset>,
    pub hub_id: Option<String>,
    pub achieved_capacity_kw: f64,
    pub flags: Vec<LayoutFlag>,
    pub candidates: usize,
    pub block_grid: Option<BlockGrid>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    local: Point,
    cell: Cell,
}

#[derive(Clone, Copy)]
enum Quota {
    Capacity { target_kw: f64, tolerance: f64 },
    Count(usize),
}

#[derive(Default)]
struct PlacementState {
    assets: Vec<PlacedAsset>,
    /// Local position and spacing radius of every placed asset
    occupied: Vec<(Point, f64)>,
    counters: BTreeMap<AssetType, usize>,
}

impl PlacementState {
    fn next_id(&mut self, asset_type: AssetType) -> String {
        let counter = self.counters.entry(asset_type).or_insert(0);
        *counter += 1;
        format!("{}-{:03}", asset_type, counter)
    }

    fn spacing_ok(&self, point: &Point, spacing_m: f64) -> bool {
        self.occupied
            .iter()
            .all(|(other, other_spacing)| point.distance(other) + 1e-9 >= spacing_m.max(*other_spacing))
    }

    fn achieved_kw(&self) -> f64 {
        self.assets.iter().map(|asset| asset.capacity_kw).sum()
    }
}

pub struct AssetPlacementEngine<'a> {
    site: SiteContext<'a>,
    strategy: &'a StrategyProfile,
}

impl<'a> AssetPlacementEngine<'a> {
    pub fn new(site: SiteContext<'a>, strategy: &'a StrategyProfile) -> Self {
        Self { site, strategy }
    }

    pub fn place(&self, target_kw: f64, seed: u64) -> Result<PlacementOutcome, LayoutError> {
        if !target_kw.is_finite() || target_kw <= 0.0 {
            return Err(LayoutError::InvalidInput(format!(
                "target capacity must be positive, got {}",
                target_kw
            )));
        }

        let mut state = PlacementState::default();
        let mut flags = Vec::new();
        let hub_type = self.strategy.hub_type;

        let Some(hub_local) = self.site_hub() else {
            tracing::warn!(hub_type = %hub_type, "no buildable hub site");
            flags.push(LayoutFlag::new(
                FlagKind::UnderCapacity,
                None,
                format!("no buildable {} site; nothing placed", hub_type),
            ));
            return Ok(PlacementOutcome {
                assets: Vec::new(),
                hub_id: None,
                achieved_capacity_kw: 0.0,
                flags,
                candidates: 0,
                block_grid: None,
            });
        };
        let hub_id = state.next_id(hub_type);
        let hub_cell = self.site.frame().nearest_cell(&hub_local);
        let hub_score = self.site.suitability.get(hub_type)[hub_cell];
        let hub = self
            .site
            .build_asset(hub_id.clone(), hub_type, &hub_local, 0.0, hub_score, None);
        state.assets.push(hub);
        state.occupied.push((hub_local, self.spacing_for(hub_type)));

        let diagonal = Bounds::from_points(&self.site.masks.boundary)
            .map(|bounds| bounds.diagonal())
            .unwrap_or(0.0);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut candidates = Vec::new();
        let mut block_grid = None;

        match &self.strategy.layout {
            LayoutMode::Freeform => {
                candidates = self.candidates(&mut rng);
                for entry in &self.strategy.generation_mix {
                    let quota = Quota::Capacity {
                        target_kw: entry.share * target_kw,
                        tolerance: self.strategy.capacity_tolerance,
                    };
                    self.fill_quota(&mut state, entry.asset_type, &candidates, &hub_local, diagonal, quota);
                }
            }
            LayoutMode::Blocks(layout) => {
                block_grid = self.place_blocks(&mut state, layout, target_kw, &hub_local, &mut flags)?;
                if !self.strategy.support.is_empty() {
                    candidates = self.candidates(&mut rng);
                }
            }
        }

        let achieved_kw = state.achieved_kw();
        for support in &self.strategy.support {
            let wanted = (support.units_per_mw * achieved_kw / 1000.0).ceil() as usize;
            let count = wanted.max(support.min_units);
            let placed = self.fill_quota(
                &mut state,
                support.asset_type,
                &candidates,
                &hub_local,
                diagonal,
                Quota::Count(count),
            );
            if placed < count {
                tracing::warn!(asset_type = %support.asset_type, placed, count, "support units short");
            }
        }

        let floor_kw = target_kw * (1.0 - self.strategy.capacity_tolerance);
        if achieved_kw + 1e-6 < floor_kw {
            tracing::warn!(achieved_kw, target_kw, "placement under capacity");
            flags.push(LayoutFlag::new(
                FlagKind::UnderCapacity,
                None,
                format!("placed {:.0} kW of {:.0} kW target", achieved_kw, target_kw),
            ));
        }

        tracing::info!(
            assets = state.assets.len(),
            achieved_kw,
            target_kw,
            candidates = candidates.len(),
            "placement complete"
        );

        Ok(PlacementOutcome {
            assets: state.assets,
            hub_id: Some(hub_id),
            achieved_capacity_kw: achieved_kw,
            flags,
            candidates: candidates.len(),
            block_grid,
        })
    }

    fn spacing_for(&self, asset_type: AssetType) -> f64 {
        self.strategy
            .min_spacing_m
            .max(self.site.catalog.get(asset_type).clearance_m)
    }

    /// Centroid of the largest connected flat buildable region, snapped to
    /// the nearest region cell where the hub footprint fits.
    fn site_hub(&self) -> Option<Point> {
        let hub_type = self.strategy.hub_type;
        let config = self.site.catalog.get(hub_type);
        let mask = self.site.masks.buildable_for(hub_type);
        let metrics = self.site.metrics;
        let eligible = mask.map(|cell, ok| {
            *ok && metrics.valid[cell] && metrics.slope_deg[cell] <= config.max_slope_deg
        });

        let region = largest_region(&eligible)?;
        let frame = self.site.frame();
        let count = region.len() as f64;
        let (sx, sy) = region.iter().fold((0.0, 0.0), |(sx, sy), cell| {
            let center = frame.cell_center(*cell);
            (sx + center.x, sy + center.y)
        });
        let centroid = Point::new(sx / count, sy / count);

        let mut ranked: Vec<(f64, Cell)> = region
            .iter()
            .map(|cell| (frame.cell_center(*cell).distance(&centroid), *cell))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        ranked
            .into_iter()
            .map(|(_, cell)| frame.cell_center(cell))
            .find(|center| {
                self.site.masks.point_allowed(hub_type, center)
                    && self.site.footprint_fits(hub_type, center, 0.0)
            })
    }

    fn candidates(&self, rng: &mut StdRng) -> Vec<Candidate> {
        let frame = self.site.frame();
        poisson_disk_samples(&self.site.masks.buildable, frame, self.strategy.min_spacing_m, rng)
            .into_iter()
            .filter_map(|local| frame.cell_at(&local).map(|cell| Candidate { local, cell }))
            .collect()
    }

    fn candidate_score(&self, asset_type: AssetType, candidate: &Candidate, hub: &Point, diagonal: f64) -> f64 {
        let weights = &self.strategy.weights;
        let total =
            weights.slope + weights.proximity + weights.suitability + weights.aspect + weights.curvature;
        if total <= 0.0 {
            return 0.0;
        }
        let config = self.site.catalog.get(asset_type);
        let metrics = self.site.metrics;
        let cell = candidate.cell;
        let slope = metrics.slope_deg[cell];
        let score = weights.slope * placement_slope_score(slope, config)
            + weights.proximity * proximity_score(candidate.local.distance(hub), diagonal)
            + weights.suitability * self.site.suitability.get(asset_type)[cell]
            + weights.aspect
                * aspect_score(
                    metrics.aspect_deg[cell],
                    slope,
                    config.orientation.as_ref(),
                    self.site.flat_slope_deg,
                )
            // Breaks of slope along the fall line cost the most grading.
            + weights.curvature
                * curvature_score(metrics.profile_curvature[cell], config.curvature_scale);
        score / total
    }

    /// Greedy selection by descending score; returns the number placed.
    fn fill_quota(
        &self,
        state: &mut PlacementState,
        asset_type: AssetType,
        candidates: &[Candidate],
        hub: &Point,
        diagonal: f64,
        quota: Quota,
    ) -> usize {
        let mut ranked: Vec<(usize, f64)> = candidates
            .iter()
            .enumerate()
            .map(|(idx, candidate)| (idx, self.candidate_score(asset_type, candidate, hub, diagonal)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let unit_kw = self
            .site
            .catalog
            .get(asset_type)
            .effective_capacity_kw(asset_type);
        let mut placed = 0usize;
        let mut placed_kw = 0.0;
        for (idx, score) in ranked {
            match quota {
                Quota::Capacity { target_kw, tolerance } => {
                    if placed_kw + 1e-6 >= target_kw {
                        break;
                    }
                    // Every unit of a type has the same capacity, so one
                    // overshoot means all remaining candidates overshoot.
                    if placed_kw + unit_kw > target_kw * (1.0 + tolerance) + 1e-6 {
                        break;
                    }
                }
                Quota::Count(count) => {
                    if placed >= count {
                        break;
                    }
                }
            }
            if self.try_place(state, asset_type, &candidates[idx].local, score, None) {
                placed += 1;
                placed_kw += unit_kw;
            }
        }
        tracing::debug!(asset_type = %asset_type, placed, placed_kw, "quota filled");
        placed
    }

    fn try_place(
        &self,
        state: &mut PlacementState,
        asset_type: AssetType,
        local: &Point,
        score: f64,
        block_index: Option<usize>,
    ) -> bool {
        let Some(cell) = self.site.frame().cell_at(local) else {
            return false;
        };
        let metrics = self.site.metrics;
        let config = self.site.catalog.get(asset_type);
        let slope = metrics.slope_deg[cell];
        if !metrics.valid[cell] || slope > config.max_slope_deg {
            return false;
        }
        if !self.site.masks.point_allowed(asset_type, local) {
            return false;
        }
        let rotation = match block_index {
            Some(_) => 0.0,
            None => rotation_for(config, metrics.aspect_deg[cell], slope, self.site.flat_slope_deg),
        };
        if !self.site.footprint_fits(asset_type, local, rotation) {
            return false;
        }
        let spacing = self.spacing_for(asset_type);
        if !state.spacing_ok(local, spacing) {
            return false;
        }
        let id = state.next_id(asset_type);
        let asset = self
            .site
            .build_asset(id, asset_type, local, rotation, score, block_index);
        state.assets.push(asset);
        state.occupied.push((*local, spacing));
        true
    }

    fn place_blocks(
        &self,
        state: &mut PlacementState,
        layout: &BlockLayout,
        target_kw: f64,
        hub: &Point,
        flags: &mut Vec<LayoutFlag>,
    ) -> Result<Option<BlockGrid>, LayoutError> {
        let block_kw: f64 = layout
            .units
            .iter()
            .map(|unit| self.site.catalog.get(*unit).effective_capacity_kw(*unit))
            .sum();
        if block_kw <= 0.0 {
            return Err(LayoutError::InvalidInput(format!(
                "strategy {} has blocks without generating units",
                self.strategy.name
            )));
        }
        let blocks = (target_kw / block_kw).ceil().max(1.0) as usize;
        let cols = layout
            .max_cols
            .max(1)
            .min((blocks as f64).sqrt().ceil() as usize);
        let rows = blocks.div_ceil(cols);

        let Some(origin) = self.block_anchor(layout, rows, cols, hub) else {
            tracing::warn!(blocks, rows, cols, "no anchor fits the block grid");
            return Ok(None);
        };
        let grid = BlockGrid::new(origin, rows, cols, blocks, layout);

        for block in 0..blocks {
            let mut skipped = 0usize;
            for (unit, asset_type) in layout.units.iter().enumerate() {
                let local = grid.unit_position(block, unit);
                let score = self
                    .site
                    .frame()
                    .cell_at(&local)
                    .map(|cell| self.site.suitability.get(*asset_type)[cell])
                    .unwrap_or(0.0);
                if !self.try_place(state, *asset_type, &local, score, Some(block)) {
                    skipped += 1;
                }
            }
            if skipped > 0 {
                let block_id = format!("block-{:03}", block + 1);
                tracing::debug!(block = %block_id, skipped, "block partially placed");
                flags.push(LayoutFlag::new(
                    FlagKind::SkippedBlock,
                    Some(block_id.clone()),
                    format!("{} of {} units skipped in {}", skipped, layout.units.len(), block_id),
                ));
            }
        }
        tracing::debug!(blocks, rows, cols, origin_x = origin.x, origin_y = origin.y, "block grid laid out");
        Ok(Some(grid))
    }

    /// Best origin for a `rows × cols` block grid on the anchor stride.
    fn block_anchor(&self, layout: &BlockLayout, rows: usize, cols: usize, hub: &Point) -> Option<Point> {
        let frame = self.site.frame();
        let lead_type = layout.units.first().copied()?;
        let lead = self.site.catalog.get(lead_type);
        let template = BlockGrid::new(Point::new(0.0, 0.0), rows, cols, rows * cols, layout);
        let (template_min, template_max) = template.extent();
        let extent_w = template_max.x - template_min.x;
        let extent_h = template_max.y - template_min.y;
        let stride = layout.anchor_stride_m.max(frame.cell_size_m);

        let buildable = SummedArea::new(&self.site.masks.buildable, |_, ok| if *ok { 1.0 } else { 0.0 });
        let suitability = SummedArea::new(self.site.suitability.get(lead_type), |_, value| *value);
        let slope = SummedArea::new(&self.site.metrics.slope_deg, |_, value| *value);

        let site_center = polygon_centroid(&self.site.masks.boundary)?;
        let half_diagonal = Bounds::from_points(&self.site.masks.boundary)
            .map(|bounds| bounds.diagonal() / 2.0)
            .unwrap_or(1.0)
            .max(1.0);
        let hub_config = self.site.catalog.get(self.strategy.hub_type);
        let hub_reach = 0.5 * hub_config.length_m.hypot(hub_config.width_m);

        let mut best: Option<(f64, Point)> = None;
        let mut y0 = 0.0;
        while y0 + extent_h <= frame.height_m() {
            let mut x0 = 0.0;
            while x0 + extent_w <= frame.width_m() {
                let min = Point::new(x0, y0);
                let max = Point::new(x0 + extent_w, y0 + extent_h);
                let ((r0, r1), (c0, c1)) = frame.cell_span(&min, &max);
                let expected = ((r1 - r0).max(0) * (c1 - c0).max(0)) as f64;
                if expected > 0.0 && r0 >= 0 && c0 >= 0 {
                    let rows_range = r0 as usize..(r1 as usize).min(frame.rows);
                    let cols_range = c0 as usize..(c1 as usize).min(frame.cols);
                    let fraction = buildable.sum(&rows_range, &cols_range) / expected;
                    if fraction >= layout.min_buildable_fraction {
                        let mean_suit = suitability.sum(&rows_range, &cols_range) / expected;
                        let mean_slope = slope.sum(&rows_range, &cols_range) / expected;
                        let center = Point::new(x0 + extent_w / 2.0, y0 + extent_h / 2.0);
                        let centrality = (1.0 - center.distance(&site_center) / half_diagonal).clamp(0.0, 1.0);
                        let slope_term = (1.0 - mean_slope / lead.max_slope_deg.max(1e-6)).clamp(0.0, 1.0);
                        let mut score =
                            0.4 * mean_suit + 0.3 * slope_term + 0.2 * fraction + 0.1 * centrality;
                        let overlaps_hub = hub.x >= min.x - hub_reach
                            && hub.x <= max.x + hub_reach
                            && hub.y >= min.y - hub_reach
                            && hub.y <= max.y + hub_reach;
                        if overlaps_hub {
                            score -= HUB_OVERLAP_PENALTY;
                        }
                        let origin = Point::new(x0 - template_min.x, y0 - template_min.y);
                        if best.is_none_or(|(best_score, _)| score > best_score) {
                            best = Some((score, origin));
                        }
                    }
                }
                x0 += stride;
            }
            y0 += stride;
        }
        best.map(|(_, origin)| origin)
    }
}

/// 8-connected components of the true cells; returns the largest, first
/// in scan order on ties.
fn largest_region(mask: &Grid<bool>) -> Option<Vec<Cell>> {
    let mut seen = Grid::filled(mask.rows(), mask.cols(), false);
    let mut best: Option<Vec<Cell>> = None;
    for (start, ok) in mask.cells() {
        if !*ok || seen[start] {
            continue;
        }
        let mut region = Vec::new();
        let mut queue = VecDeque::from([start]);
        seen[start] = true;
        while let Some(cell) = queue.pop_front() {
            region.push(cell);
            for (d_row, d_col) in NEIGHBORS_8 {
                if let Some((next, next_ok)) = mask.get_offset(cell, d_row, d_col) {
                    if *next_ok && !seen[next] {
                        seen[next] = true;
                        queue.push_back(next);
                    }
                }
            }
        }
        if best.as_ref().is_none_or(|current| region.len() > current.len()) {
            best = Some(region);
        }
    }
    best
}

/// Background grid for Bridson sampling; each slot holds at most one sample.
struct DiskGrid {
    radius: f64,
    slot_size: f64,
    rows: usize,
    cols: usize,
    slots: Vec<Option<usize>>,
    points: Vec<Point>,
}

impl DiskGrid {
    fn new(width: f64, height: f64, radius: f64) -> Self {
        let slot_size = radius / SQRT_2;
        let rows = (height / slot_size).ceil() as usize + 1;
        let cols = (width / slot_size).ceil() as usize + 1;
        Self {
            radius,
            slot_size,
            rows,
            cols,
            slots: vec![None; rows * cols],
            points: Vec::new(),
        }
    }

    fn slot(&self, point: &Point) -> (usize, usize) {
        let row = ((point.y / self.slot_size) as usize).min(self.rows - 1);
        let col = ((point.x / self.slot_size) as usize).min(self.cols - 1);
        (row, col)
    }

    fn is_clear(&self, point: &Point) -> bool {
        let (row, col) = self.slot(point);
        for r in row.saturating_sub(2)..=(row + 2).min(self.rows - 1) {
            for c in col.saturating_sub(2)..=(col + 2).min(self.cols - 1) {
                if let Some(idx) = self.slots[r * self.cols + c] {
                    if self.points[idx].distance(point) < self.radius {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn insert(&mut self, point: Point) -> usize {
        let (row, col) = self.slot(&point);
        let idx = self.points.len();
        self.points.push(point);
        self.slots[row * self.cols + col] = Some(idx);
        idx
    }
}

/// Bridson Poisson-disk samples over the true cells of `mask`, local plane.
/// Disconnected regions are reached by reseeding from shuffled mask cells
/// whenever the active list empties.
pub fn poisson_disk_samples(
    mask: &Grid<bool>,
    frame: &RasterFrame,
    radius_m: f64,
    rng: &mut StdRng,
) -> Vec<Point> {
    let radius = radius_m.max(1e-3);
    let width = frame.width_m();
    let height = frame.height_m();
    let mut grid = DiskGrid::new(width, height, radius);

    let accepts = |grid: &DiskGrid, point: &Point| -> bool {
        point.x >= 0.0
            && point.y >= 0.0
            && point.x < width
            && point.y < height
            && frame.cell_at(point).is_some_and(|cell| mask[cell])
            && grid.is_clear(point)
    };

    let mut seeds: Vec<Cell> = mask
        .cells()
        .filter_map(|(cell, ok)| ok.then_some(cell))
        .collect();
    seeds.shuffle(rng);

    let mut active: Vec<usize> = Vec::new();
    for seed in seeds {
        if grid.points.len() >= MAX_CANDIDATES {
            break;
        }
        let seed_point = frame.cell_center(seed);
        if !accepts(&grid, &seed_point) {
            continue;
        }
        active.push(grid.insert(seed_point));

        while !active.is_empty() && grid.points.len() < MAX_CANDIDATES {
            let slot = rng.random_range(0..active.len());
            let base = grid.points[active[slot]];
            let mut found = false;
            for _ in 0..POISSON_ATTEMPTS {
                let angle = rng.random::<f64>() * TAU;
                let dist = radius * (1.0 + rng.random::<f64>());
                let point = Point::new(base.x + dist * angle.cos(), base.y + dist * angle.sin());
                if accepts(&grid, &point) {
                    active.push(grid.insert(point));
                    found = true;
                    break;
                }
            }
            if !found {
                active.swap_remove(slot);
            }
        }
    }
    grid.points
}

/// Summed-area table for O(1) rectangle sums.
struct SummedArea {
    cols: usize,
    sums: Vec<f64>,
}

impl SummedArea {
    fn new<T>(grid: &Grid<T>, value: impl Fn(Cell, &T) -> f64) -> Self {
        let cols = grid.cols() + 1;
        let mut sums = vec![0.0; (grid.rows() + 1) * cols];
        for row in 0..grid.rows() {
            let mut running = 0.0;
            for col in 0..grid.cols() {
                running += value((row, col), &grid[(row, col)]);
                sums[(row + 1) * cols + col + 1] = sums[row * cols + col + 1] + running;
            }
        }
        Self { cols, sums }
    }

    fn sum(&self, rows: &Range<usize>, cols: &Range<usize>) -> f64 {
        if rows.is_empty() || cols.is_empty() {
            return 0.0;
        }
        let at = |row: usize, col: usize| self.sums[row * self.cols + col];
        at(rows.end, cols.end) - at(rows.start, cols.end) - at(rows.end, cols.start)
            + at(rows.start, cols.start)
    }
}
