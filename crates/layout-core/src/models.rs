//! Core data models for layout generation.

use crate::config::AssetType;
use crate::placement::BlockGrid;
use crate::raster::ElevationRaster;
use crate::spatial::{validate_polygon, Point};
use serde::{Deserialize, Serialize};

// ========== INPUTS ==========

/// An area that blocks, penalizes or favours placement and routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExclusionZone {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Polygon vertices in world coordinates (closing vertex optional)
    pub polygon: Vec<Point>,
    /// Outward buffer in meters
    #[serde(default)]
    pub buffer_m: f64,
    /// >= 100 hard exclusion, < 1 allowance, otherwise soft penalty
    pub cost_multiplier: f64,
    /// Asset types the zone applies to; empty means all
    #[serde(default)]
    pub asset_types: Vec<AssetType>,
}

impl ExclusionZone {
    /// Validate zone configuration.
    /// Returns list of validation errors (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors: Vec<String> = validate_polygon(&self.polygon)
            .into_iter()
            .map(|err| format!("zone {}: {}", self.id, err))
            .collect();
        if !self.buffer_m.is_finite() || self.buffer_m < 0.0 {
            errors.push(format!("zone {}: buffer must be >= 0", self.id));
        }
        if !self.cost_multiplier.is_finite() || self.cost_multiplier <= 0.0 {
            errors.push(format!("zone {}: cost multiplier must be positive", self.id));
        }
        errors
    }
}

/// Everything the engine needs for one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Site boundary in world coordinates
    pub boundary: Vec<Point>,
    pub elevation: ElevationRaster,
    #[serde(default)]
    pub exclusions: Vec<ExclusionZone>,
    pub target_capacity_kw: f64,
    pub strategy: String,
    /// Site access point in world coordinates; inferred when absent
    #[serde(default)]
    pub entry_point: Option<Point>,
    /// Seed for candidate sampling
    #[serde(default = "default_seed")]
    pub seed: u64,
}

pub const DEFAULT_SEED: u64 = 0x5eed_1a70;

fn default_seed() -> u64 {
    DEFAULT_SEED
}

// ========== OUTPUTS ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedAsset {
    pub id: String,
    pub asset_type: AssetType,
    /// World coordinates
    pub position: Point,
    pub capacity_kw: f64,
    pub length_m: f64,
    pub width_m: f64,
    pub rotation_deg: f64,
    pub elevation_m: f64,
    pub slope_deg: f64,
    pub aspect_deg: f64,
    pub suitability: f64,
    /// Candidate score at selection time (hub and block units report suitability)
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<usize>,
    pub cut_m3: f64,
    pub fill_m3: f64,
    /// Pad volumes in whole liters; these sum exactly to the earthwork totals
    #[serde(default)]
    pub cut_l: u64,
    #[serde(default)]
    pub fill_l: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadClass {
    Spine,
    Secondary,
    Tertiary,
    RowCorridor,
    ColCorridor,
    Spur,
}

/// What one end of a road is attached to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoadEndpoint {
    EntryPoint,
    Asset { asset_id: String },
    Road { road_id: String },
}

/// One stationing sample along a road centerline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub distance_m: f64,
    /// World coordinates
    pub position: Point,
    pub ground_elevation_m: f64,
    /// Grade-limited design elevation
    pub elevation_m: f64,
    /// Design grade arriving at this station (0 at the first station)
    pub grade_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedRoad {
    pub id: String,
    pub class: RoadClass,
    /// Simplified centerline, world coordinates
    pub polyline: Vec<Point>,
    pub length_m: f64,
    pub width_m: f64,
    pub max_grade_pct: f64,
    /// Steepest ground grade under the centerline, before design grading
    pub max_terrain_grade_pct: f64,
    pub stations: Vec<Station>,
    pub from: RoadEndpoint,
    pub to: RoadEndpoint,
    /// Straight-line stand-in after every routing attempt failed
    pub fallback: bool,
    pub attempts: usize,
    pub cut_m3: f64,
    pub fill_m3: f64,
    #[serde(default)]
    pub cut_l: u64,
    #[serde(default)]
    pub fill_l: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemVolume {
    pub id: String,
    pub cut_m3: f64,
    pub fill_m3: f64,
    pub cut_l: u64,
    pub fill_l: u64,
}

/// Cut/fill summary. The `_l` fields are the exact ledger in whole liters;
/// the `_m3` figures are the same values converted for display.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CutFillResult {
    pub total_cut_l: u64,
    pub total_fill_l: u64,
    pub asset_cut_l: u64,
    pub asset_fill_l: u64,
    pub road_cut_l: u64,
    pub road_fill_l: u64,
    pub total_cut_m3: f64,
    pub total_fill_m3: f64,
    /// cut − fill; positive = export, negative = import
    pub net_m3: f64,
    pub asset_cut_m3: f64,
    pub asset_fill_m3: f64,
    pub road_cut_m3: f64,
    pub road_fill_m3: f64,
    pub assets: Vec<ItemVolume>,
    pub roads: Vec<ItemVolume>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    /// Achieved capacity is below the tolerance band
    UnderCapacity,
    /// Road fell back to a straight line; needs manual review
    FallbackRoad,
    /// A campus block could not be fully placed
    SkippedBlock,
    /// Asset not reachable from the hub
    OrphanAsset,
    /// Requested entry point was moved into the boundary
    EntryPointSnapped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutFlag {
    pub kind: FlagKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub message: String,
}

impl LayoutFlag {
    pub fn new(kind: FlagKind, subject_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject_id,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutStats {
    pub buildable_cells: usize,
    pub candidates: usize,
    pub nodes_expanded: usize,
    pub fallback_roads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutResult {
    pub strategy: String,
    pub target_capacity_kw: f64,
    pub achieved_capacity_kw: f64,
    /// World coordinates
    pub entry_point: Point,
    pub assets: Vec<PlacedAsset>,
    pub roads: Vec<PlacedRoad>,
    pub earthwork: CutFillResult,
    pub flags: Vec<LayoutFlag>,
    pub stats: LayoutStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_id: Option<String>,
    /// Campus grid the corridors were laid along; needed to re-route
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_grid: Option<BlockGrid>,
}

impl LayoutResult {
    pub fn is_under_capacity(&self) -> bool {
        self.flags.iter().any(|flag| flag.kind == FlagKind::UnderCapacity)
    }

    pub fn flags_of(&self, kind: FlagKind) -> impl Iterator<Item = &LayoutFlag> {
        self.flags.iter().filter(move |flag| flag.kind == kind)
    }
}
