//! Engine configuration: per-asset-type table, strategy profiles and
//! stage tunables. Everything deserializes with defaults so a config file
//! only needs the values it overrides.

use crate::error::LayoutError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    SolarArray,
    Battery,
    Generator,
    Substation,
    WindTurbine,
    GasTurbine,
    CoolingSystem,
    ControlCenter,
}

impl AssetType {
    pub const ALL: [AssetType; 8] = [
        AssetType::SolarArray,
        AssetType::Battery,
        AssetType::Generator,
        AssetType::Substation,
        AssetType::WindTurbine,
        AssetType::GasTurbine,
        AssetType::CoolingSystem,
        AssetType::ControlCenter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::SolarArray => "solar_array",
            AssetType::Battery => "battery",
            AssetType::Generator => "generator",
            AssetType::Substation => "substation",
            AssetType::WindTurbine => "wind_turbine",
            AssetType::GasTurbine => "gas_turbine",
            AssetType::CoolingSystem => "cooling_system",
            AssetType::ControlCenter => "control_center",
        }
    }

    /// Only generating types count toward site capacity.
    pub fn is_generating(&self) -> bool {
        matches!(
            self,
            AssetType::SolarArray
                | AssetType::Generator
                | AssetType::WindTurbine
                | AssetType::GasTurbine
        )
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which routing tier an asset joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkTier {
    /// Joined through the spanning tree.
    Major,
    /// Joined by a spur or tertiary road to the nearest network point.
    Minor,
}

/// Preferred facing for directional assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orientation {
    /// Compass azimuth the asset should face (180 = south).
    pub preferred_azimuth_deg: f64,
    /// Largest rotation applied to the footprint.
    pub max_rotation_deg: f64,
    /// Rotate toward the local aspect (solar) instead of a fixed heading (wind).
    pub follows_aspect: bool,
}

/// Weights of the four terrain components of a suitability raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuitabilityWeights {
    pub slope: f64,
    pub aspect: f64,
    pub curvature: f64,
    pub roughness: f64,
}

impl SuitabilityWeights {
    pub fn total(&self) -> f64 {
        self.slope + self.aspect + self.curvature + self.roughness
    }
}

/// Configuration record for one asset type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetTypeConfig {
    /// Nameplate capacity per unit (kW); ignored for non-generating types
    pub capacity_kw: f64,
    pub length_m: f64,
    pub width_m: f64,
    /// Side of the square graded pad
    pub pad_size_m: f64,
    /// Hard slope limit (degrees)
    pub max_slope_deg: f64,
    pub optimal_slope_deg: f64,
    /// e-folding distance of the slope score past the optimum (degrees)
    pub slope_decay_deg: f64,
    /// Linear score penalty per degree beyond the hard limit
    pub over_limit_penalty_per_deg: f64,
    /// Extra clearance to other assets; the larger of this and the strategy spacing wins
    pub clearance_m: f64,
    pub curvature_scale: f64,
    pub roughness_scale_m: f64,
    pub orientation: Option<Orientation>,
    pub network_tier: NetworkTier,
    pub suitability: SuitabilityWeights,
}

impl AssetTypeConfig {
    pub fn default_for(asset_type: AssetType) -> Self {
        let flat_weights = SuitabilityWeights {
            slope: 0.6,
            aspect: 0.02,
            curvature: 0.2,
            roughness: 0.18,
        };
        let base = AssetTypeConfig {
            capacity_kw: 0.0,
            length_m: 10.0,
            width_m: 10.0,
            pad_size_m: 14.0,
            max_slope_deg: 5.0,
            optimal_slope_deg: 1.0,
            slope_decay_deg: 2.0,
            over_limit_penalty_per_deg: 0.1,
            clearance_m: 0.0,
            curvature_scale: 2.0,
            roughness_scale_m: 0.5,
            orientation: None,
            network_tier: NetworkTier::Major,
            suitability: flat_weights,
        };
        match asset_type {
            AssetType::SolarArray => AssetTypeConfig {
                capacity_kw: 500.0,
                length_m: 40.0,
                width_m: 20.0,
                pad_size_m: 12.0,
                max_slope_deg: 10.0,
                optimal_slope_deg: 2.0,
                slope_decay_deg: 4.0,
                orientation: Some(Orientation {
                    preferred_azimuth_deg: 180.0,
                    max_rotation_deg: 30.0,
                    follows_aspect: true,
                }),
                network_tier: NetworkTier::Minor,
                suitability: SuitabilityWeights {
                    slope: 0.5,
                    aspect: 0.25,
                    curvature: 0.15,
                    roughness: 0.1,
                },
                ..base
            },
            AssetType::Battery => AssetTypeConfig {
                length_m: 15.0,
                width_m: 6.0,
                pad_size_m: 20.0,
                ..base
            },
            AssetType::Generator => AssetTypeConfig {
                capacity_kw: 2000.0,
                length_m: 12.0,
                width_m: 5.0,
                pad_size_m: 18.0,
                ..base
            },
            AssetType::Substation => AssetTypeConfig {
                length_m: 40.0,
                width_m: 30.0,
                pad_size_m: 45.0,
                max_slope_deg: 3.0,
                optimal_slope_deg: 0.5,
                slope_decay_deg: 1.5,
                ..base
            },
            AssetType::WindTurbine => AssetTypeConfig {
                capacity_kw: 3000.0,
                length_m: 20.0,
                width_m: 20.0,
                pad_size_m: 25.0,
                max_slope_deg: 12.0,
                optimal_slope_deg: 3.0,
                slope_decay_deg: 5.0,
                clearance_m: 250.0,
                orientation: Some(Orientation {
                    preferred_azimuth_deg: 270.0,
                    max_rotation_deg: 180.0,
                    follows_aspect: false,
                }),
                suitability: SuitabilityWeights {
                    slope: 0.55,
                    aspect: 0.0,
                    curvature: 0.3,
                    roughness: 0.15,
                },
                ..base
            },
            AssetType::GasTurbine => AssetTypeConfig {
                capacity_kw: 5000.0,
                length_m: 25.0,
                width_m: 10.0,
                pad_size_m: 30.0,
                max_slope_deg: 4.0,
                ..base
            },
            AssetType::CoolingSystem => AssetTypeConfig {
                network_tier: NetworkTier::Minor,
                ..base
            },
            AssetType::ControlCenter => AssetTypeConfig {
                length_m: 20.0,
                width_m: 15.0,
                pad_size_m: 25.0,
                ..base
            },
        }
    }

    /// Capacity this unit contributes to the site total.
    pub fn effective_capacity_kw(&self, asset_type: AssetType) -> f64 {
        if asset_type.is_generating() {
            self.capacity_kw.max(0.0)
        } else {
            0.0
        }
    }

    pub fn validate(&self, asset_type: AssetType) -> Vec<String> {
        let mut errors = Vec::new();
        if self.length_m <= 0.0 || self.width_m <= 0.0 {
            errors.push(format!("{}: footprint must be positive", asset_type));
        }
        if self.pad_size_m <= 0.0 {
            errors.push(format!("{}: pad size must be positive", asset_type));
        }
        if self.max_slope_deg <= 0.0 || self.max_slope_deg >= 90.0 {
            errors.push(format!("{}: max slope must be in (0, 90)", asset_type));
        }
        if self.optimal_slope_deg > self.max_slope_deg {
            errors.push(format!(
                "{}: optimal slope ({}) exceeds max slope ({})",
                asset_type, self.optimal_slope_deg, self.max_slope_deg
            ));
        }
        if self.slope_decay_deg <= 0.0 {
            errors.push(format!("{}: slope decay must be positive", asset_type));
        }
        if self.suitability.total() <= 0.0 {
            errors.push(format!("{}: suitability weights sum to zero", asset_type));
        }
        errors
    }
}

/// Per-type configuration table. Missing entries fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "BTreeMap<AssetType, AssetTypeConfig>", into = "BTreeMap<AssetType, AssetTypeConfig>")]
pub struct AssetCatalog {
    entries: BTreeMap<AssetType, AssetTypeConfig>,
}

impl AssetCatalog {
    pub fn get(&self, asset_type: AssetType) -> &AssetTypeConfig {
        // `From` inserts every type, so the lookup cannot miss.
        &self.entries[&asset_type]
    }

    pub fn set(&mut self, asset_type: AssetType, config: AssetTypeConfig) {
        self.entries.insert(asset_type, config);
    }
}

impl Default for AssetCatalog {
    fn default() -> Self {
        Self::from(BTreeMap::new())
    }
}

impl From<BTreeMap<AssetType, AssetTypeConfig>> for AssetCatalog {
    fn from(mut entries: BTreeMap<AssetType, AssetTypeConfig>) -> Self {
        for asset_type in AssetType::ALL {
            entries
                .entry(asset_type)
                .or_insert_with(|| AssetTypeConfig::default_for(asset_type));
        }
        Self { entries }
    }
}

impl From<AssetCatalog> for BTreeMap<AssetType, AssetTypeConfig> {
    fn from(catalog: AssetCatalog) -> Self {
        catalog.entries
    }
}

/// Candidate scoring weights for a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementWeights {
    pub slope: f64,
    pub proximity: f64,
    pub suitability: f64,
    pub aspect: f64,
    pub curvature: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixEntry {
    pub asset_type: AssetType,
    /// Fraction of the target capacity assigned to this type
    pub share: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportUnit {
    pub asset_type: AssetType,
    pub units_per_mw: f64,
    #[serde(default)]
    pub min_units: usize,
}

/// Repeating-block campus geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockLayout {
    /// Units in one block, laid along the block axis; the first should generate.
    pub units: Vec<AssetType>,
    pub unit_pitch_m: f64,
    pub row_pitch_m: f64,
    pub col_pitch_m: f64,
    pub max_cols: usize,
    /// Step of the anchor search
    pub anchor_stride_m: f64,
    /// Rectangles below this buildable fraction are never anchors
    pub min_buildable_fraction: f64,
    /// Distance from block centers to the corridor in front of the row
    pub corridor_offset_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LayoutMode {
    Freeform,
    Blocks(BlockLayout),
}

/// Named placement strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyProfile {
    pub name: String,
    pub hub_type: AssetType,
    /// Minimum center-to-center distance between any two assets
    pub min_spacing_m: f64,
    /// Accepted relative deviation from the target capacity
    pub capacity_tolerance: f64,
    pub weights: PlacementWeights,
    pub generation_mix: Vec<MixEntry>,
    #[serde(default)]
    pub support: Vec<SupportUnit>,
    pub layout: LayoutMode,
}

impl StrategyProfile {
    pub fn builtin_names() -> &'static [&'static str] {
        &["balanced", "low_earthwork", "clustered", "wind_farm", "gas_campus"]
    }

    pub fn builtin(name: &str) -> Option<StrategyProfile> {
        let solar_mix = vec![MixEntry {
            asset_type: AssetType::SolarArray,
            share: 1.0,
        }];
        let battery_support = vec![SupportUnit {
            asset_type: AssetType::Battery,
            units_per_mw: 0.25,
            min_units: 1,
        }];
        let profile = match name {
            "balanced" => StrategyProfile {
                name: name.to_string(),
                hub_type: AssetType::Substation,
                min_spacing_m: 50.0,
                capacity_tolerance: 0.2,
                weights: PlacementWeights {
                    slope: 0.35,
                    proximity: 0.15,
                    suitability: 0.3,
                    aspect: 0.1,
                    curvature: 0.1,
                },
                generation_mix: solar_mix,
                support: battery_support,
                layout: LayoutMode::Freeform,
            },
            "low_earthwork" => StrategyProfile {
                name: name.to_string(),
                hub_type: AssetType::Substation,
                min_spacing_m: 50.0,
                capacity_tolerance: 0.2,
                weights: PlacementWeights {
                    slope: 0.55,
                    proximity: 0.05,
                    suitability: 0.25,
                    aspect: 0.05,
                    curvature: 0.1,
                },
                generation_mix: solar_mix,
                support: battery_support,
                layout: LayoutMode::Freeform,
            },
            "clustered" => StrategyProfile {
                name: name.to_string(),
                hub_type: AssetType::Substation,
                min_spacing_m: 50.0,
                capacity_tolerance: 0.2,
                weights: PlacementWeights {
                    slope: 0.2,
                    proximity: 0.45,
                    suitability: 0.2,
                    aspect: 0.05,
                    curvature: 0.1,
                },
                generation_mix: solar_mix,
                support: battery_support,
                layout: LayoutMode::Freeform,
            },
            "wind_farm" => StrategyProfile {
                name: name.to_string(),
                hub_type: AssetType::Substation,
                min_spacing_m: 120.0,
                capacity_tolerance: 0.2,
                weights: PlacementWeights {
                    slope: 0.35,
                    proximity: 0.1,
                    suitability: 0.4,
                    aspect: 0.0,
                    curvature: 0.15,
                },
                generation_mix: vec![MixEntry {
                    asset_type: AssetType::WindTurbine,
                    share: 1.0,
                }],
                support: Vec::new(),
                layout: LayoutMode::Freeform,
            },
            "gas_campus" => StrategyProfile {
                name: name.to_string(),
                hub_type: AssetType::ControlCenter,
                min_spacing_m: 20.0,
                capacity_tolerance: 0.2,
                weights: PlacementWeights {
                    slope: 0.4,
                    proximity: 0.2,
                    suitability: 0.3,
                    aspect: 0.0,
                    curvature: 0.1,
                },
                generation_mix: vec![MixEntry {
                    asset_type: AssetType::GasTurbine,
                    share: 1.0,
                }],
                support: Vec::new(),
                layout: LayoutMode::Blocks(BlockLayout {
                    units: vec![
                        AssetType::GasTurbine,
                        AssetType::Battery,
                        AssetType::CoolingSystem,
                    ],
                    unit_pitch_m: 30.0,
                    row_pitch_m: 60.0,
                    col_pitch_m: 120.0,
                    max_cols: 4,
                    anchor_stride_m: 10.0,
                    min_buildable_fraction: 0.9,
                    corridor_offset_m: 20.0,
                }),
            },
            _ => return None,
        };
        Some(profile)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.min_spacing_m <= 0.0 {
            errors.push(format!("{}: min spacing must be positive", self.name));
        }
        if !(0.0..1.0).contains(&self.capacity_tolerance) {
            errors.push(format!("{}: capacity tolerance must be in [0, 1)", self.name));
        }
        if self.generation_mix.is_empty() {
            errors.push(format!("{}: generation mix is empty", self.name));
        }
        for entry in &self.generation_mix {
            if !entry.asset_type.is_generating() {
                errors.push(format!(
                    "{}: {} in generation mix does not generate",
                    self.name, entry.asset_type
                ));
            }
            if entry.share <= 0.0 {
                errors.push(format!("{}: share of {} must be positive", self.name, entry.asset_type));
            }
        }
        if let LayoutMode::Blocks(block) = &self.layout {
            if block.units.is_empty() {
                errors.push(format!("{}: block has no units", self.name));
            }
            if block.unit_pitch_m < self.min_spacing_m {
                errors.push(format!(
                    "{}: unit pitch {} is below min spacing {}",
                    self.name, block.unit_pitch_m, self.min_spacing_m
                ));
            }
            if block.row_pitch_m <= 0.0 || block.col_pitch_m <= 0.0 || block.max_cols == 0 {
                errors.push(format!("{}: block pitch and columns must be positive", self.name));
            }
            if block.anchor_stride_m <= 0.0 {
                errors.push(format!("{}: anchor stride must be positive", self.name));
            }
        }
        errors
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Gaussian sigma applied before derivatives (cells); 0 disables smoothing
    pub smoothing_sigma_cells: f64,
    /// Below this slope the aspect is meaningless and scores neutral
    pub flat_slope_deg: f64,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            smoothing_sigma_cells: 1.0,
            flat_slope_deg: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionConfig {
    /// Multipliers at or above this are hard exclusions
    pub hard_threshold: f64,
    /// Multipliers below this are allowances; other soft multipliers
    /// apply as penalties and never lower road cost
    pub allowance_threshold: f64,
    /// Lowest value the cost raster can reach through allowances
    pub cost_floor: f64,
    /// Highest value of the cost raster; hard-excluded cells sit here
    pub cost_ceiling: f64,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            hard_threshold: 100.0,
            allowance_threshold: 1.0,
            cost_floor: 0.25,
            cost_ceiling: 1000.0,
        }
    }
}

/// How the steep-slope ceiling combines with the multiplicative penalties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCombination {
    /// max(base × exclusion × curvature, steep_cost)
    SteepCeilingLast,
    /// steep_cost replaces the slope base, then multipliers apply
    SteepCeilingFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoadWidths {
    pub spine_m: f64,
    pub secondary_m: f64,
    pub tertiary_m: f64,
    pub row_corridor_m: f64,
    pub col_corridor_m: f64,
    pub spur_m: f64,
}

impl Default for RoadWidths {
    fn default() -> Self {
        Self {
            spine_m: 8.0,
            secondary_m: 6.0,
            tertiary_m: 5.0,
            row_corridor_m: 6.0,
            col_corridor_m: 6.0,
            spur_m: 4.0,
        }
    }
}

/// Relaxation schedule for A* retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaxationConfig {
    /// Cells costlier than this are impassable on the first attempt
    pub base_cell_ceiling: f64,
    pub cell_ceiling_increment: f64,
    /// Path cost budget (cost-meters) on the first attempt
    pub base_budget: f64,
    pub budget_increment: f64,
    pub max_attempts: usize,
}

impl Default for RelaxationConfig {
    fn default() -> Self {
        Self {
            base_cell_ceiling: 150.0,
            cell_ceiling_increment: 150.0,
            base_budget: 500_000.0,
            budget_increment: 250_000.0,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Slope at which the cubic term reaches 1
    pub slope_limit_deg: f64,
    /// Beyond this slope the steep cost applies
    pub hard_slope_cutoff_deg: f64,
    pub steep_cost: f64,
    /// General curvature (×100) above which a cell counts as a ridge
    pub ridge_threshold: f64,
    pub ridge_penalty: f64,
    /// General curvature below the negative of this counts as a gully
    pub gully_threshold: f64,
    pub gully_penalty: f64,
    pub combination: CostCombination,
    /// Final clamp of the cost surface
    pub cost_clamp: f64,
    /// Median-cost scaling of the A* heuristic
    pub heuristic_factor: f64,
    /// Multiplier on spanning-tree edges that join the spine
    pub spine_discount: f64,
    /// Minor assets farther than this from the network get a tertiary road
    pub tertiary_cap_m: f64,
    /// Longest tertiary path, as a multiple of the direct distance, before
    /// it is replaced by a direct spur
    pub tertiary_detour_ratio: f64,
    pub max_grade_pct: f64,
    pub station_interval_m: f64,
    pub simplify_tolerance_m: f64,
    /// Hard stop on A* node expansions per search
    pub max_expansions: usize,
    pub widths: RoadWidths,
    pub relaxation: RelaxationConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            slope_limit_deg: 8.0,
            hard_slope_cutoff_deg: 20.0,
            steep_cost: 250.0,
            ridge_threshold: 1.0,
            ridge_penalty: 0.25,
            gully_threshold: 1.0,
            gully_penalty: 0.35,
            combination: CostCombination::SteepCeilingLast,
            cost_clamp: 1000.0,
            heuristic_factor: 0.9,
            spine_discount: 0.8,
            tertiary_cap_m: 60.0,
            tertiary_detour_ratio: 2.0,
            max_grade_pct: 10.0,
            station_interval_m: 10.0,
            simplify_tolerance_m: 2.0,
            max_expansions: 2_000_000,
            widths: RoadWidths::default(),
            relaxation: RelaxationConfig::default(),
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub catalog: AssetCatalog,
    /// Extra or overriding strategy profiles
    pub strategies: Vec<StrategyProfile>,
    pub terrain: TerrainConfig,
    pub exclusions: ExclusionConfig,
    pub router: RouterConfig,
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, LayoutError> {
        let config: EngineConfig =
            serde_json::from_str(raw).map_err(|err| LayoutError::Config(err.to_string()))?;
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(LayoutError::Config(errors.join("; ")));
        }
        Ok(config)
    }

    /// Configured profile with this name, else the built-in one.
    pub fn strategy(&self, name: &str) -> Result<StrategyProfile, LayoutError> {
        self.strategies
            .iter()
            .find(|profile| profile.name == name)
            .cloned()
            .or_else(|| StrategyProfile::builtin(name))
            .ok_or_else(|| LayoutError::InvalidInput(format!("unknown strategy '{}'", name)))
    }

    /// Returns list of validation errors (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for asset_type in AssetType::ALL {
            errors.extend(self.catalog.get(asset_type).validate(asset_type));
        }
        for profile in &self.strategies {
            errors.extend(profile.validate());
        }
        let router = &self.router;
        if router.slope_limit_deg <= 0.0 {
            errors.push("router slope limit must be positive".to_string());
        }
        if router.max_grade_pct <= 0.0 {
            errors.push("router max grade must be positive".to_string());
        }
        if router.station_interval_m <= 0.0 {
            errors.push("station interval must be positive".to_string());
        }
        if router.tertiary_detour_ratio.is_nan() || router.tertiary_detour_ratio < 1.0 {
            errors.push("tertiary detour ratio must be >= 1".to_string());
        }
        if router.relaxation.max_attempts == 0 {
            errors.push("relaxation needs at least one attempt".to_string());
        }
        if !(0.0..=1.0).contains(&router.heuristic_factor) {
            errors.push("heuristic factor must be in [0, 1]".to_string());
        }
        let ex = &self.exclusions;
        if ex.cost_floor <= 0.0 || ex.cost_floor > ex.cost_ceiling {
            errors.push("exclusion cost floor must be in (0, ceiling]".to_string());
        }
        if ex.allowance_threshold > ex.hard_threshold {
            errors.push("allowance threshold exceeds hard threshold".to_string());
        }
        errors
    }
}
