pub mod config;
pub mod earthwork;
pub mod engine;
pub mod error;
pub mod exclusion;
pub mod models;
pub mod placement;
pub mod raster;
pub mod route_engine;
pub mod spatial;
pub mod terrain;

#[cfg(test)]
mod test_support;

pub use config::{
    AssetCatalog, AssetType, AssetTypeConfig, BlockLayout, CostCombination, EngineConfig,
    ExclusionConfig, LayoutMode, NetworkTier, RouterConfig, StrategyProfile, TerrainConfig,
};
pub use earthwork::{EarthworkCalculator, EarthworkLedger};
pub use engine::LayoutEngine;
pub use error::{ErrorClass, LayoutError, Stage};
pub use exclusion::{ExclusionMaskBuilder, ExclusionMasks};
pub use models::{
    CutFillResult, ExclusionZone, FlagKind, GenerationRequest, ItemVolume, LayoutFlag,
    LayoutResult, LayoutStats, PlacedAsset, PlacedRoad, RoadClass, RoadEndpoint, Station,
    DEFAULT_SEED,
};
pub use placement::{AssetPlacementEngine, BlockGrid, PlacementOutcome, SiteContext};
pub use raster::{Cell, ElevationRaster, GeoTransform, Grid, RasterFrame};
pub use route_engine::{
    CostSurface, RelaxationSchedule, RelaxationStep, RoadNetwork, RoadNetworkRouter,
};
pub use spatial::Point;
pub use terrain::{SuitabilitySet, TerrainAnalyzer, TerrainMetrics};
