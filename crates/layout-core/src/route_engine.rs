//! Road network synthesis over the terrain cost surface.
//!
//! Roads are A* paths on the 8-connected cell graph. Each search runs under
//! a relaxation schedule; when every attempt fails the road is a straight
//! line marked `fallback`. Finished centerlines are simplified, stationed
//! and given a grade-limited design profile.

use crate::config::{
    AssetType, CostCombination, ExclusionConfig, NetworkTier, RelaxationConfig, RouterConfig,
};
use crate::models::{FlagKind, LayoutFlag, PlacedAsset, PlacedRoad, RoadClass, RoadEndpoint, Station};
use crate::placement::{BlockGrid, SiteContext};
use crate::raster::{Cell, Grid, RasterFrame, NEIGHBORS_8};
use crate::spatial::{
    nearest_on_polyline, point_along, polygon_centroid, polygon_contains, polyline_length,
    simplify_polyline, Point,
};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};

/// `1 + (slope / limit)^3`
pub fn slope_cost(slope_deg: f64, config: &RouterConfig) -> f64 {
    let ratio = slope_deg.max(0.0) / config.slope_limit_deg.max(1e-6);
    1.0 + ratio.powi(3)
}

/// Ridge multiplier from general curvature; gully multiplier from general
/// curvature or from converging contours (negative plan curvature).
pub fn curvature_factor(curvature: f64, plan_curvature: f64, config: &RouterConfig) -> f64 {
    if curvature > config.ridge_threshold {
        1.0 + config.ridge_penalty
    } else if curvature < -config.gully_threshold || plan_curvature < -config.gully_threshold {
        1.0 + config.gully_penalty
    } else {
        1.0
    }
}

/// Combine the cost factors of one cell in the configured order, clamped.
pub fn combine_cost(
    slope_deg: f64,
    exclusion: f64,
    curvature: f64,
    plan_curvature: f64,
    config: &RouterConfig,
) -> f64 {
    let steep = slope_deg > config.hard_slope_cutoff_deg;
    let factor = exclusion * curvature_factor(curvature, plan_curvature, config);
    let cost = match config.combination {
        CostCombination::SteepCeilingLast => {
            let product = slope_cost(slope_deg, config) * factor;
            if steep {
                product.max(config.steep_cost)
            } else {
                product
            }
        }
        CostCombination::SteepCeilingFirst => {
            let base = if steep {
                config.steep_cost
            } else {
                slope_cost(slope_deg, config)
            };
            base * factor
        }
    };
    cost.min(config.cost_clamp)
}

/// Per-cell traversal cost plus the statistics the heuristic needs.
#[derive(Debug, Clone)]
pub struct CostSurface {
    pub cost: Grid<f64>,
    pub min_cost: f64,
    pub median_cost: f64,
    /// Per-meter multiplier of the A* heuristic
    pub heuristic_scale: f64,
}

impl CostSurface {
    /// Surface over the exclusion cost shared by every asset type.
    pub fn build(site: &SiteContext<'_>, config: &RouterConfig, exclusions: &ExclusionConfig) -> Self {
        Self::from_layer(site, &site.masks.cost, config, exclusions)
    }

    pub fn from_layer(
        site: &SiteContext<'_>,
        exclusion_cost: &Grid<f64>,
        config: &RouterConfig,
        exclusions: &ExclusionConfig,
    ) -> Self {
        let metrics = site.metrics;
        let masks = site.masks;
        let ceiling = exclusions.cost_ceiling.min(config.cost_clamp);
        let cost = metrics.slope_deg.map(|cell, slope| {
            if !masks.boundary_mask[cell] || !metrics.valid[cell] {
                return ceiling;
            }
            combine_cost(
                *slope,
                exclusion_cost[cell],
                metrics.curvature[cell],
                metrics.plan_curvature[cell],
                config,
            )
        });

        let mut inside: Vec<f64> = cost
            .cells()
            .filter(|(cell, _)| masks.boundary_mask[*cell] && metrics.valid[*cell])
            .map(|(_, value)| *value)
            .collect();
        inside.sort_by(|a, b| a.total_cmp(b));
        let min_cost = inside.first().copied().unwrap_or(1.0);
        let median_cost = inside.get(inside.len() / 2).copied().unwrap_or(1.0);
        let heuristic_scale = (config.heuristic_factor * median_cost).min(min_cost).max(0.0);

        Self {
            cost,
            min_cost,
            median_cost,
            heuristic_scale,
        }
    }

    /// Mean cost sampled along a straight segment, one sample per cell.
    pub fn segment_cost(&self, frame: &RasterFrame, a: &Point, b: &Point) -> f64 {
        let samples = (a.distance(b) / frame.cell_size_m).ceil().max(1.0) as usize;
        let total: f64 = (0..=samples)
            .map(|i| self.cost[frame.nearest_cell(&a.lerp(b, i as f64 / samples as f64))])
            .sum();
        total / (samples + 1) as f64
    }
}

/// Limits for one A* attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelaxationStep {
    /// 1-based
    pub attempt: usize,
    /// Cells costlier than this are impassable
    pub cell_ceiling: f64,
    /// Paths whose accumulated cost exceeds this are abandoned
    pub budget: f64,
}

/// Yields progressively looser search limits, then ends.
#[derive(Debug, Clone)]
pub struct RelaxationSchedule {
    config: RelaxationConfig,
    attempt: usize,
}

impl RelaxationSchedule {
    pub fn new(config: &RelaxationConfig) -> Self {
        Self {
            config: config.clone(),
            attempt: 0,
        }
    }
}

impl Iterator for RelaxationSchedule {
    type Item = RelaxationStep;

    fn next(&mut self) -> Option<RelaxationStep> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        let relax = self.attempt as f64;
        self.attempt += 1;
        Some(RelaxationStep {
            attempt: self.attempt,
            cell_ceiling: self.config.base_cell_ceiling + relax * self.config.cell_ceiling_increment,
            budget: self.config.base_budget + relax * self.config.budget_increment,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct FloatOrd(f64);

impl PartialEq for FloatOrd {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenNode {
    cell: Cell,
    g_score: FloatOrd,
    f_score: FloatOrd,
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.f_score
            .cmp(&other.f_score)
            .then_with(|| self.g_score.cmp(&other.g_score))
            .then_with(|| self.cell.cmp(&other.cell))
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub path: Option<Vec<Cell>>,
    pub nodes_expanded: usize,
}

/// 8-connected A*. Step cost is step length × mean cost of the two cells.
/// The start and goal cells are always passable.
pub fn astar(
    surface: &CostSurface,
    frame: &RasterFrame,
    start: Cell,
    goal: Cell,
    step: &RelaxationStep,
    max_expansions: usize,
) -> SearchOutcome {
    let cost = &surface.cost;
    let cs = frame.cell_size_m;
    let goal_point = frame.cell_center(goal);
    let heuristic = |cell: Cell| frame.cell_center(cell).distance(&goal_point) * surface.heuristic_scale;

    let mut open_set: BinaryHeap<Reverse<OpenNode>> = BinaryHeap::new();
    let mut g_score = Grid::filled(cost.rows(), cost.cols(), f64::INFINITY);
    let mut closed = Grid::filled(cost.rows(), cost.cols(), false);
    let mut came_from: HashMap<Cell, Cell> = HashMap::new();

    g_score[start] = 0.0;
    open_set.push(Reverse(OpenNode {
        cell: start,
        g_score: FloatOrd(0.0),
        f_score: FloatOrd(heuristic(start)),
    }));

    let mut nodes_expanded = 0usize;
    let mut reached = false;
    while let Some(Reverse(current)) = open_set.pop() {
        let cell = current.cell;
        if closed[cell] || current.g_score.0 > g_score[cell] + 1e-9 {
            continue;
        }
        nodes_expanded += 1;
        if cell == goal {
            reached = true;
            break;
        }
        if nodes_expanded >= max_expansions {
            break;
        }
        closed[cell] = true;

        for (d_row, d_col) in NEIGHBORS_8 {
            let Some((next, next_cost)) = cost.get_offset(cell, d_row, d_col) else {
                continue;
            };
            if closed[next] {
                continue;
            }
            if *next_cost > step.cell_ceiling && next != goal {
                continue;
            }
            let length = if d_row != 0 && d_col != 0 {
                cs * std::f64::consts::SQRT_2
            } else {
                cs
            };
            let tentative = g_score[cell] + length * (cost[cell] + next_cost) / 2.0;
            if tentative > step.budget {
                continue;
            }
            if tentative < g_score[next] {
                g_score[next] = tentative;
                came_from.insert(next, cell);
                open_set.push(Reverse(OpenNode {
                    cell: next,
                    g_score: FloatOrd(tentative),
                    f_score: FloatOrd(tentative + heuristic(next)),
                }));
            }
        }
    }

    if !reached {
        return SearchOutcome {
            path: None,
            nodes_expanded,
        };
    }
    let mut path = vec![goal];
    let mut current = goal;
    while let Some(prev) = came_from.get(&current) {
        path.push(*prev);
        current = *prev;
    }
    path.reverse();
    SearchOutcome {
        path: Some(path),
        nodes_expanded,
    }
}

/// Stationing distances: every `interval` from 0, plus the end.
pub fn station_distances(length_m: f64, interval_m: f64) -> Vec<f64> {
    let mut distances = Vec::new();
    let interval = interval_m.max(1e-3);
    let mut d = 0.0;
    while d < length_m - 1e-9 {
        distances.push(d);
        d += interval;
    }
    distances.push(length_m.max(0.0));
    if distances.len() == 1 {
        distances.insert(0, 0.0);
    }
    distances
}

/// Clamp a ground profile so no segment exceeds `max_grade_pct`:
/// a backward pass, then a forward pass that fixes the final shape.
pub fn grade_limited_profile(distances: &[f64], ground: &[f64], max_grade_pct: f64) -> Vec<f64> {
    let mut design = ground.to_vec();
    if design.len() < 2 {
        return design;
    }
    let limit = max_grade_pct / 100.0 * (1.0 - 1e-6);
    for i in (0..design.len() - 1).rev() {
        let reach = limit * (distances[i + 1] - distances[i]);
        design[i] = design[i].clamp(design[i + 1] - reach, design[i + 1] + reach);
    }
    for i in 1..design.len() {
        let reach = limit * (distances[i] - distances[i - 1]);
        design[i] = design[i].clamp(design[i - 1] - reach, design[i - 1] + reach);
    }
    design
}

/// Result of routing one segment.
#[derive(Debug, Clone)]
struct RoutedPath {
    /// Local-plane centerline from the source point to the target point
    points: Vec<Point>,
    attempts: usize,
    fallback: bool,
    /// Length of a routed path that was dropped for exceeding the detour cap
    rejected_m: Option<f64>,
}

/// A road under construction, local plane.
#[derive(Debug, Clone)]
struct NetworkRoad {
    id: String,
    points: Vec<Point>,
}

#[derive(Debug, Clone)]
pub struct RoadNetwork {
    pub roads: Vec<PlacedRoad>,
    /// World coordinates
    pub entry_point: Point,
    pub flags: Vec<LayoutFlag>,
    pub nodes_expanded: usize,
}

impl RoadNetwork {
    pub fn fallback_count(&self) -> usize {
        self.roads.iter().filter(|road| road.fallback).count()
    }
}

pub struct RoadNetworkRouter<'a> {
    site: SiteContext<'a>,
    config: &'a RouterConfig,
    surface: CostSurface,
    /// Surfaces for types with scoped exclusion zones
    typed: BTreeMap<AssetType, CostSurface>,
}

struct Builder {
    roads: Vec<PlacedRoad>,
    local: Vec<NetworkRoad>,
    flags: Vec<LayoutFlag>,
    nodes_expanded: usize,
}

impl Builder {
    fn next_id(&self) -> String {
        format!("road-{:03}", self.roads.len() + 1)
    }

    /// Nearest point on any road built so far, with that road's id.
    fn nearest_network_point(&self, query: &Point) -> Option<(Point, f64, String)> {
        self.local
            .iter()
            .filter_map(|road| {
                nearest_on_polyline(&road.points, query).map(|(point, dist)| (point, dist, road.id.clone()))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

impl<'a> RoadNetworkRouter<'a> {
    pub fn new(site: SiteContext<'a>, config: &'a RouterConfig, exclusions: &ExclusionConfig) -> Self {
        let surface = CostSurface::build(&site, config, exclusions);
        let typed = site
            .masks
            .typed_cost_layers()
            .map(|(asset_type, layer)| {
                (asset_type, CostSurface::from_layer(&site, layer, config, exclusions))
            })
            .collect();
        Self {
            site,
            config,
            surface,
            typed,
        }
    }

    /// Surface for roads that serve one asset.
    fn surface_for(&self, asset_type: AssetType) -> &CostSurface {
        self.typed.get(&asset_type).unwrap_or(&self.surface)
    }

    /// Connect every asset to the hub and the hub to the entry point.
    pub fn route_network(
        &self,
        assets: &[PlacedAsset],
        hub_id: Option<&str>,
        entry_point: Option<Point>,
        block_grid: Option<&BlockGrid>,
    ) -> RoadNetwork {
        let frame = *self.site.frame();
        let mut builder = Builder {
            roads: Vec::new(),
            local: Vec::new(),
            flags: Vec::new(),
            nodes_expanded: 0,
        };

        let hub = hub_id.and_then(|id| assets.iter().find(|asset| asset.id == id));
        let Some(hub) = hub else {
            let entry = entry_point
                .or_else(|| polygon_centroid(&self.site.masks.boundary).map(|c| frame.to_world(&c)))
                .unwrap_or(Point::new(0.0, 0.0));
            return RoadNetwork {
                roads: Vec::new(),
                entry_point: entry,
                flags: Vec::new(),
                nodes_expanded: 0,
            };
        };
        let hub_local = frame.to_local(&hub.position);
        let entry_local = self.resolve_entry(entry_point, &hub_local, &mut builder.flags);

        // Spine
        let spine = self.route(&self.surface, &entry_local, &hub_local, &mut builder.nodes_expanded);
        let spine_id = self.push_road(
            &mut builder,
            RoadClass::Spine,
            spine,
            RoadEndpoint::EntryPoint,
            RoadEndpoint::Asset {
                asset_id: hub.id.clone(),
            },
        );

        let mut minors: Vec<&PlacedAsset> = Vec::new();
        match block_grid {
            Some(grid) => {
                self.route_corridors(&mut builder, grid, assets, hub, &mut minors);
            }
            None => {
                let majors: Vec<&PlacedAsset> = assets
                    .iter()
                    .filter(|asset| asset.id != hub.id)
                    .filter(|asset| {
                        self.site.catalog.get(asset.asset_type).network_tier == NetworkTier::Major
                    })
                    .collect();
                minors.extend(assets.iter().filter(|asset| {
                    asset.id != hub.id
                        && self.site.catalog.get(asset.asset_type).network_tier == NetworkTier::Minor
                }));
                self.route_spanning_tree(&mut builder, &majors, &spine_id);
            }
        }
        self.route_minors(&mut builder, &minors);

        let orphans = orphaned_assets(assets, &hub.id, &builder.roads);
        for orphan in orphans {
            tracing::warn!(asset = %orphan, "asset not connected to hub");
            builder.flags.push(LayoutFlag::new(
                FlagKind::OrphanAsset,
                Some(orphan.clone()),
                format!("{} is not reachable from the hub", orphan),
            ));
        }

        let network = RoadNetwork {
            roads: builder.roads,
            entry_point: frame.to_world(&entry_local),
            flags: builder.flags,
            nodes_expanded: builder.nodes_expanded,
        };
        tracing::info!(
            roads = network.roads.len(),
            fallback = network.fallback_count(),
            nodes_expanded = network.nodes_expanded,
            "road network routed"
        );
        network
    }

    /// Explicit entry snapped into the boundary, or the buildable
    /// boundary-edge cell nearest the hub.
    fn resolve_entry(&self, entry_point: Option<Point>, hub: &Point, flags: &mut Vec<LayoutFlag>) -> Point {
        let frame = self.site.frame();
        let masks = self.site.masks;
        match entry_point {
            Some(world) => {
                let local = frame.to_local(&world);
                let inside = frame
                    .cell_at(&local)
                    .is_some_and(|cell| masks.boundary_mask[cell])
                    && polygon_contains(&masks.boundary, &local);
                if inside {
                    return local;
                }
                let snapped = nearest_cell_where(&masks.buildable, &local, frame)
                    .or_else(|| nearest_cell_where(&masks.boundary_mask, &local, frame))
                    .map(|cell| frame.cell_center(cell))
                    .unwrap_or(*hub);
                tracing::warn!(
                    from_x = local.x,
                    from_y = local.y,
                    to_x = snapped.x,
                    to_y = snapped.y,
                    "entry point snapped into boundary"
                );
                flags.push(LayoutFlag::new(
                    FlagKind::EntryPointSnapped,
                    None,
                    format!(
                        "entry point moved {:.1} m into the boundary",
                        local.distance(&snapped)
                    ),
                ));
                snapped
            }
            None => {
                let edge = masks.buildable.map(|cell, ok| {
                    *ok && NEIGHBORS_8.iter().any(|(d_row, d_col)| {
                        masks
                            .boundary_mask
                            .get_offset(cell, *d_row, *d_col)
                            .map_or(true, |(_, inside)| !*inside)
                    })
                });
                nearest_cell_where(&edge, hub, frame)
                    .map(|cell| frame.cell_center(cell))
                    .unwrap_or(*hub)
            }
        }
    }

    /// A* under the relaxation schedule, straight-line fallback last.
    fn route(
        &self,
        surface: &CostSurface,
        from: &Point,
        to: &Point,
        nodes_expanded: &mut usize,
    ) -> RoutedPath {
        let frame = self.site.frame();
        let start = frame.nearest_cell(from);
        let goal = frame.nearest_cell(to);
        let mut attempts = 0usize;
        for step in RelaxationSchedule::new(&self.config.relaxation) {
            attempts = step.attempt;
            let outcome = astar(surface, frame, start, goal, &step, self.config.max_expansions);
            *nodes_expanded += outcome.nodes_expanded;
            if let Some(path) = outcome.path {
                let mut points = Vec::with_capacity(path.len() + 1);
                points.push(*from);
                if path.len() > 2 {
                    points.extend(path[1..path.len() - 1].iter().map(|cell| frame.cell_center(*cell)));
                }
                points.push(*to);
                return RoutedPath {
                    points,
                    attempts,
                    fallback: false,
                    rejected_m: None,
                };
            }
            tracing::debug!(
                attempt = step.attempt,
                cell_ceiling = step.cell_ceiling,
                budget = step.budget,
                "route attempt failed"
            );
        }
        RoutedPath {
            points: vec![*from, *to],
            attempts,
            fallback: true,
            rejected_m: None,
        }
    }

    fn push_road(
        &self,
        builder: &mut Builder,
        class: RoadClass,
        routed: RoutedPath,
        from: RoadEndpoint,
        to: RoadEndpoint,
    ) -> String {
        let id = builder.next_id();
        if routed.fallback {
            tracing::warn!(road = %id, attempts = routed.attempts, "road fell back to a straight line");
            let message = match routed.rejected_m {
                Some(length) => format!(
                    "{} is a direct spur; the routed path was {:.0} m, over the detour cap; review manually",
                    id, length
                ),
                None => format!(
                    "{} is a straight line after {} routing attempts; review manually",
                    id, routed.attempts
                ),
            };
            builder
                .flags
                .push(LayoutFlag::new(FlagKind::FallbackRoad, Some(id.clone()), message));
        }
        let road = self.finish_road(id.clone(), class, &routed.points, from, to, routed.fallback, routed.attempts);
        builder.local.push(NetworkRoad {
            id: id.clone(),
            points: simplify_polyline(&routed.points, self.config.simplify_tolerance_m),
        });
        builder.roads.push(road);
        id
    }

    /// Simplify, station and grade one centerline.
    #[allow(clippy::too_many_arguments)]
    fn finish_road(
        &self,
        id: String,
        class: RoadClass,
        local_points: &[Point],
        from: RoadEndpoint,
        to: RoadEndpoint,
        fallback: bool,
        attempts: usize,
    ) -> PlacedRoad {
        let frame = self.site.frame();
        let simplified = simplify_polyline(local_points, self.config.simplify_tolerance_m);
        let length_m = polyline_length(&simplified);
        let distances = station_distances(length_m, self.config.station_interval_m);
        let positions: Vec<Point> = distances
            .iter()
            .map(|d| point_along(&simplified, *d).unwrap_or(simplified[0]))
            .collect();
        let ground: Vec<f64> = positions
            .iter()
            .map(|p| {
                self.site
                    .raster
                    .sample(p)
                    .unwrap_or_else(|| self.site.metrics.elevation[frame.nearest_cell(p)])
            })
            .collect();
        let design = grade_limited_profile(&distances, &ground, self.config.max_grade_pct);

        let mut stations = Vec::with_capacity(distances.len());
        let mut max_grade_pct: f64 = 0.0;
        let mut max_terrain_grade_pct: f64 = 0.0;
        for i in 0..distances.len() {
            let grade_pct = if i == 0 {
                0.0
            } else {
                let run = distances[i] - distances[i - 1];
                if run > 1e-9 {
                    let terrain = (ground[i] - ground[i - 1]) / run * 100.0;
                    max_terrain_grade_pct = max_terrain_grade_pct.max(terrain.abs());
                    (design[i] - design[i - 1]) / run * 100.0
                } else {
                    0.0
                }
            };
            max_grade_pct = max_grade_pct.max(grade_pct.abs());
            stations.push(Station {
                distance_m: distances[i],
                position: frame.to_world(&positions[i]),
                ground_elevation_m: ground[i],
                elevation_m: design[i],
                grade_pct,
            });
        }

        let widths = &self.config.widths;
        let width_m = match class {
            RoadClass::Spine => widths.spine_m,
            RoadClass::Secondary => widths.secondary_m,
            RoadClass::Tertiary => widths.tertiary_m,
            RoadClass::RowCorridor => widths.row_corridor_m,
            RoadClass::ColCorridor => widths.col_corridor_m,
            RoadClass::Spur => widths.spur_m,
        };

        tracing::debug!(road = %id, ?class, length_m, stations = stations.len(), "road finished");
        PlacedRoad {
            id,
            class,
            polyline: simplified.iter().map(|p| frame.to_world(p)).collect(),
            length_m,
            width_m,
            max_grade_pct,
            max_terrain_grade_pct,
            stations,
            from,
            to,
            fallback,
            attempts,
            cut_m3: 0.0,
            fill_m3: 0.0,
            cut_l: 0,
            fill_l: 0,
        }
    }

    /// Prim's tree over the major assets with the spine as a super-node.
    fn route_spanning_tree(&self, builder: &mut Builder, majors: &[&PlacedAsset], spine_id: &str) {
        if majors.is_empty() {
            return;
        }
        let frame = self.site.frame();
        let spine_points = builder
            .local
            .iter()
            .find(|road| road.id == spine_id)
            .map(|road| road.points.clone())
            .unwrap_or_default();
        let locals: Vec<Point> = majors.iter().map(|asset| frame.to_local(&asset.position)).collect();

        let surfaces: Vec<&CostSurface> = majors
            .iter()
            .map(|asset| self.surface_for(asset.asset_type))
            .collect();

        let spine_weight = |i: usize| -> f64 {
            let point = &locals[i];
            match nearest_on_polyline(&spine_points, point) {
                Some((closest, dist)) => {
                    dist * surfaces[i].segment_cost(frame, point, &closest) * self.config.spine_discount
                }
                None => f64::INFINITY,
            }
        };

        // Node 0 is the spine; node i + 1 is majors[i].
        let n = locals.len();
        let mut in_tree = vec![false; n];
        let mut best: Vec<(f64, Option<usize>)> = (0..n).map(|i| (spine_weight(i), None)).collect();
        let mut order: Vec<(usize, Option<usize>)> = Vec::with_capacity(n);

        for _ in 0..n {
            let Some(next) = (0..n)
                .filter(|i| !in_tree[*i])
                .min_by(|a, b| best[*a].0.total_cmp(&best[*b].0).then(a.cmp(b)))
            else {
                break;
            };
            in_tree[next] = true;
            order.push((next, best[next].1));
            for other in 0..n {
                if in_tree[other] {
                    continue;
                }
                let length = locals[next].distance(&locals[other]);
                let weight = length * surfaces[other].segment_cost(frame, &locals[next], &locals[other]);
                if weight < best[other].0 {
                    best[other] = (weight, Some(next));
                }
            }
        }

        for (child, parent) in order {
            let asset = majors[child];
            let from = locals[child];
            let (target, to) = match parent {
                Some(parent) => (
                    locals[parent],
                    RoadEndpoint::Asset {
                        asset_id: majors[parent].id.clone(),
                    },
                ),
                None => {
                    let target = nearest_on_polyline(&spine_points, &from)
                        .map(|(point, _)| point)
                        .unwrap_or(from);
                    (
                        target,
                        RoadEndpoint::Road {
                            road_id: spine_id.to_string(),
                        },
                    )
                }
            };
            let routed = self.route(surfaces[child], &from, &target, &mut builder.nodes_expanded);
            self.push_road(
                builder,
                RoadClass::Secondary,
                routed,
                RoadEndpoint::Asset {
                    asset_id: asset.id.clone(),
                },
                to,
            );
        }
    }

    /// Spurs within the tertiary cap, tertiary roads beyond it, nearest first.
    fn route_minors(&self, builder: &mut Builder, minors: &[&PlacedAsset]) {
        let frame = self.site.frame();
        let mut pending: Vec<(f64, &PlacedAsset, Point)> = minors
            .iter()
            .map(|asset| {
                let local = frame.to_local(&asset.position);
                let dist = builder
                    .nearest_network_point(&local)
                    .map(|(_, dist, _)| dist)
                    .unwrap_or(f64::INFINITY);
                (dist, *asset, local)
            })
            .collect();
        pending.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));

        for (_, asset, local) in pending {
            let Some((target, dist, road_id)) = builder.nearest_network_point(&local) else {
                continue;
            };
            let class = if dist <= self.config.tertiary_cap_m {
                RoadClass::Spur
            } else {
                RoadClass::Tertiary
            };
            let surface = self.surface_for(asset.asset_type);
            let mut routed = self.route(surface, &local, &target, &mut builder.nodes_expanded);
            if class == RoadClass::Tertiary {
                routed = self.cap_detour(routed, dist);
            }
            self.push_road(
                builder,
                class,
                routed,
                RoadEndpoint::Asset {
                    asset_id: asset.id.clone(),
                },
                RoadEndpoint::Road { road_id },
            );
        }
    }

    /// Tertiary roads may not wind further than `tertiary_detour_ratio`
    /// times the direct distance; longer paths become a direct spur.
    fn cap_detour(&self, routed: RoutedPath, direct_m: f64) -> RoutedPath {
        let length = polyline_length(&routed.points);
        let cap = direct_m * self.config.tertiary_detour_ratio;
        if routed.fallback || length <= cap {
            return routed;
        }
        let (Some(first), Some(last)) = (routed.points.first(), routed.points.last()) else {
            return routed;
        };
        tracing::warn!(length_m = length, cap_m = cap, "routed detour over cap; using direct spur");
        RoutedPath {
            points: vec![*first, *last],
            attempts: routed.attempts,
            fallback: true,
            rejected_m: Some(length),
        }
    }

    /// Straight corridors around the block grid, the hub joined by a
    /// secondary road, and a spur from every block unit. Assets outside the
    /// grid are left in `minors`.
    fn route_corridors<'b>(
        &self,
        builder: &mut Builder,
        grid: &BlockGrid,
        assets: &'b [PlacedAsset],
        hub: &PlacedAsset,
        minors: &mut Vec<&'b PlacedAsset>,
    ) {
        let rows = grid.row_corridors();
        let cols = grid.col_corridors();
        let first_row_id = format!("road-{:03}", builder.roads.len() + 1);
        let last_row_id = format!("road-{:03}", builder.roads.len() + rows.len());
        let first_col_id = format!("road-{:03}", builder.roads.len() + rows.len() + 1);
        let last_col_id = format!("road-{:03}", builder.roads.len() + rows.len() + cols.len());

        for [a, b] in rows {
            let straight = RoutedPath {
                points: vec![a, b],
                attempts: 0,
                fallback: false,
                rejected_m: None,
            };
            self.push_road(
                builder,
                RoadClass::RowCorridor,
                straight,
                RoadEndpoint::Road {
                    road_id: first_col_id.clone(),
                },
                RoadEndpoint::Road {
                    road_id: last_col_id.clone(),
                },
            );
        }
        for [a, b] in cols {
            let straight = RoutedPath {
                points: vec![a, b],
                attempts: 0,
                fallback: false,
                rejected_m: None,
            };
            self.push_road(
                builder,
                RoadClass::ColCorridor,
                straight,
                RoadEndpoint::Road {
                    road_id: first_row_id.clone(),
                },
                RoadEndpoint::Road {
                    road_id: last_row_id.clone(),
                },
            );
        }

        let frame = self.site.frame();
        let corridor_ids: HashSet<String> = builder
            .local
            .iter()
            .skip(1)
            .map(|road| road.id.clone())
            .collect();
        let nearest_corridor = |builder: &Builder, point: &Point| -> Option<(Point, String)> {
            builder
                .local
                .iter()
                .filter(|road| corridor_ids.contains(&road.id))
                .filter_map(|road| {
                    nearest_on_polyline(&road.points, point).map(|(p, d)| (p, d, road.id.clone()))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(p, _, id)| (p, id))
        };

        let hub_local = frame.to_local(&hub.position);
        if let Some((target, road_id)) = nearest_corridor(builder, &hub_local) {
            let surface = self.surface_for(hub.asset_type);
            let routed = self.route(surface, &hub_local, &target, &mut builder.nodes_expanded);
            self.push_road(
                builder,
                RoadClass::Secondary,
                routed,
                RoadEndpoint::Asset {
                    asset_id: hub.id.clone(),
                },
                RoadEndpoint::Road { road_id },
            );
        }

        for asset in assets {
            if asset.id == hub.id {
                continue;
            }
            if asset.block_index.is_none() {
                minors.push(asset);
                continue;
            }
            let local = frame.to_local(&asset.position);
            let Some((target, road_id)) = nearest_corridor(builder, &local) else {
                continue;
            };
            let surface = self.surface_for(asset.asset_type);
            let routed = self.route(surface, &local, &target, &mut builder.nodes_expanded);
            self.push_road(
                builder,
                RoadClass::Spur,
                routed,
                RoadEndpoint::Asset {
                    asset_id: asset.id.clone(),
                },
                RoadEndpoint::Road { road_id },
            );
        }
    }
}

/// Nearest true cell of `mask` to a local point; ties go to the lower cell.
fn nearest_cell_where(mask: &Grid<bool>, point: &Point, frame: &RasterFrame) -> Option<Cell> {
    mask.cells()
        .filter(|(_, ok)| **ok)
        .map(|(cell, _)| (frame.cell_center(cell).distance(point), cell))
        .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .map(|(_, cell)| cell)
}

/// Asset ids that cannot reach the hub over road endpoints (BFS).
pub fn orphaned_assets(assets: &[PlacedAsset], hub_id: &str, roads: &[PlacedRoad]) -> Vec<String> {
    fn node(endpoint: &RoadEndpoint) -> String {
        match endpoint {
            RoadEndpoint::EntryPoint => "entry".to_string(),
            RoadEndpoint::Asset { asset_id } => format!("asset:{}", asset_id),
            RoadEndpoint::Road { road_id } => format!("road:{}", road_id),
        }
    }

    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    for road in roads {
        let road_node = format!("road:{}", road.id);
        for endpoint in [&road.from, &road.to] {
            let other = node(endpoint);
            adjacency.entry(road_node.clone()).or_default().push(other.clone());
            adjacency.entry(other).or_default().push(road_node.clone());
        }
    }

    let start = format!("asset:{}", hub_id);
    let mut seen: HashSet<String> = HashSet::from([start.clone()]);
    let mut queue = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        if let Some(next) = adjacency.get(&current) {
            for neighbour in next {
                if seen.insert(neighbour.clone()) {
                    queue.push_back(neighbour.clone());
                }
            }
        }
    }

    assets
        .iter()
        .filter(|asset| !seen.contains(&format!("asset:{}", asset.id)))
        .map(|asset| asset.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AssetType, StrategyProfile};
    use crate::models::ExclusionZone;
    use crate::placement::AssetPlacementEngine;
    use crate::test_support::{square, Fixture};

    #[test]
    fn cost_factors() {
        let config = RouterConfig::default();
        assert_eq!(slope_cost(0.0, &config), 1.0);
        assert!((slope_cost(8.0, &config) - 2.0).abs() < 1e-12);
        assert!((curvature_factor(2.0, 0.0, &config) - 1.25).abs() < 1e-12);
        assert!((curvature_factor(-2.0, 0.0, &config) - 1.35).abs() < 1e-12);
        assert_eq!(curvature_factor(0.5, 0.0, &config), 1.0);
        // Converging contours on an otherwise straight slope
        assert!((curvature_factor(0.5, -2.0, &config) - 1.35).abs() < 1e-12);
        assert_eq!(curvature_factor(0.5, 2.0, &config), 1.0);
    }

    #[test]
    fn combination_order_matters_on_steep_cells() {
        let mut config = RouterConfig::default();
        // 25 deg: slope cost ≈ 31.5, steep ceiling 250, soft zone × 2.
        config.combination = CostCombination::SteepCeilingLast;
        assert_eq!(combine_cost(25.0, 2.0, 0.0, 0.0, &config), 250.0);
        config.combination = CostCombination::SteepCeilingFirst;
        assert_eq!(combine_cost(25.0, 2.0, 0.0, 0.0, &config), 500.0);
        // Both clamp.
        assert_eq!(combine_cost(25.0, 50.0, 0.0, 0.0, &config), config.cost_clamp);
        // Below the cutoff both orders agree.
        let gentle = combine_cost(4.0, 1.5, 3.0, 0.0, &config);
        config.combination = CostCombination::SteepCeilingLast;
        assert!((gentle - combine_cost(4.0, 1.5, 3.0, 0.0, &config)).abs() < 1e-12);
    }

    #[test]
    fn relaxation_schedule_steps() {
        let steps: Vec<RelaxationStep> = RelaxationSchedule::new(&RelaxationConfig::default()).collect();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].cell_ceiling, 150.0);
        assert_eq!(steps[2].cell_ceiling, 450.0);
        assert_eq!(steps[1].budget, 750_000.0);
        assert_eq!(steps[2].attempt, 3);
    }

    #[test]
    fn grade_profile_respects_limit() {
        let distances = [0.0, 10.0, 20.0, 30.0, 40.0];
        let ground = [100.0, 103.0, 100.0, 105.0, 105.0];
        let design = grade_limited_profile(&distances, &ground, 10.0);
        for i in 1..design.len() {
            let grade = (design[i] - design[i - 1]).abs() / 10.0 * 100.0;
            assert!(grade <= 10.0 + 1e-9, "segment {i}: {grade}");
        }
        let flat = grade_limited_profile(&distances, &[5.0; 5], 10.0);
        assert_eq!(flat, vec![5.0; 5]);
    }

    #[test]
    fn stationing_includes_end() {
        assert_eq!(station_distances(25.0, 10.0), vec![0.0, 10.0, 20.0, 25.0]);
        assert_eq!(station_distances(20.0, 10.0), vec![0.0, 10.0, 20.0]);
        assert_eq!(station_distances(0.0, 10.0), vec![0.0, 0.0]);
    }

    #[test]
    fn astar_goes_around_a_hard_wall() {
        // Wall at local x 95..105 spanning y 0..160 of a 200 m site.
        let wall = ExclusionZone {
            id: "wall".to_string(),
            name: String::new(),
            polygon: square(95.0, 40.0, 105.0, 200.0),
            buffer_m: 0.0,
            cost_multiplier: 1000.0,
            asset_types: Vec::new(),
        };
        let fixture = Fixture::with_zones(200.0, 5.0, vec![wall], |_, _| 10.0);
        let config = RouterConfig::default();
        let surface = CostSurface::build(&fixture.site(), &config, &fixture.config.exclusions);
        let frame = fixture.raster.frame();
        let step = RelaxationSchedule::new(&config.relaxation).next().unwrap();
        let outcome = astar(&surface, &frame, (10, 5), (10, 34), &step, config.max_expansions);
        let path = outcome.path.unwrap();
        assert_eq!(path.first(), Some(&(10, 5)));
        assert_eq!(path.last(), Some(&(10, 34)));
        assert!(path.iter().all(|cell| surface.cost[*cell] < step.cell_ceiling));
        assert!(path.iter().any(|cell| cell.0 >= 32));
    }

    #[test]
    fn enclosed_goal_falls_back_to_straight_line() {
        // Hard ring around local (150, 150).
        let ring = |id: &str, x0: f64, y0: f64, x1: f64, y1: f64| ExclusionZone {
            id: id.to_string(),
            name: String::new(),
            polygon: square(x0, y0, x1, y1),
            buffer_m: 0.0,
            cost_multiplier: 500.0,
            asset_types: Vec::new(),
        };
        // World y = 200 − local y.
        let zones = vec![
            ring("n", 120.0, 75.0, 180.0, 80.0),
            ring("s", 120.0, 20.0, 180.0, 25.0),
            ring("w", 120.0, 20.0, 125.0, 80.0),
            ring("e", 175.0, 20.0, 180.0, 80.0),
        ];
        let fixture = Fixture::with_zones(200.0, 5.0, zones, |_, _| 10.0);
        let config = RouterConfig::default();
        let router = RoadNetworkRouter::new(fixture.site(), &config, &fixture.config.exclusions);
        let mut expanded = 0;
        let routed = router.route(
            &router.surface,
            &Point::new(20.0, 20.0),
            &Point::new(150.0, 150.0),
            &mut expanded,
        );
        assert!(routed.fallback);
        assert_eq!(routed.attempts, 3);
        assert_eq!(routed.points.len(), 2);
        assert!(expanded > 0);
    }

    /// One minor asset at local (200, 150), 180 m east of a north-south road.
    fn connect_far_minor(zones: Vec<ExclusionZone>) -> (Vec<PlacedRoad>, Vec<LayoutFlag>) {
        let fixture = Fixture::with_zones(300.0, 5.0, zones, |_, _| 10.0);
        let mut config = RouterConfig::default();
        config.tertiary_detour_ratio = 1.3;
        let router = RoadNetworkRouter::new(fixture.site(), &config, &fixture.config.exclusions);
        let asset = fixture.site().build_asset(
            "solar_array-001".to_string(),
            AssetType::SolarArray,
            &Point::new(200.0, 150.0),
            0.0,
            1.0,
            None,
        );
        let mut builder = Builder {
            roads: Vec::new(),
            local: vec![NetworkRoad {
                id: "trunk".to_string(),
                points: vec![Point::new(20.0, 20.0), Point::new(20.0, 280.0)],
            }],
            flags: Vec::new(),
            nodes_expanded: 0,
        };
        router.route_minors(&mut builder, &[&asset]);
        (builder.roads, builder.flags)
    }

    #[test]
    fn far_minor_gets_a_tertiary_road_on_open_ground() {
        let (roads, flags) = connect_far_minor(Vec::new());
        assert_eq!(roads.len(), 1);
        assert_eq!(roads[0].class, RoadClass::Tertiary);
        assert!(!roads[0].fallback);
        assert!(roads[0].length_m <= 180.0 * 1.3);
        assert_eq!(roads[0].to, RoadEndpoint::Road { road_id: "trunk".to_string() });
        assert!(flags.is_empty());
    }

    #[test]
    fn far_minor_behind_a_wall_gets_a_flagged_direct_spur() {
        // Hard wall at local x 100..110 from y 0 to 295; the only way round
        // is the top row, far over 1.3 × 180 m.
        let wall = ExclusionZone {
            id: "wall".to_string(),
            name: String::new(),
            polygon: square(100.0, 5.0, 110.0, 300.0),
            buffer_m: 0.0,
            cost_multiplier: 1000.0,
            asset_types: Vec::new(),
        };
        let (roads, flags) = connect_far_minor(vec![wall]);
        assert_eq!(roads.len(), 1);
        let road = &roads[0];
        assert_eq!(road.class, RoadClass::Tertiary);
        assert!(road.fallback);
        assert_eq!(road.polyline.len(), 2);
        assert!((road.length_m - 180.0).abs() < 1e-6);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, FlagKind::FallbackRoad);
        assert_eq!(flags[0].subject_id.as_deref(), Some(road.id.as_str()));
    }

    #[test]
    fn scoped_wall_only_blocks_roads_serving_its_types() {
        let wall = |asset_types: Vec<AssetType>| ExclusionZone {
            id: "setback".to_string(),
            name: String::new(),
            polygon: square(100.0, 5.0, 110.0, 300.0),
            buffer_m: 0.0,
            cost_multiplier: 1000.0,
            asset_types,
        };
        let (roads, flags) = connect_far_minor(vec![wall(vec![AssetType::WindTurbine])]);
        assert!(!roads[0].fallback);
        assert!(flags.is_empty());

        let (roads, flags) = connect_far_minor(vec![wall(vec![AssetType::SolarArray])]);
        assert!(roads[0].fallback);
        assert_eq!(flags.len(), 1);
    }

    #[test]
    fn typed_surface_carries_scoped_zone_cost() {
        let zone = ExclusionZone {
            id: "glare".to_string(),
            name: String::new(),
            polygon: square(0.0, 0.0, 100.0, 200.0),
            buffer_m: 0.0,
            cost_multiplier: 4.0,
            asset_types: vec![AssetType::SolarArray],
        };
        let fixture = Fixture::with_zones(200.0, 5.0, vec![zone], |_, _| 10.0);
        let config = RouterConfig::default();
        let router = RoadNetworkRouter::new(fixture.site(), &config, &fixture.config.exclusions);
        let cell = (20, 5);
        assert!((router.surface.cost[cell] - 1.0).abs() < 1e-9);
        assert!((router.surface_for(AssetType::SolarArray).cost[cell] - 4.0).abs() < 1e-9);
        assert!((router.surface_for(AssetType::Battery).cost[cell] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn flat_site_network_is_connected_and_within_grade() {
        let fixture = Fixture::new(400.0, 5.0, |row, col| 100.0 + row as f64 * 0.1 + col as f64 * 0.05);
        let strategy = StrategyProfile::builtin("balanced").unwrap();
        let outcome = AssetPlacementEngine::new(fixture.site(), &strategy)
            .place(4000.0, 11)
            .unwrap();
        let config = RouterConfig::default();
        let router = RoadNetworkRouter::new(fixture.site(), &config, &fixture.config.exclusions);
        let network = router.route_network(&outcome.assets, outcome.hub_id.as_deref(), None, None);

        assert_eq!(network.roads[0].class, RoadClass::Spine);
        assert_eq!(network.roads[0].from, RoadEndpoint::EntryPoint);
        assert!(network.flags.iter().all(|flag| flag.kind != FlagKind::OrphanAsset));
        assert!(orphaned_assets(&outcome.assets, "substation-001", &network.roads).is_empty());
        for road in &network.roads {
            assert!(road.stations.len() >= 2);
            for station in &road.stations {
                assert!(station.grade_pct.abs() <= config.max_grade_pct + 1e-9);
            }
        }
        // Solar arrays are minor and attach by spur or tertiary road.
        let solar_ids: HashSet<&str> = outcome
            .assets
            .iter()
            .filter(|asset| asset.asset_type == AssetType::SolarArray)
            .map(|asset| asset.id.as_str())
            .collect();
        for road in &network.roads {
            if let RoadEndpoint::Asset { asset_id } = &road.from {
                if solar_ids.contains(asset_id.as_str()) {
                    assert!(matches!(road.class, RoadClass::Spur | RoadClass::Tertiary));
                }
            }
        }

        let again = router.route_network(&outcome.assets, outcome.hub_id.as_deref(), None, None);
        let polylines = |n: &RoadNetwork| n.roads.iter().map(|r| r.polyline.clone()).collect::<Vec<_>>();
        assert_eq!(polylines(&network), polylines(&again));
    }

    #[test]
    fn entry_outside_boundary_is_snapped_and_flagged() {
        let fixture = Fixture::new(200.0, 5.0, |_, _| 10.0);
        let strategy = StrategyProfile::builtin("balanced").unwrap();
        let outcome = AssetPlacementEngine::new(fixture.site(), &strategy)
            .place(1000.0, 2)
            .unwrap();
        let config = RouterConfig::default();
        let router = RoadNetworkRouter::new(fixture.site(), &config, &fixture.config.exclusions);
        let network = router.route_network(
            &outcome.assets,
            outcome.hub_id.as_deref(),
            Some(Point::new(-40.0, 100.0)),
            None,
        );
        assert!(network
            .flags
            .iter()
            .any(|flag| flag.kind == FlagKind::EntryPointSnapped));
        assert!(network.entry_point.x > 0.0 && network.entry_point.x < 5.0);
    }

    #[test]
    fn orphan_detection_follows_road_links() {
        let asset = |id: &str| PlacedAsset {
            id: id.to_string(),
            asset_type: AssetType::Battery,
            position: Point::new(0.0, 0.0),
            capacity_kw: 0.0,
            length_m: 1.0,
            width_m: 1.0,
            rotation_deg: 0.0,
            elevation_m: 0.0,
            slope_deg: 0.0,
            aspect_deg: 0.0,
            suitability: 1.0,
            score: 1.0,
            block_index: None,
            cut_m3: 0.0,
            fill_m3: 0.0,
            cut_l: 0,
            fill_l: 0,
        };
        let road = |id: &str, from: RoadEndpoint, to: RoadEndpoint| PlacedRoad {
            id: id.to_string(),
            class: RoadClass::Spur,
            polyline: Vec::new(),
            length_m: 0.0,
            width_m: 4.0,
            max_grade_pct: 0.0,
            max_terrain_grade_pct: 0.0,
            stations: Vec::new(),
            from,
            to,
            fallback: false,
            attempts: 1,
            cut_m3: 0.0,
            fill_m3: 0.0,
            cut_l: 0,
            fill_l: 0,
        };
        let assets = vec![asset("hub"), asset("a"), asset("b")];
        let roads = vec![
            road("road-001", RoadEndpoint::EntryPoint, RoadEndpoint::Asset { asset_id: "hub".into() }),
            road(
                "road-002",
                RoadEndpoint::Asset { asset_id: "a".into() },
                RoadEndpoint::Road { road_id: "road-001".into() },
            ),
        ];
        assert_eq!(orphaned_assets(&assets, "hub", &roads), vec!["b".to_string()]);
    }
}
