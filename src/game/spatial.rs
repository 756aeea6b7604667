//! Spatial hash grid for interest queries
//!
//! Divides the ground plane into square cells and records every entity whose
//! bounding box overlaps each cell. An entity spanning a cell boundary is
//! listed in every cell it touches. Queries resolve the covered cell range
//! as a broad phase, then narrow with an exact test.

use hashbrown::HashMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::game::components::BoundingBox;
use crate::game::constants::aoi::LOCATOR_CELL_SIZE;
use crate::game::registry::Entity;
use crate::util::vec3::Vec3;

/// Initial capacity for the cell map (number of expected non-empty cells)
const GRID_INITIAL_CAPACITY: usize = 256;

/// Initial capacity for entity vectors within cells
const CELL_INITIAL_CAPACITY: usize = 8;

/// Grid cell key - (x, y) cell coordinates
pub type CellKey = (i32, i32);

/// Inclusive range of cells covered by one bounding box
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CellRange {
    min: CellKey,
    max: CellKey,
}

impl CellRange {
    fn cells(self) -> impl Iterator<Item = CellKey> {
        (self.min.0..=self.max.0)
            .flat_map(move |x| (self.min.1..=self.max.1).map(move |y| (x, y)))
    }
}

#[derive(Debug, Clone, Copy)]
struct Occupant {
    bounds: BoundingBox,
    range: CellRange,
}

/// Grid-based locator mapping world extents to the entities occupying them
#[derive(Debug, Clone)]
pub struct SpatialLocator {
    /// Cell size in world units
    cell_size: f32,
    /// Inverse cell size for fast position-to-cell conversion
    inv_cell_size: f32,
    /// Map from cell key to entities overlapping that cell
    cells: HashMap<CellKey, Vec<Entity>>,
    /// Last inserted bounds per entity, so updates only touch changed cells
    occupants: FxHashMap<Entity, Occupant>,
}

impl SpatialLocator {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::with_capacity(GRID_INITIAL_CAPACITY),
            occupants: FxHashMap::default(),
        }
    }

    #[inline]
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    #[inline]
    fn to_cell(&self, x: f32, y: f32) -> CellKey {
        (
            (x * self.inv_cell_size).floor() as i32,
            (y * self.inv_cell_size).floor() as i32,
        )
    }

    #[inline]
    fn range_for(&self, min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> CellRange {
        CellRange {
            min: self.to_cell(min_x, min_y),
            max: self.to_cell(max_x, max_y),
        }
    }

    /// Insert an entity, or move it if it is already present
    pub fn insert_or_update(&mut self, entity: Entity, bounds: BoundingBox) {
        let range = self.range_for(bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y);

        if let Some(existing) = self.occupants.get_mut(&entity) {
            let old_range = existing.range;
            existing.bounds = bounds;
            if old_range == range {
                return;
            }
            existing.range = range;
            self.remove_from_cells(entity, old_range);
        } else {
            self.occupants.insert(entity, Occupant { bounds, range });
        }

        for key in range.cells() {
            self.cells
                .entry(key)
                .or_insert_with(|| Vec::with_capacity(CELL_INITIAL_CAPACITY))
                .push(entity);
        }
    }

    /// Remove an entity. Returns false if it was never inserted.
    pub fn remove(&mut self, entity: Entity) -> bool {
        match self.occupants.remove(&entity) {
            Some(occupant) => {
                self.remove_from_cells(entity, occupant.range);
                true
            }
            None => false,
        }
    }

    fn remove_from_cells(&mut self, entity: Entity, range: CellRange) {
        for key in range.cells() {
            if let Some(cell) = self.cells.get_mut(&key) {
                if let Some(idx) = cell.iter().position(|&e| e == entity) {
                    cell.swap_remove(idx);
                }
                if cell.is_empty() {
                    self.cells.remove(&key);
                }
            }
        }
    }

    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.occupants.contains_key(&entity)
    }

    /// Entities whose bounding-box center lies strictly within `radius` of
    /// `center` on the ground plane, sorted ascending
    pub fn query_radius(&self, center: Vec3, radius: f32) -> Vec<Entity> {
        let mut out = Vec::new();
        self.query_radius_into(center, radius, &mut out);
        out
    }

    /// As [`query_radius`](Self::query_radius), writing into a reusable buffer
    pub fn query_radius_into(&self, center: Vec3, radius: f32, out: &mut Vec<Entity>) {
        out.clear();
        let range = self.range_for(
            center.x - radius,
            center.y - radius,
            center.x + radius,
            center.y + radius,
        );
        let radius_sq = radius * radius;

        for key in range.cells() {
            let Some(cell) = self.cells.get(&key) else {
                continue;
            };
            for &entity in cell {
                let Some(occupant) = self.occupants.get(&entity) else {
                    continue;
                };
                if occupant.bounds.center().planar_distance_sq_to(center) < radius_sq {
                    out.push(entity);
                }
            }
        }

        out.sort_unstable();
        out.dedup();
    }

    /// Entities whose bounding box strictly overlaps `extent`, sorted ascending
    pub fn query_extent(&self, extent: &BoundingBox) -> Vec<Entity> {
        let range = self.range_for(extent.min_x, extent.min_y, extent.max_x, extent.max_y);
        let mut out: SmallVec<[Entity; 16]> = SmallVec::new();

        for key in range.cells() {
            let Some(cell) = self.cells.get(&key) else {
                continue;
            };
            for &entity in cell {
                if let Some(occupant) = self.occupants.get(&entity) {
                    if occupant.bounds.intersects(extent) {
                        out.push(entity);
                    }
                }
            }
        }

        out.sort_unstable();
        out.dedup();
        out.into_vec()
    }

    /// Get statistics about the grid
    pub fn stats(&self) -> SpatialLocatorStats {
        SpatialLocatorStats {
            non_empty_cells: self.cells.len(),
            total_entities: self.occupants.len(),
            max_per_cell: self.cells.values().map(Vec::len).max().unwrap_or(0),
        }
    }
}

impl Default for SpatialLocator {
    fn default() -> Self {
        Self::new(LOCATOR_CELL_SIZE)
    }
}

/// Statistics about the spatial locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpatialLocatorStats {
    pub non_empty_cells: usize,
    pub total_entities: usize,
    pub max_per_cell: usize,
}
