//! Concrete partition state: attributes, parts and cells.
//!
//! A [`DataGrid`] is the joint partition the optimizer works on. Parts live
//! in per-attribute slabs and are addressed by [`PartId`]; cells live in a
//! grid-level slab addressed by [`CellId`] and are reachable both from the
//! hash index (by part-id tuple) and from each participating part's cell
//! list. All cross-references are indices, never pointers, so the whole
//! grid is `Clone` and snapshots for the anytime callback are plain deep
//! copies.

use crate::error::{GrainError, GrainResult};
use crate::value::{AttributeType, Continuous, SymbolId, Value};
use hashbrown::HashMap;
use serde::Serialize;

/// Slab index of a part within its attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PartId(u32);

impl PartId {
    #[inline]
    pub fn new(value: u32) -> Self {
        PartId(value)
    }
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Slab index of a cell within the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CellId(u32);

impl CellId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// One categorical value held by a part, with its sample frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValueEntry {
    pub symbol: SymbolId,
    pub frequency: u64,
}

/// Content of a part: an interval for numeric attributes, a value set for
/// categorical ones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PartContent {
    /// Half-open interval `]lower, upper]`; the leftmost interval has
    /// `lower == -inf` and also absorbs the missing value.
    Interval { lower: f64, upper: f64 },
    /// Ordered value set; `has_catchall` marks the part that stands for all
    /// values unseen during training.
    ValueSet {
        values: Vec<ValueEntry>,
        has_catchall: bool,
    },
}

impl PartContent {
    pub fn empty_value_set() -> Self {
        PartContent::ValueSet {
            values: Vec::new(),
            has_catchall: false,
        }
    }

    pub fn contains(&self, value: &Value) -> bool {
        match (self, value) {
            (PartContent::Interval { lower, upper }, Value::Number(c)) => {
                let x = c.value();
                (*lower == f64::NEG_INFINITY || x > *lower) && x <= *upper
            }
            (PartContent::ValueSet { values, .. }, Value::Symbol(s)) => {
                values.iter().any(|v| v.symbol == *s)
            }
            _ => false,
        }
    }

    /// Number of values in a value set, the catch-all counting for one.
    pub fn value_count(&self) -> usize {
        match self {
            PartContent::Interval { .. } => 0,
            PartContent::ValueSet { values, .. } => values.len(),
        }
    }

    pub fn is_interval(&self) -> bool {
        matches!(self, PartContent::Interval { .. })
    }

    /// Interval label in the report notation: `]-inf;4.75]`, `]4.75;+inf[`.
    pub fn interval_label(&self) -> Option<String> {
        match self {
            PartContent::Interval { lower, upper } => {
                let lower_label = if *lower == f64::NEG_INFINITY {
                    "]-inf".to_string()
                } else {
                    format!("]{}", lower)
                };
                let upper_label = if *upper == f64::INFINITY {
                    "+inf[".to_string()
                } else {
                    format!("{}]", upper)
                };
                Some(format!("{};{}", lower_label, upper_label))
            }
            PartContent::ValueSet { .. } => None,
        }
    }
}

/// A non-empty subset of one attribute's value domain.
#[derive(Debug, Clone, Serialize)]
pub struct Part {
    pub content: PartContent,
    /// Sum of this part's cell frequencies.
    pub frequency: u64,
    /// Cells in which this part participates.
    pub cells: Vec<CellId>,
}

/// A named participant of the grid.
#[derive(Debug, Clone, Serialize)]
pub struct Attribute {
    pub name: String,
    pub attribute_type: AttributeType,
    /// Part count of the grid this one was initialized from.
    pub initial_part_count: usize,
    parts: Vec<Option<Part>>,
    alive_count: usize,
}

impl Attribute {
    fn new(name: String, attribute_type: AttributeType) -> Self {
        Self {
            name,
            attribute_type,
            initial_part_count: 0,
            parts: Vec::new(),
            alive_count: 0,
        }
    }

    pub fn part(&self, id: PartId) -> &Part {
        self.parts[id.index()].as_ref().expect("dead part id")
    }

    pub fn part_mut(&mut self, id: PartId) -> &mut Part {
        self.parts[id.index()].as_mut().expect("dead part id")
    }

    pub fn part_count(&self) -> usize {
        self.alive_count
    }

    /// Alive part ids in slab order.
    pub fn part_ids(&self) -> impl Iterator<Item = PartId> + '_ {
        self.parts
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_some())
            .map(|(i, _)| PartId(i as u32))
    }

    /// Alive part ids in domain order: numeric attributes by interval
    /// position, categorical attributes by slab order.
    pub fn ordered_part_ids(&self) -> Vec<PartId> {
        let mut ids: Vec<PartId> = self.part_ids().collect();
        if self.attribute_type == AttributeType::Numeric {
            ids.sort_by(|a, b| {
                let pa = self.part(*a);
                let pb = self.part(*b);
                match (&pa.content, &pb.content) {
                    (
                        PartContent::Interval { lower: la, .. },
                        PartContent::Interval { lower: lb, .. },
                    ) => la.total_cmp(lb),
                    _ => std::cmp::Ordering::Equal,
                }
            });
        }
        ids
    }

    /// The part containing a value, if any.
    pub fn find_part(&self, value: &Value) -> Option<PartId> {
        self.part_ids().find(|id| self.part(*id).content.contains(value))
    }

    /// Part with the most values (categorical), used as the garbage group
    /// candidate. Ties break on the lower part id.
    pub fn largest_value_set(&self) -> Option<(PartId, usize)> {
        if self.attribute_type != AttributeType::Categorical {
            return None;
        }
        let mut best: Option<(PartId, usize)> = None;
        for id in self.part_ids() {
            let count = self.part(id).content.value_count();
            match best {
                Some((_, best_count)) if best_count >= count => {}
                _ => best = Some((id, count)),
            }
        }
        best
    }
}

/// A non-empty cell of the grid: one part per attribute plus a frequency.
#[derive(Debug, Clone, Serialize)]
pub struct Cell {
    pub parts: Vec<PartId>,
    pub frequency: u64,
}

/// Atom of the variable-part dimension in instances x variables mode: a
/// reference to one part of one inner variable. Atoms are interned as
/// pseudo-symbols so the variable-part dimension behaves like a categorical
/// attribute everywhere else.
#[derive(Debug, Clone, Serialize)]
pub struct VarPartAtom {
    pub inner_attribute: usize,
    pub inner_part: usize,
    pub label: String,
}

/// One inner variable of the instances x variables variant, with its frozen
/// partition.
#[derive(Debug, Clone, Serialize)]
pub struct InnerAttribute {
    pub name: String,
    pub attribute_type: AttributeType,
    pub parts: Vec<PartContent>,
}

/// Description of the instances x variables structure attached to a grid.
#[derive(Debug, Clone, Serialize)]
pub struct VarPartSpec {
    /// Index of the identifier dimension in the grid's attribute list.
    pub identifier_attribute: usize,
    /// Index of the variable-part dimension in the grid's attribute list.
    pub varpart_attribute: usize,
    pub inner: Vec<InnerAttribute>,
    /// Atom payloads, indexed by the pseudo-symbol id used in value sets.
    pub atoms: Vec<VarPartAtom>,
}

/// The joint partition: attributes, their parts, their cells.
#[derive(Debug, Clone, Serialize)]
pub struct DataGrid {
    attributes: Vec<Attribute>,
    cells: Vec<Option<Cell>>,
    #[serde(skip)]
    cell_index: HashMap<Vec<PartId>, CellId>,
    total_frequency: u64,
    cell_count: usize,
    /// Present only for instances x variables grids.
    pub varpart: Option<VarPartSpec>,
}

impl DataGrid {
    pub fn new(attributes: Vec<(String, AttributeType)>) -> Self {
        Self {
            attributes: attributes
                .into_iter()
                .map(|(name, attribute_type)| Attribute::new(name, attribute_type))
                .collect(),
            cells: Vec::new(),
            cell_index: HashMap::new(),
            total_frequency: 0,
            cell_count: 0,
            varpart: None,
        }
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, index: usize) -> &Attribute {
        &self.attributes[index]
    }

    pub fn attribute_mut(&mut self, index: usize) -> &mut Attribute {
        &mut self.attributes[index]
    }

    pub fn total_frequency(&self) -> u64 {
        self.total_frequency
    }

    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    pub fn cell(&self, id: CellId) -> &Cell {
        self.cells[id.index()].as_ref().expect("dead cell id")
    }

    /// Alive cell ids in slab order.
    pub fn cell_ids(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .map(|(i, _)| CellId(i as u32))
    }

    pub fn lookup_cell(&self, parts: &[PartId]) -> Option<CellId> {
        self.cell_index.get(parts).copied()
    }

    /// Total part count over all attributes.
    pub fn total_part_count(&self) -> usize {
        self.attributes.iter().map(|a| a.part_count()).sum()
    }

    /// Product of per-attribute part counts: the grid's cell capacity.
    pub fn grid_size(&self) -> f64 {
        self.attributes
            .iter()
            .map(|a| a.part_count() as f64)
            .product()
    }

    /// Natural log of the grid size, robust to large dimension counts.
    pub fn ln_grid_size(&self) -> f64 {
        self.attributes
            .iter()
            .map(|a| (a.part_count().max(1) as f64).ln())
            .sum()
    }

    /// An informative grid has at least two attributes with more than one
    /// part.
    pub fn is_informative(&self) -> bool {
        self.attributes.iter().filter(|a| a.part_count() > 1).count() >= 2
    }

    pub fn informative_attribute_count(&self) -> usize {
        self.attributes.iter().filter(|a| a.part_count() > 1).count()
    }

    pub fn add_part(&mut self, attribute: usize, content: PartContent) -> PartId {
        let slab = &mut self.attributes[attribute];
        let id = PartId(slab.parts.len() as u32);
        slab.parts.push(Some(Part {
            content,
            frequency: 0,
            cells: Vec::new(),
        }));
        slab.alive_count += 1;
        id
    }

    /// Add a frequency to the cell keyed by `parts`, creating it if needed.
    pub fn add_cell_frequency(&mut self, parts: Vec<PartId>, frequency: u64) -> CellId {
        debug_assert_eq!(parts.len(), self.attributes.len());
        debug_assert!(frequency > 0);
        if let Some(&id) = self.cell_index.get(&parts) {
            let cell = self.cells[id.index()].as_mut().expect("indexed cell");
            cell.frequency += frequency;
            for (attribute, part) in parts.iter().enumerate() {
                self.attributes[attribute].part_mut(*part).frequency += frequency;
            }
            self.total_frequency += frequency;
            return id;
        }
        let id = CellId(self.cells.len() as u32);
        for (attribute, part) in parts.iter().enumerate() {
            let slab_part = self.attributes[attribute].part_mut(*part);
            slab_part.frequency += frequency;
            slab_part.cells.push(id);
        }
        self.cells.push(Some(Cell {
            parts: parts.clone(),
            frequency,
        }));
        self.cell_index.insert(parts, id);
        self.cell_count += 1;
        self.total_frequency += frequency;
        id
    }

    /// Remove a frequency from the cell keyed by `parts`. The cell is
    /// deleted and unlinked once it empties. Panics if the cell does not
    /// exist or holds less than `frequency`.
    pub fn remove_cell_frequency(&mut self, parts: &[PartId], frequency: u64) {
        debug_assert!(frequency > 0);
        let id = *self
            .cell_index
            .get(parts)
            .expect("removing frequency from a missing cell");
        let cell = self.cells[id.index()].as_mut().expect("indexed cell");
        assert!(cell.frequency >= frequency);
        cell.frequency -= frequency;
        let emptied = cell.frequency == 0;
        for (attribute, part) in parts.iter().enumerate() {
            let slab_part = self.attributes[attribute].part_mut(*part);
            slab_part.frequency -= frequency;
            if emptied {
                slab_part.cells.retain(|c| *c != id);
            }
        }
        self.total_frequency -= frequency;
        if emptied {
            self.cell_index.remove(parts);
            self.cells[id.index()] = None;
            self.cell_count -= 1;
        }
    }

    /// Fuse `drained` into `kept` on one attribute. The drained part's cells
    /// are re-keyed onto the kept part; colliding cells sum their
    /// frequencies; contents are unioned. Returns the pre-merge keys of the
    /// cells that collided and folded, so callers can reprice merge
    /// candidates of the parts those cells touched.
    ///
    /// The caller is responsible for orienting the merge (the merger drains
    /// the part with fewer cells).
    pub fn merge_parts(
        &mut self,
        attribute: usize,
        kept: PartId,
        drained: PartId,
    ) -> Vec<Vec<PartId>> {
        assert_ne!(kept, drained);

        let drained_part = self.attributes[attribute].parts[drained.index()]
            .take()
            .expect("dead drained part");
        self.attributes[attribute].alive_count -= 1;

        // Union the contents before touching cells.
        let kept_content = &mut self.attributes[attribute]
            .parts[kept.index()]
            .as_mut()
            .expect("dead kept part")
            .content;
        match (kept_content, drained_part.content) {
            (
                PartContent::Interval { lower, upper },
                PartContent::Interval {
                    lower: drained_lower,
                    upper: drained_upper,
                },
            ) => {
                *lower = lower.min(drained_lower);
                *upper = upper.max(drained_upper);
            }
            (
                PartContent::ValueSet {
                    values,
                    has_catchall,
                },
                PartContent::ValueSet {
                    values: drained_values,
                    has_catchall: drained_catchall,
                },
            ) => {
                values.extend(drained_values);
                *has_catchall = *has_catchall || drained_catchall;
            }
            _ => panic!("merging parts of mismatched content"),
        }

        // Re-key the drained part's cells.
        let mut folded_keys: Vec<Vec<PartId>> = Vec::new();
        for cell_id in drained_part.cells {
            let cell = self.cells[cell_id.index()].as_mut().expect("dead cell");
            let old_key = cell.parts.clone();
            let mut new_key = old_key.clone();
            new_key[attribute] = kept;
            let frequency = cell.frequency;
            self.cell_index.remove(&old_key);

            if let Some(&target_id) = self.cell_index.get(&new_key) {
                // Collision: fold into the existing cell and delete this one.
                folded_keys.push(old_key.clone());
                self.cells[cell_id.index()] = None;
                self.cell_count -= 1;
                let target = self.cells[target_id.index()]
                    .as_mut()
                    .expect("indexed cell");
                target.frequency += frequency;
                // Unlink the dead cell from the other attributes' part lists.
                for (other_attribute, part) in old_key.iter().enumerate() {
                    if other_attribute == attribute {
                        continue;
                    }
                    let cells = &mut self.attributes[other_attribute]
                        .part_mut(*part)
                        .cells;
                    cells.retain(|c| *c != cell_id);
                }
            } else {
                let cell = self.cells[cell_id.index()].as_mut().expect("dead cell");
                cell.parts = new_key.clone();
                self.cell_index.insert(new_key, cell_id);
                self.attributes[attribute].part_mut(kept).cells.push(cell_id);
            }
        }

        let kept_part = self.attributes[attribute].part_mut(kept);
        kept_part.frequency += drained_part.frequency;
        kept_part
            .cells
            .sort_unstable();
        kept_part.cells.dedup();
        folded_keys
    }

    /// Remove an empty part (no cells, zero frequency).
    pub fn remove_empty_part(&mut self, attribute: usize, part: PartId) {
        let slab = &mut self.attributes[attribute];
        let entry = slab.parts[part.index()].take().expect("dead part id");
        assert_eq!(entry.frequency, 0, "removing a non-empty part");
        assert!(entry.cells.is_empty());
        slab.alive_count -= 1;
    }

    /// Validate cell conservation and cross-reference consistency.
    pub fn check(&self) -> GrainResult<()> {
        let mut cell_total = 0u64;
        for id in self.cell_ids() {
            let cell = self.cell(id);
            if cell.frequency == 0 {
                return Err(GrainError::Internal(format!(
                    "cell {:?} has zero frequency",
                    id
                )));
            }
            cell_total += cell.frequency;
            if self.cell_index.get(&cell.parts) != Some(&id) {
                return Err(GrainError::Internal(format!(
                    "cell {:?} missing from the hash index",
                    id
                )));
            }
        }
        if cell_total != self.total_frequency {
            return Err(GrainError::Internal(format!(
                "cell frequencies sum to {} but grid frequency is {}",
                cell_total, self.total_frequency
            )));
        }
        for (index, attribute) in self.attributes.iter().enumerate() {
            let mut part_total = 0u64;
            for part_id in attribute.part_ids() {
                let part = attribute.part(part_id);
                let from_cells: u64 = part
                    .cells
                    .iter()
                    .map(|c| self.cell(*c).frequency)
                    .sum();
                if from_cells != part.frequency {
                    return Err(GrainError::Internal(format!(
                        "part {:?} of attribute {} stores frequency {} but its cells sum to {}",
                        part_id, attribute.name, part.frequency, from_cells
                    )));
                }
                for cell_id in &part.cells {
                    if self.cell(*cell_id).parts[index] != part_id {
                        return Err(GrainError::Internal(format!(
                            "cell {:?} does not reference part {:?} back",
                            cell_id, part_id
                        )));
                    }
                }
                part_total += part.frequency;
            }
            if part_total != self.total_frequency {
                return Err(GrainError::Internal(format!(
                    "attribute {} parts sum to {} but grid frequency is {}",
                    attribute.name, part_total, self.total_frequency
                )));
            }
        }
        if let Some(varpart) = &self.varpart {
            self.check_varpart(varpart)?;
        }
        Ok(())
    }

    fn check_varpart(&self, varpart: &VarPartSpec) -> GrainResult<()> {
        // Every atom must belong to exactly one cluster of the variable-part
        // dimension.
        let attribute = &self.attributes[varpart.varpart_attribute];
        let mut seen = vec![0usize; varpart.atoms.len()];
        for part_id in attribute.part_ids() {
            if let PartContent::ValueSet { values, .. } = &attribute.part(part_id).content {
                for value in values {
                    let index = value.symbol.index();
                    if index >= seen.len() {
                        return Err(GrainError::Internal(format!(
                            "variable-part value {} has no atom",
                            index
                        )));
                    }
                    seen[index] += 1;
                }
            }
        }
        if let Some(atom) = seen.iter().position(|count| *count != 1) {
            return Err(GrainError::Internal(format!(
                "inner part atom {} belongs to {} clusters",
                atom, seen[atom]
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol_part(values: &[(u32, u64)]) -> PartContent {
        PartContent::ValueSet {
            values: values
                .iter()
                .map(|(id, frequency)| ValueEntry {
                    symbol: SymbolId::new(*id),
                    frequency: *frequency,
                })
                .collect(),
            has_catchall: false,
        }
    }

    fn small_grid() -> (DataGrid, Vec<PartId>, Vec<PartId>) {
        let mut grid = DataGrid::new(vec![
            ("X".into(), AttributeType::Numeric),
            ("Y".into(), AttributeType::Categorical),
        ]);
        let x0 = grid.add_part(0, PartContent::Interval {
            lower: f64::NEG_INFINITY,
            upper: 1.5,
        });
        let x1 = grid.add_part(0, PartContent::Interval {
            lower: 1.5,
            upper: f64::INFINITY,
        });
        let y0 = grid.add_part(1, symbol_part(&[(0, 4)]));
        let y1 = grid.add_part(1, symbol_part(&[(1, 6)]));
        grid.add_cell_frequency(vec![x0, y0], 4);
        grid.add_cell_frequency(vec![x1, y1], 6);
        (grid, vec![x0, x1], vec![y0, y1])
    }

    #[test]
    fn cell_conservation_holds() {
        let (grid, _, _) = small_grid();
        assert_eq!(grid.total_frequency(), 10);
        assert_eq!(grid.cell_count(), 2);
        grid.check().unwrap();
        assert!(grid.is_informative());
    }

    #[test]
    fn interval_contains_missing_in_leftmost_part() {
        let content = PartContent::Interval {
            lower: f64::NEG_INFINITY,
            upper: 1.5,
        };
        assert!(content.contains(&Value::Number(Continuous::MISSING)));
        assert!(content.contains(&Value::Number(Continuous::new(1.5).unwrap())));
        assert!(!content.contains(&Value::Number(Continuous::new(2.0).unwrap())));
    }

    #[test]
    fn merge_unions_intervals_and_folds_cells() {
        let (mut grid, xs, ys) = small_grid();
        // Put both X parts over the same Y part so the merge collides.
        grid.add_cell_frequency(vec![xs[1], ys[0]], 5);
        grid.merge_parts(0, xs[0], xs[1]);
        grid.check().unwrap();

        assert_eq!(grid.attribute(0).part_count(), 1);
        let kept = grid.attribute(0).part(xs[0]);
        assert_eq!(kept.frequency, 15);
        match &kept.content {
            PartContent::Interval { lower, upper } => {
                assert_eq!(*lower, f64::NEG_INFINITY);
                assert_eq!(*upper, f64::INFINITY);
            }
            _ => panic!("expected an interval"),
        }
        // Colliding cells folded: (x,y0) holds 4+5.
        let folded = grid.lookup_cell(&[xs[0], ys[0]]).unwrap();
        assert_eq!(grid.cell(folded).frequency, 9);
    }

    #[test]
    fn single_part_attributes_are_not_informative() {
        let (mut grid, xs, _) = small_grid();
        grid.merge_parts(0, xs[0], xs[1]);
        assert!(!grid.is_informative());
        assert_eq!(grid.informative_attribute_count(), 1);
    }

    #[test]
    fn check_rejects_inconsistent_part_frequency() {
        let (mut grid, xs, _) = small_grid();
        grid.attribute_mut(0).part_mut(xs[0]).frequency += 1;
        assert!(grid.check().is_err());
    }

    #[test]
    fn interval_labels_use_report_notation() {
        let leftmost = PartContent::Interval {
            lower: f64::NEG_INFINITY,
            upper: 4.75,
        };
        let rightmost = PartContent::Interval {
            lower: 4.75,
            upper: f64::INFINITY,
        };
        assert_eq!(leftmost.interval_label().unwrap(), "]-inf;4.75]");
        assert_eq!(rightmost.interval_label().unwrap(), "]4.75;+inf[");
    }
}
