//! Resolved, validated schema catalog.
//!
//! Built once per schema load from a [`CatalogSpec`]. Member names are
//! interned into dense ids, measure references form a DAG checked eagerly
//! for cycles, and every measure's transitive leaf set is precomputed.
//!
//! # Ordering
//!
//! Cubes keep their declaration order and each cube's pre-aggregations keep
//! theirs. Selection relies on this order, so it is exposed through explicit
//! indices rather than through map iteration.

use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use super::error::{SchemaError, SchemaResult};
use super::time::DateRange;
use crate::cache::short_hash;
use crate::config::parse_duration;
use crate::model::measure::CUBE_TOKEN;
use crate::model::{
    CatalogSpec, Cube, DimensionType, Granularity, LocationKind, MeasureKind,
    PreAggregationDef, PreAggregationType, RefreshKeyDef, Relationship,
};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(usize);

        impl $name {
            pub fn index(&self) -> usize {
                self.0
            }
        }
    };
}

id_type!(
    /// Index of a cube in declaration order.
    CubeId
);
id_type!(
    /// Index of a measure in the catalog.
    MeasureId
);
id_type!(
    /// Index of a dimension in the catalog.
    DimensionId
);
id_type!(
    /// Index of a pre-aggregation, ordered by cube then declaration.
    PreAggregationIndex
);

/// Stable name of a pre-aggregation: `Cube.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PreAggregationId {
    pub cube: String,
    pub name: String,
}

impl PreAggregationId {
    pub fn new(cube: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cube: cube.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PreAggregationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.cube, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedCube {
    pub id: CubeId,
    pub name: String,
    pub sql: String,
    pub measures: Vec<MeasureId>,
    pub dimensions: Vec<DimensionId>,
    pub joins: Vec<ResolvedJoin>,
    pub pre_aggregations: Vec<PreAggregationIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedJoin {
    pub from: CubeId,
    pub to: CubeId,
    pub relationship: Relationship,
}

#[derive(Debug, Clone)]
pub struct ResolvedMeasure {
    pub id: MeasureId,
    pub cube: CubeId,
    pub name: String,
    /// Qualified `Cube.member` path.
    pub path: String,
    pub kind: MeasureKind,
    pub sql: Option<String>,
    /// Direct references to other measures.
    pub references: Vec<MeasureId>,
    /// Transitive leaves; a leaf measure lists only itself.
    pub leaves: Vec<MeasureId>,
}

#[derive(Debug, Clone)]
pub struct ResolvedDimension {
    pub id: DimensionId,
    pub cube: CubeId,
    pub name: String,
    pub path: String,
    pub kind: DimensionType,
    pub primary_key: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedPreAggregation {
    pub index: PreAggregationIndex,
    pub id: PreAggregationId,
    pub cube: CubeId,
    pub kind: PreAggregationType,
    /// Position among the owning cube's pre-aggregations.
    pub declaration_index: usize,
    pub measures: Vec<MeasureId>,
    pub dimensions: Vec<DimensionId>,
    pub time_dimension: Option<DimensionId>,
    pub granularity: Option<Granularity>,
    pub partition_granularity: Option<Granularity>,
    pub build_range: Option<DateRange>,
    /// Own refresh key, falling back to the cube's.
    pub refresh_key: Option<RefreshKeyDef>,
    pub location: Option<LocationKind>,
    pub scheduled_refresh: bool,
    /// Content hash of the definition; changes force a rebuild.
    pub structure_version: String,
}

impl ResolvedPreAggregation {
    pub fn is_rollup(&self) -> bool {
        self.kind == PreAggregationType::Rollup
    }

    pub fn is_partitioned(&self) -> bool {
        self.partition_granularity.is_some()
    }
}

/// Immutable, validated schema catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    cubes: Vec<ResolvedCube>,
    measures: Vec<ResolvedMeasure>,
    dimensions: Vec<ResolvedDimension>,
    pre_aggregations: Vec<ResolvedPreAggregation>,
    cube_index: HashMap<String, CubeId>,
    measure_index: HashMap<String, MeasureId>,
    dimension_index: HashMap<String, DimensionId>,
    pre_aggregation_index: HashMap<PreAggregationId, PreAggregationIndex>,
}

impl Catalog {
    /// Resolve and validate a catalog.
    pub fn resolve(spec: CatalogSpec) -> SchemaResult<Self> {
        let mut catalog = Catalog {
            cubes: Vec::new(),
            measures: Vec::new(),
            dimensions: Vec::new(),
            pre_aggregations: Vec::new(),
            cube_index: HashMap::new(),
            measure_index: HashMap::new(),
            dimension_index: HashMap::new(),
            pre_aggregation_index: HashMap::new(),
        };

        // Pass 1: intern cubes and members so references can resolve in any order
        for cube in &spec.cubes {
            catalog.intern_cube(cube)?;
        }

        // Pass 2: references, joins and pre-aggregations
        for (i, cube) in spec.cubes.iter().enumerate() {
            let cube_id = CubeId(i);
            catalog.resolve_measure_references(cube_id, cube)?;
            catalog.resolve_joins(cube_id, cube)?;
        }

        catalog.compute_leaves()?;

        for (i, cube) in spec.cubes.iter().enumerate() {
            for (declaration_index, def) in cube.pre_aggregations.iter().enumerate() {
                catalog.resolve_pre_aggregation(CubeId(i), cube, declaration_index, def)?;
            }
        }

        Ok(catalog)
    }

    fn intern_cube(&mut self, cube: &Cube) -> SchemaResult<()> {
        if self.cube_index.contains_key(&cube.name) {
            return Err(SchemaError::Duplicate {
                kind: "cube",
                name: cube.name.clone(),
            });
        }
        let cube_id = CubeId(self.cubes.len());
        self.cube_index.insert(cube.name.clone(), cube_id);

        let mut measures = Vec::with_capacity(cube.measures.len());
        for measure in &cube.measures {
            let path = qualify(&cube.name, &measure.name);
            let id = MeasureId(self.measures.len());
            if self.measure_index.insert(path.clone(), id).is_some() {
                return Err(SchemaError::Duplicate {
                    kind: "measure",
                    name: path,
                });
            }
            self.measures.push(ResolvedMeasure {
                id,
                cube: cube_id,
                name: measure.name.clone(),
                path,
                kind: measure.kind,
                sql: measure.sql.clone(),
                references: Vec::new(),
                leaves: Vec::new(),
            });
            measures.push(id);
        }

        let mut dimensions = Vec::with_capacity(cube.dimensions.len());
        for dimension in &cube.dimensions {
            let path = qualify(&cube.name, &dimension.name);
            let id = DimensionId(self.dimensions.len());
            if self.dimension_index.insert(path.clone(), id).is_some() {
                return Err(SchemaError::Duplicate {
                    kind: "dimension",
                    name: path,
                });
            }
            self.dimensions.push(ResolvedDimension {
                id,
                cube: cube_id,
                name: dimension.name.clone(),
                path,
                kind: dimension.kind,
                primary_key: dimension.primary_key,
            });
            dimensions.push(id);
        }

        self.cubes.push(ResolvedCube {
            id: cube_id,
            name: cube.name.clone(),
            sql: cube.sql.clone(),
            measures,
            dimensions,
            joins: Vec::new(),
            pre_aggregations: Vec::new(),
        });
        Ok(())
    }

    fn resolve_measure_references(&mut self, cube_id: CubeId, cube: &Cube) -> SchemaResult<()> {
        for (measure, id) in cube.measures.iter().zip(self.cubes[cube_id.0].measures.clone()) {
            let mut references = Vec::new();
            for name in &measure.references {
                let target = self.find_measure(&qualify(&cube.name, name))?;
                if !references.contains(&target) {
                    references.push(target);
                }
            }
            // SQL tokens may also name dimensions or the cube itself
            for token in measure.sql_tokens() {
                let Some(path) = token_path(&cube.name, &token) else {
                    continue;
                };
                match self.measure_index.get(&path) {
                    Some(target) if !references.contains(target) => references.push(*target),
                    Some(_) => {}
                    None if self.dimension_index.contains_key(&path) => {}
                    None => return Err(SchemaError::UnknownMeasure(path)),
                }
            }
            self.measures[id.0].references = references;
        }
        Ok(())
    }

    fn resolve_joins(&mut self, cube_id: CubeId, cube: &Cube) -> SchemaResult<()> {
        let mut joins = Vec::with_capacity(cube.joins.len());
        for join in &cube.joins {
            let to = self.find_cube(&join.target)?;
            joins.push(ResolvedJoin {
                from: cube_id,
                to,
                relationship: join.relationship,
            });
        }
        self.cubes[cube_id.0].joins = joins;
        Ok(())
    }

    /// Build the reference graph, reject cycles, then collect leaves.
    fn compute_leaves(&mut self) -> SchemaResult<()> {
        let mut graph: DiGraph<MeasureId, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = self.measures.iter().map(|m| graph.add_node(m.id)).collect();
        for measure in &self.measures {
            for target in &measure.references {
                graph.add_edge(nodes[measure.id.0], nodes[target.0], ());
            }
        }

        let cycles: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| {
                // A single node is only a cycle if it has a self-loop
                scc.len() > 1 || graph.edges_connecting(scc[0], scc[0]).next().is_some()
            })
            .map(|scc| {
                scc.into_iter()
                    .map(|idx| self.measures[graph[idx].0].path.clone())
                    .collect()
            })
            .collect();
        if !cycles.is_empty() {
            return Err(SchemaError::CyclicMeasureReference { cycles });
        }

        for i in 0..self.measures.len() {
            let mut leaves = Vec::new();
            let mut seen = HashSet::new();
            self.collect_leaves(MeasureId(i), &mut seen, &mut leaves);
            self.measures[i].leaves = leaves;
        }
        Ok(())
    }

    fn collect_leaves(&self, id: MeasureId, seen: &mut HashSet<MeasureId>, out: &mut Vec<MeasureId>) {
        if !seen.insert(id) {
            return;
        }
        let measure = &self.measures[id.0];
        if measure.references.is_empty() {
            out.push(id);
            return;
        }
        for target in &measure.references {
            self.collect_leaves(*target, seen, out);
        }
    }

    fn resolve_pre_aggregation(
        &mut self,
        cube_id: CubeId,
        cube: &Cube,
        declaration_index: usize,
        def: &PreAggregationDef,
    ) -> SchemaResult<()> {
        let id = PreAggregationId::new(&cube.name, &def.name);
        if self.pre_aggregation_index.contains_key(&id) {
            return Err(SchemaError::Duplicate {
                kind: "pre-aggregation",
                name: id.to_string(),
            });
        }
        let invalid = |message: &str| SchemaError::InvalidPreAggregation {
            pre_aggregation: id.to_string(),
            message: message.to_string(),
        };

        let measures = def
            .measures
            .iter()
            .map(|name| self.find_measure(&qualify(&cube.name, name)))
            .collect::<SchemaResult<Vec<_>>>()?;
        let dimensions = def
            .dimensions
            .iter()
            .map(|name| self.find_dimension(&qualify(&cube.name, name)))
            .collect::<SchemaResult<Vec<_>>>()?;
        let time_dimension = def
            .time_dimension
            .as_ref()
            .map(|name| self.find_dimension(&qualify(&cube.name, name)))
            .transpose()?;

        match def.kind {
            PreAggregationType::OriginalSql => {
                if !measures.is_empty() || !dimensions.is_empty() || time_dimension.is_some() {
                    return Err(invalid("originalSql pre-aggregations cannot declare references"));
                }
            }
            PreAggregationType::Rollup => {
                if measures.is_empty() && dimensions.is_empty() && time_dimension.is_none() {
                    return Err(invalid("rollup references no members"));
                }
            }
        }

        if let Some(dim) = time_dimension {
            if self.dimensions[dim.0].kind != DimensionType::Time {
                return Err(invalid("time dimension must be of type time"));
            }
            if def.granularity.is_none() {
                return Err(invalid("time dimension requires a granularity"));
            }
        } else if def.granularity.is_some() {
            return Err(invalid("granularity requires a time dimension"));
        }

        let build_range = def
            .build_range
            .as_ref()
            .map(|[start, end]| DateRange::parse(start, end))
            .transpose()?;
        if let Some(partition) = def.partition_granularity {
            let Some(granularity) = def.granularity else {
                return Err(invalid("partitioning requires a time dimension"));
            };
            if !granularity.rolls_up_to(partition) {
                return Err(invalid("partition granularity must be coarser than granularity"));
            }
            if build_range.is_none() {
                return Err(invalid("partitioned pre-aggregations require a build range"));
            }
        }

        let refresh_key = def.refresh_key.clone().or_else(|| cube.refresh_key.clone());
        if let Some(key) = &refresh_key {
            validate_refresh_key(&id, key)?;
        }

        let structure_version =
            short_hash(&(&cube.sql, def)).map_err(|e| invalid(&e.to_string()))?;

        let index = PreAggregationIndex(self.pre_aggregations.len());
        self.pre_aggregation_index.insert(id.clone(), index);
        self.cubes[cube_id.0].pre_aggregations.push(index);
        self.pre_aggregations.push(ResolvedPreAggregation {
            index,
            id,
            cube: cube_id,
            kind: def.kind,
            declaration_index,
            measures,
            dimensions,
            time_dimension,
            granularity: def.granularity,
            partition_granularity: def.partition_granularity,
            build_range,
            refresh_key,
            location: def.location,
            scheduled_refresh: def.scheduled_refresh,
            structure_version,
        });
        Ok(())
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn cubes(&self) -> &[ResolvedCube] {
        &self.cubes
    }

    pub fn cube(&self, id: CubeId) -> &ResolvedCube {
        &self.cubes[id.0]
    }

    pub fn measure(&self, id: MeasureId) -> &ResolvedMeasure {
        &self.measures[id.0]
    }

    pub fn dimension(&self, id: DimensionId) -> &ResolvedDimension {
        &self.dimensions[id.0]
    }

    pub fn pre_aggregation(&self, index: PreAggregationIndex) -> &ResolvedPreAggregation {
        &self.pre_aggregations[index.0]
    }

    /// All pre-aggregations, cube declaration order then definition order.
    pub fn pre_aggregations(&self) -> &[ResolvedPreAggregation] {
        &self.pre_aggregations
    }

    pub fn find_cube(&self, name: &str) -> SchemaResult<CubeId> {
        self.cube_index
            .get(name)
            .copied()
            .ok_or_else(|| SchemaError::UnknownCube(name.to_string()))
    }

    /// Find a measure by qualified `Cube.member` path.
    pub fn find_measure(&self, path: &str) -> SchemaResult<MeasureId> {
        self.measure_index
            .get(path)
            .copied()
            .ok_or_else(|| SchemaError::UnknownMeasure(path.to_string()))
    }

    /// Find a dimension by qualified `Cube.member` path.
    pub fn find_dimension(&self, path: &str) -> SchemaResult<DimensionId> {
        self.dimension_index
            .get(path)
            .copied()
            .ok_or_else(|| SchemaError::UnknownDimension(path.to_string()))
    }

    pub fn find_pre_aggregation(&self, id: &PreAggregationId) -> Option<&ResolvedPreAggregation> {
        self.pre_aggregation_index
            .get(id)
            .map(|index| &self.pre_aggregations[index.0])
    }

    /// Joins declared between two cubes, in either direction.
    pub fn joins_between(&self, a: CubeId, b: CubeId) -> impl Iterator<Item = &ResolvedJoin> {
        self.cubes[a.0]
            .joins
            .iter()
            .filter(move |j| j.to == b)
            .chain(self.cubes[b.0].joins.iter().filter(move |j| j.to == a))
    }
}

/// Qualify a member name with its cube unless it already is.
pub fn qualify(cube: &str, name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{}.{}", cube, name)
    }
}

/// Member path a SQL token refers to, or `None` for `{CUBE}`.
///
/// `{CUBE.member}` is the owning cube's member.
pub fn token_path(cube: &str, token: &str) -> Option<String> {
    match token.split_once('.') {
        None if token == CUBE_TOKEN => None,
        Some((CUBE_TOKEN, member)) => Some(format!("{}.{}", cube, member)),
        _ => Some(qualify(cube, token)),
    }
}

fn validate_refresh_key(id: &PreAggregationId, key: &RefreshKeyDef) -> SchemaResult<()> {
    let invalid = |message: String| SchemaError::InvalidRefreshKey {
        pre_aggregation: id.to_string(),
        message,
    };
    if key.immutable && (key.sql.is_some() || key.every.is_some()) {
        return Err(invalid("immutable refresh keys take no sql or every".to_string()));
    }
    if let Some(every) = &key.every {
        parse_duration(every).map_err(|e| invalid(e.to_string()))?;
    }
    Ok(())
}
