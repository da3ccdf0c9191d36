use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use sstash_types::digest::ForRestore;

use crate::restore::plan::NodePlan;

use super::inventory::ToUpload;
use super::name::{parse_name, SstableName};

const DATA_COMPONENT: &str = "Data.db";

/// `(version, component)` pair within one generation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionComponent {
    pub version: String,
    pub component: String,
}

impl VersionComponent {
    pub fn file_name(&self, generation: u32) -> String {
        format!("{}-{}-big-{}", self.version, generation, self.component)
    }
}

impl fmt::Display for VersionComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.version, self.component)
    }
}

pub type TableComponents = BTreeMap<VersionComponent, ForRestore>;

/// The `Data.db` digest is the generation's identity.
fn data_digest(components: &TableComponents) -> Option<ForRestore> {
    components
        .iter()
        .find(|(vc, _)| vc.component == DATA_COMPONENT)
        .map(|(_, digest)| *digest)
}

pub type ComponentsByGeneration = BTreeMap<u32, TableComponents>;

/// A table or index directory.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location {
    pub keyspace: String,
    pub table: String,
    pub index: String,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index.is_empty() {
            write!(f, "{}/{}", self.keyspace, self.table)
        } else {
            write!(f, "{}/{}/{}", self.keyspace, self.table, self.index)
        }
    }
}

pub type ComponentsByLocation = BTreeMap<Location, ComponentsByGeneration>;

fn add_component(map: &mut ComponentsByLocation, name: SstableName, digest: ForRestore) {
    let location = Location {
        keyspace: name.keyspace.clone(),
        table: name.table.clone(),
        index: name.index.clone(),
    };
    let vc = VersionComponent {
        version: name.version,
        component: name.component,
    };
    map.entry(location)
        .or_default()
        .entry(name.generation)
        .or_default()
        .insert(vc, digest);
}

/// Group a node plan's files by location and generation. Known metadata
/// files are silently dropped; anything else unparseable is reported.
pub fn collate_node_plan(node_plan: &NodePlan) -> (ComponentsByLocation, Vec<String>) {
    let mut result = ComponentsByLocation::new();
    let mut unrecognized = Vec::new();
    for (file_name, digest) in &node_plan.files {
        match parse_name(file_name) {
            Some(parsed) => add_component(&mut result, parsed, *digest),
            None => {
                if !is_known_metadata(file_name) {
                    unrecognized.push(file_name.clone());
                }
            }
        }
    }
    (result, unrecognized)
}

/// Same grouping for files already on disk.
pub fn collate_existing_files(
    files: &BTreeMap<String, ToUpload>,
) -> (ComponentsByLocation, Vec<String>) {
    let mut result = ComponentsByLocation::new();
    let mut unrecognized = Vec::new();
    for (file_name, to_upload) in files {
        match parse_name(file_name) {
            Some(parsed) => {
                add_component(&mut result, parsed, to_upload.digests.for_restore())
            }
            None => {
                if !is_known_metadata(file_name) {
                    unrecognized.push(file_name.clone());
                }
            }
        }
    }
    (result, unrecognized)
}

fn is_known_metadata(file_name: &str) -> bool {
    file_name.ends_with("manifest.json") || file_name.ends_with("schema.cql")
}

/// What to do for one location: per target generation, the components
/// already on disk and the components to download. Generation numbers never
/// collide, and no two generations share a `Data.db` digest.
#[derive(Clone, Debug, Default)]
pub struct LocationPlan {
    pub generation_by_data: BTreeMap<ForRestore, u32>,
    pub generations: BTreeMap<u32, ComponentsPlan>,
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ComponentsPlan {
    pub existing: TableComponents,
    pub download: TableComponents,
}

impl LocationPlan {
    /// Register what is already on disk; these generations keep their
    /// numbers and their `Data.db` digests suppress matching downloads.
    fn add_existing(&mut self, existing: &ComponentsByGeneration) {
        for (generation, components) in existing {
            let Some(dd) = data_digest(components) else {
                self.warnings.push(format!(
                    "existing generation without data: {generation}: {components:?}"
                ));
                // Mark the number as unavailable anyway.
                self.generations.entry(*generation).or_default();
                continue;
            };
            self.generation_by_data.insert(dd, *generation);
            let entry = self.generations.entry(*generation).or_default();
            entry.existing = components.clone();
        }
    }

    /// Merge one source's restore generations, assigning each novel
    /// `Data.db` digest a fresh non-colliding generation number starting
    /// from 1.
    fn add_restore(&mut self, download: &ComponentsByGeneration) {
        let mut generation_to_try: u32 = 1;
        for (source_generation, components) in download {
            let Some(dd) = data_digest(components) else {
                self.warnings.push(format!(
                    "restore generation without data: {source_generation}: {components:?}"
                ));
                continue;
            };

            if self.generation_by_data.contains_key(&dd) {
                // The disk (or an earlier source) already has this data.
                continue;
            }

            let mut target_generation = generation_to_try;
            while self.generations.contains_key(&target_generation) {
                target_generation += 1;
            }
            generation_to_try = target_generation + 1;

            self.generation_by_data.insert(dd, target_generation);
            let entry = self.generations.entry(target_generation).or_default();
            entry.download = components.clone();
        }
    }

    fn description_items(&self, download: bool, existing: bool) -> Vec<DescriptionItem> {
        let mut items = Vec::new();
        for (generation, plan) in &self.generations {
            if download {
                for vc in plan.download.keys() {
                    items.push(DescriptionItem {
                        text: vc.file_name(*generation),
                        is_download: true,
                    });
                }
            }
            if existing {
                for vc in plan.existing.keys() {
                    items.push(DescriptionItem {
                        text: vc.file_name(*generation),
                        is_download: false,
                    });
                }
            }
        }
        items.sort();
        items
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct DescriptionItem {
    text: String,
    is_download: bool,
}

pub type LocationPlans = BTreeMap<Location, LocationPlan>;

/// Combine what is on disk with any number of per-node restore views.
pub fn build_location_plans(
    existing: &ComponentsByLocation,
    node_plans: &[&ComponentsByLocation],
) -> LocationPlans {
    let mut result = LocationPlans::new();

    for (location, components) in existing {
        result
            .entry(location.clone())
            .or_default()
            .add_existing(components);
    }

    for node_plan in node_plans {
        for (location, components) in *node_plan {
            result
                .entry(location.clone())
                .or_default()
                .add_restore(components);
        }
    }

    result
}

/// Flatten plans back to `path -> digest` for the restore worker.
pub fn to_restore_files(
    plans: &LocationPlans,
    include_existing: bool,
) -> BTreeMap<String, ForRestore> {
    let mut result = BTreeMap::new();
    for (location, location_plan) in plans {
        for (generation, components_plan) in &location_plan.generations {
            let mut emit = |components: &TableComponents| {
                for (vc, digest) in components {
                    let name = SstableName {
                        keyspace: location.keyspace.clone(),
                        table: location.table.clone(),
                        index: location.index.clone(),
                        version: vc.version.clone(),
                        generation: *generation,
                        component: vc.component.clone(),
                    };
                    result.insert(name.to_string(), *digest);
                }
            };
            if include_existing {
                emit(&components_plan.existing);
            }
            emit(&components_plan.download);
        }
    }
    result
}

/// Render the plan for operator review: `!` warnings, `+` downloads,
/// plain existing files, grouped per location.
pub fn describe_to(
    plans: &LocationPlans,
    w: &mut impl Write,
    warnings: bool,
    existing: bool,
    download: bool,
) -> std::io::Result<()> {
    for (location, location_plan) in plans {
        let mut wrote_header = false;
        if warnings && !location_plan.warnings.is_empty() {
            writeln!(w, "\t{location}")?;
            wrote_header = true;
            for msg in &location_plan.warnings {
                writeln!(w, "!\t\t{msg}")?;
            }
        }
        let items = location_plan.description_items(download, existing);
        if !items.is_empty() && !wrote_header {
            writeln!(w, "\t{location}")?;
        }
        for item in items {
            if item.is_download {
                writeln!(w, "+\t\t{}", item.text)?;
            } else {
                writeln!(w, "\t\t{}", item.text)?;
            }
        }
    }
    Ok(())
}
