use std::fmt;

/// A parsed SSTable component path:
/// `keyspace/table[/index]/version-generation-big-component`.
///
/// Parsing round-trips: re-emitting a parsed name reproduces the original
/// path byte for byte.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SstableName {
    pub keyspace: String,
    pub table: String,
    /// Empty for non-index components.
    pub index: String,
    pub version: String,
    pub generation: u32,
    pub component: String,
}

impl fmt::Display for SstableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index.is_empty() {
            write!(
                f,
                "{}/{}/{}-{}-big-{}",
                self.keyspace, self.table, self.version, self.generation, self.component
            )
        } else {
            write!(
                f,
                "{}/{}/{}/{}-{}-big-{}",
                self.keyspace, self.table, self.index, self.version, self.generation, self.component
            )
        }
    }
}

pub fn parse_name(data_relative_path: &str) -> Option<SstableName> {
    let path_parts: Vec<&str> = data_relative_path.split('/').collect();
    let (keyspace, table, index, raw) = match path_parts.as_slice() {
        [keyspace, table, raw] => (*keyspace, *table, "", *raw),
        [keyspace, table, index, raw] => (*keyspace, *table, *index, *raw),
        _ => return None,
    };

    let name_parts: Vec<&str> = raw.split('-').collect();
    if name_parts.len() != 4 || name_parts[2] != "big" {
        return None;
    }
    let generation: u32 = name_parts[1].parse().ok()?;

    Some(SstableName {
        keyspace: keyspace.to_string(),
        table: table.to_string(),
        index: index.to_string(),
        version: name_parts[0].to_string(),
        generation,
        component: name_parts[3].to_string(),
    })
}
