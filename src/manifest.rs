use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::Result;

/// One unit of work from the species manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkItem {
    /// Needs a formula search that expands into record ids.
    Formula(String),
    /// A record id fetched directly.
    Record(String),
}

impl WorkItem {
    /// Key written to the checkpoint file of the item's category.
    pub fn key(&self) -> &str {
        match self {
            WorkItem::Formula(key) | WorkItem::Record(key) => key,
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::Formula(formula) => write!(f, "formula {formula}"),
            WorkItem::Record(id) => write!(f, "record {id}"),
        }
    }
}

/// Splits manifest text into work items: every formula first, then every raw id.
///
/// A line of two or more whitespace separated columns is a species record whose
/// formula is the second to last column. Anything else is taken as a bare record id.
pub fn parse_manifest(text: &str) -> Vec<WorkItem> {
    let mut formulae = Vec::new();
    let mut records = Vec::new();
    let mut seen = HashSet::new();

    for line in text.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        let item = match columns.as_slice() {
            [] => continue,
            [.., formula, _] => WorkItem::Formula((*formula).to_owned()),
            _ => WorkItem::Record(line.trim().to_owned()),
        };
        if !seen.insert(item.clone()) {
            continue;
        }
        match item {
            WorkItem::Formula(_) => formulae.push(item),
            WorkItem::Record(_) => records.push(item),
        }
    }

    formulae.extend(records);
    formulae
}

pub async fn load_manifest(path: &Path) -> Result<Vec<WorkItem>> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(parse_manifest(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formulae_come_before_records() {
        let text = "\
C7732185
Water H2O 7732-18-5
Methane CH4 74-82-8

C558134
Water H2O 7732-18-5
C7732185
";
        let items = parse_manifest(text);
        assert_eq!(
            items,
            vec![
                WorkItem::Formula("H2O".into()),
                WorkItem::Formula("CH4".into()),
                WorkItem::Record("C7732185".into()),
                WorkItem::Record("C558134".into()),
            ]
        );
    }

    #[test]
    fn formula_is_second_to_last_column() {
        let items = parse_manifest("Carbon dioxide CO2 124-38-9\n");
        assert_eq!(items, vec![WorkItem::Formula("CO2".into())]);
    }

    #[test]
    fn single_token_lines_are_record_ids() {
        let items = parse_manifest("   C64175  \n");
        assert_eq!(items, vec![WorkItem::Record("C64175".into())]);
        assert_eq!(items[0].key(), "C64175");
    }
}
