use super::{FactKind, FactStore};
use crate::prelude::*;
use crate::{err, Result, ValidationError};

const SHORT_FACTS_FILE: &str = "short_facts.txt";
const MEDIUM_FACTS_FILE: &str = "medium_facts.txt";

/// The pool of facts is chosen by the name of the uploaded file
pub(crate) fn kind_from_file_name(name: &str) -> Result<FactKind> {
    match name {
        SHORT_FACTS_FILE => Ok(FactKind::Short),
        MEDIUM_FACTS_FILE => Ok(FactKind::Medium),
        _ => Err(err!(ValidationError::FactsFileName { name })),
    }
}

/// Short facts are separate lines. Medium facts are paragraphs separated
/// with blank lines.
pub(crate) fn parse_facts(kind: FactKind, content: &str) -> Vec<String> {
    let content = content.trim_start_matches('\u{feff}');

    match kind {
        FactKind::Short => content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .collect(),
        FactKind::Medium => {
            let mut paragraphs = vec![];
            let mut current: Vec<&str> = vec![];

            for line in content.lines().map(str::trim_end) {
                if !line.trim().is_empty() {
                    current.push(line);
                    continue;
                }
                if !current.is_empty() {
                    paragraphs.push(current.join("\n").trim().to_owned());
                    current.clear();
                }
            }

            if !current.is_empty() {
                paragraphs.push(current.join("\n").trim().to_owned());
            }

            paragraphs
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ImportedFacts {
    pub(crate) kind: FactKind,
    pub(crate) count: u64,
}

/// Replaces the pool of facts with the contents of the uploaded file
pub(crate) async fn import_facts(
    store: &dyn FactStore,
    file_name: &str,
    content: &str,
) -> Result<ImportedFacts> {
    let kind = kind_from_file_name(file_name)?;
    let facts = parse_facts(kind, content);

    if facts.is_empty() {
        return Err(err!(ValidationError::EmptyFactsFile));
    }

    let count = store.replace(kind, facts).await?;

    info!(%kind, count, "Imported facts");

    Ok(ImportedFacts { kind, count })
}
