//! WHERE flattening into OR of AND-blocks.

use quarry_sql::Condition;

/// Flatten `condition` into a disjunction of conjunctions.
///
/// Inside each block equalities come first, so index matching consumes
/// them before ranges. Returns `None` when the expansion would produce
/// more than `max_blocks` blocks.
pub fn flatten(condition: &Condition, max_blocks: usize) -> Option<Vec<Vec<Condition>>> {
    let mut blocks = dnf(condition, max_blocks)?;
    for block in &mut blocks {
        // stable: keeps the written order within each group
        block.sort_by_key(|c| !c.is_equality());
    }
    Some(blocks)
}

fn dnf(condition: &Condition, max_blocks: usize) -> Option<Vec<Vec<Condition>>> {
    match condition {
        Condition::Or(parts) => {
            let mut blocks = Vec::new();
            for part in parts {
                blocks.extend(dnf(part, max_blocks)?);
                if blocks.len() > max_blocks {
                    return None;
                }
            }
            Some(blocks)
        }
        Condition::And(parts) => {
            let mut blocks: Vec<Vec<Condition>> = vec![Vec::new()];
            for part in parts {
                let alternatives = dnf(part, max_blocks)?;
                if blocks.len().saturating_mul(alternatives.len()) > max_blocks {
                    return None;
                }
                blocks = blocks
                    .iter()
                    .flat_map(|prefix| {
                        alternatives.iter().map(move |alt| {
                            let mut block = prefix.clone();
                            block.extend(alt.iter().cloned());
                            block
                        })
                    })
                    .collect();
            }
            Some(blocks)
        }
        Condition::Constant(true) => Some(vec![Vec::new()]),
        Condition::Constant(false) => Some(Vec::new()),
        other => Some(vec![vec![other.clone()]]),
    }
}
