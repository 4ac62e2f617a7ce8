//! Dependency ordering for service roles.

use std::collections::HashSet;
use thiserror::Error;

/// Why a set of roles has no valid start order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("role '{role}' depends on unknown role '{dependency}'")]
    UnknownDependency { role: String, dependency: String },

    #[error("dependency cycle through roles: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Order roles so every role comes after all of its dependencies.
///
/// Each entry is `(name, depends_on)`. Among roles whose dependencies are
/// already placed, the one registered first goes next, so the result is
/// deterministic and matches declaration order where the graph allows.
pub fn topological_order(roles: &[(&str, Vec<&str>)]) -> Result<Vec<String>, OrderError> {
    let known: HashSet<&str> = roles.iter().map(|(name, _)| *name).collect();
    for (name, deps) in roles {
        if let Some(missing) = deps.iter().find(|d| !known.contains(*d)) {
            return Err(OrderError::UnknownDependency {
                role: name.to_string(),
                dependency: missing.to_string(),
            });
        }
    }

    let mut placed: HashSet<&str> = HashSet::with_capacity(roles.len());
    let mut order = Vec::with_capacity(roles.len());

    while order.len() < roles.len() {
        let next = roles
            .iter()
            .find(|(name, deps)| !placed.contains(name) && deps.iter().all(|d| placed.contains(d)));

        match next {
            Some((name, _)) => {
                placed.insert(*name);
                order.push(name.to_string());
            }
            None => {
                let stuck = roles
                    .iter()
                    .filter(|(name, _)| !placed.contains(name))
                    .map(|(name, _)| name.to_string())
                    .collect();
                return Err(OrderError::Cycle(stuck));
            }
        }
    }

    Ok(order)
}
