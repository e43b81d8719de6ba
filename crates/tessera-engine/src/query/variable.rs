//! Variable registry.
//!
//! Variables are the single-producer registers that carry values between
//! plan nodes. Every variable gets a [`VariableId`] that doubles as its
//! register index during execution. Variables declared without a name are
//! synthetic: they belong to the optimizer and never show up to users.

use tessera_common::utils::hash::{FastHashMap, fast_map};
use tessera_common::{Error, Result, VariableId};

/// A declared variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Register id.
    pub id: VariableId,
    /// Name, unique within the registry. Synthetic names start with `#`.
    pub name: String,
    /// True if the variable was named by the query author.
    pub user_defined: bool,
    /// Set once the variable has been retired by the optimizer.
    pub retired: bool,
}

/// Allocates and names the variables of one query, including all of its
/// subqueries.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    variables: Vec<Variable>,
    by_name: FastHashMap<String, VariableId>,
}

impl VariableRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            variables: Vec::new(),
            by_name: fast_map(),
        }
    }

    /// Declares a variable. `None` yields a synthetic variable.
    ///
    /// Declaring a user name twice is a contract violation.
    pub fn declare(&mut self, name: Option<&str>) -> Result<VariableId> {
        let id = VariableId::new(self.variables.len() as u32);
        let (name, user_defined) = match name {
            Some(n) => {
                if n.is_empty() || n.starts_with('#') {
                    return Err(Error::Internal(format!("invalid variable name '{n}'")));
                }
                (n.to_string(), true)
            }
            None => (format!("#{}", id.as_u32()), false),
        };
        if self.by_name.contains_key(&name) {
            return Err(Error::Internal(format!("variable '{name}' declared twice")));
        }
        self.by_name.insert(name.clone(), id);
        self.variables.push(Variable {
            id,
            name,
            user_defined,
            retired: false,
        });
        Ok(id)
    }

    /// Declares a synthetic variable.
    pub fn declare_synthetic(&mut self) -> Result<VariableId> {
        self.declare(None)
    }

    /// Returns the variable with `id`.
    #[must_use]
    pub fn get(&self, id: VariableId) -> Option<&Variable> {
        self.variables.get(id.index())
    }

    /// Looks a variable up by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<VariableId> {
        self.by_name.get(name).copied()
    }

    /// Returns the display name of `id`.
    #[must_use]
    pub fn name(&self, id: VariableId) -> String {
        self.get(id)
            .map_or_else(|| format!("#{}", id.as_u32()), |v| v.name.clone())
    }

    /// Returns true if `id` was named by the query author.
    #[must_use]
    pub fn is_user_defined(&self, id: VariableId) -> bool {
        self.get(id).is_some_and(|v| v.user_defined)
    }

    /// Marks a variable as no longer produced or read by any node.
    pub fn retire(&mut self, id: VariableId) -> Result<()> {
        let var = self
            .variables
            .get_mut(id.index())
            .ok_or_else(|| Error::Internal(format!("unknown variable {id}")))?;
        var.retired = true;
        Ok(())
    }

    /// Returns true if `id` has been retired.
    #[must_use]
    pub fn is_retired(&self, id: VariableId) -> bool {
        self.get(id).is_some_and(|v| v.retired)
    }

    /// Number of registers an execution row needs.
    #[must_use]
    pub fn register_count(&self) -> usize {
        self.variables.len()
    }

    /// Iterates over all variables in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }
}
