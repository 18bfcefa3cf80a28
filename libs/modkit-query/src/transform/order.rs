use crate::sort::{Direction, NullHandling, Order};
use crate::token::QueryTokenStream;
use crate::Error;

/// Variables visible to sort qualification at the outermost query level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AliasRegistry {
    /// Root and join variables.
    pub variables: Vec<String>,
    /// Aliases of selected items.
    pub projections: Vec<String>,
    /// Alias of the first root of the branch receiving the sort.
    pub primary: Option<String>,
}

impl AliasRegistry {
    pub fn register_variable(&mut self, alias: &str) {
        if !self.variables.iter().any(|a| a == alias) {
            self.variables.push(alias.to_owned());
        }
    }

    pub fn register_projection(&mut self, alias: &str) {
        if !self.projections.iter().any(|a| a == alias) {
            self.projections.push(alias.to_owned());
        }
    }

    fn is_variable(&self, name: &str) -> bool {
        self.variables.iter().any(|a| a == name)
    }

    fn is_projection(&self, name: &str) -> bool {
        self.projections.iter().any(|a| a == name)
    }

    /// Render one sort key as an `order by` item.
    ///
    /// # Errors
    /// Returns `Error::InvalidSortProperty` for anything that is not a plain
    /// property path or a known alias.
    pub fn order_item(&self, order: &Order) -> Result<QueryTokenStream, Error> {
        let property = order.property.as_str();
        let reference = if self.is_projection(property) {
            property.to_owned()
        } else {
            if !is_property_path(property) {
                return Err(Error::InvalidSortProperty(property.to_owned()));
            }
            let head = property.split('.').next().unwrap_or(property);
            match &self.primary {
                _ if self.is_variable(head) => property.to_owned(),
                Some(alias) => format!("{alias}.{property}"),
                None => property.to_owned(),
            }
        };

        let mut item = QueryTokenStream::new();
        if order.ignore_case {
            item.append_text(format!("lower({reference})"));
        } else {
            item.append_text(reference);
        }
        item.append_text(match order.direction {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        });
        match order.null_handling {
            NullHandling::Native => {}
            NullHandling::NullsFirst => {
                item.append_text("nulls first");
            }
            NullHandling::NullsLast => {
                item.append_text("nulls last");
            }
        }
        Ok(item)
    }
}

fn is_property_path(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|seg| {
            !seg.is_empty() && seg.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        })
}
