/// Module for handling relayer metric API
mod metric;
pub use metric::*;

/// Module for handling relayer info API
mod info;
pub use info::*;

/// Module for querying the relay state of a message
mod query;
pub use query::*;

#[cfg(test)]
mod tests;
