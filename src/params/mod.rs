//! Namespaced, ranked and typed pipeline parameters.

pub mod key;
pub mod store;
pub mod value;

pub use key::NamespaceKey;
pub use store::ParameterStore;
pub use value::{Ranking, ValueType};
