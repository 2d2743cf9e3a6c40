//! The host side of the script boundary: the value model, the type
//! registry that scripts resolve names against, and built-in types.

mod catalogue;
pub mod format;
pub mod types;
pub mod value;

pub use format::format_value;
pub use types::{HostError, HostFn, HostType, HostTypeRegistry, StaticMember, TypeLookup};
pub use value::{Color, DateKind, DateValue, FormatSpec, Geometry, HostValue, VarTable};
