//! The wire protocol: pure codecs, no I/O state.
//!
//! Everything in here is a function of byte buffers. Socket handling lives
//! in [`crate::conn`]; the reader task hands complete frames to the parse
//! functions of this module, and the writer task sends buffers produced by
//! the emit functions.

pub(crate) mod frame;
pub(crate) mod invocation;
pub(crate) mod login;
pub mod response;
pub mod table;
pub(crate) mod type_tag;
pub(crate) mod util;
pub(crate) mod value;

mod decimal;

pub use response::{ClientResponse, ResponseStatus};
pub use table::{ColumnInfo, VoltTable};
pub use type_tag::TypeTag;
pub use value::VoltValue;
