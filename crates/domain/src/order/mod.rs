//! Order aggregate and its envelope decoder.

mod decoder;
mod model;
mod validation;

pub use decoder::{DecodedOrder, decode_order};
pub use model::{Delivery, Item, Order, Payment};
pub use validation::ValidationWarning;
