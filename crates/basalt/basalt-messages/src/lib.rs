pub mod payload_frame;
pub mod top_of_book;

pub use payload_frame::PayloadFrame;
pub use top_of_book::{SymbolId, TopOfBook};
