mod cursor;
mod row;

pub use cursor::{QueryOutcome, ResultCursor};
pub use row::{Row, index_columns};
