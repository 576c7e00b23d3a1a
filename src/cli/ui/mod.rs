mod output;

pub use output::{Output, budget, usd};
