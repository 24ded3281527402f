pub mod history;
pub mod research;
pub mod serve;
pub mod usage;
