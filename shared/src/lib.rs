pub mod errors;
pub mod items;
pub mod logging;
pub mod results;
pub mod storage;
