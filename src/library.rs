/// Book model and reading-state rules.
pub mod book;
/// Books directory scanner.
pub mod scanner;

pub use scanner::{ScanReport, Scanner};
