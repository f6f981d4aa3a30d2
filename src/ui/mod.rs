pub mod icons;
pub mod output;
pub mod progress;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{deleted, dependent, dim, error, header, info, section, success, timing, warn};
pub use progress::{record_bar, Spinner};
pub use table::{ingest_table, plan_table, stats_table, TableBuilder};
pub use theme::{theme, Theme};
