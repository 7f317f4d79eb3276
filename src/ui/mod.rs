pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{error, header, section, status, success, warn};
pub use table::{PollRow, TableBuilder, TallyRow, poll_table, stats_table, tally_rows, tally_table};
pub use theme::{Theme, Tone, theme};
