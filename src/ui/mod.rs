mod spinner;
mod status;
mod table;

pub use spinner::{start_spinner, with_spinner};

pub use status::{print_command_status, CommandStatus};

pub use table::{header, styled_table, truncate};
