mod process;

pub use process::{is_process_alive, is_same_command, kill_process};
