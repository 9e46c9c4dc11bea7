// Full pipeline (apply / why-run)
pub mod deploy;

// Local-only commands
pub mod package;
pub mod run_list;
