pub mod start_import;
