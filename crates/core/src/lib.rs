pub mod connection_manager;
pub mod connections;
pub mod dispatch;
pub mod grid;
pub mod loader;
pub mod navigator;
pub mod panes;
pub mod settings;
pub mod sql;
pub mod text_input;
pub mod tree;
pub mod tree_nav;
pub mod value;
