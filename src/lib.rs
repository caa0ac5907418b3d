pub mod canon;
pub mod codec;
pub mod fs_state;
pub mod generate;
pub mod graph;
pub mod graph_file;
pub mod results;
pub mod results_file;
