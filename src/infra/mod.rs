pub mod file_table_sink;
pub mod fs_batch_source;
pub mod silver_layout;
pub mod silver_output_reader;

pub use file_table_sink::FileTableSink;
pub use fs_batch_source::FsBatchSource;
pub use silver_output_reader::SilverOutputReader;
