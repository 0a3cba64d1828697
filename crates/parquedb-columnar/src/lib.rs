// parquedb-columnar - Parquet layer
//
// Writes standards-conformant Parquet 1.0 files from dynamic rows
// (row-group partitioning, per-column codecs, dictionary encoding, chunk
// statistics, bloom filters, footer metadata) and reads them back with
// row-group pruning, bloom refinement, column projection, row filtering and
// lazy streaming. All reader byte access goes through the AsyncBuffer seam
// so files are fetched by range, never assumed resident.

mod bloom;
mod error;
mod filter;
mod options;
mod reader;
mod rows;
mod writer;

pub use error::{ColumnarError, Result};
pub use filter::{matches_row, relevant_row_groups, Filter, FilterOp};
pub use options::{Codec, WriterOptions};
pub use reader::{read_metadata, ParquetSource, ReadOptions, RowStream};
pub use rows::{infer_write_schema, Row};
pub use writer::{
    append_table, compact_table, read_all_rows_sync, write_table, write_table_inferred,
    WriteResult,
};
