// Durable side of the harvester.
//
// Records go to a CSV file or Postgres, evidence to PNG files on disk, and
// the watermark to a small JSON document next to the records.

pub mod csv;
pub mod evidence;
pub mod postgres;
pub mod watermark;

pub use self::csv::CsvRecordStore;
pub use self::evidence::FsEvidenceStore;
pub use self::postgres::PostgresRecordStore;
pub use self::watermark::FileWatermarkStore;
