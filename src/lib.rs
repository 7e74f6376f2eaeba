// Transit Cube - Core Library
// Daily bus/halte transaction ETL: CSV → staging → cube → CSV

pub mod config;
pub mod db;
pub mod export;
pub mod loader;
pub mod normalize;
pub mod pipeline;
pub mod records;
pub mod schedule;
pub mod transform;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use db::{
    get_recent_run_events, get_run_events, init_schemas, insert_run_event, open_in_memory,
    RunEvent, RunStatus, Warehouse,
};
pub use export::{
    export_file_name, export_to_csv, get_card_type_rows, get_route_rows, get_tarif_rows,
    CardTypeRow, ExportedFile, RouteRow, TarifRow,
};
pub use loader::{load_to_staging, FileLoadStat};
pub use normalize::normalize_body_no;
pub use pipeline::{Pipeline, RunReport, Task, TaskOutcome};
pub use records::SourceFile;
pub use schedule::{run_scheduled, DailySchedule};
pub use transform::{transform_in_warehouse, CubeTable, TransformStat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
